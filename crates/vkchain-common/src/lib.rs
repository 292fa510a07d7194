pub mod logging;
pub mod platform;
