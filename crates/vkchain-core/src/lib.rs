//! Shared machinery for the vkchain validation layer: handle identity,
//! deferred-operation continuations, per-validator locking, settings and the
//! debug-report path.

pub mod config;
pub mod deferred;
pub mod error;
pub mod handle;
pub mod handle_map;
pub mod locking;
pub mod report;

pub use config::{LayerSettings, ValidationChecks};
pub use deferred::DeferredOperationRegistry;
pub use error::CoreError;
pub use handle::WrappedId;
pub use handle_map::{DisplayMap, HandleRegistry};
pub use locking::{Recording, ValidatorCell, ValidatorId};
pub use report::{DebugReport, Message, ObjectRef};
