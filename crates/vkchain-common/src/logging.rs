use tracing_subscriber::{fmt, EnvFilter};

/// Initialize structured logging with environment filter.
/// Set VKCHAIN_LOG=debug (or trace, info, warn, error) for verbosity control.
pub fn init_logging() {
    let _ = try_init_logging();
}

/// Like [`init_logging`], but reports whether the subscriber was installed.
///
/// A layer is loaded into someone else's process; when the host already set a
/// global subscriber this returns `false` and leaves it in place.
pub fn try_init_logging() -> bool {
    let filter = EnvFilter::try_from_env("VKCHAIN_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .is_ok()
}
