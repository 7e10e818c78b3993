//! Application startup utilities module.
//!
//! Shared initialization for the long-running server and one-shot CLI
//! commands.

mod app;
mod logging;
mod shutdown;

pub use app::PylonApp;
pub use logging::{LogRotation, LoggingConfig, LoggingGuard, init_logging};
pub use shutdown::wait_for_shutdown_signal;
