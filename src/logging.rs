//! Structured logging setup, installed once per process (§4.8).

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

static LOGGING: OnceCell<()> = OnceCell::new();

/// Installs a `tracing-subscriber` `fmt` layer gated by `RUST_LOG` (default
/// `info`). Safe to call more than once — later calls are no-ops — so tests
/// and repeated CLI invocations within one process never panic on a double
/// init.
pub fn init_logging() {
    LOGGING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt().with_env_filter(filter).with_target(false).init();
    });
}
