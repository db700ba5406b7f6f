//! Injectable diagnostic sink.

use tracing::{error, info};

/// Sink for scheduler lifecycle and fault messages.
///
/// The scheduler never makes control-flow decisions based on logging.
pub trait Logger: Send + Sync {
    fn info(&self, msg: &str);
    fn error(&self, msg: &str);
}

/// Default sink: forwards to `tracing` under the `timebus` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, msg: &str) {
        info!(target: "timebus", "{msg}");
    }

    fn error(&self, msg: &str) {
        error!(target: "timebus", "{msg}");
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn info(&self, _msg: &str) {}

    fn error(&self, _msg: &str) {}
}
