//! Job loggers.

use tracing::{error, info};

/// Server-side logger for a job. Receives `log` bus events and internal
/// error reports.
pub trait JobLogger: Send + Sync {
    fn log(&self, job_id: &str, message: &str);
    fn error(&self, job_id: &str, message: &str);
}

/// Logs through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl JobLogger for TracingLogger {
    fn log(&self, job_id: &str, message: &str) {
        info!(job_id = %job_id, "{}", message);
    }

    fn error(&self, job_id: &str, message: &str) {
        error!(job_id = %job_id, "{}", message);
    }
}
