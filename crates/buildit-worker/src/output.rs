//! Output aggregation.
//!
//! [`JobOutput`] is the single subscriber of a job's event bus. It buffers
//! stdout and stderr, forwards each chunk to the queue as a progress delta
//! and turns interactive-mode and internal-error events into user-facing
//! stderr messages.

use buildit_core::bus::{BusEvent, BusSubscriber, EventBus, InternalError, OutputTag};
use buildit_core::event::{EventUpdate, QueueEventKind};
use std::backtrace::Backtrace;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

use crate::format::FormatterTable;
use crate::launch::InteractiveMode;
use crate::logger::JobLogger;
use crate::reporter::Reporter;

/// Shown on the job's stderr when pseudo-terminals are unavailable.
pub const DISABLE_INTERACTIVE_MESSAGE: &str =
    "forkpty not available in this environment. Set BUILDIT_DISABLE_PTY to true";

/// First line of every internal error shown to the user.
pub const INTERNAL_ERROR_PREAMBLE: &str =
    "Worker error occurred. Please report this to your BuildIt administrators. Thank you.";

/// Snapshot of a job's output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buffers {
    pub out: String,
    pub err: String,
    /// Stdout and stderr interleaved in arrival order.
    pub merged: String,
}

/// Append-only output buffers.
#[derive(Debug, Default)]
pub struct OutputBuffers {
    inner: Mutex<Buffers>,
}

impl OutputBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_stdout(&self, text: &str) {
        let mut buffers = self.lock();
        buffers.out.push_str(text);
        buffers.merged.push_str(text);
    }

    pub fn append_stderr(&self, text: &str) {
        let mut buffers = self.lock();
        buffers.err.push_str(text);
        buffers.merged.push_str(text);
    }

    pub fn snapshot(&self) -> Buffers {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Buffers> {
        // Appends cannot leave the buffers half-written.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Bus subscriber that aggregates and reports a job's output.
pub struct JobOutput {
    job_id: String,
    buffers: Arc<OutputBuffers>,
    reporter: Arc<Reporter>,
    formatters: Arc<FormatterTable>,
    interactive: Arc<InteractiveMode>,
    logger: Arc<dyn JobLogger>,
}

impl JobOutput {
    pub fn new(
        job_id: impl Into<String>,
        buffers: Arc<OutputBuffers>,
        reporter: Arc<Reporter>,
        formatters: Arc<FormatterTable>,
        interactive: Arc<InteractiveMode>,
        logger: Arc<dyn JobLogger>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            buffers,
            reporter,
            formatters,
            interactive,
            logger,
        }
    }

    fn on_stdout(&self, text: String, tag: Option<OutputTag>) {
        let text = self.formatters.apply(tag, text);
        self.buffers.append_stdout(&text);
        self.progress(EventUpdate::stdout(text));
    }

    fn on_stderr(&self, text: String, tag: Option<OutputTag>) {
        let text = self.formatters.apply(tag, text);
        self.buffers.append_stderr(&text);
        self.progress(EventUpdate::stderr(text));
    }

    fn progress(&self, update: EventUpdate) {
        if let Err(e) = self.reporter.report(QueueEventKind::JobUpdate, update) {
            warn!(job_id = %self.job_id, error = %e, "Failed to report job output");
        }
    }

    fn on_internal_error(&self, bus: &EventBus, error: InternalError, text: Option<String>) {
        self.logger.error(
            &self.job_id,
            &format!(
                "Unexpected server error: {} {}\n{}",
                error.stack(),
                text.as_deref().unwrap_or(""),
                Backtrace::force_capture()
            ),
        );
        bus.stderr(internal_error_message(&error, text.as_deref()), Some(OutputTag::Error));
    }
}

impl BusSubscriber for JobOutput {
    fn on_event(&self, bus: &EventBus, event: BusEvent) {
        match event {
            BusEvent::Log(message) => self.logger.log(&self.job_id, &message),
            BusEvent::Stdout { text, tag } => self.on_stdout(text, tag),
            BusEvent::Stderr { text, tag } => self.on_stderr(text, tag),
            BusEvent::DisableInteractive => {
                self.interactive.disable();
                bus.stderr(DISABLE_INTERACTIVE_MESSAGE, Some(OutputTag::Error));
            }
            BusEvent::InternalError { error, text } => self.on_internal_error(bus, error, text),
        }
    }
}

/// User-facing text for an internal error: the preamble, the optional
/// context line, then the error's stack.
pub fn internal_error_message(error: &InternalError, text: Option<&str>) -> String {
    let mut message = format!("{}\n\n", INTERNAL_ERROR_PREAMBLE);
    if let Some(text) = text {
        message.push_str(text);
        message.push_str("\n\n");
    }
    message.push_str(&error.stack());
    message
}
