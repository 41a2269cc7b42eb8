//! Per-job event bus.
//!
//! A typed publish/subscribe channel carrying the five event kinds that flow
//! between the git sequencer, the process runner and the job's output
//! aggregator. Delivery is synchronous: `emit` returns only after the
//! subscriber has handled the event, including any events the subscriber
//! emits while handling it.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::trace;

use crate::{Error, Result};

/// Format tag attached to an output chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputTag {
    /// Worker-generated status message.
    #[display("message")]
    Message,
    /// Worker-generated error message.
    #[display("error")]
    Error,
    /// Echo of a command about to run.
    #[display("command")]
    Command,
}

/// An event carried by the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// Free-form log line for the worker's logger. Not buffered.
    Log(String),
    Stdout {
        text: String,
        tag: Option<OutputTag>,
    },
    Stderr {
        text: String,
        tag: Option<OutputTag>,
    },
    /// Interactive (PTY) execution is not available.
    DisableInteractive,
    /// Unexpected failure anywhere in the pipeline.
    InternalError {
        error: InternalError,
        text: Option<String>,
    },
}

/// Captured description of an unexpected error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalError {
    pub message: String,
    /// Messages of the error's source chain, outermost first.
    pub causes: Vec<String>,
}

impl InternalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            causes: Vec::new(),
        }
    }

    /// Capture an error together with its source chain.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            message: error.to_string(),
            causes,
        }
    }

    /// Message followed by one `caused by:` line per source.
    pub fn stack(&self) -> String {
        let mut stack = self.message.clone();
        for cause in &self.causes {
            stack.push_str("\n    caused by: ");
            stack.push_str(cause);
        }
        stack
    }
}

impl fmt::Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Handler for bus events. Receives the bus so it can emit follow-up events.
pub trait BusSubscriber: Send + Sync {
    fn on_event(&self, bus: &EventBus, event: BusEvent);
}

/// Per-job event bus with exactly one subscriber.
#[derive(Default)]
pub struct EventBus {
    subscriber: OnceLock<Arc<dyn BusSubscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the bus's subscriber. Fails if one is already installed.
    pub fn subscribe(&self, subscriber: Arc<dyn BusSubscriber>) -> Result<()> {
        self.subscriber
            .set(subscriber)
            .map_err(|_| Error::InvalidInput("event bus already has a subscriber".to_string()))
    }

    pub fn emit(&self, event: BusEvent) {
        match self.subscriber.get() {
            Some(subscriber) => subscriber.on_event(self, event),
            None => trace!(?event, "Dropping event on bus without subscriber"),
        }
    }

    pub fn log(&self, message: impl Into<String>) {
        self.emit(BusEvent::Log(message.into()));
    }

    pub fn stdout(&self, text: impl Into<String>, tag: Option<OutputTag>) {
        self.emit(BusEvent::Stdout {
            text: text.into(),
            tag,
        });
    }

    pub fn stderr(&self, text: impl Into<String>, tag: Option<OutputTag>) {
        self.emit(BusEvent::Stderr {
            text: text.into(),
            tag,
        });
    }

    pub fn disable_interactive(&self) {
        self.emit(BusEvent::DisableInteractive);
    }

    pub fn internal_error(&self, error: InternalError, text: Option<String>) {
        self.emit(BusEvent::InternalError { error, text });
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribed", &self.subscriber.get().is_some())
            .finish()
    }
}
