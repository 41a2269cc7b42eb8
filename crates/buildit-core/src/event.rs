//! Lifecycle events reported to the job queue.
//!
//! Every event carries the full canonical field set. Fields the caller does
//! not supply are sent as empty strings or nulls, never omitted.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event names on the process-wide queue bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum QueueEventKind {
    /// Incremental progress for a running job.
    #[display("queue.job_update")]
    #[serde(rename = "queue.job_update")]
    JobUpdate,
    /// Terminal event, sent once per job.
    #[display("queue.job_complete")]
    #[serde(rename = "queue.job_complete")]
    JobComplete,
}

/// Canonical lifecycle event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub user_id: String,
    pub job_id: String,
    /// Seconds since the job was started.
    pub time_elapsed: f64,
    pub repo_url: String,
    pub stdout: String,
    pub stderr: String,
    pub stdmerged: String,
    pub auto_detect_result: Option<Value>,
    pub test_exit_code: Option<i32>,
    pub deploy_exit_code: Option<i32>,
    pub tasks: Option<Value>,
}

impl LifecycleEvent {
    /// An event with identity fields set and every other field at its default.
    pub fn new(
        user_id: impl Into<String>,
        job_id: impl Into<String>,
        repo_url: impl Into<String>,
        time_elapsed: f64,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            job_id: job_id.into(),
            time_elapsed: time_elapsed.max(0.0),
            repo_url: repo_url.into(),
            stdout: String::new(),
            stderr: String::new(),
            stdmerged: String::new(),
            auto_detect_result: None,
            test_exit_code: None,
            deploy_exit_code: None,
            tasks: None,
        }
    }

    /// Overlay caller-supplied fields onto this event.
    pub fn overlay(mut self, update: EventUpdate) -> Self {
        if let Some(stdout) = update.stdout {
            self.stdout = stdout;
        }
        if let Some(stderr) = update.stderr {
            self.stderr = stderr;
        }
        if let Some(stdmerged) = update.stdmerged {
            self.stdmerged = stdmerged;
        }
        if update.auto_detect_result.is_some() {
            self.auto_detect_result = update.auto_detect_result;
        }
        if update.test_exit_code.is_some() {
            self.test_exit_code = update.test_exit_code;
        }
        if update.deploy_exit_code.is_some() {
            self.deploy_exit_code = update.deploy_exit_code;
        }
        if update.tasks.is_some() {
            self.tasks = update.tasks;
        }
        self
    }
}

/// Caller-supplied subset of lifecycle event fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventUpdate {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub stdmerged: Option<String>,
    pub auto_detect_result: Option<Value>,
    pub test_exit_code: Option<i32>,
    pub deploy_exit_code: Option<i32>,
    pub tasks: Option<Value>,
}

impl EventUpdate {
    /// Progress delta for a chunk of standard output.
    pub fn stdout(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            stdmerged: Some(text.clone()),
            stdout: Some(text),
            ..Default::default()
        }
    }

    /// Progress delta for a chunk of standard error.
    pub fn stderr(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            stdmerged: Some(text.clone()),
            stderr: Some(text),
            ..Default::default()
        }
    }
}

/// Process-wide sink for lifecycle events, shared by every job.
pub trait QueueEmitter: Send + Sync {
    fn emit(&self, kind: QueueEventKind, event: LifecycleEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_every_field() {
        let event = LifecycleEvent::new("user-1", "job-1", "https://github.com/acme/widgets", 1.5);
        let json = serde_json::to_value(&event).unwrap();
        let obj = json.as_object().unwrap();

        for field in [
            "userId",
            "jobId",
            "timeElapsed",
            "repoUrl",
            "stdout",
            "stderr",
            "stdmerged",
            "autoDetectResult",
            "testExitCode",
            "deployExitCode",
            "tasks",
        ] {
            assert!(obj.contains_key(field), "missing field {field}");
        }
        assert_eq!(obj.len(), 11);
        assert!(obj["testExitCode"].is_null());
        assert_eq!(obj["stdout"], "");
    }

    #[test]
    fn test_overlay_keeps_defaults_for_missing_fields() {
        let event = LifecycleEvent::new("u", "j", "r", 0.0).overlay(EventUpdate::stdout("hello"));

        assert_eq!(event.stdout, "hello");
        assert_eq!(event.stdmerged, "hello");
        assert_eq!(event.stderr, "");
        assert_eq!(event.test_exit_code, None);
    }

    #[test]
    fn test_negative_elapsed_is_clamped() {
        let event = LifecycleEvent::new("u", "j", "r", -3.0);
        assert_eq!(event.time_elapsed, 0.0);
    }

    #[test]
    fn test_queue_event_kind_names() {
        assert_eq!(QueueEventKind::JobUpdate.to_string(), "queue.job_update");
        assert_eq!(QueueEventKind::JobComplete.to_string(), "queue.job_complete");
    }
}
