//! Lifecycle reporting to the job queue.

use buildit_core::event::{EventUpdate, LifecycleEvent, QueueEmitter, QueueEventKind};
use buildit_core::{Error, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

use crate::output::Buffers;

/// Builds lifecycle events for one job and sends them to the queue.
pub struct Reporter {
    user_id: String,
    job_id: String,
    repo_url: String,
    started_at: OnceLock<DateTime<Utc>>,
    completed: AtomicBool,
    queue: Arc<dyn QueueEmitter>,
}

impl Reporter {
    pub fn new(
        user_id: impl Into<String>,
        job_id: impl Into<String>,
        repo_url: impl Into<String>,
        queue: Arc<dyn QueueEmitter>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            job_id: job_id.into(),
            repo_url: repo_url.into(),
            started_at: OnceLock::new(),
            completed: AtomicBool::new(false),
            queue,
        }
    }

    /// Record the start time. Later calls keep the first timestamp and
    /// return `false`.
    pub fn start(&self) -> bool {
        let now = Utc::now();
        let first = self.started_at.set(now).is_ok();
        if !first {
            debug!(job_id = %self.job_id, "Job already started");
        }
        first
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at.get().copied()
    }

    /// Seconds since `start`.
    pub fn elapsed(&self) -> Result<f64> {
        let started_at = self.started_at.get().ok_or(Error::NotStarted)?;
        let millis = (Utc::now() - *started_at).num_milliseconds().max(0);
        Ok(millis as f64 / 1000.0)
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Send one event of `kind` with `update` overlaid on the defaults.
    pub fn report(&self, kind: QueueEventKind, update: EventUpdate) -> Result<()> {
        let event = self.build(update)?;
        self.send(kind, event);
        Ok(())
    }

    /// Send the terminal event carrying the full buffers. Only the first
    /// call emits; later calls fail with [`Error::AlreadyCompleted`].
    pub fn complete(
        &self,
        buffers: Buffers,
        test_exit_code: Option<i32>,
        deploy_exit_code: Option<i32>,
        tasks: Option<Value>,
    ) -> Result<()> {
        let event = self.build(EventUpdate {
            stdout: Some(buffers.out),
            stderr: Some(buffers.err),
            stdmerged: Some(buffers.merged),
            test_exit_code,
            deploy_exit_code,
            tasks,
            ..Default::default()
        })?;

        if self.completed.swap(true, Ordering::SeqCst) {
            warn!(job_id = %self.job_id, "Ignoring repeated job completion");
            return Err(Error::AlreadyCompleted);
        }

        self.send(QueueEventKind::JobComplete, event);
        Ok(())
    }

    fn build(&self, update: EventUpdate) -> Result<LifecycleEvent> {
        let elapsed = self.elapsed()?;
        Ok(
            LifecycleEvent::new(&self.user_id, &self.job_id, &self.repo_url, elapsed)
                .overlay(update),
        )
    }

    fn send(&self, kind: QueueEventKind, event: LifecycleEvent) {
        debug!(job_id = %self.job_id, kind = %kind, elapsed = event.time_elapsed, "Sending job event");
        self.queue.emit(kind, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingQueue {
        events: Mutex<Vec<(QueueEventKind, LifecycleEvent)>>,
    }

    impl QueueEmitter for CapturingQueue {
        fn emit(&self, kind: QueueEventKind, event: LifecycleEvent) {
            self.events.lock().unwrap().push((kind, event));
        }
    }

    fn reporter() -> (Reporter, Arc<CapturingQueue>) {
        let queue = Arc::new(CapturingQueue::default());
        let reporter = Reporter::new("user-1", "job-1", "https://github.com/acme/widgets", queue.clone());
        (reporter, queue)
    }

    #[test]
    fn test_report_before_start_fails() {
        let (reporter, queue) = reporter();
        let result = reporter.report(QueueEventKind::JobUpdate, EventUpdate::stdout("x"));

        assert!(matches!(result, Err(Error::NotStarted)));
        assert!(queue.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_start_is_set_once() {
        let (reporter, _queue) = reporter();
        assert!(reporter.start());
        let first = reporter.started_at().unwrap();

        assert!(!reporter.start());
        assert_eq!(reporter.started_at(), Some(first));
    }

    #[test]
    fn test_report_fills_identity_and_defaults() {
        let (reporter, queue) = reporter();
        reporter.start();
        reporter
            .report(QueueEventKind::JobUpdate, EventUpdate::stderr("warn\n"))
            .unwrap();

        let events = queue.events.lock().unwrap();
        let (kind, event) = &events[0];
        assert_eq!(*kind, QueueEventKind::JobUpdate);
        assert_eq!(event.user_id, "user-1");
        assert_eq!(event.job_id, "job-1");
        assert_eq!(event.repo_url, "https://github.com/acme/widgets");
        assert_eq!(event.stderr, "warn\n");
        assert_eq!(event.stdmerged, "warn\n");
        assert_eq!(event.stdout, "");
        assert!(event.time_elapsed >= 0.0);
    }

    #[test]
    fn test_complete_emits_once() {
        let (reporter, queue) = reporter();
        reporter.start();

        let buffers = Buffers {
            out: "o".to_string(),
            err: "e".to_string(),
            merged: "oe".to_string(),
        };
        reporter.complete(buffers.clone(), Some(0), None, None).unwrap();
        let second = reporter.complete(buffers, Some(1), None, None);

        assert!(matches!(second, Err(Error::AlreadyCompleted)));
        assert!(reporter.is_completed());

        let events = queue.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        let (kind, event) = &events[0];
        assert_eq!(*kind, QueueEventKind::JobComplete);
        assert_eq!(event.stdmerged, "oe");
        assert_eq!(event.test_exit_code, Some(0));
        assert_eq!(event.deploy_exit_code, None);
    }

    #[test]
    fn test_complete_before_start_does_not_consume_guard() {
        let (reporter, _queue) = reporter();
        let result = reporter.complete(Buffers::default(), Some(0), None, None);
        assert!(matches!(result, Err(Error::NotStarted)));
        assert!(!reporter.is_completed());
    }
}
