//! Execution context handed to pipeline stages once the checkout is ready.

use buildit_core::Result;
use buildit_core::bus::{EventBus, OutputTag};
use buildit_core::event::{EventUpdate, QueueEventKind};
use buildit_core::executor::ExitOutcome;
use buildit_core::job::JobData;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::launch::{LaunchRequest, Launcher, shell_wrap};
use crate::reporter::Reporter;

/// Package manager command offered to stages.
pub const NPM_CMD: &str = "npm";

/// Buffered signals per subscriber on the stage bus.
pub const STAGE_BUS_CAPACITY: usize = 256;

/// Signal exchanged between pipeline stages.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSignal {
    pub name: String,
    pub payload: Value,
}

/// Capabilities of a job, shared by every stage that runs in it.
pub struct JobContext {
    bus: Arc<EventBus>,
    launcher: Arc<Launcher>,
    reporter: Arc<Reporter>,
    working_dir: PathBuf,
    job: Arc<JobData>,
    stage_bus: broadcast::Sender<StageSignal>,
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("working_dir", &self.working_dir)
            .field("job", &self.job)
            .finish_non_exhaustive()
    }
}

impl JobContext {
    pub(crate) fn new(
        bus: Arc<EventBus>,
        launcher: Arc<Launcher>,
        reporter: Arc<Reporter>,
        working_dir: PathBuf,
        job: Arc<JobData>,
    ) -> Self {
        let (stage_bus, _rx) = broadcast::channel(STAGE_BUS_CAPACITY);
        Self {
            bus,
            launcher,
            reporter,
            working_dir,
            job,
            stage_bus,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Launch a command through the job's launcher.
    pub async fn launch(&self, request: LaunchRequest) -> Result<ExitOutcome> {
        self.launcher.launch(request).await
    }

    /// Send a progress event.
    pub fn update_status(&self, update: EventUpdate) -> Result<()> {
        self.reporter.report(QueueEventKind::JobUpdate, update)
    }

    /// Show a worker message in the job's output.
    pub fn announce(&self, message: impl Into<String>) {
        self.bus.stdout(message, Some(OutputTag::Message));
    }

    /// A request running `command` through `sh -c` in the working directory.
    pub fn shell_wrap(&self, command: impl Into<String>) -> LaunchRequest {
        shell_wrap(&self.working_dir, command)
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn job(&self) -> &JobData {
        &self.job
    }

    pub fn npm_cmd(&self) -> &'static str {
        NPM_CMD
    }

    /// Send a signal to every stage subscribed to the stage bus. Returns the
    /// number of subscribers that received it.
    pub fn signal(&self, name: impl Into<String>, payload: Value) -> usize {
        self.stage_bus
            .send(StageSignal {
                name: name.into(),
                payload,
            })
            .unwrap_or(0)
    }

    pub fn subscribe_stages(&self) -> broadcast::Receiver<StageSignal> {
        self.stage_bus.subscribe()
    }
}
