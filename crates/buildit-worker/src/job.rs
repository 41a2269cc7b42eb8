//! A single job and its lifecycle.

use buildit_config::WorkerConfig;
use buildit_core::Result;
use buildit_core::bus::{EventBus, InternalError};
use buildit_core::event::{EventUpdate, QueueEmitter, QueueEventKind};
use buildit_core::executor::{ExitOutcome, ProcessRunner};
use buildit_core::job::JobData;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::classify::FailureClassifier;
use crate::context::JobContext;
use crate::format::FormatterTable;
use crate::git::{Sequencer, SyncError, SyncPlan, SyncTarget};
use crate::launch::{InteractiveMode, LaunchRequest, Launcher};
use crate::logger::{JobLogger, TracingLogger};
use crate::output::{Buffers, JobOutput, OutputBuffers};
use crate::reporter::Reporter;
use crate::resolve::{GithubUrlResolver, HintParser, TagHintParser, UrlResolver};

/// Exit code reported when the repository URL cannot be resolved.
const UNRESOLVED_REPO_EXIT_CODE: i32 = 1;

/// One build/test/deploy job tied to a commit and a working directory.
pub struct Job {
    data: Arc<JobData>,
    dir: PathBuf,
    config: WorkerConfig,
    bus: Arc<EventBus>,
    buffers: Arc<OutputBuffers>,
    reporter: Arc<Reporter>,
    interactive: Arc<InteractiveMode>,
    runner: Arc<dyn ProcessRunner>,
    urls: Arc<dyn UrlResolver>,
    classifier: FailureClassifier,
    context: Arc<JobContext>,
}

impl Job {
    /// Start building a job that reports to `queue` and runs commands with
    /// `runner`.
    pub fn builder(
        data: JobData,
        dir: impl Into<PathBuf>,
        queue: Arc<dyn QueueEmitter>,
        runner: Arc<dyn ProcessRunner>,
    ) -> JobBuilder {
        JobBuilder {
            data,
            dir: dir.into(),
            queue,
            runner,
            config: WorkerConfig::default(),
            logger: Arc::new(TracingLogger),
            urls: Arc::new(GithubUrlResolver),
            hints: Arc::new(TagHintParser),
            formatters: FormatterTable::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.data.job_id
    }

    pub fn data(&self) -> &JobData {
        &self.data
    }

    pub fn working_dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn context(&self) -> &Arc<JobContext> {
        &self.context
    }

    /// Whether commands currently run under a pseudo-terminal.
    pub fn interactive(&self) -> bool {
        self.interactive.enabled()
    }

    /// Snapshot of the output gathered so far.
    pub fn buffers(&self) -> Buffers {
        self.buffers.snapshot()
    }

    /// Record the start time. Only the first call has an effect.
    pub fn start(&self) {
        if self.reporter.start() {
            info!(job_id = %self.id(), dir = %self.dir.display(), "Job started");
        }
    }

    /// Send a lifecycle event. Fails if the job has not been started.
    pub fn report(&self, kind: QueueEventKind, update: EventUpdate) -> Result<()> {
        self.reporter.report(kind, update)
    }

    /// Send the completion event with the full output. A job completes at
    /// most once; repeated calls fail and send nothing.
    pub fn complete(
        &self,
        test_exit_code: Option<i32>,
        deploy_exit_code: Option<i32>,
        tasks: Option<Value>,
    ) -> Result<()> {
        self.reporter.complete(
            self.buffers.snapshot(),
            test_exit_code,
            deploy_exit_code,
            tasks,
        )?;
        info!(job_id = %self.id(), ?test_exit_code, ?deploy_exit_code, "Job completed");
        Ok(())
    }

    /// Launch a command on behalf of the job.
    pub async fn launch(&self, request: LaunchRequest) -> Result<ExitOutcome> {
        self.context.launch(request).await
    }

    /// Bring the working directory to the job's branch.
    ///
    /// On success returns the context for the rest of the pipeline. On
    /// failure the job has already been completed with the failing exit
    /// code and must not run anything else.
    pub async fn git_step(&self) -> std::result::Result<Arc<JobContext>, SyncError> {
        let plan = SyncPlan::choose(&self.dir, self.config.update_in_place);
        info!(job_id = %self.id(), ?plan, branch = %self.data.branch(), "Synchronizing working directory");

        match self.synchronize(plan).await {
            Ok(()) => Ok(self.context.clone()),
            Err(e) => {
                warn!(job_id = %self.id(), error = %e, "Git step failed");
                if let Err(complete_err) = self.complete(Some(e.exit_code()), None, None) {
                    warn!(job_id = %self.id(), error = %complete_err, "Failed to complete job");
                }
                Err(e)
            }
        }
    }

    async fn synchronize(&self, plan: SyncPlan) -> std::result::Result<(), SyncError> {
        let urls = match self.urls.resolve(
            &self.data.repo_ssh_url,
            self.data.private_key(),
            self.data.api_key.as_deref(),
        ) {
            Ok(urls) => urls,
            Err(e) => {
                self.bus.internal_error(
                    InternalError::from_error(&e),
                    Some("Could not resolve the repository URL".to_string()),
                );
                return Err(SyncError::Setup {
                    exit_code: UNRESOLVED_REPO_EXIT_CODE,
                });
            }
        };

        let target = SyncTarget {
            dir: &self.dir,
            branch: self.data.branch(),
            urls: &urls,
            private_key: self.data.private_key(),
        };

        Sequencer {
            runner: self.runner.as_ref(),
            bus: &self.bus,
            classifier: &self.classifier,
            interactive: &self.interactive,
        }
        .run(target.steps(plan))
        .await
    }
}

/// Builder for [`Job`]. Collaborators left unset use the defaults.
pub struct JobBuilder {
    data: JobData,
    dir: PathBuf,
    queue: Arc<dyn QueueEmitter>,
    runner: Arc<dyn ProcessRunner>,
    config: WorkerConfig,
    logger: Arc<dyn JobLogger>,
    urls: Arc<dyn UrlResolver>,
    hints: Arc<dyn HintParser>,
    formatters: FormatterTable,
}

impl JobBuilder {
    pub fn config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn JobLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn url_resolver(mut self, urls: Arc<dyn UrlResolver>) -> Self {
        self.urls = urls;
        self
    }

    pub fn hint_parser(mut self, hints: Arc<dyn HintParser>) -> Self {
        self.hints = hints;
        self
    }

    pub fn formatters(mut self, formatters: FormatterTable) -> Self {
        self.formatters = formatters;
        self
    }

    /// Build the job and subscribe its output aggregator to its bus.
    pub fn build(self) -> Result<Job> {
        let data = Arc::new(self.data);
        let bus = Arc::new(EventBus::new());
        let buffers = Arc::new(OutputBuffers::new());
        let interactive = Arc::new(InteractiveMode::new(self.config.interactive));
        let reporter = Arc::new(Reporter::new(
            &data.user_id,
            &data.job_id,
            &data.repo_config.url,
            self.queue,
        ));

        bus.subscribe(Arc::new(JobOutput::new(
            &data.job_id,
            buffers.clone(),
            reporter.clone(),
            Arc::new(self.formatters),
            interactive.clone(),
            self.logger,
        )))?;

        let launcher = Arc::new(Launcher::new(
            data.clone(),
            self.hints,
            interactive.clone(),
            self.runner.clone(),
            bus.clone(),
        ));
        let context = Arc::new(JobContext::new(
            bus.clone(),
            launcher,
            reporter.clone(),
            self.dir.clone(),
            data.clone(),
        ));

        Ok(Job {
            classifier: FailureClassifier::new(self.config.failure_rules.clone()),
            data,
            dir: self.dir,
            config: self.config,
            bus,
            buffers,
            reporter,
            interactive,
            runner: self.runner,
            urls: self.urls,
            context,
        })
    }
}
