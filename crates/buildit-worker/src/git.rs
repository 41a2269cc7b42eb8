//! Working directory synchronization.
//!
//! A job either clones the repository into an emptied working directory or
//! updates an existing checkout in place. Both paths are an ordered list of
//! [`Step`]s run by a [`Sequencer`] that stops at the first failure.

use buildit_config::FailureKind;
use buildit_core::bus::{EventBus, InternalError, OutputTag};
use buildit_core::executor::{Echo, ExitOutcome, GitLaunch, Launch, ProcessRunner};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::classify::{FailureClassifier, Verdict};
use crate::launch::{InteractiveMode, shell_quote};
use crate::resolve::RepoUrls;

pub const SETUP_FAILURE_MESSAGE: &str = "Failed to clean out old code";
pub const RESET_FAILURE_MESSAGE: &str = "Failed to git reset";

/// Exit code recorded when a step's process could not be started.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// How the working directory will be synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPlan {
    CloneFresh,
    UpdateExisting,
}

impl SyncPlan {
    /// Clone unless the directory is already a checkout and updating in
    /// place is allowed.
    pub fn choose(dir: &Path, update_in_place: bool) -> Self {
        if update_in_place && dir.join(".git").exists() {
            SyncPlan::UpdateExisting
        } else {
            SyncPlan::CloneFresh
        }
    }
}

/// Why synchronization stopped. The job has been completed with
/// [`SyncError::exit_code`] by the time this is returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("Failed to clean out old code (exit code: {exit_code})")]
    Setup { exit_code: i32 },

    #[error("{message}")]
    Git { exit_code: i32, message: String },

    #[error("{message}")]
    GitAuth { exit_code: i32, message: String },
}

impl SyncError {
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::Setup { exit_code }
            | SyncError::Git { exit_code, .. }
            | SyncError::GitAuth { exit_code, .. } => *exit_code,
        }
    }
}

pub(crate) enum StepAction {
    /// Plain command. Runs under a terminal only if `interactive` is set and
    /// the job still allows it when the step starts.
    Shell {
        launch: Launch,
        interactive: bool,
        on_failure: ShellFailure,
    },
    /// Git command run with the repository credentials. Failures are
    /// classified from its output.
    Git(GitLaunch),
    /// Worker message on the job's stdout. Cannot fail.
    Announce(String),
}

/// How a failed shell step is reported.
pub(crate) enum ShellFailure {
    /// The working directory could not be prepared.
    Setup,
    /// Shown on stderr as given.
    Report(String),
}

pub(crate) struct Step {
    pub(crate) name: &'static str,
    pub(crate) action: StepAction,
}

/// What the working directory is synchronized to.
pub(crate) struct SyncTarget<'a> {
    pub(crate) dir: &'a Path,
    pub(crate) branch: &'a str,
    pub(crate) urls: &'a RepoUrls,
    pub(crate) private_key: Option<&'a str>,
}

impl SyncTarget<'_> {
    pub(crate) fn steps(&self, plan: SyncPlan) -> Vec<Step> {
        match plan {
            SyncPlan::CloneFresh => self.clone_steps(),
            SyncPlan::UpdateExisting => self.update_steps(),
        }
    }

    fn clone_steps(&self) -> Vec<Step> {
        let dir = shell_quote(&self.dir.to_string_lossy());
        let clean =
            Launch::shell(".", format!("rm -rf {dir}; mkdir -p {dir}")).with_echo(Echo::Silent);

        // Every branch, default or not, is checked out the same way.
        let clone = format!(
            "git clone --recursive {} . && git checkout {}",
            shell_quote(&self.urls.auth),
            shell_quote(self.branch)
        );
        let screen = clone.replace(
            &shell_quote(&self.urls.auth),
            &shell_quote(&self.urls.display),
        );

        vec![
            Step {
                name: "clean",
                action: StepAction::Shell {
                    launch: clean,
                    interactive: false,
                    on_failure: ShellFailure::Setup,
                },
            },
            Step {
                name: "announce",
                action: StepAction::Announce(format!(
                    "Starting git clone of repo at {}\n",
                    self.urls.display
                )),
            },
            Step {
                name: "clone",
                action: StepAction::Git(
                    GitLaunch::new(self.dir, clone)
                        .with_private_key(self.private_key.map(String::from))
                        .with_echo(Echo::Text(screen)),
                ),
            },
        ]
    }

    fn update_steps(&self) -> Vec<Step> {
        let branch = shell_quote(self.branch);
        let remote_branch = shell_quote(&format!("origin/{}", self.branch));

        vec![
            Step {
                name: "reset",
                action: StepAction::Shell {
                    launch: Launch::shell(self.dir, "git reset --hard && git clean -fd"),
                    interactive: true,
                    on_failure: ShellFailure::Report(format!("{}\n", RESET_FAILURE_MESSAGE)),
                },
            },
            Step {
                name: "checkout",
                action: StepAction::Shell {
                    launch: Launch::shell(
                        self.dir,
                        format!("git fetch origin && git checkout -B {branch} {remote_branch}"),
                    ),
                    interactive: true,
                    on_failure: ShellFailure::Report(format!(
                        "Failed to checkout {}\n",
                        self.branch
                    )),
                },
            },
            Step {
                name: "pull",
                action: StepAction::Git(
                    GitLaunch::new(self.dir, "git pull")
                        .with_private_key(self.private_key.map(String::from)),
                ),
            },
        ]
    }
}

/// Runs steps in order, each only after the previous one finished.
pub(crate) struct Sequencer<'a> {
    pub(crate) runner: &'a dyn ProcessRunner,
    pub(crate) bus: &'a Arc<EventBus>,
    pub(crate) classifier: &'a FailureClassifier,
    pub(crate) interactive: &'a InteractiveMode,
}

impl Sequencer<'_> {
    pub(crate) async fn run(&self, steps: Vec<Step>) -> Result<(), SyncError> {
        for step in steps {
            debug!(step = step.name, "Running git step");

            match step.action {
                StepAction::Announce(message) => {
                    self.bus.stdout(message, Some(OutputTag::Message));
                }
                StepAction::Shell {
                    launch,
                    interactive,
                    on_failure,
                } => {
                    let pty = interactive && self.interactive.enabled();
                    let result = self.runner.run(launch.with_pty(pty), self.bus.clone()).await;
                    let outcome = self.outcome(step.name, result);
                    if !outcome.success() {
                        return Err(self.shell_failure(on_failure, outcome.code));
                    }
                }
                StepAction::Git(launch) => {
                    let result = self.runner.run_git(launch, self.bus.clone()).await;
                    let outcome = self.outcome(step.name, result);
                    if !outcome.success() {
                        return Err(self.git_failure(outcome));
                    }
                }
            }
        }

        Ok(())
    }

    /// A step whose process could not be run counts as a spawn failure.
    fn outcome(&self, step: &str, result: buildit_core::Result<ExitOutcome>) -> ExitOutcome {
        result.unwrap_or_else(|e| {
            warn!(step, error = %e, "Git step could not be run");
            self.bus.internal_error(
                InternalError::from_error(&e),
                Some(format!("Could not run the {} step", step)),
            );
            ExitOutcome::new(SPAWN_FAILURE_EXIT_CODE)
        })
    }

    fn shell_failure(&self, on_failure: ShellFailure, exit_code: i32) -> SyncError {
        match on_failure {
            ShellFailure::Setup => {
                self.bus
                    .internal_error(InternalError::new(SETUP_FAILURE_MESSAGE), None);
                SyncError::Setup { exit_code }
            }
            ShellFailure::Report(message) => {
                self.bus.stderr(message.clone(), Some(OutputTag::Error));
                SyncError::Git {
                    exit_code,
                    message: message.trim_end().to_string(),
                }
            }
        }
    }

    fn git_failure(&self, outcome: ExitOutcome) -> SyncError {
        let exit_code = outcome.code;
        match self
            .classifier
            .classify(exit_code, &outcome.stdout, &outcome.stderr)
        {
            Verdict::Failure { kind, message, .. } => {
                self.bus
                    .stderr(format!("{}\n", message), Some(OutputTag::Error));
                match kind {
                    FailureKind::Auth => SyncError::GitAuth { exit_code, message },
                    FailureKind::Git => SyncError::Git { exit_code, message },
                }
            }
            // Unreachable for a non-zero exit code.
            Verdict::Success => SyncError::Git {
                exit_code,
                message: format!("Git failure (exit code: {})", exit_code),
            },
        }
    }
}
