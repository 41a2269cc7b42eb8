//! Process launching on behalf of a job.
//!
//! [`Launcher`] turns a [`LaunchRequest`] into a fully resolved [`Launch`]:
//! it builds the command environment, decides between terminal and plain
//! execution and hands the result to the job's [`ProcessRunner`].

use buildit_core::Result;
use buildit_core::bus::EventBus;
use buildit_core::executor::{Echo, ExitOutcome, Launch, ProcessRunner};
use buildit_core::job::JobData;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::resolve::{HintParser, repo_domain};

/// Value of `PAAS_NAME` in every launched command's environment.
pub const PAAS_NAME: &str = "buildit";

pub const ENV_PAAS_NAME: &str = "PAAS_NAME";
pub const ENV_JOB_ID: &str = "BUILDIT_JOB_ID";
pub const ENV_REPO_DOMAIN: &str = "BUILDIT_REPO_DOMAIN";
pub const ENV_HINT: &str = "BUILDIT_HINT";

/// Whether commands may run under a pseudo-terminal.
///
/// Starts from configuration and can be switched off at runtime, never back on.
#[derive(Debug)]
pub struct InteractiveMode {
    configured: bool,
    disabled: AtomicBool,
}

impl InteractiveMode {
    pub fn new(configured: bool) -> Self {
        Self {
            configured,
            disabled: AtomicBool::new(false),
        }
    }

    pub fn enabled(&self) -> bool {
        self.configured && !self.disabled.load(Ordering::SeqCst)
    }

    pub fn disable(&self) {
        self.disabled.store(true, Ordering::SeqCst);
    }
}

/// A command a job wants to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Program name, or a whole command line when `args` is `None`.
    pub command: String,
    pub args: Option<Vec<String>>,
    pub cwd: PathBuf,
    /// Extra variables, applied after the project's own.
    pub env: HashMap<String, String>,
    pub echo: Echo,
}

impl LaunchRequest {
    pub fn new(cwd: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            ..Default::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn echo(mut self, echo: Echo) -> Self {
        self.echo = echo;
        self
    }
}

/// Launches commands for one job.
pub struct Launcher {
    job: Arc<JobData>,
    hints: Arc<dyn HintParser>,
    interactive: Arc<InteractiveMode>,
    runner: Arc<dyn ProcessRunner>,
    bus: Arc<EventBus>,
}

impl Launcher {
    pub fn new(
        job: Arc<JobData>,
        hints: Arc<dyn HintParser>,
        interactive: Arc<InteractiveMode>,
        runner: Arc<dyn ProcessRunner>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            job,
            hints,
            interactive,
            runner,
            bus,
        }
    }

    pub fn interactive(&self) -> bool {
        self.interactive.enabled()
    }

    /// Run `request` and wait for it to finish.
    pub async fn launch(&self, request: LaunchRequest) -> Result<ExitOutcome> {
        let launch = self.describe(request);
        debug!(
            job_id = %self.job.job_id,
            runner = self.runner.name(),
            command = %launch.command,
            pty = launch.pty,
            "Launching command"
        );
        self.runner.run(launch, self.bus.clone()).await
    }

    /// Resolve a request into the launch the runner will execute.
    pub fn describe(&self, request: LaunchRequest) -> Launch {
        let pty = self.interactive();
        let env = self.environment(&request.env);

        let (command, args) = match request.args {
            Some(args) => (request.command, Some(args)),
            None if !pty => {
                let mut words = request.command.split_whitespace().map(String::from);
                let program = words.next().unwrap_or_default();
                (program, Some(words.collect()))
            }
            None => (request.command, None),
        };

        Launch {
            command,
            args,
            cwd: request.cwd,
            env,
            pty,
            echo: request.echo,
        }
    }

    /// Environment for a launched command. Later layers override earlier
    /// ones: the worker's environment, job identity, the commit hint, the
    /// project's variables, then `overrides`.
    pub fn environment(&self, overrides: &HashMap<String, String>) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();

        env.insert(ENV_PAAS_NAME.to_string(), PAAS_NAME.to_string());
        env.insert(ENV_JOB_ID.to_string(), self.job.job_id.clone());
        env.insert(
            ENV_REPO_DOMAIN.to_string(),
            repo_domain(&self.job.repo_ssh_url, self.job.branch()),
        );

        if let Some(hint) = self.hints.parse(self.job.commit_message()) {
            env.insert(ENV_HINT.to_string(), hint);
        }

        env.extend(self.job.repo_config.env.clone());
        env.extend(overrides.clone());
        env
    }
}

/// Wrap a command line so it runs through `sh -c`.
pub fn shell_wrap(cwd: impl Into<PathBuf>, command: impl Into<String>) -> LaunchRequest {
    LaunchRequest::new(cwd, "sh").args(["-c".to_string(), command.into()])
}

/// Quote `arg` for safe interpolation into a shell command line.
pub fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@,+%".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use buildit_core::executor::GitLaunch;
    use buildit_core::job::{CommitInfo, RepoConfig};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockRunner {
        launches: Mutex<Vec<Launch>>,
    }

    #[async_trait]
    impl ProcessRunner for MockRunner {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn run(&self, launch: Launch, _bus: Arc<EventBus>) -> Result<ExitOutcome> {
            self.launches.lock().unwrap().push(launch);
            Ok(ExitOutcome::new(0))
        }

        async fn run_git(&self, _launch: GitLaunch, _bus: Arc<EventBus>) -> Result<ExitOutcome> {
            unimplemented!()
        }
    }

    struct FixedHint(Option<&'static str>);

    impl HintParser for FixedHint {
        fn parse(&self, _message: &str) -> Option<String> {
            self.0.map(String::from)
        }
    }

    fn make_job() -> JobData {
        JobData {
            job_id: "job-42".to_string(),
            user_id: "user-1".to_string(),
            repo_ssh_url: "git@github.com:acme/widgets.git".to_string(),
            repo_config: RepoConfig {
                url: "https://github.com/acme/widgets".to_string(),
                private_key: None,
                env: HashMap::from([
                    ("NODE_ENV".to_string(), "test".to_string()),
                    (ENV_JOB_ID.to_string(), "project-override".to_string()),
                ]),
            },
            commit_info: Some(CommitInfo {
                branch: Some("main".to_string()),
                message: Some("Ship it".to_string()),
            }),
            api_key: None,
        }
    }

    fn launcher(interactive: bool, hint: Option<&'static str>) -> (Launcher, Arc<MockRunner>) {
        let runner = Arc::new(MockRunner::default());
        let launcher = Launcher::new(
            Arc::new(make_job()),
            Arc::new(FixedHint(hint)),
            Arc::new(InteractiveMode::new(interactive)),
            runner.clone(),
            Arc::new(EventBus::new()),
        );
        (launcher, runner)
    }

    #[test]
    fn test_environment_layers() {
        let (launcher, _runner) = launcher(true, Some("deploy"));
        let overrides = HashMap::from([("NODE_ENV".to_string(), "ci".to_string())]);
        let env = launcher.environment(&overrides);

        assert_eq!(env[ENV_PAAS_NAME], "buildit");
        assert_eq!(env[ENV_REPO_DOMAIN], "main-widgets-acme");
        assert_eq!(env[ENV_HINT], "deploy");
        // Project variables override identity, request variables override both.
        assert_eq!(env[ENV_JOB_ID], "project-override");
        assert_eq!(env["NODE_ENV"], "ci");
    }

    #[test]
    fn test_no_hint_variable_without_hint() {
        let (launcher, _runner) = launcher(true, None);
        let env = launcher.environment(&HashMap::new());
        assert!(!env.contains_key(ENV_HINT));
    }

    #[test]
    fn test_environment_inherits_worker_environment() {
        let (launcher, _runner) = launcher(true, None);
        let env = launcher.environment(&HashMap::new());
        if let Ok(path) = std::env::var("PATH") {
            assert_eq!(env["PATH"], path);
        }
    }

    #[test]
    fn test_non_interactive_splits_command_line() {
        let (launcher, _runner) = launcher(false, None);
        let launch = launcher.describe(LaunchRequest::new("/work", "npm  run   test"));

        assert!(!launch.pty);
        assert_eq!(launch.command, "npm");
        assert_eq!(
            launch.args,
            Some(vec!["run".to_string(), "test".to_string()])
        );
    }

    #[test]
    fn test_interactive_keeps_command_line() {
        let (launcher, _runner) = launcher(true, None);
        let launch = launcher.describe(LaunchRequest::new("/work", "npm run test"));

        assert!(launch.pty);
        assert_eq!(launch.command, "npm run test");
        assert_eq!(launch.args, None);
    }

    #[test]
    fn test_explicit_args_are_kept() {
        let (launcher, _runner) = launcher(false, None);
        let launch = launcher.describe(LaunchRequest::new("/work", "make").args(["all"]));

        assert_eq!(launch.command, "make");
        assert_eq!(launch.args, Some(vec!["all".to_string()]));
    }

    #[test]
    fn test_runtime_disable_turns_off_pty() {
        let interactive = Arc::new(InteractiveMode::new(true));
        assert!(interactive.enabled());
        interactive.disable();
        assert!(!interactive.enabled());

        assert!(!InteractiveMode::new(false).enabled());
    }

    #[tokio::test]
    async fn test_launch_delegates_to_runner() {
        let (launcher, runner) = launcher(false, None);
        let outcome = launcher
            .launch(LaunchRequest::new("/work", "echo hi").env("A", "1"))
            .await
            .unwrap();

        assert!(outcome.success());
        let launches = runner.launches.lock().unwrap();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].cwd, PathBuf::from("/work"));
        assert_eq!(launches[0].env["A"], "1");
    }

    #[test]
    fn test_shell_wrap() {
        let request = shell_wrap("/work", "npm test && npm run lint");
        assert_eq!(request.command, "sh");
        assert_eq!(
            request.args,
            Some(vec!["-c".to_string(), "npm test && npm run lint".to_string()])
        );
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("main"), "main");
        assert_eq!(shell_quote("feature/login"), "feature/login");
        assert_eq!(shell_quote("my dir"), "'my dir'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
