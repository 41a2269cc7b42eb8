//! Launch descriptors and the process runner trait.
//!
//! Runners spawn the commands a job needs and stream their output back
//! through the job's [`EventBus`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::Result;
use crate::bus::EventBus;

/// How a runner echoes a command before running it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Echo {
    /// Echo the command text as given.
    #[default]
    Command,
    /// Echo this text instead, e.g. a command with credentials redacted.
    Text(String),
    /// Do not echo anything.
    Silent,
}

/// A fully resolved command launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    /// Program name, or a whole shell command line when `args` is `None`.
    pub command: String,
    pub args: Option<Vec<String>>,
    pub cwd: PathBuf,
    /// Variables applied on top of the runner's inherited environment.
    pub env: HashMap<String, String>,
    /// Run under a pseudo-terminal.
    pub pty: bool,
    pub echo: Echo,
}

impl Launch {
    /// A shell command line run without a terminal and without extra env.
    pub fn shell(cwd: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: None,
            cwd: cwd.into(),
            env: HashMap::new(),
            pty: false,
            echo: Echo::Command,
        }
    }

    pub fn with_pty(mut self, pty: bool) -> Self {
        self.pty = pty;
        self
    }

    pub fn with_echo(mut self, echo: Echo) -> Self {
        self.echo = echo;
        self
    }

    /// Text a runner should echo before running, if any.
    pub fn echo_text(&self) -> Option<String> {
        echo_text(&self.echo, || match &self.args {
            Some(args) if !args.is_empty() => format!("{} {}", self.command, args.join(" ")),
            _ => self.command.clone(),
        })
    }
}

/// A git command line that may need repository credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitLaunch {
    /// Shell command line, e.g. `git pull`.
    pub command: String,
    pub cwd: PathBuf,
    /// Deploy key made available to ssh for the duration of the command.
    pub private_key: Option<String>,
    pub echo: Echo,
}

impl GitLaunch {
    pub fn new(cwd: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            private_key: None,
            echo: Echo::Command,
        }
    }

    pub fn with_private_key(mut self, key: Option<String>) -> Self {
        self.private_key = key;
        self
    }

    pub fn with_echo(mut self, echo: Echo) -> Self {
        self.echo = echo;
        self
    }

    pub fn echo_text(&self) -> Option<String> {
        echo_text(&self.echo, || self.command.clone())
    }
}

fn echo_text(echo: &Echo, command: impl FnOnce() -> String) -> Option<String> {
    match echo {
        Echo::Command => Some(command()),
        Echo::Text(text) => Some(text.clone()),
        Echo::Silent => None,
    }
}

/// Result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExitOutcome {
    pub fn new(code: i32) -> Self {
        Self {
            code,
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Trait for process runners.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Name of this runner.
    fn name(&self) -> &'static str;

    /// Run a command, streaming its output to `bus`, and wait for it.
    async fn run(&self, launch: Launch, bus: Arc<EventBus>) -> Result<ExitOutcome>;

    /// Run a git command with the job's repository credentials.
    async fn run_git(&self, launch: GitLaunch, bus: Arc<EventBus>) -> Result<ExitOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_text_variants() {
        let launch = Launch::shell("/tmp", "git pull");
        assert_eq!(launch.echo_text().as_deref(), Some("git pull"));

        let launch = launch.with_echo(Echo::Text("git clone https://example.com".to_string()));
        assert_eq!(
            launch.echo_text().as_deref(),
            Some("git clone https://example.com")
        );

        let launch = Launch::shell("/tmp", "rm -rf x").with_echo(Echo::Silent);
        assert_eq!(launch.echo_text(), None);
    }

    #[test]
    fn test_echo_joins_program_and_args() {
        let mut launch = Launch::shell("/tmp", "npm");
        launch.args = Some(vec!["run".to_string(), "test".to_string()]);
        assert_eq!(launch.echo_text().as_deref(), Some("npm run test"));
    }

    #[test]
    fn test_exit_outcome_success() {
        assert!(ExitOutcome::new(0).success());
        assert!(!ExitOutcome::new(128).success());
    }
}
