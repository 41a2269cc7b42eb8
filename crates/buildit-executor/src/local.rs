//! Local process runner.

use async_trait::async_trait;
use buildit_core::bus::{EventBus, OutputTag};
use buildit_core::executor::{ExitOutcome, GitLaunch, Launch, ProcessRunner};
use buildit_core::{Error, Result};
use futures::stream::{self, Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
enum Pipe {
    Stdout,
    Stderr,
}

/// Runs job commands as child processes of the worker.
///
/// Pseudo-terminals are not supported: a launch that asks for one raises
/// `disable_interactive` on the bus and runs without a terminal.
pub struct LocalRunner {
    shell: String,
}

impl LocalRunner {
    pub fn new() -> Self {
        Self::with_shell("sh")
    }

    /// Create with a custom shell for command lines.
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    fn command_for(&self, launch: &Launch) -> Command {
        let mut cmd = match &launch.args {
            Some(args) => {
                let mut cmd = Command::new(&launch.command);
                cmd.args(args);
                cmd
            }
            None => self.shell_command(&launch.command),
        };
        cmd.current_dir(&launch.cwd).envs(&launch.env);
        cmd
    }

    fn shell_command(&self, line: &str) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(line);
        cmd
    }

    /// Spawn `cmd` and forward its output to the bus chunk by chunk, in the
    /// order chunks arrive across both pipes.
    async fn stream(
        &self,
        mut cmd: Command,
        echo: Option<String>,
        bus: Arc<EventBus>,
    ) -> Result<ExitOutcome> {
        if let Some(text) = echo {
            bus.stdout(format!("$ {}\n", text), Some(OutputTag::Command));
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::ExecutionFailed(format!("Failed to spawn process: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("stderr was not captured".to_string()))?;

        let mut chunks = Box::pin(stream::select(
            output_chunks(stdout, Pipe::Stdout),
            output_chunks(stderr, Pipe::Stderr),
        ));

        let mut outcome = ExitOutcome::default();
        while let Some((pipe, chunk)) = chunks.next().await {
            match pipe {
                Pipe::Stdout => {
                    outcome.stdout.push_str(&chunk);
                    bus.stdout(chunk, None);
                }
                Pipe::Stderr => {
                    outcome.stderr.push_str(&chunk);
                    bus.stderr(chunk, None);
                }
            }
        }

        let status = child.wait().await?;
        outcome.code = status.code().unwrap_or(-1);
        debug!(code = outcome.code, "Process exited");

        Ok(outcome)
    }
}

/// Output of one pipe, split after each newline and otherwise forwarded as
/// written. Invalid UTF-8 is replaced rather than failing the command; a
/// read error ends the stream and the process is still waited for.
fn output_chunks<R>(reader: R, pipe: Pipe) -> impl Stream<Item = (Pipe, String)>
where
    R: AsyncRead + Unpin,
{
    stream::unfold(BufReader::new(reader), move |mut reader| async move {
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => None,
            Ok(_) => Some(((pipe, String::from_utf8_lossy(&buf).into_owned()), reader)),
            Err(e) => {
                warn!(?pipe, error = %e, "Failed to read process output");
                None
            }
        }
    })
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessRunner for LocalRunner {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn run(&self, launch: Launch, bus: Arc<EventBus>) -> Result<ExitOutcome> {
        if launch.pty {
            info!("Pseudo-terminal requested but not supported by the local runner");
            bus.disable_interactive();
        }

        let cmd = self.command_for(&launch);
        self.stream(cmd, launch.echo_text(), bus).await
    }

    async fn run_git(&self, launch: GitLaunch, bus: Arc<EventBus>) -> Result<ExitOutcome> {
        let key = match &launch.private_key {
            Some(key) => Some(KeyFile::write_in(&std::env::temp_dir(), key).await?),
            None => None,
        };

        let mut cmd = self.shell_command(&launch.command);
        cmd.current_dir(&launch.cwd)
            // Fail instead of prompting for credentials.
            .env("GIT_TERMINAL_PROMPT", "0");
        if let Some(key) = &key {
            cmd.env("GIT_SSH_COMMAND", key.ssh_command());
        }

        let result = self.stream(cmd, launch.echo_text(), bus).await;
        drop(key);
        result
    }
}

/// Deploy key written to a private temporary file for one git command.
/// The file is removed when the value is dropped.
struct KeyFile {
    path: PathBuf,
}

impl KeyFile {
    async fn write_in(dir: &Path, key: &str) -> Result<Self> {
        let path = dir.join(format!("buildit-key-{}", Uuid::new_v4()));

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&path).await?;
        // From here on a failed write removes the partial key.
        let guard = Self { path };

        file.write_all(key.as_bytes()).await?;
        if !key.ends_with('\n') {
            file.write_all(b"\n").await?;
        }
        file.flush().await?;

        Ok(guard)
    }

    fn ssh_command(&self) -> String {
        format!(
            "ssh -i '{}' -o IdentitiesOnly=yes -o StrictHostKeyChecking=no",
            self.path.display()
        )
    }
}

impl Drop for KeyFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove deploy key");
            }
        }
    }
}
