use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o failure waiting for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` was cancelled")]
    Cancelled { command: String },
}

/// Everything a finished capture run produced: the exit status plus the
/// combined stdout+stderr, kept for diagnostics and failure records.
#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub output: String,
}

/// A subprocess invocation bound to a cancellation token.
///
/// Two modes: `run_capture` aggregates both output streams to completion
/// (probes, one-shot tools), while `spawn` hands back a [`CommandHandle`]
/// with whichever pipes the caller claimed (the streaming pipeline).
#[derive(Debug, Clone)]
pub struct CommandContext {
    program: String,
    args: Vec<String>,
}

impl CommandContext {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Human-readable command line for logs and error messages.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Run to completion, aggregating stdout and stderr into one buffer.
    /// When the token fires the child is killed and `Cancelled` is returned.
    pub async fn run_capture(
        &self,
        cancel: &CancellationToken,
    ) -> Result<CapturedOutput, CommandError> {
        let mut handle = self.spawn(Stdio::null(), Stdio::piped(), Stdio::piped())?;

        let stdout = handle.take_stdout();
        let stderr = handle.take_stderr();
        let stdout_task = tokio::spawn(slurp(stdout));
        let stderr_task = tokio::spawn(slurp(stderr));

        let status = handle.wait(cancel).await;

        let mut combined = stdout_task.await.unwrap_or_default();
        combined.append(&mut stderr_task.await.unwrap_or_default());
        let output = String::from_utf8_lossy(&combined).into_owned();

        match status {
            Ok(status) => Ok(CapturedOutput { status, output }),
            Err(err) => Err(err),
        }
    }

    pub fn spawn(
        &self,
        stdin: Stdio,
        stdout: Stdio,
        stderr: Stdio,
    ) -> Result<CommandHandle, CommandError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| CommandError::Spawn {
            command: self.display(),
            source,
        })?;

        Ok(CommandHandle {
            command: self.display(),
            child,
        })
    }
}

async fn slurp<R>(reader: Option<R>) -> Vec<u8>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        // Read errors here mean the child died mid-stream; the exit status
        // carries the real diagnosis.
        let _ = reader.read_to_end(&mut buf).await;
    }
    buf
}

/// A running child process. Pipes are claimed at most once; each claimed
/// pipe must be drained by exactly one task so `wait` never blocks on an
/// unclaimed stream.
#[derive(Debug)]
pub struct CommandHandle {
    command: String,
    child: Child,
}

impl CommandHandle {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Wait for the child to exit. When the token fires first the child is
    /// killed, reaped, and `Cancelled` is returned.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> Result<ExitStatus, CommandError> {
        tokio::select! {
            status = self.child.wait() => status.map_err(|source| CommandError::Wait {
                command: self.command.clone(),
                source,
            }),
            _ = cancel.cancelled() => {
                self.kill().await;
                Err(CommandError::Cancelled { command: self.command.clone() })
            }
        }
    }

    /// Kill the child and reap it so no zombie is left behind. Safe to call
    /// on an already-exited child.
    pub async fn kill(&mut self) {
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_capture_combines_stdout_and_stderr() {
        let cmd = CommandContext::new("sh", ["-c", "printf out; printf err 1>&2"]);
        let cancel = CancellationToken::new();

        let captured = cmd.run_capture(&cancel).await.expect("run sh");
        assert!(captured.status.success());
        assert!(captured.output.contains("out"), "got: {}", captured.output);
        assert!(captured.output.contains("err"), "got: {}", captured.output);
    }

    #[tokio::test]
    async fn run_capture_reports_nonzero_exit() {
        let cmd = CommandContext::new("sh", ["-c", "printf boom 1>&2; exit 3"]);
        let cancel = CancellationToken::new();

        let captured = cmd.run_capture(&cancel).await.expect("run sh");
        assert!(!captured.status.success());
        assert!(captured.output.contains("boom"));
    }

    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let cmd = CommandContext::new("sleep", ["30"]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let started = std::time::Instant::now();
        let err = cmd.run_capture(&cancel).await.expect_err("must cancel");
        assert!(matches!(err, CommandError::Cancelled { .. }));
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[tokio::test]
    async fn spawn_failure_names_the_command() {
        let cmd = CommandContext::new("definitely-not-a-real-binary", ["--nope"]);
        let cancel = CancellationToken::new();

        let err = cmd.run_capture(&cancel).await.expect_err("must fail");
        assert!(err.to_string().contains("definitely-not-a-real-binary"));
    }
}
