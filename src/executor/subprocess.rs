//! Subprocess runner
//!
//! Re-executes the binary in `exec-file` mode for each file. The child writes
//! one JSON event per line on stdout; anything else it prints goes to stderr.
//! A child that exits badly, prints garbage, or stops before `closedFile`
//! is treated as crashed.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{EventSender, ExecuteOptions, FileProgress, Runner, RunnerError, RunnerKind};
use crate::discovery::DiscoveredFile;
use crate::models::{Event, TestError};

/// Hidden subcommand the child is started with
pub const EXEC_FILE_COMMAND: &str = "exec-file";

#[derive(Clone, Debug)]
pub struct SubprocessRunner {
    program: PathBuf,
    leading_args: Vec<String>,
}

impl SubprocessRunner {
    /// Re-execute the running binary
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::with_command(
            std::env::current_exe()?,
            vec![EXEC_FILE_COMMAND.to_string()],
        ))
    }

    /// Use a custom program; file arguments are appended after `leading_args`
    pub fn with_command(program: impl Into<PathBuf>, leading_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
        }
    }

    fn command(&self, file: &DiscoveredFile, options: &ExecuteOptions) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .arg(&file.path)
            .arg("--scope-name")
            .arg(file.scope.file_name().unwrap_or_default())
            .arg("--timeout-ms")
            .arg(options.timeout.as_millis().to_string())
            .arg("--test-mode")
            .arg(options.test_concurrency.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }
}

impl Runner for SubprocessRunner {
    fn kind(&self) -> RunnerKind {
        RunnerKind::Subprocess
    }

    fn execute_file(
        &self,
        file: Arc<DiscoveredFile>,
        options: ExecuteOptions,
        events: EventSender,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<(), RunnerError>> {
        let command = self.command(&file, &options);
        run_child(command, file, events, cancel).boxed()
    }
}

enum Ending {
    Eof,
    Malformed(String),
    ReadFailed(std::io::Error),
    Cancelled,
}

async fn run_child(
    mut command: Command,
    file: Arc<DiscoveredFile>,
    events: EventSender,
    cancel: CancellationToken,
) -> Result<(), RunnerError> {
    let mut progress = FileProgress::new(&file, &events);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(source) => {
            progress.fail_remaining(TestError::crash(format!("failed to start: {source}")));
            return Err(RunnerError::Spawn {
                file: file.path.clone(),
                source,
            });
        }
    };
    debug!(file = %file.scope, pid = ?child.id(), "subprocess started");

    let ending = match child.stdout.take() {
        Some(stdout) => relay_lines(stdout, &mut progress, &cancel).await,
        None => Ending::Eof,
    };

    let cause = match ending {
        Ending::Cancelled => {
            kill(&mut child).await;
            progress.fail_remaining(TestError::cancelled());
            return Err(RunnerError::Cancelled {
                file: file.path.clone(),
            });
        }
        Ending::Malformed(line) => {
            kill(&mut child).await;
            format!("malformed event line: {line}")
        }
        Ending::ReadFailed(err) => {
            kill(&mut child).await;
            format!("failed to read events: {err}")
        }
        Ending::Eof => match child.wait().await {
            Ok(status) if status.success() && progress.is_closed() => return Ok(()),
            Ok(status) if status.success() => {
                "process exited before closing the file".to_string()
            }
            Ok(status) => format!("process exited with {status}"),
            Err(err) => format!("failed to wait for process: {err}"),
        },
    };

    warn!(file = %file.scope, "{cause}");
    progress.fail_remaining(TestError::crash(&cause));
    Err(RunnerError::Crashed {
        file: file.path.clone(),
        cause,
    })
}

async fn relay_lines(
    stdout: tokio::process::ChildStdout,
    progress: &mut FileProgress<'_>,
    cancel: &CancellationToken,
) -> Ending {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ending::Cancelled,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match serde_json::from_str::<Event>(&line) {
                Ok(event) => progress.forward(event),
                Err(_) => return Ending::Malformed(line),
            },
            Ok(None) => return Ending::Eof,
            Err(err) => return Ending::ReadFailed(err),
        }
    }
}

async fn kill(child: &mut Child) {
    if let Err(err) = child.kill().await {
        debug!("failed to kill subprocess: {err}");
    }
}
