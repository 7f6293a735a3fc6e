//! Command test bodies
//!
//! Runs a program and checks its exit code. The child is killed when the
//! body's future is dropped or the context's token fires.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::{TestBody, TestContext};

/// Lines of stderr kept in a failure message
const STDERR_TAIL_LINES: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandBody {
    pub program: String,
    pub args: Vec<String>,
    pub expect_exit: i32,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl CommandBody {
    /// Parse a command line with shell quoting rules
    pub fn parse(command_line: &str) -> Result<Self> {
        let mut words = shell_words::split(command_line)
            .with_context(|| format!("invalid command line: {command_line}"))?;
        if words.is_empty() {
            anyhow::bail!("empty command line");
        }
        let program = words.remove(0);
        Ok(Self {
            program,
            args: words,
            expect_exit: 0,
            env: BTreeMap::new(),
            cwd: None,
        })
    }

    pub fn expect_exit(mut self, code: i32) -> Self {
        self.expect_exit = code;
        self
    }

    pub fn env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    async fn execute(&self, ctx: &TestContext) -> Result<()> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        debug!(scope = %ctx.scope, command = %self.command_line(), "running test command");
        let output = tokio::select! {
            output = command.output() => output
                .with_context(|| format!("failed to spawn `{}`", self.command_line()))?,
            _ = ctx.cancel.cancelled() => {
                anyhow::bail!("`{}` was cancelled", self.command_line())
            }
        };

        let code = output.status.code();
        if code == Some(self.expect_exit) {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<&str> = stderr.lines().collect();
        let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
        let status = match code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        };

        if tail.is_empty() {
            anyhow::bail!(
                "`{}` finished with {status}, expected {}",
                self.command_line(),
                self.expect_exit
            )
        } else {
            anyhow::bail!(
                "`{}` finished with {status}, expected {}\n{tail}",
                self.command_line(),
                self.expect_exit
            )
        }
    }
}

impl TestBody for CommandBody {
    fn run<'a>(&'a self, ctx: &'a TestContext) -> BoxFuture<'a, Result<()>> {
        self.execute(ctx).boxed()
    }
}
