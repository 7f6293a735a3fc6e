//! Console reporter
//!
//! Prints each file's subtree once the file closes, then a totals line.

use std::io::Write;

use crate::dispatch::{Reporter, ReporterCtx};
use crate::models::Status;
use crate::state::{NodeRef, NodeSnapshot};

pub struct ConsoleReporter<W> {
    out: W,
    colorize: bool,
    files: usize,
}

impl<W: Write + Send> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            colorize: true,
            files: 0,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn status_label(&self, status: Option<Status>) -> String {
        let Some(status) = status else {
            return "  ? ----".to_string();
        };
        let plain = format!("{} {}", status.symbol(), status);
        if !self.colorize {
            return plain;
        }
        let color = match status {
            Status::Pass => "32",
            Status::Fail => "31",
            Status::Skipped => "33",
        };
        format!("\x1b[{color}m{plain}\x1b[0m")
    }

    fn write_node(&mut self, node: NodeRef<'_>, depth: usize) -> std::io::Result<()> {
        let indent = "  ".repeat(depth);
        let duration = node
            .duration()
            .map(|d| format!(" ({}ms)", d.as_millis()))
            .unwrap_or_default();

        let label = self.status_label(node.status());
        writeln!(
            self.out,
            "{indent}{label} {}{duration}",
            node.name().unwrap_or_default()
        )?;
        if let Some(err) = node.err() {
            for line in err.message.lines() {
                writeln!(self.out, "{indent}    {line}")?;
            }
        }

        for child in node.children() {
            self.write_node(child, depth + 1)?;
        }
        Ok(())
    }
}

impl<W: Write + Send> Reporter for ConsoleReporter<W> {
    fn name(&self) -> &str {
        "console"
    }

    fn closed_file(&mut self, ctx: &ReporterCtx<'_>) -> anyhow::Result<()> {
        let Some(file) = ctx.node else {
            return Ok(());
        };
        self.files += 1;
        self.write_node(file, 0)?;
        if let Some(err) = ctx.err() {
            writeln!(self.out, "    {}", err.message)?;
        }
        self.out.flush()?;
        Ok(())
    }

    fn finished_all_tests(&mut self, ctx: &ReporterCtx<'_>) -> anyhow::Result<()> {
        let snapshot: NodeSnapshot = ctx.root.snapshot();
        let (passed, failed, skipped) = snapshot.totals();
        let duration = ctx
            .root
            .duration()
            .map(|d| d.as_millis())
            .unwrap_or_default();

        let label = self.status_label(ctx.root.status());
        writeln!(self.out)?;
        writeln!(
            self.out,
            "{label} Files: {} | Tests: {} passed, {} failed, {} skipped | {}ms",
            self.files,
            passed,
            failed,
            skipped,
            duration
        )?;
        self.out.flush()?;
        Ok(())
    }
}
