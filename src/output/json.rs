//! JSON reporter
//!
//! Writes the whole state tree as one pretty-printed document once the run ends.

use std::io::Write;

use crate::dispatch::{Reporter, ReporterCtx};

pub struct JsonReporter<W> {
    out: W,
}

impl<W: Write + Send> JsonReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> Reporter for JsonReporter<W> {
    fn name(&self) -> &str {
        "json"
    }

    fn finished_all_tests(&mut self, ctx: &ReporterCtx<'_>) -> anyhow::Result<()> {
        serde_json::to_writer_pretty(&mut self.out, &ctx.root.snapshot())?;
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }
}
