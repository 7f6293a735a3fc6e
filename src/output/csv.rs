//! CSV reporter
//!
//! One row per finished test, written as the test finishes.

use std::io::Write;

use crate::dispatch::{Reporter, ReporterCtx};

const HEADER: [&str; 4] = ["scope", "status", "duration_ms", "error"];

pub struct CsvReporter<W: Write> {
    writer: csv::Writer<W>,
    header_written: bool,
}

impl<W: Write + Send> CsvReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(out),
            header_written: false,
        }
    }
}

impl<W: Write + Send> Reporter for CsvReporter<W> {
    fn name(&self) -> &str {
        "csv"
    }

    fn finished_test(&mut self, ctx: &ReporterCtx<'_>) -> anyhow::Result<()> {
        if !self.header_written {
            self.writer.write_record(HEADER)?;
            self.header_written = true;
        }

        let scope = ctx.scope().map(|s| s.to_string()).unwrap_or_default();
        let status = ctx
            .status()
            .map(|s| s.to_string().to_lowercase())
            .unwrap_or_default();
        let duration = ctx
            .node
            .and_then(|node| node.duration())
            .map(|d| d.as_millis().to_string())
            .unwrap_or_default();
        let error = ctx.err().map(|e| e.message.clone()).unwrap_or_default();

        self.writer.write_record([scope, status, duration, error])?;
        Ok(())
    }

    fn finished_all_tests(&mut self, _ctx: &ReporterCtx<'_>) -> anyhow::Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
