//! Event sinks
//!
//! Where the file executor sends events: an in-process channel, or a JSON
//! lines stream when running as a subprocess.

use std::io::Write;
use std::sync::Mutex;
use tracing::warn;

use super::EventSender;
use crate::models::Event;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

impl EventSink for EventSender {
    fn emit(&self, event: Event) {
        // The receiver only goes away once the run is over.
        let _ = self.send(event);
    }
}

/// Writes one JSON event per line, flushing after each
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn emit(&self, event: Event) {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let written = serde_json::to_writer(&mut *writer, &event)
            .map_err(std::io::Error::from)
            .and_then(|()| writer.write_all(b"\n"))
            .and_then(|()| writer.flush());
        if let Err(err) = written {
            warn!(event = %event.kind(), "failed to write event: {err}");
        }
    }
}
