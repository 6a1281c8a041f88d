//! Output adapters for runtime event streams.

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use crate::runtime::error::{GraphError, GraphResult};
use crate::runtime::event::{Event, EventSink};

/// JSON Lines output for the event stream.
pub struct JsonLineEventSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLineEventSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> EventSink for JsonLineEventSink<W> {
    fn emit(&self, event: Event) -> GraphResult<()> {
        let json = serde_json::to_string(&event)?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{json}")
            .and_then(|()| writer.flush())
            .map_err(|err| GraphError::io("writing event log", err))
    }
}
