//! Consumers of per-frame results: storage, alerting, display.

use crate::pipeline::FrameResult;
use std::io::Write;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("result serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub trait ResultSink: Send {
    fn name(&self) -> &str;
    fn deliver(&mut self, result: &FrameResult) -> Result<(), SinkError>;
}

/// Writes each result as one JSON line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
    /// Skip frames with no faces and no events.
    skip_empty: bool,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            skip_empty: false,
        }
    }

    pub fn skip_empty(mut self, skip: bool) -> Self {
        self.skip_empty = skip;
        self
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> ResultSink for JsonLinesSink<W> {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn deliver(&mut self, result: &FrameResult) -> Result<(), SinkError> {
        if self.skip_empty && result.faces.is_empty() && result.events.is_empty() {
            return Ok(());
        }
        serde_json::to_writer(&mut self.writer, result)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Logs fresh detections and every alert event.
#[derive(Debug, Default)]
pub struct TracingSink;

impl ResultSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn deliver(&mut self, result: &FrameResult) -> Result<(), SinkError> {
        for face in result.fresh_faces() {
            tracing::info!(
                sequence = result.sequence,
                person = %face.display_name,
                confidence = face.confidence,
                unknown = face.is_unknown,
                "detection"
            );
        }
        for event in &result.events {
            tracing::warn!(
                sequence = result.sequence,
                severity = ?event.severity(),
                "{}",
                event.description()
            );
        }
        Ok(())
    }
}

/// Hand `result` to every sink. A failing sink is logged and skipped.
/// Returns the number of sinks that failed.
pub fn deliver_to_sinks(sinks: &mut [Box<dyn ResultSink>], result: &FrameResult) -> usize {
    let mut failures = 0;
    for sink in sinks.iter_mut() {
        if let Err(e) = sink.deliver(result) {
            failures += 1;
            tracing::warn!(sink = sink.name(), sequence = result.sequence, error = %e, "result delivery failed");
        }
    }
    failures
}
