//! Progress events and the sinks that deliver them to an observer.
//!
//! Events are rendered to text frames whose prefixes the client routes on:
//! `Agent Task Update:` carries a full JSON snapshot of step statuses, the
//! remaining prefixes carry human-readable text.

use std::io::Write;

use anyhow::{Context, Result};
use tracing::warn;

use crate::core::types::StepSnapshot;

pub const TASK_UPDATE_PREFIX: &str = "Agent Task Update:";
pub const ACTIVITY_PREFIX: &str = "Agent:";
pub const WARNING_PREFIX: &str = "Agent Warning:";
pub const ERROR_PREFIX: &str = "Agent Error:";
pub const FINAL_PREFIX: &str = "Agent: Final Response:";

/// One outbound progress message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Activity(String),
    Warning(String),
    Error(String),
    /// Full snapshot of every step's description and status.
    Steps(Vec<StepSnapshot>),
    /// The single terminal summary of a run.
    Final(String),
}

impl ProgressEvent {
    pub fn activity(text: impl Into<String>) -> Self {
        ProgressEvent::Activity(text.into())
    }

    pub fn warning(text: impl Into<String>) -> Self {
        ProgressEvent::Warning(text.into())
    }

    pub fn error(text: impl Into<String>) -> Self {
        ProgressEvent::Error(text.into())
    }

    /// Render the event as a wire frame.
    pub fn to_frame(&self) -> String {
        match self {
            ProgressEvent::Activity(text) => format!("{ACTIVITY_PREFIX} {text}"),
            ProgressEvent::Warning(text) => format!("{WARNING_PREFIX} {text}"),
            ProgressEvent::Error(text) => format!("{ERROR_PREFIX} {text}"),
            ProgressEvent::Steps(steps) => {
                let json = serde_json::to_string(steps).unwrap_or_else(|_| "[]".to_string());
                format!("{TASK_UPDATE_PREFIX} {json}")
            }
            ProgressEvent::Final(text) => format!("{FINAL_PREFIX} {text}"),
        }
    }
}

/// Receiver of progress events (a client connection, a terminal, a test recorder).
pub trait ProgressSink {
    fn send(&self, event: ProgressEvent) -> Result<()>;
}

impl<T: ProgressSink + ?Sized> ProgressSink for &T {
    fn send(&self, event: ProgressEvent) -> Result<()> {
        (**self).send(event)
    }
}

/// Send an event, logging instead of failing when delivery does not work.
pub fn emit(sink: &dyn ProgressSink, event: ProgressEvent) {
    if let Err(err) = sink.send(event) {
        warn!(err = %format!("{err:#}"), "failed to deliver progress event");
    }
}

/// Sink that prints one frame per line to a writer (stdout for the CLI).
pub struct WriterSink<W: Write> {
    writer: std::sync::Mutex<W>,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: std::sync::Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W: Write> ProgressSink for WriterSink<W> {
    fn send(&self, event: ProgressEvent) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("progress writer poisoned"))?;
        writeln!(writer, "{}", event.to_frame()).context("write progress frame")?;
        writer.flush().context("flush progress frame")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StepStatus;

    struct FailingSink;

    impl ProgressSink for FailingSink {
        fn send(&self, _event: ProgressEvent) -> Result<()> {
            Err(anyhow::anyhow!("connection reset"))
        }
    }

    #[test]
    fn frames_use_client_prefixes() {
        assert_eq!(
            ProgressEvent::activity("Planning steps...").to_frame(),
            "Agent: Planning steps..."
        );
        assert_eq!(
            ProgressEvent::warning("slow").to_frame(),
            "Agent Warning: slow"
        );
        assert_eq!(ProgressEvent::error("boom").to_frame(), "Agent Error: boom");
        assert_eq!(
            ProgressEvent::Final("done".to_string()).to_frame(),
            "Agent: Final Response: done"
        );
    }

    #[test]
    fn steps_frame_is_full_json_snapshot() {
        let event = ProgressEvent::Steps(vec![StepSnapshot {
            description: "List files".to_string(),
            status: StepStatus::Done,
        }]);
        assert_eq!(
            event.to_frame(),
            r#"Agent Task Update: [{"description":"List files","status":"done"}]"#
        );
    }

    #[test]
    fn emit_swallows_send_failures() {
        emit(&FailingSink, ProgressEvent::activity("still running"));
    }

    #[test]
    fn writer_sink_writes_one_line_per_event() {
        let sink = WriterSink::new(Vec::new());
        sink.send(ProgressEvent::activity("one")).expect("send");
        sink.send(ProgressEvent::error("two")).expect("send");
        let written = String::from_utf8(sink.into_inner()).expect("utf8");
        assert_eq!(written, "Agent: one\nAgent Error: two\n");
    }
}
