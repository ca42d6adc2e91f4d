//! Status updates for the host while a turn is being checked or swapped.
//!
//! Delivery is best-effort: [`ProgressReporter::emit`] never fails, and a
//! reporter without a sink does nothing.

use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProgressError;

/// One status line shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub description: String,
    pub done: bool,
}

/// Event envelope understood by the host, e.g.
/// `{"type": "status", "data": {"description": "...", "done": false}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum HostEvent {
    Status(ProgressEvent),
}

/// Destination for host events.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn send(&self, event: &HostEvent) -> Result<(), ProgressError>;
}

/// Sink that forwards events into a tokio channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<HostEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver the host reads from.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ProgressSink for ChannelSink {
    async fn send(&self, event: &HostEvent) -> Result<(), ProgressError> {
        self.tx
            .send(event.clone())
            .map_err(|_| ProgressError::ChannelClosed)
    }
}

/// Sink that writes one JSON object per line.
///
/// Writes and flushes synchronously on the calling task, so it is meant for
/// stderr/stdout in the CLI or in-memory buffers. Hosts streaming to a
/// socket or pipe should use [`ChannelSink`] and forward from the receiver.
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the writer (tests, buffered hosts).
    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl<W: Write + Send> ProgressSink for JsonLinesSink<W> {
    async fn send(&self, event: &HostEvent) -> Result<(), ProgressError> {
        let line = serde_json::to_string(event)?;
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }
}

/// Forwards status messages to an optional sink.
#[derive(Clone, Default)]
pub struct ProgressReporter {
    sink: Option<Arc<dyn ProgressSink>>,
}

impl ProgressReporter {
    pub fn new(sink: Option<Arc<dyn ProgressSink>>) -> Self {
        Self { sink }
    }

    /// Reporter with no observer.
    pub fn silent() -> Self {
        Self { sink: None }
    }

    pub fn is_silent(&self) -> bool {
        self.sink.is_none()
    }

    /// Deliver a status message. Failures are logged and dropped.
    pub async fn emit(&self, description: impl Into<String>, done: bool) {
        let Some(sink) = &self.sink else {
            return;
        };
        let event = HostEvent::Status(ProgressEvent {
            description: description.into(),
            done,
        });
        if let Err(e) = sink.send(&event).await {
            tracing::warn!(error = %e, "Failed to deliver status update");
        }
    }
}

/// Test-only sink that records every event.
#[cfg(test)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

#[cfg(test)]
impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl ProgressSink for RecordingSink {
    async fn send(&self, event: &HostEvent) -> Result<(), ProgressError> {
        let HostEvent::Status(status) = event;
        self.events.lock().unwrap().push(status.clone());
        Ok(())
    }
}
