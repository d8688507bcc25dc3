//! Audit trail: append-only record of lifecycle transitions.
//!
//! Writes are write-behind. [`AuditTrail::record`] hands the entry to a
//! background writer and returns immediately, so a slow or failing sink never
//! delays or unwinds the task transition that produced the entry. Failures are
//! logged and counted; detecting the resulting gaps is left to monitoring.

use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::model::AuditLogEntry;
use crate::telemetry::metrics;

/// Durable destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()>;

    /// Entries about one resource, oldest first.
    async fn entries_for(&self, resource_id: &str) -> Result<Vec<AuditLogEntry>>;
}

enum Command {
    Record(Box<AuditLogEntry>),
    Flush(oneshot::Sender<()>),
}

/// Non-blocking front for an [`AuditSink`]. Cheap to clone.
#[derive(Clone)]
pub struct AuditTrail {
    tx: mpsc::UnboundedSender<Command>,
    sink: Arc<dyn AuditSink>,
}

impl AuditTrail {
    /// Start the background writer. Must be called inside a tokio runtime.
    /// The writer exits once every clone of the trail has been dropped.
    pub fn spawn(sink: Arc<dyn AuditSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_behind(Arc::clone(&sink), rx));
        Self { tx, sink }
    }

    /// Queue one entry for writing.
    pub fn record(&self, entry: AuditLogEntry) {
        let action = entry.action;
        if self.tx.send(Command::Record(Box::new(entry))).is_err() {
            warn!(%action, "audit writer has stopped, entry dropped");
            metrics::audit_write_failures().add(1, &[KeyValue::new("action", action.as_str())]);
        }
    }

    /// Wait until every entry recorded before this call has been handed to
    /// the sink (successfully or not).
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Read history straight from the sink.
    pub async fn history(&self, resource_id: &str) -> Result<Vec<AuditLogEntry>> {
        self.sink.entries_for(resource_id).await
    }
}

async fn write_behind(sink: Arc<dyn AuditSink>, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Record(entry) => match sink.append(&entry).await {
                Ok(()) => debug!(
                    action = %entry.action,
                    resource_id = %entry.resource_id,
                    "audit entry written"
                ),
                Err(e) => {
                    error!(
                        action = %entry.action,
                        resource_id = %entry.resource_id,
                        "audit write failed: {e}"
                    );
                    metrics::audit_write_failures()
                        .add(1, &[KeyValue::new("action", entry.action.as_str())]);
                }
            },
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("audit writer stopped");
}
