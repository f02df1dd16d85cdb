use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::models::status::{BatchReport, StatusEvent, StatusUpdate};

/// Receiver of pipeline status updates. `publish` must not block.
pub trait StatusSink: Send + Sync {
    fn publish(&self, update: StatusUpdate);
}

/// Forwards updates onto an unbounded channel for a presentation task.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StatusUpdate>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StatusSink for ChannelSink {
    fn publish(&self, update: StatusUpdate) {
        if self.tx.send(update).is_err() {
            tracing::debug!("Status receiver dropped, discarding update");
        }
    }
}

/// Latest status per asset, keyed by batch and job position.
#[derive(Default)]
pub struct StatusBoard {
    rows: Mutex<BTreeMap<(Arc<str>, usize), StatusEvent>>,
    reports: Mutex<Vec<BatchReport>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, update: StatusUpdate) {
        match update {
            StatusUpdate::Asset(event) => {
                let key = (event.batch.clone(), event.index);
                if let Ok(mut rows) = self.rows.lock() {
                    rows.insert(key, event);
                }
            }
            StatusUpdate::BatchFinished(report) => {
                if let Ok(mut reports) = self.reports.lock() {
                    reports.push(report);
                }
            }
            StatusUpdate::BatchStarted { .. } | StatusUpdate::QueueDrained { .. } => {}
        }
    }

    /// Current rows in batch/job order.
    pub fn rows(&self) -> Vec<StatusEvent> {
        self.rows
            .lock()
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn reports(&self) -> Vec<BatchReport> {
        self.reports
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl StatusSink for StatusBoard {
    fn publish(&self, update: StatusUpdate) {
        self.apply(update);
    }
}
