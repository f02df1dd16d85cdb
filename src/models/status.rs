use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::asset::{DisplayStatus, LifecycleState};

/// One row update for the status table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    pub batch: Arc<str>,
    /// Position of the job in its batch; display names may repeat.
    pub index: usize,
    pub asset: String,
    pub state: LifecycleState,
    pub upload_state: String,
    pub processing_detail: String,
    pub patch_state: String,
    pub batch_summary: String,
    pub at: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(
        batch: Arc<str>,
        index: usize,
        asset: String,
        state: LifecycleState,
        display: DisplayStatus,
    ) -> Self {
        Self {
            batch,
            index,
            asset,
            state,
            upload_state: display.upload_state,
            processing_detail: display.processing_detail,
            patch_state: display.patch_state,
            batch_summary: display.batch_summary,
            at: Utc::now(),
        }
    }
}

/// Everything the pipeline tells the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusUpdate {
    BatchStarted { batch: Arc<str>, title: String, total: usize },
    Asset(StatusEvent),
    /// Every job has passed the upload stage.
    QueueDrained { batch: Arc<str> },
    BatchFinished(BatchReport),
}

/// Terminal outcome counts for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub batch: String,
    pub total: usize,
    pub upload_failed: usize,
    pub processing_failed: usize,
    pub patch_failed: usize,
    pub patch_succeeded: usize,
    pub no_patch_needed: usize,
}

impl BatchReport {
    pub fn new(batch: &str, total: usize) -> Self {
        Self {
            batch: batch.to_string(),
            total,
            ..Self::default()
        }
    }

    pub fn record(&mut self, state: LifecycleState) {
        match state {
            LifecycleState::UploadFailed => self.upload_failed += 1,
            LifecycleState::ProcessingFailed => self.processing_failed += 1,
            LifecycleState::PatchFailed => self.patch_failed += 1,
            LifecycleState::PatchSucceeded => self.patch_succeeded += 1,
            LifecycleState::NoPatchNeeded => self.no_patch_needed += 1,
            other => {
                tracing::warn!(state = %other, "Non-terminal state recorded in batch report");
            }
        }
    }

    pub fn succeeded(&self) -> usize {
        self.patch_succeeded + self.no_patch_needed
    }

    pub fn failed(&self) -> usize {
        self.upload_failed + self.processing_failed + self.patch_failed
    }

    pub fn finished(&self) -> usize {
        self.succeeded() + self.failed()
    }
}
