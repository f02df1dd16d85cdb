//! Upload → processing → patch orchestration.
//!
//! [`run_batch`] drives one batch: the [`UploadDispatcher`] pushes every job
//! through the create call under a bounded pool, each created asset gets its
//! own poll task, and priced assets finish through the bounded
//! [`PatchWorker`]. Every accepted state change is published to the status
//! sink.

pub mod dispatcher;
pub mod patch;
pub mod poll;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::app_state::PipelineState;
use crate::models::asset::{AssetEvent, AssetRecord, LifecycleState};
use crate::models::job::Batch;
use crate::models::status::{BatchReport, StatusUpdate};

pub use dispatcher::{DispatchStats, RoundBackoff, UploadDispatcher, UploadError};
pub use patch::{PatchError, PatchReceipt, PatchRequest, PatchWorker};

/// Run a whole batch and return once every asset is terminal.
pub async fn run_batch(state: PipelineState, batch: Batch) -> BatchReport {
    let name = batch.name.clone();
    let total = batch.jobs.len();
    tracing::info!(batch = %name, total, "Starting batch");
    state.sink.publish(StatusUpdate::BatchStarted {
        batch: name.clone(),
        title: batch.title(),
        total,
    });

    let tally = Tally::new(&name, total);
    let dispatcher = UploadDispatcher::new(state.clone());
    let stats = dispatcher.dispatch(batch, &tally).await;
    tracing::info!(
        batch = %name,
        launched = stats.launched,
        uploaded = stats.uploaded,
        upload_failed = stats.failed,
        rate_limited_rounds = stats.rate_limited_rounds,
        "Upload stage finished, waiting for processing"
    );

    let polls = dispatcher.poll_tasks();
    polls.close();
    polls.wait().await;

    let report = tally.snapshot();
    tracing::info!(
        batch = %report.batch,
        succeeded = report.succeeded(),
        failed = report.failed(),
        "Batch finished"
    );
    state.sink.publish(StatusUpdate::BatchFinished(report.clone()));
    report
}

/// Apply `event` to `record`, publishing the new status when accepted.
pub(crate) fn advance(
    state: &PipelineState,
    record: &mut AssetRecord,
    event: AssetEvent,
) -> LifecycleState {
    if let Some(status) = record.apply(event) {
        tracing::info!(
            batch = %record.batch,
            asset = %record.name(),
            remote_id = record.remote_id().unwrap_or(""),
            state = %status.state,
            detail = %status.processing_detail,
            "Asset state changed"
        );
        state.sink.publish(StatusUpdate::Asset(status));
    }
    record.state()
}

/// Sleep for `duration` unless cancelled first. Returns `false` on cancel.
pub(crate) async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Terminal outcome counter shared by the upload and poll tasks of a batch.
#[derive(Clone)]
pub struct Tally(Arc<Mutex<BatchReport>>);

impl Tally {
    pub fn new(batch: &str, total: usize) -> Self {
        Self(Arc::new(Mutex::new(BatchReport::new(batch, total))))
    }

    pub fn record(&self, state: LifecycleState) {
        if let Ok(mut report) = self.0.lock() {
            report.record(state);
        }
    }

    pub fn snapshot(&self) -> BatchReport {
        self.0.lock().map(|r| r.clone()).unwrap_or_default()
    }
}
