use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use garde::Validate;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::task::TaskTracker;

use crate::app_state::PipelineState;
use crate::models::asset::{AssetEvent, AssetRecord};
use crate::models::job::Batch;
use crate::models::status::StatusUpdate;
use crate::pipeline::{advance, poll, sleep_or_cancel, Tally};
use crate::services::packaging::{self, PackagingError};
use crate::services::price;
use crate::services::remote::{CreateAssetForm, CreatedAsset, ErrorKind, RemoteError};

const CANCELLED_BEFORE_UPLOAD: &str = "Cancelled before upload";

/// Why a job ended in `UploadFailed`.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Invalid job: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Packaging(#[from] PackagingError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Upload cancelled")]
    Cancelled,
}

impl UploadError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            UploadError::InvalidInput(_) | UploadError::Packaging(PackagingError::NoModelFiles(_)) => {
                Some(ErrorKind::InvalidInput)
            }
            UploadError::Packaging(_) => Some(ErrorKind::Transport),
            UploadError::Remote(e) => Some(e.kind()),
            UploadError::Cancelled => None,
        }
    }

    /// Detail shown in the status table.
    pub fn detail(&self) -> String {
        match self {
            UploadError::Remote(RemoteError::Rejected { detail, .. }) => detail.clone(),
            other => other.to_string(),
        }
    }
}

/// Dispatcher-wide round pause: doubles after a round that saw a rate limit,
/// halves after a clean round, always within `[base, max]`.
#[derive(Debug, Clone)]
pub struct RoundBackoff {
    current: Duration,
    base: Duration,
    max: Duration,
}

impl RoundBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            current: base,
            base,
            max: max.max(base),
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Fold one round's rate-limit signal in and return the pause to apply.
    pub fn observe(&mut self, rate_limited: bool) -> Duration {
        self.current = if rate_limited {
            (self.current * 2).min(self.max)
        } else {
            (self.current / 2).max(self.base)
        };
        self.current
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub launched: usize,
    pub uploaded: usize,
    pub failed: usize,
    /// Rounds that ended with at least one rate-limited create call.
    pub rate_limited_rounds: usize,
}

/// Bounded upload pool for one batch.
pub struct UploadDispatcher {
    state: PipelineState,
    permits: Arc<Semaphore>,
    polls: TaskTracker,
    rate_limited: Arc<AtomicBool>,
}

impl UploadDispatcher {
    pub fn new(state: PipelineState) -> Self {
        let permits = Arc::new(Semaphore::new(state.config.upload_concurrency.max(1)));
        Self {
            state,
            permits,
            polls: TaskTracker::new(),
            rate_limited: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Poll tasks started for uploaded assets. Outlives [`Self::dispatch`].
    pub fn poll_tasks(&self) -> &TaskTracker {
        &self.polls
    }

    /// Push every job of `batch` to `Uploaded` or `UploadFailed`. Returns once
    /// every launched upload task has finished.
    pub async fn dispatch(&self, batch: Batch, tally: &Tally) -> DispatchStats {
        let config = self.state.config.clone();
        let cancel = self.state.cancel.clone();
        let total = batch.jobs.len();
        let half = total / 2;

        let mut pending: VecDeque<AssetRecord> = batch
            .jobs
            .into_iter()
            .enumerate()
            .map(|(index, job)| AssetRecord::new(batch.name.clone(), index, job))
            .collect();
        for record in &pending {
            self.state.sink.publish(StatusUpdate::Asset(record.snapshot()));
        }

        let mut stats = DispatchStats::default();
        let mut uploads: JoinSet<bool> = JoinSet::new();
        let mut backoff = RoundBackoff::new(config.base_round_pause, config.max_round_pause);
        let mut half_pause_taken = false;

        'dispatch: while !pending.is_empty() {
            if cancel.is_cancelled() {
                break;
            }

            while !pending.is_empty() {
                if !half_pause_taken && half > 0 && pending.len() == half {
                    half_pause_taken = true;
                    tracing::info!(
                        batch = %batch.name,
                        remaining = half,
                        pause_secs = config.half_batch_pause.as_secs(),
                        "Half of the batch scheduled, pausing"
                    );
                    if !sleep_or_cancel(&cancel, config.half_batch_pause).await {
                        break 'dispatch;
                    }
                }

                let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                    break;
                };
                let Some(record) = pending.pop_front() else {
                    break;
                };

                stats.launched += 1;
                uploads.spawn(upload_task(
                    self.state.clone(),
                    record,
                    permit,
                    self.rate_limited.clone(),
                    self.polls.clone(),
                    tally.clone(),
                ));

                if !sleep_or_cancel(&cancel, config.launch_spacing).await {
                    break 'dispatch;
                }
            }

            while let Some(result) = uploads.try_join_next() {
                stats.absorb(result);
            }

            let hit = self.rate_limited.swap(false, Ordering::AcqRel);
            let pause = backoff.observe(hit);
            if hit {
                stats.rate_limited_rounds += 1;
                tracing::warn!(
                    batch = %batch.name,
                    pause_secs = pause.as_secs(),
                    "Rate limited during round, backing off"
                );
            } else {
                tracing::debug!(batch = %batch.name, pause_secs = pause.as_secs(), "Round pause");
            }
            if !sleep_or_cancel(&cancel, pause).await {
                break;
            }
        }

        while let Some(result) = uploads.try_join_next() {
            stats.absorb(result);
        }
        if pending.is_empty() && !uploads.is_empty() && !cancel.is_cancelled() {
            tracing::info!(
                batch = %batch.name,
                in_flight = uploads.len(),
                pause_secs = config.final_pause.as_secs(),
                "Batch fully scheduled, pausing before close"
            );
            sleep_or_cancel(&cancel, config.final_pause).await;
        }

        for mut record in pending.drain(..) {
            let state = advance(
                &self.state,
                &mut record,
                AssetEvent::UploadFailed {
                    detail: CANCELLED_BEFORE_UPLOAD.to_string(),
                },
            );
            tally.record(state);
            stats.failed += 1;
        }

        while let Some(result) = uploads.join_next().await {
            stats.absorb(result);
        }

        tracing::info!(batch = %batch.name, "Upload queue drained");
        self.state.sink.publish(StatusUpdate::QueueDrained {
            batch: batch.name.clone(),
        });
        stats
    }
}

impl DispatchStats {
    fn absorb(&mut self, result: Result<bool, tokio::task::JoinError>) {
        match result {
            Ok(true) => self.uploaded += 1,
            Ok(false) => self.failed += 1,
            Err(e) => {
                tracing::error!(error = %e, "Upload task panicked");
                self.failed += 1;
            }
        }
    }
}

/// One job from `Uploading` to `Uploaded`/`UploadFailed`. Holds its pool
/// permit for the whole attempt sequence; on success hands the record to a
/// new poll task.
async fn upload_task(
    state: PipelineState,
    mut record: AssetRecord,
    permit: OwnedSemaphorePermit,
    rate_limited: Arc<AtomicBool>,
    polls: TaskTracker,
    tally: Tally,
) -> bool {
    let _permit = permit;
    advance(&state, &mut record, AssetEvent::UploadStarted);

    match upload_until_created(&state, &mut record, &rate_limited).await {
        Ok(created) => {
            metrics::counter!("sketchfab_uploads_created_total").increment(1);
            advance(
                &state,
                &mut record,
                AssetEvent::UploadSucceeded {
                    remote_id: created.remote_id,
                    status_url: created.status_url,
                },
            );
            polls.spawn(poll::run(state, record, tally));
            true
        }
        Err(e) => {
            metrics::counter!("sketchfab_uploads_failed_total").increment(1);
            tracing::warn!(
                asset = %record.name(),
                attempts = record.upload_attempts + 1,
                kind = ?e.kind(),
                error = %e,
                "Upload failed"
            );
            let final_state = advance(
                &state,
                &mut record,
                AssetEvent::UploadFailed { detail: e.detail() },
            );
            tally.record(final_state);
            false
        }
    }
}

/// Submit the create call until it succeeds or fails for a reason other than
/// rate limiting.
async fn upload_until_created(
    state: &PipelineState,
    record: &mut AssetRecord,
    rate_limited: &AtomicBool,
) -> Result<CreatedAsset, UploadError> {
    check_job(record)?;
    let form = CreateAssetForm::from_descriptor(&record.descriptor);

    let mut attempt: u32 = 0;
    loop {
        if !sleep_or_cancel(&state.cancel, state.config.create_delay).await {
            return Err(UploadError::Cancelled);
        }

        match create_once(state, record, &form).await {
            Ok(created) => return Ok(created),
            Err(UploadError::Remote(RemoteError::RateLimited)) => {
                attempt += 1;
                rate_limited.store(true, Ordering::Release);
                metrics::counter!("sketchfab_upload_rate_limited_total").increment(1);
                tracing::info!(
                    asset = %record.name(),
                    attempt,
                    "Create call rate limited, resubmitting"
                );
                advance(state, record, AssetEvent::UploadRetried { attempt });
            }
            Err(e) => return Err(e),
        }
    }
}

/// Local checks that must pass before anything is sent.
fn check_job(record: &AssetRecord) -> Result<(), UploadError> {
    record
        .descriptor
        .validate()
        .map_err(|report| UploadError::InvalidInput(report.to_string()))?;

    if record.license().is_priced() {
        let numeric = record.descriptor.price.as_deref().is_some_and(price::is_numeric);
        if !numeric {
            return Err(UploadError::InvalidInput(format!(
                "license {} requires a numeric price",
                record.license()
            )));
        }
    }
    Ok(())
}

/// Package, create, and delete the artifact, whatever the outcome.
async fn create_once(
    state: &PipelineState,
    record: &AssetRecord,
    form: &CreateAssetForm,
) -> Result<CreatedAsset, UploadError> {
    let artifact = packaging::package_folder_async(
        record.descriptor.folder.clone(),
        state.config.staging_dir.clone(),
    )
    .await?;
    tracing::debug!(
        asset = %record.name(),
        entries = artifact.entries(),
        path = %artifact.path().display(),
        "Packaged model folder"
    );

    let result = state
        .remote
        .create_asset(&state.token, form, artifact.path())
        .await;
    drop(artifact);
    Ok(result?)
}
