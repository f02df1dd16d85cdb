//! Per-asset processing watch, followed by the license/price patch when the
//! license is a priced one.

use crate::app_state::PipelineState;
use crate::models::asset::{AssetEvent, AssetRecord, LifecycleState};
use crate::pipeline::{advance, sleep_or_cancel, PatchRequest, Tally};
use crate::services::remote::ProcessingState;

pub const MAX_RETRIES_DETAIL: &str = "Max retries reached";
const CANCELLED_DETAIL: &str = "Cancelled during processing";

/// Drive an uploaded asset to a terminal state and count the outcome.
pub async fn run(state: PipelineState, mut record: AssetRecord, tally: Tally) {
    let final_state = drive(&state, &mut record).await;
    tracing::debug!(asset = %record.name(), state = %final_state, "Poll task finished");
    tally.record(final_state);
}

async fn drive(state: &PipelineState, record: &mut AssetRecord) -> LifecycleState {
    advance(state, record, AssetEvent::ProcessingStarted);

    if let Err(detail) = poll_until_terminal(state, record).await {
        metrics::counter!("sketchfab_processing_failed_total").increment(1);
        tracing::warn!(
            asset = %record.name(),
            remote_id = record.remote_id().unwrap_or(""),
            attempts = record.poll_attempts,
            detail = %detail,
            "Processing failed"
        );
        return advance(state, record, AssetEvent::ProcessingFailed { detail });
    }

    patch_if_needed(state, record).await
}

/// Poll the status URL until processing finishes. `Ok` means the asset is
/// now `Processed`; `Err` carries the failure detail.
async fn poll_until_terminal(state: &PipelineState, record: &mut AssetRecord) -> Result<(), String> {
    let Some(status_url) = record.status_url().map(str::to_string) else {
        return Err("No status URL for uploaded model".to_string());
    };

    for attempt in 1..=state.config.max_poll_attempts {
        if !sleep_or_cancel(&state.cancel, state.config.poll_interval).await {
            return Err(CANCELLED_DETAIL.to_string());
        }
        advance(state, record, AssetEvent::PollAttempted { attempt });

        match state.remote.asset_status(&state.token, &status_url).await {
            Ok(ProcessingState::Succeeded) => {
                advance(state, record, AssetEvent::ProcessingSucceeded);
                return Ok(());
            }
            Ok(ProcessingState::Failed) => return Err("FAILED".to_string()),
            Ok(ProcessingState::InProgress) => {}
            Err(e) => return Err(e.to_string()),
        }
    }

    Err(MAX_RETRIES_DETAIL.to_string())
}

async fn patch_if_needed(state: &PipelineState, record: &mut AssetRecord) -> LifecycleState {
    if !record.license().is_priced() {
        return advance(state, record, AssetEvent::PatchNotRequired);
    }

    advance(state, record, AssetEvent::PatchQueued);
    let request = PatchRequest {
        remote_id: record.remote_id().unwrap_or_default().to_string(),
        license: record.license().clone(),
        price: record.descriptor.price.clone(),
    };

    match state.patcher.patch(&state.token, &request).await {
        Ok(receipt) => {
            metrics::counter!("sketchfab_patches_succeeded_total").increment(1);
            record.resolved_price = receipt.price;
            tracing::debug!(
                asset = %record.name(),
                attempts = receipt.attempts,
                price = ?receipt.price,
                "Patch finished"
            );
            advance(state, record, AssetEvent::PatchSucceeded)
        }
        Err(e) => {
            metrics::counter!("sketchfab_patches_failed_total").increment(1);
            tracing::warn!(
                asset = %record.name(),
                remote_id = %request.remote_id,
                kind = ?e.kind(),
                error = %e,
                "Patch failed"
            );
            advance(
                state,
                record,
                AssetEvent::PatchFailed {
                    detail: e.to_string(),
                },
            )
        }
    }
}
