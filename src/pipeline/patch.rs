use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::models::license::License;
use crate::pipeline::sleep_or_cancel;
use crate::services::price::{self, MIN_PRICE_MINOR_UNITS};
use crate::services::remote::{ApiToken, ErrorKind, LicensePatch, RemoteApi, RemoteError};

/// The real license and price for a processed asset.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchRequest {
    pub remote_id: String,
    pub license: License,
    /// Raw price text as entered. Required for priced licenses.
    pub price: Option<String>,
}

/// What a successful patch applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchReceipt {
    /// Requests issued, including the one that succeeded.
    pub attempts: u32,
    /// Price sent, in minor units.
    pub price: Option<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("Invalid price '{0}': must be a number of at least {min}", min = MIN_PRICE_MINOR_UNITS as f64 / 100.0)]
    InvalidPrice(String),

    #[error("License {0} requires a price")]
    MissingPrice(License),

    #[error("Rate limited by Sketchfab")]
    RateLimited,

    #[error("{0}")]
    Rejected(String),

    #[error("Max retries reached ({attempts} attempts): {last}")]
    MaxRetries { attempts: u32, last: String },

    #[error("Patch cancelled")]
    Cancelled,
}

impl PatchError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            PatchError::InvalidPrice(_) | PatchError::MissingPrice(_) => {
                Some(ErrorKind::InvalidInput)
            }
            PatchError::RateLimited => Some(ErrorKind::RateLimited),
            PatchError::Rejected(_) => Some(ErrorKind::ValidationRejected),
            PatchError::MaxRetries { .. } => Some(ErrorKind::Transport),
            PatchError::Cancelled => None,
        }
    }
}

/// Bounded pool for license/price patches, shared by every poll task.
///
/// A rate-limited patch fails at once, unlike the create call which is
/// resubmitted. Transport failures are retried with fixed spacing.
pub struct PatchWorker {
    remote: Arc<dyn RemoteApi>,
    config: Arc<PipelineConfig>,
    cancel: CancellationToken,
    permits: Arc<Semaphore>,
}

impl PatchWorker {
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        config: Arc<PipelineConfig>,
        cancel: CancellationToken,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.patch_concurrency.max(1)));
        Self {
            remote,
            config,
            cancel,
            permits,
        }
    }

    /// Request body for `request`, or the local validation failure.
    pub fn build_patch(request: &PatchRequest) -> Result<LicensePatch, PatchError> {
        let price = if request.license.is_priced() {
            let raw = request
                .price
                .as_deref()
                .filter(|p| !p.trim().is_empty())
                .ok_or_else(|| PatchError::MissingPrice(request.license.clone()))?;
            Some(price::normalize(raw).ok_or_else(|| PatchError::InvalidPrice(raw.to_string()))?)
        } else {
            None
        };

        Ok(LicensePatch {
            license: request.license.clone(),
            price,
        })
    }

    /// Apply the license and price.
    pub async fn patch(
        &self,
        token: &ApiToken,
        request: &PatchRequest,
    ) -> Result<PatchReceipt, PatchError> {
        let body = Self::build_patch(request)?;

        let _permit = tokio::select! {
            _ = self.cancel.cancelled() => return Err(PatchError::Cancelled),
            permit = self.permits.clone().acquire_owned() => {
                permit.map_err(|_| PatchError::Cancelled)?
            }
        };

        tracing::debug!(
            remote_id = %request.remote_id,
            delay_secs = self.config.patch_pre_delay.as_secs(),
            "Waiting before patch"
        );
        if !sleep_or_cancel(&self.cancel, self.config.patch_pre_delay).await {
            return Err(PatchError::Cancelled);
        }

        let max_attempts = self.config.max_patch_attempts.max(1);
        let mut last = String::new();
        for attempt in 1..=max_attempts {
            match self.remote.patch_asset(token, &request.remote_id, &body).await {
                Ok(()) => {
                    tracing::info!(
                        remote_id = %request.remote_id,
                        license = %body.license,
                        price = ?body.price,
                        attempt,
                        "Patch applied"
                    );
                    return Ok(PatchReceipt {
                        attempts: attempt,
                        price: body.price,
                    });
                }
                Err(RemoteError::RateLimited) => {
                    tracing::warn!(remote_id = %request.remote_id, attempt, "Patch rate limited, giving up");
                    return Err(PatchError::RateLimited);
                }
                Err(RemoteError::Rejected { status, detail }) => {
                    tracing::warn!(remote_id = %request.remote_id, status, detail = %detail, "Patch rejected");
                    return Err(PatchError::Rejected(detail));
                }
                Err(e) => {
                    tracing::warn!(
                        remote_id = %request.remote_id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Patch failed, will retry"
                    );
                    last = e.to_string();
                }
            }

            if attempt < max_attempts
                && !sleep_or_cancel(&self.cancel, self.config.patch_retry_spacing).await
            {
                return Err(PatchError::Cancelled);
            }
        }

        Err(PatchError::MaxRetries {
            attempts: max_attempts,
            last,
        })
    }
}
