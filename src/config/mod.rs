use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Process configuration, read from `SKETCHFAB_*` environment variables.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Sketchfab API token
    pub api_token: String,

    /// Data API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// TCP connect timeout for every request
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Whole-request timeout; uploads of large archives need a generous value
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Concurrent uploads (C)
    #[serde(default = "default_concurrency")]
    pub upload_concurrency: usize,

    /// Concurrent license/price patches (P)
    #[serde(default = "default_concurrency")]
    pub patch_concurrency: usize,

    /// Where upload archives are written. Defaults to the system temp dir.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Prometheus listener address (e.g., "127.0.0.1:9100"). Disabled when unset.
    #[serde(default)]
    pub metrics_bind_addr: Option<String>,
}

fn default_api_url() -> String {
    "https://api.sketchfab.com/v3".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    600
}

fn default_concurrency() -> usize {
    6
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::prefixed("SKETCHFAB_").from_env()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Pipeline settings with this process's concurrency limits.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            upload_concurrency: self.upload_concurrency.max(1),
            patch_concurrency: self.patch_concurrency.max(1),
            staging_dir: self
                .staging_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            ..PipelineConfig::default()
        }
    }
}

/// Fixed settings for one batch run, captured when the batch starts.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub upload_concurrency: usize,
    pub patch_concurrency: usize,
    pub staging_dir: PathBuf,

    /// Wait after launching each upload.
    pub launch_spacing: Duration,
    /// Dispatcher round pause floor; also the starting value.
    pub base_round_pause: Duration,
    /// Dispatcher round pause ceiling under rate limiting.
    pub max_round_pause: Duration,
    /// One-off pause when half the batch is still unscheduled.
    pub half_batch_pause: Duration,
    /// One-off pause once everything is scheduled but uploads are in flight.
    pub final_pause: Duration,
    /// Wait before every create call, including rate-limited resubmissions.
    pub create_delay: Duration,

    pub poll_interval: Duration,
    pub max_poll_attempts: u32,

    /// Settling time before the first patch request.
    pub patch_pre_delay: Duration,
    pub patch_retry_spacing: Duration,
    pub max_patch_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            upload_concurrency: 6,
            patch_concurrency: 6,
            staging_dir: std::env::temp_dir(),
            launch_spacing: Duration::from_secs(2),
            base_round_pause: Duration::from_secs(2),
            max_round_pause: Duration::from_secs(60),
            half_batch_pause: Duration::from_secs(120),
            final_pause: Duration::from_secs(180),
            create_delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(30),
            max_poll_attempts: 200,
            patch_pre_delay: Duration::from_secs(30),
            patch_retry_spacing: Duration::from_secs(20),
            max_patch_attempts: 200,
        }
    }
}
