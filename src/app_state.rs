use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::pipeline::PatchWorker;
use crate::services::{
    remote::{ApiToken, RemoteApi},
    sink::StatusSink,
};

/// Shared pipeline state handed to every upload, poll and patch task.
#[derive(Clone)]
pub struct PipelineState {
    pub remote: Arc<dyn RemoteApi>,
    pub sink: Arc<dyn StatusSink>,
    pub token: ApiToken,
    pub config: Arc<PipelineConfig>,
    pub patcher: Arc<PatchWorker>,
    pub cancel: CancellationToken,
}

impl PipelineState {
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        sink: Arc<dyn StatusSink>,
        token: ApiToken,
        config: PipelineConfig,
        cancel: CancellationToken,
    ) -> Self {
        let config = Arc::new(config);
        let patcher = PatchWorker::new(remote.clone(), config.clone(), cancel.clone());
        Self {
            remote,
            sink,
            token,
            config,
            patcher: Arc::new(patcher),
            cancel,
        }
    }
}
