//! Test doubles for driving the pipeline without the network

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use sketchfab_uploader::app_state::PipelineState;
use sketchfab_uploader::config::PipelineConfig;
use sketchfab_uploader::models::asset::LifecycleState;
use sketchfab_uploader::models::status::{StatusEvent, StatusUpdate};
use sketchfab_uploader::services::remote::{
    ApiToken, CreateAssetForm, CreatedAsset, LicensePatch, ProcessingState, RemoteApi, RemoteError,
};
use sketchfab_uploader::services::sink::StatusSink;

pub const API_BASE: &str = "https://api.test/v3";

/// In-memory `RemoteApi` with scripted replies.
///
/// Create replies of `Ok(())` mean "created"; the double then allocates a
/// fresh model id. Unscripted calls succeed, and status checks fall back to
/// `status_default`.
pub struct MockRemote {
    create_replies: Mutex<VecDeque<Result<(), RemoteError>>>,
    status_replies: Mutex<VecDeque<Result<ProcessingState, RemoteError>>>,
    status_default: ProcessingState,
    patch_replies: Mutex<VecDeque<Result<(), RemoteError>>>,
    create_hold: Duration,
    patch_hold: Duration,

    forms: Mutex<Vec<CreateAssetForm>>,
    artifacts: Mutex<Vec<PathBuf>>,
    status_urls: Mutex<Vec<String>>,
    patches: Mutex<Vec<(String, LicensePatch)>>,
    create_times: Mutex<Vec<Instant>>,
    next_id: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    patches_in_flight: AtomicUsize,
    max_patches_in_flight: AtomicUsize,
}

impl MockRemote {
    pub fn new() -> Self {
        Self {
            create_replies: Mutex::default(),
            status_replies: Mutex::default(),
            status_default: ProcessingState::Succeeded,
            patch_replies: Mutex::default(),
            create_hold: Duration::ZERO,
            patch_hold: Duration::ZERO,
            forms: Mutex::default(),
            artifacts: Mutex::default(),
            status_urls: Mutex::default(),
            patches: Mutex::default(),
            create_times: Mutex::default(),
            next_id: AtomicUsize::new(1),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            patches_in_flight: AtomicUsize::new(0),
            max_patches_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_create_replies(self, replies: Vec<Result<(), RemoteError>>) -> Self {
        *self.create_replies.lock().unwrap() = replies.into();
        self
    }

    pub fn with_status_replies(self, replies: Vec<Result<ProcessingState, RemoteError>>) -> Self {
        *self.status_replies.lock().unwrap() = replies.into();
        self
    }

    pub fn with_status_default(mut self, state: ProcessingState) -> Self {
        self.status_default = state;
        self
    }

    pub fn with_patch_replies(self, replies: Vec<Result<(), RemoteError>>) -> Self {
        *self.patch_replies.lock().unwrap() = replies.into();
        self
    }

    /// Keep every create call open for `hold`.
    pub fn with_create_hold(mut self, hold: Duration) -> Self {
        self.create_hold = hold;
        self
    }

    /// Keep every patch call open for `hold`.
    pub fn with_patch_hold(mut self, hold: Duration) -> Self {
        self.patch_hold = hold;
        self
    }

    pub fn forms(&self) -> Vec<CreateAssetForm> {
        self.forms.lock().unwrap().clone()
    }

    /// Artifact paths seen by create calls, in call order.
    pub fn artifacts(&self) -> Vec<PathBuf> {
        self.artifacts.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_urls.lock().unwrap().len()
    }

    pub fn status_urls(&self) -> Vec<String> {
        self.status_urls.lock().unwrap().clone()
    }

    pub fn patches(&self) -> Vec<(String, LicensePatch)> {
        self.patches.lock().unwrap().clone()
    }

    /// Most create calls ever open at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Most patch calls ever open at once.
    pub fn max_patches_in_flight(&self) -> usize {
        self.max_patches_in_flight.load(Ordering::SeqCst)
    }

    /// When each create call arrived, relative to `start`.
    pub fn create_offsets(&self, start: Instant) -> Vec<Duration> {
        self.create_times
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.duration_since(start))
            .collect()
    }
}

#[async_trait]
impl RemoteApi for MockRemote {
    async fn create_asset(
        &self,
        _token: &ApiToken,
        form: &CreateAssetForm,
        artifact: &Path,
    ) -> Result<CreatedAsset, RemoteError> {
        self.create_times.lock().unwrap().push(Instant::now());
        let open = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(open, Ordering::SeqCst);
        assert!(artifact.is_file(), "artifact missing during create call");
        self.forms.lock().unwrap().push(form.clone());
        self.artifacts.lock().unwrap().push(artifact.to_path_buf());

        if !self.create_hold.is_zero() {
            tokio::time::sleep(self.create_hold).await;
        }

        let reply = self.create_replies.lock().unwrap().pop_front().unwrap_or(Ok(()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        reply.map(|()| {
            let id = format!("model{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            CreatedAsset {
                status_url: format!("{API_BASE}/models/{id}"),
                remote_id: id,
            }
        })
    }

    async fn patch_asset(
        &self,
        _token: &ApiToken,
        remote_id: &str,
        patch: &LicensePatch,
    ) -> Result<(), RemoteError> {
        let open = self.patches_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_patches_in_flight.fetch_max(open, Ordering::SeqCst);
        self.patches
            .lock()
            .unwrap()
            .push((remote_id.to_string(), patch.clone()));

        if !self.patch_hold.is_zero() {
            tokio::time::sleep(self.patch_hold).await;
        }

        let reply = self.patch_replies.lock().unwrap().pop_front().unwrap_or(Ok(()));
        self.patches_in_flight.fetch_sub(1, Ordering::SeqCst);
        reply
    }

    async fn asset_status(
        &self,
        _token: &ApiToken,
        status_url: &str,
    ) -> Result<ProcessingState, RemoteError> {
        self.status_urls.lock().unwrap().push(status_url.to_string());
        self.status_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(self.status_default))
    }
}

/// Sink that keeps every update it receives.
#[derive(Default)]
pub struct RecordingSink {
    updates: Mutex<Vec<StatusUpdate>>,
}

impl RecordingSink {
    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates.lock().unwrap().clone()
    }

    pub fn asset_events(&self, index: usize) -> Vec<StatusEvent> {
        self.updates()
            .into_iter()
            .filter_map(|u| match u {
                StatusUpdate::Asset(event) if event.index == index => Some(event),
                _ => None,
            })
            .collect()
    }

    /// States one asset went through, with repeats collapsed.
    pub fn state_path(&self, index: usize) -> Vec<LifecycleState> {
        let mut path: Vec<LifecycleState> = Vec::new();
        for event in self.asset_events(index) {
            if path.last() != Some(&event.state) {
                path.push(event.state);
            }
        }
        path
    }

    pub fn last_event(&self, index: usize) -> Option<StatusEvent> {
        self.asset_events(index).pop()
    }
}

impl StatusSink for RecordingSink {
    fn publish(&self, update: StatusUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

pub fn pipeline_state(
    remote: Arc<MockRemote>,
    sink: Arc<RecordingSink>,
    config: PipelineConfig,
    cancel: CancellationToken,
) -> PipelineState {
    PipelineState::new(remote, sink, ApiToken::new("test-token"), config, cancel)
}

/// Create `<parent>/<name>/model.glb` and return the folder.
pub fn model_folder(parent: &Path, name: &str) -> PathBuf {
    let folder = parent.join(name);
    std::fs::create_dir_all(&folder).unwrap();
    std::fs::write(folder.join("model.glb"), b"glTF").unwrap();
    folder
}

/// Files left in the staging dir.
pub fn staged_files(staging: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(staging)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect()
}
