use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::models::job::JobDescriptor;
use crate::models::license::License;
use crate::models::status::StatusEvent;

/// Lifecycle of one asset across upload, server-side processing and the
/// license/price patch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
pub enum LifecycleState {
    Pending,
    Uploading,
    UploadFailed,
    Uploaded,
    Processing,
    ProcessingFailed,
    Processed,
    NoPatchNeeded,
    PatchPending,
    PatchFailed,
    PatchSucceeded,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LifecycleState::UploadFailed
                | LifecycleState::ProcessingFailed
                | LifecycleState::PatchFailed
                | LifecycleState::PatchSucceeded
                | LifecycleState::NoPatchNeeded
        )
    }
}

/// Something the pipeline observed about an asset.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetEvent {
    UploadStarted,
    /// The create call was rate limited and is being submitted again.
    UploadRetried { attempt: u32 },
    UploadSucceeded { remote_id: String, status_url: String },
    UploadFailed { detail: String },
    ProcessingStarted,
    PollAttempted { attempt: u32 },
    ProcessingSucceeded,
    ProcessingFailed { detail: String },
    PatchNotRequired,
    PatchQueued,
    PatchSucceeded,
    PatchFailed { detail: String },
}

/// Pure transition table. Invalid events leave the state untouched.
#[derive(Debug, Clone)]
pub struct AssetStateMachine {
    state: LifecycleState,
    priced: bool,
}

impl AssetStateMachine {
    pub fn new(priced: bool) -> Self {
        Self {
            state: LifecycleState::Pending,
            priced,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Target state for `event`, or `None` when the event is not valid here.
    fn target(&self, event: &AssetEvent) -> Option<LifecycleState> {
        use AssetEvent as E;
        use LifecycleState as S;

        let next = match (self.state, event) {
            (S::Pending, E::UploadStarted) => S::Uploading,
            (S::Uploading, E::UploadRetried { .. }) => S::Uploading,
            (S::Uploading, E::UploadSucceeded { .. }) => S::Uploaded,
            (S::Pending | S::Uploading, E::UploadFailed { .. }) => S::UploadFailed,
            (S::Uploaded, E::ProcessingStarted) => S::Processing,
            (S::Processing, E::PollAttempted { .. }) => S::Processing,
            (S::Processing, E::ProcessingSucceeded) => S::Processed,
            (S::Uploaded | S::Processing, E::ProcessingFailed { .. }) => S::ProcessingFailed,
            (S::Processed, E::PatchNotRequired) if !self.priced => S::NoPatchNeeded,
            (S::Processed, E::PatchQueued) if self.priced => S::PatchPending,
            (S::PatchPending, E::PatchSucceeded) => S::PatchSucceeded,
            (S::PatchPending, E::PatchFailed { .. }) => S::PatchFailed,
            _ => return None,
        };
        Some(next)
    }

    /// Apply `event` and return the resulting state.
    pub fn advance(&mut self, event: &AssetEvent) -> LifecycleState {
        match self.target(event) {
            Some(next) => self.state = next,
            None => {
                tracing::warn!(
                    state = %self.state,
                    event = ?event,
                    "Ignoring lifecycle event not valid from current state"
                );
            }
        }
        self.state
    }

    /// Whether `event` would be accepted from the current state.
    pub fn accepts(&self, event: &AssetEvent) -> bool {
        self.target(event).is_some()
    }

    pub fn display_status(&self, detail: Option<&str>) -> DisplayStatus {
        DisplayStatus::for_state(self.state, detail)
    }
}

/// The four status-table columns shown for an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayStatus {
    pub upload_state: String,
    pub processing_detail: String,
    pub patch_state: String,
    pub batch_summary: String,
}

impl DisplayStatus {
    pub fn for_state(state: LifecycleState, detail: Option<&str>) -> Self {
        use LifecycleState as S;

        let with_detail = |fallback: &str| detail.unwrap_or(fallback).to_string();
        let (upload, processing, patch, summary) = match state {
            S::Pending => ("Queued", "Waiting".to_string(), "Patch Not Started", "Queued"),
            S::Uploading => (
                "Uploading...",
                "In progress".to_string(),
                "Patch Not Started",
                "In Progress",
            ),
            S::UploadFailed => (
                "Upload Failed",
                with_detail("Error during upload"),
                "Failed",
                "Aborted",
            ),
            S::Uploaded | S::Processing => (
                "Upload Successful",
                "Processing...".to_string(),
                "Patch Not Started",
                "In Progress",
            ),
            S::ProcessingFailed => (
                "Processing Failed",
                with_detail("FAILED"),
                "Patch Not Attempted",
                "Aborted",
            ),
            S::Processed => (
                "Complete",
                "Processing Completed".to_string(),
                "Starting...",
                "In Progress",
            ),
            S::NoPatchNeeded => (
                "Upload Successful",
                "Completed".to_string(),
                "No Patch Required",
                "Fully Completed",
            ),
            S::PatchPending => (
                "Complete",
                "Processing Completed".to_string(),
                "Patching...",
                "In Progress",
            ),
            S::PatchFailed => (
                "Complete",
                "Processing Completed".to_string(),
                "Patch Failed",
                "Aborted",
            ),
            S::PatchSucceeded => (
                "Complete",
                "Processing Completed".to_string(),
                "Patch Successful",
                "Fully Completed",
            ),
        };

        Self {
            upload_state: upload.to_string(),
            processing_detail: processing,
            patch_state: patch.to_string(),
            batch_summary: summary.to_string(),
        }
    }
}

/// Runtime state of one job. Exactly one task owns it at a time: the upload
/// task until the create call succeeds, then the poll task until terminal.
#[derive(Debug)]
pub struct AssetRecord {
    pub batch: Arc<str>,
    /// Position of the job in its batch.
    pub index: usize,
    pub descriptor: Arc<JobDescriptor>,
    machine: AssetStateMachine,
    remote_id: Option<String>,
    status_url: Option<String>,
    last_error: Option<String>,
    /// Price in minor units, set once a patch has applied it.
    pub resolved_price: Option<u32>,
    pub upload_attempts: u32,
    pub poll_attempts: u32,
}

impl AssetRecord {
    pub fn new(batch: Arc<str>, index: usize, descriptor: JobDescriptor) -> Self {
        let priced = descriptor.license.is_priced();
        Self {
            batch,
            index,
            descriptor: Arc::new(descriptor),
            machine: AssetStateMachine::new(priced),
            remote_id: None,
            status_url: None,
            last_error: None,
            resolved_price: None,
            upload_attempts: 0,
            poll_attempts: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn license(&self) -> &License {
        &self.descriptor.license
    }

    pub fn state(&self) -> LifecycleState {
        self.machine.state()
    }

    pub fn is_terminal(&self) -> bool {
        self.machine.is_terminal()
    }

    pub fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }

    pub fn status_url(&self) -> Option<&str> {
        self.status_url.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Status row for the current state, without applying an event.
    pub fn snapshot(&self) -> StatusEvent {
        StatusEvent::new(
            self.batch.clone(),
            self.index,
            self.descriptor.name.clone(),
            self.state(),
            self.machine.display_status(self.last_error.as_deref()),
        )
    }

    /// Apply `event` and build the status event to publish, or `None` when
    /// the state machine rejected it.
    pub fn apply(&mut self, event: AssetEvent) -> Option<StatusEvent> {
        if !self.machine.accepts(&event) {
            self.machine.advance(&event);
            return None;
        }
        self.machine.advance(&event);

        let mut detail = None;
        match event {
            AssetEvent::UploadRetried { attempt } => self.upload_attempts = attempt,
            AssetEvent::UploadSucceeded {
                remote_id,
                status_url,
            } => {
                self.remote_id = Some(remote_id);
                self.status_url = Some(status_url);
            }
            AssetEvent::PollAttempted { attempt } => {
                self.poll_attempts = attempt;
                detail = Some(format!("Processing... (check {attempt})"));
            }
            AssetEvent::UploadFailed { detail: d }
            | AssetEvent::ProcessingFailed { detail: d }
            | AssetEvent::PatchFailed { detail: d } => {
                self.last_error = Some(d);
            }
            _ => {}
        }

        let state = self.state();
        let mut display = self.machine.display_status(self.last_error.as_deref());
        if let Some(d) = detail {
            display.processing_detail = d;
        }

        Some(StatusEvent::new(
            self.batch.clone(),
            self.index,
            self.descriptor.name.clone(),
            state,
            display,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{JobTemplate, Visibility};

    fn record(license: License, price: Option<&str>) -> AssetRecord {
        let template = JobTemplate {
            description: String::new(),
            tags: vec![],
            categories: vec!["animals-pets".into()],
            license,
            visibility: Visibility::default(),
            password: None,
            price: price.map(str::to_string),
        };
        AssetRecord::new("batch".into(), 0, JobDescriptor::new("/models/cat", &template))
    }

    fn uploaded() -> AssetEvent {
        AssetEvent::UploadSucceeded {
            remote_id: "abc123".into(),
            status_url: "https://api.example/v3/models/abc123".into(),
        }
    }

    #[test]
    fn test_free_license_path_ends_in_no_patch_needed() {
        let mut machine = AssetStateMachine::new(false);
        for event in [
            AssetEvent::UploadStarted,
            uploaded(),
            AssetEvent::ProcessingStarted,
            AssetEvent::ProcessingSucceeded,
        ] {
            machine.advance(&event);
        }
        assert_eq!(machine.state(), LifecycleState::Processed);

        // A non-priced asset never enters the patch stage.
        assert_eq!(
            machine.advance(&AssetEvent::PatchQueued),
            LifecycleState::Processed
        );
        assert_eq!(
            machine.advance(&AssetEvent::PatchNotRequired),
            LifecycleState::NoPatchNeeded
        );
        assert!(machine.is_terminal());
    }

    #[test]
    fn test_priced_license_requires_patch() {
        let mut machine = AssetStateMachine::new(true);
        for event in [
            AssetEvent::UploadStarted,
            uploaded(),
            AssetEvent::ProcessingStarted,
            AssetEvent::ProcessingSucceeded,
        ] {
            machine.advance(&event);
        }
        assert_eq!(
            machine.advance(&AssetEvent::PatchNotRequired),
            LifecycleState::Processed
        );
        assert_eq!(
            machine.advance(&AssetEvent::PatchQueued),
            LifecycleState::PatchPending
        );
        assert_eq!(
            machine.advance(&AssetEvent::PatchSucceeded),
            LifecycleState::PatchSucceeded
        );
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut machine = AssetStateMachine::new(false);
        machine.advance(&AssetEvent::UploadStarted);
        machine.advance(&AssetEvent::UploadFailed {
            detail: "bad file".into(),
        });
        assert_eq!(machine.state(), LifecycleState::UploadFailed);

        for event in [
            AssetEvent::UploadStarted,
            uploaded(),
            AssetEvent::ProcessingStarted,
            AssetEvent::ProcessingFailed {
                detail: "x".into(),
            },
        ] {
            assert_eq!(machine.advance(&event), LifecycleState::UploadFailed);
        }
    }

    #[test]
    fn test_retry_loops_stay_in_place() {
        let mut machine = AssetStateMachine::new(false);
        machine.advance(&AssetEvent::UploadStarted);
        assert_eq!(
            machine.advance(&AssetEvent::UploadRetried { attempt: 1 }),
            LifecycleState::Uploading
        );
        machine.advance(&uploaded());
        machine.advance(&AssetEvent::ProcessingStarted);
        assert_eq!(
            machine.advance(&AssetEvent::PollAttempted { attempt: 3 }),
            LifecycleState::Processing
        );
    }

    #[test]
    fn test_remote_id_only_after_upload_succeeded() {
        let mut rec = record(License::Other("cc0".into()), None);
        assert!(rec.apply(AssetEvent::UploadStarted).is_some());
        assert_eq!(rec.remote_id(), None);

        // Rejected: cannot jump straight to processing.
        assert!(rec.apply(AssetEvent::ProcessingStarted).is_none());
        assert_eq!(rec.remote_id(), None);

        let event = rec.apply(uploaded()).unwrap();
        assert_eq!(event.state, LifecycleState::Uploaded);
        assert_eq!(rec.remote_id(), Some("abc123"));
        assert_eq!(
            rec.status_url(),
            Some("https://api.example/v3/models/abc123")
        );
    }

    #[test]
    fn test_failure_detail_reaches_display() {
        let mut rec = record(License::Standard, Some("5.00"));
        assert_eq!(rec.resolved_price, None);
        rec.apply(AssetEvent::UploadStarted);
        let event = rec
            .apply(AssetEvent::UploadFailed {
                detail: "Invalid file".into(),
            })
            .unwrap();
        assert_eq!(event.upload_state, "Upload Failed");
        assert_eq!(event.processing_detail, "Invalid file");
        assert_eq!(event.batch_summary, "Aborted");
        assert_eq!(rec.last_error(), Some("Invalid file"));
    }

    #[test]
    fn test_display_for_success_states() {
        let done = DisplayStatus::for_state(LifecycleState::PatchSucceeded, None);
        assert_eq!(done.patch_state, "Patch Successful");
        assert_eq!(done.batch_summary, "Fully Completed");

        let free = DisplayStatus::for_state(LifecycleState::NoPatchNeeded, None);
        assert_eq!(free.patch_state, "No Patch Required");
    }
}
