use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, LOCATION};
use reqwest::{multipart, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::models::job::{truncate_name, JobDescriptor};
use crate::models::license::License;

/// Sketchfab API token, sent as `Authorization: Token <key>` on every call.
#[derive(Clone)]
pub struct ApiToken(Arc<str>);

impl ApiToken {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    fn header_value(&self) -> String {
        format!("Token {}", self.0)
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(***)")
    }
}

/// Text fields of the `POST /models` multipart body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateAssetForm {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub license: License,
    pub private: bool,
    pub password: Option<String>,
    pub is_published: bool,
    pub is_inspectable: bool,
}

impl CreateAssetForm {
    /// Build the create form for a job. Sold licenses are submitted as
    /// `free-st` with no price; the real license and price follow in a patch.
    pub fn from_descriptor(job: &JobDescriptor) -> Self {
        let private = job.visibility.private;
        Self {
            name: truncate_name(&job.name),
            description: job.description.clone(),
            tags: job.tags.clone(),
            categories: job.categories.iter().take(2).cloned().collect(),
            license: job.license.creation_license(),
            private,
            password: if private { job.password.clone() } else { None },
            is_published: job.visibility.published,
            is_inspectable: job.visibility.inspectable,
        }
    }

    /// Multipart text fields in submission order. List values repeat the key.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("name", self.name.clone()),
            ("description", self.description.clone()),
        ];
        fields.extend(self.tags.iter().map(|t| ("tags", t.clone())));
        fields.extend(self.categories.iter().map(|c| ("categories", c.clone())));
        fields.push(("license", self.license.slug().to_string()));
        fields.push(("private", self.private.to_string()));
        if let Some(password) = self.password.as_ref().filter(|_| self.private) {
            fields.push(("password", password.clone()));
        }
        fields.push(("isPublished", self.is_published.to_string()));
        fields.push(("isInspectable", self.is_inspectable.to_string()));
        fields
    }
}

/// Body of `PATCH /models/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LicensePatch {
    pub license: License,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedAsset {
    pub remote_id: String,
    pub status_url: String,
}

/// Server-side processing state reported for a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingState {
    Succeeded,
    Failed,
    InProgress,
}

impl ProcessingState {
    pub fn from_processing(value: Option<&str>) -> Self {
        match value {
            Some("SUCCEEDED") => ProcessingState::Succeeded,
            Some("FAILED") => ProcessingState::Failed,
            _ => ProcessingState::InProgress,
        }
    }
}

#[derive(Deserialize)]
struct ModelStatusResponse {
    status: ModelStatus,
}

#[derive(Deserialize)]
struct ModelStatus {
    processing: Option<String>,
}

/// Failure classes that drive the retry policy of each pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RateLimited,
    ValidationRejected,
    Transport,
    InvalidInput,
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Rate limited by Sketchfab")]
    RateLimited,

    #[error("Rejected by Sketchfab (HTTP {status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Unexpected response from Sketchfab: {0}")]
    MalformedResponse(String),

    #[error("Failed to read upload artifact: {0}")]
    Artifact(#[from] std::io::Error),
}

impl RemoteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RemoteError::RateLimited => ErrorKind::RateLimited,
            RemoteError::Rejected { .. } => ErrorKind::ValidationRejected,
            RemoteError::Transport(_)
            | RemoteError::MalformedResponse(_)
            | RemoteError::Artifact(_) => ErrorKind::Transport,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::Transport(format!("request timed out: {e}"))
        } else if e.is_decode() {
            RemoteError::MalformedResponse(e.to_string())
        } else {
            RemoteError::Transport(e.to_string())
        }
    }
}

/// The three remote operations the pipeline depends on. Implementations make
/// exactly one request per call and never retry.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn create_asset(
        &self,
        token: &ApiToken,
        form: &CreateAssetForm,
        artifact: &Path,
    ) -> Result<CreatedAsset, RemoteError>;

    async fn patch_asset(
        &self,
        token: &ApiToken,
        remote_id: &str,
        patch: &LicensePatch,
    ) -> Result<(), RemoteError>;

    async fn asset_status(
        &self,
        token: &ApiToken,
        status_url: &str,
    ) -> Result<ProcessingState, RemoteError>;
}

/// HTTP client for the Sketchfab Data API v3.
pub struct SketchfabClient {
    http: Client,
    base_url: String,
}

impl SketchfabClient {
    /// Create a client. Both timeouts surface as transport errors.
    pub fn new(
        base_url: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .user_agent(concat!("sketchfab-uploader/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// GET a JSON document from an absolute URL.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        token: &ApiToken,
        url: &str,
    ) -> Result<T, RemoteError> {
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, token.header_value())
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(error_from_response(response).await);
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl RemoteApi for SketchfabClient {
    async fn create_asset(
        &self,
        token: &ApiToken,
        form: &CreateAssetForm,
        artifact: &Path,
    ) -> Result<CreatedAsset, RemoteError> {
        let bytes = tokio::fs::read(artifact).await?;
        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model.zip".to_string());

        let mut body = multipart::Form::new();
        for (key, value) in form.fields() {
            body = body.text(key, value);
        }
        let file = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/zip")?;
        body = body.part("modelFile", file);

        let response = self
            .http
            .post(self.endpoint("models"))
            .header(AUTHORIZATION, token.header_value())
            .multipart(body)
            .send()
            .await?;

        if response.status() != StatusCode::CREATED {
            return Err(error_from_response(response).await);
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RemoteError::MalformedResponse("missing Location header".into()))?;
        let status_url = response
            .url()
            .join(location)
            .map(|u| u.to_string())
            .map_err(|e| RemoteError::MalformedResponse(format!("bad Location header: {e}")))?;
        let remote_id = remote_id_from_location(&status_url).ok_or_else(|| {
            RemoteError::MalformedResponse(format!("no model id in Location {status_url}"))
        })?;

        Ok(CreatedAsset {
            remote_id,
            status_url,
        })
    }

    async fn patch_asset(
        &self,
        token: &ApiToken,
        remote_id: &str,
        patch: &LicensePatch,
    ) -> Result<(), RemoteError> {
        let response = self
            .http
            .patch(self.endpoint(&format!("models/{remote_id}")))
            .header(AUTHORIZATION, token.header_value())
            .json(patch)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            _ => Err(error_from_response(response).await),
        }
    }

    async fn asset_status(
        &self,
        token: &ApiToken,
        status_url: &str,
    ) -> Result<ProcessingState, RemoteError> {
        let response = self
            .http
            .get(status_url)
            .header(AUTHORIZATION, token.header_value())
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            // Anything but 200 means "not known yet"; the poll loop asks again.
            tracing::warn!(status = status.as_u16(), url = %status_url, "Status check returned non-200");
            return Ok(ProcessingState::InProgress);
        }

        let body: ModelStatusResponse = response.json().await?;
        Ok(ProcessingState::from_processing(body.status.processing.as_deref()))
    }
}

/// Last non-empty path segment of a model URL.
pub fn remote_id_from_location(location: &str) -> Option<String> {
    let path = location.split(['?', '#']).next().unwrap_or(location);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty() && !id.contains(':'))
        .map(str::to_string)
}

async fn error_from_response(response: Response) -> RemoteError {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return RemoteError::RateLimited;
    }

    let body = response.text().await.unwrap_or_default();
    let detail = extract_detail(&body);
    if status.is_server_error() {
        RemoteError::Transport(format!("HTTP {}: {}", status.as_u16(), detail))
    } else {
        RemoteError::Rejected {
            status: status.as_u16(),
            detail,
        }
    }
}

/// User-facing message from an error body: its `detail` field when present.
fn extract_detail(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => match map.get("detail") {
            Some(serde_json::Value::String(detail)) => detail.clone(),
            Some(other) => other.to_string(),
            None => serde_json::Value::Object(map).to_string(),
        },
        _ if body.trim().is_empty() => "Unknown error occurred".to_string(),
        _ => body.trim().to_string(),
    }
}
