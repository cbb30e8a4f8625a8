//! ABOUTME: Gemini REST client: resumable clip upload, readiness polling and content generation
//! ABOUTME: Translates vendor failures into the AnalysisError taxonomy

use async_trait::async_trait;
use fg_core::{Error, MonotonicTimer, Result};
use reqwest::{Body, Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{format_prompt, AnalysisConfig, AnalysisError, VideoAnalyzer, WorkerPool};

const API_KEY_HEADER: &str = "x-goog-api-key";
const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";

/// Processing state of an uploaded file as reported by the API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteFileState {
    Processing,
    Active,
    Failed,
    /// Anything else; treated as still processing
    Unrecognized(String),
}

impl RemoteFileState {
    pub fn parse(state: Option<&str>) -> Self {
        match state {
            Some("PROCESSING") => RemoteFileState::Processing,
            Some("ACTIVE") => RemoteFileState::Active,
            Some("FAILED") => RemoteFileState::Failed,
            Some(other) => RemoteFileState::Unrecognized(other.to_string()),
            None => RemoteFileState::Unrecognized("STATE_UNSPECIFIED".to_string()),
        }
    }
}

/// File resource returned by the Files API
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteFile {
    name: String,
    uri: String,
    mime_type: Option<String>,
    state: Option<String>,
    error: Option<ApiStatus>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: RemoteFile,
}

#[derive(Debug, Serialize)]
struct UploadStartRequest<'a> {
    file: UploadFileMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct UploadFileMetadata<'a> {
    display_name: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    FileData { file_data: FileData },
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct FileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Google API error envelope
#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiStatus,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    message: String,
    status: Option<String>,
}

/// Translate a failed API response into an [`AnalysisError`].
///
/// Structured information wins: the `error.status` code from the body, then the
/// HTTP status. Message text is only inspected when neither is conclusive.
pub fn classify_api_error(status: StatusCode, body: &str) -> AnalysisError {
    let parsed = serde_json::from_str::<ApiErrorEnvelope>(body).ok();
    let message = parsed
        .as_ref()
        .map(|envelope| envelope.error.message.clone())
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| format!("HTTP {}: {}", status.as_u16(), body.trim()));

    match parsed.as_ref().and_then(|e| e.error.status.as_deref()) {
        Some("PERMISSION_DENIED") | Some("UNAUTHENTICATED") => {
            return AnalysisError::Auth(message)
        }
        Some("RESOURCE_EXHAUSTED") => return AnalysisError::Quota(message),
        _ => {}
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return AnalysisError::Auth(message),
        StatusCode::TOO_MANY_REQUESTS => return AnalysisError::Quota(message),
        _ => {}
    }

    classify_message(message)
}

/// Last-resort classification on message text
fn classify_message(message: String) -> AnalysisError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("unauthorized") {
        AnalysisError::Auth(message)
    } else if lower.contains("quota") || lower.contains("rate limit") {
        AnalysisError::Quota(message)
    } else {
        AnalysisError::GenericApi(message)
    }
}

fn mime_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        _ => "video/mp4",
    }
}

/// Gemini API client
pub struct GeminiClient {
    client: Client,
    config: AnalysisConfig,
    base_url: String,
    pool: WorkerPool,
}

impl GeminiClient {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        if config.api_key.trim().len() < 10 {
            return Err(Error::Config("Invalid Gemini API key format".to_string()));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent("frigem/0.1")
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        let pool = WorkerPool::new(config.workers);

        debug!("Created Gemini client with base URL: {}", base_url);

        Ok(Self {
            client,
            config,
            base_url,
            pool,
        })
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header(API_KEY_HEADER, self.config.api_key.trim())
    }

    /// Upload a local clip with the resumable upload protocol
    async fn upload(&self, clip: &Path) -> std::result::Result<RemoteFile, AnalysisError> {
        let size = tokio::fs::metadata(clip)
            .await
            .map_err(|e| AnalysisError::Upload(format!("Cannot read {}: {}", clip.display(), e)))?
            .len();
        let mime_type = mime_type_for(clip);
        let display_name = clip
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("clip.mp4");

        let start = self
            .authorized(self.client.post(format!("{}/upload/v1beta/files", self.base_url)))
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&UploadStartRequest {
                file: UploadFileMetadata { display_name },
            })
            .send()
            .await
            .map_err(|e| AnalysisError::Upload(format!("Upload request failed: {}", e)))?;

        let start = check_upload_status(start).await?;
        let upload_url = start
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| AnalysisError::Upload("Upload session URL missing".to_string()))?;

        let file = tokio::fs::File::open(clip)
            .await
            .map_err(|e| AnalysisError::Upload(format!("Cannot open {}: {}", clip.display(), e)))?;

        let finished = self
            .client
            .post(&upload_url)
            .header("Content-Length", size.to_string())
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(|e| AnalysisError::Upload(format!("Upload transfer failed: {}", e)))?;

        let finished = check_upload_status(finished).await?;
        let uploaded: UploadResponse = finished
            .json()
            .await
            .map_err(|e| AnalysisError::Upload(format!("Invalid upload response: {}", e)))?;

        Ok(uploaded.file)
    }

    async fn get_file(&self, name: &str) -> std::result::Result<RemoteFile, AnalysisError> {
        let response = self
            .authorized(self.client.get(format!("{}/v1beta/{}", self.base_url, name)))
            .send()
            .await
            .map_err(|e| AnalysisError::GenericApi(format!("File status request failed: {}", e)))?;

        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| AnalysisError::GenericApi(format!("Invalid file status response: {}", e)))
    }

    async fn generate(
        &self,
        file: &RemoteFile,
        prompt: String,
    ) -> std::result::Result<String, AnalysisError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![
                    Part::FileData {
                        file_data: FileData {
                            mime_type: file
                                .mime_type
                                .clone()
                                .unwrap_or_else(|| "video/mp4".to_string()),
                            file_uri: file.uri.clone(),
                        },
                    },
                    Part::Text { text: prompt },
                ],
            }],
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.config.model
        );
        let response = self
            .authorized(self.client.post(url))
            .json(&request)
            .send()
            .await
            .map_err(|e| AnalysisError::GenericApi(format!("Generate request failed: {}", e)))?;

        let response = check_status(response).await?;
        let body = response
            .text()
            .await
            .map_err(|e| AnalysisError::GenericApi(format!("Failed to read response: {}", e)))?;

        if body.trim().is_empty() {
            return Err(AnalysisError::EmptyResponse);
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body)
            .map_err(|e| AnalysisError::GenericApi(format!("Failed to parse response: {}", e)))?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(AnalysisError::EmptyResponse);
        }
        Ok(text)
    }

    /// Poll until the uploaded file is usable, failed, timed out or cancelled
    async fn wait_until_active(
        &self,
        mut file: RemoteFile,
        cancel: &CancellationToken,
    ) -> std::result::Result<RemoteFile, AnalysisError> {
        let timer = MonotonicTimer::new();

        loop {
            file = self.pool.run(self.get_file(&file.name)).await?;
            let state = RemoteFileState::parse(file.state.as_deref());
            debug!(file = %file.name, state = ?state, "Remote file state");

            match state {
                RemoteFileState::Active => return Ok(file),
                RemoteFileState::Failed => {
                    let reason = file
                        .error
                        .as_ref()
                        .map(|status| status.message.clone())
                        .filter(|message| !message.is_empty())
                        .unwrap_or_else(|| "Video processing failed".to_string());
                    error!(file = %file.name, reason = %reason, "Remote video processing failed");
                    return Err(AnalysisError::ProcessingFailed(reason));
                }
                RemoteFileState::Processing => debug!(file = %file.name, "File still processing"),
                RemoteFileState::Unrecognized(other) => {
                    warn!(file = %file.name, state = %other, "Unknown file state")
                }
            }

            let waited = timer.elapsed();
            if waited >= self.config.max_processing_time {
                error!(file = %file.name, waited_secs = waited.as_secs(), "Video not ready in time");
                return Err(AnalysisError::ProcessingTimeout(waited));
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(AnalysisError::Cancelled),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }
}

/// Upload failures keep auth/quota detail, everything else is an upload error
async fn check_upload_status(response: Response) -> std::result::Result<Response, AnalysisError> {
    match check_status(response).await {
        Ok(response) => Ok(response),
        Err(err @ (AnalysisError::Auth(_) | AnalysisError::Quota(_))) => Err(err),
        Err(other) => Err(AnalysisError::Upload(other.to_string())),
    }
}

async fn check_status(response: Response) -> std::result::Result<Response, AnalysisError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let err = classify_api_error(status, &body);
    error!(status = status.as_u16(), kind = ?err.kind(), "Gemini API error: {}", err);
    Err(err)
}

#[async_trait]
impl VideoAnalyzer for GeminiClient {
    async fn analyze(
        &self,
        clip: &Path,
        prompt_template: &str,
        label: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, AnalysisError> {
        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }

        let prompt = format_prompt(prompt_template, label);
        debug!(clip = %clip.display(), label = %label, prompt = %prompt, "Preparing video analysis");

        let uploaded = self.pool.run(self.upload(clip)).await?;
        debug!(file = %uploaded.name, uri = %uploaded.uri, "Video uploaded");

        let file = self.wait_until_active(uploaded, cancel).await?;
        debug!(model = %self.config.model, "Generating content");

        let text = self.pool.run(self.generate(&file, prompt)).await?;

        info!(label = %label, response_length = text.len(), "Successfully analyzed video");
        debug!(analysis = %text, "Full analysis result");
        Ok(text)
    }

    async fn close(&self) {
        self.pool.shutdown().await;
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
