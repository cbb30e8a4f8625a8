//! ABOUTME: Video analysis client abstraction with Gemini and stub implementations
//! ABOUTME: Uploads clips, waits for remote readiness and requests text summaries

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub mod gemini;
pub mod pool;
pub mod stub;

pub use gemini::{classify_api_error, GeminiClient, RemoteFileState};
pub use pool::WorkerPool;
pub use stub::StubAnalyzer;

/// Prompt used when none is configured; `{label}` is replaced with the detected object
pub const DEFAULT_PROMPT: &str =
    "Provide a summary of the events in the video. Focus more on the {label}.";

/// Placeholder substituted with the detection label
pub const LABEL_PLACEHOLDER: &str = "{label}";

/// Broad failure categories surfaced by analysis backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisErrorKind {
    Upload,
    Auth,
    Quota,
    GenericApi,
    EmptyResponse,
    ProcessingFailed,
    ProcessingTimeout,
    Cancelled,
    PoolClosed,
}

/// Analysis errors
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Failed to upload video file: {0}")]
    Upload(String),

    #[error("Invalid API key or insufficient permissions: {0}")]
    Auth(String),

    #[error("API quota exceeded, try again later: {0}")]
    Quota(String),

    #[error("Analysis API error: {0}")]
    GenericApi(String),

    #[error("Empty response from analysis API")]
    EmptyResponse,

    #[error("Video processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Video was not ready after {0:?}")]
    ProcessingTimeout(Duration),

    #[error("Analysis cancelled")]
    Cancelled,

    #[error("Analysis worker pool is shut down")]
    PoolClosed,
}

impl AnalysisError {
    pub fn kind(&self) -> AnalysisErrorKind {
        match self {
            AnalysisError::Upload(_) => AnalysisErrorKind::Upload,
            AnalysisError::Auth(_) => AnalysisErrorKind::Auth,
            AnalysisError::Quota(_) => AnalysisErrorKind::Quota,
            AnalysisError::GenericApi(_) => AnalysisErrorKind::GenericApi,
            AnalysisError::EmptyResponse => AnalysisErrorKind::EmptyResponse,
            AnalysisError::ProcessingFailed(_) => AnalysisErrorKind::ProcessingFailed,
            AnalysisError::ProcessingTimeout(_) => AnalysisErrorKind::ProcessingTimeout,
            AnalysisError::Cancelled => AnalysisErrorKind::Cancelled,
            AnalysisError::PoolClosed => AnalysisErrorKind::PoolClosed,
        }
    }
}

impl From<AnalysisError> for fg_core::Error {
    fn from(err: AnalysisError) -> Self {
        fg_core::Error::External(err.to_string())
    }
}

/// Configuration for analysis clients
#[derive(Clone)]
pub struct AnalysisConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// Interval between readiness checks of an uploaded clip
    pub poll_interval: Duration,
    /// Give up waiting for readiness after this long
    pub max_processing_time: Duration,
    pub request_timeout: Duration,
    /// Concurrent remote calls allowed
    pub workers: usize,
    /// Use the canned analyzer instead of the remote API
    pub use_stub: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.0-flash-exp".to_string(),
            poll_interval: Duration::from_secs(10),
            max_processing_time: Duration::from_secs(120),
            request_timeout: Duration::from_secs(120),
            workers: 2,
            use_stub: false,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("poll_interval", &self.poll_interval)
            .field("max_processing_time", &self.max_processing_time)
            .field("request_timeout", &self.request_timeout)
            .field("workers", &self.workers)
            .field("use_stub", &self.use_stub)
            .finish()
    }
}

/// Substitute the detection label into a prompt template
pub fn format_prompt(template: &str, label: &str) -> String {
    let template = if template.trim().is_empty() {
        DEFAULT_PROMPT
    } else {
        template
    };
    template.replace(LABEL_PLACEHOLDER, label)
}

/// Trait for video analysis backends
#[async_trait]
pub trait VideoAnalyzer: Send + Sync {
    /// Summarize the clip at `clip`, focusing the prompt on `label`
    async fn analyze(
        &self,
        clip: &Path,
        prompt_template: &str,
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<String, AnalysisError>;

    /// Drain in-flight work and release resources
    async fn close(&self);

    fn name(&self) -> &str;
}

/// Create an analyzer based on configuration
pub fn create_analyzer(config: AnalysisConfig) -> fg_core::Result<Arc<dyn VideoAnalyzer>> {
    if config.use_stub {
        debug!("Creating stub analyzer");
        return Ok(Arc::new(StubAnalyzer::new()));
    }

    info!("Creating Gemini analyzer with model: {}", config.model);
    Ok(Arc::new(GeminiClient::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prompt_substitutes_label() {
        assert_eq!(
            format_prompt("What is the {label} doing near the {label}?", "dog"),
            "What is the dog doing near the dog?"
        );
    }

    #[test]
    fn test_format_prompt_blank_uses_default() {
        assert_eq!(
            format_prompt("  ", "person"),
            "Provide a summary of the events in the video. Focus more on the person."
        );
    }

    #[test]
    fn test_format_prompt_without_placeholder() {
        assert_eq!(format_prompt("Describe the clip.", "car"), "Describe the clip.");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(AnalysisError::EmptyResponse.kind(), AnalysisErrorKind::EmptyResponse);
        assert_eq!(
            AnalysisError::Quota("slow down".to_string()).kind(),
            AnalysisErrorKind::Quota
        );
        assert_eq!(
            AnalysisError::ProcessingTimeout(Duration::from_secs(120)).kind(),
            AnalysisErrorKind::ProcessingTimeout
        );
    }

    #[test]
    fn test_config_redacts_api_key() {
        let config = AnalysisConfig {
            api_key: "AIzaSy-very-secret".to_string(),
            ..Default::default()
        };
        let debug_output = format!("{:?}", config);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("very-secret"));
    }

    #[test]
    fn test_create_analyzer_stub() {
        let analyzer = create_analyzer(AnalysisConfig {
            use_stub: true,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(analyzer.name(), "stub");
    }

    #[test]
    fn test_create_analyzer_rejects_short_key() {
        let result = create_analyzer(AnalysisConfig {
            api_key: "short".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(fg_core::Error::Config(_))));
    }
}
