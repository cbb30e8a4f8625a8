//! ABOUTME: Stub analyzer that returns canned summaries for testing
//! ABOUTME: No network calls, deterministic responses for CI/development

use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{format_prompt, AnalysisError, VideoAnalyzer};

/// Stub analyzer that describes the clip from its label and size
pub struct StubAnalyzer;

impl StubAnalyzer {
    pub fn new() -> Self {
        debug!("Creating stub analyzer");
        Self
    }

    fn describe(label: &str, size: u64) -> String {
        let duration_hint = match size {
            0 => "an empty clip",
            1..=1_048_575 => "a short clip",
            _ => "a longer clip",
        };
        format!("A {} was observed in {} ({} bytes).", label, duration_hint, size)
    }
}

impl Default for StubAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VideoAnalyzer for StubAnalyzer {
    async fn analyze(
        &self,
        clip: &Path,
        prompt_template: &str,
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<String, AnalysisError> {
        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }

        let size = tokio::fs::metadata(clip)
            .await
            .map_err(|e| AnalysisError::Upload(format!("Cannot read {}: {}", clip.display(), e)))?
            .len();

        debug!(prompt = %format_prompt(prompt_template, label), "Stub analyzing clip");
        Ok(Self::describe(label, size))
    }

    async fn close(&self) {}

    fn name(&self) -> &str {
        "stub"
    }
}
