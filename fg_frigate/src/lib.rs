//! ABOUTME: Frigate NVR HTTP client: camera discovery and clip downloads
//! ABOUTME: Streams event clips into a scoped temp dir with bounded linear-backoff retries

use fg_core::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

pub mod clip;

pub use clip::{ClipFetcher, ClipHandle, ClipStore, FetchError, RetryPolicy};

/// Frigate's API port when the configured URL does not name one
pub const DEFAULT_API_PORT: u16 = 5000;

/// A camera known to Frigate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub id: String,
    pub name: String,
}

/// Subset of Frigate's `/api/config` response we care about
#[derive(Debug, Deserialize)]
struct FrigateConfigResponse {
    #[serde(default)]
    cameras: BTreeMap<String, FrigateCamera>,
}

#[derive(Debug, Deserialize)]
struct FrigateCamera {
    name: Option<String>,
}

/// Normalize a user supplied Frigate URL.
///
/// Trailing slashes are stripped and plain `http` URLs without a port get
/// Frigate's default API port.
pub fn normalize_base_url(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let mut url = Url::parse(raw)
        .map_err(|e| Error::Config(format!("Invalid Frigate URL '{}': {}", raw, e)))?;

    // `Url` drops a port equal to the scheme default, so an explicit `:80` is only visible in `raw`
    if url.scheme() != "http" || has_explicit_port(raw) {
        return Ok(raw.trim_end_matches('/').to_string());
    }

    url.set_port(Some(DEFAULT_API_PORT))
        .map_err(|_| Error::Config(format!("Cannot set port on Frigate URL '{}'", raw)))?;
    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Whether the authority of `raw` names a port, even the scheme's default one
fn has_explicit_port(raw: &str) -> bool {
    let rest = raw.split_once("://").map_or(raw, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let after_host = match host_port.rfind(']') {
        Some(end) => &host_port[end + 1..],
        None => host_port,
    };
    after_host.contains(':')
}

/// Download URL of the clip recorded for `event_id`
pub fn clip_url(base_url: &str, event_id: &str) -> String {
    format!("{}/api/events/{}/clip.mp4", base_url.trim_end_matches('/'), event_id)
}

/// Frigate HTTP API client
#[derive(Debug, Clone)]
pub struct FrigateClient {
    client: Client,
    base_url: String,
}

impl FrigateClient {
    /// Create a client for the given (not yet normalized) Frigate URL
    pub fn new(raw_url: &str) -> Result<Self> {
        let base_url = normalize_base_url(raw_url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("frigem/0.1")
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        debug!("Created Frigate client with base URL: {}", base_url);

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn clip_url(&self, event_id: &str) -> String {
        clip_url(&self.base_url, event_id)
    }

    /// List the cameras configured in Frigate, sorted by id
    pub async fn discover_cameras(&self) -> Result<Vec<CameraInfo>> {
        let url = format!("{}/api/config", self.base_url);
        info!("Discovering cameras from: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::NotReady(format!("Cannot reach Frigate at {}: {}", url, e)))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Frigate config request failed");
            return Err(Error::NotReady(format!(
                "Frigate config request returned status: {}",
                response.status()
            )));
        }

        let config: FrigateConfigResponse = response
            .json()
            .await
            .map_err(|e| Error::External(format!("Failed to parse Frigate config: {}", e)))?;

        let cameras: Vec<CameraInfo> = config
            .cameras
            .into_iter()
            .map(|(id, camera)| CameraInfo {
                name: camera.name.unwrap_or_else(|| id.clone()),
                id,
            })
            .collect();

        debug!(count = cameras.len(), "Discovered Frigate cameras");
        Ok(cameras)
    }
}
