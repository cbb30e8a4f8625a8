//! ABOUTME: Configuration management with validation and environment loading
//! ABOUTME: Handles frigem settings from defaults, an optional file and environment variables

use config::{Config as ConfigBuilder, Environment, File};
use fg_ai::AnalysisConfig;
use fg_core::{Error, Result};
use fg_frigate::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use validator::{Validate, ValidationError};

pub use fg_ai::DEFAULT_PROMPT;

/// Main configuration struct
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct Config {
    /// "production" switches logs to JSON
    pub environment: String,
    /// Level for the frigem crates; `RUST_LOG` overrides it
    #[validate(custom(function = "validate_log_level"))]
    pub log_level: String,
    #[validate(nested)]
    pub frigate: FrigateConfig,
    #[validate(nested)]
    pub gemini: GeminiConfig,
    #[validate(nested)]
    pub mqtt: MqttConfig,
    /// Cameras to manage; empty means every camera Frigate reports
    pub cameras: Vec<String>,
    /// Prompt template with a `{label}` placeholder
    pub prompt: String,
    /// Delay between setup attempts while collaborators are unavailable
    #[validate(range(min = 1, max = 3600))]
    pub setup_retry_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            log_level: "info".to_string(),
            frigate: FrigateConfig::default(),
            gemini: GeminiConfig::default(),
            mqtt: MqttConfig::default(),
            cameras: Vec::new(),
            prompt: DEFAULT_PROMPT.to_string(),
            setup_retry_secs: 30,
        }
    }
}

/// Frigate NVR connection settings
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct FrigateConfig {
    #[validate(url)]
    pub url: String,
    /// Per-attempt clip download timeout
    #[validate(range(min = 1, max = 600))]
    pub clip_timeout_secs: u64,
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,
    /// Linear backoff base; attempt `n` waits `n * base`
    #[validate(range(max = 60000))]
    pub retry_base_delay_ms: u64,
    #[validate(length(min = 1))]
    pub clip_dir_prefix: String,
}

impl Default for FrigateConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            clip_timeout_secs: 30,
            max_attempts: 3,
            retry_base_delay_ms: 2000,
            clip_dir_prefix: "frigem_".to_string(),
        }
    }
}

impl FrigateConfig {
    pub fn clip_timeout(&self) -> Duration {
        Duration::from_secs(self.clip_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.retry_base_delay(),
            timeout: self.clip_timeout(),
        }
    }
}

/// Gemini API settings with secret redaction
#[derive(Clone, Deserialize, Serialize, Validate)]
pub struct GeminiConfig {
    #[validate(custom(function = "validate_api_key"))]
    pub api_key: String,
    #[validate(url)]
    pub base_url: String,
    #[validate(length(min = 1))]
    pub model: String,
    #[validate(range(min = 1, max = 300))]
    pub poll_interval_secs: u64,
    /// Hard ceiling on waiting for an uploaded clip to become usable
    #[validate(range(min = 1, max = 3600))]
    pub max_processing_secs: u64,
    #[validate(range(min = 1, max = 3600))]
    pub request_timeout_secs: u64,
    /// Concurrent vendor calls allowed
    #[validate(range(min = 1, max = 32))]
    pub workers: usize,
    /// Use the canned analyzer instead of the Gemini API
    pub use_stub: bool,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.0-flash-exp".to_string(),
            poll_interval_secs: 10,
            max_processing_secs: 120,
            request_timeout_secs: 120,
            workers: 2,
            use_stub: false,
        }
    }
}

impl GeminiConfig {
    pub fn analysis_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            max_processing_time: Duration::from_secs(self.max_processing_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            workers: self.workers,
            use_stub: self.use_stub,
        }
    }
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("max_processing_secs", &self.max_processing_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("workers", &self.workers)
            .field("use_stub", &self.use_stub)
            .finish()
    }
}

/// MQTT broker settings with secret redaction
#[derive(Clone, Deserialize, Serialize, Validate)]
pub struct MqttConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub client_id: String,
    #[validate(length(min = 1))]
    pub events_topic: String,
    #[validate(length(min = 1))]
    pub state_prefix: String,
    #[validate(range(min = 5, max = 3600))]
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            client_id: "frigem".to_string(),
            events_topic: "frigate/events".to_string(),
            state_prefix: "frigem".to_string(),
            keep_alive_secs: 30,
        }
    }
}

impl fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("client_id", &self.client_id)
            .field("events_topic", &self.events_topic)
            .field("state_prefix", &self.state_prefix)
            .field("keep_alive_secs", &self.keep_alive_secs)
            .finish()
    }
}

fn validate_api_key(key: &str) -> std::result::Result<(), ValidationError> {
    if key.trim().len() < 10 {
        return Err(ValidationError::new("api_key_too_short"));
    }
    Ok(())
}

fn validate_log_level(level: &str) -> std::result::Result<(), ValidationError> {
    match level {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new("unknown_log_level")),
    }
}

impl Config {
    /// Load configuration from defaults, an optional TOML file and `FRIGEM__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Config::default();
        let mut builder = ConfigBuilder::builder()
            .set_default("environment", defaults.environment.clone())?
            .set_default("log_level", defaults.log_level.clone())?
            .set_default("frigate.url", defaults.frigate.url.clone())?
            .set_default("frigate.clip_timeout_secs", defaults.frigate.clip_timeout_secs)?
            .set_default("frigate.max_attempts", defaults.frigate.max_attempts)?
            .set_default("frigate.retry_base_delay_ms", defaults.frigate.retry_base_delay_ms)?
            .set_default("frigate.clip_dir_prefix", defaults.frigate.clip_dir_prefix.clone())?
            .set_default("gemini.api_key", defaults.gemini.api_key.clone())?
            .set_default("gemini.base_url", defaults.gemini.base_url.clone())?
            .set_default("gemini.model", defaults.gemini.model.clone())?
            .set_default("gemini.poll_interval_secs", defaults.gemini.poll_interval_secs)?
            .set_default("gemini.max_processing_secs", defaults.gemini.max_processing_secs)?
            .set_default("gemini.request_timeout_secs", defaults.gemini.request_timeout_secs)?
            .set_default("gemini.workers", defaults.gemini.workers as u64)?
            .set_default("gemini.use_stub", defaults.gemini.use_stub)?
            .set_default("mqtt.host", defaults.mqtt.host.clone())?
            .set_default("mqtt.port", defaults.mqtt.port)?
            .set_default("mqtt.client_id", defaults.mqtt.client_id.clone())?
            .set_default("mqtt.events_topic", defaults.mqtt.events_topic.clone())?
            .set_default("mqtt.state_prefix", defaults.mqtt.state_prefix.clone())?
            .set_default("mqtt.keep_alive_secs", defaults.mqtt.keep_alive_secs)?
            .set_default("cameras", Vec::<String>::new())?
            .set_default("prompt", defaults.prompt.clone())?
            .set_default("setup_retry_secs", defaults.setup_retry_secs)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        // FRIGEM__GEMINI__API_KEY, FRIGEM__CAMERAS=front_door,garage, ...
        builder = builder.add_source(
            Environment::with_prefix("FRIGEM")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("cameras")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to build config: {}", e)))?;

        let mut parsed: Config = config
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Failed to deserialize config: {}", e)))?;

        parsed.normalize();
        parsed
            .validate()
            .map_err(|e| Error::Config(format!("Config validation failed: {}", e)))?;

        Ok(parsed)
    }

    /// Fill in blank optional values and tidy user input
    fn normalize(&mut self) {
        if self.prompt.trim().is_empty() {
            self.prompt = DEFAULT_PROMPT.to_string();
        }
        self.cameras.retain(|camera| !camera.trim().is_empty());
        self.frigate.url = self.frigate.url.trim().to_string();
        self.log_level = self.log_level.trim().to_ascii_lowercase();
        self.gemini.api_key = self.gemini.api_key.trim().to_string();
    }
}
