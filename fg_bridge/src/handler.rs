//! ABOUTME: Pipeline coordinator running fetch, analyze and publish per detection
//! ABOUTME: Each accepted event runs as its own task; failures are logged, never fatal

use fg_ai::VideoAnalyzer;
use fg_config::Config;
use fg_core::{Error, MonotonicTimer, Result};
use fg_frigate::{ClipFetcher, ClipStore, RetryPolicy};
use metrics::{counter, histogram};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::{
    filter, AnalysisResult, CameraRegistry, DetectionEvent, SensorState, StatePublisher, SwitchCommand,
};

/// Everything the pipeline needs besides its collaborators
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Normalized Frigate base URL
    pub frigate_url: String,
    pub prompt: String,
    pub retry_policy: RetryPolicy,
    pub clip_dir_prefix: String,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            frigate_url: fg_frigate::normalize_base_url(&config.frigate.url)?,
            prompt: config.prompt.clone(),
            retry_policy: config.frigate.retry_policy(),
            clip_dir_prefix: config.frigate.clip_dir_prefix.clone(),
        })
    }
}

struct Pipeline {
    frigate_url: String,
    prompt: String,
    fetcher: ClipFetcher,
    analyzer: Arc<dyn VideoAnalyzer>,
    publisher: Arc<dyn StatePublisher>,
}

impl Pipeline {
    async fn process(&self, event: &DetectionEvent, cancel: &CancellationToken) -> Result<AnalysisResult> {
        let clip = self.fetcher.fetch(&event.event_id, &self.frigate_url, cancel).await?;

        let analysis = self
            .analyzer
            .analyze(clip.path(), &self.prompt, &event.label, cancel)
            .await;

        if let Err(e) = clip.remove().await {
            warn!(event_id = %event.event_id, error = %e, "Failed to remove clip");
        }

        let result = AnalysisResult::new(event, analysis?);
        debug!(event_id = %event.event_id, summary = %result.summary_text, "Analysis result");

        self.publisher.publish_state(&result.sensor_state()).await?;
        self.publisher.publish_event(&result.complete_event()).await?;
        Ok(result)
    }

    /// Top of a pipeline task: outcome is recorded and logged, errors stop here
    async fn run(&self, event: DetectionEvent, cancel: CancellationToken) {
        let timer = MonotonicTimer::new();
        match self.process(&event, &cancel).await {
            Ok(result) => {
                counter!("pipeline_runs_total", "outcome" => "success").increment(1);
                histogram!("pipeline_run_seconds").record(timer.elapsed().as_secs_f64());
                info!(
                    camera = %event.camera,
                    event_id = %event.event_id,
                    value = %result.state_value(),
                    elapsed_ms = timer.elapsed().as_millis() as u64,
                    "Detection analyzed"
                );
            }
            Err(e) => {
                counter!("pipeline_runs_total", "outcome" => "failure").increment(1);
                error!(
                    camera = %event.camera,
                    event_id = %event.event_id,
                    error = %e,
                    "Detection processing failed"
                );
            }
        }
    }
}

/// Receives raw event messages and drives each accepted one through the pipeline
pub struct EventHandler {
    pipeline: Arc<Pipeline>,
    store: Arc<ClipStore>,
    registry: CameraRegistry,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl EventHandler {
    /// Create the clip directory and announce the initial state of every managed camera
    pub async fn start(
        settings: PipelineSettings,
        registry: CameraRegistry,
        analyzer: Arc<dyn VideoAnalyzer>,
        publisher: Arc<dyn StatePublisher>,
    ) -> Result<Self> {
        let store = Arc::new(ClipStore::create(&settings.clip_dir_prefix)?);
        info!(
            path = %store.path().display(),
            frigate_url = %settings.frigate_url,
            analyzer = analyzer.name(),
            "Event handler starting"
        );

        for (camera, enabled) in registry.snapshot() {
            publisher.publish_state(&SensorState::idle(&camera)).await?;
            publisher.publish_switch(&camera, enabled).await?;
        }

        let pipeline = Pipeline {
            frigate_url: settings.frigate_url,
            prompt: settings.prompt,
            fetcher: ClipFetcher::new(Arc::clone(&store), settings.retry_policy),
            analyzer,
            publisher,
        };

        Ok(Self {
            pipeline: Arc::new(pipeline),
            store,
            registry,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Directory holding clips of in-flight runs
    pub fn clip_dir(&self) -> &Path {
        self.store.path()
    }

    pub fn registry(&self) -> &CameraRegistry {
        &self.registry
    }

    pub fn publisher(&self) -> &Arc<dyn StatePublisher> {
        &self.pipeline.publisher
    }

    /// Runs still in flight
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Filter a raw message and spawn a pipeline run if it is accepted
    pub fn handle_message(&self, payload: &[u8]) -> Option<DetectionEvent> {
        if self.cancel.is_cancelled() {
            debug!("Handler is shutting down, dropping message");
            return None;
        }

        let event = filter(payload, &self.registry)?;
        counter!("pipeline_events_accepted_total").increment(1);

        let pipeline = Arc::clone(&self.pipeline);
        let cancel = self.cancel.child_token();
        let spawned = event.clone();
        self.tracker.spawn(async move {
            pipeline.run(spawned, cancel).await;
        });

        Some(event)
    }

    /// Apply a switch command and report the new switch state in the background
    pub fn apply_switch(&self, command: &SwitchCommand) -> bool {
        if !self.registry.set_enabled(&command.camera, command.enabled) {
            return false;
        }
        info!(camera = %command.camera, enabled = command.enabled, "Analysis switch changed");

        let publisher = Arc::clone(&self.pipeline.publisher);
        let camera = command.camera.clone();
        let enabled = command.enabled;
        self.tracker.spawn(async move {
            if let Err(e) = publisher.publish_switch(&camera, enabled).await {
                warn!(camera = %camera, error = %e, "Failed to publish switch state");
            }
        });
        true
    }

    /// Run one event to completion on the caller's task
    pub async fn process(&self, event: &DetectionEvent) -> Result<AnalysisResult> {
        self.pipeline.process(event, &self.cancel).await
    }

    /// Wait until every spawned run has finished
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Cancel in-flight runs, drain the analyzer and remove the clip directory
    pub async fn shutdown(self) -> Result<()> {
        info!(in_flight = self.tracker.len(), "Event handler shutting down");
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        let Self { pipeline, store, .. } = self;
        pipeline.analyzer.close().await;
        drop(pipeline);

        match Arc::try_unwrap(store) {
            Ok(store) => store.close().await.map_err(Error::from),
            Err(store) => {
                warn!(path = %store.path().display(), "Clip directory still shared, leaving removal to drop");
                Ok(())
            }
        }
    }
}
