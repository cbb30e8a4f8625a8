mod cli;

use clap::Parser;
use cli::{AnalyzeOpts, Cli, Command};
use fg_ai::create_analyzer;
use fg_bridge::{mqtt, CameraRegistry, EventHandler, MessageRouter, MqttPublisher, PipelineSettings, Topics};
use fg_config::Config;
use fg_core::telemetry::{self, LogFormat};
use fg_core::{Error, Result};
use fg_frigate::FrigateClient;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load configuration - exit with non-zero if invalid
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            telemetry::init_tracing(LogFormat::Pretty, "info");
            tracing::error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    telemetry::init_tracing(LogFormat::for_environment(&config.environment), &config.log_level);
    tracing::debug!(?config, "Configuration loaded successfully");

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Cameras => list_cameras(&config).await,
        Command::Analyze(opts) => analyze(&config, opts).await,
    };

    if let Err(e) = result {
        tracing::error!("frigem failed: {}", e);
        process::exit(1);
    }
}

/// Cameras from configuration, or everything Frigate knows about
async fn resolve_cameras(config: &Config) -> Result<Vec<String>> {
    if !config.cameras.is_empty() {
        return Ok(config.cameras.clone());
    }

    let client = FrigateClient::new(&config.frigate.url)?;
    let cameras: Vec<String> = client
        .discover_cameras()
        .await?
        .into_iter()
        .map(|camera| camera.id)
        .collect();

    if cameras.is_empty() {
        return Err(Error::Config("Frigate reports no cameras and none are configured".to_string()));
    }
    tracing::info!(?cameras, "Discovered cameras");
    Ok(cameras)
}

async fn run(config: Config) -> Result<()> {
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        tracing::info!("Interrupt received, shutting down");
        signal.cancel();
    });

    let retry_delay = Duration::from_secs(config.setup_retry_secs);
    let cameras = loop {
        match resolve_cameras(&config).await {
            Ok(cameras) => break cameras,
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    error = %e,
                    retry_secs = retry_delay.as_secs(),
                    "Setup not ready, retrying"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(retry_delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    };

    let analyzer = create_analyzer(config.gemini.analysis_config())?;
    let settings = PipelineSettings::from_config(&config)?;
    let (client, mut eventloop) = mqtt::connect(&config.mqtt, cameras.len());
    let publisher = MqttPublisher::new(client.clone(), Topics::new(&config.mqtt.state_prefix));

    let handler = EventHandler::start(
        settings,
        CameraRegistry::new(cameras),
        analyzer,
        Arc::new(publisher),
    )
    .await?;

    tracing::info!(
        events_topic = %config.mqtt.events_topic,
        cameras = ?handler.registry().cameras(),
        "frigem running"
    );

    let router = MessageRouter::from_config(&config.mqtt);
    let result = mqtt::run(&client, &mut eventloop, &router, &handler, &shutdown).await;

    // Runs finishing during shutdown still publish, so keep polling until the handler is drained
    mqtt::drain_and_disconnect(&client, &mut eventloop, handler.shutdown()).await?;
    tracing::info!("frigem stopped");
    result
}

async fn list_cameras(config: &Config) -> Result<()> {
    let client = FrigateClient::new(&config.frigate.url)?;
    for camera in client.discover_cameras().await? {
        println!("{}", camera.id);
    }
    Ok(())
}

async fn analyze(config: &Config, opts: AnalyzeOpts) -> Result<()> {
    if !opts.clip.is_file() {
        return Err(Error::NotFound(format!("Clip {} does not exist", opts.clip.display())));
    }

    let analyzer = create_analyzer(config.gemini.analysis_config())?;
    let result = analyzer
        .analyze(&opts.clip, &config.prompt, &opts.label, &CancellationToken::new())
        .await;
    analyzer.close().await;

    println!("{}", result?);
    Ok(())
}
