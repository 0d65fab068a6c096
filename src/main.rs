mod config;
mod gesture;
mod model_download;
mod pipeline;
mod server;
mod types;

use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use config::{Config, DEFAULT_CONFIG_FILE};
use gesture::{GestureClassifier, OrtGestureModel};
use model_download::{ModelDownloadEvent, ensure_classifier_model_present, ensure_handpose_model_ready};
use pipeline::detector::OrtHandDetector;
use server::{
    AppContext,
    processor::{FrameProcessor, SharedClassifier, SharedDetector},
};
use types::OperatingMode;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// TOML configuration file; defaults apply when it does not exist.
    #[arg(short, long, env = "VIRTUAL_PAINT_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Overrides `server.listen`.
    #[arg(long)]
    listen: Option<String>,

    /// Overrides `server.default_mode`.
    #[arg(long, value_enum)]
    mode: Option<OperatingMode>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    if let Some(mode) = cli.mode {
        config.server.default_mode = mode;
    }
    config.validate()?;

    let models = config.clone();
    let (detector, classifier) = tokio::task::spawn_blocking(move || load_models(&models))
        .await
        .context("model loading task panicked")??;

    let processor = FrameProcessor::new(&config, detector, classifier);
    let ctx = AppContext::new(config, processor);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for ctrl-c: {err}");
            return;
        }
        log::info!("interrupt received");
        on_signal.cancel();
    });

    server::run_server(ctx, cancel).await
}

fn load_models(config: &Config) -> Result<(SharedDetector, SharedClassifier)> {
    let classifier_path = &config.models.classifier;
    ensure_classifier_model_present(classifier_path)?;
    let model = OrtGestureModel::load(classifier_path)?;
    let classifier = GestureClassifier::new(Box::new(model), config.recognition.clone());

    let handpose_path = &config.models.handpose;
    ensure_handpose_model_ready(handpose_path, |event| {
        if let ModelDownloadEvent::Finished { model } = event {
            log::info!("{model:?} downloaded to {}", handpose_path.display());
        }
    })
    .context("handpose model unavailable")?;
    let detector = OrtHandDetector::new(handpose_path, config.models.detection_threshold)?;

    let detector: SharedDetector = Arc::new(Mutex::new(detector));
    Ok((detector, Arc::new(Mutex::new(classifier))))
}
