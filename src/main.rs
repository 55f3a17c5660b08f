//! `snapshot`: take one picture with a simulated camera through the buffer pool.
use anyhow::Context;
use camera_window::camera::{CameraParameters, SimulatedCamera};
use camera_window::config::{SnapshotConfig, DEFAULT_CONFIG_PATH};
use camera_window::events::{self, CameraEvent};
use camera_window::snapshot::{self, SnapshotOutcome};
use camera_window::{BufferPool, HeapAllocator};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Exercise the preview window with a simulated camera.
#[derive(Parser, Debug)]
#[command(name = "snapshot", version)]
#[command(about = "Start preview, optionally autofocus, and save one picture")]
struct Cli {
    /// Color effect to apply.
    #[arg(short, long)]
    effect: Option<String>,

    /// Flash mode.
    #[arg(short, long)]
    flash: Option<String>,

    /// Where to save the picture.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Skip autofocus before taking the picture.
    #[arg(short, long)]
    no_autofocus: bool,

    /// Configuration file.
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

impl Cli {
    /// Load the configuration, applying CLI overrides.
    fn load_config(&self) -> anyhow::Result<SnapshotConfig> {
        let mut config = SnapshotConfig::load_from(&self.config)
            .with_context(|| format!("loading {}", self.config.display()))?;

        if let Some(effect) = &self.effect {
            config.camera.effect = effect.clone();
        }
        if let Some(flash) = &self.flash {
            config.camera.flash_mode = flash.clone();
        }
        if let Some(output) = &self.output {
            config.application.output = output.clone();
        }
        if self.no_autofocus {
            config.camera.autofocus = false;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.application.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("--- snapshot {} ---", env!("CARGO_PKG_VERSION"));
    tracing::debug!(?config, "Full configuration");

    let window = Arc::new(
        BufferPool::from_config(HeapAllocator::new(), &config.window)
            .context("configuring preview window")?,
    );
    let (sink, mut rx) = events::channel();

    let abort = sink.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Got SIGINT, exiting...");
            abort.fire(CameraEvent::Abort);
        }
    });

    let mut camera = SimulatedCamera::new(Arc::clone(&window), sink, &config.camera)?;
    CameraParameters::log_supported();
    camera.parameters().log_current();

    tracing::info!("Starting preview...");
    camera.start_preview()?;

    let outcome = snapshot::run_event_loop(&camera, &mut rx, config.camera.autofocus).await;
    camera.stop_preview();
    tracing::debug!(stats = ?window.stats(), "Preview window at exit");

    match outcome? {
        SnapshotOutcome::Captured(image) => {
            snapshot::save_image(&config.application.output, &image).await?;
        }
        SnapshotOutcome::Aborted => tracing::info!("Aborted, no picture saved"),
    }

    tracing::info!("Done.");
    Ok(())
}
