//! Sticker generation HTTP server
//!
//! Configuration comes from the environment (a `.env` file is honoured);
//! command-line flags override it.

use anyhow::{Context, Result};
use clap::Parser;
use sticker_forge::{
    server::{build_router, AppState},
    services::{workspace, S3Store},
    tracing_config::{TracingConfig, TracingFormat},
    BackendType, ServiceConfig, StickerProcessor,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "sticker-server")]
struct Cli {
    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Address to bind
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// Port to bind
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Root of the working directories
    #[arg(long, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// Inference backend (onnx or tract)
    #[arg(short, long)]
    backend: Option<BackendType>,

    /// Compact, colorless log output
    #[arg(long)]
    compact: bool,

    /// JSON log output
    #[cfg(feature = "tracing-json")]
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn tracing_format(&self) -> TracingFormat {
        #[cfg(feature = "tracing-json")]
        let requested = self.json.then_some(TracingFormat::Json);
        #[cfg(not(feature = "tracing-json"))]
        let requested = None;

        requested.unwrap_or(if self.compact {
            TracingFormat::Compact
        } else {
            TracingFormat::Console
        })
    }

    fn apply(&self, mut config: ServiceConfig) -> Result<ServiceConfig> {
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = &self.work_dir {
            config.work_dir.clone_from(dir);
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut tracing = TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(cli.tracing_format());
    if let Ok(filter) = std::env::var("RUST_LOG") {
        tracing = tracing.with_env_filter(filter);
    }
    tracing.init().context("Failed to initialize tracing")?;

    let config = ServiceConfig::from_env().context("Failed to load configuration from environment")?;
    let config = cli.apply(config)?;

    workspace::ensure_directories(&config).context("Failed to create working directories")?;
    info!(
        work_dir = %config.work_dir.display(),
        backend = %config.backend,
        bucket = %config.storage.bucket,
        "starting sticker server"
    );

    let store = Arc::new(S3Store::from_config(&config.storage).await);
    let address = config.bind_address();
    let processor = tokio::task::spawn_blocking(move || StickerProcessor::load(config, store))
        .await
        .context("Model loading task failed")?
        .context("Failed to load models")?;

    let app = build_router(AppState::new(Arc::new(processor)));

    info!("Server starting on http://{address}");
    info!("  POST /generate-sticker/");
    info!("  POST /remove-background/");
    info!("  GET  /health");

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}
