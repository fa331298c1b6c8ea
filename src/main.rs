//! # Accent Classifier - Entry Point
//!
//! - `serve` (default): load the model, then run the HTTP API
//! - `prepare`: build training arrays from the speaker metadata and audio directory
//! - `trim`: strip leading/trailing silence from one file

use accent_classifier::audio::SilenceTrimmer;
use accent_classifier::config::AppConfig;
use accent_classifier::device::{create_device_from_string, DeviceManager};
use accent_classifier::inference::{load_classifier, resolve_artifact, InferenceAdapter};
use accent_classifier::pipeline::RequestPipeline;
use accent_classifier::state::AppState;
use accent_classifier::{dataset, handlers, middleware};
use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "accent-classifier", version, about = "Spoken accent classification service")]
struct Cli {
    /// Config file to use instead of ./config.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve,
    /// Compute features and write train/test arrays
    Prepare,
    /// Trim silence from one audio file
    Trim {
        input: PathBuf,
        /// Write here instead of over the WAV version of the input
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();
    let config = AppConfig::load_from(cli.config.as_deref())?;
    config.validate()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Prepare => {
            let summary = dataset::prepare(&config).await?;
            for item in &summary.skipped {
                error!(identifier = %item.identifier, kind = item.kind, "skipped: {}", item.message);
            }
            Ok(())
        }
        Command::Trim { input, output } => {
            let trimmer = SilenceTrimmer::new(config.trim.clone());
            let outcome = tokio::task::spawn_blocking(move || trimmer.trim(&input, output.as_deref()))
                .await
                .context("trim task failed")??;
            info!(
                path = %outcome.path.display(),
                leading_frames = outcome.leading_frames,
                trailing_frames = outcome.trailing_frames,
                kept_frames = outcome.kept_frames,
                "trimmed"
            );
            Ok(())
        }
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let device = create_device_from_string(&config.model.device);
    info!("Using {} for inference", DeviceManager::describe(&device));

    let artifact = resolve_artifact(&config.model).await?;
    let model_name = format!("{}/{}", config.model.model_type, config.model.model_id);
    let (classifier, labels) = {
        let features = config.features.clone();
        let device = device.clone();
        tokio::task::spawn_blocking(move || load_classifier(&artifact, &features, &device))
            .await
            .context("model loading task failed")??
    };
    info!(model = %model_name, classes = ?labels.classes, "model loaded");

    let inference = InferenceAdapter::new(Arc::new(classifier), labels, model_name);
    let request_pipeline = RequestPipeline::from_config(&config);
    std::fs::create_dir_all(&config.server.upload_dir)
        .with_context(|| format!("creating {}", config.server.upload_dir.display()))?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = AppState::new(config, inference, request_pipeline);

    info!("Starting HTTP server on {}", bind_addr);
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .configure(handlers::configure)
    })
    .bind(&bind_addr)?
    .disable_signals()
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "accent_classifier=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Resolves on SIGINT or, on unix, SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                }
                return;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for SIGINT: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received SIGINT");
}
