use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use sketchfab_uploader::{
    app_state::PipelineState,
    config::AppConfig,
    models::{
        job::{Batch, BatchManifest},
        status::{BatchReport, StatusUpdate},
    },
    pipeline,
    services::{
        catalog,
        discovery,
        remote::{ApiToken, SketchfabClient},
        sink::{ChannelSink, StatusBoard},
    },
};

#[derive(Parser)]
#[command(name = "sketchfab-uploader", version, about = "Batch uploader for Sketchfab models")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload every model folder named by a JSON batch manifest
    Upload {
        /// Path to the batch manifest
        manifest: PathBuf,
    },
    /// List the categories and licenses the API accepts
    Catalog,
    /// List the folders under each root that hold .zip or .glb files
    Discover {
        #[arg(required = true)]
        roots: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Command::Discover { roots } => discover(&roots),
        Command::Catalog => {
            let config = AppConfig::from_env().expect("Failed to load configuration from environment");
            print_catalog(&config).await
        }
        Command::Upload { manifest } => {
            let config = AppConfig::from_env().expect("Failed to load configuration from environment");
            upload(&config, manifest).await
        }
    };
    std::process::exit(code);
}

fn discover(roots: &[PathBuf]) -> i32 {
    match discovery::find_model_folders_in(roots) {
        Ok(folders) => {
            for folder in folders {
                println!("{}", folder.display());
            }
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "Folder discovery failed");
            1
        }
    }
}

fn client_and_token(config: &AppConfig) -> (SketchfabClient, ApiToken) {
    let client = SketchfabClient::new(
        &config.api_url,
        config.connect_timeout(),
        config.request_timeout(),
    )
    .expect("Failed to initialize Sketchfab client");
    let token = ApiToken::new(config.api_token.as_str());
    assert!(!token.is_empty(), "SKETCHFAB_API_TOKEN is empty");
    (client, token)
}

async fn print_catalog(config: &AppConfig) -> i32 {
    let (client, token) = client_and_token(config);
    match catalog::fetch_catalog(&client, &token).await {
        Ok(catalog) => match serde_json::to_string_pretty(&catalog) {
            Ok(json) => {
                println!("{json}");
                0
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to render catalog");
                1
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "Failed to fetch catalog");
            1
        }
    }
}

async fn upload(config: &AppConfig, manifest_path: PathBuf) -> i32 {
    let manifest: BatchManifest = match std::fs::read_to_string(&manifest_path)
        .map_err(|e| e.to_string())
        .and_then(|text| serde_json::from_str::<BatchManifest>(&text).map_err(|e| e.to_string()))
    {
        Ok(manifest) => manifest,
        Err(e) => {
            tracing::error!(path = %manifest_path.display(), error = %e, "Failed to read batch manifest");
            return 1;
        }
    };

    if let Some(addr) = config.metrics_bind_addr.as_deref() {
        install_metrics(addr);
    }

    let (client, token) = client_and_token(config);

    // Resolve names before anything is uploaded
    let template = match catalog::fetch_catalog(&client, &token)
        .await
        .and_then(|catalog| catalog.template_from(&manifest))
    {
        Ok(template) => template,
        Err(e) => {
            tracing::error!(error = %e, "Invalid batch settings");
            return 1;
        }
    };

    let folders = match discovery::find_model_folders_in(&manifest.roots) {
        Ok(found) => {
            let mut seen = BTreeSet::new();
            found
                .into_iter()
                .chain(manifest.folders.iter().cloned())
                .filter(|f| seen.insert(f.clone()))
                .collect::<Vec<_>>()
        }
        Err(e) => {
            tracing::error!(error = %e, "Folder discovery failed");
            return 1;
        }
    };
    if folders.is_empty() {
        tracing::error!("No model folders to upload");
        return 1;
    }

    let batch = Batch::from_folders(manifest.label(), folders, &template);
    tracing::info!(title = %batch.title(), "Batch ready");

    let (sink, mut updates) = ChannelSink::new();
    let board = Arc::new(StatusBoard::new());
    let consumer = {
        let board = board.clone();
        tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                match &update {
                    StatusUpdate::BatchStarted { title, .. } => {
                        tracing::info!(title = %title, "Batch started");
                    }
                    StatusUpdate::QueueDrained { batch } => {
                        tracing::info!(batch = %batch, "Job queue is empty");
                    }
                    _ => {}
                }
                board.apply(update);
            }
        })
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, stopping after current requests");
                cancel.cancel();
            }
        });
    }

    let state = PipelineState::new(
        Arc::new(client),
        Arc::new(sink),
        token,
        config.pipeline_config(),
        cancel,
    );
    let report = pipeline::run_batch(state, batch).await;

    if let Err(e) = consumer.await {
        tracing::error!(error = %e, "Status consumer failed");
    }
    print_table(&board, &report);

    if report.failed() > 0 {
        1
    } else {
        0
    }
}

fn install_metrics(addr: &str) {
    let addr: SocketAddr = addr.parse().expect("Invalid SKETCHFAB_METRICS_BIND_ADDR");
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("Failed to install Prometheus metrics exporter");

    metrics::describe_counter!(
        "sketchfab_uploads_created_total",
        "Models created through POST /models"
    );
    metrics::describe_counter!(
        "sketchfab_uploads_failed_total",
        "Jobs that ended in UploadFailed"
    );
    metrics::describe_counter!(
        "sketchfab_upload_rate_limited_total",
        "Create calls answered with HTTP 429"
    );
    metrics::describe_counter!(
        "sketchfab_processing_failed_total",
        "Uploaded models that ended in ProcessingFailed"
    );
    metrics::describe_counter!(
        "sketchfab_patches_succeeded_total",
        "License/price patches applied"
    );
    metrics::describe_counter!(
        "sketchfab_patches_failed_total",
        "License/price patches that failed"
    );
    tracing::info!(%addr, "Prometheus exporter listening");
}

fn print_table(board: &StatusBoard, report: &BatchReport) {
    println!(
        "{:<48}  {:<18}  {:<28}  {:<20}  {}",
        "Model", "Upload", "Processing", "Patch", "Status"
    );
    for row in board.rows() {
        println!(
            "{:<48}  {:<18}  {:<28}  {:<20}  {}",
            row.asset, row.upload_state, row.processing_detail, row.patch_state, row.batch_summary
        );
    }
    println!(
        "\n{}: {} of {} completed, {} failed",
        report.batch,
        report.succeeded(),
        report.total,
        report.failed()
    );
}
