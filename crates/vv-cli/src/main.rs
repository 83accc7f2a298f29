// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Local smoke-test driver for the verification pipeline (§6): loads
//! [`Config`] from the environment, wires in-memory/filesystem collaborators,
//! runs one verification end-to-end from a JSON request file, and prints the
//! terminal envelope as JSON to stdout.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::{Config, LogFormat};
use vv_core::VerificationRequest;
use vv_model_client::{HttpModelClientConfig, ScriptedModelClient};
use vv_records::InMemoryRecordStore;
use vv_runtime::{RunContext, Runtime};
use vv_state_store::FilesystemStateStore;
use vv_templates::TemplateLoader;

/// Exit code for a configuration or runtime error surfaced before a terminal
/// envelope could be produced at all.
const EXIT_DRIVER_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "vv", version, about = "Vending machine verification pipeline driver")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Load environment variables from this file before parsing `Config`.
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one verification end-to-end from a JSON request file.
    Run {
        /// Path to a JSON-encoded `VerificationRequest`.
        request: PathBuf,

        /// Directory the filesystem state store writes objects under.
        #[arg(long, default_value = ".vv-state")]
        state_dir: PathBuf,

        /// Use the real HTTP model client instead of the scripted local double.
        /// Requires `--model-endpoint`.
        #[arg(long)]
        live_model: bool,

        /// Base URL of the Converse-style model endpoint (only used with `--live-model`).
        #[arg(long)]
        model_endpoint: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Some(ref path) = cli.env_file
        && let Err(e) = Config::load_env_file(path)
    {
        eprintln!("error: {e}");
        std::process::exit(EXIT_DRIVER_ERROR);
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(EXIT_DRIVER_ERROR);
        }
    };
    init_tracing(&config);

    let result = match cli.command {
        Commands::Run {
            request,
            state_dir,
            live_model,
            model_endpoint,
        } => cmd_run(&config, &request, &state_dir, live_model, model_endpoint.as_deref()).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(EXIT_DRIVER_ERROR);
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => {
            tracing_subscriber::fmt().with_env_filter(filter).json().init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_env_filter(filter).pretty().init();
        }
    }
}

async fn cmd_run(
    config: &Config,
    request_path: &std::path::Path,
    state_dir: &std::path::Path,
    live_model: bool,
    model_endpoint: Option<&str>,
) -> Result<()> {
    let request_bytes = std::fs::read(request_path)
        .with_context(|| format!("reading request file {}", request_path.display()))?;
    let request: VerificationRequest = serde_json::from_slice(&request_bytes)
        .with_context(|| format!("parsing {} as a VerificationRequest", request_path.display()))?;

    let state_store = Arc::new(FilesystemStateStore::new(state_dir).with_bucket(config.state_bucket.as_str()));
    let record_store = Arc::new(InMemoryRecordStore::new());
    let templates = Arc::new(TemplateLoader::with_base_path(config.template_base_path.as_str()));

    let model_client: Arc<dyn vv_model_client::ModelClient> = if live_model {
        let endpoint = model_endpoint.context("--live-model requires --model-endpoint")?;
        let http_config = HttpModelClientConfig::new(endpoint, config.bedrock_model.as_str())
            .with_connect_timeout(config.bedrock_connect_timeout)
            .with_call_timeout(config.bedrock_call_timeout)
            .with_thinking_enabled(config.thinking_enabled);
        Arc::new(vv_model_client::HttpModelClient::new(http_config).context("building HttpModelClient")?)
    } else {
        // No live endpoint configured: the scripted double has no queued
        // responses, so ExecuteTurn1 fails fast with a descriptive error
        // instead of hanging on a real network call. Useful for validating
        // the Initialize/FetchImages/PrepareSystemPrompt path in isolation.
        Arc::new(ScriptedModelClient::new())
    };

    let ctx = RunContext::new(state_store, record_store, model_client, templates);
    let runtime = Runtime::new(ctx);

    let envelope = runtime.run(request).await.context("running verification")?;
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}
