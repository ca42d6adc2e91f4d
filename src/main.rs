use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use tokio::io::AsyncReadExt;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use refusal_swap::{
    JsonLinesSink, OutletBody, ProgressSink, RefusalClassifier, RefusalFilter, SwapConfig,
};

#[derive(Parser)]
#[command(
    name = "refusal-swap",
    version,
    about = "Detect refused chat turns and regenerate them with a fallback model"
)]
struct Cli {
    /// Path to a TOML config file. Environment variables override its values.
    #[arg(long, global = true, env = "REFUSAL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter one outlet body and print the result.
    Run {
        /// JSON file holding `{"model": ..., "messages": [...]}`. Reads stdin when omitted.
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Ask the judge whether a single text is a refusal.
    Check {
        /// Text to classify.
        text: String,
    },

    /// Print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = SwapConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_directive())),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::Run { input } => run_filter(config, input.as_deref()).await,
        Commands::Check { text } => check_text(config, &text).await,
        Commands::Config => {
            print_config(&config);
            Ok(())
        }
    }
}

async fn run_filter(config: SwapConfig, input: Option<&Path>) -> anyhow::Result<()> {
    let raw = match input {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("failed to read stdin")?;
            buf
        }
    };
    let body: OutletBody = serde_json::from_str(&raw).context("input is not a valid outlet body")?;

    let filter = RefusalFilter::new(config)?;
    let sink: Arc<dyn ProgressSink> = Arc::new(JsonLinesSink::new(std::io::stderr()));
    let (body, report) = filter.outlet_with_report(body, Some(sink)).await;

    if let Some(report) = &report {
        tracing::debug!(
            refusal_detected = report.refusal_detected,
            replaced = report.replaced,
            generation_failed = report.generation_failed,
            "Outlet finished"
        );
    }

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn check_text(config: SwapConfig, text: &str) -> anyhow::Result<()> {
    let filter = RefusalFilter::new(config)?;
    let classifier = RefusalClassifier::new(filter.client().clone(), filter.config());
    if classifier.is_refusal(text).await {
        println!("refusal");
    } else {
        println!("not-refusal");
    }
    Ok(())
}

fn print_config(config: &SwapConfig) {
    let api_key = match &config.api_key {
        Some(key) if !key.expose_secret().is_empty() => "(set)",
        _ => "(not set)",
    };

    println!("secondary_model      = {}", config.secondary_model);
    println!("judge_model          = {}", config.judge_model);
    println!("base_url             = {}", config.base_url);
    println!("api_key              = {}", api_key);
    println!("debug                = {}", config.debug);
    println!(
        "request_timeout_secs = {}",
        config.request_timeout.as_secs()
    );
    println!("judge_preview_chars  = {}", config.judge_preview_chars);
    println!("judge_max_tokens     = {}", config.judge_max_tokens);
    println!("verify_residency     = {}", config.verify_residency);
    println!("serialize_swaps      = {}", config.serialize_swaps);
}
