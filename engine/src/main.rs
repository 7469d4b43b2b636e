use std::{env, path::PathBuf, sync::Arc};

use anyhow::Context;
use mimalloc::MiMalloc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use triage_engine::{
    batch::WorkItem,
    engine_config::EngineConfig,
    observability::{append_usage_log, usage_report, UsageMonitor},
    pipeline::TriagePipeline,
    prompt::{HuggingFaceSentiment, OpenAiCategorizer},
    throttle::ThrottledCaller,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const DEFAULT_CONFIG_PATH: &str = "config/triage.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::Layer::default().with_ansi(false))
        .init();

    let items_path = env::args()
        .nth(1)
        .context("usage: triage <items.json>")?;
    let config_path = env::var("TRIAGE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let config = EngineConfig::load(Some(config_path.as_path()))?;
    tracing::debug!("{}", config);

    let raw = tokio::fs::read_to_string(&items_path)
        .await
        .with_context(|| format!("could not read {}", items_path))?;
    let items: Vec<WorkItem> = serde_json::from_str(&raw)
        .with_context(|| format!("could not parse work items from {}", items_path))?;

    let http_client = reqwest::ClientBuilder::new().use_rustls_tls().build()?;
    let caller = Arc::new(ThrottledCaller::from_config(&config));
    let analyzer = Arc::new(HuggingFaceSentiment::new(
        http_client.clone(),
        caller.clone(),
        &config.huggingface,
    )?);
    let categorizer = Arc::new(OpenAiCategorizer::new(
        http_client,
        caller.clone(),
        &config.openai,
        config.categories.clone(),
    )?);

    let pipeline = TriagePipeline::new(
        &config.batch,
        &config.categories.default_label,
        analyzer,
        categorizer,
    );
    let output = pipeline.process(items).await;
    println!("{}", serde_json::to_string_pretty(&output.items)?);

    tracing::info!("Processing stats: {:?}", pipeline.processing_stats());

    let snapshot = caller.usage_snapshot().await;
    let report = usage_report(&snapshot);
    if !report.is_empty() {
        tracing::info!("\n{}", report);
    }

    let monitor = UsageMonitor::new(config.alerts.clone());
    monitor.log_alerts(&monitor.check_alerts(&snapshot));

    if let Some(path) = &config.usage_log {
        append_usage_log(path, &snapshot)?;
    }

    Ok(())
}
