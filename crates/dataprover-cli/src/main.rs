//! CLI entry point for dataprover.
//!
//! The `dataprover` binary loads script providers from a plugins directory
//! and either serves them (hot reload plus scheduled ingestion) or runs a
//! single operation against them.

mod cli;
mod config;
mod helpers;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use dataprover_polyglot::engine::entry;
use dataprover_polyglot::scheduler::{DEFAULT_TARGET_TEMPLATE, TARGET_SCHEME, resolve_target};
use dataprover_polyglot::{
    LoadSummary, PluginLoader, PolyglotProvider, ProviderManifest, ProviderScheduler,
    ReloadWatcher,
};
use dataprover_provider::{
    DataProvider, IngestionService, Ingestor, MemoryTrieStore, ProviderRegistry, TargetManager,
};
use tracing::{info, warn};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let config = AppConfig::load(&cli.config)?;
    helpers::init_tracing(&config.runtime.log_level, cli.json);

    match cli.command {
        Commands::Serve => cmd_serve(&config).await,
        Commands::List => cmd_list(&config, cli.json).await,
        Commands::Schema { provider } => cmd_schema(&config, &provider).await,
        Commands::Trigger { provider, target } => {
            cmd_trigger(&config, &provider, target.as_deref()).await
        }
        Commands::Check { dir } => cmd_check(&dir).await,
    }
}

// ---------------------------------------------------------------------------
// Runtime assembly
// ---------------------------------------------------------------------------

struct Runtime {
    registry: ProviderRegistry,
    summary: LoadSummary,
}

impl Runtime {
    async fn close(&self) {
        for provider in self.registry.providers() {
            provider.close().await;
        }
    }
}

/// Names declared by the manifests under `plugins_dir`, so environment
/// overrides can be matched before anything is loaded.
fn manifest_names(plugins_dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(plugins_dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| ProviderManifest::load(&e.path()).ok())
        .map(|m| m.name)
        .collect()
}

async fn load_runtime(config: &AppConfig) -> Result<Runtime> {
    let plugins_dir = config.runtime.plugins_dir.clone();
    let names = manifest_names(&plugins_dir);
    let resolver = config.resolver(&names, std::env::vars());

    let registry = ProviderRegistry::new();
    let loader = PluginLoader::new(plugins_dir.clone(), registry.clone(), resolver);
    let summary = loader
        .load_all()
        .await
        .with_context(|| format!("failed to load providers from {}", plugins_dir.display()))?;

    for (dir, reason) in &summary.failed {
        warn!(path = %dir.display(), reason = %reason, "provider failed to load");
    }
    info!(
        loaded = summary.loaded.len(),
        available = summary.available().count(),
        failed = summary.failed.len(),
        "providers loaded"
    );
    Ok(Runtime { registry, summary })
}

fn scheduler_for(registry: &ProviderRegistry, store: &Arc<MemoryTrieStore>) -> ProviderScheduler {
    let ingestor: Arc<dyn Ingestor> = Arc::new(IngestionService::new(store.clone()));
    ProviderScheduler::new(registry.clone(), ingestor, store.clone())
}

// ---------------------------------------------------------------------------
// Subcommand: serve
// ---------------------------------------------------------------------------

async fn cmd_serve(config: &AppConfig) -> Result<()> {
    let runtime = load_runtime(config).await?;

    let watcher = if config.runtime.hot_reload {
        let providers = runtime.summary.loaded.iter().map(|p| p.provider.clone());
        Some(ReloadWatcher::start(providers).context("failed to start hot reload")?)
    } else {
        None
    };

    let store = Arc::new(MemoryTrieStore::new());
    let mut scheduler = scheduler_for(&runtime.registry, &store);
    scheduler
        .schedule_all(runtime.summary.loaded.iter().map(|p| p.manifest()))
        .await;
    scheduler.start().context("failed to start scheduler")?;

    info!("dataprover running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    info!("shutting down");
    scheduler.stop().await;
    for status in scheduler.statuses().await {
        info!(
            provider = %status.provider,
            last_run = ?status.last_run,
            last_error = ?status.last_error,
            "schedule summary"
        );
    }
    drop(watcher);
    runtime.close().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: list
// ---------------------------------------------------------------------------

async fn cmd_list(config: &AppConfig, json: bool) -> Result<()> {
    let runtime = load_runtime(config).await?;

    if json {
        let rows: Vec<serde_json::Value> = runtime
            .summary
            .loaded
            .iter()
            .map(|p| {
                serde_json::json!({
                    "metadata": p.provider.metadata(),
                    "status": p.status,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        println!("{}", helpers::row("NAME", "LANGUAGE", "VERSION", "STATUS"));
        for p in &runtime.summary.loaded {
            let manifest = p.manifest();
            println!(
                "{}",
                helpers::row(
                    &manifest.name,
                    manifest.language.as_str(),
                    &manifest.version,
                    &p.status.to_string(),
                )
            );
        }
        for (dir, reason) in &runtime.summary.failed {
            println!("failed: {} ({reason})", dir.display());
        }
    }

    runtime.close().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: schema
// ---------------------------------------------------------------------------

async fn cmd_schema(config: &AppConfig, name: &str) -> Result<()> {
    let runtime = load_runtime(config).await?;
    let result = async {
        let provider = runtime.registry.get(name)?;
        let schemas = serde_json::json!({
            "configSchema": provider.config_schema().await?,
            "connectionConfigSchema": provider.connection_config_schema().await?,
        });
        println!("{}", serde_json::to_string_pretty(&schemas)?);
        Ok::<(), anyhow::Error>(())
    }
    .await;
    runtime.close().await;
    result
}

// ---------------------------------------------------------------------------
// Subcommand: trigger
// ---------------------------------------------------------------------------

async fn cmd_trigger(config: &AppConfig, name: &str, target: Option<&str>) -> Result<()> {
    let runtime = load_runtime(config).await?;
    let result = async {
        let loaded = runtime
            .summary
            .loaded
            .iter()
            .find(|p| p.name() == name)
            .with_context(|| format!("provider `{name}` is not loaded"))?;
        let schedule = loaded.manifest().schedule.clone().unwrap_or_default();

        let target = match target {
            Some(target) => target.to_owned(),
            None => resolve_target(
                schedule
                    .target_identifier
                    .as_deref()
                    .unwrap_or(DEFAULT_TARGET_TEMPLATE),
                name,
                Utc::now(),
            ),
        };

        let store = Arc::new(MemoryTrieStore::new());
        store.ensure_target(&target, TARGET_SCHEME).await?;
        let scheduler = scheduler_for(&runtime.registry, &store);
        // Registering the schedule lets the run pick up its default config.
        if let Some(active) = loaded.manifest().active_schedule() {
            scheduler.schedule(name, active.clone()).await?;
        }

        let report = scheduler.trigger(name, Some(&target), None).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        if !report.is_clean() {
            bail!("ingestion finished with {} error(s)", report.errors.len());
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;
    runtime.close().await;
    result
}

// ---------------------------------------------------------------------------
// Subcommand: check
// ---------------------------------------------------------------------------

async fn cmd_check(dir: &Path) -> Result<()> {
    let manifest = ProviderManifest::load(dir)?;
    let script = manifest.script_path(dir);
    println!("provider:  {} {}", manifest.name, manifest.version);
    println!("language:  {}", manifest.language);
    println!("script:    {}", script.display());

    let provider = PolyglotProvider::from_manifest(manifest, dir)
        .await
        .context("script failed to load")?;
    let entry_points = provider.entry_points().await;
    println!("entries:   {}", entry_points.join(", "));
    provider.close().await;

    let missing: Vec<&str> = entry::REQUIRED
        .iter()
        .copied()
        .filter(|name| !entry_points.iter().any(|e| e == name))
        .collect();
    if !missing.is_empty() {
        bail!("missing required entry point(s): {}", missing.join(", "));
    }
    println!("ok");
    Ok(())
}
