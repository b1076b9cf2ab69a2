// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use podsync::{
    Config, CycleReport, HttpDownloader, JsonStorage, LocalFileStore, Provider, ReqwestClient,
    RssBuilder, SyncError, SyncManager, Updater, new_key_provider, scheduler,
};

/// Turn podcast and video channels into self-hosted podcast feeds
#[derive(Parser, Debug)]
#[command(name = "podsync")]
#[command(about = "Turn podcast and video channels into self-hosted podcast feeds")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "PODSYNC_CONFIG_PATH", default_value = "config.toml")]
    config: PathBuf,

    /// Update every feed once and exit instead of running the scheduler
    #[arg(long)]
    headless: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    init_tracing(args.debug || config.log.debug);
    config.warn_ignored_settings();

    let client = ReqwestClient::new().context("Failed to create HTTP client")?;

    let mut manager = SyncManager::new(
        Arc::new(JsonStorage::new(&config.database.dir)),
        Arc::new(LocalFileStore::new(&config.storage.data_dir)),
        Arc::new(HttpDownloader::new(
            client.clone(),
            &config.downloader.staging_dir,
        )),
        config.feeds.values().cloned().collect(),
        config.sync_options(),
    )
    .with_builder(Provider::Rss, Arc::new(RssBuilder::new(client)));

    for (provider, tokens) in config.provider_tokens() {
        let keys = new_key_provider(tokens)
            .with_context(|| format!("Invalid API keys for {provider}"))?;
        manager = manager.with_keys(provider, keys);
    }

    if args.headless {
        return run_once(&config, &manager).await;
    }

    let feeds: Vec<_> = config.feeds.values().cloned().collect();
    let updater: Arc<dyn Updater> = Arc::new(manager);
    let scheduler_config = config.scheduler.clone();
    let token = CancellationToken::new();

    let handle = {
        let token = token.clone();
        tokio::spawn(async move { scheduler::run(feeds, updater, &scheduler_config, token).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");

    token.cancel();
    handle.await.context("Scheduler task panicked")?;

    Ok(())
}

/// Update every feed once, in order, and print a summary
async fn run_once(config: &Config, manager: &SyncManager) -> Result<()> {
    let mut failures: Vec<(String, SyncError)> = Vec::new();

    for feed in config.feeds.values() {
        match manager.update(feed).await {
            Ok(report) => print_report(&feed.id, &report),
            Err(e) => {
                println!("{} {}", "✗".red().bold(), feed.id.yellow());
                failures.push((feed.id.clone(), e));
            }
        }
    }

    if failures.is_empty() {
        println!("\n{}", "All feeds updated".bold().green());
        return Ok(());
    }

    println!("\n{}", "Failed feeds:".red().bold());
    for (id, error) in &failures {
        println!("  {} - {}", id.yellow(), error.to_string().dimmed());
    }

    std::process::exit(1);
}

fn print_report(feed_id: &str, report: &CycleReport) {
    println!(
        "{} {} • {} received, {} downloaded, {} failed, {} cleaned{}",
        "✓".green().bold(),
        feed_id.bold(),
        report.received.to_string().cyan(),
        report.downloaded.to_string().green(),
        if report.failed > 0 {
            report.failed.to_string().red().bold()
        } else {
            report.failed.to_string().green()
        },
        report.cleaned.to_string().yellow(),
        if report.rate_limited {
            " (rate limited)".yellow().to_string()
        } else {
            String::new()
        }
    );
}
