use anyhow::{Context, Result};
use clap::Parser;
use feedpress::config::Config;
use feedpress::digest::{Delivery, Digest, EbookDelivery, PrintDelivery};
use feedpress::watermark::{FileWatermark, MemoryWatermark, WatermarkStore};
use std::path::PathBuf;
use tokio::time::MissedTickBehavior;

#[derive(Parser, Debug)]
#[command(name = "feedpress", about = "Mails new RSS/Atom posts to an e-reader as an e-book digest")]
struct Args {
    /// Configuration file (TOML)
    #[arg(long, env = "FEEDPRESS_CONFIG", default_value = "/config/config.toml")]
    config: PathBuf,

    /// Run a single digest and exit instead of repeating every update period
    #[arg(long)]
    once: bool,

    /// Print the rendered HTML instead of sending it; the watermark is not advanced
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load_with_env(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    tracing::debug!(?config, "Configuration");

    let digest = build_digest(&config, args.dry_run)?;

    if args.once || args.dry_run {
        let report = digest.run_once().await?;
        tracing::info!(
            posts = report.posts,
            failed_feeds = report.failed_feeds.len(),
            delivered = report.delivered,
            advanced = report.advanced,
            "Run complete"
        );
        return Ok(());
    }

    let period = config.update_period();
    tracing::info!(hours = period.as_secs() / 3600, "Starting periodic digest");
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {}
        }

        // Ctrl-C during a run drops it, aborting outstanding feed workers
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            result = digest.run_once() => match result {
                Ok(report) => tracing::info!(
                    posts = report.posts,
                    failed_feeds = report.failed_feeds.len(),
                    delivered = report.delivered,
                    advanced = report.advanced,
                    "Run complete"
                ),
                Err(e) => tracing::error!(error = ?e, "Run failed, retrying next period"),
            }
        }
    }

    tracing::info!("Shutting down");
    Ok(())
}

fn build_digest(config: &Config, dry_run: bool) -> Result<Digest> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("feedpress/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let file_store = FileWatermark::new(&config.feeds.state_file);
    let (store, delivery): (Box<dyn WatermarkStore>, Box<dyn Delivery>) = if dry_run {
        // Dry runs see the real watermark but never persist a new one
        let current = file_store.read().context("Failed to read watermark")?;
        (
            Box::new(MemoryWatermark::new(current)),
            Box::new(PrintDelivery {
                title: config.ebook.title.clone(),
            }),
        )
    } else {
        (
            Box::new(file_store),
            Box::new(EbookDelivery::from_config(config)?),
        )
    };

    Ok(Digest::new(client, config.feeds.feed_file.clone(), store, delivery)
        .with_options(config.collect_options())
        .with_initial_lookback(config.initial_lookback()))
}
