//! # gitrip CLI - Rebuild source from exposed `.git` directories
//!
//! ## Usage
//! ```bash
//! # Rebuild everything under ./example.com
//! gitrip -u http://example.com/.git
//!
//! # Only list what the index contains
//! gitrip -u http://example.com/.git --list
//!
//! # Through Tor, 4 connections, one request every 250ms
//! gitrip -u http://example.onion/.git -p 127.0.0.1:9150 -c 4 -d 250ms
//! ```

use anyhow::Context;
use clap::Parser;
use colored::*;
use gitrip::{
    ClientBuilder, HttpFetcher, IndexEntry, ScrapeConfig, ScrapeError, ScrapeOutcome,
    ScrapeSummary, Scraper, ScraperBuilder,
};
use humantime::format_duration;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// gitrip - rebuild a project's source tree from an exposed metadata directory
#[derive(Parser)]
#[command(name = "gitrip")]
#[command(version)]
#[command(about = "Rebuild source code from a publicly exposed .git directory")]
#[command(long_about = None)]
struct Cli {
    /// URL of the exposed metadata directory, e.g. http://example.com/.git
    #[arg(short, long)]
    url: String,

    /// SOCKS5 proxy, host:port or socks5://host:port
    #[arg(short, long)]
    proxy: Option<String>,

    /// Maximum concurrent object downloads
    #[arg(short, long, default_value_t = 10)]
    concurrency: usize,

    /// Seconds an idle pooled connection is kept
    #[arg(short, long, default_value_t = 5)]
    idle_timeout: u64,

    /// Per-request timeout (e.g. 30s, 1m)
    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    timeout: Duration,

    /// Minimum delay between object requests (e.g. 250ms)
    #[arg(short, long, value_parser = humantime::parse_duration, default_value = "0s")]
    delay: Duration,

    /// Extra attempts for timeouts, 429 and 5xx responses
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// Directory under which the <host> folder is created
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Only list index entries, fetch no objects
    #[arg(long)]
    list: bool,

    /// Check every object's SHA-1 against the index before writing
    #[arg(long)]
    verify: bool,

    /// Print the listing or final summary as JSON
    #[arg(long)]
    json: bool,

    /// Show a progress spinner
    #[arg(long)]
    progress: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(std::io::stderr)
            .init();
    } else if std::env::var_os("RUST_LOG").is_some() {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
    }

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli).await {
        let message = match e.downcast_ref::<ScrapeError>() {
            Some(err) => err.user_message(),
            None => format!("{:#}", e),
        };
        eprintln!("{}: {}", "Error".red().bold(), message);
        std::process::exit(1);
    }
}

/// Main command runner
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ScrapeConfig {
        concurrency_limit: cli.concurrency,
        inter_request_delay: cli.delay,
        verbose: cli.verbose,
        max_retries: cli.retries,
        verify_hashes: cli.verify,
        ..Default::default()
    };
    config.validate()?;

    let client = ClientBuilder::new()
        .timeout(cli.timeout)
        .idle_timeout(Duration::from_secs(cli.idle_timeout))
        .max_idle_per_host(cli.concurrency)
        .proxy(cli.proxy.clone());
    client.probe_proxy().await?;
    let client = client.build().context("failed to set up HTTP client")?;

    let token = CancellationToken::new();
    let scraper = ScraperBuilder::new()
        .config(config)
        .output_dir(&cli.output)
        .fetcher(Arc::new(HttpFetcher::new(client)))
        .cancellation(token.clone())
        .build(&cli.url)?;

    if cli.list {
        cmd_list(&scraper, cli.json).await
    } else {
        cmd_scrape(&scraper, token, cli.json, cli.progress).await
    }
}

/// Print the index entries without fetching any object
async fn cmd_list(scraper: &Scraper, json: bool) -> anyhow::Result<()> {
    let entries = scraper.list().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for entry in &entries {
        print_entry(entry);
    }
    println!(
        "\n{} {} entries in {}",
        "✓".green().bold(),
        entries.len().to_string().cyan(),
        scraper.index_url()
    );
    Ok(())
}

fn print_entry(entry: &IndexEntry) {
    println!("{} {}", entry.hash().yellow(), entry.path);
}

/// Rebuild the tree, reporting each file as it completes
async fn cmd_scrape(
    scraper: &Scraper,
    token: CancellationToken,
    json: bool,
    show_progress: bool,
) -> anyhow::Result<()> {
    if !json {
        println!("{} {}", "Trying".blue().bold(), scraper.base_url());
    }

    let canceller = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, finishing in-flight files...".yellow());
            canceller.cancel();
        }
    });

    let progress = if show_progress {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {pos} files {msg}")
                .context("invalid progress template")?,
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    } else {
        None
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let reporter = tokio::spawn(report_outcomes(rx, progress.clone(), json));

    // The sender is dropped when scrape returns, which ends the reporter.
    let result = scraper.scrape(Arc::new(tx)).await;
    reporter.await.context("outcome reporter failed")?;
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    let summary = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    if token.is_cancelled() {
        anyhow::bail!(
            "interrupted after {} of {} files",
            summary.persisted,
            summary.total
        );
    }
    Ok(())
}

/// Print one line per outcome as they arrive
async fn report_outcomes(
    mut rx: mpsc::UnboundedReceiver<ScrapeOutcome>,
    progress: Option<ProgressBar>,
    quiet: bool,
) {
    while let Some(outcome) = rx.recv().await {
        let line = match &outcome {
            ScrapeOutcome::Persisted { local_path, .. } => {
                format!("{} {}", "+ Added".green(), local_path.display())
            }
            ScrapeOutcome::Failed {
                local_path, cause, ..
            } => format!(
                "{} {} ({})",
                "- Skipped".red(),
                local_path.display(),
                cause.to_string().dimmed()
            ),
        };

        match &progress {
            Some(pb) => {
                pb.inc(1);
                if !quiet {
                    pb.println(line);
                }
            }
            None if !quiet => println!("{}", line),
            None => {}
        }
    }
}

fn print_summary(summary: &ScrapeSummary) {
    let mark = if summary.is_complete() {
        "✓".green().bold()
    } else {
        "!".yellow().bold()
    };
    println!("\n{} Finished {}", mark, summary.output_root.display());
    println!(
        "  Files: {}/{}",
        summary.persisted.to_string().cyan(),
        summary.total
    );
    println!("  Size: {}", HumanBytes(summary.bytes_written).to_string().cyan());
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(summary.duration_ms))
            .to_string()
            .cyan()
    );
    if summary.failed > 0 {
        println!("  Skipped: {} files", summary.failed.to_string().yellow());
    }
}
