//! Scrape orchestration
//!
//! [`Scraper`] sequences one run against an exposed metadata directory:
//!
//! 1. fetch `{base}/index`
//! 2. decode it into [`IndexEntry`] values
//! 3. make sure `{output_dir}/{host}` exists
//! 4. hand every entry to the [`Governor`] and aggregate its outcomes
//!
//! Only failing to obtain or decode the index is an error. Per-object failures
//! are reported through the [`OutcomeSink`] and counted in the returned
//! [`ScrapeSummary`].
//!
//! ## Examples
//!
//! ```rust,no_run
//! use gitrip::{OutcomeCollector, ScrapeConfig, ScraperBuilder};
//! use std::sync::Arc;
//!
//! # async fn example() -> gitrip::Result<()> {
//! let scraper = ScraperBuilder::new()
//!     .config(ScrapeConfig {
//!         concurrency_limit: 4,
//!         ..Default::default()
//!     })
//!     .output_dir("loot")
//!     .build("http://example.com/.git")?;
//!
//! for entry in scraper.list().await? {
//!     println!("{} {}", entry.hash(), entry.path);
//! }
//!
//! let summary = scraper.scrape(Arc::new(OutcomeCollector::new())).await?;
//! println!("{} of {} files written", summary.persisted, summary.total);
//! # Ok(())
//! # }
//! ```

use crate::client::{ClientBuilder, Fetcher, HttpFetcher};
use crate::error::{Result, ScrapeError};
use crate::governor::{Governor, OutcomeSink};
use crate::index;
use crate::retriever::{join_url, ObjectRetriever};
use crate::types::{FailureRecord, IndexEntry, ScrapeConfig, ScrapeOutcome, ScrapeSummary};
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

/// Name of the index file under the base URL
const INDEX_FILE: &str = "index";

/// Entry point for listing and scraping one target
#[derive(Debug)]
pub struct Scraper {
    base: Url,
    host: String,
    output_dir: PathBuf,
    config: ScrapeConfig,
    retriever: ObjectRetriever,
    cancel: CancellationToken,
}

impl Scraper {
    /// Base URL of the metadata directory
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Host the target is served from
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Configuration of this scraper
    pub fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    /// Directory files are written under: `{output_dir}/{host}`
    pub fn output_root(&self) -> PathBuf {
        self.output_dir.join(&self.host)
    }

    /// URL of the index file
    pub fn index_url(&self) -> Url {
        join_url(&self.base, INDEX_FILE)
    }

    /// Token that stops a running scrape from admitting new entries
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Download the raw index file
    pub async fn fetch_index(&self) -> Result<Bytes> {
        self.retriever
            .fetch_path(INDEX_FILE)
            .await
            .map_err(ScrapeError::IndexFetch)
    }

    /// Fetch and decode the index without retrieving any object
    ///
    /// Makes exactly one request and touches no files.
    #[instrument(skip(self), fields(target = %self.base))]
    pub async fn list(&self) -> Result<Vec<IndexEntry>> {
        let raw = self.fetch_index().await?;
        let entries = index::decode(&raw)?;
        info!("Found index with {} entries", entries.len());
        Ok(entries)
    }

    /// Rebuild every file listed in the index under [`output_root`](Self::output_root)
    ///
    /// Each entry produces exactly one outcome on `sink`. Returns once all of
    /// them have been delivered.
    ///
    /// # Errors
    ///
    /// - [`ScrapeError::IndexFetch`] if the index could not be downloaded
    /// - [`ScrapeError::Format`] if it could not be decoded
    /// - [`ScrapeError::Io`] if the output root could not be created
    #[instrument(skip(self, sink), fields(target = %self.base))]
    pub async fn scrape(&self, sink: Arc<dyn OutcomeSink>) -> Result<ScrapeSummary> {
        let started_at = Utc::now();
        let clock = Instant::now();
        info!("Scraping {}", self.base);

        let entries = self.list().await?;
        let total = entries.len();

        let output_root = self.output_root();
        tokio::fs::create_dir_all(&output_root).await?;
        debug!("Writing under {}", output_root.display());

        let tally = Arc::new(SummarySink::new(sink));
        let governor = Governor::new(self.retriever.clone(), self.config.clone(), output_root.clone())
            .with_cancellation(self.cancel.clone());
        let stats = governor.run(entries, tally.clone()).await;

        let (bytes_written, mut failures) = tally.finish();
        failures.sort_by_key(|f| f.position);

        let summary = ScrapeSummary {
            target: self.base.to_string(),
            output_root,
            total,
            persisted: stats.persisted,
            failed: stats.failed,
            bytes_written,
            peak_in_flight: stats.peak_in_flight,
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            failures,
        };

        info!(
            "Finished {}: {}/{} files, {} bytes in {}ms",
            summary.target, summary.persisted, summary.total, summary.bytes_written, summary.duration_ms
        );
        Ok(summary)
    }
}

/// Forwards outcomes while tallying what the summary needs
struct SummarySink {
    inner: Arc<dyn OutcomeSink>,
    tally: Mutex<(u64, Vec<FailureRecord>)>,
}

impl SummarySink {
    fn new(inner: Arc<dyn OutcomeSink>) -> Self {
        Self {
            inner,
            tally: Mutex::new((0, Vec::new())),
        }
    }

    fn finish(&self) -> (u64, Vec<FailureRecord>) {
        std::mem::take(&mut *self.tally.lock())
    }
}

impl OutcomeSink for SummarySink {
    fn record(&self, outcome: ScrapeOutcome) {
        {
            let mut tally = self.tally.lock();
            match &outcome {
                ScrapeOutcome::Persisted { bytes, .. } => tally.0 += bytes,
                ScrapeOutcome::Failed {
                    entry,
                    local_path,
                    cause,
                } => tally.1.push(FailureRecord {
                    position: entry.position,
                    hash: entry.hash(),
                    path: entry.path.clone(),
                    local_path: local_path.clone(),
                    cause: cause.to_string(),
                }),
            }
        }
        self.inner.record(outcome);
    }
}

/// Builder for [`Scraper`]
///
/// Without an explicit [`fetcher`](Self::fetcher), [`build`](Self::build)
/// creates an [`HttpFetcher`] with default client settings and a connection
/// pool sized to the concurrency limit.
#[derive(Default)]
pub struct ScraperBuilder {
    config: ScrapeConfig,
    output_dir: Option<PathBuf>,
    fetcher: Option<Arc<dyn Fetcher>>,
    cancel: Option<CancellationToken>,
}

impl ScraperBuilder {
    /// Create a builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scrape configuration
    pub fn config(mut self, config: ScrapeConfig) -> Self {
        self.config = config;
        self
    }

    /// Directory under which the `{host}` folder is created (default: current directory)
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Use a specific HTTP capability
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Share a cancellation token with the caller
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Build a scraper for `target`, the URL of the exposed metadata directory
    ///
    /// # Errors
    ///
    /// - [`ScrapeError::InvalidConfiguration`] if the configuration is rejected
    /// - [`ScrapeError::InvalidTarget`] if `target` is not an http(s) URL with a host
    /// - [`ScrapeError::Client`] if the default HTTP client cannot be built
    pub fn build(self, target: &str) -> Result<Scraper> {
        self.config.validate()?;

        let trimmed = target.trim().trim_end_matches('/');
        let base = Url::parse(trimmed)
            .map_err(|e| ScrapeError::invalid_target(format!("{}: {}", target, e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ScrapeError::invalid_target(format!(
                "unsupported scheme {} in {}",
                base.scheme(),
                target
            )));
        }
        let host = match base.host_str() {
            Some(host) if !host.is_empty() => host.trim_matches(|c| c == '[' || c == ']').to_string(),
            _ => return Err(ScrapeError::invalid_target(format!("{} has no host", target))),
        };

        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => {
                let client = ClientBuilder::new()
                    .max_idle_per_host(self.config.concurrency_limit)
                    .build()?;
                Arc::new(HttpFetcher::new(client)) as Arc<dyn Fetcher>
            }
        };

        debug!("Target {} (host {})", base, host);
        Ok(Scraper {
            retriever: ObjectRetriever::new(fetcher, base.clone()),
            base,
            host,
            output_dir: self.output_dir.unwrap_or_else(|| PathBuf::from(".")),
            config: self.config,
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}
