//! # gitrip - Rebuild source trees from exposed `.git` directories
//!
//! A library and CLI that reconstructs a project's working tree from a
//! version-control metadata directory accidentally served over HTTP.
//!
//! ## Overview
//!
//! Given the URL of an exposed metadata directory, gitrip:
//! - Downloads and decodes the binary index listing every tracked file
//! - Fetches the loose object behind each entry
//! - Inflates it, strips its `"<kind> <size>\0"` envelope and writes the file
//! - Does all of that with bounded concurrency, optional request pacing and
//!   per-file failure isolation
//!
//! It is not a version-control client: commits, trees, packfiles and deltas
//! are never read.
//!
//! ## Architecture
//!
//! - **Index Decoder** ([`index`]): pure `&[u8] -> Vec<IndexEntry>`
//! - **Object Retriever** ([`retriever`]): one GET per object hash
//! - **Object Materializer** ([`materializer`]): inflate, strip, write atomically
//! - **Concurrency Governor** ([`governor`]): semaphore admission, global pacing,
//!   one outcome per entry
//! - **Scrape Orchestrator** ([`scraper`]): index → governor → summary
//!
//! The HTTP client sits behind the [`Fetcher`] trait so the whole pipeline can
//! be driven by an in-memory fake in tests.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gitrip::{ScrapeConfig, ScraperBuilder};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let scraper = ScraperBuilder::new()
//!     .config(ScrapeConfig {
//!         concurrency_limit: 8,
//!         inter_request_delay: Duration::from_millis(100),
//!         ..Default::default()
//!     })
//!     .build("http://example.com/.git")?;
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<gitrip::ScrapeOutcome>();
//! let report = tokio::spawn(async move {
//!     while let Some(outcome) = rx.recv().await {
//!         println!("{:?}", outcome.local_path());
//!     }
//! });
//!
//! let summary = scraper.scrape(Arc::new(tx)).await?;
//! report.await?;
//! println!("{} of {} files rebuilt", summary.persisted, summary.total);
//! # Ok(())
//! # }
//! ```
//!
//! ## Output Layout
//!
//! Files land under `{output_dir}/{host}/{path from index}`. Index paths that
//! would escape that directory (`..`, absolute paths) are refused and
//! reported as failed entries.
//!
//! ## Error Handling
//!
//! [`ScrapeError`] covers the fatal cases: the index could not be fetched or
//! decoded, the target or configuration is invalid. Everything that goes wrong
//! with a single object is reported as a
//! [`ScrapeOutcome::Failed`](types::ScrapeOutcome::Failed) and counted in the
//! [`ScrapeSummary`].
//!
//! ## Module Organization
//!
//! - [`index`]: Index format decoding (and a minimal encoder for fixtures)
//! - [`retriever`]: Object URL derivation and download
//! - [`materializer`]: Object decompression and file writing
//! - [`governor`]: Bounded concurrent execution and outcome sinks
//! - [`scraper`]: Top-level list and scrape operations
//! - [`client`]: HTTP capability and client construction
//! - [`types`]: Common types and data structures
//! - [`error`]: Error types and handling

pub mod client;
pub mod error;
pub mod governor;
pub mod index;
pub mod materializer;
pub mod retriever;
pub mod scraper;
pub mod types;

// Re-export main types for convenience
pub use client::{ClientBuilder, FetchResponse, Fetcher, HttpFetcher};
pub use error::{Result, ScrapeError};
pub use governor::{Governor, GovernorStats, OutcomeCollector, OutcomeSink};
pub use scraper::{Scraper, ScraperBuilder};
pub use types::*;
