//! Concurrency governor
//!
//! Drives one retrieve-then-materialize pipeline per index entry while
//! bounding how many run at once.
//!
//! ## Admission
//!
//! A [`Semaphore`] with `concurrency_limit` permits gates admission. The
//! coordinating loop acquires a permit before spawning a task and the task
//! holds it until its outcome has been recorded, so at most
//! `concurrency_limit` pipelines are ever active.
//!
//! ## Pacing
//!
//! With a non-zero `inter_request_delay`, every request (retries included)
//! first waits on a shared [`Pacer`]. Request issuance is then globally
//! spaced at least that far apart, independently of the concurrency limit.
//!
//! ## Outcomes
//!
//! Every entry produces exactly one [`ScrapeOutcome`], delivered to an
//! [`OutcomeSink`] as soon as it is known. Errors, panics and cancellation
//! all become `Failed` outcomes; nothing a single entry does can stop the
//! batch.

use crate::error::{EntryError, RetrievalError};
use crate::materializer::{resolve_destination, Materializer};
use crate::retriever::ObjectRetriever;
use crate::types::{IndexEntry, ObjectId, ScrapeConfig, ScrapeOutcome};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receiver of per-entry outcomes
///
/// Called concurrently from worker tasks.
pub trait OutcomeSink: Send + Sync {
    /// Accept one outcome
    fn record(&self, outcome: ScrapeOutcome);
}

impl OutcomeSink for mpsc::UnboundedSender<ScrapeOutcome> {
    fn record(&self, outcome: ScrapeOutcome) {
        if let Err(e) = self.send(outcome) {
            debug!("Outcome receiver dropped, discarding {}", e.0.entry().path);
        }
    }
}

/// Sink that keeps every outcome in memory
#[derive(Debug, Default)]
pub struct OutcomeCollector {
    outcomes: Mutex<Vec<ScrapeOutcome>>,
}

impl OutcomeCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of outcomes received so far
    pub fn len(&self) -> usize {
        self.outcomes.lock().len()
    }

    /// Whether nothing has been received
    pub fn is_empty(&self) -> bool {
        self.outcomes.lock().is_empty()
    }

    /// Take the received outcomes, sorted by index position
    pub fn take(&self) -> Vec<ScrapeOutcome> {
        let mut outcomes = std::mem::take(&mut *self.outcomes.lock());
        outcomes.sort_by_key(|o| o.entry().position);
        outcomes
    }
}

impl OutcomeSink for OutcomeCollector {
    fn record(&self, outcome: ScrapeOutcome) {
        self.outcomes.lock().push(outcome);
    }
}

/// Global request pacer
///
/// Hands out request slots no closer together than the configured delay,
/// measured from the moment the previous slot was granted. A zero delay
/// disables pacing entirely.
#[derive(Debug)]
pub struct Pacer {
    delay: Duration,
    next_slot: tokio::sync::Mutex<Option<Instant>>,
}

impl Pacer {
    /// Create a pacer with the given minimum spacing
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_slot: tokio::sync::Mutex::new(None),
        }
    }

    /// Wait for the next request slot
    pub async fn wait(&self) {
        if self.delay.is_zero() {
            return;
        }
        let mut next_slot = self.next_slot.lock().await;
        if let Some(slot) = *next_slot {
            tokio::time::sleep_until(slot).await;
        }
        *next_slot = Some(Instant::now() + self.delay);
    }
}

/// Counters for one governor run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GovernorStats {
    /// Entries written
    pub persisted: usize,
    /// Entries that failed, cancelled ones included
    pub failed: usize,
    /// Highest number of pipelines active at the same time
    pub peak_in_flight: usize,
}

impl GovernorStats {
    /// Total outcomes produced
    pub fn total(&self) -> usize {
        self.persisted + self.failed
    }
}

/// Bounded, paced, failure-isolating executor for index entries
#[derive(Debug)]
pub struct Governor {
    retriever: ObjectRetriever,
    config: ScrapeConfig,
    output_root: PathBuf,
    cancel: CancellationToken,
}

impl Governor {
    /// Create a governor writing under `output_root`
    pub fn new(retriever: ObjectRetriever, config: ScrapeConfig, output_root: PathBuf) -> Self {
        Self {
            retriever,
            config,
            output_root,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop admitting entries once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Process every entry and return once each has produced one outcome
    pub async fn run(&self, entries: Vec<IndexEntry>, sink: Arc<dyn OutcomeSink>) -> GovernorStats {
        let total = entries.len();
        let limit = self.config.concurrency_limit.max(1);
        info!(
            "Retrieving {} objects (concurrency {}, delay {:?})",
            total, limit, self.config.inter_request_delay
        );

        let semaphore = Arc::new(Semaphore::new(limit));
        let worker = Arc::new(Worker {
            retriever: self.retriever.clone(),
            materializer: Materializer::new(self.config.verify_hashes),
            pacer: Pacer::new(self.config.inter_request_delay),
            output_root: self.output_root.clone(),
            max_retries: self.config.max_retries,
            retry_backoff: self.config.retry_backoff,
            verbose: self.config.verbose,
            cancel: self.cancel.clone(),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });

        let mut stats = GovernorStats::default();
        let mut tasks = JoinSet::new();
        let mut owners: HashMap<Id, IndexEntry> = HashMap::new();
        let mut pending = entries.into_iter();

        while let Some(entry) = pending.next() {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit else {
                let skipped = std::iter::once(entry).chain(pending.by_ref());
                let cancelled = self.cancel_remaining(skipped, sink.as_ref());
                warn!("Cancelled, {} entries not retrieved", cancelled);
                stats.failed += cancelled;
                break;
            };

            while let Some(result) = tasks.try_join_next_with_id() {
                self.settle(result, &mut owners, sink.as_ref(), &mut stats);
            }

            let task_worker = Arc::clone(&worker);
            let task_sink = Arc::clone(&sink);
            let task_entry = entry.clone();
            let handle = tasks.spawn(async move {
                let persisted = task_worker.process(task_entry, task_sink.as_ref()).await;
                drop(permit);
                persisted
            });
            owners.insert(handle.id(), entry);
        }

        while let Some(result) = tasks.join_next_with_id().await {
            self.settle(result, &mut owners, sink.as_ref(), &mut stats);
        }

        stats.peak_in_flight = worker.peak.load(Ordering::SeqCst);
        debug_assert_eq!(stats.total(), total);
        info!(
            "Finished: {} persisted, {} failed, peak concurrency {}",
            stats.persisted, stats.failed, stats.peak_in_flight
        );
        stats
    }

    fn cancel_remaining(
        &self,
        entries: impl Iterator<Item = IndexEntry>,
        sink: &dyn OutcomeSink,
    ) -> usize {
        let mut count = 0;
        for entry in entries {
            let local_path = entry.intended_path(&self.output_root);
            sink.record(ScrapeOutcome::Failed {
                entry,
                local_path,
                cause: EntryError::Cancelled,
            });
            count += 1;
        }
        count
    }

    fn settle(
        &self,
        result: Result<(Id, bool), JoinError>,
        owners: &mut HashMap<Id, IndexEntry>,
        sink: &dyn OutcomeSink,
        stats: &mut GovernorStats,
    ) {
        match result {
            Ok((id, persisted)) => {
                owners.remove(&id);
                if persisted {
                    stats.persisted += 1;
                } else {
                    stats.failed += 1;
                }
            }
            Err(err) => {
                // The task died before recording its outcome; record it here.
                if let Some(entry) = owners.remove(&err.id()) {
                    warn!("Worker for {} did not complete: {}", entry.path, err);
                    let local_path = entry.intended_path(&self.output_root);
                    sink.record(ScrapeOutcome::Failed {
                        entry,
                        local_path,
                        cause: EntryError::Panicked(err.to_string()),
                    });
                    stats.failed += 1;
                }
            }
        }
    }
}

/// State shared by all tasks of one run
struct Worker {
    retriever: ObjectRetriever,
    materializer: Materializer,
    pacer: Pacer,
    output_root: PathBuf,
    max_retries: u32,
    retry_backoff: Duration,
    verbose: bool,
    cancel: CancellationToken,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Decrements the in-flight counter even if the pipeline panics
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Worker {
    /// Run one entry's pipeline, record its outcome, return whether it was persisted
    async fn process(&self, entry: IndexEntry, sink: &dyn OutcomeSink) -> bool {
        let active = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        let outcome = match self.pipeline(&entry).await {
            Ok((local_path, bytes)) => {
                if self.verbose {
                    info!("Added {} ({} bytes)", local_path.display(), bytes);
                } else {
                    debug!("Added {} ({} bytes)", local_path.display(), bytes);
                }
                ScrapeOutcome::Persisted {
                    entry,
                    local_path,
                    bytes,
                }
            }
            Err(cause) => {
                debug!("Skipped {} ({})", entry.path, cause);
                let local_path = entry.intended_path(&self.output_root);
                ScrapeOutcome::Failed {
                    entry,
                    local_path,
                    cause,
                }
            }
        };

        let persisted = outcome.is_persisted();
        sink.record(outcome);
        persisted
    }

    async fn pipeline(&self, entry: &IndexEntry) -> Result<(PathBuf, u64), EntryError> {
        let destination = resolve_destination(&self.output_root, entry.relative_path())?;
        let payload = self.fetch_with_retry(&entry.id).await?;

        let materializer = self.materializer;
        let id = entry.id;
        let target = destination.clone();
        let bytes = tokio::task::spawn_blocking(move || {
            materializer.materialize(&payload, &target, Some(&id))
        })
        .await
        .map_err(|e| EntryError::Panicked(e.to_string()))??;

        Ok((destination, bytes))
    }

    async fn fetch_with_retry(&self, id: &ObjectId) -> Result<Bytes, RetrievalError> {
        let mut attempt = 0u32;
        loop {
            self.pacer.wait().await;
            match self.retriever.fetch(id).await {
                Ok(payload) => return Ok(payload),
                Err(err)
                    if err.is_transient()
                        && attempt < self.max_retries
                        && !self.cancel.is_cancelled() =>
                {
                    attempt += 1;
                    debug!(
                        "Retrying {} after {} (attempt {}/{})",
                        id.short(),
                        err,
                        attempt,
                        self.max_retries
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
