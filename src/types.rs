//! Core data types shared across gitrip
//!
//! - **Index data**: [`ObjectId`], [`IndexEntry`] - what the index decoder produces
//! - **Results**: [`ScrapeOutcome`], [`ScrapeSummary`], [`FailureRecord`] - what a run reports
//! - **Configuration**: [`ScrapeConfig`] - knobs for one scrape
//!
//! ## Examples
//!
//! ```rust
//! use gitrip::types::ScrapeConfig;
//! use std::time::Duration;
//!
//! let config = ScrapeConfig {
//!     concurrency_limit: 4,
//!     inter_request_delay: Duration::from_millis(250),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use crate::error::{EntryError, Result, ScrapeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 20-byte content hash of a stored object
///
/// Rendered everywhere as 40 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; ObjectId::LEN]);

impl ObjectId {
    /// Length of the binary hash in bytes
    pub const LEN: usize = 20;

    /// Wrap raw hash bytes
    pub const fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// Copy a hash out of a slice, `None` unless it is exactly 20 bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; Self::LEN]>::try_from(bytes).ok().map(Self)
    }

    /// Parse 40 hex characters
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        let mut bytes = [0u8; Self::LEN];
        hex::decode_to_slice(hex_str, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    /// Raw hash bytes
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// Lowercase hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short form used in log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex_str = String::deserialize(deserializer)?;
        ObjectId::from_hex(&hex_str)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid object id: {}", hex_str)))
    }
}

/// One tracked file listed in the index
///
/// # Examples
///
/// ```rust
/// # use gitrip::types::{IndexEntry, ObjectId};
/// # use std::path::Path;
/// let entry = IndexEntry::new(0, ObjectId::from_bytes([0xaa; 20]), "src/main.go");
/// assert_eq!(entry.hash().len(), 40);
/// assert_eq!(entry.intended_path(Path::new("example.com")), Path::new("example.com/src/main.go"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Zero-based position in the index
    pub position: usize,
    /// Content hash of the object holding this file
    pub id: ObjectId,
    /// Path relative to the repository root, for display
    ///
    /// Invalid UTF-8 is replaced with U+FFFD. Files are written under
    /// [`raw_path`](Self::raw_path) instead.
    pub path: String,
    #[serde(skip)]
    raw_path: Vec<u8>,
}

impl IndexEntry {
    /// Create an entry from a UTF-8 path
    pub fn new(position: usize, id: ObjectId, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            position,
            id,
            raw_path: path.as_bytes().to_vec(),
            path,
        }
    }

    /// Create an entry from the path bytes exactly as stored in the index
    pub fn from_raw(position: usize, id: ObjectId, raw_path: Vec<u8>) -> Self {
        Self {
            position,
            id,
            path: String::from_utf8_lossy(&raw_path).into_owned(),
            raw_path,
        }
    }

    /// Path bytes as stored in the index
    pub fn raw_path(&self) -> &[u8] {
        if self.raw_path.is_empty() {
            // Deserialized entries only carry the display form.
            self.path.as_bytes()
        } else {
            &self.raw_path
        }
    }

    /// Relative path the file is written to
    ///
    /// Built from the raw bytes on unix, so distinct index paths never map
    /// to the same file.
    #[cfg(unix)]
    pub fn relative_path(&self) -> PathBuf {
        use std::os::unix::ffi::OsStrExt;
        PathBuf::from(std::ffi::OsStr::from_bytes(self.raw_path()))
    }

    /// Relative path the file is written to
    #[cfg(not(unix))]
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }

    /// Content hash as 40 lowercase hex characters
    pub fn hash(&self) -> String {
        self.id.to_hex()
    }

    /// Where this entry would land under `root`, without any safety checks
    ///
    /// Used for display; writing goes through
    /// [`resolve_destination`](crate::materializer::resolve_destination).
    pub fn intended_path(&self, root: &Path) -> PathBuf {
        root.join(self.relative_path())
    }
}

/// Result of processing one index entry
///
/// Exactly one outcome is emitted per entry and it is never changed after
/// being handed to the sink.
#[derive(Debug)]
pub enum ScrapeOutcome {
    /// File was written
    Persisted {
        /// Entry that was processed
        entry: IndexEntry,
        /// Where the file was written
        local_path: PathBuf,
        /// Bytes written
        bytes: u64,
    },
    /// File could not be reconstructed
    Failed {
        /// Entry that was processed
        entry: IndexEntry,
        /// Where the file would have been written
        local_path: PathBuf,
        /// What went wrong
        cause: EntryError,
    },
}

impl ScrapeOutcome {
    /// Entry this outcome belongs to
    pub fn entry(&self) -> &IndexEntry {
        match self {
            ScrapeOutcome::Persisted { entry, .. } | ScrapeOutcome::Failed { entry, .. } => entry,
        }
    }

    /// Local path written or intended
    pub fn local_path(&self) -> &Path {
        match self {
            ScrapeOutcome::Persisted { local_path, .. } | ScrapeOutcome::Failed { local_path, .. } => {
                local_path
            }
        }
    }

    /// Whether the file was written
    pub fn is_persisted(&self) -> bool {
        matches!(self, ScrapeOutcome::Persisted { .. })
    }
}

/// Configuration for one scrape
///
/// Read-only for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeConfig {
    /// Maximum number of entries fetched and written at the same time
    pub concurrency_limit: usize,
    /// Minimum spacing between two outgoing object requests
    #[serde(with = "humantime_serde_compat")]
    pub inter_request_delay: Duration,
    /// Log every persisted file instead of only failures
    pub verbose: bool,
    /// Extra attempts for transient retrieval failures
    pub max_retries: u32,
    /// Base sleep between attempts, multiplied by the attempt number
    #[serde(with = "humantime_serde_compat")]
    pub retry_backoff: Duration,
    /// Check each object's SHA-1 against its index hash before writing
    pub verify_hashes: bool,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 10,
            inter_request_delay: Duration::ZERO,
            verbose: false,
            max_retries: 0,
            retry_backoff: Duration::from_millis(500),
            verify_hashes: false,
        }
    }
}

impl ScrapeConfig {
    /// Reject settings the governor cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            return Err(ScrapeError::invalid_configuration(
                "concurrency limit must be at least 1",
            ));
        }
        if self.concurrency_limit > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(ScrapeError::invalid_configuration(format!(
                "concurrency limit {} is too large",
                self.concurrency_limit
            )));
        }
        Ok(())
    }
}

/// Durations serialized the way the CLI accepts them ("250ms", "1s")
mod humantime_serde_compat {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

/// A failed entry, flattened for reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Position in the index
    pub position: usize,
    /// Content hash
    pub hash: String,
    /// Path from the index
    pub path: String,
    /// Intended local path
    pub local_path: PathBuf,
    /// Rendered cause
    pub cause: String,
}

/// Aggregate result of a scrape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeSummary {
    /// Base URL that was scraped
    pub target: String,
    /// Directory files were written under
    pub output_root: PathBuf,
    /// Entries listed in the index
    pub total: usize,
    /// Files written
    pub persisted: usize,
    /// Entries that failed
    pub failed: usize,
    /// Total bytes written
    pub bytes_written: u64,
    /// Highest number of entries in flight at once
    pub peak_in_flight: usize,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Failed entries, ordered by index position
    pub failures: Vec<FailureRecord>,
}

impl ScrapeSummary {
    /// Whether every entry was written
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.persisted == self.total
    }
}
