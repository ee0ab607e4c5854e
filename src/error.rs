//! Error types for gitrip
//!
//! Errors fall into two groups. Fatal errors ([`ScrapeError`], [`FormatError`])
//! stop a run before any object is fetched. Per-object errors
//! ([`RetrievalError`], [`MaterializeError`], wrapped in [`EntryError`]) never
//! escape the governor; they are turned into failed outcomes so the rest of
//! the batch keeps going.

use reqwest::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results returned by the orchestration layer
pub type Result<T> = std::result::Result<T, ScrapeError>;

/// Boxed error produced by a [`Fetcher`](crate::client::Fetcher) transport
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Fatal errors for `list` and `scrape`
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The index file could not be downloaded
    #[error("Failed to fetch index: {0}")]
    IndexFetch(#[source] RetrievalError),

    /// The index file was downloaded but could not be decoded
    #[error("Malformed index: {0}")]
    Format(#[from] FormatError),

    /// Target URL is unusable (no host, unsupported scheme)
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Client(String),

    /// Proxy did not accept a TCP connection
    #[error("Proxy not ready at {addr}: {source}")]
    ProxyUnavailable {
        /// Proxy address as given
        addr: String,
        /// Underlying connect error
        #[source]
        source: std::io::Error,
    },

    /// I/O errors while preparing the output directory
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScrapeError {
    /// Create an invalid configuration error with a custom message
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        ScrapeError::InvalidConfiguration(msg.into())
    }

    /// Create an invalid target error with a custom message
    pub fn invalid_target(msg: impl Into<String>) -> Self {
        ScrapeError::InvalidTarget(msg.into())
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            ScrapeError::IndexFetch(RetrievalError::Status { status, url }) => {
                format!(
                    "The server answered {} for {}. The metadata directory is probably not exposed.",
                    status, url
                )
            }
            ScrapeError::Format(err) => {
                format!("The index was found but could not be decoded ({}). It may not be a git index.", err)
            }
            ScrapeError::ProxyUnavailable { addr, .. } => {
                format!("Proxy not ready at {}. Check that the SOCKS5 proxy is running.", addr)
            }
            _ => self.to_string(),
        }
    }
}

/// Malformed index data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Buffer is shorter than the fixed header
    #[error("index is {len} bytes, shorter than the {min}-byte header")]
    TruncatedHeader {
        /// Actual buffer length
        len: usize,
        /// Required header length
        min: usize,
    },

    /// Signature is not `DIRC`
    #[error("bad index signature {0:?}")]
    BadSignature([u8; 4]),

    /// Version this decoder does not understand
    #[error("unsupported index version {0}")]
    UnsupportedVersion(u32),

    /// Entry count cannot possibly fit in the buffer
    #[error("index declares {count} entries but holds only {len} bytes")]
    ImplausibleCount {
        /// Declared entry count
        count: u32,
        /// Buffer length
        len: usize,
    },

    /// An entry field lies past the end of the buffer
    #[error("entry {index} at offset {offset} runs past the end of the index ({len} bytes)")]
    OutOfBounds {
        /// Zero-based entry number
        index: usize,
        /// Offset of the entry
        offset: usize,
        /// Buffer length
        len: usize,
    },

    /// No null byte after the path
    #[error("entry {index} path is not null-terminated")]
    UnterminatedPath {
        /// Zero-based entry number
        index: usize,
    },

    /// Path of length zero
    #[error("entry {index} has an empty path")]
    EmptyPath {
        /// Zero-based entry number
        index: usize,
    },
}

/// Failure to download one object
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Server answered with a non-success status
    #[error("{status} for {url}")]
    Status {
        /// HTTP status returned
        status: StatusCode,
        /// URL that was requested
        url: String,
    },

    /// Connection, DNS, TLS or timeout failure
    #[error("request to {url} failed: {source}")]
    Transport {
        /// URL that was requested
        url: String,
        /// Underlying transport error
        #[source]
        source: BoxError,
    },
}

impl RetrievalError {
    /// Whether another attempt could succeed
    ///
    /// Transport failures, 429 and 5xx responses are transient; every other
    /// status is final.
    pub fn is_transient(&self) -> bool {
        match self {
            RetrievalError::Transport { .. } => true,
            RetrievalError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
        }
    }

    /// HTTP status, if the server answered at all
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RetrievalError::Status { status, .. } => Some(*status),
            RetrievalError::Transport { .. } => None,
        }
    }
}

/// Failure to turn a downloaded payload into a file
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// Payload is not valid zlib data
    #[error("decompression failed: {0}")]
    Decompress(#[source] std::io::Error),

    /// Decompressed object has no null byte after its header
    #[error("object envelope is missing its null separator")]
    Envelope,

    /// Could not create directories or write the file
    #[error("failed to write {path:?}: {source}")]
    Write {
        /// Destination that could not be written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Index path would escape the output root
    #[error("refusing to write outside the output root: {0:?}")]
    UnsafePath(String),

    /// Object content does not hash to the id it was requested by
    #[error("hash mismatch - expected: {expected}, actual: {actual}")]
    HashMismatch {
        /// Hash from the index
        expected: String,
        /// Hash of the downloaded object
        actual: String,
    },
}

/// Cause attached to a failed outcome
#[derive(Debug, Error)]
pub enum EntryError {
    /// Object could not be downloaded
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    /// Object could not be decoded or written
    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    /// Run was cancelled before this entry was admitted
    #[error("cancelled before retrieval")]
    Cancelled,

    /// The worker handling this entry panicked
    #[error("worker panicked: {0}")]
    Panicked(String),
}
