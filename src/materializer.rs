//! Object materializer
//!
//! Turns a downloaded loose object back into the file it stores:
//!
//! 1. inflate the zlib stream
//! 2. optionally check the SHA-1 of the inflated object against its id
//! 3. strip the `"<kind> <size>\0"` envelope
//! 4. write the content atomically under the output root
//!
//! Writes go to a temporary file in the destination directory which is then
//! renamed into place, so a concurrent reader sees either the old file, the
//! complete new file, or nothing.

use crate::error::MaterializeError;
use crate::types::ObjectId;
use flate2::read::ZlibDecoder;
use sha1::{Digest, Sha1};
use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{trace, warn};

/// Header of a loose object, e.g. `blob 5`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHeader {
    /// Object type tag (`blob`, `tree`, ...)
    pub kind: String,
    /// Declared content size, if it parsed
    pub size: Option<u64>,
}

impl ObjectHeader {
    /// Parse the bytes before the null separator
    pub fn parse(envelope: &[u8]) -> Self {
        let text = String::from_utf8_lossy(envelope);
        let mut parts = text.splitn(2, ' ');
        let kind = parts.next().unwrap_or_default().to_string();
        let size = parts.next().and_then(|s| s.trim().parse().ok());
        Self { kind, size }
    }
}

/// Inflate a zlib-compressed payload
pub fn inflate(payload: &[u8]) -> Result<Vec<u8>, MaterializeError> {
    let mut decoder = ZlibDecoder::new(payload);
    let mut inflated = Vec::with_capacity(payload.len() * 2);
    decoder
        .read_to_end(&mut inflated)
        .map_err(MaterializeError::Decompress)?;
    Ok(inflated)
}

/// Split an inflated object into its header and content
///
/// Content is everything strictly after the first null byte.
pub fn strip_envelope(object: &[u8]) -> Result<(ObjectHeader, &[u8]), MaterializeError> {
    let nul = object
        .iter()
        .position(|&b| b == 0)
        .ok_or(MaterializeError::Envelope)?;
    Ok((ObjectHeader::parse(&object[..nul]), &object[nul + 1..]))
}

/// Join an index path onto `root`, rejecting anything that would escape it
///
/// Absolute paths, `..` components and drive prefixes are refused; `.`
/// components are dropped.
pub fn resolve_destination(
    root: &Path,
    relative: impl AsRef<Path>,
) -> Result<PathBuf, MaterializeError> {
    let relative = relative.as_ref();
    let unsafe_path = || MaterializeError::UnsafePath(relative.display().to_string());
    let mut destination = root.to_path_buf();
    let mut pushed = false;
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                destination.push(part);
                pushed = true;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_path());
            }
        }
    }
    if !pushed {
        return Err(unsafe_path());
    }
    Ok(destination)
}

/// Write `content` to `destination` atomically, creating parent directories
///
/// Returns the number of bytes written.
pub fn write_atomic(destination: &Path, content: &[u8]) -> Result<u64, MaterializeError> {
    let write_error = |source| MaterializeError::Write {
        path: destination.to_path_buf(),
        source,
    };

    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(write_error)?;

    let mut temp = NamedTempFile::new_in(parent).map_err(write_error)?;
    temp.write_all(content).map_err(write_error)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))
            .map_err(write_error)?;
    }
    temp.persist(destination).map_err(|e| write_error(e.error))?;

    Ok(content.len() as u64)
}

/// Decompress, strip and write one object
///
/// # Examples
///
/// ```rust
/// use flate2::write::ZlibEncoder;
/// use flate2::Compression;
/// use std::io::Write;
///
/// let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
/// encoder.write_all(b"blob 5\0hello").unwrap();
/// let payload = encoder.finish().unwrap();
///
/// let dir = tempfile::tempdir().unwrap();
/// let target = dir.path().join("greeting.txt");
/// gitrip::materializer::materialize(&payload, &target).unwrap();
/// assert_eq!(std::fs::read(&target).unwrap(), b"hello");
/// ```
pub fn materialize(payload: &[u8], destination: &Path) -> Result<u64, MaterializeError> {
    Materializer::default().materialize(payload, destination, None)
}

/// Configurable materializer shared by all workers
#[derive(Debug, Clone, Copy, Default)]
pub struct Materializer {
    verify_hashes: bool,
}

impl Materializer {
    /// Create a materializer; with `verify_hashes` each object is checked against its id
    pub fn new(verify_hashes: bool) -> Self {
        Self { verify_hashes }
    }

    /// Decompress, optionally verify, strip and write one object
    ///
    /// `expected` is only consulted when hash verification is enabled.
    pub fn materialize(
        &self,
        payload: &[u8],
        destination: &Path,
        expected: Option<&ObjectId>,
    ) -> Result<u64, MaterializeError> {
        let object = inflate(payload)?;

        if let (true, Some(expected)) = (self.verify_hashes, expected) {
            let actual = hex::encode(Sha1::digest(&object));
            if actual != expected.to_hex() {
                return Err(MaterializeError::HashMismatch {
                    expected: expected.to_hex(),
                    actual,
                });
            }
        }

        let (header, content) = strip_envelope(&object)?;
        if let Some(size) = header.size {
            if size != content.len() as u64 {
                warn!(
                    "{} declares {} bytes but holds {}",
                    destination.display(),
                    size,
                    content.len()
                );
            }
        }

        let written = write_atomic(destination, content)?;
        trace!(
            "Materialized {} {} ({} bytes)",
            header.kind,
            destination.display(),
            written
        );
        Ok(written)
    }
}
