//! Index decoder
//!
//! Turns the raw bytes of an index file into an ordered list of
//! [`IndexEntry`] values. Decoding is pure: no I/O, no allocation sized by
//! untrusted input beyond what the buffer can actually hold.
//!
//! ## Layout
//!
//! ```text
//! 0      4        8          12
//! +------+--------+----------+---------------------------------------+
//! | DIRC | version| count N  | entry 0 | entry 1 | ... | entry N-1   |
//! +------+--------+----------+---------------------------------------+
//!
//! entry:
//! +0   stat data (ignored)
//! +40  20-byte object hash
//! +60  2-byte flags (ignored)
//! +62  path bytes, null terminated, zero padded to a multiple of 8
//! ```
//!
//! Extensions and the trailing checksum that follow the entries are not
//! read.

use crate::error::FormatError;
use crate::types::{IndexEntry, ObjectId};
use tracing::{debug, trace};

/// Index file signature
pub const SIGNATURE: &[u8; 4] = b"DIRC";

/// Length of the fixed header
pub const HEADER_LEN: usize = 12;

/// Offset of the object hash inside an entry
const HASH_OFFSET: usize = 40;

/// Offset of the path inside an entry (hash followed by 2 flag bytes)
const PATH_OFFSET: usize = HASH_OFFSET + ObjectId::LEN + 2;

/// Smallest possible padded entry: one path byte plus its null terminator
const MIN_ENTRY_LEN: usize = 64;

/// Versions whose entries follow the layout above
const SUPPORTED_VERSIONS: [u32; 2] = [2, 3];

/// Parsed index header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    /// Format version
    pub version: u32,
    /// Number of entries that follow
    pub entry_count: u32,
}

impl IndexHeader {
    /// Read and validate the 12-byte header
    pub fn parse(raw: &[u8]) -> Result<Self, FormatError> {
        if raw.len() < HEADER_LEN {
            return Err(FormatError::TruncatedHeader {
                len: raw.len(),
                min: HEADER_LEN,
            });
        }

        let signature = read_array::<4>(raw, 0);
        if &signature != SIGNATURE {
            return Err(FormatError::BadSignature(signature));
        }

        let version = u32::from_be_bytes(read_array::<4>(raw, 4));
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(FormatError::UnsupportedVersion(version));
        }

        let entry_count = u32::from_be_bytes(read_array::<4>(raw, 8));
        Ok(Self {
            version,
            entry_count,
        })
    }
}

/// Decode an index into its entries, in file order
///
/// Fails with [`FormatError`] instead of reading out of bounds when the
/// buffer is shorter than the header claims.
///
/// # Examples
///
/// ```rust
/// use gitrip::index::{decode, encode};
/// use gitrip::types::ObjectId;
///
/// let id = ObjectId::from_bytes([0xab; 20]);
/// let raw = encode(&[(id, "main.go")]);
/// let entries = decode(&raw).unwrap();
/// assert_eq!(entries[0].path, "main.go");
/// assert_eq!(entries[0].id, id);
/// ```
pub fn decode(raw: &[u8]) -> Result<Vec<IndexEntry>, FormatError> {
    let header = IndexHeader::parse(raw)?;
    let count = header.entry_count as usize;

    if count > (raw.len() - HEADER_LEN) / MIN_ENTRY_LEN {
        return Err(FormatError::ImplausibleCount {
            count: header.entry_count,
            len: raw.len(),
        });
    }

    let mut entries = Vec::with_capacity(count);
    let mut entry_start = HEADER_LEN;

    for index in 0..count {
        let out_of_bounds = FormatError::OutOfBounds {
            index,
            offset: entry_start,
            len: raw.len(),
        };
        let path_start = match entry_start.checked_add(PATH_OFFSET) {
            Some(offset) if offset <= raw.len() => offset,
            _ => return Err(out_of_bounds),
        };

        let hash_start = entry_start + HASH_OFFSET;
        let id = ObjectId::from_slice(&raw[hash_start..hash_start + ObjectId::LEN])
            .ok_or(out_of_bounds)?;

        let path_len = raw[path_start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(FormatError::UnterminatedPath { index })?;
        if path_len == 0 {
            return Err(FormatError::EmptyPath { index });
        }

        let entry = IndexEntry::from_raw(index, id, raw[path_start..path_start + path_len].to_vec());
        trace!("Entry {} {} {}", index, id.short(), entry.path);

        let entry_len = path_start + path_len - entry_start;
        entry_start += padded_len(entry_len);
        entries.push(entry);
    }

    debug!(
        "Decoded {} entries from version {} index ({} bytes)",
        entries.len(),
        header.version,
        raw.len()
    );
    Ok(entries)
}

/// Length of an entry once padded with at least one null byte to a multiple of 8
pub fn padded_len(entry_len: usize) -> usize {
    entry_len + (8 - entry_len % 8)
}

/// Build a minimal version 2 index holding `entries`
///
/// Stat fields are zeroed and the flags carry only the path length. The
/// result round-trips through [`decode`]; it is meant for fixtures and
/// tooling, not for producing an index a git client would trust.
pub fn encode<P: AsRef<[u8]>>(entries: &[(ObjectId, P)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + entries.len() * 96);
    out.extend_from_slice(SIGNATURE);
    out.extend_from_slice(&2u32.to_be_bytes());
    out.extend_from_slice(&(entries.len() as u32).to_be_bytes());

    for (id, path) in entries {
        let path = path.as_ref();
        let start = out.len();
        out.resize(start + HASH_OFFSET, 0);
        out.extend_from_slice(id.as_bytes());
        let flags = path.len().min(0x0fff) as u16;
        out.extend_from_slice(&flags.to_be_bytes());
        out.extend_from_slice(path);
        let entry_len = out.len() - start;
        out.resize(start + padded_len(entry_len), 0);
    }

    out
}

fn read_array<const N: usize>(raw: &[u8], offset: usize) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(&raw[offset..offset + N]);
    buf
}
