//! Object retriever
//!
//! Maps a content hash to its loose-object URL and downloads the compressed
//! payload. Objects are sharded by the first two hex characters:
//!
//! ```text
//! {base}/objects/<first 2 hex chars>/<remaining 38 hex chars>
//! ```
//!
//! One attempt per call. Retry policy lives in the governor.

use crate::client::Fetcher;
use crate::error::RetrievalError;
use crate::types::ObjectId;
use bytes::Bytes;
use reqwest::StatusCode;
use std::sync::Arc;
use tracing::trace;
use url::Url;

/// Path of an object relative to the base URL
///
/// ```rust
/// # use gitrip::retriever::object_path;
/// # use gitrip::types::ObjectId;
/// let id = ObjectId::from_hex("aabbccddeeff00112233445566778899aabbccdd").unwrap();
/// assert_eq!(object_path(&id), "objects/aa/bbccddeeff00112233445566778899aabbccdd");
/// ```
pub fn object_path(id: &ObjectId) -> String {
    let hex = id.to_hex();
    let (shard, name) = hex.split_at(2);
    format!("objects/{}/{}", shard, name)
}

/// Append a relative path to `base`, keeping every segment of `base`
///
/// `Url::join` would replace the last segment of `http://host/.git`; this
/// treats `base` as a directory instead.
pub fn join_url(base: &Url, relative: &str) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments
            .pop_if_empty()
            .extend(relative.split('/').filter(|s| !s.is_empty()));
    }
    url
}

/// Downloads raw objects from one exposed metadata directory
#[derive(Clone)]
pub struct ObjectRetriever {
    fetcher: Arc<dyn Fetcher>,
    base: Url,
}

impl std::fmt::Debug for ObjectRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRetriever")
            .field("base", &self.base.as_str())
            .finish()
    }
}

impl ObjectRetriever {
    /// Create a retriever for the metadata directory at `base`
    pub fn new(fetcher: Arc<dyn Fetcher>, base: Url) -> Self {
        Self { fetcher, base }
    }

    /// Base URL of the metadata directory
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Full URL of an object
    pub fn object_url(&self, id: &ObjectId) -> Url {
        join_url(&self.base, &object_path(id))
    }

    /// Download the compressed payload of an object
    pub async fn fetch(&self, id: &ObjectId) -> Result<Bytes, RetrievalError> {
        trace!("Fetching object {}", id.short());
        self.fetch_path(&object_path(id)).await
    }

    /// Download any file under the base URL, requiring `200 OK`
    pub async fn fetch_path(&self, relative: &str) -> Result<Bytes, RetrievalError> {
        let url = join_url(&self.base, relative);
        let response = self
            .fetcher
            .get(&url)
            .await
            .map_err(|source| RetrievalError::Transport {
                url: url.to_string(),
                source,
            })?;

        if response.status != StatusCode::OK {
            return Err(RetrievalError::Status {
                status: response.status,
                url: url.to_string(),
            });
        }

        Ok(response.body)
    }
}
