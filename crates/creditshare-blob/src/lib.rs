#![warn(missing_docs)]

//! CreditShare blob subsystem: write-once, read-many content storage streamed in chunks.
//!
//! A blob is written through a [`BlobWriter`] obtained from
//! [`BlobStore::open_write`]; it becomes visible (and its name taken) only when
//! [`BlobWriter::finish`] returns. Reads hand back a [`BlobReader`], a `Stream`
//! of `Bytes` chunks.

pub mod error;
pub mod fs;
pub mod memory;

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};

pub use error::{BlobError, BlobResult};
pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

/// Longest accepted blob name, in bytes.
pub const MAX_NAME_LEN: usize = 1024;

/// Default chunk size for read streams (64 KiB).
pub const DEFAULT_READ_CHUNK: usize = 64 * 1024;

/// Durable identifier assigned to a blob when it is finished.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobId(String);

impl BlobId {
    /// Mints a fresh identifier.
    pub fn generate() -> Self {
        BlobId(uuid::Uuid::new_v4().simple().to_string())
    }

    /// The identifier as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BlobId {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == 32 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(BlobId(s.to_ascii_lowercase()))
        } else {
            Err(BlobError::InvalidId(s.to_string()))
        }
    }
}

/// Metadata recorded when a blob is finished.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMeta {
    /// Blob identifier.
    pub id: BlobId,
    /// Name the blob was written under.
    pub name: String,
    /// MIME type supplied at write time.
    pub content_type: String,
    /// Total length in bytes.
    pub size: u64,
    /// Hex-encoded blake3 digest of the content.
    pub checksum: String,
    /// Seconds since the Unix epoch at finish time.
    pub created_at: u64,
}

pub(crate) fn validate_name(name: &str) -> BlobResult<()> {
    if name.is_empty() {
        return Err(BlobError::InvalidName {
            reason: "name is empty".to_string(),
        });
    }
    if name.len() > MAX_NAME_LEN {
        return Err(BlobError::InvalidName {
            reason: format!("name is {} bytes, limit is {}", name.len(), MAX_NAME_LEN),
        });
    }
    Ok(())
}

pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Byte stream over a stored blob.
pub struct BlobReader {
    meta: BlobMeta,
    inner: BoxStream<'static, BlobResult<Bytes>>,
}

impl BlobReader {
    /// Wraps a chunk stream together with the blob's metadata.
    pub fn new(meta: BlobMeta, inner: BoxStream<'static, BlobResult<Bytes>>) -> Self {
        Self { meta, inner }
    }

    /// Metadata of the blob being read.
    pub fn meta(&self) -> &BlobMeta {
        &self.meta
    }

    /// Drains the stream into one buffer.
    pub async fn read_to_end(mut self) -> BlobResult<Bytes> {
        let mut buf = BytesMut::with_capacity(self.meta.size as usize);
        while let Some(chunk) = self.inner.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl fmt::Debug for BlobReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobReader").field("meta", &self.meta).finish()
    }
}

impl Stream for BlobReader {
    type Item = BlobResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// Write handle for one blob.
///
/// Dropping a writer without calling `finish` discards what was written.
#[async_trait]
pub trait BlobWriter: Send {
    /// Appends a chunk.
    async fn write(&mut self, chunk: Bytes) -> BlobResult<()>;

    /// Makes the blob durable and visible, returning its metadata.
    ///
    /// Returns only after the content has reached stable storage.
    async fn finish(self: Box<Self>) -> BlobResult<BlobMeta>;

    /// Discards everything written so far.
    async fn abort(self: Box<Self>) -> BlobResult<()>;

    /// Bytes written so far.
    fn written(&self) -> u64;
}

/// Streamed, write-once blob storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Starts writing a new blob. Fails if `name` is already taken.
    async fn open_write(&self, name: &str, content_type: &str) -> BlobResult<Box<dyn BlobWriter>>;

    /// Opens a finished blob for reading.
    async fn open_read(&self, id: &BlobId) -> BlobResult<BlobReader>;

    /// Resolves a name to the identifier of the blob written under it.
    async fn lookup(&self, name: &str) -> BlobResult<BlobId>;

    /// Metadata of a finished blob.
    async fn stat(&self, id: &BlobId) -> BlobResult<BlobMeta>;
}
