//! In-memory blob store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};

use crate::error::{BlobError, BlobResult};
use crate::{
    now_secs, validate_name, BlobId, BlobMeta, BlobReader, BlobStore, BlobWriter,
    DEFAULT_READ_CHUNK,
};

#[derive(Debug)]
struct StoredBlob {
    meta: BlobMeta,
    data: Bytes,
}

#[derive(Debug, Default)]
struct State {
    blobs: HashMap<BlobId, StoredBlob>,
    names: HashMap<String, BlobId>,
}

fn lock_poisoned<T>(_: T) -> BlobError {
    BlobError::IoError(std::io::Error::new(
        std::io::ErrorKind::Other,
        "blob store lock poisoned",
    ))
}

/// Blob store keeping content in process memory.
pub struct MemoryBlobStore {
    state: Arc<RwLock<State>>,
    read_chunk: usize,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::with_read_chunk(DEFAULT_READ_CHUNK)
    }

    /// Creates an empty store whose read streams yield `read_chunk`-byte chunks.
    pub fn with_read_chunk(read_chunk: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            read_chunk: read_chunk.max(1),
        }
    }

    /// Number of finished blobs.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.blobs.len()).unwrap_or(0)
    }

    /// Returns true if no blob has been finished.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryWriter {
    state: Arc<RwLock<State>>,
    name: String,
    content_type: String,
    buf: BytesMut,
    hasher: blake3::Hasher,
}

#[async_trait]
impl BlobWriter for MemoryWriter {
    async fn write(&mut self, chunk: Bytes) -> BlobResult<()> {
        self.hasher.update(&chunk);
        self.buf.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> BlobResult<BlobMeta> {
        let this = *self;
        let mut state = this.state.write().map_err(lock_poisoned)?;
        if state.names.contains_key(&this.name) {
            return Err(BlobError::AlreadyExists { name: this.name });
        }
        let data = this.buf.freeze();
        let meta = BlobMeta {
            id: BlobId::generate(),
            name: this.name.clone(),
            content_type: this.content_type,
            size: data.len() as u64,
            checksum: this.hasher.finalize().to_hex().to_string(),
            created_at: now_secs(),
        };
        state.names.insert(this.name, meta.id.clone());
        state.blobs.insert(
            meta.id.clone(),
            StoredBlob {
                meta: meta.clone(),
                data,
            },
        );
        tracing::debug!(id = %meta.id, name = %meta.name, size = meta.size, "blob finished");
        Ok(meta)
    }

    async fn abort(self: Box<Self>) -> BlobResult<()> {
        tracing::debug!(name = %self.name, written = self.buf.len(), "blob write aborted");
        Ok(())
    }

    fn written(&self) -> u64 {
        self.buf.len() as u64
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn open_write(&self, name: &str, content_type: &str) -> BlobResult<Box<dyn BlobWriter>> {
        validate_name(name)?;
        {
            let state = self.state.read().map_err(lock_poisoned)?;
            if state.names.contains_key(name) {
                return Err(BlobError::AlreadyExists {
                    name: name.to_string(),
                });
            }
        }
        Ok(Box::new(MemoryWriter {
            state: self.state.clone(),
            name: name.to_string(),
            content_type: content_type.to_string(),
            buf: BytesMut::new(),
            hasher: blake3::Hasher::new(),
        }))
    }

    async fn open_read(&self, id: &BlobId) -> BlobResult<BlobReader> {
        let state = self.state.read().map_err(lock_poisoned)?;
        let blob = state
            .blobs
            .get(id)
            .ok_or_else(|| BlobError::NotFound { id: id.clone() })?;
        let data = blob.data.clone();
        let chunks: Vec<BlobResult<Bytes>> = (0..data.len())
            .step_by(self.read_chunk)
            .map(|start| Ok(data.slice(start..(start + self.read_chunk).min(data.len()))))
            .collect();
        Ok(BlobReader::new(blob.meta.clone(), stream::iter(chunks).boxed()))
    }

    async fn lookup(&self, name: &str) -> BlobResult<BlobId> {
        let state = self.state.read().map_err(lock_poisoned)?;
        state
            .names
            .get(name)
            .cloned()
            .ok_or_else(|| BlobError::NameNotFound {
                name: name.to_string(),
            })
    }

    async fn stat(&self, id: &BlobId) -> BlobResult<BlobMeta> {
        let state = self.state.read().map_err(lock_poisoned)?;
        state
            .blobs
            .get(id)
            .map(|b| b.meta.clone())
            .ok_or_else(|| BlobError::NotFound { id: id.clone() })
    }
}
