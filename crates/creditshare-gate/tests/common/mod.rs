//! Shared fixtures for the service integration tests: a service builder and
//! storage backends whose failures can be switched on mid-test.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use creditshare_blob::{
    BlobError, BlobId, BlobMeta, BlobReader, BlobResult, BlobStore, BlobWriter, MemoryBlobStore,
};
use creditshare_gate::{FileShare, ShareConfig, UploadRequest};
use creditshare_meta::{BatchOp, FileRecord, KvStore, MemoryKvStore, MetaError, UserId};

/// Service configuration with the given prices and fast timeouts.
pub fn config(download_cost: u64, credit_reward: u64) -> ShareConfig {
    ShareConfig {
        download_cost,
        credit_reward,
        io_timeout_ms: 2_000,
        lock_timeout_ms: 2_000,
        ..ShareConfig::default()
    }
}

/// In-memory service.
pub fn memory_share(config: ShareConfig) -> FileShare {
    FileShare::new(
        Arc::new(MemoryKvStore::new()),
        Arc::new(MemoryBlobStore::new()),
        config,
    )
    .unwrap()
}

/// Creates a user holding exactly `credits`.
pub async fn user_with(share: &FileShare, credits: u64) -> UserId {
    let id = UserId::new();
    share
        .ensure_user(id, &format!("{}@example.com", id))
        .await
        .unwrap();
    if credits > 0 {
        share.credit(id, credits, "test grant").await.unwrap();
    }
    id
}

/// Uploads `content` as `owner` and returns the record.
pub async fn seed_file(share: &FileShare, owner: UserId, name: &str, content: &[u8]) -> FileRecord {
    share
        .upload(
            owner,
            UploadRequest::named(name),
            Bytes::copy_from_slice(content),
        )
        .await
        .unwrap()
}

/// Metadata store whose batch commits fail while armed.
#[derive(Default)]
pub struct FlakyKvStore {
    inner: MemoryKvStore,
    fail_batches: AtomicBool,
}

impl FlakyKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_batches.store(fail, Ordering::SeqCst);
    }
}

impl KvStore for FlakyKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, MetaError> {
        self.inner.get(key)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, MetaError> {
        self.inner.scan_prefix(prefix)
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), MetaError> {
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(MetaError::KvError("injected commit failure".into()));
        }
        self.inner.write_batch(ops)
    }
}

/// Blob store whose writes or reads fail while armed.
#[derive(Default)]
pub struct FlakyBlobStore {
    inner: MemoryBlobStore,
    fail_writes: Arc<AtomicBool>,
    fail_reads: AtomicBool,
}

impl FlakyBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

fn injected(what: &str) -> BlobError {
    BlobError::IoError(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("injected {} failure", what),
    ))
}

struct FlakyWriter {
    inner: Box<dyn BlobWriter>,
    fail: Arc<AtomicBool>,
}

#[async_trait]
impl BlobWriter for FlakyWriter {
    async fn write(&mut self, chunk: Bytes) -> BlobResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(injected("write"));
        }
        self.inner.write(chunk).await
    }

    async fn finish(self: Box<Self>) -> BlobResult<BlobMeta> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(injected("finish"));
        }
        self.inner.finish().await
    }

    async fn abort(self: Box<Self>) -> BlobResult<()> {
        self.inner.abort().await
    }

    fn written(&self) -> u64 {
        self.inner.written()
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn open_write(&self, name: &str, content_type: &str) -> BlobResult<Box<dyn BlobWriter>> {
        let inner = self.inner.open_write(name, content_type).await?;
        Ok(Box::new(FlakyWriter {
            inner,
            fail: self.fail_writes.clone(),
        }))
    }

    async fn open_read(&self, id: &BlobId) -> BlobResult<BlobReader> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(injected("read"));
        }
        self.inner.open_read(id).await
    }

    async fn lookup(&self, name: &str) -> BlobResult<BlobId> {
        self.inner.lookup(name).await
    }

    async fn stat(&self, id: &BlobId) -> BlobResult<BlobMeta> {
        self.inner.stat(id).await
    }
}
