//! Rewarded uploads.
//!
//! Content goes to the blob store first; the catalog record and the
//! uploader's reward are committed together only after `finish()` reports
//! the blob durable.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use creditshare_blob::{BlobError, BlobMeta, BlobStore, BlobWriter};
use creditshare_meta::catalog::{stage_create, NewFile};
use creditshare_meta::ledger::apply_credit;
use creditshare_meta::{FileId, FileRecord, LockKey, Repository, UserId};
use futures::stream::{self, Stream, StreamExt};

use crate::bounded::with_timeout;
use crate::error::{Result, ShareError};

/// Content type recorded when the caller supplies none.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Descriptive fields of an upload.
#[derive(Clone, Debug, Default)]
pub struct UploadRequest {
    /// Display name.
    pub name: String,
    /// MIME type; empty means `DEFAULT_CONTENT_TYPE`.
    pub content_type: String,
    /// Free-text description.
    pub description: String,
}

impl UploadRequest {
    /// Request with just a display name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Limits applied by the upload handler.
#[derive(Clone, Copy, Debug)]
pub struct UploadLimits {
    /// Largest accepted payload.
    pub max_bytes: u64,
    /// Size of pieces handed to the blob writer.
    pub chunk_size: usize,
    /// Bound on each blob call.
    pub io_timeout: Duration,
}

/// Stores uploaded content and credits the uploader.
#[derive(Clone)]
pub struct UploadHandler {
    repo: Arc<Repository>,
    blobs: Arc<dyn BlobStore>,
    reward: u64,
    limits: UploadLimits,
}

impl UploadHandler {
    /// Creates a handler granting `reward` credits per upload.
    pub fn new(
        repo: Arc<Repository>,
        blobs: Arc<dyn BlobStore>,
        reward: u64,
        limits: UploadLimits,
    ) -> Self {
        Self {
            repo,
            blobs,
            reward,
            limits,
        }
    }

    /// Uploads an in-memory payload.
    pub async fn upload(&self, user: UserId, req: UploadRequest, data: Bytes) -> Result<FileRecord> {
        if data.len() as u64 > self.limits.max_bytes {
            return Err(ShareError::InvalidInput(format!(
                "upload of {} bytes exceeds the {} byte limit",
                data.len(),
                self.limits.max_bytes
            )));
        }
        let chunk = self.limits.chunk_size.max(1);
        let pieces: Vec<std::io::Result<Bytes>> = (0..data.len())
            .step_by(chunk)
            .map(|start| Ok(data.slice(start..(start + chunk).min(data.len()))))
            .collect();
        self.upload_stream(user, req, stream::iter(pieces)).await
    }

    /// Uploads content arriving as a stream of chunks.
    ///
    /// The size limit is enforced while streaming; an oversize or failed
    /// body aborts the blob and leaves no record.
    pub async fn upload_stream<S>(&self, user: UserId, req: UploadRequest, body: S) -> Result<FileRecord>
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + Unpin,
    {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(ShareError::InvalidInput("file name must not be empty".into()));
        }
        let content_type = match req.content_type.trim() {
            "" => DEFAULT_CONTENT_TYPE,
            ct => ct,
        };
        self.repo.user(user)?;

        let id = FileId::new();
        let blob = self.write_blob(&id.to_string(), content_type, body).await?;

        let new = NewFile {
            id,
            blob_name: blob.name.clone(),
            name: name.to_string(),
            owner: user,
            size: blob.size,
            content_type: content_type.to_string(),
            description: req.description.clone(),
            checksum: blob.checksum.clone(),
        };
        match self.record(user, new).await {
            Ok(record) => Ok(record),
            Err(e) => {
                tracing::warn!(
                    user = %user,
                    file = %id,
                    blob = %blob.id,
                    size = blob.size,
                    error = %e,
                    "catalog commit failed, blob left orphaned"
                );
                Err(e)
            }
        }
    }

    async fn write_blob<S>(&self, name: &str, content_type: &str, mut body: S) -> Result<BlobMeta>
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + Unpin,
    {
        let limit = self.limits.io_timeout;
        let mut writer = with_timeout(limit, "open_write", self.blobs.open_write(name, content_type)).await?;

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => return Err(abort(writer, ShareError::Blob(BlobError::IoError(e))).await),
            };
            if writer.written() + chunk.len() as u64 > self.limits.max_bytes {
                let err = ShareError::InvalidInput(format!(
                    "upload exceeds the {} byte limit",
                    self.limits.max_bytes
                ));
                return Err(abort(writer, err).await);
            }
            let written = with_timeout(limit, "write", writer.write(chunk)).await;
            if let Err(e) = written {
                return Err(abort(writer, e).await);
            }
        }

        let meta = with_timeout(limit, "finish", writer.finish()).await?;
        tracing::debug!(blob = %meta.id, name, size = meta.size, "upload content stored");
        Ok(meta)
    }

    /// Creates the record and credits the uploader in one unit of work.
    async fn record(&self, user: UserId, new: NewFile) -> Result<FileRecord> {
        let file = new.id;
        let mut uow = self
            .repo
            .begin(&[LockKey::User(user), LockKey::File(file)])
            .await?;
        let mut account = uow.load_user(user)?;
        let record = stage_create(&mut uow, new)?;
        if self.reward > 0 {
            let reason = format!("Uploaded file {}", record.name);
            apply_credit(&mut uow, &mut account, self.reward, &reason)?;
            uow.stage_user(&account)?;
        }
        uow.commit()?;

        tracing::info!(
            user = %user,
            file = %file,
            size = record.size,
            reward = self.reward,
            balance = account.credits,
            "upload recorded"
        );
        Ok(record)
    }
}

async fn abort(writer: Box<dyn BlobWriter>, err: ShareError) -> ShareError {
    let written = writer.written();
    if let Err(e) = writer.abort().await {
        tracing::warn!(error = %e, "failed to discard partial upload");
    }
    tracing::debug!(written, error = %err, "upload aborted");
    err
}
