//! Credit-gated downloads.
//!
//! A first download charges the user and records ownership on both the user
//! and the file in one unit of work; any later download of the same file is
//! free. The byte stream is opened only after that commit, so a delivery
//! failure never undoes a charge and a retry costs nothing.

use std::sync::Arc;
use std::time::Duration;

use creditshare_blob::{BlobReader, BlobStore};
use creditshare_meta::ledger::apply_debit;
use creditshare_meta::{FileId, FileRecord, LockKey, Repository, Transaction, UserId};

use crate::bounded::{bound_stream, with_timeout};
use crate::error::{Result, ShareError};

/// A granted download.
#[derive(Debug)]
pub struct Download {
    /// The file as committed by this request.
    pub file: FileRecord,
    /// Ownership was recorded by this request rather than an earlier one.
    pub granted: bool,
    /// The debit entry, if this request charged.
    pub charge: Option<Transaction>,
    /// File content.
    pub body: BlobReader,
}

impl Download {
    /// True if this request cost the user credits.
    pub fn charged(&self) -> bool {
        self.charge.is_some()
    }
}

/// Decides whether a download is free or charged and hands out the stream.
#[derive(Clone)]
pub struct DownloadGate {
    repo: Arc<Repository>,
    blobs: Arc<dyn BlobStore>,
    cost: u64,
    io_timeout: Duration,
}

impl DownloadGate {
    /// Creates a gate charging `cost` credits per first download.
    pub fn new(
        repo: Arc<Repository>,
        blobs: Arc<dyn BlobStore>,
        cost: u64,
        io_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            blobs,
            cost,
            io_timeout,
        }
    }

    /// Credits charged for a first download.
    pub fn cost(&self) -> u64 {
        self.cost
    }

    /// Grants the file to the user, charging once, and opens its content.
    pub async fn request_download(&self, user: UserId, file: FileId) -> Result<Download> {
        let account = self.repo.user(user)?;
        let record = self.repo.file(file)?;

        let (record, granted, charge) = if record.downloaded_by(user) {
            tracing::debug!(user = %user, file = %file, "already owned, free download");
            (record, false, None)
        } else {
            if account.credits < self.cost {
                return Err(ShareError::InsufficientCredits {
                    required: self.cost,
                    available: account.credits,
                });
            }
            self.grant(user, file).await?
        };

        let body = self.open(&record).await.map_err(|e| {
            tracing::warn!(
                user = %user,
                file = %file,
                charged = charge.is_some(),
                error = %e,
                "download granted but content could not be opened"
            );
            ShareError::Delivery {
                file,
                reason: e.to_string(),
            }
        })?;

        Ok(Download {
            file: record,
            granted,
            charge,
            body,
        })
    }

    /// Records ownership and charges in one unit of work.
    ///
    /// State is re-read under the locks. If a concurrent request recorded
    /// ownership first, nothing is written and nothing is charged.
    async fn grant(
        &self,
        user: UserId,
        file: FileId,
    ) -> Result<(FileRecord, bool, Option<Transaction>)> {
        let mut uow = self
            .repo
            .begin(&[LockKey::User(user), LockKey::File(file)])
            .await?;
        let mut account = uow.load_user(user)?;
        let mut record = uow.load_file(file)?;

        if record.downloaded_by(user) {
            tracing::debug!(user = %user, file = %file, "ownership recorded concurrently, not charging");
            return Ok((record, false, None));
        }

        let charge = if self.cost > 0 {
            let reason = format!("Downloaded file {}", record.name);
            Some(apply_debit(&mut uow, &mut account, self.cost, &reason)?)
        } else {
            None
        };

        record.downloaders.insert(user);
        record.downloads += 1;
        account.downloaded.insert(file);
        uow.stage_user(&account)?;
        uow.stage_file(&record)?;
        uow.commit()?;

        tracing::info!(
            user = %user,
            file = %file,
            cost = self.cost,
            balance = account.credits,
            downloads = record.downloads,
            "download charged"
        );
        Ok((record, true, charge))
    }

    async fn open(&self, record: &FileRecord) -> Result<BlobReader> {
        let id = with_timeout(self.io_timeout, "lookup", self.blobs.lookup(&record.blob_name)).await?;
        let reader = with_timeout(self.io_timeout, "open_read", self.blobs.open_read(&id)).await?;
        Ok(bound_stream(reader, self.io_timeout))
    }
}
