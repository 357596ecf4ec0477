//! The `FileShare` facade: one entry point wiring storage, ledger, catalog,
//! download gate and upload handler from a `ShareConfig`.

use std::sync::Arc;

use bytes::Bytes;
use creditshare_blob::{BlobStore, FsBlobStore, MemoryBlobStore};
use creditshare_meta::ledger::apply_credit;
use creditshare_meta::{
    Catalog, FileFilter, FileId, FileListing, FileRecord, IssueReport, KvStore, Ledger, LockKey,
    MemoryKvStore, PersistentKvStore, Repository, Transaction, User, UserId,
};
use futures::Stream;

use crate::config::ShareConfig;
use crate::download::{Download, DownloadGate};
use crate::error::{Result, ShareError};
use crate::upload::{UploadHandler, UploadLimits, UploadRequest};

/// Directory under `data_dir` holding the metadata log and checkpoint.
pub const META_DIR: &str = "meta";
/// Directory under `data_dir` holding blob content.
pub const BLOB_DIR: &str = "blobs";

/// File-sharing service with credit accounting.
pub struct FileShare {
    config: ShareConfig,
    repo: Arc<Repository>,
    ledger: Ledger,
    catalog: Catalog,
    downloads: DownloadGate,
    uploads: UploadHandler,
    durable: Option<Arc<PersistentKvStore>>,
}

impl FileShare {
    /// Builds the service over injected storage.
    pub fn new(
        store: Arc<dyn KvStore>,
        blobs: Arc<dyn BlobStore>,
        config: ShareConfig,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let repo = Arc::new(Repository::new(store, config.lock_timeout())?);
        let downloads = DownloadGate::new(
            repo.clone(),
            blobs.clone(),
            config.download_cost,
            config.io_timeout(),
        );
        let uploads = UploadHandler::new(
            repo.clone(),
            blobs,
            config.credit_reward,
            UploadLimits {
                max_bytes: config.max_upload_bytes,
                chunk_size: config.chunk_size,
                io_timeout: config.io_timeout(),
            },
        );
        Ok(Self {
            ledger: Ledger::new(repo.clone()),
            catalog: Catalog::new(repo.clone()),
            repo,
            downloads,
            uploads,
            config,
            durable: None,
        })
    }

    /// Opens the backends named by the configuration.
    ///
    /// With a `data_dir`, metadata lives in a write-ahead-logged store under
    /// `meta/` and content under `blobs/`; without one, both are in memory.
    pub async fn open(config: ShareConfig) -> anyhow::Result<Self> {
        match config.data_dir.clone() {
            Some(dir) => {
                let store = Arc::new(PersistentKvStore::open(&dir.join(META_DIR))?);
                let blobs = Arc::new(FsBlobStore::open(&dir.join(BLOB_DIR)).await?);
                tracing::info!(data_dir = %dir.display(), "opened on-disk storage");
                let mut share = Self::new(store.clone(), blobs, config)?;
                share.durable = Some(store);
                Ok(share)
            }
            None => {
                tracing::info!("no data_dir configured, using in-memory storage");
                Self::new(
                    Arc::new(MemoryKvStore::new()),
                    Arc::new(MemoryBlobStore::new()),
                    config,
                )
            }
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &ShareConfig {
        &self.config
    }

    /// Returns the user, creating it with `initial_credits` on first access.
    pub async fn ensure_user(&self, id: UserId, email: &str) -> Result<User> {
        let email = email.trim();
        if email.is_empty() {
            return Err(ShareError::InvalidInput("email must not be empty".into()));
        }
        let mut uow = self.repo.begin(&[LockKey::User(id)]).await?;
        if let Some(existing) = uow.find_user(id)? {
            return Ok(existing);
        }
        let mut user = User::new(id, email, 0);
        if self.config.initial_credits > 0 {
            apply_credit(&mut uow, &mut user, self.config.initial_credits, "Initial credits")?;
        }
        uow.stage_user(&user)?;
        uow.commit()?;
        tracing::info!(user = %id, email, credits = user.credits, "user created");
        Ok(user)
    }

    /// One user record.
    pub fn get_user(&self, id: UserId) -> Result<User> {
        Ok(self.repo.user(id)?)
    }

    /// Stores content and rewards the uploader.
    pub async fn upload(&self, user: UserId, req: UploadRequest, data: Bytes) -> Result<FileRecord> {
        self.uploads.upload(user, req, data).await
    }

    /// Streaming variant of [`FileShare::upload`].
    pub async fn upload_stream<S>(&self, user: UserId, req: UploadRequest, body: S) -> Result<FileRecord>
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + Unpin,
    {
        self.uploads.upload_stream(user, req, body).await
    }

    /// Grants and opens a file, charging on first download.
    pub async fn request_download(&self, user: UserId, file: FileId) -> Result<Download> {
        self.downloads.request_download(user, file).await
    }

    /// Filtered, sorted catalog listing.
    pub fn list_files(&self, filter: &FileFilter) -> Result<Vec<FileListing>> {
        Ok(self.catalog.list(filter)?)
    }

    /// One file record.
    pub fn get_file(&self, file: FileId) -> Result<FileRecord> {
        Ok(self.catalog.get(file)?)
    }

    /// Files a report against a file the user has downloaded.
    pub async fn report_issue(
        &self,
        user: UserId,
        file: FileId,
        issue_type: &str,
        description: &str,
    ) -> Result<IssueReport> {
        Ok(self
            .catalog
            .report_issue(user, file, issue_type, description)
            .await?)
    }

    /// Likes a file once per user; returns the like count.
    pub async fn like_file(&self, user: UserId, file: FileId) -> Result<u64> {
        Ok(self.catalog.like(user, file).await?)
    }

    /// Current balance.
    pub fn balance(&self, user: UserId) -> Result<u64> {
        Ok(self.ledger.balance(user)?)
    }

    /// Ledger entries in commit order.
    pub fn history(&self, user: UserId) -> Result<Vec<Transaction>> {
        Ok(self.ledger.history(user)?)
    }

    /// Grants credits outside the upload path.
    pub async fn credit(&self, user: UserId, amount: u64, reason: &str) -> Result<Transaction> {
        Ok(self.ledger.credit(user, amount, reason).await?)
    }

    /// Takes credits outside the download path.
    pub async fn debit(&self, user: UserId, amount: u64, reason: &str) -> Result<Transaction> {
        Ok(self.ledger.debit(user, amount, reason).await?)
    }

    /// Folds the metadata log into a checkpoint and drops idle lock entries.
    pub fn compact(&self) -> Result<usize> {
        if let Some(store) = &self.durable {
            store.checkpoint()?;
        }
        let pruned = self.repo.prune_locks();
        tracing::debug!(pruned, "compacted");
        Ok(pruned)
    }
}
