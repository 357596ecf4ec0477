//! File catalog: metadata records, listing, likes and issue reports.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::locking::LockKey;
use crate::repo::Repository;
use crate::types::{FileId, FileRecord, IssueReport, MetaError, Timestamp, UserId};
use crate::unit_of_work::UnitOfWork;

/// Owner label shown when the owning user can't be resolved.
pub const UNKNOWN_OWNER: &str = "Unknown";

/// Listing order.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    /// Most recent upload first.
    #[default]
    Newest,
    /// Oldest upload first.
    Oldest,
    /// Highest download count first.
    MostDownloads,
    /// Highest like count first.
    MostLikes,
}

impl FromStr for SortBy {
    type Err = MetaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newest" => Ok(SortBy::Newest),
            "oldest" => Ok(SortBy::Oldest),
            "most_downloads" => Ok(SortBy::MostDownloads),
            "most_likes" => Ok(SortBy::MostLikes),
            other => Err(MetaError::InvalidInput(format!("unknown sort order '{}'", other))),
        }
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SortBy::Newest => "newest",
            SortBy::Oldest => "oldest",
            SortBy::MostDownloads => "most_downloads",
            SortBy::MostLikes => "most_likes",
        };
        f.write_str(s)
    }
}

/// Listing filter. Unset fields don't constrain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileFilter {
    /// Exact content-type match.
    pub file_type: Option<String>,
    /// Inclusive lower bound on size in bytes.
    pub min_size: Option<u64>,
    /// Inclusive upper bound on size in bytes.
    pub max_size: Option<u64>,
    /// Result order.
    pub sort_by: SortBy,
}

impl FileFilter {
    /// Returns true if `file` passes every set constraint.
    pub fn matches(&self, file: &FileRecord) -> bool {
        if let Some(ref t) = self.file_type {
            if &file.content_type != t {
                return false;
            }
        }
        if let Some(min) = self.min_size {
            if file.size < min {
                return false;
            }
        }
        if let Some(max) = self.max_size {
            if file.size > max {
                return false;
            }
        }
        true
    }
}

/// A file record with its owner resolved for display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListing {
    /// The record.
    pub file: FileRecord,
    /// Owner email, or `UNKNOWN_OWNER`.
    pub owner_display: String,
}

/// Fields supplied when a new file is catalogued.
#[derive(Clone, Debug)]
pub struct NewFile {
    /// Catalog identifier, chosen before the blob is written.
    pub id: FileId,
    /// Name the blob was written under.
    pub blob_name: String,
    /// Display name.
    pub name: String,
    /// Uploading user.
    pub owner: UserId,
    /// Size of the stored blob.
    pub size: u64,
    /// MIME type.
    pub content_type: String,
    /// Free-text description.
    pub description: String,
    /// Hex blake3 digest of the content.
    pub checksum: String,
}

/// Stages creation of a file record. Fails if the identifier is taken.
pub fn stage_create(uow: &mut UnitOfWork<'_>, new: NewFile) -> Result<FileRecord, MetaError> {
    if uow.find_file(new.id)?.is_some() {
        return Err(MetaError::InvalidInput(format!("file {} already exists", new.id)));
    }
    let record = FileRecord {
        id: new.id,
        blob_name: new.blob_name,
        name: new.name,
        owner: new.owner,
        size: new.size,
        content_type: new.content_type,
        description: new.description,
        checksum: new.checksum,
        uploaded_at: Timestamp::now(),
        downloaders: BTreeSet::new(),
        downloads: 0,
        likes: 0,
        liked_by: BTreeSet::new(),
        issues: Vec::new(),
    };
    uow.stage_file(&record)?;
    Ok(record)
}

/// Read and update access to file records.
#[derive(Clone)]
pub struct Catalog {
    repo: Arc<Repository>,
}

impl Catalog {
    /// Creates a catalog over the repository.
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// One file record.
    pub fn get(&self, id: FileId) -> Result<FileRecord, MetaError> {
        self.repo.file(id)
    }

    /// Filtered, sorted listing with owners resolved.
    ///
    /// Ties keep key order, so the result is deterministic for a given store.
    pub fn list(&self, filter: &FileFilter) -> Result<Vec<FileListing>, MetaError> {
        let mut files: Vec<FileRecord> = self
            .repo
            .files()?
            .into_iter()
            .filter(|f| filter.matches(f))
            .collect();

        match filter.sort_by {
            SortBy::Newest => files.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at)),
            SortBy::Oldest => files.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at)),
            SortBy::MostDownloads => files.sort_by(|a, b| b.downloads.cmp(&a.downloads)),
            SortBy::MostLikes => files.sort_by(|a, b| b.likes.cmp(&a.likes)),
        }

        let mut owners: HashMap<UserId, String> = HashMap::new();
        let mut listings = Vec::with_capacity(files.len());
        for file in files {
            let owner_display = match owners.get(&file.owner) {
                Some(name) => name.clone(),
                None => {
                    let name = match self.repo.find_user(file.owner) {
                        Ok(Some(u)) => u.email,
                        Ok(None) => UNKNOWN_OWNER.to_string(),
                        Err(e) => {
                            tracing::warn!(owner = %file.owner, error = %e, "owner lookup failed");
                            UNKNOWN_OWNER.to_string()
                        }
                    };
                    owners.insert(file.owner, name.clone());
                    name
                }
            };
            listings.push(FileListing {
                file,
                owner_display,
            });
        }
        Ok(listings)
    }

    /// Appends an issue report. The reporter must have downloaded the file.
    pub async fn report_issue(
        &self,
        user: UserId,
        file: FileId,
        issue_type: &str,
        description: &str,
    ) -> Result<IssueReport, MetaError> {
        if issue_type.trim().is_empty() {
            return Err(MetaError::InvalidInput("issue type must not be empty".into()));
        }
        let mut uow = self.repo.begin(&[LockKey::File(file)]).await?;
        uow.load_user(user)?;
        let mut record = uow.load_file(file)?;
        if !record.downloaded_by(user) {
            return Err(MetaError::NotDownloaded { user, file });
        }
        let report = IssueReport {
            reporter: user,
            issue_type: issue_type.to_string(),
            description: description.to_string(),
            reported_at: Timestamp::now(),
        };
        record.issues.push(report.clone());
        uow.stage_file(&record)?;
        uow.commit()?;
        tracing::info!(user = %user, file = %file, issue_type, "issue reported");
        Ok(report)
    }

    /// Records a like. Liking twice is a no-op; returns the like count.
    pub async fn like(&self, user: UserId, file: FileId) -> Result<u64, MetaError> {
        let mut uow = self.repo.begin(&[LockKey::File(file)]).await?;
        uow.load_user(user)?;
        let mut record = uow.load_file(file)?;
        if record.liked_by.insert(user) {
            record.likes += 1;
            uow.stage_file(&record)?;
            uow.commit()?;
            tracing::debug!(user = %user, file = %file, likes = record.likes, "file liked");
        }
        Ok(record.likes)
    }
}
