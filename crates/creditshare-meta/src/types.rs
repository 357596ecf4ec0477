use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a user account, issued by the auth collaborator
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a fresh random UserId
    pub fn new() -> Self {
        UserId(Uuid::new_v4())
    }

    /// Wraps an existing UUID
    pub fn from_uuid(id: Uuid) -> Self {
        UserId(id)
    }

    /// Returns the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = MetaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(UserId)
            .map_err(|_| MetaError::InvalidId(s.to_string()))
    }
}

/// Identifier of a catalog entry (one uploaded file)
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(Uuid);

impl FileId {
    /// Creates a fresh random FileId
    pub fn new() -> Self {
        FileId(Uuid::new_v4())
    }

    /// Wraps an existing UUID
    pub fn from_uuid(id: Uuid) -> Self {
        FileId(id)
    }

    /// Returns the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FileId {
    type Err = MetaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(FileId)
            .map_err(|_| MetaError::InvalidId(s.to_string()))
    }
}

/// Identifier of a ledger transaction record
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId(Uuid);

impl TxnId {
    /// Creates a fresh random TxnId
    pub fn new() -> Self {
        TxnId(Uuid::new_v4())
    }
}

impl Default for TxnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

/// Represents a point in time with second and nanosecond precision
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since Unix epoch
    pub secs: u64,
    /// Nanoseconds within the second
    pub nanos: u32,
}

impl Timestamp {
    /// Returns the current timestamp
    pub fn now() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            secs: now.as_secs(),
            nanos: now.subsec_nanos(),
        }
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.secs
            .cmp(&other.secs)
            .then_with(|| self.nanos.cmp(&other.nanos))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A user account with its credit balance and owned files
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Account identifier
    pub id: UserId,
    /// Display identifier shown next to the user's uploads
    pub email: String,
    /// Current credit balance, never negative
    pub credits: u64,
    /// Files this user has downloaded; mirrors `FileRecord::downloaders`
    pub downloaded: BTreeSet<FileId>,
    /// When the account was first seen
    pub created_at: Timestamp,
}

impl User {
    /// Creates a user with the given starting balance
    pub fn new(id: UserId, email: &str, credits: u64) -> Self {
        Self {
            id,
            email: email.to_string(),
            credits,
            downloaded: BTreeSet::new(),
            created_at: Timestamp::now(),
        }
    }

    /// Returns true if the user has already downloaded the file
    pub fn owns(&self, file: FileId) -> bool {
        self.downloaded.contains(&file)
    }
}

/// A problem report filed against a downloaded file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueReport {
    /// Who filed the report
    pub reporter: UserId,
    /// Category chosen by the reporter (e.g. "corrupt", "mislabeled")
    pub issue_type: String,
    /// Free-text details
    pub description: String,
    /// When the report was filed
    pub reported_at: Timestamp,
}

/// Catalog metadata for one uploaded file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Catalog identifier
    pub id: FileId,
    /// Name under which the content was written to the blob store
    pub blob_name: String,
    /// Display name
    pub name: String,
    /// Uploading user
    pub owner: UserId,
    /// Content length in bytes
    pub size: u64,
    /// MIME type supplied at upload
    pub content_type: String,
    /// Free-text description supplied at upload
    pub description: String,
    /// Hex-encoded blake3 digest of the content
    pub checksum: String,
    /// Upload time
    pub uploaded_at: Timestamp,
    /// Users who have downloaded this file; mirrors `User::downloaded`
    pub downloaders: BTreeSet<UserId>,
    /// Number of distinct downloaders
    pub downloads: u64,
    /// Number of likes
    pub likes: u64,
    /// Users who liked this file
    pub liked_by: BTreeSet<UserId>,
    /// Reports in filing order
    pub issues: Vec<IssueReport>,
}

impl FileRecord {
    /// Returns true if the user is in the downloader set
    pub fn downloaded_by(&self, user: UserId) -> bool {
        self.downloaders.contains(&user)
    }
}

/// Direction of a ledger entry
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Balance increased
    Credit,
    /// Balance decreased
    Debit,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Credit => write!(f, "credit"),
            TransactionKind::Debit => write!(f, "debit"),
        }
    }
}

/// Append-only audit record of one balance change
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Record identifier
    pub id: TxnId,
    /// Store-wide sequence number; orders history
    pub seq: u64,
    /// Affected user
    pub user: UserId,
    /// Signed amount: positive for credits, negative for debits
    pub amount: i64,
    /// Direction of the change
    pub kind: TransactionKind,
    /// Human-readable reason
    pub description: String,
    /// When the change was committed
    pub created_at: Timestamp,
}

/// Error types for the metadata layer
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    /// The requested user does not exist.
    #[error("user {0} not found")]
    UserNotFound(UserId),

    /// The requested file does not exist.
    #[error("file {0} not found")]
    FileNotFound(FileId),

    /// A debit exceeds the user's balance.
    #[error("user {user} has {available} credits, {required} required")]
    InsufficientCredits {
        /// Debited user
        user: UserId,
        /// Credits the operation needs
        required: u64,
        /// Credits the user holds
        available: u64,
    },

    /// The user has not downloaded the file and may not act on it.
    #[error("user {user} has not downloaded file {file}")]
    NotDownloaded {
        /// Acting user
        user: UserId,
        /// Target file
        file: FileId,
    },

    /// A string could not be parsed as an identifier.
    #[error("malformed identifier '{0}'")]
    InvalidId(String),

    /// A caller-supplied argument was rejected.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Per-key locks could not be acquired in time.
    #[error("timed out after {0:?} waiting for record locks")]
    LockTimeout(std::time::Duration),

    /// A record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// An error occurred in the KV store layer.
    #[error("kv store error: {0}")]
    KvError(String),

    /// A lower-level I/O error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

impl From<bincode::Error> for MetaError {
    fn from(e: bincode::Error) -> Self {
        MetaError::Codec(e.to_string())
    }
}
