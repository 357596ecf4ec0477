//! Local-filesystem blob store.
//!
//! Layout under the root directory:
//!
//! ```text
//! tmp/<uuid>.part      in-flight writes
//! data/<id>            finished content
//! meta/<id>.json       BlobMeta sidecar
//! names/<blake3(name)> hard link to a file holding <id>; its creation claims the name
//! ```
//!
//! `finish` fsyncs the content and sidecar, renames them into place, and only
//! then claims the name with `hard_link`, which fails if the name is taken.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::StreamExt;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::error::{BlobError, BlobResult};
use crate::{
    now_secs, validate_name, BlobId, BlobMeta, BlobReader, BlobStore, BlobWriter,
    DEFAULT_READ_CHUNK,
};

const TMP_DIR: &str = "tmp";
const DATA_DIR: &str = "data";
const META_DIR: &str = "meta";
const NAMES_DIR: &str = "names";

/// Blob store rooted at a local directory.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    root: PathBuf,
    read_chunk: usize,
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

impl FsBlobStore {
    /// Opens (creating if needed) a store under `root` and clears stale partial writes.
    pub async fn open(root: impl AsRef<Path>) -> BlobResult<Self> {
        Self::open_with_read_chunk(root, DEFAULT_READ_CHUNK).await
    }

    /// Like `open`, with a custom read chunk size.
    pub async fn open_with_read_chunk(root: impl AsRef<Path>, read_chunk: usize) -> BlobResult<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [TMP_DIR, DATA_DIR, META_DIR, NAMES_DIR] {
            fs::create_dir_all(root.join(dir)).await?;
        }

        let mut stale = 0usize;
        let mut entries = fs::read_dir(root.join(TMP_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Err(e) = fs::remove_file(entry.path()).await {
                tracing::warn!(path = %entry.path().display(), error = %e, "could not remove stale partial blob");
            } else {
                stale += 1;
            }
        }
        if stale > 0 {
            tracing::info!(stale, "removed partial blob writes left by a previous run");
        }

        Ok(Self {
            root,
            read_chunk: read_chunk.max(1),
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn data_path(&self, id: &BlobId) -> PathBuf {
        self.root.join(DATA_DIR).join(id.as_str())
    }

    fn meta_path(&self, id: &BlobId) -> PathBuf {
        self.root.join(META_DIR).join(format!("{}.json", id))
    }

    fn name_path(&self, name: &str) -> PathBuf {
        self.root
            .join(NAMES_DIR)
            .join(blake3::hash(name.as_bytes()).to_hex().as_str())
    }

    fn tmp_path(&self, suffix: &str) -> PathBuf {
        self.root
            .join(TMP_DIR)
            .join(format!("{}.{}", uuid::Uuid::new_v4().simple(), suffix))
    }

    async fn read_meta(&self, id: &BlobId) -> BlobResult<BlobMeta> {
        let raw = match fs::read(self.meta_path(id)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlobError::NotFound { id: id.clone() })
            }
            Err(e) => return Err(e.into()),
        };
        let meta: BlobMeta = serde_json::from_slice(&raw)?;
        if &meta.id != id {
            return Err(BlobError::Corrupt {
                id: id.clone(),
                reason: format!("sidecar names blob {}", meta.id),
            });
        }
        Ok(meta)
    }

    async fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
        let mut file = File::create(path).await?;
        file.write_all(contents).await?;
        file.sync_all().await
    }
}

struct FsWriter {
    store: FsBlobStore,
    name: String,
    content_type: String,
    tmp: PathBuf,
    file: File,
    hasher: blake3::Hasher,
    written: u64,
}

impl FsWriter {
    async fn commit(&mut self) -> BlobResult<BlobMeta> {
        self.file.flush().await?;
        self.file.sync_all().await?;

        let meta = BlobMeta {
            id: BlobId::generate(),
            name: self.name.clone(),
            content_type: self.content_type.clone(),
            size: self.written,
            checksum: self.hasher.finalize().to_hex().to_string(),
            created_at: now_secs(),
        };

        let on_disk = fs::metadata(&self.tmp).await?.len();
        if on_disk != meta.size {
            return Err(BlobError::Corrupt {
                id: meta.id,
                reason: format!("wrote {} bytes, {} on disk", meta.size, on_disk),
            });
        }

        let store = &self.store;
        let meta_tmp = store.tmp_path("json");
        FsBlobStore::write_synced(&meta_tmp, &serde_json::to_vec(&meta)?).await?;
        fs::rename(&meta_tmp, store.meta_path(&meta.id)).await?;
        fs::rename(&self.tmp, store.data_path(&meta.id)).await?;
        sync_dir(&store.root.join(META_DIR)).await?;
        sync_dir(&store.root.join(DATA_DIR)).await?;

        let name_tmp = store.tmp_path("name");
        FsBlobStore::write_synced(&name_tmp, meta.id.as_str().as_bytes()).await?;
        let claimed = fs::hard_link(&name_tmp, store.name_path(&meta.name)).await;
        let _ = fs::remove_file(&name_tmp).await;
        match claimed {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(store.data_path(&meta.id)).await;
                let _ = fs::remove_file(store.meta_path(&meta.id)).await;
                return Err(BlobError::AlreadyExists { name: meta.name });
            }
            Err(e) => return Err(e.into()),
        }
        sync_dir(&store.root.join(NAMES_DIR)).await?;

        Ok(meta)
    }
}

#[async_trait]
impl BlobWriter for FsWriter {
    async fn write(&mut self, chunk: Bytes) -> BlobResult<()> {
        self.file.write_all(&chunk).await?;
        self.hasher.update(&chunk);
        self.written += chunk.len() as u64;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> BlobResult<BlobMeta> {
        let mut this = *self;
        match this.commit().await {
            Ok(meta) => {
                tracing::debug!(id = %meta.id, name = %meta.name, size = meta.size, "blob durable");
                Ok(meta)
            }
            Err(e) => {
                let _ = fs::remove_file(&this.tmp).await;
                Err(e)
            }
        }
    }

    async fn abort(self: Box<Self>) -> BlobResult<()> {
        let this = *self;
        drop(this.file);
        match fs::remove_file(&this.tmp).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn written(&self) -> u64 {
        self.written
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn open_write(&self, name: &str, content_type: &str) -> BlobResult<Box<dyn BlobWriter>> {
        validate_name(name)?;
        if fs::try_exists(self.name_path(name)).await? {
            return Err(BlobError::AlreadyExists {
                name: name.to_string(),
            });
        }
        let tmp = self.tmp_path("part");
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
            .await?;
        Ok(Box::new(FsWriter {
            store: self.clone(),
            name: name.to_string(),
            content_type: content_type.to_string(),
            tmp,
            file,
            hasher: blake3::Hasher::new(),
            written: 0,
        }))
    }

    async fn open_read(&self, id: &BlobId) -> BlobResult<BlobReader> {
        let meta = self.read_meta(id).await?;
        let file = match File::open(self.data_path(id)).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlobError::Corrupt {
                    id: id.clone(),
                    reason: "content file missing".to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let stream = ReaderStream::with_capacity(file, self.read_chunk)
            .map(|r| r.map_err(BlobError::from))
            .boxed();
        Ok(BlobReader::new(meta, stream))
    }

    async fn lookup(&self, name: &str) -> BlobResult<BlobId> {
        validate_name(name)?;
        let raw = match fs::read_to_string(self.name_path(name)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlobError::NameNotFound {
                    name: name.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        raw.trim().parse()
    }

    async fn stat(&self, id: &BlobId) -> BlobResult<BlobMeta> {
        self.read_meta(id).await
    }
}
