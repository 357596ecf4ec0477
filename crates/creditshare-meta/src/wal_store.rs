//! Persistent file-backed KV store with WAL and checkpoint support.
//!
//! Uses an in-memory BTreeMap as read cache, a write-ahead log (WAL) for durability,
//! and checkpoint files for fast recovery. Each WAL record carries a whole
//! write batch, so replay never applies half of a unit of work.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::kvstore::{apply_ops, prefix_scan, BatchOp, KvPair, KvStore, Value};
use crate::types::MetaError;

const WAL_FILENAME: &str = "wal.bin";
const CHECKPOINT_FILENAME: &str = "checkpoint.bin";

#[derive(Debug, Serialize, Deserialize, Clone)]
enum WalOp {
    Put { key: Vec<u8>, value: Vec<u8> },
}

impl From<&BatchOp> for WalOp {
    fn from(op: &BatchOp) -> Self {
        match op {
            BatchOp::Put { key, value } => WalOp::Put {
                key: key.clone(),
                value: value.clone(),
            },
        }
    }
}

impl From<WalOp> for BatchOp {
    fn from(op: WalOp) -> Self {
        match op {
            WalOp::Put { key, value } => BatchOp::Put { key, value },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WalEntry {
    seq: u64,
    ops: Vec<WalOp>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Checkpoint {
    seq: u64,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

/// Persistent file-backed KV store.
///
/// On open, loads the last checkpoint and replays any remaining WAL entries.
/// A record torn by a crash mid-append is discarded and cut off the log; it
/// was never acknowledged.
pub struct PersistentKvStore {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    wal: Arc<Mutex<WalWriter>>,
    checkpoint_dir: PathBuf,
    seq: Arc<RwLock<u64>>,
}

/// Appends frames to the log and keeps the file ending on a frame boundary.
struct WalWriter {
    file: File,
    /// Length of the log up to the last acknowledged frame.
    len: u64,
    /// Set when a failed append could not be cut back off the log.
    poisoned: bool,
    #[cfg(test)]
    faults: WalFaults,
}

#[cfg(test)]
#[derive(Default)]
struct WalFaults {
    /// Write only this many bytes of the next frame, then fail.
    torn_write: Option<usize>,
    /// Fail the rollback of the next failed append.
    rollback: bool,
}

impl WalWriter {
    /// Opens the log and drops anything past `valid_len`.
    fn open(path: &Path, valid_len: u64) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > valid_len {
            tracing::warn!(
                discarded = on_disk - valid_len,
                "truncating torn WAL tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(WalWriter {
            file,
            len: valid_len,
            poisoned: false,
            #[cfg(test)]
            faults: WalFaults::default(),
        })
    }

    fn append(&mut self, entry: &WalEntry) -> Result<(), MetaError> {
        if self.poisoned {
            return Err(MetaError::KvError(
                "write-ahead log holds an unrecoverable partial record".to_string(),
            ));
        }
        let encoded = bincode::serialize(entry)
            .map_err(|e| MetaError::KvError(format!("failed to serialize WAL entry: {}", e)))?;
        let len_bytes = (encoded.len() as u32).to_le_bytes();
        let mut frame = Vec::with_capacity(4 + encoded.len());
        frame.extend_from_slice(&len_bytes);
        frame.extend_from_slice(&encoded);

        match self.write_frame(&frame) {
            Ok(()) => {
                self.len += frame.len() as u64;
                Ok(())
            }
            Err(e) => {
                // Whatever reached the file must not survive: later frames
                // would land behind it and be lost on replay.
                if let Err(undo) = self.rollback() {
                    self.poisoned = true;
                    tracing::error!(
                        error = %undo,
                        len = self.len,
                        "failed to cut partial record off WAL, rejecting further commits"
                    );
                }
                Err(MetaError::IoError(e))
            }
        }
    }

    fn write_frame(&mut self, frame: &[u8]) -> std::io::Result<()> {
        #[cfg(test)]
        if let Some(keep) = self.faults.torn_write.take() {
            self.file.write_all(&frame[..keep.min(frame.len())])?;
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected write failure",
            ));
        }
        self.file.write_all(frame)?;
        self.file.sync_all()
    }

    fn rollback(&mut self) -> std::io::Result<()> {
        #[cfg(test)]
        if std::mem::take(&mut self.faults.rollback) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected rollback failure",
            ));
        }
        self.file.set_len(self.len)?;
        self.file.sync_all()
    }

    fn truncate(&mut self) -> std::io::Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.len = 0;
        self.poisoned = false;
        Ok(())
    }
}

impl PersistentKvStore {
    /// Opens or creates a persistent KV store in the given directory.
    ///
    /// Loads the checkpoint if available, then replays WAL entries for recovery.
    pub fn open(dir: &Path) -> Result<Self, MetaError> {
        fs::create_dir_all(dir)?;

        let wal_path = dir.join(WAL_FILENAME);
        let checkpoint_path = dir.join(CHECKPOINT_FILENAME);

        let mut data = BTreeMap::new();
        let mut seq = load_checkpoint(&checkpoint_path, &mut data)?;
        let valid_len = replay_wal(&wal_path, &mut data, &mut seq)?;
        let wal = WalWriter::open(&wal_path, valid_len)?;

        tracing::debug!(dir = %dir.display(), seq, "opened persistent kv store");
        Ok(Self {
            data: Arc::new(RwLock::new(data)),
            wal: Arc::new(Mutex::new(wal)),
            checkpoint_dir: dir.to_path_buf(),
            seq: Arc::new(RwLock::new(seq)),
        })
    }

    /// Creates a checkpoint of the current state and truncates the WAL.
    pub fn checkpoint(&self) -> Result<(), MetaError> {
        // Hold the WAL lock for the whole checkpoint so no batch lands between
        // the snapshot and the truncate.
        let mut wal = self
            .wal
            .lock()
            .map_err(|e| MetaError::KvError(e.to_string()))?;
        let data = self
            .data
            .read()
            .map_err(|e| MetaError::KvError(e.to_string()))?;
        let seq = *self
            .seq
            .read()
            .map_err(|e| MetaError::KvError(e.to_string()))?;

        let entries: Vec<(Vec<u8>, Vec<u8>)> =
            data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        drop(data);

        let checkpoint = Checkpoint { seq, entries };

        let encoded = bincode::serialize(&checkpoint)
            .map_err(|e| MetaError::KvError(format!("failed to serialize checkpoint: {}", e)))?;

        let checkpoint_path = self.checkpoint_dir.join(CHECKPOINT_FILENAME);
        let mut tmp_path = checkpoint_path.clone();
        tmp_path.set_extension("tmp");

        {
            let mut tmp_file = File::create(&tmp_path)?;
            tmp_file.write_all(&encoded)?;
            tmp_file.sync_all()?;
        }

        fs::rename(&tmp_path, &checkpoint_path)?;
        wal.truncate()?;

        tracing::debug!(seq, "checkpoint written");
        Ok(())
    }

    fn commit(&self, ops: Vec<BatchOp>) -> Result<(), MetaError> {
        let mut wal = self
            .wal
            .lock()
            .map_err(|e| MetaError::KvError(e.to_string()))?;
        let mut seq = self
            .seq
            .write()
            .map_err(|e| MetaError::KvError(e.to_string()))?;
        let entry = WalEntry {
            seq: *seq + 1,
            ops: ops.iter().map(WalOp::from).collect(),
        };
        wal.append(&entry)?;
        *seq = entry.seq;
        drop(seq);

        let mut data = self
            .data
            .write()
            .map_err(|e| MetaError::KvError(e.to_string()))?;
        apply_ops(&mut data, ops);
        Ok(())
    }
}

/// Loads the checkpoint into `data`; returns the sequence it covers.
fn load_checkpoint(path: &Path, data: &mut BTreeMap<Vec<u8>, Vec<u8>>) -> Result<u64, MetaError> {
    if !path.exists() {
        return Ok(0);
    }

    let mut contents = Vec::new();
    File::open(path)?.read_to_end(&mut contents)?;

    if contents.is_empty() {
        return Ok(0);
    }

    let checkpoint: Checkpoint = bincode::deserialize(&contents)
        .map_err(|e| MetaError::KvError(format!("failed to deserialize checkpoint: {}", e)))?;
    data.extend(checkpoint.entries);
    Ok(checkpoint.seq)
}

/// Applies WAL batches newer than `seq`; returns the length of the log up to
/// the last complete frame.
fn replay_wal(
    path: &Path,
    data: &mut BTreeMap<Vec<u8>, Vec<u8>>,
    seq: &mut u64,
) -> Result<u64, MetaError> {
    if !path.exists() {
        return Ok(0);
    }

    let mut file = File::open(path)?;
    let covered = *seq;
    let mut valid_len = 0u64;
    let mut replayed = 0usize;

    loop {
        let mut len_buf = [0u8; 4];
        match file.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(MetaError::IoError(e)),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        let mut entry_buf = vec![0u8; len];
        match file.read_exact(&mut entry_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::warn!(len, "discarding torn WAL tail");
                break;
            }
            Err(e) => return Err(MetaError::IoError(e)),
        }

        let entry: WalEntry = bincode::deserialize(&entry_buf)
            .map_err(|e| MetaError::KvError(format!("failed to deserialize WAL entry: {}", e)))?;
        valid_len += 4 + len as u64;

        if entry.seq <= covered {
            // already covered by the checkpoint
            continue;
        }
        *seq = (*seq).max(entry.seq);
        apply_ops(data, entry.ops.into_iter().map(BatchOp::from).collect());
        replayed += 1;
    }

    if replayed > 0 {
        tracing::info!(replayed, "replayed WAL batches");
    }
    Ok(valid_len)
}

impl KvStore for PersistentKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Value>, MetaError> {
        let data = self
            .data
            .read()
            .map_err(|e| MetaError::KvError(e.to_string()))?;
        Ok(data.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KvPair>, MetaError> {
        let data = self
            .data
            .read()
            .map_err(|e| MetaError::KvError(e.to_string()))?;
        Ok(prefix_scan(&data, prefix))
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), MetaError> {
        if ops.is_empty() {
            return Ok(());
        }
        self.commit(ops)
    }
}
