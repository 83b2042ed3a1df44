//! File-based queue store implementation.
//!
//! This module provides `FileQueueStore`, a persistent implementation of the
//! `QueueStore` trait backed by an append-only journal.
//!
//! # Directory Structure
//!
//! ```text
//! data/
//! ├── queue.jsonl       # Append-only journal of queue records (JSON lines)
//! └── queue.jsonl.tmp   # Transient, only present while compacting
//! ```
//!
//! # Durability
//!
//! Every record is flushed and synced to disk before the call that produced
//! it returns, and the in-memory state only changes after the write
//! succeeded. Replaying the journal on open therefore reproduces every
//! change the caller was told about. A torn last line (crash mid-append) is
//! dropped with a warning and the journal is rewritten on open.
//!
//! # Example
//!
//! ```ignore
//! use offline_queue::{FileQueueStore, PendingOperation, QueueConfig, QueueStore};
//!
//! let store = FileQueueStore::open("./data", QueueConfig::default())?;
//! let id = store.enqueue(PendingOperation::create_observation(record))?;
//! ```

use crate::error::QueueResult;
use crate::operation::{AttemptFailure, OperationId, PendingOperation};
use crate::state::{QueueRecord, QueueState};
use crate::store::{AttemptOutcome, QueueConfig, QueueStore};
use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// File names used for storage
const JOURNAL_FILE: &str = "queue.jsonl";
const JOURNAL_TMP_FILE: &str = "queue.jsonl.tmp";

/// Journals shorter than this are never compacted.
const COMPACT_MIN_RECORDS: usize = 256;
/// Compact once records outnumber live entries by this factor.
const COMPACT_FACTOR: usize = 4;

/// Append handle on the journal file.
struct Journal {
    path: PathBuf,
    file: File,
    /// Records currently in the file.
    records: usize,
}

impl Journal {
    fn open_append(path: PathBuf, records: usize) -> QueueResult<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file,
            records,
        })
    }

    fn append(&mut self, record: &QueueRecord) -> QueueResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        self.file.sync_data()?;
        self.records += 1;
        Ok(())
    }

    /// Atomically replace the journal with `records`.
    fn rewrite(&mut self, records: &[QueueRecord]) -> QueueResult<()> {
        let tmp_path = self.path.with_file_name(JOURNAL_TMP_FILE);
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            for record in records {
                serde_json::to_writer(&mut writer, record)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        sync_parent_dir(&self.path)?;

        *self = Self::open_append(self.path.clone(), records.len())?;
        Ok(())
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> QueueResult<()> {
    if let Some(parent) = path.parent() {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> QueueResult<()> {
    Ok(())
}

struct Inner {
    state: QueueState,
    journal: Journal,
}

impl Inner {
    fn maybe_compact(&mut self) -> QueueResult<()> {
        let threshold = COMPACT_MIN_RECORDS.max(self.state.len() * COMPACT_FACTOR);
        if self.journal.records > threshold {
            let before = self.journal.records;
            self.journal.rewrite(&self.state.snapshot_records())?;
            tracing::debug!(
                before,
                after = self.journal.records,
                "Compacted queue journal"
            );
        }
        Ok(())
    }
}

/// File-based implementation of `QueueStore`.
///
/// The store is thread-safe and can be shared across threads using `Arc`.
/// All access goes through one lock, so the enqueue path and the drain path
/// never interleave inside a mutation.
pub struct FileQueueStore {
    dir: PathBuf,
    config: QueueConfig,
    inner: Mutex<Inner>,
}

impl FileQueueStore {
    /// Open (or create) the queue stored in `dir`.
    ///
    /// Creates the directory if it doesn't exist and replays any existing
    /// journal.
    pub fn open(dir: impl AsRef<Path>, config: QueueConfig) -> QueueResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let path = dir.join(JOURNAL_FILE);

        let mut state = QueueState::new(config.clone());
        let mut records = 0;
        let mut needs_rewrite = false;

        if path.exists() {
            let contents = fs::read_to_string(&path)?;
            needs_rewrite = !contents.is_empty() && !contents.ends_with('\n');

            for (line_no, line) in contents.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<QueueRecord>(line) {
                    Ok(record) => {
                        state.replay(record);
                        records += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            line = line_no + 1,
                            error = %e,
                            "Skipping unreadable queue journal record"
                        );
                        needs_rewrite = true;
                    }
                }
            }
        }

        let mut journal = Journal::open_append(path, records)?;
        if needs_rewrite {
            journal.rewrite(&state.snapshot_records())?;
        }

        tracing::info!(
            entries = state.len(),
            path = %journal.path.display(),
            "Opened offline queue"
        );

        Ok(Self {
            dir,
            config,
            inner: Mutex::new(Inner { state, journal }),
        })
    }

    /// Directory holding the journal.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the journal file.
    pub fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    /// Rewrite the journal so it holds exactly one record per live entry.
    pub fn compact(&self) -> QueueResult<()> {
        let mut inner = self.inner();
        let records = inner.state.snapshot_records();
        inner.journal.rewrite(&records)
    }

    /// Number of records currently in the journal file.
    pub fn journal_records(&self) -> usize {
        self.inner().journal.records
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl QueueStore for FileQueueStore {
    fn enqueue(&self, operation: PendingOperation) -> QueueResult<OperationId> {
        let mut guard = self.inner();
        let Inner { state, journal } = &mut *guard;
        let kind = operation.kind;
        let id = state.enqueue(operation, |r| journal.append(r))?;
        tracing::debug!(operation_id = %id, %kind, "Queued operation");
        Ok(id)
    }

    fn dequeue_next(&self) -> QueueResult<Option<PendingOperation>> {
        Ok(self.inner().state.dequeue_next())
    }

    fn remove(&self, id: &OperationId) -> QueueResult<()> {
        let mut guard = self.inner();
        let Inner { state, journal } = &mut *guard;
        if state.remove(id, |r| journal.append(r))? {
            tracing::debug!(operation_id = %id, "Removed operation");
            guard.maybe_compact()?;
        }
        Ok(())
    }

    fn mark_attempt(&self, id: &OperationId, failure: &AttemptFailure) -> QueueResult<AttemptOutcome> {
        let mut guard = self.inner();
        let Inner { state, journal } = &mut *guard;
        let outcome = state.mark_attempt(id, failure, Utc::now(), |r| journal.append(r))?;
        guard.maybe_compact()?;
        Ok(outcome)
    }

    fn abandon(&self, id: &OperationId, reason: &str) -> QueueResult<()> {
        let mut guard = self.inner();
        let Inner { state, journal } = &mut *guard;
        state.abandon(id, reason, Utc::now(), |r| journal.append(r))
    }

    fn retry_abandoned(&self, id: &OperationId) -> QueueResult<()> {
        let mut guard = self.inner();
        let Inner { state, journal } = &mut *guard;
        state.retry_abandoned(id, |r| journal.append(r))
    }

    fn release(&self, id: &OperationId) -> QueueResult<()> {
        self.inner().state.release(id);
        Ok(())
    }

    fn get(&self, id: &OperationId) -> QueueResult<Option<PendingOperation>> {
        Ok(self.inner().state.get(id))
    }

    fn list(&self) -> QueueResult<Vec<PendingOperation>> {
        Ok(self.inner().state.list())
    }

    fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn evict_abandoned_older_than(&self, cutoff: DateTime<Utc>) -> QueueResult<Vec<OperationId>> {
        let mut guard = self.inner();
        let Inner { state, journal } = &mut *guard;
        let stale = state.abandoned_before(cutoff);
        for id in &stale {
            state.remove(id, |r| journal.append(r))?;
        }
        if !stale.is_empty() {
            tracing::info!(count = stale.len(), "Evicted abandoned operations");
            guard.maybe_compact()?;
        }
        Ok(stale)
    }

    fn len(&self) -> QueueResult<usize> {
        Ok(self.inner().state.len())
    }
}
