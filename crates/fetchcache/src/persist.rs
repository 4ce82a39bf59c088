//! Durable persistence for the revalidation index.
//!
//! The index lives as a single JSON document next to the content store. It
//! is shared with other processes pointing at the same cache directory, so
//! flushing never blindly overwrites: whatever is currently on disk gets
//! merged with the in-memory index first, under an exclusive OS-level file
//! lock. The re-read is unconditional; an mtime-based fast path would let a
//! concurrent flush landing within the filesystem's timestamp granularity
//! be silently overwritten.
//!
//! Lock order invariant: the repository's in-process write lock is always
//! acquired before the file lock, and neither lock is ever re-entered. Do
//! not reorder this; it is what makes the two-level scheme deadlock-free.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::index::{RevalidationIndex, RevalidationRecord};

/// Name of the index document inside the cache directory.
pub const INDEX_FILE_NAME: &str = "etag.json";

/// The on-disk document shape: one object with a single field holding an
/// unordered collection of records.
#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexDocument {
    #[serde(rename = "eTag", default)]
    records: Vec<RevalidationRecord>,
}

impl From<&RevalidationIndex> for IndexDocument {
    fn from(index: &RevalidationIndex) -> Self {
        IndexDocument {
            records: index.records().cloned().collect(),
        }
    }
}

/// Loads and flushes a [`RevalidationIndex`] to its on-disk document.
#[derive(Debug)]
pub struct IndexStore {
    index_file: PathBuf,
}

impl IndexStore {
    pub fn new(cache_dir: &Path) -> Self {
        IndexStore {
            index_file: cache_dir.join(INDEX_FILE_NAME),
        }
    }

    pub fn index_file(&self) -> &Path {
        &self.index_file
    }

    /// Reads the on-disk index.
    ///
    /// A missing index file is the normal first-run state and an
    /// undecodable one is abandoned rather than trusted; both load as an
    /// empty index, never as an error.
    pub fn load(&self) -> RevalidationIndex {
        let file = match File::open(&self.index_file) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return RevalidationIndex::new(),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %self.index_file.display(),
                    "unable to open index file",
                );
                return RevalidationIndex::new();
            }
        };
        // Shared lock, best effort. If another writer holds the exclusive
        // lock we still read; a torn document decodes as garbage and is
        // discarded below.
        let _ = file.try_lock_shared();
        let index = decode(&file, &self.index_file);
        let _ = FileExt::unlock(&file);
        index
    }

    /// Persists `in_memory`, reconciling it with whatever is on disk.
    ///
    /// Under the exclusive file lock: decode the current on-disk document,
    /// merge it with `in_memory`, truncate, write the merged result, and
    /// return it for the caller to adopt as the new in-memory index. On any
    /// error the caller's index is untouched, so a retry is safe.
    pub fn flush(&self, in_memory: &RevalidationIndex) -> Result<RevalidationIndex, CacheError> {
        if let Some(parent) = self.index_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.index_file)?;
        file.lock_exclusive()?;
        let result = self.flush_locked(&file, in_memory);
        let _ = FileExt::unlock(&file);
        result
    }

    fn flush_locked(
        &self,
        file: &File,
        in_memory: &RevalidationIndex,
    ) -> Result<RevalidationIndex, CacheError> {
        // A second writer may have flushed since our last read. Pick its
        // entries up before overwriting; in-memory records go first so they
        // win date ties.
        let on_disk = decode(file, &self.index_file);
        let merged = RevalidationIndex::merged([in_memory.clone(), on_disk]);

        file.set_len(0)?;
        let mut cursor = file;
        cursor.seek(SeekFrom::Start(0))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &IndexDocument::from(&merged))?;
        writer.flush()?;
        file.sync_all()?;

        Ok(merged)
    }
}

fn decode(file: &File, path: &Path) -> RevalidationIndex {
    // A zero-length file is the freshly-created state, not a corrupt one.
    if file.metadata().map(|m| m.len() == 0).unwrap_or(false) {
        return RevalidationIndex::new();
    }
    match serde_json::from_reader::<_, IndexDocument>(BufReader::new(file)) {
        Ok(document) => RevalidationIndex::from_records(document.records),
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %path.display(),
                "unable to decode index file, starting from an empty index",
            );
            RevalidationIndex::new()
        }
    }
}
