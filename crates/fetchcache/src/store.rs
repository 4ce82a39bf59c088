//! Content-addressed storage for downloaded files.
//!
//! Every file lives at `root/<algorithm>/<hash[0..2]>/<hash>`, sharded by
//! the first two hex characters to bound directory fanout. The store is
//! shared between processes; all mutation goes through [`ContentStore::put`]
//! and [`ContentStore::restore`], which are safe to race on the same
//! `(algorithm, hash)` key because the end state is identical regardless of
//! write order.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::digest::DigestAlgorithm;

#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ContentStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The canonical location for the given content hash. Pure computation,
    /// no I/O.
    ///
    /// Total for arbitrary input: a decodable index document can carry any
    /// string as a hash, and such entries must miss, not panic.
    pub fn path(&self, algorithm: DigestAlgorithm, hash: &str) -> PathBuf {
        let hash = hash.to_ascii_lowercase();
        let shard = hash.get(..2).unwrap_or(hash.as_str());
        self.root.join(algorithm.as_str()).join(shard).join(&hash)
    }

    /// Whether verified content for `hash` is present.
    ///
    /// A file that is present but no longer hashes to the claimed value
    /// counts as not existing. This is the corruption-detection contract:
    /// tampered content is never reported as a hit.
    pub fn exists(&self, algorithm: DigestAlgorithm, hash: &str) -> bool {
        if hash.is_empty() {
            return false;
        }
        let file = self.path(algorithm, hash);
        if !file.is_file() {
            return false;
        }
        match algorithm.hex_digest_file(&file) {
            Ok(actual) => actual.eq_ignore_ascii_case(hash),
            Err(_) => false,
        }
    }

    /// Copies `source` into the canonical location, overwriting anything
    /// already there.
    ///
    /// The copy goes through a sibling temp file which is then renamed into
    /// place, so concurrent readers never observe a half-written file.
    pub fn put(
        &self,
        source: &Path,
        algorithm: DigestAlgorithm,
        hash: &str,
    ) -> io::Result<PathBuf> {
        self.write_entry(algorithm, hash, |file| {
            io::copy(&mut fs::File::open(source)?, file).map(|_| ())
        })
    }

    /// Like [`put`](Self::put), but skips the copy when *verified* content
    /// is already present (per [`exists`](Self::exists)). A corrupt file at
    /// the canonical location gets overwritten rather than trusted.
    /// Idempotent caching: racing writers of the same hash do the work at
    /// most twice and end up with identical content.
    pub fn put_if_absent(
        &self,
        source: &Path,
        algorithm: DigestAlgorithm,
        hash: &str,
    ) -> io::Result<PathBuf> {
        if self.exists(algorithm, hash) {
            return Ok(self.path(algorithm, hash));
        }
        self.put(source, algorithm, hash)
    }

    /// Writes an in-memory buffer into the canonical location.
    pub fn put_bytes(
        &self,
        bytes: &[u8],
        algorithm: DigestAlgorithm,
        hash: &str,
    ) -> io::Result<PathBuf> {
        self.write_entry(algorithm, hash, |file| file.write_all(bytes))
    }

    /// Interns `original` into the store and hard-links its old path to the
    /// canonical location.
    ///
    /// The content is deduplicated between the caller's working copy and the
    /// cache copy while the original path stays usable. Hard-link creation
    /// failing (cross-device, unsupported filesystem) is a loud error, not a
    /// silent copy fallback: callers rely on the space-saving semantics.
    pub fn restore(
        &self,
        original: &Path,
        algorithm: DigestAlgorithm,
        hash: &str,
    ) -> io::Result<PathBuf> {
        let cached = self.put_if_absent(original, algorithm, hash)?;
        fs::remove_file(original)?;
        fs::hard_link(&cached, original)?;
        Ok(cached)
    }

    fn write_entry(
        &self,
        algorithm: DigestAlgorithm,
        hash: &str,
        write: impl FnOnce(&mut fs::File) -> io::Result<()>,
    ) -> io::Result<PathBuf> {
        let target = self.path(algorithm, hash);
        let parent = target.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        write(tmp.as_file_mut())?;
        tmp.persist(&target)?;
        Ok(target)
    }
}
