//! The cache repository facade consumed by the downloader.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use filetime::FileTime;
use url::Url;

use crate::config::CacheConfig;
use crate::digest::DigestAlgorithm;
use crate::error::CacheError;
use crate::index::{RevalidationIndex, RevalidationRecord};
use crate::persist::IndexStore;
use crate::store::ContentStore;

pub const ETAG_HEADER: &str = "ETag";
pub const LAST_MODIFIED_HEADER: &str = "Last-Modified";
pub const IF_NONE_MATCH_HEADER: &str = "If-None-Match";

/// The view of an HTTP exchange the cache needs.
///
/// The actual HTTP client lives outside this crate; it only has to expose
/// the resource URL, response headers, and a way to set request headers
/// before the request goes out.
pub trait Connection {
    fn url(&self) -> &Url;
    fn header_field(&self, name: &str) -> Option<&str>;
    fn set_request_header(&mut self, name: &str, value: &str);
}

/// Everything that is re-pointed when the cache directory changes.
#[derive(Debug)]
struct RepositoryState {
    common_dir: PathBuf,
    store: ContentStore,
    index_store: IndexStore,
    index: RevalidationIndex,
}

impl RepositoryState {
    fn new(common_dir: PathBuf) -> Self {
        let cache_dir = common_dir.join("cache");
        let store = ContentStore::new(&cache_dir);
        let index_store = IndexStore::new(&cache_dir);
        let index = index_store.load();
        RepositoryState {
            common_dir,
            store,
            index_store,
            index,
        }
    }
}

/// The local cache for remote files, keyed by URL.
///
/// One instance is shared by all of the downloader's worker threads. Reads
/// ([`inject_connection`](Self::inject_connection),
/// [`get_cached_remote_file`](Self::get_cached_remote_file),
/// [`check_existent_file`](Self::check_existent_file)) take the read side of
/// the in-process lock and may run concurrently; writes take the exclusive
/// side. The on-disk index is additionally guarded by an OS-level file lock
/// inside [`IndexStore`], which also covers concurrent processes sharing the
/// cache directory. The in-process lock is always taken before the file
/// lock.
#[derive(Debug)]
pub struct CacheRepository {
    algorithm: DigestAlgorithm,
    state: RwLock<RepositoryState>,
}

impl CacheRepository {
    /// Creates a repository rooted at `common_dir` and loads the persisted
    /// index. Content and the index document live under
    /// `<common_dir>/cache`.
    pub fn new(common_dir: impl Into<PathBuf>, algorithm: DigestAlgorithm) -> Self {
        CacheRepository {
            algorithm,
            state: RwLock::new(RepositoryState::new(common_dir.into())),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(&config.cache_dir, config.digest_algorithm)
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn common_directory(&self) -> PathBuf {
        self.state.read().unwrap().common_dir.clone()
    }

    pub fn cache_directory(&self) -> PathBuf {
        self.state.read().unwrap().store.root().to_path_buf()
    }

    /// Re-points the repository at a new root and reloads the index
    /// wholesale. Intended for startup or profile switches, not for use
    /// during concurrent cache traffic.
    pub fn change_directory(&self, common_dir: impl Into<PathBuf>) {
        let mut state = self.state.write().unwrap();
        *state = RepositoryState::new(common_dir.into());
    }

    /// Sets `If-None-Match` on the outgoing request if we hold an ETag for
    /// the URL. Not having one is a no-op, not an error.
    pub fn inject_connection(&self, conn: &mut dyn Connection) {
        let key = cache_key(conn.url());
        let etag = {
            let state = self.state.read().unwrap();
            state.index.get(&key).map(|record| record.etag.clone())
        };
        if let Some(etag) = etag {
            if !etag.is_empty() {
                conn.set_request_header(IF_NONE_MATCH_HEADER, &etag);
            }
        }
    }

    /// Returns the cached content file for a URL whose record is still
    /// trustworthy.
    ///
    /// Fails with [`CacheError::NotFound`] when there is no record, the
    /// record has no content hash, or the content file is gone. When the
    /// file's current mtime differs from the one recorded at caching time
    /// it is re-hashed; content that no longer matches fails with
    /// [`CacheError::Modified`] and is never served.
    pub fn get_cached_remote_file(&self, url: &Url) -> Result<PathBuf, CacheError> {
        let key = cache_key(url);
        let state = self.state.read().unwrap();
        let record = state.index.get(&key).ok_or(CacheError::NotFound)?;
        if record.hash.is_empty() {
            return Err(CacheError::NotFound);
        }
        let file = state.store.path(self.algorithm, &record.hash);
        if !file.is_file() {
            return Err(CacheError::NotFound);
        }
        let metadata = fs::metadata(&file)?;
        let mtime = FileTime::from_last_modification_time(&metadata);
        if file_time_millis(mtime) != record.local_last_modified {
            // Cheap fast path failed; pay for the full re-hash before
            // deciding whether the file is still the one we cached.
            let actual = self.algorithm.hex_digest_file(&file)?;
            if !actual.eq_ignore_ascii_case(&record.hash) {
                return Err(CacheError::Modified);
            }
        }
        Ok(file)
    }

    /// Looks for content matching `hash` in the store, or interns `original`
    /// if it independently hashes to `hash`.
    ///
    /// With no hash given, an existing `original` is trusted as-is and
    /// returned unchanged. Finding nothing is the normal cache-miss path
    /// and yields `Ok(None)`; only the interning itself can fail.
    pub fn check_existent_file(
        &self,
        original: Option<&Path>,
        algorithm: DigestAlgorithm,
        hash: Option<&str>,
    ) -> Result<Option<PathBuf>, CacheError> {
        let store = self.state.read().unwrap().store.clone();

        if let Some(hash) = hash {
            if store.exists(algorithm, hash) {
                return Ok(Some(store.path(algorithm, hash)));
            }
        }

        let Some(original) = original else {
            return Ok(None);
        };
        if !original.exists() {
            return Ok(None);
        }

        match hash {
            Some(hash) => {
                let checksum = match algorithm.hex_digest_file(original) {
                    Ok(checksum) => checksum,
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            path = %original.display(),
                            "cannot hash candidate file, ignoring it",
                        );
                        return Ok(None);
                    }
                };
                if !checksum.eq_ignore_ascii_case(hash) {
                    return Ok(None);
                }
                Ok(Some(store.restore(original, algorithm, hash)?))
            }
            None => Ok(Some(original.to_path_buf())),
        }
    }

    /// Caches an already-downloaded file for the connection's URL.
    ///
    /// Returns the canonical cache path, or `Ok(None)` when the response
    /// carried no ETag header; without one there is nothing worth indexing.
    pub fn cache_remote_file(
        &self,
        conn: &dyn Connection,
        downloaded: &Path,
    ) -> Result<Option<PathBuf>, CacheError> {
        self.cache_data(conn, |store, algorithm| {
            let hash = algorithm.hex_digest_file(downloaded)?;
            let cached = store.put(downloaded, algorithm, &hash)?;
            Ok((hash, cached))
        })
    }

    /// Caches a response body that was read into memory.
    pub fn cache_bytes(
        &self,
        conn: &dyn Connection,
        bytes: &[u8],
    ) -> Result<Option<PathBuf>, CacheError> {
        self.cache_data(conn, |store, algorithm| {
            let hash = algorithm.hex_digest_bytes(bytes);
            let cached = store.put_bytes(bytes, algorithm, &hash)?;
            Ok((hash, cached))
        })
    }

    /// Caches a textual response body (hashed as UTF-8 bytes).
    pub fn cache_text(
        &self,
        conn: &dyn Connection,
        text: &str,
    ) -> Result<Option<PathBuf>, CacheError> {
        self.cache_bytes(conn, text.as_bytes())
    }

    /// Drops the revalidation record for a URL from the in-memory index,
    /// e.g. after the caller decided not to trust it anymore.
    pub fn remove_remote_entry(&self, url: &Url) {
        let key = cache_key(url);
        self.state.write().unwrap().index.remove(&key);
    }

    fn cache_data(
        &self,
        conn: &dyn Connection,
        write: impl FnOnce(&ContentStore, DigestAlgorithm) -> Result<(String, PathBuf), CacheError>,
    ) -> Result<Option<PathBuf>, CacheError> {
        let etag = match conn.header_field(ETAG_HEADER) {
            Some(etag) if !etag.trim().is_empty() => etag.to_owned(),
            _ => return Ok(None),
        };
        let key = cache_key(conn.url());
        let remote_last_modified = conn.header_field(LAST_MODIFIED_HEADER).map(str::to_owned);

        // Content goes in before the write lock is taken; racing puts of
        // the same hash converge on identical bytes.
        let store = self.state.read().unwrap().store.clone();
        let (hash, cached) = write(&store, self.algorithm)?;
        let metadata = fs::metadata(&cached)?;
        let record = RevalidationRecord {
            url: key,
            etag,
            hash: hash.clone(),
            local_last_modified: file_time_millis(FileTime::from_last_modification_time(&metadata)),
            remote_last_modified,
        };

        let mut state = self.state.write().unwrap();
        if let Some(old) = state.index.replace(record) {
            if !old.hash.is_empty() && !old.hash.eq_ignore_ascii_case(&hash) {
                let stale = state.store.path(self.algorithm, &old.hash);
                if let Err(e) = fs::remove_file(&stale) {
                    if e.kind() != io::ErrorKind::NotFound {
                        tracing::warn!(
                            error = %e,
                            path = %stale.display(),
                            "cannot delete superseded cache file",
                        );
                    }
                }
            }
        }

        let RepositoryState {
            index_store, index, ..
        } = &mut *state;
        *index = index_store.flush(index)?;

        Ok(Some(cached))
    }
}

/// The index key is the bare resource URL: query and fragment are stripped.
fn cache_key(url: &Url) -> Url {
    let mut key = url.clone();
    key.set_query(None);
    key.set_fragment(None);
    key
}

fn file_time_millis(time: FileTime) -> i64 {
    time.unix_seconds() * 1000 + i64::from(time.nanoseconds()) / 1_000_000
}
