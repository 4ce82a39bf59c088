//! # fetchcache
//!
//! A local cache for remote files, built for a downloader/update pipeline.
//! Previously fetched content is stored under its own hash, and HTTP
//! revalidation metadata (ETag / Last-Modified) is tracked per URL so that
//! unchanged resources are never downloaded twice. On-disk corruption or
//! tampering is detected before a cached file is trusted.
//!
//! ## Layers
//!
//! - [`digest`] computes and hex-encodes content digests.
//! - [`store`] maps `(algorithm, hash)` to a canonical on-disk path and
//!   verifies that content found there still hashes to the claimed value.
//! - [`index`] holds the in-memory URL → revalidation-record mapping and the
//!   merge rule for reconciling concurrently-modified snapshots.
//! - [`persist`] loads and flushes the index document, under an exclusive
//!   OS-level file lock so that independent processes sharing a cache
//!   directory cannot erase each other's entries.
//! - [`repository`] is the facade the downloader talks to, and owns the
//!   reader/writer lock over the in-memory index.
//!
//! ## On-disk layout
//!
//! ```text
//! <common_dir>/cache/<algorithm>/<hash[0..2]>/<hash>   content files
//! <common_dir>/cache/etag.json                         index document
//! ```
//!
//! The index document is a single JSON object with one `eTag` field holding
//! the collection of records (`url`, `eTag`, `hash`, `local`, `remote`).
//!
//! ## Locking
//!
//! Two locks guard the index: the repository's in-process reader/writer
//! lock, and the OS-level exclusive lock [`persist::IndexStore`] takes on
//! the index file during a flush. The in-process lock is always acquired
//! first and neither lock is re-entered; see the [`persist`] module docs.
//!
//! Flushing is merge-before-overwrite: under the file lock the current
//! on-disk document is re-read and merged with the in-memory index before
//! the file is rewritten. A second process flushing between this process's
//! load and its flush therefore loses nothing.

pub mod config;
pub mod digest;
pub mod error;
pub mod index;
pub mod persist;
pub mod repository;
pub mod store;

pub use config::CacheConfig;
pub use digest::DigestAlgorithm;
pub use error::CacheError;
pub use index::{RevalidationIndex, RevalidationRecord};
pub use persist::IndexStore;
pub use repository::{CacheRepository, Connection};
pub use store::ContentStore;
