use thiserror::Error;

/// An error that happens while serving or persisting cache entries.
///
/// The first two variants are part of the cache contract and are expected
/// during normal operation; the caller reacts to them by performing a full
/// download. The remaining variants are genuine failures.
#[derive(Debug, Error)]
pub enum CacheError {
    /// There is no usable cache entry for the URL.
    ///
    /// Either no revalidation record exists, the record carries no content
    /// hash yet, or the content file has disappeared from disk.
    #[error("no cached copy for this URL")]
    NotFound,

    /// The stored content no longer hashes to the recorded value.
    ///
    /// This signals corruption or external tampering. The cached file must
    /// not be trusted; the caller should treat this as a full cache miss.
    #[error("cached file was modified on disk")]
    Modified,

    /// A file-system or locking error during load, flush, put or restore.
    #[error("i/o error")]
    Io(#[from] std::io::Error),

    /// The index document could not be encoded.
    ///
    /// Decode failures never surface through this variant; an undecodable
    /// index file on disk is treated as an empty index instead.
    #[error("index encoding error")]
    Json(#[from] serde_json::Error),
}
