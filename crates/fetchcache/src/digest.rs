//! Digest computation and hex coding for content addressing.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Hashing happens in bounded chunks so that large files and streams are
/// never buffered wholesale.
const CHUNK_SIZE: usize = 64 * 1024;

/// The digest algorithm a cache directory is keyed by.
///
/// Picked once at configuration time; an unrecognized algorithm name is a
/// configuration error, not a recoverable per-call failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Sha1,
    Sha256,
}

/// The configured digest algorithm name is not supported.
#[derive(Debug, Clone, Error)]
#[error("unknown digest algorithm: {0}")]
pub struct UnknownAlgorithm(String);

impl DigestAlgorithm {
    /// The directory-name form of the algorithm, e.g. `"sha1"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Sha256 => "sha256",
        }
    }

    /// Computes the digest of an in-memory buffer.
    pub fn digest_bytes(self, bytes: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Sha1 => Sha1::digest(bytes).to_vec(),
            DigestAlgorithm::Sha256 => Sha256::digest(bytes).to_vec(),
        }
    }

    /// Computes the digest of everything `reader` yields, in bounded chunks.
    pub fn digest_reader<R: Read>(self, reader: R) -> io::Result<Vec<u8>> {
        match self {
            DigestAlgorithm::Sha1 => digest_reader::<Sha1, R>(reader),
            DigestAlgorithm::Sha256 => digest_reader::<Sha256, R>(reader),
        }
    }

    /// Computes the digest of a file's contents.
    pub fn digest_file(self, path: &Path) -> io::Result<Vec<u8>> {
        self.digest_reader(File::open(path)?)
    }

    /// Like [`digest_bytes`](Self::digest_bytes), hex-encoded.
    pub fn hex_digest_bytes(self, bytes: &[u8]) -> String {
        hex::encode(self.digest_bytes(bytes))
    }

    /// Like [`digest_file`](Self::digest_file), hex-encoded.
    pub fn hex_digest_file(self, path: &Path) -> io::Result<String> {
        Ok(hex::encode(self.digest_file(path)?))
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(DigestAlgorithm::Sha1),
            "sha256" | "sha-256" => Ok(DigestAlgorithm::Sha256),
            _ => Err(UnknownAlgorithm(s.to_owned())),
        }
    }
}

fn digest_reader<D: Digest, R: Read>(mut reader: R) -> io::Result<Vec<u8>> {
    let mut hasher = D::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_vec())
}

/// Hex-encodes raw digest bytes, lowercase.
pub fn hex_encode(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decodes a hex digest back into raw bytes.
///
/// Fails on odd-length input or non-hex characters.
pub fn hex_decode(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(s)
}
