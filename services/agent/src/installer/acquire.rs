//! Package acquisition (§4.E): stream-from-control-plane, URL fetch, and
//! local existence check.

use std::io::Write;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::InstallerError;

/// A single chunk of a package streamed from the control plane as opaque
/// command frames (§4.E). Chunks must arrive in strictly increasing
/// `offset` order; `is_last` marks the final chunk, which carries the
/// expected SHA-256 of the whole file.
#[derive(Debug, Clone)]
pub struct PackageChunk {
    pub offset: u64,
    pub data: Vec<u8>,
    pub is_last: bool,
    pub expected_sha256: Option<String>,
}

/// Reassembles a sequence of `PackageChunk`s into a file, enforcing strict
/// offset ordering and verifying the final checksum.
pub struct ChunkedAssembler {
    dest: PathBuf,
    file: std::fs::File,
    next_offset: u64,
    hasher: Sha256,
}

impl ChunkedAssembler {
    pub fn create(dest: impl Into<PathBuf>) -> Result<Self, InstallerError> {
        let dest = dest.into();
        let file = std::fs::File::create(&dest)?;
        Ok(Self { dest, file, next_offset: 0, hasher: Sha256::new() })
    }

    /// Appends one chunk. Returns `Ok(true)` once the last chunk has been
    /// written and verified.
    pub fn accept(&mut self, chunk: PackageChunk) -> Result<bool, InstallerError> {
        if chunk.offset != self.next_offset {
            return Err(InstallerError::ChunkOutOfOrder { expected: self.next_offset, actual: chunk.offset });
        }

        self.file.write_all(&chunk.data)?;
        self.hasher.update(&chunk.data);
        self.next_offset += chunk.data.len() as u64;

        if chunk.is_last {
            self.file.flush()?;
            if let Some(expected) = chunk.expected_sha256 {
                verify_checksum(&self.dest, &expected)?;
            }
            return Ok(true);
        }
        Ok(false)
    }
}

/// Computes the SHA-256 of `path` and compares it case-insensitively to
/// `expected` (§4.E).
pub fn verify_checksum(path: &Path, expected: &str) -> Result<(), InstallerError> {
    let bytes = std::fs::read(path)?;
    let actual = hex::encode(Sha256::digest(&bytes));
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(InstallerError::ChecksumMismatch { expected: expected.to_string(), actual })
    }
}

/// Downloads `url` to `dest` via HTTP GET, reporting byte-level progress
/// through `on_progress(bytes_read, total_len)`.
pub async fn fetch_url(
    url: &str,
    dest: &Path,
    mut on_progress: impl FnMut(u64, Option<u64>),
) -> Result<(), InstallerError> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(600))
        .build()
        .map_err(|e| InstallerError::Http(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| InstallerError::Http(e.to_string()))?;
    let total = response.content_length();

    let mut file = std::fs::File::create(dest)?;
    let mut received: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| InstallerError::Http(e.to_string()))?;
        file.write_all(&chunk)?;
        received += chunk.len() as u64;
        on_progress(received, total);
    }
    debug!(url, received, "download complete");
    Ok(())
}

/// Checks that a locally staged package already exists at `path`.
pub fn verify_local(path: &Path) -> Result<(), InstallerError> {
    if path.exists() {
        Ok(())
    } else {
        Err(InstallerError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, path.display().to_string())))
    }
}
