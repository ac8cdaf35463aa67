//! Cryptographic fingerprints for completed downloads.
//!
//! Computes MD5, SHA-1 and SHA-256 digests of a file in one streaming pass,
//! so a multi-gigabyte download never has to fit in memory. MD5 and SHA-1 are
//! fingerprints for cross-checking published checksums, not integrity
//! guarantees; SHA-256 is there when one is needed.

use std::path::Path;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Hex-encoded digests of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigests {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
}

/// Digests a file in a single streaming pass feeding all three hashers.
///
/// # Errors
///
/// Returns the underlying I/O error if the file cannot be opened or read.
pub async fn digest_file(path: &Path) -> Result<FileDigests, std::io::Error> {
    let mut file = File::open(path).await?;
    let mut md5 = Md5::new();
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();

    let mut buffer = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        md5.update(&buffer[..read]);
        sha1.update(&buffer[..read]);
        sha256.update(&buffer[..read]);
        total += read as u64;
    }

    debug!(path = %path.display(), bytes = total, "file digested");
    Ok(FileDigests {
        md5: hex(&md5.finalize()),
        sha1: hex(&sha1.finalize()),
        sha256: hex(&sha256.finalize()),
    })
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(
        String::with_capacity(bytes.len() * 2),
        |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        },
    )
}
