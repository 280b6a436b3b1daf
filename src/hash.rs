use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Read buffer size for streaming digests.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Hex-encoded SHA-256 of a file, streamed in [`CHUNK_SIZE`] reads so large
/// videos are never held in memory.
pub fn file_sha256(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// [`file_sha256`] on the blocking pool.
pub async fn file_sha256_async(path: PathBuf) -> std::io::Result<String> {
    tokio::task::spawn_blocking(move || file_sha256(&path))
        .await
        .map_err(std::io::Error::other)?
}
