//! SHA-256 content fingerprints, lowercase hex.

use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

pub const HASH_BLOCK_SIZE: usize = 4096;

pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Streams the file through the digest in fixed-size blocks.
pub async fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut block = [0u8; HASH_BLOCK_SIZE];

    loop {
        let n = file.read(&mut block).await?;
        if n == 0 {
            break;
        }
        hasher.update(&block[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}
