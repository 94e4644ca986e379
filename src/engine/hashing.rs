//! File hashing for the process stage.

use anyhow::{Context, Result};
use blake3::Hasher;
use memmap2::Mmap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::utils::config::HashingConsts;

/// Hash a file with blake3. Memory-maps files above the threshold, reads in chunks otherwise.
pub fn hash_file(path: &Path, size: u64) -> Result<[u8; 32]> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Hasher::new();

    if size > HashingConsts::HASH_MMAP_THRESHOLD {
        let mmap = unsafe { Mmap::map(&file) }.with_context(|| format!("mmap {}", path.display()))?;
        hasher.update(&mmap);
    } else {
        let mut reader = std::io::BufReader::with_capacity(HashingConsts::HASH_READ_CHUNK_SIZE, file);
        let mut buffer = vec![0u8; HashingConsts::HASH_READ_CHUNK_SIZE];
        loop {
            let n = reader
                .read(&mut buffer)
                .with_context(|| format!("read {}", path.display()))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
    }

    Ok(*hasher.finalize().as_bytes())
}

/// Lowercase hex form of a digest, as written to the manifest.
pub fn hash_to_hex(hash: &[u8; 32]) -> String {
    blake3::Hash::from(*hash).to_hex().to_string()
}
