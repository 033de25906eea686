use sha2::{Digest, Sha256};
use std::path::Path;
use xxhash_rust::xxh3::xxh3_64;

/// Fast digest embedded in artifact file names (XXH3-64, 16 hex chars)
pub fn fast_digest(data: &[u8]) -> String {
    format!("{:016x}", xxh3_64(data))
}

/// Strong digest embedded in artifact file names (SHA-256, 64 hex chars)
pub fn strong_digest(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// File name for a cache key
pub fn key_hash(key: &str) -> String {
    blake3::hash(key.as_bytes()).to_hex().to_string()
}

/// SHA-256 of a file, streamed in 64KB chunks
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 65536];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Decode a lowercase hex digest back into bytes
pub fn hex_to_bytes(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_lengths() {
        assert_eq!(fast_digest(b"---\nrack\n").len(), 16);
        assert_eq!(
            strong_digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(key_hash("foo").len(), 64);
        assert_ne!(key_hash("foo"), key_hash("bar"));
    }

    #[test]
    fn test_sha256_file_matches_in_memory() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("rack-1.0.0.gem");
        std::fs::write(&path, b"not really a gem").unwrap();
        assert_eq!(sha256_file(&path).unwrap(), strong_digest(b"not really a gem"));
    }

    #[test]
    fn test_hex_to_bytes() {
        assert_eq!(hex_to_bytes("00ff10"), Some(vec![0, 255, 16]));
        assert_eq!(hex_to_bytes("abc"), None);
        assert_eq!(hex_to_bytes("zz"), None);
    }
}
