use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::Path;

use crate::error::{EdgeError, Result};

/// SHA-256 helpers for release artifacts
pub struct ChecksumManager;

impl ChecksumManager {
    /// Lowercase hex SHA-256 of an in-memory buffer
    pub fn calculate_bytes(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }

    /// Calculate SHA256 hash of a file
    pub fn calculate_hash(path: &Path) -> Result<String> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();

        io::copy(&mut file, &mut hasher)?;

        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Verify a downloaded artifact against the manifest checksum
    pub fn verify_bytes(data: &[u8], expected_hash: &str) -> Result<String> {
        let hash = Self::calculate_bytes(data);
        Self::compare(&hash, expected_hash)?;
        Ok(hash)
    }

    /// Verify file matches expected SHA256 hash
    pub fn verify_file(path: &Path, expected_hash: &str) -> Result<()> {
        let hash = Self::calculate_hash(path)?;
        Self::compare(&hash, expected_hash)
    }

    /// Pull the hash out of a `sha256sum` style line (`<hash>  <filename>`)
    pub fn parse_checksum_line(text: &str) -> Result<String> {
        let hash = text
            .split_whitespace()
            .next()
            .ok_or_else(|| EdgeError::integrity("empty checksum file"))?;

        if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(EdgeError::integrity(format!(
                "invalid SHA-256 digest: {}",
                hash
            )));
        }
        Ok(hash.to_ascii_lowercase())
    }

    fn compare(actual: &str, expected: &str) -> Result<()> {
        let expected = expected.trim();
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(EdgeError::integrity(format!(
                "hash mismatch, expected {} got {}",
                expected, actual
            )));
        }
        Ok(())
    }
}
