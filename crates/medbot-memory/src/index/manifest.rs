use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const FORMAT_VERSION: u32 = 1;
pub const MANIFEST_FILE: &str = "manifest.json";
pub const CHUNKS_FILE: &str = "chunks.jsonl";

/// Describes the contents of `chunks.jsonl` so a load can detect drift or corruption.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub embedding_model: String,
    pub dimension: usize,
    pub chunk_count: usize,
    /// blake3 hex digest of the `chunks.jsonl` bytes.
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

#[must_use]
pub fn checksum(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_stable_hex() {
        let a = checksum(b"chunk data");
        assert_eq!(a, checksum(b"chunk data"));
        assert_ne!(a, checksum(b"chunk datA"));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
