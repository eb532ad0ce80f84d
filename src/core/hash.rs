use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Cache key of a video: stable for the same path, modification time and salt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoId(pub String);

impl VideoId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VideoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the cache id of a video.
///
/// The salt separates fingerprints that were computed with different
/// sampling settings for the same file.
pub fn unique_id(path: &Path, modified: &DateTime<Utc>, salt: &str) -> VideoId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(&[0]);
    hasher.update(modified.timestamp_millis().to_le_bytes().as_slice());
    hasher.update(&[0]);
    hasher.update(salt.as_bytes());
    VideoId(hasher.finalize().to_hex().to_string())
}
