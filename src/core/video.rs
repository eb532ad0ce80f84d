use crate::core::fingerprint::VideoFingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Properties reported by the metadata probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration_ms: i64,
    pub width: u32,
    pub height: u32,
    pub framerate: f64,
    pub codec: String,
    pub audio: String,
    /// Overall bitrate in kb/s.
    pub bitrate: u32,
}

impl MediaInfo {
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// A video discovered on disk, before fingerprinting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

impl VideoFile {
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            size: metadata.len(),
            modified: DateTime::<Utc>::from(metadata.modified()?),
        })
    }
}

/// A fingerprinted video. Published once by the scanner, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub media: MediaInfo,
    pub fingerprint: VideoFingerprint,
    #[serde(default)]
    pub from_cache: bool,
}

impl VideoRecord {
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string()
    }
}

impl AsRef<VideoFingerprint> for VideoRecord {
    fn as_ref(&self) -> &VideoFingerprint {
        &self.fingerprint
    }
}
