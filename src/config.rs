use crate::core::policy::MatchThresholds;
use crate::core::thumbnail::ThumbnailMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const APP_DIR: &str = "vidcull";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Could not determine the user config directory")]
    NoConfigDir,
}

/// Settings for one scan. Captured before extraction starts and not changed
/// while it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub thumbnail_mode: ThumbnailMode,
    pub thresholds: MatchThresholds,
    /// Lowercase extensions, without the dot.
    pub extensions: Vec<String>,
    pub jobs: usize,
    /// Fingerprint cache location; the platform cache dir when unset.
    pub cache_dir: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            thumbnail_mode: ThumbnailMode::default(),
            thresholds: MatchThresholds::default(),
            extensions: [
                "3gp", "asf", "avi", "divx", "flv", "m2ts", "m4v", "mkv", "mov", "mp4", "mpeg",
                "mpg", "mts", "ogv", "rm", "rmvb", "ts", "vob", "webm", "wmv",
            ]
            .iter()
            .map(|ext| ext.to_string())
            .collect(),
            jobs: num_cpus::get(),
            cache_dir: None,
        }
    }
}

impl ScanConfig {
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
            .ok_or(ConfigError::NoConfigDir)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn cache_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::cache_dir()
                .map(|dir| dir.join(APP_DIR).join("fingerprints"))
                .ok_or(ConfigError::NoConfigDir),
        }
    }

    pub fn accepts_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|allowed| *allowed == ext))
    }

    pub fn worker_count(&self) -> usize {
        self.jobs.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::ComparisonMode;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.json");

        let mut config = ScanConfig {
            thumbnail_mode: ThumbnailMode::CutEnds,
            jobs: 3,
            cache_dir: Some(temp_dir.path().join("cache")),
            ..Default::default()
        };
        config.thresholds.mode = ComparisonMode::Ssim;
        config.thresholds.set_phash_min(50);
        config.save(&path).unwrap();

        let loaded = ScanConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.thresholds.phash_min(), 50);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = ScanConfig::load_or_default(&temp_dir.path().join("absent.json")).unwrap();
        assert_eq!(config, ScanConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{ "thumbnail_mode": "thumb4", "jobs": 2 }"#).unwrap();

        let config = ScanConfig::load(&path).unwrap();
        assert_eq!(config.thumbnail_mode, ThumbnailMode::Thumb4);
        assert_eq!(config.jobs, 2);
        assert_eq!(config.thresholds, MatchThresholds::default());
        assert!(config.extensions.contains(&"mkv".to_string()));
    }

    #[test]
    fn test_invalid_file_is_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{ broken").unwrap();

        assert!(matches!(
            ScanConfig::load(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_extension_filter_ignores_case() {
        let config = ScanConfig::default();
        assert!(config.accepts_extension(Path::new("/a/Movie.MP4")));
        assert!(config.accepts_extension(Path::new("clip.webm")));
        assert!(!config.accepts_extension(Path::new("notes.txt")));
        assert!(!config.accepts_extension(Path::new("no_extension")));
    }

    #[test]
    fn test_explicit_cache_dir_wins() {
        let config = ScanConfig {
            cache_dir: Some(PathBuf::from("/tmp/vidcull-cache")),
            ..Default::default()
        };
        assert_eq!(
            config.cache_dir().unwrap(),
            PathBuf::from("/tmp/vidcull-cache")
        );
        assert_eq!(ScanConfig { jobs: 0, ..config }.worker_count(), 1);
    }
}
