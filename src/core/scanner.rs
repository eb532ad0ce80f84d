use crate::config::ScanConfig;
use crate::core::fingerprint::{FingerprintExtractor, VideoFingerprint};
use crate::core::hash::unique_id;
use crate::core::thumbnail::{CaptureError, build_sample_grid};
use crate::core::video::{MediaInfo, VideoFile, VideoRecord};
use crate::services::cache::{CachedFingerprint, FingerprintCache};
use crate::services::probe::{FrameProvider, ProbeError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Why a single video was left out of the collection.
#[derive(Debug, Error)]
pub enum VideoError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("Taking screen captures failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("All screen captures are blank")]
    Blank,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgress {
    pub files_processed: usize,
    pub total_files: usize,
    pub current_file: String,
    pub estimated_time_remaining: Option<u64>, // seconds
    pub phase: ScanPhase,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScanPhase {
    Discovery,
    Fingerprinting,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of one extraction task.
#[derive(Debug)]
pub enum ExtractionOutcome {
    Accepted(VideoRecord),
    Rejected(Rejection),
    /// Not attempted because the pass was cancelled.
    Skipped,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Fingerprinted videos, ordered by path.
    pub accepted: Vec<VideoRecord>,
    pub rejected: Vec<Rejection>,
    pub cancelled: bool,
}

pub struct ScannerService {
    config: ScanConfig,
    provider: Box<dyn FrameProvider>,
    cache: Option<Box<dyn FingerprintCache>>,
    extractor: FingerprintExtractor,
    progress_sender: Option<mpsc::UnboundedSender<ScanProgress>>,
    cancellation_token: Arc<AtomicBool>,
}

impl ScannerService {
    pub fn new(config: ScanConfig, provider: Box<dyn FrameProvider>) -> Self {
        let extractor = FingerprintExtractor::new(config.thumbnail_mode);
        Self {
            config,
            provider,
            cache: None,
            extractor,
            progress_sender: None,
            cancellation_token: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_cache(mut self, cache: Box<dyn FingerprintCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_progress_sender(mut self, sender: mpsc::UnboundedSender<ScanProgress>) -> Self {
        self.progress_sender = Some(sender);
        self
    }

    pub fn get_cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancellation_token.clone()
    }

    pub fn cancel_scan(&self) {
        self.cancellation_token.store(true, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation_token.load(Ordering::Relaxed)
    }

    /// Discover and fingerprint every video under `paths`.
    pub fn scan(&self, paths: &[PathBuf]) -> Result<ScanOutcome, ScanError> {
        let files = self.discover_files(paths)?;
        self.fingerprint_all(files)
    }

    /// Walk `paths` for files with a configured video extension. Paths may
    /// be directories or single files; results are unique and sorted.
    pub fn discover_files(&self, paths: &[PathBuf]) -> Result<Vec<VideoFile>, ScanError> {
        for path in paths {
            if !path.exists() {
                return Err(ScanError::InvalidPath {
                    path: path.to_string_lossy().to_string(),
                });
            }
        }

        self.send_progress(ScanProgress {
            files_processed: 0,
            total_files: 0,
            current_file: "Discovering files...".to_string(),
            estimated_time_remaining: None,
            phase: ScanPhase::Discovery,
        });

        let mut found = BTreeSet::new();
        for root_path in paths {
            for entry in WalkDir::new(root_path)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if self.is_cancelled() {
                    break;
                }
                let path = entry.path();
                if path.is_file() && self.config.accepts_extension(path) {
                    found.insert(path.to_path_buf());
                }
            }
        }

        Ok(found
            .into_iter()
            .filter_map(|path| match VideoFile::from_path(&path) {
                Ok(file) => Some(file),
                Err(e) => {
                    log::warn!("Could not read metadata for {}: {}", path.display(), e);
                    None
                }
            })
            .collect())
    }

    /// Fingerprint `files` on a worker pool sized by the config. A cancelled
    /// pass still returns every video finished before the cancellation.
    pub fn fingerprint_all(&self, files: Vec<VideoFile>) -> Result<ScanOutcome, ScanError> {
        let total_files = files.len();
        let processed_count = AtomicUsize::new(0);
        let start_time = std::time::Instant::now();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.worker_count())
            .build()?;

        let outcomes: Vec<ExtractionOutcome> = pool.install(|| {
            files
                .par_iter()
                .map(|file| {
                    if self.is_cancelled() {
                        return ExtractionOutcome::Skipped;
                    }

                    let outcome = self.process_single_video(file);

                    let current_count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
                    let elapsed = start_time.elapsed().as_secs();
                    let estimated_remaining = if elapsed > 0 {
                        let rate = current_count as f64 / elapsed as f64;
                        Some(((total_files - current_count) as f64 / rate) as u64)
                    } else {
                        None
                    };

                    self.send_progress(ScanProgress {
                        files_processed: current_count,
                        total_files,
                        current_file: file.path.to_string_lossy().to_string(),
                        estimated_time_remaining: estimated_remaining,
                        phase: ScanPhase::Fingerprinting,
                    });

                    outcome
                })
                .collect()
        });

        let mut scan = ScanOutcome {
            cancelled: self.is_cancelled(),
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                ExtractionOutcome::Accepted(record) => scan.accepted.push(record),
                ExtractionOutcome::Rejected(rejection) => scan.rejected.push(rejection),
                ExtractionOutcome::Skipped => {}
            }
        }
        scan.accepted.sort_by(|a, b| a.path.cmp(&b.path));

        log::info!(
            "Fingerprinting finished: {} accepted, {} rejected{}",
            scan.accepted.len(),
            scan.rejected.len(),
            if scan.cancelled { " (cancelled)" } else { "" }
        );

        self.send_progress(ScanProgress {
            files_processed: processed_count.load(Ordering::Relaxed),
            total_files,
            current_file: "Scan complete".to_string(),
            estimated_time_remaining: Some(0),
            phase: ScanPhase::Complete,
        });

        Ok(scan)
    }

    /// Fingerprint one video, reusing the cached result when there is one.
    pub fn process_single_video(&self, file: &VideoFile) -> ExtractionOutcome {
        let id = unique_id(&file.path, &file.modified, self.config.thumbnail_mode.name());

        if let Some(cache) = &self.cache {
            match cache.read_fingerprint(&id) {
                Ok(Some(entry)) => {
                    log::debug!("Cache hit for {}", file.path.display());
                    return ExtractionOutcome::Accepted(record(file, &id.0, entry, true));
                }
                Ok(None) => {}
                Err(e) => log::warn!("Ignoring cache entry for {}: {}", file.path.display(), e),
            }
        }

        match self.fingerprint_video(&file.path, file.size) {
            Ok((media, fingerprint)) => {
                let entry = CachedFingerprint { media, fingerprint };
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.write_fingerprint(&id, &entry) {
                        log::warn!("Failed to cache {}: {}", file.path.display(), e);
                    }
                }
                ExtractionOutcome::Accepted(record(file, &id.0, entry, false))
            }
            Err(e) => {
                log::info!("Rejected {}: {}", file.path.display(), e);
                ExtractionOutcome::Rejected(Rejection {
                    path: file.path.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn fingerprint_video(
        &self,
        path: &Path,
        size: u64,
    ) -> Result<(MediaInfo, VideoFingerprint), VideoError> {
        let media = self.provider.probe(path)?;
        let grid = build_sample_grid(
            &*self.provider,
            path,
            &media,
            self.config.thumbnail_mode,
        )?;
        let fingerprint = self
            .extractor
            .extract(&grid)
            .map_err(CaptureError::from)?
            .with_media(media.duration_ms, size);

        if fingerprint.is_blank() {
            return Err(VideoError::Blank);
        }
        Ok((media, fingerprint))
    }

    fn send_progress(&self, progress: ScanProgress) {
        if let Some(sender) = &self.progress_sender {
            let _ = sender.send(progress);
        }
    }
}

fn record(file: &VideoFile, id: &str, entry: CachedFingerprint, from_cache: bool) -> VideoRecord {
    VideoRecord {
        id: id.to_string(),
        path: file.path.clone(),
        size: file.size,
        modified: file.modified,
        media: entry.media,
        fingerprint: entry.fingerprint,
        from_cache,
    }
}
