use crate::core::fingerprint::DecodeError;
use crate::core::video::MediaInfo;
use crate::services::probe::FrameProvider;
use image::{DynamicImage, GenericImageView, RgbImage, imageops::FilterType};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// When a capture fails the usable span shrinks by this many percent.
const GO_BACKWARDS_PERCENT: i64 = 6;
/// Retries stop once less than this share of the duration remains.
const VIDEO_STILL_USABLE: i64 = 90;
const CELL_MAX_WIDTH: u32 = 448;
const CELL_MAX_HEIGHT: u32 = 336;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no frame")]
    NoFrame,

    #[error("resolution mismatch: expected {expected_width}x{expected_height}, got {width}x{height}")]
    ResolutionMismatch {
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// How many frames are sampled from a video and how they are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThumbnailMode {
    Thumb1,
    Thumb2,
    Thumb3,
    Thumb4,
    Thumb6,
    #[default]
    Thumb8,
    Thumb9,
    Thumb12,
    Thumb16,
    /// 8 frames from the beginning and 8 from the end, hashed separately.
    CutEnds,
}

impl ThumbnailMode {
    pub const ALL: [ThumbnailMode; 10] = [
        Self::Thumb1,
        Self::Thumb2,
        Self::Thumb3,
        Self::Thumb4,
        Self::Thumb6,
        Self::Thumb8,
        Self::Thumb9,
        Self::Thumb12,
        Self::Thumb16,
        Self::CutEnds,
    ];

    pub fn cols(self) -> u32 {
        match self {
            Self::Thumb1 => 1,
            Self::Thumb2 | Self::Thumb4 => 2,
            Self::Thumb3 | Self::Thumb6 | Self::Thumb9 => 3,
            Self::Thumb8 | Self::Thumb12 | Self::Thumb16 | Self::CutEnds => 4,
        }
    }

    pub fn rows(self) -> u32 {
        match self {
            Self::Thumb1 | Self::Thumb2 | Self::Thumb3 => 1,
            Self::Thumb4 | Self::Thumb6 | Self::Thumb8 => 2,
            Self::Thumb9 | Self::Thumb12 => 3,
            Self::Thumb16 | Self::CutEnds => 4,
        }
    }

    pub fn frame_count(self) -> usize {
        (self.cols() * self.rows()) as usize
    }

    /// Hashed regions per video: one for the whole grid, or one per cell in cut-ends mode.
    pub fn region_count(self) -> usize {
        match self {
            Self::CutEnds => 16,
            _ => 1,
        }
    }

    /// Capture positions in percent of the duration, in grid order.
    pub fn percentages(self) -> Vec<i64> {
        match self {
            Self::CutEnds => (1..=8)
                .map(|i| i * 2)
                .chain((0..8).map(|i| 84 + i * 2))
                .collect(),
            _ => {
                let count = self.frame_count() as i64;
                (1..=count).map(|i| 100 * i / (count + 1)).collect()
            }
        }
    }

    /// Stable name, also used to salt cache ids.
    pub fn name(self) -> &'static str {
        match self {
            Self::Thumb1 => "thumb1",
            Self::Thumb2 => "thumb2",
            Self::Thumb3 => "thumb3",
            Self::Thumb4 => "thumb4",
            Self::Thumb6 => "thumb6",
            Self::Thumb8 => "thumb8",
            Self::Thumb9 => "thumb9",
            Self::Thumb12 => "thumb12",
            Self::Thumb16 => "thumb16",
            Self::CutEnds => "cut-ends",
        }
    }
}

impl std::fmt::Display for ThumbnailMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Capture the sample frames of a video and assemble them into one grid image.
///
/// Frames are taken last to first. A failed capture restarts the whole grid
/// over a shorter span of the video until less than 90% of it would remain.
pub fn build_sample_grid(
    provider: &dyn FrameProvider,
    path: &Path,
    media: &MediaInfo,
    mode: ThumbnailMode,
) -> Result<DynamicImage, CaptureError> {
    let (cell_width, cell_height) = cell_size(media.width, media.height);
    let cols = mode.cols();
    let mut grid = RgbImage::new(cols * cell_width, mode.rows() * cell_height);

    let percentages = mode.percentages();
    let mut of_duration = 100;
    let mut capture = percentages.len();

    while capture > 0 {
        capture -= 1;
        let offset_ms = media.duration_ms * percentages[capture] * of_duration / (100 * 100);

        let Some(frame) = provider.capture_frame(path, offset_ms) else {
            of_duration -= GO_BACKWARDS_PERCENT;
            if of_duration >= VIDEO_STILL_USABLE {
                log::debug!(
                    "Capture at {}ms failed for {}, retrying within {}% of the duration",
                    offset_ms,
                    path.display(),
                    of_duration
                );
                capture = percentages.len();
                continue;
            }
            return Err(CaptureError::NoFrame);
        };

        let (width, height) = frame.dimensions();
        if width > media.width || height > media.height {
            return Err(CaptureError::ResolutionMismatch {
                expected_width: media.width,
                expected_height: media.height,
                width,
                height,
            });
        }

        let cell = frame
            .resize_exact(cell_width, cell_height, FilterType::Triangle)
            .to_rgb8();
        let x = (capture as u32 % cols) * cell_width;
        let y = (capture as u32 / cols) * cell_height;
        image::imageops::replace(&mut grid, &cell, x as i64, y as i64);
    }

    Ok(DynamicImage::ImageRgb8(grid))
}

/// Frame size scaled down to fit a grid cell, keeping aspect ratio.
fn cell_size(width: u32, height: u32) -> (u32, u32) {
    let (width, height) = (width.max(1), height.max(1));
    let scaled = |value: u32, numerator: u32, denominator: u32| {
        ((value as u64 * numerator as u64 / denominator as u64) as u32).max(1)
    };

    if width > height {
        if width > CELL_MAX_WIDTH {
            return (CELL_MAX_WIDTH, scaled(height, CELL_MAX_WIDTH, width));
        }
    } else if height > CELL_MAX_HEIGHT {
        return (scaled(width, CELL_MAX_HEIGHT, height), CELL_MAX_HEIGHT);
    }
    (width, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::probe::ProbeError;
    use image::{ImageBuffer, Rgb};
    use std::sync::Mutex;

    struct FakeProvider {
        frame_width: u32,
        frame_height: u32,
        last_good_ms: i64,
        offsets: Mutex<Vec<i64>>,
    }

    impl FakeProvider {
        fn new(frame_width: u32, frame_height: u32, last_good_ms: i64) -> Self {
            Self {
                frame_width,
                frame_height,
                last_good_ms,
                offsets: Mutex::new(Vec::new()),
            }
        }
    }

    impl FrameProvider for FakeProvider {
        fn probe(&self, _path: &Path) -> Result<MediaInfo, ProbeError> {
            unreachable!("grid assembly never probes")
        }

        fn capture_frame(&self, _path: &Path, offset_ms: i64) -> Option<DynamicImage> {
            self.offsets.lock().unwrap().push(offset_ms);
            if offset_ms > self.last_good_ms {
                return None;
            }
            let shade = (offset_ms / 1000 % 200) as u8;
            let img = ImageBuffer::from_fn(self.frame_width, self.frame_height, |x, y| {
                Rgb([shade, ((x + y) % 256) as u8, 30])
            });
            Some(DynamicImage::ImageRgb8(img))
        }
    }

    fn media(width: u32, height: u32, duration_ms: i64) -> MediaInfo {
        MediaInfo {
            duration_ms,
            width,
            height,
            ..Default::default()
        }
    }

    #[test]
    fn test_layouts_cover_frame_counts() {
        for mode in ThumbnailMode::ALL {
            assert_eq!(mode.percentages().len(), mode.frame_count(), "{mode}");
        }
        assert_eq!(ThumbnailMode::Thumb8.cols(), 4);
        assert_eq!(ThumbnailMode::Thumb8.rows(), 2);
        assert_eq!(ThumbnailMode::Thumb12.frame_count(), 12);
        assert_eq!(ThumbnailMode::default(), ThumbnailMode::Thumb8);
    }

    #[test]
    fn test_percentages_spread_evenly() {
        assert_eq!(ThumbnailMode::Thumb1.percentages(), vec![50]);
        assert_eq!(ThumbnailMode::Thumb4.percentages(), vec![20, 40, 60, 80]);
    }

    #[test]
    fn test_cut_ends_samples_both_ends() {
        let p = ThumbnailMode::CutEnds.percentages();
        assert_eq!(&p[..8], &[2, 4, 6, 8, 10, 12, 14, 16]);
        assert_eq!(&p[8..], &[84, 86, 88, 90, 92, 94, 96, 98]);
        assert_eq!(ThumbnailMode::CutEnds.region_count(), 16);
        assert_eq!(ThumbnailMode::Thumb16.region_count(), 1);
    }

    #[test]
    fn test_mode_names_match_serde() {
        for mode in ThumbnailMode::ALL {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{}\"", mode.name()));
        }
    }

    #[test]
    fn test_cell_size_fits_bounds() {
        assert_eq!(cell_size(1920, 1080), (448, 252));
        assert_eq!(cell_size(1080, 1920), (189, 336));
        assert_eq!(cell_size(320, 240), (320, 240));
        assert_eq!(cell_size(0, 0), (1, 1));
    }

    #[test]
    fn test_grid_captured_in_reverse_order() {
        let provider = FakeProvider::new(640, 360, i64::MAX);
        let grid = build_sample_grid(
            &provider,
            Path::new("a.mp4"),
            &media(640, 360, 100_000),
            ThumbnailMode::Thumb4,
        )
        .unwrap();

        assert_eq!(grid.dimensions(), (2 * 448, 2 * 252));
        let offsets = provider.offsets.lock().unwrap();
        assert_eq!(*offsets, vec![80_000, 60_000, 40_000, 20_000]);
    }

    #[test]
    fn test_failed_capture_retries_closer_to_start() {
        let provider = FakeProvider::new(320, 240, 76_000);
        let result = build_sample_grid(
            &provider,
            Path::new("b.mp4"),
            &media(320, 240, 100_000),
            ThumbnailMode::Thumb4,
        );

        assert!(result.is_ok());
        let offsets = provider.offsets.lock().unwrap();
        assert_eq!(offsets[0], 80_000);
        // 80% of the remaining 94%
        assert_eq!(offsets[1], 75_200);
        assert_eq!(offsets.len(), 5);
    }

    #[test]
    fn test_no_frame_after_retries_exhausted() {
        let provider = FakeProvider::new(320, 240, -1);
        let result = build_sample_grid(
            &provider,
            Path::new("c.mp4"),
            &media(320, 240, 60_000),
            ThumbnailMode::Thumb8,
        );

        assert!(matches!(result, Err(CaptureError::NoFrame)));
        // 100% and 94% are attempted, 88% is below the usable span
        assert_eq!(provider.offsets.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_oversized_frame_is_resolution_mismatch() {
        let provider = FakeProvider::new(1280, 720, i64::MAX);
        let result = build_sample_grid(
            &provider,
            Path::new("d.mp4"),
            &media(640, 360, 10_000),
            ThumbnailMode::Thumb2,
        );

        assert!(matches!(
            result,
            Err(CaptureError::ResolutionMismatch {
                width: 1280,
                height: 720,
                ..
            })
        ));
    }
}
