use crate::core::thumbnail::ThumbnailMode;
use image::{DynamicImage, GenericImageView, imageops::FilterType};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

/// Side of the square the perceptual hash is computed from.
pub const PHASH_SIZE: u32 = 32;
/// Side of the grayscale matrix kept for SSIM.
pub const SSIM_SIZE: usize = 16;
/// Regions whose summed deviation from the first pixel stays below this are monochrome.
pub const ALMOST_BLACK_BITMAP: u32 = 1500;
/// Upper bound on hashed regions per video (cut-ends mode).
pub const MAX_REGIONS: usize = 16;

const DCT_BLOCK: usize = 8;

pub type GrayMatrix = [[f32; SSIM_SIZE]; SSIM_SIZE];

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Image decoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Empty sample grid: {width}x{height}")]
    Empty { width: u32, height: u32 },
}

/// Perceptual fingerprint of one video.
///
/// `hash[i] == 0` marks a region rejected as near-monochrome; such a region
/// never contributes a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFingerprint {
    pub hash: [u64; MAX_REGIONS],
    pub gray_matrix: [GrayMatrix; MAX_REGIONS],
    pub regions: usize,
    pub duration_ms: i64,
    pub size: u64,
}

impl VideoFingerprint {
    /// Fingerprint with the given region hashes and flat gray matrices.
    pub fn from_hashes(hashes: &[u64]) -> Self {
        let count = hashes.len().min(MAX_REGIONS);
        let mut hash = [0u64; MAX_REGIONS];
        hash[..count].copy_from_slice(&hashes[..count]);
        Self {
            hash,
            gray_matrix: [[[0.0; SSIM_SIZE]; SSIM_SIZE]; MAX_REGIONS],
            regions: count.max(1),
            duration_ms: 0,
            size: 0,
        }
    }

    pub fn with_media(mut self, duration_ms: i64, size: u64) -> Self {
        self.duration_ms = duration_ms;
        self.size = size;
        self
    }

    /// Number of populated regions (1, or 16 in cut-ends mode).
    pub fn region_count(&self) -> usize {
        self.regions.clamp(1, MAX_REGIONS)
    }

    /// True when every populated region was rejected as monochrome.
    pub fn is_blank(&self) -> bool {
        self.hash[..self.region_count()].iter().all(|&h| h == 0)
    }
}

impl AsRef<VideoFingerprint> for VideoFingerprint {
    fn as_ref(&self) -> &VideoFingerprint {
        self
    }
}

/// Turns a sample grid into a [`VideoFingerprint`].
pub struct FingerprintExtractor {
    mode: ThumbnailMode,
    cosines: [[f64; PHASH_SIZE as usize]; DCT_BLOCK],
}

impl FingerprintExtractor {
    pub fn new(mode: ThumbnailMode) -> Self {
        let n = PHASH_SIZE as usize;
        let mut cosines = [[0.0; PHASH_SIZE as usize]; DCT_BLOCK];
        for (k, row) in cosines.iter_mut().enumerate() {
            for (x, value) in row.iter_mut().enumerate() {
                *value = (PI * (2 * x + 1) as f64 * k as f64 / (2 * n) as f64).cos();
            }
        }
        Self { mode, cosines }
    }

    pub fn mode(&self) -> ThumbnailMode {
        self.mode
    }

    /// Decode an encoded sample grid and fingerprint it.
    pub fn extract_from_bytes(&self, bytes: &[u8]) -> Result<VideoFingerprint, DecodeError> {
        let grid = image::load_from_memory(bytes)?;
        self.extract(&grid)
    }

    /// Fingerprint a sample grid. Duration and size are left at zero, see
    /// [`VideoFingerprint::with_media`].
    pub fn extract(&self, grid: &DynamicImage) -> Result<VideoFingerprint, DecodeError> {
        let (width, height) = grid.dimensions();
        let regions = self.mode.region_count();
        let cols = self.mode.cols();
        let rows = self.mode.rows();

        if width < cols || height < rows {
            return Err(DecodeError::Empty { width, height });
        }

        let mut fingerprint = VideoFingerprint::from_hashes(&vec![0; regions]);

        for region in 0..regions {
            let image = if regions == 1 {
                grid.clone()
            } else {
                let cell_w = width / cols;
                let cell_h = height / rows;
                let x = (region as u32 % cols) * cell_w;
                let y = (region as u32 / cols) * cell_h;
                grid.crop_imm(x, y, cell_w, cell_h)
            };

            fingerprint.hash[region] = self.compute_phash(&image);
            fingerprint.gray_matrix[region] = gray_matrix(&image);
        }

        Ok(fingerprint)
    }

    fn compute_phash(&self, image: &DynamicImage) -> u64 {
        let gray = image
            .resize_exact(PHASH_SIZE, PHASH_SIZE, FilterType::Triangle)
            .to_luma8();
        let pixels = gray.as_raw();

        let first = pixels[0] as i32;
        let shades: u32 = pixels[1..]
            .iter()
            .map(|&p| (first - p as i32).unsigned_abs())
            .sum();
        if shades < ALMOST_BLACK_BITMAP {
            return 0;
        }

        let coefficients = self.low_frequency_dct(pixels);
        let dc = coefficients[0];
        let average = (coefficients.iter().sum::<f64>() - dc) / 63.0;

        coefficients
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c > average)
            .fold(0u64, |hash, (bit, _)| hash | (1u64 << bit))
    }

    /// Orthonormal 2-D DCT-II of a 32x32 plane, top-left 8x8 block in row-major order.
    fn low_frequency_dct(&self, pixels: &[u8]) -> [f64; DCT_BLOCK * DCT_BLOCK] {
        let n = PHASH_SIZE as usize;

        // rows first: partial[y][v]
        let mut partial = vec![[0.0f64; DCT_BLOCK]; n];
        for (y, row) in partial.iter_mut().enumerate() {
            let line = &pixels[y * n..(y + 1) * n];
            for (v, value) in row.iter_mut().enumerate() {
                *value = line
                    .iter()
                    .zip(self.cosines[v].iter())
                    .map(|(&p, &c)| p as f64 * c)
                    .sum();
            }
        }

        let scale = |k: usize| {
            if k == 0 {
                (1.0 / n as f64).sqrt()
            } else {
                (2.0 / n as f64).sqrt()
            }
        };

        let mut out = [0.0f64; DCT_BLOCK * DCT_BLOCK];
        for u in 0..DCT_BLOCK {
            for v in 0..DCT_BLOCK {
                let sum: f64 = partial
                    .iter()
                    .zip(self.cosines[u].iter())
                    .map(|(row, &c)| row[v] * c)
                    .sum();
                out[u * DCT_BLOCK + v] = scale(u) * scale(v) * sum;
            }
        }
        out
    }
}

fn gray_matrix(image: &DynamicImage) -> GrayMatrix {
    let small = image
        .resize_exact(SSIM_SIZE as u32, SSIM_SIZE as u32, FilterType::Triangle)
        .to_luma8();
    let mut matrix = [[0.0f32; SSIM_SIZE]; SSIM_SIZE];
    for (x, y, pixel) in small.enumerate_pixels() {
        matrix[y as usize][x as usize] = pixel[0] as f32;
    }
    matrix
}
