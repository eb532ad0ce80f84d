use crate::core::fingerprint::{GrayMatrix, SSIM_SIZE};
use serde::{Deserialize, Serialize};

/// Durations this close (inclusive) count as the same runtime.
pub const SAME_DURATION_WINDOW_MS: i64 = 1000;
pub const HASH_BITS: i32 = 64;

const C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

/// Number of equal bits between two hashes, 64 for identical hashes.
#[inline]
pub fn matching_bits(a: u64, b: u64) -> i32 {
    HASH_BITS - (a ^ b).count_ones() as i32
}

/// Bit-equivalent bias for two runtimes: `+same_bonus` when they are within
/// a second of each other, `-different_penalty` otherwise.
pub fn duration_modifier(
    left_ms: i64,
    right_ms: i64,
    same_bonus: i32,
    different_penalty: i32,
) -> i32 {
    if (left_ms - right_ms).abs() <= SAME_DURATION_WINDOW_MS {
        same_bonus
    } else {
        -different_penalty
    }
}

/// pHash similarity in `0..=64` after applying the duration modifier.
///
/// A rejected (zero) region on either side scores 0.
pub fn phash_similarity(left: u64, right: u64, modifier: i32) -> i32 {
    if left == 0 || right == 0 {
        return 0;
    }
    (matching_bits(left, right) + modifier).clamp(0, HASH_BITS)
}

/// SSIM window size. Block size is `2^(index + 1)` for indices 1 through 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SsimBlockSize {
    #[serde(rename = "4")]
    B4,
    #[serde(rename = "8")]
    B8,
    #[default]
    #[serde(rename = "16")]
    B16,
    #[serde(rename = "32")]
    B32,
}

impl SsimBlockSize {
    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            1 => Some(Self::B4),
            2 => Some(Self::B8),
            3 => Some(Self::B16),
            4 => Some(Self::B32),
            _ => None,
        }
    }

    pub fn from_pixels(pixels: usize) -> Option<Self> {
        match pixels {
            4 => Some(Self::B4),
            8 => Some(Self::B8),
            16 => Some(Self::B16),
            32 => Some(Self::B32),
            _ => None,
        }
    }

    pub fn pixels(self) -> usize {
        match self {
            Self::B4 => 4,
            Self::B8 => 8,
            Self::B16 => 16,
            Self::B32 => 32,
        }
    }
}

/// Mean SSIM over non-overlapping windows of `block_size`. A block larger
/// than the matrix covers the whole matrix.
pub fn ssim(left: &GrayMatrix, right: &GrayMatrix, block_size: SsimBlockSize) -> f64 {
    let block = block_size.pixels().min(SSIM_SIZE);
    let per_side = SSIM_SIZE / block;
    let mut total = 0.0;

    for by in 0..per_side {
        for bx in 0..per_side {
            total += window_ssim(left, right, by * block, bx * block, block);
        }
    }

    total / (per_side * per_side) as f64
}

/// SSIM plus the duration modifier scaled from bits into SSIM units.
pub fn ssim_similarity(
    left: &GrayMatrix,
    right: &GrayMatrix,
    block_size: SsimBlockSize,
    modifier: i32,
) -> f64 {
    ssim(left, right, block_size) + modifier as f64 / HASH_BITS as f64
}

/// Clamp a score for display; comparisons use the raw value.
pub fn display_similarity(value: f64) -> f64 {
    value.min(1.0)
}

fn window_ssim(
    left: &GrayMatrix,
    right: &GrayMatrix,
    top: usize,
    col: usize,
    block: usize,
) -> f64 {
    let count = (block * block) as f64;

    let mean_l = window_values(left, top, col, block).sum::<f64>() / count;
    let mean_r = window_values(right, top, col, block).sum::<f64>() / count;

    let (mut var_l, mut var_r, mut cov) = (0.0, 0.0, 0.0);
    let pairs = window_values(left, top, col, block).zip(window_values(right, top, col, block));
    for (l, r) in pairs {
        let dl = l - mean_l;
        let dr = r - mean_r;
        var_l += dl * dl;
        var_r += dr * dr;
        cov += dl * dr;
    }
    var_l /= count;
    var_r /= count;
    cov /= count;

    ((2.0 * mean_l * mean_r + C1) * (2.0 * cov + C2))
        / ((mean_l * mean_l + mean_r * mean_r + C1) * (var_l + var_r + C2))
}

fn window_values(
    matrix: &GrayMatrix,
    top: usize,
    col: usize,
    block: usize,
) -> impl Iterator<Item = f64> {
    matrix[top..top + block]
        .iter()
        .flat_map(move |row| row[col..col + block].iter().map(|&v| v as f64))
}
