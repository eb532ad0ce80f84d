use crate::core::fingerprint::VideoFingerprint;
use crate::core::similarity::{
    HASH_BITS, SsimBlockSize, duration_modifier, phash_similarity, ssim_similarity,
};
use serde::{Deserialize, Serialize};

/// pHash similarity a pair needs before SSIM is worth computing.
pub const SSIM_PREFILTER_BITS: i32 = 44;
/// Margin kept between min and max when one bound is pushed by the other.
pub const PHASH_MARGIN: i32 = 1;
pub const SSIM_MARGIN: f64 = 0.01;

/// SSIM upper bound that no biased score reaches, whatever the bonus.
pub const SSIM_MAX_UNBOUNDED: f64 = 100.0;

pub const DEFAULT_PHASH_MIN: i32 = 57;
pub const DEFAULT_SSIM_MIN: f64 = 0.89;
pub const DEFAULT_SAME_DURATION_BONUS: i32 = 1;
pub const DEFAULT_DIFFERENT_DURATION_PENALTY: i32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonMode {
    #[default]
    Phash,
    Ssim,
}

/// Match bands and duration bias.
///
/// Bounds are private so every edit goes through the setters, which keep
/// `min < max` for both bands. Deserializing replays the setters too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawThresholds")]
pub struct MatchThresholds {
    pub mode: ComparisonMode,
    phash_min: i32,
    phash_max: i32,
    ssim_min: f64,
    ssim_max: f64,
    pub same_duration_bonus: i32,
    pub different_duration_penalty: i32,
    pub ssim_block_size: SsimBlockSize,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            mode: ComparisonMode::Phash,
            phash_min: DEFAULT_PHASH_MIN,
            phash_max: HASH_BITS,
            ssim_min: DEFAULT_SSIM_MIN,
            ssim_max: SSIM_MAX_UNBOUNDED,
            same_duration_bonus: DEFAULT_SAME_DURATION_BONUS,
            different_duration_penalty: DEFAULT_DIFFERENT_DURATION_PENALTY,
            ssim_block_size: SsimBlockSize::default(),
        }
    }
}

impl MatchThresholds {
    pub fn with_mode(mut self, mode: ComparisonMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn phash_min(&self) -> i32 {
        self.phash_min
    }

    pub fn phash_max(&self) -> i32 {
        self.phash_max
    }

    pub fn ssim_min(&self) -> f64 {
        self.ssim_min
    }

    pub fn ssim_max(&self) -> f64 {
        self.ssim_max
    }

    pub fn set_phash_min(&mut self, value: i32) {
        self.phash_min = value;
        if self.phash_max <= self.phash_min {
            self.phash_max = self.phash_min + PHASH_MARGIN;
        }
    }

    pub fn set_phash_max(&mut self, value: i32) {
        self.phash_max = value;
        if self.phash_max <= self.phash_min {
            self.phash_min = self.phash_max - PHASH_MARGIN;
        }
    }

    pub fn set_ssim_min(&mut self, value: f64) {
        self.ssim_min = value;
        if self.ssim_max <= self.ssim_min {
            self.ssim_max = self.ssim_min + SSIM_MARGIN;
        }
    }

    pub fn set_ssim_max(&mut self, value: f64) {
        self.ssim_max = value;
        if self.ssim_max <= self.ssim_min {
            self.ssim_min = self.ssim_max - SSIM_MARGIN;
        }
    }

    /// Lower slider: `percent` of SSIM and the same share of 64 bits.
    pub fn set_lower_percent(&mut self, percent: u32) {
        let fraction = percent as f64 / 100.0;
        self.set_ssim_min(fraction);
        self.set_phash_min((HASH_BITS as f64 * fraction).round() as i32);
    }

    /// Upper slider, see [`MatchThresholds::set_lower_percent`]. At 100% the
    /// SSIM bound is lifted, since duration bias can push scores above 1.
    pub fn set_upper_percent(&mut self, percent: u32) {
        let fraction = percent as f64 / 100.0;
        if percent >= 100 {
            self.set_ssim_max(SSIM_MAX_UNBOUNDED);
        } else {
            self.set_ssim_max(fraction);
        }
        self.set_phash_max((HASH_BITS as f64 * fraction).round() as i32);
    }

    fn phash_band(&self, similarity: i32) -> bool {
        self.phash_min <= similarity && similarity <= self.phash_max
    }

    fn ssim_band(&self, similarity: f64) -> bool {
        self.ssim_min < similarity && similarity <= self.ssim_max
    }

    fn ssim_gate(&self) -> i32 {
        self.phash_min.max(SSIM_PREFILTER_BITS)
    }
}

/// On-disk shape of [`MatchThresholds`]; missing fields take the defaults.
#[derive(Deserialize)]
#[serde(default)]
struct RawThresholds {
    mode: ComparisonMode,
    phash_min: i32,
    phash_max: i32,
    ssim_min: f64,
    ssim_max: f64,
    same_duration_bonus: i32,
    different_duration_penalty: i32,
    ssim_block_size: SsimBlockSize,
}

impl Default for RawThresholds {
    fn default() -> Self {
        let defaults = MatchThresholds::default();
        Self {
            mode: defaults.mode,
            phash_min: defaults.phash_min,
            phash_max: defaults.phash_max,
            ssim_min: defaults.ssim_min,
            ssim_max: defaults.ssim_max,
            same_duration_bonus: defaults.same_duration_bonus,
            different_duration_penalty: defaults.different_duration_penalty,
            ssim_block_size: defaults.ssim_block_size,
        }
    }
}

impl From<RawThresholds> for MatchThresholds {
    /// Max first, then min: a valid band loads unchanged and an inverted one
    /// keeps its min and has its max pushed above it.
    fn from(raw: RawThresholds) -> Self {
        let mut thresholds = Self {
            mode: raw.mode,
            same_duration_bonus: raw.same_duration_bonus,
            different_duration_penalty: raw.different_duration_penalty,
            ssim_block_size: raw.ssim_block_size,
            ..Self::default()
        };
        thresholds.set_phash_max(raw.phash_max);
        thresholds.set_phash_min(raw.phash_min);
        thresholds.set_ssim_max(raw.ssim_max);
        thresholds.set_ssim_min(raw.ssim_min);
        thresholds
    }
}

/// Result of comparing two fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MatchVerdict {
    pub is_match: bool,
    /// Best biased pHash similarity over the region pairs examined.
    pub best_phash: i32,
    /// Best biased SSIM score, when any region pair cleared the pre-filter.
    pub best_ssim: Option<f64>,
}

impl MatchVerdict {
    /// The score of the scorer that gates `mode`.
    pub fn best_similarity(&self, mode: ComparisonMode) -> f64 {
        match mode {
            ComparisonMode::Phash => self.best_phash as f64,
            ComparisonMode::Ssim => self.best_ssim.unwrap_or(0.0),
        }
    }
}

/// Decide whether two fingerprints match.
///
/// Region pairs are scanned left region first; the scan stops at the first
/// pair that satisfies the band of the selected mode. Pairs involving a
/// rejected region are skipped.
pub fn matches(
    left: &VideoFingerprint,
    right: &VideoFingerprint,
    thresholds: &MatchThresholds,
) -> MatchVerdict {
    let modifier = duration_modifier(
        left.duration_ms,
        right.duration_ms,
        thresholds.same_duration_bonus,
        thresholds.different_duration_penalty,
    );

    let mut verdict = MatchVerdict::default();

    for l in 0..left.region_count() {
        for r in 0..right.region_count() {
            if left.hash[l] == 0 || right.hash[r] == 0 {
                continue;
            }
            let phash = phash_similarity(left.hash[l], right.hash[r], modifier);
            verdict.best_phash = verdict.best_phash.max(phash);

            let is_match = match thresholds.mode {
                ComparisonMode::Phash => thresholds.phash_band(phash),
                ComparisonMode::Ssim => {
                    if phash >= thresholds.ssim_gate() {
                        let ssim = ssim_similarity(
                            &left.gray_matrix[l],
                            &right.gray_matrix[r],
                            thresholds.ssim_block_size,
                            modifier,
                        );
                        verdict.best_ssim = Some(verdict.best_ssim.map_or(ssim, |b| b.max(ssim)));
                        thresholds.ssim_band(ssim)
                    } else {
                        false
                    }
                }
            };

            if is_match {
                verdict.is_match = true;
                return verdict;
            }
        }
    }

    verdict
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fingerprint::{MAX_REGIONS, SSIM_SIZE};

    fn fingerprint(hash: u64, duration_ms: i64) -> VideoFingerprint {
        VideoFingerprint::from_hashes(&[hash]).with_media(duration_ms, 1000)
    }

    fn textured(mut fp: VideoFingerprint, seed: usize) -> VideoFingerprint {
        for region in 0..MAX_REGIONS {
            for y in 0..SSIM_SIZE {
                for x in 0..SSIM_SIZE {
                    fp.gray_matrix[region][y][x] = ((x * 11 + y * 5 + seed * 3) % 256) as f32;
                }
            }
        }
        fp
    }

    #[test]
    fn test_phash_band_is_inclusive() {
        let thresholds = MatchThresholds::default();
        let a = fingerprint(u64::MAX, 60_000);
        let b = fingerprint(0xFFFF_FFFF_FFFF_FFF0, 60_000);

        let verdict = matches(&a, &b, &thresholds);
        assert!(verdict.is_match);
        assert_eq!(verdict.best_phash, 61);

        let mut strict = MatchThresholds::default();
        strict.set_phash_min(62);
        assert!(!matches(&a, &b, &strict).is_match);

        let mut exact = MatchThresholds::default();
        exact.set_phash_min(61);
        exact.set_phash_max(61);
        assert!(matches(&a, &b, &exact).is_match);
    }

    #[test]
    fn test_different_duration_penalty_breaks_match() {
        let thresholds = MatchThresholds::default();
        let a = fingerprint(u64::MAX, 60_000);
        let b = fingerprint(0xFFFF_FFFF_FFFF_FFF0, 75_000);

        let verdict = matches(&a, &b, &thresholds);
        assert!(!verdict.is_match);
        assert_eq!(verdict.best_phash, 56);
    }

    #[test]
    fn test_blank_side_never_matches() {
        let mut thresholds = MatchThresholds::default();
        thresholds.set_phash_min(0);
        let a = fingerprint(u64::MAX, 1_000);
        let b = fingerprint(0, 1_000);

        let verdict = matches(&a, &b, &thresholds);
        assert!(!verdict.is_match);
        assert_eq!(verdict.best_phash, 0);
        assert!(!matches(&b, &b, &MatchThresholds::default()).is_match);
    }

    #[test]
    fn test_cut_ends_zero_regions_never_match() {
        let a = VideoFingerprint::from_hashes(&[0; 16]).with_media(5_000, 10);
        let hashes: Vec<u64> = (1..=16).map(|i| 0x0F0F_0F0F_0F0F_0F0F ^ i).collect();
        let b = VideoFingerprint::from_hashes(&hashes).with_media(5_000, 10);

        for mode in [ComparisonMode::Phash, ComparisonMode::Ssim] {
            let mut thresholds = MatchThresholds::default().with_mode(mode);
            thresholds.set_phash_min(0);
            thresholds.set_ssim_min(-1.0);
            let verdict = matches(&textured(a.clone(), 1), &textured(b.clone(), 1), &thresholds);
            assert!(!verdict.is_match, "{mode:?}");
        }
    }

    #[test]
    fn test_cut_ends_first_matching_region_wins() {
        let mut left = [0x1234_5678_9ABC_DEF0u64; 16];
        left[3] = 0xAAAA_AAAA_AAAA_AAAA;
        let mut right = [0x5555_5555_5555_5555u64; 16];
        right[9] = 0xAAAA_AAAA_AAAA_AAAA;

        let a = VideoFingerprint::from_hashes(&left).with_media(1_000, 1);
        let b = VideoFingerprint::from_hashes(&right).with_media(1_000, 1);

        let verdict = matches(&a, &b, &MatchThresholds::default());
        assert!(verdict.is_match);
        assert_eq!(verdict.best_phash, 64);
    }

    #[test]
    fn test_ssim_mode_matches_identical_content() {
        let thresholds = MatchThresholds::default().with_mode(ComparisonMode::Ssim);
        let a = textured(fingerprint(0xF0F0_F0F0_F0F0_F0F0, 30_000), 2);
        let b = a.clone();

        let verdict = matches(&a, &b, &thresholds);
        assert!(verdict.is_match);
        let ssim = verdict.best_ssim.unwrap();
        assert!((ssim - (1.0 + 1.0 / 64.0)).abs() < 1e-9);
        assert_eq!(verdict.best_similarity(ComparisonMode::Ssim), ssim);
    }

    #[test]
    fn test_ssim_skipped_below_prefilter() {
        let mut thresholds = MatchThresholds::default().with_mode(ComparisonMode::Ssim);
        thresholds.set_phash_min(20);
        // 25 differing bits: 39 + 1 bonus = 40, below the fixed 44-bit gate
        let a = textured(fingerprint(u64::MAX, 30_000), 4);
        let b = textured(fingerprint(u64::MAX << 25, 30_000), 4);

        let verdict = matches(&a, &b, &thresholds);
        assert!(!verdict.is_match);
        assert_eq!(verdict.best_phash, 40);
        assert_eq!(verdict.best_ssim, None);
    }

    #[test]
    fn test_phash_min_pushes_max() {
        let mut thresholds = MatchThresholds::default();
        thresholds.set_phash_max(55);
        thresholds.set_phash_min(60);
        assert!(thresholds.phash_max() >= 61);
        assert!(thresholds.phash_min() < thresholds.phash_max());
    }

    #[test]
    fn test_max_edits_push_min_down() {
        let mut thresholds = MatchThresholds::default();
        thresholds.set_phash_max(10);
        assert_eq!(thresholds.phash_min(), 9);

        thresholds.set_ssim_max(0.5);
        assert!((thresholds.ssim_min() - 0.49).abs() < 1e-9);
    }

    #[test]
    fn test_single_field_edits_keep_bands_ordered() {
        let mut thresholds = MatchThresholds::default();
        let edits: [(u8, f64); 10] = [
            (0, 64.0),
            (1, 3.0),
            (2, 0.99),
            (3, 0.2),
            (0, 12.0),
            (1, 12.0),
            (2, 1.5),
            (3, 1.5),
            (0, -3.0),
            (3, 0.0),
        ];
        for (field, value) in edits {
            match field {
                0 => thresholds.set_phash_min(value as i32),
                1 => thresholds.set_phash_max(value as i32),
                2 => thresholds.set_ssim_min(value),
                _ => thresholds.set_ssim_max(value),
            }
            assert!(thresholds.phash_min() < thresholds.phash_max());
            assert!(thresholds.ssim_min() < thresholds.ssim_max());
        }
    }

    #[test]
    fn test_percent_sliders_couple_both_bands() {
        let mut thresholds = MatchThresholds::default();
        thresholds.set_lower_percent(75);
        assert_eq!(thresholds.phash_min(), 48);
        assert!((thresholds.ssim_min() - 0.75).abs() < 1e-9);

        thresholds.set_upper_percent(70);
        assert_eq!(thresholds.phash_max(), 45);
        assert_eq!(thresholds.phash_min(), 44);
        assert!(thresholds.ssim_min() < thresholds.ssim_max());
    }

    #[test]
    fn test_thresholds_deserialize_with_defaults() {
        let parsed: MatchThresholds =
            serde_json::from_str(r#"{"mode":"ssim","phash_min":50}"#).unwrap();
        assert_eq!(parsed.mode, ComparisonMode::Ssim);
        assert_eq!(parsed.phash_min(), 50);
        assert_eq!(parsed.phash_max(), 64);
    }

    #[test]
    fn test_inverted_bands_heal_on_load() {
        let parsed: MatchThresholds = serde_json::from_str(
            r#"{"phash_min":60,"phash_max":55,"ssim_min":0.9,"ssim_max":0.5}"#,
        )
        .unwrap();
        assert_eq!(parsed.phash_min(), 60);
        assert_eq!(parsed.phash_max(), 61);
        assert!((parsed.ssim_min() - 0.9).abs() < 1e-9);
        assert!((parsed.ssim_max() - 0.91).abs() < 1e-9);
    }

    #[test]
    fn test_valid_bands_load_unchanged() {
        let parsed: MatchThresholds = serde_json::from_str(
            r#"{"phash_min":10,"phash_max":20,"ssim_min":0.95,"ssim_max":0.99}"#,
        )
        .unwrap();
        assert_eq!((parsed.phash_min(), parsed.phash_max()), (10, 20));
        assert!((parsed.ssim_min() - 0.95).abs() < 1e-9);
        assert!((parsed.ssim_max() - 0.99).abs() < 1e-9);

        let json = serde_json::to_string(&parsed).unwrap();
        assert_eq!(serde_json::from_str::<MatchThresholds>(&json).unwrap(), parsed);
    }

    #[test]
    fn test_identical_videos_match_with_larger_bonus() {
        let mut thresholds: MatchThresholds =
            serde_json::from_str(r#"{"mode":"ssim","same_duration_bonus":4}"#).unwrap();
        let a = textured(fingerprint(0xF0F0_F0F0_F0F0_F0F0, 30_000), 6);

        let verdict = matches(&a, &a.clone(), &thresholds);
        assert!(verdict.is_match);
        assert!((verdict.best_ssim.unwrap() - (1.0 + 4.0 / 64.0)).abs() < 1e-9);

        thresholds.set_upper_percent(100);
        assert!(matches(&a, &a.clone(), &thresholds).is_match);

        thresholds.set_upper_percent(99);
        assert!(!matches(&a, &a.clone(), &thresholds).is_match);
    }
}
