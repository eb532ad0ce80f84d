use crate::core::fingerprint::VideoFingerprint;
use crate::core::policy::{MatchThresholds, matches};
use rayon::prelude::*;
use serde::Serialize;

/// Summary of a full pairwise scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateReport {
    /// Videos with at least one later match.
    pub match_count: usize,
    /// Sum of the smaller file of each counted match.
    pub reclaimable_bytes: u64,
}

/// Count videos that match at least one later video.
///
/// Each video is compared with the videos after it and stops at its first
/// match, so it is credited once with the smaller size of that pair.
pub fn report_duplicates<T>(records: &[T], thresholds: &MatchThresholds) -> DuplicateReport
where
    T: AsRef<VideoFingerprint> + Sync,
{
    let first_matches: Vec<u64> = (0..records.len())
        .into_par_iter()
        .filter_map(|left| {
            let l = fingerprint_of(&records[left]);
            records[left + 1..]
                .iter()
                .map(fingerprint_of)
                .find(|r| matches(l, r, thresholds).is_match)
                .map(|r| l.size.min(r.size))
        })
        .collect();

    DuplicateReport {
        match_count: first_matches.len(),
        reclaimable_bytes: first_matches.iter().sum(),
    }
}

fn fingerprint_of<T: AsRef<VideoFingerprint>>(record: &T) -> &VideoFingerprint {
    record.as_ref()
}

/// `512 kB`, `1.5 MB`, `2.0 GB`.
pub fn readable_file_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let size = bytes as f64;
    if size < MB {
        format!("{:.0} kB", size / KB)
    } else if size < GB {
        format!("{:.1} MB", size / MB)
    } else {
        format!("{:.1} GB", size / GB)
    }
}

/// `1h2m3s`; zero components are left out and 0 ms is an empty string.
pub fn readable_duration(ms: i64) -> String {
    let hours = ms / 3_600_000;
    let minutes = ms / 60_000 % 60;
    let seconds = ms / 1000 % 60;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if seconds > 0 {
        out.push_str(&format!("{seconds}s"));
    }
    out
}

pub fn readable_bitrate(kbps: u32) -> String {
    if kbps == 0 {
        String::new()
    } else {
        format!("{kbps} kb/s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::ComparisonMode;

    fn video(hash: u64, size: u64) -> VideoFingerprint {
        VideoFingerprint::from_hashes(&[hash]).with_media(120_000, size)
    }

    #[test]
    fn test_three_video_scenario() {
        let records = vec![
            video(0xFFFF_FFFF_FFFF_FFFF, 7_000_000),
            video(0xFFFF_FFFF_FFFF_FFF0, 5_000_000),
            video(0, 9_000_000),
        ];
        let thresholds = MatchThresholds::default();

        let report = report_duplicates(&records, &thresholds);

        assert_eq!(report.match_count, 1);
        assert_eq!(report.reclaimable_bytes, 5_000_000);
    }

    #[test]
    fn test_video_counted_once_against_many_partners() {
        let records = vec![video(42, 100), video(42, 300), video(42, 200)];
        let report = report_duplicates(&records, &MatchThresholds::default());

        // 0 stops at 1, 1 stops at 2, 2 has no later partner
        assert_eq!(report.match_count, 2);
        assert_eq!(report.reclaimable_bytes, 100 + 200);
    }

    #[test]
    fn test_no_matches_in_ssim_mode() {
        let records = vec![video(u64::MAX, 10), video(1, 20)];
        let thresholds = MatchThresholds::default().with_mode(ComparisonMode::Ssim);
        assert_eq!(
            report_duplicates(&records, &thresholds),
            DuplicateReport::default()
        );
    }

    #[test]
    fn test_empty_collection() {
        let records: Vec<VideoFingerprint> = Vec::new();
        assert_eq!(
            report_duplicates(&records, &MatchThresholds::default()),
            DuplicateReport::default()
        );
    }

    #[test]
    fn test_readable_file_size() {
        assert_eq!(readable_file_size(512 * 1024), "512 kB");
        assert_eq!(readable_file_size(1536 * 1024), "1.5 MB");
        assert_eq!(readable_file_size(2 * 1024 * 1024 * 1024), "2.0 GB");
    }

    #[test]
    fn test_readable_duration() {
        assert_eq!(readable_duration(3_723_000), "1h2m3s");
        assert_eq!(readable_duration(60_000), "1m");
        assert_eq!(readable_duration(45_500), "45s");
        assert_eq!(readable_duration(0), "");
    }

    #[test]
    fn test_readable_bitrate() {
        assert_eq!(readable_bitrate(0), "");
        assert_eq!(readable_bitrate(4500), "4500 kb/s");
    }
}
