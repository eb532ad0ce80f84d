pub mod config;
pub mod core;
pub mod services;

pub use crate::config::ScanConfig;
pub use crate::core::cursor::{MatchingPairs, PairCursor, Step};
pub use crate::core::fingerprint::{DecodeError, FingerprintExtractor, VideoFingerprint};
pub use crate::core::policy::{ComparisonMode, MatchThresholds, MatchVerdict, matches};
pub use crate::core::report::{DuplicateReport, report_duplicates};
pub use crate::core::scanner::{ScanOutcome, ScannerService};
pub use crate::core::thumbnail::ThumbnailMode;
pub use crate::core::video::{MediaInfo, VideoFile, VideoRecord};
