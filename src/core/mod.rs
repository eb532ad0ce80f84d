// Fingerprinting and duplicate matching
// - fingerprint: pHash + grayscale matrices from a sample grid
// - similarity: Hamming and SSIM scorers with duration bias
// - policy: dual-threshold match verdicts
// - cursor / report: walking and summarising matching pairs

pub mod cursor;
pub mod fingerprint;
pub mod hash;
pub mod policy;
pub mod report;
pub mod scanner;
pub mod similarity;
pub mod thumbnail;
pub mod video;
