pub mod cache;
pub mod probe;

pub use cache::{FingerprintCache, MemoryCache, SledCache};
pub use probe::{FfmpegProvider, FrameProvider};
