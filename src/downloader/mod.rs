pub mod engine;
pub mod error;
pub mod fetcher;
pub mod plan;
pub mod probe;
pub mod progress;

#[cfg(test)]
pub(crate) mod test_support;

pub use engine::{
    DownloadOptions, DownloadOutcome, DownloadRequest, DownloadTarget, Downloader, Verdict,
    DEFAULT_CONCURRENCY,
};
pub use error::{DownloadError, DownloadResult};
pub use fetcher::{FetchPolicy, SegmentFetcher, SegmentResult, SegmentStatus, SharedFile};
pub use plan::{plan_segments, Segment};
pub use probe::{probe_size, ProbedResource, MIN_PLAUSIBLE_SIZE};
pub use progress::{DownloadProgress, ProgressSnapshot};
