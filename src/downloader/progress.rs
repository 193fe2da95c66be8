use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// 下载进度（多分片共享，只包含原子计数器）
///
/// 每个分片只通过 `add_written`/`rollback` 修改自己贡献的字节数，
/// 分片之间不共享其它状态。
#[derive(Debug, Default)]
pub struct DownloadProgress {
    total_bytes: AtomicU64,
    written_bytes: AtomicU64,
    total_segments: AtomicUsize,
    finished_segments: AtomicUsize,
}

/// 某一时刻的进度快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub total_bytes: u64,
    pub written_bytes: u64,
    pub total_segments: usize,
    pub finished_segments: usize,
}

impl ProgressSnapshot {
    /// 百分比进度
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.written_bytes as f64 / self.total_bytes as f64) * 100.0
    }

    pub fn is_finished(&self) -> bool {
        self.total_segments > 0 && self.finished_segments >= self.total_segments
    }
}

impl DownloadProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// 探测和规划完成后设置总量
    pub(crate) fn start(&self, total_bytes: u64, total_segments: usize) {
        self.total_bytes.store(total_bytes, Ordering::Relaxed);
        self.total_segments.store(total_segments, Ordering::Relaxed);
        self.written_bytes.store(0, Ordering::Relaxed);
        self.finished_segments.store(0, Ordering::Relaxed);
    }

    pub(crate) fn add_written(&self, bytes: u64) {
        self.written_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// 放弃一次失败尝试已写入的字节（重试会从分片起点重新写）
    pub(crate) fn rollback(&self, bytes: u64) {
        if bytes > 0 {
            self.written_bytes.fetch_sub(bytes, Ordering::Relaxed);
        }
    }

    pub(crate) fn segment_finished(&self) {
        self.finished_segments.fetch_add(1, Ordering::Release);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            written_bytes: self.written_bytes.load(Ordering::Relaxed),
            total_segments: self.total_segments.load(Ordering::Relaxed),
            finished_segments: self.finished_segments.load(Ordering::Acquire),
        }
    }
}
