use reqwest::StatusCode;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// 下载错误类型
///
/// 致命错误（`SizeUnavailable`、`DestinationCollision`）由 `Downloader::download` 直接返回；
/// 单次尝试的失败原因只出现在分片结果里，不会越过分片的边界。
#[derive(Debug, Error)]
pub enum DownloadError {
    /// 探测不到可用的文件大小（缺少长度字段，或低于最小合理大小）
    #[error("无法获取文件大小: {url} (长度: {reported:?}, 最小合理大小: {floor} bytes)")]
    SizeUnavailable {
        url: String,
        reported: Option<u64>,
        floor: u64,
    },

    /// 目标文件的父目录已经存在
    #[error("目标目录已存在: {0:?}")]
    DestinationCollision(PathBuf),

    /// 分片用尽全部尝试次数
    #[error("分片 #{index} 在 {attempts} 次尝试后仍然失败: {last_error}")]
    SegmentRetryExhausted {
        index: usize,
        attempts: u32,
        last_error: String,
    },

    /// 最终文件大小与探测大小不一致
    #[error("文件大小不匹配: 实际 {actual} bytes, 期望 {expected} bytes")]
    IntegrityMismatch { expected: u64, actual: u64 },

    /// 分片请求返回了 206 以外的状态码
    #[error("HTTP状态异常: {0}（期望 206 Partial Content）")]
    UnexpectedStatus(StatusCode),

    /// 服务器返回的 Content-Range 与请求的范围不符
    #[error("Content-Range 不匹配: 请求 bytes {start}-{end}, 实际 {actual}")]
    RangeMismatch { start: u64, end: u64, actual: String },

    /// 数据流提前结束
    #[error("数据流提前结束: 收到 {received} bytes, 期望 {expected} bytes")]
    Truncated { expected: u64, received: u64 },

    /// 服务器返回的数据超出了请求的范围
    #[error("数据超出请求范围: 期望 {expected} bytes")]
    Overflow { expected: u64 },

    /// 网络等待超时
    #[error("网络请求超时 ({0:?})")]
    Timeout(Duration),

    /// 请求头无效
    #[error("无效的请求头: {0}")]
    InvalidHeader(String),

    /// 分片任务异常退出
    #[error("分片任务异常: {0}")]
    TaskPanicked(String),

    #[error("HTTP请求失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error("文件操作失败: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// 是否为中止整个下载的致命错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DownloadError::SizeUnavailable { .. } | DownloadError::DestinationCollision(_)
        )
    }
}

pub type DownloadResult<T> = std::result::Result<T, DownloadError>;
