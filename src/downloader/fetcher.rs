use super::error::{DownloadError, DownloadResult};
use super::plan::Segment;
use super::progress::DownloadProgress;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode};
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// 默认写入块大小: 100KB
pub const DEFAULT_CHUNK_SIZE: usize = 100 * 1024;

/// 每个分片的默认最大尝试次数
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// 默认网络超时
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// 所有分片共享的输出文件句柄
pub type SharedFile = Arc<Mutex<File>>;

/// 分片下载策略
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// 最大尝试次数（包含第一次）
    pub max_attempts: u32,
    /// 每次落盘的块大小
    pub chunk_size: usize,
    /// 单次网络等待的超时（请求发出到响应头、每次读取数据流）
    pub timeout: Duration,
    /// 两次尝试之间的等待
    pub retry_delay: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout: DEFAULT_TIMEOUT,
            retry_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Success,
    Failed,
}

/// 分片下载结果，每个分片恰好产生一次
#[derive(Debug)]
pub struct SegmentResult {
    /// 分片索引
    pub index: usize,
    pub status: SegmentStatus,
    /// 最后一次尝试实际写入的字节数
    pub bytes_written: u64,
    /// 使用的尝试次数
    pub attempts: u32,
    /// 失败时为 `SegmentRetryExhausted`
    pub error: Option<DownloadError>,
}

impl SegmentResult {
    pub fn is_success(&self) -> bool {
        self.status == SegmentStatus::Success
    }

    pub(crate) fn failed(index: usize, attempts: u32, bytes_written: u64, last_error: String) -> Self {
        Self {
            index,
            status: SegmentStatus::Failed,
            bytes_written,
            attempts,
            error: Some(DownloadError::SegmentRetryExhausted {
                index,
                attempts,
                last_error,
            }),
        }
    }
}

/// 分片下载器
///
/// 负责把一个分片的字节写入共享文件中属于它的那一段。
/// 克隆开销很小，协调器为每个分片任务克隆一份。
#[derive(Debug, Clone)]
pub struct SegmentFetcher {
    client: Client,
    url: Arc<str>,
    headers: Arc<HeaderMap>,
    file: SharedFile,
    policy: FetchPolicy,
    progress: Arc<DownloadProgress>,
}

impl SegmentFetcher {
    pub fn new(
        client: Client,
        url: impl Into<Arc<str>>,
        headers: Arc<HeaderMap>,
        file: SharedFile,
        policy: FetchPolicy,
        progress: Arc<DownloadProgress>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            headers,
            file,
            policy,
            progress,
        }
    }

    /// 下载一个分片（带重试）
    ///
    /// 每次尝试都从分片的原始起点重新请求、重新写入；用尽次数后返回 `Failed`，
    /// 不会向外抛出错误，也不会影响其它分片。
    pub async fn fetch(&self, segment: Segment) -> SegmentResult {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();
        let mut written = 0u64;

        for attempt in 1..=max_attempts {
            written = 0;
            debug!(
                "分片 #{} 第 {}/{} 次尝试: {}",
                segment.index,
                attempt,
                max_attempts,
                segment.range_header()
            );

            match self.try_fetch(&segment, &mut written).await {
                Ok(()) => {
                    self.progress.segment_finished();
                    debug!(
                        "分片 #{} 下载完成，大小: {} bytes",
                        segment.index, written
                    );
                    return SegmentResult {
                        index: segment.index,
                        status: SegmentStatus::Success,
                        bytes_written: written,
                        attempts: attempt,
                        error: None,
                    };
                }
                Err(e) => {
                    self.progress.rollback(written);
                    warn!(
                        "分片 #{} 第 {}/{} 次尝试失败 (已写入 {} bytes): {}",
                        segment.index, attempt, max_attempts, written, e
                    );
                    last_error = e.to_string();

                    if attempt < max_attempts && !self.policy.retry_delay.is_zero() {
                        tokio::time::sleep(self.policy.retry_delay).await;
                    }
                }
            }
        }

        self.progress.segment_finished();
        warn!(
            "分片 #{} ({}) 重试次数用尽: {}",
            segment.index,
            segment.range_header(),
            last_error
        );
        SegmentResult::failed(segment.index, max_attempts, written, last_error)
    }

    /// 单次尝试：请求原始范围，从分片起点开始写
    async fn try_fetch(&self, segment: &Segment, written: &mut u64) -> DownloadResult<()> {
        let timeout = self.policy.timeout;
        let resp = tokio::time::timeout(timeout, self.send_range_request(segment))
            .await
            .map_err(|_| DownloadError::Timeout(timeout))??;

        if resp.status() != StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::UnexpectedStatus(resp.status()));
        }
        check_content_range(&resp, segment)?;

        let expected = segment.len();
        let chunk_size = self.policy.chunk_size.max(1);
        let mut cursor = segment.start;
        let mut buffer: Vec<u8> = Vec::with_capacity(chunk_size);
        let mut stream = resp.bytes_stream();

        loop {
            let next = tokio::time::timeout(timeout, stream.next())
                .await
                .map_err(|_| DownloadError::Timeout(timeout))?;
            let Some(item) = next else {
                break;
            };
            let bytes = item?;

            if *written + (buffer.len() + bytes.len()) as u64 > expected {
                return Err(DownloadError::Overflow { expected });
            }

            let mut data = &bytes[..];
            while !data.is_empty() {
                let take = (chunk_size - buffer.len()).min(data.len());
                buffer.extend_from_slice(&data[..take]);
                data = &data[take..];

                if buffer.len() == chunk_size {
                    self.write_chunk(cursor, &buffer).await?;
                    cursor += buffer.len() as u64;
                    *written += buffer.len() as u64;
                    self.progress.add_written(buffer.len() as u64);
                    buffer.clear();
                }
            }
        }

        if !buffer.is_empty() {
            self.write_chunk(cursor, &buffer).await?;
            *written += buffer.len() as u64;
            self.progress.add_written(buffer.len() as u64);
        }

        if *written != expected {
            return Err(DownloadError::Truncated {
                expected,
                received: *written,
            });
        }

        Ok(())
    }

    async fn send_range_request(&self, segment: &Segment) -> DownloadResult<Response> {
        let mut headers = (*self.headers).clone();
        let range = HeaderValue::from_str(&segment.range_header())
            .map_err(|e| DownloadError::InvalidHeader(e.to_string()))?;
        headers.insert(RANGE, range);

        Ok(self.client.get(&*self.url).headers(headers).send().await?)
    }

    /// 定位并写入，两步在同一个锁内完成
    async fn write_chunk(&self, offset: u64, data: &[u8]) -> DownloadResult<()> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }
}

fn check_content_range(resp: &Response, segment: &Segment) -> DownloadResult<()> {
    let Some(value) = resp.headers().get(CONTENT_RANGE) else {
        return Ok(());
    };
    let actual = value.to_str().unwrap_or_default();
    let expected = format!("bytes {}-{}/", segment.start, segment.end);
    if !actual.starts_with(&expected) {
        return Err(DownloadError::RangeMismatch {
            start: segment.start,
            end: segment.end,
            actual: actual.to_string(),
        });
    }
    Ok(())
}
