use super::error::{DownloadError, DownloadResult};
use super::fetcher::{FetchPolicy, SegmentFetcher, SegmentResult, SharedFile};
use super::plan::{plan_segments, Segment};
use super::probe::{probe_size, MIN_PLAUSIBLE_SIZE};
use super::progress::DownloadProgress;
use reqwest::header::HeaderMap;
use reqwest::{Client, Proxy};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// 默认并发分片数
pub const DEFAULT_CONCURRENCY: usize = 10;

/// 一次下载的输入（由调用方提供）
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// 源地址
    pub url: String,
    /// 请求头（鉴权等），原样附加到每个请求
    pub headers: HeaderMap,
    /// 目标文件路径，父目录必须不存在
    pub destination: PathBuf,
    /// 并发分片数
    pub concurrency: usize,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            headers: HeaderMap::new(),
            destination: destination.into(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

/// 探测完成后的下载目标，之后不再修改
#[derive(Debug, Clone)]
pub struct DownloadTarget {
    pub source_url: String,
    pub resolved_url: String,
    pub total_length: u64,
    pub destination: PathBuf,
    pub concurrency: usize,
    pub headers: Arc<HeaderMap>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Complete,
    Incomplete,
}

/// 下载结果汇总
///
/// 完整性只按文件长度判断：中间分片失败而末尾分片成功时，
/// 长度仍然相等，`verdict` 为 `Complete`，失败分片记录在 `failed_segments` 里。
#[derive(Debug, Clone, Serialize)]
pub struct DownloadOutcome {
    pub destination: PathBuf,
    pub resolved_url: String,
    pub expected_length: u64,
    pub actual_length: u64,
    pub segment_count: usize,
    pub failed_segments: Vec<usize>,
    pub verdict: Verdict,
    pub elapsed_ms: u64,
}

impl DownloadOutcome {
    pub fn is_complete(&self) -> bool {
        self.verdict == Verdict::Complete
    }

    /// 不完整时转换为 `IntegrityMismatch`
    pub fn ensure_complete(self) -> DownloadResult<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(DownloadError::IntegrityMismatch {
                expected: self.expected_length,
                actual: self.actual_length,
            })
        }
    }
}

/// 下载器配置
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub policy: FetchPolicy,
    /// 最小合理文件大小
    pub min_file_size: u64,
    pub user_agent: Option<String>,
    /// 代理地址（http/https/socks5）
    pub proxy: Option<String>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            policy: FetchPolicy::default(),
            min_file_size: MIN_PLAUSIBLE_SIZE,
            user_agent: None,
            proxy: None,
        }
    }
}

/// 分片下载协调器
///
/// 流程：探测大小 → 创建目录和文件 → 规划分片 → 并发下载并等待全部结束 → 长度校验
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    options: DownloadOptions,
}

impl Downloader {
    /// 创建下载器（按配置构建 HTTP 客户端）
    pub fn new(options: DownloadOptions) -> DownloadResult<Self> {
        let mut builder = Client::builder().connect_timeout(options.policy.timeout);

        if let Some(user_agent) = &options.user_agent {
            builder = builder.user_agent(user_agent.as_str());
        }
        if let Some(proxy) = &options.proxy {
            builder = builder.proxy(Proxy::all(proxy.as_str())?);
        }

        let client = builder.build()?;
        Ok(Self::with_client(client, options))
    }

    /// 使用已有的客户端
    pub fn with_client(client: Client, options: DownloadOptions) -> Self {
        Self { client, options }
    }

    pub async fn download(&self, request: DownloadRequest) -> DownloadResult<DownloadOutcome> {
        self.download_with_progress(request, Arc::new(DownloadProgress::new()))
            .await
    }

    /// 下载文件，并通过 `progress` 发布实时进度
    ///
    /// 只有致命错误（探测失败、目录冲突、文件无法创建）会返回 `Err`；
    /// 分片失败体现在返回的 `DownloadOutcome` 中。
    pub async fn download_with_progress(
        &self,
        request: DownloadRequest,
        progress: Arc<DownloadProgress>,
    ) -> DownloadResult<DownloadOutcome> {
        let started = Instant::now();

        // 1. 探测大小（失败时还没有创建任何文件）
        let target = self.resolve(request).await?;

        // 2. 创建父目录和输出文件；文件打不开时撤销刚创建的目录，避免下次误判冲突
        let created_dir = prepare_destination(&target.destination).await?;
        let file = match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&target.destination)
            .await
        {
            Ok(file) => file,
            Err(e) => {
                error!("创建文件失败: {:?}, 错误: {}", target.destination, e);
                if let Some(dir) = created_dir {
                    if let Err(rm) = tokio::fs::remove_dir(&dir).await {
                        warn!("撤销目录失败: {:?}, 错误: {}", dir, rm);
                    }
                }
                return Err(e.into());
            }
        };
        let file: SharedFile = Arc::new(Mutex::new(file));

        // 3. 规划分片并发下载
        let segments = plan_segments(target.total_length, target.concurrency);
        progress.start(target.total_length, segments.len());
        info!(
            "开始下载: {:?}, 大小={} bytes, 分片数={}",
            target.destination,
            target.total_length,
            segments.len()
        );

        let results = self
            .download_segments(&target, &segments, file.clone(), progress)
            .await;

        // 4. 所有分片都已结束，落盘后校验
        let actual_length = finish_file(file, &target.destination).await?;
        let failed_segments: Vec<usize> = results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| r.index)
            .collect();

        if actual_length == 0 {
            discard_empty_file(&target.destination).await;
        }

        let verdict = if actual_length == target.total_length {
            Verdict::Complete
        } else {
            Verdict::Incomplete
        };

        match verdict {
            Verdict::Complete if failed_segments.is_empty() => {
                info!("✅ 文件大小校验通过: {} bytes", actual_length);
            }
            Verdict::Complete => {
                warn!(
                    "文件大小一致但分片 {:?} 失败，对应范围内容不可信（仅按长度校验）",
                    failed_segments
                );
            }
            Verdict::Incomplete => {
                warn!(
                    "文件大小不匹配: 实际 {} bytes, 期望 {} bytes, 失败分片: {:?}",
                    actual_length, target.total_length, failed_segments
                );
            }
        }

        Ok(DownloadOutcome {
            destination: target.destination,
            resolved_url: target.resolved_url,
            expected_length: target.total_length,
            actual_length,
            segment_count: segments.len(),
            failed_segments,
            verdict,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// 探测源地址，得到不可变的下载目标
    pub async fn resolve(&self, request: DownloadRequest) -> DownloadResult<DownloadTarget> {
        let probed = probe_size(
            &self.client,
            &request.url,
            &request.headers,
            self.options.min_file_size,
            self.options.policy.timeout,
        )
        .await?;

        Ok(DownloadTarget {
            source_url: request.url,
            resolved_url: probed.resolved_url,
            total_length: probed.total_length,
            destination: request.destination,
            concurrency: request.concurrency.max(1),
            headers: Arc::new(request.headers),
        })
    }

    /// 每个分片一个任务，全部启动后等待全部结束
    async fn download_segments(
        &self,
        target: &DownloadTarget,
        segments: &[Segment],
        file: SharedFile,
        progress: Arc<DownloadProgress>,
    ) -> Vec<SegmentResult> {
        let fetcher = SegmentFetcher::new(
            self.client.clone(),
            target.resolved_url.as_str(),
            target.headers.clone(),
            file,
            self.options.policy.clone(),
            progress.clone(),
        );

        let handles: Vec<_> = segments
            .iter()
            .map(|segment| {
                let fetcher = fetcher.clone();
                let segment = *segment;
                (segment, tokio::spawn(async move { fetcher.fetch(segment).await }))
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (segment, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!("分片 #{} 任务异常: {}", segment.index, e);
                    progress.segment_finished();
                    let err = DownloadError::TaskPanicked(e.to_string());
                    results.push(SegmentResult::failed(segment.index, 0, 0, err.to_string()));
                }
            }
        }

        debug!(
            "全部分片结束: 成功 {}, 失败 {}",
            results.iter().filter(|r| r.is_success()).count(),
            results.iter().filter(|r| !r.is_success()).count()
        );
        results
    }
}

/// 创建目标文件的父目录；目录已存在视为冲突
///
/// 返回新建的父目录（没有父目录时为 `None`）。为补齐路径而创建的上层目录不会被记录。
async fn prepare_destination(path: &Path) -> DownloadResult<Option<PathBuf>> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(None);
    };

    match tokio::fs::create_dir(parent).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(DownloadError::DestinationCollision(parent.to_path_buf()));
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            if let Some(grandparent) = parent.parent() {
                tokio::fs::create_dir_all(grandparent).await?;
            }
            tokio::fs::create_dir(parent).await.map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    DownloadError::DestinationCollision(parent.to_path_buf())
                } else {
                    DownloadError::Io(e)
                }
            })?;
        }
        Err(e) => return Err(e.into()),
    }

    debug!("已创建目录: {:?}", parent);
    Ok(Some(parent.to_path_buf()))
}

/// 删除空的结果文件。删除失败只记录警告，下载结果照常返回
async fn discard_empty_file(path: &Path) -> bool {
    warn!("下载结果为空，删除文件: {:?}", path);
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) => {
            warn!("删除空文件失败: {:?}, 错误: {}", path, e);
            false
        }
    }
}

/// 刷新并关闭输出文件，返回磁盘上的实际大小
async fn finish_file(file: SharedFile, path: &Path) -> DownloadResult<u64> {
    {
        let mut guard = file.lock().await;
        guard.flush().await?;
        guard.sync_all().await?;
    }
    drop(file);

    Ok(tokio::fs::metadata(path).await?.len())
}
