use super::error::{DownloadError, DownloadResult};
use reqwest::header::{HeaderMap, CONTENT_LENGTH};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 最小合理文件大小，小于这个值的多半是错误页而不是视频
pub const MIN_PLAUSIBLE_SIZE: u64 = 1024;

/// 探测结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedResource {
    /// 跟随重定向之后的最终地址
    pub resolved_url: String,
    /// 文件总大小
    pub total_length: u64,
}

/// 发送 HEAD 请求获取文件大小，并跟随重定向得到最终地址
///
/// 长度直接读取 `Content-Length` 响应头；HEAD 响应没有响应体，
/// 不能依赖响应体的大小提示。
pub async fn probe_size(
    client: &Client,
    url: &str,
    headers: &HeaderMap,
    min_size: u64,
    timeout: Duration,
) -> DownloadResult<ProbedResource> {
    debug!("探测文件大小: {}", url);

    let request = client.head(url).headers(headers.clone()).send();
    let resp = tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| DownloadError::Timeout(timeout))??;

    let resolved_url = resp.url().to_string();
    let status = resp.status();

    let reported = resp
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    if !status.is_success() {
        warn!("探测请求返回异常状态: {} ({})", status, resolved_url);
        return Err(DownloadError::SizeUnavailable {
            url: url.to_string(),
            reported,
            floor: min_size,
        });
    }

    match reported {
        Some(total_length) if total_length >= min_size => {
            if resolved_url != url {
                debug!("重定向: {} -> {}", url, resolved_url);
            }
            info!("文件大小: {} bytes, 地址: {}", total_length, resolved_url);
            Ok(ProbedResource {
                resolved_url,
                total_length,
            })
        }
        _ => {
            warn!(
                "文件大小不可用: {:?} (最小合理大小 {} bytes)",
                reported, min_size
            );
            Err(DownloadError::SizeUnavailable {
                url: url.to_string(),
                reported,
                floor: min_size,
            })
        }
    }
}
