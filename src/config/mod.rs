// 配置管理模块

use crate::downloader::{DownloadOptions, Downloader, FetchPolicy};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 下载配置
    #[serde(default)]
    pub download: DownloadConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
        }
    }
}

/// 下载配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// 每个文件的并发分片数
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// 落盘块大小 (KB)
    #[serde(default = "default_chunk_size_kb")]
    pub chunk_size_kb: usize,
    /// 网络超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// 每个分片的最大尝试次数
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 最小合理文件大小（字节），探测到的大小低于此值视为失败
    #[serde(default = "default_min_file_size")]
    pub min_file_size: u64,
    /// 重试间隔（毫秒），0 表示立即重试
    #[serde(default)]
    pub retry_delay_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: Option<String>,
    /// 代理地址，例如 `socks5://127.0.0.1:1080`
    #[serde(default)]
    pub proxy: Option<String>,
    /// 附加到每个请求的请求头（Cookie、CSRF token 等）
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_threads() -> usize {
    crate::downloader::DEFAULT_CONCURRENCY
}

fn default_chunk_size_kb() -> usize {
    100
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_min_file_size() -> u64 {
    crate::downloader::MIN_PLAUSIBLE_SIZE
}

fn default_user_agent() -> Option<String> {
    Some(
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/105.0.0.0 Safari/537.36"
            .to_string(),
    )
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            chunk_size_kb: default_chunk_size_kb(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            min_file_size: default_min_file_size(),
            retry_delay_ms: 0,
            user_agent: default_user_agent(),
            proxy: None,
            headers: BTreeMap::new(),
        }
    }
}

impl DownloadConfig {
    /// 校验配置值
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            anyhow::bail!("threads 必须大于 0");
        }
        if self.chunk_size_kb == 0 {
            anyhow::bail!("chunk_size_kb 必须大于 0");
        }
        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts 必须大于 0");
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("timeout_secs 必须大于 0");
        }
        self.header_map().context("headers 配置无效")?;
        Ok(())
    }

    /// 把配置里的请求头转换为 `HeaderMap`
    pub fn header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("无效的请求头名称: {}", name))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("请求头 {} 的值无效", name))?;
            map.insert(name, value);
        }
        Ok(map)
    }

    pub fn to_options(&self) -> DownloadOptions {
        DownloadOptions {
            policy: FetchPolicy {
                max_attempts: self.max_attempts,
                chunk_size: self.chunk_size_kb * 1024,
                timeout: Duration::from_secs(self.timeout_secs),
                retry_delay: Duration::from_millis(self.retry_delay_ms),
            },
            min_file_size: self.min_file_size,
            user_agent: self.user_agent.clone(),
            proxy: self.proxy.clone(),
        }
    }

    /// 按配置创建下载器
    pub fn build_downloader(&self) -> Result<Downloader> {
        self.validate()?;
        Downloader::new(self.to_options()).context("创建下载器失败")
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config
            .download
            .validate()
            .context("配置文件中的下载配置验证失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.download.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {:?}", path);
        Ok(())
    }

    /// 加载配置，失败时使用默认配置
    pub async fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from_file(path).await {
            Ok(config) => config,
            Err(e) => {
                eprintln!("配置文件加载失败，使用默认配置: {:#}", e);
                Self::default()
            }
        }
    }
}
