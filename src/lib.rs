// Minutes Downloader Library
// 会议录像分片下载核心库

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 下载引擎模块
pub mod downloader;

// 导出常用类型
pub use config::{AppConfig, DownloadConfig, LogConfig};
pub use downloader::{
    DownloadError, DownloadOutcome, DownloadProgress, DownloadRequest, Downloader, Verdict,
};
