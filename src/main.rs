use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use minutes_downloader::config::{AppConfig, DEFAULT_CONFIG_PATH};
use minutes_downloader::downloader::{
    DownloadOutcome, DownloadProgress, DownloadRequest, ProgressSnapshot,
};
use minutes_downloader::logging;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "minutes-downloader", version, about = "会议录像分片下载工具")]
struct Cli {
    /// 配置文件路径
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 分片并发下载一个文件
    Download {
        /// 源地址
        url: String,
        /// 目标文件路径（父目录必须不存在，会自动创建）
        #[arg(short, long)]
        output: PathBuf,
        /// 并发分片数（默认取配置文件）
        #[arg(short, long)]
        concurrency: Option<usize>,
        /// 附加请求头，格式 "Name: value"，可重复
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        /// 以 JSON 输出下载结果
        #[arg(long)]
        json: bool,
    },
    /// 显示当前配置（配置文件不存在时写入默认配置）
    Config,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = AppConfig::load_or_default(&cli.config).await;
    let _log_guard = logging::init_logging(&config.log);

    match cli.command {
        Command::Download {
            url,
            output,
            concurrency,
            headers,
            json,
        } => run_download(&config, url, output, concurrency, &headers, json).await,
        Command::Config => {
            if !cli.config.exists() {
                config.save_to_file(&cli.config).await?;
            }
            println!("# {}", cli.config.display());
            print!(
                "{}",
                toml::to_string_pretty(&config).context("Failed to serialize config")?
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_download(
    config: &AppConfig,
    url: String,
    output: PathBuf,
    concurrency: Option<usize>,
    extra_headers: &[String],
    json: bool,
) -> Result<ExitCode> {
    let downloader = config.download.build_downloader()?;

    let mut headers = config.download.header_map()?;
    headers.extend(parse_headers(extra_headers)?);

    let request = DownloadRequest::new(url, output)
        .with_headers(headers)
        .with_concurrency(concurrency.unwrap_or(config.download.threads));

    let progress = Arc::new(DownloadProgress::new());
    let bar = new_progress_bar();
    let ticker = spawn_progress_ticker(bar.clone(), progress.clone());

    let result = downloader.download_with_progress(request, progress).await;
    ticker.abort();
    bar.finish_and_clear();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) if e.is_fatal() => {
            error!("下载中止，未写入任何数据: {}", e);
            return Err(e).context("下载中止");
        }
        Err(e) => {
            error!("下载失败: {}", e);
            return Err(e).context("下载失败");
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    if outcome.is_complete() {
        info!("下载完成: {:?}", outcome.destination);
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// 解析 "Name: value" 形式的请求头
fn parse_headers(raw: &[String]) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for item in raw {
        let (name, value) = item
            .split_once(':')
            .with_context(|| format!("请求头格式应为 \"Name: value\": {}", item))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .with_context(|| format!("无效的请求头名称: {}", name))?;
        let value = HeaderValue::from_str(value.trim())
            .with_context(|| format!("请求头 {} 的值无效", name))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn new_progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-"),
    );
    bar
}

/// 定时把下载进度同步到进度条，下载结束后由调用方清除进度条
fn spawn_progress_ticker(
    bar: ProgressBar,
    progress: Arc<DownloadProgress>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(200));
        loop {
            ticker.tick().await;
            let snap = progress.snapshot();
            bar.set_length(snap.total_bytes);
            bar.set_position(snap.written_bytes);
            bar.set_message(progress_message(&snap));
            if snap.is_finished() {
                break;
            }
        }
    })
}

fn progress_message(snap: &ProgressSnapshot) -> String {
    format!(
        "分片 {}/{} {:5.1}%",
        snap.finished_segments,
        snap.total_segments,
        snap.percent()
    )
}

fn print_outcome(outcome: &DownloadOutcome) {
    let status = if outcome.is_complete() {
        "下载完成"
    } else {
        "下载不完整"
    };
    println!("{}: {}", status, outcome.destination.display());
    println!(
        "  大小: {} / {} bytes",
        outcome.actual_length, outcome.expected_length
    );
    println!(
        "  分片: {} 个, 失败: {:?}",
        outcome.segment_count, outcome.failed_segments
    );
    println!("  耗时: {:.1}s", outcome.elapsed_ms as f64 / 1000.0);
    println!("  注意: 完整性仅按文件长度校验，不校验内容；失败分片范围内的数据不可信");
}
