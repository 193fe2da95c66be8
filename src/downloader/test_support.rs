//! 测试用的分片服务器：按 Range 返回字节，并可按分片起点注入故障

use reqwest::Client;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub(crate) const VIDEO_PATH: &str = "/minutes/video.mp4";

/// 单次请求注入的故障
#[derive(Debug, Clone, Copy)]
pub(crate) enum Fault {
    /// 返回指定状态码
    Status(u16),
    /// 返回 206，但只给一半数据
    Truncate,
    /// 忽略 Range，返回 200 和完整内容
    FullBody,
    /// 返回 206，但正文比请求的范围多出若干字节
    Oversized,
    /// 返回 206，但 Content-Range 整体后移一个字节
    WrongRange,
}

/// `Fault::Oversized` 多给的字节数
pub(crate) const OVERSIZE_EXTRA: u64 = 512;

#[derive(Default)]
struct Script {
    queued: HashMap<u64, VecDeque<Fault>>,
    broken: HashSet<u64>,
    all_broken: bool,
    hits: HashMap<u64, usize>,
}

#[derive(Clone)]
pub(crate) struct RangeResponder {
    content: Arc<Vec<u8>>,
    script: Arc<Mutex<Script>>,
}

impl RangeResponder {
    pub(crate) fn new(content: Vec<u8>) -> Self {
        Self {
            content: Arc::new(content),
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    /// 起点为 `start` 的分片按顺序依次遇到这些故障，之后正常返回
    pub(crate) fn with_faults(self, start: u64, faults: Vec<Fault>) -> Self {
        self.script
            .lock()
            .unwrap()
            .queued
            .insert(start, faults.into());
        self
    }

    /// 起点为 `start` 的分片永远返回 500
    pub(crate) fn always_failing(self, start: u64) -> Self {
        self.script.lock().unwrap().broken.insert(start);
        self
    }

    /// 所有分片请求都返回 500
    pub(crate) fn all_failing(self) -> Self {
        self.script.lock().unwrap().all_broken = true;
        self
    }

    /// 起点为 `start` 的分片收到的请求次数
    pub(crate) fn hits(&self, start: u64) -> usize {
        self.script
            .lock()
            .unwrap()
            .hits
            .get(&start)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn total_hits(&self) -> usize {
        self.script.lock().unwrap().hits.values().sum()
    }
}

fn parse_range(req: &Request) -> Option<(u64, u64)> {
    let value = req.headers.get("range")?.to_str().ok()?;
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

impl Respond for RangeResponder {
    fn respond(&self, req: &Request) -> ResponseTemplate {
        let total = self.content.len() as u64;
        let Some((start, end)) = parse_range(req) else {
            return ResponseTemplate::new(200).set_body_bytes(self.content.to_vec());
        };

        let fault = {
            let mut script = self.script.lock().unwrap();
            *script.hits.entry(start).or_insert(0) += 1;
            if script.all_broken || script.broken.contains(&start) {
                Some(Fault::Status(500))
            } else {
                script.queued.get_mut(&start).and_then(|q| q.pop_front())
            }
        };

        let end = end.min(total - 1);
        let body = &self.content[start as usize..=end as usize];
        let content_range = format!("bytes {}-{}/{}", start, end, total);

        match fault {
            Some(Fault::Status(code)) => ResponseTemplate::new(code),
            Some(Fault::FullBody) => {
                ResponseTemplate::new(200).set_body_bytes(self.content.to_vec())
            }
            Some(Fault::Truncate) => ResponseTemplate::new(206)
                .insert_header("Content-Range", content_range.as_str())
                .set_body_bytes(body[..body.len() / 2].to_vec()),
            Some(Fault::Oversized) => {
                let over_end = (end + OVERSIZE_EXTRA).min(total - 1);
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", content_range.as_str())
                    .set_body_bytes(self.content[start as usize..=over_end as usize].to_vec())
            }
            Some(Fault::WrongRange) => {
                let shifted_end = (end + 1).min(total - 1);
                ResponseTemplate::new(206)
                    .insert_header(
                        "Content-Range",
                        format!("bytes {}-{}/{}", start + 1, shifted_end, total).as_str(),
                    )
                    .set_body_bytes(self.content[(start + 1) as usize..=shifted_end as usize].to_vec())
            }
            None => ResponseTemplate::new(206)
                .insert_header("Content-Range", content_range.as_str())
                .set_body_bytes(body.to_vec()),
        }
    }
}

/// 可预测但不重复的测试内容
pub(crate) fn sample_content(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 251) as u8).collect()
}

pub(crate) fn head_with_length(route: &str, length: u64) -> Mock {
    Mock::given(method("HEAD"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Length", length.to_string()))
}

/// 启动一个同时响应 HEAD 与 Range GET 的服务器
pub(crate) async fn serve(responder: &RangeResponder) -> MockServer {
    let server = MockServer::start().await;
    head_with_length(VIDEO_PATH, responder.content.len() as u64)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(VIDEO_PATH))
        .respond_with(responder.clone())
        .mount(&server)
        .await;
    server
}

pub(crate) fn video_url(server: &MockServer) -> String {
    format!("{}{}", server.uri(), VIDEO_PATH)
}

pub(crate) fn test_client() -> Client {
    Client::builder().build().unwrap()
}
