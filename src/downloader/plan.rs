use serde::Serialize;
use tracing::debug;

/// 分片信息
///
/// `start`/`end` 都是闭区间端点，与 Range 请求头的写法一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Segment {
    /// 分片索引
    pub index: usize,
    /// 起始偏移
    pub start: u64,
    /// 结束偏移（包含）
    pub end: u64,
}

impl Segment {
    pub fn new(index: usize, start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "segment {} has start {} > end {}", index, start, end);
        Self { index, start, end }
    }

    /// 分片大小（至少 1 字节）
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Range 请求头的值
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// 把 `total_length` 字节划分为至多 `concurrency` 个连续分片
///
/// 非末尾分片覆盖 `[cursor, cursor + base]`，游标每次前进 `base + 1`；
/// 末尾分片吸收剩余的全部字节，所以它可能比其它分片略大或略小。
/// 非末尾分片的结束位置必须严格小于最后一个字节，保证末尾分片永远不为空。
pub fn plan_segments(total_length: u64, concurrency: usize) -> Vec<Segment> {
    if total_length == 0 {
        return Vec::new();
    }

    let concurrency = concurrency.max(1) as u64;
    let base = total_length / concurrency;
    let last_byte = total_length - 1;

    let mut segments = Vec::new();
    let mut cursor = 0u64;

    while cursor + base < last_byte {
        segments.push(Segment::new(segments.len(), cursor, cursor + base));
        cursor += base + 1;
    }
    segments.push(Segment::new(segments.len(), cursor, last_byte));

    debug!(
        "分片规划: 文件大小={} bytes, 并发={}, 基础分片={} bytes, 实际分片数={}",
        total_length,
        concurrency,
        base,
        segments.len()
    );

    segments
}
