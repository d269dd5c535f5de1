//! 传输层抽象
//!
//! 下载任务只依赖 [`Transport`]：打开一个 URL（可选地从某个字节偏移开始），
//! 得到一个字节流，以及服务器对 Range 请求的实际响应方式。
//! 关闭连接即丢弃字节流，任务在暂停/取消时负责丢弃。

pub mod http;
#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::io;

use crate::error::Result;

pub use http::HttpTransport;

/// 传输层产出的字节流
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// 服务器对续传请求的响应方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeResponse {
    /// 206 Partial Content，数据从 `start` 开始
    Partial { start: u64 },
    /// 200 OK，完整内容（服务器忽略了 Range）
    Full,
    /// 416 Range Not Satisfiable，请求的偏移已经到达资源末尾
    Exhausted,
}

/// 一次打开的传输连接
pub struct TransportStream {
    pub range: RangeResponse,
    /// 资源总大小（来自 `Content-Range` 或 `Content-Length`），未知时为 None
    pub total: Option<u64>,
    pub stream: ByteStream,
}

impl TransportStream {
    /// 没有数据的空连接
    pub fn exhausted() -> Self {
        Self {
            range: RangeResponse::Exhausted,
            total: None,
            stream: Box::pin(futures::stream::empty()),
        }
    }
}

impl std::fmt::Debug for TransportStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportStream")
            .field("range", &self.range)
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

/// 传输能力：打开 URL，从 `offset` 开始读取到末尾
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn open(&self, url: &str, offset: u64) -> Result<TransportStream>;
}

/// 解析后的 `Content-Range` 头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentRange {
    /// `bytes first-last/total`，total 为 `*` 时为 None
    Satisfied {
        first: u64,
        last: u64,
        total: Option<u64>,
    },
    /// `bytes */total`，随 416 一起返回
    Unsatisfied { total: u64 },
}

/// 解析 `Content-Range` 头，如 `bytes 100-199/1000`、`bytes 100-199/*`、`bytes */1000`
pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let spec = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = spec.split_once('/')?;
    let total = total.trim();

    if range.trim() == "*" {
        return Some(ContentRange::Unsatisfied {
            total: total.parse().ok()?,
        });
    }

    let (first, last) = range.split_once('-')?;
    let first: u64 = first.trim().parse().ok()?;
    let last: u64 = last.trim().parse().ok()?;
    if last < first {
        return None;
    }

    let total = if total == "*" {
        None
    } else {
        let total: u64 = total.parse().ok()?;
        if last >= total {
            return None;
        }
        Some(total)
    };

    Some(ContentRange::Satisfied { first, last, total })
}
