//! 基于 reqwest 的 HTTP 传输实现

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use std::io;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{parse_content_range, ContentRange, RangeResponse, Transport, TransportStream};
use crate::config::DownloadConfig;
use crate::error::{DownloadError, Result};

/// HTTP 传输
///
/// 续传时发送 `Range: bytes=N-`，并根据响应状态码和 `Content-Range`
/// 告诉调用方服务器是否真的从 N 开始返回数据。
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// 按下载配置创建 HTTP 客户端
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self { client })
    }

    /// 使用外部构建好的客户端
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, url: &str, offset: u64) -> Result<TransportStream> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }

        debug!("打开连接: url={}, offset={}", url, offset);
        let resp = request.send().await?;
        let status = resp.status();
        let content_range = resp
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range);

        let (range, total) = match status {
            StatusCode::PARTIAL_CONTENT => match content_range {
                Some(ContentRange::Satisfied { first, total, .. }) => {
                    (RangeResponse::Partial { start: first }, total)
                }
                _ => {
                    return Err(DownloadError::Transport(
                        "206 响应缺少有效的 Content-Range".to_string(),
                    ))
                }
            },
            StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => match content_range {
                Some(ContentRange::Unsatisfied { total }) if total == offset => {
                    info!("请求偏移 {} 已到达资源末尾: {}", offset, url);
                    return Ok(TransportStream::exhausted());
                }
                Some(ContentRange::Unsatisfied { total }) => {
                    warn!(
                        "本地文件与远程资源大小不一致: 本地 {} bytes, 远程 {} bytes",
                        offset, total
                    );
                    return Err(DownloadError::RangeNotHonored {
                        requested: offset,
                        actual: total,
                    });
                }
                // 无法确认本地文件就是完整资源
                _ => {
                    return Err(DownloadError::Transport(
                        "416 响应缺少有效的 Content-Range".to_string(),
                    ))
                }
            },
            s if s.is_success() => (RangeResponse::Full, resp.content_length()),
            s => return Err(DownloadError::UnexpectedStatus(s.as_u16())),
        };

        if offset > 0 && range == RangeResponse::Full {
            warn!("服务器忽略了 Range 请求，返回完整内容: {}", url);
        }

        let stream = resp
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
            .boxed();

        Ok(TransportStream {
            range,
            total,
            stream,
        })
    }
}
