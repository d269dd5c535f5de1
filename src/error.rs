//! 下载核心的错误类型

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::downloader::{TaskAction, TaskStatus};

/// 下载核心通用的 `Result` 类型
pub type Result<T> = std::result::Result<T, DownloadError>;

/// 下载核心可能返回的所有错误
#[derive(Debug, Error)]
pub enum DownloadError {
    /// 连接失败或读取数据流失败
    #[error("传输失败: {0}")]
    Transport(String),

    /// HTTP 客户端错误
    #[error("HTTP 请求失败: {0}")]
    Http(#[from] reqwest::Error),

    /// 服务器返回了非预期的状态码
    #[error("服务器返回异常状态码: {0}")]
    UnexpectedStatus(u16),

    /// 续传时服务器没有按请求的偏移量返回数据
    #[error("服务器未遵循 Range 请求: 请求偏移 {requested}, 实际起点 {actual}")]
    RangeNotHonored { requested: u64, actual: u64 },

    /// 从头下载时服务器返回了空响应体
    #[error("服务器返回了空的响应体")]
    EmptyResponse,

    /// 数据流在达到声明的大小之前提前结束
    #[error("数据流提前结束: 预期 {expected} 字节, 实际 {actual} 字节")]
    Incomplete { expected: u64, actual: u64 },

    /// 当前状态下不允许该操作
    #[error("无法{action}该下载 (当前状态: {status})")]
    InvalidTransition { action: TaskAction, status: TaskStatus },

    /// 序号超出范围（面向用户的 1 起始序号）
    #[error("无效的下载序号 {index}，当前共 {len} 个下载")]
    InvalidIndex { index: usize, len: usize },

    /// 目标目录不可用
    #[error("目标目录不可用: {path:?}: {reason}")]
    InvalidDestination { path: PathBuf, reason: String },

    /// 本地文件读写失败
    #[error("文件操作失败: {path:?}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 下载器正在关闭，不再接受新任务
    #[error("下载器已关闭")]
    ShuttingDown,
}

impl DownloadError {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// 该错误是否由传输层引起（任务保留已写入的数据，可通过恢复重试）
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Http(_)
                | Self::UnexpectedStatus(_)
                | Self::RangeNotHonored { .. }
                | Self::Incomplete { .. }
                | Self::EmptyResponse
        )
    }
}
