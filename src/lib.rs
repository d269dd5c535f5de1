// dlman: 可暂停、可续传的多任务 HTTP 下载管理器

// 配置管理模块
pub mod config;

// 下载核心：任务状态机、工作线程池、任务注册表
pub mod downloader;

// 错误类型
pub mod error;

// 日志系统
pub mod logging;

// 传输层（HTTP）
pub mod transport;

// 交互式菜单
pub mod cli;

// 导出常用类型
pub use config::{AppConfig, DownloadConfig, LogConfig};
pub use downloader::{DownloadEvent, DownloadRegistry, DownloadTask, TaskStatus};
pub use error::{DownloadError, Result};
pub use transport::{HttpTransport, Transport};
