// 配置管理模块

pub mod path_validator;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

pub use path_validator::{PathValidationResult, PathValidator};

/// 默认配置文件路径
pub const CONFIG_PATH: &str = "config/app.toml";

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

/// 下载配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// 同时进行的最大下载数
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,
    /// 读缓冲区大小（字节）
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// 连接超时（秒）
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// HTTP User-Agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// 服务器忽略 Range 时清空文件从头下载，默认直接报错
    #[serde(default)]
    pub restart_on_ignored_range: bool,
    /// 保存目录输入为空时使用的默认目录
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_dir: Option<PathBuf>,
}

fn default_max_concurrent_downloads() -> usize {
    3
}

fn default_chunk_size() -> usize {
    8 * 1024
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("dlman/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent_downloads(),
            chunk_size: default_chunk_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: default_user_agent(),
            restart_on_ignored_range: false,
            default_dir: None,
        }
    }
}

impl DownloadConfig {
    /// 检查数值范围
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_downloads == 0 {
            anyhow::bail!("max_concurrent_downloads 必须至少为 1");
        }
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size 必须至少为 1");
        }
        Ok(())
    }
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
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
    /// 同时输出到终端（stderr），会和交互提示混在一起，默认关闭
    #[serde(default)]
    pub console: bool,
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

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
            console: false,
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config
            .download
            .validate()
            .context("配置文件中的下载参数无效")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);
        Ok(())
    }

    /// 加载配置，失败时使用默认配置
    ///
    /// 文件不存在时写出一份默认配置。返回加载失败的原因，
    /// 调用方在日志系统初始化后再记录。
    pub async fn load_or_default(path: &str) -> (Self, Option<anyhow::Error>) {
        match Self::load_from_file(path).await {
            Ok(config) => (config, None),
            Err(e) => {
                let default_config = Self::default();

                if !std::path::Path::new(path).exists() {
                    if let Err(save_err) = default_config.save_to_file(path).await {
                        return (default_config, Some(e.context(save_err.to_string())));
                    }
                }

                (default_config, Some(e))
            }
        }
    }
}
