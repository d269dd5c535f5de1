// 目标目录验证

use anyhow::Context;
use std::fs;
use std::path::Path;

use crate::error::DownloadError;

/// 路径验证结果
#[derive(Debug, Clone)]
pub struct PathValidationResult {
    /// 路径是否可用于保存下载文件
    pub valid: bool,
    /// 验证消息
    pub message: String,
}

impl PathValidationResult {
    fn success() -> Self {
        Self {
            valid: true,
            message: "路径验证通过".to_string(),
        }
    }

    fn failure(message: &str) -> Self {
        Self {
            valid: false,
            message: message.to_string(),
        }
    }
}

/// 路径验证器
pub struct PathValidator;

impl PathValidator {
    /// 验证目录是否可用于保存下载文件
    ///
    /// 依次检查：路径存在、是目录、可写（写入探测文件）
    pub fn validate(path: &Path) -> PathValidationResult {
        if !path.exists() {
            return PathValidationResult::failure("路径不存在");
        }

        if !path.is_dir() {
            return PathValidationResult::failure("路径不是目录");
        }

        if !Self::check_writable(path) {
            return PathValidationResult::failure("路径不可写");
        }

        PathValidationResult::success()
    }

    /// 通过创建临时文件检测写入权限
    fn check_writable(path: &Path) -> bool {
        let probe = path.join(".dlman_write_test");

        match fs::File::create(&probe) {
            Ok(_) => {
                let _ = fs::remove_file(&probe);
                true
            }
            Err(_) => false,
        }
    }

    /// 验证下载目录，失败时返回 `InvalidDestination`
    pub fn validate_destination(path: &Path) -> crate::error::Result<()> {
        let result = Self::validate(path);
        if result.valid {
            return Ok(());
        }

        tracing::warn!("下载目录验证失败: {:?}, {}", path, result.message);
        Err(DownloadError::InvalidDestination {
            path: path.to_path_buf(),
            reason: result.message,
        })
    }

    /// 自动创建目录（如果不存在）
    pub fn ensure_directory_exists(path: &Path) -> anyhow::Result<()> {
        if !path.exists() {
            fs::create_dir_all(path).with_context(|| format!("无法创建目录: {:?}", path))?;
            tracing::info!("自动创建目录: {:?}", path);
        }
        Ok(())
    }
}
