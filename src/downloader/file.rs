//! 目标文件操作：按偏移追加写入、查询长度、删除

use std::io;
use std::path::Path;
use tokio::fs::{self, File, OpenOptions};
use tracing::{debug, info};

use crate::error::{DownloadError, Result};

/// 文件长度，文件不存在时返回 0
pub async fn file_length(path: &Path) -> Result<u64> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(DownloadError::filesystem(path, e)),
    }
}

/// 文件存在且非空（同步版本，供状态查询使用）
pub fn exists_non_empty(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// 以追加方式打开文件，写入位置必须恰好是 `offset`
///
/// `restart` 为 true 时先把文件截断到 0（仅用于服务器忽略 Range 的重下策略），
/// 此时 `offset` 必须为 0。
pub async fn open_for_append_at(path: &Path, offset: u64, restart: bool) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| DownloadError::filesystem(path, e))?;

    if restart {
        file.set_len(0)
            .await
            .map_err(|e| DownloadError::filesystem(path, e))?;
        info!("已清空文件，重新从头写入: {:?}", path);
    }

    let len = file
        .metadata()
        .await
        .map_err(|e| DownloadError::filesystem(path, e))?
        .len();

    if len != offset {
        return Err(DownloadError::filesystem(
            path,
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("文件长度 {} 与写入偏移 {} 不一致", len, offset),
            ),
        ));
    }

    debug!("打开目标文件: {:?}, 追加偏移 {}", path, offset);
    Ok(file)
}

/// 删除文件，文件不存在时视为成功。返回是否真的删除了文件
pub async fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => {
            info!("已删除本地文件: {:?}", path);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(DownloadError::filesystem(path, e)),
    }
}
