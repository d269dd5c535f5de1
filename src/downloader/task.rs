use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::file;
use crate::config::DownloadConfig;
use crate::error::{DownloadError, Result};
use crate::transport::{RangeResponse, Transport};

/// 下载任务状态
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// 下载中（包括排队等待工作线程）
    Downloading,
    /// 已暂停
    Paused,
    /// 已完成
    Completed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// 受状态约束的任务操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskAction {
    Pause,
    Resume,
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pause => f.write_str("暂停"),
            Self::Resume => f.write_str("恢复"),
        }
    }
}

/// 单次传输使用的参数
#[derive(Debug, Clone, Copy)]
pub struct TransferSettings {
    /// 读缓冲区大小
    pub chunk_size: usize,
    /// 服务器忽略 Range 时是否清空文件从头下载
    pub restart_on_ignored_range: bool,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: 8192,
            restart_on_ignored_range: false,
        }
    }
}

impl From<&DownloadConfig> for TransferSettings {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            restart_on_ignored_range: config.restart_on_ignored_range,
        }
    }
}

/// 一次 `start()` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// 数据流读完，文件完整
    Completed { bytes: u64 },
    /// 被暂停，文件保留已写入部分
    Paused { bytes: u64 },
    /// 被取消
    Canceled,
    /// 下载器关闭时被中断
    Interrupted { bytes: u64 },
}

/// 任务详情快照
#[derive(Debug, Clone, Serialize)]
pub struct DownloadDetails {
    pub id: String,
    pub url: String,
    pub file_name: String,
    pub local_path: PathBuf,
    pub paused: bool,
    pub completed: bool,
    pub status: TaskStatus,
    /// 本地文件已写入的字节数
    pub downloaded_size: u64,
    pub created_at: DateTime<Local>,
    /// 最近一次传输失败的原因
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

enum TransferEnd {
    Finished,
    Stopped,
}

/// 下载任务
///
/// 传输循环运行在工作线程中，暂停、恢复、取消由操作端并发调用。
/// 标志位使用原子变量；当前连接用一个 `CancellationToken` 表示，
/// 取消该 token 即关闭连接。
#[derive(Debug)]
pub struct DownloadTask {
    id: String,
    url: String,
    file_name: String,
    path: PathBuf,
    created_at: DateTime<Local>,
    settings: TransferSettings,
    transport: Arc<dyn Transport>,
    /// 下载器的根 token，每次传输的 token 都是它的子 token
    shutdown: CancellationToken,

    paused: AtomicBool,
    completed: AtomicBool,
    canceled: AtomicBool,
    /// 已经有一次运行在线程池中排队
    scheduled: AtomicBool,
    bytes_written: AtomicU64,
    last_error: Mutex<Option<String>>,

    /// 仅在传输进行中存在
    handle: Mutex<Option<CancellationToken>>,
    /// 传输期间由工作线程持有
    transfer_lock: tokio::sync::Mutex<()>,
}

impl DownloadTask {
    pub fn new(
        url: impl Into<String>,
        dir: &Path,
        file_name: impl Into<String>,
        transport: Arc<dyn Transport>,
        settings: TransferSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let file_name = file_name.into();
        let path = dir.join(&file_name);
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
            file_name,
            path,
            created_at: Local::now(),
            settings,
            transport,
            shutdown,
            paused: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
            scheduled: AtomicBool::new(false),
            bytes_written: AtomicU64::new(0),
            last_error: Mutex::new(None),
            handle: Mutex::new(None),
            transfer_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// 传输已完成且目标文件存在、非空
    ///
    /// 只有 `completed` 已置位时才会查询文件元数据，未完成的任务不访问磁盘。
    /// 这是一次同步的 stat 调用，菜单操作的频率下可以接受。
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst) && file::exists_non_empty(&self.path)
    }

    pub fn status(&self) -> TaskStatus {
        if self.is_completed() {
            TaskStatus::Completed
        } else if self.paused.load(Ordering::SeqCst) {
            TaskStatus::Paused
        } else {
            TaskStatus::Downloading
        }
    }

    pub fn details(&self) -> DownloadDetails {
        let status = self.status();
        DownloadDetails {
            id: self.id.clone(),
            url: self.url.clone(),
            file_name: self.file_name.clone(),
            local_path: self.path.clone(),
            paused: status == TaskStatus::Paused,
            completed: status == TaskStatus::Completed,
            status,
            downloaded_size: self.bytes_written(),
            created_at: self.created_at,
            error: self.last_error(),
        }
    }

    /// 标记一次排队中的运行，返回 false 表示已经有一次运行在排队
    pub(crate) fn mark_scheduled(&self) -> bool {
        !self.scheduled.swap(true, Ordering::SeqCst)
    }

    /// 开始或继续传输
    ///
    /// 目标文件已有 L 字节时从 L 续传。传输失败时任务转为暂停并记录错误，
    /// 已写入的数据保留，可以通过恢复重试。
    pub async fn start(&self) -> Result<TransferOutcome> {
        let _guard = self.transfer_lock.lock().await;
        self.scheduled.store(false, Ordering::SeqCst);

        if self.canceled.load(Ordering::SeqCst) {
            return Ok(TransferOutcome::Canceled);
        }
        if self.completed.load(Ordering::SeqCst) {
            return Ok(TransferOutcome::Completed {
                bytes: self.bytes_written(),
            });
        }

        // 先登记连接再检查标志位，和 pause()/cancel() 的顺序相反
        let token = self.shutdown.child_token();
        *self.handle.lock() = Some(token.clone());

        if self.canceled.load(Ordering::SeqCst) {
            self.handle.lock().take();
            return Ok(TransferOutcome::Canceled);
        }
        if self.paused.load(Ordering::SeqCst) {
            self.handle.lock().take();
            return Ok(TransferOutcome::Paused {
                bytes: self.bytes_written(),
            });
        }

        info!("开始下载: {} -> {:?}", self.url, self.path);
        let result = self.transfer(&token).await;
        self.handle.lock().take();
        let bytes = self.bytes_written();

        match result {
            Ok(TransferEnd::Finished) => {
                self.completed.store(true, Ordering::SeqCst);
                self.paused.store(false, Ordering::SeqCst);
                self.last_error.lock().take();
                info!("下载完成: {} ({} bytes)", self.file_name, bytes);
                Ok(TransferOutcome::Completed { bytes })
            }
            Ok(TransferEnd::Stopped) => {
                if self.canceled.load(Ordering::SeqCst) {
                    Ok(TransferOutcome::Canceled)
                } else if self.shutdown.is_cancelled() {
                    info!("下载器关闭，中断下载: {}", self.file_name);
                    Ok(TransferOutcome::Interrupted { bytes })
                } else {
                    info!("下载已暂停: {} ({} bytes)", self.file_name, bytes);
                    Ok(TransferOutcome::Paused { bytes })
                }
            }
            Err(_) if self.canceled.load(Ordering::SeqCst) => Ok(TransferOutcome::Canceled),
            Err(e) => {
                error!("下载失败: {}, 错误: {}", self.file_name, e);
                self.paused.store(true, Ordering::SeqCst);
                *self.last_error.lock() = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn transfer(&self, token: &CancellationToken) -> Result<TransferEnd> {
        let offset = file::file_length(&self.path).await?;
        self.bytes_written.store(offset, Ordering::SeqCst);

        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(TransferEnd::Stopped),
            opened = self.transport.open(&self.url, offset) => opened?,
        };

        let restart = match opened.range {
            RangeResponse::Exhausted if offset == 0 => return Err(DownloadError::EmptyResponse),
            RangeResponse::Exhausted => {
                info!("本地文件已包含完整内容: {:?}", self.path);
                return Ok(TransferEnd::Finished);
            }
            RangeResponse::Partial { start } if start == offset => false,
            RangeResponse::Partial { start } => {
                return Err(DownloadError::RangeNotHonored {
                    requested: offset,
                    actual: start,
                })
            }
            RangeResponse::Full if offset == 0 => false,
            RangeResponse::Full if self.settings.restart_on_ignored_range => {
                warn!("服务器不支持续传，清空 {} 字节后重新下载: {}", offset, self.file_name);
                true
            }
            RangeResponse::Full => {
                return Err(DownloadError::RangeNotHonored {
                    requested: offset,
                    actual: 0,
                })
            }
        };

        let mut written = if restart { 0 } else { offset };
        let mut out = file::open_for_append_at(&self.path, written, restart).await?;
        self.bytes_written.store(written, Ordering::SeqCst);

        let total = opened.total;
        let mut reader = StreamReader::new(opened.stream);
        let mut buf = vec![0u8; self.settings.chunk_size.max(1)];

        let result = loop {
            let n = tokio::select! {
                biased;
                _ = token.cancelled() => break Ok(TransferEnd::Stopped),
                read = reader.read(&mut buf) => match read {
                    Ok(n) => n,
                    Err(e) => break Err(DownloadError::Transport(e.to_string())),
                },
            };

            if n == 0 {
                if written == 0 {
                    break Err(DownloadError::EmptyResponse);
                }
                match total {
                    Some(expected) if written < expected => {
                        break Err(DownloadError::Incomplete {
                            expected,
                            actual: written,
                        })
                    }
                    _ => break Ok(TransferEnd::Finished),
                }
            }

            if let Err(e) = out.write_all(&buf[..n]).await {
                break Err(DownloadError::filesystem(&self.path, e));
            }
            written += n as u64;
            self.bytes_written.store(written, Ordering::SeqCst);
        };

        // 关闭连接
        drop(reader);

        let flushed = out
            .flush()
            .await
            .map_err(|e| DownloadError::filesystem(&self.path, e));
        let end = result?;
        flushed?;
        debug!("传输结束: {}, 已写入 {} bytes", self.file_name, written);
        Ok(end)
    }

    /// 暂停，只允许在下载中状态调用
    pub fn pause(&self) -> Result<()> {
        let status = self.status();
        if status != TaskStatus::Downloading {
            return Err(DownloadError::InvalidTransition {
                action: TaskAction::Pause,
                status,
            });
        }
        if self
            .paused
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DownloadError::InvalidTransition {
                action: TaskAction::Pause,
                status: self.status(),
            });
        }

        self.close_transport();
        info!("暂停下载: {}", self.file_name);
        Ok(())
    }

    /// 恢复，只允许在暂停状态调用
    ///
    /// 返回 true 表示调用方需要把 `start()` 重新提交给线程池。
    pub fn resume(&self) -> Result<bool> {
        let status = self.status();
        if status != TaskStatus::Paused {
            return Err(DownloadError::InvalidTransition {
                action: TaskAction::Resume,
                status,
            });
        }
        if self
            .paused
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DownloadError::InvalidTransition {
                action: TaskAction::Resume,
                status: self.status(),
            });
        }

        self.last_error.lock().take();
        info!("恢复下载: {}", self.file_name);
        Ok(self.mark_scheduled())
    }

    /// 撤销一次尚未提交到线程池的恢复，任务回到暂停状态
    pub(crate) fn revert_resume(&self) {
        self.scheduled.store(false, Ordering::SeqCst);
        self.paused.store(true, Ordering::SeqCst);
        warn!("恢复失败，任务保持暂停: {}", self.file_name);
    }

    /// 取消：关闭连接，等待工作线程释放文件后删除文件
    ///
    /// 返回是否删除了本地文件。
    pub async fn cancel(&self) -> Result<bool> {
        self.canceled.store(true, Ordering::SeqCst);
        self.close_transport();

        let _guard = self.transfer_lock.lock().await;
        info!("取消下载: {}", self.file_name);
        file::remove_if_exists(&self.path).await
    }

    fn close_transport(&self) {
        if let Some(token) = self.handle.lock().as_ref() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Semaphore;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn settings() -> TransferSettings {
        TransferSettings {
            chunk_size: 64,
            restart_on_ignored_range: false,
        }
    }

    fn make_task(dir: &TempDir, transport: Arc<MemoryTransport>, settings: TransferSettings) -> Arc<DownloadTask> {
        Arc::new(DownloadTask::new(
            "http://example.test/file.bin",
            dir.path(),
            "file.bin",
            transport,
            settings,
            CancellationToken::new(),
        ))
    }

    async fn wait_for_bytes(task: &DownloadTask, bytes: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while task.bytes_written() < bytes {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("等待写入超时");
    }

    #[tokio::test]
    async fn test_download_completes() {
        let dir = TempDir::new().unwrap();
        let data = payload(10_000);
        let transport = Arc::new(MemoryTransport::new(data.clone()));
        let task = make_task(&dir, transport.clone(), settings());

        assert_eq!(task.status(), TaskStatus::Downloading);
        let outcome = task.start().await.unwrap();

        assert_eq!(outcome, TransferOutcome::Completed { bytes: 10_000 });
        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(std::fs::read(task.path()).unwrap(), data);
        assert_eq!(transport.requested_offsets(), vec![0]);
        assert_eq!(transport.active(), 0);
    }

    #[tokio::test]
    async fn test_pause_then_resume_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let data = payload(10_000);
        let gate = Arc::new(Semaphore::new(0));
        let transport = Arc::new(MemoryTransport::new(data.clone()).with_gate(gate.clone()));
        let task = make_task(&dir, transport.clone(), settings());

        let runner = {
            let task = task.clone();
            tokio::spawn(async move { task.start().await })
        };

        gate.add_permits(3);
        wait_for_bytes(&task, 300).await;
        task.pause().unwrap();

        let outcome = runner.await.unwrap().unwrap();
        assert_eq!(outcome, TransferOutcome::Paused { bytes: 300 });
        assert_eq!(task.status(), TaskStatus::Paused);
        assert_eq!(std::fs::metadata(task.path()).unwrap().len(), 300);
        assert_eq!(transport.active(), 0);

        assert!(task.resume().unwrap());
        assert_eq!(task.status(), TaskStatus::Downloading);
        gate.add_permits(1_000);
        let outcome = task.start().await.unwrap();

        assert_eq!(outcome, TransferOutcome::Completed { bytes: 10_000 });
        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(std::fs::read(task.path()).unwrap(), data);
        assert_eq!(transport.requested_offsets(), vec![0, 300]);
    }

    #[tokio::test]
    async fn test_invalid_transitions_are_rejected() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MemoryTransport::new(payload(1_000)));
        let task = make_task(&dir, transport, settings());

        let err = task.resume().unwrap_err();
        assert!(matches!(
            err,
            DownloadError::InvalidTransition {
                action: TaskAction::Resume,
                status: TaskStatus::Downloading
            }
        ));

        task.pause().unwrap();
        let err = task.pause().unwrap_err();
        assert!(matches!(
            err,
            DownloadError::InvalidTransition {
                action: TaskAction::Pause,
                status: TaskStatus::Paused
            }
        ));

        assert!(task.resume().unwrap());
        task.start().await.unwrap();

        let err = task.resume().unwrap_err();
        assert!(matches!(
            err,
            DownloadError::InvalidTransition {
                action: TaskAction::Resume,
                status: TaskStatus::Completed
            }
        ));
        assert!(task.pause().is_err());
        assert_eq!(task.status(), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_paused_before_start_does_not_connect() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MemoryTransport::new(payload(1_000)));
        let task = make_task(&dir, transport.clone(), settings());

        task.pause().unwrap();
        let outcome = task.start().await.unwrap();

        assert_eq!(outcome, TransferOutcome::Paused { bytes: 0 });
        assert_eq!(transport.opens(), 0);
        assert!(!task.path().exists());
    }

    #[tokio::test]
    async fn test_ignored_range_fails_fast() {
        let dir = TempDir::new().unwrap();
        let data = payload(10_000);
        std::fs::write(dir.path().join("file.bin"), &data[..300]).unwrap();
        let transport = Arc::new(MemoryTransport::new(data.clone()).ignore_range());
        let task = make_task(&dir, transport, settings());

        let err = task.start().await.unwrap_err();
        assert!(matches!(
            err,
            DownloadError::RangeNotHonored {
                requested: 300,
                actual: 0
            }
        ));
        assert_eq!(std::fs::read(task.path()).unwrap(), &data[..300]);
        assert_eq!(task.status(), TaskStatus::Paused);
        assert!(task.details().error.is_some());
    }

    #[tokio::test]
    async fn test_ignored_range_restarts_when_configured() {
        let dir = TempDir::new().unwrap();
        let data = payload(10_000);
        std::fs::write(dir.path().join("file.bin"), &data[..300]).unwrap();
        let transport = Arc::new(MemoryTransport::new(data.clone()).ignore_range());
        let task = make_task(
            &dir,
            transport,
            TransferSettings {
                chunk_size: 64,
                restart_on_ignored_range: true,
            },
        );

        let outcome = task.start().await.unwrap();
        assert_eq!(outcome, TransferOutcome::Completed { bytes: 10_000 });
        assert_eq!(std::fs::read(task.path()).unwrap(), data);
    }

    #[tokio::test]
    async fn test_existing_complete_file_finishes_without_writing() {
        let dir = TempDir::new().unwrap();
        let data = payload(2_000);
        std::fs::write(dir.path().join("file.bin"), &data).unwrap();
        let transport = Arc::new(MemoryTransport::new(data.clone()));
        let task = make_task(&dir, transport.clone(), settings());

        let outcome = task.start().await.unwrap();
        assert_eq!(outcome, TransferOutcome::Completed { bytes: 2_000 });
        assert_eq!(transport.requested_offsets(), vec![2_000]);
        assert_eq!(std::fs::read(task.path()).unwrap(), data);
    }

    #[tokio::test]
    async fn test_stream_failure_keeps_partial_file_and_is_resumable() {
        let dir = TempDir::new().unwrap();
        let data = payload(10_000);
        let transport = Arc::new(MemoryTransport::new(data.clone()).fail_at(5_000));
        let task = make_task(&dir, transport.clone(), settings());

        let err = task.start().await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(task.status(), TaskStatus::Paused);
        assert_eq!(std::fs::metadata(task.path()).unwrap().len(), 5_000);
        assert!(task.last_error().is_some());

        assert!(task.resume().unwrap());
        assert!(task.last_error().is_none());
        task.start().await.unwrap();

        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(std::fs::read(task.path()).unwrap(), data);
        assert_eq!(transport.requested_offsets(), vec![0, 5_000]);
    }

    #[tokio::test]
    async fn test_short_stream_is_not_completed() {
        let dir = TempDir::new().unwrap();
        let data = payload(10_000);
        let transport = Arc::new(MemoryTransport::new(data.clone()).end_early_at(2_500));
        let task = make_task(&dir, transport.clone(), settings());

        let err = task.start().await.unwrap_err();
        assert!(matches!(
            err,
            DownloadError::Incomplete {
                expected: 10_000,
                actual: 2_500
            }
        ));
        assert!(err.is_transport());
        assert_eq!(task.status(), TaskStatus::Paused);
        assert_eq!(std::fs::metadata(task.path()).unwrap().len(), 2_500);

        assert!(task.resume().unwrap());
        task.start().await.unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(std::fs::read(task.path()).unwrap(), data);
        assert_eq!(transport.requested_offsets(), vec![0, 2_500]);
    }

    #[tokio::test]
    async fn test_completed_requires_file_on_disk() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MemoryTransport::new(payload(1_000)));
        let task = make_task(&dir, transport, settings());

        task.start().await.unwrap();
        assert!(task.is_completed());

        std::fs::remove_file(task.path()).unwrap();
        assert!(!task.is_completed());
        assert_ne!(task.status(), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_revert_resume_restores_paused() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MemoryTransport::new(payload(1_000)));
        let task = make_task(&dir, transport.clone(), settings());

        task.pause().unwrap();
        assert!(task.resume().unwrap());
        task.revert_resume();

        assert_eq!(task.status(), TaskStatus::Paused);
        // 排队标记已清除，下一次恢复会重新提交
        assert!(task.resume().unwrap());
        assert_eq!(transport.opens(), 0);
    }

    #[tokio::test]
    async fn test_connection_refused_is_reported() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MemoryTransport::new(payload(1_000)));
        transport.set_refuse_connections(true);
        let task = make_task(&dir, transport, settings());

        let err = task.start().await.unwrap_err();
        assert!(matches!(err, DownloadError::Transport(_)));
        assert_eq!(task.status(), TaskStatus::Paused);
        assert!(!task.path().exists());
    }

    #[tokio::test]
    async fn test_empty_body_is_an_error() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MemoryTransport::new(Vec::new()));
        let task = make_task(&dir, transport, settings());

        let err = task.start().await.unwrap_err();
        assert!(matches!(err, DownloadError::EmptyResponse));
        assert_ne!(task.status(), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_mid_transfer_deletes_file() {
        let dir = TempDir::new().unwrap();
        let gate = Arc::new(Semaphore::new(0));
        let transport = Arc::new(MemoryTransport::new(payload(10_000)).with_gate(gate.clone()));
        let task = make_task(&dir, transport.clone(), settings());

        let runner = {
            let task = task.clone();
            tokio::spawn(async move { task.start().await })
        };
        gate.add_permits(2);
        wait_for_bytes(&task, 200).await;

        assert!(task.cancel().await.unwrap());
        assert_eq!(runner.await.unwrap().unwrap(), TransferOutcome::Canceled);
        assert!(!task.path().exists());
        assert_eq!(transport.active(), 0);

        // 取消后的任务不会再次连接
        assert_eq!(task.start().await.unwrap(), TransferOutcome::Canceled);
        assert_eq!(transport.opens(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_transfer() {
        let dir = TempDir::new().unwrap();
        let gate = Arc::new(Semaphore::new(1));
        let transport = Arc::new(MemoryTransport::new(payload(10_000)).with_gate(gate));
        let root = CancellationToken::new();
        let task = Arc::new(DownloadTask::new(
            "http://example.test/file.bin",
            dir.path(),
            "file.bin",
            transport,
            settings(),
            root.clone(),
        ));

        let runner = {
            let task = task.clone();
            tokio::spawn(async move { task.start().await })
        };
        wait_for_bytes(&task, 100).await;
        root.cancel();

        assert_eq!(
            runner.await.unwrap().unwrap(),
            TransferOutcome::Interrupted { bytes: 100 }
        );
    }

    #[tokio::test]
    async fn test_details_snapshot_serializes() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MemoryTransport::new(payload(1_000)));
        let task = make_task(&dir, transport, settings());
        task.start().await.unwrap();

        let details = task.details();
        assert!(details.completed);
        assert!(!details.paused);
        assert_eq!(details.downloaded_size, 1_000);
        assert_eq!(details.local_path, dir.path().join("file.bin"));

        let text = toml::to_string(&details).unwrap();
        assert!(text.contains("status = \"completed\""));
        assert!(!text.contains("error"));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(TaskStatus::Downloading.to_string(), "downloading");
        assert_eq!(TaskStatus::Paused.to_string(), "paused");
        assert_eq!(TaskAction::Pause.to_string(), "暂停");
    }
}
