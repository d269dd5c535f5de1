use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::events::DownloadEvent;
use super::task::{DownloadDetails, DownloadTask, TaskStatus, TransferSettings};
use super::worker_pool::WorkerPool;
use crate::config::{DownloadConfig, PathValidator};
use crate::error::{DownloadError, Result};
use crate::transport::Transport;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 列表中的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    /// 从 1 开始的序号
    pub index: usize,
    pub id: String,
    pub file_name: String,
    pub status: TaskStatus,
}

/// 取消结果
///
/// 删除本地文件失败时任务同样会被移除，失败原因放在 `delete_error` 中。
#[derive(Debug)]
pub struct CancelReport {
    pub file_name: String,
    pub file_removed: bool,
    pub delete_error: Option<DownloadError>,
}

/// 下载任务注册表
///
/// 按提交顺序保存任务，面向用户的序号从 1 开始，取消任务后后面的序号前移。
/// 所有任务共用一个工作线程池和一个传输实现。
#[derive(Debug)]
pub struct DownloadRegistry {
    tasks: RwLock<Vec<Arc<DownloadTask>>>,
    pool: WorkerPool,
    transport: Arc<dyn Transport>,
    settings: TransferSettings,
    /// 根 token，关闭时取消所有进行中的传输
    shutdown: CancellationToken,
    events: broadcast::Sender<DownloadEvent>,
}

impl DownloadRegistry {
    /// 创建注册表并启动工作线程池，必须在 tokio 运行时中调用
    pub fn new(config: &DownloadConfig, transport: Arc<dyn Transport>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tasks: RwLock::new(Vec::new()),
            pool: WorkerPool::new(config.max_concurrent_downloads),
            transport,
            settings: TransferSettings::from(config),
            shutdown: CancellationToken::new(),
            events,
        }
    }

    /// 订阅下载事件
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }

    /// 提交新的下载，立即返回其序号
    ///
    /// 工作线程都在忙时任务在队列中等待。
    pub async fn submit(&self, url: &str, dir: &Path, file_name: &str) -> Result<usize> {
        if self.shutdown.is_cancelled() {
            return Err(DownloadError::ShuttingDown);
        }
        validate_file_name(dir, file_name)?;
        PathValidator::validate_destination(dir)?;

        let task = Arc::new(DownloadTask::new(
            url,
            dir,
            file_name,
            self.transport.clone(),
            self.settings,
            self.shutdown.clone(),
        ));

        let index = {
            let mut tasks = self.tasks.write().await;
            if tasks.iter().any(|t| t.path() == task.path()) {
                return Err(DownloadError::InvalidDestination {
                    path: task.path().to_path_buf(),
                    reason: "已有下载任务使用该文件".to_string(),
                });
            }
            tasks.push(task.clone());
            tasks.len()
        };

        task.mark_scheduled();
        self.schedule(task.clone())?;

        info!(
            "创建下载任务 #{}: id={}, url={}, 保存到 {:?}",
            index,
            task.id(),
            url,
            task.path()
        );
        Ok(index)
    }

    fn schedule(&self, task: Arc<DownloadTask>) -> Result<()> {
        let events = self.events.clone();
        self.pool.submit(async move {
            publish_event(&events, DownloadEvent::started(&task));
            let result = task.start().await;
            publish_event(&events, DownloadEvent::finished(&task, &result));
        })
    }

    async fn task_at(&self, index: usize) -> Result<Arc<DownloadTask>> {
        let tasks = self.tasks.read().await;
        check_index(index, tasks.len())?;
        Ok(tasks[index - 1].clone())
    }

    /// 当前所有任务的快照
    pub async fn list(&self) -> Vec<DownloadSummary> {
        self.tasks
            .read()
            .await
            .iter()
            .enumerate()
            .map(|(i, task)| DownloadSummary {
                index: i + 1,
                id: task.id().to_string(),
                file_name: task.file_name().to_string(),
                status: task.status(),
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// 暂停第 `index` 个下载，返回文件名
    pub async fn pause_at(&self, index: usize) -> Result<String> {
        let task = self.task_at(index).await?;
        task.pause()?;
        Ok(task.file_name().to_string())
    }

    /// 恢复第 `index` 个下载，返回文件名
    ///
    /// 传输重新提交到线程池，不阻塞调用方。
    pub async fn resume_at(&self, index: usize) -> Result<String> {
        let task = self.task_at(index).await?;
        if self.shutdown.is_cancelled() {
            return Err(DownloadError::ShuttingDown);
        }
        if task.resume()? {
            if let Err(e) = self.schedule(task.clone()) {
                task.revert_resume();
                return Err(e);
            }
        }
        Ok(task.file_name().to_string())
    }

    /// 取消第 `index` 个下载并删除本地文件
    pub async fn cancel_at(&self, index: usize) -> Result<CancelReport> {
        let task = {
            let mut tasks = self.tasks.write().await;
            check_index(index, tasks.len())?;
            tasks.remove(index - 1)
        };

        let file_name = task.file_name().to_string();
        match task.cancel().await {
            Ok(file_removed) => Ok(CancelReport {
                file_name,
                file_removed,
                delete_error: None,
            }),
            Err(e) => {
                warn!("取消下载时删除文件失败: {}, 错误: {}", file_name, e);
                Ok(CancelReport {
                    file_name,
                    file_removed: false,
                    delete_error: Some(e),
                })
            }
        }
    }

    /// 第 `index` 个下载的详情
    pub async fn details_at(&self, index: usize) -> Result<DownloadDetails> {
        Ok(self.task_at(index).await?.details())
    }

    /// 同时运行的传输数的历史最大值
    pub fn peak_concurrency(&self) -> usize {
        self.pool.peak_workers()
    }

    pub fn max_concurrency(&self) -> usize {
        self.pool.max_workers()
    }

    /// 停止接收新任务并中断所有进行中的传输，已写入的数据保留
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.pool.shutdown();
        info!("下载器已关闭");
    }
}

impl Drop for DownloadRegistry {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// 发布下载事件，没有订阅者时丢弃
fn publish_event(events: &broadcast::Sender<DownloadEvent>, event: DownloadEvent) {
    let _ = events.send(event);
}

fn check_index(index: usize, len: usize) -> Result<()> {
    if index == 0 || index > len {
        return Err(DownloadError::InvalidIndex { index, len });
    }
    Ok(())
}

fn validate_file_name(dir: &Path, file_name: &str) -> Result<()> {
    let reason = if file_name.trim().is_empty() {
        Some("文件名为空")
    } else if file_name.contains(['/', '\\']) {
        Some("文件名不能包含路径分隔符")
    } else if file_name == "." || file_name == ".." {
        Some("文件名无效")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(DownloadError::InvalidDestination {
            path: dir.join(file_name),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
