//! 固定大小的工作线程池
//!
//! N 个工作协程从同一个无界队列按 FIFO 顺序取任务执行：
//! - 提交永不阻塞、永不拒绝（关闭后除外）
//! - 任意时刻最多 N 个任务在运行
//! - 单个任务 panic 不影响其它工作协程

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{DownloadError, Result};

type Job = BoxFuture<'static, ()>;

#[derive(Debug, Default)]
struct PoolStats {
    active: AtomicUsize,
    peak: AtomicUsize,
    queued: AtomicUsize,
}

/// 任务运行期间计入 active，被 abort 时同样会释放
struct ActiveGuard<'a>(&'a PoolStats);

impl<'a> ActiveGuard<'a> {
    fn enter(stats: &'a PoolStats) -> Self {
        let now = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak.fetch_max(now, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 工作线程池
#[derive(Debug)]
pub struct WorkerPool {
    max_workers: usize,
    queue_tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    /// 创建线程池并立即启动工作协程，必须在 tokio 运行时中调用
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let stats = Arc::new(PoolStats::default());

        let workers = (0..max_workers)
            .map(|id| tokio::spawn(worker_loop(id, rx.clone(), stats.clone())))
            .collect();

        info!("创建工作线程池，最大并发数: {}", max_workers);

        Self {
            max_workers,
            queue_tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            stats,
        }
    }

    /// 提交任务，排在队列末尾
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.queue_tx.lock();
        let tx = guard.as_ref().ok_or(DownloadError::ShuttingDown)?;

        self.stats.queued.fetch_add(1, Ordering::SeqCst);
        if tx.send(job.boxed()).is_err() {
            self.stats.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(DownloadError::ShuttingDown);
        }
        Ok(())
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// 正在运行的任务数
    pub fn active_workers(&self) -> usize {
        self.stats.active.load(Ordering::SeqCst)
    }

    /// 运行任务数的历史最大值
    pub fn peak_workers(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }

    /// 排队等待的任务数
    pub fn queued_jobs(&self) -> usize {
        self.stats.queued.load(Ordering::SeqCst)
    }

    pub fn is_shutdown(&self) -> bool {
        self.queue_tx.lock().is_none()
    }

    /// 停止接收新任务，并中止所有工作协程（包括正在运行的任务）
    pub fn shutdown(&self) {
        if self.queue_tx.lock().take().is_none() {
            return;
        }
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in &workers {
            handle.abort();
        }
        info!("工作线程池已关闭，中止 {} 个工作协程", workers.len());
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for handle in self.workers.lock().drain(..) {
            handle.abort();
        }
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>,
    stats: Arc<PoolStats>,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            debug!("工作协程 #{} 退出: 队列已关闭", id);
            break;
        };
        stats.queued.fetch_sub(1, Ordering::SeqCst);

        let _active = ActiveGuard::enter(&stats);
        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            error!("工作协程 #{} 执行的任务发生 panic", id);
        }
    }
}
