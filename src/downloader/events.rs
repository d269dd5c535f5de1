//! 下载任务事件
//!
//! 每次运行结束时由注册表广播，操作界面订阅后打印提示。

use super::task::{DownloadTask, TransferOutcome};
use crate::error::DownloadError;

/// 下载任务事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    /// 工作线程开始执行任务
    Started { task_id: String, file_name: String },
    /// 下载完成
    Completed {
        task_id: String,
        file_name: String,
        bytes: u64,
    },
    /// 传输因暂停而停止
    Paused {
        task_id: String,
        file_name: String,
        bytes: u64,
    },
    /// 传输失败，任务转为暂停
    Failed {
        task_id: String,
        file_name: String,
        error: String,
    },
    /// 任务被取消
    Canceled { task_id: String, file_name: String },
    /// 下载器关闭时被中断
    Interrupted {
        task_id: String,
        file_name: String,
        bytes: u64,
    },
}

impl DownloadEvent {
    pub(crate) fn started(task: &DownloadTask) -> Self {
        Self::Started {
            task_id: task.id().to_string(),
            file_name: task.file_name().to_string(),
        }
    }

    /// 根据一次运行的结果构造事件
    pub(crate) fn finished(
        task: &DownloadTask,
        result: &std::result::Result<TransferOutcome, DownloadError>,
    ) -> Self {
        let task_id = task.id().to_string();
        let file_name = task.file_name().to_string();
        match result {
            Ok(TransferOutcome::Completed { bytes }) => Self::Completed {
                task_id,
                file_name,
                bytes: *bytes,
            },
            Ok(TransferOutcome::Paused { bytes }) => Self::Paused {
                task_id,
                file_name,
                bytes: *bytes,
            },
            Ok(TransferOutcome::Canceled) => Self::Canceled { task_id, file_name },
            Ok(TransferOutcome::Interrupted { bytes }) => Self::Interrupted {
                task_id,
                file_name,
                bytes: *bytes,
            },
            Err(e) => Self::Failed {
                task_id,
                file_name,
                error: e.to_string(),
            },
        }
    }

    /// 获取任务 ID
    pub fn task_id(&self) -> &str {
        match self {
            DownloadEvent::Started { task_id, .. } => task_id,
            DownloadEvent::Completed { task_id, .. } => task_id,
            DownloadEvent::Paused { task_id, .. } => task_id,
            DownloadEvent::Failed { task_id, .. } => task_id,
            DownloadEvent::Canceled { task_id, .. } => task_id,
            DownloadEvent::Interrupted { task_id, .. } => task_id,
        }
    }

    /// 获取文件名
    pub fn file_name(&self) -> &str {
        match self {
            DownloadEvent::Started { file_name, .. } => file_name,
            DownloadEvent::Completed { file_name, .. } => file_name,
            DownloadEvent::Paused { file_name, .. } => file_name,
            DownloadEvent::Failed { file_name, .. } => file_name,
            DownloadEvent::Canceled { file_name, .. } => file_name,
            DownloadEvent::Interrupted { file_name, .. } => file_name,
        }
    }
}
