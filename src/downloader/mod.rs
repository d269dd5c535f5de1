pub mod events;
pub mod file;
pub mod registry;
pub mod task;
pub mod worker_pool;

pub use events::DownloadEvent;
pub use registry::{CancelReport, DownloadRegistry, DownloadSummary};
pub use task::{
    DownloadDetails, DownloadTask, TaskAction, TaskStatus, TransferOutcome, TransferSettings,
};
pub use worker_pool::WorkerPool;
