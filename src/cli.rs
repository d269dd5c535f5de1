//! 交互式命令行菜单
//!
//! 七个菜单项：新建下载、列表、暂停、恢复、取消、详情、退出。
//! 下载序号从 1 开始，取消某个下载后其后的序号前移。
//! 列表为空时同样会询问序号，随后提示序号无效。

use anyhow::Result;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::downloader::{DownloadEvent, DownloadRegistry, TaskStatus};
use crate::error::DownloadError;

const MENU: [&str; 7] = [
    "Download a New File",
    "Show Ongoing/Paused Downloads",
    "Pause a Download",
    "Resume a Download",
    "Cancel a Download",
    "Get Detailed Info of a Download",
    "Exit",
];

/// 输入结束（EOF）时菜单按退出处理
enum Flow {
    Continue,
    Exit,
}

/// 交互式菜单
pub struct Cli<R, W> {
    registry: DownloadRegistry,
    input: Lines<R>,
    out: W,
    default_dir: Option<PathBuf>,
}

impl<R, W> Cli<R, W>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    pub fn new(registry: DownloadRegistry, input: R, out: W, default_dir: Option<PathBuf>) -> Self {
        Self {
            registry,
            input: input.lines(),
            out,
            default_dir,
        }
    }

    pub fn registry(&self) -> &DownloadRegistry {
        &self.registry
    }

    /// 运行菜单直到选择退出或输入结束，退出前关闭下载器
    pub async fn run(&mut self) -> Result<()> {
        loop {
            for (i, item) in MENU.iter().enumerate() {
                writeln!(self.out, "{}. {}", i + 1, item)?;
            }
            let Some(choice) = self.prompt("Choose an option: ").await? else {
                break;
            };

            let flow = match choice.trim() {
                "1" => self.new_download().await?,
                "2" => {
                    self.show_downloads().await?;
                    Flow::Continue
                }
                "3" => self.pause().await?,
                "4" => self.resume().await?,
                "5" => self.cancel().await?,
                "6" => self.details().await?,
                "7" => Flow::Exit,
                _ => {
                    writeln!(self.out, "Invalid choice. Please enter a valid option.")?;
                    Flow::Continue
                }
            };
            if let Flow::Exit = flow {
                break;
            }
        }

        self.registry.shutdown();
        writeln!(self.out, "Exiting the program.")?;
        self.out.flush()?;
        info!("退出交互菜单");
        Ok(())
    }

    async fn prompt(&mut self, text: &str) -> Result<Option<String>> {
        write!(self.out, "{}", text)?;
        self.out.flush()?;
        Ok(self.input.next_line().await?)
    }

    /// 读取下载序号，输入无法解析时返回 Some(None)
    async fn prompt_index(&mut self, action: &str) -> Result<Option<Option<usize>>> {
        let text = format!("Enter the download number to {}: ", action);
        Ok(self
            .prompt(&text)
            .await?
            .map(|line| line.trim().parse::<usize>().ok()))
    }

    async fn new_download(&mut self) -> Result<Flow> {
        let Some(url) = self.prompt("Enter the download link: ").await? else {
            return Ok(Flow::Exit);
        };
        let dir_prompt = match &self.default_dir {
            Some(dir) => format!("Enter the save directory [{}]: ", dir.display()),
            None => "Enter the save directory: ".to_string(),
        };
        let Some(dir) = self.prompt(&dir_prompt).await? else {
            return Ok(Flow::Exit);
        };
        let Some(file_name) = self.prompt("Enter the file name: ").await? else {
            return Ok(Flow::Exit);
        };

        let dir = match dir.trim() {
            "" => self.default_dir.clone().unwrap_or_else(|| PathBuf::from(".")),
            d => PathBuf::from(d),
        };
        let file_name = file_name.trim();

        match self.registry.submit(url.trim(), &dir, file_name).await {
            Ok(_) => writeln!(self.out, "Download of '{}' started.", file_name)?,
            Err(e) => {
                warn!("提交下载失败: {}", e);
                writeln!(self.out, "Cannot start download: {}", e)?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn show_downloads(&mut self) -> Result<()> {
        let list = self.registry.list().await;
        if list.is_empty() {
            writeln!(self.out, "No ongoing or paused downloads.")?;
            return Ok(());
        }

        writeln!(self.out, "Ongoing/Paused Downloads:")?;
        for item in list {
            let label = match item.status {
                TaskStatus::Paused => "Paused",
                TaskStatus::Completed => "Completed",
                TaskStatus::Downloading => "Downloading",
            };
            writeln!(self.out, "{}. {} ({})", item.index, item.file_name, label)?;
        }
        Ok(())
    }

    async fn pause(&mut self) -> Result<Flow> {
        self.show_downloads().await?;
        let Some(index) = self.prompt_index("pause").await? else {
            return Ok(Flow::Exit);
        };
        let result = match index {
            Some(index) => self.registry.pause_at(index).await,
            None => Err(invalid_number()),
        };

        match result {
            Ok(name) => writeln!(self.out, "Download paused: {}", name)?,
            Err(DownloadError::InvalidTransition { .. }) => {
                writeln!(self.out, "Cannot pause this download.")?
            }
            Err(e) => self.report(e)?,
        }
        Ok(Flow::Continue)
    }

    async fn resume(&mut self) -> Result<Flow> {
        self.show_downloads().await?;
        let Some(index) = self.prompt_index("resume").await? else {
            return Ok(Flow::Exit);
        };
        let result = match index {
            Some(index) => self.registry.resume_at(index).await,
            None => Err(invalid_number()),
        };

        match result {
            Ok(name) => writeln!(self.out, "Download resumed: {}", name)?,
            Err(DownloadError::InvalidTransition { .. }) => {
                writeln!(self.out, "Cannot resume this download.")?
            }
            Err(e) => self.report(e)?,
        }
        Ok(Flow::Continue)
    }

    async fn cancel(&mut self) -> Result<Flow> {
        self.show_downloads().await?;
        let Some(index) = self.prompt_index("cancel").await? else {
            return Ok(Flow::Exit);
        };
        let result = match index {
            Some(index) => self.registry.cancel_at(index).await,
            None => Err(invalid_number()),
        };

        match result {
            Ok(report) => {
                writeln!(self.out, "Download canceled: {}", report.file_name)?;
                if let Some(e) = report.delete_error {
                    writeln!(self.out, "Could not delete the downloaded file: {}", e)?;
                }
            }
            Err(e) => self.report(e)?,
        }
        Ok(Flow::Continue)
    }

    async fn details(&mut self) -> Result<Flow> {
        self.show_downloads().await?;
        let Some(index) = self.prompt_index("get details").await? else {
            return Ok(Flow::Exit);
        };
        let result = match index {
            Some(index) => self.registry.details_at(index).await,
            None => Err(invalid_number()),
        };

        match result {
            Ok(d) => {
                writeln!(self.out, "Download Details for {}:", d.file_name)?;
                writeln!(self.out, "Paused: {}", d.paused)?;
                writeln!(self.out, "Completed: {}", d.completed)?;
                writeln!(self.out, "URL: {}", d.url)?;
                writeln!(self.out, "Path: {}", d.local_path.display())?;
                writeln!(self.out, "Downloaded: {} bytes", d.downloaded_size)?;
                writeln!(
                    self.out,
                    "Created: {}",
                    d.created_at.format("%Y-%m-%d %H:%M:%S")
                )?;
                if let Some(error) = d.error {
                    writeln!(self.out, "Last error: {}", error)?;
                }
            }
            Err(e) => self.report(e)?,
        }
        Ok(Flow::Continue)
    }

    fn report(&mut self, e: DownloadError) -> Result<()> {
        match e {
            DownloadError::InvalidIndex { .. } => writeln!(self.out, "Invalid download number.")?,
            e => writeln!(self.out, "Error: {}", e)?,
        }
        Ok(())
    }
}

fn invalid_number() -> DownloadError {
    DownloadError::InvalidIndex {
        index: 0,
        len: 0,
    }
}

/// 把下载结束事件打印给用户，事件通道关闭后返回
pub async fn print_events<W: Write>(mut rx: broadcast::Receiver<DownloadEvent>, mut out: W) -> W {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("事件打印落后，丢弃 {} 条事件", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let line = match &event {
            DownloadEvent::Completed { file_name, .. } => {
                format!("Download of '{}' completed.", file_name)
            }
            DownloadEvent::Paused { file_name, .. } => format!("Download of '{}' paused.", file_name),
            DownloadEvent::Failed {
                file_name, error, ..
            } => format!("Download of '{}' failed: {}", file_name, error),
            _ => continue,
        };
        if writeln!(out, "{}", line).and_then(|_| out.flush()).is_err() {
            break;
        }
    }
    out
}
