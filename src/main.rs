use anyhow::Context;
use dlman::{
    cli::{self, Cli},
    config::CONFIG_PATH,
    logging, AppConfig, DownloadRegistry, HttpTransport,
};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 可选参数：配置文件路径
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| CONFIG_PATH.to_string());

    let (config, load_error) = AppConfig::load_or_default(&config_path).await;

    // 初始化日志系统（必须保持 _log_guard 存活）
    let _log_guard = logging::init_logging(&config.log);

    info!("dlman v{} 启动中...", env!("CARGO_PKG_VERSION"));
    match load_error {
        Some(e) => warn!("配置文件加载失败，使用默认配置: {:#}", e),
        None => info!("配置文件加载成功: {}", config_path),
    }

    let transport = HttpTransport::new(&config.download).context("创建 HTTP 客户端失败")?;
    let registry = DownloadRegistry::new(&config.download, Arc::new(transport));
    info!(
        "下载器初始化完成，最大并发下载数: {}",
        registry.max_concurrency()
    );

    let printer = tokio::spawn(cli::print_events(registry.subscribe(), std::io::stdout()));

    let mut cli = Cli::new(
        registry,
        BufReader::new(tokio::io::stdin()),
        std::io::stdout(),
        config.download.default_dir.clone(),
    );
    cli.run().await?;

    printer.abort();
    info!("dlman 已退出");
    Ok(())
}
