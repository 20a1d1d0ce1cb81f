use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use aqueue_core::{QueueSweeper, TaskScheduler};
use aqueue_domain::QueueStore;
use aqueue_infrastructure::{AppConfig, SqliteQueueStore};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("aqueue")
        .version(env!("CARGO_PKG_VERSION"))
        .about("批量股票分析任务队列与调度器")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let config = AppConfig::load(config_path).context("加载配置失败")?;

    let log_level = matches
        .get_one::<String>("log-level")
        .unwrap_or(&config.observability.log_level)
        .clone();
    let log_format = matches
        .get_one::<String>("log-format")
        .unwrap_or(&config.observability.log_format)
        .clone();
    init_logging(&log_level, &log_format)?;

    info!("启动分析任务队列服务");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    let store: Option<Arc<dyn QueueStore>> = if config.database.enabled {
        info!("启用SQLite持久化镜像: {}", config.database.url);
        let store =
            SqliteQueueStore::new_embedded(&config.database.url, config.database.max_connections)
                .await
                .context("初始化SQLite存储失败")?;
        Some(Arc::new(store))
    } else {
        info!("未启用持久化，调度器以纯内存模式运行");
        None
    };

    let scheduler = TaskScheduler::new(config.queue.clone(), store).context("创建调度器失败")?;

    let sweeper = Arc::new(QueueSweeper::new(Arc::clone(&scheduler), None));
    let sweeper_handle = {
        let sweeper = Arc::clone(&sweeper);
        tokio::spawn(async move {
            sweeper.start().await;
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");

    sweeper.stop().await;
    if tokio::time::timeout(std::time::Duration::from_secs(30), sweeper_handle)
        .await
        .is_err()
    {
        warn!("扫描循环关闭超时，强制退出");
    }

    info!("分析任务队列服务已退出");
    Ok(())
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
