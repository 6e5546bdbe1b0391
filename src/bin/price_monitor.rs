//! 价格监控服务启动文件
//!
//! 为每个配置的交易对启动一个轮询 Worker，状态行经由单一聚合器输出，
//! 可选启动统计Web服务。收到 Ctrl+C 或 SIGTERM 后按以下顺序关闭：
//! Worker 全部退出 → 状态通道排空 → Web服务停止。

use anyhow::{Context, Result};
use clap::Parser;
use price_monitor::monitor::{run_web_server, AppState, Monitor, ShutdownReport};
use price_monitor::pmcommon::{
    logging_setup::init_logging, Database, MonitorConfig, PriceApi, PriceSource,
};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

const DEFAULT_CONFIG_PATH: &str = "config/PriceMonitorConfig.toml";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Concurrent market price monitor with rolling-average alerts.", long_about = None)]
struct Args {
    /// Path to the config file (.toml, otherwise parsed as JSON)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Override the SQLite database path from the config file
    #[arg(long)]
    db_path: Option<String>,

    /// Override the log level from the config file (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Do not start the stats web server
    #[arg(long)]
    no_web: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // 日志系统依赖配置，这之前的错误只能打印到 stderr
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ 配置加载失败: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let _guard = match init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("❌ 日志系统初始化失败: {}", e);
            return ExitCode::FAILURE;
        }
    };

    std::panic::set_hook(Box::new(|panic_info| {
        error!(target: "应用生命周期", panic_info = %panic_info, "程序发生未捕获的Panic");
    }));

    match run_app(config).await {
        Ok(report) => {
            info!(
                target: "应用生命周期",
                workers_stopped = report.workers_stopped,
                workers_cancelled = report.workers_cancelled,
                messages_drained = report.messages_drained,
                "应用程序正常关闭"
            );
            println!("程序已优雅退出，所有数据均已保存。");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(target: "应用生命周期", error = ?e, "应用因顶层错误而异常退出");
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<MonitorConfig> {
    let mut config = MonitorConfig::from_file(&args.config)
        .with_context(|| format!("无法加载配置文件 {}", args.config))?;

    if let Some(db_path) = &args.db_path {
        config.database.database_path = db_path.clone();
    }
    if let Some(log_level) = &args.log_level {
        config.logging.log_level = log_level.clone();
    }
    if args.no_web {
        config.web.enabled = false;
    }

    config.validate()?;
    Ok(config)
}

#[instrument(target = "应用生命周期", skip_all, name = "run_app")]
async fn run_app(config: MonitorConfig) -> Result<ShutdownReport> {
    info!(target: "应用生命周期", symbols = ?config.symbols, "价格监控服务启动中...");
    let config = Arc::new(config);

    // 1. 初始化资源
    info!(target: "启动流程", "正在初始化数据库连接...");
    let db = Arc::new(
        Database::new_with_config(&config.database)
            .with_context(|| format!("无法打开数据库 {}", config.database.database_path))?,
    );
    info!(target: "启动流程", "数据库连接初始化完成");

    let source: Arc<dyn PriceSource> = Arc::new(PriceApi::with_config(config.api_url.as_str(), &config.http)?);
    let monitor = Monitor::new(Arc::clone(&config), Arc::clone(&db), source)?;

    // 2. 统计Web服务（可选）
    let (web_shutdown_tx, web_shutdown_rx) = watch::channel(false);
    let web_handle = if config.web.enabled {
        let state = AppState {
            db: Arc::clone(&db),
            report_window: config.report_window(),
        };
        let bind_addr = config.web.bind_addr.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = run_web_server(&bind_addr, state, web_shutdown_rx).await {
                error!(
                    target: "应用生命周期",
                    message = "Web服务器退出，价格监控继续运行",
                    error.summary = e.get_error_type_summary(),
                    error.details = %e
                );
            }
        }))
    } else {
        info!(target: "启动流程", "Web服务器已禁用");
        None
    };

    // 3. 运行监控直到收到关闭信号
    info!(target: "应用生命周期", "所有服务已启动，等待关闭信号 (Ctrl+C)...");
    let report = monitor.run_until(wait_for_shutdown_signal()).await?;

    let _ = web_shutdown_tx.send(true);
    if let Some(handle) = web_handle {
        if let Err(e) = handle.await {
            warn!(target: "应用生命周期", error = %e, "等待Web服务器退出失败");
        }
    }

    Ok(report)
}

/// 等待 Ctrl+C 或 SIGTERM
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(target: "应用生命周期", error = %e, "安装Ctrl+C处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(target: "应用生命周期", error = %e, "安装SIGTERM处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!(target: "应用生命周期", "接收到Ctrl+C，开始优雅关闭...");
        },
        _ = terminate => {
            info!(target: "应用生命周期", "接收到SIGTERM，开始优雅关闭...");
        },
    }
}
