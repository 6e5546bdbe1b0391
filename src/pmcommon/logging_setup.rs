//! 统一日志系统初始化模块
//!
//! 文件日志按天滚动写入 `log_dir`，控制台输出可通过配置关闭。
//! 返回的 guard 必须由 main 函数持有，否则缓冲中的日志会丢失。

use crate::pmcommon::config::LoggingConfig;
use crate::pmcommon::{AppError, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// 构造业务日志过滤器字符串，压低第三方库的噪音
pub fn business_filter(log_level: &str) -> String {
    format!("{},hyper=warn,reqwest=warn,rusqlite=warn,r2d2=warn", log_level)
}

/// 初始化日志系统
///
/// `RUST_LOG` 存在时优先于配置文件中的日志级别
pub fn init_logging(config: &LoggingConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.log_dir)
        .map_err(|e| AppError::ConfigError(format!("无法创建日志目录 {}: {}", config.log_dir, e)))?;

    let filter_str = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| business_filter(&config.log_level));

    // 校验一次过滤器，配置写错时启动即失败
    EnvFilter::try_new(&filter_str)
        .map_err(|e| AppError::ConfigError(format!("无效的日志过滤器 '{}': {}", filter_str, e)))?;

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, &config.log_file);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .with_filter(EnvFilter::new(&filter_str));

    // Option<Layer> 为 None 时是无操作的
    let console_layer = if config.enable_console_output {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .with_filter(EnvFilter::new(&filter_str)),
        )
    } else {
        None
    };

    Registry::default()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| AppError::ConfigError(format!("日志系统初始化失败: {}", e)))?;

    tracing::info!(
        log_type = "low_freq",
        event_type = "logging_config_loaded",
        log_level = %config.log_level,
        log_dir = %config.log_dir,
        console = config.enable_console_output,
        "📋 日志配置已加载并应用"
    );

    Ok(guard)
}
