use thiserror::Error;
use std::net::AddrParseError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    #[error("Address parse error: {0}")]
    AddrParseError(#[from] AddrParseError),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Web server error: {0}")]
    WebServerError(String),
}

impl AppError {
    /// 获取错误类型的简洁摘要，用于日志中的错误分类
    ///
    /// 返回一个稳定的错误类别字符串，便于按类别聚合日志
    pub fn get_error_type_summary(&self) -> &'static str {
        match self {
            // 行情获取相关
            AppError::ApiError(_) => "price_source_rejected_request",
            AppError::HttpError(_) => "price_source_connection_failed",

            // 行情解析相关
            AppError::JsonError(_) => "price_payload_parsing_failed",
            AppError::ParseError(_) => "price_value_invalid",

            // 存储相关
            AppError::DatabaseError(_) => "price_history_persistence_failed",
            AppError::SqliteError(_) => "price_history_storage_operation_failed",

            // 配置相关
            AppError::TomlError(_) | AppError::ConfigError(_) => "monitor_configuration_invalid",
            AppError::AddrParseError(_) => "web_bind_address_invalid",

            // 系统资源相关
            AppError::IoError(_) => "monitor_file_operation_failed",
            AppError::ChannelError(_) => "status_pipeline_failed",
            AppError::WebServerError(_) => "stats_api_server_failed",
        }
    }

    /// 检查错误是否为可重试类型
    ///
    /// Worker 对所有瞬时错误都会在下一个周期重试，这里只用于日志标注
    pub fn is_retryable(&self) -> bool {
        match self {
            // 网络相关错误通常可重试
            AppError::HttpError(_) |
            AppError::ApiError(_) => true,

            // 数据源偶尔返回残缺数据，下一次请求通常正常
            AppError::JsonError(_) |
            AppError::ParseError(_) => true,

            // 数据库锁争用等可重试
            AppError::DatabaseError(msg) => {
                msg.contains("locked") || msg.contains("busy") || msg.contains("timeout")
            },
            AppError::SqliteError(_) => true,

            AppError::IoError(_) => true,

            // 配置错误、通道关闭等不可重试
            AppError::TomlError(_) |
            AppError::ConfigError(_) |
            AppError::AddrParseError(_) |
            AppError::ChannelError(_) |
            AppError::WebServerError(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
