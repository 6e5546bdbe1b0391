//! 价格监控系统配置模块

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use crate::pmcommon::{AppError, Result};

/// 系统配置常量
pub mod constants {
    /// 基准均价的默认时间窗口（分钟）
    pub const DEFAULT_BASELINE_WINDOW_MINUTES: u64 = 60;

    /// 统计接口均价的默认时间窗口（小时）
    pub const DEFAULT_REPORT_WINDOW_HOURS: u64 = 100;

    /// 状态通道默认容量，1 最接近无缓冲的同步通道
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 1;

    /// Web服务默认监听地址
    pub const DEFAULT_WEB_BIND_ADDR: &str = "0.0.0.0:8080";
}

use constants::*;

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

/// 价格监控配置
///
/// 前四个字段为必填项，其余分节均有默认值
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// 价格接口前缀，请求地址为 `api_url + symbol`
    pub api_url: String,

    /// 监控的交易对列表
    pub symbols: Vec<String>,

    /// 轮询间隔（秒）
    pub update_interval: i64,

    /// 相邻两次价格变动的告警阈值（绝对值）
    pub alert_threshold: f64,

    /// 状态通道容量（有界通道的缓冲区大小）
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// 数据库配置
    #[serde(default)]
    pub database: DatabaseConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,

    /// HTTP客户端配置
    #[serde(default)]
    pub http: HttpConfig,

    /// Web服务配置
    #[serde(default)]
    pub web: WebConfig,

    /// 分析窗口配置
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 数据库文件路径
    pub database_path: String,

    /// 连接池大小
    pub pool_size: u32,

    /// 连接超时（秒）
    pub connection_timeout_secs: u64,

    /// 是否启用WAL模式
    pub enable_wal: bool,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别 (trace, debug, info, warn, error)
    pub log_level: String,

    /// 日志目录
    pub log_dir: String,

    /// 日志文件名前缀（按天滚动）
    pub log_file: String,

    /// 是否启用控制台输出
    pub enable_console_output: bool,
}

/// HTTP客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,

    /// 连接超时（秒）
    pub connect_timeout_secs: u64,

    /// 可选代理地址，例如 socks5://127.0.0.1:1080
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
}

/// Web服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub bind_addr: String,
}

/// 分析窗口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// 偏离度计算使用的基准均价窗口（分钟）
    pub baseline_window_minutes: u64,

    /// 统计接口使用的均价窗口（小时）
    pub report_window_hours: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_path: "data/price_monitor.db".to_string(),
            pool_size: 8,
            connection_timeout_secs: 30,
            enable_wal: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "logs".to_string(),
            log_file: "price_monitor.log".to_string(),
            enable_console_output: true,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            connect_timeout_secs: 5,
            proxy_url: None,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: DEFAULT_WEB_BIND_ADDR.to_string(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            baseline_window_minutes: DEFAULT_BASELINE_WINDOW_MINUTES,
            report_window_hours: DEFAULT_REPORT_WINDOW_HOURS,
        }
    }
}

/// 校验最基本的启动条件：交易对列表非空且轮询间隔为正数
pub fn validate_config(symbols: &[String], interval: i64) -> bool {
    if symbols.is_empty() {
        return false;
    }
    if interval <= 0 {
        return false;
    }
    true
}

impl MonitorConfig {
    /// 从文件加载配置，`.toml` 按TOML解析，其他扩展名按JSON解析
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::ConfigError(format!("读取配置文件 {} 失败: {}", path.display(), e)))?;

        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);

        if is_toml {
            Self::from_toml_str(&content)
        } else {
            Self::from_json_str(&content)
        }
    }

    /// 从TOML文本解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.normalized()
    }

    /// 从JSON文本解析配置
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.normalized()
    }

    /// 保存配置到TOML文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::ConfigError(format!("序列化配置失败: {}", e)))?;

        std::fs::write(path, content)?;
        Ok(())
    }

    // 去除空白、按出现顺序去重，然后校验
    fn normalized(mut self) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut symbols = Vec::with_capacity(self.symbols.len());
        for raw in &self.symbols {
            let symbol = raw.trim();
            if symbol.is_empty() {
                return Err(AppError::ConfigError("交易对名称不能为空".to_string()));
            }
            if seen.insert(symbol.to_string()) {
                symbols.push(symbol.to_string());
            }
        }
        self.symbols = symbols;
        self.api_url = self.api_url.trim().to_string();

        self.validate()?;
        Ok(self)
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if !validate_config(&self.symbols, self.update_interval) {
            return Err(AppError::ConfigError(format!(
                "交易对列表不能为空且轮询间隔必须为正数 (symbols={}, update_interval={})",
                self.symbols.len(),
                self.update_interval
            )));
        }

        if self.api_url.is_empty() {
            return Err(AppError::ConfigError("api_url 不能为空".to_string()));
        }

        if !self.alert_threshold.is_finite() || self.alert_threshold < 0.0 {
            return Err(AppError::ConfigError(format!(
                "告警阈值必须为非负数: {}",
                self.alert_threshold
            )));
        }

        if self.channel_capacity == 0 {
            return Err(AppError::ConfigError("状态通道容量必须大于0".to_string()));
        }

        if self.database.pool_size == 0 {
            return Err(AppError::ConfigError("数据库连接池大小必须大于0".to_string()));
        }

        if self.analysis.baseline_window_minutes == 0 || self.analysis.report_window_hours == 0 {
            return Err(AppError::ConfigError("均价窗口必须大于0".to_string()));
        }

        if self.analysis.baseline_window_minutes.checked_mul(60).is_none()
            || self.analysis.report_window_hours.checked_mul(3600).is_none()
        {
            return Err(AppError::ConfigError(format!(
                "均价窗口过大 (baseline_window_minutes={}, report_window_hours={})",
                self.analysis.baseline_window_minutes,
                self.analysis.report_window_hours
            )));
        }

        if self.web.enabled {
            self.web.bind_addr.parse::<SocketAddr>()?;
        }

        Ok(())
    }

    /// 轮询间隔
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval.max(1) as u64)
    }

    /// 偏离度计算的基准窗口
    pub fn baseline_window(&self) -> Duration {
        Duration::from_secs(self.analysis.baseline_window_minutes.saturating_mul(60))
    }

    /// 统计接口的均价窗口
    pub fn report_window(&self) -> Duration {
        Duration::from_secs(self.analysis.report_window_hours.saturating_mul(3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_validate_config() {
        let cases = vec![
            ("有效配置", symbols(&["BTCUSDT", "ETHUSDT"]), 5, true),
            ("空交易对列表", symbols(&[]), 5, false),
            ("负数间隔", symbols(&["BTCUSDT"]), -1, false),
            ("零间隔", symbols(&["BTCUSDT"]), 0, false),
        ];

        for (name, list, interval, want) in cases {
            assert_eq!(validate_config(&list, interval), want, "用例失败: {}", name);
        }
    }

    #[test]
    fn test_load_minimal_toml_uses_defaults() {
        let config = MonitorConfig::from_toml_str(r#"
            api_url = "https://api.binance.com/api/v3/ticker/price?symbol="
            symbols = ["BTCUSDT", "ETHUSDT"]
            update_interval = 5
            alert_threshold = 50.0
        "#).unwrap();

        assert_eq!(config.symbols, symbols(&["BTCUSDT", "ETHUSDT"]));
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.baseline_window(), Duration::from_secs(3600));
        assert_eq!(config.report_window(), Duration::from_secs(100 * 3600));
        assert_eq!(config.web.bind_addr, DEFAULT_WEB_BIND_ADDR);
        assert!(config.database.enable_wal);
    }

    #[test]
    fn test_load_json_with_partial_sections() {
        let config = MonitorConfig::from_json_str(r#"{
            "api_url": "http://localhost/price?symbol=",
            "symbols": ["BTCUSDT"],
            "update_interval": 10,
            "alert_threshold": 0,
            "web": { "enabled": false },
            "analysis": { "baseline_window_minutes": 15 }
        }"#).unwrap();

        assert!(!config.web.enabled);
        assert_eq!(config.web.bind_addr, DEFAULT_WEB_BIND_ADDR);
        assert_eq!(config.baseline_window(), Duration::from_secs(15 * 60));
        assert_eq!(config.analysis.report_window_hours, DEFAULT_REPORT_WINDOW_HOURS);
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let result = MonitorConfig::from_json_str(r#"{
            "api_url": "http://localhost/price?symbol=",
            "symbols": ["BTCUSDT"],
            "alert_threshold": 1.0
        }"#);
        assert!(matches!(result, Err(AppError::JsonError(_))));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let base = r#"
            api_url = "http://localhost/price?symbol="
            alert_threshold = 1.0
        "#;

        let empty = MonitorConfig::from_toml_str(&format!("symbols = []\nupdate_interval = 5\n{}", base));
        assert!(matches!(empty, Err(AppError::ConfigError(_))));

        let zero = MonitorConfig::from_toml_str(&format!("symbols = [\"BTCUSDT\"]\nupdate_interval = 0\n{}", base));
        assert!(matches!(zero, Err(AppError::ConfigError(_))));

        let blank = MonitorConfig::from_toml_str(&format!("symbols = [\" \"]\nupdate_interval = 5\n{}", base));
        assert!(matches!(blank, Err(AppError::ConfigError(_))));

        let negative_threshold = MonitorConfig::from_toml_str(r#"
            api_url = "http://localhost/price?symbol="
            symbols = ["BTCUSDT"]
            update_interval = 5
            alert_threshold = -3.0
        "#);
        assert!(matches!(negative_threshold, Err(AppError::ConfigError(_))));

        let bad_bind = MonitorConfig::from_toml_str(r#"
            api_url = "http://localhost/price?symbol="
            symbols = ["BTCUSDT"]
            update_interval = 5
            alert_threshold = 1.0

            [web]
            bind_addr = "not-an-address"
        "#);
        assert!(matches!(bad_bind, Err(AppError::AddrParseError(_))));
    }

    #[test]
    fn test_oversized_windows_are_rejected() {
        let base = r#"
            api_url = "http://localhost/price?symbol="
            symbols = ["BTCUSDT"]
            update_interval = 5
            alert_threshold = 1.0
        "#;

        let baseline = MonitorConfig::from_toml_str(&format!(
            "{}\n[analysis]\nbaseline_window_minutes = 400000000000000000\n", base
        ));
        assert!(matches!(baseline, Err(AppError::ConfigError(_))), "超大基准窗口应被拒绝");

        let report = MonitorConfig::from_toml_str(&format!(
            "{}\n[analysis]\nreport_window_hours = 9000000000000000\n", base
        ));
        assert!(matches!(report, Err(AppError::ConfigError(_))), "超大统计窗口应被拒绝");

        // 直接构造的配置绕过校验时，窗口计算也不会溢出
        let mut config = MonitorConfig::from_toml_str(base).unwrap();
        config.analysis.baseline_window_minutes = u64::MAX;
        assert_eq!(config.baseline_window(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_duplicate_symbols_are_collapsed() {
        let config = MonitorConfig::from_toml_str(r#"
            api_url = "http://localhost/price?symbol="
            symbols = ["BTCUSDT", " ETHUSDT ", "BTCUSDT"]
            update_interval = 5
            alert_threshold = 1.0
        "#).unwrap();

        assert_eq!(config.symbols, symbols(&["BTCUSDT", "ETHUSDT"]));
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.toml");

        let config = MonitorConfig::from_toml_str(r#"
            api_url = "http://localhost/price?symbol="
            symbols = ["BTCUSDT"]
            update_interval = 7
            alert_threshold = 2.5
        "#).unwrap();
        config.save_to_file(&path).unwrap();

        let reloaded = MonitorConfig::from_file(&path).unwrap();
        assert_eq!(reloaded.update_interval, 7);
        assert_eq!(reloaded.alert_threshold, 2.5);
        assert_eq!(reloaded.database.database_path, config.database.database_path);
    }
}
