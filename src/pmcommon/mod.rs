// 导出共享模块
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod logging_setup;
pub mod models;

// 重新导出常用类型，方便使用
pub use api::{PriceApi, PriceSource};
pub use config::{validate_config, MonitorConfig};
pub use db::Database;
pub use error::{AppError, Result};
pub use models::{PricePoint, PriceTicker, SymbolStats};
