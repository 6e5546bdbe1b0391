// 导出模块
pub mod pmcommon;
pub mod monitor;

// Re-export error types
pub use pmcommon::error::AppError;
