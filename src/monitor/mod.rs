// 价格监控核心模块
pub mod aggregator;
pub mod analysis;
pub mod orchestrator;
pub mod web_server;
pub mod worker;

pub use aggregator::StatusAggregator;
pub use analysis::{classify, format_display_price, percentage_diff, Deviation, Movement, PriceStatus, StatusEvent};
pub use orchestrator::{Monitor, ShutdownReport};
pub use web_server::{build_router, run_web_server, AppState};
pub use worker::{FixedInterval, PriceWorker, RetryPolicy, Stage, WorkerContext, WorkerExit};
