//! 单交易对价格轮询 Worker
//!
//! 每个交易对一个 Worker，循环执行 拉取 → 解析 → 持久化 → 分析 → 上报 → 休眠，
//! 直到收到关闭信号或聚合器一侧的通道被关闭。

use crate::monitor::analysis::{is_volatile, Deviation, Movement, StatusEvent};
use crate::pmcommon::{AppError, Database, MonitorConfig, PricePoint, PriceSource, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task;
use tracing::{debug, info, instrument, warn};

/// Worker 运行所需的全部依赖，由编排器显式注入
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<Database>,
    pub source: Arc<dyn PriceSource>,
    pub status_tx: mpsc::Sender<StatusEvent>,
    pub shutdown_rx: watch::Receiver<bool>,
    pub config: Arc<MonitorConfig>,
}

/// 单次迭代的阶段，用于定位失败发生在哪一步
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Parse,
    Persist,
    Analyze,
    Report,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Parse => "parse",
            Stage::Persist => "persist",
            Stage::Analyze => "analyze",
            Stage::Report => "report",
        };
        f.write_str(name)
    }
}

/// 重试策略：决定每次迭代结束后休眠多久
pub trait RetryPolicy: Send + Sync {
    fn delay_after_success(&self) -> Duration;
    fn delay_after_failure(&self, stage: Stage, error: &AppError) -> Duration;
}

/// 固定间隔：成功与失败都等待同样的轮询间隔，无退避、无次数上限
#[derive(Debug, Clone, Copy)]
pub struct FixedInterval {
    interval: Duration,
}

impl FixedInterval {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl RetryPolicy for FixedInterval {
    fn delay_after_success(&self) -> Duration {
        self.interval
    }

    fn delay_after_failure(&self, _stage: Stage, _error: &AppError) -> Duration {
        self.interval
    }
}

/// Worker 的终止状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// 收到关闭信号
    Cancelled,
    /// 状态通道的接收端已不存在
    Disconnected,
}

/// 一次迭代的结果
#[derive(Debug)]
pub enum IterationOutcome {
    Reported(StatusEvent),
    Failed { stage: Stage, error: AppError },
    Disconnected,
}

pub struct PriceWorker {
    symbol: String,
    ctx: WorkerContext,
    retry: Box<dyn RetryPolicy>,
    last_price: Option<f64>,
}

impl PriceWorker {
    pub fn new(symbol: impl Into<String>, ctx: WorkerContext) -> Self {
        let retry = Box::new(FixedInterval::new(ctx.config.poll_interval()));
        Self {
            symbol: symbol.into(),
            ctx,
            retry,
            last_price: None,
        }
    }

    /// 替换默认的固定间隔重试策略
    pub fn with_retry_policy(mut self, retry: impl RetryPolicy + 'static) -> Self {
        self.retry = Box::new(retry);
        self
    }

    /// 主循环，直到被取消或断开
    #[instrument(target = "worker", skip(self), fields(symbol = %self.symbol))]
    pub async fn run(mut self) -> WorkerExit {
        info!(target: "worker", log_type = "module", "🚀 价格Worker启动");

        loop {
            let stopping = *self.ctx.shutdown_rx.borrow();
            if stopping {
                info!(target: "worker", log_type = "module", "收到关闭信号，Worker退出");
                return WorkerExit::Cancelled;
            }

            let delay = match self.run_iteration().await {
                IterationOutcome::Reported(event) => {
                    debug!(target: "worker", price = event.price, "本轮状态已上报");
                    self.retry.delay_after_success()
                }
                IterationOutcome::Failed { stage, error } => {
                    warn!(
                        target: "worker",
                        stage = %stage,
                        error.summary = error.get_error_type_summary(),
                        error.details = %error,
                        retryable = error.is_retryable(),
                        "本轮迭代失败，等待下次轮询"
                    );
                    self.retry.delay_after_failure(stage, &error)
                }
                IterationOutcome::Disconnected => {
                    warn!(target: "worker", stage = %Stage::Report, "状态通道已关闭，Worker退出");
                    return WorkerExit::Disconnected;
                }
            };

            if self.sleep_or_cancelled(delay).await {
                info!(target: "worker", log_type = "module", "休眠期间收到关闭信号，Worker退出");
                return WorkerExit::Cancelled;
            }
        }
    }

    /// 执行一次完整的迭代
    pub async fn run_iteration(&mut self) -> IterationOutcome {
        let ticker = match self.ctx.source.fetch_price(&self.symbol).await {
            Ok(ticker) => ticker,
            Err(error) => return IterationOutcome::Failed { stage: Stage::Fetch, error },
        };

        let price = match ticker.parse_price() {
            Ok(price) => price,
            Err(error) => return IterationOutcome::Failed { stage: Stage::Parse, error },
        };

        let point = PricePoint::new(self.symbol.as_str(), price, Utc::now());

        // 写入失败不影响本轮的内存分析
        if let Err(e) = self.ctx.store.insert_price(&point).await {
            warn!(
                target: "worker",
                stage = %Stage::Persist,
                error.summary = e.get_error_type_summary(),
                error.details = %e,
                "价格写入失败，继续分析"
            );
        }

        let movement = Movement::between(self.last_price, price);
        let volatility_alert = is_volatile(&movement, self.ctx.config.alert_threshold);
        if volatility_alert {
            warn!(
                target: "worker",
                price = price,
                last_price = ?self.last_price,
                delta = ?movement.delta(),
                threshold = self.ctx.config.alert_threshold,
                "⚠️ 价格剧烈波动"
            );
        }

        let average = match self.baseline_average(point.observed_at).await {
            Ok(average) => average,
            Err(e) => {
                warn!(
                    target: "worker",
                    stage = %Stage::Analyze,
                    error.summary = e.get_error_type_summary(),
                    error.details = %e,
                    "查询基准均价失败，跳过偏离度计算"
                );
                None
            }
        };
        let deviation = Deviation::from_average(price, average);

        let event = StatusEvent::new(
            self.symbol.as_str(),
            price,
            point.observed_at,
            movement,
            deviation,
            volatility_alert,
        );

        // 通道满时在此等待聚合器，这是唯一的背压点
        if self.ctx.status_tx.send(event.clone()).await.is_err() {
            return IterationOutcome::Disconnected;
        }

        self.last_price = Some(price);
        IterationOutcome::Reported(event)
    }

    // SQLite 查询是阻塞调用，放到阻塞线程池执行
    async fn baseline_average(&self, now: DateTime<Utc>) -> Result<Option<f64>> {
        let store = Arc::clone(&self.ctx.store);
        let symbol = self.symbol.clone();
        let window = self.ctx.config.baseline_window();

        task::spawn_blocking(move || store.windowed_average_at(&symbol, window, now))
            .await
            .map_err(|e| AppError::DatabaseError(format!("均价查询任务 panic: {:?}", e)))?
    }

    // 返回 true 表示休眠被关闭信号打断
    async fn sleep_or_cancelled(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            changed = self.ctx.shutdown_rx.changed() => {
                changed.is_err() || *self.ctx.shutdown_rx.borrow()
            }
        }
    }
}
