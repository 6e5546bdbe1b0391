//! 监控编排器
//!
//! 为每个交易对启动一个 Worker 并启动唯一的聚合器。关闭流程：
//! 1. 广播关闭信号
//! 2. 等待所有 Worker 的 JoinHandle
//! 3. 最后一个发送端随 Worker 释放，通道关闭，聚合器排空后退出

use crate::monitor::aggregator::StatusAggregator;
use crate::monitor::worker::{PriceWorker, WorkerContext, WorkerExit};
use crate::pmcommon::{AppError, Database, MonitorConfig, PriceSource, Result};
use futures::future::join_all;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, instrument};

/// 关闭流程结束后的汇总
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// 已被 join 的 Worker 数量
    pub workers_stopped: usize,
    /// 其中因关闭信号退出的数量
    pub workers_cancelled: usize,
    /// 聚合器处理的状态消息总数
    pub messages_drained: usize,
}

pub struct Monitor {
    config: Arc<MonitorConfig>,
    store: Arc<Database>,
    source: Arc<dyn PriceSource>,
}

impl Monitor {
    /// 配置在此再校验一次，未通过时不会启动任何 Worker
    pub fn new(config: Arc<MonitorConfig>, store: Arc<Database>, source: Arc<dyn PriceSource>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, store, source })
    }

    /// 运行直到 `shutdown` 完成，状态行输出到标准输出
    pub async fn run_until<F>(&self, shutdown: F) -> Result<ShutdownReport>
    where
        F: Future<Output = ()>,
    {
        let (report, _stdout) = self.run_with_sink(shutdown, std::io::stdout()).await?;
        Ok(report)
    }

    /// 运行直到 `shutdown` 完成，状态行写入给定的显示端，结束后归还显示端
    ///
    /// 显示端在异步任务里同步写入，不能长时间阻塞：聚合器停顿会通过有界通道
    /// 直接卡住所有 Worker 的上报
    #[instrument(target = "orchestrator", skip_all, fields(workers = self.config.symbols.len()))]
    pub async fn run_with_sink<F, W>(&self, shutdown: F, sink: W) -> Result<(ShutdownReport, W)>
    where
        F: Future<Output = ()>,
        W: Write + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (status_tx, status_rx) = mpsc::channel(self.config.channel_capacity);

        let aggregator_handle = tokio::spawn(async move {
            let mut aggregator = StatusAggregator::new(status_rx, sink);
            let drained = aggregator.drain().await;
            (drained, aggregator.into_sink())
        });

        let mut symbols = Vec::with_capacity(self.config.symbols.len());
        let mut worker_handles = Vec::with_capacity(self.config.symbols.len());
        for symbol in &self.config.symbols {
            let ctx = WorkerContext {
                store: Arc::clone(&self.store),
                source: Arc::clone(&self.source),
                status_tx: status_tx.clone(),
                shutdown_rx: shutdown_rx.clone(),
                config: Arc::clone(&self.config),
            };
            worker_handles.push(tokio::spawn(PriceWorker::new(symbol.as_str(), ctx).run()));
            symbols.push(symbol.clone());
        }

        // 每个 Worker 各持有一个发送端，编排器自己的必须立即释放
        drop(status_tx);

        info!(
            target: "orchestrator",
            log_type = "module",
            workers = worker_handles.len(),
            channel_capacity = self.config.channel_capacity,
            "✅ 所有价格Worker已启动，等待关闭信号"
        );

        shutdown.await;

        info!(target: "orchestrator", log_type = "module", "收到关闭信号，通知所有Worker退出...");
        let _ = shutdown_tx.send(true);

        let mut report = ShutdownReport::default();
        for (symbol, joined) in symbols.iter().zip(join_all(worker_handles).await) {
            match joined {
                Ok(exit) => {
                    report.workers_stopped += 1;
                    if exit == WorkerExit::Cancelled {
                        report.workers_cancelled += 1;
                    }
                    info!(target: "orchestrator", symbol = %symbol, exit = ?exit, "Worker已退出");
                }
                Err(e) => {
                    error!(target: "orchestrator", symbol = %symbol, error = %e, "Worker任务异常终止");
                }
            }
        }
        drop(shutdown_rx);

        let (messages_drained, sink) = aggregator_handle
            .await
            .map_err(|e| AppError::ChannelError(format!("聚合器任务异常终止: {}", e)))?;
        report.messages_drained = messages_drained;

        info!(
            target: "orchestrator",
            log_type = "module",
            workers_stopped = report.workers_stopped,
            workers_cancelled = report.workers_cancelled,
            messages_drained = report.messages_drained,
            "所有Worker已停止，状态通道已排空"
        );

        Ok((report, sink))
    }
}
