use crate::monitor::analysis::StatusEvent;
use chrono::Local;
use std::io::Write;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// 状态聚合器
///
/// 唯一的消费者，按到达顺序把所有 Worker 的状态行写到显示端，
/// 不排序、不去重。所有发送端释放且通道排空后结束。
pub struct StatusAggregator<W: Write + Send> {
    status_rx: mpsc::Receiver<StatusEvent>,
    sink: W,
}

impl<W: Write + Send> StatusAggregator<W> {
    pub fn new(status_rx: mpsc::Receiver<StatusEvent>, sink: W) -> Self {
        Self { status_rx, sink }
    }

    /// 排空通道直到关闭，返回处理的消息数
    pub async fn drain(&mut self) -> usize {
        let mut drained = 0usize;

        while let Some(event) = self.status_rx.recv().await {
            drained += 1;

            let line = format!("[{}] {}", Local::now().format("%H:%M:%S"), event.message);
            if let Err(e) = writeln!(self.sink, "{}", line).and_then(|_| self.sink.flush()) {
                warn!(target: "aggregator", error = %e, "写入显示端失败");
            }

            info!(
                target: "aggregator",
                symbol = %event.symbol,
                price = event.price,
                volatility_alert = event.volatility_alert,
                "{}", event.message
            );
        }

        info!(target: "aggregator", log_type = "module", drained, "状态通道已关闭，聚合器退出");
        drained
    }

    pub fn into_sink(self) -> W {
        self.sink
    }
}
