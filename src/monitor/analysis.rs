//! 价格分析函数
//!
//! 纯函数，不涉及 I/O：价格格式化、偏离度计算与分类、相邻价格变动判断。

use chrono::{DateTime, Utc};
use std::fmt;

/// 偏离度分类阈值（百分比），上下界均包含
pub const ROCKET_THRESHOLD_PERCENT: f64 = 5.0;
pub const CRASH_THRESHOLD_PERCENT: f64 = -5.0;

/// 按价格量级格式化：小于1的价格保留8位小数，否则保留2位
pub fn format_display_price(price: f64) -> String {
    if price < 1.0 {
        format!("{:.8}", price)
    } else {
        format!("{:.2}", price)
    }
}

/// 当前价格相对均价的百分比偏离，保留两位小数
///
/// 均价为0时返回0，不会出现除零
pub fn percentage_diff(current: f64, average: f64) -> f64 {
    if average == 0.0 {
        return 0.0;
    }
    let diff = (current - average) / average * 100.0;
    (diff * 100.0).round() / 100.0
}

/// 偏离度分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceStatus {
    Rocket,
    Crash,
    Stable,
}

impl fmt::Display for PriceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PriceStatus::Rocket => "ROCKET",
            PriceStatus::Crash => "CRASH",
            PriceStatus::Stable => "STABLE",
        };
        f.write_str(label)
    }
}

pub fn classify(percent: f64) -> PriceStatus {
    if percent >= ROCKET_THRESHOLD_PERCENT {
        PriceStatus::Rocket
    } else if percent <= CRASH_THRESHOLD_PERCENT {
        PriceStatus::Crash
    } else {
        PriceStatus::Stable
    }
}

/// 相对基准均价的偏离
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deviation {
    pub average: f64,
    pub percent: f64,
    pub status: PriceStatus,
}

impl Deviation {
    /// 均价不存在或为0时没有偏离度可言
    pub fn from_average(current: f64, average: Option<f64>) -> Option<Self> {
        let average = average.filter(|avg| *avg != 0.0)?;
        let percent = percentage_diff(current, average);
        Some(Self {
            average,
            percent,
            status: classify(percent),
        })
    }
}

/// 与本会话上一次观测价格相比的变动
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Movement {
    /// 本会话的第一次观测
    Initial,
    Up(f64),
    Down(f64),
    Unchanged,
}

impl Movement {
    pub fn between(last_price: Option<f64>, current: f64) -> Self {
        match last_price {
            None => Movement::Initial,
            Some(last) => {
                let delta = current - last;
                if delta > 0.0 {
                    Movement::Up(delta)
                } else if delta < 0.0 {
                    Movement::Down(-delta)
                } else {
                    Movement::Unchanged
                }
            }
        }
    }

    /// 带符号的变动值，首次观测时为 `None`
    pub fn delta(&self) -> Option<f64> {
        match *self {
            Movement::Initial => None,
            Movement::Up(d) => Some(d),
            Movement::Down(d) => Some(-d),
            Movement::Unchanged => Some(0.0),
        }
    }
}

impl fmt::Display for Movement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Movement::Initial => f.write_str("INITIAL"),
            Movement::Up(d) => write!(f, "UP (+${:.2})", d),
            Movement::Down(d) => write!(f, "DOWN (-${:.2})", d),
            Movement::Unchanged => f.write_str("STABLE"),
        }
    }
}

/// 变动绝对值达到阈值即告警，首次观测不告警
pub fn is_volatile(movement: &Movement, alert_threshold: f64) -> bool {
    movement
        .delta()
        .map(|delta| delta.abs() >= alert_threshold)
        .unwrap_or(false)
}

/// Worker 发往聚合器的一条状态事件
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub symbol: String,
    pub price: f64,
    pub observed_at: DateTime<Utc>,
    pub movement: Movement,
    pub deviation: Option<Deviation>,
    pub volatility_alert: bool,
    pub message: String,
}

impl StatusEvent {
    pub fn new(
        symbol: impl Into<String>,
        price: f64,
        observed_at: DateTime<Utc>,
        movement: Movement,
        deviation: Option<Deviation>,
        volatility_alert: bool,
    ) -> Self {
        let symbol = symbol.into();
        let message = format_status_line(&symbol, price, &movement, deviation.as_ref(), volatility_alert);
        Self {
            symbol,
            price,
            observed_at,
            movement,
            deviation,
            volatility_alert,
            message,
        }
    }
}

/// 格式化一行状态文本，例如
/// `BTCUSDT   | $    65000.50 | UP (+$120.00) | ROCKET +5.12% vs avg 61830.20`
pub fn format_status_line(
    symbol: &str,
    price: f64,
    movement: &Movement,
    deviation: Option<&Deviation>,
    volatility_alert: bool,
) -> String {
    let mut line = format!("{:<9} | ${:>12} | {}", symbol, format_display_price(price), movement);

    match deviation {
        Some(d) => line.push_str(&format!(
            " | {} {:+.2}% vs avg {}",
            d.status,
            d.percent,
            format_display_price(d.average)
        )),
        None => line.push_str(" | NO BASELINE"),
    }

    if volatility_alert {
        line.push_str(" | ⚠ VOLATILE");
    }

    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_display_price() {
        let cases = [
            (65000.50, "65000.50"),
            (0.00001234, "0.00001234"),
            (1.0, "1.00"),
            (0.5, "0.50000000"),
        ];
        for (price, want) in cases {
            assert_eq!(format_display_price(price), want, "价格格式化错误: {}", price);
        }
    }

    #[test]
    fn test_percentage_diff() {
        let cases = [
            ("上涨10%", 110.0, 100.0, 10.0),
            ("下跌10%", 90.0, 100.0, -10.0),
            ("无变化", 100.0, 100.0, 0.0),
            ("均价为零", 150.0, 0.0, 0.0),
            ("小幅变动", 100.05, 100.0, 0.05),
        ];
        for (name, current, average, want) in cases {
            let got = percentage_diff(current, average);
            assert!((got - want).abs() < 1e-9, "{}: 期望 {}, 实际 {}", name, want, got);
        }
    }

    #[test]
    fn test_classify() {
        let cases = [
            (7.5, PriceStatus::Rocket),
            (2.1, PriceStatus::Stable),
            (-10.2, PriceStatus::Crash),
            (-1.5, PriceStatus::Stable),
            (5.0, PriceStatus::Rocket),
            (-5.0, PriceStatus::Crash),
        ];
        for (percent, want) in cases {
            assert_eq!(classify(percent), want, "分类错误: {}", percent);
        }
        assert_eq!(PriceStatus::Rocket.to_string(), "ROCKET");
    }

    #[test]
    fn test_deviation_requires_average() {
        assert!(Deviation::from_average(100.0, None).is_none());
        assert!(Deviation::from_average(0.0, Some(0.0)).is_none());
        assert!(Deviation::from_average(5.0, Some(0.0)).is_none());

        let d = Deviation::from_average(110.0, Some(100.0)).unwrap();
        assert_eq!(d.percent, 10.0);
        assert_eq!(d.status, PriceStatus::Rocket);
    }

    #[test]
    fn test_movement_and_volatility() {
        assert_eq!(Movement::between(None, 100.0), Movement::Initial);
        assert_eq!(Movement::between(Some(100.0), 160.0), Movement::Up(60.0));
        assert_eq!(Movement::between(Some(100.0), 40.0), Movement::Down(60.0));
        assert_eq!(Movement::between(Some(100.0), 100.0), Movement::Unchanged);

        assert_eq!(Movement::Up(60.0).to_string(), "UP (+$60.00)");
        assert_eq!(Movement::Down(1.5).to_string(), "DOWN (-$1.50)");

        assert!(!is_volatile(&Movement::Initial, 0.0));
        assert!(is_volatile(&Movement::Up(50.0), 50.0));
        assert!(is_volatile(&Movement::Down(60.0), 50.0));
        assert!(!is_volatile(&Movement::Up(49.99), 50.0));
        assert!(is_volatile(&Movement::Unchanged, 0.0));
    }

    #[test]
    fn test_status_line_contents() {
        let now = Utc::now();
        let deviation = Deviation::from_average(65000.5, Some(60000.0));
        let event = StatusEvent::new("BTCUSDT", 65000.5, now, Movement::Up(120.0), deviation, true);

        assert!(event.message.starts_with("BTCUSDT   | $    65000.50 | UP (+$120.00)"));
        assert!(event.message.contains("ROCKET +8.33%"));
        assert!(event.message.ends_with("VOLATILE"));

        let first = StatusEvent::new("ETHUSDT", 0.5, now, Movement::Initial, None, false);
        assert!(first.message.contains("INITIAL"));
        assert!(first.message.contains("NO BASELINE"));
    }
}
