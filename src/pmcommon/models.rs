use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use crate::pmcommon::error::{AppError, Result};

/// One observed price for a symbol
///
/// Created by a worker after a successful fetch, persisted append-only and never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub symbol: String,
    pub price: f64,
    pub observed_at: DateTime<Utc>,
}

impl PricePoint {
    pub fn new(symbol: impl Into<String>, price: f64, observed_at: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            observed_at,
        }
    }

    /// Observation time as milliseconds since the Unix epoch (storage format)
    pub fn timestamp_ms(&self) -> i64 {
        self.observed_at.timestamp_millis()
    }
}

/// Price ticker returned by the price source, e.g. `{"symbol":"BTCUSDT","price":"65000.00"}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTicker {
    #[serde(default)]
    pub symbol: String,
    /// Decimal string as sent by the exchange; a bare JSON number is accepted too
    #[serde(deserialize_with = "string_or_number")]
    pub price: String,
}

impl PriceTicker {
    /// Parse the string-encoded price into a finite, non-negative number
    pub fn parse_price(&self) -> Result<f64> {
        let value: f64 = self.price.trim().parse().map_err(|e| {
            AppError::ParseError(format!("无法解析价格 '{}': {}", self.price, e))
        })?;

        if !value.is_finite() || value < 0.0 {
            return Err(AppError::ParseError(format!("价格不是有效数值: '{}'", self.price)));
        }

        Ok(value)
    }
}

// Helper: the price field is normally a string, some sources send a number
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = serde_json::Value::deserialize(deserializer)?;
    match v {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("price must be a string or number, got {}", other))),
    }
}

/// Latest price per symbol joined with its windowed average, served by the stats API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolStats {
    pub symbol: String,
    pub current_price: f64,
    /// `None` when the symbol has no points inside the reporting window
    pub avg_price: Option<f64>,
}
