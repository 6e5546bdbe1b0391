use crate::pmcommon::config::HttpConfig;
use crate::pmcommon::{AppError, PriceTicker, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 价格数据源
///
/// 生产环境由 [`PriceApi`] 实现；测试中可以替换为进程内的数据源
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// 获取某个交易对的当前报价
    async fn fetch_price(&self, symbol: &str) -> Result<PriceTicker>;
}

/// Ticker price API client
///
/// 请求地址为 `api_url + symbol`，例如
/// `https://api.binance.com/api/v3/ticker/price?symbol=` + `BTCUSDT`
#[derive(Clone, Debug)]
pub struct PriceApi {
    client: Client,
    api_url: String,
}

impl PriceApi {
    /// 使用默认的HTTP参数创建客户端
    pub fn new(api_url: impl Into<String>) -> Result<Self> {
        Self::with_config(api_url, &HttpConfig::default())
    }

    /// 创建新的API客户端实例（带超时和可选代理）
    pub fn with_config(api_url: impl Into<String>, http: &HttpConfig) -> Result<Self> {
        let api_url = api_url.into();

        let mut client_builder = Client::builder()
            .timeout(Duration::from_secs(http.request_timeout_secs))
            .connect_timeout(Duration::from_secs(http.connect_timeout_secs));

        if let Some(proxy_url) = &http.proxy_url {
            match reqwest::Proxy::all(proxy_url) {
                Ok(proxy) => {
                    info!(target: "api", log_type = "module", "使用代理访问价格接口: {}", proxy_url);
                    client_builder = client_builder.proxy(proxy);
                },
                Err(e) => {
                    warn!(target: "api", log_type = "module", "设置代理失败，将尝试直接连接: {} - {}", proxy_url, e);
                }
            }
        }

        let client = client_builder
            .build()
            .map_err(|e| AppError::ApiError(format!("创建HTTP客户端失败: {}", e)))?;

        info!(target: "api", log_type = "module", "🌐 初始化价格API客户端，端点: {}", api_url);
        Ok(Self { client, api_url })
    }

    /// 拼接某个交易对的请求地址
    pub fn price_url(&self, symbol: &str) -> String {
        format!("{}{}", self.api_url, symbol)
    }
}

#[async_trait]
impl PriceSource for PriceApi {
    async fn fetch_price(&self, symbol: &str) -> Result<PriceTicker> {
        let url = self.price_url(symbol);
        debug!(target: "api", symbol = %symbol, "发送价格请求: {}", url);

        let response = match self.client.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                let http_error = AppError::from(e);
                error!(
                    target: "api",
                    symbol = %symbol,
                    url = %url,
                    error.summary = http_error.get_error_type_summary(),
                    error.details = %http_error,
                    "价格请求失败"
                );
                return Err(http_error);
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::ApiError(format!(
                "获取 {} 价格失败: {} - {}",
                symbol,
                status,
                preview(&text)
            )));
        }

        let body = response.text().await?;
        let ticker: PriceTicker = serde_json::from_str(&body).map_err(|e| {
            warn!(
                target: "api",
                symbol = %symbol,
                response_preview = %preview(&body),
                "解析价格JSON失败: {}", e
            );
            AppError::JsonError(e)
        })?;

        Ok(ticker)
    }
}

// 日志里只保留响应体的前200个字符
fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}
