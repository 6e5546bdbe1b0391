// 价格统计Web服务
use crate::pmcommon::{AppError, Database, Result, SymbolStats};
use crate::monitor::analysis::format_display_price;
use axum::{
    extract::State,
    http::StatusCode,
    response::Html,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    /// 统计接口的均价窗口
    pub report_window: Duration,
}

type HandlerError = (StatusCode, String);

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/stats", get(stats_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 绑定地址并运行，直到关闭信号变为 true
pub async fn run_web_server(bind_addr: &str, state: AppState, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| AppError::WebServerError(format!("绑定地址 {} 失败: {}", bind_addr, e)))?;

    serve(listener, state, shutdown_rx).await
}

/// 在已绑定的监听器上运行
pub async fn serve(listener: TcpListener, state: AppState, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
    let local_addr = listener.local_addr()?;
    info!(target: "web", log_type = "module", "🌐 Web服务器启动在 http://{}", local_addr);

    let shutdown = async move {
        loop {
            let stopping = *shutdown_rx.borrow();
            if stopping || shutdown_rx.changed().await.is_err() {
                break;
            }
        }
    };

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| {
            error!(target: "web", error = %e, "Web服务器错误");
            AppError::WebServerError(format!("Web服务器错误: {}", e))
        })?;

    info!(target: "web", log_type = "module", "Web服务器已关闭");
    Ok(())
}

async fn load_stats(state: &AppState) -> std::result::Result<Vec<SymbolStats>, HandlerError> {
    let db = Arc::clone(&state.db);
    let window = state.report_window;

    let result = tokio::task::spawn_blocking(move || db.latest_per_symbol(window))
        .await
        .map_err(|e| AppError::DatabaseError(format!("统计查询任务 panic: {:?}", e)))
        .and_then(|r| r);

    result.map_err(|e| {
        error!(
            target: "web",
            message = "查询价格统计失败",
            error.summary = e.get_error_type_summary(),
            error.details = %e
        );
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

/// GET /api/stats
pub async fn stats_handler(State(state): State<AppState>) -> std::result::Result<Json<Vec<SymbolStats>>, HandlerError> {
    load_stats(&state).await.map(Json)
}

/// GET /
pub async fn index_handler(State(state): State<AppState>) -> std::result::Result<Html<String>, HandlerError> {
    let stats = load_stats(&state).await?;
    Ok(Html(render_stats_html(&stats)))
}

/// 把统计行渲染成一个简单的HTML表格
pub fn render_stats_html(stats: &[SymbolStats]) -> String {
    let mut rows = String::new();
    for s in stats {
        let avg = s
            .avg_price
            .map(format_display_price)
            .unwrap_or_else(|| "-".to_string());
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape_html(&s.symbol),
            format_display_price(s.current_price),
            avg
        ));
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta http-equiv="refresh" content="5">
<title>Price Monitor</title>
</head>
<body>
<h1>Price Monitor</h1>
<table border="1">
<tr><th>Symbol</th><th>Current Price</th><th>Average Price</th></tr>
{}</table>
</body>
</html>
"#,
        rows
    )
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
