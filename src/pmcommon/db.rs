use crate::pmcommon::config::DatabaseConfig;
use crate::pmcommon::error::{AppError, Result};
use crate::pmcommon::models::{PricePoint, SymbolStats};
use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task;
use tracing::{debug, error, info, instrument};

// 数据库连接池类型
pub type DbPool = Pool<SqliteConnectionManager>;

// 写入队列容量
const WRITE_QUEUE_CAPACITY: usize = 1024;

/// 写入任务结构体，表示一个待执行的数据库写入操作
#[derive(Debug)]
struct WriteTask {
    point: PricePoint,
    result_sender: oneshot::Sender<Result<()>>,
}

/// 数据库写入队列处理器
///
/// 所有 Worker 的写入都经由这里串行执行，调用方无需自行加锁
#[derive(Debug)]
struct DbWriteQueueProcessor {
    receiver: mpsc::Receiver<WriteTask>,
    pool: DbPool,
}

impl DbWriteQueueProcessor {
    fn new(receiver: mpsc::Receiver<WriteTask>, pool: DbPool) -> Self {
        tracing::debug!(decision = "queue_processor_init", "数据库写入队列处理器初始化");
        Self { receiver, pool }
    }

    /// 启动写入队列处理任务，所有发送端被释放后自动退出
    fn start(mut self) {
        tokio::spawn(async move {
            info!(target: "db", log_type = "module", "数据库写入队列处理器已启动 (串行模式)");

            while let Some(task) = self.receiver.recv().await {
                let pool = self.pool.clone();
                let point = task.point;
                let symbol = point.symbol.clone();

                let result = match task::spawn_blocking(move || Self::insert_static(&pool, &point)).await {
                    Ok(result) => result,
                    Err(join_error) => Err(AppError::DatabaseError(format!("数据库写入任务 panic: {:?}", join_error))),
                };

                if let Err(e) = &result {
                    tracing::error!(
                        target: "db",
                        message = "价格写入失败",
                        symbol = %symbol,
                        error.summary = e.get_error_type_summary(),
                        error.details = %e
                    );
                }

                // 调用方可能已放弃等待，忽略发送失败
                let _ = task.result_sender.send(result);
            }

            info!(target: "db", log_type = "module", "数据库写入队列处理器已停止");
        });
    }

    fn insert_static(pool: &DbPool, point: &PricePoint) -> Result<()> {
        let conn = pool.get()
            .map_err(|e| AppError::DatabaseError(format!("获取数据库连接失败: {}", e)))?;

        conn.execute(
            "INSERT INTO price_history (symbol, price, timestamp) VALUES (?, ?, ?)",
            params![point.symbol, point.price, point.timestamp_ms()],
        ).map_err(|e| AppError::DatabaseError(format!("插入价格失败 {}: {}", point.symbol, e)))?;

        Ok(())
    }
}

/// 价格历史存储
///
/// 单表 `price_history` 追加写入；写操作经由写入队列串行化，读操作使用连接池
#[derive(Debug)]
pub struct Database {
    pool: DbPool,
    write_queue_sender: mpsc::Sender<WriteTask>,
    db_path: PathBuf,
}

impl Database {
    /// 使用默认参数打开数据库
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let config = DatabaseConfig {
            database_path: db_path.as_ref().to_string_lossy().into_owned(),
            ..DatabaseConfig::default()
        };
        Self::new_with_config(&config)
    }

    /// Create a new database connection with WAL mode and the configured pool settings
    ///
    /// 必须在 tokio 运行时内调用，写入队列处理器是一个异步任务
    #[instrument(skip(config), fields(db_path = %config.database_path), err)]
    pub fn new_with_config(config: &DatabaseConfig) -> Result<Self> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(AppError::DatabaseError("数据库必须在 tokio 运行时内初始化".to_string()));
        }

        let db_path = PathBuf::from(&config.database_path);

        // Ensure parent directory exists for database
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let enable_wal = config.enable_wal;
        let manager = SqliteConnectionManager::file(&db_path).with_init(move |conn| {
            if enable_wal {
                conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            }
            conn.execute_batch("
                PRAGMA synchronous = NORMAL;
                PRAGMA busy_timeout = 5000;
            ")
        });

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(Duration::from_secs(config.connection_timeout_secs))
            .build(manager)
            .map_err(|e| {
                let pool_error = AppError::DatabaseError(format!("Failed to create connection pool: {}", e));
                tracing::error!(
                    message = "创建连接池失败",
                    db_path = %db_path.display(),
                    error.summary = pool_error.get_error_type_summary(),
                    error.details = %pool_error
                );
                pool_error
            })?;

        // 先建表，再启动写入队列
        Self::init_db(&pool)?;

        let (sender, receiver) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        DbWriteQueueProcessor::new(receiver, pool.clone()).start();

        info!(target: "db", log_type = "module", wal = enable_wal, "✅ SQLite数据库初始化成功: {}", db_path.display());

        Ok(Self {
            pool,
            write_queue_sender: sender,
            db_path,
        })
    }

    /// Initialize database tables
    fn init_db(pool: &DbPool) -> Result<()> {
        let conn = pool.get()
            .map_err(|e| AppError::DatabaseError(format!("Failed to get connection: {}", e)))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS price_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                price REAL NOT NULL,
                timestamp INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_price_history_symbol_ts
                ON price_history (symbol, timestamp);",
        ).map_err(|e| AppError::DatabaseError(format!("Failed to create price_history table: {}", e)))?;

        Ok(())
    }

    fn get_conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get()
            .map_err(|e| AppError::DatabaseError(format!("获取数据库连接失败: {}", e)))
    }

    /// 数据库文件路径
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// 追加一条价格记录，经写入队列串行执行并等待结果
    pub async fn insert_price(&self, point: &PricePoint) -> Result<()> {
        let (result_sender, result_receiver) = oneshot::channel();
        let task = WriteTask {
            point: point.clone(),
            result_sender,
        };

        if let Err(e) = self.write_queue_sender.send(task).await {
            return Err(AppError::ChannelError(format!("无法将写入任务添加到队列: {}", e)));
        }

        match result_receiver.await {
            Ok(result) => {
                debug!(target: "db", symbol = %point.symbol, price = point.price, "价格写入完成");
                result
            },
            Err(e) => Err(AppError::ChannelError(format!("等待写入操作结果时出错: {}", e))),
        }
    }

    /// 以当前时间为终点的窗口均价，窗口内无数据时返回 `None`
    pub fn windowed_average(&self, symbol: &str, window: Duration) -> Result<Option<f64>> {
        self.windowed_average_at(symbol, window, Utc::now())
    }

    /// 以 `now` 为终点的窗口均价，窗口内无数据时返回 `None`
    pub fn windowed_average_at(&self, symbol: &str, window: Duration, now: DateTime<Utc>) -> Result<Option<f64>> {
        let cutoff = window_cutoff_ms(window, now);
        let conn = self.get_conn()?;

        let avg: Option<f64> = conn.query_row(
            "SELECT AVG(price) FROM price_history WHERE symbol = ? AND timestamp > ?",
            params![symbol, cutoff],
            |row| row.get(0),
        ).map_err(|e| AppError::DatabaseError(format!("查询 {} 窗口均价失败: {}", symbol, e)))?;

        Ok(avg)
    }

    /// 每个交易对最近插入的一条价格，附带其窗口均价，按交易对排序
    pub fn latest_per_symbol(&self, window: Duration) -> Result<Vec<SymbolStats>> {
        self.latest_per_symbol_at(window, Utc::now())
    }

    pub fn latest_per_symbol_at(&self, window: Duration, now: DateTime<Utc>) -> Result<Vec<SymbolStats>> {
        let cutoff = window_cutoff_ms(window, now);
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            "SELECT t1.symbol,
                    t1.price,
                    (SELECT AVG(t2.price) FROM price_history t2
                     WHERE t2.symbol = t1.symbol AND t2.timestamp > ?) AS avg_price
             FROM price_history t1
             WHERE t1.id IN (SELECT MAX(id) FROM price_history GROUP BY symbol)
             ORDER BY t1.symbol",
        ).map_err(|e| AppError::DatabaseError(format!("准备最新价格查询失败: {}", e)))?;

        let rows = stmt.query_map(params![cutoff], |row| {
            Ok(SymbolStats {
                symbol: row.get(0)?,
                current_price: row.get(1)?,
                avg_price: row.get(2)?,
            })
        }).map_err(|e| AppError::DatabaseError(format!("查询最新价格失败: {}", e)))?;

        let mut stats = Vec::new();
        for row in rows {
            match row {
                Ok(s) => stats.push(s),
                Err(e) => {
                    error!(target: "db", error = %e, "读取最新价格行失败");
                    return Err(AppError::SqliteError(e));
                }
            }
        }

        Ok(stats)
    }

    /// 统计价格记录数量，`symbol` 为空时统计全部
    pub fn count_points(&self, symbol: Option<&str>) -> Result<i64> {
        let conn = self.get_conn()?;
        let count: i64 = match symbol {
            Some(symbol) => conn.query_row(
                "SELECT COUNT(*) FROM price_history WHERE symbol = ?",
                params![symbol],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM price_history", [], |row| row.get(0))?,
        };
        Ok(count)
    }
}

fn window_cutoff_ms(window: Duration, now: DateTime<Utc>) -> i64 {
    let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
    now.timestamp_millis().saturating_sub(window_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_cutoff() {
        let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(window_cutoff_ms(Duration::from_secs(60), now), 1_700_000_000_000 - 60_000);
        assert_eq!(window_cutoff_ms(Duration::from_secs(u64::MAX), now), 1_700_000_000_000 - i64::MAX);
    }

    #[test]
    fn test_new_outside_runtime_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Database::new(dir.path().join("outside.db"));
        assert!(matches!(result, Err(AppError::DatabaseError(_))));
    }
}
