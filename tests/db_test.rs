#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use price_monitor::pmcommon::{Database, PricePoint, SymbolStats};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    // 创建测试数据库，TempDir 需要和数据库一起保持存活
    fn setup_test_db() -> (Arc<Database>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("prices.db")).unwrap();
        (Arc::new(db), dir)
    }

    fn reference_time() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    async fn insert_at(db: &Database, symbol: &str, price: f64, at: DateTime<Utc>) {
        db.insert_price(&PricePoint::new(symbol, price, at)).await.unwrap();
    }

    #[tokio::test]
    async fn test_average_over_empty_window_is_none() {
        let (db, _dir) = setup_test_db();

        let avg = db.windowed_average("BTCUSDT", Duration::from_secs(3600)).unwrap();
        assert_eq!(avg, None, "没有数据时均价应为 None 而不是 0");
    }

    #[tokio::test]
    async fn test_average_only_counts_points_inside_window() {
        let (db, _dir) = setup_test_db();
        let now = reference_time();

        insert_at(&db, "BTCUSDT", 1000.0, now - ChronoDuration::hours(2)).await;
        // 恰好落在窗口边界上的点不计入
        insert_at(&db, "BTCUSDT", 5000.0, now - ChronoDuration::minutes(60)).await;
        insert_at(&db, "BTCUSDT", 100.0, now - ChronoDuration::minutes(30)).await;
        insert_at(&db, "BTCUSDT", 200.0, now - ChronoDuration::minutes(10)).await;
        insert_at(&db, "ETHUSDT", 9999.0, now - ChronoDuration::minutes(5)).await;

        let avg = db.windowed_average_at("BTCUSDT", Duration::from_secs(3600), now).unwrap();
        assert_eq!(avg, Some(150.0));

        let wide = db.windowed_average_at("BTCUSDT", Duration::from_secs(3 * 3600), now).unwrap();
        assert_eq!(wide, Some(1575.0));

        let none = db.windowed_average_at("BTCUSDT", Duration::from_secs(60), now).unwrap();
        assert_eq!(none, None);
    }

    #[tokio::test]
    async fn test_latest_per_symbol_uses_last_inserted_row() {
        let (db, _dir) = setup_test_db();
        let now = reference_time();

        insert_at(&db, "ETHUSDT", 3000.0, now - ChronoDuration::minutes(3)).await;
        insert_at(&db, "BTCUSDT", 64000.0, now - ChronoDuration::minutes(2)).await;
        insert_at(&db, "BTCUSDT", 66000.0, now - ChronoDuration::minutes(1)).await;
        insert_at(&db, "ETHUSDT", 3100.0, now).await;
        // 只有窗口外历史数据的交易对
        insert_at(&db, "SOLUSDT", 150.0, now - ChronoDuration::hours(200)).await;

        let stats = db.latest_per_symbol_at(Duration::from_secs(100 * 3600), now).unwrap();

        assert_eq!(
            stats,
            vec![
                SymbolStats { symbol: "BTCUSDT".to_string(), current_price: 66000.0, avg_price: Some(65000.0) },
                SymbolStats { symbol: "ETHUSDT".to_string(), current_price: 3100.0, avg_price: Some(3050.0) },
                SymbolStats { symbol: "SOLUSDT".to_string(), current_price: 150.0, avg_price: None },
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_from_many_workers() {
        let (db, _dir) = setup_test_db();
        let symbols = ["BTCUSDT", "ETHUSDT", "SOLUSDT", "BNBUSDT"];

        let mut handles = Vec::new();
        for symbol in symbols {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    let point = PricePoint::new(symbol, 100.0 + i as f64, Utc::now());
                    db.insert_price(&point).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(db.count_points(None).unwrap(), 100);
        for symbol in symbols {
            assert_eq!(db.count_points(Some(symbol)).unwrap(), 25, "{} 的记录数不正确", symbol);
        }

        let stats = db.latest_per_symbol(Duration::from_secs(3600)).unwrap();
        assert_eq!(stats.len(), 4);
        assert!(stats.iter().all(|s| s.current_price == 124.0));
    }

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("reopen.db");

        {
            let db = Database::new(&path).unwrap();
            insert_at(&db, "BTCUSDT", 42.0, Utc::now()).await;
        }

        let reopened = Database::new(&path).unwrap();
        assert_eq!(reopened.path(), path.as_path());
        assert_eq!(reopened.count_points(Some("BTCUSDT")).unwrap(), 1);
    }
}
