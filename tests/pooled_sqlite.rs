#![cfg(feature = "sqlite")]

use std::sync::Arc;

use ezmysql::checkpoint::{IdLog, scan_after_async};
use ezmysql::prelude::*;
use tempfile::tempdir;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS simple (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT UNIQUE,
    text TEXT,
    length INTEGER NOT NULL DEFAULT 0
)";

fn unique_db_path(prefix: &str) -> String {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(format!("{prefix}.db"));
    // Leak the tempdir so the file persists for the duration of the test binary.
    std::mem::forget(dir);
    path.to_string_lossy().into_owned()
}

async fn pool_with_schema(path: Option<String>) -> Result<SqlitePool, EzDbError> {
    let opts = match path {
        Some(path) => ConnectOptions::sqlite(path),
        None => ConnectOptions::default(),
    }
    .with_pool(1, 3);
    let pool = SqlitePool::new(opts);
    pool.execute(SCHEMA, ()).await?;
    Ok(pool)
}

#[tokio::test]
async fn pool_is_created_lazily() -> Result<(), Box<dyn std::error::Error>> {
    let mut pool = SqlitePool::new(ConnectOptions::sqlite(unique_db_path("lazy")).with_pool(1, 2));
    assert!(pool.status().is_none());

    pool.execute(SCHEMA, ()).await?;
    let status = pool.status().expect("pool exists after first call");
    assert!(status.connections >= 1 && status.connections <= 2);

    pool.close();
    assert!(pool.status().is_none());
    // a closed pool comes back on the next call, and the file still has the table
    assert!(pool.table_has("simple", "id", 1).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn insert_update_and_lookup() -> Result<(), Box<dyn std::error::Error>> {
    let pool = pool_with_schema(None).await?;
    let id = pool
        .table_insert("simple", &record! { "title" => "async", "text" => "a%sb", "length" => 1 })
        .await?;
    assert_eq!(id, 1);

    let changed = pool
        .table_update("simple", &record! { "length" => 42 }, "id", 1)
        .await?;
    assert_eq!(changed, 1);

    let row = pool
        .get("select * from simple where id=%s", [RowValues::Int(1)])
        .await?
        .expect("row exists");
    assert_eq!(row["length"].as_int(), Some(&42));
    assert_eq!(row["text"].as_text(), Some("a%sb"));

    assert!(pool.table_has("simple", "title", "async").await?.is_some());
    assert!(pool.table_has("simple", "title", "sync").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn duplicate_insert_returns_zero_or_raises() -> Result<(), Box<dyn std::error::Error>> {
    let pool = pool_with_schema(None).await?;
    let item = record! { "title" => "dup" };
    assert_eq!(pool.table_insert("simple", &item).await?, 1);
    assert_eq!(pool.table_insert("simple", &item).await?, 0);
    assert_eq!(pool.table_insert_many("simple", &[item.clone()]).await?, 0);

    // plain execute does not suppress
    let err = pool
        .execute("insert into simple (title) values (%s)", [RowValues::from("dup")])
        .await
        .unwrap_err();
    assert!(err.is_duplicate_key());

    let strict = SqlitePool::new(
        ConnectOptions::default()
            .with_pool(1, 1)
            .with_duplicate_policy(DuplicatePolicy::Raise),
    );
    strict.execute(SCHEMA, ()).await?;
    strict.table_insert("simple", &item).await?;
    let err = strict.table_insert("simple", &item).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateKey);
    Ok(())
}

#[tokio::test]
async fn insert_many_and_query_many() -> Result<(), Box<dyn std::error::Error>> {
    let pool = pool_with_schema(Some(unique_db_path("many"))).await?;
    let items: Vec<Record> = (0..10).map(|i| record! { "title" => format!("row{i}") }).collect();
    assert_eq!(pool.table_insert_many("simple", &items).await?, 10);

    let results = pool
        .query_many(["select count(*) as n from simple", "select * from simple where id=3"])
        .await?;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].results[0]["n"].as_int(), Some(&10));
    assert_eq!(results[1].results[0]["title"].as_text(), Some("row2"));

    assert!(pool.query_many(["select * from nowhere"]).await.is_err());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_share_the_pool() -> Result<(), Box<dyn std::error::Error>> {
    let pool = Arc::new(pool_with_schema(Some(unique_db_path("concurrent"))).await?);
    let mut handles = Vec::new();
    for i in 0..20 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            pool.table_insert("simple", &record! { "title" => format!("c{i}") })
                .await
        }));
    }
    for handle in handles {
        handle.await??;
    }
    let row = pool
        .get("select count(*) as n from simple", ())
        .await?
        .expect("count row");
    assert_eq!(row["n"].as_int(), Some(&20));
    let status = pool.status().expect("pool exists");
    assert!(status.connections <= 3);
    Ok(())
}

#[tokio::test]
async fn async_scan_with_checkpoint() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let pool = pool_with_schema(None).await?;
    let items: Vec<Record> = (1..=5).map(|i| record! { "title" => format!("s{i}") }).collect();
    pool.table_insert_many("simple", &items).await?;

    let log = IdLog::new(dir.path().join("scan.id"));
    log.save_id(2)?;
    let rows = scan_after_async(&pool, "simple", log.get_id(), 10, &[]).await?;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows.results[0]["title"].as_text(), Some("s3"));
    Ok(())
}
