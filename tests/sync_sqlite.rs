#![cfg(feature = "sqlite")]

use std::time::Duration;

use ezmysql::checkpoint::{IdLog, scan_after};
use ezmysql::prelude::*;
use ezmysql::ConnectionState;
use tempfile::tempdir;

const SCHEMA: &str = "CREATE TABLE simple (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT UNIQUE,
    text TEXT,
    author TEXT NOT NULL DEFAULT 'Jim',
    length INTEGER NOT NULL DEFAULT 0,
    bin BLOB
)";

fn open_with_schema(opts: ConnectOptions) -> Result<SqliteConnection, EzDbError> {
    let mut conn = SqliteConnection::open(opts)?;
    conn.execute(SCHEMA, ())?;
    Ok(conn)
}

#[test]
fn insert_then_get_round_trips_values() -> Result<(), Box<dyn std::error::Error>> {
    let mut db = open_with_schema(ConnectOptions::sqlite(":memory:"))?;
    let text = "text\nez\r\nmysql%%\\123,item of the first";
    let item = record! {
        "title" => "ezmysql",
        "text" => text,
        "bin" => vec![0_u8, 159, 146, 150],
    };
    let id = db.table_insert("simple", &item)?.expect("not a duplicate");
    assert_eq!(id, 1);

    let row = db
        .get("select * from simple where id=%s", [RowValues::from(id)])?
        .expect("row exists");
    assert_eq!(row["title"].as_text(), Some("ezmysql"));
    assert_eq!(row["text"].as_text(), Some(text));
    assert_eq!(row["author"].as_text(), Some("Jim"));
    assert_eq!(row["bin"].as_blob(), Some(&[0_u8, 159, 146, 150][..]));
    // rows are addressable by position as well
    assert_eq!(row.get_by_index(0), Some(&RowValues::Int(1)));
    Ok(())
}

#[test]
fn get_without_rows_is_none() -> Result<(), Box<dyn std::error::Error>> {
    let mut db = open_with_schema(ConnectOptions::sqlite(":memory:"))?;
    assert!(db.get("select * from simple where id=%s", [RowValues::Int(99)])?.is_none());
    assert!(db.query("select * from simple", ())?.is_empty());
    Ok(())
}

#[test]
fn update_changes_only_named_fields() -> Result<(), Box<dyn std::error::Error>> {
    let mut db = open_with_schema(ConnectOptions::sqlite(":memory:"))?;
    db.table_insert(
        "simple",
        &record! { "title" => "before", "text" => "keep me", "length" => 3 },
    )?;

    let updates = record! { "title" => "by_\"update\"_table()", "length" => 123 };
    assert_eq!(db.table_update("simple", &updates, "id", 1)?, Some(1));
    // the where value is bound, so quotes in it cannot break the statement
    assert_eq!(db.table_update("simple", &updates, "title", "x' OR '1'='1")?, Some(0));

    let row = db
        .get("select * from simple where id=%s", [RowValues::Int(1)])?
        .expect("row exists");
    assert_eq!(row["title"].as_text(), Some("by_\"update\"_table()"));
    assert_eq!(row["length"].as_int(), Some(&123));
    assert_eq!(row["text"].as_text(), Some("keep me"));
    Ok(())
}

#[test]
fn insert_many_inserts_every_record() -> Result<(), Box<dyn std::error::Error>> {
    let mut db = open_with_schema(ConnectOptions::sqlite(":memory:"))?;
    let items: Vec<Record> = (0..5)
        .map(|i| record! { "title" => format!("t{i}"), "text" => "we%swe", "length" => i })
        .collect();
    assert_eq!(db.table_insert_many("simple", &items)?, Some(5));

    let count = db
        .get("select count(*) as n from simple", ())?
        .expect("count row");
    assert_eq!(count["n"].as_int(), Some(&5));

    // quoted %s stays literal
    let row = db
        .get("select count(*) as n from simple where text = 'we%swe'", ())?
        .expect("count row");
    assert_eq!(row["n"].as_int(), Some(&5));

    let mismatched = vec![record! { "title" => "a" }, record! { "text" => "b" }];
    let err = db.table_insert_many("simple", &mismatched).unwrap_err();
    assert!(matches!(err, EzDbError::ParameterError(_)));
    Ok(())
}

#[test]
fn duplicates_follow_the_policy() -> Result<(), Box<dyn std::error::Error>> {
    let mut db = open_with_schema(ConnectOptions::sqlite(":memory:"))?;
    let item = record! { "title" => "unique" };
    assert!(db.table_insert("simple", &item)?.is_some());
    assert_eq!(db.table_insert("simple", &item)?, None);
    assert_eq!(
        db.execute("insert into simple (title) values (%s)", [RowValues::from("unique")])?,
        None
    );

    db.set_duplicate_policy(DuplicatePolicy::Raise);
    let err = db.table_insert("simple", &item).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateKey);

    // other failures are never suppressed
    db.set_duplicate_policy(DuplicatePolicy::Suppress);
    let err = db.execute("insert into missing (a) values (%s)", [RowValues::Int(1)]);
    assert!(err.is_err());
    Ok(())
}

#[test]
fn table_has_reports_presence() -> Result<(), Box<dyn std::error::Error>> {
    let mut db = open_with_schema(ConnectOptions::sqlite(":memory:"))?;
    db.table_insert("simple", &record! { "title" => "here" })?;

    let row = db.table_has("simple", "title", "here")?.expect("present");
    assert_eq!(row["title"].as_text(), Some("here"));
    assert!(db.table_has("simple", "title", "gone")?.is_none());

    let err = db.table_has("simple; drop table simple", "id", 1).unwrap_err();
    assert!(matches!(err, EzDbError::ParameterError(_)));
    Ok(())
}

#[test]
fn query_many_keeps_going_after_a_failure() -> Result<(), Box<dyn std::error::Error>> {
    let mut db = open_with_schema(ConnectOptions::sqlite(":memory:"))?;
    db.table_insert("simple", &record! { "title" => "one" })?;

    let results = db.query_many([
        "select * from simple where id=1",
        "select * from nowhere",
        "select count(*) as count from simple",
    ])?;
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().map(ResultSet::len).ok(), Some(1));
    assert!(results[1].is_err());
    let count = results[2].as_ref().expect("count query");
    assert_eq!(count.results[0]["count"].as_int(), Some(&1));
    Ok(())
}

#[test]
fn query_many_reports_a_handle_that_cannot_open() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let nested = dir.path().join("nested");
    std::fs::create_dir(&nested)?;
    let path = nested.join("gone.db");
    let mut db = open_with_schema(ConnectOptions::sqlite(path.to_string_lossy()))?;
    db.close()?;
    std::fs::remove_dir_all(&nested)?;

    assert!(db.query("select 1", ()).is_err());
    assert!(db.query_many(["select 1", "select 2"]).is_err());
    assert!(db.query_many(Vec::<String>::new()).is_err());
    Ok(())
}

#[test]
fn idle_handle_is_replaced_and_file_data_survives() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("idle.db");
    let mut db = open_with_schema(ConnectOptions::sqlite(path.to_string_lossy()))?;
    db.set_max_idle_time(Duration::from_millis(50));

    db.ensure_connected()?;
    db.ensure_connected()?;
    assert_eq!(db.generation(), 1);

    db.table_insert("simple", &record! { "title" => "persisted" })?;
    std::thread::sleep(Duration::from_millis(80));
    assert_eq!(db.state(), ConnectionState::Stale);

    let row = db.table_has("simple", "title", "persisted")?;
    assert!(row.is_some());
    assert_eq!(db.generation(), 2);
    assert_eq!(db.state(), ConnectionState::Live);
    Ok(())
}

#[test]
fn manual_commit_persists_on_close() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("manual.db");
    let opts = ConnectOptions::sqlite(path.to_string_lossy()).with_autocommit(false);

    let mut db = open_with_schema(opts.clone())?;
    db.table_insert("simple", &record! { "title" => "committed on close" })?;
    db.close()?;
    db.close()?;
    assert_eq!(db.state(), ConnectionState::Closed);
    drop(db);

    let mut reader = SqliteConnection::open(ConnectOptions::sqlite(path.to_string_lossy()))?;
    assert!(reader.table_has("simple", "title", "committed on close")?.is_some());
    Ok(())
}

#[test]
fn failed_batch_leaves_no_rows_in_either_commit_mode() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    for autocommit in [true, false] {
        let path = dir.path().join(format!("batch-{autocommit}.db"));
        let opts = ConnectOptions::sqlite(path.to_string_lossy()).with_autocommit(autocommit);
        let mut db = open_with_schema(opts)?;
        db.table_insert("simple", &record! { "title" => "kept" })?;

        let items = vec![
            record! { "title" => "x" },
            record! { "title" => "y" },
            record! { "title" => "x" },
        ];
        assert_eq!(db.table_insert_many("simple", &items)?, None);
        db.commit()?;
        db.close()?;

        let mut reader = SqliteConnection::open(ConnectOptions::sqlite(path.to_string_lossy()))?;
        let count = reader
            .get("select count(*) as n from simple", ())?
            .expect("count row");
        assert_eq!(count["n"].as_int(), Some(&1), "autocommit={autocommit}");
        assert!(reader.table_has("simple", "title", "kept")?.is_some());
    }
    Ok(())
}

#[test]
fn checkpoint_drives_incremental_scan() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let mut db = open_with_schema(ConnectOptions::sqlite(":memory:"))?;
    let items: Vec<Record> = (1..=7).map(|i| record! { "title" => format!("t{i}") }).collect();
    db.table_insert_many("simple", &items)?;

    let log = IdLog::new(dir.path().join("simple.id"));
    let mut seen = Vec::new();
    loop {
        let batch = scan_after(&mut db, "simple", log.get_id(), 3, &["id", "title"])?;
        let Some(last) = batch.iter().last() else {
            break;
        };
        let last_id = *last["id"].as_int().expect("integer id");
        seen.extend(batch.iter().map(|row| row["title"].to_display_string()));
        log.save_id(last_id)?;
    }
    assert_eq!(seen.len(), 7);
    assert_eq!(seen.first().map(String::as_str), Some("t1"));
    assert_eq!(log.get_id(), 7);
    Ok(())
}

#[test]
fn named_parameters_pass_through() -> Result<(), Box<dyn std::error::Error>> {
    let mut db = open_with_schema(ConnectOptions::sqlite(":memory:"))?;
    db.table_insert("simple", &record! { "title" => "named", "length" => 9 })?;
    let row = db
        .get(
            "select length from simple where title = :title",
            Params::named([("title", "named")]),
        )?
        .expect("row exists");
    assert_eq!(row["length"].as_int(), Some(&9));
    Ok(())
}
