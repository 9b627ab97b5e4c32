//! Walks through the sync helpers against `SQLite` (default) or a MySQL server.
//!
//! ```text
//! cargo run --example sync_example
//! cargo run --example sync_example -- --backend mysql --host localhost --user root --password pw
//! ```

use std::path::PathBuf;

use clap::Parser;
use ezmysql::prelude::*;
use ezmysql::SyncBackend;
use tracing::info;

#[derive(Parser, Debug)]
#[command(version, about = "Exercise the idle-aware sync connection")]
struct Args {
    #[arg(long, value_enum, default_value_t = DatabaseType::Sqlite)]
    backend: DatabaseType,

    /// JSON file with connection options; overrides the flags below.
    #[arg(long)]
    config: Option<PathBuf>,

    /// `SQLite` file; in-memory when omitted.
    #[arg(long)]
    path: Option<String>,

    #[arg(long, default_value = "localhost")]
    host: String,

    #[arg(long, default_value = "testdb")]
    database: String,

    #[arg(long, default_value = "root")]
    user: String,

    #[arg(long, default_value = "")]
    password: String,
}

const SQLITE_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS simple (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT,
    text TEXT,
    author TEXT NOT NULL DEFAULT 'Jim',
    length INTEGER NOT NULL DEFAULT 0,
    bin BLOB
)";

const MYSQL_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS `simple` (
    `id` int unsigned NOT NULL AUTO_INCREMENT,
    `title` varchar(1000) DEFAULT NULL,
    `text` mediumtext,
    `author` varchar(1000) NOT NULL DEFAULT 'Jim',
    `length` tinyint(3) unsigned NOT NULL DEFAULT '0',
    `bin` blob,
    PRIMARY KEY (`id`)
) DEFAULT CHARSET=utf8mb4";

fn walkthrough<B: SyncBackend>(db: &mut Connection<B>, schema: &str) -> Result<(), EzDbError> {
    db.execute(schema, ())?;

    let title = "ezmysql";
    let text = "text\nez\r\nmysql%%\\123,item of the first";
    let id = db
        .execute(
            "insert into simple(title, text) values(%s, %s)",
            [RowValues::from(title), RowValues::from(text)],
        )?
        .unwrap_or_default();
    let row = db
        .get("select * from simple where id=%s", [RowValues::from(id)])?
        .ok_or_else(|| EzDbError::Other("inserted row missing".into()))?;
    assert_eq!(row["title"].as_text(), Some(title));
    assert_eq!(row["text"].as_text(), Some(text));

    let sqls = [
        format!("select * from simple where id={id}"),
        "select count(*) as count from simple".to_string(),
    ];
    for (sql, result) in sqls.iter().zip(db.query_many(&sqls)?) {
        let rows = result?;
        info!(sql, rows = rows.len(), "query_many");
    }

    // quoted %s is a literal, not a placeholder
    db.execute("update simple set title='%s' where id=1", ())?;

    let found = db.table_has("simple", "id", 3)?;
    info!(present = found.is_some(), "table_has id=3");

    let updates = record! {
        "title" => "by_\"update\"_table()",
        "text" => "by_update_table()\n\rzzz",
        "length" => 123,
        "bin" => b"compressed bytes".to_vec(),
    };
    let changed = db.table_update("simple", &updates, "id", 1)?;
    info!(?changed, "table_update");
    if let Some(row) = db.get("select * from simple where id=%s", [RowValues::Int(1)])? {
        assert_eq!(row["title"].as_text(), updates["title"].as_text());
        assert_eq!(row["bin"].as_blob(), Some(&b"compressed bytes"[..]));
    }

    let items = vec![
        record! { "title" => "abdfe'klj", "text" => "we%swe", "length" => 234, "bin" => b"jkl\"de\"ee".to_vec() },
        record! { "title" => "abdfe'klj", "text" => "we\"zz\"we", "length" => 234, "bin" => b"jkl\"de\"ee".to_vec() },
    ];
    let inserted = db.table_insert_many("simple", &items)?;
    info!(?inserted, "table_insert_many");

    let rows = db.query(
        "select * from simple where text like %s limit %s",
        [RowValues::from("%item%"), RowValues::Int(10)],
    )?;
    for row in &rows {
        println!("{}", row.to_json());
    }

    db.execute("drop table simple", ())?;
    db.close()?;
    Ok(())
}

fn options(args: &Args) -> Result<ConnectOptions, EzDbError> {
    if let Some(path) = &args.config {
        return ConnectOptions::from_json_file(path);
    }
    Ok(match args.backend {
        DatabaseType::Sqlite => ConnectOptions::sqlite(args.path.as_deref().unwrap_or(":memory:")),
        _ => ConnectOptions::new(&args.host, &args.database, &args.user, &args.password),
    })
}

fn main() -> Result<(), EzDbError> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let args = Args::parse();
    let opts = options(&args)?;
    match args.backend {
        DatabaseType::Sqlite => walkthrough(&mut SqliteConnection::open(opts)?, SQLITE_SCHEMA)?,
        #[cfg(feature = "mysql")]
        DatabaseType::Mysql => walkthrough(&mut MysqlConnection::open(opts)?, MYSQL_SCHEMA)?,
        other => {
            return Err(EzDbError::ConfigError(format!(
                "{other:?} is not compiled into this example"
            )));
        }
    }
    println!("testing succeed!");
    Ok(())
}
