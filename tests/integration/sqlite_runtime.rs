#![allow(missing_docs)]

use cradle::db::Database;
use cradle::query::{OutputTarget, QueryEngine, QueryError, Record, Value};
use cradle::runtime::{InjectionScreen, RuntimeError, SqliteRuntime};
use tempfile::TempDir;

fn seeded(dir: &TempDir) -> SqliteRuntime {
    let runtime = SqliteRuntime::open(dir.path().join("app.db")).expect("open");
    runtime
        .with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER, \
                     deleted_at TEXT, avatar BLOB);
                 INSERT INTO users VALUES (1, 'ada', 36, NULL, x'0102');
                 INSERT INTO users VALUES (2, 'grace', 45, '2020-01-01', NULL);
                 INSERT INTO users VALUES (3, 'alan', 41, NULL, NULL);",
            )
        })
        .expect("seed");
    runtime
}

fn session(runtime: SqliteRuntime) -> Database {
    let mut db = Database::new();
    QueryEngine::new().with_runtime(runtime).attach_to(&mut db);
    db
}

fn names(rows: &[Record]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| match row.get("name") {
            Some(Value::String(name)) => Some(name.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn exec_reads_rows_into_target() {
    let dir = TempDir::new().expect("tempdir");
    let mut db = session(seeded(&dir));
    let users = OutputTarget::new("users");
    db.filter([("deleted_at", Value::Null)])
        .and_str("age > 40")
        .find(&users)
        .exec()
        .expect("exec");
    let rows = users.take();
    assert_eq!(names(&rows), vec!["alan".to_owned()]);
    assert_eq!(rows[0].get("age"), Some(&Value::Int(41)));
    assert_eq!(rows[0].get("avatar"), Some(&Value::Null));
}

#[test]
fn trailing_sql_orders_results() {
    let dir = TempDir::new().expect("tempdir");
    let mut db = session(seeded(&dir));
    let users = OutputTarget::new("users");
    db.where_str("age > 30")
        .find(&users)
        .misc("ORDER BY age DESC LIMIT 2")
        .exec()
        .expect("exec");
    assert_eq!(names(&users.rows()), vec!["grace".to_owned(), "alan".to_owned()]);
}

#[test]
fn blobs_and_implicit_filters_round_trip() {
    let dir = TempDir::new().expect("tempdir");
    let mut db = session(seeded(&dir));
    let users = OutputTarget::new("users");
    db.find_by([("id", 1)], &users).exec().expect("exec");
    let rows = users.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("avatar"), Some(&Value::Bytes(vec![1, 2])));
}

#[test]
fn transactional_exec_commits_reads() {
    let dir = TempDir::new().expect("tempdir");
    let mut db = session(seeded(&dir));
    let users = OutputTarget::new("users");
    db.transaction()
        .expect("layer")
        .filter([("name", "grace")])
        .find(&users)
        .exec()
        .expect("exec");
    assert_eq!(names(&users.rows()), vec!["grace".to_owned()]);
}

#[test]
fn configured_keywords_are_screened() {
    let dir = TempDir::new().expect("tempdir");
    let screen = InjectionScreen::with_keywords(["sleep"]).expect("screen");
    let mut db = session(seeded(&dir).with_screen(screen));
    let users = OutputTarget::new("users");
    let err = db
        .where_str("sleep(5) = 0")
        .find(&users)
        .exec()
        .expect_err("screened");
    assert!(matches!(err, QueryError::InjectionDetected { .. }));
}

#[test]
fn missing_table_is_a_runtime_error() {
    let dir = TempDir::new().expect("tempdir");
    let mut db = session(seeded(&dir));
    let orders = OutputTarget::new("orders");
    let err = db.find(&orders).exec().expect_err("no such table");
    assert!(matches!(err, QueryError::Runtime(RuntimeError::Sqlite(_))));
}

#[test]
fn raw_text_cannot_close_its_group() {
    let dir = TempDir::new().expect("tempdir");
    let mut db = session(seeded(&dir));
    let users = OutputTarget::new("users");
    let err = db
        .filter([("id", 1)])
        .and_str("1) OR (1")
        .find(&users)
        .exec()
        .expect_err("screened");
    assert!(matches!(
        err,
        QueryError::InjectionDetected { ref candidate, .. } if candidate == "1) OR (1"
    ));
    assert!(users.is_empty());

    db.filter([("id", 1)])
        .and_str("(age > 30) AND (age < 40)")
        .find(&users)
        .exec()
        .expect("balanced groups pass");
    assert_eq!(names(&users.rows()), vec!["ada".to_owned()]);
}
