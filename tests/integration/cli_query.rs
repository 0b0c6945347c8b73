#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use rusqlite::Connection;
use serde_json::Value;
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    db: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let db = dir.path().join("app.db");
        let conn = Connection::open(&db).expect("open");
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER);
             INSERT INTO users VALUES (1, 'ada', 36);
             INSERT INTO users VALUES (2, 'grace', 45);
             INSERT INTO users VALUES (3, 'alan', 41);",
        )
        .expect("seed");
        Self { dir, db }
    }

    fn config(&self) -> PathBuf {
        self.dir.path().join("absent.toml")
    }

    fn fragments(&self, json: &str) -> PathBuf {
        let path = self.dir.path().join("fragments.json");
        fs::write(&path, json).expect("write fragments");
        path
    }
}

fn stdout_json(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("json output")
}

fn arg(path: &Path) -> &str {
    path.to_str().expect("utf-8 path")
}

#[test]
fn query_prints_matching_rows_as_json() {
    let fx = Fixture::new();
    let file = fx.fragments(
        r#"[
            {"where_str": "age > 40"},
            {"and": {"name": "alan"}},
            {"find": {"target": "users"}}
        ]"#,
    );
    let output = cargo_bin_cmd!("cradle")
        .args(["--config", arg(&fx.config()), "--format", "json", "query"])
        .args(["--db", arg(&fx.db), "--file", arg(&file)])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let rows = stdout_json(&output);
    assert_eq!(
        rows,
        serde_json::json!([{"id": 3, "name": "alan", "age": 41}])
    );
}

#[test]
fn query_text_output_counts_rows() {
    let fx = Fixture::new();
    let file = fx.fragments(r#"[{"find": {"target": "users", "filter": {"id": 1}}}]"#);
    let output = cargo_bin_cmd!("cradle")
        .args(["--config", arg(&fx.config()), "query", "--transaction"])
        .args(["--db", arg(&fx.db), "--file", arg(&file)])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf-8");
    assert!(text.contains("name=\"ada\""), "{text}");
    assert!(text.contains("(1 rows)"), "{text}");
}

#[test]
fn compile_prints_sql_and_params() {
    let fx = Fixture::new();
    let file = fx.fragments(
        r#"[
            {"where": {"age": 30}},
            {"or_str": "name = 'root'"},
            {"find": {"target": "users"}},
            {"misc": "LIMIT 5"}
        ]"#,
    );
    let output = cargo_bin_cmd!("cradle")
        .args(["--config", arg(&fx.config()), "--format", "json", "compile"])
        .args(["--file", arg(&file)])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let compiled = stdout_json(&output);
    assert_eq!(
        compiled["text"],
        "SELECT * FROM \"users\" WHERE (\"age\" = ?1) OR (name = 'root') LIMIT 5"
    );
    assert_eq!(compiled["params"], serde_json::json!([{"t": "Int", "v": 30}]));
}

#[test]
fn rejected_chain_exits_with_error() {
    let fx = Fixture::new();
    let file = fx.fragments(r#"[{"where_str": "a = 1"}, {"where_str": "b = 2"}]"#);
    let output = cargo_bin_cmd!("cradle")
        .args(["--config", arg(&fx.config()), "compile", "--file", arg(&file)])
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf-8");
    assert!(stderr.contains("chain logic corrupted"), "{stderr}");
}

#[test]
fn screen_reports_verdicts() {
    let fx = Fixture::new();
    cargo_bin_cmd!("cradle")
        .args(["--config", arg(&fx.config()), "screen", "age > 30"])
        .assert()
        .success();

    let output = cargo_bin_cmd!("cradle")
        .args(["--config", arg(&fx.config()), "--format", "json", "screen"])
        .arg("1=1; DROP TABLE users")
        .assert()
        .code(2)
        .get_output()
        .stdout
        .clone();
    assert_eq!(stdout_json(&output)["suspicious"], true);
}

#[test]
fn config_file_adds_screen_keywords() {
    let fx = Fixture::new();
    let config = fx.dir.path().join("config.toml");
    fs::write(&config, "[screen]\nextra_keywords = [\"sleep\"]\n").expect("write config");
    cargo_bin_cmd!("cradle")
        .args(["--config", arg(&config), "screen", "sleep(3)"])
        .assert()
        .code(2);
}
