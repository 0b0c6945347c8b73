//! Binary entry point for the `cradle` query CLI.
#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use cradle::{
    config::CradleConfig,
    db::Database,
    logging::init_logging,
    query::{Expression, Fragment, OutputTarget, QueryEngine, Value},
    runtime::{CompiledQuery, SqliteRuntime},
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Parser, Debug)]
#[command(
    name = "cradle",
    version,
    about = "Build, screen, and run fragment queries against SQLite",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "CRADLE_CONFIG",
        value_name = "FILE",
        help = "Path to config.toml"
    )]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Override the configured log filter")]
    log_level: Option<String>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Run a fragment file against a SQLite database and print the rows")]
    Query(QueryCmd),

    #[command(about = "Print the SQL and parameters a fragment file compiles to")]
    Compile(CompileCmd),

    #[command(about = "Check text against the injection screen")]
    Screen(ScreenCmd),
}

#[derive(Args, Debug)]
struct QueryCmd {
    #[arg(long, value_name = "DB", help = "SQLite database (defaults to [sqlite] path)")]
    db: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "JSON array of fragment specs")]
    file: PathBuf,

    #[arg(long, help = "Run the query inside a transaction")]
    transaction: bool,
}

#[derive(Args, Debug)]
struct CompileCmd {
    #[arg(long, value_name = "FILE", help = "JSON array of fragment specs")]
    file: PathBuf,
}

#[derive(Args, Debug)]
struct ScreenCmd {
    #[arg(value_name = "TEXT")]
    text: String,

    #[arg(long, help = "Screen the text as a field name")]
    field: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// One entry of a fragment file, e.g. `{"where": {"age": 30}}` or
/// `{"find": {"target": "users"}}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
enum FragmentSpec {
    Where(BTreeMap<String, JsonValue>),
    WhereStr(String),
    And(BTreeMap<String, JsonValue>),
    AndStr(String),
    Or(BTreeMap<String, JsonValue>),
    OrStr(String),
    Find {
        target: String,
        #[serde(default)]
        filter: BTreeMap<String, JsonValue>,
    },
    Misc(JsonValue),
}

#[derive(Serialize)]
struct ScreenReport<'a> {
    input: &'a str,
    field: bool,
    suspicious: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = CradleConfig::load(cli.config.clone())?;
    init_logging(cli.log_level.as_deref().unwrap_or(&config.log_level))?;

    match cli.command {
        Command::Query(cmd) => {
            let db_path = cmd
                .db
                .or_else(|| config.sqlite.path.clone())
                .ok_or("no database given; pass --db or set [sqlite] path")?;
            let runtime = SqliteRuntime::open(&db_path)?.with_screen(config.screen()?);
            let mut db = Database::new();
            QueryEngine::new().with_runtime(runtime).attach_to(&mut db);
            let target = enqueue(&mut db, &cmd.file)?
                .ok_or("fragment file has no `find` entry")?;
            if cmd.transaction || config.sqlite.transactional {
                db.transaction()?;
            }
            db.exec()?;
            let rows: Vec<BTreeMap<String, JsonValue>> = target
                .take()
                .into_iter()
                .map(|row| row.into_iter().map(|(k, v)| (k, plain_json(v))).collect())
                .collect();
            emit(&cli.format, &rows, || print_rows_text(&rows))?;
        }
        Command::Compile(cmd) => {
            let runtime = SqliteRuntime::open_in_memory()?.with_screen(config.screen()?);
            let mut db = Database::new();
            QueryEngine::new().with_runtime(runtime).attach_to(&mut db);
            enqueue(&mut db, &cmd.file)?;
            let compiled = db.compile()?;
            emit(&cli.format, &compiled, || print_compiled_text(&compiled))?;
        }
        Command::Screen(cmd) => {
            let screen = config.screen()?;
            let suspicious = if cmd.field {
                screen.is_suspicious_field(&cmd.text)
            } else {
                screen.is_suspicious(&cmd.text)
            };
            let report = ScreenReport {
                input: &cmd.text,
                field: cmd.field,
                suspicious,
            };
            emit(&cli.format, &report, || {
                println!("{}", if suspicious { "rejected" } else { "accepted" })
            })?;
            if suspicious {
                std::process::exit(2);
            }
        }
    }
    Ok(())
}

/// Queues every fragment in `path` and returns the last `find` target.
fn enqueue(db: &mut Database, path: &Path) -> Result<Option<OutputTarget>, Box<dyn Error>> {
    let raw = fs::read_to_string(path)
        .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
    let specs: Vec<FragmentSpec> = serde_json::from_str(&raw)
        .map_err(|err| format!("invalid fragment file {}: {err}", path.display()))?;
    let mut target = None;
    for spec in specs {
        let fragment = match spec {
            FragmentSpec::Where(expr) => Fragment::Where(expression(expr)?),
            FragmentSpec::WhereStr(text) => Fragment::WhereStr(text),
            FragmentSpec::And(expr) => Fragment::And(expression(expr)?),
            FragmentSpec::AndStr(text) => Fragment::AndStr(text),
            FragmentSpec::Or(expr) => Fragment::Or(expression(expr)?),
            FragmentSpec::OrStr(text) => Fragment::OrStr(text),
            FragmentSpec::Find {
                target: name,
                filter,
            } => {
                let output = OutputTarget::new(name);
                target = Some(output.clone());
                Fragment::SetTarget {
                    filter: expression(filter)?,
                    target: output,
                }
            }
            FragmentSpec::Misc(payload) => Fragment::Misc(payload),
        };
        db.push(fragment);
    }
    Ok(target)
}

fn expression(fields: BTreeMap<String, JsonValue>) -> Result<Expression, Box<dyn Error>> {
    let mut expr = Expression::new();
    for (field, value) in fields {
        let value =
            Value::try_from(value).map_err(|reason| format!("field '{field}': {reason}"))?;
        expr.insert(field, value);
    }
    Ok(expr)
}

fn plain_json(value: Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(v) => JsonValue::Bool(v),
        Value::Int(v) => JsonValue::from(v),
        Value::Float(v) => JsonValue::from(v),
        Value::String(v) => JsonValue::String(v),
        Value::Bytes(v) => JsonValue::from(v),
    }
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_rows_text(rows: &[BTreeMap<String, JsonValue>]) {
    for row in rows {
        let line = row
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        println!("{line}");
    }
    println!("({} rows)", rows.len());
}

fn print_compiled_text(compiled: &CompiledQuery) {
    println!("{}", compiled.text);
    for (idx, param) in compiled.params.iter().enumerate() {
        println!("  ?{} = {param}", idx + 1);
    }
}
