//! Compiles cradles into parameterized `SELECT` statements and runs them
//! through `rusqlite`.
//!
//! Clause mapping:
//! - `Where`/`WhereStr` open the predicate; a later `Where` is joined with `AND`.
//! - `And*`/`Or*` join with `AND`/`OR`. Each clause is parenthesized and
//!   clauses fold left to right, so `a OR b AND c` means `(a OR b) AND c`.
//! - Fields of one structured filter are joined with `AND`; null values
//!   compare with `IS` so they still bind through a placeholder.
//! - `SetTarget` contributes the `FROM` table; empty filters contribute nothing.
//! - `Misc` payloads must be JSON strings and are appended after the
//!   predicate (`ORDER BY`, `LIMIT`, ...).

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::Connection;
use tracing::debug;

use super::{CompiledQuery, InjectionScreen, QueryRuntime, RuntimeError};
use crate::query::{Binding, ClauseBody, FragmentKind, OutputTarget, QueryCradle, Record, Value};

/// SQLite-backed runtime.
pub struct SqliteRuntime {
    conn: Mutex<Connection>,
    screen: InjectionScreen,
}

impl SqliteRuntime {
    /// Opens (or creates) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        Ok(Self::from_connection(Connection::open(path)?))
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self, RuntimeError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    /// Wraps an existing connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            screen: InjectionScreen::default(),
        }
    }

    /// Replaces the injection screen.
    pub fn with_screen(mut self, screen: InjectionScreen) -> Self {
        self.screen = screen;
        self
    }

    /// Runs `f` with exclusive access to the connection, e.g. to create
    /// tables or seed rows.
    pub fn with_connection<T, F>(&self, f: F) -> Result<T, RuntimeError>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T>,
    {
        let mut conn = self.conn.lock();
        Ok(f(&mut conn)?)
    }

    fn quote_ident(&self, ident: &str) -> Result<String, RuntimeError> {
        if self.screen.is_suspicious_field(ident) {
            return Err(RuntimeError::Compile(format!(
                "'{ident}' is not a valid identifier"
            )));
        }
        Ok(ident
            .split('.')
            .map(|part| format!("\"{part}\""))
            .collect::<Vec<_>>()
            .join("."))
    }

    fn filter_sql(
        &self,
        cradle: &QueryCradle,
        bindings: &[Binding],
    ) -> Result<String, RuntimeError> {
        let mut terms = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let op = match cradle.param(binding.placeholder) {
                Some(Value::Null) => "IS",
                Some(_) => "=",
                None => {
                    return Err(RuntimeError::Compile(format!(
                        "placeholder {} has no bound value",
                        binding.placeholder
                    )))
                }
            };
            terms.push(format!(
                "{} {op} {}",
                self.quote_ident(&binding.field)?,
                binding.placeholder
            ));
        }
        Ok(terms.join(" AND "))
    }
}

impl QueryRuntime for SqliteRuntime {
    fn check_for_injection(&self, candidate: &str) -> bool {
        self.screen.is_suspicious(candidate)
    }

    fn check_field_for_injection(&self, field: &str) -> bool {
        self.screen.is_suspicious_field(field)
    }

    fn compile(&self, cradle: &QueryCradle) -> Result<CompiledQuery, RuntimeError> {
        let target = cradle
            .output()
            .ok_or_else(|| RuntimeError::Compile("query has no target table".into()))?;
        let mut predicate = String::new();
        let mut joined = 0usize;
        let mut trailing = Vec::new();

        for clause in cradle.clauses() {
            let connector = match clause.operator {
                FragmentKind::Where
                | FragmentKind::WhereStr
                | FragmentKind::And
                | FragmentKind::AndStr => "AND",
                FragmentKind::Or | FragmentKind::OrStr => "OR",
                FragmentKind::SetTarget => continue,
                FragmentKind::Misc => {
                    match &clause.body {
                        ClauseBody::Opaque(serde_json::Value::String(sql))
                            if !self.screen.is_suspicious(sql) =>
                        {
                            trailing.push(sql.trim().to_owned());
                        }
                        _ => {
                            return Err(RuntimeError::UnsupportedClause {
                                operator: clause.operator,
                                reason: "expected a screened SQL string",
                            })
                        }
                    }
                    continue;
                }
                FragmentKind::Unknown => {
                    return Err(RuntimeError::UnsupportedClause {
                        operator: clause.operator,
                        reason: "unknown operator",
                    })
                }
            };
            let sql = match &clause.body {
                ClauseBody::Filter(bindings) if bindings.is_empty() => continue,
                ClauseBody::Filter(bindings) => self.filter_sql(cradle, bindings)?,
                ClauseBody::Raw(text) => text.clone(),
                ClauseBody::Opaque(_) | ClauseBody::Empty => {
                    return Err(RuntimeError::UnsupportedClause {
                        operator: clause.operator,
                        reason: "filter clause without a predicate",
                    })
                }
            };
            predicate = match joined {
                0 => format!("({sql})"),
                1 => format!("{predicate} {connector} ({sql})"),
                _ => format!("({predicate}) {connector} ({sql})"),
            };
            joined += 1;
        }

        let mut text = format!("SELECT * FROM {}", self.quote_ident(target.name())?);
        if !predicate.is_empty() {
            text.push_str(" WHERE ");
            text.push_str(&predicate);
        }
        for extra in trailing {
            text.push(' ');
            text.push_str(&extra);
        }
        Ok(CompiledQuery::new(text, cradle.params().to_vec()))
    }

    fn execute(&self, query: &CompiledQuery, target: &OutputTarget) -> Result<(), RuntimeError> {
        let mut conn = self.conn.lock();
        let rows = if query.transactional {
            let tx = conn.transaction()?;
            let rows = select_rows(&tx, query)?;
            tx.commit()?;
            rows
        } else {
            select_rows(&conn, query)?
        };
        debug!(
            table = target.name(),
            rows = rows.len(),
            transactional = query.transactional,
            "sqlite.execute"
        );
        target.extend(rows);
        Ok(())
    }
}

fn select_rows(conn: &Connection, query: &CompiledQuery) -> Result<Vec<Record>, RuntimeError> {
    let mut stmt = conn.prepare(&query.text)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_owned).collect();
    let mut rows = stmt.query(rusqlite::params_from_iter(query.params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Record::new();
        for (idx, name) in columns.iter().enumerate() {
            record.insert(name.clone(), value_from_sql(row.get_ref(idx)?));
        }
        out.push(record);
    }
    Ok(out)
}

fn value_from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Bool(v) => ToSqlOutput::Borrowed(ValueRef::Integer(i64::from(*v))),
            Value::Int(v) => ToSqlOutput::Borrowed(ValueRef::Integer(*v)),
            Value::Float(v) => ToSqlOutput::Borrowed(ValueRef::Real(*v)),
            Value::String(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Bytes(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
        })
    }
}
