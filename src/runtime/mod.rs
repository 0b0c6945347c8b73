//! Pluggable backends that screen, compile, and execute cradles.
//!
//! The engine depends only on the [`QueryRuntime`] capability trait. Two
//! backends ship with the crate: [`SqliteRuntime`] compiles to parameterized
//! SQL and runs it through `rusqlite`, and [`MemoryRuntime`] evaluates a JSON
//! plan against in-memory collections.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query::{FragmentKind, OutputTarget, QueryCradle, Value};

/// In-memory document store backend.
pub mod memory;

/// Deny-list injection screen shared by the bundled backends.
pub mod screen;

/// SQLite backend.
pub mod sqlite;

pub use memory::MemoryRuntime;
pub use screen::InjectionScreen;
pub use sqlite::SqliteRuntime;

/// Backend-native query produced by [`QueryRuntime::compile`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompiledQuery {
    /// Native query text. Values never appear inline; they are referenced by
    /// placeholder and carried in `params`.
    pub text: String,
    /// Bound values in placeholder order.
    pub params: Vec<Value>,
    /// Whether the session asked for transactional execution.
    pub transactional: bool,
}

impl CompiledQuery {
    /// Creates a non-transactional compiled query.
    pub fn new(text: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            text: text.into(),
            params,
            transactional: false,
        }
    }
}

impl fmt::Display for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Errors raised by runtime compile and execute steps.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The cradle could not be translated.
    #[error("compile failed: {0}")]
    Compile(String),
    /// The store rejected or failed the query.
    #[error("execute failed: {0}")]
    Execute(String),
    /// A clause kind or payload the backend cannot express.
    #[error("{operator} clause not supported: {reason}")]
    UnsupportedClause {
        /// Operator of the offending clause.
        operator: FragmentKind,
        /// Why the backend refused it.
        reason: &'static str,
    },
    /// The target names a collection the backend does not know.
    #[error("unknown collection '{0}'")]
    UnknownCollection(String),
    /// SQLite error.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    /// Plan (de)serialization error.
    #[error("plan encoding: {0}")]
    Plan(#[from] serde_json::Error),
    /// Screen construction error.
    #[error("invalid screen pattern: {0}")]
    Screen(#[from] regex::Error),
}

/// Capability interface implemented by every backend.
///
/// One runtime is attached per engine. The engine calls the screening
/// methods while draining fragments and treats a `true` answer as fatal for
/// the current sync.
pub trait QueryRuntime: Send {
    /// Returns true if `candidate` is unsafe to place into a backend query.
    fn check_for_injection(&self, candidate: &str) -> bool;

    /// Screens an expression field name. Defaults to
    /// [`QueryRuntime::check_for_injection`].
    fn check_field_for_injection(&self, field: &str) -> bool {
        self.check_for_injection(field)
    }

    /// Translates the accumulated clauses and output target into a native
    /// query.
    fn compile(&self, cradle: &QueryCradle) -> Result<CompiledQuery, RuntimeError>;

    /// Runs a compiled query and writes result rows into `target`.
    fn execute(&self, query: &CompiledQuery, target: &OutputTarget) -> Result<(), RuntimeError>;
}

impl<R> QueryRuntime for Box<R>
where
    R: QueryRuntime + ?Sized,
{
    fn check_for_injection(&self, candidate: &str) -> bool {
        (**self).check_for_injection(candidate)
    }

    fn check_field_for_injection(&self, field: &str) -> bool {
        (**self).check_field_for_injection(field)
    }

    fn compile(&self, cradle: &QueryCradle) -> Result<CompiledQuery, RuntimeError> {
        (**self).compile(cradle)
    }

    fn execute(&self, query: &CompiledQuery, target: &OutputTarget) -> Result<(), RuntimeError> {
        (**self).execute(query, target)
    }
}
