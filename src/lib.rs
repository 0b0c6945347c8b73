//! Query-construction and validation core for a database-client layer.
//!
//! Builder calls on a [`db::Database`] enqueue fragments, a
//! [`query::QueryEngine`] validates and accumulates them, and a pluggable
//! [`runtime::QueryRuntime`] compiles and executes the result.

#![warn(missing_docs)]

pub mod config;
pub mod db;
pub mod logging;
pub mod query;
pub mod runtime;

pub use db::{Database, Layer};
pub use query::{
    Expression, Fragment, FragmentKind, OutputTarget, QueryCradle, QueryEngine, QueryError,
    Record, Result, Value,
};
pub use runtime::{CompiledQuery, MemoryRuntime, QueryRuntime, RuntimeError, SqliteRuntime};
