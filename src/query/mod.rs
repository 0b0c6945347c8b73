#![forbid(unsafe_code)]

//! Query construction and validation core.
//!
//! Sessions enqueue [`Fragment`]s; the [`QueryEngine`] drains them into a
//! [`QueryCradle`] under the chaining rules, with every key and raw string
//! screened by the attached runtime, before the runtime compiles and executes
//! the result.

/// Per-session accumulator of sanitized clauses.
pub mod cradle;

/// Drain loop and transition dispatch.
pub mod engine;

/// Error types for the query core.
pub mod errors;

/// Fragment kinds, payloads, and output targets.
pub mod fragment;

/// Opt-in timing and fragment counters.
pub mod profile;

/// FIFO mailbox for fragments.
pub mod queue;

/// Scalar values.
pub mod value;

pub use cradle::{Binding, Clause, ClauseBody, Placeholder, QueryCradle};
pub use engine::QueryEngine;
pub use errors::{QueryError, QueryErrorWithCode, Result};
pub use fragment::{Expression, Fragment, FragmentKind, OutputTarget, Record};
pub use queue::{Queue, SharedQueue};
pub use value::Value;
