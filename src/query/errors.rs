#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

use super::fragment::FragmentKind;
use crate::runtime::RuntimeError;

/// Result alias used throughout the query core.
pub type Result<T> = std::result::Result<T, QueryError>;

/// Structured errors emitted while draining fragments and handing the cradle
/// to a runtime.
///
/// None of these are retried internally. Any error returned from
/// [`crate::query::QueryEngine::sync`] leaves the cradle unusable; the
/// session must be reset and rebuilt.
#[derive(Debug, Error)]
pub enum QueryError {
    /// A filter fragment directly followed another filter fragment.
    #[error("query chain logic corrupted: {incoming} cannot follow {previous}")]
    ChainLogicCorrupted {
        previous: FragmentKind,
        incoming: FragmentKind,
    },
    /// A connector fragment arrived before any filter succeeded.
    #[error("{kind} requires a preceding {requires} clause")]
    DependencyNotSatisfied {
        kind: FragmentKind,
        requires: FragmentKind,
    },
    /// The runtime screen flagged a key or raw string.
    #[error("injection detected in {kind} fragment: '{candidate}'")]
    InjectionDetected {
        kind: FragmentKind,
        candidate: String,
    },
    /// A consumer read from an empty queue.
    #[error("attempted to read from an empty queue")]
    EmptyQueue,
    /// The engine has no inbound queue bound to it.
    #[error("query engine is not attached to a fragment queue")]
    QueueDetached,
    /// No runtime has been registered with the engine.
    #[error("query engine has no runtime attached")]
    RuntimeMissing,
    /// A previous sync failed and the cradle was not reset.
    #[error("query cradle is poisoned by a failed sync; reset the session")]
    CradlePoisoned,
    /// Execution was requested without a target fragment.
    #[error("query has no output target; add a find/set-target fragment")]
    MissingTarget,
    /// The session has no processing layer to drive.
    #[error("database has no processing layer attached")]
    LayerMissing,
    /// Backend compile or execute failure.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl QueryError {
    /// Builds a [`QueryError::InjectionDetected`] for the given fragment kind.
    pub fn injection(kind: FragmentKind, candidate: impl Into<String>) -> Self {
        QueryError::InjectionDetected {
            kind,
            candidate: candidate.into(),
        }
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::ChainLogicCorrupted { .. } => "ChainLogicCorrupted",
            QueryError::DependencyNotSatisfied { .. } => "DependencyNotSatisfied",
            QueryError::InjectionDetected { .. } => "InjectionDetected",
            QueryError::EmptyQueue => "EmptyQueue",
            QueryError::QueueDetached => "QueueDetached",
            QueryError::RuntimeMissing => "RuntimeMissing",
            QueryError::CradlePoisoned => "CradlePoisoned",
            QueryError::MissingTarget => "MissingTarget",
            QueryError::LayerMissing => "LayerMissing",
            QueryError::Runtime(_) => "Runtime",
        }
    }

    /// True for errors raised by fragment validation rather than by the
    /// runtime or by session wiring.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            QueryError::ChainLogicCorrupted { .. }
                | QueryError::DependencyNotSatisfied { .. }
                | QueryError::InjectionDetected { .. }
        )
    }
}

/// Convenience wrapper that formats query errors with their codes.
pub struct QueryErrorWithCode<'a>(pub &'a QueryError);

impl fmt::Display for QueryErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}
