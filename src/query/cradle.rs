//! The per-session accumulator that turns drained fragments into a
//! backend-agnostic clause list.
//!
//! The cradle is a data object. Its invariants are enforced by its only
//! mutator, [`crate::query::QueryEngine::sync`]; every other caller gets read
//! access.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use super::fragment::{FragmentKind, OutputTarget};
use super::value::Value;

/// Positional parameter marker. The index addresses [`QueryCradle::params`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Placeholder(pub usize);

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.0 + 1)
    }
}

/// One field of a sanitized filter: the field name and the placeholder that
/// stands in for its value.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Binding {
    /// Screened field name.
    pub field: String,
    /// Placeholder replacing the caller's value.
    pub placeholder: Placeholder,
}

/// Payload stored next to an operator.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum ClauseBody {
    /// Sanitized structured filter.
    Filter(Vec<Binding>),
    /// Screened raw filter text.
    Raw(String),
    /// Opaque payload from a `Misc` fragment.
    Opaque(serde_json::Value),
    /// No payload (target declarations).
    Empty,
}

/// Operator paired with its payload.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Clause {
    /// Resolved fragment kind.
    pub operator: FragmentKind,
    /// Stored payload.
    pub body: ClauseBody,
}

/// Mutable accumulator for one query session.
#[derive(Debug)]
pub struct QueryCradle {
    clauses: Vec<Clause>,
    params: Vec<Value>,
    current: FragmentKind,
    previous: FragmentKind,
    satisfied: HashSet<FragmentKind>,
    output: Option<OutputTarget>,
    poisoned: bool,
}

impl Default for QueryCradle {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCradle {
    /// Creates an initialized, empty cradle.
    pub fn new() -> Self {
        let mut cradle = Self {
            clauses: Vec::new(),
            params: Vec::new(),
            current: FragmentKind::Unknown,
            previous: FragmentKind::Unknown,
            satisfied: HashSet::new(),
            output: None,
            poisoned: false,
        };
        cradle.init();
        cradle
    }

    /// Resets every field to the initial state.
    pub fn init(&mut self) {
        self.current = FragmentKind::Unknown;
        self.previous = FragmentKind::Unknown;
        self.clauses.clear();
        self.params.clear();
        self.satisfied.clear();
        self.output = None;
        self.poisoned = false;
    }

    /// Accumulated clauses in push order.
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Operators in push order.
    pub fn operators(&self) -> impl Iterator<Item = FragmentKind> + '_ {
        self.clauses.iter().map(|clause| clause.operator)
    }

    /// Bound values in placeholder order.
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Resolves a placeholder to its bound value.
    pub fn param(&self, placeholder: Placeholder) -> Option<&Value> {
        self.params.get(placeholder.0)
    }

    /// Kind of the fragment most recently processed.
    pub fn current(&self) -> FragmentKind {
        self.current
    }

    /// Kind of the fragment processed before [`QueryCradle::current`].
    pub fn previous(&self) -> FragmentKind {
        self.previous
    }

    /// True once the given kind has been established as a prerequisite.
    pub fn is_satisfied(&self, kind: FragmentKind) -> bool {
        self.satisfied.contains(&kind)
    }

    /// Destination declared by a `SetTarget` fragment, if any.
    pub fn output(&self) -> Option<&OutputTarget> {
        self.output.as_ref()
    }

    /// True when a failed sync left this cradle partially built.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Number of accumulated clauses.
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    /// True when no clause has been pushed.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub(crate) fn begin(&mut self, kind: FragmentKind) {
        self.current = kind;
    }

    pub(crate) fn finish(&mut self) {
        self.previous = self.current;
    }

    pub(crate) fn push(&mut self, operator: FragmentKind, body: ClauseBody) {
        self.clauses.push(Clause { operator, body });
    }

    pub(crate) fn bind(&mut self, value: Value) -> Placeholder {
        self.params.push(value);
        Placeholder(self.params.len() - 1)
    }

    pub(crate) fn satisfy(&mut self, kind: FragmentKind) {
        self.satisfied.insert(kind);
    }

    pub(crate) fn set_output(&mut self, target: OutputTarget) {
        self.output = Some(target);
    }

    pub(crate) fn poison(&mut self) {
        self.poisoned = true;
    }
}
