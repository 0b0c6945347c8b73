//! Fragment model: the discrete units of query intent that sessions enqueue
//! and the engine consumes.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::value::Value;

/// Kind tag for a fragment.
///
/// The ordering of variants carries no meaning; only transition legality
/// inside the engine depends on the kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    /// Initial state of a fresh cradle. No fragment carries this kind.
    Unknown,
    /// Structured filter.
    Where,
    /// Raw filter text.
    WhereStr,
    /// Structured filter joined with AND.
    And,
    /// Raw filter text joined with AND.
    AndStr,
    /// Structured filter joined with OR.
    Or,
    /// Raw filter text joined with OR.
    OrStr,
    /// Output target declaration.
    SetTarget,
    /// Opaque backend-specific payload.
    Misc,
}

impl FragmentKind {
    /// Returns the snake_case name used in logs and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            FragmentKind::Unknown => "unknown",
            FragmentKind::Where => "where",
            FragmentKind::WhereStr => "where_str",
            FragmentKind::And => "and",
            FragmentKind::AndStr => "and_str",
            FragmentKind::Or => "or",
            FragmentKind::OrStr => "or_str",
            FragmentKind::SetTarget => "set_target",
            FragmentKind::Misc => "misc",
        }
    }

    /// True for the filter kinds that open a clause chain.
    pub fn is_filter(self) -> bool {
        matches!(self, FragmentKind::Where | FragmentKind::WhereStr)
    }

    /// True for the AND/OR connector kinds.
    pub fn is_connector(self) -> bool {
        matches!(
            self,
            FragmentKind::And | FragmentKind::AndStr | FragmentKind::Or | FragmentKind::OrStr
        )
    }

    /// True for kinds whose payload is raw text.
    pub fn is_raw(self) -> bool {
        matches!(
            self,
            FragmentKind::WhereStr | FragmentKind::AndStr | FragmentKind::OrStr
        )
    }
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field name to value mapping used as a structured filter.
///
/// Iteration order is the lexical order of field names so compiled queries
/// are deterministic.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expression(BTreeMap<String, Value>);

impl Expression {
    /// Creates an empty expression.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field comparison, replacing any previous value for the field.
    pub fn with<K, V>(mut self, field: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.insert(field, value);
        self
    }

    /// Inserts a field comparison in place.
    pub fn insert<K, V>(&mut self, field: K, value: V) -> Option<Value>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.0.insert(field.into(), value.into())
    }

    /// Looks up the value bound to a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Field names in iteration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the expression has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for Expression {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<K, V> FromIterator<(K, V)> for Expression
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for Expression
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// One result row written into an [`OutputTarget`].
pub type Record = BTreeMap<String, Value>;

/// Caller-supplied destination for execution results.
///
/// Names the collection or table the query selects from and carries a shared
/// row buffer. Clones share the buffer, so callers keep one handle and read
/// rows back after execution.
#[derive(Clone, Debug)]
pub struct OutputTarget {
    name: String,
    rows: Arc<Mutex<Vec<Record>>>,
}

impl OutputTarget {
    /// Creates a target for the named collection with an empty buffer.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Collection or table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends rows produced by a runtime.
    pub fn extend<I>(&self, rows: I)
    where
        I: IntoIterator<Item = Record>,
    {
        self.rows.lock().extend(rows);
    }

    /// Returns a copy of the buffered rows.
    pub fn rows(&self) -> Vec<Record> {
        self.rows.lock().clone()
    }

    /// Removes and returns the buffered rows.
    pub fn take(&self) -> Vec<Record> {
        std::mem::take(&mut *self.rows.lock())
    }

    /// Number of buffered rows.
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// True when no rows have been written.
    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    /// True when both handles share the same row buffer.
    pub fn same_buffer(&self, other: &OutputTarget) -> bool {
        Arc::ptr_eq(&self.rows, &other.rows)
    }
}

/// One unit of query intent, produced by a builder call and consumed exactly
/// once by the engine.
#[derive(Clone, Debug)]
pub enum Fragment {
    /// Structured filter opening a clause chain.
    Where(Expression),
    /// Raw filter text opening a clause chain.
    WhereStr(String),
    /// Structured filter joined with AND.
    And(Expression),
    /// Raw filter text joined with AND.
    AndStr(String),
    /// Structured filter joined with OR.
    Or(Expression),
    /// Raw filter text joined with OR.
    OrStr(String),
    /// Output target declaration. The filter doubles as an implicit `Where`
    /// when no filter preceded it.
    SetTarget {
        /// Implicit filter, used only when no `Where` was satisfied.
        filter: Expression,
        /// Destination for execution results.
        target: OutputTarget,
    },
    /// Opaque payload passed to the runtime verbatim.
    Misc(serde_json::Value),
}

impl Fragment {
    /// Kind tag for this fragment.
    pub fn kind(&self) -> FragmentKind {
        match self {
            Fragment::Where(_) => FragmentKind::Where,
            Fragment::WhereStr(_) => FragmentKind::WhereStr,
            Fragment::And(_) => FragmentKind::And,
            Fragment::AndStr(_) => FragmentKind::AndStr,
            Fragment::Or(_) => FragmentKind::Or,
            Fragment::OrStr(_) => FragmentKind::OrStr,
            Fragment::SetTarget { .. } => FragmentKind::SetTarget,
            Fragment::Misc(_) => FragmentKind::Misc,
        }
    }

    /// Builds a `SetTarget` fragment with no implicit filter.
    pub fn target(target: OutputTarget) -> Self {
        Fragment::SetTarget {
            filter: Expression::new(),
            target,
        }
    }
}
