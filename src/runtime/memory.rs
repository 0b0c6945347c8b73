//! In-memory document store.
//!
//! The native query text is a JSON plan: the target collection, an ordered
//! list of `{connector, predicate}` steps, and optional ordering and limit
//! taken from `Misc` directives. Steps are evaluated left to right: `where`
//! and `and` intersect the running result, `or` unions with it.
//!
//! Raw filter strings must have the form `field <op> literal` with one of
//! `=`, `!=`, `<>`, `<`, `<=`, `>`, `>=`.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CompiledQuery, InjectionScreen, QueryRuntime, RuntimeError};
use crate::query::{ClauseBody, FragmentKind, OutputTarget, QueryCradle, Record, Value};

static COMPARISON_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_.]*)\s*(<=|>=|!=|<>|=|<|>)\s*(.+?)\s*$")
        .expect("comparison pattern")
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Connector {
    Where,
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "=" => CompareOp::Eq,
            "!=" | "<>" => CompareOp::Ne,
            "<" => CompareOp::Lt,
            "<=" => CompareOp::Le,
            ">" => CompareOp::Gt,
            ">=" => CompareOp::Ge,
            _ => return None,
        })
    }

    fn holds(self, actual: Option<&Value>, expected: &Value) -> bool {
        let actual = actual.unwrap_or(&Value::Null);
        if matches!(expected, Value::Null) || matches!(actual, Value::Null) {
            let both_null = matches!(expected, Value::Null) && matches!(actual, Value::Null);
            return match self {
                CompareOp::Eq => both_null,
                CompareOp::Ne => !both_null,
                _ => false,
            };
        }
        let Some(ordering) = actual.compare(expected) else {
            return self == CompareOp::Ne;
        };
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct FieldParam {
    field: String,
    param: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Predicate {
    /// Every field equals its bound parameter.
    Match { fields: Vec<FieldParam> },
    /// Single comparison parsed from raw filter text.
    Compare {
        field: String,
        op: CompareOp,
        literal: Value,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Step {
    connector: Connector,
    predicate: Predicate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct OrderBy {
    field: String,
    descending: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Plan {
    collection: String,
    steps: Vec<Step>,
    #[serde(default)]
    order_by: Option<OrderBy>,
    #[serde(default)]
    limit: Option<usize>,
}

/// `Misc` payload understood by this runtime.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Directive {
    #[serde(default)]
    order_by: Option<String>,
    #[serde(default)]
    descending: bool,
    #[serde(default)]
    limit: Option<usize>,
}

/// Runtime evaluating plans against in-memory collections.
#[derive(Default)]
pub struct MemoryRuntime {
    collections: Mutex<HashMap<String, Vec<Record>>>,
    screen: InjectionScreen,
}

impl MemoryRuntime {
    /// Creates a runtime with no collections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the injection screen.
    pub fn with_screen(mut self, screen: InjectionScreen) -> Self {
        self.screen = screen;
        self
    }

    /// Builder form of [`MemoryRuntime::insert_many`].
    pub fn with_collection<I>(self, name: impl Into<String>, rows: I) -> Self
    where
        I: IntoIterator<Item = Record>,
    {
        self.insert_many(name, rows);
        self
    }

    /// Appends one record to a collection, creating it if needed.
    pub fn insert(&self, collection: impl Into<String>, record: Record) {
        self.insert_many(collection, [record]);
    }

    /// Appends records to a collection, creating it if needed.
    pub fn insert_many<I>(&self, collection: impl Into<String>, rows: I)
    where
        I: IntoIterator<Item = Record>,
    {
        self.collections
            .lock()
            .entry(collection.into())
            .or_default()
            .extend(rows);
    }

    fn predicate_for(
        &self,
        operator: FragmentKind,
        body: &ClauseBody,
    ) -> Result<Option<Predicate>, RuntimeError> {
        match body {
            ClauseBody::Filter(bindings) if bindings.is_empty() => Ok(None),
            ClauseBody::Filter(bindings) => Ok(Some(Predicate::Match {
                fields: bindings
                    .iter()
                    .map(|binding| FieldParam {
                        field: binding.field.clone(),
                        param: binding.placeholder.0,
                    })
                    .collect(),
            })),
            ClauseBody::Raw(text) => parse_comparison(text).map(Some),
            ClauseBody::Opaque(_) | ClauseBody::Empty => Err(RuntimeError::UnsupportedClause {
                operator,
                reason: "filter clause without a predicate",
            }),
        }
    }
}

fn parse_comparison(text: &str) -> Result<Predicate, RuntimeError> {
    let caps = COMPARISON_RE
        .captures(text)
        .ok_or_else(|| RuntimeError::Compile(format!("cannot parse filter '{text}'")))?;
    let op = CompareOp::parse(&caps[2])
        .ok_or_else(|| RuntimeError::Compile(format!("unknown operator '{}'", &caps[2])))?;
    Ok(Predicate::Compare {
        field: caps[1].to_owned(),
        op,
        literal: Value::parse_literal(&caps[3]),
    })
}

impl QueryRuntime for MemoryRuntime {
    fn check_for_injection(&self, candidate: &str) -> bool {
        self.screen.is_suspicious(candidate)
    }

    fn check_field_for_injection(&self, field: &str) -> bool {
        self.screen.is_suspicious_field(field)
    }

    fn compile(&self, cradle: &QueryCradle) -> Result<CompiledQuery, RuntimeError> {
        let target = cradle
            .output()
            .ok_or_else(|| RuntimeError::Compile("query has no target collection".into()))?;
        let mut plan = Plan {
            collection: target.name().to_owned(),
            steps: Vec::new(),
            order_by: None,
            limit: None,
        };
        for clause in cradle.clauses() {
            let connector = match clause.operator {
                FragmentKind::Where | FragmentKind::WhereStr => Connector::Where,
                FragmentKind::And | FragmentKind::AndStr => Connector::And,
                FragmentKind::Or | FragmentKind::OrStr => Connector::Or,
                FragmentKind::SetTarget => continue,
                FragmentKind::Misc => {
                    let ClauseBody::Opaque(payload) = &clause.body else {
                        return Err(RuntimeError::UnsupportedClause {
                            operator: clause.operator,
                            reason: "misc clause without payload",
                        });
                    };
                    let directive: Directive = serde_json::from_value(payload.clone())?;
                    if let Some(field) = directive.order_by {
                        plan.order_by = Some(OrderBy {
                            field,
                            descending: directive.descending,
                        });
                    }
                    if directive.limit.is_some() {
                        plan.limit = directive.limit;
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
            if let Some(predicate) = self.predicate_for(clause.operator, &clause.body)? {
                plan.steps.push(Step {
                    connector,
                    predicate,
                });
            }
        }
        let text = serde_json::to_string(&plan)?;
        Ok(CompiledQuery::new(text, cradle.params().to_vec()))
    }

    fn execute(&self, query: &CompiledQuery, target: &OutputTarget) -> Result<(), RuntimeError> {
        let plan: Plan = serde_json::from_str(&query.text)?;
        let rows = {
            let collections = self.collections.lock();
            collections
                .get(&plan.collection)
                .cloned()
                .ok_or_else(|| RuntimeError::UnknownCollection(plan.collection.clone()))?
        };
        let mut selected: Option<BTreeSet<usize>> = None;
        for step in &plan.steps {
            let matches = matching_rows(&rows, &step.predicate, &query.params)?;
            selected = Some(match (selected, step.connector) {
                (None, _) => matches,
                (Some(current), Connector::Where | Connector::And) => {
                    current.intersection(&matches).copied().collect()
                }
                (Some(current), Connector::Or) => current.union(&matches).copied().collect(),
            });
        }
        let mut out: Vec<Record> = match selected {
            Some(indices) => indices.into_iter().map(|idx| rows[idx].clone()).collect(),
            None => rows,
        };
        if let Some(order) = &plan.order_by {
            out.sort_by(|a, b| {
                let ordering = match (a.get(&order.field), b.get(&order.field)) {
                    (Some(x), Some(y)) => x.compare(y).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                if order.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }
        if let Some(limit) = plan.limit {
            out.truncate(limit);
        }
        debug!(
            collection = %plan.collection,
            steps = plan.steps.len(),
            rows = out.len(),
            transactional = query.transactional,
            "memory.execute"
        );
        target.extend(out);
        Ok(())
    }
}

fn matching_rows(
    rows: &[Record],
    predicate: &Predicate,
    params: &[Value],
) -> Result<BTreeSet<usize>, RuntimeError> {
    let mut out = BTreeSet::new();
    match predicate {
        Predicate::Match { fields } => {
            let mut expected = Vec::with_capacity(fields.len());
            for field in fields {
                let value = params.get(field.param).ok_or_else(|| {
                    RuntimeError::Execute(format!("parameter {} is not bound", field.param + 1))
                })?;
                expected.push((field.field.as_str(), value));
            }
            for (idx, row) in rows.iter().enumerate() {
                if expected
                    .iter()
                    .all(|(field, value)| CompareOp::Eq.holds(row.get(*field), value))
                {
                    out.insert(idx);
                }
            }
        }
        Predicate::Compare { field, op, literal } => {
            for (idx, row) in rows.iter().enumerate() {
                if op.holds(row.get(field), literal) {
                    out.insert(idx);
                }
            }
        }
    }
    Ok(out)
}
