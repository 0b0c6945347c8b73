//! Query engine: drains queued fragments into the cradle and hands the
//! result to the attached runtime.
//!
//! Each dequeued fragment is checked against the chain rules below, screened
//! by the runtime, and pushed onto the cradle as one `(operator, body)` pair.
//!
//! | Incoming | Precondition | Effect |
//! |---|---|---|
//! | `Where` / `WhereStr` | previous fragment is not a filter | push filter, satisfy `Where` |
//! | `And` / `Or` (+ `Str`) | `Where` satisfied | push connector |
//! | `SetTarget` | none | push synthetic `Where` if unsatisfied, then `SetTarget`; record target |
//! | `Misc` | none | push payload verbatim |
//!
//! Processing stops at the first error. Already pushed clauses are not rolled
//! back; the cradle is marked poisoned and must be reset.

use tracing::{debug, warn};

use super::cradle::{Binding, ClauseBody, QueryCradle};
use super::errors::{QueryError, Result};
use super::fragment::{Expression, Fragment, FragmentKind};
use super::profile::{profile_timer, record_fragment, record_profile_timer, QueryProfileKind};
use super::queue::SharedQueue;
use crate::db::{Database, Layer};
use crate::runtime::{CompiledQuery, QueryRuntime};

/// Session-scoped engine owning one cradle, one inbound queue handle, a
/// transaction flag, and at most one runtime.
///
/// The engine is not safe for concurrent mutation. At most one
/// [`QueryEngine::sync`] may be in flight, and every fragment of a query is
/// expected to be queued before it starts.
pub struct QueryEngine {
    queue: Option<SharedQueue<Fragment>>,
    cradle: QueryCradle,
    is_transaction: bool,
    runtime: Option<Box<dyn QueryRuntime>>,
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryEngine {
    /// Creates an engine with a fresh cradle and no queue or runtime.
    pub fn new() -> Self {
        Self {
            queue: None,
            cradle: QueryCradle::new(),
            is_transaction: false,
            runtime: None,
        }
    }

    /// Binds the engine's inbound queue.
    pub fn attach(&mut self, queue: SharedQueue<Fragment>) {
        self.queue = Some(queue);
    }

    /// Binds the engine to a database's queue and registers it as that
    /// database's processing layer.
    pub fn attach_to(mut self, db: &mut Database) {
        self.attach(db.queue());
        db.set_layer(self);
    }

    /// Registers the runtime, replacing any previous one.
    pub fn add_runtime<R>(&mut self, runtime: R)
    where
        R: QueryRuntime + 'static,
    {
        self.runtime = Some(Box::new(runtime));
    }

    /// Builder form of [`QueryEngine::add_runtime`].
    pub fn with_runtime<R>(mut self, runtime: R) -> Self
    where
        R: QueryRuntime + 'static,
    {
        self.add_runtime(runtime);
        self
    }

    /// Marks subsequent execution as transactional. Advisory only; the
    /// runtime decides what a transaction means.
    pub fn start_transaction(&mut self) {
        self.is_transaction = true;
    }

    /// True once [`QueryEngine::start_transaction`] has been called.
    pub fn is_transaction(&self) -> bool {
        self.is_transaction
    }

    /// Read access to the cradle.
    pub fn cradle(&self) -> &QueryCradle {
        &self.cradle
    }

    /// Discards the cradle and the transaction flag.
    pub fn reset(&mut self) {
        self.cradle.init();
        self.is_transaction = false;
    }

    /// Drains every queued fragment into the cradle.
    ///
    /// Returns as soon as the queue is observed empty, or with the first
    /// validation error. An empty queue leaves the cradle untouched.
    pub fn sync(&mut self) -> Result<()> {
        let queue = self.queue.clone().ok_or(QueryError::QueueDetached)?;
        if self.cradle.is_poisoned() {
            return Err(QueryError::CradlePoisoned);
        }
        let start = profile_timer();
        let mut processed = 0usize;
        let result = loop {
            let next = {
                let mut guard = queue.lock();
                if guard.is_empty() {
                    break Ok(());
                }
                guard.get()
            };
            let fragment = match next {
                Ok(fragment) => fragment,
                Err(err) => break Err(err),
            };
            let kind = fragment.kind();
            if let Err(err) = self.apply(fragment) {
                record_fragment(false);
                warn!(kind = %kind, error = %err, "engine.sync.rejected");
                break Err(err);
            }
            record_fragment(true);
            processed += 1;
            debug!(
                kind = %kind,
                clauses = self.cradle.len(),
                "engine.sync.fragment"
            );
        };
        record_profile_timer(QueryProfileKind::Sync, start);
        if result.is_err() {
            self.cradle.poison();
        }
        debug!(
            processed,
            clauses = self.cradle.len(),
            ok = result.is_ok(),
            "engine.sync.done"
        );
        result
    }

    /// Compiles the cradle through the runtime.
    pub fn compile(&self) -> Result<CompiledQuery> {
        let runtime = self.runtime.as_deref().ok_or(QueryError::RuntimeMissing)?;
        if self.cradle.is_poisoned() {
            return Err(QueryError::CradlePoisoned);
        }
        let start = profile_timer();
        let compiled = runtime.compile(&self.cradle);
        record_profile_timer(QueryProfileKind::Compile, start);
        let mut compiled = compiled?;
        compiled.transactional = self.is_transaction;
        debug!(query = %compiled.text, params = compiled.params.len(), "engine.compile");
        Ok(compiled)
    }

    /// Compiles the cradle and executes it into the declared output target.
    pub fn execute(&self) -> Result<()> {
        let runtime = self.runtime.as_deref().ok_or(QueryError::RuntimeMissing)?;
        let target = self.cradle.output().ok_or(QueryError::MissingTarget)?;
        let compiled = self.compile()?;
        let start = profile_timer();
        let outcome = runtime.execute(&compiled, target);
        record_profile_timer(QueryProfileKind::Execute, start);
        outcome?;
        debug!(
            target = target.name(),
            rows = target.len(),
            transactional = compiled.transactional,
            "engine.execute"
        );
        Ok(())
    }

    fn apply(&mut self, fragment: Fragment) -> Result<()> {
        let runtime = self.runtime.as_deref();
        let cradle = &mut self.cradle;
        let kind = fragment.kind();
        cradle.begin(kind);
        match fragment {
            Fragment::Where(expr) => {
                ensure_chain(cradle, kind)?;
                let bindings = sanitize(runtime, cradle, kind, expr)?;
                cradle.push(kind, ClauseBody::Filter(bindings));
                cradle.satisfy(FragmentKind::Where);
            }
            Fragment::WhereStr(text) => {
                ensure_chain(cradle, kind)?;
                screen(runtime, kind, &text)?;
                cradle.push(kind, ClauseBody::Raw(text));
                cradle.satisfy(FragmentKind::Where);
            }
            Fragment::And(expr) | Fragment::Or(expr) => {
                ensure_dependency(cradle, kind)?;
                let bindings = sanitize(runtime, cradle, kind, expr)?;
                cradle.push(kind, ClauseBody::Filter(bindings));
            }
            Fragment::AndStr(text) | Fragment::OrStr(text) => {
                ensure_dependency(cradle, kind)?;
                screen(runtime, kind, &text)?;
                cradle.push(kind, ClauseBody::Raw(text));
            }
            Fragment::SetTarget { filter, target } => {
                // Without an explicit filter the target's own filter becomes
                // the WHERE clause.
                if !cradle.is_satisfied(FragmentKind::Where) {
                    let bindings = sanitize(runtime, cradle, kind, filter)?;
                    cradle.push(FragmentKind::Where, ClauseBody::Filter(bindings));
                }
                cradle.push(kind, ClauseBody::Empty);
                cradle.set_output(target);
            }
            Fragment::Misc(payload) => {
                cradle.push(kind, ClauseBody::Opaque(payload));
            }
        }
        cradle.finish();
        Ok(())
    }
}

fn ensure_chain(cradle: &QueryCradle, incoming: FragmentKind) -> Result<()> {
    let previous = cradle.previous();
    if previous.is_filter() {
        return Err(QueryError::ChainLogicCorrupted { previous, incoming });
    }
    Ok(())
}

fn ensure_dependency(cradle: &QueryCradle, kind: FragmentKind) -> Result<()> {
    if !cradle.is_satisfied(FragmentKind::Where) {
        return Err(QueryError::DependencyNotSatisfied {
            kind,
            requires: FragmentKind::Where,
        });
    }
    Ok(())
}

fn screen(runtime: Option<&dyn QueryRuntime>, kind: FragmentKind, text: &str) -> Result<()> {
    let runtime = runtime.ok_or(QueryError::RuntimeMissing)?;
    if runtime.check_for_injection(text) {
        return Err(QueryError::injection(kind, text));
    }
    Ok(())
}

/// Screens every field name, then moves each value into the cradle's param
/// list and keeps only its placeholder. An empty filter needs no runtime.
fn sanitize(
    runtime: Option<&dyn QueryRuntime>,
    cradle: &mut QueryCradle,
    kind: FragmentKind,
    expr: Expression,
) -> Result<Vec<Binding>> {
    if expr.is_empty() {
        return Ok(Vec::new());
    }
    let runtime = runtime.ok_or(QueryError::RuntimeMissing)?;
    if let Some(field) = expr
        .keys()
        .find(|field| runtime.check_field_for_injection(field))
    {
        return Err(QueryError::injection(kind, field));
    }
    Ok(expr
        .into_iter()
        .map(|(field, value)| Binding {
            placeholder: cradle.bind(value),
            field,
        })
        .collect())
}

impl Layer for QueryEngine {
    fn sync(&mut self) -> Result<()> {
        QueryEngine::sync(self)
    }

    fn compile(&self) -> Result<CompiledQuery> {
        QueryEngine::compile(self)
    }

    fn execute(&mut self) -> Result<()> {
        QueryEngine::execute(self)
    }

    fn start_transaction(&mut self) {
        QueryEngine::start_transaction(self);
    }

    fn reset(&mut self) {
        QueryEngine::reset(self);
    }
}
