//! Session plumbing: a [`Database`] owns the fragment queue, exposes the
//! fluent builder that fills it, and drives whatever [`Layer`] is attached.
//!
//! ```no_run
//! use cradle::db::Database;
//! use cradle::query::{Expression, OutputTarget, QueryEngine};
//! use cradle::runtime::SqliteRuntime;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut db = Database::new();
//! QueryEngine::new()
//!     .with_runtime(SqliteRuntime::open("app.db")?)
//!     .attach_to(&mut db);
//!
//! let users = OutputTarget::new("users");
//! db.filter(Expression::new().with("age", 30))
//!     .or_str("name = 'root'")
//!     .find(&users)
//!     .exec()?;
//! println!("{} rows", users.len());
//! # Ok(())
//! # }
//! ```

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::query::{Expression, Fragment, OutputTarget, Queue, QueryError, Result, SharedQueue};
use crate::runtime::CompiledQuery;

/// Processing layer driven by a [`Database`].
///
/// [`crate::query::QueryEngine`] is the layer shipped with the crate.
pub trait Layer: Send {
    /// Drains queued fragments into the layer's accumulator.
    fn sync(&mut self) -> Result<()>;

    /// Compiles the accumulated query without executing it.
    fn compile(&self) -> Result<CompiledQuery>;

    /// Executes the accumulated query into its output target.
    fn execute(&mut self) -> Result<()>;

    /// Marks subsequent execution as transactional.
    fn start_transaction(&mut self);

    /// Discards the accumulated query.
    fn reset(&mut self);
}

/// One query-builder session.
pub struct Database {
    queue: SharedQueue<Fragment>,
    layer: Option<Box<dyn Layer>>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    /// Creates a session with an empty queue and no layer.
    pub fn new() -> Self {
        Self {
            queue: Queue::shared(),
            layer: None,
        }
    }

    /// Returns a handle to the inbound fragment queue.
    pub fn queue(&self) -> SharedQueue<Fragment> {
        self.queue.clone()
    }

    /// Registers the processing layer, replacing any previous one.
    pub fn set_layer<L>(&mut self, layer: L)
    where
        L: Layer + 'static,
    {
        self.layer = Some(Box::new(layer));
    }

    /// True when a processing layer is attached.
    pub fn has_layer(&self) -> bool {
        self.layer.is_some()
    }

    /// Number of fragments waiting for the next sync.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Enqueues a prebuilt fragment.
    pub fn push(&mut self, fragment: Fragment) -> &mut Self {
        self.queue.lock().push(fragment);
        self
    }

    /// Adds a structured filter.
    pub fn filter(&mut self, expr: impl Into<Expression>) -> &mut Self {
        self.push(Fragment::Where(expr.into()))
    }

    /// Adds a raw filter.
    pub fn where_str(&mut self, clause: impl Into<String>) -> &mut Self {
        self.push(Fragment::WhereStr(clause.into()))
    }

    /// Joins a structured filter with AND.
    pub fn and(&mut self, expr: impl Into<Expression>) -> &mut Self {
        self.push(Fragment::And(expr.into()))
    }

    /// Joins a raw filter with AND.
    pub fn and_str(&mut self, clause: impl Into<String>) -> &mut Self {
        self.push(Fragment::AndStr(clause.into()))
    }

    /// Joins a structured filter with OR.
    pub fn or(&mut self, expr: impl Into<Expression>) -> &mut Self {
        self.push(Fragment::Or(expr.into()))
    }

    /// Joins a raw filter with OR.
    pub fn or_str(&mut self, clause: impl Into<String>) -> &mut Self {
        self.push(Fragment::OrStr(clause.into()))
    }

    /// Selects the output target without an implicit filter.
    pub fn find(&mut self, target: &OutputTarget) -> &mut Self {
        self.push(Fragment::target(target.clone()))
    }

    /// Selects the output target; `filter` applies only when no explicit
    /// filter was added before it.
    pub fn find_by(&mut self, filter: impl Into<Expression>, target: &OutputTarget) -> &mut Self {
        self.push(Fragment::SetTarget {
            filter: filter.into(),
            target: target.clone(),
        })
    }

    /// Adds an opaque backend-specific payload.
    pub fn misc(&mut self, payload: impl Into<JsonValue>) -> &mut Self {
        self.push(Fragment::Misc(payload.into()))
    }

    /// Marks the session as transactional.
    pub fn transaction(&mut self) -> Result<&mut Self> {
        self.layer_mut()?.start_transaction();
        Ok(self)
    }

    /// Drains the queue into the layer without executing.
    pub fn sync(&mut self) -> Result<()> {
        self.layer_mut()?.sync()
    }

    /// Syncs and compiles the queued query, then discards the session.
    pub fn compile(&mut self) -> Result<CompiledQuery> {
        self.finish(|layer| {
            layer.sync()?;
            layer.compile()
        })
    }

    /// Syncs and executes the queued query, then discards the session.
    ///
    /// On failure any fragments still queued are dropped as well.
    pub fn exec(&mut self) -> Result<()> {
        self.finish(|layer| {
            layer.sync()?;
            layer.execute()
        })
    }

    fn finish<T, F>(&mut self, run: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Layer) -> Result<T>,
    {
        let layer = self.layer.as_deref_mut().ok_or(QueryError::LayerMissing)?;
        let outcome = run(&mut *layer);
        if outcome.is_err() {
            let dropped = {
                let mut queue = self.queue.lock();
                let dropped = queue.len();
                queue.clear();
                dropped
            };
            debug!(dropped, "db.session.discarded");
        }
        layer.reset();
        outcome
    }

    fn layer_mut(&mut self) -> Result<&mut dyn Layer> {
        match self.layer.as_deref_mut() {
            Some(layer) => Ok(layer),
            None => Err(QueryError::LayerMissing),
        }
    }
}
