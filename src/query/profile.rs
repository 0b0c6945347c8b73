use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// A snapshot of query engine profiling metrics.
///
/// Profiling is enabled via the `CRADLE_PROFILE` environment variable and
/// tracks time spent draining fragments, compiling cradles, and executing
/// compiled queries, plus how many fragments were accepted or rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryProfileSnapshot {
    /// Total nanoseconds spent inside sync loops.
    pub sync_ns: u64,
    /// Number of sync loops run.
    pub sync_count: u64,
    /// Total nanoseconds spent compiling cradles.
    pub compile_ns: u64,
    /// Number of compile calls.
    pub compile_count: u64,
    /// Total nanoseconds spent executing compiled queries.
    pub execute_ns: u64,
    /// Number of execute calls.
    pub execute_count: u64,
    /// Fragments that passed validation.
    pub fragments_accepted: u64,
    /// Fragments rejected by chain rules or the injection screen.
    pub fragments_rejected: u64,
}

#[derive(Default)]
struct QueryProfileCounters {
    sync_ns: AtomicU64,
    sync_count: AtomicU64,
    compile_ns: AtomicU64,
    compile_count: AtomicU64,
    execute_ns: AtomicU64,
    execute_count: AtomicU64,
    fragments_accepted: AtomicU64,
    fragments_rejected: AtomicU64,
}

static PROFILE_ENABLED: OnceLock<bool> = OnceLock::new();
static PROFILE_COUNTERS: OnceLock<QueryProfileCounters> = OnceLock::new();

fn profiling_enabled() -> bool {
    *PROFILE_ENABLED.get_or_init(|| std::env::var_os("CRADLE_PROFILE").is_some())
}

fn counters() -> Option<&'static QueryProfileCounters> {
    profiling_enabled().then(|| PROFILE_COUNTERS.get_or_init(QueryProfileCounters::default))
}

pub(crate) fn profile_timer() -> Option<Instant> {
    profiling_enabled().then(Instant::now)
}

pub(crate) enum QueryProfileKind {
    /// A full drain of the inbound queue.
    Sync,
    /// Runtime compilation of a cradle.
    Compile,
    /// Runtime execution of a compiled query.
    Execute,
}

pub(crate) fn record_profile_timer(kind: QueryProfileKind, start: Option<Instant>) {
    let Some(start) = start else {
        return;
    };
    let Some(counters) = counters() else {
        return;
    };
    let nanos = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;
    let (ns, count) = match kind {
        QueryProfileKind::Sync => (&counters.sync_ns, &counters.sync_count),
        QueryProfileKind::Compile => (&counters.compile_ns, &counters.compile_count),
        QueryProfileKind::Execute => (&counters.execute_ns, &counters.execute_count),
    };
    ns.fetch_add(nanos, Ordering::Relaxed);
    count.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_fragment(accepted: bool) {
    let Some(counters) = counters() else {
        return;
    };
    let counter = if accepted {
        &counters.fragments_accepted
    } else {
        &counters.fragments_rejected
    };
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Retrieves a snapshot of current query profiling metrics.
///
/// Returns `None` when profiling is disabled. With `reset` set, every counter
/// is swapped back to zero as it is read.
///
/// ```no_run
/// use cradle::query::profile::profile_snapshot;
///
/// if let Some(snapshot) = profile_snapshot(true) {
///     println!("rejected fragments: {}", snapshot.fragments_rejected);
/// }
/// ```
pub fn profile_snapshot(reset: bool) -> Option<QueryProfileSnapshot> {
    let counters = counters()?;
    let load = |counter: &AtomicU64| {
        if reset {
            counter.swap(0, Ordering::Relaxed)
        } else {
            counter.load(Ordering::Relaxed)
        }
    };
    Some(QueryProfileSnapshot {
        sync_ns: load(&counters.sync_ns),
        sync_count: load(&counters.sync_count),
        compile_ns: load(&counters.compile_ns),
        compile_count: load(&counters.compile_count),
        execute_ns: load(&counters.execute_ns),
        execute_count: load(&counters.execute_count),
        fragments_accepted: load(&counters.fragments_accepted),
        fragments_rejected: load(&counters.fragments_rejected),
    })
}
