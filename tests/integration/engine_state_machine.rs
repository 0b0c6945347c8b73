#![allow(missing_docs)]

use cradle::query::{
    ClauseBody, Expression, Fragment, FragmentKind, OutputTarget, Placeholder, QueryEngine,
    QueryError, Queue, SharedQueue, Value,
};
use cradle::runtime::MemoryRuntime;
use proptest::prelude::*;

fn engine_with(fragments: Vec<Fragment>) -> (QueryEngine, SharedQueue<Fragment>) {
    let queue = Queue::shared();
    for fragment in fragments {
        queue.lock().push(fragment);
    }
    let mut engine = QueryEngine::new().with_runtime(MemoryRuntime::new());
    engine.attach(queue.clone());
    (engine, queue)
}

fn ops(engine: &QueryEngine) -> Vec<FragmentKind> {
    engine.cradle().operators().collect()
}

#[test]
fn injection_stops_processing() {
    let (mut engine, queue) = engine_with(vec![
        Fragment::Where(Expression::new().with("a", 1)),
        Fragment::AndStr("b = 1; DROP TABLE users".into()),
        Fragment::And(Expression::new().with("c", 2)),
    ]);
    let err = engine.sync().expect_err("injection");
    match err {
        QueryError::InjectionDetected { kind, candidate } => {
            assert_eq!(kind, FragmentKind::AndStr);
            assert!(candidate.contains("DROP"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(ops(&engine), vec![FragmentKind::Where]);
    assert_eq!(queue.lock().len(), 1, "fragments after the rejection stay queued");
    assert!(engine.cradle().is_poisoned());
    assert!(matches!(engine.sync(), Err(QueryError::CradlePoisoned)));
}

#[test]
fn suspicious_field_names_are_rejected() {
    let (mut engine, _queue) = engine_with(vec![Fragment::Where(
        Expression::new().with("name OR 1=1", "x"),
    )]);
    assert!(matches!(
        engine.sync(),
        Err(QueryError::InjectionDetected {
            kind: FragmentKind::Where,
            ..
        })
    ));
    assert!(engine.cradle().is_empty());
    assert!(engine.cradle().params().is_empty());
}

#[test]
fn adjacent_filters_corrupt_the_chain() {
    let (mut engine, _queue) = engine_with(vec![
        Fragment::Where(Expression::new().with("a", 1)),
        Fragment::Where(Expression::new().with("b", 2)),
    ]);
    let err = engine.sync().expect_err("chain");
    assert!(matches!(
        err,
        QueryError::ChainLogicCorrupted {
            previous: FragmentKind::Where,
            incoming: FragmentKind::Where
        }
    ));
    assert_eq!(err.to_string(), "query chain logic corrupted: where cannot follow where");

    let (mut engine, _queue) = engine_with(vec![
        Fragment::Where(Expression::new().with("a", 1)),
        Fragment::And(Expression::new().with("b", 2)),
        Fragment::Where(Expression::new().with("c", 3)),
    ]);
    engine.sync().expect("connector separates filters");
    assert_eq!(
        ops(&engine),
        vec![FragmentKind::Where, FragmentKind::And, FragmentKind::Where]
    );
}

#[test]
fn connectors_need_a_filter_first() {
    for fragment in [
        Fragment::And(Expression::new().with("a", 1)),
        Fragment::Or(Expression::new().with("a", 1)),
        Fragment::AndStr("a = 1".into()),
        Fragment::OrStr("a = 1".into()),
    ] {
        let kind = fragment.kind();
        let (mut engine, _queue) = engine_with(vec![fragment]);
        let err = engine.sync().expect_err("dependency");
        assert!(matches!(
            err,
            QueryError::DependencyNotSatisfied {
                kind: k,
                requires: FragmentKind::Where
            } if k == kind
        ));
        assert!(engine.cradle().is_empty());
    }
}

#[test]
fn raw_filter_satisfies_connectors() {
    let (mut engine, _queue) = engine_with(vec![
        Fragment::WhereStr("age > 3".into()),
        Fragment::Or(Expression::new().with("name", "bob")),
    ]);
    engine.sync().expect("sync");
    assert!(engine.cradle().is_satisfied(FragmentKind::Where));
    assert_eq!(ops(&engine), vec![FragmentKind::WhereStr, FragmentKind::Or]);
}

#[test]
fn target_without_filter_synthesizes_where() {
    let users = OutputTarget::new("users");
    let (mut engine, _queue) = engine_with(vec![Fragment::SetTarget {
        filter: Expression::new().with("id", 5),
        target: users.clone(),
    }]);
    engine.sync().expect("sync");
    assert_eq!(ops(&engine), vec![FragmentKind::Where, FragmentKind::SetTarget]);
    assert!(engine.cradle().output().expect("output").same_buffer(&users));
    assert_eq!(engine.cradle().params(), &[Value::Int(5)]);
    assert!(!engine.cradle().is_satisfied(FragmentKind::Where));
}

#[test]
fn target_after_filter_adds_no_where() {
    let (mut engine, _queue) = engine_with(vec![
        Fragment::Where(Expression::new().with("id", 5)),
        Fragment::SetTarget {
            filter: Expression::new().with("ignored", 1),
            target: OutputTarget::new("users"),
        },
    ]);
    engine.sync().expect("sync");
    assert_eq!(ops(&engine), vec![FragmentKind::Where, FragmentKind::SetTarget]);
    assert_eq!(engine.cradle().params(), &[Value::Int(5)]);
}

#[test]
fn values_are_bound_not_inlined() {
    let (mut engine, _queue) = engine_with(vec![Fragment::Where(
        Expression::new().with("age", 30),
    )]);
    engine.sync().expect("sync");
    let clause = &engine.cradle().clauses()[0];
    let ClauseBody::Filter(bindings) = &clause.body else {
        panic!("expected a filter body, got {:?}", clause.body);
    };
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].field, "age");
    assert_eq!(bindings[0].placeholder, Placeholder(0));
    assert_eq!(engine.cradle().params(), &[Value::Int(30)]);
}

#[test]
fn empty_queue_sync_is_a_no_op() {
    let (mut engine, _queue) = engine_with(Vec::new());
    engine.sync().expect("sync");
    assert!(engine.cradle().is_empty());
    assert_eq!(engine.cradle().current(), FragmentKind::Unknown);
    assert_eq!(engine.cradle().previous(), FragmentKind::Unknown);
    assert!(!engine.cradle().is_poisoned());
}

#[test]
fn empty_sync_after_work_leaves_cradle_unchanged() {
    let users = OutputTarget::new("users");
    let (mut engine, queue) = engine_with(vec![
        Fragment::Where(Expression::new().with("age", 30)),
        Fragment::OrStr("age > 60".into()),
        Fragment::target(users.clone()),
    ]);
    engine.sync().expect("first sync");
    let clauses = engine.cradle().clauses().to_vec();
    let params = engine.cradle().params().to_vec();
    let (current, previous) = (engine.cradle().current(), engine.cradle().previous());

    assert!(queue.lock().is_empty());
    engine.sync().expect("empty sync");
    assert_eq!(engine.cradle().clauses(), clauses.as_slice());
    assert_eq!(engine.cradle().params(), params.as_slice());
    assert_eq!(engine.cradle().current(), current);
    assert_eq!(engine.cradle().previous(), previous);
    assert_eq!(current, FragmentKind::SetTarget);
    assert!(engine.cradle().output().expect("output").same_buffer(&users));
    assert!(engine.cradle().is_satisfied(FragmentKind::Where));
    assert!(!engine.cradle().is_poisoned());
}

#[test]
fn misc_payload_is_kept_verbatim() {
    let payload = serde_json::json!({"limit": 3});
    let (mut engine, _queue) = engine_with(vec![Fragment::Misc(payload.clone())]);
    engine.sync().expect("sync");
    assert!(matches!(
        &engine.cradle().clauses()[0].body,
        ClauseBody::Opaque(stored) if *stored == payload
    ));
}

#[test]
fn reset_recovers_a_poisoned_engine() {
    let (mut engine, queue) = engine_with(vec![Fragment::And(Expression::new().with("a", 1))]);
    engine.sync().expect_err("dependency");
    engine.reset();
    queue.lock().push(Fragment::WhereStr("a = 1".into()));
    engine.sync().expect("sync after reset");
    assert_eq!(ops(&engine), vec![FragmentKind::WhereStr]);
}

#[derive(Clone, Debug)]
enum Step {
    Where,
    WhereStr,
    And,
    AndStr,
    Or,
    OrStr,
    Target,
    Misc,
}

impl Step {
    fn fragment(&self, n: i64) -> Fragment {
        let expr = || Expression::new().with("f", n);
        match self {
            Step::Where => Fragment::Where(expr()),
            Step::WhereStr => Fragment::WhereStr(format!("f = {n}")),
            Step::And => Fragment::And(expr()),
            Step::AndStr => Fragment::AndStr(format!("f > {n}")),
            Step::Or => Fragment::Or(expr()),
            Step::OrStr => Fragment::OrStr(format!("f < {n}")),
            Step::Target => Fragment::SetTarget {
                filter: expr(),
                target: OutputTarget::new("t"),
            },
            Step::Misc => Fragment::Misc(serde_json::json!({"limit": n})),
        }
    }
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Where),
        Just(Step::WhereStr),
        Just(Step::And),
        Just(Step::AndStr),
        Just(Step::Or),
        Just(Step::OrStr),
        Just(Step::Target),
        Just(Step::Misc),
    ]
}

/// Expected outcome: the number of clauses pushed and whether the whole
/// sequence is accepted.
fn model(steps: &[Step]) -> (usize, bool) {
    let mut previous_is_filter = false;
    let mut satisfied = false;
    let mut clauses = 0;
    for step in steps {
        match step {
            Step::Where | Step::WhereStr => {
                if previous_is_filter {
                    return (clauses, false);
                }
                satisfied = true;
                clauses += 1;
            }
            Step::And | Step::AndStr | Step::Or | Step::OrStr => {
                if !satisfied {
                    return (clauses, false);
                }
                clauses += 1;
            }
            Step::Target => clauses += if satisfied { 1 } else { 2 },
            Step::Misc => clauses += 1,
        }
        previous_is_filter = matches!(step, Step::Where | Step::WhereStr);
    }
    (clauses, true)
}

proptest! {
    #[test]
    fn sync_follows_the_chaining_rules(steps in prop::collection::vec(arb_step(), 0..24)) {
        let fragments = steps
            .iter()
            .enumerate()
            .map(|(i, step)| step.fragment(i as i64))
            .collect();
        let (mut engine, _queue) = engine_with(fragments);
        let outcome = engine.sync();
        let (clauses, accepted) = model(&steps);

        prop_assert_eq!(outcome.is_ok(), accepted);
        prop_assert_eq!(engine.cradle().len(), clauses);
        prop_assert_eq!(engine.cradle().operators().count(), engine.cradle().clauses().len());
        prop_assert_eq!(engine.cradle().is_poisoned(), !accepted);

        let bound: usize = engine
            .cradle()
            .clauses()
            .iter()
            .map(|clause| match &clause.body {
                ClauseBody::Filter(bindings) => bindings.len(),
                _ => 0,
            })
            .sum();
        prop_assert_eq!(bound, engine.cradle().params().len());
    }
}
