/*!
 * Equation Hook Tests
 * Execution order and release of compiled expressions
 */

use mockall::predicate::eq;
use mockall::{mock, Sequence};
use pretty_assertions::assert_eq;
use sched_core::collab::CompiledExpression;
use sched_core::process::{EquationHooks, EquationSelector, HookSide};
use sched_core::Pid;
use std::sync::Arc;

mock! {
    Expr {}

    impl CompiledExpression for Expr {
        fn execute(&self, pid: Pid);
        fn release(&self, pid: Pid);
    }
}

#[test]
fn test_hooks_run_in_insertion_order() {
    let hooks = EquationHooks::new();
    let mut seq = Sequence::new();

    let mut first = MockExpr::new();
    first
        .expect_execute()
        .with(eq(Pid(65)))
        .times(1)
        .in_sequence(&mut seq)
        .return_const(());
    let mut second = MockExpr::new();
    second
        .expect_execute()
        .with(eq(Pid(65)))
        .times(1)
        .in_sequence(&mut seq)
        .return_const(());

    hooks.add(HookSide::Before, 1, Arc::new(first));
    hooks.add(HookSide::Before, 2, Arc::new(second));
    hooks.run(HookSide::Before, Pid(65));
    // the behind side is empty
    hooks.run(HookSide::Behind, Pid(65));
}

#[test]
fn test_remove_by_nr_releases_only_matches() {
    let hooks = EquationHooks::new();

    let mut kept = MockExpr::new();
    kept.expect_release().never();
    kept.expect_execute().times(1).return_const(());
    let mut dropped = MockExpr::new();
    dropped.expect_release().with(eq(Pid(70))).times(1).return_const(());
    dropped.expect_execute().never();

    hooks.add(HookSide::Behind, 7, Arc::new(dropped));
    hooks.add(HookSide::Behind, 8, Arc::new(kept));

    assert_eq!(hooks.remove(HookSide::Behind, EquationSelector::Nr(7), Pid(70)), 1);
    assert_eq!(hooks.len(HookSide::Behind), 1);
    hooks.run(HookSide::Behind, Pid(70));
}

#[test]
fn test_shared_expression_released_per_process() {
    let mut shared = MockExpr::new();
    shared.expect_release().with(eq(Pid(65))).times(1).return_const(());
    shared.expect_release().with(eq(Pid(66))).times(1).return_const(());
    let shared: Arc<dyn CompiledExpression> = Arc::new(shared);

    let a = EquationHooks::new();
    let b = EquationHooks::new();
    a.add(HookSide::Before, 1, shared.clone());
    b.add(HookSide::Behind, 1, shared.clone());

    assert_eq!(a.remove_all(Pid(65)), 1);
    assert_eq!(b.remove_all(Pid(66)), 1);
    assert_eq!(Arc::strong_count(&shared), 1);
}
