/*!
 * Retire Pool Tests
 * Deferred reclamation and eviction under an exhausted PID table
 */

use pretty_assertions::assert_eq;
use sched_core::process::{PidRegistry, RetirePool};
use sched_core::{ManualClock, RegistryError};
use std::sync::Arc;
use std::time::Duration;

fn pool(capacity: usize) -> (Arc<ManualClock>, RetirePool<String>) {
    let clock = Arc::new(ManualClock::new(0));
    let registry = Arc::new(PidRegistry::with_capacity(capacity));
    let pool = RetirePool::new(registry, clock.clone())
        .with_retire_delay(Duration::from_millis(100))
        .with_emergency_min_age(Duration::from_millis(10));
    (clock, pool)
}

#[test]
fn test_exhausted_table_evicts_oldest_retired() {
    let (clock, pool) = pool(2);
    let a = pool.allocate("a").unwrap();
    let b = pool.allocate("b").unwrap();

    pool.mark(a, "a".to_string());
    clock.advance(Duration::from_millis(5));
    pool.mark(b, "b".to_string());
    clock.advance(Duration::from_millis(10));

    // a is 15ms old: past the emergency age, before the retire delay
    let c = pool.allocate("c").unwrap();
    assert_eq!(pool.len(), 1);
    assert!(pool.registry().is_valid(c));
    assert_eq!(pool.registry().lookup_by_name("c"), Some(c));
}

#[test]
fn test_exhausted_table_fails_when_nothing_is_old_enough() {
    let (clock, pool) = pool(1);
    let a = pool.allocate("a").unwrap();
    pool.mark(a, "a".to_string());
    clock.advance(Duration::from_millis(3));

    match pool.allocate("b") {
        Err(RegistryError::NoFreePid(name)) => assert_eq!(name.as_str(), "b"),
        other => panic!("expected NoFreePid, got {:?}", other),
    }
    assert_eq!(pool.len(), 1);
}

#[test]
fn test_exhausted_table_without_retired_entries_fails() {
    let (_clock, pool) = pool(1);
    pool.allocate("a").unwrap();
    assert!(matches!(pool.allocate("b"), Err(RegistryError::NoFreePid(_))));
}

#[test]
fn test_expired_entries_reclaimed_on_allocate() {
    let (clock, pool) = pool(1);
    let a = pool.allocate("a").unwrap();
    pool.mark(a, "a".to_string());
    clock.advance(Duration::from_millis(100));

    let b = pool.allocate("b").unwrap();
    assert!(pool.is_empty());
    assert_ne!(a, b);
}
