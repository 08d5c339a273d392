/*!
 * PID Registry Tests
 * Uniqueness and name lookup under arbitrary allocate/free sequences
 */

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use sched_core::core::limits::MAX_PIDS;
use sched_core::process::PidRegistry;
use sched_core::{Pid, RegistryError};
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

#[derive(Debug, Clone)]
enum Op {
    Generate(u8),
    Free(usize),
    Invalidate(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..8).prop_map(Op::Generate),
        any::<usize>().prop_map(Op::Free),
        any::<usize>().prop_map(Op::Invalidate),
    ]
}

proptest! {
    #[test]
    fn live_pids_stay_unique(ops in proptest::collection::vec(op(), 1..200)) {
        let registry = PidRegistry::with_capacity(8);
        let mut live: Vec<(Pid, String)> = Vec::new();
        let mut ever: HashSet<Pid> = HashSet::new();

        for op in ops {
            match op {
                Op::Generate(n) => {
                    let name = format!("proc-{}", n);
                    match registry.generate(&name) {
                        Ok(pid) => {
                            prop_assert!(live.iter().all(|(p, _)| *p != pid));
                            ever.insert(pid);
                            live.push((pid, name));
                        }
                        Err(RegistryError::NoFreePid(_)) => prop_assert_eq!(registry.free_slots(), 0),
                        Err(e) => prop_assert!(false, "unexpected error {}", e),
                    }
                }
                Op::Free(i) if !live.is_empty() => {
                    let (pid, _) = live.swap_remove(i % live.len());
                    prop_assert!(registry.free(pid).is_ok());
                    prop_assert!(!registry.is_valid(pid));
                }
                Op::Invalidate(i) if !live.is_empty() => {
                    let (pid, _) = &live[i % live.len()];
                    prop_assert!(registry.invalidate(*pid).is_ok());
                    prop_assert!(!registry.is_valid(*pid));
                }
                _ => {}
            }
            prop_assert_eq!(registry.free_slots() + live.len(), registry.capacity());
        }
    }
}

#[test]
fn test_lookup_skips_invalidated() {
    let registry = PidRegistry::new();
    assert_eq!(registry.capacity(), MAX_PIDS);

    let first = registry.generate("worker").unwrap();
    registry.invalidate(first).unwrap();
    assert_eq!(registry.lookup_by_name("worker"), None);

    let second = registry.generate("worker").unwrap();
    assert_ne!(first, second);
    assert_eq!(registry.lookup_by_name("worker"), Some(second));
    assert_eq!(registry.name_of(second).as_deref(), Some("worker"));
}

#[test]
fn test_concurrent_unique_names_admit_one() {
    let registry = Arc::new(PidRegistry::with_capacity(16));
    let start = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                registry.generate_unique("model")
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert_eq!(result, &Err(RegistryError::AlreadyRunning("model".into())));
    }
    assert_eq!(registry.free_slots(), 15);
}
