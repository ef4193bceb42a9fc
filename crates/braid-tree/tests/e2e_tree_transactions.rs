//! E2E integration test: tree transactions under concurrency.
//!
//! Validates:
//! 1. Observers at the deepest node only ever see folds built from one
//!    transaction's consistent value pair — never a torn mix of two.
//! 2. A transaction storm ends with the live fold, the on-demand
//!    `resolve_at` fold, and the getter all in agreement.
//! 3. Concurrent first accesses still build the tree exactly once.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use braid_tree::{Tree, TreeError};

fn concat(a: String, b: String) -> String {
    format!("{a}/{b}")
}

fn three_level() -> Tree<String> {
    Tree::new("r", "R".to_string(), concat, |root| {
        let a = root.fork("a", "A0".to_string())?;
        a.fork("b", "B0".to_string())?;
        Ok(())
    })
}

#[test]
fn e2e_transactions_never_show_torn_pairs() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 200;

    let tree = Arc::new(three_level());
    let b = tree.get("b").expect("b");

    // Record every fold the deepest node's observers are shown.
    let observed: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&observed);
    let b_path = b.path();
    b_path.subscribe(move |snapshot| {
        if let Some(value) = snapshot.value() {
            sink.lock().expect("observed").push(value.clone());
        }
    });
    b_path.activate();

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|thread_id| {
            let tree = Arc::clone(&tree);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for round in 0..ROUNDS {
                    let stamp = thread_id * ROUNDS + round;
                    tree.transaction(&[
                        ("a", format!("A{stamp}")),
                        ("b", format!("B{stamp}")),
                    ])
                    .expect("transaction");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("transaction thread");
    }

    // Every observed fold carries one transaction's matching pair.
    for fold in observed.lock().expect("observed").iter() {
        let parts: Vec<&str> = fold.split('/').collect();
        assert_eq!(parts.len(), 3, "unexpected fold shape: {fold}");
        assert_eq!(parts[0], "R");
        let a_stamp = parts[1].strip_prefix('A').expect("a segment");
        let b_stamp = parts[2].strip_prefix('B').expect("b segment");
        assert_eq!(a_stamp, b_stamp, "torn pair observed: {fold}");
    }

    // Live fold, on-demand fold, and locals all agree at the end.
    let live = b_path.current().expect("live fold");
    assert_eq!(tree.resolve_at("b").expect("resolve"), live);
    let a_final = tree.get("a").expect("a").value();
    let b_final = tree.get("b").expect("b").value();
    assert_eq!(live, format!("R/{a_final}/{b_final}"));
}

#[test]
fn e2e_transaction_storm_against_live_getter() {
    const ROUNDS: usize = 300;

    let tree = Arc::new(three_level());
    let getter = tree.get("b").expect("b").getter();
    getter.activate();

    let writer = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for round in 0..ROUNDS {
                tree.transaction(&[
                    ("a", format!("A{round}")),
                    ("b", format!("B{round}")),
                ])
                .expect("transaction");
            }
        })
    };
    writer.join().expect("writer thread");

    let last = ROUNDS - 1;
    assert_eq!(getter.get(), Ok(format!("R/A{last}/B{last}")));
    assert_eq!(
        tree.snapshot().expect("snapshot").resolve_at("b"),
        Some(format!("R/A{last}/B{last}"))
    );
}

#[test]
fn e2e_concurrent_construction_races_build_once() {
    const THREADS: usize = 8;

    let builds = Arc::new(AtomicU32::new(0));
    let b = Arc::clone(&builds);
    let tree = Arc::new(Tree::new("r", "R".to_string(), concat, move |root| {
        b.fetch_add(1, Ordering::Relaxed);
        let a = root.fork("a", "A".to_string())?;
        a.fork("b", "B".to_string())?;
        Ok::<(), TreeError>(())
    }));

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let tree = Arc::clone(&tree);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let tag = if i % 2 == 0 { "a" } else { "b" };
                tree.resolve_at(tag).expect("resolve")
            })
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        let expected = if i % 2 == 0 { "R/A" } else { "R/A/B" };
        assert_eq!(handle.join().expect("resolver thread"), expected);
    }
    assert_eq!(builds.load(Ordering::Relaxed), 1);
}
