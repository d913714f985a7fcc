//! Integration tests for the public API of `sync`, across real threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use log::Level;
use sync::{
    HazardKind, LOCKDEP_TARGET, Latch, LockRegistry, LockdepConfig, RefCounted, TrackedMutex,
    WaitableRefCounted, tracked_mutex,
};
use test_support::{mock, run_threads};

/// A service object shared by worker threads; the owner waits for every worker to let go.
struct Session {
    id: u32,
    ops: AtomicUsize,
}

#[test]
fn test_owner_waits_for_workers_to_drain() {
    let session = WaitableRefCounted::new(Session {
        id: 7,
        ops: AtomicUsize::new(0),
    });
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let s = session.get();
            thread::spawn(move || {
                for _ in 0..100 {
                    s.ops.fetch_add(1, Ordering::Relaxed);
                }
                thread::sleep(Duration::from_millis(10));
                s.put()
            })
        })
        .collect();

    let latch = session.latch();
    assert_eq!(session.id, 7);
    let destroyed_by_owner = session.put_wait();

    let destroyed_by_workers = workers
        .into_iter()
        .map(|w| w.join().unwrap())
        .filter(|&d| d)
        .count();
    assert_eq!(usize::from(destroyed_by_owner) + destroyed_by_workers, 1);
    assert_eq!(latch.result(), Some(sync::LATCH_DRAINED));
}

#[test]
fn test_latch_handoff_between_threads() {
    let latch = Latch::new();
    let results = run_threads(3, |i| {
        if i == 0 {
            thread::sleep(Duration::from_millis(20));
            latch.done(42);
            0
        } else {
            latch.wait()
        }
    });
    assert_eq!(results, [0, 42, 42]);
}

#[test]
fn test_refcounted_shared_across_threads() {
    let shared = RefCounted::new(AtomicUsize::new(0));
    let refs: Vec<_> = (0..4).map(|_| shared.get()).collect();
    let handles: Vec<_> = refs
        .into_iter()
        .map(|r| {
            thread::spawn(move || {
                r.fetch_add(1, Ordering::SeqCst);
                r.put()
            })
        })
        .collect();
    for h in handles {
        assert!(!h.join().unwrap());
    }
    assert_eq!(shared.load(Ordering::SeqCst), 4);
    assert_eq!(shared.nref(), 1);
}

#[test]
fn test_abba_across_threads_reported() {
    let logger = mock::log::install();
    let reg = Arc::new(LockRegistry::new(LockdepConfig::new()));
    let a = TrackedMutex::new("itest_a", &reg);
    let b = TrackedMutex::new("itest_b", &reg);

    // 两个线程交替执行，任何一轮都不会真的死锁，但顺序不一致
    for _ in 0..3 {
        thread::scope(|s| {
            s.spawn(|| {
                let _ga = a.locker();
                let _gb = b.locker();
            });
        });
        thread::scope(|s| {
            s.spawn(|| {
                let _gb = b.locker();
                let _ga = a.locker();
            });
        });
    }

    let hazards = reg.hazards();
    assert_eq!(hazards.len(), 1);
    assert_eq!(hazards[0].kind, HazardKind::Cycle);
    assert!(logger.contains(LOCKDEP_TARGET, Level::Error, "itest_b -> itest_a"));
}

#[test]
fn test_data_mutexes_in_fixed_order() {
    let reg = Arc::new(LockRegistry::default());
    let accounts = tracked_mutex("accounts", &reg, 0i64);
    let journal = tracked_mutex("journal", &reg, Vec::new());

    run_threads(4, |i| {
        for n in 0..50 {
            let mut acc = accounts.lock();
            let mut log = journal.lock();
            *acc += 1;
            log.push((i, n));
        }
    });

    assert_eq!(*accounts.lock(), 200);
    assert_eq!(journal.lock().len(), 200);
    assert_eq!(reg.hazard_count(), 0);
}
