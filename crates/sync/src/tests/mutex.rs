use super::*;

use crate::{Mutex, tracked_mutex};

static GLOBAL: TrackedMutex = TrackedMutex::untracked("global");

#[test]
fn test_lock_unlock() {
    let reg = registry();
    let m = TrackedMutex::new("m", &reg);
    assert!(!m.is_locked());
    assert_eq!(m.lock_id(), None);

    m.lock();
    assert!(m.is_locked());
    assert!(m.is_locked_by_me());
    assert_eq!(m.lock_id(), reg.lookup("m"));

    thread::scope(|s| {
        s.spawn(|| {
            assert!(m.is_locked());
            assert!(!m.is_locked_by_me());
        });
    });

    m.unlock();
    assert!(!m.is_locked());
    assert!(!m.is_locked_by_me());
}

#[test]
#[should_panic(expected = "recursive lock of non-recursive mutex")]
fn test_non_recursive_relock_panics() {
    let reg = registry();
    let m = TrackedMutex::new("m", &reg);
    m.lock();
    m.lock();
}

#[test]
#[should_panic(expected = "recursive lock of non-recursive mutex")]
fn test_untracked_relock_panics() {
    let m = TrackedMutex::untracked("plain");
    m.lock();
    m.lock();
}

#[test]
fn test_recursive_nested() {
    const DEPTH: usize = 5;
    let reg = registry();
    let m = TrackedMutex::recursive("r", &reg);
    assert!(m.is_recursive());

    for _ in 0..DEPTH {
        m.lock();
    }
    assert!(m.try_lock());
    m.unlock();

    for i in 0..DEPTH {
        assert!(m.is_locked(), "released after {i} unlocks");
        m.unlock();
    }
    assert!(!m.is_locked());
    assert!(reg.held_by_current_thread().is_empty());
}

#[test]
fn test_try_lock_contended_does_not_block() {
    let reg = registry();
    let m = TrackedMutex::new("m", &reg);
    m.lock();

    thread::scope(|s| {
        s.spawn(|| {
            let start = Instant::now();
            assert!(!m.try_lock());
            assert!(start.elapsed() < Duration::from_secs(1));
        });
    });

    m.unlock();
    assert!(m.try_lock());
    assert!(m.is_locked_by_me());
    m.unlock();
}

#[test]
fn test_try_lock_by_owner_non_recursive() {
    let m = TrackedMutex::untracked("plain");
    assert!(m.try_lock());
    assert!(!m.try_lock());
    m.unlock();
    assert!(!m.is_locked());
}

#[test]
fn test_lock_blocks_other_thread() {
    let reg = registry();
    let m = TrackedMutex::new("m", &reg);
    let acquired = AtomicBool::new(false);
    m.lock();

    thread::scope(|s| {
        s.spawn(|| {
            m.lock();
            acquired.store(true, Ordering::SeqCst);
            m.unlock();
        });
        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        m.unlock();
    });

    assert!(acquired.load(Ordering::SeqCst));
}

#[test]
#[should_panic(expected = "unlock of unlocked mutex")]
fn test_unlock_unlocked_panics() {
    let m = TrackedMutex::untracked("plain");
    m.unlock();
}

#[test]
fn test_unlock_by_non_owner_panics() {
    let m = TrackedMutex::untracked("plain");
    m.lock();
    let r = thread::scope(|s| s.spawn(|| m.unlock()).join());
    assert!(r.is_err());
    assert!(m.is_locked_by_me());
    m.unlock();
}

#[test]
#[should_panic(expected = "destroyed while locked")]
fn test_drop_locked_panics() {
    let m = TrackedMutex::untracked("plain");
    m.lock();
    drop(m);
}

#[test]
fn test_drop_locked_while_unwinding_clears_held() {
    let reg = registry();
    let survivor = TrackedMutex::new("unwound", &reg);

    let r = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let m = TrackedMutex::new("unwound", &reg);
        m.lock();
        panic!("critical section failed");
    }));
    assert!(r.is_err());

    // 同名的锁仍然存活，持有记录不能残留
    assert!(reg.held_by_current_thread().is_empty());
    survivor.lock();
    survivor.unlock();
    assert_eq!(reg.hazard_count(), 0);
}

#[test]
fn test_locker_releases() {
    let reg = registry();
    let m = TrackedMutex::new("m", &reg);
    {
        let l = m.locker();
        assert!(l.mutex().is_locked_by_me());
    }
    assert!(!m.is_locked());
}

#[test]
fn test_static_untracked() {
    GLOBAL.lock();
    assert!(GLOBAL.is_locked_by_me());
    assert_eq!(GLOBAL.name(), "global");
    GLOBAL.unlock();
}

#[test]
fn test_drop_unregisters() {
    let reg = registry();
    let a = TrackedMutex::new("shared", &reg);
    let b = TrackedMutex::new("shared", &reg);
    a.lock();
    a.unlock();
    b.lock();
    b.unlock();
    assert_eq!(a.lock_id(), b.lock_id());

    drop(a);
    assert!(reg.lookup("shared").is_some());
    drop(b);
    assert_eq!(reg.lookup("shared"), None);
    assert!(reg.is_empty());
}

#[test]
fn test_flags_without_lockdep_skip_registry() {
    let reg = registry();
    let m = TrackedMutex::with_flags("quiet", MutexFlags::empty(), Some(reg.clone()));
    m.lock();
    assert_eq!(m.lock_id(), None);
    assert!(reg.held_by_current_thread().is_empty());
    m.unlock();
    assert!(reg.is_empty());
}

#[test]
fn test_data_mutex() {
    let reg = registry();
    let counter: Mutex<u64> = tracked_mutex("counter", &reg, 0);

    test_support::run_threads(4, |_| {
        for _ in 0..1000 {
            *counter.lock() += 1;
        }
    });

    assert_eq!(*counter.lock(), 4000);
    assert!(counter.try_lock().is_some());
    assert_eq!(reg.hazard_count(), 0);
}

#[test]
#[should_panic(expected = "recursive mutex cannot guard data")]
fn test_recursive_data_mutex_panics() {
    let reg = registry();
    let m: Mutex<u8> = Mutex::from_raw(TrackedMutex::recursive("r", &reg), 0);
    let _g = m.lock();
}
