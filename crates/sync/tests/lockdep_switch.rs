//! The process-wide lockdep switch. Kept in its own test binary because it
//! changes global state.

use std::sync::Arc;
use std::thread;

use sync::{LockRegistry, TrackedMutex, lockdep};

fn lock_in_order(first: &TrackedMutex, second: &TrackedMutex) {
    thread::scope(|s| {
        s.spawn(|| {
            let _g1 = first.locker();
            let _g2 = second.locker();
        });
    });
}

#[test]
fn test_disabled_switch_skips_tracking() {
    assert!(lockdep::is_enabled());
    let reg = Arc::new(LockRegistry::default());
    let a = TrackedMutex::new("a", &reg);
    let b = TrackedMutex::new("b", &reg);

    lockdep::set_enabled(false);
    lock_in_order(&a, &b);
    lock_in_order(&b, &a);
    assert_eq!(reg.hazard_count(), 0);
    assert_eq!(reg.edge_count(), 0);
    assert!(reg.is_empty());

    // 关闭期间加的锁，在开启后释放也不会打乱注册表
    a.lock();
    lockdep::set_enabled(true);
    a.unlock();
    assert!(reg.held_by_current_thread().is_empty());

    lock_in_order(&a, &b);
    lock_in_order(&b, &a);
    assert_eq!(reg.hazard_count(), 1);
}
