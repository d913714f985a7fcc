// Unit tests for sync.
//
// One module per primitive. Contract violations are checked with `should_panic`;
// cross-thread behaviour uses `test_support::run_threads` or plain `std::thread`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::lockdep::{HazardKind, LockRegistry, LockdepConfig};
use crate::{Latch, MutexFlags, RefCount, RefCounted, TrackedMutex, WaitableRefCounted};

/// Increments a shared counter when dropped, to observe destruction.
struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn registry() -> Arc<LockRegistry> {
    Arc::new(LockRegistry::default())
}

/// Spin (with a short sleep) until `cond` holds, failing after a generous timeout.
fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

mod latch;
mod mutex;
