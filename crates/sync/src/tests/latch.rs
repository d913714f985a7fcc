use super::*;

#[test]
fn test_done_then_wait() {
    let latch = Latch::new();
    assert!(!latch.is_done());
    assert_eq!(latch.result(), None);

    latch.done(3);
    assert!(latch.is_done());
    assert_eq!(latch.wait(), 3);
    assert_eq!(latch.result(), Some(3));
}

#[test]
fn test_first_completion_wins() {
    let latch = Latch::new();
    latch.done(5);
    latch.done(7);
    assert_eq!(latch.wait(), 5);

    let latch = Latch::default();
    latch.complete();
    latch.done(9);
    assert_eq!(latch.wait(), 0);
}

#[test]
fn test_wait_blocks_until_done() {
    let latch = Latch::new();
    let returned = Arc::new(AtomicBool::new(false));

    let waiter = {
        let latch = latch.clone();
        let returned = returned.clone();
        thread::spawn(move || {
            let r = latch.wait();
            returned.store(true, Ordering::SeqCst);
            r
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!returned.load(Ordering::SeqCst));

    latch.done(-4);
    assert_eq!(waiter.join().unwrap(), -4);
    assert!(returned.load(Ordering::SeqCst));
}

#[test]
fn test_wakes_all_waiters() {
    let latch = Latch::new();
    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let latch = latch.clone();
            thread::spawn(move || latch.wait())
        })
        .collect();

    latch.done(11);
    for w in waiters {
        assert_eq!(w.join().unwrap(), 11);
    }
}

#[test]
fn test_clone_shares_refcount() {
    let latch = Latch::new();
    assert_eq!(latch.nref(), 1);
    let other = latch.clone();
    assert_eq!(latch.nref(), 2);

    // 原句柄释放后，另一个句柄仍然有效
    drop(latch);
    assert_eq!(other.nref(), 1);
    other.done(1);
    assert_eq!(other.wait(), 1);
}
