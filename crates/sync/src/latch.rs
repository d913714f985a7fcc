//! 一次性完成信号
//!
//! [`Latch`] 自身就是一个 [`RefCounted`] 对象，生命周期独立于它所报告的对象：
//! 被观察的对象销毁后，持有 `Latch` 句柄的等待者仍可以安全地等待并读取结果。

use core::fmt;

use parking_lot::{Condvar, Mutex};

use crate::refcount::RefCounted;

#[derive(Debug, Default)]
struct LatchState {
    completed: bool,
    result: i32,
}

#[derive(Default)]
struct LatchCore {
    state: Mutex<LatchState>,
    cond: Condvar,
}

/// 带结果值的一次性完成信号。
///
/// 完成状态单调：第一次 [`done`](Latch::done) 写入结果，之后的调用不改变结果。
/// `clone()` 增加引用，drop 释放引用。
///
/// # 示例
/// ```
/// use sync::Latch;
///
/// let latch = Latch::new();
/// let waiter = latch.clone();
/// let t = std::thread::spawn(move || waiter.wait());
/// latch.done(5);
/// assert_eq!(t.join().unwrap(), 5);
/// ```
pub struct Latch {
    core: RefCounted<LatchCore>,
}

impl Latch {
    /// 创建一个未完成的 Latch，引用计数为 1
    pub fn new() -> Self {
        Self {
            core: RefCounted::new(LatchCore::default()),
        }
    }

    /// 阻塞直到 Latch 完成，返回完成时写入的结果。
    ///
    /// 没有超时，也不可取消。
    pub fn wait(&self) -> i32 {
        let mut state = self.core.state.lock();
        while !state.completed {
            self.core.cond.wait(&mut state);
        }
        state.result
    }

    /// 以结果 `r` 完成 Latch 并唤醒所有等待者
    pub fn done(&self, r: i32) {
        let mut state = self.core.state.lock();
        if !state.completed {
            state.result = r;
            state.completed = true;
        }
        self.core.cond.notify_all();
    }

    /// 以结果 0 完成 Latch
    pub fn complete(&self) {
        self.done(0);
    }

    /// 是否已经完成
    pub fn is_done(&self) -> bool {
        self.core.state.lock().completed
    }

    /// 已完成时返回结果，否则返回 `None`
    pub fn result(&self) -> Option<i32> {
        let state = self.core.state.lock();
        state.completed.then_some(state.result)
    }

    /// Latch 自身的引用计数
    pub fn nref(&self) -> usize {
        self.core.nref()
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Latch {
    fn clone(&self) -> Self {
        Self {
            core: self.core.get(),
        }
    }
}

impl fmt::Debug for Latch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.core.state.lock();
        f.debug_struct("Latch")
            .field("completed", &state.completed)
            .field("result", &state.result)
            .field("nref", &self.core.nref())
            .finish()
    }
}
