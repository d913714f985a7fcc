//! 可等待引用计数对象
//!
//! 任何持有者都可以选择 [`put`](WaitableRefCounted::put) 立即返回，
//! 或 [`put_wait`](WaitableRefCounted::put_wait) 阻塞到最后一个引用被释放、对象被销毁为止。
//!
//! 等待发生在对象之外独立计数的 [`Latch`] 上：释放引用前先对 Latch 加一个临时引用，
//! 这样即使其它线程随后销毁了对象，等待者访问的 Latch 依然有效。

use core::fmt;
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ops::Deref;
use core::ptr::NonNull;

use log::trace;

use crate::config::{LATCH_DRAINED, REFS_TARGET};
use crate::latch::Latch;
use crate::refcount::RefCount;

struct WaitableInner<T> {
    nref: RefCount,
    latch: Latch,
    data: T,
}

impl<T> Drop for WaitableInner<T> {
    fn drop(&mut self) {
        let n = self.nref.get();
        assert!(n == 0, "WaitableRefCounted destroyed with nref {n}");
    }
}

/// 可等待最后一个引用释放的引用计数对象句柄。
///
/// 每个句柄代表一个引用，drop 句柄等价于 [`put`](Self::put)。
///
/// # 示例
/// ```
/// use sync::WaitableRefCounted;
///
/// let obj = WaitableRefCounted::new(vec![1, 2, 3]);
/// let other = obj.get();
/// let t = std::thread::spawn(move || other.put_wait());
/// let destroyed_here = obj.put();
/// let destroyed_there = t.join().unwrap();
/// assert!(destroyed_here ^ destroyed_there);
/// ```
pub struct WaitableRefCounted<T> {
    ptr: NonNull<WaitableInner<T>>,
    _marker: PhantomData<WaitableInner<T>>,
}

// SAFETY: 与 RefCounted 相同
unsafe impl<T: Send + Sync> Send for WaitableRefCounted<T> {}
unsafe impl<T: Send + Sync> Sync for WaitableRefCounted<T> {}

impl<T> WaitableRefCounted<T> {
    /// 创建计数为 1 的对象，并分配一个独立的 Latch
    pub fn new(data: T) -> Self {
        let inner = Box::new(WaitableInner {
            nref: RefCount::new(1),
            latch: Latch::new(),
            data,
        });
        Self {
            // SAFETY: Box::into_raw 永远不返回空指针
            ptr: unsafe { NonNull::new_unchecked(Box::into_raw(inner)) },
            _marker: PhantomData,
        }
    }

    fn inner(&self) -> &WaitableInner<T> {
        // SAFETY: 句柄存活期间计数至少为 1
        unsafe { self.ptr.as_ref() }
    }

    /// 增加一个引用
    pub fn get(&self) -> Self {
        let v = self.inner().nref.inc() + 1;
        trace!(target: REFS_TARGET, "WaitableRefCounted::get {:p} {} -> {}", self.ptr, v - 1, v);
        Self {
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }

    /// 释放引用并立即返回。
    ///
    /// 返回 `true` 表示本次调用销毁了对象。
    pub fn put(self) -> bool {
        let this = ManuallyDrop::new(self);
        // SAFETY: this 之后不再使用
        unsafe { this.release(false) }
    }

    /// 释放引用，并阻塞到对象被销毁为止。
    ///
    /// 如果本次调用就是最后一个引用，则直接销毁对象并返回 `true`，不会阻塞。
    pub fn put_wait(self) -> bool {
        let this = ManuallyDrop::new(self);
        // SAFETY: this 之后不再使用
        unsafe { this.release(true) }
    }

    /// # Safety
    /// 每个句柄只能调用一次，调用后句柄不得再被使用。
    unsafe fn release(&self, wait: bool) -> bool {
        let ptr = self.ptr;
        // 临时引用保证 Latch 在对象被其它线程销毁后依然有效
        let latch = self.inner().latch.clone();
        let v = self.inner().nref.dec() - 1;
        trace!(target: REFS_TARGET, "WaitableRefCounted::put {:p} {} -> {}", ptr, v + 1, v);
        let destroyed = if v == 0 {
            latch.done(LATCH_DRAINED);
            // SAFETY: 计数已归零，没有其它句柄再访问该对象
            drop(unsafe { Box::from_raw(ptr.as_ptr()) });
            true
        } else {
            if wait {
                latch.wait();
            }
            false
        };
        drop(latch);
        destroyed
    }

    /// 返回对象 Latch 的一个新引用。
    ///
    /// 调用者可以在不持有对象引用的情况下等待对象被销毁。
    pub fn latch(&self) -> Latch {
        self.inner().latch.clone()
    }

    /// 当前引用计数（仅用于诊断）
    pub fn nref(&self) -> usize {
        self.inner().nref.get()
    }
}

impl<T> Deref for WaitableRefCounted<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner().data
    }
}

impl<T> Drop for WaitableRefCounted<T> {
    fn drop(&mut self) {
        // SAFETY: drop 对每个句柄只发生一次
        unsafe {
            self.release(false);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for WaitableRefCounted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitableRefCounted")
            .field("nref", &self.nref())
            .field("data", &self.inner().data)
            .finish()
    }
}
