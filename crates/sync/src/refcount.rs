//! 引用计数
//!
//! [`RefCount`] 是裸的原子计数器，[`RefCounted`] 在其上提供侵入式的共享所有权句柄：
//! `get()` 复制一个句柄，`put()`（或直接 drop 句柄）释放一个引用，
//! 计数归零时由观察到 1 -> 0 的那个线程销毁对象。

use core::fmt;
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ops::Deref;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering, fence};
use std::process;

use log::trace;

use crate::config::REFS_TARGET;

/// 计数上限，超过后视为泄漏导致的溢出
const MAX_REFCOUNT: usize = isize::MAX as usize;

/// 原子引用计数器
#[derive(Debug)]
pub struct RefCount {
    count: AtomicUsize,
}

impl RefCount {
    /// 以初始值 `initial` 创建计数器
    pub const fn new(initial: usize) -> Self {
        Self {
            count: AtomicUsize::new(initial),
        }
    }

    /// 计数加一，返回加一之前的值。
    ///
    /// 调用者必须已经持有一个引用，因此 Relaxed 即可。
    #[inline]
    pub fn inc(&self) -> usize {
        let old = self.count.fetch_add(1, Ordering::Relaxed);
        if old > MAX_REFCOUNT {
            process::abort();
        }
        old
    }

    /// 计数减一，返回减一之前的值。
    ///
    /// 返回 1 说明本次调用把计数降到了零，调用者负责销毁对象。
    /// 此时已经执行了 Acquire 屏障，其它持有者在各自 `dec` 之前的写入都对调用者可见。
    #[inline]
    pub fn dec(&self) -> usize {
        let old = self.count.fetch_sub(1, Ordering::Release);
        assert!(old != 0, "RefCount::dec: count already zero");
        if old == 1 {
            fence(Ordering::Acquire);
        }
        old
    }

    /// 当前计数（仅用于诊断）
    #[inline]
    pub fn get(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

struct RefInner<T> {
    nref: RefCount,
    data: T,
}

impl<T> Drop for RefInner<T> {
    fn drop(&mut self) {
        let n = self.nref.get();
        assert!(n == 0, "RefCounted destroyed with nref {n}");
    }
}

/// 引用计数对象的句柄。
///
/// 每个句柄代表一个引用。对象在最后一个句柄释放时销毁，
/// 此时会运行 `T` 的析构函数。
///
/// # 示例
/// ```
/// use sync::RefCounted;
///
/// let a = RefCounted::new(7);
/// let b = a.get();
/// assert_eq!(a.nref(), 2);
/// assert!(!a.put());
/// assert!(b.put()); // 最后一个引用，对象被销毁
/// ```
pub struct RefCounted<T> {
    ptr: NonNull<RefInner<T>>,
    _marker: PhantomData<RefInner<T>>,
}

// SAFETY: 与 Arc 相同，句柄可跨线程共享 T 的不可变引用并在任意线程销毁 T。
unsafe impl<T: Send + Sync> Send for RefCounted<T> {}
unsafe impl<T: Send + Sync> Sync for RefCounted<T> {}

impl<T> RefCounted<T> {
    /// 创建计数为 1 的对象
    pub fn new(data: T) -> Self {
        Self::from_cell(Box::new(RefInner {
            nref: RefCount::new(1),
            data,
        }))
    }

    /// 创建初始计数为 `n` 的对象，返回 `n` 个共享同一计数的句柄
    ///
    /// # Panics
    /// `n` 为 0 时 panic。
    pub fn with_refs(data: T, n: usize) -> Vec<Self> {
        assert!(n > 0, "RefCounted::with_refs: initial count must be positive");
        let first = Self::from_cell(Box::new(RefInner {
            nref: RefCount::new(n),
            data,
        }));
        let mut refs = Vec::with_capacity(n);
        for _ in 1..n {
            refs.push(Self {
                ptr: first.ptr,
                _marker: PhantomData,
            });
        }
        refs.push(first);
        refs
    }

    fn from_cell(cell: Box<RefInner<T>>) -> Self {
        Self {
            // SAFETY: Box::into_raw 永远不返回空指针
            ptr: unsafe { NonNull::new_unchecked(Box::into_raw(cell)) },
            _marker: PhantomData,
        }
    }

    fn cell(&self) -> &RefInner<T> {
        // SAFETY: 句柄存活期间计数至少为 1，对象不会被释放
        unsafe { self.ptr.as_ref() }
    }

    /// 增加一个引用，返回新的句柄
    pub fn get(&self) -> Self {
        let v = self.cell().nref.inc() + 1;
        trace!(target: REFS_TARGET, "RefCounted::get {:p} {} -> {}", self.ptr, v - 1, v);
        Self {
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }

    /// 释放当前句柄持有的引用。
    ///
    /// 返回 `true` 表示本次调用把计数降到零并销毁了对象。
    pub fn put(self) -> bool {
        let this = ManuallyDrop::new(self);
        // SAFETY: this 不会再被使用，也不会再次 drop
        unsafe { this.release() }
    }

    /// # Safety
    /// 每个句柄只能调用一次，调用后句柄不得再被使用。
    unsafe fn release(&self) -> bool {
        let ptr = self.ptr;
        let v = self.cell().nref.dec() - 1;
        trace!(target: REFS_TARGET, "RefCounted::put {:p} {} -> {}", ptr, v + 1, v);
        if v != 0 {
            return false;
        }
        // SAFETY: 计数已归零，没有其它句柄再访问该对象
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
        true
    }

    /// 当前引用计数（仅用于诊断）
    pub fn nref(&self) -> usize {
        self.cell().nref.get()
    }

    /// 两个句柄是否指向同一个对象
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }
}

impl<T> Deref for RefCounted<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.cell().data
    }
}

impl<T> Drop for RefCounted<T> {
    fn drop(&mut self) {
        // SAFETY: drop 对每个句柄只发生一次
        unsafe {
            self.release();
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for RefCounted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCounted")
            .field("nref", &self.nref())
            .field("data", &self.cell().data)
            .finish()
    }
}
