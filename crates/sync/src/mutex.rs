//! 带所有权记录和锁序跟踪的互斥锁
//!
//! [`TrackedMutex`] 在操作系统级别的阻塞锁之上记录持有者线程和持有次数，
//! 可选地支持同一线程递归加锁，并在加锁、解锁的前后通知 [`LockRegistry`]。
//!
//! 违反使用约定（非递归锁被持有者再次加锁、非持有者解锁、解锁未加锁的锁、
//! 销毁仍被持有的锁）都会直接 panic。

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use bitflags::bitflags;
use lock_api::{GetThreadId, GuardNoSend, RawMutex as _};
use parking_lot::{RawMutex, RawThreadId};

use crate::lockdep::{self, LockId, LockRegistry};

bitflags! {
    /// [`TrackedMutex`] 的行为选项
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MutexFlags: u8 {
        /// 允许持有者线程递归加锁
        const RECURSIVE = 1 << 0;
        /// 参与锁序检测
        const LOCKDEP = 1 << 1;
        /// 加锁时采集调用栈，用于隐患报告
        const BACKTRACE = 1 << 2;
    }
}

/// 尚未向注册表登记
const NO_ID: usize = usize::MAX;
/// 没有持有者
const NO_OWNER: usize = 0;

#[inline]
fn current_thread_id() -> usize {
    RawThreadId::INIT.nonzero_thread_id().get()
}

/// 带所有权记录和可选锁序跟踪的互斥锁。
///
/// 状态：未加锁 -> 已加锁(持有者, 次数=1) -> 未加锁。
/// 递归锁的持有者每次再加锁都把次数加一，需要同样次数的 [`unlock`](Self::unlock) 才会释放。
///
/// # 示例
/// ```
/// use std::sync::Arc;
/// use sync::{LockRegistry, TrackedMutex};
///
/// let registry = Arc::new(LockRegistry::default());
/// let m = TrackedMutex::new("osd_lock", &registry);
/// m.lock();
/// assert!(m.is_locked_by_me());
/// m.unlock();
/// assert!(!m.is_locked());
/// ```
pub struct TrackedMutex {
    name: Cow<'static, str>,
    flags: MutexFlags,
    registry: Option<Arc<LockRegistry>>,
    /// 注册表分配的标识，首次跟踪加锁时登记
    id: AtomicUsize,
    raw: RawMutex,
    /// 持有次数
    nlock: AtomicUsize,
    /// 持有者线程标识
    owner: AtomicUsize,
    /// 当前这次持有是否向注册表报告过
    tracked: AtomicBool,
}

impl TrackedMutex {
    /// 创建不参与锁序检测的非递归锁
    pub const fn untracked(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            flags: MutexFlags::empty(),
            registry: None,
            id: AtomicUsize::new(NO_ID),
            raw: RawMutex::INIT,
            nlock: AtomicUsize::new(0),
            owner: AtomicUsize::new(NO_OWNER),
            tracked: AtomicBool::new(false),
        }
    }

    /// 创建参与锁序检测的非递归锁
    pub fn new(name: impl Into<Cow<'static, str>>, registry: &Arc<LockRegistry>) -> Self {
        Self::with_flags(name, MutexFlags::LOCKDEP, Some(Arc::clone(registry)))
    }

    /// 创建参与锁序检测的递归锁
    pub fn recursive(name: impl Into<Cow<'static, str>>, registry: &Arc<LockRegistry>) -> Self {
        Self::with_flags(
            name,
            MutexFlags::RECURSIVE | MutexFlags::LOCKDEP,
            Some(Arc::clone(registry)),
        )
    }

    /// 按给定选项创建锁。没有注册表时 [`MutexFlags::LOCKDEP`] 不起作用。
    pub fn with_flags(
        name: impl Into<Cow<'static, str>>,
        flags: MutexFlags,
        registry: Option<Arc<LockRegistry>>,
    ) -> Self {
        Self {
            name: name.into(),
            flags,
            registry,
            id: AtomicUsize::new(NO_ID),
            raw: RawMutex::INIT,
            nlock: AtomicUsize::new(0),
            owner: AtomicUsize::new(NO_OWNER),
            tracked: AtomicBool::new(false),
        }
    }

    /// 锁名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 行为选项
    pub fn flags(&self) -> MutexFlags {
        self.flags
    }

    /// 是否为递归锁
    pub fn is_recursive(&self) -> bool {
        self.flags.contains(MutexFlags::RECURSIVE)
    }

    /// 已分配的注册表标识，尚未登记时为 `None`
    pub fn lock_id(&self) -> Option<LockId> {
        match self.id.load(Ordering::Acquire) {
            NO_ID => None,
            id => Some(LockId::new(id)),
        }
    }

    /// 本次加锁需要通知的注册表
    fn tracker(&self) -> Option<&LockRegistry> {
        if !self.flags.contains(MutexFlags::LOCKDEP) || !lockdep::is_enabled() {
            return None;
        }
        self.registry.as_deref()
    }

    /// 按名字懒注册，结果缓存在 `id` 中
    fn register(&self, registry: &LockRegistry) -> LockId {
        if let Some(id) = self.lock_id() {
            return id;
        }
        let id = registry.register(&self.name);
        match self
            .id
            .compare_exchange(NO_ID, id.index(), Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => id,
            Err(existing) => {
                // 另一个线程抢先登记，撤销本次多出来的注册
                registry.unregister(id);
                LockId::new(existing)
            }
        }
    }

    /// 持有者再次加锁。返回 false 表示当前线程不是持有者。
    fn reenter(&self, me: usize) -> bool {
        if self.owner.load(Ordering::Relaxed) != me {
            return false;
        }
        assert!(
            self.is_recursive(),
            "TrackedMutex `{}`: recursive lock of non-recursive mutex",
            self.name
        );
        self.nlock.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn post_lock(&self, me: usize, tracker: Option<&LockRegistry>) {
        let n = self.nlock.load(Ordering::Relaxed);
        assert!(n == 0, "TrackedMutex `{}`: acquired with nlock {n}", self.name);
        self.owner.store(me, Ordering::Relaxed);
        self.nlock.store(1, Ordering::Relaxed);
        self.tracked.store(tracker.is_some(), Ordering::Relaxed);
        if let Some(registry) = tracker {
            let id = self.register(registry);
            registry.locked(id, self.flags.contains(MutexFlags::BACKTRACE));
        }
    }

    /// 阻塞直到获得锁
    ///
    /// # Panics
    /// 非递归锁被持有者再次加锁时 panic。
    pub fn lock(&self) {
        let me = current_thread_id();
        if self.reenter(me) {
            return;
        }
        let tracker = self.tracker();
        if let Some(registry) = tracker {
            let id = self.register(registry);
            registry.will_lock(
                id,
                self.is_recursive(),
                self.flags.contains(MutexFlags::BACKTRACE),
            );
        }
        self.raw.lock();
        self.post_lock(me, tracker);
    }

    /// 尝试获得锁，从不阻塞。
    ///
    /// 非递归锁的持有者再次调用时返回 `false`。
    pub fn try_lock(&self) -> bool {
        let me = current_thread_id();
        if self.owner.load(Ordering::Relaxed) == me {
            if !self.is_recursive() {
                return false;
            }
            self.nlock.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        if !self.raw.try_lock() {
            return false;
        }
        self.post_lock(me, self.tracker());
        true
    }

    /// 释放一次持有
    ///
    /// # Panics
    /// 锁未被持有，或调用线程不是持有者时 panic。
    pub fn unlock(&self) {
        let me = current_thread_id();
        let n = self.nlock.load(Ordering::Relaxed);
        assert!(n > 0, "TrackedMutex `{}`: unlock of unlocked mutex", self.name);
        assert!(
            self.owner.load(Ordering::Relaxed) == me,
            "TrackedMutex `{}`: unlock by non-owner thread",
            self.name
        );
        if n > 1 {
            self.nlock.store(n - 1, Ordering::Relaxed);
            return;
        }

        if self.tracked.swap(false, Ordering::Relaxed) {
            if let (Some(registry), Some(id)) = (self.registry.as_deref(), self.lock_id()) {
                registry.will_unlock(id);
            }
        }
        self.owner.store(NO_OWNER, Ordering::Relaxed);
        self.nlock.store(0, Ordering::Relaxed);
        // SAFETY: 上面已确认当前线程持有该锁
        unsafe { self.raw.unlock() };
    }

    /// 锁是否被任意线程持有
    pub fn is_locked(&self) -> bool {
        self.nlock.load(Ordering::Relaxed) > 0
    }

    /// 锁是否被当前线程持有
    pub fn is_locked_by_me(&self) -> bool {
        self.is_locked() && self.owner.load(Ordering::Relaxed) == current_thread_id()
    }

    /// 加锁并返回在离开作用域时解锁的 RAII 保护器
    #[must_use = "锁会在保护器被丢弃时立即释放"]
    pub fn locker(&self) -> Locker<'_> {
        self.lock();
        Locker { mutex: self }
    }
}

impl Drop for TrackedMutex {
    fn drop(&mut self) {
        if !thread::panicking() {
            let n = *self.nlock.get_mut();
            assert!(
                n == 0,
                "TrackedMutex `{}` destroyed while locked (nlock {n})",
                self.name
            );
        }
        let id = *self.id.get_mut();
        if id == NO_ID {
            return;
        }
        let Some(registry) = self.registry.as_deref() else {
            return;
        };
        let id = LockId::new(id);
        // 展开时随锁一起销毁：同名的锁可能还活着，持有记录要单独撤掉
        if *self.tracked.get_mut() && *self.owner.get_mut() == current_thread_id() {
            registry.will_unlock(id);
        }
        registry.unregister(id);
    }
}

impl fmt::Debug for TrackedMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedMutex")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("id", &self.lock_id())
            .field("nlock", &self.nlock.load(Ordering::Relaxed))
            .finish()
    }
}

/// [`TrackedMutex::locker`] 返回的 RAII 保护器
pub struct Locker<'a> {
    mutex: &'a TrackedMutex,
}

impl Locker<'_> {
    /// 被保护的锁
    pub fn mutex(&self) -> &TrackedMutex {
        self.mutex
    }
}

impl Drop for Locker<'_> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

// SAFETY: 非递归的 TrackedMutex 在持有期间拒绝任何再次加锁（持有者 panic，其它线程阻塞），
// 满足 RawMutex 的互斥要求；递归锁不能用来保护数据，在这里直接 panic。
unsafe impl lock_api::RawMutex for TrackedMutex {
    const INIT: Self = TrackedMutex::untracked("");

    type GuardMarker = GuardNoSend;

    fn lock(&self) {
        assert!(
            !self.is_recursive(),
            "TrackedMutex `{}`: recursive mutex cannot guard data",
            self.name
        );
        TrackedMutex::lock(self);
    }

    fn try_lock(&self) -> bool {
        assert!(
            !self.is_recursive(),
            "TrackedMutex `{}`: recursive mutex cannot guard data",
            self.name
        );
        TrackedMutex::try_lock(self)
    }

    unsafe fn unlock(&self) {
        TrackedMutex::unlock(self);
    }

    fn is_locked(&self) -> bool {
        TrackedMutex::is_locked(self)
    }
}

/// 由 [`TrackedMutex`] 保护的数据
pub type Mutex<T> = lock_api::Mutex<TrackedMutex, T>;

/// [`Mutex`] 的保护器
pub type MutexGuard<'a, T> = lock_api::MutexGuard<'a, TrackedMutex, T>;

/// 创建参与锁序检测、由 [`TrackedMutex`] 保护的数据锁
pub fn tracked_mutex<T>(
    name: impl Into<Cow<'static, str>>,
    registry: &Arc<LockRegistry>,
    data: T,
) -> Mutex<T> {
    Mutex::from_raw(TrackedMutex::new(name, registry), data)
}
