//! 锁序检测（lockdep）
//!
//! [`LockRegistry`] 按锁名为每一类锁分配一个小整数 [`LockId`]，并在运行过程中记录
//! "A 在 B 之前获取" 形式的有向边。一旦新边会与已有的边构成环，
//! 说明不同线程以不一致的顺序获取了这些锁，这是潜在的死锁，注册表会报告一次。
//!
//! 检测只是诊断手段：不会阻塞也不会拒绝加锁，也可能因为互不相关的调用路径
//! 恰好构成环而产生误报。
//!
//! 注册表由使用方在启动时创建一次，以 `Arc<LockRegistry>` 的形式传给每一个
//! [`TrackedMutex`](crate::TrackedMutex)。
//!
//! # 全局开关
//!
//! [`set_enabled`] 控制整个进程是否进行锁序跟踪，默认开启。

mod graph;
mod registry;

pub use registry::LockRegistry;

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::config::DEFAULT_MAX_LOCKS;

static LOCKDEP_ENABLED: AtomicBool = AtomicBool::new(true);

/// 打开或关闭整个进程的锁序跟踪
pub fn set_enabled(enabled: bool) {
    LOCKDEP_ENABLED.store(enabled, Ordering::Release);
}

/// 当前是否进行锁序跟踪
#[inline]
pub fn is_enabled() -> bool {
    LOCKDEP_ENABLED.load(Ordering::Acquire)
}

/// 注册表分配的锁标识
///
/// 同名的锁共享同一个标识；标识在该名字的所有注册都被注销之前保持不变。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockId(u32);

impl LockId {
    /// # Panics
    /// 下标超出 `u32` 范围时 panic。
    pub(crate) fn new(index: usize) -> Self {
        match u32::try_from(index) {
            Ok(raw) => Self(raw),
            Err(_) => panic!("lockdep: lock index {index} does not fit in a LockId"),
        }
    }

    /// 标识对应的下标
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 注册表配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockdepConfig {
    /// 可同时注册的不同锁名数量上限
    pub max_locks: usize,
    /// 报告隐患后是否 panic
    pub abort_on_hazard: bool,
    /// 是否对所有加锁都采集调用栈，不论锁自身是否要求
    pub force_backtrace: bool,
}

impl LockdepConfig {
    /// 默认配置：只记录日志，不强制采集调用栈
    pub const fn new() -> Self {
        Self {
            max_locks: DEFAULT_MAX_LOCKS,
            abort_on_hazard: false,
            force_backtrace: false,
        }
    }

    /// 设置锁名数量上限
    pub const fn max_locks(mut self, max_locks: usize) -> Self {
        self.max_locks = max_locks;
        self
    }

    /// 设置报告隐患后是否 panic
    pub const fn abort_on_hazard(mut self, abort: bool) -> Self {
        self.abort_on_hazard = abort;
        self
    }

    /// 设置是否强制采集调用栈
    pub const fn force_backtrace(mut self, force: bool) -> Self {
        self.force_backtrace = force;
        self
    }
}

impl Default for LockdepConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// 隐患类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HazardKind {
    /// 新的先后关系与已观察到的顺序构成环
    Cycle,
    /// 同一线程嵌套获取了同一类（同名）的非递归锁
    Recursive,
}

/// 一条锁序隐患报告
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOrderHazard {
    /// 隐患类型
    pub kind: HazardKind,
    /// 涉及的锁名。
    ///
    /// 对于 [`HazardKind::Cycle`]，按获取顺序排列：`locks[0]` 已被持有，
    /// 即将获取 `locks[1]`，而 `locks[1]` 到 `locks[0]` 之间已有的先后关系依次为
    /// `locks[1] -> locks[2] -> ... -> locks[0]`。
    pub locks: Vec<String>,
}

impl fmt::Display for LockOrderHazard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            HazardKind::Cycle => {
                write!(f, "lock order cycle: ")?;
                for (i, name) in self.locks.iter().enumerate() {
                    if i > 0 {
                        write!(f, " -> ")?;
                    }
                    write!(f, "{name}")?;
                }
                if let Some(first) = self.locks.first() {
                    write!(f, " -> {first}")?;
                }
                Ok(())
            }
            HazardKind::Recursive => {
                write!(f, "recursive lock of {}", self.locks.join(", "))
            }
        }
    }
}
