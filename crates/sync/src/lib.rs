//! 同步原语
//!
//! 向服务运行时的其它模块提供引用计数对象和带锁序检测的互斥锁：
//!
//! - [`RefCounted`] - 原子引用计数对象，最后一个引用释放时销毁
//! - [`Latch`] - 带结果值的一次性完成信号，拥有独立的引用计数
//! - [`WaitableRefCounted`] - 可以阻塞等待最后一个引用释放的引用计数对象
//! - [`TrackedMutex`] - 记录持有者、可递归、参与锁序检测的互斥锁
//! - [`LockRegistry`] - 记录加锁先后关系并报告潜在死锁的注册表
//!
//! # 诊断日志
//!
//! 所有诊断信息都通过 `log` 门面输出，target 即子系统标识：
//! 引用计数变化使用 [`REFS_TARGET`]（trace 级别），锁序检测使用 [`LOCKDEP_TARGET`]。
//! 是否输出由使用方安装的 logger 决定，日志从不影响控制流。
//!
//! # 错误处理
//!
//! 本 crate 没有可恢复的错误路径。违反使用约定（解锁未加锁的锁、
//! 非递归锁被持有者再次加锁等）属于调用方的 bug，会直接 panic。

mod config;
pub mod lockdep;
mod latch;
mod mutex;
mod refcount;
mod waitable;

#[cfg(test)]
mod tests;

pub use config::{DEFAULT_MAX_LOCKS, LATCH_DRAINED, LOCKDEP_TARGET, REFS_TARGET};
pub use latch::Latch;
pub use lockdep::{HazardKind, LockId, LockOrderHazard, LockRegistry, LockdepConfig};
pub use mutex::{Locker, Mutex, MutexFlags, MutexGuard, TrackedMutex, tracked_mutex};
pub use refcount::{RefCount, RefCounted};
pub use waitable::WaitableRefCounted;
