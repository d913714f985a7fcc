//! 配置常量
//!
//! 锁注册表容量、诊断日志的子系统标识等编译期默认值。

/// 锁注册表默认可容纳的不同锁名数量
pub const DEFAULT_MAX_LOCKS: usize = 4096;

/// 引用计数诊断日志的 target
pub const REFS_TARGET: &str = "refs";

/// 锁序检测诊断日志的 target
pub const LOCKDEP_TARGET: &str = "lockdep";

/// 对象引用全部释放时写入 [`Latch`](crate::Latch) 的结果值
pub const LATCH_DRAINED: i32 = 0;
