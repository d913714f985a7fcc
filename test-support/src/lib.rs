//! 测试支持 crate
//!
//! 提供 Mock 实现和多线程测试工具

pub mod mock;

use std::thread;

/// 启动 `n` 个线程执行 `f(i)`，等待全部结束并按线程序号返回结果。
///
/// 任一线程 panic 时，panic 会传播到调用者。
pub fn run_threads<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    let f = &f;
    thread::scope(|s| {
        let handles: Vec<_> = (0..n).map(|i| s.spawn(move || f(i))).collect();
        handles
            .into_iter()
            .map(|h| match h.join() {
                Ok(v) => v,
                Err(e) => std::panic::resume_unwind(e),
            })
            .collect()
    })
}
