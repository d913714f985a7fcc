//! 日志 Mock
//!
//! 捕获所有经由 `log` 门面输出的记录，供测试断言诊断输出。
//! `log` 只允许安装一次 logger，因此整个测试进程共享同一个实例，
//! 断言时应按 target 和测试专用的锁名过滤。

use std::sync::Once;

use lazy_static::lazy_static;
use log::{Level, LevelFilter, Log, Metadata};
use parking_lot::Mutex;

/// 一条被捕获的日志
#[derive(Debug, Clone)]
pub struct Record {
    /// 子系统标识
    pub target: String,
    /// 级别
    pub level: Level,
    /// 格式化后的消息
    pub message: String,
}

/// 记录所有日志的 logger
pub struct CapturingLogger {
    records: Mutex<Vec<Record>>,
}

lazy_static! {
    static ref LOGGER: CapturingLogger = CapturingLogger {
        records: Mutex::new(Vec::new()),
    };
}

static INIT: Once = Once::new();

/// 安装全局捕获 logger，可重复调用
pub fn install() -> &'static CapturingLogger {
    INIT.call_once(|| {
        if log::set_logger(&*LOGGER).is_ok() {
            log::set_max_level(LevelFilter::Trace);
        }
    });
    &LOGGER
}

impl CapturingLogger {
    /// 指定 target 下的全部记录
    pub fn records(&self, target: &str) -> Vec<Record> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.target == target)
            .cloned()
            .collect()
    }

    /// 指定 target 下是否有包含 `needle` 的指定级别记录
    pub fn contains(&self, target: &str, level: Level, needle: &str) -> bool {
        self.records
            .lock()
            .iter()
            .any(|r| r.target == target && r.level == level && r.message.contains(needle))
    }

    /// 指定 target 下包含 `needle` 的记录条数
    pub fn count(&self, target: &str, needle: &str) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.target == target && r.message.contains(needle))
            .count()
    }
}

impl Log for CapturingLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        self.records.lock().push(Record {
            target: record.target().to_string(),
            level: record.level(),
            message: record.args().to_string(),
        });
    }

    fn flush(&self) {}
}
