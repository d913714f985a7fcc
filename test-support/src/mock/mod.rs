//! Mock 实现模块
//!
//! 提供协作方的 Mock 实现，用于测试

pub mod log;
