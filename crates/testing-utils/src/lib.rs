//! # Dispatch Testing Utils
//!
//! 工作区共享的测试工具：
//!
//! - **Mock Repositories**: 运单与订单仓储的内存实现，支持故障注入
//! - **Recording Notification Channel**: 记录所有推送事件的通知通道
//! - **Test Data Builders**: 运单与订单构建器
//!
//! ```toml
//! [dev-dependencies]
//! dispatch-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod mocks;

pub use builders::*;
pub use mocks::*;
