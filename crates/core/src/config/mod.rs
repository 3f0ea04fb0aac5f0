//! 配置管理
//!
//! 加载顺序：结构体默认值 → TOML 配置文件 → `DISPATCH__` 前缀的环境变量。

pub mod models;


pub use models::*;
