//! 核心功能模块
//!
//! 与图形 API 无关的基础设施：
//!
//! - `config`：从 `config.toml` 与命令行加载设置
//! - `error`：统一的错误类型
//! - `log`：基于 `tracing` 的日志初始化

pub mod config;
pub mod error;
pub mod log;

pub use config::Config;
pub use error::{GraphicsError, RenderError, Result};
