//! 日志系统模块
//!
//! 基于 `tracing` 的结构化日志。帧循环事件使用 `trace!`，
//! 围栏等待使用 `debug!`，生命周期使用 `info!`，失败使用 `error!`。
//!
//! ```no_run
//! use frame_pacer::core::config::LogLevel;
//! use frame_pacer::core::log;
//!
//! log::init_logger(LogLevel::Debug, true, Some("logs/frame_pacer.log"));
//! tracing::info!(width = 1280, height = 720, "Swap chain created");
//! ```

use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use super::config::LogLevel;

/// 初始化日志系统
///
/// 必须在程序开始时调用一次。`RUST_LOG` 环境变量存在时优先于 `level`。
///
/// # 参数
///
/// * `level` - 日志级别
/// * `file_output` - 是否同时输出到按天滚动的文件
/// * `log_file_path` - 日志文件路径（可选，默认为 "frame_pacer.log"）
pub fn init_logger(level: LogLevel, file_output: bool, log_file_path: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(level)));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_ansi(true);

    if file_output {
        let log_path = log_file_path.unwrap_or("frame_pacer.log");
        let path = Path::new(log_path);
        let directory = path.parent().unwrap_or(Path::new("."));
        let filename = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("frame_pacer.log");

        let file_appender = RollingFileAppender::new(Rotation::DAILY, directory, filename);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false) // 文件不需要 ANSI 颜色
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .init();
    }
}

/// 测试中使用的日志初始化，可重复调用
#[cfg(test)]
pub(crate) fn init_test_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

fn filter_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive() {
        assert_eq!(filter_directive(LogLevel::Trace), "trace");
        assert_eq!(filter_directive(LogLevel::Info), "info");
        assert_eq!(filter_directive(LogLevel::Error), "error");
        assert!(EnvFilter::try_new(filter_directive(LogLevel::Warn)).is_ok());
    }
}
