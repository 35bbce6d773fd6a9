//! 配置管理模块
//!
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [window]
//! width = 1280
//! height = 720
//! title = "frame_pacer"
//! resizable = true
//!
//! [graphics]
//! backend = "headless"  # 或 "dx12"
//! vsync = true
//! frame_resources = 3
//! object_count = 4
//! clear_color = [0.69, 0.77, 0.87, 1.0]
//!
//! [headless]
//! gpu_latency_ms = 4
//! frames = 120
//!
//! [logging]
//! level = "info"      # trace, debug, info, warn, error
//! file_output = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{ConfigError, Result};

/// 配置总表
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 窗口配置
    #[serde(default)]
    pub window: WindowConfig,

    /// 图形配置
    #[serde(default)]
    pub graphics: GraphicsConfig,

    /// headless 后端配置
    #[serde(default)]
    pub headless: HeadlessConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 窗口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_title")]
    pub title: String,

    #[serde(default = "default_resizable")]
    pub resizable: bool,
}

/// 图形配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsConfig {
    /// 图形后端选择
    #[serde(default = "default_backend")]
    pub backend: GraphicsBackend,

    /// 垂直同步
    #[serde(default = "default_vsync")]
    pub vsync: bool,

    /// 帧资源环的槽位数，至少为 2
    #[serde(default = "default_frame_resources")]
    pub frame_resources: usize,

    /// 每帧绘制的物体数量（决定对象常量缓冲区的元素个数）
    #[serde(default = "default_object_count")]
    pub object_count: usize,

    /// 清屏颜色 RGBA
    #[serde(default = "default_clear_color")]
    pub clear_color: [f32; 4],
}

/// headless 后端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadlessConfig {
    /// 模拟 GPU 完成一次提交所需的时间（毫秒）
    #[serde(default = "default_gpu_latency_ms")]
    pub gpu_latency_ms: u64,

    /// 运行的帧数
    #[serde(default = "default_frames")]
    pub frames: u64,
}

/// 图形后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsBackend {
    /// DirectX 12 后端（仅 Windows）
    Dx12,
    /// 软件模拟设备
    Headless,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    #[serde(default = "default_file_output")]
    pub file_output: bool,

    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_title() -> String { "frame_pacer".to_string() }
fn default_resizable() -> bool { true }
fn default_vsync() -> bool { true }
fn default_frame_resources() -> usize { 3 }
fn default_object_count() -> usize { 4 }
fn default_clear_color() -> [f32; 4] { [0.690, 0.769, 0.871, 1.0] }
fn default_gpu_latency_ms() -> u64 { 4 }
fn default_frames() -> u64 { 120 }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "frame_pacer.log".to_string() }

fn default_backend() -> GraphicsBackend {
    if cfg!(target_os = "windows") {
        GraphicsBackend::Dx12
    } else {
        GraphicsBackend::Headless
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
            resizable: default_resizable(),
        }
    }
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            vsync: default_vsync(),
            frame_resources: default_frame_resources(),
            object_count: default_object_count(),
            clear_color: default_clear_color(),
        }
    }
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            gpu_latency_ms: default_gpu_latency_ms(),
            frames: default_frames(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl Config {
    /// 从配置文件加载
    ///
    /// # 参数
    ///
    /// * `path` - 配置文件路径
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str))?;

        Self::from_toml_str(&contents)
    }

    /// 从 TOML 文本解析
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在或无法解析则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--dx12`: 使用 DirectX 12 后端
    /// - `--headless`: 使用软件模拟设备
    /// - `--frames <n>`: headless 模式下运行的帧数
    /// - `--width <value>` / `--height <value>`: 窗口尺寸
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        if args.iter().any(|a| a == "--dx12") {
            self.graphics.backend = GraphicsBackend::Dx12;
        }

        if args.iter().any(|a| a == "--headless") {
            self.graphics.backend = GraphicsBackend::Headless;
        }

        if let Some(frames) = arg_value(&args, "--frames") {
            self.headless.frames = frames;
        }

        if let Some(width) = arg_value(&args, "--width") {
            self.window.width = width;
        }

        if let Some(height) = arg_value(&args, "--height") {
            self.window.height = height;
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(invalid("window.width/height", "Window dimensions must be greater than 0"));
        }

        if self.graphics.frame_resources < 2 {
            return Err(invalid(
                "graphics.frame_resources",
                "At least 2 frame resources are required to overlap CPU and GPU work",
            ));
        }

        if self.graphics.object_count == 0 {
            return Err(invalid("graphics.object_count", "At least one object must be drawn"));
        }

        if self.graphics.clear_color.iter().any(|c| !(0.0..=1.0).contains(c)) {
            return Err(invalid("graphics.clear_color", "Color components must lie in [0, 1]"));
        }

        if self.graphics.backend == GraphicsBackend::Dx12 && !cfg!(target_os = "windows") {
            return Err(invalid("graphics.backend", "The dx12 backend is only available on Windows"));
        }

        Ok(())
    }
}

fn arg_value<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    let idx = args.iter().position(|a| a == flag)?;
    args.get(idx + 1)?.parse().ok()
}

fn invalid(field: &str, reason: &str) -> super::error::RenderError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

impl GraphicsBackend {
    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            GraphicsBackend::Dx12 => "DirectX 12",
            GraphicsBackend::Headless => "headless",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.graphics.frame_resources, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.graphics.backend = GraphicsBackend::Headless;
        assert!(config.validate().is_ok());

        config.graphics.frame_resources = 1;
        assert!(config.validate().is_err());

        config.graphics.frame_resources = 2;
        config.window.width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.apply_args(["app", "--headless", "--frames", "10", "--width", "640", "--height", "abc"]);
        assert_eq!(config.graphics.backend, GraphicsBackend::Headless);
        assert_eq!(config.headless.frames, 10);
        assert_eq!(config.window.width, 640);
        assert_eq!(config.window.height, 720);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml_str(
            "[graphics]\nbackend = \"headless\"\nframe_resources = 2\n\n[headless]\nframes = 5\n",
        )
        .unwrap();
        assert_eq!(config.graphics.backend, GraphicsBackend::Headless);
        assert_eq!(config.graphics.frame_resources, 2);
        assert_eq!(config.graphics.object_count, 4);
        assert_eq!(config.headless.frames, 5);
        assert_eq!(config.headless.gpu_latency_ms, 4);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let err = Config::from_toml_str("[graphics\nvsync = ").unwrap_err();
        assert!(matches!(err, crate::core::error::RenderError::Config(ConfigError::ParseError(_))));
    }
}
