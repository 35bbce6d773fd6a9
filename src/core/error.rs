//! 错误处理模块
//!
//! 定义了帧调度核心使用的统一错误类型。
//!
//! # 分类
//!
//! - 资源创建失败：致命，携带失败的调用名与状态码
//! - 设备丢失：致命，单独的 `GraphicsError::DeviceLost` 变体
//! - 同步误用：由构造方式避免，出现时以 `GraphicsError::Synchronization` 报告
//!
//! 没有任何自动重试，二进制入口记录错误后以非零状态退出。

use std::fmt;

/// 统一的 Result 类型
pub type Result<T> = std::result::Result<T, RenderError>;

/// 帧调度核心的错误类型
#[derive(Debug)]
pub enum RenderError {
    /// 配置错误
    Config(ConfigError),

    /// 图形 API 错误
    Graphics(GraphicsError),

    /// IO 错误
    Io(std::io::Error),
}

/// 配置相关的错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),

    /// 配置文件解析失败
    ParseError(String),

    /// 配置值无效
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
#[derive(Debug)]
pub enum GraphicsError {
    /// 设备创建失败
    DeviceCreation(String),

    /// 资源创建失败（缓冲区、堆、命令分配器、围栏等）
    ResourceCreation(String),

    /// 交换链错误
    Swapchain(String),

    /// 命令录制或提交失败
    CommandExecution(String),

    /// 设备丢失（被移除或重置），不可恢复
    DeviceLost { reason: String },

    /// CPU/GPU 同步协议被违反
    Synchronization(String),
}

impl GraphicsError {
    /// 根据失败的原生调用构造资源创建错误
    pub fn resource(call: &str, status: impl fmt::Display) -> Self {
        GraphicsError::ResourceCreation(format!("{} failed: {}", call, status))
    }

    /// 是否为设备丢失
    pub fn is_device_lost(&self) -> bool {
        matches!(self, GraphicsError::DeviceLost { .. })
    }
}

impl RenderError {
    /// 是否为设备丢失
    pub fn is_device_lost(&self) -> bool {
        matches!(self, RenderError::Graphics(e) if e.is_device_lost())
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Config(e) => write!(f, "Configuration error: {}", e),
            RenderError::Graphics(e) => write!(f, "Graphics error: {}", e),
            RenderError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::DeviceCreation(msg) => write!(f, "Device creation failed: {}", msg),
            GraphicsError::ResourceCreation(msg) => write!(f, "Resource creation failed: {}", msg),
            GraphicsError::Swapchain(msg) => write!(f, "Swapchain error: {}", msg),
            GraphicsError::CommandExecution(msg) => write!(f, "Command execution failed: {}", msg),
            GraphicsError::DeviceLost { reason } => write!(f, "Device lost: {}", reason),
            GraphicsError::Synchronization(msg) => write!(f, "Synchronization error: {}", msg),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::Io(e) => Some(e),
            RenderError::Config(e) => Some(e),
            RenderError::Graphics(e) => Some(e),
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for GraphicsError {}

impl From<std::io::Error> for RenderError {
    fn from(err: std::io::Error) -> Self {
        RenderError::Io(err)
    }
}

impl From<ConfigError> for RenderError {
    fn from(err: ConfigError) -> Self {
        RenderError::Config(err)
    }
}

impl From<GraphicsError> for RenderError {
    fn from(err: GraphicsError) -> Self {
        RenderError::Graphics(err)
    }
}
