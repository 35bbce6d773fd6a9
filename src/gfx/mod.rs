//! 设备实现
//!
//! - `headless`：在后台线程模拟 GPU 队列，任何平台可用，测试与无窗口运行都使用它
//! - `dx12`：Direct3D 12，仅 Windows
//!
//! 两者都实现 `renderer::device` 中的 trait，帧调度核心对具体设备无感知。

pub mod headless;
#[cfg(target_os = "windows")]
pub mod dx12;
