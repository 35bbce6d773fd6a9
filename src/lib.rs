//! frame_pacer - 帧资源环与 CPU/GPU 同步核心
//!
//! CPU 最多领先 GPU N−1 帧。每一帧独占一个帧资源槽位（命令分配器与上传缓冲区），
//! 槽位在 GPU 通过围栏确认完成之前不会被复用。
//!
//! # 模块结构
//!
//! - `core`: 配置、日志、错误处理
//! - `renderer`: 与图形 API 无关的帧调度核心（围栏、帧资源环、上传缓冲区、调度器）
//! - `gfx`: 设备实现（无窗口的 headless 设备与 Windows 上的 Direct3D 12）
//!
//! # 使用示例
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use frame_pacer::gfx::headless::{HeadlessDevice, HeadlessPresenter, Retire};
//! use frame_pacer::renderer::{FrameScheduler, SchedulerSettings};
//!
//! let device = Arc::new(HeadlessDevice::new(Retire::Latency(Duration::from_millis(2))));
//! let presenter = HeadlessPresenter::new(&device, 2, 640, 480);
//! let mut scheduler = FrameScheduler::new(device, presenter, SchedulerSettings::default()).unwrap();
//! scheduler.render_frame(|_frame| Ok(())).unwrap();
//! ```

pub mod core;
pub mod gfx;
pub mod renderer;
