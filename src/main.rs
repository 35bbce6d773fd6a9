//! frame_pacer - 帧资源环演示程序
//!
//! 用 N 个帧资源槽位驱动一个简单的绘制循环：每帧写入渲染过程常量与脏物体常量，
//! 为每个物体绑定常量缓冲区并绘制一个三角形。
//!
//! # 使用方法
//!
//! ```bash
//! # 使用配置文件
//! cargo run
//!
//! # 软件模拟设备，运行 300 帧后退出
//! cargo run -- --headless --frames 300
//!
//! # 使用 DirectX 12（仅 Windows）
//! cargo run -- --dx12
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use nalgebra::{Matrix4, Vector3};
use tracing::{error, info};

use frame_pacer::core::config::{Config, GraphicsBackend};
use frame_pacer::core::log;
use frame_pacer::gfx::headless::{HeadlessDevice, HeadlessPresenter, Retire};
use frame_pacer::renderer::device::CommandList;
use frame_pacer::renderer::{
    update_object_constants, Camera, Device, FrameContext, FrameScheduler, Lighting,
    PassConstants, RenderItem, SchedulerSettings, OBJECT_CB_SLOT, PASS_CB_SLOT,
    SWAP_CHAIN_BUFFER_COUNT,
};

/// 每个渲染项一个三角形
const TRIANGLE_VERTICES: u32 = 3;

/// 应用程序入口点
///
/// # 初始化流程
///
/// 1. 加载配置文件（config.toml）
/// 2. 应用命令行参数覆盖
/// 3. 验证配置
/// 4. 初始化日志系统
/// 5. 按配置选择设备并进入绘制循环
///
/// 任何错误都会记录日志并以非零状态退出。
fn main() {
    // 1. 加载配置（在初始化日志之前）
    let mut config = Config::from_file_or_default("config.toml");

    // 2. 应用命令行参数
    config.apply_args(std::env::args());

    // 3. 验证配置
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    // 4. 初始化日志系统
    let log_file = if config.logging.file_output {
        Some(config.logging.log_file.as_str())
    } else {
        None
    };
    log::init_logger(config.logging.level, config.logging.file_output, log_file);
    info!(version = env!("CARGO_PKG_VERSION"), "frame_pacer starting...");
    info!(
        backend = config.graphics.backend.name(),
        width = config.window.width,
        height = config.window.height,
        frame_resources = config.graphics.frame_resources,
        objects = config.graphics.object_count,
        "Graphics configuration"
    );

    // 5. 运行
    let result = match config.graphics.backend {
        GraphicsBackend::Headless => run_headless(&config),
        GraphicsBackend::Dx12 => run_dx12(&config),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
    info!("Shutdown complete");
}

/// 演示用的物体与相机
struct DemoObjects {
    items: Vec<RenderItem>,
    camera: Camera,
    lighting: Lighting,
    start: Instant,
}

impl DemoObjects {
    /// 沿 X 轴排成一排的物体
    fn new(object_count: usize, frame_resources: usize) -> Self {
        let offset = (object_count as f32 - 1.0) * 0.5;
        let items = (0..object_count)
            .map(|i| {
                let x = (i as f32 - offset) * 2.5;
                let world = Matrix4::new_translation(&Vector3::new(x, 0.0, 0.0));
                RenderItem::new(i, world, TRIANGLE_VERTICES, frame_resources)
            })
            .collect();
        Self {
            items,
            camera: Camera::default(),
            lighting: Lighting::default(),
            start: Instant::now(),
        }
    }

    /// 相机环绕，第一个物体自转
    ///
    /// 只有被修改的物体会变脏，其余物体的常量写满 N 个槽位后不再更新。
    fn animate(&mut self) {
        let t = self.start.elapsed().as_secs_f32();
        self.camera.orbit(10.0, 0.25 * t, 3.0);
        if let Some(first) = self.items.first_mut() {
            let translation = first.world().column(3).xyz();
            let world = Matrix4::new_translation(&translation) * Matrix4::from_euler_angles(0.0, t, 0.0);
            first.set_world(world);
        }
    }

    fn record<D: Device>(&mut self, frame: &mut FrameContext<'_, D>) -> frame_pacer::core::Result<()> {
        let t = self.start.elapsed().as_secs_f32();
        let pass = PassConstants::new(&self.camera, frame.viewport.aspect_ratio(), &self.lighting, t);
        frame.slot.pass_cb.write(0, &pass);
        update_object_constants(&mut self.items, &mut frame.slot.object_cb);

        frame.list.set_constant_buffer(PASS_CB_SLOT, frame.slot.pass_cb.gpu_address());
        for item in &self.items {
            let address = frame.slot.object_cb.element_address(item.cb_index);
            frame.list.set_constant_buffer(OBJECT_CB_SLOT, address);
            frame.list.draw_instanced(item.vertex_count, item.instance_count);
        }
        Ok(())
    }
}

/// 在软件模拟设备上运行固定帧数
fn run_headless(config: &Config) -> anyhow::Result<()> {
    let latency = Duration::from_millis(config.headless.gpu_latency_ms);
    let device = Arc::new(HeadlessDevice::new(Retire::Latency(latency)));
    let presenter = HeadlessPresenter::new(
        &device,
        SWAP_CHAIN_BUFFER_COUNT,
        config.window.width,
        config.window.height,
    );
    let settings = SchedulerSettings::from_config(&config.graphics);
    let mut scheduler = FrameScheduler::new(Arc::clone(&device), presenter, settings)
        .context("Failed to create frame scheduler")?;
    let mut demo = DemoObjects::new(config.graphics.object_count, config.graphics.frame_resources);

    info!(
        device = device.name(),
        frames = config.headless.frames,
        latency_ms = config.headless.gpu_latency_ms,
        "Entering headless frame loop"
    );

    let started = Instant::now();
    let mut waited_frames = 0u64;
    for _ in 0..config.headless.frames {
        demo.animate();
        let stats = scheduler
            .render_frame(|frame| demo.record(frame))
            .with_context(|| format!("Frame {} failed", scheduler.frame_number()))?;
        if stats.waited {
            waited_frames += 1;
        }
    }
    let last = scheduler.flush().context("Final flush failed")?;
    let elapsed = started.elapsed();

    let stats = device.stats();
    info!(
        frames = scheduler.frame_number(),
        waited_frames,
        fence = last.value(),
        executed_lists = stats.executed_lists,
        blocking_waits = stats.blocking_waits,
        elapsed_ms = elapsed.as_millis() as u64,
        "Headless run finished"
    );
    Ok(())
}

/// 在 winit 窗口上使用 Direct3D 12 运行，直到窗口关闭
#[cfg(target_os = "windows")]
fn run_dx12(config: &Config) -> anyhow::Result<()> {
    use frame_pacer::core::RenderError;
    use frame_pacer::gfx::dx12::{window_hwnd, Dx12Device, Dx12Presenter};
    use winit::dpi::PhysicalSize;
    use winit::event::{Event, WindowEvent};
    use winit::event_loop::{ControlFlow, EventLoop};
    use winit::window::WindowBuilder;

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let window = WindowBuilder::new()
        .with_title(config.window.title.as_str())
        .with_inner_size(PhysicalSize::new(config.window.width, config.window.height))
        .with_resizable(config.window.resizable)
        .build(&event_loop)
        .context("Failed to create window")?;

    let device = Arc::new(Dx12Device::new(cfg!(debug_assertions)).context("Failed to create D3D12 device")?);
    let size = window.inner_size();
    let presenter = Dx12Presenter::new(&device, window_hwnd(&window)?, size.width, size.height)
        .context("Failed to create swap chain")?;
    let settings = SchedulerSettings::from_config(&config.graphics);
    let mut scheduler =
        FrameScheduler::new(device, presenter, settings).context("Failed to create frame scheduler")?;
    let mut demo = DemoObjects::new(config.graphics.object_count, config.graphics.frame_resources);
    let mut failure: Option<RenderError> = None;

    info!("Entering main loop...");
    event_loop
        .run(|event, elwt| {
            elwt.set_control_flow(ControlFlow::Poll);
            match event {
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::CloseRequested => {
                        info!("Close requested, shutting down...");
                        elwt.exit();
                    }
                    WindowEvent::Resized(new_size) => {
                        if let Err(e) = scheduler.resize(new_size.width, new_size.height) {
                            failure = Some(e);
                            elwt.exit();
                        }
                    }
                    WindowEvent::RedrawRequested => {
                        demo.animate();
                        if let Err(e) = scheduler.render_frame(|frame| demo.record(frame)) {
                            failure = Some(e);
                            elwt.exit();
                        }
                    }
                    _ => (),
                },
                Event::AboutToWait => window.request_redraw(),
                _ => (),
            }
        })
        .context("Event loop failed")?;

    if let Some(e) = failure {
        return Err(e).context(format!("Frame {} failed", scheduler.frame_number()));
    }
    scheduler.flush().context("Final flush failed")?;
    info!(frames = scheduler.frame_number(), "Main loop exited");
    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn run_dx12(_config: &Config) -> anyhow::Result<()> {
    anyhow::bail!("The dx12 backend is only available on Windows")
}
