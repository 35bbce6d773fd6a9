//! 帧调度器
//!
//! 驱动一帧的完整生命周期：
//!
//! ```text
//! Idle → SlotAcquired → Recording → Submitted → Presented → Idle
//! ```
//!
//! - `Idle → SlotAcquired`：帧资源环 `next()`，必要时等待 GPU
//! - `SlotAcquired → Recording`：重置分配器与命令列表，后备缓冲区
//!   `PRESENT → RENDER_TARGET`，清除颜色和深度，调用方录制绘制命令
//! - `Recording → Submitted`：`RENDER_TARGET → PRESENT`，关闭、提交、
//!   `advance()`、`mark_submitted`
//! - `Submitted → Presented`：呈现，后备缓冲区索引前进
//!
//! 任何设备级错误都会中止当前帧并向上返回，调度器不会重试。

use std::sync::Arc;

use tracing::{debug, error, info, trace};

use crate::core::config::GraphicsConfig;
use crate::core::error::{GraphicsError, Result};
use crate::renderer::backbuffer::{BackBufferSet, SWAP_CHAIN_BUFFER_COUNT};
use crate::renderer::device::{CommandAllocator, CommandList, Device, Presenter, Viewport};
use crate::renderer::frame::{FrameResource, FrameResourceRing, DEFAULT_FRAME_RESOURCES};
use crate::renderer::sync::{FenceGate, FenceValue};
use crate::renderer::upload::UploadQueue;

/// 调度器参数
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub frame_resources: usize,
    pub pass_count: usize,
    pub object_count: usize,
    pub clear_color: [f32; 4],
    pub vsync: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            frame_resources: DEFAULT_FRAME_RESOURCES,
            pass_count: 1,
            object_count: 1,
            clear_color: [0.690, 0.769, 0.871, 1.0],
            vsync: true,
        }
    }
}

impl SchedulerSettings {
    pub fn from_config(graphics: &GraphicsConfig) -> Self {
        Self {
            frame_resources: graphics.frame_resources,
            pass_count: 1,
            object_count: graphics.object_count,
            clear_color: graphics.clear_color,
            vsync: graphics.vsync,
        }
    }
}

/// 帧所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    SlotAcquired,
    Recording,
    Submitted,
    Presented,
}

/// 一帧的统计信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub frame_number: u64,
    pub slot_index: usize,
    pub back_buffer_index: usize,
    pub fence_value: FenceValue,
    /// 获取槽位时是否阻塞过
    pub waited: bool,
}

/// 传给录制回调的上下文
pub struct FrameContext<'a, D: Device> {
    pub list: &'a mut D::CommandList,
    pub slot: &'a mut FrameResource<D>,
    pub frame_number: u64,
    pub viewport: Viewport,
}

/// 帧调度器
pub struct FrameScheduler<D: Device, P: Presenter<D>> {
    presenter: P,
    gate: FenceGate<D>,
    ring: FrameResourceRing<D>,
    back_buffers: BackBufferSet<SWAP_CHAIN_BUFFER_COUNT>,
    command_list: D::CommandList,
    setup_allocator: D::Allocator,
    uploads: UploadQueue<D>,
    viewport: Viewport,
    phase: FramePhase,
    frame_number: u64,
    clear_color: [f32; 4],
    vsync: bool,
    // 最后释放设备
    device: Arc<D>,
}

impl<D: Device, P: Presenter<D>> FrameScheduler<D, P> {
    /// 创建调度器
    ///
    /// # 参数
    ///
    /// * `device` - 图形设备
    /// * `presenter` - 已创建好的交换链，缓冲区数量必须为 `SWAP_CHAIN_BUFFER_COUNT`
    /// * `settings` - 帧资源数量、常量缓冲区大小等
    pub fn new(device: Arc<D>, presenter: P, settings: SchedulerSettings) -> Result<Self> {
        if presenter.buffer_count() != SWAP_CHAIN_BUFFER_COUNT {
            return Err(GraphicsError::Swapchain(format!(
                "swap chain has {} buffers, {} expected",
                presenter.buffer_count(),
                SWAP_CHAIN_BUFFER_COUNT
            ))
            .into());
        }
        if settings.frame_resources < 2 {
            return Err(GraphicsError::ResourceCreation(format!(
                "{} frame resources requested, at least 2 required",
                settings.frame_resources
            ))
            .into());
        }

        let gate = FenceGate::new(&*device)?;
        let ring = FrameResourceRing::new(
            &*device,
            settings.frame_resources,
            settings.pass_count,
            settings.object_count,
        )?;
        let setup_allocator = device.create_command_allocator()?;
        let command_list = device.create_command_list(&setup_allocator)?;
        let back_buffers = BackBufferSet::new(presenter.current_back_buffer_index())?;
        let (width, height) = presenter.extent();

        info!(
            device = device.name(),
            frame_resources = settings.frame_resources,
            object_count = settings.object_count,
            width,
            height,
            "Frame scheduler initialized"
        );

        Ok(Self {
            presenter,
            gate,
            ring,
            back_buffers,
            command_list,
            setup_allocator,
            uploads: UploadQueue::new(),
            viewport: Viewport::full(width, height),
            phase: FramePhase::Idle,
            frame_number: 0,
            clear_color: settings.clear_color,
            vsync: settings.vsync,
            device,
        })
    }

    /// 录制并同步执行一次性命令（资源上传等）
    ///
    /// 返回前 GPU 已完成这批命令，临时上传缓冲区已释放。
    pub fn submit_setup<F>(&mut self, record: F) -> Result<FenceValue>
    where
        F: FnOnce(&D, &mut D::CommandList, &mut UploadQueue<D>) -> Result<()>,
    {
        self.expect_phase(FramePhase::Idle)?;
        let device = &*self.device;

        self.setup_allocator.reset()?;
        self.command_list.reset(&self.setup_allocator)?;
        record(device, &mut self.command_list, &mut self.uploads)?;
        self.command_list.close()?;
        device.execute(&self.command_list)?;

        let value = self.gate.advance(device)?;
        self.uploads.submitted(value);
        self.gate.wait_until(device, value)?;
        self.uploads.retire(self.gate.completed_value());

        debug!(value = value.value(), "Setup commands executed");
        Ok(value)
    }

    /// 渲染一帧
    ///
    /// `record` 在清屏之后、后备缓冲区切回 `PRESENT` 之前被调用，
    /// 用于写入当前槽位的常量并录制绘制命令。
    pub fn render_frame<F>(&mut self, record: F) -> Result<FrameStats>
    where
        F: FnOnce(&mut FrameContext<'_, D>) -> Result<()>,
    {
        self.expect_phase(FramePhase::Idle)?;
        let device = &*self.device;

        // Idle -> SlotAcquired
        let waits_before = self.gate.blocking_waits();
        let slot = self.ring.next(device, &self.gate)?;
        let waited = self.gate.blocking_waits() > waits_before;
        let slot_index = slot.index();
        self.phase = FramePhase::SlotAcquired;

        // SlotAcquired -> Recording
        slot.allocator_mut().reset()?;
        let list = &mut self.command_list;
        list.reset(slot.allocator())?;

        let begin = self.back_buffers.begin_render()?;
        let target = self.presenter.back_buffer(begin.index).ok_or_else(|| {
            GraphicsError::Swapchain(format!("back buffer {} is not available", begin.index))
        })?;
        let depth = self.presenter.depth_stencil();

        list.transition_render_target(target, begin.before, begin.after);
        list.set_viewport(&self.viewport);
        list.clear_render_target(target, self.clear_color);
        list.clear_depth_stencil(depth, 1.0, 0);
        list.set_render_target(target, Some(depth));
        self.phase = FramePhase::Recording;

        let mut context = FrameContext {
            list: &mut *list,
            slot: &mut *slot,
            frame_number: self.frame_number,
            viewport: self.viewport,
        };
        record(&mut context)?;

        // Recording -> Submitted
        let end = self.back_buffers.end_render()?;
        list.transition_render_target(target, end.before, end.after);
        list.close()?;
        device.execute(list)?;

        let fence_value = self.gate.advance(device)?;
        self.ring.mark_submitted(fence_value);
        self.uploads.submitted(fence_value);
        self.phase = FramePhase::Submitted;

        // Submitted -> Presented
        self.presenter.present(self.vsync)?;
        let back_buffer_index = self.back_buffers.advance()?;
        debug_assert_eq!(back_buffer_index, self.presenter.current_back_buffer_index());
        self.phase = FramePhase::Presented;

        self.uploads.retire(self.gate.completed_value());

        let stats = FrameStats {
            frame_number: self.frame_number,
            slot_index,
            back_buffer_index: begin.index,
            fence_value,
            waited,
        };
        trace!(
            frame = stats.frame_number,
            slot = slot_index,
            back_buffer = begin.index,
            fence = fence_value.value(),
            waited,
            "Frame presented"
        );

        self.frame_number += 1;
        self.phase = FramePhase::Idle;
        Ok(stats)
    }

    /// 排空 GPU 工作：signal 一个新值并等待
    pub fn flush(&mut self) -> Result<FenceValue> {
        let value = self.gate.flush(&*self.device)?;
        self.uploads.retire(value.value());
        Ok(value)
    }

    /// 调整交换链大小
    ///
    /// 宽或高为 0（窗口最小化）时忽略并返回 `false`。
    pub fn resize(&mut self, width: u32, height: u32) -> Result<bool> {
        if width == 0 || height == 0 {
            debug!(width, height, "Ignoring resize to an empty surface");
            return Ok(false);
        }
        self.expect_phase(FramePhase::Idle)?;

        self.flush()?;
        self.presenter.resize(width, height)?;
        self.back_buffers.reset(self.presenter.current_back_buffer_index())?;
        self.viewport = Viewport::full(width, height);

        info!(width, height, "Swap chain resized");
        Ok(true)
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn gate(&self) -> &FenceGate<D> {
        &self.gate
    }

    pub fn ring(&self) -> &FrameResourceRing<D> {
        &self.ring
    }

    pub fn back_buffers(&self) -> &BackBufferSet<SWAP_CHAIN_BUFFER_COUNT> {
        &self.back_buffers
    }

    pub fn uploads(&self) -> &UploadQueue<D> {
        &self.uploads
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// 已呈现的帧数
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn set_vsync(&mut self, vsync: bool) {
        self.vsync = vsync;
    }

    fn expect_phase(&self, expected: FramePhase) -> Result<()> {
        if self.phase != expected {
            return Err(GraphicsError::Synchronization(format!(
                "frame scheduler is in {:?}, expected {:?}",
                self.phase, expected
            ))
            .into());
        }
        Ok(())
    }
}

impl<D: Device, P: Presenter<D>> Drop for FrameScheduler<D, P> {
    fn drop(&mut self) {
        match self.flush() {
            Ok(value) => debug!(value = value.value(), "GPU drained before releasing frame resources"),
            Err(e) => error!(error = %e, "Failed to drain GPU work on shutdown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::{Command, HeadlessDevice, HeadlessPresenter, Retire};
    use crate::renderer::device::ResourceState;

    fn scheduler(retire: Retire) -> FrameScheduler<HeadlessDevice, HeadlessPresenter> {
        crate::core::log::init_test_logger();
        let device = Arc::new(HeadlessDevice::new(retire));
        let presenter = HeadlessPresenter::new(&device, SWAP_CHAIN_BUFFER_COUNT, 640, 480);
        FrameScheduler::new(device, presenter, SchedulerSettings::default()).unwrap()
    }

    #[test]
    fn test_frame_records_expected_command_order() {
        let mut scheduler = scheduler(Retire::OnWait);
        scheduler
            .render_frame(|ctx| {
                let address = ctx.slot.object_cb.element_address(0);
                ctx.list.set_constant_buffer(0, address);
                ctx.list.draw_instanced(3, 1);
                Ok(())
            })
            .unwrap();

        let commands = scheduler.device().last_submission();
        assert!(matches!(
            commands.first(),
            Some(Command::TransitionRenderTarget { index: 0, before: ResourceState::Present, after: ResourceState::RenderTarget })
        ));
        assert!(matches!(
            commands.last(),
            Some(Command::TransitionRenderTarget { index: 0, before: ResourceState::RenderTarget, after: ResourceState::Present })
        ));
        assert!(commands.iter().any(|c| matches!(c, Command::ClearRenderTarget { .. })));
        assert!(commands.iter().any(|c| matches!(c, Command::ClearDepthStencil { .. })));
        assert!(commands.iter().any(|c| matches!(c, Command::Draw { vertex_count: 3, instance_count: 1 })));
        assert_eq!(scheduler.phase(), FramePhase::Idle);
        assert_eq!(scheduler.frame_number(), 1);
    }

    #[test]
    fn test_record_error_aborts_frame() {
        let mut scheduler = scheduler(Retire::OnWait);
        let err = scheduler
            .render_frame(|_| Err(GraphicsError::CommandExecution("boom".to_string()).into()))
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(scheduler.phase(), FramePhase::Recording);
        assert!(scheduler.render_frame(|_| Ok(())).is_err());
    }

    #[test]
    fn test_resize_ignores_zero_extent() {
        let mut scheduler = scheduler(Retire::OnWait);
        scheduler.render_frame(|_| Ok(())).unwrap();
        assert!(!scheduler.resize(0, 300).unwrap());
        assert_eq!(scheduler.presenter().extent(), (640, 480));

        assert!(scheduler.resize(1024, 768).unwrap());
        assert_eq!(scheduler.presenter().extent(), (1024, 768));
        assert_eq!(scheduler.viewport(), Viewport::full(1024, 768));
        assert_eq!(scheduler.back_buffers().current_index(), 0);
        assert!(scheduler.gate().completed_value() >= scheduler.gate().signaled_value().value());
        scheduler.render_frame(|_| Ok(())).unwrap();
    }

    #[test]
    fn test_setup_uploads_are_released() {
        let mut scheduler = scheduler(Retire::OnWait);
        let mut vertex_buffer = None;
        scheduler
            .submit_setup(|device, list, uploads| {
                vertex_buffer = Some(uploads.create_buffer_with_data(device, list, &[7u8; 96])?);
                Ok(())
            })
            .unwrap();
        assert_eq!(scheduler.uploads().pending(), 0);
        let buffer = vertex_buffer.unwrap();
        assert_eq!(buffer.contents(), vec![7u8; 96]);
    }

    #[test]
    fn test_presenter_buffer_count_checked() {
        let device = Arc::new(HeadlessDevice::new(Retire::OnWait));
        let presenter = HeadlessPresenter::new(&device, 3, 640, 480);
        assert!(FrameScheduler::new(device, presenter, SchedulerSettings::default()).is_err());
    }
}
