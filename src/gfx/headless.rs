//! Headless 后端
//!
//! 不依赖任何图形 API 的软件设备。提交的命令列表只被记录，
//! 围栏的 signal 进入一个先进先出的模拟 GPU 队列，按以下方式之一完成：
//!
//! - `Retire::Latency(d)`：后台 "GPU" 线程在 signal 入队 `d` 之后完成它
//! - `Retire::OnWait`：只有 CPU 等待时才按顺序完成，结果完全确定，供测试使用
//!
//! 复制命令同样是异步的：`execute` 只把它们排进队列，随后的第一个 signal
//! 完成时才真正写入目标缓冲区。复制执行前源内存已被释放会被记为
//! `DeviceStats::dropped_copies`，目标缓冲区保持原样。
//!
//! `lose()` 模拟设备移除：所有围栏的完成值变为 `u64::MAX`，
//! 之后的提交、signal、呈现都返回 `GraphicsError::DeviceLost`。

use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info, trace, warn};

use crate::core::error::{GraphicsError, Result};
use crate::renderer::device::{
    CommandAllocator, CommandList, Device, Fence, GpuAddress, GpuBuffer, MappedBuffer, Presenter,
    ResourceState, Viewport,
};
use crate::renderer::upload::align_to;

const ADDRESS_BASE: GpuAddress = 0x1_0000_0000;
const ADDRESS_ALIGNMENT: u64 = 64 * 1024;

/// 模拟 GPU 完成工作的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retire {
    /// CPU 等待时才完成
    OnWait,
    /// 后台线程在固定延迟后完成
    Latency(Duration),
}

/// 设备统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub executed_lists: u64,
    pub signals: u64,
    /// 围栏上实际发生的阻塞等待
    pub blocking_waits: u64,
    pub unmaps: u64,
    pub copied_bytes: u64,
    /// 执行时源内存已被释放的复制
    pub dropped_copies: u64,
}

/// 记录下来的命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    TransitionRenderTarget { index: usize, before: ResourceState, after: ResourceState },
    TransitionBuffer { buffer: u64, before: ResourceState, after: ResourceState },
    SetViewport(Viewport),
    SetRenderTarget { index: usize, depth: bool },
    ClearRenderTarget { index: usize, color: [f32; 4] },
    ClearDepthStencil { depth: f32, stencil: u8 },
    SetConstantBuffer { slot: u32, address: GpuAddress },
    Draw { vertex_count: u32, instance_count: u32 },
    CopyBuffer { dst: u64, src: GpuAddress, bytes: u64 },
}

struct FenceState {
    completed: AtomicU64,
}

struct PendingSignal {
    fence: Arc<FenceState>,
    value: u64,
    ready_at: Instant,
    /// 在这个 signal 之前提交的复制
    copies: Vec<CopyOp>,
}

struct QueueState {
    pending: VecDeque<PendingSignal>,
    /// 已提交、还没有后续 signal 的复制
    unsignaled_copies: Vec<CopyOp>,
    fences: Vec<Weak<FenceState>>,
    lost: Option<String>,
    shutdown: bool,
    stats: DeviceStats,
    last_submission: Vec<Command>,
}

/// 模拟的直接命令队列
struct Queue {
    state: Mutex<QueueState>,
    cond: Condvar,
    retire: Retire,
}

impl Queue {
    fn new(retire: Retire) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                unsignaled_copies: Vec::new(),
                fences: Vec::new(),
                lost: None,
                shutdown: false,
                stats: DeviceStats::default(),
                last_submission: Vec::new(),
            }),
            cond: Condvar::new(),
            retire,
        }
    }

    /// 完成队首的 signal
    fn retire_front(state: &mut QueueState) -> bool {
        match state.pending.pop_front() {
            Some(signal) => {
                for copy in &signal.copies {
                    Self::apply_copy(&mut state.stats, copy);
                }
                signal.fence.completed.fetch_max(signal.value, Ordering::AcqRel);
                trace!(value = signal.value, "GPU reached fence value");
                true
            }
            None => false,
        }
    }

    fn apply_copy(stats: &mut DeviceStats, copy: &CopyOp) {
        match copy.src.upgrade() {
            Some(src) => {
                let bytes = src.read(0, copy.bytes as usize);
                copy.dst.lock()[..bytes.len()].copy_from_slice(&bytes);
                stats.copied_bytes += copy.bytes;
            }
            None => {
                error!(bytes = copy.bytes, "Copy source released before the GPU executed it");
                stats.dropped_copies += 1;
            }
        }
    }

    /// 完成所有到期的 signal
    fn retire_ready(state: &mut QueueState, now: Instant) -> bool {
        let mut retired = false;
        while state.pending.front().is_some_and(|s| s.ready_at <= now) {
            retired |= Self::retire_front(state);
        }
        retired
    }

    fn check_lost(state: &QueueState) -> Result<()> {
        match &state.lost {
            Some(reason) => Err(GraphicsError::DeviceLost { reason: reason.clone() }.into()),
            None => Ok(()),
        }
    }
}

/// 后台 GPU 线程
fn run_gpu(queue: Arc<Queue>) {
    let mut state = queue.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        if state.lost.is_none() && Queue::retire_ready(&mut state, Instant::now()) {
            queue.cond.notify_all();
            continue;
        }
        match state.pending.front().map(|s| s.ready_at) {
            Some(ready_at) if state.lost.is_none() => {
                queue.cond.wait_until(&mut state, ready_at);
            }
            _ => queue.cond.wait(&mut state),
        }
    }
    debug!("Headless GPU thread stopped");
}

/// 软件设备
pub struct HeadlessDevice {
    name: String,
    queue: Arc<Queue>,
    next_address: AtomicU64,
    next_id: AtomicU64,
    worker: Option<JoinHandle<()>>,
}

impl HeadlessDevice {
    pub fn new(retire: Retire) -> Self {
        let (retire, worker) = match retire {
            Retire::OnWait => (Retire::OnWait, None),
            Retire::Latency(latency) => {
                let queue = Arc::new(Queue::new(retire));
                let spawned = std::thread::Builder::new()
                    .name("headless-gpu".to_string())
                    .spawn({
                        let queue = Arc::clone(&queue);
                        move || run_gpu(queue)
                    });
                match spawned {
                    Ok(handle) => {
                        info!(latency_ms = latency.as_millis() as u64, "Headless GPU thread started");
                        return Self::from_parts(queue, Some(handle));
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to start headless GPU thread, retiring work on wait");
                        (Retire::OnWait, None)
                    }
                }
            }
        };
        Self::from_parts(Arc::new(Queue::new(retire)), worker)
    }

    fn from_parts(queue: Arc<Queue>, worker: Option<JoinHandle<()>>) -> Self {
        Self {
            name: "Headless simulated GPU".to_string(),
            queue,
            next_address: AtomicU64::new(ADDRESS_BASE),
            next_id: AtomicU64::new(1),
            worker,
        }
    }

    /// 模拟设备移除
    pub fn lose(&self, reason: &str) {
        let mut state = self.queue.state.lock();
        if state.lost.is_some() {
            return;
        }
        error!(reason, "Simulating device removal");
        state.lost = Some(reason.to_string());
        state.fences.retain(|weak| match weak.upgrade() {
            Some(fence) => {
                fence.completed.store(u64::MAX, Ordering::Release);
                true
            }
            None => false,
        });
        self.queue.cond.notify_all();
    }

    pub fn stats(&self) -> DeviceStats {
        self.queue.state.lock().stats.clone()
    }

    /// 最近一次提交的命令
    pub fn last_submission(&self) -> Vec<Command> {
        self.queue.state.lock().last_submission.clone()
    }

    /// 尚未完成的 signal 个数
    pub fn pending_signals(&self) -> usize {
        self.queue.state.lock().pending.len()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.queue.state.lock()
    }

    fn allocate_address(&self, size: u64) -> GpuAddress {
        self.next_address
            .fetch_add(align_to(size.max(1), ADDRESS_ALIGNMENT), Ordering::Relaxed)
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Drop for HeadlessDevice {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.lock().shutdown = true;
            self.queue.cond.notify_all();
            if worker.join().is_err() {
                error!("Headless GPU thread panicked");
            }
        }
    }
}

impl Device for HeadlessDevice {
    type Fence = HeadlessFence;
    type UploadMemory = HeadlessUploadMemory;
    type Buffer = HeadlessBuffer;
    type Allocator = HeadlessAllocator;
    type CommandList = HeadlessCommandList;
    type RenderTarget = HeadlessRenderTarget;
    type DepthTarget = HeadlessDepthTarget;

    fn name(&self) -> &str {
        &self.name
    }

    fn create_fence(&self) -> Result<HeadlessFence> {
        let mut state = self.lock();
        Queue::check_lost(&state)?;
        let fence = Arc::new(FenceState {
            completed: AtomicU64::new(0),
        });
        state.fences.push(Arc::downgrade(&fence));
        Ok(HeadlessFence {
            state: fence,
            queue: Arc::clone(&self.queue),
        })
    }

    fn create_upload_memory(&self, size: u64) -> Result<HeadlessUploadMemory> {
        Queue::check_lost(&self.lock())?;
        Ok(HeadlessUploadMemory {
            block: Arc::new(UploadBlock::new(size as usize)),
            address: self.allocate_address(size),
            mapped: true,
            queue: Arc::clone(&self.queue),
        })
    }

    fn create_buffer(&self, size: u64) -> Result<HeadlessBuffer> {
        Queue::check_lost(&self.lock())?;
        Ok(HeadlessBuffer {
            id: self.allocate_id(),
            address: self.allocate_address(size),
            data: Arc::new(Mutex::new(vec![0; size as usize])),
        })
    }

    fn create_command_allocator(&self) -> Result<HeadlessAllocator> {
        Ok(HeadlessAllocator {
            id: self.allocate_id(),
            resets: 0,
        })
    }

    fn create_command_list(&self, allocator: &HeadlessAllocator) -> Result<HeadlessCommandList> {
        Ok(HeadlessCommandList {
            allocator: allocator.id,
            commands: Vec::new(),
            copies: Vec::new(),
            closed: true,
        })
    }

    fn execute(&self, list: &HeadlessCommandList) -> Result<()> {
        let mut state = self.lock();
        Queue::check_lost(&state)?;
        if !list.closed {
            return Err(GraphicsError::CommandExecution(
                "command list executed while still recording".to_string(),
            )
            .into());
        }

        state.unsignaled_copies.extend(list.copies.iter().cloned());
        state.stats.executed_lists += 1;
        state.last_submission = list.commands.clone();
        Ok(())
    }

    fn signal(&self, fence: &HeadlessFence, value: u64) -> Result<()> {
        let mut state = self.lock();
        Queue::check_lost(&state)?;
        let latency = match self.queue.retire {
            Retire::Latency(latency) => latency,
            Retire::OnWait => Duration::ZERO,
        };
        let copies = std::mem::take(&mut state.unsignaled_copies);
        state.pending.push_back(PendingSignal {
            fence: Arc::clone(&fence.state),
            value,
            ready_at: Instant::now() + latency,
            copies,
        });
        state.stats.signals += 1;
        self.queue.cond.notify_all();
        Ok(())
    }

    fn removed_reason(&self) -> Option<String> {
        self.lock().lost.clone()
    }
}

/// 围栏
pub struct HeadlessFence {
    state: Arc<FenceState>,
    queue: Arc<Queue>,
}

impl Fence for HeadlessFence {
    fn completed_value(&self) -> u64 {
        self.state.completed.load(Ordering::Acquire)
    }

    fn wait_for(&self, value: u64) -> Result<()> {
        let mut state = self.queue.state.lock();
        state.stats.blocking_waits += 1;
        loop {
            if self.completed_value() >= value || state.lost.is_some() {
                return Ok(());
            }
            let scheduled = state
                .pending
                .iter()
                .any(|s| Arc::ptr_eq(&s.fence, &self.state) && s.value >= value);
            if !scheduled {
                return Err(GraphicsError::Synchronization(format!(
                    "fence value {} will never be signaled",
                    value
                ))
                .into());
            }
            match self.queue.retire {
                Retire::OnWait => {
                    Queue::retire_front(&mut state);
                }
                Retire::Latency(_) => self.queue.cond.wait(&mut state),
            }
        }
    }
}

/// 上传堆内存块，地址在整个生命周期内不变
struct UploadBlock {
    bytes: NonNull<[u8]>,
}

// SAFETY: 内存块只通过原始指针访问，同步由围栏协议保证
unsafe impl Send for UploadBlock {}
unsafe impl Sync for UploadBlock {}

impl UploadBlock {
    fn new(len: usize) -> Self {
        let boxed = vec![0u8; len].into_boxed_slice();
        Self {
            bytes: NonNull::from(Box::leak(boxed)),
        }
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, offset: usize, len: usize) -> Vec<u8> {
        assert!(offset + len <= self.len(), "read past the end of upload memory");
        // SAFETY: 区间在分配范围内
        unsafe {
            std::slice::from_raw_parts(self.bytes.cast::<u8>().as_ptr().add(offset), len).to_vec()
        }
    }
}

impl Drop for UploadBlock {
    fn drop(&mut self) {
        // SAFETY: 指针来自 Box::leak，只释放一次
        unsafe { drop(Box::from_raw(self.bytes.as_ptr())) };
    }
}

/// 上传堆内存
pub struct HeadlessUploadMemory {
    block: Arc<UploadBlock>,
    address: GpuAddress,
    mapped: bool,
    queue: Arc<Queue>,
}

impl HeadlessUploadMemory {
    /// 读取映射内存中的原始字节
    pub fn read_bytes(&self, offset: usize, len: usize) -> Vec<u8> {
        self.block.read(offset, len)
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }
}

impl MappedBuffer for HeadlessUploadMemory {
    fn mapped_ptr(&self) -> NonNull<u8> {
        self.block.bytes.cast::<u8>()
    }

    fn gpu_address(&self) -> GpuAddress {
        self.address
    }

    fn size(&self) -> u64 {
        self.block.len() as u64
    }

    fn unmap(&mut self) {
        if !self.mapped {
            error!(address = self.address, "Upload memory unmapped twice");
            return;
        }
        self.mapped = false;
        self.queue.state.lock().stats.unmaps += 1;
    }
}

/// 设备本地缓冲区
pub struct HeadlessBuffer {
    id: u64,
    address: GpuAddress,
    data: Arc<Mutex<Vec<u8>>>,
}

impl HeadlessBuffer {
    /// GPU 侧的内容
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl GpuBuffer for HeadlessBuffer {
    fn gpu_address(&self) -> GpuAddress {
        self.address
    }

    fn size(&self) -> u64 {
        self.data.lock().len() as u64
    }
}

pub struct HeadlessAllocator {
    id: u64,
    resets: u64,
}

impl HeadlessAllocator {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }
}

impl CommandAllocator for HeadlessAllocator {
    fn reset(&mut self) -> Result<()> {
        self.resets += 1;
        Ok(())
    }
}

#[derive(Clone)]
struct CopyOp {
    dst: Arc<Mutex<Vec<u8>>>,
    src: Weak<UploadBlock>,
    bytes: u64,
}

/// 记录型命令列表
pub struct HeadlessCommandList {
    allocator: u64,
    commands: Vec<Command>,
    copies: Vec<CopyOp>,
    closed: bool,
}

impl HeadlessCommandList {
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// 最近一次 `reset` 使用的分配器
    pub fn allocator_id(&self) -> u64 {
        self.allocator
    }

    fn record(&mut self, command: Command) {
        debug_assert!(!self.closed, "recording into a closed command list");
        self.commands.push(command);
    }
}

impl CommandList<HeadlessDevice> for HeadlessCommandList {
    fn reset(&mut self, allocator: &HeadlessAllocator) -> Result<()> {
        if !self.closed {
            return Err(GraphicsError::CommandExecution(
                "command list reset while still recording".to_string(),
            )
            .into());
        }
        self.allocator = allocator.id;
        self.commands.clear();
        self.copies.clear();
        self.closed = false;
        Ok(())
    }

    fn transition_render_target(
        &mut self,
        target: &HeadlessRenderTarget,
        before: ResourceState,
        after: ResourceState,
    ) {
        self.record(Command::TransitionRenderTarget {
            index: target.index,
            before,
            after,
        });
    }

    fn transition_buffer(&mut self, buffer: &HeadlessBuffer, before: ResourceState, after: ResourceState) {
        self.record(Command::TransitionBuffer {
            buffer: buffer.id,
            before,
            after,
        });
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.record(Command::SetViewport(*viewport));
    }

    fn set_render_target(&mut self, target: &HeadlessRenderTarget, depth: Option<&HeadlessDepthTarget>) {
        self.record(Command::SetRenderTarget {
            index: target.index,
            depth: depth.is_some(),
        });
    }

    fn clear_render_target(&mut self, target: &HeadlessRenderTarget, color: [f32; 4]) {
        self.record(Command::ClearRenderTarget {
            index: target.index,
            color,
        });
    }

    fn clear_depth_stencil(&mut self, _depth: &HeadlessDepthTarget, value: f32, stencil: u8) {
        self.record(Command::ClearDepthStencil { depth: value, stencil });
    }

    fn set_constant_buffer(&mut self, slot: u32, address: GpuAddress) {
        self.record(Command::SetConstantBuffer { slot, address });
    }

    fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32) {
        self.record(Command::Draw {
            vertex_count,
            instance_count,
        });
    }

    fn copy_buffer(&mut self, dst: &HeadlessBuffer, src: &HeadlessUploadMemory, bytes: u64) {
        self.record(Command::CopyBuffer {
            dst: dst.id,
            src: src.address,
            bytes,
        });
        self.copies.push(CopyOp {
            dst: Arc::clone(&dst.data),
            src: Arc::downgrade(&src.block),
            bytes,
        });
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(GraphicsError::CommandExecution("command list closed twice".to_string()).into());
        }
        self.closed = true;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessRenderTarget {
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessDepthTarget {
    pub width: u32,
    pub height: u32,
}

/// 模拟交换链
pub struct HeadlessPresenter {
    targets: Vec<HeadlessRenderTarget>,
    depth: HeadlessDepthTarget,
    current: usize,
    presents: u64,
    queue: Arc<Queue>,
}

impl HeadlessPresenter {
    pub fn new(device: &HeadlessDevice, buffer_count: usize, width: u32, height: u32) -> Self {
        Self {
            targets: (0..buffer_count).map(|index| HeadlessRenderTarget { index }).collect(),
            depth: HeadlessDepthTarget { width, height },
            current: 0,
            presents: 0,
            queue: Arc::clone(&device.queue),
        }
    }

    /// 已呈现次数
    pub fn presents(&self) -> u64 {
        self.presents
    }
}

impl Presenter<HeadlessDevice> for HeadlessPresenter {
    fn buffer_count(&self) -> usize {
        self.targets.len()
    }

    fn current_back_buffer_index(&self) -> usize {
        self.current
    }

    fn back_buffer(&self, index: usize) -> Option<&HeadlessRenderTarget> {
        self.targets.get(index)
    }

    fn depth_stencil(&self) -> &HeadlessDepthTarget {
        &self.depth
    }

    fn present(&mut self, _vsync: bool) -> Result<()> {
        Queue::check_lost(&self.queue.state.lock())?;
        self.current = (self.current + 1) % self.targets.len();
        self.presents += 1;
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        let state = self.queue.state.lock();
        Queue::check_lost(&state)?;
        if !state.pending.is_empty() {
            return Err(GraphicsError::Swapchain(format!(
                "resize while {} submissions are still in flight",
                state.pending.len()
            ))
            .into());
        }
        drop(state);

        let count = self.targets.len();
        self.targets = (0..count).map(|index| HeadlessRenderTarget { index }).collect();
        self.depth = HeadlessDepthTarget { width, height };
        self.current = 0;
        Ok(())
    }

    fn extent(&self) -> (u32, u32) {
        (self.depth.width, self.depth.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_wait_retires_in_order() {
        let device = HeadlessDevice::new(Retire::OnWait);
        let fence = device.create_fence().unwrap();
        device.signal(&fence, 1).unwrap();
        device.signal(&fence, 2).unwrap();
        device.signal(&fence, 3).unwrap();
        assert_eq!(fence.completed_value(), 0);

        fence.wait_for(2).unwrap();
        assert_eq!(fence.completed_value(), 2);
        assert_eq!(device.pending_signals(), 1);
        assert_eq!(device.stats().blocking_waits, 1);
    }

    #[test]
    fn test_latency_thread_completes_work() {
        let device = HeadlessDevice::new(Retire::Latency(Duration::from_millis(2)));
        let fence = device.create_fence().unwrap();
        device.signal(&fence, 1).unwrap();
        fence.wait_for(1).unwrap();
        assert!(fence.completed_value() >= 1);
    }

    #[test]
    fn test_wait_for_unscheduled_value_fails() {
        let device = HeadlessDevice::new(Retire::Latency(Duration::from_millis(1)));
        let fence = device.create_fence().unwrap();
        assert!(fence.wait_for(5).is_err());
    }

    #[test]
    fn test_lost_device_reports_max() {
        let device = HeadlessDevice::new(Retire::OnWait);
        let fence = device.create_fence().unwrap();
        device.signal(&fence, 1).unwrap();
        device.lose("DXGI_ERROR_DEVICE_REMOVED");
        assert_eq!(fence.completed_value(), u64::MAX);
        assert!(fence.wait_for(1).is_ok());
        assert!(device.signal(&fence, 2).unwrap_err().is_device_lost());
        assert_eq!(device.removed_reason().as_deref(), Some("DXGI_ERROR_DEVICE_REMOVED"));
    }

    #[test]
    fn test_execute_requires_closed_list() {
        let device = HeadlessDevice::new(Retire::OnWait);
        let allocator = device.create_command_allocator().unwrap();
        let mut list = device.create_command_list(&allocator).unwrap();
        assert!(list.is_closed());
        list.reset(&allocator).unwrap();
        list.draw_instanced(3, 1);
        assert!(device.execute(&list).is_err());
        list.close().unwrap();
        device.execute(&list).unwrap();
        assert_eq!(device.last_submission(), vec![Command::Draw { vertex_count: 3, instance_count: 1 }]);
    }

    #[test]
    fn test_copy_waits_for_following_signal() {
        let device = HeadlessDevice::new(Retire::OnWait);
        let allocator = device.create_command_allocator().unwrap();
        let mut list = device.create_command_list(&allocator).unwrap();
        let fence = device.create_fence().unwrap();
        let src = device.create_upload_memory(16).unwrap();
        // SAFETY: 映射内存有 16 字节
        unsafe { std::ptr::write_bytes(src.mapped_ptr().as_ptr(), 9, 16) };
        let dst = device.create_buffer(16).unwrap();

        list.reset(&allocator).unwrap();
        list.copy_buffer(&dst, &src, 16);
        list.close().unwrap();
        device.execute(&list).unwrap();
        assert_eq!(dst.contents(), vec![0u8; 16]);

        device.signal(&fence, 1).unwrap();
        assert_eq!(dst.contents(), vec![0u8; 16]);
        fence.wait_for(1).unwrap();
        assert_eq!(dst.contents(), vec![9u8; 16]);
        assert_eq!(device.stats().copied_bytes, 16);
    }

    #[test]
    fn test_copy_from_released_source_is_dropped() {
        let device = HeadlessDevice::new(Retire::OnWait);
        let allocator = device.create_command_allocator().unwrap();
        let mut list = device.create_command_list(&allocator).unwrap();
        let fence = device.create_fence().unwrap();
        let src = device.create_upload_memory(16).unwrap();
        // SAFETY: 映射内存有 16 字节
        unsafe { std::ptr::write_bytes(src.mapped_ptr().as_ptr(), 9, 16) };
        let dst = device.create_buffer(16).unwrap();

        list.reset(&allocator).unwrap();
        list.copy_buffer(&dst, &src, 16);
        list.close().unwrap();
        device.execute(&list).unwrap();
        device.signal(&fence, 1).unwrap();
        drop(src);

        fence.wait_for(1).unwrap();
        assert_eq!(dst.contents(), vec![0u8; 16]);
        assert_eq!(device.stats().dropped_copies, 1);
        assert_eq!(device.stats().copied_bytes, 0);
    }

    #[test]
    fn test_list_tracks_allocator_and_commands() {
        let device = HeadlessDevice::new(Retire::OnWait);
        let mut first = device.create_command_allocator().unwrap();
        let second = device.create_command_allocator().unwrap();
        assert_ne!(first.id(), second.id());

        let mut list = device.create_command_list(&first).unwrap();
        first.reset().unwrap();
        list.reset(&first).unwrap();
        list.set_constant_buffer(1, 0x100);
        assert_eq!(list.allocator_id(), first.id());
        assert_eq!(list.commands(), &[Command::SetConstantBuffer { slot: 1, address: 0x100 }]);
        list.close().unwrap();

        list.reset(&second).unwrap();
        assert_eq!(list.allocator_id(), second.id());
        assert!(list.commands().is_empty());
        assert_eq!(first.resets(), 1);
        assert_eq!(second.resets(), 0);
    }

    #[test]
    fn test_unmap_twice_is_ignored() {
        let device = HeadlessDevice::new(Retire::OnWait);
        let mut memory = device.create_upload_memory(64).unwrap();
        assert!(memory.is_mapped());
        memory.unmap();
        assert!(!memory.is_mapped());
        memory.unmap();
        assert_eq!(device.stats().unmaps, 1);
    }

    #[test]
    fn test_upload_addresses_do_not_overlap() {
        let device = HeadlessDevice::new(Retire::OnWait);
        let a = device.create_upload_memory(100).unwrap();
        let b = device.create_upload_memory(100).unwrap();
        assert!(b.gpu_address() >= a.gpu_address() + a.size());
        assert_eq!(a.gpu_address() % ADDRESS_ALIGNMENT, 0);
    }

    #[test]
    fn test_presenter_cycles_back_buffers() {
        let device = HeadlessDevice::new(Retire::OnWait);
        let mut presenter = HeadlessPresenter::new(&device, 2, 64, 64);
        let indices: Vec<usize> = (0..4)
            .map(|_| {
                let index = presenter.current_back_buffer_index();
                presenter.present(true).unwrap();
                index
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 0, 1]);
        assert_eq!(presenter.presents(), 4);
    }
}
