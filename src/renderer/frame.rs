//! 帧资源环
//!
//! 每个槽位持有一帧录制所需的全部 CPU 可写资源：命令分配器、
//! 渲染过程常量缓冲区和物体常量缓冲区，并记录最近一次提交的围栏值。
//!
//! `next()` 是稳态下唯一的阻塞点：当 CPU 领先 GPU 整整 N 帧时，
//! 它会等待即将复用的槽位完成，因此同时在途的帧最多为 N−1。

use tracing::{debug, trace};

use crate::core::error::Result;
use crate::renderer::constants::{ObjectConstants, PassConstants};
use crate::renderer::device::Device;
use crate::renderer::sync::{FenceGate, FencePoint, FenceValue, WaitOutcome};
use crate::renderer::upload::{BufferUsage, UploadBuffer};

/// 默认帧资源数量（三缓冲）
pub const DEFAULT_FRAME_RESOURCES: usize = 3;

/// 帧资源槽位
pub struct FrameResource<D: Device> {
    index: usize,
    allocator: D::Allocator,
    pub pass_cb: UploadBuffer<D, PassConstants>,
    pub object_cb: UploadBuffer<D, ObjectConstants>,
    completion: FencePoint,
}

impl<D: Device> FrameResource<D> {
    /// 创建槽位
    ///
    /// # 参数
    ///
    /// * `pass_count` - 渲染过程常量的个数
    /// * `object_count` - 物体常量的个数
    pub fn new(device: &D, index: usize, pass_count: usize, object_count: usize) -> Result<Self> {
        Ok(Self {
            index,
            allocator: device.create_command_allocator()?,
            pass_cb: UploadBuffer::new(device, pass_count, BufferUsage::Constant)?,
            object_cb: UploadBuffer::new(device, object_count, BufferUsage::Constant)?,
            completion: FencePoint::Idle,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn allocator(&self) -> &D::Allocator {
        &self.allocator
    }

    pub fn allocator_mut(&mut self) -> &mut D::Allocator {
        &mut self.allocator
    }

    /// 最近一次提交的完成点
    pub fn completion(&self) -> FencePoint {
        self.completion
    }
}

/// 帧资源环
pub struct FrameResourceRing<D: Device> {
    slots: Vec<FrameResource<D>>,
    current: usize,
}

impl<D: Device> FrameResourceRing<D> {
    /// 创建 `count` 个槽位
    ///
    /// 第一次 `next()` 返回槽位 0。
    pub fn new(device: &D, count: usize, pass_count: usize, object_count: usize) -> Result<Self> {
        assert!(count >= 2, "At least 2 frame resources required");

        let slots = (0..count)
            .map(|i| FrameResource::new(device, i, pass_count, object_count))
            .collect::<Result<Vec<_>>>()?;

        debug!(count, pass_count, object_count, "Frame resource ring created");

        Ok(Self {
            slots,
            current: count - 1,
        })
    }

    /// 前进到下一个槽位，必要时等待 GPU 释放它
    pub fn next(&mut self, device: &D, gate: &FenceGate<D>) -> Result<&mut FrameResource<D>> {
        self.current = (self.current + 1) % self.slots.len();
        let slot = &mut self.slots[self.current];

        let outcome = gate.wait_point(device, slot.completion)?;
        if outcome == WaitOutcome::Waited {
            trace!(slot = slot.index, "Frame resource was still in flight");
        }
        Ok(slot)
    }

    /// 记录当前槽位刚提交的围栏值
    pub fn mark_submitted(&mut self, value: FenceValue) {
        let slot = &mut self.slots[self.current];
        debug_assert!(match slot.completion {
            FencePoint::Idle => true,
            FencePoint::Pending(previous) => previous < value,
        });
        slot.completion = FencePoint::Pending(value);
    }

    pub fn current(&self) -> &FrameResource<D> {
        &self.slots[self.current]
    }

    pub fn current_mut(&mut self) -> &mut FrameResource<D> {
        &mut self.slots[self.current]
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn get(&self, index: usize) -> Option<&FrameResource<D>> {
        self.slots.get(index)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 已到达完成点（或从未提交）的槽位个数
    pub fn available(&self, completed: u64) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.completion.is_reached(completed))
            .count()
    }
}
