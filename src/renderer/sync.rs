//! CPU/GPU 同步模块
//!
//! `FenceGate` 包装一个 GPU 围栏和 CPU 侧的单调递增目标值：
//!
//! 1. 提交后调用 `advance`，队列在之前的工作完成后把围栏设为新值
//! 2. 需要复用资源时调用 `wait_until`，已满足则立即返回，否则阻塞在内核事件上
//! 3. 关闭或调整交换链大小前调用 `flush`，排空所有工作
//!
//! 围栏在初始化时创建一次，之后从不重置。

use std::cell::Cell;

use tracing::{debug, error, trace};

use crate::core::error::{GraphicsError, Result};
use crate::renderer::device::{Device, Fence};

/// 围栏值
///
/// 用于CPU-GPU同步的单调递增值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FenceValue(u64);

impl FenceValue {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// 获取内部值
    pub fn value(&self) -> u64 {
        self.0
    }

    /// 下一个围栏值
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

/// 资源最近一次被 GPU 使用的完成点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FencePoint {
    /// 从未提交过
    #[default]
    Idle,
    /// 等待围栏达到该值
    Pending(FenceValue),
}

impl FencePoint {
    /// 在已完成值为 `completed` 时，该完成点是否已到达
    pub fn is_reached(&self, completed: u64) -> bool {
        match self {
            FencePoint::Idle => true,
            FencePoint::Pending(value) => completed >= value.value(),
        }
    }
}

/// `wait_until` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// 调用时已满足，没有创建等待
    Ready,
    /// 阻塞等待过
    Waited,
}

/// 围栏门
pub struct FenceGate<D: Device> {
    fence: D::Fence,
    /// CPU 侧最近一次请求 signal 的值
    signaled: FenceValue,
    blocking_waits: Cell<u64>,
}

impl<D: Device> FenceGate<D> {
    /// 创建围栏门，初始值为 0
    pub fn new(device: &D) -> Result<Self> {
        let fence = device.create_fence()?;

        #[cfg(debug_assertions)]
        debug!(device = device.name(), "Fence gate created");

        Ok(Self {
            fence,
            signaled: FenceValue::default(),
            blocking_waits: Cell::new(0),
        })
    }

    /// 递增目标值并让队列在之前的工作完成后 signal
    ///
    /// # 返回值
    ///
    /// 新的目标值
    pub fn advance(&mut self, device: &D) -> Result<FenceValue> {
        let target = self.signaled.next();
        device.signal(&self.fence, target.value())?;
        self.signaled = target;
        trace!(value = target.value(), "Fence signal queued");
        Ok(target)
    }

    /// 阻塞直到 GPU 完成 `target` 之前的所有工作
    ///
    /// 已满足时不创建任何等待。没有超时，设备丢失以 `GraphicsError::DeviceLost` 返回。
    pub fn wait_until(&self, device: &D, target: FenceValue) -> Result<WaitOutcome> {
        let completed = self.fence.completed_value();
        if completed == u64::MAX {
            return Err(Self::device_lost(device));
        }
        if completed >= target.value() {
            return Ok(WaitOutcome::Ready);
        }
        if target > self.signaled {
            return Err(GraphicsError::Synchronization(format!(
                "waiting for fence value {} which was never signaled (last signaled {})",
                target.value(),
                self.signaled.value()
            ))
            .into());
        }

        debug!(target = target.value(), completed, "Waiting for GPU");
        self.fence.wait_for(target.value())?;
        self.blocking_waits.set(self.blocking_waits.get() + 1);

        if self.fence.completed_value() == u64::MAX {
            return Err(Self::device_lost(device));
        }
        Ok(WaitOutcome::Waited)
    }

    /// 等待完成点，`FencePoint::Idle` 直接返回
    pub fn wait_point(&self, device: &D, point: FencePoint) -> Result<WaitOutcome> {
        match point {
            FencePoint::Idle => Ok(WaitOutcome::Ready),
            FencePoint::Pending(value) => self.wait_until(device, value),
        }
    }

    /// signal 一个新值并等待它，返回后队列中没有未完成的工作
    pub fn flush(&mut self, device: &D) -> Result<FenceValue> {
        let target = self.advance(device)?;
        self.wait_until(device, target)?;
        debug!(value = target.value(), "Command queue flushed");
        Ok(target)
    }

    /// 非阻塞读取 GPU 已完成的值
    pub fn completed_value(&self) -> u64 {
        self.fence.completed_value()
    }

    /// 最近一次 signal 的值
    pub fn signaled_value(&self) -> FenceValue {
        self.signaled
    }

    /// 实际阻塞过的等待次数
    pub fn blocking_waits(&self) -> u64 {
        self.blocking_waits.get()
    }

    pub fn fence(&self) -> &D::Fence {
        &self.fence
    }

    fn device_lost(device: &D) -> crate::core::error::RenderError {
        let reason = device
            .removed_reason()
            .unwrap_or_else(|| "fence reported u64::MAX".to_string());
        error!(%reason, "GPU device lost");
        GraphicsError::DeviceLost { reason }.into()
    }
}
