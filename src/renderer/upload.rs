//! 上传缓冲区模块
//!
//! `UploadBuffer<D, T>` 是位于上传堆的线性数组，创建时映射一次，
//! 在 `Drop` 中解除映射。CPU 通过 `write` 直接写入映射内存，
//! GPU 通过 `gpu_address` / `element_address` 读取。
//!
//! 常量缓冲区的元素大小向上对齐到 256 字节（D3D12 常量缓冲区视图的要求）。
//!
//! 缓冲区本身不做任何同步：只有在 GPU 读完之后才能改写或销毁，
//! 这由所属的帧资源槽位或 `UploadQueue` 的围栏值保证。

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::mem::size_of;
use std::ptr::NonNull;

use bytemuck::Pod;
use tracing::{debug, trace};

use crate::core::error::{GraphicsError, Result};
use crate::renderer::device::{CommandList, Device, GpuAddress, GpuBuffer, MappedBuffer, ResourceState};
use crate::renderer::sync::FenceValue;

/// 常量缓冲区对齐要求（字节）
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// 把 `size` 向上对齐到 `alignment`（必须是 2 的幂）
pub const fn align_to(size: u64, alignment: u64) -> u64 {
    (size + alignment - 1) & !(alignment - 1)
}

/// 常量缓冲区元素大小
pub const fn constant_buffer_byte_size(size: u64) -> u64 {
    align_to(size, CONSTANT_BUFFER_ALIGNMENT)
}

/// 缓冲区用途
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// 着色器常量，元素对齐到 256 字节
    Constant,
    /// 一次性上传或动态顶点数据，元素紧密排列
    Staging,
}

/// 持久映射的上传缓冲区
pub struct UploadBuffer<D: Device, T: Pod> {
    memory: D::UploadMemory,
    mapped: NonNull<u8>,
    stride: u64,
    count: usize,
    usage: BufferUsage,
    _marker: PhantomData<T>,
}

impl<D: Device, T: Pod> UploadBuffer<D, T> {
    /// 分配 `stride × count` 字节并映射
    ///
    /// # 参数
    ///
    /// * `device` - 图形设备
    /// * `count` - 元素个数
    /// * `usage` - 常量缓冲区会把元素大小对齐到 256 字节
    pub fn new(device: &D, count: usize, usage: BufferUsage) -> Result<Self> {
        if count == 0 {
            return Err(GraphicsError::ResourceCreation(
                "upload buffer must hold at least one element".to_string(),
            )
            .into());
        }

        let element_size = size_of::<T>() as u64;
        let stride = match usage {
            BufferUsage::Constant => constant_buffer_byte_size(element_size),
            BufferUsage::Staging => element_size,
        };
        let size = stride * count as u64;

        let memory = device.create_upload_memory(size)?;
        if memory.size() < size {
            return Err(GraphicsError::ResourceCreation(format!(
                "upload memory is {} bytes, {} requested",
                memory.size(),
                size
            ))
            .into());
        }
        let mapped = memory.mapped_ptr();

        trace!(stride, count, ?usage, address = memory.gpu_address(), "Upload buffer mapped");

        Ok(Self {
            memory,
            mapped,
            stride,
            count,
            usage,
            _marker: PhantomData,
        })
    }

    /// 把 `value` 写到第 `index` 个元素
    ///
    /// 越界时 panic。
    pub fn write(&mut self, index: usize, value: &T) {
        assert!(
            index < self.count,
            "upload buffer index {} out of range ({} elements)",
            index,
            self.count
        );
        // SAFETY: index < count，写入区间在映射范围内
        unsafe { self.write_unchecked(index, value) }
    }

    /// 不做边界检查的写入，用于热路径
    ///
    /// # Safety
    ///
    /// 调用者保证 `index < self.count()`。
    pub unsafe fn write_unchecked(&mut self, index: usize, value: &T) {
        debug_assert!(index < self.count);
        let bytes = bytemuck::bytes_of(value);
        let dst = self.mapped.as_ptr().add(index * self.stride as usize);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
    }

    /// 从 `first` 开始连续写入多个元素
    pub fn write_slice(&mut self, first: usize, values: &[T]) {
        assert!(
            first + values.len() <= self.count,
            "upload buffer range {}..{} out of range ({} elements)",
            first,
            first + values.len(),
            self.count
        );
        if self.stride == size_of::<T>() as u64 {
            let bytes: &[u8] = bytemuck::cast_slice(values);
            // SAFETY: 范围已检查，元素紧密排列
            unsafe {
                let dst = self.mapped.as_ptr().add(first * self.stride as usize);
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
            }
        } else {
            for (offset, value) in values.iter().enumerate() {
                // SAFETY: first + offset < count
                unsafe { self.write_unchecked(first + offset, value) };
            }
        }
    }

    /// 读回第 `index` 个元素
    pub fn read(&self, index: usize) -> T {
        assert!(index < self.count, "upload buffer index {} out of range", index);
        // SAFETY: 区间在映射范围内，映射内存可读
        let bytes = unsafe {
            std::slice::from_raw_parts(
                self.mapped.as_ptr().add(index * self.stride as usize),
                size_of::<T>(),
            )
        };
        bytemuck::pod_read_unaligned(bytes)
    }

    /// 缓冲区起始的设备地址
    pub fn gpu_address(&self) -> GpuAddress {
        self.memory.gpu_address()
    }

    /// 第 `index` 个元素的设备地址，用于绑定根常量缓冲区视图
    pub fn element_address(&self, index: usize) -> GpuAddress {
        debug_assert!(index < self.count);
        self.gpu_address() + index as u64 * self.stride
    }

    /// 元素步长（常量缓冲区为 256 的倍数）
    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn byte_size(&self) -> u64 {
        self.stride * self.count as u64
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// 底层上传内存，用于复制命令的源
    pub fn memory(&self) -> &D::UploadMemory {
        &self.memory
    }
}

impl<D: Device, T: Pod> Drop for UploadBuffer<D, T> {
    fn drop(&mut self) {
        self.memory.unmap();
    }
}

/// 一次性上传队列
///
/// 持有临时上传缓冲区，直到读取它们的复制命令在 GPU 上完成。
pub struct UploadQueue<D: Device> {
    /// 已录制但尚未提交
    recorded: Vec<UploadBuffer<D, u8>>,
    /// 已提交，等待围栏
    in_flight: VecDeque<(FenceValue, UploadBuffer<D, u8>)>,
}

impl<D: Device> UploadQueue<D> {
    pub fn new() -> Self {
        Self {
            recorded: Vec::new(),
            in_flight: VecDeque::new(),
        }
    }

    /// 录制把 `bytes` 复制到 `dst` 的命令
    ///
    /// 临时缓冲区会一直保留到 `submitted` 给出的围栏值完成。
    pub fn upload_bytes(
        &mut self,
        device: &D,
        list: &mut D::CommandList,
        dst: &D::Buffer,
        bytes: &[u8],
    ) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        if bytes.len() as u64 > dst.size() {
            return Err(GraphicsError::ResourceCreation(format!(
                "upload of {} bytes does not fit a {} byte buffer",
                bytes.len(),
                dst.size()
            ))
            .into());
        }

        let mut staging = UploadBuffer::<D, u8>::new(device, bytes.len(), BufferUsage::Staging)?;
        staging.write_slice(0, bytes);
        list.copy_buffer(dst, staging.memory(), bytes.len() as u64);
        self.recorded.push(staging);
        Ok(())
    }

    /// 创建设备本地缓冲区并录制初始数据的上传
    ///
    /// 缓冲区最终处于 `ResourceState::GenericRead`。
    pub fn create_buffer_with_data(
        &mut self,
        device: &D,
        list: &mut D::CommandList,
        bytes: &[u8],
    ) -> Result<D::Buffer> {
        if bytes.is_empty() {
            return Err(GraphicsError::ResourceCreation("cannot create an empty buffer".to_string()).into());
        }
        let buffer = device.create_buffer(bytes.len() as u64)?;
        list.transition_buffer(&buffer, ResourceState::Common, ResourceState::CopyDest);
        self.upload_bytes(device, list, &buffer, bytes)?;
        list.transition_buffer(&buffer, ResourceState::CopyDest, ResourceState::GenericRead);
        Ok(buffer)
    }

    /// 记录刚录制的上传所在提交的围栏值
    pub fn submitted(&mut self, value: FenceValue) {
        for staging in self.recorded.drain(..) {
            self.in_flight.push_back((value, staging));
        }
    }

    /// 释放围栏已完成的临时缓冲区
    ///
    /// # 返回值
    ///
    /// 释放的缓冲区个数
    pub fn retire(&mut self, completed: u64) -> usize {
        let mut released = 0;
        while let Some((value, _)) = self.in_flight.front() {
            if value.value() > completed {
                break;
            }
            self.in_flight.pop_front();
            released += 1;
        }
        if released > 0 {
            debug!(released, completed, "Upload staging buffers released");
        }
        released
    }

    /// 尚未释放的临时缓冲区个数
    pub fn pending(&self) -> usize {
        self.recorded.len() + self.in_flight.len()
    }
}

impl<D: Device> Default for UploadQueue<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::{HeadlessDevice, Retire};

    #[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct TestData {
        value: [f32; 4],
    }

    #[test]
    fn test_alignment() {
        assert_eq!(constant_buffer_byte_size(1), 256);
        assert_eq!(constant_buffer_byte_size(256), 256);
        assert_eq!(constant_buffer_byte_size(300), 512);
        assert_eq!(align_to(100, 4), 100);
    }

    #[test]
    fn test_constant_buffer_sizing() {
        let device = HeadlessDevice::new(Retire::OnWait);
        let buffer = UploadBuffer::<_, TestData>::new(&device, 10, BufferUsage::Constant).unwrap();
        assert_eq!(buffer.stride(), 256);
        assert_eq!(buffer.byte_size(), 2560);

        let staging = UploadBuffer::<_, TestData>::new(&device, 10, BufferUsage::Staging).unwrap();
        assert_eq!(staging.stride(), 16);
        assert_eq!(staging.byte_size(), 160);
    }

    #[test]
    fn test_write_lands_at_stride_offset() {
        let device = HeadlessDevice::new(Retire::OnWait);
        let mut buffer = UploadBuffer::<_, TestData>::new(&device, 2, BufferUsage::Constant).unwrap();
        let x = TestData { value: [1.0, 2.0, 3.0, 4.0] };
        buffer.write(1, &x);

        assert_eq!(buffer.element_address(1), buffer.gpu_address() + 256);
        let raw = buffer.memory().read_bytes(256, 16);
        assert_eq!(raw, bytemuck::bytes_of(&x));
        assert_eq!(buffer.read(1), x);
        assert_eq!(buffer.read(0), TestData { value: [0.0; 4] });
    }

    #[test]
    #[should_panic]
    fn test_write_out_of_range_panics() {
        let device = HeadlessDevice::new(Retire::OnWait);
        let mut buffer = UploadBuffer::<_, TestData>::new(&device, 2, BufferUsage::Constant).unwrap();
        buffer.write(2, &TestData { value: [0.0; 4] });
    }

    #[test]
    fn test_zero_elements_rejected() {
        let device = HeadlessDevice::new(Retire::OnWait);
        assert!(UploadBuffer::<_, TestData>::new(&device, 0, BufferUsage::Constant).is_err());
    }

    #[test]
    fn test_drop_unmaps_once() {
        let device = HeadlessDevice::new(Retire::OnWait);
        {
            let _a = UploadBuffer::<_, TestData>::new(&device, 4, BufferUsage::Constant).unwrap();
            let _b = UploadBuffer::<_, u8>::new(&device, 64, BufferUsage::Staging).unwrap();
            assert_eq!(device.stats().unmaps, 0);
        }
        assert_eq!(device.stats().unmaps, 2);
    }

    #[test]
    fn test_upload_queue_keeps_staging_until_fence() {
        let device = HeadlessDevice::new(Retire::OnWait);
        let allocator = device.create_command_allocator().unwrap();
        let mut list = device.create_command_list(&allocator).unwrap();
        list.reset(&allocator).unwrap();

        let mut queue = UploadQueue::new();
        let data: Vec<u8> = (0..=255).collect();
        let buffer = queue.create_buffer_with_data(&device, &mut list, &data).unwrap();
        assert_eq!(queue.pending(), 1);

        queue.submitted(FenceValue::new(7));
        assert_eq!(queue.retire(6), 0);
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.retire(7), 1);
        assert_eq!(queue.pending(), 0);
        assert_eq!(buffer.size(), 256);
    }

    #[test]
    fn test_upload_too_large_is_error() {
        let device = HeadlessDevice::new(Retire::OnWait);
        let allocator = device.create_command_allocator().unwrap();
        let mut list = device.create_command_list(&allocator).unwrap();
        list.reset(&allocator).unwrap();

        let dst = device.create_buffer(4).unwrap();
        let mut queue = UploadQueue::new();
        assert!(queue.upload_bytes(&device, &mut list, &dst, &[0u8; 8]).is_err());
        assert!(queue.upload_bytes(&device, &mut list, &dst, &[]).is_ok());
        assert_eq!(queue.pending(), 0);
    }
}
