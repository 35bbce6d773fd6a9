//! 设备抽象层
//!
//! 帧调度核心对图形 API 的全部要求都定义在这里。核心代码对这些 trait 泛型，
//! 设备句柄以 `&D` 显式传递给每个需要它的组件，不存在全局设备或队列。
//!
//! 两个实现：
//! - `gfx::headless`：软件模拟的异步队列，用于测试与无窗口运行
//! - `gfx::dx12`：基于 `windows` crate 的 Direct3D 12（仅 Windows）

use std::ptr::NonNull;

use crate::core::error::Result;

/// 设备可见的缓冲区地址
pub type GpuAddress = u64;

/// 资源状态，用于显式的状态转换屏障
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    Present,
    RenderTarget,
    DepthWrite,
    CopyDest,
    CopySource,
    GenericRead,
}

/// 视口与裁剪矩形
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// 覆盖整个渲染目标的视口，深度范围 [0, 1]
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    /// 与视口一致的裁剪矩形 (left, top, right, bottom)
    pub fn scissor(&self) -> (i32, i32, i32, i32) {
        (
            self.x as i32,
            self.y as i32,
            (self.x + self.width) as i32,
            (self.y + self.height) as i32,
        )
    }

    /// 宽高比
    pub fn aspect_ratio(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            1.0
        }
    }
}

/// 图形设备与其直接命令队列
pub trait Device: Sized {
    type Fence: Fence;
    type UploadMemory: MappedBuffer;
    type Buffer: GpuBuffer;
    type Allocator: CommandAllocator;
    type CommandList: CommandList<Self>;
    type RenderTarget;
    type DepthTarget;

    /// 设备名称（适配器描述）
    fn name(&self) -> &str;

    /// 创建初始值为 0 的围栏
    fn create_fence(&self) -> Result<Self::Fence>;

    /// 创建 CPU 可写、GPU 可读的上传堆内存，创建后立即映射
    fn create_upload_memory(&self, size: u64) -> Result<Self::UploadMemory>;

    /// 创建设备本地缓冲区，初始状态为 `ResourceState::Common`
    fn create_buffer(&self, size: u64) -> Result<Self::Buffer>;

    fn create_command_allocator(&self) -> Result<Self::Allocator>;

    /// 创建处于关闭状态的命令列表
    fn create_command_list(&self, allocator: &Self::Allocator) -> Result<Self::CommandList>;

    /// 提交已关闭的命令列表
    fn execute(&self, list: &Self::CommandList) -> Result<()>;

    /// 让队列在之前提交的工作全部完成后把围栏设为 `value`
    fn signal(&self, fence: &Self::Fence, value: u64) -> Result<()>;

    /// 设备被移除时返回原因
    fn removed_reason(&self) -> Option<String>;
}

/// GPU 围栏
pub trait Fence {
    /// 非阻塞读取已完成的值。设备丢失时为 `u64::MAX`
    fn completed_value(&self) -> u64;

    /// 阻塞直到已完成的值达到 `value`，通过内核事件等待
    fn wait_for(&self, value: u64) -> Result<()>;
}

/// 持久映射的上传内存
pub trait MappedBuffer {
    /// 映射指针，在 `unmap` 之前一直有效
    fn mapped_ptr(&self) -> NonNull<u8>;

    fn gpu_address(&self) -> GpuAddress;

    fn size(&self) -> u64;

    /// 解除映射，只允许调用一次
    fn unmap(&mut self);
}

/// 设备本地缓冲区
pub trait GpuBuffer {
    fn gpu_address(&self) -> GpuAddress;

    fn size(&self) -> u64;
}

/// 命令分配器
pub trait CommandAllocator {
    /// 回收命令内存。只有在使用它录制的命令全部执行完毕后才能调用
    fn reset(&mut self) -> Result<()>;
}

/// 图形命令列表
pub trait CommandList<D: Device> {
    fn reset(&mut self, allocator: &D::Allocator) -> Result<()>;

    fn transition_render_target(
        &mut self,
        target: &D::RenderTarget,
        before: ResourceState,
        after: ResourceState,
    );

    fn transition_buffer(&mut self, buffer: &D::Buffer, before: ResourceState, after: ResourceState);

    fn set_viewport(&mut self, viewport: &Viewport);

    fn set_render_target(&mut self, target: &D::RenderTarget, depth: Option<&D::DepthTarget>);

    fn clear_render_target(&mut self, target: &D::RenderTarget, color: [f32; 4]);

    fn clear_depth_stencil(&mut self, depth: &D::DepthTarget, value: f32, stencil: u8);

    /// 绑定根常量缓冲区视图
    fn set_constant_buffer(&mut self, slot: u32, address: GpuAddress);

    fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32);

    /// 从上传内存复制 `bytes` 字节到设备本地缓冲区
    fn copy_buffer(&mut self, dst: &D::Buffer, src: &D::UploadMemory, bytes: u64);

    fn close(&mut self) -> Result<()>;
}

/// 交换链
pub trait Presenter<D: Device> {
    fn buffer_count(&self) -> usize;

    /// 下一次渲染应使用的后备缓冲区
    fn current_back_buffer_index(&self) -> usize;

    /// 按索引获取后备缓冲区，越界返回 `None`
    fn back_buffer(&self, index: usize) -> Option<&D::RenderTarget>;

    fn depth_stencil(&self) -> &D::DepthTarget;

    fn present(&mut self, vsync: bool) -> Result<()>;

    /// 重建后备缓冲区与深度缓冲区。调用前 GPU 必须空闲
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;

    fn extent(&self) -> (u32, u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_scissor() {
        let viewport = Viewport::full(800, 600);
        assert_eq!(viewport.scissor(), (0, 0, 800, 600));
        assert!((viewport.aspect_ratio() - 4.0 / 3.0).abs() < 1e-6);
        assert_eq!(Viewport::full(800, 0).aspect_ratio(), 1.0);
    }
}
