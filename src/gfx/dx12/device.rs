//! Direct3D 12 设备与资源
//!
//! 设备持有唯一的直接命令队列，所有提交与围栏信号都经过它。
//! 上传堆缓冲区创建后立即映射，直到 `unmap` 或析构才解除映射。

use std::ptr::NonNull;

use tracing::{debug, info, warn};
use windows::Win32::Foundation::{CloseHandle, HANDLE, RECT, WAIT_OBJECT_0};
use windows::Win32::Graphics::Direct3D::{D3D_FEATURE_LEVEL_11_0, D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject, INFINITE};

use super::pipeline::Pipeline;
use super::{created, CheckHr};
use crate::core::error::{GraphicsError, Result};
use crate::renderer::device::{
    CommandAllocator, CommandList, Device, Fence, GpuAddress, GpuBuffer, MappedBuffer,
    ResourceState, Viewport,
};

/// Direct3D 12 设备
pub struct Dx12Device {
    factory: IDXGIFactory4,
    device: ID3D12Device,
    queue: ID3D12CommandQueue,
    pipeline: Pipeline,
    adapter_name: String,
}

impl Dx12Device {
    /// 创建设备与直接命令队列
    ///
    /// 优先选择第一个硬件适配器，没有可用硬件时回退到 WARP。
    ///
    /// # 参数
    ///
    /// * `debug` - 是否启用 D3D12 调试层
    pub fn new(debug: bool) -> Result<Self> {
        unsafe {
            // 1. 调试层
            if debug {
                let mut debug_interface: Option<ID3D12Debug> = None;
                match D3D12GetDebugInterface(&mut debug_interface) {
                    Ok(()) => {
                        if let Some(debug_interface) = debug_interface {
                            debug_interface.EnableDebugLayer();
                            debug!("DX12 Debug Layer enabled");
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to enable DX12 Debug Layer"),
                }
            }

            // 2. DXGI 工厂
            let flags = if debug {
                DXGI_CREATE_FACTORY_DEBUG
            } else {
                DXGI_CREATE_FACTORY_FLAGS(0)
            };
            let factory: IDXGIFactory4 =
                CreateDXGIFactory2(flags).check("CreateDXGIFactory2", GraphicsError::DeviceCreation)?;

            // 3. 设备
            let (device, adapter_name) = create_device(&factory)?;

            // 4. 命令队列
            let queue_desc = D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
                ..Default::default()
            };
            let queue: ID3D12CommandQueue = device
                .CreateCommandQueue(&queue_desc)
                .check("ID3D12Device::CreateCommandQueue", GraphicsError::DeviceCreation)?;

            // 5. 根签名与管线
            let pipeline = Pipeline::new(&device)?;

            info!(adapter = %adapter_name, "D3D12 device created");

            Ok(Self {
                factory,
                device,
                queue,
                pipeline,
                adapter_name,
            })
        }
    }

    pub fn raw(&self) -> &ID3D12Device {
        &self.device
    }

    pub fn queue(&self) -> &ID3D12CommandQueue {
        &self.queue
    }

    pub fn factory(&self) -> &IDXGIFactory4 {
        &self.factory
    }

    /// 在指定类型的堆中创建缓冲区资源
    unsafe fn committed_buffer(
        &self,
        heap: D3D12_HEAP_TYPE,
        size: u64,
        state: D3D12_RESOURCE_STATES,
    ) -> Result<ID3D12Resource> {
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: heap,
            ..Default::default()
        };
        let desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Width: size,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            ..Default::default()
        };
        let mut resource: Option<ID3D12Resource> = None;
        self.device
            .CreateCommittedResource(&heap_props, D3D12_HEAP_FLAG_NONE, &desc, state, None, &mut resource)
            .check("ID3D12Device::CreateCommittedResource", GraphicsError::ResourceCreation)?;
        created(resource, "ID3D12Device::CreateCommittedResource")
    }
}

/// 枚举硬件适配器，跳过软件适配器；都失败时使用 WARP
unsafe fn create_device(factory: &IDXGIFactory4) -> Result<(ID3D12Device, String)> {
    let mut index = 0;
    while let Ok(adapter) = factory.EnumAdapters1(index) {
        index += 1;
        let desc = match adapter.GetDesc1() {
            Ok(desc) => desc,
            Err(_) => continue,
        };
        if desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32 != 0 {
            continue;
        }
        let mut device: Option<ID3D12Device> = None;
        if D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device).is_ok() {
            if let Some(device) = device {
                return Ok((device, adapter_description(&desc)));
            }
        }
    }

    warn!("No hardware adapter supports D3D12, falling back to WARP");
    let warp: IDXGIAdapter1 = factory
        .EnumWarpAdapter()
        .check("IDXGIFactory4::EnumWarpAdapter", GraphicsError::DeviceCreation)?;
    let mut device: Option<ID3D12Device> = None;
    D3D12CreateDevice(&warp, D3D_FEATURE_LEVEL_11_0, &mut device)
        .check("D3D12CreateDevice", GraphicsError::DeviceCreation)?;
    let device = device.ok_or_else(|| GraphicsError::DeviceCreation("D3D12CreateDevice returned no device".into()))?;
    let name = warp
        .GetDesc1()
        .map(|desc| adapter_description(&desc))
        .unwrap_or_else(|_| "WARP".to_string());
    Ok((device, name))
}

fn adapter_description(desc: &DXGI_ADAPTER_DESC1) -> String {
    let len = desc.Description.iter().position(|&c| c == 0).unwrap_or(desc.Description.len());
    String::from_utf16_lossy(&desc.Description[..len])
}

impl Device for Dx12Device {
    type Fence = Dx12Fence;
    type UploadMemory = Dx12UploadMemory;
    type Buffer = Dx12Buffer;
    type Allocator = Dx12Allocator;
    type CommandList = Dx12CommandList;
    type RenderTarget = Dx12RenderTarget;
    type DepthTarget = Dx12DepthTarget;

    fn name(&self) -> &str {
        &self.adapter_name
    }

    fn create_fence(&self) -> Result<Dx12Fence> {
        unsafe {
            let fence: ID3D12Fence = self
                .device
                .CreateFence(0, D3D12_FENCE_FLAG_NONE)
                .check("ID3D12Device::CreateFence", GraphicsError::ResourceCreation)?;
            let event = CreateEventA(None, false, false, None)
                .check("CreateEventA", GraphicsError::ResourceCreation)?;
            Ok(Dx12Fence { fence, event })
        }
    }

    fn create_upload_memory(&self, size: u64) -> Result<Dx12UploadMemory> {
        unsafe {
            let resource =
                self.committed_buffer(D3D12_HEAP_TYPE_UPLOAD, size, D3D12_RESOURCE_STATE_GENERIC_READ)?;
            let mut data = std::ptr::null_mut();
            resource
                .Map(0, None, Some(&mut data))
                .check("ID3D12Resource::Map", GraphicsError::ResourceCreation)?;
            let mapped = NonNull::new(data as *mut u8)
                .ok_or_else(|| GraphicsError::resource("ID3D12Resource::Map", "null pointer"))?;
            let address = resource.GetGPUVirtualAddress();
            Ok(Dx12UploadMemory {
                resource,
                mapped: Some(mapped),
                address,
                size,
            })
        }
    }

    fn create_buffer(&self, size: u64) -> Result<Dx12Buffer> {
        unsafe {
            let resource =
                self.committed_buffer(D3D12_HEAP_TYPE_DEFAULT, size, D3D12_RESOURCE_STATE_COMMON)?;
            let address = resource.GetGPUVirtualAddress();
            Ok(Dx12Buffer { resource, address, size })
        }
    }

    fn create_command_allocator(&self) -> Result<Dx12Allocator> {
        unsafe {
            let raw: ID3D12CommandAllocator = self
                .device
                .CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)
                .check("ID3D12Device::CreateCommandAllocator", GraphicsError::ResourceCreation)?;
            Ok(Dx12Allocator { raw })
        }
    }

    fn create_command_list(&self, allocator: &Dx12Allocator) -> Result<Dx12CommandList> {
        unsafe {
            let raw: ID3D12GraphicsCommandList = self
                .device
                .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator.raw, Some(&self.pipeline.state))
                .check("ID3D12Device::CreateCommandList", GraphicsError::ResourceCreation)?;
            raw.Close()
                .check("ID3D12GraphicsCommandList::Close", GraphicsError::CommandExecution)?;
            Ok(Dx12CommandList {
                raw,
                root_signature: self.pipeline.root_signature.clone(),
                state: self.pipeline.state.clone(),
            })
        }
    }

    fn execute(&self, list: &Dx12CommandList) -> Result<()> {
        let lists: [Option<ID3D12CommandList>; 1] = [Some(list.raw.clone().into())];
        unsafe { self.queue.ExecuteCommandLists(&lists) };
        Ok(())
    }

    fn signal(&self, fence: &Dx12Fence, value: u64) -> Result<()> {
        unsafe {
            self.queue
                .Signal(&fence.fence, value)
                .check("ID3D12CommandQueue::Signal", GraphicsError::CommandExecution)
        }
    }

    fn removed_reason(&self) -> Option<String> {
        match unsafe { self.device.GetDeviceRemovedReason() } {
            Ok(()) => None,
            Err(e) => Some(e.to_string()),
        }
    }
}

/// 围栏与等待用的事件句柄
pub struct Dx12Fence {
    fence: ID3D12Fence,
    event: HANDLE,
}

impl Fence for Dx12Fence {
    fn completed_value(&self) -> u64 {
        unsafe { self.fence.GetCompletedValue() }
    }

    fn wait_for(&self, value: u64) -> Result<()> {
        unsafe {
            self.fence
                .SetEventOnCompletion(value, self.event)
                .check("ID3D12Fence::SetEventOnCompletion", GraphicsError::Synchronization)?;
            if WaitForSingleObject(self.event, INFINITE) != WAIT_OBJECT_0 {
                return Err(GraphicsError::Synchronization(format!(
                    "WaitForSingleObject failed while waiting for fence value {}",
                    value
                ))
                .into());
            }
        }
        Ok(())
    }
}

impl Drop for Dx12Fence {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.event);
        }
    }
}

/// 上传堆中持续映射的缓冲区
pub struct Dx12UploadMemory {
    resource: ID3D12Resource,
    mapped: Option<NonNull<u8>>,
    address: GpuAddress,
    size: u64,
}

impl MappedBuffer for Dx12UploadMemory {
    fn mapped_ptr(&self) -> NonNull<u8> {
        // 解除映射后不再有任何写入路径
        self.mapped.unwrap_or(NonNull::dangling())
    }

    fn gpu_address(&self) -> GpuAddress {
        self.address
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn unmap(&mut self) {
        if self.mapped.take().is_some() {
            unsafe { self.resource.Unmap(0, None) };
        }
    }
}

impl Drop for Dx12UploadMemory {
    fn drop(&mut self) {
        self.unmap();
    }
}

/// 默认堆缓冲区
pub struct Dx12Buffer {
    resource: ID3D12Resource,
    address: GpuAddress,
    size: u64,
}

impl GpuBuffer for Dx12Buffer {
    fn gpu_address(&self) -> GpuAddress {
        self.address
    }

    fn size(&self) -> u64 {
        self.size
    }
}

pub struct Dx12Allocator {
    raw: ID3D12CommandAllocator,
}

impl CommandAllocator for Dx12Allocator {
    fn reset(&mut self) -> Result<()> {
        unsafe {
            self.raw
                .Reset()
                .check("ID3D12CommandAllocator::Reset", GraphicsError::CommandExecution)
        }
    }
}

/// 交换链缓冲区及其 RTV
pub struct Dx12RenderTarget {
    pub(crate) resource: ID3D12Resource,
    pub(crate) rtv: D3D12_CPU_DESCRIPTOR_HANDLE,
}

/// 深度缓冲区及其 DSV，创建时即处于 `DEPTH_WRITE`
pub struct Dx12DepthTarget {
    pub(crate) resource: ID3D12Resource,
    pub(crate) dsv: D3D12_CPU_DESCRIPTOR_HANDLE,
}

impl Dx12RenderTarget {
    pub fn resource(&self) -> &ID3D12Resource {
        &self.resource
    }
}

impl Dx12DepthTarget {
    pub fn resource(&self) -> &ID3D12Resource {
        &self.resource
    }
}

/// 图形命令列表
///
/// 每次 `reset` 后绑定根签名与三角形拓扑，录制代码只需设置常量缓冲区与绘制。
pub struct Dx12CommandList {
    raw: ID3D12GraphicsCommandList,
    root_signature: ID3D12RootSignature,
    state: ID3D12PipelineState,
}

impl Dx12CommandList {
    fn barrier(&mut self, resource: &ID3D12Resource, before: ResourceState, after: ResourceState) {
        let barrier = transition_barrier(resource, native_state(before), native_state(after));
        unsafe { self.raw.ResourceBarrier(&[barrier]) };
    }
}

impl CommandList<Dx12Device> for Dx12CommandList {
    fn reset(&mut self, allocator: &Dx12Allocator) -> Result<()> {
        unsafe {
            self.raw
                .Reset(&allocator.raw, Some(&self.state))
                .check("ID3D12GraphicsCommandList::Reset", GraphicsError::CommandExecution)?;
            self.raw.SetGraphicsRootSignature(&self.root_signature);
            self.raw.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
        }
        Ok(())
    }

    fn transition_render_target(&mut self, target: &Dx12RenderTarget, before: ResourceState, after: ResourceState) {
        self.barrier(&target.resource, before, after);
    }

    fn transition_buffer(&mut self, buffer: &Dx12Buffer, before: ResourceState, after: ResourceState) {
        self.barrier(&buffer.resource, before, after);
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        let native = D3D12_VIEWPORT {
            TopLeftX: viewport.x,
            TopLeftY: viewport.y,
            Width: viewport.width,
            Height: viewport.height,
            MinDepth: viewport.min_depth,
            MaxDepth: viewport.max_depth,
        };
        let (left, top, right, bottom) = viewport.scissor();
        let scissor = RECT { left, top, right, bottom };
        unsafe {
            self.raw.RSSetViewports(&[native]);
            self.raw.RSSetScissorRects(&[scissor]);
        }
    }

    fn set_render_target(&mut self, target: &Dx12RenderTarget, depth: Option<&Dx12DepthTarget>) {
        let dsv = depth.map(|d| &d.dsv as *const D3D12_CPU_DESCRIPTOR_HANDLE);
        unsafe { self.raw.OMSetRenderTargets(1, Some(&target.rtv), false, dsv) };
    }

    fn clear_render_target(&mut self, target: &Dx12RenderTarget, color: [f32; 4]) {
        unsafe { self.raw.ClearRenderTargetView(target.rtv, &color, None) };
    }

    fn clear_depth_stencil(&mut self, depth: &Dx12DepthTarget, value: f32, stencil: u8) {
        unsafe {
            self.raw
                .ClearDepthStencilView(depth.dsv, D3D12_CLEAR_FLAG_DEPTH, value, stencil, None)
        };
    }

    fn set_constant_buffer(&mut self, slot: u32, address: GpuAddress) {
        unsafe { self.raw.SetGraphicsRootConstantBufferView(slot, address) };
    }

    fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32) {
        unsafe { self.raw.DrawInstanced(vertex_count, instance_count, 0, 0) };
    }

    fn copy_buffer(&mut self, dst: &Dx12Buffer, src: &Dx12UploadMemory, bytes: u64) {
        unsafe { self.raw.CopyBufferRegion(&dst.resource, 0, &src.resource, 0, bytes) };
    }

    fn close(&mut self) -> Result<()> {
        unsafe {
            self.raw
                .Close()
                .check("ID3D12GraphicsCommandList::Close", GraphicsError::CommandExecution)
        }
    }
}

fn native_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Common => D3D12_RESOURCE_STATE_COMMON,
        ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,
        ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
        ResourceState::DepthWrite => D3D12_RESOURCE_STATE_DEPTH_WRITE,
        ResourceState::CopyDest => D3D12_RESOURCE_STATE_COPY_DEST,
        ResourceState::CopySource => D3D12_RESOURCE_STATE_COPY_SOURCE,
        ResourceState::GenericRead => D3D12_RESOURCE_STATE_GENERIC_READ,
    }
}

/// 整个资源的状态转换屏障
///
/// 屏障只借用资源指针，不增加引用计数。
fn transition_barrier(
    resource: &ID3D12Resource,
    before: D3D12_RESOURCE_STATES,
    after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: std::mem::ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: unsafe { std::mem::transmute_copy(resource) },
                StateBefore: before,
                StateAfter: after,
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
            }),
        },
    }
}
