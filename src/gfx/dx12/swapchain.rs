//! DXGI 交换链
//!
//! 交换链持有两个后备缓冲区，每个缓冲区对应 RTV 堆中的一个描述符。
//! 深度缓冲区与交换链同尺寸，尺寸变化时一起重建。

use raw_window_handle::{HasWindowHandle, RawWindowHandle};
use tracing::{error, info};
use windows::core::Interface;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use winit::window::Window;

use super::device::{Dx12DepthTarget, Dx12Device, Dx12RenderTarget};
use super::pipeline::{BACK_BUFFER_FORMAT, DEPTH_FORMAT};
use super::{created, CheckHr};
use crate::core::error::{GraphicsError, Result};
use crate::renderer::backbuffer::SWAP_CHAIN_BUFFER_COUNT;
use crate::renderer::device::Presenter;

/// 从 winit 窗口取出 Win32 窗口句柄
pub fn window_hwnd(window: &Window) -> Result<HWND> {
    let handle = window
        .window_handle()
        .map_err(|e| GraphicsError::Swapchain(format!("window handle unavailable: {}", e)))?;
    match handle.as_raw() {
        RawWindowHandle::Win32(win32) => Ok(HWND(win32.hwnd.get() as *mut core::ffi::c_void)),
        other => Err(GraphicsError::Swapchain(format!("expected a Win32 window handle, got {:?}", other)).into()),
    }
}

/// 交换链、后备缓冲区与深度缓冲区
pub struct Dx12Presenter {
    device: ID3D12Device,
    swap_chain: IDXGISwapChain3,
    rtv_heap: ID3D12DescriptorHeap,
    dsv_heap: ID3D12DescriptorHeap,
    rtv_descriptor_size: usize,
    targets: Vec<Dx12RenderTarget>,
    depth: Dx12DepthTarget,
    width: u32,
    height: u32,
}

impl Dx12Presenter {
    /// 为窗口创建交换链
    ///
    /// # 参数
    ///
    /// * `device` - 交换链绑定到该设备的直接命令队列
    /// * `hwnd` - 目标窗口
    /// * `width`, `height` - 初始尺寸
    pub fn new(device: &Dx12Device, hwnd: HWND, width: u32, height: u32) -> Result<Self> {
        unsafe {
            let desc = DXGI_SWAP_CHAIN_DESC1 {
                Width: width,
                Height: height,
                Format: BACK_BUFFER_FORMAT,
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    ..Default::default()
                },
                BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
                BufferCount: SWAP_CHAIN_BUFFER_COUNT as u32,
                SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
                ..Default::default()
            };
            let swap_chain: IDXGISwapChain1 = device
                .factory()
                .CreateSwapChainForHwnd(device.queue(), hwnd, &desc, None, None)
                .check("IDXGIFactory2::CreateSwapChainForHwnd", GraphicsError::Swapchain)?;
            let swap_chain: IDXGISwapChain3 = swap_chain
                .cast()
                .check("IDXGISwapChain1::cast<IDXGISwapChain3>", GraphicsError::Swapchain)?;

            let raw = device.raw().clone();
            let rtv_heap = create_heap(&raw, D3D12_DESCRIPTOR_HEAP_TYPE_RTV, SWAP_CHAIN_BUFFER_COUNT as u32)?;
            let dsv_heap = create_heap(&raw, D3D12_DESCRIPTOR_HEAP_TYPE_DSV, 1)?;
            let rtv_descriptor_size = raw.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_RTV) as usize;

            let targets = create_targets(&raw, &swap_chain, &rtv_heap, rtv_descriptor_size)?;
            let depth = create_depth(&raw, &dsv_heap, width, height)?;

            info!(width, height, buffers = SWAP_CHAIN_BUFFER_COUNT, "Swap chain created");

            Ok(Self {
                device: raw,
                swap_chain,
                rtv_heap,
                dsv_heap,
                rtv_descriptor_size,
                targets,
                depth,
                width,
                height,
            })
        }
    }
}

impl Presenter<Dx12Device> for Dx12Presenter {
    fn buffer_count(&self) -> usize {
        self.targets.len()
    }

    fn current_back_buffer_index(&self) -> usize {
        unsafe { self.swap_chain.GetCurrentBackBufferIndex() as usize }
    }

    fn back_buffer(&self, index: usize) -> Option<&Dx12RenderTarget> {
        self.targets.get(index)
    }

    fn depth_stencil(&self) -> &Dx12DepthTarget {
        &self.depth
    }

    fn present(&mut self, vsync: bool) -> Result<()> {
        let interval = if vsync { 1 } else { 0 };
        unsafe {
            self.swap_chain
                .Present(interval, DXGI_PRESENT(0))
                .ok()
                .check("IDXGISwapChain::Present", GraphicsError::Swapchain)
        }
    }

    /// 调用方保证 GPU 已空闲，旧的后备缓冲区引用在这里全部释放
    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        // 旧的后备缓冲区引用必须全部释放，ResizeBuffers 才会成功
        self.targets.clear();
        let resized = unsafe {
            self.swap_chain
                .ResizeBuffers(
                    SWAP_CHAIN_BUFFER_COUNT as u32,
                    width,
                    height,
                    BACK_BUFFER_FORMAT,
                    DXGI_SWAP_CHAIN_FLAG(0),
                )
                .check("IDXGISwapChain::ResizeBuffers", GraphicsError::Swapchain)
                .and_then(|()| create_targets(&self.device, &self.swap_chain, &self.rtv_heap, self.rtv_descriptor_size))
                .and_then(|targets| {
                    create_depth(&self.device, &self.dsv_heap, width, height).map(|depth| (targets, depth))
                })
        };
        let (targets, depth) = match resized {
            Ok(created) => created,
            Err(e) => {
                error!(width, height, error = %e, "Swap chain resize failed, presenter has no back buffers");
                return Err(e);
            }
        };
        self.targets = targets;
        self.depth = depth;
        self.width = width;
        self.height = height;
        Ok(())
    }

    fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

unsafe fn create_heap(
    device: &ID3D12Device,
    kind: D3D12_DESCRIPTOR_HEAP_TYPE,
    count: u32,
) -> Result<ID3D12DescriptorHeap> {
    let desc = D3D12_DESCRIPTOR_HEAP_DESC {
        Type: kind,
        NumDescriptors: count,
        Flags: D3D12_DESCRIPTOR_HEAP_FLAG_NONE,
        NodeMask: 0,
    };
    device
        .CreateDescriptorHeap(&desc)
        .check("ID3D12Device::CreateDescriptorHeap", GraphicsError::ResourceCreation)
}

unsafe fn create_targets(
    device: &ID3D12Device,
    swap_chain: &IDXGISwapChain3,
    rtv_heap: &ID3D12DescriptorHeap,
    rtv_descriptor_size: usize,
) -> Result<Vec<Dx12RenderTarget>> {
    let start = rtv_heap.GetCPUDescriptorHandleForHeapStart();
    (0..SWAP_CHAIN_BUFFER_COUNT)
        .map(|i| -> Result<Dx12RenderTarget> {
            let resource: ID3D12Resource = swap_chain
                .GetBuffer(i as u32)
                .check("IDXGISwapChain::GetBuffer", GraphicsError::Swapchain)?;
            let rtv = D3D12_CPU_DESCRIPTOR_HANDLE {
                ptr: start.ptr + i * rtv_descriptor_size,
            };
            device.CreateRenderTargetView(&resource, None, rtv);
            Ok(Dx12RenderTarget { resource, rtv })
        })
        .collect()
}

/// 深度缓冲区直接以 `DEPTH_WRITE` 状态创建
unsafe fn create_depth(
    device: &ID3D12Device,
    dsv_heap: &ID3D12DescriptorHeap,
    width: u32,
    height: u32,
) -> Result<Dx12DepthTarget> {
    let heap_props = D3D12_HEAP_PROPERTIES {
        Type: D3D12_HEAP_TYPE_DEFAULT,
        ..Default::default()
    };
    let desc = D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
        Width: width as u64,
        Height: height,
        DepthOrArraySize: 1,
        MipLevels: 1,
        Format: DEPTH_FORMAT,
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
        Flags: D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL,
        ..Default::default()
    };
    let clear_value = D3D12_CLEAR_VALUE {
        Format: DEPTH_FORMAT,
        Anonymous: D3D12_CLEAR_VALUE_0 {
            DepthStencil: D3D12_DEPTH_STENCIL_VALUE { Depth: 1.0, Stencil: 0 },
        },
    };

    let mut resource: Option<ID3D12Resource> = None;
    device
        .CreateCommittedResource(
            &heap_props,
            D3D12_HEAP_FLAG_NONE,
            &desc,
            D3D12_RESOURCE_STATE_DEPTH_WRITE,
            Some(&clear_value),
            &mut resource,
        )
        .check("ID3D12Device::CreateCommittedResource", GraphicsError::ResourceCreation)?;
    let resource = created(resource, "ID3D12Device::CreateCommittedResource")?;

    let dsv = dsv_heap.GetCPUDescriptorHandleForHeapStart();
    device.CreateDepthStencilView(&resource, None, dsv);
    Ok(Dx12DepthTarget { resource, dsv })
}
