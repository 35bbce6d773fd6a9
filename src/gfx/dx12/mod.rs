//! Direct3D 12 后端
//!
//! - `device`：设备、命令队列、围栏与各类资源
//! - `pipeline`：根签名与管线状态对象
//! - `swapchain`：DXGI 交换链、RTV/DSV 描述符堆
//!
//! 所有原生调用的失败都经过 [`CheckHr`] 转成 `GraphicsError`，
//! 设备移除类状态码单独映射为 `DeviceLost`。

pub mod device;
pub mod pipeline;
pub mod swapchain;

pub use device::{
    Dx12Allocator, Dx12Buffer, Dx12CommandList, Dx12DepthTarget, Dx12Device, Dx12Fence,
    Dx12RenderTarget, Dx12UploadMemory,
};
pub use swapchain::{window_hwnd, Dx12Presenter};

use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_DEVICE_HUNG, DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_DEVICE_RESET,
};

use crate::core::error::{GraphicsError, RenderError};

/// 原生调用结果到 `GraphicsError` 的映射
pub(crate) trait CheckHr<T> {
    /// # 参数
    ///
    /// * `call` - 失败时写入错误信息的调用名
    /// * `kind` - 非设备丢失时使用的错误变体构造函数
    fn check(self, call: &str, kind: fn(String) -> GraphicsError) -> Result<T, RenderError>;
}

impl<T> CheckHr<T> for windows::core::Result<T> {
    fn check(self, call: &str, kind: fn(String) -> GraphicsError) -> Result<T, RenderError> {
        self.map_err(|e| {
            let code = e.code();
            if code == DXGI_ERROR_DEVICE_REMOVED
                || code == DXGI_ERROR_DEVICE_RESET
                || code == DXGI_ERROR_DEVICE_HUNG
            {
                GraphicsError::DeviceLost {
                    reason: format!("{} returned {}", call, e),
                }
                .into()
            } else {
                kind(format!("{} failed: {}", call, e)).into()
            }
        })
    }
}

/// `CreateXxx(..., &mut Option<T>)` 形式调用的返回值解包
pub(crate) fn created<T>(value: Option<T>, call: &str) -> Result<T, RenderError> {
    value.ok_or_else(|| GraphicsError::resource(call, "returned no object").into())
}
