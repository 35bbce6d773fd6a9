//! 帧调度核心
//!
//! 本模块与具体图形 API 无关，只依赖 `device` 中定义的 trait。
//!
//! # 组成
//!
//! - `sync`：围栏闸门，单调递增的围栏值与阻塞等待
//! - `frame`：帧资源环，N 个槽位循环使用
//! - `upload`：持续映射的上传缓冲区，常量缓冲区按 256 字节对齐
//! - `backbuffer`：后备缓冲区索引与状态跟踪
//! - `scheduler`：把以上组件串成一帧的状态机
//! - `constants`, `item`：常量布局与渲染项的脏帧计数

pub mod backbuffer;
pub mod constants;
pub mod device;
pub mod frame;
pub mod item;
pub mod scheduler;
pub mod sync;
pub mod upload;

pub use backbuffer::{BackBufferSet, SWAP_CHAIN_BUFFER_COUNT};
pub use constants::{Camera, Lighting, ObjectConstants, PassConstants, OBJECT_CB_SLOT, PASS_CB_SLOT};
pub use device::{Device, Presenter, ResourceState, Viewport};
pub use frame::{FrameResource, FrameResourceRing};
pub use item::{update_object_constants, RenderItem};
pub use scheduler::{FrameContext, FramePhase, FrameScheduler, FrameStats, SchedulerSettings};
pub use sync::{FenceGate, FencePoint, FenceValue, WaitOutcome};
pub use upload::{BufferUsage, UploadBuffer, UploadQueue};
