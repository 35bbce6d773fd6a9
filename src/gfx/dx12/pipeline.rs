//! 根签名与管线状态
//!
//! 根签名只有两个根 CBV：b0 为物体常量，b1 为渲染过程常量。
//! 着色器在运行时用 `D3DCompile` 编译，源码嵌入在二进制中。

use tracing::debug;
use windows::core::{s, PCSTR};
use windows::Win32::Graphics::Direct3D::Fxc::D3DCompile;
use windows::Win32::Graphics::Direct3D::ID3DBlob;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use super::{created, CheckHr};
use crate::core::error::{GraphicsError, Result};
use crate::renderer::constants::{OBJECT_CB_SLOT, PASS_CB_SLOT};

pub const BACK_BUFFER_FORMAT: DXGI_FORMAT = DXGI_FORMAT_R8G8B8A8_UNORM;
pub const DEPTH_FORMAT: DXGI_FORMAT = DXGI_FORMAT_D32_FLOAT;

const SHADER_SOURCE: &str = include_str!("shaders/frame.hlsl");

pub struct Pipeline {
    pub root_signature: ID3D12RootSignature,
    pub state: ID3D12PipelineState,
}

impl Pipeline {
    pub fn new(device: &ID3D12Device) -> Result<Self> {
        unsafe {
            let root_signature = create_root_signature(device)?;
            let vs = compile(s!("VSMain"), s!("vs_5_0"))?;
            let ps = compile(s!("PSMain"), s!("ps_5_0"))?;

            let mut pso_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC::default();
            pso_desc.pRootSignature = std::mem::transmute_copy(&root_signature);
            pso_desc.VS = D3D12_SHADER_BYTECODE {
                pShaderBytecode: vs.GetBufferPointer(),
                BytecodeLength: vs.GetBufferSize(),
            };
            pso_desc.PS = D3D12_SHADER_BYTECODE {
                pShaderBytecode: ps.GetBufferPointer(),
                BytecodeLength: ps.GetBufferSize(),
            };
            pso_desc.BlendState.RenderTarget[0] = D3D12_RENDER_TARGET_BLEND_DESC {
                BlendEnable: false.into(),
                LogicOpEnable: false.into(),
                RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
                ..Default::default()
            };
            // 三角形两面都可见
            pso_desc.RasterizerState = D3D12_RASTERIZER_DESC {
                FillMode: D3D12_FILL_MODE_SOLID,
                CullMode: D3D12_CULL_MODE_NONE,
                DepthClipEnable: true.into(),
                ..Default::default()
            };
            pso_desc.DepthStencilState = D3D12_DEPTH_STENCIL_DESC {
                DepthEnable: true.into(),
                DepthWriteMask: D3D12_DEPTH_WRITE_MASK_ALL,
                DepthFunc: D3D12_COMPARISON_FUNC_LESS,
                StencilEnable: false.into(),
                StencilReadMask: 0xFF,
                StencilWriteMask: 0xFF,
                FrontFace: D3D12_DEPTH_STENCILOP_DESC::default(),
                BackFace: D3D12_DEPTH_STENCILOP_DESC::default(),
            };
            pso_desc.SampleMask = u32::MAX;
            pso_desc.DSVFormat = DEPTH_FORMAT;
            pso_desc.PrimitiveTopologyType = D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE;
            pso_desc.NumRenderTargets = 1;
            pso_desc.RTVFormats[0] = BACK_BUFFER_FORMAT;
            pso_desc.SampleDesc.Count = 1;

            let state: ID3D12PipelineState = device
                .CreateGraphicsPipelineState(&pso_desc)
                .check("ID3D12Device::CreateGraphicsPipelineState", GraphicsError::ResourceCreation)?;

            debug!("Root signature and pipeline state created");
            Ok(Self { root_signature, state })
        }
    }
}

unsafe fn create_root_signature(device: &ID3D12Device) -> Result<ID3D12RootSignature> {
    let root_cbv = |register: u32| D3D12_ROOT_PARAMETER {
        ParameterType: D3D12_ROOT_PARAMETER_TYPE_CBV,
        Anonymous: D3D12_ROOT_PARAMETER_0 {
            Descriptor: D3D12_ROOT_DESCRIPTOR {
                ShaderRegister: register,
                RegisterSpace: 0,
            },
        },
        ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
    };
    let root_parameters = [root_cbv(OBJECT_CB_SLOT), root_cbv(PASS_CB_SLOT)];

    let root_desc = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: root_parameters.len() as u32,
        pParameters: root_parameters.as_ptr(),
        NumStaticSamplers: 0,
        pStaticSamplers: std::ptr::null(),
        Flags: D3D12_ROOT_SIGNATURE_FLAG_NONE,
    };

    let mut signature: Option<ID3DBlob> = None;
    let mut error: Option<ID3DBlob> = None;
    if let Err(e) =
        D3D12SerializeRootSignature(&root_desc, D3D_ROOT_SIGNATURE_VERSION_1, &mut signature, Some(&mut error))
    {
        let message = error.map(|blob| blob_text(&blob)).unwrap_or_else(|| e.to_string());
        return Err(GraphicsError::resource("D3D12SerializeRootSignature", message).into());
    }
    let signature = created(signature, "D3D12SerializeRootSignature")?;

    device
        .CreateRootSignature(
            0,
            std::slice::from_raw_parts(signature.GetBufferPointer() as *const u8, signature.GetBufferSize()),
        )
        .check("ID3D12Device::CreateRootSignature", GraphicsError::ResourceCreation)
}

/// 编译嵌入的着色器源码，失败时带上编译器输出
unsafe fn compile(entry: PCSTR, target: PCSTR) -> Result<ID3DBlob> {
    let mut code: Option<ID3DBlob> = None;
    let mut error: Option<ID3DBlob> = None;
    let result = D3DCompile(
        SHADER_SOURCE.as_ptr() as _,
        SHADER_SOURCE.len(),
        PCSTR::null(),
        None,
        None,
        entry,
        target,
        0,
        0,
        &mut code,
        Some(&mut error),
    );
    if let Err(e) = result {
        let message = error.map(|blob| blob_text(&blob)).unwrap_or_else(|| e.to_string());
        return Err(GraphicsError::resource("D3DCompile", message).into());
    }
    created(code, "D3DCompile")
}

unsafe fn blob_text(blob: &ID3DBlob) -> String {
    let bytes = std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize());
    String::from_utf8_lossy(bytes).trim_end_matches('\0').trim().to_string()
}
