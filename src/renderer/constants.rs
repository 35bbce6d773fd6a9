//! 每帧着色器常量
//!
//! 布局与 HLSL 常量缓冲区一一对应，矩阵按 nalgebra 的列主序存储，
//! 着色器中使用 `mul(M, v)`。

use bytemuck::{Pod, Zeroable};
use nalgebra::{Matrix4, Point3, Vector3};

/// 物体常量所在的根参数索引
pub const OBJECT_CB_SLOT: u32 = 0;
/// 渲染过程常量所在的根参数索引
pub const PASS_CB_SLOT: u32 = 1;

/// 物体常量（寄存器 b0）
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ObjectConstants {
    pub world: [[f32; 4]; 4],
}

impl ObjectConstants {
    pub fn new(world: &Matrix4<f32>) -> Self {
        Self { world: *world.as_ref() }
    }
}

impl Default for ObjectConstants {
    fn default() -> Self {
        Self::new(&Matrix4::identity())
    }
}

/// 渲染过程常量（寄存器 b1）
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PassConstants {
    pub view_proj: [[f32; 4]; 4],
    pub eye_position: [f32; 4],
    pub light_direction: [f32; 4],
    pub light_color: [f32; 4],
    pub fog_color: [f32; 4],
    pub fog_start: f32,
    pub fog_range: f32,
    pub total_time: f32,
    pub _pad: f32,
}

impl PassConstants {
    pub fn new(camera: &Camera, aspect: f32, lighting: &Lighting, total_time: f32) -> Self {
        let eye = camera.eye;
        let light = lighting.direction.normalize();
        Self {
            view_proj: *camera.view_proj(aspect).as_ref(),
            eye_position: [eye.x, eye.y, eye.z, 1.0],
            light_direction: [light.x, light.y, light.z, 0.0],
            light_color: lighting.color,
            fog_color: lighting.fog_color,
            fog_start: lighting.fog_start,
            fog_range: lighting.fog_range,
            total_time,
            _pad: 0.0,
        }
    }
}

/// 左手坐标系相机，深度范围 [0, 1]
#[derive(Debug, Clone)]
pub struct Camera {
    pub eye: Point3<f32>,
    pub target: Point3<f32>,
    pub up: Vector3<f32>,
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Point3::new(0.0, 2.0, -6.0),
            target: Point3::origin(),
            up: Vector3::y(),
            fov_y: 0.25 * std::f32::consts::PI,
            near: 1.0,
            far: 1000.0,
        }
    }
}

impl Camera {
    pub fn view(&self) -> Matrix4<f32> {
        Matrix4::look_at_lh(&self.eye, &self.target, &self.up)
    }

    pub fn projection(&self, aspect: f32) -> Matrix4<f32> {
        perspective_fov_lh(self.fov_y, aspect, self.near, self.far)
    }

    pub fn view_proj(&self, aspect: f32) -> Matrix4<f32> {
        self.projection(aspect) * self.view()
    }

    /// 绕 Y 轴环绕目标点
    pub fn orbit(&mut self, radius: f32, theta: f32, height: f32) {
        self.eye = Point3::new(
            self.target.x + radius * theta.sin(),
            self.target.y + height,
            self.target.z - radius * theta.cos(),
        );
    }
}

/// 方向光与雾参数
#[derive(Debug, Clone)]
pub struct Lighting {
    pub direction: Vector3<f32>,
    pub color: [f32; 4],
    pub fog_color: [f32; 4],
    pub fog_start: f32,
    pub fog_range: f32,
}

impl Default for Lighting {
    fn default() -> Self {
        Self {
            direction: Vector3::new(0.577, -0.577, 0.577),
            color: [1.0, 1.0, 0.9, 1.0],
            fog_color: [0.7, 0.7, 0.7, 1.0],
            fog_start: 5.0,
            fog_range: 150.0,
        }
    }
}

/// D3D 风格的左手透视投影，把 [near, far] 映射到 [0, 1]
#[rustfmt::skip]
pub fn perspective_fov_lh(fov_y: f32, aspect: f32, near: f32, far: f32) -> Matrix4<f32> {
    let y_scale = 1.0 / (0.5 * fov_y).tan();
    let x_scale = y_scale / aspect;
    let range = far / (far - near);
    Matrix4::new(
        x_scale, 0.0, 0.0, 0.0,
        0.0, y_scale, 0.0, 0.0,
        0.0, 0.0, range, -near * range,
        0.0, 0.0, 1.0, 0.0,
    )
}
