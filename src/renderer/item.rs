//! 渲染项
//!
//! 每个帧资源槽位都有自己的一份物体常量，因此修改世界矩阵后，
//! 必须连续 N 帧把新值写入各个槽位。`frames_dirty` 记录还剩几个槽位没有更新。

use nalgebra::Matrix4;

use crate::renderer::constants::ObjectConstants;
use crate::renderer::device::Device;
use crate::renderer::upload::UploadBuffer;

#[derive(Debug, Clone)]
pub struct RenderItem {
    world: Matrix4<f32>,
    frames_dirty: usize,
    frame_resources: usize,
    /// 在物体常量缓冲区中的索引
    pub cb_index: usize,
    pub vertex_count: u32,
    pub instance_count: u32,
}

impl RenderItem {
    pub fn new(cb_index: usize, world: Matrix4<f32>, vertex_count: u32, frame_resources: usize) -> Self {
        Self {
            world,
            frames_dirty: frame_resources,
            frame_resources,
            cb_index,
            vertex_count,
            instance_count: 1,
        }
    }

    pub fn world(&self) -> &Matrix4<f32> {
        &self.world
    }

    /// 修改世界矩阵，之后的 N 帧都会重新写入常量
    pub fn set_world(&mut self, world: Matrix4<f32>) {
        self.world = world;
        self.frames_dirty = self.frame_resources;
    }

    pub fn frames_dirty(&self) -> usize {
        self.frames_dirty
    }

    pub fn is_dirty(&self) -> bool {
        self.frames_dirty > 0
    }
}

/// 把脏渲染项的常量写入当前槽位的物体常量缓冲区
///
/// # 返回值
///
/// 本帧写入的渲染项个数
pub fn update_object_constants<D: Device>(
    items: &mut [RenderItem],
    object_cb: &mut UploadBuffer<D, ObjectConstants>,
) -> usize {
    let mut written = 0;
    for item in items.iter_mut().filter(|item| item.is_dirty()) {
        object_cb.write(item.cb_index, &ObjectConstants::new(&item.world));
        item.frames_dirty -= 1;
        written += 1;
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::{HeadlessDevice, Retire};
    use crate::renderer::upload::BufferUsage;
    use nalgebra::Vector3;

    #[test]
    fn test_dirty_item_written_once_per_slot() {
        let device = HeadlessDevice::new(Retire::OnWait);
        let mut buffers: Vec<UploadBuffer<HeadlessDevice, ObjectConstants>> = (0..3)
            .map(|_| UploadBuffer::new(&device, 2, BufferUsage::Constant).unwrap())
            .collect();
        let mut items = vec![
            RenderItem::new(0, Matrix4::identity(), 3, 3),
            RenderItem::new(1, Matrix4::identity(), 3, 3),
        ];

        for buffer in buffers.iter_mut() {
            assert_eq!(update_object_constants(&mut items, buffer), 2);
        }
        assert!(items.iter().all(|item| !item.is_dirty()));
        assert_eq!(update_object_constants(&mut items, &mut buffers[0]), 0);

        let moved = Matrix4::new_translation(&Vector3::new(0.0, 1.0, 0.0));
        items[1].set_world(moved);
        assert_eq!(items[1].frames_dirty(), 3);
        for buffer in buffers.iter_mut() {
            assert_eq!(update_object_constants(&mut items, buffer), 1);
            assert_eq!(buffer.read(1), ObjectConstants::new(&moved));
        }
        assert!(!items[1].is_dirty());
    }
}
