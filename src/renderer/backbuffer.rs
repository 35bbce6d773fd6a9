//! 后备缓冲区状态跟踪
//!
//! 交换链持有缓冲区本身，这里只记录当前索引和每个缓冲区的资源状态。
//! 渲染前缓冲区必须处于 `Present`，切换到 `RenderTarget` 需要显式屏障，
//! 呈现前再切换回来。

use crate::core::error::{GraphicsError, Result};
use crate::renderer::device::ResourceState;

/// 交换链缓冲区数量
pub const SWAP_CHAIN_BUFFER_COUNT: usize = 2;

/// 一次状态转换
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub index: usize,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// 固定数量的后备缓冲区
#[derive(Debug, Clone)]
pub struct BackBufferSet<const N: usize> {
    states: [ResourceState; N],
    current: usize,
}

impl<const N: usize> BackBufferSet<N> {
    /// 所有缓冲区处于 `Present`，当前索引为 `current`
    pub fn new(current: usize) -> Result<Self> {
        if current >= N {
            return Err(GraphicsError::Swapchain(format!(
                "back buffer index {} out of range ({} buffers)",
                current, N
            ))
            .into());
        }
        Ok(Self {
            states: [ResourceState::Present; N],
            current,
        })
    }

    pub const fn len(&self) -> usize {
        N
    }

    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    /// 按索引读取状态，越界返回 `None`
    pub fn state(&self, index: usize) -> Option<ResourceState> {
        self.states.get(index).copied()
    }

    /// `Present → RenderTarget`
    pub fn begin_render(&mut self) -> Result<Transition> {
        self.transition(ResourceState::Present, ResourceState::RenderTarget)
    }

    /// `RenderTarget → Present`
    pub fn end_render(&mut self) -> Result<Transition> {
        self.transition(ResourceState::RenderTarget, ResourceState::Present)
    }

    /// 呈现后前进到下一个缓冲区
    pub fn advance(&mut self) -> Result<usize> {
        if self.states[self.current] != ResourceState::Present {
            return Err(GraphicsError::Synchronization(format!(
                "back buffer {} presented while in {:?}",
                self.current, self.states[self.current]
            ))
            .into());
        }
        self.current = (self.current + 1) % N;
        Ok(self.current)
    }

    /// 交换链重建后重置状态
    pub fn reset(&mut self, current: usize) -> Result<()> {
        *self = Self::new(current)?;
        Ok(())
    }

    fn transition(&mut self, before: ResourceState, after: ResourceState) -> Result<Transition> {
        let state = &mut self.states[self.current];
        if *state != before {
            return Err(GraphicsError::Synchronization(format!(
                "back buffer {} is in {:?}, expected {:?}",
                self.current, state, before
            ))
            .into());
        }
        *state = after;
        Ok(Transition {
            index: self.current,
            before,
            after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_cycles_once_per_present() {
        let mut set = BackBufferSet::<3>::new(0).unwrap();
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(set.current_index());
            set.begin_render().unwrap();
            set.end_render().unwrap();
            set.advance().unwrap();
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_render_requires_present_state() {
        let mut set = BackBufferSet::<2>::new(1).unwrap();
        let t = set.begin_render().unwrap();
        assert_eq!(t, Transition { index: 1, before: ResourceState::Present, after: ResourceState::RenderTarget });
        assert!(set.begin_render().is_err());
        assert!(set.advance().is_err());
        set.end_render().unwrap();
        assert_eq!(set.advance().unwrap(), 0);
        assert_eq!(set.state(1), Some(ResourceState::Present));
        assert_eq!(set.state(2), None);
    }

    #[test]
    fn test_out_of_range_start_rejected() {
        assert!(BackBufferSet::<2>::new(2).is_err());
        let mut set = BackBufferSet::<2>::new(0).unwrap();
        set.begin_render().unwrap();
        set.reset(1).unwrap();
        assert_eq!(set.current_index(), 1);
        assert_eq!(set.state(0), Some(ResourceState::Present));
    }
}
