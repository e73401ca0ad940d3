//! Fixed-function pipeline state and the scope guard that restores it.

/// Fixed-function state the renderer controls between stages.
///
/// [`PipelineState::default`] is the renderer's baseline: back-face culling
/// with counter-clockwise front faces, all color channels writable, depth
/// test `Less` with depth writes, blending off (alpha factors preset),
/// stencil off with a `0xFF` mask, `Keep` ops and an `Always 1 0xFF` func.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineState {
    pub cull_face: bool,
    pub front_face: wgpu::FrontFace,
    pub color_mask: [bool; 4],

    pub depth_test: bool,
    pub depth_func: wgpu::CompareFunction,
    pub depth_write: bool,

    pub blend: bool,
    pub blend_src: wgpu::BlendFactor,
    pub blend_dst: wgpu::BlendFactor,

    pub stencil_test: bool,
    pub stencil_write_mask: u8,
    pub stencil_op: wgpu::StencilOperation,
    pub stencil_func: wgpu::CompareFunction,
    pub stencil_ref: u32,
    pub stencil_read_mask: u8,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            cull_face: true,
            front_face: wgpu::FrontFace::Ccw,
            color_mask: [true; 4],

            depth_test: true,
            depth_func: wgpu::CompareFunction::Less,
            depth_write: true,

            blend: false,
            blend_src: wgpu::BlendFactor::SrcAlpha,
            blend_dst: wgpu::BlendFactor::OneMinusSrcAlpha,

            stencil_test: false,
            stencil_write_mask: 0xFF,
            stencil_op: wgpu::StencilOperation::Keep,
            stencil_func: wgpu::CompareFunction::Always,
            stencil_ref: 1,
            stencil_read_mask: 0xFF,
        }
    }
}

impl PipelineState {
    /// State used when drawing blended geometry.
    #[must_use]
    pub fn alpha_blended() -> Self {
        Self {
            blend: true,
            depth_write: false,
            ..Self::default()
        }
    }
}

/// Something that owns pipeline state and can put it back to baseline.
pub trait ResetState {
    fn reset_state(&mut self);
}

impl ResetState for dyn super::GpuBackend {
    fn reset_state(&mut self) {
        self.apply_state(&PipelineState::default());
    }
}

/// Scope guard over a state owner.
///
/// Code inside the scope may change pipeline state freely; when the guard
/// goes out of scope the owner is reset to [`PipelineState::default`].
pub struct StateScope<'a, T: ResetState + ?Sized> {
    inner: &'a mut T,
}

impl<'a, T: ResetState + ?Sized> StateScope<'a, T> {
    pub fn new(inner: &'a mut T) -> Self {
        Self { inner }
    }
}

impl<T: ResetState + ?Sized> std::ops::Deref for StateScope<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.inner
    }
}

impl<T: ResetState + ?Sized> std::ops::DerefMut for StateScope<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner
    }
}

impl<T: ResetState + ?Sized> Drop for StateScope<'_, T> {
    fn drop(&mut self) {
        self.inner.reset_state();
    }
}
