//! Per-frame render state.
//!
//! [`RenderContext`] holds what the renderer knows about the frame in
//! flight: the active pass, the camera it enabled last (captured as a
//! [`CameraState`] so scratch cameras work the same as scene cameras), the
//! layer filter and the full viewport. [`DrawContext`] is the narrow view
//! handed to materials while they draw one instance.

use glam::{Mat4, Vec3, Vec4};

use crate::backend::{DrawCall, GpuBackend, PipelineState, RenderTarget, Viewport};
use crate::renderer::RenderPass;
use crate::resources::MaterialKey;
use crate::scene::{Camera, CameraKey, Frustum, SceneUniforms};

/// Snapshot of an enabled camera.
#[derive(Debug, Clone)]
pub struct CameraState {
    /// `None` for scratch cameras (cube map faces, shadow cameras).
    pub key: Option<CameraKey>,
    pub eye: Vec3,
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub frustum: Frustum,
    pub layers: u32,
    pub rendering_index: i32,
    pub overwrite_material: Option<MaterialKey>,
    /// Pixel viewport the camera renders into.
    pub viewport: Viewport,
    pub background: Vec4,
    pub clear_color: bool,
    pub clear_depth: bool,
}

impl CameraState {
    /// Captures an up-to-date camera.
    pub(crate) fn capture(camera: &mut Camera, key: Option<CameraKey>, viewport: Viewport) -> Self {
        camera.update_matrices(false);
        Self {
            key,
            eye: camera.get_eye(),
            view: camera.cached_view_matrix(),
            projection: camera.cached_projection_matrix(),
            view_projection: camera.cached_view_projection_matrix(),
            frustum: *camera.frustum(),
            layers: camera.layers,
            rendering_index: camera.rendering_index(),
            overwrite_material: camera.overwrite_material,
            viewport,
            background: camera.background_color,
            clear_color: camera.clear_color,
            clear_depth: camera.clear_depth,
        }
    }

    /// Bit OR-ed into the visibility mask of instances this camera sees.
    #[must_use]
    pub fn visibility_flag(&self) -> u32 {
        if self.rendering_index < 0 {
            return 0;
        }
        1u32.checked_shl(self.rendering_index as u32).unwrap_or(0)
    }
}

/// State of the frame being rendered.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    pub pass: RenderPass,
    pub camera: Option<CameraState>,
    /// `camera.layers & settings.layers` of the enabled camera.
    pub layers_filter: u32,
    /// Viewport of the whole drawing area for this frame.
    pub full_viewport: Viewport,
    /// Cameras rendered this frame, in order.
    pub cameras: Vec<CameraKey>,
    /// Target bound by the renderer (`None` = screen).
    pub target: Option<RenderTarget>,
}

/// What a material may touch while drawing an instance.
pub struct DrawContext<'a> {
    backend: &'a mut dyn GpuBackend,
    pub camera: &'a CameraState,
    pub uniforms: &'a SceneUniforms,
    /// Shader blocks enabled for the whole frame.
    pub shader_blocks: &'a [String],
    pub pass: RenderPass,
    draw_calls: usize,
}

impl<'a> DrawContext<'a> {
    pub(crate) fn new(
        backend: &'a mut dyn GpuBackend,
        camera: &'a CameraState,
        uniforms: &'a SceneUniforms,
        shader_blocks: &'a [String],
        pass: RenderPass,
    ) -> Self {
        Self {
            backend,
            camera,
            uniforms,
            shader_blocks,
            pass,
            draw_calls: 0,
        }
    }

    pub fn apply_state(&mut self, state: &PipelineState) {
        self.backend.apply_state(state);
    }

    pub fn draw(&mut self, call: &DrawCall) {
        self.draw_calls += 1;
        self.backend.draw(call);
    }

    /// Raw backend access for materials that need more than draws.
    pub fn backend(&mut self) -> &mut dyn GpuBackend {
        &mut *self.backend
    }

    /// Draws issued through this context.
    #[must_use]
    pub fn draw_calls(&self) -> usize {
        self.draw_calls
    }

    /// True when `block` was enabled for the frame.
    #[must_use]
    pub fn has_shader_block(&self, block: &str) -> bool {
        self.shader_blocks.iter().any(|b| b == block)
    }
}
