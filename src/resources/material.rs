//! Material contract
//!
//! The renderer never compiles shaders or binds resources itself. It asks a
//! material three things:
//!
//! - where the material wants to be queued ([`Material::queue`],
//!   [`Material::render_state`])
//! - whether it takes part in a pass at all ([`Material::opacity`],
//!   [`Material::flags`])
//! - to draw one instance ([`Material::render_instance`], or
//!   [`Material::render_picking_instance`] during the picking pass)
//!
//! [`StandardMaterial`] is the default material assigned to instances that
//! have none.

use std::any::Any;

use bitflags::bitflags;
use glam::Vec4;
use serde::{Deserialize, Serialize};

use crate::backend::{DrawCall, PipelineState};
use crate::renderer::{DrawContext, RenderInstance, RenderPass, RenderSettings};
use crate::scene::SceneUniforms;

bitflags! {
    /// Per-material switches the renderer looks at.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct MaterialFlags: u32 {
        const CAST_SHADOWS    = 1 << 0;
        const RECEIVE_SHADOWS = 1 << 1;
        /// Never frustum culled (skyboxes, screen-space quads).
        const IGNORE_FRUSTUM  = 1 << 2;
        const IGNORE_LIGHTS   = 1 << 3;
    }
}

impl Default for MaterialFlags {
    fn default() -> Self {
        Self::CAST_SHADOWS | Self::RECEIVE_SHADOWS
    }
}

/// Queue request of a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MaterialQueue {
    /// Geometry when opaque, Transparent when blending.
    #[default]
    Auto,
    /// Explicit queue value; the tens digit selects the queue slot.
    Value(i32),
}

/// Fixed-function state requested by a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderState {
    pub blend: bool,
    pub depth_test: bool,
    pub depth_write: bool,
    pub cull_face: bool,
    pub front_face_ccw: bool,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            blend: false,
            depth_test: true,
            depth_write: true,
            cull_face: true,
            front_face_ccw: true,
        }
    }
}

impl RenderState {
    /// Blended, no depth writes.
    #[must_use]
    pub fn alpha() -> Self {
        Self {
            blend: true,
            depth_write: false,
            ..Self::default()
        }
    }

    /// Pipeline state for this render state on top of the renderer baseline.
    #[must_use]
    pub fn to_pipeline_state(&self) -> PipelineState {
        PipelineState {
            blend: self.blend,
            depth_test: self.depth_test,
            depth_write: self.depth_write,
            cull_face: self.cull_face,
            front_face: if self.front_face_ccw {
                wgpu::FrontFace::Ccw
            } else {
                wgpu::FrontFace::Cw
            },
            ..PipelineState::default()
        }
    }
}

/// What the renderer requires from a material.
pub trait Material: Any {
    fn name(&self) -> &str {
        "Material"
    }

    fn queue(&self) -> MaterialQueue {
        MaterialQueue::Auto
    }

    fn opacity(&self) -> f32;

    fn render_state(&self) -> RenderState;

    fn flags(&self) -> MaterialFlags {
        MaterialFlags::default()
    }

    /// Called once per frame for every material in use, before any pass.
    fn prepare(&mut self, _uniforms: &SceneUniforms) {}

    /// Issues the draw calls for `instance`. Returns false when nothing was
    /// drawn.
    fn render_instance(
        &self,
        ctx: &mut DrawContext<'_>,
        instance: &RenderInstance,
        settings: &RenderSettings,
        pass: RenderPass,
    ) -> bool;

    /// Picking variant; defaults to [`Material::render_instance`].
    fn render_picking_instance(
        &self,
        ctx: &mut DrawContext<'_>,
        instance: &RenderInstance,
        settings: &RenderSettings,
        pass: RenderPass,
    ) -> bool {
        self.render_instance(ctx, instance, settings, pass)
    }

    fn as_any(&self) -> &dyn Any;
}

/// Default material: a flat color honoring the render state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardMaterial {
    pub name: String,
    pub color: Vec4,
    pub opacity: f32,
    pub queue: MaterialQueue,
    pub render_state: RenderState,
    pub flags: MaterialFlags,
    #[serde(skip)]
    prepared_time: f32,
}

impl Default for StandardMaterial {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            color: Vec4::ONE,
            opacity: 1.0,
            queue: MaterialQueue::Auto,
            render_state: RenderState::default(),
            flags: MaterialFlags::default(),
            prepared_time: 0.0,
        }
    }
}

impl StandardMaterial {
    #[must_use]
    pub fn new(color: Vec4) -> Self {
        Self {
            color,
            ..Self::default()
        }
    }

    /// Alpha-blended variant.
    #[must_use]
    pub fn transparent(color: Vec4, opacity: f32) -> Self {
        Self {
            color,
            opacity,
            render_state: RenderState::alpha(),
            ..Self::default()
        }
    }

    /// Scene time seen by the last [`Material::prepare`].
    #[must_use]
    pub fn prepared_time(&self) -> f32 {
        self.prepared_time
    }
}

impl Material for StandardMaterial {
    fn name(&self) -> &str {
        &self.name
    }

    fn queue(&self) -> MaterialQueue {
        self.queue
    }

    fn opacity(&self) -> f32 {
        self.opacity
    }

    fn render_state(&self) -> RenderState {
        self.render_state
    }

    fn flags(&self) -> MaterialFlags {
        self.flags
    }

    fn prepare(&mut self, uniforms: &SceneUniforms) {
        self.prepared_time = uniforms.time;
    }

    fn render_instance(
        &self,
        ctx: &mut DrawContext<'_>,
        instance: &RenderInstance,
        _settings: &RenderSettings,
        pass: RenderPass,
    ) -> bool {
        let Some(mesh) = instance.mesh else {
            return false;
        };

        let mut state = self.render_state.to_pipeline_state();
        if pass == RenderPass::Shadow {
            state.color_mask = [false; 4];
            state.blend = false;
        }
        ctx.apply_state(&state);
        ctx.draw(&DrawCall {
            mesh,
            primitive: instance.primitive,
            model: instance.matrix,
            instance: instance.index(),
        });
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
