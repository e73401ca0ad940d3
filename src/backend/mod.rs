//! GPU Backend Abstraction
//!
//! The renderer never talks to a graphics API directly. Everything it needs
//! from the GPU goes through the [`GpuBackend`] trait:
//!
//! - Viewport and fixed-function pipeline state ([`PipelineState`])
//! - Scissored clears ([`ClearRequest`])
//! - Offscreen textures (2D and cube) addressed by [`TextureHandle`]
//! - Render-target binding ([`RenderTarget`])
//! - Draw submission ([`DrawCall`])
//! - Timer queries for GPU profiling
//!
//! Two implementations ship with the crate:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`HeadlessBackend`] | CPU-only command recorder, used by tests and tools |
//! | [`WgpuBackend`] | Real GPU textures, clears, copies and timestamp queries |

mod clear_quad;
pub mod headless;
pub mod state;
pub mod wgpu_backend;

use std::any::Any;

use bitflags::bitflags;
use glam::{Mat4, Vec4};
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

use crate::resources::MeshKey;

pub use headless::{BackendCommand, HeadlessBackend};
pub use state::{PipelineState, ResetState, StateScope};
pub use wgpu_backend::{DrawEncoder, WgpuBackend};

new_key_type! {
    /// Handle of a texture owned by a [`GpuBackend`].
    pub struct TextureHandle;
}

// ============================================================================
// Viewport
// ============================================================================

/// Pixel-space rectangle (`x`, `y` is the lower-left corner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Viewport {
    #[must_use]
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Viewport covering a whole surface of the given size.
    #[must_use]
    pub const fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    #[inline]
    #[must_use]
    pub fn as_vec4(&self) -> Vec4 {
        Vec4::new(
            self.x as f32,
            self.y as f32,
            self.width as f32,
            self.height as f32,
        )
    }

    /// True when the rectangle has no area.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Width divided by height, or 1.0 for degenerate rectangles.
    #[must_use]
    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

// ============================================================================
// Textures & Targets
// ============================================================================

/// Dimensionality of a backend texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    Texture2D,
    Cube,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8,
    Rgba16Float,
    Depth32,
}

impl TextureFormat {
    #[inline]
    #[must_use]
    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub kind: TextureKind,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
}

impl TextureDesc {
    #[must_use]
    pub fn color_2d(width: u32, height: u32) -> Self {
        Self {
            kind: TextureKind::Texture2D,
            format: TextureFormat::Rgba8,
            width,
            height,
        }
    }

    #[must_use]
    pub fn depth_2d(size: u32) -> Self {
        Self {
            kind: TextureKind::Texture2D,
            format: TextureFormat::Depth32,
            width: size,
            height: size,
        }
    }

    #[must_use]
    pub fn cube(size: u32, format: TextureFormat) -> Self {
        Self {
            kind: TextureKind::Cube,
            format,
            width: size,
            height: size,
        }
    }
}

/// Face of a cube texture, in the conventional array-layer order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CubeFace {
    PosX,
    NegX,
    PosY,
    NegY,
    PosZ,
    NegZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PosX,
        CubeFace::NegX,
        CubeFace::PosY,
        CubeFace::NegY,
        CubeFace::PosZ,
        CubeFace::NegZ,
    ];

    /// Array layer of this face.
    #[inline]
    #[must_use]
    pub fn layer(self) -> u32 {
        self as u32
    }
}

/// A texture (or one face of a cube texture) bound as the draw destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    pub texture: TextureHandle,
    pub face: Option<CubeFace>,
}

impl RenderTarget {
    #[must_use]
    pub fn texture(texture: TextureHandle) -> Self {
        Self {
            texture,
            face: None,
        }
    }

    #[must_use]
    pub fn cube_face(texture: TextureHandle, face: CubeFace) -> Self {
        Self {
            texture,
            face: Some(face),
        }
    }
}

// ============================================================================
// Clears & Draws
// ============================================================================

bitflags! {
    /// Buffers affected by a clear.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClearFlags: u8 {
        const COLOR   = 1 << 0;
        const DEPTH   = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

/// A clear restricted to a scissor rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearRequest {
    pub rect: Viewport,
    pub flags: ClearFlags,
    pub color: Vec4,
    pub depth: f32,
    pub stencil: u32,
}

impl ClearRequest {
    #[must_use]
    pub fn new(rect: Viewport, flags: ClearFlags, color: Vec4) -> Self {
        Self {
            rect,
            flags,
            color,
            depth: 1.0,
            stencil: 0,
        }
    }
}

/// Primitive topology of a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Primitive {
    #[default]
    Triangles,
    Lines,
    Points,
}

/// One draw issued by a material.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCall {
    pub mesh: MeshKey,
    pub primitive: Primitive,
    pub model: Mat4,
    /// Index of the instance in the frame's instance list.
    pub instance: usize,
}

// ============================================================================
// Timer Queries
// ============================================================================

/// State of a GPU timer query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QueryStatus {
    /// The backend has no timer queries.
    Unsupported,
    /// The result is not available yet.
    Pending,
    /// Elapsed GPU time in milliseconds.
    Ready(f64),
}

// ============================================================================
// Backend Trait
// ============================================================================

/// Everything the renderer requires from a graphics API.
///
/// The renderer assumes exclusive access to the backend for the duration of
/// a frame. Methods never fail: a backend that cannot honor a request logs it
/// and carries on, matching the best-effort behavior of a GL context.
pub trait GpuBackend: Any {
    /// Size of the default framebuffer in pixels.
    fn drawing_buffer_size(&self) -> (u32, u32);

    fn viewport(&self) -> Viewport;
    fn set_viewport(&mut self, viewport: Viewport);

    fn pipeline_state(&self) -> PipelineState;
    fn apply_state(&mut self, state: &PipelineState);

    fn clear(&mut self, request: &ClearRequest);

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureHandle;
    fn release_texture(&mut self, texture: TextureHandle);
    fn texture_desc(&self, texture: TextureHandle) -> Option<TextureDesc>;

    /// Binds a target; `None` binds the default framebuffer.
    fn bind_target(&mut self, target: Option<RenderTarget>);
    fn current_target(&self) -> Option<RenderTarget>;

    /// Copies the color buffer of the current target into `dst`.
    fn copy_color_buffer(&mut self, dst: TextureHandle);

    /// Draws `texture` into the default framebuffer inside `viewport`.
    fn blit_to_screen(&mut self, texture: TextureHandle, viewport: Viewport);

    fn draw(&mut self, call: &DrawCall);

    fn timer_queries_supported(&self) -> bool {
        false
    }
    fn begin_timer_query(&mut self, _slot: usize) {}
    fn end_timer_query(&mut self, _slot: usize) {}
    fn timer_query_result(&mut self, _slot: usize) -> QueryStatus {
        QueryStatus::Unsupported
    }

    /// Called once after the last command of a frame.
    fn end_frame(&mut self) {}

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl dyn GpuBackend {
    /// Downcasts to a concrete backend.
    pub fn downcast_ref<T: GpuBackend>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: GpuBackend>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}
