#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod backend;
pub mod errors;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod utils;

pub use backend::{GpuBackend, HeadlessBackend, TextureHandle, Viewport, WgpuBackend};
pub use errors::{RenderError, Result};
pub use renderer::{
    RenderInstance, RenderListener, RenderPass, RenderQueue, RenderSettings, Renderer,
    RendererSettings,
};
pub use resources::{BoundingBox, Material, MaterialKey, Mesh, MeshKey, StandardMaterial};
pub use scene::{Camera, CameraKey, Light, Node, NodeKey, Scene, Transform};
