//! Scene graph and visibility data
//!
//! - [`Node`]: hierarchy, [`Transform`], and the optional mesh renderer,
//!   camera, light, collider and components a node carries
//! - [`Camera`]: lazily updated view/projection matrices and [`Frustum`]
//! - [`Light`], [`ReflectionProbe`], [`Collider`]
//! - [`Scene`]: owns all of the above plus meshes and materials, and
//!   produces the per-frame [`CollectedData`] through
//!   [`Scene::collect_data`]

pub mod camera;
pub mod collider;
pub mod frustum;
pub mod light;
pub mod node;
pub mod probe;
pub mod scene;
pub mod transform;

use glam::Vec3;
use slotmap::new_key_type;

use crate::backend::TextureHandle;

pub use camera::{Camera, CameraConfig, OrthoRect, ProjectionType, Ray};
pub use collider::{Collider, ColliderShape};
pub use frustum::{ClipResult, Frustum};
pub use light::{Light, LightKind, ShadowSettings};
pub use node::{CollectContext, MeshRenderer, Node, NodeComponent};
pub use probe::ReflectionProbe;
pub use scene::{CollectedData, Scene, SceneCollectContext, SceneCollector};
pub use transform::Transform;

new_key_type! {
    pub struct NodeKey;
    pub struct CameraKey;
    pub struct LightKey;
    pub struct ProbeKey;
}

/// Scene-wide values materials read during preparation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneUniforms {
    /// Seconds since the renderer started.
    pub time: f32,
    /// Seconds since the previous frame.
    pub delta_time: f32,
    pub ambient_light: Vec3,
    pub environment_texture: Option<TextureHandle>,
}

impl Default for SceneUniforms {
    fn default() -> Self {
        Self {
            time: 0.0,
            delta_time: 0.0,
            ambient_light: Vec3::splat(0.2),
            environment_texture: None,
        }
    }
}
