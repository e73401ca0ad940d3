//! Core resource definitions
//!
//! Data the renderer consumes but does not own the semantics of:
//! - [`Mesh`]: local-space bounds and topology of a drawable
//! - [`Material`]: the contract a material fulfils for the renderer
//! - [`BoundingBox`] / [`BoundingSphere`]: bounds used for culling

pub mod geometry;
pub mod material;
pub mod mesh;

use slotmap::new_key_type;

pub use geometry::{BoundingBox, BoundingSphere};
pub use material::{
    Material, MaterialFlags, MaterialQueue, RenderState, StandardMaterial,
};
pub use mesh::Mesh;

new_key_type! {
    pub struct MeshKey;
    pub struct MaterialKey;
}
