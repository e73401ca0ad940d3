use glam::{Mat4, Vec3};
use slotmap::SlotMap;

use crate::resources::{BoundingBox, Mesh, MeshKey};
use crate::scene::NodeKey;

#[derive(Debug, Clone, PartialEq)]
pub enum ColliderShape {
    /// Local-space box.
    Box(BoundingBox),
    Sphere { radius: f32 },
    /// Uses the bounds of a mesh.
    Mesh(MeshKey),
}

/// A physics instance gathered during collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Collider {
    pub node: Option<NodeKey>,
    pub shape: ColliderShape,
    /// World matrix, filled in at collection.
    pub matrix: Mat4,
    /// World-space bounds, filled in at collection.
    pub aabb: BoundingBox,
    pub layers: u32,
}

impl Collider {
    #[must_use]
    pub fn new(shape: ColliderShape) -> Self {
        Self {
            node: None,
            shape,
            matrix: Mat4::IDENTITY,
            aabb: BoundingBox::default(),
            layers: 3,
        }
    }

    /// Recomputes `aabb` from the shape and `matrix`.
    pub fn update_bounds(&mut self, meshes: &SlotMap<MeshKey, Mesh>) {
        let local = match &self.shape {
            ColliderShape::Box(bounds) => *bounds,
            ColliderShape::Sphere { radius } => {
                BoundingBox::from_center_half_size(Vec3::ZERO, Vec3::splat(*radius))
            }
            ColliderShape::Mesh(key) => {
                let Some(mesh) = meshes.get(*key) else {
                    log::warn!("Collider mesh {key:?} not found");
                    return;
                };
                mesh.bounding
            }
        };
        self.aabb = local.transform(&self.matrix);
    }
}
