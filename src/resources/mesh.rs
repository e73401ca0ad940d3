use crate::backend::Primitive;
use crate::resources::BoundingBox;

/// A drawable produced by a mesh factory.
///
/// Only what the renderer needs is kept here: local bounds for culling and
/// topology for wireframe overrides. Vertex data lives with the backend.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub name: String,
    /// Local-space bounds.
    pub bounding: BoundingBox,
    pub primitive: Primitive,
    pub vertex_count: u32,
    pub index_count: u32,
    /// Whether an edge index buffer exists for wireframe rendering.
    pub has_wireframe: bool,
}

impl Mesh {
    #[must_use]
    pub fn new(name: &str, bounding: BoundingBox) -> Self {
        Self {
            name: name.to_string(),
            bounding,
            primitive: Primitive::Triangles,
            vertex_count: 0,
            index_count: 0,
            has_wireframe: false,
        }
    }

    /// Unit-aligned cube of edge `size`.
    #[must_use]
    pub fn cube(size: f32) -> Self {
        let mut mesh = Self::new("cube", BoundingBox::cube(size));
        mesh.vertex_count = 24;
        mesh.index_count = 36;
        mesh.has_wireframe = true;
        mesh
    }

    /// Sphere of `radius` (bounds only).
    #[must_use]
    pub fn sphere(radius: f32) -> Self {
        let mut mesh = Self::new("sphere", BoundingBox::cube(radius * 2.0));
        mesh.has_wireframe = true;
        mesh
    }
}
