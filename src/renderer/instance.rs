use std::fmt;
use std::rc::Rc;

use glam::{Mat4, Vec3};

use crate::backend::Primitive;
use crate::renderer::RenderPass;
use crate::resources::{BoundingBox, MaterialKey, MeshKey};
use crate::scene::{NodeKey, ProbeKey};

/// Called before an instance is tested for visibility. May mutate the
/// instance; returning `false` skips it for the current pass.
pub type PreRenderHook = Rc<dyn Fn(&mut RenderInstance, RenderPass) -> bool>;

/// Called after the instance's material issued its draws.
pub type PostRenderHook = Rc<dyn Fn(&RenderInstance, RenderPass)>;

/// One drawable gathered for the current frame.
///
/// Built by scene collection (from a node's mesh renderer, a node component
/// or a scene collector) and consumed by the renderer. The transient fields
/// (`distance`, visibility, camera mask) are rewritten every frame and every
/// pass.
#[derive(Clone)]
pub struct RenderInstance {
    pub node: Option<NodeKey>,
    pub mesh: Option<MeshKey>,
    pub material: Option<MaterialKey>,
    /// World transform.
    pub matrix: Mat4,
    /// World-space bounds, valid when `use_bounding` is set.
    pub aabb: BoundingBox,
    /// World position used for distance sorting.
    pub center: Vec3,
    pub layers: u32,
    pub use_bounding: bool,
    pub selectable: bool,
    /// Higher values are drawn first in priority-sorted queues.
    pub priority: i32,
    pub primitive: Primitive,
    pub pre_render: Option<PreRenderHook>,
    pub post_render: Option<PostRenderHook>,

    // === Per-frame, owned by the renderer ===
    pub(crate) distance: f32,
    pub(crate) is_visible: bool,
    pub(crate) camera_visibility: u32,
    pub(crate) nearest_reflection_probe: Option<ProbeKey>,
    pub(crate) index: usize,
}

impl Default for RenderInstance {
    fn default() -> Self {
        Self {
            node: None,
            mesh: None,
            material: None,
            matrix: Mat4::IDENTITY,
            aabb: BoundingBox::default(),
            center: Vec3::ZERO,
            layers: 3,
            use_bounding: true,
            selectable: true,
            priority: 0,
            primitive: Primitive::Triangles,
            pre_render: None,
            post_render: None,
            distance: 0.0,
            is_visible: false,
            camera_visibility: 0,
            nearest_reflection_probe: None,
            index: 0,
        }
    }
}

impl RenderInstance {
    #[must_use]
    pub fn new(mesh: MeshKey, material: Option<MaterialKey>, matrix: Mat4) -> Self {
        Self {
            mesh: Some(mesh),
            material,
            matrix,
            center: matrix.transform_point3(Vec3::ZERO),
            ..Self::default()
        }
    }

    /// Distance from the eye of the camera of the last pass.
    #[inline]
    #[must_use]
    pub fn distance(&self) -> f32 {
        self.distance
    }

    /// Passed visibility in the last pass.
    #[inline]
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.is_visible
    }

    /// Bit `i` is set when the camera with rendering index `i` saw this
    /// instance during the current frame.
    #[inline]
    #[must_use]
    pub fn camera_visibility(&self) -> u32 {
        self.camera_visibility
    }

    #[inline]
    #[must_use]
    pub fn nearest_reflection_probe(&self) -> Option<ProbeKey> {
        self.nearest_reflection_probe
    }

    /// Position in the frame's instance list.
    #[inline]
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Sets `aabb` from local bounds and `center` from its middle.
    pub fn update_bounds(&mut self, local: &BoundingBox) {
        self.aabb = local.transform(&self.matrix);
        self.center = self.aabb.center();
    }
}

impl fmt::Debug for RenderInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderInstance")
            .field("node", &self.node)
            .field("mesh", &self.mesh)
            .field("material", &self.material)
            .field("center", &self.center)
            .field("layers", &self.layers)
            .field("priority", &self.priority)
            .field("distance", &self.distance)
            .field("is_visible", &self.is_visible)
            .field("camera_visibility", &self.camera_visibility)
            .finish_non_exhaustive()
    }
}
