use glam::{Affine3A, Mat4};
use smallvec::SmallVec;
use slotmap::SlotMap;

use crate::backend::Primitive;
use crate::renderer::{PostRenderHook, PreRenderHook, RenderInstance};
use crate::resources::{MaterialKey, Mesh, MeshKey};
use crate::scene::collider::Collider;
use crate::scene::transform::Transform;
use crate::scene::{CameraKey, LightKey, NodeKey};

/// Mesh + material pair a node renders.
#[derive(Clone)]
pub struct MeshRenderer {
    pub mesh: MeshKey,
    /// `None` falls back to the scene default material.
    pub material: Option<MaterialKey>,
    pub priority: i32,
    /// Cull against the transformed mesh bounds.
    pub use_bounding: bool,
    /// Overrides the mesh topology.
    pub primitive: Option<Primitive>,
    pub pre_render: Option<PreRenderHook>,
    pub post_render: Option<PostRenderHook>,
}

impl MeshRenderer {
    #[must_use]
    pub fn new(mesh: MeshKey, material: Option<MaterialKey>) -> Self {
        Self {
            mesh,
            material,
            priority: 0,
            use_bounding: true,
            primitive: None,
            pre_render: None,
            post_render: None,
        }
    }
}

/// What a component sees of its node during collection.
pub struct CollectContext<'a> {
    pub node: NodeKey,
    pub world_matrix: Mat4,
    pub layers: u32,
    pub selectable: bool,
    pub meshes: &'a SlotMap<MeshKey, Mesh>,
}

impl CollectContext<'_> {
    /// Instance for `mesh` carrying the node's matrix, layers and flags.
    #[must_use]
    pub fn instance(&self, mesh: MeshKey, material: Option<MaterialKey>) -> RenderInstance {
        let mut instance = RenderInstance::new(mesh, material, self.world_matrix);
        instance.node = Some(self.node);
        instance.layers = self.layers;
        instance.selectable = self.selectable;
        instance
    }
}

/// Behavior attached to a node that contributes to collection.
pub trait NodeComponent {
    fn collect_render_instances(&self, _ctx: &CollectContext<'_>, _out: &mut Vec<RenderInstance>) {}

    fn collect_colliders(&self, _ctx: &CollectContext<'_>, _out: &mut Vec<Collider>) {}
}

/// Scene graph node.
///
/// Hierarchy and transform are hot data walked every frame; everything else
/// is optional and read only during collection.
pub struct Node {
    pub name: String,
    pub(crate) parent: Option<NodeKey>,
    pub(crate) children: SmallVec<[NodeKey; 4]>,

    pub transform: Transform,

    /// Invisible nodes contribute no instances or colliders; their lights
    /// are tracked but not collected.
    pub visible: bool,
    /// Excluded from the picking pass when false.
    pub selectable: bool,
    pub layers: u32,

    pub mesh: Option<MeshRenderer>,
    pub collider: Option<Collider>,
    pub(crate) camera: Option<CameraKey>,
    pub(crate) light: Option<LightKey>,
    pub components: Vec<Box<dyn NodeComponent>>,
}

impl Node {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            children: SmallVec::new(),
            transform: Transform::new(),
            visible: true,
            selectable: true,
            layers: 3,
            mesh: None,
            collider: None,
            camera: None,
            light: None,
            components: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_mesh(mut self, mesh: MeshRenderer) -> Self {
        self.mesh = Some(mesh);
        self
    }

    #[must_use]
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    #[must_use]
    pub fn with_component(mut self, component: impl NodeComponent + 'static) -> Self {
        self.components.push(Box::new(component));
        self
    }

    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<NodeKey> {
        self.parent
    }

    #[inline]
    #[must_use]
    pub fn children(&self) -> &[NodeKey] {
        &self.children
    }

    #[inline]
    #[must_use]
    pub fn camera(&self) -> Option<CameraKey> {
        self.camera
    }

    #[inline]
    #[must_use]
    pub fn light(&self) -> Option<LightKey> {
        self.light
    }

    #[inline]
    #[must_use]
    pub fn world_matrix(&self) -> &Affine3A {
        &self.transform.world_matrix
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new("node")
    }
}

/// Updates world matrices of every node below `roots`, parents first.
pub(crate) fn update_hierarchy(nodes: &mut SlotMap<NodeKey, Node>, roots: &[NodeKey]) {
    let mut stack: Vec<(NodeKey, Affine3A, bool)> = Vec::with_capacity(64);
    for &root in roots.iter().rev() {
        stack.push((root, Affine3A::IDENTITY, false));
    }

    while let Some((key, parent_world, parent_changed)) = stack.pop() {
        let Some(node) = nodes.get_mut(key) else {
            continue;
        };

        let local_changed = node.transform.update_local_matrix();
        let changed = local_changed || parent_changed;
        if changed {
            let world = parent_world * *node.transform.local_matrix();
            node.transform.set_world_matrix(world);
        }

        let world = node.transform.world_matrix;
        for &child in node.children.iter().rev() {
            stack.push((child, world, changed));
        }
    }
}

/// Node keys below `roots` in depth-first pre-order.
pub(crate) fn tree_order(nodes: &SlotMap<NodeKey, Node>, roots: &[NodeKey]) -> Vec<NodeKey> {
    let mut order = Vec::with_capacity(nodes.len());
    let mut stack: Vec<NodeKey> = roots.iter().rev().copied().collect();
    while let Some(key) = stack.pop() {
        let Some(node) = nodes.get(key) else {
            continue;
        };
        order.push(key);
        stack.extend(node.children.iter().rev().copied());
    }
    order
}
