use std::cell::RefCell;
use std::rc::Rc;

use glam::{Affine3A, Mat4, Quat, Vec3};
use slotmap::SlotMap;

use crate::backend::TextureHandle;
use crate::errors::{RenderError, Result};
use crate::renderer::{RenderInstance, RenderListener};
use crate::resources::{Material, MaterialKey, Mesh, MeshKey, StandardMaterial};
use crate::scene::camera::Camera;
use crate::scene::collider::Collider;
use crate::scene::light::Light;
use crate::scene::node::{self, CollectContext, Node};
use crate::scene::probe::{self, ReflectionProbe};
use crate::scene::{CameraKey, LightKey, NodeKey, ProbeKey, SceneUniforms};

/// A material stored in the scene, with its per-frame preparation stamp.
pub(crate) struct MaterialEntry {
    pub(crate) material: Box<dyn Material>,
    pub(crate) prepared_frame: Option<u64>,
}

/// Output of one collection: everything that exists to render this frame.
#[derive(Debug, Default)]
pub struct CollectedData {
    pub instances: Vec<RenderInstance>,
    pub lights: Vec<LightKey>,
    pub colliders: Vec<Collider>,
    pub cameras: Vec<CameraKey>,
}

/// What a scene-level collector sees.
pub struct SceneCollectContext<'a> {
    pub meshes: &'a SlotMap<MeshKey, Mesh>,
    pub lights: &'a SlotMap<LightKey, Light>,
    pub uniforms: &'a SceneUniforms,
}

/// Scene-wide contributor not tied to a node (skybox, debug grid, ...).
pub trait SceneCollector {
    fn collect(&mut self, ctx: &SceneCollectContext<'_>, out: &mut CollectedData);
}

/// Scene graph plus the resources and collected data the renderer reads.
pub struct Scene {
    pub(crate) nodes: SlotMap<NodeKey, Node>,
    pub(crate) root_nodes: Vec<NodeKey>,
    pub(crate) meshes: SlotMap<MeshKey, Mesh>,
    pub(crate) materials: SlotMap<MaterialKey, MaterialEntry>,
    pub(crate) cameras: SlotMap<CameraKey, Camera>,
    camera_order: Vec<CameraKey>,
    pub(crate) lights: SlotMap<LightKey, Light>,
    pub(crate) reflection_probes: SlotMap<ProbeKey, ReflectionProbe>,
    default_material: MaterialKey,

    pub uniforms: SceneUniforms,

    pub(crate) listeners: Vec<Rc<RefCell<dyn RenderListener>>>,
    collectors: Vec<Box<dyn SceneCollector>>,

    pub(crate) collected: CollectedData,
    pub(crate) frame: u64,
    last_collect_frame: Option<u64>,
    released_textures: Vec<TextureHandle>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    #[must_use]
    pub fn new() -> Self {
        let mut materials = SlotMap::with_key();
        let default_material = materials.insert(MaterialEntry {
            material: Box::new(StandardMaterial::default()),
            prepared_frame: None,
        });

        Self {
            nodes: SlotMap::with_key(),
            root_nodes: Vec::new(),
            meshes: SlotMap::with_key(),
            materials,
            cameras: SlotMap::with_key(),
            camera_order: Vec::new(),
            lights: SlotMap::with_key(),
            reflection_probes: SlotMap::with_key(),
            default_material,
            uniforms: SceneUniforms::default(),
            listeners: Vec::new(),
            collectors: Vec::new(),
            collected: CollectedData::default(),
            frame: 0,
            last_collect_frame: None,
            released_textures: Vec::new(),
        }
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// Adds a node at the root.
    pub fn add_node(&mut self, node: Node) -> NodeKey {
        let key = self.nodes.insert(node);
        self.root_nodes.push(key);
        key
    }

    /// Adds a node under `parent`; falls back to the root if `parent` is gone.
    pub fn add_to_parent(&mut self, mut child: Node, parent: NodeKey) -> NodeKey {
        if !self.nodes.contains_key(parent) {
            log::error!("Parent node {parent:?} not found, adding at root");
            return self.add_node(child);
        }
        child.parent = Some(parent);
        let key = self.nodes.insert(child);
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.push(key);
        }
        key
    }

    /// Moves `child` under `parent`.
    pub fn attach(&mut self, child: NodeKey, parent: NodeKey) -> Result<()> {
        if !self.nodes.contains_key(parent) {
            return Err(RenderError::NodeNotFound);
        }
        let Some(old_parent) = self.nodes.get(child).map(|n| n.parent) else {
            return Err(RenderError::NodeNotFound);
        };
        if self.is_ancestor_or_self(child, parent) {
            log::warn!("Cannot attach node {child:?} below itself");
            return Err(RenderError::HierarchyCycle);
        }

        match old_parent {
            Some(p) => {
                if let Some(n) = self.nodes.get_mut(p) {
                    n.children.retain(|c| *c != child);
                }
            }
            None => self.root_nodes.retain(|c| *c != child),
        }

        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.push(child);
        }
        if let Some(c) = self.nodes.get_mut(child) {
            c.parent = Some(parent);
            c.transform.mark_dirty();
        }
        Ok(())
    }

    /// Whether `ancestor` is `node` or on its parent chain.
    fn is_ancestor_or_self(&self, ancestor: NodeKey, node: NodeKey) -> bool {
        let mut current = Some(node);
        while let Some(key) = current {
            if key == ancestor {
                return true;
            }
            current = self.nodes.get(key).and_then(|n| n.parent);
        }
        false
    }

    /// Removes a node, its subtree and everything attached to them.
    pub fn remove_node(&mut self, key: NodeKey) {
        let Some(node) = self.nodes.get(key) else {
            return;
        };
        let children: Vec<NodeKey> = node.children.to_vec();
        for child in children {
            self.remove_node(child);
        }

        let Some(node) = self.nodes.remove(key) else {
            return;
        };
        match node.parent {
            Some(p) => {
                if let Some(parent) = self.nodes.get_mut(p) {
                    parent.children.retain(|c| *c != key);
                }
            }
            None => self.root_nodes.retain(|c| *c != key),
        }

        if let Some(camera) = node.camera {
            self.remove_camera(camera);
        }
        if let Some(light) = node.light
            && let Some(light) = self.lights.remove(light)
        {
            self.released_textures.extend(light.shadow_map);
        }
    }

    #[must_use]
    pub fn node(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn node_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        self.nodes.get_mut(key)
    }

    #[must_use]
    pub fn root_nodes(&self) -> &[NodeKey] {
        &self.root_nodes
    }

    /// Recomputes world matrices of the whole tree.
    pub fn update_matrix_world(&mut self) {
        node::update_hierarchy(&mut self.nodes, &self.root_nodes);
    }

    // ========================================================================
    // Meshes & Materials
    // ========================================================================

    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshKey {
        self.meshes.insert(mesh)
    }

    #[must_use]
    pub fn mesh(&self, key: MeshKey) -> Option<&Mesh> {
        self.meshes.get(key)
    }

    pub fn add_material(&mut self, material: impl Material + 'static) -> MaterialKey {
        self.materials.insert(MaterialEntry {
            material: Box::new(material),
            prepared_frame: None,
        })
    }

    #[must_use]
    pub fn material(&self, key: MaterialKey) -> Option<&dyn Material> {
        self.materials.get(key).map(|e| e.material.as_ref())
    }

    pub fn material_mut(&mut self, key: MaterialKey) -> Option<&mut (dyn Material + 'static)> {
        self.materials.get_mut(key).map(|e| e.material.as_mut())
    }

    /// Downcasts a stored material.
    #[must_use]
    pub fn material_as<T: Material>(&self, key: MaterialKey) -> Option<&T> {
        self.material(key)?.as_any().downcast_ref::<T>()
    }

    /// Material given to instances that have none.
    #[inline]
    #[must_use]
    pub fn default_material(&self) -> MaterialKey {
        self.default_material
    }

    // ========================================================================
    // Cameras
    // ========================================================================

    /// Adds a free camera (not attached to a node).
    pub fn add_camera(&mut self, camera: Camera) -> CameraKey {
        let key = self.cameras.insert(camera);
        self.camera_order.push(key);
        key
    }

    /// Adds a camera driven by `node`'s transform.
    pub fn add_camera_to_node(&mut self, node: NodeKey, mut camera: Camera) -> Result<CameraKey> {
        let Some(n) = self.nodes.get(node) else {
            return Err(RenderError::NodeNotFound);
        };
        if let Some(previous) = n.camera {
            self.remove_camera(previous);
        }

        camera.attach_to_node(node);
        let key = self.add_camera(camera);
        if let Some(n) = self.nodes.get_mut(node) {
            n.camera = Some(key);
        }
        Ok(key)
    }

    /// Removes a camera and queues its offscreen frame for release.
    pub fn remove_camera(&mut self, key: CameraKey) -> Option<Camera> {
        let mut camera = self.cameras.remove(key)?;
        self.camera_order.retain(|c| *c != key);
        if let Some(node) = camera.node()
            && let Some(n) = self.nodes.get_mut(node)
        {
            n.camera = None;
        }
        camera.detach_from_node();
        self.released_textures.extend(camera.drain_textures());
        Some(camera)
    }

    #[must_use]
    pub fn camera(&self, key: CameraKey) -> Option<&Camera> {
        self.cameras.get(key)
    }

    pub fn camera_mut(&mut self, key: CameraKey) -> Option<&mut Camera> {
        self.cameras.get_mut(key)
    }

    /// Cameras in registration order.
    pub fn cameras(&self) -> impl Iterator<Item = (CameraKey, &Camera)> {
        self.camera_order
            .iter()
            .filter_map(|k| self.cameras.get(*k).map(|c| (*k, c)))
    }

    /// Points a camera from `eye` to `center` (world space). For a
    /// node-bound camera the node transform is edited instead.
    pub fn camera_look_at(&mut self, key: CameraKey, eye: Vec3, center: Vec3, up: Vec3) -> Result<()> {
        let Some(camera) = self.cameras.get_mut(key) else {
            return Err(RenderError::CameraNotFound);
        };
        let Some(node_key) = camera.node() else {
            camera.look_at(eye, center, up);
            return Ok(());
        };

        let parent_world = self.parent_world(node_key);
        let inv = parent_world.inverse();
        let Some(node) = self.nodes.get_mut(node_key) else {
            return Err(RenderError::NodeNotFound);
        };
        node.transform.position = inv.transform_point3(eye);
        node.transform
            .look_at(inv.transform_point3(center), inv.transform_vector3(up));

        self.sync_node_camera(node_key, key);
        if let Some(camera) = self.cameras.get_mut(key) {
            camera.set_focal_length(eye.distance(center));
        }
        Ok(())
    }

    /// Orbits a camera around `center` (defaults to the camera center).
    /// For a node-bound camera the node transform is rotated instead.
    pub fn camera_orbit(
        &mut self,
        key: CameraKey,
        angle_deg: f32,
        axis: Option<Vec3>,
        center: Option<Vec3>,
    ) -> Result<()> {
        let Some(camera) = self.cameras.get_mut(key) else {
            return Err(RenderError::CameraNotFound);
        };
        let Some(node_key) = camera.node() else {
            return camera.orbit(angle_deg, axis, center);
        };
        if angle_deg == 0.0 {
            return Ok(());
        }
        let Some(axis) = axis else {
            log::error!("Scene::camera_orbit: axis missing");
            return Err(RenderError::MissingRotationAxis);
        };

        let center = center.unwrap_or_else(|| camera.get_center());
        let inv = self.parent_world(node_key).inverse();
        let local_axis = inv.transform_vector3(axis).normalize_or_zero();
        let Some(node) = self.nodes.get_mut(node_key) else {
            return Err(RenderError::NodeNotFound);
        };
        node.transform.orbit(
            Quat::from_axis_angle(local_axis, angle_deg.to_radians()),
            inv.transform_point3(center),
        );

        self.sync_node_camera(node_key, key);
        Ok(())
    }

    fn parent_world(&self, node: NodeKey) -> Affine3A {
        self.nodes
            .get(node)
            .and_then(|n| n.parent)
            .and_then(|p| self.nodes.get(p))
            .map_or(Affine3A::IDENTITY, |p| p.transform.world_matrix)
    }

    /// Refreshes world matrices and pushes the node matrix into the camera.
    fn sync_node_camera(&mut self, node: NodeKey, camera: CameraKey) {
        self.update_matrix_world();
        let world = self
            .nodes
            .get(node)
            .map_or(Mat4::IDENTITY, |n| n.transform.world_matrix_as_mat4());
        if let Some(camera) = self.cameras.get_mut(camera) {
            camera.set_node_matrix(world);
        }
    }

    // ========================================================================
    // Lights & Probes
    // ========================================================================

    /// Adds a light positioned by its own `position`/`direction`.
    pub fn add_light(&mut self, light: Light) -> LightKey {
        self.lights.insert(light)
    }

    /// Adds a light positioned by `node`.
    pub fn add_light_to_node(&mut self, node: NodeKey, mut light: Light) -> Result<LightKey> {
        if !self.nodes.contains_key(node) {
            return Err(RenderError::NodeNotFound);
        }
        light.node = Some(node);
        let key = self.lights.insert(light);
        if let Some(n) = self.nodes.get_mut(node) {
            n.light = Some(key);
        }
        Ok(key)
    }

    #[must_use]
    pub fn light(&self, key: LightKey) -> Option<&Light> {
        self.lights.get(key)
    }

    pub fn light_mut(&mut self, key: LightKey) -> Option<&mut Light> {
        self.lights.get_mut(key)
    }

    pub fn add_reflection_probe(&mut self, probe: ReflectionProbe) -> ProbeKey {
        self.reflection_probes.insert(probe)
    }

    #[must_use]
    pub fn reflection_probe(&self, key: ProbeKey) -> Option<&ReflectionProbe> {
        self.reflection_probes.get(key)
    }

    pub fn reflection_probe_mut(&mut self, key: ProbeKey) -> Option<&mut ReflectionProbe> {
        self.reflection_probes.get_mut(key)
    }

    /// Closest probe within range of `position`.
    #[must_use]
    pub fn find_nearest_reflection_probe(&self, position: Vec3) -> Option<ProbeKey> {
        probe::nearest_probe(&self.reflection_probes, position)
    }

    // ========================================================================
    // Extension Points
    // ========================================================================

    /// Registers a listener; delivered before renderer-level listeners.
    pub fn add_listener(&mut self, listener: Rc<RefCell<dyn RenderListener>>) {
        self.listeners.push(listener);
    }

    pub fn remove_listener(&mut self, listener: &Rc<RefCell<dyn RenderListener>>) {
        self.listeners.retain(|l| !Rc::ptr_eq(l, listener));
    }

    pub fn add_collector(&mut self, collector: impl SceneCollector + 'static) {
        self.collectors.push(Box::new(collector));
    }

    // ========================================================================
    // Collection
    // ========================================================================

    /// Gathers instances, lights, colliders and cameras for this frame.
    ///
    /// With `cameras == None` every enabled camera is taken, cameras that
    /// render to a texture first.
    pub fn collect_data(&mut self, cameras: Option<&[CameraKey]>) {
        self.begin_collect(cameras);
        self.finish_collect();
    }

    /// Node walk, lights, cameras and scene collectors.
    pub(crate) fn begin_collect(&mut self, cameras: Option<&[CameraKey]>) {
        let Self {
            nodes,
            root_nodes,
            meshes,
            cameras: camera_map,
            camera_order,
            lights,
            uniforms,
            collectors,
            collected,
            ..
        } = self;

        collected.instances.clear();
        collected.lights.clear();
        collected.colliders.clear();

        node::update_hierarchy(nodes, root_nodes);

        for key in node::tree_order(nodes, root_nodes) {
            let Some(node) = nodes.get(key) else {
                continue;
            };
            let world = node.transform.world_matrix_as_mat4();

            if let Some(camera) = node.camera.and_then(|c| camera_map.get_mut(c)) {
                camera.set_node_matrix(world);
            }
            // Lights on hidden nodes keep tracking the node but do not shine.
            if let Some(light_key) = node.light
                && let Some(light) = lights.get_mut(light_key)
                && light.enabled
            {
                light.update_world(Some(&node.transform.world_matrix));
                if node.visible {
                    collected.lights.push(light_key);
                }
            }
            if !node.visible {
                continue;
            }

            let ctx = CollectContext {
                node: key,
                world_matrix: world,
                layers: node.layers,
                selectable: node.selectable,
                meshes,
            };

            if let Some(renderer) = &node.mesh {
                match meshes.get(renderer.mesh) {
                    Some(mesh) => {
                        let mut instance = ctx.instance(renderer.mesh, renderer.material);
                        instance.priority = renderer.priority;
                        instance.use_bounding = renderer.use_bounding;
                        instance.primitive = renderer.primitive.unwrap_or(mesh.primitive);
                        instance.pre_render.clone_from(&renderer.pre_render);
                        instance.post_render.clone_from(&renderer.post_render);
                        collected.instances.push(instance);
                    }
                    None => log::warn!("Node '{}' references a missing mesh", node.name),
                }
            }
            for component in &node.components {
                component.collect_render_instances(&ctx, &mut collected.instances);
            }

            if let Some(collider) = &node.collider {
                let mut collider = collider.clone();
                collider.node = Some(key);
                collider.matrix = world;
                collider.layers = node.layers;
                collected.colliders.push(collider);
            }
            for component in &node.components {
                component.collect_colliders(&ctx, &mut collected.colliders);
            }
        }

        for (key, light) in lights.iter_mut() {
            if light.node.is_none() && light.enabled {
                light.update_world(None);
                collected.lights.push(key);
            }
        }

        collected.cameras = match cameras {
            Some(list) => list.to_vec(),
            None => {
                let mut list: Vec<CameraKey> = Vec::with_capacity(camera_order.len());
                for key in camera_order.iter() {
                    let Some(camera) = camera_map.get(*key) else {
                        continue;
                    };
                    if !camera.enabled {
                        continue;
                    }
                    if camera.is_rendered_to_texture() {
                        list.insert(0, *key);
                    } else {
                        list.push(*key);
                    }
                }
                list
            }
        };

        let ctx = SceneCollectContext {
            meshes,
            lights,
            uniforms,
        };
        for collector in collectors.iter_mut() {
            collector.collect(&ctx, collected);
        }
    }

    /// World bounds of instances and colliders.
    pub(crate) fn finish_collect(&mut self) {
        let Self {
            meshes, collected, ..
        } = self;

        for instance in &mut collected.instances {
            if !instance.use_bounding {
                continue;
            }
            if let Some(mesh) = instance.mesh.and_then(|k| meshes.get(k)) {
                instance.update_bounds(&mesh.bounding);
            }
        }
        for collider in &mut collected.colliders {
            collider.update_bounds(meshes);
        }

        self.last_collect_frame = Some(self.frame);
    }

    /// Instances of the last collection.
    #[must_use]
    pub fn instances(&self) -> &[RenderInstance] {
        &self.collected.instances
    }

    pub fn instances_mut(&mut self) -> &mut Vec<RenderInstance> {
        &mut self.collected.instances
    }

    #[must_use]
    pub fn collected(&self) -> &CollectedData {
        &self.collected
    }

    pub fn collected_mut(&mut self) -> &mut CollectedData {
        &mut self.collected
    }

    /// Frame of the last collection, `None` before the first.
    #[must_use]
    pub fn last_collect_frame(&self) -> Option<u64> {
        self.last_collect_frame
    }

    /// Frames rendered so far.
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Textures that were owned by removed cameras, lights or disabled
    /// offscreen frames.
    pub(crate) fn take_released_textures(&mut self) -> Vec<TextureHandle> {
        let mut textures = std::mem::take(&mut self.released_textures);
        for camera in self.cameras.values_mut() {
            textures.extend(camera.take_released_frames());
        }
        textures
    }
}
