//! Renderer Tests
//!
//! Tests for:
//! - Per-pass visibility (layers, opacity, frustum, shadow casters, picking)
//! - Instance hooks and default material assignment
//! - Listener delivery order, state reset and re-entrancy
//! - Cameras rendering to textures, cube map captures, shadow maps, probes
//! - Frame coroutines and GPU stage timing

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use glam::{Vec3, Vec4};

use one_render::backend::{
    BackendCommand, ClearFlags, DrawCall, HeadlessBackend, PipelineState, Primitive, RenderTarget,
    TextureDesc, TextureKind, Viewport,
};
use one_render::errors::RenderError;
use one_render::renderer::{
    DrawContext, HookContext, RenderContext, RenderInstance, RenderListener, RenderPass,
    RenderQueue, RenderSettings, Renderer, RendererSettings,
};
use one_render::resources::{
    Material, MaterialFlags, MaterialKey, MaterialQueue, Mesh, MeshKey, RenderState,
    StandardMaterial,
};
use one_render::scene::{
    Camera, CameraKey, Light, MeshRenderer, Node, NodeKey, ReflectionProbe, Scene, Transform,
};

// ============================================================================
// Helpers
// ============================================================================

/// Draws seen by a [`CountingMaterial`], per pass.
#[derive(Default)]
struct DrawLog {
    color: Cell<usize>,
    shadow: Cell<usize>,
    picking: Cell<usize>,
}

impl DrawLog {
    fn record(&self, pass: RenderPass) {
        let counter = match pass {
            RenderPass::Color => &self.color,
            RenderPass::Shadow => &self.shadow,
            RenderPass::Picking => &self.picking,
        };
        counter.set(counter.get() + 1);
    }
}

struct CountingMaterial {
    opacity: f32,
    state: RenderState,
    flags: MaterialFlags,
    log: Rc<DrawLog>,
}

impl CountingMaterial {
    fn new(log: &Rc<DrawLog>) -> Self {
        Self {
            opacity: 1.0,
            state: RenderState::default(),
            flags: MaterialFlags::default(),
            log: Rc::clone(log),
        }
    }
}

impl Material for CountingMaterial {
    fn opacity(&self) -> f32 {
        self.opacity
    }

    fn render_state(&self) -> RenderState {
        self.state
    }

    fn flags(&self) -> MaterialFlags {
        self.flags
    }

    fn render_instance(
        &self,
        ctx: &mut DrawContext<'_>,
        instance: &RenderInstance,
        _settings: &RenderSettings,
        pass: RenderPass,
    ) -> bool {
        self.log.record(pass);
        let Some(mesh) = instance.mesh else {
            return false;
        };
        ctx.apply_state(&self.state.to_pipeline_state());
        ctx.draw(&DrawCall {
            mesh,
            primitive: instance.primitive,
            model: instance.matrix,
            instance: instance.index(),
        });
        true
    }

    fn render_picking_instance(
        &self,
        _ctx: &mut DrawContext<'_>,
        _instance: &RenderInstance,
        _settings: &RenderSettings,
        pass: RenderPass,
    ) -> bool {
        self.log.record(pass);
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn renderer() -> Renderer {
    init_logging();
    Renderer::new(
        Box::new(HeadlessBackend::new(800, 600)),
        RendererSettings::default(),
    )
}

fn headless(renderer: &Renderer) -> &HeadlessBackend {
    renderer
        .backend_as::<HeadlessBackend>()
        .expect("renderer runs on the headless backend")
}

fn camera_at(z: f32) -> Camera {
    let mut camera = Camera::new_perspective(45.0, 1.0, 0.1, 1000.0);
    camera.look_at(Vec3::new(0.0, 0.0, z), Vec3::ZERO, Vec3::Y);
    camera
}

/// Scene with a camera at z = 5 looking at the origin and a unit sphere mesh.
fn scene_with_camera() -> (Scene, CameraKey, MeshKey) {
    let mut scene = Scene::new();
    let camera = scene.add_camera(camera_at(5.0));
    let sphere = scene.add_mesh(Mesh::sphere(1.0));
    (scene, camera, sphere)
}

fn add_instance(
    scene: &mut Scene,
    mesh: MeshKey,
    material: Option<MaterialKey>,
    position: Vec3,
) -> NodeKey {
    scene.add_node(
        Node::new("item")
            .with_transform(Transform::from_position(position))
            .with_mesh(MeshRenderer::new(mesh, material)),
    )
}

fn shadow_casting_sun() -> Light {
    let mut light = Light::new_directional(Vec3::NEG_Y);
    light.cast_shadows = true;
    light
}

fn render(renderer: &mut Renderer, scene: &mut Scene) {
    renderer
        .render(scene, &RenderSettings::default(), None)
        .expect("frame renders");
}

// ============================================================================
// Visibility
// ============================================================================

#[test]
fn visible_instance_is_drawn_once() {
    let (mut scene, _, sphere) = scene_with_camera();
    let log = Rc::new(DrawLog::default());
    let material = scene.add_material(CountingMaterial::new(&log));
    add_instance(&mut scene, sphere, Some(material), Vec3::ZERO);

    let mut renderer = renderer();
    render(&mut renderer, &mut scene);

    assert_eq!(renderer.stats().rendered_instances, 1);
    assert_eq!(renderer.stats().render_calls, 1);
    assert_eq!(log.color.get(), 1);
    assert_eq!(headless(&renderer).draw_calls().count(), 1);
    assert_eq!(
        renderer.queues().get(RenderQueue::GEOMETRY).expect("geometry").instances(),
        &[0]
    );

    let instance = &scene.instances()[0];
    assert!(instance.is_visible());
    assert_eq!(instance.camera_visibility(), 0b1);
    assert!((instance.distance() - 5.0).abs() < 1e-4, "distance {}", instance.distance());
}

#[test]
fn instance_behind_camera_is_culled() {
    let (mut scene, _, sphere) = scene_with_camera();
    let log = Rc::new(DrawLog::default());
    let material = scene.add_material(CountingMaterial::new(&log));
    add_instance(&mut scene, sphere, Some(material), Vec3::new(0.0, 0.0, 10.0));

    let mut renderer = renderer();
    render(&mut renderer, &mut scene);
    assert_eq!(renderer.stats().rendered_instances, 0, "Instance behind the camera must be culled");

    let settings = RenderSettings {
        frustum_culling: false,
        ..RenderSettings::default()
    };
    renderer
        .render(&mut scene, &settings, None)
        .expect("frame renders");
    assert_eq!(renderer.stats().rendered_instances, 1, "Culling disabled draws everything");
}

#[test]
fn ignore_frustum_flag_bypasses_culling() {
    let (mut scene, _, sphere) = scene_with_camera();
    let log = Rc::new(DrawLog::default());
    let mut sky = CountingMaterial::new(&log);
    sky.flags |= MaterialFlags::IGNORE_FRUSTUM;
    let material = scene.add_material(sky);
    add_instance(&mut scene, sphere, Some(material), Vec3::new(0.0, 0.0, 10.0));

    let mut renderer = renderer();
    render(&mut renderer, &mut scene);

    assert_eq!(log.color.get(), 1);
}

#[test]
fn camera_layers_must_intersect_instance_layers() {
    let mut scene = Scene::new();
    let mut camera = camera_at(5.0);
    camera.layers = 0b0010;
    scene.add_camera(camera);
    let sphere = scene.add_mesh(Mesh::sphere(1.0));
    let log = Rc::new(DrawLog::default());
    let material = scene.add_material(CountingMaterial::new(&log));
    let mut node = Node::new("item").with_mesh(MeshRenderer::new(sphere, Some(material)));
    node.layers = 0b0001;
    scene.add_node(node);

    let mut renderer = renderer();
    render(&mut renderer, &mut scene);

    assert_eq!(log.color.get(), 0);
    assert!(!scene.instances()[0].is_visible());
}

#[test]
fn global_layer_filter_applies_to_every_camera() {
    let (mut scene, _, sphere) = scene_with_camera();
    let log = Rc::new(DrawLog::default());
    let material = scene.add_material(CountingMaterial::new(&log));
    add_instance(&mut scene, sphere, Some(material), Vec3::ZERO);

    let settings = RenderSettings {
        layers: 0b0100,
        ..RenderSettings::default()
    };
    let mut renderer = renderer();
    renderer
        .render(&mut scene, &settings, None)
        .expect("frame renders");

    assert_eq!(log.color.get(), 0);
    assert_eq!(renderer.context().layers_filter, 0);
}

#[test]
fn zero_opacity_material_is_never_drawn() {
    let (mut scene, _, sphere) = scene_with_camera();
    scene.add_light(shadow_casting_sun());

    let hidden_log = Rc::new(DrawLog::default());
    let mut hidden = CountingMaterial::new(&hidden_log);
    hidden.opacity = 0.0;
    let hidden = scene.add_material(hidden);

    let visible_log = Rc::new(DrawLog::default());
    let visible = scene.add_material(CountingMaterial::new(&visible_log));

    add_instance(&mut scene, sphere, Some(hidden), Vec3::ZERO);
    add_instance(&mut scene, sphere, Some(visible), Vec3::new(1.0, 0.0, 0.0));

    let mut renderer = renderer();
    render(&mut renderer, &mut scene);

    assert_eq!(hidden_log.color.get(), 0);
    assert_eq!(hidden_log.shadow.get(), 0);
    assert_eq!(visible_log.color.get(), 1);
    assert_eq!(visible_log.shadow.get(), 1);
    assert_eq!(renderer.stats().rendered_instances, 2);
}

#[test]
fn shadow_pass_only_draws_casters() {
    let (mut scene, _, sphere) = scene_with_camera();
    let light = scene.add_light(shadow_casting_sun());

    let log = Rc::new(DrawLog::default());
    let mut receiver = CountingMaterial::new(&log);
    receiver.flags = MaterialFlags::RECEIVE_SHADOWS;
    let material = scene.add_material(receiver);
    add_instance(&mut scene, sphere, Some(material), Vec3::ZERO);

    let mut renderer = renderer();
    render(&mut renderer, &mut scene);

    assert_eq!(log.shadow.get(), 0, "Non-casters are skipped in the shadow pass");
    assert_eq!(log.color.get(), 1);

    let shadow_map = scene
        .light(light)
        .and_then(Light::shadow_map)
        .expect("shadow map allocated");
    let desc = renderer
        .backend()
        .texture_desc(shadow_map)
        .expect("shadow map alive");
    assert_eq!(desc, TextureDesc::depth_2d(1024));
}

#[test]
fn point_light_shadows_use_a_cube_map() {
    let (mut scene, _, sphere) = scene_with_camera();
    let mut lamp = Light::new_point(Vec3::new(0.0, 3.0, 0.0), 10.0);
    lamp.cast_shadows = true;
    let lamp = scene.add_light(lamp);

    let log = Rc::new(DrawLog::default());
    let material = scene.add_material(CountingMaterial::new(&log));
    add_instance(&mut scene, sphere, Some(material), Vec3::ZERO);

    let mut renderer = renderer();
    render(&mut renderer, &mut scene);

    let shadow_map = scene
        .light(lamp)
        .and_then(Light::shadow_map)
        .expect("shadow map allocated");
    let desc = renderer
        .backend()
        .texture_desc(shadow_map)
        .expect("shadow map alive");
    assert_eq!(desc.kind, TextureKind::Cube);
    assert_eq!(log.shadow.get(), 1, "Only the -Y face sees the sphere below the lamp");
}

#[test]
fn picking_pass_skips_unselectable_instances() {
    let (mut scene, camera, sphere) = scene_with_camera();
    let log = Rc::new(DrawLog::default());
    let material = scene.add_material(CountingMaterial::new(&log));
    add_instance(&mut scene, sphere, Some(material), Vec3::ZERO);
    let mut locked = Node::new("locked")
        .with_transform(Transform::from_position(Vec3::new(1.0, 0.0, 0.0)))
        .with_mesh(MeshRenderer::new(sphere, Some(material)));
    locked.selectable = false;
    scene.add_node(locked);

    let settings = RenderSettings::default();
    let mut renderer = renderer();
    renderer
        .render(&mut scene, &settings, None)
        .expect("frame renders");
    assert_eq!(log.color.get(), 2);

    renderer.set_pass(RenderPass::Picking);
    let rendered = renderer
        .render_frame(&mut scene, camera, &settings)
        .expect("camera exists");

    assert_eq!(rendered, 1);
    assert_eq!(log.picking.get(), 1);
    assert_eq!(log.color.get(), 2, "Picking uses the picking entry point");
}

#[test]
fn two_cameras_set_two_visibility_bits() {
    let (mut scene, _, sphere) = scene_with_camera();
    scene.add_camera(camera_at(8.0));
    let material = scene.add_material(StandardMaterial::new(Vec4::ONE));
    add_instance(&mut scene, sphere, Some(material), Vec3::ZERO);

    let mut renderer = renderer();
    render(&mut renderer, &mut scene);

    assert_eq!(scene.instances()[0].camera_visibility(), 0b11);
    assert_eq!(renderer.stats().rendered_instances, 2);
}

#[test]
fn cameras_left_out_of_a_frame_lose_their_bit() {
    let (mut scene, first, sphere) = scene_with_camera();
    let second = scene.add_camera(camera_at(8.0));
    let material = scene.add_material(StandardMaterial::new(Vec4::ONE));
    add_instance(&mut scene, sphere, Some(material), Vec3::ZERO);

    let settings = RenderSettings::default();
    let mut renderer = renderer();
    render(&mut renderer, &mut scene);
    assert_eq!(scene.camera(second).expect("camera").rendering_index(), 1);

    renderer
        .render(&mut scene, &settings, Some(&[first]))
        .expect("frame renders");
    assert_eq!(scene.camera(second).expect("camera").rendering_index(), -1);

    let target = renderer
        .backend_mut()
        .create_texture(&TextureDesc::color_2d(64, 64));
    renderer
        .render_instances_to_rt(&mut scene, second, target, &settings, None)
        .expect("texture exists");
    assert_eq!(
        scene.instances()[0].camera_visibility(),
        0b01,
        "Only the camera of the last frame owns a bit"
    );
}

// ============================================================================
// Instances & Materials
// ============================================================================

#[test]
fn pre_render_hook_can_skip_and_post_render_sees_draws() {
    let (mut scene, _, sphere) = scene_with_camera();
    let log = Rc::new(DrawLog::default());
    let material = scene.add_material(CountingMaterial::new(&log));

    let mut skipped = MeshRenderer::new(sphere, Some(material));
    skipped.pre_render = Some(Rc::new(|_: &mut RenderInstance, _: RenderPass| false));
    scene.add_node(Node::new("skipped").with_mesh(skipped));

    let drawn = Rc::new(Cell::new(0));
    let mut counted = MeshRenderer::new(sphere, Some(material));
    let counter = Rc::clone(&drawn);
    counted.post_render = Some(Rc::new(move |_: &RenderInstance, _: RenderPass| {
        counter.set(counter.get() + 1);
    }));
    scene.add_node(Node::new("counted").with_mesh(counted));

    let mut renderer = renderer();
    render(&mut renderer, &mut scene);

    assert_eq!(log.color.get(), 1);
    assert_eq!(drawn.get(), 1);
    assert!(!scene.instances()[0].is_visible());
}

#[test]
fn instances_without_material_get_the_default() {
    let (mut scene, _, sphere) = scene_with_camera();
    add_instance(&mut scene, sphere, None, Vec3::ZERO);

    let mut renderer = renderer();
    render(&mut renderer, &mut scene);

    assert_eq!(scene.instances()[0].material, Some(scene.default_material()));
    assert_eq!(renderer.stats().rendered_instances, 1);
}

#[test]
fn forced_wireframe_draws_lines() {
    let (mut scene, _, sphere) = scene_with_camera();
    let log = Rc::new(DrawLog::default());
    let material = scene.add_material(CountingMaterial::new(&log));
    add_instance(&mut scene, sphere, Some(material), Vec3::ZERO);

    let settings = RenderSettings {
        force_wireframe: true,
        ..RenderSettings::default()
    };
    let mut renderer = renderer();
    renderer
        .render(&mut scene, &settings, None)
        .expect("frame renders");

    let primitives: Vec<Primitive> = headless(&renderer).draw_calls().map(|c| c.primitive).collect();
    assert_eq!(primitives, vec![Primitive::Lines]);
}

#[test]
fn readback_queue_copies_the_color_buffer() {
    let (mut scene, _, sphere) = scene_with_camera();
    let mut refractive = StandardMaterial::new(Vec4::ONE);
    refractive.queue = MaterialQueue::Value(RenderQueue::READBACK_COLOR);
    let material = scene.add_material(refractive);
    add_instance(&mut scene, sphere, Some(material), Vec3::ZERO);

    let mut renderer = renderer();
    render(&mut renderer, &mut scene);

    let copy = renderer
        .queues()
        .get(RenderQueue::READBACK_COLOR)
        .and_then(RenderQueue::cloned_color_texture)
        .expect("readback texture allocated");
    assert!(
        headless(&renderer)
            .commands()
            .iter()
            .any(|c| matches!(c, BackendCommand::CopyColorBuffer { source: None, dst } if *dst == copy)),
        "Color buffer must be copied before the readback queue"
    );
}

// ============================================================================
// Cameras & Clears
// ============================================================================

#[test]
fn camera_viewport_limits_the_clear() {
    let mut scene = Scene::new();
    let mut camera = camera_at(5.0);
    camera.set_viewport(Vec4::new(0.0, 0.0, 0.5, 1.0));
    scene.add_camera(camera);

    let mut renderer = renderer();
    render(&mut renderer, &mut scene);

    let clears: Vec<_> = headless(&renderer).clears().copied().collect();
    assert_eq!(clears.len(), 1);
    assert_eq!(clears[0].rect, Viewport::new(0, 0, 400, 600));
    assert_eq!(
        clears[0].flags,
        ClearFlags::COLOR | ClearFlags::DEPTH | ClearFlags::STENCIL
    );
}

#[test]
fn clear_can_be_suppressed() {
    let mut scene = Scene::new();
    let mut camera = camera_at(5.0);
    camera.clear_color = false;
    camera.clear_depth = false;
    scene.add_camera(camera);

    let mut renderer = renderer();
    render(&mut renderer, &mut scene);
    assert_eq!(headless(&renderer).clears().count(), 0);

    let mut scene = Scene::new();
    scene.add_camera(camera_at(5.0));
    let settings = RenderSettings {
        ignore_clear: true,
        ..RenderSettings::default()
    };
    let mut renderer = self::renderer();
    renderer
        .render(&mut scene, &settings, None)
        .expect("frame renders");
    assert_eq!(headless(&renderer).clears().count(), 0);
}

#[test]
fn render_to_texture_camera_blits_its_frame() {
    let mut scene = Scene::new();
    let mut camera = camera_at(5.0);
    camera.set_render_to_texture(true);
    let camera = scene.add_camera(camera);

    let mut renderer = renderer();
    render(&mut renderer, &mut scene);

    let frame = scene
        .camera(camera)
        .and_then(Camera::frame_texture)
        .expect("frame texture allocated");
    let commands = headless(&renderer).commands();
    assert!(commands.contains(&BackendCommand::BindTarget(Some(RenderTarget::texture(frame)))));
    assert!(commands.iter().any(
        |c| matches!(c, BackendCommand::BlitToScreen { texture, .. } if *texture == frame)
    ));
    assert_eq!(renderer.backend().current_target(), None, "Screen target restored");
}

#[test]
fn removed_camera_releases_its_frame_texture() {
    let mut scene = Scene::new();
    scene.add_camera(camera_at(5.0));
    let mut offscreen = camera_at(5.0);
    offscreen.set_render_to_texture(true);
    let offscreen = scene.add_camera(offscreen);

    let mut renderer = renderer();
    render(&mut renderer, &mut scene);
    let textures = headless(&renderer).texture_count();
    assert!(textures >= 1);

    scene.remove_camera(offscreen).expect("camera exists");
    render(&mut renderer, &mut scene);
    assert_eq!(headless(&renderer).texture_count(), textures - 1);
}

#[test]
fn render_without_cameras_fails() {
    let mut scene = Scene::new();
    let mut renderer = renderer();
    let mut next = renderer.next_frame();

    let result = renderer.render(&mut scene, &RenderSettings::default(), None);

    assert!(matches!(result, Err(RenderError::NoCameras)));
    assert!(!renderer.is_rendering(), "A failed frame must not stay in flight");
    assert_eq!(next.try_recv().ok(), Some(None), "Failed frames do not resolve waiters");
}

#[test]
fn collection_follows_collect_frequency() {
    let (mut scene, _, sphere) = scene_with_camera();
    let mut renderer = Renderer::new(
        Box::new(HeadlessBackend::new(800, 600)),
        RendererSettings {
            collect_frequency: 2,
            ..RendererSettings::default()
        },
    );

    render(&mut renderer, &mut scene);
    render(&mut renderer, &mut scene);
    add_instance(&mut scene, sphere, None, Vec3::ZERO);

    render(&mut renderer, &mut scene);
    assert!(scene.instances().is_empty(), "Frame 3 reuses the previous collection");

    render(&mut renderer, &mut scene);
    assert_eq!(scene.instances().len(), 1);
}

// ============================================================================
// Offscreen Rendering
// ============================================================================

#[test]
fn cubemap_faces_see_only_their_direction() {
    let mut scene = Scene::new();
    let cube = scene.add_mesh(Mesh::cube(1.0));
    let material = scene.add_material(StandardMaterial::new(Vec4::ONE));
    add_instance(&mut scene, cube, Some(material), Vec3::new(5.0, 0.0, 0.0));
    scene.collect_data(None);

    let mut renderer = renderer();
    let options = renderer.cubemap_options();
    let (texture, counts) = renderer
        .render_to_cubemap(&mut scene, Vec3::ZERO, None, &RenderSettings::default(), &options, None)
        .expect("cube map rendered");

    assert_eq!(counts, [1, 0, 0, 0, 0, 0]);
    let desc = renderer.backend().texture_desc(texture).expect("cube texture");
    assert_eq!(desc.kind, TextureKind::Cube);
    assert_eq!(desc.width, 256);
    assert_eq!(renderer.backend().current_target(), None);
}

#[test]
fn cubemap_covers_all_six_directions() {
    let mut scene = Scene::new();
    let cube = scene.add_mesh(Mesh::cube(1.0));
    let material = scene.add_material(StandardMaterial::new(Vec4::ONE));
    for position in [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z] {
        add_instance(&mut scene, cube, Some(material), position * 5.0);
    }
    scene.collect_data(None);

    let mut renderer = renderer();
    let options = renderer.cubemap_options();
    let (_, counts) = renderer
        .render_to_cubemap(&mut scene, Vec3::ZERO, None, &RenderSettings::default(), &options, None)
        .expect("cube map rendered");

    assert_eq!(counts, [1; 6]);
}

#[test]
fn cubemap_rejects_2d_textures() {
    let mut scene = Scene::new();
    let mut renderer = renderer();
    let flat = renderer
        .backend_mut()
        .create_texture(&TextureDesc::color_2d(64, 64));
    let options = renderer.cubemap_options();

    let result = renderer.render_to_cubemap(
        &mut scene,
        Vec3::ZERO,
        Some(flat),
        &RenderSettings::default(),
        &options,
        None,
    );

    assert!(matches!(
        result,
        Err(RenderError::InvalidTexture {
            expected: TextureKind::Cube,
            found: TextureKind::Texture2D,
        })
    ));
}

#[test]
fn render_to_2d_target_restores_screen() {
    let (mut scene, camera, sphere) = scene_with_camera();
    let material = scene.add_material(StandardMaterial::new(Vec4::ONE));
    add_instance(&mut scene, sphere, Some(material), Vec3::ZERO);

    let settings = RenderSettings::default();
    let mut renderer = renderer();
    renderer
        .render(&mut scene, &settings, None)
        .expect("frame renders");

    let target = renderer
        .backend_mut()
        .create_texture(&TextureDesc::color_2d(128, 128));
    let rendered = renderer
        .render_instances_to_rt(&mut scene, camera, target, &settings, None)
        .expect("texture exists");

    assert_eq!(rendered, 1);
    assert_eq!(renderer.backend().current_target(), None);
    assert_eq!(renderer.backend().viewport(), Viewport::from_size(800, 600));
    let draw = headless(&renderer)
        .commands()
        .iter()
        .rev()
        .find_map(|c| match c {
            BackendCommand::Draw { target, .. } => Some(*target),
            _ => None,
        })
        .expect("draw recorded");
    assert_eq!(draw, Some(RenderTarget::texture(target)));
}

#[test]
fn render_to_released_texture_fails() {
    let (mut scene, camera, _) = scene_with_camera();
    let mut renderer = renderer();
    let texture = renderer
        .backend_mut()
        .create_texture(&TextureDesc::color_2d(16, 16));
    renderer.backend_mut().release_texture(texture);

    let result =
        renderer.render_instances_to_rt(&mut scene, camera, texture, &RenderSettings::default(), None);
    assert!(matches!(result, Err(RenderError::TextureNotFound)));
}

#[test]
fn dirty_reflection_probe_is_captured_once() {
    let (mut scene, _, sphere) = scene_with_camera();
    let material = scene.add_material(StandardMaterial::new(Vec4::ONE));
    add_instance(&mut scene, sphere, Some(material), Vec3::new(0.0, 0.0, -5.0));
    let probe = scene.add_reflection_probe(ReflectionProbe::new(Vec3::ZERO));

    let mut renderer = renderer();
    render(&mut renderer, &mut scene);

    let captured = scene.reflection_probe(probe).expect("probe");
    let texture = captured.texture().expect("probe captured");
    assert!(!captured.needs_update());
    assert_eq!(
        renderer.backend().texture_desc(texture).map(|d| d.kind),
        Some(TextureKind::Cube)
    );
    assert_eq!(scene.instances()[0].nearest_reflection_probe(), Some(probe));
    assert_eq!(
        renderer.stats().rendered_instances,
        2,
        "One draw in the -Z face of the capture, one from the camera"
    );

    render(&mut renderer, &mut scene);
    assert_eq!(renderer.stats().rendered_instances, 1, "Clean probes are not re-captured");
}

#[test]
fn near_lights_filter_by_layers() {
    let (mut scene, _, sphere) = scene_with_camera();
    let near = scene.add_light(Light::new_point(Vec3::ZERO, 5.0));
    let mut other_layer = Light::new_point(Vec3::ZERO, 5.0);
    other_layer.illuminated_layers = 0b0100;
    scene.add_light(other_layer);
    add_instance(&mut scene, sphere, None, Vec3::ZERO);

    let mut renderer = renderer();
    render(&mut renderer, &mut scene);

    let lights = renderer.near_lights(&scene, &scene.instances()[0]);
    assert_eq!(lights, vec![near]);
}

// ============================================================================
// Listeners
// ============================================================================

struct Recorder {
    tag: &'static str,
    events: Rc<RefCell<Vec<String>>>,
}

impl Recorder {
    fn push(&self, event: &str) {
        self.events.borrow_mut().push(format!("{}:{event}", self.tag));
    }
}

impl RenderListener for Recorder {
    fn before_render(&mut self, _ctx: &mut HookContext<'_>) {
        self.push("before_render");
    }

    fn prepare_materials(&mut self, _ctx: &mut HookContext<'_>) {
        self.push("prepare_materials");
    }

    fn after_render_frame(&mut self, _ctx: &mut HookContext<'_>) {
        self.push("after_render_frame");
    }
}

#[test]
fn listeners_are_called_in_delivery_order() {
    let (mut scene, _, _) = scene_with_camera();
    let events = Rc::new(RefCell::new(Vec::new()));
    scene.add_listener(Rc::new(RefCell::new(Recorder {
        tag: "scene",
        events: Rc::clone(&events),
    })));
    let mut renderer = renderer();
    renderer.add_listener(Rc::new(RefCell::new(Recorder {
        tag: "renderer",
        events: Rc::clone(&events),
    })));

    render(&mut renderer, &mut scene);

    assert_eq!(
        *events.borrow(),
        vec![
            "scene:before_render",
            "renderer:before_render",
            "scene:prepare_materials",
            "renderer:after_render_frame",
            "scene:after_render_frame",
        ]
    );
}

#[test]
fn removed_listener_is_not_called() {
    let (mut scene, _, _) = scene_with_camera();
    let events = Rc::new(RefCell::new(Vec::new()));
    let listener: Rc<RefCell<dyn RenderListener>> = Rc::new(RefCell::new(Recorder {
        tag: "renderer",
        events: Rc::clone(&events),
    }));
    let mut renderer = renderer();
    renderer.add_listener(Rc::clone(&listener));
    renderer.remove_listener(&listener);

    render(&mut renderer, &mut scene);
    assert!(events.borrow().is_empty());
}

/// Tries to start a second frame from inside the first.
#[derive(Default)]
struct Reenter {
    nested: Option<bool>,
    /// (camera before, camera after) of the rejected call made mid-camera.
    cameras: Option<(Option<CameraKey>, Option<CameraKey>)>,
    matrices_kept: bool,
    pass_kept: bool,
}

impl RenderListener for Reenter {
    fn before_render(&mut self, ctx: &mut HookContext<'_>) {
        let nested = ctx.renderer.render(&mut *ctx.scene, ctx.settings, None);
        self.nested = Some(matches!(nested, Err(RenderError::Reentrant)));
    }

    fn before_render_scene(&mut self, ctx: &mut HookContext<'_>) {
        let before = ctx.renderer.context().clone();
        let nested = ctx.renderer.render(&mut *ctx.scene, ctx.settings, None);
        assert!(matches!(nested, Err(RenderError::Reentrant)));
        let after = ctx.renderer.context();

        let key = |c: &RenderContext| c.camera.as_ref().and_then(|cam| cam.key);
        let view_projection = |c: &RenderContext| c.camera.as_ref().map(|cam| cam.view_projection);
        self.cameras = Some((key(&before), key(after)));
        self.matrices_kept = view_projection(&before) == view_projection(after);
        self.pass_kept = before.pass == after.pass;
    }
}

#[test]
fn nested_render_is_rejected() {
    let (mut scene, _, sphere) = scene_with_camera();
    add_instance(&mut scene, sphere, None, Vec3::ZERO);
    let listener = Rc::new(RefCell::new(Reenter::default()));
    scene.add_listener(listener.clone());

    let mut renderer = renderer();
    render(&mut renderer, &mut scene);

    assert_eq!(listener.borrow().nested, Some(true), "Nested render must fail as re-entrant");
    assert_eq!(renderer.stats().rendered_instances, 1, "Outer frame still completes");
    assert!(!renderer.is_rendering());
}

#[test]
fn nested_render_keeps_the_current_camera_and_pass() {
    let (mut scene, camera, sphere) = scene_with_camera();
    add_instance(&mut scene, sphere, None, Vec3::ZERO);
    let listener = Rc::new(RefCell::new(Reenter::default()));
    scene.add_listener(listener.clone());

    let mut renderer = renderer();
    render(&mut renderer, &mut scene);

    let listener = listener.borrow();
    assert_eq!(listener.cameras, Some((Some(camera), Some(camera))));
    assert!(listener.matrices_kept, "Camera matrices must survive the rejected call");
    assert!(listener.pass_kept, "Render pass must survive the rejected call");
    assert_eq!(renderer.stats().rendered_instances, 1);
}

/// Leaves blending enabled and records what the next event observes.
#[derive(Default)]
struct StateLeaker {
    observed: Option<PipelineState>,
}

impl RenderListener for StateLeaker {
    fn before_render_scene(&mut self, ctx: &mut HookContext<'_>) {
        ctx.renderer
            .backend_mut()
            .apply_state(&PipelineState::alpha_blended());
        ctx.renderer.enable_frame_shader_block("fog");
    }

    fn compute_visibility(&mut self, ctx: &mut HookContext<'_>) {
        self.observed = Some(ctx.renderer.backend().pipeline_state());
    }
}

#[test]
fn listener_state_is_reset_after_the_call() {
    let (mut scene, _, _) = scene_with_camera();
    let listener = Rc::new(RefCell::new(StateLeaker::default()));
    scene.add_listener(listener.clone());

    let mut renderer = renderer();
    render(&mut renderer, &mut scene);

    assert_eq!(listener.borrow().observed, Some(PipelineState::default()));
    assert_eq!(renderer.backend().pipeline_state(), PipelineState::default());
    assert_eq!(renderer.frame_shader_blocks(), ["fog".to_string()]);

    scene.remove_listener(&(listener as Rc<RefCell<dyn RenderListener>>));
    render(&mut renderer, &mut scene);
    assert!(renderer.frame_shader_blocks().is_empty(), "Shader blocks last one frame");
}

// ============================================================================
// Frame Coroutines & Profiling
// ============================================================================

#[test]
fn next_frame_resolves_after_render() {
    let (mut scene, _, _) = scene_with_camera();
    let mut renderer = renderer();
    let next = renderer.next_frame();

    render(&mut renderer, &mut scene);

    assert!(pollster::block_on(next).is_ok());
}

#[test]
fn gpu_times_are_unknown_without_timer_queries() {
    let (mut scene, _, _) = scene_with_camera();
    let mut renderer = renderer();
    render(&mut renderer, &mut scene);
    render(&mut renderer, &mut scene);

    assert_eq!(renderer.stats().gpu_time("main"), None);
    assert!(
        renderer
            .profiler_lines()
            .iter()
            .any(|line| line == "gpu.main: unknown")
    );
}

#[test]
fn gpu_times_arrive_one_frame_later() {
    let (mut scene, _, _) = scene_with_camera();
    let mut renderer = Renderer::new(
        Box::new(HeadlessBackend::new(800, 600).with_timer_queries(2.0)),
        RendererSettings::default(),
    );

    render(&mut renderer, &mut scene);
    assert_eq!(renderer.stats().gpu_time("main"), None, "First frame has no results yet");

    render(&mut renderer, &mut scene);
    assert_eq!(renderer.stats().gpu_time("main"), Some(2.0));
    assert_eq!(renderer.stats().gpu_time("gui"), Some(2.0));
    assert!(
        renderer
            .profiler_lines()
            .iter()
            .any(|line| line == "gpu.main: 2.00ms")
    );
}
