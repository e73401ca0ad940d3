//! Renders a small scene for a few frames and prints the frame stats.
//!
//! Runs on the headless backend by default; pass `--gpu` to render through
//! wgpu on the first available adapter.

use glam::{Vec3, Vec4};

use one_render::backend::{GpuBackend, HeadlessBackend, WgpuBackend};
use one_render::renderer::{RenderSettings, Renderer, RendererSettings};
use one_render::resources::{Mesh, StandardMaterial};
use one_render::scene::{Camera, Light, MeshRenderer, Node, ReflectionProbe, Scene, Transform};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn gpu_backend() -> anyhow::Result<Box<dyn GpuBackend>> {
    let instance = wgpu::Instance::default();
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))?;
    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("one-render demo"),
        required_features: adapter.features() & wgpu::Features::TIMESTAMP_QUERY,
        ..Default::default()
    }))?;
    Ok(Box::new(WgpuBackend::new(device, queue, WIDTH, HEIGHT)))
}

fn build_scene() -> Scene {
    let mut scene = Scene::new();

    let mut camera = Camera::new_perspective(45.0, 1.0, 0.1, 100.0);
    camera.look_at(Vec3::new(0.0, 3.0, 10.0), Vec3::ZERO, Vec3::Y);
    scene.add_camera(camera);

    let cube = scene.add_mesh(Mesh::cube(2.0));
    let red = scene.add_material(StandardMaterial::new(Vec4::new(0.8, 0.3, 0.3, 1.0)));
    let glass = scene.add_material(StandardMaterial::transparent(Vec4::new(0.3, 0.5, 0.9, 1.0), 0.4));

    for (i, material) in [red, glass, red].into_iter().enumerate() {
        let x = (i as f32 - 1.0) * 3.0;
        scene.add_node(
            Node::new("cube")
                .with_transform(Transform::from_position(Vec3::new(x, 0.0, 0.0)))
                .with_mesh(MeshRenderer::new(cube, Some(material))),
        );
    }

    let mut sun = Light::new_directional(Vec3::new(0.0, -1.0, -1.0).normalize());
    sun.cast_shadows = true;
    scene.add_light(sun);
    scene.add_reflection_probe(ReflectionProbe::new(Vec3::new(0.0, 1.0, 0.0)));
    scene
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let backend = if std::env::args().any(|a| a == "--gpu") {
        gpu_backend()?
    } else {
        Box::new(HeadlessBackend::new(WIDTH, HEIGHT).with_timer_queries(0.5))
    };

    let mut renderer = Renderer::new(
        backend,
        RendererSettings {
            log_frame_stats: true,
            ..RendererSettings::default()
        },
    );
    let mut scene = build_scene();
    let settings = RenderSettings::default();

    for _ in 0..3 {
        let next = renderer.next_frame();
        renderer.render(&mut scene, &settings, None)?;
        pollster::block_on(next)?;
    }

    for line in renderer.profiler_lines() {
        println!("{line}");
    }
    Ok(())
}
