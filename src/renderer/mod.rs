//! Frame Renderer
//!
//! [`Renderer::render`] runs one frame as a fixed sequence of stages:
//!
//! | Stage | Listener events |
//! |-------|-----------------|
//! | frame setup, release of dropped textures | |
//! | visible data: uniforms, collection, cameras, materials, lights | `before_render`, `fill_scene_uniforms`, `collect_data`, `after_collect_data`, `prepare_materials` |
//! | shadow maps | `ready_to_render`, `render_shadows` |
//! | reflection probes | `after_visibility`, `render_reflections` |
//! | cameras, in collection order | `before_render_main_pass`, `enable_frame_context`, `before_render_frame`, ..., `after_render_frame` |
//! | post, gui, end | `show_frame_context`, `render_gui`, `after_render` |
//!
//! Each camera goes through [`Renderer::render_frame`]: enable (viewport and
//! matrices), clear, then [`Renderer::render_instances`], which culls,
//! buckets the visible instances into [`RenderQueue`]s, sorts them and hands
//! each instance to its material.
//!
//! A second `render()` while one is in flight (from a listener) is rejected
//! with [`RenderError::Reentrant`].

pub mod context;
pub mod cubemap;
pub mod hooks;
pub mod instance;
pub mod pass;
pub mod profiler;
pub mod queue;
pub mod settings;
pub mod stats;

use std::cell::RefCell;
use std::rc::Rc;

use futures::channel::oneshot;
use glam::{Vec3, Vec4};

use crate::backend::{
    ClearFlags, ClearRequest, GpuBackend, PipelineState, Primitive, RenderTarget, ResetState,
    StateScope, TextureDesc, TextureFormat, TextureHandle, TextureKind, Viewport,
};
use crate::errors::{RenderError, Result};
use crate::resources::MaterialFlags;
use crate::scene::frustum::ClipResult;
use crate::scene::light::LightKind;
use crate::scene::{Camera, CameraKey, LightKey, ProbeKey, Scene, probe};
use crate::utils::time::Instant;
use crate::utils::{Coroutines, FrameClock};

pub use context::{CameraState, DrawContext, RenderContext};
pub use cubemap::{CUBEMAP_FACES, CubemapFace, CubemapOptions};
pub use hooks::{HookContext, RenderListener};
pub use instance::{PostRenderHook, PreRenderHook, RenderInstance};
pub use pass::RenderPass;
pub use profiler::{GPU_QUERIES, GpuProfiler};
pub use queue::{RenderQueue, RenderQueues, SortMode};
pub use settings::{RenderSettings, RendererSettings};
pub use stats::RenderStats;

use hooks::{Delivery, Hook};

/// Event name resolved at the end of every successful frame.
const RENDER_EVENT: &str = "render";

pub struct Renderer {
    backend: Box<dyn GpuBackend>,
    settings: RendererSettings,
    queues: RenderQueues,
    context: RenderContext,
    rendering: bool,
    pub(crate) listeners: Vec<Rc<RefCell<dyn RenderListener>>>,
    cubemap_camera: Camera,
    stats: RenderStats,
    profiler: GpuProfiler,
    coroutines: Coroutines,
    shader_blocks: Vec<String>,
    clock: FrameClock,
    frame: u64,
}

impl ResetState for Renderer {
    fn reset_state(&mut self) {
        self.backend.apply_state(&PipelineState::default());
    }
}

impl Renderer {
    #[must_use]
    pub fn new(backend: Box<dyn GpuBackend>, settings: RendererSettings) -> Self {
        let profiler = GpuProfiler::new(settings.timer_queries);
        Self {
            backend,
            settings,
            queues: RenderQueues::new(),
            context: RenderContext::default(),
            rendering: false,
            listeners: Vec::new(),
            cubemap_camera: Camera::default(),
            stats: RenderStats::default(),
            profiler,
            coroutines: Coroutines::new(),
            shader_blocks: Vec::new(),
            clock: FrameClock::new(),
            frame: 0,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn backend(&self) -> &dyn GpuBackend {
        self.backend.as_ref()
    }

    #[inline]
    pub fn backend_mut(&mut self) -> &mut dyn GpuBackend {
        self.backend.as_mut()
    }

    /// Concrete backend, when it is a `T`.
    #[must_use]
    pub fn backend_as<T: GpuBackend>(&self) -> Option<&T> {
        self.backend.as_ref().downcast_ref::<T>()
    }

    pub fn backend_as_mut<T: GpuBackend>(&mut self) -> Option<&mut T> {
        self.backend.as_mut().downcast_mut::<T>()
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    #[inline]
    #[must_use]
    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    #[inline]
    #[must_use]
    pub fn queues(&self) -> &RenderQueues {
        &self.queues
    }

    #[inline]
    pub fn queues_mut(&mut self) -> &mut RenderQueues {
        &mut self.queues
    }

    /// Counters of the last frame.
    #[inline]
    #[must_use]
    pub fn stats(&self) -> &RenderStats {
        &self.stats
    }

    #[must_use]
    pub fn profiler_lines(&self) -> Vec<String> {
        self.stats.lines()
    }

    /// True while a frame is in flight.
    #[inline]
    #[must_use]
    pub fn is_rendering(&self) -> bool {
        self.rendering
    }

    /// Frames rendered so far.
    #[inline]
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Cube map options sized by [`RendererSettings::default_cubemap_size`].
    #[must_use]
    pub fn cubemap_options(&self) -> CubemapOptions {
        CubemapOptions {
            size: self.settings.default_cubemap_size,
            ..CubemapOptions::default()
        }
    }

    /// Sets the pass used by subsequent `render_instances` calls.
    pub fn set_pass(&mut self, pass: RenderPass) {
        self.context.pass = pass;
    }

    // ========================================================================
    // Listeners, Shader Blocks, Coroutines
    // ========================================================================

    /// Registers a listener; delivered after scene listeners for most events.
    pub fn add_listener(&mut self, listener: Rc<RefCell<dyn RenderListener>>) {
        self.listeners.push(listener);
    }

    pub fn remove_listener(&mut self, listener: &Rc<RefCell<dyn RenderListener>>) {
        self.listeners.retain(|l| !Rc::ptr_eq(l, listener));
    }

    /// Enables a shader block for every material during this frame.
    pub fn enable_frame_shader_block(&mut self, block: &str) {
        if !self.shader_blocks.iter().any(|b| b == block) {
            self.shader_blocks.push(block.to_string());
        }
    }

    pub fn disable_frame_shader_block(&mut self, block: &str) {
        self.shader_blocks.retain(|b| b != block);
    }

    #[must_use]
    pub fn frame_shader_blocks(&self) -> &[String] {
        &self.shader_blocks
    }

    /// Resolved once, at the end of the next successful [`Renderer::render`].
    pub fn next_frame(&mut self) -> oneshot::Receiver<()> {
        self.coroutines.wait(RENDER_EVENT)
    }

    fn fire(
        &mut self,
        scene: &mut Scene,
        settings: &RenderSettings,
        camera: Option<CameraKey>,
        delivery: Delivery,
        hook: Hook,
    ) {
        hooks::dispatch(self, scene, settings, camera, delivery, hook);
    }

    // ========================================================================
    // Frame
    // ========================================================================

    /// Renders one frame of `scene` through `cameras` (all enabled scene
    /// cameras when `None`).
    pub fn render(
        &mut self,
        scene: &mut Scene,
        settings: &RenderSettings,
        cameras: Option<&[CameraKey]>,
    ) -> Result<()> {
        if self.rendering {
            log::error!("Renderer::render called while a frame is being rendered");
            return Err(RenderError::Reentrant);
        }

        self.rendering = true;
        let result = self.run_frame(scene, settings, cameras);
        self.rendering = false;

        if result.is_ok() {
            self.coroutines.fire(RENDER_EVENT);
        }
        result
    }

    fn run_frame(
        &mut self,
        scene: &mut Scene,
        settings: &RenderSettings,
        cameras: Option<&[CameraKey]>,
    ) -> Result<()> {
        let started = Instant::now();

        self.profiler.resolve(self.backend.as_mut());
        for (slot, (_, time)) in self.profiler.results().enumerate() {
            self.stats.gpu_times[slot] = time;
        }

        self.frame += 1;
        scene.frame = self.frame;
        self.clock.begin_frame();
        self.stats.begin_frame(self.frame);
        self.shader_blocks.clear();
        self.context.pass = RenderPass::Color;
        self.context.camera = None;
        self.context.target = self.backend.current_target();

        if settings.keep_viewport {
            self.context.full_viewport = self.backend.viewport();
        } else {
            let (width, height) = self.backend.drawing_buffer_size();
            self.context.full_viewport = Viewport::from_size(width, height);
            self.backend.set_viewport(self.context.full_viewport);
        }

        for texture in scene.take_released_textures() {
            self.backend.release_texture(texture);
        }
        self.reset_state();

        self.profiler.begin(self.backend.as_mut(), "before_render");
        self.fire(scene, settings, None, Delivery::SceneFirst, |l, c| l.before_render(c));
        let prepared = self.process_visible_data(scene, settings, cameras);
        self.profiler.end(self.backend.as_mut(), "before_render");
        if let Err(err) = prepared {
            self.profiler.end_frame();
            self.backend.end_frame();
            return Err(err);
        }

        self.fire(scene, settings, None, Delivery::SceneFirst, |l, c| l.ready_to_render(c));

        self.profiler.begin(self.backend.as_mut(), "shadows");
        if settings.shadows_enabled {
            self.render_shadow_maps(scene, settings);
            self.fire(scene, settings, None, Delivery::SceneFirst, |l, c| l.render_shadows(c));
        }
        self.profiler.end(self.backend.as_mut(), "shadows");

        self.fire(scene, settings, None, Delivery::SceneFirst, |l, c| l.after_visibility(c));

        self.profiler.begin(self.backend.as_mut(), "reflections");
        if settings.render_reflections {
            self.update_reflection_probes(scene, settings);
            self.fire(scene, settings, None, Delivery::SceneFirst, |l, c| l.render_reflections(c));
        }
        self.profiler.end(self.backend.as_mut(), "reflections");

        self.fire(scene, settings, None, Delivery::SceneFirst, |l, c| l.before_render_main_pass(c));
        if settings.render_fx {
            self.fire(scene, settings, None, Delivery::SceneFirst, |l, c| l.enable_frame_context(c));
        }

        self.profiler.begin(self.backend.as_mut(), "main");
        self.render_frame_cameras(scene, settings);
        self.profiler.end(self.backend.as_mut(), "main");

        self.backend.set_viewport(self.context.full_viewport);

        self.profiler.begin(self.backend.as_mut(), "postpo");
        if settings.render_fx {
            self.fire(scene, settings, None, Delivery::SceneFirst, |l, c| l.show_frame_context(c));
        }
        self.profiler.end(self.backend.as_mut(), "postpo");

        self.profiler.begin(self.backend.as_mut(), "gui");
        if settings.render_gui {
            self.fire(scene, settings, None, Delivery::SceneFirst, |l, c| l.render_gui(c));
        }
        self.profiler.end(self.backend.as_mut(), "gui");

        self.fire(scene, settings, None, Delivery::SceneFirst, |l, c| l.after_render(c));

        self.profiler.end_frame();
        self.backend.end_frame();
        self.context.camera = None;

        self.stats.frame_cpu_time = started.elapsed().as_secs_f64() * 1000.0;
        if self.settings.log_frame_stats {
            log::debug!("{}", self.stats.lines().join(", "));
        }
        Ok(())
    }

    /// Fills uniforms, collects the scene, resolves cameras and prepares
    /// materials and lights for this frame.
    pub fn process_visible_data(
        &mut self,
        scene: &mut Scene,
        settings: &RenderSettings,
        cameras: Option<&[CameraKey]>,
    ) -> Result<()> {
        scene.uniforms.time = self.clock.elapsed_seconds();
        scene.uniforms.delta_time = self.clock.delta_seconds();
        self.fire(scene, settings, None, Delivery::SceneOnly, |l, c| l.fill_scene_uniforms(c));

        let frequency = u64::from(self.settings.collect_frequency.max(1));
        if self.frame % frequency == 0 || scene.last_collect_frame().is_none() {
            scene.begin_collect(cameras);
            self.fire(scene, settings, None, Delivery::SceneFirst, |l, c| l.collect_data(c));
            scene.finish_collect();
        }
        self.fire(scene, settings, None, Delivery::SceneFirst, |l, c| l.after_collect_data(c));

        let camera_keys = match cameras {
            Some(list) => list.to_vec(),
            None => scene.collected.cameras.clone(),
        };
        if camera_keys.is_empty() {
            log::error!("No cameras to render the scene with");
            return Err(RenderError::NoCameras);
        }
        for camera in scene.cameras.values_mut() {
            camera.rendering_index = -1;
        }
        for (index, key) in camera_keys.iter().enumerate() {
            let Some(camera) = scene.cameras.get_mut(*key) else {
                log::warn!("Camera {key:?} not found in scene");
                continue;
            };
            camera.rendering_index = index as i32;
            camera.prepare();
        }
        self.context.cameras = camera_keys;

        let frame = self.frame;
        let default_material = scene.default_material();
        let Scene {
            collected,
            materials,
            reflection_probes,
            uniforms,
            ..
        } = &mut *scene;

        let mut to_prepare = Vec::new();
        for (index, instance) in collected.instances.iter_mut().enumerate() {
            instance.index = index;
            instance.distance = 0.0;
            instance.is_visible = false;
            instance.camera_visibility = 0;

            if instance.mesh.is_none() {
                log::warn!("Render instance {index} has no mesh");
                continue;
            }

            let material = match instance.material {
                Some(key) if materials.contains_key(key) => key,
                _ => {
                    instance.material = Some(default_material);
                    default_material
                }
            };
            if let Some(entry) = materials.get_mut(material)
                && entry.prepared_frame != Some(frame)
            {
                entry.prepared_frame = Some(frame);
                to_prepare.push(material);
            }

            instance.nearest_reflection_probe = if settings.ignore_reflection_probes {
                None
            } else {
                probe::nearest_probe(reflection_probes, instance.center)
            };

            if settings.force_wireframe {
                instance.primitive = Primitive::Lines;
            }
        }

        for key in to_prepare {
            if let Some(entry) = materials.get_mut(key) {
                entry.material.prepare(uniforms);
            }
        }
        self.fire(scene, settings, None, Delivery::SceneOnly, |l, c| l.prepare_materials(c));

        let Scene {
            collected, lights, ..
        } = &mut *scene;
        for key in &collected.lights {
            if let Some(light) = lights.get_mut(*key) {
                light.prepare();
            }
        }
        Ok(())
    }

    fn render_frame_cameras(&mut self, scene: &mut Scene, settings: &RenderSettings) {
        let cameras = self.context.cameras.clone();
        for key in cameras {
            if !scene.cameras.contains_key(key) {
                continue;
            }

            self.fire(scene, settings, Some(key), Delivery::SceneFirst, |l, c| {
                l.before_render_frame(c);
            });

            let frame_texture = self.camera_frame_texture(scene, key);
            let screen_target = self.backend.current_target();
            if let Some(texture) = frame_texture {
                let target = RenderTarget::texture(texture);
                self.backend.bind_target(Some(target));
                self.context.target = Some(target);
            }

            if let Err(err) = self.render_frame(scene, key, settings) {
                log::warn!("Camera {key:?} not rendered: {err}");
            }

            if let Some(texture) = frame_texture {
                self.backend.bind_target(screen_target);
                self.context.target = screen_target;
                if let Some(camera) = scene.cameras.get(key)
                    && camera.show_frame
                {
                    self.backend
                        .blit_to_screen(texture, camera.last_viewport_in_pixels());
                }
            }

            self.fire(scene, settings, Some(key), Delivery::RendererFirst, |l, c| {
                l.after_render_frame(c);
            });
        }
    }

    /// Offscreen frame of a camera that renders to a texture, allocated or
    /// resized to the drawing buffer.
    fn camera_frame_texture(&mut self, scene: &mut Scene, key: CameraKey) -> Option<TextureHandle> {
        let camera = scene.cameras.get_mut(key)?;
        if !camera.is_rendered_to_texture() {
            return None;
        }

        let (width, height) = self.backend.drawing_buffer_size();
        if let Some(texture) = camera.frame_texture() {
            let fits = self
                .backend
                .texture_desc(texture)
                .is_some_and(|d| d.width == width && d.height == height);
            if fits {
                return Some(texture);
            }
            self.backend.release_texture(texture);
        }

        let texture = self
            .backend
            .create_texture(&TextureDesc::color_2d(width, height));
        camera.set_frame_texture(texture);
        Some(texture)
    }

    /// Renders the scene through one camera. Returns the number of
    /// dispatched instances.
    pub fn render_frame(
        &mut self,
        scene: &mut Scene,
        camera: CameraKey,
        settings: &RenderSettings,
    ) -> Result<usize> {
        let Some(cam) = scene.cameras.get_mut(camera) else {
            return Err(RenderError::CameraNotFound);
        };
        self.enable_camera(cam, Some(camera), settings, false);
        self.clear_buffer(settings);

        let key = Some(camera);
        self.fire(scene, settings, key, Delivery::SceneFirst, |l, c| l.before_render_scene(c));
        self.fire(scene, settings, key, Delivery::SceneFirst, |l, c| l.compute_visibility(c));

        let rendered = self.render_instances(scene, settings, None);

        self.fire(scene, settings, key, Delivery::SceneFirst, |l, c| l.after_render_scene(c));
        if settings.render_helpers {
            self.fire(scene, settings, key, Delivery::SceneFirst, |l, c| l.render_helpers(c));
        }
        Ok(rendered)
    }

    // ========================================================================
    // Camera & Clears
    // ========================================================================

    /// Makes `camera` current: viewport (unless `skip_viewport`), final
    /// aspect, matrices and layer filter.
    pub fn enable_camera(
        &mut self,
        camera: &mut Camera,
        key: Option<CameraKey>,
        settings: &RenderSettings,
        skip_viewport: bool,
    ) {
        let viewport = if skip_viewport {
            self.backend.viewport()
        } else {
            let mut full = self.context.full_viewport;
            if full.is_empty() {
                log::warn!("Full viewport is empty, falling back to the drawing buffer");
                let (width, height) = self.backend.drawing_buffer_size();
                full = Viewport::from_size(width, height);
                self.context.full_viewport = full;
            }
            let local = if settings.ignore_viewports {
                full
            } else {
                camera.local_viewport(Some(full))
            };
            self.backend.set_viewport(local);
            camera.set_last_viewports(local, full);
            local
        };

        camera.set_final_aspect(self.settings.global_aspect * camera.aspect() * viewport.aspect());
        let state = CameraState::capture(camera, key, viewport);
        if state.view_projection.is_nan() {
            log::warn!("View projection matrix of camera {key:?} contains NaN");
        }

        self.context.layers_filter = camera.layers & settings.layers;
        self.context.camera = Some(state);
    }

    /// Clears the enabled camera's viewport according to its clear flags.
    pub fn clear_buffer(&mut self, settings: &RenderSettings) {
        if settings.ignore_clear {
            return;
        }
        let Some(camera) = &self.context.camera else {
            return;
        };
        if !camera.clear_color && !camera.clear_depth {
            return;
        }

        let mut flags = ClearFlags::STENCIL;
        if camera.clear_color {
            flags |= ClearFlags::COLOR;
        }
        if camera.clear_depth {
            flags |= ClearFlags::DEPTH;
        }
        self.backend
            .clear(&ClearRequest::new(camera.viewport, flags, camera.background));
    }

    // ========================================================================
    // Instances
    // ========================================================================

    /// Culls, queues and draws instances with the enabled camera.
    ///
    /// `instances` replaces the collected list for this call. Returns how
    /// many instances were handed to a material.
    pub fn render_instances(
        &mut self,
        scene: &mut Scene,
        settings: &RenderSettings,
        instances: Option<&mut Vec<RenderInstance>>,
    ) -> usize {
        match instances {
            Some(list) => {
                std::mem::swap(&mut scene.collected.instances, list);
                let rendered = self.render_current_instances(scene, settings);
                std::mem::swap(&mut scene.collected.instances, list);
                rendered
            }
            None => self.render_current_instances(scene, settings),
        }
    }

    fn render_current_instances(&mut self, scene: &mut Scene, settings: &RenderSettings) -> usize {
        let Some(camera) = self.context.camera.clone() else {
            log::warn!("render_instances called without an enabled camera");
            return 0;
        };
        let start = self.stats.rendered_instances;
        self.stats.rendered_passes += 1;
        let pass = self.context.pass;
        self.context.layers_filter = camera.layers & settings.layers;
        let key = camera.key;

        self.reset_state();
        self.fire(scene, settings, key, Delivery::SceneOnly, |l, c| l.before_render_instances(c));
        self.fire(scene, settings, key, Delivery::SceneFirst, |l, c| l.render_instances(c));

        self.compute_visible_instances(scene, settings, &camera, pass);
        self.update_render_queues(scene, &camera);
        self.dispatch_queues(scene, settings, &camera, pass);

        self.fire(scene, settings, key, Delivery::SceneFirst, |l, c| l.render_screen_space(c));
        self.fire(scene, settings, key, Delivery::SceneFirst, |l, c| l.after_render_instances(c));
        self.reset_state();

        (self.stats.rendered_instances - start) as usize
    }

    fn compute_visible_instances(
        &self,
        scene: &mut Scene,
        settings: &RenderSettings,
        camera: &CameraState,
        pass: RenderPass,
    ) {
        let layers_filter = self.context.layers_filter;
        let camera_flag = camera.visibility_flag();
        let Scene {
            collected,
            materials,
            ..
        } = scene;

        for instance in &mut collected.instances {
            instance.is_visible = false;

            let own = instance.material.and_then(|k| materials.get(k));
            if pass == RenderPass::Shadow
                && !own.is_some_and(|e| e.material.flags().contains(MaterialFlags::CAST_SHADOWS))
            {
                continue;
            }
            if pass == RenderPass::Picking && !instance.selectable {
                continue;
            }
            if layers_filter & instance.layers == 0 {
                continue;
            }
            if let Some(hook) = instance.pre_render.clone()
                && !hook(instance, pass)
            {
                continue;
            }
            if instance.material.is_none() {
                continue;
            }

            let effective = camera.overwrite_material.or(instance.material);
            let Some(entry) = effective.and_then(|k| materials.get(k)) else {
                continue;
            };
            let material = entry.material.as_ref();
            if material.opacity() <= 0.0 {
                continue;
            }

            if settings.frustum_culling
                && instance.use_bounding
                && !material.flags().contains(MaterialFlags::IGNORE_FRUSTUM)
                && camera.frustum.test_box(&instance.aabb) == ClipResult::Outside
            {
                continue;
            }

            instance.is_visible = true;
            instance.camera_visibility |= camera_flag;
        }
    }

    fn update_render_queues(&mut self, scene: &mut Scene, camera: &CameraState) {
        let Scene {
            collected,
            materials,
            ..
        } = scene;

        for instance in &mut collected.instances {
            instance.distance = instance.center.distance(camera.eye);
        }

        self.queues.clear();
        for (index, instance) in collected.instances.iter().enumerate() {
            if !instance.is_visible {
                continue;
            }
            let Some(entry) = instance.material.and_then(|k| materials.get(k)) else {
                continue;
            };
            let slot = self.queues.index_for_material(entry.material.as_ref());
            if let Some(queue) = self.queues.queue_at_mut(slot) {
                queue.add(index);
            }
        }
        self.queues.sort(&collected.instances);
    }

    fn dispatch_queues(
        &mut self,
        scene: &mut Scene,
        settings: &RenderSettings,
        camera: &CameraState,
        pass: RenderPass,
    ) {
        let Scene {
            collected,
            materials,
            uniforms,
            ..
        } = scene;
        let Self {
            backend,
            queues,
            stats,
            shader_blocks,
            ..
        } = self;

        // State set by materials is reset when the scope ends.
        let mut backend = StateScope::new(backend.as_mut());

        for queue in queues.iter_mut() {
            if queue.is_empty() || !queue.enabled {
                continue;
            }
            if !queue.start(pass, settings, &mut *backend) {
                continue;
            }

            for &index in &queue.instances {
                let Some(instance) = collected.instances.get(index) else {
                    continue;
                };
                if !instance.is_visible || instance.mesh.is_none() {
                    continue;
                }
                stats.rendered_instances += 1;

                let material_key = camera.overwrite_material.or(instance.material);
                let Some(entry) = material_key.and_then(|k| materials.get(k)) else {
                    continue;
                };

                let mut ctx = DrawContext::new(&mut *backend, camera, uniforms, shader_blocks, pass);
                if pass == RenderPass::Picking {
                    entry
                        .material
                        .render_picking_instance(&mut ctx, instance, settings, pass);
                } else {
                    entry.material.render_instance(&mut ctx, instance, settings, pass);
                }
                stats.render_calls += ctx.draw_calls() as u32;

                if let Some(hook) = &instance.post_render {
                    hook(instance, pass);
                }
            }

            queue.finish(pass, settings);
        }
    }

    /// Lights affecting `instance`, from the last collection.
    #[must_use]
    pub fn near_lights(&self, scene: &Scene, instance: &RenderInstance) -> Vec<LightKey> {
        scene
            .collected
            .lights
            .iter()
            .copied()
            .filter(|key| {
                scene
                    .lights
                    .get(*key)
                    .is_some_and(|l| l.illuminates(instance.layers))
            })
            .collect()
    }

    // ========================================================================
    // Offscreen Rendering
    // ========================================================================

    /// Binds `target` (viewport set to its size) for the duration of `f`,
    /// then restores the previous target and viewport.
    pub fn draw_to<R>(&mut self, target: RenderTarget, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous_target = self.backend.current_target();
        let previous_viewport = self.backend.viewport();
        let (width, height) = self
            .backend
            .texture_desc(target.texture)
            .map_or((1, 1), |d| (d.width, d.height));

        self.backend.bind_target(Some(target));
        self.context.target = Some(target);
        self.backend.set_viewport(Viewport::from_size(width, height));

        let result = f(self);

        self.backend.bind_target(previous_target);
        self.context.target = previous_target;
        self.backend.set_viewport(previous_viewport);
        result
    }

    /// Renders the scene from `position` into the six faces of a cube
    /// texture, allocating one of `options.size` when `texture` is `None`.
    ///
    /// Returns the texture and the number of instances dispatched per face.
    pub fn render_to_cubemap(
        &mut self,
        scene: &mut Scene,
        position: Vec3,
        texture: Option<TextureHandle>,
        settings: &RenderSettings,
        options: &CubemapOptions,
        mut instances: Option<&mut Vec<RenderInstance>>,
    ) -> Result<(TextureHandle, [usize; 6])> {
        let (texture, size) = match texture {
            Some(texture) => {
                let Some(desc) = self.backend.texture_desc(texture) else {
                    log::error!("render_to_cubemap: texture {texture:?} not found");
                    return Err(RenderError::TextureNotFound);
                };
                if desc.kind != TextureKind::Cube {
                    log::error!("render_to_cubemap: texture {texture:?} is not a cube map");
                    return Err(RenderError::InvalidTexture {
                        expected: TextureKind::Cube,
                        found: desc.kind,
                    });
                }
                (texture, desc.width)
            }
            None => {
                let texture = self
                    .backend
                    .create_texture(&TextureDesc::cube(options.size, TextureFormat::Rgba8));
                (texture, options.size)
            }
        };

        let mut camera = std::mem::take(&mut self.cubemap_camera);
        camera.set_perspective(90.0, 1.0, options.near, options.far);
        camera.layers = u32::MAX;

        let previous_target = self.backend.current_target();
        let previous_viewport = self.backend.viewport();
        let previous_camera = self.context.camera.take();
        let previous_filter = self.context.layers_filter;

        let viewport = Viewport::from_size(size, size);
        let clear_color = options.background.unwrap_or(Vec4::ZERO);
        let mut counts = [0; 6];

        for (count, face) in counts.iter_mut().zip(CUBEMAP_FACES.iter()) {
            let target = RenderTarget::cube_face(texture, face.face);
            self.backend.bind_target(Some(target));
            self.context.target = Some(target);
            self.backend.set_viewport(viewport);

            camera.look_at(position, position + face.dir, face.up);
            self.backend.clear(&ClearRequest::new(
                viewport,
                ClearFlags::COLOR | ClearFlags::DEPTH,
                clear_color,
            ));

            self.enable_camera(&mut camera, None, settings, true);
            *count = self.render_instances(scene, settings, instances.as_deref_mut());
        }

        self.backend.bind_target(previous_target);
        self.context.target = previous_target;
        self.backend.set_viewport(previous_viewport);
        self.context.camera = previous_camera;
        self.context.layers_filter = previous_filter;
        self.cubemap_camera = camera;

        Ok((texture, counts))
    }

    /// Renders through `camera` into `texture`: a 2D texture gets a scoped
    /// clear + draw, a cube texture a capture from the camera eye.
    pub fn render_instances_to_rt(
        &mut self,
        scene: &mut Scene,
        camera: CameraKey,
        texture: TextureHandle,
        settings: &RenderSettings,
        instances: Option<&mut Vec<RenderInstance>>,
    ) -> Result<usize> {
        let Some(desc) = self.backend.texture_desc(texture) else {
            return Err(RenderError::TextureNotFound);
        };
        let Some(cam) = scene.cameras.get(camera) else {
            return Err(RenderError::CameraNotFound);
        };

        match desc.kind {
            TextureKind::Cube => {
                let options = CubemapOptions {
                    size: desc.width,
                    near: cam.near(),
                    far: cam.far(),
                    background: Some(cam.background_color),
                };
                let eye = cam.get_eye();
                let (_, counts) =
                    self.render_to_cubemap(scene, eye, Some(texture), settings, &options, instances)?;
                Ok(counts.iter().sum())
            }
            TextureKind::Texture2D => {
                let previous_camera = self.context.camera.clone();
                let rendered = self.draw_to(RenderTarget::texture(texture), |renderer| {
                    let Some(cam) = scene.cameras.get_mut(camera) else {
                        return 0;
                    };
                    renderer.enable_camera(cam, Some(camera), settings, true);
                    renderer.clear_buffer(settings);
                    renderer.render_instances(scene, settings, instances)
                });
                self.context.camera = previous_camera;
                Ok(rendered)
            }
        }
    }

    // ========================================================================
    // Built-in Shadow & Reflection Steps
    // ========================================================================

    fn render_shadow_maps(&mut self, scene: &mut Scene, settings: &RenderSettings) {
        let size = self.settings.shadow_map_size;
        let lights = scene.collected.lights.clone();
        let previous_pass = self.context.pass;
        self.context.pass = RenderPass::Shadow;

        for key in lights {
            let Some(light) = scene.lights.get_mut(key) else {
                continue;
            };
            if !light.enabled || !light.cast_shadows {
                continue;
            }

            if light.kind == LightKind::Point {
                let texture = match light.shadow_map {
                    Some(texture) => texture,
                    None => {
                        let texture = self
                            .backend
                            .create_texture(&TextureDesc::cube(size, TextureFormat::Rgba16Float));
                        light.shadow_map = Some(texture);
                        texture
                    }
                };
                let options = CubemapOptions {
                    size,
                    near: light.shadow.near,
                    far: light.range.max(light.shadow.near + 1.0),
                    background: Some(Vec4::ONE),
                };
                let position = light.world_position();
                if let Err(err) =
                    self.render_to_cubemap(scene, position, Some(texture), settings, &options, None)
                {
                    log::warn!("Point light shadow map not rendered: {err}");
                }
                continue;
            }

            let texture = match light.shadow_map {
                Some(texture) => texture,
                None => {
                    let texture = self.backend.create_texture(&TextureDesc::depth_2d(size));
                    light.shadow_map = Some(texture);
                    texture
                }
            };
            let mut camera = light.shadow_camera();

            let previous_camera = self.context.camera.take();
            self.draw_to(RenderTarget::texture(texture), |renderer| {
                renderer.backend.clear(&ClearRequest::new(
                    Viewport::from_size(size, size),
                    ClearFlags::DEPTH,
                    Vec4::ZERO,
                ));
                renderer.enable_camera(&mut camera, None, settings, true);
                renderer.render_instances(scene, settings, None);
            });
            self.context.camera = previous_camera;
        }

        self.context.pass = previous_pass;
    }

    fn update_reflection_probes(&mut self, scene: &mut Scene, settings: &RenderSettings) {
        let probes: Vec<ProbeKey> = scene
            .reflection_probes
            .iter()
            .filter(|(_, p)| p.needs_update())
            .map(|(k, _)| k)
            .collect();

        for key in probes {
            let Some(probe) = scene.reflection_probes.get(key) else {
                continue;
            };
            let options = CubemapOptions {
                size: probe.size,
                near: probe.near,
                far: probe.far,
                background: probe.background,
            };
            let (position, texture) = (probe.position, probe.texture);

            match self.render_to_cubemap(scene, position, texture, settings, &options, None) {
                Ok((texture, _)) => {
                    if let Some(probe) = scene.reflection_probes.get_mut(key) {
                        probe.texture = Some(texture);
                        probe.dirty = false;
                    }
                }
                Err(err) => log::warn!("Reflection probe {key:?} not updated: {err}"),
            }
        }
    }
}
