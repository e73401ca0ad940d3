//! Typed extension points
//!
//! Every stage of a frame that user code can hook into is a method of
//! [`RenderListener`] with an empty default body. Listeners are registered
//! on the [`Scene`] or on the [`Renderer`] and called synchronously, in
//! registration order.
//!
//! Each call receives a [`HookContext`]. Its `renderer` field is a
//! [`StateScope`]: whatever pipeline state the listener sets is reset to the
//! renderer default when the call returns.

use std::cell::RefCell;
use std::rc::Rc;

use crate::backend::StateScope;
use crate::renderer::{RenderSettings, Renderer};
use crate::scene::{CameraKey, Scene};

/// Access granted to a listener for the duration of one callback.
pub struct HookContext<'a> {
    pub renderer: StateScope<'a, Renderer>,
    pub scene: &'a mut Scene,
    pub settings: &'a RenderSettings,
    /// Camera the event refers to, if any.
    pub camera: Option<CameraKey>,
}

#[allow(unused_variables)]
pub trait RenderListener {
    // === Frame ===
    fn before_render(&mut self, ctx: &mut HookContext<'_>) {}
    fn ready_to_render(&mut self, ctx: &mut HookContext<'_>) {}
    fn render_shadows(&mut self, ctx: &mut HookContext<'_>) {}
    fn after_visibility(&mut self, ctx: &mut HookContext<'_>) {}
    fn render_reflections(&mut self, ctx: &mut HookContext<'_>) {}
    fn before_render_main_pass(&mut self, ctx: &mut HookContext<'_>) {}
    fn enable_frame_context(&mut self, ctx: &mut HookContext<'_>) {}
    fn show_frame_context(&mut self, ctx: &mut HookContext<'_>) {}
    fn render_gui(&mut self, ctx: &mut HookContext<'_>) {}
    fn after_render(&mut self, ctx: &mut HookContext<'_>) {}

    // === Data ===
    fn fill_scene_uniforms(&mut self, ctx: &mut HookContext<'_>) {}
    /// Scene-wide collection; instances pushed here get their bounds
    /// computed with the rest.
    fn collect_data(&mut self, ctx: &mut HookContext<'_>) {}
    fn after_collect_data(&mut self, ctx: &mut HookContext<'_>) {}
    fn prepare_materials(&mut self, ctx: &mut HookContext<'_>) {}

    // === Camera ===
    fn before_render_frame(&mut self, ctx: &mut HookContext<'_>) {}
    fn after_render_frame(&mut self, ctx: &mut HookContext<'_>) {}
    fn before_render_scene(&mut self, ctx: &mut HookContext<'_>) {}
    /// May edit `ctx.scene.instances_mut()` before queueing.
    fn compute_visibility(&mut self, ctx: &mut HookContext<'_>) {}
    fn after_render_scene(&mut self, ctx: &mut HookContext<'_>) {}
    fn render_helpers(&mut self, ctx: &mut HookContext<'_>) {}

    // === Instances ===
    fn before_render_instances(&mut self, ctx: &mut HookContext<'_>) {}
    fn render_instances(&mut self, ctx: &mut HookContext<'_>) {}
    fn render_screen_space(&mut self, ctx: &mut HookContext<'_>) {}
    fn after_render_instances(&mut self, ctx: &mut HookContext<'_>) {}
}

pub(crate) type Hook = fn(&mut dyn RenderListener, &mut HookContext<'_>);

/// Which listener lists receive an event, and in which order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    SceneFirst,
    RendererFirst,
    SceneOnly,
}

/// Calls `hook` on the listeners selected by `delivery`.
pub(crate) fn dispatch(
    renderer: &mut Renderer,
    scene: &mut Scene,
    settings: &RenderSettings,
    camera: Option<CameraKey>,
    delivery: Delivery,
    hook: Hook,
) {
    let scene_listeners = scene.listeners.clone();
    let listeners: Vec<Rc<RefCell<dyn RenderListener>>> = match delivery {
        Delivery::SceneFirst => scene_listeners
            .into_iter()
            .chain(renderer.listeners.iter().cloned())
            .collect(),
        Delivery::RendererFirst => renderer
            .listeners
            .iter()
            .cloned()
            .chain(scene_listeners)
            .collect(),
        Delivery::SceneOnly => scene_listeners,
    };

    for listener in listeners {
        let Ok(mut listener) = listener.try_borrow_mut() else {
            log::warn!("Listener is already running, skipping nested call");
            continue;
        };
        let mut ctx = HookContext {
            renderer: StateScope::new(&mut *renderer),
            scene: &mut *scene,
            settings,
            camera,
        };
        hook(&mut *listener, &mut ctx);
    }
}
