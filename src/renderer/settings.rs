//! Renderer configuration
//!
//! Two layers, both plain serde structs with `#[serde(default)]` so partial
//! JSON documents work:
//!
//! | Struct | Lifetime | Examples |
//! |--------|----------|----------|
//! | [`RenderSettings`] | passed to every `render()` call | culling, layers, clears |
//! | [`RendererSettings`] | fixed at renderer construction | collect frequency, GPU timers |
//!
//! ```rust,ignore
//! let settings = RenderSettings::from_json(r#"{ "frustum_culling": false }"#)?;
//! renderer.render(&mut scene, &settings, None)?;
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Per-frame options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Skip instances whose bounds are outside the camera frustum.
    pub frustum_culling: bool,
    /// Render every camera into the full viewport.
    pub ignore_viewports: bool,
    /// Never clear color/depth before a camera renders.
    pub ignore_clear: bool,
    /// Keep the viewport that was set before `render()` as the full viewport.
    pub keep_viewport: bool,
    pub render_helpers: bool,
    pub render_gui: bool,
    pub render_fx: bool,
    /// Global layer mask, ANDed with each camera's layers.
    pub layers: u32,
    /// Draw every instance with line topology.
    pub force_wireframe: bool,
    /// Re-capture realtime and dirty reflection probes.
    pub render_reflections: bool,
    /// Do not assign reflection probes to instances.
    pub ignore_reflection_probes: bool,
    pub shadows_enabled: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            frustum_culling: true,
            ignore_viewports: false,
            ignore_clear: false,
            keep_viewport: false,
            render_helpers: false,
            render_gui: true,
            render_fx: true,
            layers: 0xFFFF,
            force_wireframe: false,
            render_reflections: true,
            ignore_reflection_probes: false,
            shadows_enabled: true,
        }
    }
}

impl RenderSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Construction-time options of a [`Renderer`](super::Renderer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    /// Collect scene data every N frames (1 = every frame).
    pub collect_frequency: u32,
    /// Measure GPU time per stage when the backend supports it.
    pub timer_queries: bool,
    /// Extra factor applied to every camera's final aspect.
    pub global_aspect: f32,
    /// Emit a debug line with the frame stats after every frame.
    pub log_frame_stats: bool,
    pub default_cubemap_size: u32,
    pub shadow_map_size: u32,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            collect_frequency: 1,
            timer_queries: true,
            global_aspect: 1.0,
            log_frame_stats: false,
            default_cubemap_size: 256,
            shadow_map_size: 1024,
        }
    }
}

impl RendererSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
