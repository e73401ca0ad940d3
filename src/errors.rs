//! Error Types
//!
//! This module defines the error type shared by the renderer, the scene and
//! the GPU backends.
//!
//! # Overview
//!
//! [`RenderError`] separates three kinds of failure:
//! - API misuse (re-entrant `render`, orbit without an axis, wrong texture
//!   kind for a render target)
//! - Unavailable resources (no camera to render with, unknown handles)
//! - Backend and configuration failures
//!
//! Data-quality problems (NaN matrices, meshless instances) are not errors;
//! they are logged with `log::warn!` and the frame continues.
//!
//! # Usage
//!
//! ```rust,ignore
//! use one_render::errors::{RenderError, Result};
//!
//! fn frame(renderer: &mut Renderer, scene: &mut Scene) -> Result<()> {
//!     renderer.render(scene, &RenderSettings::default(), None)?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

use crate::backend::TextureKind;

/// The main error type for the renderer.
#[derive(Error, Debug)]
pub enum RenderError {
    // ========================================================================
    // Frame Errors
    // ========================================================================
    /// No camera was supplied and the scene did not contribute any.
    #[error("Renderer::render: no cameras found in scene")]
    NoCameras,

    /// `render` was called while another frame was still in flight.
    #[error("Renderer::render: cannot render a frame while another frame is being rendered")]
    Reentrant,

    // ========================================================================
    // API Misuse
    // ========================================================================
    /// The camera handle does not belong to the scene.
    #[error("Camera not found in scene")]
    CameraNotFound,

    /// The node handle does not belong to the scene.
    #[error("Node not found in scene")]
    NodeNotFound,

    /// The new parent is the node itself or one of its descendants.
    #[error("Scene::attach: a node cannot be attached below itself")]
    HierarchyCycle,

    /// `orbit` needs an explicit rotation axis.
    #[error("Camera::orbit: rotation axis missing")]
    MissingRotationAxis,

    /// The texture kind does not match the requested render path.
    #[error("Invalid texture kind: expected {expected:?}, found {found:?}")]
    InvalidTexture {
        expected: TextureKind,
        found: TextureKind,
    },

    /// The texture handle is unknown to the backend.
    #[error("Texture not found in backend")]
    TextureNotFound,

    // ========================================================================
    // Backend & Configuration
    // ========================================================================
    /// A GPU backend operation failed.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Settings could not be parsed.
    #[error("Invalid settings: {0}")]
    Settings(#[from] serde_json::Error),
}

/// Alias for `Result<T, RenderError>`.
pub type Result<T> = std::result::Result<T, RenderError>;
