//! Camera
//!
//! A camera owns its local `eye`/`center`/`up` vectors and projection
//! parameters, and lazily derives view, projection and view-projection
//! matrices plus the frustum planes from them.
//!
//! # Lazy updates
//!
//! Every mutating setter bumps a generation counter. The derived matrices
//! remember the generation they were computed for; [`Camera::update_matrices`]
//! recomputes everything when the two differ. Fields that do not affect the
//! matrices (`layers`, clear flags, background) are plain public fields and
//! never invalidate anything.
//!
//! # Node binding
//!
//! A camera attached to a scene node resolves its vectors through the node's
//! world matrix, which the scene pushes in during collection. Its local eye
//! is kept at the origin; moving such a camera means moving the node (see
//! [`Scene::camera_look_at`](crate::scene::Scene::camera_look_at) and
//! [`Scene::camera_orbit`](crate::scene::Scene::camera_orbit)).

use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::backend::{TextureHandle, Viewport};
use crate::errors::{RenderError, Result};
use crate::resources::MaterialKey;
use crate::scene::NodeKey;
use crate::scene::frustum::{ClipResult, Frustum};

pub const DEFAULT_EYE: Vec3 = Vec3::ZERO;
pub const DEFAULT_CENTER: Vec3 = Vec3::new(0.0, 0.0, -100.0);
pub const DEFAULT_UP: Vec3 = Vec3::Y;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProjectionType {
    #[default]
    Perspective,
    /// Orthographic sized by `frustum_size` and the final aspect.
    Orthographic,
    /// Orthographic with an explicit rectangle.
    Ortho2D,
}

/// Explicit rectangle used by [`ProjectionType::Ortho2D`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrthoRect {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
}

impl Default for OrthoRect {
    fn default() -> Self {
        Self {
            left: -1.0,
            right: 1.0,
            bottom: -1.0,
            top: 1.0,
        }
    }
}

/// World-space ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

/// Serializable camera parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub projection: ProjectionType,
    pub eye: Vec3,
    pub center: Vec3,
    pub up: Vec3,
    pub near: f32,
    pub far: f32,
    pub fov: f32,
    pub aspect: f32,
    pub frustum_size: f32,
    pub ortho: OrthoRect,
    pub viewport: Vec4,
    pub layers: u32,
    pub background_color: Vec4,
    pub clear_color: bool,
    pub clear_depth: bool,
    pub render_to_texture: bool,
    pub show_frame: bool,
    pub enabled: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            projection: ProjectionType::Perspective,
            eye: DEFAULT_EYE,
            center: DEFAULT_CENTER,
            up: DEFAULT_UP,
            near: 0.1,
            far: 1000.0,
            fov: 45.0,
            aspect: 1.0,
            frustum_size: 50.0,
            ortho: OrthoRect::default(),
            viewport: Vec4::new(0.0, 0.0, 1.0, 1.0),
            layers: 3,
            background_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            clear_color: true,
            clear_depth: true,
            render_to_texture: false,
            show_frame: true,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Camera {
    projection: ProjectionType,
    eye: Vec3,
    center: Vec3,
    up: Vec3,
    near: f32,
    far: f32,
    /// Vertical field of view in degrees.
    fov: f32,
    aspect: f32,
    frustum_size: f32,
    ortho: OrthoRect,
    /// Normalized viewport rectangle (x, y, w, h in [0, 1]).
    viewport: Vec4,
    final_aspect: f32,

    pub layers: u32,
    pub enabled: bool,
    pub background_color: Vec4,
    pub clear_color: bool,
    pub clear_depth: bool,
    /// Material used instead of each instance's own.
    pub overwrite_material: Option<MaterialKey>,
    /// Show the offscreen frame on screen after rendering to it.
    pub show_frame: bool,

    // === Node binding ===
    node: Option<NodeKey>,
    node_matrix: Option<Mat4>,

    // === Offscreen frame ===
    render_to_texture: bool,
    frame: Option<TextureHandle>,
    released_frames: Vec<TextureHandle>,

    // === Derived (lazily updated) ===
    generation: u64,
    matrices_generation: u64,
    custom_projection: Option<Mat4>,
    view_matrix: Mat4,
    projection_matrix: Mat4,
    view_projection_matrix: Mat4,
    previous_view_projection_matrix: Mat4,
    model_matrix: Mat4,
    frustum: Frustum,

    // === Per-frame bookkeeping written by the renderer ===
    pub(crate) rendering_index: i32,
    last_viewport_in_pixels: Viewport,
    last_full_viewport: Viewport,
}

impl Default for Camera {
    fn default() -> Self {
        Self::from_config(&CameraConfig::default())
    }
}

impl Camera {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Perspective camera; `fov` in degrees.
    #[must_use]
    pub fn new_perspective(fov: f32, aspect: f32, near: f32, far: f32) -> Self {
        let mut camera = Self::default();
        camera.set_perspective(fov, aspect, near, far);
        camera
    }

    #[must_use]
    pub fn new_orthographic(frustum_size: f32, aspect: f32, near: f32, far: f32) -> Self {
        let mut camera = Self::default();
        camera.projection = ProjectionType::Orthographic;
        camera.frustum_size = frustum_size;
        camera.aspect = aspect;
        camera.near = near;
        camera.far = far;
        camera
    }

    #[must_use]
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            projection: config.projection,
            eye: config.eye,
            center: config.center,
            up: config.up,
            near: config.near,
            far: config.far,
            fov: config.fov,
            aspect: config.aspect,
            frustum_size: config.frustum_size,
            ortho: config.ortho,
            viewport: config.viewport,
            final_aspect: 1.0,

            layers: config.layers,
            enabled: config.enabled,
            background_color: config.background_color,
            clear_color: config.clear_color,
            clear_depth: config.clear_depth,
            overwrite_material: None,
            show_frame: config.show_frame,

            node: None,
            node_matrix: None,

            render_to_texture: config.render_to_texture,
            frame: None,
            released_frames: Vec::new(),

            generation: 1,
            matrices_generation: 0,
            custom_projection: None,
            view_matrix: Mat4::IDENTITY,
            projection_matrix: Mat4::IDENTITY,
            view_projection_matrix: Mat4::IDENTITY,
            previous_view_projection_matrix: Mat4::IDENTITY,
            model_matrix: Mat4::IDENTITY,
            frustum: Frustum::default(),

            rendering_index: -1,
            last_viewport_in_pixels: Viewport::default(),
            last_full_viewport: Viewport::default(),
        }
    }

    /// Current parameters as a serializable config.
    #[must_use]
    pub fn config(&self) -> CameraConfig {
        CameraConfig {
            projection: self.projection,
            eye: self.eye,
            center: self.center,
            up: self.up,
            near: self.near,
            far: self.far,
            fov: self.fov,
            aspect: self.aspect,
            frustum_size: self.frustum_size,
            ortho: self.ortho,
            viewport: self.viewport,
            layers: self.layers,
            background_color: self.background_color,
            clear_color: self.clear_color,
            clear_depth: self.clear_depth,
            render_to_texture: self.render_to_texture,
            show_frame: self.show_frame,
            enabled: self.enabled,
        }
    }

    /// Applies a config, keeping node binding and offscreen frame.
    pub fn configure(&mut self, config: &CameraConfig) {
        self.projection = config.projection;
        self.eye = config.eye;
        self.center = config.center;
        self.up = config.up;
        self.near = config.near;
        self.far = config.far;
        self.fov = config.fov;
        self.aspect = config.aspect;
        self.frustum_size = config.frustum_size;
        self.ortho = config.ortho;
        self.viewport = config.viewport;
        self.layers = config.layers;
        self.background_color = config.background_color;
        self.clear_color = config.clear_color;
        self.clear_depth = config.clear_depth;
        self.show_frame = config.show_frame;
        self.enabled = config.enabled;
        self.set_render_to_texture(config.render_to_texture);
        self.touch();
    }

    // ========================================================================
    // Generation Tracking
    // ========================================================================

    #[inline]
    fn touch(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    /// Incremented by every setter that affects the derived matrices.
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True when the derived matrices are stale.
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.generation != self.matrices_generation
    }

    // ========================================================================
    // Parameters
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn projection_type(&self) -> ProjectionType {
        self.projection
    }

    pub fn set_projection_type(&mut self, projection: ProjectionType) {
        if self.projection != projection {
            self.projection = projection;
            self.touch();
        }
    }

    /// Local eye position.
    #[inline]
    #[must_use]
    pub fn eye(&self) -> Vec3 {
        self.eye
    }

    pub fn set_eye(&mut self, eye: Vec3) {
        self.eye = eye;
        self.touch();
    }

    /// Local center (point the camera looks at).
    #[inline]
    #[must_use]
    pub fn center(&self) -> Vec3 {
        self.center
    }

    pub fn set_center(&mut self, center: Vec3) {
        self.center = center;
        self.touch();
    }

    #[inline]
    #[must_use]
    pub fn up(&self) -> Vec3 {
        self.up
    }

    pub fn set_up(&mut self, up: Vec3) {
        self.up = up;
        self.touch();
    }

    #[inline]
    #[must_use]
    pub fn near(&self) -> f32 {
        self.near
    }

    pub fn set_near(&mut self, near: f32) {
        self.near = near;
        self.touch();
    }

    #[inline]
    #[must_use]
    pub fn far(&self) -> f32 {
        self.far
    }

    pub fn set_far(&mut self, far: f32) {
        self.far = far;
        self.touch();
    }

    /// Vertical field of view in degrees.
    #[inline]
    #[must_use]
    pub fn fov(&self) -> f32 {
        self.fov
    }

    pub fn set_fov(&mut self, fov: f32) {
        self.fov = fov;
        self.touch();
    }

    #[inline]
    #[must_use]
    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
        self.touch();
    }

    /// Aspect ratio actually used for projection (set when the camera is
    /// enabled for rendering).
    #[inline]
    #[must_use]
    pub fn final_aspect(&self) -> f32 {
        self.final_aspect
    }

    pub(crate) fn set_final_aspect(&mut self, aspect: f32) {
        if self.final_aspect != aspect {
            self.final_aspect = aspect;
            self.touch();
        }
    }

    #[inline]
    #[must_use]
    pub fn frustum_size(&self) -> f32 {
        self.frustum_size
    }

    pub fn set_frustum_size(&mut self, size: f32) {
        self.frustum_size = size;
        self.touch();
    }

    #[inline]
    #[must_use]
    pub fn ortho_rect(&self) -> OrthoRect {
        self.ortho
    }

    /// Normalized viewport rectangle.
    #[inline]
    #[must_use]
    pub fn viewport(&self) -> Vec4 {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Vec4) {
        self.viewport = viewport;
        self.touch();
    }

    /// Sets the viewport from pixels relative to a canvas of `canvas` size.
    pub fn set_viewport_in_pixels(&mut self, pixels: Viewport, canvas: (u32, u32)) {
        let (w, h) = (canvas.0.max(1) as f32, canvas.1.max(1) as f32);
        self.set_viewport(Vec4::new(
            pixels.x as f32 / w,
            pixels.y as f32 / h,
            pixels.width as f32 / w,
            pixels.height as f32 / h,
        ));
    }

    /// Switches to perspective; `fov` in degrees.
    pub fn set_perspective(&mut self, fov: f32, aspect: f32, near: f32, far: f32) {
        self.fov = fov;
        self.aspect = aspect;
        self.near = near;
        self.far = far;
        self.projection = ProjectionType::Perspective;
        self.touch();
    }

    /// Switches to an explicit orthographic rectangle.
    pub fn set_orthographic(
        &mut self,
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    ) {
        self.near = near;
        self.far = far;
        self.ortho = OrthoRect {
            left,
            right,
            bottom,
            top,
        };
        self.projection = ProjectionType::Ortho2D;
        self.touch();
    }

    /// Overrides the projection matrix; `None` goes back to the computed one.
    pub fn set_custom_projection_matrix(&mut self, matrix: Option<Mat4>) {
        match matrix {
            Some(m) => {
                self.custom_projection = Some(m);
                self.projection_matrix = m;
                self.view_projection_matrix = self.projection_matrix * self.view_matrix;
            }
            None => {
                self.custom_projection = None;
                self.touch();
            }
        }
    }

    #[inline]
    #[must_use]
    pub fn has_custom_projection(&self) -> bool {
        self.custom_projection.is_some()
    }

    // ========================================================================
    // Node Binding
    // ========================================================================

    /// Node this camera is attached to.
    #[inline]
    #[must_use]
    pub fn node(&self) -> Option<NodeKey> {
        self.node
    }

    pub(crate) fn attach_to_node(&mut self, node: NodeKey) {
        self.node = Some(node);
        self.eye = Vec3::ZERO;
        self.up = Vec3::Y;
        if self.center == Vec3::ZERO {
            self.center = Vec3::NEG_Z;
        }
        self.touch();
    }

    pub(crate) fn detach_from_node(&mut self) {
        self.node = None;
        self.node_matrix = None;
        self.touch();
    }

    /// Pushes the world matrix of the owning node.
    pub(crate) fn set_node_matrix(&mut self, matrix: Mat4) {
        if self.node_matrix != Some(matrix) {
            self.node_matrix = Some(matrix);
            self.touch();
        }
    }

    /// Moves the local center along -Z so eye and center are `distance`
    /// apart (node-bound cameras).
    pub(crate) fn set_focal_length(&mut self, distance: f32) {
        self.center = self.eye + Vec3::NEG_Z * distance.max(f32::EPSILON);
        self.touch();
    }

    // ========================================================================
    // Matrices
    // ========================================================================

    /// Recomputes projection, view, view-projection and frustum planes when
    /// stale or when `force` is set.
    pub fn update_matrices(&mut self, force: bool) {
        if !force && !self.is_dirty() {
            return;
        }

        if self.custom_projection.is_none() {
            self.projection_matrix = match self.projection {
                ProjectionType::Orthographic => {
                    let half_w = self.frustum_size * self.final_aspect * 0.5;
                    let half_h = self.frustum_size * 0.5;
                    Mat4::orthographic_rh_gl(-half_w, half_w, -half_h, half_h, self.near, self.far)
                }
                ProjectionType::Ortho2D => Mat4::orthographic_rh_gl(
                    self.ortho.left,
                    self.ortho.right,
                    self.ortho.bottom,
                    self.ortho.top,
                    self.near,
                    self.far,
                ),
                ProjectionType::Perspective => Mat4::perspective_rh_gl(
                    self.fov.to_radians(),
                    self.final_aspect,
                    self.near,
                    self.far,
                ),
            };
        }

        self.view_matrix = Mat4::look_at_rh(self.get_eye(), self.get_center(), self.get_up());
        self.model_matrix = self.view_matrix.inverse();

        // Planes depend on the combined matrix.
        self.view_projection_matrix = self.projection_matrix * self.view_matrix;
        self.frustum = Frustum::from_matrix(self.view_projection_matrix);

        self.matrices_generation = self.generation;
    }

    /// Remembers the current view-projection and refreshes matrices.
    pub fn prepare(&mut self) {
        self.previous_view_projection_matrix = self.view_projection_matrix;
        self.update_matrices(false);
    }

    pub fn view_matrix(&mut self) -> Mat4 {
        self.update_matrices(false);
        self.view_matrix
    }

    pub fn projection_matrix(&mut self) -> Mat4 {
        self.update_matrices(false);
        self.projection_matrix
    }

    pub fn view_projection_matrix(&mut self) -> Mat4 {
        self.update_matrices(false);
        self.view_projection_matrix
    }

    /// Inverse of the view matrix.
    pub fn model_matrix(&mut self) -> Mat4 {
        self.update_matrices(false);
        self.model_matrix
    }

    /// `view_projection * model`.
    pub fn model_view_projection(&mut self, model: &Mat4) -> Mat4 {
        self.update_matrices(false);
        self.view_projection_matrix * *model
    }

    /// View-projection of the frame before the last [`Camera::prepare`].
    #[inline]
    #[must_use]
    pub fn previous_view_projection_matrix(&self) -> Mat4 {
        self.previous_view_projection_matrix
    }

    /// Last computed view matrix, without updating.
    #[inline]
    #[must_use]
    pub fn cached_view_matrix(&self) -> Mat4 {
        self.view_matrix
    }

    #[inline]
    #[must_use]
    pub fn cached_projection_matrix(&self) -> Mat4 {
        self.projection_matrix
    }

    #[inline]
    #[must_use]
    pub fn cached_view_projection_matrix(&self) -> Mat4 {
        self.view_projection_matrix
    }

    /// Planes from the last [`Camera::update_matrices`].
    #[inline]
    #[must_use]
    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    // ========================================================================
    // World-Space Vectors
    // ========================================================================

    /// Eye in world space.
    #[must_use]
    pub fn get_eye(&self) -> Vec3 {
        match self.node_matrix {
            Some(m) => m.transform_point3(self.eye),
            None => self.eye,
        }
    }

    /// Center in world space.
    #[must_use]
    pub fn get_center(&self) -> Vec3 {
        match self.node_matrix {
            Some(m) => m.transform_point3(self.center),
            None => self.center,
        }
    }

    /// Normalized viewing direction in world space.
    #[must_use]
    pub fn get_front(&self) -> Vec3 {
        match self.node_matrix {
            Some(m) => m.transform_vector3(Vec3::NEG_Z).normalize_or_zero(),
            None => (self.center - self.eye).normalize_or_zero(),
        }
    }

    /// Up vector as configured, in world space.
    #[must_use]
    pub fn get_up(&self) -> Vec3 {
        match self.node_matrix {
            Some(m) => m.transform_vector3(self.up),
            None => self.up,
        }
    }

    #[must_use]
    pub fn get_right(&self) -> Vec3 {
        let front = self.center - self.eye;
        let right = front.cross(self.up).normalize_or_zero();
        match self.node_matrix {
            Some(m) => m.transform_vector3(right).normalize_or_zero(),
            None => right,
        }
    }

    /// Up vector orthogonal to front and right.
    #[must_use]
    pub fn get_top(&self) -> Vec3 {
        let front = self.center - self.eye;
        let right = front.cross(self.up);
        let top = right.cross(front).normalize_or_zero();
        match self.node_matrix {
            Some(m) => m.transform_vector3(top).normalize_or_zero(),
            None => top,
        }
    }

    /// Local point to world space.
    pub fn local_point_to_world(&mut self, point: Vec3) -> Vec3 {
        if let Some(m) = self.node_matrix {
            return m.transform_point3(point);
        }
        self.model_matrix().transform_point3(point)
    }

    /// Local direction to world space.
    pub fn local_vector_to_world(&mut self, vector: Vec3) -> Vec3 {
        if let Some(m) = self.node_matrix {
            return m.transform_vector3(vector);
        }
        self.model_matrix().transform_vector3(vector)
    }

    // ========================================================================
    // Manipulation (free cameras)
    // ========================================================================

    fn warn_if_bound(&self, op: &str) -> bool {
        if self.node.is_some() {
            log::warn!("Camera::{op}: camera is attached to a node, move the node instead");
            return true;
        }
        false
    }

    /// Places the camera at `eye` looking at `center`.
    pub fn look_at(&mut self, eye: Vec3, center: Vec3, up: Vec3) {
        if self.warn_if_bound("look_at") {
            return;
        }
        self.eye = eye;
        self.center = center;
        self.up = up;
        self.touch();
    }

    /// Places eye, center and up from a view matrix.
    pub fn from_view_matrix(&mut self, view: &Mat4) {
        if self.warn_if_bound("from_view_matrix") {
            return;
        }
        let model = view.inverse();
        self.eye = model.transform_point3(Vec3::ZERO);
        self.center = model.transform_point3(Vec3::NEG_Z);
        self.up = model.transform_vector3(Vec3::Y);
        self.touch();
    }

    /// Translates eye and center by `delta`.
    pub fn move_by(&mut self, delta: Vec3) {
        if self.warn_if_bound("move_by") {
            return;
        }
        self.eye += delta;
        self.center += delta;
        self.touch();
    }

    /// Rotates the viewing direction around the eye.
    pub fn rotate(&mut self, angle_deg: f32, axis: Vec3, in_local_space: bool) {
        if angle_deg == 0.0 || self.warn_if_bound("rotate") {
            return;
        }
        let axis = if in_local_space {
            self.local_vector_to_world(axis)
        } else {
            axis
        };
        let rotation = Quat::from_axis_angle(axis.normalize_or_zero(), angle_deg.to_radians());
        let front = rotation * (self.center - self.eye);
        self.center = self.eye + front;
        self.touch();
    }

    /// Rotates the eye around `center` (defaults to the camera center).
    ///
    /// A zero angle is a no-op and leaves the matrices valid.
    pub fn orbit(&mut self, angle_deg: f32, axis: Option<Vec3>, center: Option<Vec3>) -> Result<()> {
        if angle_deg == 0.0 {
            return Ok(());
        }
        let Some(axis) = axis else {
            log::error!("Camera::orbit: axis missing");
            return Err(RenderError::MissingRotationAxis);
        };
        if self.warn_if_bound("orbit") {
            return Ok(());
        }

        let center = center.unwrap_or(self.center);
        let rotation = Quat::from_axis_angle(axis.normalize_or_zero(), angle_deg.to_radians());
        self.eye = center + rotation * (self.eye - center);
        self.touch();
        Ok(())
    }

    /// Scales the eye-center distance by `factor`.
    pub fn orbit_distance_factor(&mut self, factor: f32, center: Option<Vec3>) {
        if self.warn_if_bound("orbit_distance_factor") {
            return;
        }
        let center = center.unwrap_or(self.center);
        self.eye = center + (self.eye - center) * factor;
        self.touch();
    }

    /// Moves along the camera's top and right vectors.
    pub fn panning(&mut self, x: f32, y: f32, factor: f32) {
        let delta = self.get_top() * (y * factor) + self.get_right() * (x * factor);
        self.move_by(delta);
    }

    /// Moves the eye (or the center) so both are `distance` apart.
    pub fn set_distance_to_center(&mut self, distance: f32, move_eye: bool) {
        if self.warn_if_bound("set_distance_to_center") {
            return;
        }
        let front = self.center - self.eye;
        let length = front.length();
        if length <= f32::EPSILON {
            return;
        }
        if move_eye {
            self.eye = self.center - front * (distance / length);
        } else {
            self.center = self.eye + front * (distance / length);
        }
        self.touch();
    }

    // ========================================================================
    // Projection Helpers
    // ========================================================================

    pub(crate) fn set_last_viewports(&mut self, local: Viewport, full: Viewport) {
        self.last_viewport_in_pixels = local;
        self.last_full_viewport = full;
    }

    /// Pixel viewport the camera rendered into last time.
    #[inline]
    #[must_use]
    pub fn last_viewport_in_pixels(&self) -> Viewport {
        self.last_viewport_in_pixels
    }

    /// Applies the normalized viewport to `viewport` (defaults to the full
    /// viewport the camera was last enabled with).
    #[must_use]
    pub fn local_viewport(&self, viewport: Option<Viewport>) -> Viewport {
        let Some(full) = viewport else {
            let full = self.last_full_viewport;
            return Viewport::new(
                (full.width as f32 * self.viewport.x) as i32,
                (full.height as f32 * self.viewport.y) as i32,
                (full.width as f32 * self.viewport.z) as i32,
                (full.height as f32 * self.viewport.w) as i32,
            );
        };
        Viewport::new(
            (full.width as f32 * self.viewport.x + full.x as f32).floor() as i32,
            (full.height as f32 * self.viewport.y + full.y as f32).floor() as i32,
            (full.width as f32 * self.viewport.z).ceil() as i32,
            (full.height as f32 * self.viewport.w).ceil() as i32,
        )
    }

    /// World point to pixel coordinates with a top-left origin; `z` is the
    /// depth in [0, 1].
    pub fn project(&mut self, point: Vec3, viewport: Option<Viewport>) -> Vec3 {
        let vp = self.local_viewport(viewport).as_vec4();
        self.update_matrices(false);

        let clip = self.view_projection_matrix * point.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        let x = (ndc.x + 1.0) * 0.5 * vp.z + vp.x;
        let y = (ndc.y + 1.0) * 0.5 * vp.w + vp.y;
        let z = (ndc.z + 1.0) * 0.5;

        Vec3::new(x, vp.w - y + vp.y * 2.0, z)
    }

    /// Pixel coordinates (bottom-left origin, `z` depth in [0, 1]) to world
    /// space. `None` when the point cannot be unprojected.
    pub fn unproject(&mut self, screen: Vec3, viewport: Option<Viewport>) -> Option<Vec3> {
        let vp = self.local_viewport(viewport).as_vec4();
        self.update_matrices(false);
        Self::unproject_with(&self.view_projection_matrix, screen, vp)
    }

    fn unproject_with(view_projection: &Mat4, screen: Vec3, vp: Vec4) -> Option<Vec3> {
        if vp.z == 0.0 || vp.w == 0.0 {
            return None;
        }
        let ndc = Vec4::new(
            (screen.x - vp.x) * 2.0 / vp.z - 1.0,
            (screen.y - vp.y) * 2.0 / vp.w - 1.0,
            screen.z * 2.0 - 1.0,
            1.0,
        );
        let world = view_projection.inverse() * ndc;
        if world.w == 0.0 {
            return None;
        }
        let point = world.truncate() / world.w;
        (!point.is_nan()).then_some(point)
    }

    /// Ray through pixel (`x`, `y`), bottom-left origin.
    pub fn get_ray(&mut self, x: f32, y: f32, viewport: Option<Viewport>) -> Option<Ray> {
        let vp = self.local_viewport(viewport).as_vec4();
        self.update_matrices(false);

        let far_point = Self::unproject_with(&self.view_projection_matrix, Vec3::new(x, y, 1.0), vp)?;
        let origin = match self.projection {
            ProjectionType::Perspective => self.get_eye(),
            ProjectionType::Orthographic | ProjectionType::Ortho2D => {
                Self::unproject_with(&self.view_projection_matrix, Vec3::new(x, y, 0.0), vp)?
            }
        };

        let direction = (far_point - origin).normalize();
        if direction.is_nan() || origin.is_nan() {
            return None;
        }
        Some(Ray { origin, direction })
    }

    /// True when pixel (`x`, `y`) (bottom-left origin) falls inside the
    /// camera viewport.
    #[must_use]
    pub fn is_point_2d_in_viewport(&self, x: f32, y: f32, viewport: Option<Viewport>) -> bool {
        let v = self.local_viewport(viewport);
        !(x < v.x as f32
            || x > (v.x + v.width) as f32
            || y < v.y as f32
            || y > (v.y + v.height) as f32)
    }

    /// Mouse position (top-left origin) to coordinates local to the last
    /// camera viewport (bottom-left origin).
    #[must_use]
    pub fn mouse_to_viewport(&self, pos: Vec2) -> Vec2 {
        let v = self.last_viewport_in_pixels;
        Vec2::new(pos.x - v.x as f32, v.height as f32 - (pos.y - v.y as f32))
    }

    /// Tests a sphere against the planes from the last
    /// [`Camera::update_matrices`]; stale until the next update.
    #[must_use]
    pub fn test_sphere_inside_frustum(&self, center: Vec3, radius: f32) -> bool {
        self.frustum.test_sphere(center, radius) != ClipResult::Outside
    }

    // ========================================================================
    // Offscreen Frame
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn render_to_texture(&self) -> bool {
        self.render_to_texture
    }

    /// Enables or disables rendering into an offscreen frame. The target is
    /// allocated by the renderer on first use and released after disabling.
    pub fn set_render_to_texture(&mut self, enabled: bool) {
        self.render_to_texture = enabled;
        if !enabled && let Some(frame) = self.frame.take() {
            self.released_frames.push(frame);
        }
    }

    #[inline]
    #[must_use]
    pub fn is_rendered_to_texture(&self) -> bool {
        self.enabled && self.render_to_texture
    }

    /// Color texture of the offscreen frame, once allocated.
    #[inline]
    #[must_use]
    pub fn frame_texture(&self) -> Option<TextureHandle> {
        self.frame
    }

    pub(crate) fn set_frame_texture(&mut self, texture: TextureHandle) {
        self.frame = Some(texture);
    }

    pub(crate) fn take_released_frames(&mut self) -> Vec<TextureHandle> {
        std::mem::take(&mut self.released_frames)
    }

    /// Frame and released textures owned by this camera.
    pub(crate) fn drain_textures(&mut self) -> Vec<TextureHandle> {
        let mut textures = self.take_released_frames();
        textures.extend(self.frame.take());
        textures
    }

    /// Index assigned for the current frame (-1 outside of a frame).
    #[inline]
    #[must_use]
    pub fn rendering_index(&self) -> i32 {
        self.rendering_index
    }
}
