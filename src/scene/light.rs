use glam::{Affine3A, Vec3};

use crate::backend::TextureHandle;
use crate::scene::NodeKey;
use crate::scene::camera::Camera;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    Directional,
    Point,
    /// Cone angles in degrees.
    Spot { inner_angle: f32, outer_angle: f32 },
}

/// Shadow parameters of a light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowSettings {
    pub near: f32,
    pub far: f32,
    /// Orthographic frustum size used by directional lights.
    pub frustum_size: f32,
    pub bias: f32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            near: 0.5,
            far: 500.0,
            frustum_size: 50.0,
            bias: 0.005,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Light {
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    /// Attenuation range for point and spot lights.
    pub range: f32,
    pub enabled: bool,
    pub cast_shadows: bool,
    /// Layers of the instances this light affects.
    pub illuminated_layers: u32,
    pub shadow: ShadowSettings,

    /// Local position, used when the light is not attached to a node.
    pub position: Vec3,
    /// Local direction the light points to.
    pub direction: Vec3,

    pub(crate) node: Option<NodeKey>,
    world_position: Vec3,
    world_direction: Vec3,
    pub(crate) shadow_map: Option<TextureHandle>,
}

impl Light {
    fn with_kind(kind: LightKind) -> Self {
        Self {
            kind,
            color: Vec3::ONE,
            intensity: 1.0,
            range: 100.0,
            enabled: true,
            cast_shadows: false,
            illuminated_layers: 0xFF,
            shadow: ShadowSettings::default(),
            position: Vec3::ZERO,
            direction: Vec3::NEG_Z,
            node: None,
            world_position: Vec3::ZERO,
            world_direction: Vec3::NEG_Z,
            shadow_map: None,
        }
    }

    #[must_use]
    pub fn new_directional(direction: Vec3) -> Self {
        let mut light = Self::with_kind(LightKind::Directional);
        light.direction = direction.normalize_or_zero();
        light
    }

    #[must_use]
    pub fn new_point(position: Vec3, range: f32) -> Self {
        let mut light = Self::with_kind(LightKind::Point);
        light.position = position;
        light.range = range;
        light
    }

    #[must_use]
    pub fn new_spot(position: Vec3, direction: Vec3, inner_angle: f32, outer_angle: f32) -> Self {
        let mut light = Self::with_kind(LightKind::Spot {
            inner_angle,
            outer_angle,
        });
        light.position = position;
        light.direction = direction.normalize_or_zero();
        light
    }

    #[inline]
    #[must_use]
    pub fn node(&self) -> Option<NodeKey> {
        self.node
    }

    #[inline]
    #[must_use]
    pub fn world_position(&self) -> Vec3 {
        self.world_position
    }

    #[inline]
    #[must_use]
    pub fn world_direction(&self) -> Vec3 {
        self.world_direction
    }

    #[inline]
    #[must_use]
    pub fn shadow_map(&self) -> Option<TextureHandle> {
        self.shadow_map
    }

    /// Resolves world position and direction through the owning node.
    pub(crate) fn update_world(&mut self, node_world: Option<&Affine3A>) {
        match node_world {
            Some(world) => {
                self.world_position = world.transform_point3(self.position);
                self.world_direction = world.transform_vector3(self.direction).normalize_or_zero();
            }
            None => {
                self.world_position = self.position;
                self.world_direction = self.direction.normalize_or_zero();
            }
        }
    }

    /// Per-frame preparation before any pass.
    pub fn prepare(&mut self) {
        if self.world_direction == Vec3::ZERO {
            self.world_direction = Vec3::NEG_Z;
        }
        self.range = self.range.max(0.0);
    }

    /// True when this light affects instances on `layers`.
    #[inline]
    #[must_use]
    pub fn illuminates(&self, layers: u32) -> bool {
        self.illuminated_layers & layers != 0
    }

    /// Camera used for the 2D shadow map of directional and spot lights.
    #[must_use]
    pub fn shadow_camera(&self) -> Camera {
        let up = if self.world_direction.cross(Vec3::Y).length_squared() < 1e-6 {
            Vec3::Z
        } else {
            Vec3::Y
        };

        let mut camera = match self.kind {
            LightKind::Directional => {
                let mut camera = Camera::new_orthographic(
                    self.shadow.frustum_size,
                    1.0,
                    self.shadow.near,
                    self.shadow.far,
                );
                // Pull the eye back so the scene around the light position
                // fits in the depth range.
                let eye = self.world_position - self.world_direction * self.shadow.far * 0.5;
                camera.look_at(eye, eye + self.world_direction, up);
                camera
            }
            LightKind::Spot { outer_angle, .. } => {
                let mut camera = Camera::new_perspective(
                    (outer_angle * 2.0).clamp(1.0, 179.0),
                    1.0,
                    self.shadow.near,
                    self.range.max(self.shadow.near + 1.0),
                );
                camera.look_at(self.world_position, self.world_position + self.world_direction, up);
                camera
            }
            // Point lights render a cube map; this is the +Z face camera.
            LightKind::Point => {
                let mut camera = Camera::new_perspective(
                    90.0,
                    1.0,
                    self.shadow.near,
                    self.range.max(self.shadow.near + 1.0),
                );
                camera.look_at(self.world_position, self.world_position + self.world_direction, up);
                camera
            }
        };
        camera.layers = u32::MAX;
        camera
    }
}
