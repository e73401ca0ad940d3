use glam::{Vec3, Vec4};

use crate::backend::CubeFace;

/// Camera orientation used to render one cube map face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubemapFace {
    pub face: CubeFace,
    pub dir: Vec3,
    pub up: Vec3,
}

/// Face directions and up vectors, in layer order.
///
/// The up vectors do not follow a single derivable convention; they match
/// the orientation existing baked cube maps were captured with and must not
/// be changed.
pub const CUBEMAP_FACES: [CubemapFace; 6] = [
    CubemapFace {
        face: CubeFace::PosX,
        dir: Vec3::new(1.0, 0.0, 0.0),
        up: Vec3::new(0.0, -1.0, 0.0),
    },
    CubemapFace {
        face: CubeFace::NegX,
        dir: Vec3::new(-1.0, 0.0, 0.0),
        up: Vec3::new(0.0, -1.0, 0.0),
    },
    CubemapFace {
        face: CubeFace::PosY,
        dir: Vec3::new(0.0, 1.0, 0.0),
        up: Vec3::new(0.0, 0.0, 1.0),
    },
    CubemapFace {
        face: CubeFace::NegY,
        dir: Vec3::new(0.0, -1.0, 0.0),
        up: Vec3::new(0.0, 0.0, -1.0),
    },
    CubemapFace {
        face: CubeFace::PosZ,
        dir: Vec3::new(0.0, 0.0, 1.0),
        up: Vec3::new(0.0, -1.0, 0.0),
    },
    CubemapFace {
        face: CubeFace::NegZ,
        dir: Vec3::new(0.0, 0.0, -1.0),
        up: Vec3::new(0.0, -1.0, 0.0),
    },
];

/// Parameters of a cube map capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubemapOptions {
    /// Face size in pixels, used when the texture is allocated here.
    pub size: u32,
    pub near: f32,
    pub far: f32,
    /// Clear color; `None` clears to transparent black.
    pub background: Option<Vec4>,
}

impl Default for CubemapOptions {
    fn default() -> Self {
        Self {
            size: 256,
            near: 1.0,
            far: 1000.0,
            background: None,
        }
    }
}
