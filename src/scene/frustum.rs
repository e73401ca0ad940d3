use glam::{Mat4, Vec3, Vec4};

use crate::resources::BoundingBox;

/// Result of testing a volume against a frustum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipResult {
    Outside,
    Inside,
    Overlap,
}

/// Six normalized planes (`xyz` normal pointing inwards, `w` offset).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    planes: [Vec4; 6], // Left, Right, Bottom, Top, Near, Far
}

impl Default for Frustum {
    fn default() -> Self {
        Self::from_matrix(Mat4::IDENTITY)
    }
}

impl Frustum {
    /// Extracts the planes of a view-projection matrix with OpenGL clip
    /// conventions (z in [-1, 1]).
    #[must_use]
    pub fn from_matrix(m: Mat4) -> Self {
        let rows = [m.row(0), m.row(1), m.row(2), m.row(3)];

        // Gribb-Hartmann
        let mut planes = [
            rows[3] + rows[0], // Left
            rows[3] - rows[0], // Right
            rows[3] + rows[1], // Bottom
            rows[3] - rows[1], // Top
            rows[3] + rows[2], // Near
            rows[3] - rows[2], // Far
        ];

        for plane in &mut planes {
            let length = plane.truncate().length();
            if length > f32::EPSILON {
                *plane /= length;
            }
        }

        Self { planes }
    }

    #[inline]
    #[must_use]
    pub fn planes(&self) -> &[Vec4; 6] {
        &self.planes
    }

    #[inline]
    fn distance(plane: Vec4, point: Vec3) -> f32 {
        plane.truncate().dot(point) + plane.w
    }

    pub fn test_sphere(&self, center: Vec3, radius: f32) -> ClipResult {
        let mut overlap = false;
        for plane in &self.planes {
            let dist = Self::distance(*plane, center);
            if dist < -radius {
                return ClipResult::Outside;
            }
            if dist < radius {
                overlap = true;
            }
        }
        if overlap {
            ClipResult::Overlap
        } else {
            ClipResult::Inside
        }
    }

    pub fn test_box(&self, aabb: &BoundingBox) -> ClipResult {
        let center = aabb.center();
        let half = aabb.half_size();
        let mut overlap = false;
        for plane in &self.planes {
            let n = plane.truncate();
            let r = half.x * n.x.abs() + half.y * n.y.abs() + half.z * n.z.abs();
            let dist = Self::distance(*plane, center);
            if dist < -r {
                return ClipResult::Outside;
            }
            if dist <= r {
                overlap = true;
            }
        }
        if overlap {
            ClipResult::Overlap
        } else {
            ClipResult::Inside
        }
    }

    /// True unless the sphere is completely outside.
    #[inline]
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.test_sphere(center, radius) != ClipResult::Outside
    }

    /// True unless the box is completely outside.
    #[inline]
    pub fn intersects_box(&self, aabb: &BoundingBox) -> bool {
        self.test_box(aabb) != ClipResult::Outside
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn looking_down_neg_z() -> Frustum {
        let projection = Mat4::perspective_rh_gl(90f32.to_radians(), 1.0, 1.0, 100.0);
        Frustum::from_matrix(projection * Mat4::IDENTITY)
    }

    #[test]
    fn box_classification() {
        let frustum = looking_down_neg_z();

        let inside = BoundingBox::from_center_half_size(Vec3::new(0.0, 0.0, -10.0), Vec3::ONE);
        let straddling = BoundingBox::from_center_half_size(Vec3::new(0.0, 0.0, -1.0), Vec3::ONE);
        let behind = BoundingBox::from_center_half_size(Vec3::new(0.0, 0.0, 10.0), Vec3::ONE);

        assert_eq!(frustum.test_box(&inside), ClipResult::Inside);
        assert_eq!(frustum.test_box(&straddling), ClipResult::Overlap);
        assert_eq!(frustum.test_box(&behind), ClipResult::Outside);
    }

    #[test]
    fn sphere_beyond_far_plane_is_outside() {
        let frustum = looking_down_neg_z();
        assert!(!frustum.intersects_sphere(Vec3::new(0.0, 0.0, -120.0), 5.0));
        assert!(frustum.intersects_sphere(Vec3::new(0.0, 0.0, -102.0), 5.0));
    }
}
