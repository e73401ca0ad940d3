use glam::{Vec3, Vec4};
use slotmap::SlotMap;

use crate::backend::TextureHandle;
use crate::scene::ProbeKey;

/// Squared-distance bound for probe lookups; farther probes are ignored.
const MAX_PROBE_DISTANCE_SQ: f32 = 1e6;

/// Point the environment is captured from into a cube map.
#[derive(Debug, Clone)]
pub struct ReflectionProbe {
    pub position: Vec3,
    /// Cube face size in pixels.
    pub size: u32,
    pub near: f32,
    pub far: f32,
    /// Clear color; `None` clears to transparent black.
    pub background: Option<Vec4>,
    /// Re-captured every frame.
    pub realtime: bool,
    pub enabled: bool,
    pub(crate) texture: Option<TextureHandle>,
    pub(crate) dirty: bool,
}

impl ReflectionProbe {
    #[must_use]
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            size: 256,
            near: 0.1,
            far: 1000.0,
            background: None,
            realtime: false,
            enabled: true,
            texture: None,
            dirty: true,
        }
    }

    /// Requests a capture on the next frame.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    #[inline]
    #[must_use]
    pub fn needs_update(&self) -> bool {
        self.enabled && (self.realtime || self.dirty)
    }

    #[inline]
    #[must_use]
    pub fn texture(&self) -> Option<TextureHandle> {
        self.texture
    }
}

/// Nearest enabled probe to `position`.
pub(crate) fn nearest_probe(
    probes: &SlotMap<ProbeKey, ReflectionProbe>,
    position: Vec3,
) -> Option<ProbeKey> {
    if probes.len() == 1 {
        return probes.keys().next();
    }

    let mut nearest = None;
    let mut min_distance = MAX_PROBE_DISTANCE_SQ;
    for (key, probe) in probes {
        if !probe.enabled {
            continue;
        }
        let distance = probe.position.distance_squared(position);
        if distance < min_distance {
            min_distance = distance;
            nearest = Some(key);
        }
    }
    nearest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_probe_is_always_nearest() {
        let mut probes = SlotMap::with_key();
        let key = probes.insert(ReflectionProbe::new(Vec3::splat(5000.0)));
        assert_eq!(nearest_probe(&probes, Vec3::ZERO), Some(key));
    }

    #[test]
    fn far_probes_are_ignored() {
        let mut probes = SlotMap::with_key();
        probes.insert(ReflectionProbe::new(Vec3::new(2000.0, 0.0, 0.0)));
        let near = probes.insert(ReflectionProbe::new(Vec3::new(10.0, 0.0, 0.0)));
        assert_eq!(nearest_probe(&probes, Vec3::ZERO), Some(near));
        assert_eq!(nearest_probe(&probes, Vec3::new(-3000.0, 0.0, 0.0)), None);
    }
}
