//! Render queues
//!
//! Visible instances are bucketed into queues every pass. Queues run in
//! ascending slot order, where the slot is the tens digit of the queue
//! value:
//!
//! | Queue | Value | Sort |
//! |-------|-------|------|
//! | Background | 5 | none |
//! | Geometry | 35 | near to far |
//! | Transparent | 75 | far to near |
//! | Readback color | 95 | far to near, color buffer copied first |
//! | Overlay | 115 | by priority |
//!
//! A material asking for a value whose slot has no queue gets a new
//! unsorted queue at `slot * 10 + 5`.

use std::fmt;

use crate::backend::{GpuBackend, TextureDesc, TextureHandle};
use crate::renderer::{RenderInstance, RenderPass, RenderSettings};
use crate::resources::{Material, MaterialQueue};

/// Ordering policy of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    /// Keep collection order.
    #[default]
    None,
    NearToFar,
    FarToNear,
    /// Descending priority, ties keep collection order.
    ByPriority,
}

type QueueCallback = Box<dyn FnMut(RenderPass, &RenderSettings) -> bool>;

pub struct RenderQueue {
    pub name: String,
    value: i32,
    pub sort_mode: SortMode,
    pub enabled: bool,
    /// Copy the color buffer into a texture before drawing the queue.
    pub must_clone_buffers: bool,
    /// Returning `false` skips the queue for that pass.
    pub on_start: Option<QueueCallback>,
    pub on_finish: Option<QueueCallback>,
    /// Indices into the pass's instance list.
    pub(crate) instances: Vec<usize>,
    clone_texture: Option<TextureHandle>,
}

impl RenderQueue {
    pub const AUTO: i32 = -1;
    pub const BACKGROUND: i32 = 5;
    pub const GEOMETRY: i32 = 35;
    pub const TRANSPARENT: i32 = 75;
    pub const READBACK_COLOR: i32 = 95;
    pub const OVERLAY: i32 = 115;

    #[must_use]
    pub fn new(name: &str, value: i32, sort_mode: SortMode) -> Self {
        Self {
            name: name.to_string(),
            value,
            sort_mode,
            enabled: true,
            must_clone_buffers: false,
            on_start: None,
            on_finish: None,
            instances: Vec::new(),
            clone_texture: None,
        }
    }

    /// Slot a queue value falls into.
    #[inline]
    #[must_use]
    pub fn slot_of(value: i32) -> i32 {
        value.div_euclid(10)
    }

    #[inline]
    #[must_use]
    pub fn value(&self) -> i32 {
        self.value
    }

    #[inline]
    #[must_use]
    pub fn slot(&self) -> i32 {
        Self::slot_of(self.value)
    }

    /// Queued instance indices, in draw order after [`RenderQueue::sort`].
    #[must_use]
    pub fn instances(&self) -> &[usize] {
        &self.instances
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn add(&mut self, index: usize) {
        self.instances.push(index);
    }

    pub fn clear(&mut self) {
        self.instances.clear();
    }

    /// Stable sort of the queued indices by the queue policy.
    pub fn sort(&mut self, instances: &[RenderInstance]) {
        let distance = |i: &usize| instances.get(*i).map_or(0.0, RenderInstance::distance);
        match self.sort_mode {
            SortMode::None => {}
            SortMode::NearToFar => self
                .instances
                .sort_by(|a, b| distance(a).total_cmp(&distance(b))),
            SortMode::FarToNear => self
                .instances
                .sort_by(|a, b| distance(b).total_cmp(&distance(a))),
            SortMode::ByPriority => {
                let priority = |i: &usize| instances.get(*i).map_or(0, |inst| inst.priority);
                self.instances.sort_by(|a, b| priority(b).cmp(&priority(a)));
            }
        }
    }

    /// Prepares the queue for drawing. Returns `false` to skip it.
    pub fn start(
        &mut self,
        pass: RenderPass,
        settings: &RenderSettings,
        backend: &mut dyn GpuBackend,
    ) -> bool {
        if let Some(on_start) = self.on_start.as_mut()
            && !on_start(pass, settings)
        {
            return false;
        }

        if self.must_clone_buffers && pass == RenderPass::Color {
            let (width, height) = backend.drawing_buffer_size();
            let texture = match self.clone_texture {
                Some(t)
                    if backend
                        .texture_desc(t)
                        .is_some_and(|d| d.width == width && d.height == height) =>
                {
                    t
                }
                previous => {
                    if let Some(t) = previous {
                        backend.release_texture(t);
                    }
                    let t = backend.create_texture(&TextureDesc::color_2d(width, height));
                    self.clone_texture = Some(t);
                    t
                }
            };
            backend.copy_color_buffer(texture);
        }
        true
    }

    pub fn finish(&mut self, pass: RenderPass, settings: &RenderSettings) {
        if let Some(on_finish) = self.on_finish.as_mut() {
            on_finish(pass, settings);
        }
    }

    /// Copy of the color buffer made by the last [`RenderQueue::start`].
    #[must_use]
    pub fn cloned_color_texture(&self) -> Option<TextureHandle> {
        self.clone_texture
    }
}

impl fmt::Debug for RenderQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderQueue")
            .field("name", &self.name)
            .field("value", &self.value)
            .field("sort_mode", &self.sort_mode)
            .field("enabled", &self.enabled)
            .field("instances", &self.instances.len())
            .finish_non_exhaustive()
    }
}

/// The renderer's queues, kept in ascending slot order.
#[derive(Debug)]
pub struct RenderQueues {
    queues: Vec<RenderQueue>,
}

impl Default for RenderQueues {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderQueues {
    #[must_use]
    pub fn new() -> Self {
        let mut readback = RenderQueue::new(
            "readback",
            RenderQueue::READBACK_COLOR,
            SortMode::FarToNear,
        );
        readback.must_clone_buffers = true;

        Self {
            queues: vec![
                RenderQueue::new("background", RenderQueue::BACKGROUND, SortMode::None),
                RenderQueue::new("geometry", RenderQueue::GEOMETRY, SortMode::NearToFar),
                RenderQueue::new("transparent", RenderQueue::TRANSPARENT, SortMode::FarToNear),
                readback,
                RenderQueue::new("overlay", RenderQueue::OVERLAY, SortMode::ByPriority),
            ],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &RenderQueue> {
        self.queues.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RenderQueue> {
        self.queues.iter_mut()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Queue owning the slot of `value`.
    #[must_use]
    pub fn get(&self, value: i32) -> Option<&RenderQueue> {
        let slot = RenderQueue::slot_of(value);
        self.queues.iter().find(|q| q.slot() == slot)
    }

    pub fn get_mut(&mut self, value: i32) -> Option<&mut RenderQueue> {
        let slot = RenderQueue::slot_of(value);
        self.queues.iter_mut().find(|q| q.slot() == slot)
    }

    /// Position of the queue for `value`, creating an unsorted one if the
    /// slot is free.
    pub fn index_for_value(&mut self, value: i32) -> usize {
        let slot = RenderQueue::slot_of(value);
        match self.queues.binary_search_by_key(&slot, RenderQueue::slot) {
            Ok(i) => i,
            Err(i) => {
                log::debug!("Creating render queue for slot {slot}");
                self.queues.insert(
                    i,
                    RenderQueue::new(
                        &format!("queue_{slot}"),
                        slot.saturating_mul(10).saturating_add(5),
                        SortMode::None,
                    ),
                );
                i
            }
        }
    }

    /// Position of the queue a material routes to.
    pub fn index_for_material(&mut self, material: &dyn Material) -> usize {
        let value = match material.queue() {
            MaterialQueue::Value(v) if v != RenderQueue::AUTO => v,
            _ if material.render_state().blend => RenderQueue::TRANSPARENT,
            _ => RenderQueue::GEOMETRY,
        };
        self.index_for_value(value)
    }

    pub fn clear(&mut self) {
        for queue in &mut self.queues {
            queue.clear();
        }
    }

    pub fn sort(&mut self, instances: &[RenderInstance]) {
        for queue in &mut self.queues {
            if !queue.is_empty() {
                queue.sort(instances);
            }
        }
    }

    pub(crate) fn queue_at_mut(&mut self, index: usize) -> Option<&mut RenderQueue> {
        self.queues.get_mut(index)
    }
}
