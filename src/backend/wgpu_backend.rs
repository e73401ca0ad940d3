//! wgpu implementation of [`GpuBackend`].
//!
//! The default framebuffer is an offscreen color + depth texture pair of the
//! drawing buffer size; hosts present it however they like (copy to a
//! surface, read back, sample it in a UI). Offscreen targets are real wgpu
//! textures with one view per layer so each cube face can be bound on its
//! own.
//!
//! Commands are recorded into a lazily created [`wgpu::CommandEncoder`] and
//! submitted in [`GpuBackend::end_frame`]. Draw calls are forwarded to an
//! optional [`DrawEncoder`], since pipelines and bind groups belong to the
//! material layer.

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;
use slotmap::SlotMap;

use super::clear_quad::{ClearQuad, ClearTarget, ScissorRect};
use super::{
    ClearFlags, ClearRequest, DrawCall, GpuBackend, PipelineState, QueryStatus, RenderTarget,
    TextureDesc, TextureFormat, TextureHandle, TextureKind, Viewport,
};

const MAX_TIMER_QUERIES: usize = 16;
const SCREEN_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

/// Per-draw access to the frame being recorded.
pub struct WgpuFrame<'a> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
    pub encoder: &'a mut wgpu::CommandEncoder,
    /// Color attachment of the bound target (`None` for depth-only targets).
    pub color: Option<&'a wgpu::TextureView>,
    pub depth: Option<&'a wgpu::TextureView>,
    pub viewport: Viewport,
    pub state: &'a PipelineState,
}

/// Records the GPU commands of one [`DrawCall`].
pub trait DrawEncoder {
    fn encode(&mut self, frame: &mut WgpuFrame<'_>, call: &DrawCall);
}

struct GpuTarget {
    desc: TextureDesc,
    texture: wgpu::Texture,
    /// Sampling view (2D or cube).
    view: wgpu::TextureView,
    /// One attachment view per array layer.
    layer_views: Vec<wgpu::TextureView>,
    /// Companion depth buffer for color targets.
    depth: Option<(wgpu::Texture, wgpu::TextureView)>,
}

impl GpuTarget {
    fn new(device: &wgpu::Device, desc: &TextureDesc, label: &str) -> Self {
        let layers = match desc.kind {
            TextureKind::Texture2D => 1,
            TextureKind::Cube => 6,
        };
        let format = wgpu_format(desc.format);

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: desc.width.max(1),
                height: desc.height.max(1),
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(label),
            format: Some(format),
            dimension: Some(match desc.kind {
                TextureKind::Texture2D => wgpu::TextureViewDimension::D2,
                TextureKind::Cube => wgpu::TextureViewDimension::Cube,
            }),
            ..Default::default()
        });

        let layer_views = (0..layers)
            .map(|layer| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some(label),
                    format: Some(format),
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    base_array_layer: layer,
                    array_layer_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();

        let depth = (!desc.format.is_depth()).then(|| {
            let depth_texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: desc.width.max(1),
                    height: desc.height.max(1),
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: SCREEN_DEPTH_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            });
            let depth_view = depth_texture.create_view(&wgpu::TextureViewDescriptor::default());
            (depth_texture, depth_view)
        });

        Self {
            desc: *desc,
            texture,
            view,
            layer_views,
            depth,
        }
    }

    /// (color, depth) attachments for `layer`.
    fn attachments(&self, layer: u32) -> (Option<&wgpu::TextureView>, Option<&wgpu::TextureView>) {
        let layer_view = self.layer_views.get(layer as usize);
        if self.desc.format.is_depth() {
            (None, layer_view)
        } else {
            (layer_view, self.depth.as_ref().map(|(_, view)| view))
        }
    }
}

fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Depth32 => wgpu::TextureFormat::Depth32Float,
    }
}

/// Timestamp query bookkeeping.
///
/// Slot `i` writes timestamps `2i` (begin) and `2i + 1` (end). At the end of
/// a frame the set is resolved and copied into a mappable buffer; the map
/// completes asynchronously and the values are read during a later frame.
struct TimerQueries {
    set: wgpu::QuerySet,
    resolve: wgpu::Buffer,
    readback: wgpu::Buffer,
    written: [bool; MAX_TIMER_QUERIES],
    in_flight: [bool; MAX_TIMER_QUERIES],
    map_state: Arc<Mutex<Option<bool>>>,
    mapping: bool,
    results: [Option<f64>; MAX_TIMER_QUERIES],
    period_ns: f32,
}

impl TimerQueries {
    fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let count = (MAX_TIMER_QUERIES * 2) as u32;
        let size = u64::from(count) * std::mem::size_of::<u64>() as u64;
        Self {
            set: device.create_query_set(&wgpu::QuerySetDescriptor {
                label: Some("one-render timer queries"),
                ty: wgpu::QueryType::Timestamp,
                count,
            }),
            resolve: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("one-render timer resolve"),
                size,
                usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            }),
            readback: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("one-render timer readback"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            written: [false; MAX_TIMER_QUERIES],
            in_flight: [false; MAX_TIMER_QUERIES],
            map_state: Arc::new(Mutex::new(None)),
            mapping: false,
            results: [None; MAX_TIMER_QUERIES],
            period_ns: queue.get_timestamp_period(),
        }
    }

    /// Pulls finished results out of the readback buffer.
    fn collect(&mut self) {
        if !self.mapping {
            return;
        }
        let Some(ok) = self.map_state.lock().take() else {
            return;
        };
        self.mapping = false;
        if !ok {
            log::warn!("Timer query readback failed to map");
            return;
        }

        {
            let data = self.readback.slice(..).get_mapped_range();
            let ticks: &[u64] = bytemuck::cast_slice(&data);
            for slot in 0..MAX_TIMER_QUERIES {
                if !self.in_flight[slot] {
                    continue;
                }
                let begin = ticks[slot * 2];
                let end = ticks[slot * 2 + 1];
                let ns = end.saturating_sub(begin) as f64 * f64::from(self.period_ns);
                self.results[slot] = Some(ns / 1_000_000.0);
            }
        }
        self.readback.unmap();
        self.in_flight = [false; MAX_TIMER_QUERIES];
    }
}

/// GPU backend on top of a wgpu device.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    size: (u32, u32),

    screen: GpuTarget,
    textures: SlotMap<TextureHandle, GpuTarget>,
    target: Option<RenderTarget>,
    viewport: Viewport,
    state: PipelineState,

    encoder: Option<wgpu::CommandEncoder>,
    draw_encoder: Option<Box<dyn DrawEncoder>>,
    clear_quad: ClearQuad,
    timers: Option<TimerQueries>,
}

impl WgpuBackend {
    /// Creates a backend with a default framebuffer of `width` x `height`.
    ///
    /// Timer queries are enabled when the device was created with
    /// `TIMESTAMP_QUERY` and `TIMESTAMP_QUERY_INSIDE_ENCODERS`.
    #[must_use]
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, width: u32, height: u32) -> Self {
        let screen = GpuTarget::new(
            &device,
            &TextureDesc::color_2d(width, height),
            "one-render screen",
        );
        let timer_features =
            wgpu::Features::TIMESTAMP_QUERY | wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS;
        let timers = device
            .features()
            .contains(timer_features)
            .then(|| TimerQueries::new(&device, &queue));
        let clear_quad = ClearQuad::new(&device);

        Self {
            device,
            queue,
            size: (width, height),
            screen,
            textures: SlotMap::with_key(),
            target: None,
            viewport: Viewport::from_size(width, height),
            state: PipelineState::default(),
            encoder: None,
            draw_encoder: None,
            clear_quad,
            timers,
        }
    }

    /// Installs the encoder that records draw calls.
    pub fn set_draw_encoder(&mut self, encoder: Box<dyn DrawEncoder>) {
        self.draw_encoder = Some(encoder);
    }

    /// Recreates the default framebuffer.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
        self.screen = GpuTarget::new(
            &self.device,
            &TextureDesc::color_2d(width, height),
            "one-render screen",
        );
    }

    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Color texture of the default framebuffer.
    #[must_use]
    pub fn screen_texture(&self) -> &wgpu::Texture {
        &self.screen.texture
    }

    /// Sampling view of an offscreen texture.
    #[must_use]
    pub fn texture_view(&self, texture: TextureHandle) -> Option<&wgpu::TextureView> {
        self.textures.get(texture).map(|t| &t.view)
    }

    fn resolve_target<'a>(
        screen: &'a GpuTarget,
        textures: &'a SlotMap<TextureHandle, GpuTarget>,
        target: Option<RenderTarget>,
    ) -> Option<(&'a GpuTarget, u32)> {
        match target {
            None => Some((screen, 0)),
            Some(t) => textures
                .get(t.texture)
                .map(|gpu| (gpu, t.face.map_or(0, |f| f.layer()))),
        }
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.device;
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("one-render frame"),
            })
        })
    }
}

impl GpuBackend for WgpuBackend {
    fn drawing_buffer_size(&self) -> (u32, u32) {
        self.size
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn pipeline_state(&self) -> PipelineState {
        self.state
    }

    fn apply_state(&mut self, state: &PipelineState) {
        self.state = *state;
    }

    fn clear(&mut self, request: &ClearRequest) {
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("one-render frame"),
            })
        });
        let Some((gpu, layer)) = Self::resolve_target(&self.screen, &self.textures, self.target)
        else {
            log::warn!("WgpuBackend::clear: bound target no longer exists");
            return;
        };

        let Some(scissor) = ScissorRect::from_viewport(request.rect, gpu.desc.width, gpu.desc.height)
        else {
            return;
        };

        let (color_view, depth_view) = gpu.attachments(layer);
        if !scissor.covers(gpu.desc.width, gpu.desc.height) {
            let depth_format = if gpu.desc.format.is_depth() {
                wgpu_format(gpu.desc.format)
            } else {
                SCREEN_DEPTH_FORMAT
            };
            let target = ClearTarget {
                color: color_view.map(|view| (view, wgpu_format(gpu.desc.format))),
                depth: depth_view.map(|view| (view, depth_format)),
                has_stencil: color_view.is_some(),
            };
            self.clear_quad.encode(device, encoder, &target, request, scissor);
            return;
        }

        let color = request.color;
        let color_attachment = color_view.map(|view| wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: if request.flags.contains(ClearFlags::COLOR) {
                    wgpu::LoadOp::Clear(wgpu::Color {
                        r: f64::from(color.x),
                        g: f64::from(color.y),
                        b: f64::from(color.z),
                        a: f64::from(color.w),
                    })
                } else {
                    wgpu::LoadOp::Load
                },
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        });

        let has_stencil = color_view.is_some();
        let depth_attachment = depth_view.map(|view| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load: if request.flags.contains(ClearFlags::DEPTH) {
                    wgpu::LoadOp::Clear(request.depth)
                } else {
                    wgpu::LoadOp::Load
                },
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: has_stencil.then_some(wgpu::Operations {
                load: if request.flags.contains(ClearFlags::STENCIL) {
                    wgpu::LoadOp::Clear(request.stencil)
                } else {
                    wgpu::LoadOp::Load
                },
                store: wgpu::StoreOp::Store,
            }),
        });

        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("one-render clear"),
            color_attachments: &[color_attachment],
            depth_stencil_attachment: depth_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureHandle {
        let gpu = GpuTarget::new(&self.device, desc, "one-render target");
        self.textures.insert(gpu)
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        if let Some(gpu) = self.textures.remove(texture) {
            gpu.texture.destroy();
        }
        if self.target.is_some_and(|t| t.texture == texture) {
            self.target = None;
        }
    }

    fn texture_desc(&self, texture: TextureHandle) -> Option<TextureDesc> {
        self.textures.get(texture).map(|t| t.desc)
    }

    fn bind_target(&mut self, target: Option<RenderTarget>) {
        self.target = target;
    }

    fn current_target(&self) -> Option<RenderTarget> {
        self.target
    }

    fn copy_color_buffer(&mut self, dst: TextureHandle) {
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("one-render frame"),
            })
        });
        let Some((src, layer)) = Self::resolve_target(&self.screen, &self.textures, self.target)
        else {
            return;
        };
        let Some(dst) = self.textures.get(dst) else {
            log::warn!("WgpuBackend::copy_color_buffer: destination texture not found");
            return;
        };
        if src.desc.format != dst.desc.format {
            log::warn!(
                "WgpuBackend::copy_color_buffer: format mismatch {:?} -> {:?}",
                src.desc.format,
                dst.desc.format
            );
            return;
        }

        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &src.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: layer,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &dst.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: src.desc.width.min(dst.desc.width),
                height: src.desc.height.min(dst.desc.height),
                depth_or_array_layers: 1,
            },
        );
    }

    fn blit_to_screen(&mut self, texture: TextureHandle, viewport: Viewport) {
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("one-render frame"),
            })
        });
        let Some(src) = self.textures.get(texture) else {
            log::warn!("WgpuBackend::blit_to_screen: texture not found");
            return;
        };
        if src.desc.format != self.screen.desc.format || src.desc.kind != TextureKind::Texture2D {
            log::warn!("WgpuBackend::blit_to_screen: only 2D textures in the screen format can be shown");
            return;
        }

        let x = viewport.x.max(0) as u32;
        let y = viewport.y.max(0) as u32;
        let width = src
            .desc
            .width
            .min(self.screen.desc.width.saturating_sub(x));
        let height = src
            .desc
            .height
            .min(self.screen.desc.height.saturating_sub(y));
        if width == 0 || height == 0 {
            return;
        }

        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &src.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &self.screen.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x, y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn draw(&mut self, call: &DrawCall) {
        let Some(mut draw_encoder) = self.draw_encoder.take() else {
            log::trace!("WgpuBackend::draw: no draw encoder installed, skipping {:?}", call.mesh);
            return;
        };

        self.encoder();
        if let (Some(encoder), Some((gpu, layer))) = (
            self.encoder.as_mut(),
            Self::resolve_target(&self.screen, &self.textures, self.target),
        ) {
            let (color, depth) = gpu.attachments(layer);
            let mut frame = WgpuFrame {
                device: &self.device,
                queue: &self.queue,
                encoder,
                color,
                depth,
                viewport: self.viewport,
                state: &self.state,
            };
            draw_encoder.encode(&mut frame, call);
        }

        self.draw_encoder = Some(draw_encoder);
    }

    fn timer_queries_supported(&self) -> bool {
        self.timers.is_some()
    }

    fn begin_timer_query(&mut self, slot: usize) {
        if slot >= MAX_TIMER_QUERIES || self.timers.is_none() {
            return;
        }
        self.encoder();
        if let (Some(timers), Some(encoder)) = (self.timers.as_mut(), self.encoder.as_mut()) {
            encoder.write_timestamp(&timers.set, (slot * 2) as u32);
        }
    }

    fn end_timer_query(&mut self, slot: usize) {
        if slot >= MAX_TIMER_QUERIES || self.timers.is_none() {
            return;
        }
        self.encoder();
        if let (Some(timers), Some(encoder)) = (self.timers.as_mut(), self.encoder.as_mut()) {
            encoder.write_timestamp(&timers.set, (slot * 2 + 1) as u32);
            timers.written[slot] = true;
        }
    }

    fn timer_query_result(&mut self, slot: usize) -> QueryStatus {
        let Some(timers) = self.timers.as_mut() else {
            return QueryStatus::Unsupported;
        };
        timers.collect();
        match timers.results.get(slot).copied().flatten() {
            Some(ms) => QueryStatus::Ready(ms),
            None => QueryStatus::Pending,
        }
    }

    fn end_frame(&mut self) {
        let mut encoder = self.encoder.take().unwrap_or_else(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("one-render frame"),
                })
        });

        let mut start_map = false;
        if let Some(timers) = self.timers.as_mut()
            && !timers.mapping
            && timers.written.iter().any(|w| *w)
        {
            let count = (MAX_TIMER_QUERIES * 2) as u32;
            encoder.resolve_query_set(&timers.set, 0..count, &timers.resolve, 0);
            encoder.copy_buffer_to_buffer(
                &timers.resolve,
                0,
                &timers.readback,
                0,
                timers.readback.size(),
            );
            timers.in_flight = timers.written;
            timers.results = [None; MAX_TIMER_QUERIES];
            start_map = true;
        }
        if let Some(timers) = self.timers.as_mut() {
            timers.written = [false; MAX_TIMER_QUERIES];
        }

        self.queue.submit(Some(encoder.finish()));

        if start_map && let Some(timers) = self.timers.as_mut() {
            let state = Arc::clone(&timers.map_state);
            timers.mapping = true;
            timers
                .readback
                .slice(..)
                .map_async(wgpu::MapMode::Read, move |result| {
                    *state.lock() = Some(result.is_ok());
                });
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
