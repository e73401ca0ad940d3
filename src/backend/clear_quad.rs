//! Clears restricted to a rectangle.
//!
//! `LoadOp::Clear` always covers the whole attachment, so a clear that must
//! stay inside a camera viewport is drawn instead: a full-viewport triangle
//! with depth compare `Always`, stencil `Replace` and the color write mask
//! taken from the clear flags, clipped by the scissor rectangle.

use std::borrow::Cow;

use rustc_hash::FxHashMap;
use wgpu::util::DeviceExt;

use super::{ClearFlags, ClearRequest, Viewport};

const CLEAR_SHADER: &str = r"
struct ClearValues {
    color: vec4<f32>,
    depth: f32,
};

@group(0) @binding(0) var<uniform> clear_values: ClearValues;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, clear_values.depth, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return clear_values.color;
}
";

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ClearUniforms {
    color: [f32; 4],
    depth: f32,
    _pad: [f32; 3],
}

/// Scissor rectangle in wgpu framebuffer coordinates (origin top-left).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScissorRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ScissorRect {
    /// Converts a lower-left origin rectangle into a scissor clamped to a
    /// `width` x `height` target. `None` when nothing is left.
    pub(crate) fn from_viewport(rect: Viewport, width: u32, height: u32) -> Option<Self> {
        let (w, h) = (i64::from(width), i64::from(height));
        let left = i64::from(rect.x).clamp(0, w);
        let right = (i64::from(rect.x) + i64::from(rect.width)).clamp(0, w);
        let bottom = i64::from(rect.y).clamp(0, h);
        let top = (i64::from(rect.y) + i64::from(rect.height)).clamp(0, h);
        if right <= left || top <= bottom {
            return None;
        }
        Some(Self {
            x: left as u32,
            y: (h - top) as u32,
            width: (right - left) as u32,
            height: (top - bottom) as u32,
        })
    }

    pub(crate) fn covers(&self, width: u32, height: u32) -> bool {
        self.x == 0 && self.y == 0 && self.width == width && self.height == height
    }
}

/// Attachments of the target being cleared.
pub(crate) struct ClearTarget<'a> {
    pub color: Option<(&'a wgpu::TextureView, wgpu::TextureFormat)>,
    pub depth: Option<(&'a wgpu::TextureView, wgpu::TextureFormat)>,
    pub has_stencil: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    color: Option<wgpu::TextureFormat>,
    depth: Option<wgpu::TextureFormat>,
    flags: u8,
}

pub(crate) struct ClearQuad {
    module: wgpu::ShaderModule,
    layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: FxHashMap<PipelineKey, wgpu::RenderPipeline>,
}

impl ClearQuad {
    pub(crate) fn new(device: &wgpu::Device) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("one-render clear shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(CLEAR_SHADER)),
        });
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("one-render clear layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("one-render clear pipeline layout"),
            bind_group_layouts: &[Some(&layout)],
            immediate_size: 0,
        });
        Self {
            module,
            layout,
            pipeline_layout,
            pipelines: FxHashMap::default(),
        }
    }

    fn pipeline(&mut self, device: &wgpu::Device, key: PipelineKey) -> &wgpu::RenderPipeline {
        let module = &self.module;
        let pipeline_layout = &self.pipeline_layout;
        self.pipelines.entry(key).or_insert_with(|| {
            let flags = ClearFlags::from_bits_truncate(key.flags);
            let write_mask = if flags.contains(ClearFlags::COLOR) {
                wgpu::ColorWrites::ALL
            } else {
                wgpu::ColorWrites::empty()
            };
            let targets = [key.color.map(|format| wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask,
            })];

            let stencil_face = wgpu::StencilFaceState {
                compare: wgpu::CompareFunction::Always,
                fail_op: wgpu::StencilOperation::Keep,
                depth_fail_op: wgpu::StencilOperation::Keep,
                pass_op: wgpu::StencilOperation::Replace,
            };
            let stencil = if flags.contains(ClearFlags::STENCIL) {
                wgpu::StencilState {
                    front: stencil_face,
                    back: stencil_face,
                    read_mask: 0xFF,
                    write_mask: 0xFF,
                }
            } else {
                wgpu::StencilState::default()
            };

            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("one-render clear pipeline"),
                layout: Some(pipeline_layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: Some("vs_main"),
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                // Depth-only targets have no color output.
                fragment: key.color.is_some().then(|| wgpu::FragmentState {
                    module,
                    entry_point: Some("fs_main"),
                    targets: &targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: key.depth.map(|format| wgpu::DepthStencilState {
                    format,
                    depth_write_enabled: Some(flags.contains(ClearFlags::DEPTH)),
                    depth_compare: Some(wgpu::CompareFunction::Always),
                    stencil,
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            })
        })
    }

    /// Records a clear of `request.flags` limited to `scissor`.
    pub(crate) fn encode(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        target: &ClearTarget<'_>,
        request: &ClearRequest,
        scissor: ScissorRect,
    ) {
        let mut flags = request.flags;
        if target.color.is_none() {
            flags.remove(ClearFlags::COLOR);
        }
        if target.depth.is_none() {
            flags.remove(ClearFlags::DEPTH | ClearFlags::STENCIL);
        }
        if !target.has_stencil {
            flags.remove(ClearFlags::STENCIL);
        }
        if flags.is_empty() {
            return;
        }

        let key = PipelineKey {
            color: target.color.map(|(_, format)| format),
            depth: target.depth.map(|(_, format)| format),
            flags: flags.bits(),
        };

        // One buffer per clear: queued writes would all land before the
        // encoder runs and every clear in the frame would see the last value.
        let uniforms = ClearUniforms {
            color: request.color.to_array(),
            depth: request.depth,
            _pad: [0.0; 3],
        };
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("one-render clear values"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("one-render clear bind group"),
            layout: &self.layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        let pipeline = self.pipeline(device, key);

        let color_attachment = target.color.map(|(view, _)| wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        });
        let depth_attachment = target.depth.map(|(view, _)| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: target.has_stencil.then_some(wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            }),
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("one-render scissored clear"),
            color_attachments: &[color_attachment],
            depth_stencil_attachment: depth_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        pass.set_scissor_rect(scissor.x, scissor.y, scissor.width, scissor.height);
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_stencil_reference(request.stencil);
        pass.draw(0..3, 0..1);
    }
}
