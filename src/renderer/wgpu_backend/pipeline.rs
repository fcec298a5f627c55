//! Render pipelines for sprites, immediate geometry and stencil masks.
//!
//! One content pipeline per blend mode tests the stencil against the current
//! mask depth. Two color-less pipelines raise and lower the stencil inside a
//! mask shape.

use wgpu::{
    BindGroupLayout, BlendComponent, BlendFactor, BlendOperation, BlendState, Device,
    RenderPipeline, StencilFaceState, StencilOperation, TextureFormat, VertexAttribute,
    VertexBufferLayout, VertexFormat, VertexStepMode,
};

use crate::renderer::vertex::VERTEX_SIZE;
use crate::types::BlendMode;

pub(super) const STENCIL_FORMAT: TextureFormat = TextureFormat::Stencil8;

/// Which pipeline a recorded draw uses.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(super) enum PipelineMode {
    Content(BlendMode),
    /// Increment the stencil where the mask shape covers the current level.
    MaskPush,
    /// Decrement it again when the masked range ends.
    MaskPop,
}

pub(super) struct Pipelines {
    pub(super) uniform_layout: BindGroupLayout,
    pub(super) texture_layout: BindGroupLayout,
    content: [RenderPipeline; BlendMode::ALL.len()],
    mask_push: RenderPipeline,
    mask_pop: RenderPipeline,
}

impl Pipelines {
    pub(super) fn new(device: &Device, format: TextureFormat) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Sprite Batch Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shader.wgsl").into()),
        });

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Viewport Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Sprite Texture Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Sprite Batch Pipeline Layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            immediate_size: 0,
        });

        let build = |label: &str, mode: PipelineMode| {
            let (blend, write_mask, stencil_pass) = match mode {
                PipelineMode::Content(blend) => (
                    Some(blend_state(blend)),
                    wgpu::ColorWrites::ALL,
                    StencilOperation::Keep,
                ),
                PipelineMode::MaskPush => (
                    None,
                    wgpu::ColorWrites::empty(),
                    StencilOperation::IncrementClamp,
                ),
                PipelineMode::MaskPop => (
                    None,
                    wgpu::ColorWrites::empty(),
                    StencilOperation::DecrementClamp,
                ),
            };
            let face = StencilFaceState {
                compare: wgpu::CompareFunction::Equal,
                fail_op: StencilOperation::Keep,
                depth_fail_op: StencilOperation::Keep,
                pass_op: stencil_pass,
            };

            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    buffers: &[vertex_layout()],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend,
                        write_mask,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: STENCIL_FORMAT,
                    depth_write_enabled: false,
                    depth_compare: wgpu::CompareFunction::Always,
                    stencil: wgpu::StencilState {
                        front: face,
                        back: face,
                        read_mask: 0xFF,
                        write_mask: if matches!(mode, PipelineMode::Content(_)) {
                            0x00
                        } else {
                            0xFF
                        },
                    },
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            })
        };

        let content = BlendMode::ALL.map(|blend| {
            let label = format!("Sprite Pipeline ({blend:?})");
            build(&label, PipelineMode::Content(blend))
        });
        let mask_push = build("Mask Push Pipeline", PipelineMode::MaskPush);
        let mask_pop = build("Mask Pop Pipeline", PipelineMode::MaskPop);

        Self {
            uniform_layout,
            texture_layout,
            content,
            mask_push,
            mask_pop,
        }
    }

    pub(super) fn get(&self, mode: PipelineMode) -> &RenderPipeline {
        match mode {
            PipelineMode::Content(blend) => &self.content[blend as usize],
            PipelineMode::MaskPush => &self.mask_push,
            PipelineMode::MaskPop => &self.mask_pop,
        }
    }
}

/// Vertex colors and textures are blended as premultiplied alpha.
fn blend_state(mode: BlendMode) -> BlendState {
    let component = |src_factor, dst_factor| BlendComponent {
        src_factor,
        dst_factor,
        operation: BlendOperation::Add,
    };
    let alpha = component(BlendFactor::One, BlendFactor::OneMinusSrcAlpha);
    let color = match mode {
        BlendMode::Normal => component(BlendFactor::One, BlendFactor::OneMinusSrcAlpha),
        BlendMode::Add => component(BlendFactor::One, BlendFactor::One),
        BlendMode::Multiply => component(BlendFactor::Dst, BlendFactor::OneMinusSrcAlpha),
        BlendMode::Screen => component(BlendFactor::One, BlendFactor::OneMinusSrc),
    };
    BlendState { color, alpha }
}

fn vertex_layout() -> VertexBufferLayout<'static> {
    VertexBufferLayout {
        array_stride: VERTEX_SIZE as u64,
        step_mode: VertexStepMode::Vertex,
        attributes: &[
            // position (world pixels)
            VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: VertexFormat::Float32x2,
            },
            // uv
            VertexAttribute {
                offset: 8,
                shader_location: 1,
                format: VertexFormat::Float32x2,
            },
            // premultiplied color
            VertexAttribute {
                offset: 16,
                shader_location: 2,
                format: VertexFormat::Unorm8x4,
            },
        ],
    }
}
