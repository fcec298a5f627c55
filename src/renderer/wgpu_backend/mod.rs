//! wgpu implementation of [`GpuBackend`].
//!
//! Draw calls are recorded during the frame and replayed into a single
//! render pass at `end_frame`, targeting an offscreen color texture with a
//! `Stencil8` attachment for masks. Immediate geometry for the frame is
//! packed into one transient vertex/index buffer pair.

mod pipeline;

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::RgbaImage;
use wgpu::util::DeviceExt;
use wgpu::{BindGroup, Buffer, BufferUsages, Device, Extent3d, Queue, TextureFormat};

use crate::texture::TextureId;
use crate::types::{BlendMode, Color};

use self::pipeline::{PipelineMode, Pipelines, STENCIL_FORMAT};
use super::backend::{
    BackendError, BufferHandle, BufferKind, DrawCall, GpuBackend, ImmediateGeometry,
};
use super::vertex::SpriteVertex;

pub const TARGET_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Viewport uniform, padded to 16 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct ViewportUniform {
    size: [f32; 2],
    _pad: [f32; 2],
}

struct GpuTexture {
    #[allow(dead_code)] // Kept alive for the bind groups
    texture: wgpu::Texture,
    clamp_group: BindGroup,
    repeat_group: BindGroup,
}

struct RenderTarget {
    #[allow(dead_code)] // Kept alive for the view
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    stencil_view: wgpu::TextureView,
    width: u32,
    height: u32,
}

enum Recorded {
    Indexed {
        vertex: BufferHandle,
        index: BufferHandle,
        indices: Range<u32>,
        texture: TextureId,
        blend: BlendMode,
        stencil: u32,
    },
    Immediate {
        mode: PipelineMode,
        indices: Range<u32>,
        base_vertex: i32,
        texture: TextureId,
        repeat: bool,
        stencil: u32,
    },
}

pub struct WgpuBackend {
    device: Arc<Device>,
    queue: Arc<Queue>,
    pipelines: Pipelines,
    uniform_buffer: Buffer,
    uniform_group: BindGroup,
    clamp_sampler: wgpu::Sampler,
    repeat_sampler: wgpu::Sampler,
    target: RenderTarget,
    clear_color: Color,

    buffers: HashMap<BufferHandle, Buffer>,
    next_buffer: u64,
    textures: HashMap<TextureId, GpuTexture>,

    recorded: Vec<Recorded>,
    scratch_vertices: Vec<SpriteVertex>,
    scratch_indices: Vec<u16>,
    stencil_depth: u32,

    lost: Arc<AtomicBool>,
}

impl WgpuBackend {
    /// Create a backend on a device without a window.
    pub fn headless(width: u32, height: u32) -> Result<Self, BackendError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| BackendError::AdapterUnavailable(e.to_string()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Stagebatch Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::downlevel_defaults(),
            memory_hints: wgpu::MemoryHints::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| BackendError::AdapterUnavailable(e.to_string()))?;

        log::info!("Using adapter: {}", adapter.get_info().name);
        Ok(Self::new(Arc::new(device), Arc::new(queue), width, height))
    }

    /// Create a backend on an existing device.
    pub fn new(device: Arc<Device>, queue: Arc<Queue>, width: u32, height: u32) -> Self {
        let lost = Arc::new(AtomicBool::new(false));
        let lost_flag = lost.clone();
        device.set_device_lost_callback(move |reason, message| {
            log::warn!("GPU device lost ({:?}): {}", reason, message);
            lost_flag.store(true, Ordering::SeqCst);
        });

        let pipelines = Pipelines::new(&device, TARGET_FORMAT);

        let uniform = ViewportUniform {
            size: [width.max(1) as f32, height.max(1) as f32],
            _pad: [0.0; 2],
        };
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Viewport Uniform Buffer"),
            contents: bytemuck::cast_slice(&[uniform]),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        });
        let uniform_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Viewport Bind Group"),
            layout: &pipelines.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let sampler = |label, address_mode| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: address_mode,
                address_mode_v: address_mode,
                address_mode_w: address_mode,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                mipmap_filter: wgpu::MipmapFilterMode::Nearest,
                ..Default::default()
            })
        };
        let clamp_sampler = sampler("Clamp Sampler", wgpu::AddressMode::ClampToEdge);
        let repeat_sampler = sampler("Repeat Sampler", wgpu::AddressMode::Repeat);

        let target = create_target(&device, width, height);

        Self {
            device,
            queue,
            pipelines,
            uniform_buffer,
            uniform_group,
            clamp_sampler,
            repeat_sampler,
            target,
            clear_color: Color::TRANSPARENT,
            buffers: HashMap::new(),
            next_buffer: 1,
            textures: HashMap::new(),
            recorded: Vec::new(),
            scratch_vertices: Vec::new(),
            scratch_indices: Vec::new(),
            stencil_depth: 0,
            lost,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.target.width, self.target.height)
    }

    /// Recreate the render target and update the viewport.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 || (width, height) == self.size() {
            return;
        }
        self.target = create_target(&self.device, width, height);
        let uniform = ViewportUniform {
            size: [width as f32, height as f32],
            _pad: [0.0; 2],
        };
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniform]));
    }

    /// The offscreen color texture frames are rendered into.
    pub fn target_view(&self) -> &wgpu::TextureView {
        &self.target.color_view
    }

    fn check_lost(&self) -> Result<(), BackendError> {
        if self.lost.load(Ordering::SeqCst) {
            Err(BackendError::ContextLost)
        } else {
            Ok(())
        }
    }

    fn push_immediate(
        &mut self,
        geometry: &ImmediateGeometry,
        mode: PipelineMode,
        stencil: u32,
    ) -> Result<(), BackendError> {
        self.check_lost()?;
        if geometry.vertices.len() > self.max_vertices_per_draw() {
            return Err(BackendError::IndexRangeExceeded {
                required: geometry.vertices.len(),
                max: self.max_vertices_per_draw(),
            });
        }
        if !self.textures.contains_key(&geometry.texture) {
            return Err(BackendError::UnknownTexture(geometry.texture));
        }
        let first_index = self.scratch_indices.len() as u32;
        let base_vertex = self.scratch_vertices.len() as i32;
        self.scratch_vertices.extend_from_slice(&geometry.vertices);
        self.scratch_indices.extend_from_slice(&geometry.indices);
        self.recorded.push(Recorded::Immediate {
            mode,
            indices: first_index..first_index + geometry.indices.len() as u32,
            base_vertex,
            texture: geometry.texture,
            repeat: geometry.repeat,
            stencil,
        });
        Ok(())
    }

    fn texture_group(&self, texture: TextureId, repeat: bool) -> Option<&BindGroup> {
        self.textures.get(&texture).map(|t| {
            if repeat {
                &t.repeat_group
            } else {
                &t.clamp_group
            }
        })
    }
}

fn create_target(device: &Device, width: u32, height: u32) -> RenderTarget {
    let size = Extent3d {
        width: width.max(1),
        height: height.max(1),
        depth_or_array_layers: 1,
    };
    let color = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Stage Color Target"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TARGET_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let stencil = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Stage Stencil Target"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: STENCIL_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    RenderTarget {
        color_view: color.create_view(&wgpu::TextureViewDescriptor::default()),
        stencil_view: stencil.create_view(&wgpu::TextureViewDescriptor::default()),
        color,
        width: size.width,
        height: size.height,
    }
}

/// `write_buffer` needs 4-byte aligned sizes.
fn aligned(size: usize) -> u64 {
    (size as u64).div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) * wgpu::COPY_BUFFER_ALIGNMENT
}

impl GpuBackend for WgpuBackend {
    fn max_vertices_per_draw(&self) -> usize {
        u16::MAX as usize + 1
    }

    fn is_ready(&self) -> bool {
        !self.lost.load(Ordering::SeqCst)
    }

    fn set_clear_color(&mut self, color: Color) {
        self.clear_color = color;
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.resize(width, height);
    }

    fn begin_frame(&mut self) -> Result<(), BackendError> {
        self.check_lost()?;
        self.recorded.clear();
        self.scratch_vertices.clear();
        self.scratch_indices.clear();
        self.stencil_depth = 0;
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), BackendError> {
        self.check_lost()?;

        let scratch_vertices = (!self.scratch_vertices.is_empty()).then(|| {
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Immediate Vertex Buffer"),
                    contents: bytemuck::cast_slice(&self.scratch_vertices),
                    usage: BufferUsages::VERTEX,
                })
        });
        let scratch_indices = (!self.scratch_indices.is_empty()).then(|| {
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Immediate Index Buffer"),
                    contents: bytemuck::cast_slice(&self.scratch_indices),
                    usage: BufferUsages::INDEX,
                })
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Stage Frame Encoder"),
            });
        {
            let clear = self.clear_color;
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Stage Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: clear.r as f64,
                            g: clear.g as f64,
                            b: clear.b as f64,
                            a: clear.a as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.target.stencil_view,
                    depth_ops: None,
                    stencil_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(0),
                        store: wgpu::StoreOp::Discard,
                    }),
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            pass.set_bind_group(0, &self.uniform_group, &[]);

            for command in &self.recorded {
                match command {
                    Recorded::Indexed {
                        vertex,
                        index,
                        indices,
                        texture,
                        blend,
                        stencil,
                    } => {
                        let (Some(vertex), Some(index), Some(group)) = (
                            self.buffers.get(vertex),
                            self.buffers.get(index),
                            self.texture_group(*texture, false),
                        ) else {
                            continue;
                        };
                        pass.set_pipeline(self.pipelines.get(PipelineMode::Content(*blend)));
                        pass.set_stencil_reference(*stencil);
                        pass.set_bind_group(1, group, &[]);
                        pass.set_vertex_buffer(0, vertex.slice(..));
                        pass.set_index_buffer(index.slice(..), wgpu::IndexFormat::Uint16);
                        pass.draw_indexed(indices.clone(), 0, 0..1);
                    }
                    Recorded::Immediate {
                        mode,
                        indices,
                        base_vertex,
                        texture,
                        repeat,
                        stencil,
                    } => {
                        let (Some(vertex), Some(index), Some(group)) = (
                            scratch_vertices.as_ref(),
                            scratch_indices.as_ref(),
                            self.texture_group(*texture, *repeat),
                        ) else {
                            continue;
                        };
                        pass.set_pipeline(self.pipelines.get(*mode));
                        pass.set_stencil_reference(*stencil);
                        pass.set_bind_group(1, group, &[]);
                        pass.set_vertex_buffer(0, vertex.slice(..));
                        pass.set_index_buffer(index.slice(..), wgpu::IndexFormat::Uint16);
                        pass.draw_indexed(indices.clone(), *base_vertex, 0..1);
                    }
                }
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        log::trace!("Submitted {} recorded draws", self.recorded.len());
        self.recorded.clear();
        Ok(())
    }

    fn create_buffer(
        &mut self,
        kind: BufferKind,
        size_bytes: usize,
    ) -> Result<BufferHandle, BackendError> {
        self.check_lost()?;
        let usage = match kind {
            BufferKind::Vertex => BufferUsages::VERTEX,
            BufferKind::Index => BufferUsages::INDEX,
        } | BufferUsages::COPY_DST;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(match kind {
                BufferKind::Vertex => "Batch Vertex Buffer",
                BufferKind::Index => "Batch Index Buffer",
            }),
            size: aligned(size_bytes),
            usage,
            mapped_at_creation: false,
        });
        let handle = BufferHandle::new(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(handle, buffer);
        Ok(handle)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(buffer) = self.buffers.remove(&buffer) {
            buffer.destroy();
        }
    }

    fn upload_sub_range(
        &mut self,
        buffer: BufferHandle,
        byte_offset: usize,
        data: &[u8],
    ) -> Result<(), BackendError> {
        self.check_lost()?;
        let target = self
            .buffers
            .get(&buffer)
            .ok_or(BackendError::InvalidBuffer(buffer))?;
        let end = byte_offset as u64 + aligned(data.len());
        if byte_offset as u64 % wgpu::COPY_BUFFER_ALIGNMENT != 0 || end > target.size() {
            return Err(BackendError::UploadFailed {
                offset: byte_offset,
                len: data.len(),
                reason: format!("unaligned or past the {}-byte buffer", target.size()),
            });
        }
        if data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT == 0 {
            self.queue.write_buffer(target, byte_offset as u64, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(aligned(data.len()) as usize, 0);
            self.queue.write_buffer(target, byte_offset as u64, &padded);
        }
        Ok(())
    }

    fn upload_texture(&mut self, texture: TextureId, image: &RgbaImage) -> Result<(), BackendError> {
        self.check_lost()?;
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(BackendError::UnknownTexture(texture));
        }
        let size = Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let gpu_texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Sprite Texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &gpu_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            image.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            size,
        );

        let view = gpu_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let group = |sampler: &wgpu::Sampler| {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Sprite Texture Bind Group"),
                layout: &self.pipelines.texture_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                ],
            })
        };
        let clamp_group = group(&self.clamp_sampler);
        let repeat_group = group(&self.repeat_sampler);

        self.textures.insert(
            texture,
            GpuTexture {
                texture: gpu_texture,
                clamp_group,
                repeat_group,
            },
        );
        log::debug!("Uploaded texture {:?} ({}x{})", texture, width, height);
        Ok(())
    }

    fn draw_indexed(&mut self, call: &DrawCall) -> Result<(), BackendError> {
        self.check_lost()?;
        if !self.buffers.contains_key(&call.vertex_buffer) {
            return Err(BackendError::InvalidBuffer(call.vertex_buffer));
        }
        let index_bytes = self
            .buffers
            .get(&call.index_buffer)
            .map(|buffer| buffer.size() as usize)
            .ok_or(BackendError::InvalidBuffer(call.index_buffer))?;
        let end = (call.start_index + call.index_count) as usize;
        if end * std::mem::size_of::<u16>() > index_bytes {
            return Err(BackendError::IndexRangeExceeded {
                required: end,
                max: index_bytes / std::mem::size_of::<u16>(),
            });
        }
        if !self.textures.contains_key(&call.texture) {
            return Err(BackendError::UnknownTexture(call.texture));
        }
        self.recorded.push(Recorded::Indexed {
            vertex: call.vertex_buffer,
            index: call.index_buffer,
            indices: call.start_index..call.start_index + call.index_count,
            texture: call.texture,
            blend: call.blend,
            stencil: self.stencil_depth,
        });
        Ok(())
    }

    fn draw_immediate(&mut self, geometry: &ImmediateGeometry) -> Result<(), BackendError> {
        self.push_immediate(
            geometry,
            PipelineMode::Content(geometry.blend),
            self.stencil_depth,
        )
    }

    fn begin_mask(&mut self, shape: &ImmediateGeometry) -> Result<(), BackendError> {
        self.push_immediate(shape, PipelineMode::MaskPush, self.stencil_depth)?;
        self.stencil_depth += 1;
        Ok(())
    }

    fn end_mask(&mut self, shape: &ImmediateGeometry) -> Result<(), BackendError> {
        self.push_immediate(shape, PipelineMode::MaskPop, self.stencil_depth)?;
        self.stencil_depth = self.stencil_depth.saturating_sub(1);
        Ok(())
    }
}
