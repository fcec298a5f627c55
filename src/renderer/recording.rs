//! Headless backend that records every call.
//!
//! Keeps buffer contents so tests can inspect uploaded vertices, validates
//! draws against what was actually created and uploaded, and can simulate
//! context loss, busy buffers and one-shot failures.

use std::collections::{HashMap, HashSet};

use image::RgbaImage;

use crate::texture::TextureId;

use super::backend::{
    BackendError, BufferHandle, BufferKind, DrawCall, GpuBackend, ImmediateGeometry,
};
use super::vertex::{SpriteVertex, VERTEX_SIZE};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct UploadRecord {
    pub buffer: BufferHandle,
    pub byte_offset: usize,
    pub len: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    BeginFrame,
    EndFrame,
    CreateBuffer {
        buffer: BufferHandle,
        kind: BufferKind,
        size: usize,
    },
    DestroyBuffer(BufferHandle),
    Upload(UploadRecord),
    UploadTexture(TextureId),
    Draw(DrawCall),
    DrawImmediate {
        texture: TextureId,
        index_count: usize,
        repeat: bool,
    },
    BeginMask {
        index_count: usize,
    },
    EndMask {
        index_count: usize,
    },
}

/// Backend operations that can be made to fail once.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Operation {
    CreateBuffer,
    Upload,
    Draw,
    DrawImmediate,
    BeginMask,
}

struct BufferState {
    kind: BufferKind,
    data: Vec<u8>,
}

pub struct RecordingBackend {
    commands: Vec<Command>,
    buffers: HashMap<BufferHandle, BufferState>,
    textures: HashSet<TextureId>,
    next_handle: u64,
    max_vertices: usize,
    context_lost: bool,
    busy: HashSet<BufferHandle>,
    failures: HashMap<Operation, BackendError>,
    stencil_depth: usize,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            buffers: HashMap::new(),
            textures: HashSet::new(),
            next_handle: 1,
            max_vertices: u16::MAX as usize + 1,
            context_lost: false,
            busy: HashSet::new(),
            failures: HashMap::new(),
            stencil_depth: 0,
        }
    }

    /// Limit the vertex range of a single draw.
    pub fn with_max_vertices(mut self, max_vertices: usize) -> Self {
        self.max_vertices = max_vertices;
        self
    }

    /// Drop every GPU object and fail all calls until [`Self::restore_context`].
    pub fn lose_context(&mut self) {
        log::warn!("RecordingBackend: context lost");
        self.context_lost = true;
        self.buffers.clear();
        self.textures.clear();
        self.busy.clear();
        self.stencil_depth = 0;
    }

    pub fn restore_context(&mut self) {
        log::info!("RecordingBackend: context restored");
        self.context_lost = false;
    }

    pub fn set_busy(&mut self, buffer: BufferHandle, busy: bool) {
        if busy {
            self.busy.insert(buffer);
        } else {
            self.busy.remove(&buffer);
        }
    }

    /// Make the next call of `operation` fail with `error`.
    pub fn fail_next(&mut self, operation: Operation, error: BackendError) {
        self.failures.insert(operation, error);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn clear_log(&mut self) {
        self.commands.clear();
    }

    pub fn draw_calls(&self) -> Vec<DrawCall> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::Draw(call) => Some(*call),
                _ => None,
            })
            .collect()
    }

    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::Upload(record) => Some(*record),
                _ => None,
            })
            .collect()
    }

    /// Commands that put pixels or stencil state on screen, in order.
    pub fn draw_sequence(&self) -> Vec<Command> {
        self.commands
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    Command::Draw(_)
                        | Command::DrawImmediate { .. }
                        | Command::BeginMask { .. }
                        | Command::EndMask { .. }
                )
            })
            .cloned()
            .collect()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffer_kind(&self, buffer: BufferHandle) -> Option<BufferKind> {
        self.buffers.get(&buffer).map(|b| b.kind)
    }

    /// Vertex buffer contents decoded back into vertices.
    pub fn vertices(&self, buffer: BufferHandle) -> Vec<SpriteVertex> {
        match self.buffers.get(&buffer) {
            Some(state) if state.kind == BufferKind::Vertex => {
                bytemuck::pod_collect_to_vec(&state.data)
            }
            _ => Vec::new(),
        }
    }

    pub fn indices(&self, buffer: BufferHandle) -> Vec<u16> {
        match self.buffers.get(&buffer) {
            Some(state) if state.kind == BufferKind::Index => {
                bytemuck::pod_collect_to_vec(&state.data)
            }
            _ => Vec::new(),
        }
    }

    pub fn stencil_depth(&self) -> usize {
        self.stencil_depth
    }

    fn check(&mut self, operation: Option<Operation>) -> Result<(), BackendError> {
        if self.context_lost {
            return Err(BackendError::ContextLost);
        }
        match operation.and_then(|op| self.failures.remove(&op)) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn check_texture(&self, texture: TextureId) -> Result<(), BackendError> {
        if self.textures.contains(&texture) {
            Ok(())
        } else {
            Err(BackendError::UnknownTexture(texture))
        }
    }

    fn check_immediate(&self, geometry: &ImmediateGeometry) -> Result<(), BackendError> {
        if geometry.vertices.len() > self.max_vertices {
            return Err(BackendError::IndexRangeExceeded {
                required: geometry.vertices.len(),
                max: self.max_vertices,
            });
        }
        self.check_texture(geometry.texture)
    }
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for RecordingBackend {
    fn max_vertices_per_draw(&self) -> usize {
        self.max_vertices
    }

    fn is_ready(&self) -> bool {
        !self.context_lost
    }

    fn begin_frame(&mut self) -> Result<(), BackendError> {
        self.check(None)?;
        self.stencil_depth = 0;
        self.commands.push(Command::BeginFrame);
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), BackendError> {
        self.check(None)?;
        self.commands.push(Command::EndFrame);
        Ok(())
    }

    fn create_buffer(
        &mut self,
        kind: BufferKind,
        size_bytes: usize,
    ) -> Result<BufferHandle, BackendError> {
        self.check(Some(Operation::CreateBuffer))?;
        let buffer = BufferHandle::new(self.next_handle);
        self.next_handle += 1;
        self.buffers.insert(
            buffer,
            BufferState {
                kind,
                data: vec![0; size_bytes],
            },
        );
        self.commands.push(Command::CreateBuffer {
            buffer,
            kind,
            size: size_bytes,
        });
        Ok(buffer)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer).is_some() {
            self.busy.remove(&buffer);
            self.commands.push(Command::DestroyBuffer(buffer));
        }
    }

    fn upload_sub_range(
        &mut self,
        buffer: BufferHandle,
        byte_offset: usize,
        data: &[u8],
    ) -> Result<(), BackendError> {
        self.check(Some(Operation::Upload))?;
        let state = self
            .buffers
            .get_mut(&buffer)
            .ok_or(BackendError::InvalidBuffer(buffer))?;
        let end = byte_offset + data.len();
        if end > state.data.len() {
            return Err(BackendError::UploadFailed {
                offset: byte_offset,
                len: data.len(),
                reason: format!("buffer holds {} bytes", state.data.len()),
            });
        }
        state.data[byte_offset..end].copy_from_slice(data);
        self.commands.push(Command::Upload(UploadRecord {
            buffer,
            byte_offset,
            len: data.len(),
        }));
        Ok(())
    }

    fn is_buffer_busy(&self, buffer: BufferHandle) -> bool {
        self.busy.contains(&buffer)
    }

    fn upload_texture(&mut self, texture: TextureId, _image: &RgbaImage) -> Result<(), BackendError> {
        self.check(None)?;
        self.textures.insert(texture);
        self.commands.push(Command::UploadTexture(texture));
        Ok(())
    }

    fn draw_indexed(&mut self, call: &DrawCall) -> Result<(), BackendError> {
        self.check(Some(Operation::Draw))?;
        let index_bytes = self
            .buffers
            .get(&call.index_buffer)
            .filter(|b| b.kind == BufferKind::Index)
            .map(|b| b.data.len())
            .ok_or(BackendError::InvalidBuffer(call.index_buffer))?;
        let vertex_bytes = self
            .buffers
            .get(&call.vertex_buffer)
            .filter(|b| b.kind == BufferKind::Vertex)
            .map(|b| b.data.len())
            .ok_or(BackendError::InvalidBuffer(call.vertex_buffer))?;

        let end = (call.start_index + call.index_count) as usize;
        if end * std::mem::size_of::<u16>() > index_bytes {
            return Err(BackendError::IndexRangeExceeded {
                required: end,
                max: index_bytes / std::mem::size_of::<u16>(),
            });
        }
        let vertex_count = vertex_bytes / VERTEX_SIZE;
        if vertex_count > self.max_vertices {
            return Err(BackendError::IndexRangeExceeded {
                required: vertex_count,
                max: self.max_vertices,
            });
        }
        self.check_texture(call.texture)?;
        self.commands.push(Command::Draw(*call));
        Ok(())
    }

    fn draw_immediate(&mut self, geometry: &ImmediateGeometry) -> Result<(), BackendError> {
        self.check(Some(Operation::DrawImmediate))?;
        self.check_immediate(geometry)?;
        self.commands.push(Command::DrawImmediate {
            texture: geometry.texture,
            index_count: geometry.indices.len(),
            repeat: geometry.repeat,
        });
        Ok(())
    }

    fn begin_mask(&mut self, shape: &ImmediateGeometry) -> Result<(), BackendError> {
        self.check(Some(Operation::BeginMask))?;
        self.check_immediate(shape)?;
        self.stencil_depth += 1;
        self.commands.push(Command::BeginMask {
            index_count: shape.indices.len(),
        });
        Ok(())
    }

    fn end_mask(&mut self, shape: &ImmediateGeometry) -> Result<(), BackendError> {
        self.check(None)?;
        self.stencil_depth = self.stencil_depth.saturating_sub(1);
        self.commands.push(Command::EndMask {
            index_count: shape.indices.len(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_writes_buffer_contents() {
        let mut backend = RecordingBackend::new();
        let buffer = backend.create_buffer(BufferKind::Index, 12).unwrap();
        backend
            .upload_sub_range(buffer, 4, bytemuck::cast_slice(&[7u16, 8u16]))
            .unwrap();
        assert_eq!(backend.indices(buffer), vec![0, 0, 7, 8, 0, 0]);

        let err = backend.upload_sub_range(buffer, 10, &[0; 4]).unwrap_err();
        assert!(matches!(err, BackendError::UploadFailed { .. }));
    }

    #[test]
    fn test_context_loss_drops_everything() {
        let mut backend = RecordingBackend::new();
        let buffer = backend.create_buffer(BufferKind::Vertex, 80).unwrap();
        backend.lose_context();
        assert!(!backend.is_ready());
        assert_eq!(backend.live_buffers(), 0);
        assert_eq!(
            backend.upload_sub_range(buffer, 0, &[0; 4]),
            Err(BackendError::ContextLost)
        );

        backend.restore_context();
        assert!(backend.is_ready());
        assert_eq!(
            backend.upload_sub_range(buffer, 0, &[0; 4]),
            Err(BackendError::InvalidBuffer(buffer))
        );
    }

    #[test]
    fn test_one_shot_failure() {
        let mut backend = RecordingBackend::new();
        backend.fail_next(Operation::CreateBuffer, BackendError::OutOfMemory);
        assert_eq!(
            backend.create_buffer(BufferKind::Vertex, 4),
            Err(BackendError::OutOfMemory)
        );
        assert!(backend.create_buffer(BufferKind::Vertex, 4).is_ok());
    }

    #[test]
    fn test_draw_requires_uploaded_texture() {
        let mut backend = RecordingBackend::new();
        let vertex_buffer = backend.create_buffer(BufferKind::Vertex, 80).unwrap();
        let index_buffer = backend.create_buffer(BufferKind::Index, 12).unwrap();
        let call = DrawCall {
            vertex_buffer,
            index_buffer,
            start_index: 0,
            index_count: 6,
            texture: TextureId::WHITE,
            blend: Default::default(),
        };
        assert_eq!(
            backend.draw_indexed(&call),
            Err(BackendError::UnknownTexture(TextureId::WHITE))
        );
        backend
            .upload_texture(TextureId::WHITE, &RgbaImage::new(1, 1))
            .unwrap();
        assert!(backend.draw_indexed(&call).is_ok());
        assert_eq!(backend.draw_calls(), vec![call]);
    }
}
