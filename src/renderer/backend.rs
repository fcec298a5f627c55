//! The GPU backend contract.
//!
//! The renderer never talks to a graphics API directly. Everything it needs
//! (buffers, sub-range uploads, indexed draws, stencil masks) goes through
//! [`GpuBackend`], implemented by the wgpu backend and by the recording
//! backend used headless.

use image::RgbaImage;
use thiserror::Error;

use crate::texture::TextureId;
use crate::types::{BlendMode, Color};

use super::vertex::SpriteVertex;

/// Opaque handle to a backend-owned GPU buffer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct BufferHandle(u64);

impl BufferHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BufferKind {
    Vertex,
    Index,
}

/// One indexed draw over a range of a batch's buffers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DrawCall {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub start_index: u32,
    pub index_count: u32,
    pub texture: TextureId,
    pub blend: BlendMode,
}

/// Geometry built on the CPU for a single draw: specials and mask shapes.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct ImmediateGeometry {
    pub vertices: Vec<SpriteVertex>,
    pub indices: Vec<u16>,
    pub texture: TextureId,
    pub blend: BlendMode,
    /// Sample with wrap-around addressing (tiling sprites).
    pub repeat: bool,
}

impl ImmediateGeometry {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("graphics context lost")]
    ContextLost,
    #[error("out of GPU memory")]
    OutOfMemory,
    #[error("buffer {0:?} does not exist")]
    InvalidBuffer(BufferHandle),
    #[error("texture {0:?} has not been uploaded")]
    UnknownTexture(TextureId),
    #[error("draw needs {required} vertices, backend supports {max}")]
    IndexRangeExceeded { required: usize, max: usize },
    #[error("upload of {len} bytes at offset {offset} failed: {reason}")]
    UploadFailed {
        offset: usize,
        len: usize,
        reason: String,
    },
    #[error("failed to create {kind:?} buffer of {size} bytes")]
    BufferCreationFailed { kind: BufferKind, size: usize },
    #[error("no usable GPU adapter: {0}")]
    AdapterUnavailable(String),
}

impl BackendError {
    /// Errors that invalidate every GPU resource and end the frame.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::ContextLost | BackendError::OutOfMemory)
    }
}

/// Minimal GPU surface the batch renderer consumes.
pub trait GpuBackend {
    /// Largest vertex count addressable by one indexed draw.
    fn max_vertices_per_draw(&self) -> usize {
        u16::MAX as usize + 1
    }

    /// False while the context is lost and not yet restored.
    fn is_ready(&self) -> bool;

    fn set_clear_color(&mut self, _color: Color) {}

    /// Resize the render target, in pixels.
    fn set_viewport(&mut self, _width: u32, _height: u32) {}

    fn begin_frame(&mut self) -> Result<(), BackendError>;

    fn end_frame(&mut self) -> Result<(), BackendError>;

    fn create_buffer(&mut self, kind: BufferKind, size_bytes: usize)
        -> Result<BufferHandle, BackendError>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn upload_sub_range(
        &mut self,
        buffer: BufferHandle,
        byte_offset: usize,
        data: &[u8],
    ) -> Result<(), BackendError>;

    /// True while in-flight GPU work still reads the buffer.
    fn is_buffer_busy(&self, _buffer: BufferHandle) -> bool {
        false
    }

    fn upload_texture(&mut self, texture: TextureId, image: &RgbaImage)
        -> Result<(), BackendError>;

    fn draw_indexed(&mut self, call: &DrawCall) -> Result<(), BackendError>;

    fn draw_immediate(&mut self, geometry: &ImmediateGeometry) -> Result<(), BackendError>;

    /// Push a stencil level covering `shape`.
    fn begin_mask(&mut self, shape: &ImmediateGeometry) -> Result<(), BackendError>;

    /// Pop the stencil level pushed for `shape`.
    fn end_mask(&mut self, shape: &ImmediateGeometry) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BackendError::ContextLost.is_transient());
        assert!(BackendError::OutOfMemory.is_transient());
        assert!(!BackendError::InvalidBuffer(BufferHandle::new(1)).is_transient());
        assert!(!BackendError::UnknownTexture(TextureId::WHITE).is_transient());
    }
}
