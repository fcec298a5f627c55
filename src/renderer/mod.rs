//! Incremental sprite batching and per-frame drawing.
//!
//! [`BatchSequencer`] keeps the draw list in sync with the scene as nodes are
//! added and removed; [`FrameRenderer`] walks that list once per frame
//! against any [`GpuBackend`].

mod backend;
pub mod batch;
mod frame;
pub mod recording;
pub mod sequencer;
pub mod special;
pub mod vertex;
pub mod wgpu_backend;

pub use backend::{
    BackendError, BufferHandle, BufferKind, DrawCall, GpuBackend, ImmediateGeometry,
};
pub use batch::{Batch, BatchId, BatchKey, BatchStore, DirtyFlags};
pub use frame::{FrameRenderer, FrameReport};
pub use recording::RecordingBackend;
pub use sequencer::{BatchSequencer, Unit};
pub use vertex::SpriteVertex;
pub use wgpu_backend::WgpuBackend;
