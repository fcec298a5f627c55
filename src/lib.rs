//! Incremental draw-call batching for 2D scene trees.
//!
//! A [`Stage`](stage::Stage) owns a scene tree whose nodes are kept in one
//! doubly linked draw-order list. Sprites that share a texture and blend
//! mode are grouped into batches drawn with a single indexed call, and the
//! batch list is patched in place as nodes are added, moved, masked or
//! removed instead of being rebuilt every frame.
//!
//! ```no_run
//! use stagebatch::prelude::*;
//!
//! let mut stage = Stage::new(RecordingBackend::new());
//! let sprite = stage.create_sprite(Sprite::new(TextureId::WHITE, Rect::from_size(1.0, 1.0)));
//! stage.add_child(stage.root(), sprite).unwrap();
//! let report = stage.render_all();
//! assert_eq!(report.draw_calls, 1);
//! ```

pub mod config;
pub mod error;
pub mod render_stats;
pub mod renderer;
pub mod scene;
pub mod stage;
pub mod texture;
pub mod transform;
pub mod types;

pub mod prelude {
    pub use crate::config::RendererConfig;
    pub use crate::error::{SceneError, SceneResult};
    pub use crate::renderer::{
        BackendError, FrameReport, GpuBackend, RecordingBackend, Unit, WgpuBackend,
    };
    pub use crate::scene::{Graphics, Mesh, NodeId, Shape, Sprite, TilingSprite};
    pub use crate::stage::Stage;
    pub use crate::texture::{TextureId, TextureRegistry};
    pub use crate::transform::Transform;
    pub use crate::types::{BlendMode, Color, Rect};
}
