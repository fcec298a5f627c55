//! Scene graph storage: the node arena, tree links and the draw-order list.

mod linked;
mod node;
mod tree;

pub use node::{Graphics, Mesh, Node, NodeKind, Shape, Sprite, TilingSprite};
pub(crate) use node::{BatchLink, MaskLink};
pub use tree::{DrawOrderIter, NodeId, SceneTree};
