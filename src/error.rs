//! Structural errors raised by scene mutation and sequencing.
//!
//! These indicate a bug in the caller (a stale id, a cyclic reparent, a node
//! sequenced twice). They are returned before any list is modified.

use thiserror::Error;

use crate::renderer::BatchKey;
use crate::scene::NodeId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    #[error("node {0:?} is not alive in this scene")]
    StaleNode(NodeId),
    #[error("node {child:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeId, child: NodeId },
    #[error("adding {child:?} under {parent:?} would create a cycle")]
    CycleDetected { parent: NodeId, child: NodeId },
    #[error("the stage root cannot be reparented or destroyed")]
    RootReparent,
    #[error("child index {index} out of bounds for {len} children")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("node {0:?} is already present in the sequencer")]
    AlreadySequenced(NodeId),
    #[error("node {0:?} is not present in the sequencer")]
    NotSequenced(NodeId),
    #[error("cannot merge batch {left:?} with batch {right:?}")]
    IncompatibleMerge { left: BatchKey, right: BatchKey },
    #[error("node {0:?} cannot mask itself or one of its ancestors")]
    MaskIsTarget(NodeId),
    #[error("node {0:?} is not a sprite")]
    NotASprite(NodeId),
    #[error("node {0:?} is not a graphics node and cannot be used as a mask")]
    NotAMaskShape(NodeId),
    #[error("mask marker {0:?} cannot be used as a scene node")]
    MarkerMisuse(NodeId),
}

pub type SceneResult<T> = Result<T, SceneError>;
