//! Node payloads and per-node bookkeeping.

use crate::renderer::BatchId;
use crate::texture::TextureId;
use crate::transform::Transform;
use crate::types::{BlendMode, Color, Rect};

use super::NodeId;

/// A textured quad; the only batchable renderable.
#[derive(Debug, Clone, PartialEq)]
pub struct Sprite {
    pub texture: TextureId,
    /// Source rectangle in texture pixels.
    pub frame: Rect,
    /// Normalized pivot within the frame: (0,0) top-left, (1,1) bottom-right.
    pub anchor: (f32, f32),
    pub tint: Color,
    pub blend: BlendMode,
}

impl Sprite {
    pub fn new(texture: TextureId, frame: Rect) -> Self {
        Self {
            texture,
            frame,
            anchor: (0.0, 0.0),
            tint: Color::WHITE,
            blend: BlendMode::Normal,
        }
    }

    pub fn with_anchor(mut self, x: f32, y: f32) -> Self {
        self.anchor = (x, y);
        self
    }

    pub fn with_tint(mut self, tint: Color) -> Self {
        self.tint = tint;
        self
    }

    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }
}

/// A rectangle filled by repeating a texture.
#[derive(Debug, Clone, PartialEq)]
pub struct TilingSprite {
    pub texture: TextureId,
    pub width: f32,
    pub height: f32,
    pub tile_offset: (f32, f32),
    pub tile_scale: (f32, f32),
    pub tint: Color,
    pub blend: BlendMode,
}

impl TilingSprite {
    pub fn new(texture: TextureId, width: f32, height: f32) -> Self {
        Self {
            texture,
            width,
            height,
            tile_offset: (0.0, 0.0),
            tile_scale: (1.0, 1.0),
            tint: Color::WHITE,
            blend: BlendMode::Normal,
        }
    }
}

/// Arbitrary indexed triangles over one texture.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub texture: TextureId,
    pub vertices: Vec<[f32; 2]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u16>,
    pub tint: Color,
    pub blend: BlendMode,
}

impl Mesh {
    pub fn new(
        texture: TextureId,
        vertices: Vec<[f32; 2]>,
        uvs: Vec<[f32; 2]>,
        indices: Vec<u16>,
    ) -> Self {
        Self {
            texture,
            vertices,
            uvs,
            indices,
            tint: Color::WHITE,
            blend: BlendMode::Normal,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Rect(Rect),
    Circle { cx: f32, cy: f32, radius: f32 },
    /// Convex polygon, triangulated as a fan.
    Polygon(Vec<[f32; 2]>),
}

/// Solid vector shapes. Also the only kind usable as a mask.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Graphics {
    pub fill: Color,
    pub shapes: Vec<Shape>,
    pub blend: BlendMode,
}

impl Graphics {
    pub fn new(fill: Color) -> Self {
        Self {
            fill,
            shapes: Vec::new(),
            blend: BlendMode::Normal,
        }
    }

    pub fn rect(mut self, rect: Rect) -> Self {
        self.shapes.push(Shape::Rect(rect));
        self
    }

    pub fn circle(mut self, cx: f32, cy: f32, radius: f32) -> Self {
        self.shapes.push(Shape::Circle { cx, cy, radius });
        self
    }

    pub fn polygon(mut self, points: Vec<[f32; 2]>) -> Self {
        self.shapes.push(Shape::Polygon(points));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Groups children; draws nothing itself.
    Container,
    Sprite(Sprite),
    TilingSprite(TilingSprite),
    Mesh(Mesh),
    Graphics(Graphics),
    /// Draw-order sentinel opening a masked range.
    MaskBegin { mask: NodeId, target: NodeId },
    /// Draw-order sentinel closing a masked range.
    MaskEnd { mask: NodeId, target: NodeId },
}

impl NodeKind {
    pub fn is_batchable(&self) -> bool {
        matches!(self, NodeKind::Sprite(_))
    }

    pub fn is_marker(&self) -> bool {
        matches!(self, NodeKind::MaskBegin { .. } | NodeKind::MaskEnd { .. })
    }

    /// Whether the node occupies a place in the sequencer's unit list.
    pub fn is_sequenced_kind(&self) -> bool {
        !matches!(self, NodeKind::Container)
    }

    pub fn as_sprite(&self) -> Option<&Sprite> {
        match self {
            NodeKind::Sprite(sprite) => Some(sprite),
            _ => None,
        }
    }
}

/// Membership of a sprite in a batch: owning batch plus batch-local links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct BatchLink {
    pub(crate) batch: Option<BatchId>,
    pub(crate) prev: Option<NodeId>,
    pub(crate) next: Option<NodeId>,
}

/// Mask shape applied to a node, with the markers wrapping its range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MaskLink {
    pub(crate) shape: NodeId,
    pub(crate) begin: NodeId,
    pub(crate) end: NodeId,
}

/// A node in the scene arena.
///
/// Carries two independent linkages: the tree (`parent`/`children`) and the
/// draw order (`prev`/`next`, bounded per subtree by `first`/`last`).
#[derive(Debug)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,

    pub(crate) visible: bool,
    pub(crate) renderable: bool,
    pub(crate) mask: Option<MaskLink>,

    pub(crate) prev: Option<NodeId>,
    pub(crate) next: Option<NodeId>,
    pub(crate) first: NodeId,
    pub(crate) last: NodeId,

    pub(crate) local: Transform,
    pub(crate) alpha: f32,
    pub(crate) world: Transform,
    pub(crate) world_alpha: f32,
    pub(crate) world_visible: bool,

    /// Present in the sequencer's unit list (directly or through a batch).
    pub(crate) sequenced: bool,
    pub(crate) link: BatchLink,

    /// Back-pointer to sparse array index (for swap-remove fixup)
    pub(crate) sparse_index: u32,
}

impl Node {
    pub(crate) fn new(kind: NodeKind, id: NodeId) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            visible: true,
            renderable: true,
            mask: None,
            prev: None,
            next: None,
            first: id,
            last: id,
            local: Transform::IDENTITY,
            alpha: 1.0,
            world: Transform::IDENTITY,
            world_alpha: 1.0,
            world_visible: true,
            sequenced: false,
            link: BatchLink::default(),
            sparse_index: id.index,
        }
    }
}
