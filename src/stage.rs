//! The scene container tying the tree, the sequencer and a backend together.
//!
//! Every structural edit goes through [`Stage`] so the draw list is updated
//! incrementally as it happens: nodes reachable from the root are sequenced
//! the moment they are attached and taken out the moment they are detached.

use std::collections::HashMap;

use crate::config::RendererConfig;
use crate::error::{SceneError, SceneResult};
use crate::renderer::{BatchKey, BatchSequencer, DirtyFlags, FrameRenderer, FrameReport, GpuBackend};
use crate::scene::{
    Graphics, MaskLink, Mesh, NodeId, NodeKind, SceneTree, Sprite, TilingSprite,
};
use crate::texture::{TextureId, TextureRegistry};
use crate::transform::Transform;
use crate::types::{BlendMode, Color, Rect};

pub struct Stage<B: GpuBackend> {
    tree: SceneTree,
    root: NodeId,
    sequencer: BatchSequencer,
    renderer: FrameRenderer,
    textures: TextureRegistry,
    backend: B,
    config: RendererConfig,
    /// Mask shape -> the node it masks.
    masks: HashMap<NodeId, NodeId>,
}

impl<B: GpuBackend> Stage<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, RendererConfig::default())
    }

    pub fn with_config(mut backend: B, config: RendererConfig) -> Self {
        let max_leaves = config.leaf_limit(backend.max_vertices_per_draw());
        backend.set_clear_color(config.clear_color);
        backend.set_viewport(config.viewport.0, config.viewport.1);

        let mut tree = SceneTree::new();
        let root = tree.register(NodeKind::Container);
        log::debug!("Stage created, {} sprites per batch", max_leaves);

        Self {
            tree,
            root,
            sequencer: BatchSequencer::new(
                max_leaves,
                config.initial_batch_capacity,
                config.pool_limit,
            ),
            renderer: FrameRenderer::new(),
            textures: TextureRegistry::new(),
            backend,
            config,
            masks: HashMap::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn tree(&self) -> &SceneTree {
        &self.tree
    }

    pub fn sequencer(&self) -> &BatchSequencer {
        &self.sequencer
    }

    pub fn renderer(&self) -> &FrameRenderer {
        &self.renderer
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn textures(&self) -> &TextureRegistry {
        &self.textures
    }

    pub fn textures_mut(&mut self) -> &mut TextureRegistry {
        &mut self.textures
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    // Node creation. New nodes are detached until added under the root.

    pub fn create_container(&mut self) -> NodeId {
        self.tree.register(NodeKind::Container)
    }

    pub fn create_sprite(&mut self, sprite: Sprite) -> NodeId {
        self.tree.register(NodeKind::Sprite(sprite))
    }

    pub fn create_tiling_sprite(&mut self, tiling: TilingSprite) -> NodeId {
        self.tree.register(NodeKind::TilingSprite(tiling))
    }

    pub fn create_mesh(&mut self, mesh: Mesh) -> NodeId {
        self.tree.register(NodeKind::Mesh(mesh))
    }

    pub fn create_graphics(&mut self, graphics: Graphics) -> NodeId {
        self.tree.register(NodeKind::Graphics(graphics))
    }

    /// True when `node` is reachable from the root.
    pub fn is_on_stage(&self, node: NodeId) -> bool {
        self.tree.contains(node) && self.tree.is_ancestor_or_self(self.root, node)
    }

    /// A live node that is not a mask marker.
    fn scene_node(&self, node: NodeId) -> SceneResult<&NodeKind> {
        let entry = self.tree.checked(node)?;
        if entry.kind.is_marker() {
            return Err(SceneError::MarkerMisuse(node));
        }
        Ok(&entry.kind)
    }

    // Tree edits

    /// Append `child` to `parent`'s children, moving it if it has a parent.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> SceneResult<()> {
        let len = self.tree.children(parent).len();
        let index = if self.tree.parent(child) == Some(parent) {
            len - 1
        } else {
            len
        };
        self.add_child_at(parent, child, index)
    }

    /// Insert `child` at `index` among `parent`'s children.
    ///
    /// The index counts the other children, so moving a node within the same
    /// parent places it at `index` of the resulting list.
    pub fn add_child_at(&mut self, parent: NodeId, child: NodeId, index: usize) -> SceneResult<()> {
        self.scene_node(parent)?;
        self.scene_node(child)?;
        if child == self.root {
            return Err(SceneError::RootReparent);
        }
        if self.tree.is_ancestor_or_self(child, parent) {
            return Err(SceneError::CycleDetected { parent, child });
        }
        let siblings = self.tree.children(parent);
        let len = siblings.len() - usize::from(siblings.contains(&child));
        if index > len {
            return Err(SceneError::IndexOutOfBounds { index, len });
        }

        self.detach_subtree(child)?;
        self.tree.attach(parent, child, index);
        if self.is_on_stage(parent) {
            self.sequence_subtree(child)?;
            self.mark_subtree_dirty(child, DirtyFlags::ATTRIBUTES);
        }
        Ok(())
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> SceneResult<()> {
        self.scene_node(parent)?;
        self.scene_node(child)?;
        if self.tree.parent(child) != Some(parent) {
            return Err(SceneError::NotAChild { parent, child });
        }
        self.detach_subtree(child)
    }

    /// Detach `node` from its parent; a no-op for a detached node.
    pub fn remove_from_parent(&mut self, node: NodeId) -> SceneResult<()> {
        self.scene_node(node)?;
        if node == self.root {
            return Err(SceneError::RootReparent);
        }
        self.detach_subtree(node)
    }

    /// Detach `node` and free it along with its whole subtree.
    ///
    /// Masks applied by destroyed shapes to surviving nodes are cleared.
    pub fn destroy(&mut self, node: NodeId) -> SceneResult<()> {
        self.scene_node(node)?;
        if node == self.root {
            return Err(SceneError::RootReparent);
        }

        let mut doomed = Vec::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            doomed.push(id);
            stack.extend(self.tree.children(id).iter().rev());
        }

        for &id in &doomed {
            if let Some(&target) = self.masks.get(&id) {
                if !doomed.contains(&target) {
                    self.clear_mask(target)?;
                }
            }
        }
        self.detach_subtree(node)?;

        for &id in &doomed {
            if let Some(link) = self.tree.get(id).and_then(|n| n.mask) {
                self.masks.remove(&link.shape);
                if let Some(shape) = self.tree.get_mut(link.shape) {
                    shape.renderable = true;
                }
                self.tree.unregister(link.begin);
                self.tree.unregister(link.end);
            }
            self.tree.unregister(id);
        }
        log::debug!("Destroyed {} nodes", doomed.len());
        Ok(())
    }

    /// Take `node` out of the sequencer (when on stage) and out of its parent.
    fn detach_subtree(&mut self, node: NodeId) -> SceneResult<()> {
        if self.tree.parent(node).is_none() {
            return Ok(());
        }
        if self.is_on_stage(node) {
            self.unsequence_subtree(node)?;
        }
        self.tree.detach(node);
        Ok(())
    }

    /// Insert every drawable entry of `node`'s run, in draw order.
    fn sequence_subtree(&mut self, node: NodeId) -> SceneResult<()> {
        let run: Vec<NodeId> = self.tree.draw_order(node).collect();
        for id in run {
            if self.tree.kind(id).is_some_and(NodeKind::is_sequenced_kind)
                && !self.tree.is_sequenced(id)
            {
                self.sequencer.insert(&mut self.tree, id)?;
            }
        }
        Ok(())
    }

    fn unsequence_subtree(&mut self, node: NodeId) -> SceneResult<()> {
        let run: Vec<NodeId> = self.tree.draw_order(node).collect();
        for id in run {
            if self.tree.is_sequenced(id) {
                self.sequencer.remove(&mut self.tree, id)?;
            }
        }
        Ok(())
    }

    fn mark_subtree_dirty(&mut self, node: NodeId, flags: DirtyFlags) {
        let run: Vec<NodeId> = self.tree.draw_order(node).collect();
        for id in run {
            self.sequencer.mark_leaf_dirty(&self.tree, id, flags);
        }
    }

    // Masks

    /// Clip `target` and its subtree to the shapes of `shape`.
    ///
    /// The shape stops drawing on its own while it masks. A shape masks one
    /// node at a time; reusing it moves the mask.
    pub fn set_mask(&mut self, target: NodeId, shape: NodeId) -> SceneResult<()> {
        self.scene_node(target)?;
        if !matches!(self.scene_node(shape)?, NodeKind::Graphics(_)) {
            return Err(SceneError::NotAMaskShape(shape));
        }
        if self.tree.is_ancestor_or_self(shape, target) {
            return Err(SceneError::MaskIsTarget(shape));
        }

        self.clear_mask(target)?;
        if let Some(&previous) = self.masks.get(&shape) {
            self.clear_mask(previous)?;
        }

        let begin = self.tree.register(NodeKind::MaskBegin { mask: shape, target });
        let end = self.tree.register(NodeKind::MaskEnd { mask: shape, target });
        self.tree
            .wrap_with_markers(target, MaskLink { shape, begin, end });
        if self.is_on_stage(target) {
            self.sequencer.insert(&mut self.tree, begin)?;
            self.sequencer.insert(&mut self.tree, end)?;
        }

        if let Some(entry) = self.tree.get_mut(shape) {
            entry.renderable = false;
        }
        self.masks.insert(shape, target);
        log::debug!("Masked {:?} with {:?}", target, shape);
        Ok(())
    }

    /// Remove `target`'s mask, if any, and let the shape draw again.
    pub fn clear_mask(&mut self, target: NodeId) -> SceneResult<()> {
        self.scene_node(target)?;
        let Some(link) = self.tree.get(target).and_then(|n| n.mask) else {
            return Ok(());
        };
        for marker in [link.begin, link.end] {
            if self.tree.is_sequenced(marker) {
                self.sequencer.remove(&mut self.tree, marker)?;
            }
        }
        self.tree.unwrap_markers(target);
        self.tree.unregister(link.begin);
        self.tree.unregister(link.end);

        if let Some(entry) = self.tree.get_mut(link.shape) {
            entry.renderable = true;
        }
        self.masks.remove(&link.shape);
        Ok(())
    }

    pub fn mask_of(&self, target: NodeId) -> Option<NodeId> {
        self.tree.mask_of(target)
    }

    // Sprite edits

    fn sprite_mut(&mut self, node: NodeId) -> SceneResult<&mut Sprite> {
        self.tree.checked(node)?;
        match self.tree.kind_mut(node) {
            Some(NodeKind::Sprite(sprite)) => Ok(sprite),
            _ => Err(SceneError::NotASprite(node)),
        }
    }

    /// Change a sprite's identity, moving it between batches when it is drawn.
    fn rekey_sprite(&mut self, node: NodeId, edit: impl FnOnce(&mut Sprite)) -> SceneResult<()> {
        let sprite = self.sprite_mut(node)?;
        let before = BatchKey::of(sprite);
        let mut edited = sprite.clone();
        edit(&mut edited);
        if BatchKey::of(&edited) == before {
            *sprite = edited;
            self.sequencer
                .mark_leaf_dirty(&self.tree, node, DirtyFlags::ATTRIBUTES);
            return Ok(());
        }

        let sequenced = self.tree.is_sequenced(node);
        if sequenced {
            self.sequencer.remove(&mut self.tree, node)?;
        }
        *self.sprite_mut(node)? = edited;
        if sequenced {
            self.sequencer.insert(&mut self.tree, node)?;
        }
        Ok(())
    }

    pub fn set_texture(&mut self, node: NodeId, texture: TextureId, frame: Rect) -> SceneResult<()> {
        self.rekey_sprite(node, |sprite| {
            sprite.texture = texture;
            sprite.frame = frame;
        })
    }

    pub fn set_blend_mode(&mut self, node: NodeId, blend: BlendMode) -> SceneResult<()> {
        self.rekey_sprite(node, |sprite| sprite.blend = blend)
    }

    /// Point a sprite at another region of its texture.
    pub fn set_frame(&mut self, node: NodeId, frame: Rect) -> SceneResult<()> {
        self.sprite_mut(node)?.frame = frame;
        self.sequencer
            .mark_leaf_dirty(&self.tree, node, DirtyFlags::UVS | DirtyFlags::GEOMETRY);
        Ok(())
    }

    pub fn set_tint(&mut self, node: NodeId, tint: Color) -> SceneResult<()> {
        self.sprite_mut(node)?.tint = tint;
        self.sequencer
            .mark_leaf_dirty(&self.tree, node, DirtyFlags::COLORS);
        Ok(())
    }

    // Properties inherited by the subtree

    pub fn set_visible(&mut self, node: NodeId, visible: bool) -> SceneResult<()> {
        self.scene_node(node)?;
        if let Some(entry) = self.tree.get_mut(node) {
            entry.visible = visible;
        }
        self.mark_subtree_dirty(node, DirtyFlags::GEOMETRY | DirtyFlags::COLORS);
        Ok(())
    }

    pub fn set_alpha(&mut self, node: NodeId, alpha: f32) -> SceneResult<()> {
        self.scene_node(node)?;
        if let Some(entry) = self.tree.get_mut(node) {
            entry.alpha = alpha.clamp(0.0, 1.0);
        }
        self.mark_subtree_dirty(node, DirtyFlags::COLORS);
        Ok(())
    }

    pub fn set_transform(&mut self, node: NodeId, transform: Transform) -> SceneResult<()> {
        self.scene_node(node)?;
        if let Some(entry) = self.tree.get_mut(node) {
            entry.local = transform;
        }
        self.mark_subtree_dirty(node, DirtyFlags::GEOMETRY);
        Ok(())
    }

    // Rendering

    /// Recompute world state for everything on stage.
    pub fn update_transforms(&mut self) {
        self.tree.update_world(self.root);
    }

    pub fn render_all(&mut self) -> FrameReport {
        self.update_transforms();
        self.renderer.render_all(
            &self.tree,
            &mut self.sequencer,
            &mut self.textures,
            &mut self.backend,
        )
    }

    /// Draw only `node`'s subtree, without its own mask.
    pub fn render_subtree(&mut self, node: NodeId) -> SceneResult<FrameReport> {
        self.scene_node(node)?;
        self.update_transforms();
        Ok(self.renderer.render_subtree(
            &self.tree,
            &mut self.sequencer,
            &mut self.textures,
            &mut self.backend,
            node,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{RecordingBackend, Unit};

    fn stage() -> Stage<RecordingBackend> {
        Stage::new(RecordingBackend::new())
    }

    fn white_sprite() -> Sprite {
        Sprite::new(TextureId::WHITE, Rect::from_size(1.0, 1.0))
    }

    #[test]
    fn test_detached_nodes_are_not_sequenced() {
        let mut stage = stage();
        let group = stage.create_container();
        let sprite = stage.create_sprite(white_sprite());
        stage.add_child(group, sprite).unwrap();
        assert!(stage.sequencer().is_empty());

        stage.add_child(stage.root(), group).unwrap();
        assert_eq!(stage.sequencer().units().len(), 1);
        assert!(stage.tree().is_sequenced(sprite));
    }

    #[test]
    fn test_add_child_validation() {
        let mut stage = stage();
        let root = stage.root();
        let a = stage.create_container();
        let b = stage.create_container();
        stage.add_child(root, a).unwrap();
        stage.add_child(a, b).unwrap();

        assert_eq!(
            stage.add_child(b, a),
            Err(SceneError::CycleDetected { parent: b, child: a })
        );
        assert_eq!(stage.add_child(a, root), Err(SceneError::RootReparent));
        assert_eq!(
            stage.add_child_at(root, b, 5),
            Err(SceneError::IndexOutOfBounds { index: 5, len: 1 })
        );
        assert_eq!(
            stage.remove_child(root, b),
            Err(SceneError::NotAChild { parent: root, child: b })
        );
    }

    #[test]
    fn test_add_child_moves_existing_child() {
        let mut stage = stage();
        let root = stage.root();
        let a = stage.create_container();
        let b = stage.create_container();
        let s = stage.create_sprite(white_sprite());
        stage.add_child(root, a).unwrap();
        stage.add_child(root, b).unwrap();
        stage.add_child(a, s).unwrap();

        stage.add_child(b, s).unwrap();
        assert_eq!(stage.tree().parent(s), Some(b));
        assert!(stage.tree().children(a).is_empty());
        assert_eq!(stage.sequencer().leaf_sequence(stage.tree()), vec![s]);

        stage.add_child(b, s).unwrap();
        assert_eq!(stage.tree().children(b), &[s]);
    }

    #[test]
    fn test_stale_ids_are_rejected() {
        let mut stage = stage();
        let s = stage.create_sprite(white_sprite());
        stage.destroy(s).unwrap();
        assert_eq!(
            stage.add_child(stage.root(), s),
            Err(SceneError::StaleNode(s))
        );
        let reused = stage.create_container();
        assert!(stage.tree().contains(reused));
        assert!(!stage.tree().contains(s));
    }

    #[test]
    fn test_set_texture_moves_between_batches() {
        let mut stage = stage();
        let root = stage.root();
        let other = stage.textures_mut().reserve(4, 4);
        let a = stage.create_sprite(white_sprite());
        let b = stage.create_sprite(white_sprite());
        let c = stage.create_sprite(white_sprite());
        for s in [a, b, c] {
            stage.add_child(root, s).unwrap();
        }
        assert_eq!(stage.sequencer().units().len(), 1);

        stage.set_texture(b, other, Rect::from_size(4.0, 4.0)).unwrap();
        assert_eq!(stage.sequencer().units().len(), 3);
        assert_eq!(stage.sequencer().leaf_sequence(stage.tree()), vec![a, b, c]);

        stage
            .set_texture(b, TextureId::WHITE, Rect::from_size(1.0, 1.0))
            .unwrap();
        assert_eq!(stage.sequencer().units().len(), 1);
    }

    #[test]
    fn test_sprite_edits_reject_other_kinds() {
        let mut stage = stage();
        let g = stage.create_graphics(Graphics::new(Color::WHITE));
        assert_eq!(
            stage.set_blend_mode(g, BlendMode::Add),
            Err(SceneError::NotASprite(g))
        );
    }

    #[test]
    fn test_set_and_clear_mask() {
        let mut stage = stage();
        let root = stage.root();
        let target = stage.create_sprite(white_sprite());
        let shape = stage.create_graphics(Graphics::new(Color::WHITE).rect(Rect::from_size(2.0, 2.0)));
        stage.add_child(root, target).unwrap();
        stage.add_child(root, shape).unwrap();

        stage.set_mask(target, shape).unwrap();
        assert!(!stage.tree().is_renderable(shape));
        assert!(matches!(stage.sequencer().units()[0], Unit::MaskBegin(_)));
        assert!(matches!(stage.sequencer().units()[2], Unit::MaskEnd(_)));
        assert_eq!(stage.sequencer().units().len(), 4);

        stage.clear_mask(target).unwrap();
        assert!(stage.tree().is_renderable(shape));
        assert_eq!(stage.mask_of(target), None);
        assert_eq!(stage.sequencer().units().len(), 2);
    }

    #[test]
    fn test_mask_rejects_invalid_shapes() {
        let mut stage = stage();
        let parent = stage.create_graphics(Graphics::new(Color::WHITE));
        let child = stage.create_container();
        let sprite = stage.create_sprite(white_sprite());
        stage.add_child(parent, child).unwrap();

        assert_eq!(stage.set_mask(child, parent), Err(SceneError::MaskIsTarget(parent)));
        assert_eq!(stage.set_mask(child, sprite), Err(SceneError::NotAMaskShape(sprite)));
    }

    #[test]
    fn test_destroying_shape_clears_mask() {
        let mut stage = stage();
        let root = stage.root();
        let target = stage.create_sprite(white_sprite());
        let shape = stage.create_graphics(Graphics::new(Color::WHITE));
        stage.add_child(root, target).unwrap();
        stage.set_mask(target, shape).unwrap();

        stage.destroy(shape).unwrap();
        assert_eq!(stage.mask_of(target), None);
        assert_eq!(stage.sequencer().leaf_sequence(stage.tree()), vec![target]);
    }

    #[test]
    fn test_destroy_masked_subtree_frees_markers() {
        let mut stage = stage();
        let root = stage.root();
        let group = stage.create_container();
        let s = stage.create_sprite(white_sprite());
        let shape = stage.create_graphics(Graphics::new(Color::WHITE));
        stage.add_child(root, group).unwrap();
        stage.add_child(group, s).unwrap();
        stage.set_mask(group, shape).unwrap();
        let before = stage.tree().node_count();

        stage.destroy(group).unwrap();
        assert!(stage.sequencer().is_empty());
        assert_eq!(stage.tree().node_count(), before - 4);
        assert!(stage.tree().is_renderable(shape));
    }
}
