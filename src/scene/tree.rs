//! Arena-based scene storage.
//!
//! Nodes live in a sparse-set arena with generational indices:
//!
//! - **Generational Indices**: `NodeId` carries index + generation so a stale
//!   id never aliases a node later allocated in the same slot.
//! - **Dense Storage**: nodes are stored contiguously for cache-friendly
//!   transform passes.
//! - **Swap-Remove**: O(1) removal without holes in the dense array.
//!
//! Both linkages of a node (tree parent/children and draw-order prev/next)
//! are plain `NodeId`s into this arena, so there are no ownership cycles.

use std::ops::{Index, IndexMut};

use crate::error::{SceneError, SceneResult};
use crate::transform::{Transform, TransformProvider};

use super::node::{Node, NodeKind};

/// Unique identifier for a node in the scene.
///
/// - `index`: Position in the sparse array (reusable after removal)
/// - `generation`: Version counter that increments when a slot is reused
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl NodeId {
    fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Combines generation (high bits) with index (low bits).
    pub fn as_u64(self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64)
    }
}

/// Entry in the sparse map, pointing to a dense array slot.
struct SparseEntry {
    dense_index: usize,
    generation: u32,
}

/// Scene storage: every live node, its tree links and its draw-order links.
pub struct SceneTree {
    dense: Vec<Node>,
    sparse: Vec<Option<SparseEntry>>,
    free_indices: Vec<u32>,
    /// Last generation handed out per sparse slot, kept across frees.
    generations: Vec<u32>,
}

impl SceneTree {
    pub fn new() -> Self {
        Self {
            dense: Vec::new(),
            sparse: Vec::new(),
            free_indices: Vec::new(),
            generations: Vec::new(),
        }
    }

    /// Allocate a detached node.
    pub(crate) fn register(&mut self, kind: NodeKind) -> NodeId {
        let (sparse_index, generation) = if let Some(idx) = self.free_indices.pop() {
            let generation = self.generations[idx as usize].wrapping_add(1);
            self.generations[idx as usize] = generation;
            (idx, generation)
        } else {
            let idx = self.sparse.len() as u32;
            self.sparse.push(None);
            self.generations.push(0);
            (idx, 0)
        };

        let id = NodeId::new(sparse_index, generation);
        let dense_index = self.dense.len();
        self.dense.push(Node::new(kind, id));
        self.sparse[sparse_index as usize] = Some(SparseEntry {
            dense_index,
            generation,
        });
        id
    }

    /// Free a node's slot. The caller must have detached it from both linkages.
    pub(crate) fn unregister(&mut self, id: NodeId) {
        let Some(dense_index) = self.dense_index(id) else {
            return;
        };
        let last_dense_index = self.dense.len() - 1;
        self.dense.swap_remove(dense_index);

        if dense_index != last_dense_index {
            let moved_sparse_idx = self.dense[dense_index].sparse_index;
            if let Some(ref mut entry) = self.sparse[moved_sparse_idx as usize] {
                entry.dense_index = dense_index;
            }
        }

        self.sparse[id.index as usize] = None;
        self.free_indices.push(id.index);
    }

    fn dense_index(&self, id: NodeId) -> Option<usize> {
        self.sparse
            .get(id.index as usize)
            .and_then(|e| e.as_ref())
            .filter(|e| e.generation == id.generation)
            .map(|e| e.dense_index)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.dense_index(id).is_some()
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.dense_index(id).map(|idx| &self.dense[idx])
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.dense_index(id).map(move |idx| &mut self.dense[idx])
    }

    /// Look up a node, reporting stale ids as a structural error.
    pub(crate) fn checked(&self, id: NodeId) -> SceneResult<&Node> {
        self.get(id).ok_or(SceneError::StaleNode(id))
    }

    pub fn node_count(&self) -> usize {
        self.dense.len()
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.get(id).map(|n| &n.kind)
    }

    pub(crate) fn kind_mut(&mut self, id: NodeId) -> Option<&mut NodeKind> {
        self.get_mut(id).map(|n| &mut n.kind)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Next node in draw order.
    pub fn draw_next(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.next)
    }

    /// Previous node in draw order.
    pub fn draw_prev(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.prev)
    }

    /// First draw-order entry of the node's subtree (itself or its mask-begin marker).
    pub fn first(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).map(|n| n.first)
    }

    /// Last draw-order entry of the node's subtree.
    pub fn last(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).map(|n| n.last)
    }

    pub fn is_visible(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(|n| n.visible)
    }

    pub fn is_renderable(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(|n| n.renderable)
    }

    pub fn mask_of(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.mask).map(|m| m.shape)
    }

    pub fn is_sequenced(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(|n| n.sequenced)
    }

    pub fn local_transform(&self, id: NodeId) -> Option<Transform> {
        self.get(id).map(|n| n.local)
    }

    /// True if `ancestor` is `node` or lies on its parent chain.
    pub fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Walk the node's subtree in draw order, markers included.
    pub fn draw_order(&self, id: NodeId) -> DrawOrderIter<'_> {
        match self.get(id) {
            Some(node) => DrawOrderIter::new(self, node.first, node.last),
            None => DrawOrderIter::empty(self),
        }
    }

    /// Walk an explicit inclusive draw-order range.
    pub(crate) fn draw_range(&self, first: NodeId, last: NodeId) -> DrawOrderIter<'_> {
        DrawOrderIter::new(self, first, last)
    }

    /// Recompute world transform, alpha and visibility for the subtree of `root`.
    ///
    /// Parents precede their children in draw order, so a single forward walk
    /// sees every parent's world state before its children need it.
    pub fn update_world(&mut self, root: NodeId) {
        let Some(node) = self.get(root) else { return };
        let (start, stop) = (node.first, node.last);
        let mut cursor = Some(start);

        while let Some(id) = cursor {
            let parent = self[id].parent;
            let (parent_world, parent_alpha, parent_visible) = match parent {
                Some(p) if id != root => {
                    let p = &self[p];
                    (p.world, p.world_alpha, p.world_visible)
                }
                _ => self.parent_world_state(id),
            };

            let node = &mut self[id];
            node.world = parent_world.then(&node.local);
            node.world_alpha = parent_alpha * node.alpha;
            node.world_visible = parent_visible && node.visible;

            if id == stop {
                break;
            }
            cursor = node.next;
        }
    }

    /// World state inherited from the parent chain, computed without caches.
    fn parent_world_state(&self, id: NodeId) -> (Transform, f32, bool) {
        match self.parent(id) {
            Some(parent) => self.compute_world(parent),
            None => (Transform::IDENTITY, 1.0, true),
        }
    }

    /// World transform, alpha and visibility of a node by walking its ancestors.
    ///
    /// Used for nodes outside the updated stage subtree, such as detached mask shapes.
    pub fn compute_world(&self, id: NodeId) -> (Transform, f32, bool) {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let Some(node) = self.get(node_id) else { break };
            chain.push(node_id);
            current = node.parent;
        }

        let mut world = Transform::IDENTITY;
        let mut alpha = 1.0;
        let mut visible = true;
        for node_id in chain.into_iter().rev() {
            let node = &self[node_id];
            world = world.then(&node.local);
            alpha *= node.alpha;
            visible &= node.visible;
        }
        (world, alpha, visible)
    }
}

impl Default for SceneTree {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<NodeId> for SceneTree {
    type Output = Node;

    /// Panics on a stale id; public entry points validate ids first.
    fn index(&self, id: NodeId) -> &Node {
        match self.dense_index(id) {
            Some(idx) => &self.dense[idx],
            None => panic!("stale NodeId {id:?}"),
        }
    }
}

impl IndexMut<NodeId> for SceneTree {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        match self.dense_index(id) {
            Some(idx) => &mut self.dense[idx],
            None => panic!("stale NodeId {id:?}"),
        }
    }
}

impl TransformProvider for SceneTree {
    fn world_transform(&self, node: NodeId) -> Transform {
        self.get(node).map(|n| n.world).unwrap_or_default()
    }

    fn world_alpha(&self, node: NodeId) -> f32 {
        self.get(node).map_or(0.0, |n| n.world_alpha)
    }

    fn world_visible(&self, node: NodeId) -> bool {
        self.get(node).is_some_and(|n| n.world_visible)
    }
}

/// Iterator over an inclusive draw-order range.
pub struct DrawOrderIter<'a> {
    tree: &'a SceneTree,
    cursor: Option<NodeId>,
    last: Option<NodeId>,
}

impl<'a> DrawOrderIter<'a> {
    fn new(tree: &'a SceneTree, first: NodeId, last: NodeId) -> Self {
        Self {
            tree,
            cursor: Some(first),
            last: Some(last),
        }
    }

    fn empty(tree: &'a SceneTree) -> Self {
        Self {
            tree,
            cursor: None,
            last: None,
        }
    }
}

impl Iterator for DrawOrderIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.cursor?;
        self.cursor = if Some(current) == self.last {
            None
        } else {
            self.tree.draw_next(current)
        };
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_unregister() {
        let mut tree = SceneTree::new();
        let id = tree.register(NodeKind::Container);
        assert!(tree.contains(id));
        assert_eq!(tree.first(id), Some(id));
        assert_eq!(tree.last(id), Some(id));
        assert_eq!(tree.draw_next(id), None);

        tree.unregister(id);
        assert!(!tree.contains(id));
    }

    #[test]
    fn test_generational_index() {
        let mut tree = SceneTree::new();
        let id1 = tree.register(NodeKind::Container);
        tree.unregister(id1);
        let id2 = tree.register(NodeKind::Container);

        assert!(!tree.contains(id1));
        assert!(tree.contains(id2));
        assert_eq!(id1.index, id2.index);
        assert_ne!(id1.generation, id2.generation);
    }

    #[test]
    fn test_generation_survives_repeated_reuse() {
        let mut tree = SceneTree::new();
        let id1 = tree.register(NodeKind::Container);
        tree.unregister(id1);
        let id2 = tree.register(NodeKind::Container);
        tree.unregister(id2);
        let id3 = tree.register(NodeKind::Container);

        assert!(!tree.contains(id1));
        assert!(!tree.contains(id2));
        assert_ne!(id1, id3);
    }

    #[test]
    fn test_swap_remove_fixup() {
        let mut tree = SceneTree::new();
        let id1 = tree.register(NodeKind::Container);
        let id2 = tree.register(NodeKind::Container);
        let id3 = tree.register(NodeKind::Container);

        tree.unregister(id1);

        assert!(!tree.contains(id1));
        assert_eq!(tree.first(id2), Some(id2));
        assert_eq!(tree.first(id3), Some(id3));
        assert_eq!(tree.node_count(), 2);
    }

    #[test]
    fn test_world_update_composes_parent_chain() {
        let mut tree = SceneTree::new();
        let root = tree.register(NodeKind::Container);
        let child = tree.register(NodeKind::Container);
        tree.attach(root, child, 0);

        tree[root].local = Transform::translate(10.0, 0.0);
        tree[root].alpha = 0.5;
        tree[child].local = Transform::translate(0.0, 5.0);
        tree[child].alpha = 0.5;
        tree[child].visible = false;

        tree.update_world(root);

        assert_eq!(tree.world_transform(child).transform_point(0.0, 0.0), (10.0, 5.0));
        assert_eq!(tree.world_alpha(child), 0.25);
        assert!(!tree.world_visible(child));
        assert!(tree.world_visible(root));
        assert_eq!(tree.compute_world(child).1, 0.25);
    }
}
