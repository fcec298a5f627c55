//! Incremental batch sequencing.
//!
//! The sequencer keeps an ordered list of [`Unit`]s whose leaves, read in
//! order, are exactly the sequenced nodes of the scene in draw order.
//! Inserting or removing a node touches only the units around it: the
//! nearest sequenced neighbours in draw order decide whether the node joins
//! an existing batch, starts a new one or splits one in two, and removals
//! merge the batches that become adjacent.

use crate::error::{SceneError, SceneResult};
use crate::render_stats;
use crate::scene::{NodeId, NodeKind, SceneTree};
use crate::texture::TextureId;

use super::batch::{Batch, BatchId, BatchKey, BatchStore, DirtyFlags, SplitSide};

/// One entry of the sequencer's list.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Unit {
    /// A run of compatible sprites drawn with one call.
    Batch(BatchId),
    /// A tiling sprite, mesh or graphics node drawn on its own.
    Special(NodeId),
    MaskBegin(NodeId),
    MaskEnd(NodeId),
}

#[derive(Clone, Copy)]
enum Direction {
    Prev,
    Next,
}

/// Outcome of asking a full batch to make room.
enum Room {
    Ready,
    /// The batch was split; look the anchor's batch up again.
    Retry,
    /// The batch cannot grow or split (a single-leaf batch at the limit).
    Unavailable,
}

pub struct BatchSequencer {
    units: Vec<Unit>,
    batches: BatchStore,
    max_leaves: usize,
}

impl BatchSequencer {
    pub fn new(max_leaves: usize, initial_capacity: usize, pool_limit: usize) -> Self {
        Self {
            units: Vec::new(),
            batches: BatchStore::new(initial_capacity.min(max_leaves.max(1)), pool_limit),
            max_leaves: max_leaves.max(1),
        }
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn batches(&self) -> &BatchStore {
        &self.batches
    }

    pub(crate) fn batches_mut(&mut self) -> &mut BatchStore {
        &mut self.batches
    }

    pub fn batch(&self, id: BatchId) -> Option<&Batch> {
        self.batches.get(id)
    }

    pub fn max_leaves(&self) -> usize {
        self.max_leaves
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Index of `unit` in the list.
    ///
    /// Searches from the tail: units are unique, and appends look up the
    /// last unit.
    pub fn position(&self, unit: Unit) -> Option<usize> {
        self.units.iter().rposition(|&u| u == unit)
    }

    /// The unit a sequenced node currently lives in.
    pub fn unit_of(&self, tree: &SceneTree, node: NodeId) -> SceneResult<Unit> {
        let entry = tree.checked(node)?;
        if !entry.sequenced {
            return Err(SceneError::NotSequenced(node));
        }
        Ok(match &entry.kind {
            NodeKind::Sprite(_) => {
                Unit::Batch(entry.link.batch.ok_or(SceneError::NotSequenced(node))?)
            }
            NodeKind::MaskBegin { .. } => Unit::MaskBegin(node),
            NodeKind::MaskEnd { .. } => Unit::MaskEnd(node),
            NodeKind::Container => return Err(SceneError::NotSequenced(node)),
            _ => Unit::Special(node),
        })
    }

    /// Every leaf in list order: batch members, specials and markers.
    pub fn leaf_sequence(&self, tree: &SceneTree) -> Vec<NodeId> {
        let mut leaves = Vec::new();
        for unit in &self.units {
            match *unit {
                Unit::Batch(id) => {
                    if let Some(batch) = self.batches.get(id) {
                        leaves.extend(batch.leaves(tree));
                    }
                }
                Unit::Special(node) | Unit::MaskBegin(node) | Unit::MaskEnd(node) => {
                    leaves.push(node)
                }
            }
        }
        leaves
    }

    /// Nearest node in draw order that is already sequenced.
    fn neighbour(&self, tree: &SceneTree, node: NodeId, direction: Direction) -> Option<NodeId> {
        let step = |id: NodeId| match direction {
            Direction::Prev => tree[id].prev,
            Direction::Next => tree[id].next,
        };
        let mut cursor = step(node);
        while let Some(id) = cursor {
            if tree[id].sequenced {
                return Some(id);
            }
            cursor = step(id);
        }
        None
    }

    /// Add a node that is already linked into draw order.
    ///
    /// Containers are not drawn and are ignored.
    pub fn insert(&mut self, tree: &mut SceneTree, node: NodeId) -> SceneResult<()> {
        let entry = tree.checked(node)?;
        if entry.sequenced {
            return Err(SceneError::AlreadySequenced(node));
        }
        let unit = match &entry.kind {
            NodeKind::Container => return Ok(()),
            NodeKind::Sprite(sprite) => {
                let key = BatchKey::of(sprite);
                self.insert_sprite(tree, node, key)?;
                tree[node].sequenced = true;
                return Ok(());
            }
            NodeKind::MaskBegin { .. } => Unit::MaskBegin(node),
            NodeKind::MaskEnd { .. } => Unit::MaskEnd(node),
            _ => Unit::Special(node),
        };

        let previous = self.neighbour(tree, node, Direction::Prev);
        let index = self.position_after(tree, previous)?;
        self.units.insert(index, unit);
        tree[node].sequenced = true;
        Ok(())
    }

    fn insert_sprite(&mut self, tree: &mut SceneTree, node: NodeId, key: BatchKey) -> SceneResult<()> {
        let previous = self.neighbour(tree, node, Direction::Prev);
        let next = self.neighbour(tree, node, Direction::Next);
        let max_leaves = self.max_leaves;

        // At most one force split per side before a batch has room.
        for _ in 0..3 {
            let mut retry = false;

            let behind = previous.and_then(|p| self.compatible(tree, p, key));
            if let Some((anchor, id)) = behind {
                match self.make_room(tree, id)? {
                    Room::Ready => {
                        let batch = self.batch_mut(id, anchor)?;
                        batch.insert_after(tree, node, anchor, max_leaves);
                        return Ok(());
                    }
                    Room::Retry => retry = true,
                    Room::Unavailable => {}
                }
            }
            let ahead = next.and_then(|n| self.compatible(tree, n, key));
            if !retry {
                if let Some((anchor, id)) = ahead {
                    match self.make_room(tree, id)? {
                        Room::Ready => {
                            let batch = self.batch_mut(id, anchor)?;
                            batch.insert_before(tree, node, anchor, max_leaves);
                            return Ok(());
                        }
                        Room::Retry => retry = true,
                        Room::Unavailable => {}
                    }
                }
            }
            if !retry {
                break;
            }
        }

        // No compatible neighbour: a new batch right after the previous unit,
        // splitting the previous batch when the node lands inside it.
        let index = self.position_after(tree, previous)?;
        let id = self.batches.allocate(key);
        self.batch_mut(id, node)?.init(tree, node, max_leaves);
        self.units.insert(index, Unit::Batch(id));
        Ok(())
    }

    /// The batch of `leaf` if it is a sprite whose batch has identity `key`.
    fn compatible(&self, tree: &SceneTree, leaf: NodeId, key: BatchKey) -> Option<(NodeId, BatchId)> {
        let id = tree[leaf].link.batch?;
        let batch = self.batches.get(id)?;
        (batch.key() == key).then_some((leaf, id))
    }

    fn batch_mut(&mut self, id: BatchId, node: NodeId) -> SceneResult<&mut Batch> {
        self.batches
            .get_mut(id)
            .ok_or(SceneError::NotSequenced(node))
    }

    fn make_room(&mut self, tree: &mut SceneTree, id: BatchId) -> SceneResult<Room> {
        let Some(batch) = self.batches.get(id) else {
            return Ok(Room::Unavailable);
        };
        if !batch.is_full(self.max_leaves) {
            return Ok(Room::Ready);
        }
        if batch.size() < 2 {
            return Ok(Room::Unavailable);
        }
        let Some(midpoint) = batch.leaves(tree).nth(batch.size() / 2) else {
            return Ok(Room::Unavailable);
        };
        log::debug!(
            "Batch {:?} reached {} leaves, force splitting",
            id,
            self.max_leaves
        );
        render_stats::record_force_split();
        self.split_batch(tree, id, midpoint)?;
        Ok(Room::Retry)
    }

    /// Split batch `id` so that `at_leaf` starts a separate unit.
    fn split_batch(&mut self, tree: &mut SceneTree, id: BatchId, at_leaf: NodeId) -> SceneResult<()> {
        let index = self
            .position(Unit::Batch(id))
            .ok_or(SceneError::NotSequenced(at_leaf))?;
        let key = self.batch_mut(id, at_leaf)?.key();
        let fresh = self.batches.allocate(key);
        let max_leaves = self.max_leaves;
        let Some((batch, fresh_batch)) = self.batches.pair_mut(id, fresh) else {
            self.batches.release(fresh);
            return Err(SceneError::NotSequenced(at_leaf));
        };
        match batch.split(tree, at_leaf, fresh_batch, max_leaves) {
            Some(SplitSide::After) => self.units.insert(index + 1, Unit::Batch(fresh)),
            Some(SplitSide::Before) => self.units.insert(index, Unit::Batch(fresh)),
            None => self.batches.release(fresh),
        }
        Ok(())
    }

    /// List index right after the unit holding `previous`, splitting its batch
    /// when `previous` is not the batch's tail.
    fn position_after(&mut self, tree: &mut SceneTree, previous: Option<NodeId>) -> SceneResult<usize> {
        let Some(previous) = previous else {
            return Ok(0);
        };
        let unit = self.unit_of(tree, previous)?;
        let index = self
            .position(unit)
            .ok_or(SceneError::NotSequenced(previous))?;
        if let Unit::Batch(id) = unit {
            let is_tail = self.batches.get(id).and_then(Batch::tail) == Some(previous);
            if !is_tail {
                let at = tree[previous]
                    .link
                    .next
                    .ok_or(SceneError::NotSequenced(previous))?;
                // Whichever side the split moves, `previous` ends up at `index`.
                self.split_batch(tree, id, at)?;
            }
        }
        Ok(index + 1)
    }

    /// Take a node out of the list, merging the units that become adjacent.
    pub fn remove(&mut self, tree: &mut SceneTree, node: NodeId) -> SceneResult<()> {
        if matches!(tree.checked(node)?.kind, NodeKind::Container) {
            return Ok(());
        }
        let unit = self.unit_of(tree, node)?;
        let index = self.position(unit).ok_or(SceneError::NotSequenced(node))?;

        match unit {
            Unit::Batch(id) => {
                let emptied = self.batch_mut(id, node)?.remove(tree, node);
                tree[node].sequenced = false;
                if !emptied {
                    return Ok(());
                }
                self.units.remove(index);
                self.batches.release(id);
            }
            _ => {
                self.units.remove(index);
                tree[node].sequenced = false;
            }
        }
        self.merge_at(tree, index)
    }

    /// Merge the units at `index - 1` and `index` when both are batches of one identity.
    fn merge_at(&mut self, tree: &mut SceneTree, index: usize) -> SceneResult<()> {
        if index == 0 || index >= self.units.len() {
            return Ok(());
        }
        let (Unit::Batch(left), Unit::Batch(right)) = (self.units[index - 1], self.units[index])
        else {
            return Ok(());
        };
        let max_leaves = self.max_leaves;
        let Some((left_batch, right_batch)) = self.batches.pair_mut(left, right) else {
            return Ok(());
        };
        if left_batch.key() != right_batch.key()
            || left_batch.size() + right_batch.size() > max_leaves
        {
            return Ok(());
        }

        // Relabel the smaller side.
        if left_batch.size() >= right_batch.size() {
            left_batch.absorb_after(tree, right_batch, max_leaves)?;
            self.units.remove(index);
            self.batches.release(right);
        } else {
            right_batch.absorb_before(tree, left_batch, max_leaves)?;
            self.units.remove(index - 1);
            self.batches.release(left);
        }
        log::debug!("Merged batches {:?} and {:?}", left, right);
        Ok(())
    }

    /// Mark every batch sampling `texture` dirty.
    pub fn mark_texture_dirty(&mut self, texture: TextureId, flags: DirtyFlags) {
        for batch in self.batches.iter_mut() {
            if batch.key().texture == texture {
                batch.mark_dirty(flags);
            }
        }
    }

    pub fn mark_all_dirty(&mut self, flags: DirtyFlags) {
        for batch in self.batches.iter_mut() {
            batch.mark_dirty(flags);
        }
    }

    /// Mark the batch holding `leaf` dirty, if it is a batched sprite.
    pub fn mark_leaf_dirty(&mut self, tree: &SceneTree, leaf: NodeId, flags: DirtyFlags) {
        if let Some(batch) = tree
            .get(leaf)
            .and_then(|n| n.link.batch)
            .and_then(|id| self.batches.get_mut(id))
        {
            batch.mark_dirty(flags);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Sprite;
    use crate::types::{BlendMode, Rect};

    const TEX_A: TextureId = TextureId(1);
    const TEX_B: TextureId = TextureId(2);

    struct Fixture {
        tree: SceneTree,
        seq: BatchSequencer,
        root: NodeId,
    }

    impl Fixture {
        fn new(max_leaves: usize) -> Self {
            let mut tree = SceneTree::new();
            let root = tree.register(NodeKind::Container);
            Self {
                tree,
                seq: BatchSequencer::new(max_leaves, 1, 8),
                root,
            }
        }

        fn sprite(&mut self, texture: TextureId) -> NodeId {
            self.tree.register(NodeKind::Sprite(Sprite::new(
                texture,
                Rect::from_size(4.0, 4.0),
            )))
        }

        fn add(&mut self, node: NodeId, index: usize) {
            self.tree.attach(self.root, node, index);
            self.seq.insert(&mut self.tree, node).unwrap();
        }

        fn push(&mut self, texture: TextureId) -> NodeId {
            let node = self.sprite(texture);
            let index = self.tree.children(self.root).len();
            self.add(node, index);
            node
        }

        fn drop_node(&mut self, node: NodeId) {
            self.seq.remove(&mut self.tree, node).unwrap();
            self.tree.detach(node);
        }

        fn batch_sizes(&self) -> Vec<usize> {
            self.seq
                .units()
                .iter()
                .map(|u| match u {
                    Unit::Batch(id) => self.seq.batch(*id).unwrap().size(),
                    _ => 0,
                })
                .collect()
        }

        fn assert_consistent(&self) {
            let expected: Vec<_> = self
                .tree
                .draw_order(self.root)
                .filter(|&n| self.tree.is_sequenced(n))
                .collect();
            assert_eq!(self.seq.leaf_sequence(&self.tree), expected);
            for unit in self.seq.units() {
                if let Unit::Batch(id) = unit {
                    let batch = self.seq.batch(*id).unwrap();
                    assert!(batch.size() > 0);
                    for leaf in batch.leaves(&self.tree) {
                        let sprite = self.tree.kind(leaf).and_then(NodeKind::as_sprite).unwrap();
                        assert_eq!(BatchKey::of(sprite), batch.key());
                    }
                }
            }
        }
    }

    #[test]
    fn test_empty_insert_creates_one_unit() {
        let mut fx = Fixture::new(64);
        fx.push(TEX_A);
        assert_eq!(fx.seq.units().len(), 1);
        fx.assert_consistent();
    }

    #[test]
    fn test_compatible_sprites_share_batch() {
        let mut fx = Fixture::new(64);
        fx.push(TEX_A);
        fx.push(TEX_A);
        fx.push(TEX_A);
        assert_eq!(fx.batch_sizes(), vec![3]);
        fx.assert_consistent();
    }

    #[test]
    fn test_incompatible_insert_splits_and_removal_merges() {
        let mut fx = Fixture::new(64);
        fx.push(TEX_A);
        fx.push(TEX_A);
        fx.push(TEX_A);
        let d = fx.sprite(TEX_B);
        fx.add(d, 2);
        assert_eq!(fx.batch_sizes(), vec![2, 1, 1]);
        fx.assert_consistent();

        fx.drop_node(d);
        assert_eq!(fx.batch_sizes(), vec![3]);
        fx.assert_consistent();
    }

    #[test]
    fn test_insert_before_compatible_next() {
        let mut fx = Fixture::new(64);
        fx.push(TEX_B);
        fx.push(TEX_A);
        let a = fx.sprite(TEX_A);
        fx.add(a, 1);
        assert_eq!(fx.batch_sizes(), vec![1, 2]);
        fx.assert_consistent();
    }

    #[test]
    fn test_special_splits_batch_and_merge_on_removal() {
        let mut fx = Fixture::new(64);
        fx.push(TEX_A);
        fx.push(TEX_A);
        let mesh = fx.tree.register(NodeKind::Graphics(Default::default()));
        fx.add(mesh, 1);
        assert_eq!(fx.seq.units().len(), 3);
        assert_eq!(fx.seq.units()[1], Unit::Special(mesh));
        fx.assert_consistent();

        fx.drop_node(mesh);
        assert_eq!(fx.batch_sizes(), vec![2]);
    }

    #[test]
    fn test_position_follows_list_order() {
        let mut fx = Fixture::new(64);
        for texture in [TEX_A, TEX_B, TEX_A, TEX_B] {
            fx.push(texture);
        }
        let special = fx.tree.register(NodeKind::Graphics(Default::default()));
        fx.add(special, 2);
        let units = fx.seq.units().to_vec();
        assert_eq!(units.len(), 5);
        for (index, unit) in units.iter().enumerate() {
            assert_eq!(fx.seq.position(*unit), Some(index));
        }

        fx.push(TEX_B);
        assert_eq!(fx.seq.units().len(), 5);
        assert_eq!(fx.seq.position(units[4]), Some(4));
    }

    #[test]
    fn test_insert_at_front_without_previous() {
        let mut fx = Fixture::new(64);
        fx.push(TEX_A);
        let special = fx.tree.register(NodeKind::Graphics(Default::default()));
        fx.add(special, 0);
        assert_eq!(fx.seq.units()[0], Unit::Special(special));
        fx.assert_consistent();
    }

    #[test]
    fn test_double_insert_is_rejected() {
        let mut fx = Fixture::new(64);
        let a = fx.push(TEX_A);
        let before = fx.seq.units().to_vec();
        assert_eq!(
            fx.seq.insert(&mut fx.tree, a),
            Err(SceneError::AlreadySequenced(a))
        );
        assert_eq!(fx.seq.units(), before.as_slice());
    }

    #[test]
    fn test_remove_unsequenced_is_rejected() {
        let mut fx = Fixture::new(64);
        let a = fx.sprite(TEX_A);
        assert_eq!(fx.seq.remove(&mut fx.tree, a), Err(SceneError::NotSequenced(a)));
    }

    #[test]
    fn test_blend_mode_is_part_of_identity() {
        let mut fx = Fixture::new(64);
        fx.push(TEX_A);
        let add = fx.tree.register(NodeKind::Sprite(
            Sprite::new(TEX_A, Rect::from_size(4.0, 4.0)).with_blend(BlendMode::Add),
        ));
        let index = fx.tree.children(fx.root).len();
        fx.add(add, index);
        assert_eq!(fx.batch_sizes(), vec![1, 1]);
    }

    #[test]
    fn test_force_split_at_limit() {
        let mut fx = Fixture::new(4);
        for _ in 0..4 {
            fx.push(TEX_A);
        }
        assert_eq!(fx.batch_sizes(), vec![4]);

        fx.push(TEX_A);
        let sizes = fx.batch_sizes();
        assert_eq!(sizes.iter().sum::<usize>(), 5);
        assert!(sizes.iter().all(|&s| s <= 4));
        assert_eq!(sizes.len(), 2);
        fx.assert_consistent();
    }

    #[test]
    fn test_single_leaf_limit_never_exceeded() {
        let mut fx = Fixture::new(1);
        for _ in 0..3 {
            fx.push(TEX_A);
        }
        assert_eq!(fx.batch_sizes(), vec![1, 1, 1]);
        fx.assert_consistent();
    }

    #[test]
    fn test_insert_then_remove_restores_units() {
        let mut fx = Fixture::new(64);
        fx.push(TEX_A);
        fx.push(TEX_B);
        fx.push(TEX_A);
        fx.push(TEX_A);
        let sizes = fx.batch_sizes();

        for index in 0..=4 {
            for texture in [TEX_A, TEX_B, TextureId(9)] {
                let node = fx.sprite(texture);
                fx.add(node, index);
                fx.assert_consistent();
                fx.drop_node(node);
                assert_eq!(fx.batch_sizes(), sizes, "index {index} texture {texture:?}");
            }
        }
    }

    #[test]
    fn test_merge_respects_limit() {
        let mut fx = Fixture::new(2);
        fx.push(TEX_A);
        fx.push(TEX_A);
        let b = fx.push(TEX_B);
        fx.push(TEX_A);
        fx.push(TEX_A);
        fx.drop_node(b);
        assert_eq!(fx.batch_sizes(), vec![2, 2]);
        fx.assert_consistent();
    }
}
