//! Sprite batches: runs of same-texture, same-blend sprites sharing one buffer.
//!
//! A batch is a doubly linked list threaded through its leaves (the links
//! live on the scene nodes) plus CPU staging data and the GPU buffers it is
//! uploaded to. Slot `i` of the buffers belongs to the `i`-th leaf in list
//! order; structural edits mark every attribute dirty and the refresh diffs
//! against the staging copy so only changed slots are re-uploaded.

use bitflags::bitflags;

use crate::error::{SceneError, SceneResult};
use crate::render_stats;
use crate::scene::{BatchLink, NodeId, SceneTree, Sprite};
use crate::texture::{TextureId, TextureProvider};
use crate::transform::{Transform, TransformProvider};
use crate::types::BlendMode;

use super::backend::{BackendError, BufferHandle, BufferKind, DrawCall, GpuBackend};
use super::vertex::{quad_indices, SpriteVertex, INDICES_PER_QUAD, VERTEX_SIZE, VERTICES_PER_QUAD};

/// Handle to a live batch inside a [`BatchStore`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct BatchId(pub(crate) u32);

/// Batch identity: sprites can share a batch only when both fields match.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BatchKey {
    pub texture: TextureId,
    pub blend: BlendMode,
}

impl BatchKey {
    pub fn of(sprite: &Sprite) -> Self {
        Self {
            texture: sprite.texture,
            blend: sprite.blend,
        }
    }
}

bitflags! {
    /// What must be recomputed or re-created before the next draw.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DirtyFlags: u8 {
        const GEOMETRY = 1 << 0;
        const UVS = 1 << 1;
        const COLORS = 1 << 2;
        /// GPU buffers are too small or gone.
        const REALLOCATE = 1 << 3;
        /// Leaves were added, removed or reordered, so slots no longer match the GPU copy.
        const STRUCTURE = 1 << 4;
        const ATTRIBUTES = Self::GEOMETRY.bits() | Self::UVS.bits() | Self::COLORS.bits();
    }
}

/// Capacity after growing to hold `size` leaves.
pub fn grown_capacity(size: usize, max_leaves: usize) -> usize {
    let grown = ((size as f64) * 1.5).ceil() as usize;
    grown.max(1).min(max_leaves.max(1)).max(size)
}

/// Which side of a split the freshly allocated batch took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SplitSide {
    /// The fresh batch holds `at_leaf..=tail` and goes after the original.
    After,
    /// The fresh batch holds `head..at_leaf` and goes before the original.
    Before,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GpuBuffers {
    vertex: BufferHandle,
    index: BufferHandle,
    /// Leaf capacity the buffers were created for.
    capacity: usize,
}

#[derive(Debug)]
pub struct Batch {
    id: BatchId,
    key: BatchKey,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    size: usize,
    capacity: usize,
    dirty: DirtyFlags,
    renderable: bool,
    staging: Vec<SpriteVertex>,
    gpu: Option<GpuBuffers>,
    /// Buffers replaced while the GPU was still reading them.
    retired: Vec<BufferHandle>,
}

impl Batch {
    fn new(id: BatchId, key: BatchKey, capacity: usize) -> Self {
        Self {
            id,
            key,
            head: None,
            tail: None,
            size: 0,
            capacity,
            dirty: DirtyFlags::ATTRIBUTES | DirtyFlags::REALLOCATE | DirtyFlags::STRUCTURE,
            renderable: true,
            staging: Vec::new(),
            gpu: None,
            retired: Vec::new(),
        }
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn key(&self) -> BatchKey {
        self.key
    }

    pub fn head(&self) -> Option<NodeId> {
        self.head
    }

    pub fn tail(&self) -> Option<NodeId> {
        self.tail
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dirty(&self) -> DirtyFlags {
        self.dirty
    }

    pub fn is_renderable(&self) -> bool {
        self.renderable
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self, max_leaves: usize) -> bool {
        self.size >= max_leaves
    }

    pub(crate) fn mark_dirty(&mut self, flags: DirtyFlags) {
        self.dirty |= flags;
    }

    /// Leaves in batch order.
    pub fn leaves<'a>(&self, tree: &'a SceneTree) -> impl Iterator<Item = NodeId> + 'a {
        std::iter::successors(self.head, move |&id| tree[id].link.next)
    }

    /// Position of `leaf` within the batch, counted from the head.
    pub fn offset_of(&self, tree: &SceneTree, leaf: NodeId) -> usize {
        std::iter::successors(tree[leaf].link.prev, |&id| tree[id].link.prev).count()
    }

    fn ensure_capacity(&mut self, needed: usize, max_leaves: usize) {
        if needed > self.capacity {
            self.capacity = grown_capacity(needed, max_leaves);
            self.dirty |= DirtyFlags::REALLOCATE;
        }
    }

    /// Make `leaf` the only member of an empty batch.
    pub(crate) fn init(&mut self, tree: &mut SceneTree, leaf: NodeId, max_leaves: usize) {
        debug_assert!(self.is_empty());
        self.ensure_capacity(1, max_leaves);
        tree[leaf].link = BatchLink {
            batch: Some(self.id),
            prev: None,
            next: None,
        };
        self.head = Some(leaf);
        self.tail = Some(leaf);
        self.size = 1;
        self.dirty |= DirtyFlags::ATTRIBUTES | DirtyFlags::STRUCTURE;
    }

    pub(crate) fn insert_after(
        &mut self,
        tree: &mut SceneTree,
        leaf: NodeId,
        existing: NodeId,
        max_leaves: usize,
    ) {
        self.ensure_capacity(self.size + 1, max_leaves);
        let next = tree[existing].link.next;
        tree[leaf].link = BatchLink {
            batch: Some(self.id),
            prev: Some(existing),
            next,
        };
        tree[existing].link.next = Some(leaf);
        match next {
            Some(next) => tree[next].link.prev = Some(leaf),
            None => self.tail = Some(leaf),
        }
        self.size += 1;
        self.dirty |= DirtyFlags::ATTRIBUTES | DirtyFlags::STRUCTURE;
    }

    pub(crate) fn insert_before(
        &mut self,
        tree: &mut SceneTree,
        leaf: NodeId,
        existing: NodeId,
        max_leaves: usize,
    ) {
        self.ensure_capacity(self.size + 1, max_leaves);
        let prev = tree[existing].link.prev;
        tree[leaf].link = BatchLink {
            batch: Some(self.id),
            prev,
            next: Some(existing),
        };
        tree[existing].link.prev = Some(leaf);
        match prev {
            Some(prev) => tree[prev].link.next = Some(leaf),
            None => self.head = Some(leaf),
        }
        self.size += 1;
        self.dirty |= DirtyFlags::ATTRIBUTES | DirtyFlags::STRUCTURE;
    }

    /// Unlink `leaf`; returns true when the batch is now empty.
    pub(crate) fn remove(&mut self, tree: &mut SceneTree, leaf: NodeId) -> bool {
        let link = std::mem::take(&mut tree[leaf].link);
        match link.prev {
            Some(prev) => tree[prev].link.next = link.next,
            None => self.head = link.next,
        }
        match link.next {
            Some(next) => tree[next].link.prev = link.prev,
            None => self.tail = link.prev,
        }
        self.size -= 1;
        self.dirty |= DirtyFlags::ATTRIBUTES | DirtyFlags::STRUCTURE;
        self.size == 0
    }

    /// Count the leaves before and from `at_leaf`, walking both directions in
    /// lockstep so the cost is bounded by the shorter side.
    fn measure_split(&self, tree: &SceneTree, at_leaf: NodeId) -> (usize, usize) {
        let mut forward = Some(at_leaf);
        let mut backward = tree[at_leaf].link.prev;
        let (mut left, mut right) = (0, 0);
        loop {
            match forward {
                Some(id) => {
                    right += 1;
                    forward = tree[id].link.next;
                }
                None => return (self.size - right, right),
            }
            match backward {
                Some(id) => {
                    left += 1;
                    backward = tree[id].link.prev;
                }
                None => return (left, self.size - left),
            }
        }
    }

    /// Split so that `at_leaf` starts a new run, moving the shorter side into `fresh`.
    ///
    /// Returns `None` when `at_leaf` is the head (nothing to split off).
    pub(crate) fn split(
        &mut self,
        tree: &mut SceneTree,
        at_leaf: NodeId,
        fresh: &mut Batch,
        max_leaves: usize,
    ) -> Option<SplitSide> {
        debug_assert!(fresh.is_empty() && fresh.key == self.key);
        let before = tree[at_leaf].link.prev?;
        let (left, right) = self.measure_split(tree, at_leaf);

        tree[before].link.next = None;
        tree[at_leaf].link.prev = None;

        let side = if right <= left {
            fresh.head = Some(at_leaf);
            fresh.tail = self.tail;
            fresh.size = right;
            self.tail = Some(before);
            self.size = left;
            SplitSide::After
        } else {
            fresh.head = self.head;
            fresh.tail = Some(before);
            fresh.size = left;
            self.head = Some(at_leaf);
            self.size = right;
            SplitSide::Before
        };
        fresh.relabel(tree);
        fresh.ensure_capacity(fresh.size, max_leaves);
        fresh.dirty |= DirtyFlags::ATTRIBUTES | DirtyFlags::STRUCTURE;
        self.dirty |= DirtyFlags::ATTRIBUTES | DirtyFlags::STRUCTURE;

        render_stats::record_batch_split();
        log::debug!(
            "Split batch {:?} ({} | {}), fresh {:?} taken {:?}",
            self.id,
            left,
            right,
            fresh.id,
            side
        );
        Some(side)
    }

    /// Append all of `other`'s leaves after this batch's tail, leaving `other` empty.
    pub(crate) fn absorb_after(
        &mut self,
        tree: &mut SceneTree,
        other: &mut Batch,
        max_leaves: usize,
    ) -> SceneResult<()> {
        self.check_merge(other)?;
        let (Some(tail), Some(other_head)) = (self.tail, other.head) else {
            return Ok(());
        };
        other.relabel_as(tree, self.id);
        tree[tail].link.next = Some(other_head);
        tree[other_head].link.prev = Some(tail);
        self.tail = other.tail;
        self.finish_merge(other, max_leaves);
        Ok(())
    }

    /// Prepend all of `other`'s leaves before this batch's head, leaving `other` empty.
    pub(crate) fn absorb_before(
        &mut self,
        tree: &mut SceneTree,
        other: &mut Batch,
        max_leaves: usize,
    ) -> SceneResult<()> {
        self.check_merge(other)?;
        let (Some(head), Some(other_tail)) = (self.head, other.tail) else {
            return Ok(());
        };
        other.relabel_as(tree, self.id);
        tree[other_tail].link.next = Some(head);
        tree[head].link.prev = Some(other_tail);
        self.head = other.head;
        self.finish_merge(other, max_leaves);
        Ok(())
    }

    fn check_merge(&self, other: &Batch) -> SceneResult<()> {
        if self.key != other.key {
            return Err(SceneError::IncompatibleMerge {
                left: self.key,
                right: other.key,
            });
        }
        Ok(())
    }

    fn finish_merge(&mut self, other: &mut Batch, max_leaves: usize) {
        self.size += other.size;
        self.ensure_capacity(self.size, max_leaves);
        self.dirty |= DirtyFlags::ATTRIBUTES | DirtyFlags::STRUCTURE;
        other.head = None;
        other.tail = None;
        other.size = 0;
        render_stats::record_batch_merge();
    }

    fn relabel(&self, tree: &mut SceneTree) {
        self.relabel_as(tree, self.id);
    }

    fn relabel_as(&self, tree: &mut SceneTree, id: BatchId) {
        let mut cursor = self.head;
        while let Some(leaf) = cursor {
            let link = &mut tree[leaf].link;
            link.batch = Some(id);
            cursor = link.next;
        }
    }

    /// Forget GPU buffers without destroying them (the context that owned them is gone).
    pub(crate) fn invalidate_gpu(&mut self) {
        self.gpu = None;
        self.retired.clear();
        self.dirty |= DirtyFlags::ATTRIBUTES | DirtyFlags::REALLOCATE;
    }

    /// Hand back the GPU buffers for destruction.
    pub(crate) fn take_buffers(&mut self) -> Option<(BufferHandle, BufferHandle)> {
        self.gpu.take().map(|gpu| (gpu.vertex, gpu.index))
    }

    /// Rebuild changed vertex data and upload the changed slot range.
    ///
    /// While the backend still reads the vertex buffer, attribute-only
    /// changes wait for a later frame; a changed layout moves to fresh
    /// buffers instead. Flags the batch non-renderable when the texture is
    /// not ready, any leaf has zero area, the batch exceeds the backend's
    /// vertex range or the backend rejects an upload.
    pub fn refresh_geometry(
        &mut self,
        tree: &SceneTree,
        transforms: &dyn TransformProvider,
        textures: &dyn TextureProvider,
        backend: &mut dyn GpuBackend,
    ) -> Result<(), BackendError> {
        if self.dirty.is_empty() && self.gpu.is_some() {
            return Ok(());
        }
        let result = self.rebuild(tree, transforms, textures, backend);
        if result.is_err() {
            // Staging may already hold values the GPU never received.
            self.renderable = false;
            self.dirty |= DirtyFlags::ATTRIBUTES | DirtyFlags::REALLOCATE;
        }
        result
    }

    fn rebuild(
        &mut self,
        tree: &SceneTree,
        transforms: &dyn TransformProvider,
        textures: &dyn TextureProvider,
        backend: &mut dyn GpuBackend,
    ) -> Result<(), BackendError> {
        if !textures.is_ready(self.key.texture) {
            self.renderable = false;
            return Ok(());
        }
        let tex_size = match textures.texture_size(self.key.texture) {
            Some((w, h)) if w > 0 && h > 0 => (w as f32, h as f32),
            _ => {
                self.fail_closed("texture has zero area");
                return Ok(());
            }
        };
        if self.size * VERTICES_PER_QUAD > backend.max_vertices_per_draw() {
            self.fail_closed("batch exceeds backend vertex range");
            return Ok(());
        }
        let zero_area = self
            .leaves(tree)
            .any(|leaf| leaf_sprite(tree, leaf).is_none_or(|s| s.frame.is_empty()));
        if zero_area {
            self.fail_closed("leaf frame has zero area");
            return Ok(());
        }

        if let Some(gpu) = self.gpu {
            if backend.is_buffer_busy(gpu.vertex) {
                if !self
                    .dirty
                    .intersects(DirtyFlags::STRUCTURE | DirtyFlags::REALLOCATE)
                {
                    log::trace!("Batch {:?} buffer busy, deferring refresh", self.id);
                    return Ok(());
                }
                log::debug!(
                    "Batch {:?} buffer busy after a layout change, replacing it",
                    self.id
                );
                self.retired.extend([gpu.vertex, gpu.index]);
                self.gpu = None;
                self.dirty |= DirtyFlags::REALLOCATE;
            }
        }

        let reallocate = self.dirty.contains(DirtyFlags::REALLOCATE)
            || self.gpu.is_none_or(|gpu| gpu.capacity < self.capacity);
        if reallocate {
            self.reallocate(backend)?;
        }

        let flags = if reallocate {
            DirtyFlags::ATTRIBUTES
        } else {
            self.dirty
        };
        self.staging
            .resize(self.capacity * VERTICES_PER_QUAD, SpriteVertex::default());

        let mut changed: Option<(usize, usize)> = None;
        for (slot, leaf) in self.leaves(tree).enumerate() {
            let Some(sprite) = leaf_sprite(tree, leaf) else {
                continue;
            };
            let quad = build_quad(
                sprite,
                &transforms.world_transform(leaf),
                transforms.world_alpha(leaf),
                transforms.world_visible(leaf),
                tex_size,
            );
            let base = slot * VERTICES_PER_QUAD;
            let mut slot_changed = reallocate;
            for (corner, vertex) in quad.iter().enumerate() {
                let staged = &mut self.staging[base + corner];
                if flags.contains(DirtyFlags::GEOMETRY) && staged.position != vertex.position {
                    staged.position = vertex.position;
                    slot_changed = true;
                }
                if flags.contains(DirtyFlags::UVS) && staged.uv != vertex.uv {
                    staged.uv = vertex.uv;
                    slot_changed = true;
                }
                if flags.contains(DirtyFlags::COLORS) && staged.color != vertex.color {
                    staged.color = vertex.color;
                    slot_changed = true;
                }
            }
            if slot_changed {
                changed = Some(match changed {
                    Some((lo, _)) => (lo, slot + 1),
                    None => (slot, slot + 1),
                });
            }
        }

        if let (Some((lo, hi)), Some(gpu)) = (changed, self.gpu) {
            let range = &self.staging[lo * VERTICES_PER_QUAD..hi * VERTICES_PER_QUAD];
            let bytes: &[u8] = bytemuck::cast_slice(range);
            backend.upload_sub_range(gpu.vertex, lo * VERTICES_PER_QUAD * VERTEX_SIZE, bytes)?;
            render_stats::record_upload(bytes.len());
            log::trace!("Batch {:?} uploaded slots {}..{}", self.id, lo, hi);
        }

        self.dirty = DirtyFlags::empty();
        self.renderable = true;
        Ok(())
    }

    fn fail_closed(&mut self, reason: &str) {
        if self.renderable {
            log::warn!("Batch {:?} skipped: {}", self.id, reason);
        }
        self.renderable = false;
    }

    fn reallocate(&mut self, backend: &mut dyn GpuBackend) -> Result<(), BackendError> {
        if let Some((vertex, index)) = self.take_buffers() {
            backend.destroy_buffer(vertex);
            backend.destroy_buffer(index);
        }
        let vertex = backend.create_buffer(
            BufferKind::Vertex,
            self.capacity * VERTICES_PER_QUAD * VERTEX_SIZE,
        )?;
        let index = match backend.create_buffer(
            BufferKind::Index,
            self.capacity * INDICES_PER_QUAD * std::mem::size_of::<u16>(),
        ) {
            Ok(index) => index,
            Err(err) => {
                backend.destroy_buffer(vertex);
                return Err(err);
            }
        };
        let indices = quad_indices(self.capacity);
        let uploaded = backend.upload_sub_range(index, 0, bytemuck::cast_slice(&indices));
        self.gpu = Some(GpuBuffers {
            vertex,
            index,
            capacity: self.capacity,
        });
        uploaded?;
        self.dirty.remove(DirtyFlags::REALLOCATE);
        log::debug!(
            "Batch {:?} buffers (re)created for {} leaves",
            self.id,
            self.capacity
        );
        Ok(())
    }

    /// Draw `count` leaves starting at leaf offset `start`. Returns false when skipped.
    pub fn draw_range(
        &self,
        backend: &mut dyn GpuBackend,
        start: usize,
        count: usize,
    ) -> Result<bool, BackendError> {
        let Some(gpu) = self.gpu else {
            return Ok(false);
        };
        if !self.renderable || count == 0 || start + count > self.size {
            return Ok(false);
        }
        backend.draw_indexed(&DrawCall {
            vertex_buffer: gpu.vertex,
            index_buffer: gpu.index,
            start_index: (start * INDICES_PER_QUAD) as u32,
            index_count: (count * INDICES_PER_QUAD) as u32,
            texture: self.key.texture,
            blend: self.key.blend,
        })?;
        render_stats::record_draw_call();
        Ok(true)
    }

    pub fn draw(&self, backend: &mut dyn GpuBackend) -> Result<bool, BackendError> {
        self.draw_range(backend, 0, self.size)
    }

    /// Clear membership for reuse under a new identity, keeping allocations.
    fn reset(&mut self, id: BatchId, key: BatchKey) {
        self.id = id;
        self.key = key;
        self.head = None;
        self.tail = None;
        self.size = 0;
        self.renderable = true;
        self.dirty = DirtyFlags::ATTRIBUTES | DirtyFlags::STRUCTURE;
    }
}

fn leaf_sprite(tree: &SceneTree, leaf: NodeId) -> Option<&Sprite> {
    tree.kind(leaf).and_then(|kind| kind.as_sprite())
}

/// Four vertices for a sprite: top-left, top-right, bottom-right, bottom-left.
fn build_quad(
    sprite: &Sprite,
    world: &Transform,
    alpha: f32,
    visible: bool,
    (tex_w, tex_h): (f32, f32),
) -> [SpriteVertex; VERTICES_PER_QUAD] {
    let frame = sprite.frame;
    let x0 = -sprite.anchor.0 * frame.width;
    let y0 = -sprite.anchor.1 * frame.height;
    let (x1, y1) = (x0 + frame.width, y0 + frame.height);

    let (u0, v0) = (frame.x / tex_w, frame.y / tex_h);
    let (u1, v1) = (frame.right() / tex_w, frame.bottom() / tex_h);

    if !visible {
        // Collapsed and transparent: keeps the slot without covering pixels.
        let origin = world.transform_point(0.0, 0.0);
        let corner = |uv: [f32; 2]| SpriteVertex {
            position: [origin.0, origin.1],
            uv,
            color: 0,
        };
        return [corner([u0, v0]), corner([u1, v0]), corner([u1, v1]), corner([u0, v1])];
    }

    let color = sprite.tint.with_alpha_factor(alpha).to_premultiplied_rgba8();
    let corner = |x: f32, y: f32, uv: [f32; 2]| {
        let (px, py) = world.transform_point(x, y);
        SpriteVertex {
            position: [px, py],
            uv,
            color,
        }
    };
    [
        corner(x0, y0, [u0, v0]),
        corner(x1, y0, [u1, v0]),
        corner(x1, y1, [u1, v1]),
        corner(x0, y1, [u0, v1]),
    ]
}

/// Slab of live batches plus a pool of emptied ones kept for reuse.
pub struct BatchStore {
    slots: Vec<Option<Batch>>,
    free_slots: Vec<u32>,
    pool: Vec<Batch>,
    pool_limit: usize,
    initial_capacity: usize,
    /// GPU buffers of batches dropped past the pool limit, awaiting destruction.
    retired: Vec<BufferHandle>,
}

impl BatchStore {
    pub fn new(initial_capacity: usize, pool_limit: usize) -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            pool: Vec::new(),
            pool_limit,
            initial_capacity: initial_capacity.max(1),
            retired: Vec::new(),
        }
    }

    pub(crate) fn allocate(&mut self, key: BatchKey) -> BatchId {
        let id = match self.free_slots.pop() {
            Some(slot) => BatchId(slot),
            None => {
                self.slots.push(None);
                BatchId((self.slots.len() - 1) as u32)
            }
        };
        let batch = match self.pool.pop() {
            Some(mut batch) => {
                batch.reset(id, key);
                render_stats::record_pool_reuse();
                batch
            }
            None => Batch::new(id, key, self.initial_capacity),
        };
        self.slots[id.0 as usize] = Some(batch);
        id
    }

    /// Return an empty batch to the pool.
    pub(crate) fn release(&mut self, id: BatchId) {
        let Some(mut batch) = self.slots.get_mut(id.0 as usize).and_then(Option::take) else {
            return;
        };
        debug_assert!(batch.is_empty());
        self.free_slots.push(id.0);
        if self.pool.len() < self.pool_limit {
            self.pool.push(batch);
        } else {
            self.retired.append(&mut batch.retired);
            if let Some((vertex, index)) = batch.take_buffers() {
                self.retired.extend([vertex, index]);
            }
        }
    }

    pub fn get(&self, id: BatchId) -> Option<&Batch> {
        self.slots.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, id: BatchId) -> Option<&mut Batch> {
        self.slots.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    /// Borrow two distinct batches mutably.
    pub(crate) fn pair_mut(&mut self, a: BatchId, b: BatchId) -> Option<(&mut Batch, &mut Batch)> {
        let (ai, bi) = (a.0 as usize, b.0 as usize);
        if ai == bi || ai >= self.slots.len() || bi >= self.slots.len() {
            return None;
        }
        let (low, high) = self.slots.split_at_mut(ai.max(bi));
        let (first, second) = (low[ai.min(bi)].as_mut()?, high[0].as_mut()?);
        Some(if ai < bi { (first, second) } else { (second, first) })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Batch> {
        self.slots.iter().flatten()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Batch> {
        self.slots.iter_mut().flatten()
    }

    pub fn live_count(&self) -> usize {
        self.iter().count()
    }

    pub fn pooled_count(&self) -> usize {
        self.pool.len()
    }

    /// Buffers waiting for destruction, including ones batches replaced while busy.
    pub(crate) fn drain_retired(&mut self) -> Vec<BufferHandle> {
        let mut retired = std::mem::take(&mut self.retired);
        for batch in self.slots.iter_mut().flatten().chain(self.pool.iter_mut()) {
            retired.append(&mut batch.retired);
        }
        retired
    }

    /// Drop every GPU buffer reference, live and pooled.
    pub(crate) fn invalidate_gpu(&mut self) {
        for batch in self.iter_mut() {
            batch.invalidate_gpu();
        }
        for batch in &mut self.pool {
            batch.invalidate_gpu();
        }
        self.retired.clear();
    }
}
