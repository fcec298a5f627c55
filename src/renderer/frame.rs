//! Per-frame traversal of the unit list.
//!
//! A frame refreshes dirty batches, then issues one draw per unit in list
//! order, pushing and popping stencil state at mask markers. A transient
//! backend failure (context loss) abandons the frame and invalidates every
//! GPU resource; any other failure only skips the unit that caused it.

use crate::render_stats;
use crate::scene::{NodeId, NodeKind, SceneTree};
use crate::texture::{TextureProvider, TextureRegistry};
use crate::transform::TransformProvider;

use super::backend::{BackendError, GpuBackend, ImmediateGeometry};
use super::batch::DirtyFlags;
use super::sequencer::{BatchSequencer, Unit};
use super::special::{graphics_geometry, tessellate};

/// What happened during one `render_all` or `render_subtree` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    /// Draws issued: batches, specials and mask shapes.
    pub draw_calls: usize,
    /// Units skipped because they were not renderable or failed.
    pub skipped_units: usize,
    /// The frame was abandoned (context lost or not yet restored).
    pub frame_skipped: bool,
    /// Non-transient errors that caused units to be skipped.
    pub errors: Vec<BackendError>,
}

/// Leaves of a unit to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Span {
    Whole,
    Leaves { start: usize, count: usize },
}

pub struct FrameRenderer {
    context_lost: bool,
    frames: u64,
}

impl FrameRenderer {
    pub fn new() -> Self {
        Self {
            context_lost: false,
            frames: 0,
        }
    }

    /// True between a transient failure and the backend reporting restoration.
    pub fn is_context_lost(&self) -> bool {
        self.context_lost
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames
    }

    /// Draw every unit in order.
    pub fn render_all(
        &mut self,
        tree: &SceneTree,
        sequencer: &mut BatchSequencer,
        textures: &mut TextureRegistry,
        backend: &mut dyn GpuBackend,
    ) -> FrameReport {
        let spans: Vec<(Unit, Span)> = sequencer
            .units()
            .iter()
            .map(|&unit| (unit, Span::Whole))
            .collect();
        self.render_spans(tree, sequencer, textures, backend, &spans)
    }

    /// Draw only the units covering `node`'s subtree.
    ///
    /// Batches that straddle the subtree boundary are drawn partially. The
    /// node's own mask is not applied; masks of descendants are.
    pub fn render_subtree(
        &mut self,
        tree: &SceneTree,
        sequencer: &mut BatchSequencer,
        textures: &mut TextureRegistry,
        backend: &mut dyn GpuBackend,
        node: NodeId,
    ) -> FrameReport {
        let spans = subtree_spans(tree, sequencer, node);
        self.render_spans(tree, sequencer, textures, backend, &spans)
    }

    fn render_spans(
        &mut self,
        tree: &SceneTree,
        sequencer: &mut BatchSequencer,
        textures: &mut TextureRegistry,
        backend: &mut dyn GpuBackend,
        spans: &[(Unit, Span)],
    ) -> FrameReport {
        let mut report = FrameReport::default();

        if self.context_lost {
            if !backend.is_ready() {
                log::trace!("Backend not restored, skipping frame");
                render_stats::record_frame_skipped();
                report.frame_skipped = true;
                return report;
            }
            log::info!("Backend restored, rebuilding GPU resources");
            self.context_lost = false;
        }

        for texture in textures.drain_ready() {
            sequencer.mark_texture_dirty(texture, DirtyFlags::UVS | DirtyFlags::GEOMETRY);
        }

        match self.draw_frame(tree, sequencer, textures, backend, spans, &mut report) {
            Ok(()) => {
                self.frames += 1;
                render_stats::record_frame_rendered();
            }
            Err(error) => {
                log::warn!("Frame abandoned: {}", error);
                self.lose_context(sequencer, textures);
                render_stats::record_frame_skipped();
                report.frame_skipped = true;
            }
        }
        report
    }

    /// Forget all GPU state after a transient failure.
    fn lose_context(&mut self, sequencer: &mut BatchSequencer, textures: &mut TextureRegistry) {
        self.context_lost = true;
        sequencer.batches_mut().invalidate_gpu();
        textures.invalidate_uploads();
    }

    /// Runs a frame; an `Err` is always transient and ends the frame.
    fn draw_frame(
        &mut self,
        tree: &SceneTree,
        sequencer: &mut BatchSequencer,
        textures: &mut TextureRegistry,
        backend: &mut dyn GpuBackend,
        spans: &[(Unit, Span)],
        report: &mut FrameReport,
    ) -> Result<(), BackendError> {
        for buffer in sequencer.batches_mut().drain_retired() {
            backend.destroy_buffer(buffer);
        }
        upload_textures(textures, backend, report)?;
        backend.begin_frame()?;

        for &(unit, _) in spans {
            let Unit::Batch(id) = unit else { continue };
            let Some(batch) = sequencer.batches_mut().get_mut(id) else {
                continue;
            };
            if let Err(error) = batch.refresh_geometry(tree, tree, &*textures, backend) {
                absorb(error, report)?;
            }
        }

        for &(unit, span) in spans {
            match draw_unit(tree, sequencer, textures, backend, unit, span) {
                Ok(true) => report.draw_calls += 1,
                Ok(false) => report.skipped_units += 1,
                Err(error) => {
                    absorb(error, report)?;
                    report.skipped_units += 1;
                }
            }
        }

        backend.end_frame()
    }
}

impl Default for FrameRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Propagate transient errors; record the rest.
fn absorb(error: BackendError, report: &mut FrameReport) -> Result<(), BackendError> {
    if error.is_transient() {
        return Err(error);
    }
    log::warn!("Skipping unit: {}", error);
    report.errors.push(error);
    Ok(())
}

fn upload_textures(
    textures: &mut TextureRegistry,
    backend: &mut dyn GpuBackend,
    report: &mut FrameReport,
) -> Result<(), BackendError> {
    let mut uploaded = Vec::new();
    for (texture, image) in textures.pending_uploads() {
        match backend.upload_texture(texture, image) {
            Ok(()) => uploaded.push(texture),
            Err(error) => absorb(error, report)?,
        }
    }
    for texture in uploaded {
        textures.mark_uploaded(texture);
    }
    Ok(())
}

/// Issue the draw for one unit. `Ok(false)` means it was skipped.
fn draw_unit(
    tree: &SceneTree,
    sequencer: &BatchSequencer,
    textures: &TextureRegistry,
    backend: &mut dyn GpuBackend,
    unit: Unit,
    span: Span,
) -> Result<bool, BackendError> {
    match unit {
        Unit::Batch(id) => {
            let Some(batch) = sequencer.batch(id) else {
                return Ok(false);
            };
            match span {
                Span::Whole => batch.draw(backend),
                Span::Leaves { start, count } => batch.draw_range(backend, start, count),
            }
        }
        Unit::Special(node) => {
            if !tree.is_renderable(node) || !tree.world_visible(node) {
                return Ok(false);
            }
            let Some(kind) = tree.kind(node) else {
                return Ok(false);
            };
            let geometry = tessellate(
                kind,
                &tree.world_transform(node),
                tree.world_alpha(node),
                textures,
            );
            match geometry {
                Some(geometry) if !geometry.is_empty() && textures.is_ready(geometry.texture) => {
                    backend.draw_immediate(&geometry)?;
                    render_stats::record_draw_call();
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
        Unit::MaskBegin(marker) => {
            let shape = mask_geometry(tree, marker);
            backend.begin_mask(&shape)?;
            Ok(true)
        }
        Unit::MaskEnd(marker) => {
            let shape = mask_geometry(tree, marker);
            backend.end_mask(&shape)?;
            Ok(true)
        }
    }
}

/// Stencil geometry for the mask shape a marker refers to.
fn mask_geometry(tree: &SceneTree, marker: NodeId) -> ImmediateGeometry {
    let mask = match tree.kind(marker) {
        Some(NodeKind::MaskBegin { mask, .. } | NodeKind::MaskEnd { mask, .. }) => *mask,
        _ => return ImmediateGeometry::default(),
    };
    match tree.kind(mask) {
        Some(NodeKind::Graphics(graphics)) => {
            // The shape may live outside the rendered subtree, so resolve it directly.
            let (world, _, _) = tree.compute_world(mask);
            graphics_geometry(graphics, &world, 1.0)
        }
        _ => ImmediateGeometry::default(),
    }
}

/// First and last sequenced entries of a draw-order range.
fn sequenced_bounds(tree: &SceneTree, first: NodeId, last: NodeId) -> Option<(NodeId, NodeId)> {
    let start = tree.draw_range(first, last).find(|&n| tree.is_sequenced(n))?;
    let mut cursor = Some(last);
    while let Some(id) = cursor {
        if tree.is_sequenced(id) {
            return Some((start, id));
        }
        if id == start {
            break;
        }
        cursor = tree.draw_prev(id);
    }
    Some((start, start))
}

/// Units and leaf ranges covering `node`'s subtree, excluding its own mask markers.
fn subtree_spans(tree: &SceneTree, sequencer: &BatchSequencer, node: NodeId) -> Vec<(Unit, Span)> {
    let Some(entry) = tree.get(node) else {
        return Vec::new();
    };
    let (first, last) = match entry.mask {
        Some(link) => (node, tree.draw_prev(link.end).unwrap_or(node)),
        None => (entry.first, entry.last),
    };
    let Some((start_leaf, end_leaf)) = sequenced_bounds(tree, first, last) else {
        return Vec::new();
    };
    let (Ok(start_unit), Ok(end_unit)) = (
        sequencer.unit_of(tree, start_leaf),
        sequencer.unit_of(tree, end_leaf),
    ) else {
        return Vec::new();
    };
    let (Some(start_index), Some(end_index)) =
        (sequencer.position(start_unit), sequencer.position(end_unit))
    else {
        return Vec::new();
    };

    let offset = |unit: Unit, leaf: NodeId| match unit {
        Unit::Batch(id) => sequencer.batch(id).map(|b| (b.offset_of(tree, leaf), b.size())),
        _ => None,
    };
    let units = sequencer.units();

    if start_index == end_index {
        let span = match offset(start_unit, start_leaf).zip(offset(end_unit, end_leaf)) {
            Some(((start, _), (end, _))) => Span::Leaves {
                start,
                count: end + 1 - start,
            },
            None => Span::Whole,
        };
        return vec![(start_unit, span)];
    }

    let mut spans = Vec::with_capacity(end_index - start_index + 1);
    let head_span = match offset(start_unit, start_leaf) {
        Some((start, size)) => Span::Leaves {
            start,
            count: size - start,
        },
        None => Span::Whole,
    };
    spans.push((start_unit, head_span));
    spans.extend(
        units[start_index + 1..end_index]
            .iter()
            .map(|&unit| (unit, Span::Whole)),
    );
    let tail_span = match offset(end_unit, end_leaf) {
        Some((end, _)) => Span::Leaves {
            start: 0,
            count: end + 1,
        },
        None => Span::Whole,
    };
    spans.push((end_unit, tail_span));
    spans
}
