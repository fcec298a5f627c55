#![allow(dead_code)]

use image::RgbaImage;
use stagebatch::prelude::*;
use stagebatch::scene::NodeKind;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn stage() -> Stage<RecordingBackend> {
    init_logging();
    Stage::new(RecordingBackend::new())
}

pub fn texture(stage: &mut Stage<RecordingBackend>, size: u32) -> TextureId {
    stage.textures_mut().insert(RgbaImage::new(size, size))
}

pub fn sprite(stage: &mut Stage<RecordingBackend>, texture: TextureId) -> NodeId {
    stage.create_sprite(Sprite::new(texture, Rect::from_size(4.0, 4.0)))
}

/// Structure of the unit list with batch identity erased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitShape {
    Batch(Vec<NodeId>),
    Special(NodeId),
    MaskBegin,
    MaskEnd,
}

pub fn unit_shapes<B: GpuBackend>(stage: &Stage<B>) -> Vec<UnitShape> {
    let tree = stage.tree();
    stage
        .sequencer()
        .units()
        .iter()
        .map(|unit| match *unit {
            Unit::Batch(id) => UnitShape::Batch(
                stage
                    .sequencer()
                    .batch(id)
                    .map(|b| b.leaves(tree).collect())
                    .unwrap_or_default(),
            ),
            Unit::Special(node) => UnitShape::Special(node),
            Unit::MaskBegin(_) => UnitShape::MaskBegin,
            Unit::MaskEnd(_) => UnitShape::MaskEnd,
        })
        .collect()
}

/// Draw-order walk of the stage, keeping only entries the sequencer tracks.
pub fn expected_leaves<B: GpuBackend>(stage: &Stage<B>) -> Vec<NodeId> {
    let tree = stage.tree();
    tree.draw_order(stage.root())
        .filter(|&id| tree.kind(id).is_some_and(NodeKind::is_sequenced_kind))
        .collect()
}

/// Check every structural invariant of the unit list against the tree.
pub fn assert_consistent<B: GpuBackend>(stage: &Stage<B>) {
    let tree = stage.tree();
    let sequencer = stage.sequencer();
    assert_eq!(sequencer.leaf_sequence(tree), expected_leaves(stage));

    for unit in sequencer.units() {
        if let Unit::Batch(id) = *unit {
            let batch = sequencer.batch(id).expect("unit refers to a live batch");
            assert!(!batch.is_empty(), "empty batch {id:?} left in the list");
            assert!(batch.size() <= sequencer.max_leaves());
            let leaves: Vec<NodeId> = batch.leaves(tree).collect();
            assert_eq!(leaves.len(), batch.size());
            for leaf in leaves {
                let Some(NodeKind::Sprite(sprite)) = tree.kind(leaf) else {
                    panic!("non-sprite {leaf:?} in batch {id:?}");
                };
                assert_eq!(sprite.texture, batch.key().texture);
                assert_eq!(sprite.blend, batch.key().blend);
            }
        }
    }
}
