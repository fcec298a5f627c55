mod common;

use common::{assert_consistent, texture, unit_shapes};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use stagebatch::prelude::*;

/// Seeded so a failing walk reproduces.
fn random_walk(seed: u64, steps: usize, config: RendererConfig) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut stage = Stage::with_config(RecordingBackend::new(), config);
    common::init_logging();
    let textures = [
        texture(&mut stage, 4),
        texture(&mut stage, 8),
        texture(&mut stage, 16),
    ];
    let blends = [BlendMode::Normal, BlendMode::Add];

    let mut containers = vec![stage.root()];
    let mut nodes: Vec<NodeId> = Vec::new();

    for step in 0..steps {
        match rng.random_range(0..10) {
            0..=3 => {
                let texture = *textures.choose(&mut rng).unwrap();
                let sprite = Sprite::new(texture, Rect::from_size(4.0, 4.0))
                    .with_blend(*blends.choose(&mut rng).unwrap());
                let node = stage.create_sprite(sprite);
                let parent = *containers.choose(&mut rng).unwrap();
                let index = rng.random_range(0..=stage.tree().children(parent).len());
                stage.add_child_at(parent, node, index).unwrap();
                nodes.push(node);
            }
            4 => {
                let node = stage.create_container();
                let parent = *containers.choose(&mut rng).unwrap();
                stage.add_child(parent, node).unwrap();
                containers.push(node);
                nodes.push(node);
            }
            5 => {
                let node = stage.create_graphics(
                    Graphics::new(Color::WHITE).rect(Rect::from_size(3.0, 3.0)),
                );
                let parent = *containers.choose(&mut rng).unwrap();
                stage.add_child(parent, node).unwrap();
                nodes.push(node);
            }
            6 if !nodes.is_empty() => {
                // Move a node somewhere that does not create a cycle.
                let node = *nodes.choose(&mut rng).unwrap();
                let parent = *containers.choose(&mut rng).unwrap();
                if !stage.tree().is_ancestor_or_self(node, parent) {
                    stage.add_child(parent, node).unwrap();
                }
            }
            7 if !nodes.is_empty() => {
                let node = nodes.swap_remove(rng.random_range(0..nodes.len()));
                let doomed: Vec<NodeId> = stage.tree().draw_order(node).collect();
                stage.destroy(node).unwrap();
                nodes.retain(|n| !doomed.contains(n));
                containers.retain(|c| !doomed.contains(c));
            }
            8 if !nodes.is_empty() => {
                let node = *nodes.choose(&mut rng).unwrap();
                if rng.random_bool(0.5) {
                    let shape = stage.create_graphics(
                        Graphics::new(Color::WHITE).rect(Rect::from_size(1.0, 1.0)),
                    );
                    stage.set_mask(node, shape).unwrap();
                } else {
                    stage.clear_mask(node).unwrap();
                }
            }
            9 if !nodes.is_empty() => {
                let node = *nodes.choose(&mut rng).unwrap();
                if matches!(
                    stage.tree().kind(node),
                    Some(stagebatch::scene::NodeKind::Sprite(_))
                ) {
                    let texture = *textures.choose(&mut rng).unwrap();
                    stage
                        .set_texture(node, texture, Rect::from_size(4.0, 4.0))
                        .unwrap();
                }
            }
            _ => {}
        }
        assert_consistent(&stage);

        if step % 16 == 0 {
            let report = stage.render_all();
            assert!(report.errors.is_empty(), "step {step}: {:?}", report.errors);
            assert!(!report.frame_skipped);
        }
    }
}

#[test]
fn test_random_walk_keeps_list_in_draw_order() {
    for seed in [1, 7, 42, 1234] {
        random_walk(seed, 300, RendererConfig::default());
    }
}

#[test]
fn test_random_walk_with_tiny_batches() {
    for seed in [3, 99] {
        random_walk(seed, 300, RendererConfig::default().max_batch_size(3));
    }
}

#[test]
fn test_adjacent_unmerged_batches_keep_order() {
    let mut stage = common::stage();
    let t1 = texture(&mut stage, 8);
    let t2 = texture(&mut stage, 8);
    let root = stage.root();
    let a = common::sprite(&mut stage, t1);
    let x = common::sprite(&mut stage, t2);
    let b = common::sprite(&mut stage, t1);
    for leaf in [a, x, b] {
        stage.add_child(root, leaf).unwrap();
    }

    // Moving `x` to the end leaves [a] and [b] adjacent; they merge on removal.
    stage.add_child(root, x).unwrap();
    let shapes = unit_shapes(&stage);
    assert_eq!(stage.sequencer().leaf_sequence(stage.tree()), vec![a, b, x]);
    assert!(shapes.len() <= 3);

    let c = common::sprite(&mut stage, t1);
    stage.add_child_at(root, c, 1).unwrap();
    assert_eq!(
        stage.sequencer().leaf_sequence(stage.tree()),
        vec![a, c, b, x]
    );
    assert_consistent(&stage);
}
