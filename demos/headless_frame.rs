//! Builds a small scene and renders a few frames without a window.
//!
//! Uses the wgpu backend when an adapter is available and falls back to the
//! recording backend otherwise.
//!
//! ```bash
//! cargo run --example headless_frame --features render-stats
//! ```

use image::RgbaImage;
use stagebatch::prelude::*;

fn build_scene<B: GpuBackend>(stage: &mut Stage<B>) -> SceneResult<()> {
    let checker = RgbaImage::from_fn(16, 16, |x, y| {
        if (x / 4 + y / 4) % 2 == 0 {
            image::Rgba([230, 230, 240, 255])
        } else {
            image::Rgba([40, 40, 60, 255])
        }
    });
    let tiles = stage.textures_mut().insert(checker);
    let root = stage.root();

    // A grid of sprites sharing one texture: a single batch.
    let grid = stage.create_container();
    stage.add_child(root, grid)?;
    for row in 0..8 {
        for col in 0..8 {
            let sprite = stage.create_sprite(
                Sprite::new(tiles, Rect::from_size(16.0, 16.0))
                    .with_tint(Color::rgb(0.5 + row as f32 / 16.0, 0.8, 1.0)),
            );
            stage.set_transform(
                sprite,
                Transform::translate(20.0 * col as f32, 20.0 * row as f32),
            )?;
            stage.add_child(grid, sprite)?;
        }
    }

    // An additive sprite in the middle of the grid splits the batch.
    let glow = stage.create_sprite(
        Sprite::new(TextureId::WHITE, Rect::from_size(1.0, 1.0)).with_blend(BlendMode::Add),
    );
    stage.set_transform(glow, Transform::translate(60.0, 60.0).then(&Transform::scale(40.0)))?;
    stage.add_child_at(grid, glow, 32)?;

    // Clip the grid to a circle.
    let clip = stage.create_graphics(Graphics::new(Color::WHITE).circle(80.0, 80.0, 70.0));
    stage.set_mask(grid, clip)?;

    let backdrop = stage.create_tiling_sprite(TilingSprite::new(tiles, 320.0, 40.0));
    stage.set_transform(backdrop, Transform::translate(0.0, 180.0))?;
    stage.add_child(root, backdrop)?;
    Ok(())
}

fn run<B: GpuBackend>(mut stage: Stage<B>) -> SceneResult<()> {
    build_scene(&mut stage)?;
    log::info!("{} units in the draw list", stage.sequencer().units().len());

    for frame in 0..3 {
        let report = stage.render_all();
        log::info!(
            "frame {}: {} draws, {} skipped",
            frame,
            report.draw_calls,
            report.skipped_units
        );
    }

    let stats = stagebatch::render_stats::get_stats();
    log::info!("stats: {:?}", stats);
    Ok(())
}

fn main() -> SceneResult<()> {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    let config = RendererConfig::new()
        .viewport(320, 240)
        .clear_color(Color::from_hex(0x14141e));
    match WgpuBackend::headless(320, 240) {
        Ok(backend) => run(Stage::with_config(backend, config)),
        Err(error) => {
            log::warn!("{}, using the recording backend", error);
            run(Stage::with_config(RecordingBackend::new(), config))
        }
    }
}
