//! Tessellation of non-batchable renderables into immediate geometry.
//!
//! Tiling sprites, meshes and graphics are drawn one unit at a time. Their
//! geometry is rebuilt from the node payload and world state each frame.

use std::f32::consts::TAU;

use crate::scene::{Graphics, Mesh, NodeKind, Shape, TilingSprite};
use crate::texture::{TextureId, TextureProvider};
use crate::transform::Transform;

use super::backend::ImmediateGeometry;
use super::vertex::{SpriteVertex, QUAD_INDEX_PATTERN};

const MIN_CIRCLE_SEGMENTS: usize = 8;
const MAX_CIRCLE_SEGMENTS: usize = 96;

/// Build draw geometry for a special node.
///
/// Returns `None` for kinds drawn elsewhere (sprites, containers, markers)
/// and for payloads that cannot be drawn (missing texture, bad indices).
pub fn tessellate(
    kind: &NodeKind,
    world: &Transform,
    alpha: f32,
    textures: &dyn TextureProvider,
) -> Option<ImmediateGeometry> {
    match kind {
        NodeKind::TilingSprite(tiling) => tiling_geometry(tiling, world, alpha, textures),
        NodeKind::Mesh(mesh) => mesh_geometry(mesh, world, alpha),
        NodeKind::Graphics(graphics) => Some(graphics_geometry(graphics, world, alpha)),
        _ => None,
    }
}

fn tiling_geometry(
    tiling: &TilingSprite,
    world: &Transform,
    alpha: f32,
    textures: &dyn TextureProvider,
) -> Option<ImmediateGeometry> {
    let (tw, th) = textures
        .texture_size(tiling.texture)
        .filter(|&(w, h)| w > 0 && h > 0)?;
    let (sx, sy) = tiling.tile_scale;
    if sx == 0.0 || sy == 0.0 || tiling.width <= 0.0 || tiling.height <= 0.0 {
        return None;
    }
    let tile_w = tw as f32 * sx;
    let tile_h = th as f32 * sy;
    let (ox, oy) = tiling.tile_offset;
    let u = |x: f32| (x - ox) / tile_w;
    let v = |y: f32| (y - oy) / tile_h;

    let color = tiling.tint.with_alpha_factor(alpha).to_premultiplied_rgba8();
    let (w, h) = (tiling.width, tiling.height);
    let corners = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
    let vertices = corners
        .iter()
        .map(|&(x, y)| vertex(world, x, y, [u(x), v(y)], color))
        .collect();

    Some(ImmediateGeometry {
        vertices,
        indices: QUAD_INDEX_PATTERN.to_vec(),
        texture: tiling.texture,
        blend: tiling.blend,
        repeat: true,
    })
}

fn mesh_geometry(mesh: &Mesh, world: &Transform, alpha: f32) -> Option<ImmediateGeometry> {
    let count = mesh.vertices.len().min(mesh.uvs.len());
    if mesh.indices.iter().any(|&i| i as usize >= count) {
        log::warn!(
            "Mesh index out of range ({} vertices with uvs), skipping",
            count
        );
        return None;
    }
    let color = mesh.tint.with_alpha_factor(alpha).to_premultiplied_rgba8();
    let vertices = mesh
        .vertices
        .iter()
        .zip(&mesh.uvs)
        .map(|(&[x, y], &uv)| vertex(world, x, y, uv, color))
        .collect();

    Some(ImmediateGeometry {
        vertices,
        indices: mesh.indices.clone(),
        texture: mesh.texture,
        blend: mesh.blend,
        repeat: false,
    })
}

/// Solid fill over the white texture. Also used for mask shapes.
pub fn graphics_geometry(graphics: &Graphics, world: &Transform, alpha: f32) -> ImmediateGeometry {
    let color = graphics.fill.with_alpha_factor(alpha).to_premultiplied_rgba8();
    let mut builder = FanBuilder {
        world,
        color,
        vertices: Vec::new(),
        indices: Vec::new(),
    };

    for shape in &graphics.shapes {
        match shape {
            Shape::Rect(rect) => {
                if rect.is_empty() {
                    continue;
                }
                builder.fan(&[
                    [rect.x, rect.y],
                    [rect.right(), rect.y],
                    [rect.right(), rect.bottom()],
                    [rect.x, rect.bottom()],
                ]);
            }
            Shape::Circle { cx, cy, radius } => {
                if *radius <= 0.0 {
                    continue;
                }
                let segments = ((radius.sqrt() * 4.0).ceil() as usize)
                    .clamp(MIN_CIRCLE_SEGMENTS, MAX_CIRCLE_SEGMENTS);
                let points: Vec<[f32; 2]> = (0..segments)
                    .map(|i| {
                        let angle = TAU * i as f32 / segments as f32;
                        [cx + radius * angle.cos(), cy + radius * angle.sin()]
                    })
                    .collect();
                builder.fan(&points);
            }
            Shape::Polygon(points) => builder.fan(points),
        }
    }

    ImmediateGeometry {
        vertices: builder.vertices,
        indices: builder.indices,
        texture: TextureId::WHITE,
        blend: graphics.blend,
        repeat: false,
    }
}

struct FanBuilder<'a> {
    world: &'a Transform,
    color: u32,
    vertices: Vec<SpriteVertex>,
    indices: Vec<u16>,
}

impl FanBuilder<'_> {
    /// Triangulate a convex outline as a fan around its first point.
    fn fan(&mut self, points: &[[f32; 2]]) {
        if points.len() < 3 || self.vertices.len() + points.len() > u16::MAX as usize + 1 {
            return;
        }
        let base = self.vertices.len() as u16;
        for &[x, y] in points {
            self.vertices
                .push(vertex(self.world, x, y, [0.5, 0.5], self.color));
        }
        for i in 1..(points.len() as u16 - 1) {
            self.indices.extend([base, base + i, base + i + 1]);
        }
    }
}

fn vertex(world: &Transform, x: f32, y: f32, uv: [f32; 2], color: u32) -> SpriteVertex {
    let (px, py) = world.transform_point(x, y);
    SpriteVertex {
        position: [px, py],
        uv,
        color,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::TextureRegistry;
    use crate::types::{Color, Rect};

    #[test]
    fn test_graphics_rect_and_polygon() {
        let graphics = Graphics::new(Color::WHITE)
            .rect(Rect::new(0.0, 0.0, 10.0, 10.0))
            .polygon(vec![[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [2.0, 6.0], [0.0, 4.0]]);
        let geometry = graphics_geometry(&graphics, &Transform::translate(1.0, 2.0), 1.0);

        assert_eq!(geometry.vertices.len(), 9);
        assert_eq!(geometry.indices.len(), 6 + 9);
        assert_eq!(&geometry.indices[..6], &[0, 1, 2, 0, 2, 3]);
        assert_eq!(&geometry.indices[6..9], &[4, 5, 6]);
        assert_eq!(geometry.vertices[2].position, [11.0, 12.0]);
        assert_eq!(geometry.texture, TextureId::WHITE);
    }

    #[test]
    fn test_degenerate_shapes_are_skipped() {
        let graphics = Graphics::new(Color::WHITE)
            .rect(Rect::new(0.0, 0.0, 0.0, 5.0))
            .circle(0.0, 0.0, 0.0)
            .polygon(vec![[0.0, 0.0], [1.0, 1.0]]);
        assert!(graphics_geometry(&graphics, &Transform::IDENTITY, 1.0).is_empty());
    }

    #[test]
    fn test_circle_segment_count_is_bounded() {
        let small = Graphics::new(Color::WHITE).circle(0.0, 0.0, 1.0);
        let huge = Graphics::new(Color::WHITE).circle(0.0, 0.0, 1.0e6);
        let small = graphics_geometry(&small, &Transform::IDENTITY, 1.0);
        let huge = graphics_geometry(&huge, &Transform::IDENTITY, 1.0);
        assert_eq!(small.vertices.len(), MIN_CIRCLE_SEGMENTS);
        assert_eq!(huge.vertices.len(), MAX_CIRCLE_SEGMENTS);
    }

    #[test]
    fn test_tiling_uvs_repeat() {
        let textures = TextureRegistry::new();
        let mut tiling = TilingSprite::new(TextureId::WHITE, 4.0, 2.0);
        tiling.tile_offset = (1.0, 0.0);
        let kind = NodeKind::TilingSprite(tiling);
        let geometry = tessellate(&kind, &Transform::IDENTITY, 1.0, &textures).unwrap();

        assert!(geometry.repeat);
        assert_eq!(geometry.vertices[0].uv, [-1.0, 0.0]);
        assert_eq!(geometry.vertices[2].uv, [3.0, 2.0]);
    }

    #[test]
    fn test_mesh_rejects_out_of_range_indices() {
        let mesh = Mesh::new(
            TextureId::WHITE,
            vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
            vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
            vec![0, 1, 3],
        );
        let textures = TextureRegistry::new();
        assert!(tessellate(&NodeKind::Mesh(mesh), &Transform::IDENTITY, 1.0, &textures).is_none());
    }

    #[test]
    fn test_mesh_applies_tint_and_alpha() {
        let mut mesh = Mesh::new(
            TextureId::WHITE,
            vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
            vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
            vec![0, 1, 2],
        );
        mesh.tint = Color::rgb(1.0, 0.0, 0.0);
        let textures = TextureRegistry::new();
        let geometry =
            tessellate(&NodeKind::Mesh(mesh), &Transform::IDENTITY, 0.0, &textures).unwrap();
        assert!(geometry.vertices.iter().all(|v| v.color == 0));
    }
}
