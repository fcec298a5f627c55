//! Vertex format shared by batched sprites and immediate geometry.

/// Vertex in world pixels; the backend maps to clip space with the viewport.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SpriteVertex {
    /// World position in pixels
    pub position: [f32; 2],
    /// Normalized texture coordinates
    pub uv: [f32; 2],
    /// Premultiplied RGBA8, `r` in the lowest byte
    pub color: u32,
}

pub const VERTEX_SIZE: usize = std::mem::size_of::<SpriteVertex>();

pub const VERTICES_PER_QUAD: usize = 4;
pub const INDICES_PER_QUAD: usize = 6;

/// Corner order of a quad's four vertices: top-left, top-right, bottom-right, bottom-left.
pub const QUAD_INDEX_PATTERN: [u16; INDICES_PER_QUAD] = [0, 1, 2, 0, 2, 3];

/// Index data for `quads` consecutive quads.
pub fn quad_indices(quads: usize) -> Vec<u16> {
    let mut indices = Vec::with_capacity(quads * INDICES_PER_QUAD);
    for quad in 0..quads {
        let base = (quad * VERTICES_PER_QUAD) as u16;
        indices.extend(QUAD_INDEX_PATTERN.iter().map(|i| base + i));
    }
    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout_is_packed() {
        assert_eq!(VERTEX_SIZE, 20);
    }

    #[test]
    fn test_quad_indices_pattern() {
        assert_eq!(quad_indices(2), vec![0, 1, 2, 0, 2, 3, 4, 5, 6, 4, 6, 7]);
        assert!(quad_indices(0).is_empty());
    }
}
