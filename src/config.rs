//! Renderer tuning knobs.

use crate::types::Color;

/// Settings a [`Stage`](crate::stage::Stage) is created with.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Upper bound on sprites per batch. Further clamped so a batch never
    /// exceeds the backend's per-draw vertex range.
    pub max_batch_size: usize,
    /// Leaf capacity a fresh batch starts with.
    pub initial_batch_capacity: usize,
    /// Emptied batches kept for reuse; beyond this their buffers are freed.
    pub pool_limit: usize,
    pub clear_color: Color,
    /// Viewport size in pixels.
    pub viewport: (u32, u32),
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 4096,
            initial_batch_capacity: 4,
            pool_limit: 32,
            clear_color: Color::TRANSPARENT,
            viewport: (800, 600),
        }
    }
}

impl RendererConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_batch_size(mut self, leaves: usize) -> Self {
        self.max_batch_size = leaves.max(1);
        self
    }

    pub fn initial_batch_capacity(mut self, leaves: usize) -> Self {
        self.initial_batch_capacity = leaves.max(1);
        self
    }

    pub fn pool_limit(mut self, batches: usize) -> Self {
        self.pool_limit = batches;
        self
    }

    pub fn clear_color(mut self, color: Color) -> Self {
        self.clear_color = color;
        self
    }

    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = (width, height);
        self
    }

    /// Effective leaf limit for a backend addressing `max_vertices` per draw.
    pub fn leaf_limit(&self, max_vertices: usize) -> usize {
        self.max_batch_size
            .min(max_vertices / crate::renderer::vertex::VERTICES_PER_QUAD)
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides_defaults() {
        let config = RendererConfig::new()
            .max_batch_size(0)
            .pool_limit(2)
            .viewport(64, 32);
        assert_eq!(config.max_batch_size, 1);
        assert_eq!(config.pool_limit, 2);
        assert_eq!(config.viewport, (64, 32));
        assert_eq!(config.initial_batch_capacity, 4);
    }

    #[test]
    fn test_leaf_limit_respects_backend_range() {
        let config = RendererConfig::new().max_batch_size(100_000);
        assert_eq!(config.leaf_limit(65536), 16384);
        assert_eq!(config.leaf_limit(2), 1);
        assert_eq!(RendererConfig::new().max_batch_size(10).leaf_limit(65536), 10);
    }
}
