//! Texture handles, metadata and readiness tracking.
//!
//! The registry owns CPU-side pixel data and tells the renderer which
//! textures became ready since the last frame. GPU objects live in the
//! backend and are keyed by [`TextureId`].

use std::collections::HashMap;

use image::RgbaImage;

/// Opaque handle to a registered texture.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct TextureId(pub(crate) u32);

impl TextureId {
    /// Built-in 1×1 opaque white texture, used for untextured fills.
    pub const WHITE: TextureId = TextureId(0);

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl Default for TextureId {
    fn default() -> Self {
        TextureId::WHITE
    }
}

/// Read-only texture queries used while building geometry.
pub trait TextureProvider {
    /// Pixel size, or `None` for an unknown id.
    fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)>;

    /// True once pixel data is available and the texture may be sampled.
    fn is_ready(&self, texture: TextureId) -> bool;
}

struct TextureEntry {
    width: u32,
    height: u32,
    image: Option<RgbaImage>,
    /// Pixel data has been handed to the current backend.
    uploaded: bool,
}

impl TextureEntry {
    fn ready(&self) -> bool {
        self.image.is_some()
    }
}

/// All textures known to a stage.
pub struct TextureRegistry {
    entries: HashMap<TextureId, TextureEntry>,
    next_id: u32,
    /// Textures that became ready since the last drain.
    ready_queue: Vec<TextureId>,
}

impl TextureRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            entries: HashMap::new(),
            next_id: 1,
            ready_queue: Vec::new(),
        };
        registry.entries.insert(
            TextureId::WHITE,
            TextureEntry {
                width: 1,
                height: 1,
                image: Some(RgbaImage::from_pixel(1, 1, image::Rgba([255, 255, 255, 255]))),
                uploaded: false,
            },
        );
        registry
    }

    fn allocate(&mut self, entry: TextureEntry) -> TextureId {
        let id = TextureId(self.next_id);
        self.next_id += 1;
        self.entries.insert(id, entry);
        id
    }

    /// Register a texture whose pixels arrive later through [`Self::fulfill`].
    pub fn reserve(&mut self, width: u32, height: u32) -> TextureId {
        let id = self.allocate(TextureEntry {
            width,
            height,
            image: None,
            uploaded: false,
        });
        log::debug!("Reserved texture {:?} ({}x{})", id, width, height);
        id
    }

    /// Register a texture that is ready immediately.
    pub fn insert(&mut self, image: RgbaImage) -> TextureId {
        let (width, height) = image.dimensions();
        self.allocate(TextureEntry {
            width,
            height,
            image: Some(image),
            uploaded: false,
        })
    }

    /// Decode an encoded image (PNG) and register it.
    pub fn insert_encoded(&mut self, bytes: &[u8]) -> Result<TextureId, image::ImageError> {
        let decoded = image::load_from_memory(bytes)?.to_rgba8();
        Ok(self.insert(decoded))
    }

    /// Supply pixel data for a reserved texture and queue a readiness notification.
    ///
    /// Returns false for an unknown id.
    pub fn fulfill(&mut self, texture: TextureId, image: RgbaImage) -> bool {
        let Some(entry) = self.entries.get_mut(&texture) else {
            log::warn!("Ignoring pixel data for unknown texture {:?}", texture);
            return false;
        };
        let (width, height) = image.dimensions();
        entry.width = width;
        entry.height = height;
        entry.image = Some(image);
        entry.uploaded = false;
        self.ready_queue.push(texture);
        true
    }

    /// Take the textures that became ready since the previous call.
    pub fn drain_ready(&mut self) -> Vec<TextureId> {
        std::mem::take(&mut self.ready_queue)
    }

    /// Ready textures whose pixels the backend has not received yet.
    pub(crate) fn pending_uploads(&self) -> impl Iterator<Item = (TextureId, &RgbaImage)> {
        self.entries.iter().filter_map(|(&id, entry)| match &entry.image {
            Some(image) if !entry.uploaded => Some((id, image)),
            _ => None,
        })
    }

    pub(crate) fn mark_uploaded(&mut self, texture: TextureId) {
        if let Some(entry) = self.entries.get_mut(&texture) {
            entry.uploaded = true;
        }
    }

    /// Forget every upload, e.g. after the graphics context was lost.
    pub(crate) fn invalidate_uploads(&mut self) {
        for entry in self.entries.values_mut() {
            entry.uploaded = false;
        }
    }

    pub fn remove(&mut self, texture: TextureId) -> bool {
        if texture == TextureId::WHITE {
            return false;
        }
        self.ready_queue.retain(|&t| t != texture);
        self.entries.remove(&texture).is_some()
    }

    pub fn contains(&self, texture: TextureId) -> bool {
        self.entries.contains_key(&texture)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TextureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TextureProvider for TextureRegistry {
    fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.entries.get(&texture).map(|e| (e.width, e.height))
    }

    fn is_ready(&self, texture: TextureId) -> bool {
        self.entries.get(&texture).is_some_and(TextureEntry::ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_white_texture_is_builtin() {
        let registry = TextureRegistry::new();
        assert!(registry.is_ready(TextureId::WHITE));
        assert_eq!(registry.texture_size(TextureId::WHITE), Some((1, 1)));
    }

    #[test]
    fn test_reserve_then_fulfill_queues_notification() {
        let mut registry = TextureRegistry::new();
        let id = registry.reserve(16, 16);
        assert!(!registry.is_ready(id));
        assert!(registry.drain_ready().is_empty());

        assert!(registry.fulfill(id, RgbaImage::new(32, 8)));
        assert!(registry.is_ready(id));
        assert_eq!(registry.texture_size(id), Some((32, 8)));
        assert_eq!(registry.drain_ready(), vec![id]);
        assert!(registry.drain_ready().is_empty());
    }

    #[test]
    fn test_upload_tracking() {
        let mut registry = TextureRegistry::new();
        let id = registry.insert(RgbaImage::new(4, 4));
        assert_eq!(registry.pending_uploads().count(), 2);

        registry.mark_uploaded(TextureId::WHITE);
        registry.mark_uploaded(id);
        assert_eq!(registry.pending_uploads().count(), 0);

        registry.invalidate_uploads();
        assert_eq!(registry.pending_uploads().count(), 2);
    }

    #[test]
    fn test_white_cannot_be_removed() {
        let mut registry = TextureRegistry::new();
        assert!(!registry.remove(TextureId::WHITE));
        let id = registry.insert(RgbaImage::new(1, 1));
        assert!(registry.remove(id));
        assert!(!registry.contains(id));
    }
}
