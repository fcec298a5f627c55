//! Shared value types for the scene and renderer.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn from_hex(hex: u32) -> Self {
        Self {
            r: ((hex >> 16) & 0xFF) as f32 / 255.0,
            g: ((hex >> 8) & 0xFF) as f32 / 255.0,
            b: (hex & 0xFF) as f32 / 255.0,
            a: 1.0,
        }
    }

    /// Multiply the alpha channel, e.g. by a world alpha.
    pub fn with_alpha_factor(self, factor: f32) -> Self {
        Self {
            a: self.a * factor,
            ..self
        }
    }

    /// Pack into premultiplied RGBA8 (`r` in the lowest byte), the vertex color format.
    pub fn to_premultiplied_rgba8(self) -> u32 {
        let a = self.a.clamp(0.0, 1.0);
        let channel = |c: f32| ((c.clamp(0.0, 1.0) * a * 255.0).round() as u32) & 0xFF;
        let alpha = ((a * 255.0).round() as u32) & 0xFF;
        channel(self.r) | (channel(self.g) << 8) | (channel(self.b) << 16) | (alpha << 24)
    }

    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const TRANSPARENT: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_size(width: f32, height: f32) -> Self {
        Self::new(0.0, 0.0, width, height)
    }

    pub fn offset(&self, dx: f32, dy: f32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }

    /// True when the rect covers no pixels.
    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// How a renderable is composited onto what is already drawn.
///
/// Part of a batch's identity: two sprites only share a batch when both
/// texture and blend mode match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Add,
    Multiply,
    Screen,
}

impl BlendMode {
    pub const ALL: [BlendMode; 4] = [
        BlendMode::Normal,
        BlendMode::Add,
        BlendMode::Multiply,
        BlendMode::Screen,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_empty() {
        assert!(Rect::new(0.0, 0.0, 0.0, 10.0).is_empty());
        assert!(Rect::new(0.0, 0.0, 10.0, -1.0).is_empty());
        assert!(!Rect::new(5.0, 5.0, 1.0, 1.0).is_empty());
    }

    #[test]
    fn test_color_premultiplied_packing() {
        assert_eq!(Color::WHITE.to_premultiplied_rgba8(), 0xFFFF_FFFF);
        assert_eq!(Color::TRANSPARENT.to_premultiplied_rgba8(), 0);

        let half_red = Color::rgba(1.0, 0.0, 0.0, 0.5);
        let packed = half_red.to_premultiplied_rgba8();
        assert_eq!(packed & 0xFF, 128);
        assert_eq!(packed >> 24, 128);
    }

    #[test]
    fn test_color_alpha_factor() {
        let c = Color::rgba(0.2, 0.4, 0.6, 0.5).with_alpha_factor(0.5);
        assert_eq!(c.a, 0.25);
        assert_eq!(c.r, 0.2);
    }
}
