//! Runtime font loading and glyph rasterization for subtitle/watermark text.
//!
//! Fonts are loaded from disk at runtime (explicit path first, then common
//! system locations). Nothing is embedded in the binary.

use std::path::{Path, PathBuf};

use crate::error::{EngineResult, RenderError};

const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Pick a usable font file: the explicit path when given, else the first
/// system candidate that exists.
pub fn resolve_font_path(explicit: Option<&Path>) -> EngineResult<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(RenderError::validation(format!(
            "font file '{}' does not exist",
            path.display()
        )));
    }

    SYSTEM_FONT_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .ok_or_else(|| {
            RenderError::validation(
                "no usable font found; set an explicit font path for text overlays",
            )
        })
}

pub struct FontRaster {
    font: fontdue::Font,
}

/// A rasterized line of text: straight-alpha RGBA pixels plus baseline info.
pub struct TextPatch {
    pub image: image::RgbaImage,
}

impl FontRaster {
    pub fn load(path: &Path) -> EngineResult<Self> {
        use anyhow::Context as _;
        let bytes = std::fs::read(path)
            .with_context(|| format!("read font file '{}'", path.display()))?;
        let font = fontdue::Font::from_bytes(bytes, fontdue::FontSettings::default())
            .map_err(|e| RenderError::validation(format!("parse font '{}': {e}", path.display())))?;
        Ok(Self { font })
    }

    /// Measure a single line at the given pixel size: (width, height).
    pub fn measure(&self, text: &str, px: f32) -> (u32, u32) {
        let mut total_width: i32 = 0;
        let mut max_ascent: i32 = 0;
        let mut max_descent: i32 = 0;
        for ch in text.chars() {
            let metrics = self.font.metrics(ch, px);
            let ascent = metrics.height as i32 + metrics.ymin;
            let descent = -metrics.ymin;
            max_ascent = max_ascent.max(ascent);
            max_descent = max_descent.max(descent);
            total_width += metrics.advance_width.round() as i32;
        }
        (
            total_width.max(1) as u32,
            (max_ascent + max_descent).max(1) as u32,
        )
    }

    /// Rasterize a single line into a tight RGBA patch.
    pub fn rasterize_line(&self, text: &str, px: f32, rgba: [u8; 4]) -> TextPatch {
        let (width, height) = self.measure(text, px);
        let mut image = image::RgbaImage::new(width, height);

        let mut max_ascent: i32 = 0;
        for ch in text.chars() {
            let metrics = self.font.metrics(ch, px);
            max_ascent = max_ascent.max(metrics.height as i32 + metrics.ymin);
        }

        let [r, g, b, a] = rgba;
        let mut cursor_x: i32 = 0;
        for ch in text.chars() {
            let (metrics, bitmap) = self.font.rasterize(ch, px);
            let glyph_x = cursor_x + metrics.xmin;
            let glyph_y = max_ascent - (metrics.height as i32 + metrics.ymin);

            for gy in 0..metrics.height {
                for gx in 0..metrics.width {
                    let coverage = bitmap[gy * metrics.width + gx];
                    if coverage == 0 {
                        continue;
                    }
                    let x = glyph_x + gx as i32;
                    let y = glyph_y + gy as i32;
                    if x >= 0 && (x as u32) < width && y >= 0 && (y as u32) < height {
                        let alpha =
                            ((coverage as u16 * a as u16 + 127) / 255).min(255) as u8;
                        image.put_pixel(x as u32, y as u32, image::Rgba([r, g, b, alpha]));
                    }
                }
            }
            cursor_x += metrics.advance_width.round() as i32;
        }

        TextPatch { image }
    }
}
