//! Pure, backend-agnostic rendering primitives: contain-fit placement,
//! transition blends, subtitle overlay and watermark drawing.
//!
//! The streaming backend calls these once per frame; the process-based
//! backends derive their filter-graph parameters from the same math so all
//! three variants agree on geometry.

use image::{imageops, Rgba, RgbaImage};

use crate::{
    model::{SubtitleSegment, TransitionKind, Watermark, WatermarkCorner},
    text::FontRaster,
};

/// Padding inside the subtitle background box, in pixels.
pub const SUBTITLE_PAD_PX: u32 = 12;
/// Distance from the canvas bottom to the subtitle box, in pixels.
pub const SUBTITLE_BOTTOM_MARGIN_PX: u32 = 48;
/// Padding between the watermark text and its corner anchor, in pixels.
pub const WATERMARK_PAD_PX: u32 = 16;

/// Subtitle font size as a fraction of canvas height.
pub const SUBTITLE_SIZE_FRAC: f32 = 0.045;
/// Watermark font size as a fraction of canvas height.
pub const WATERMARK_SIZE_FRAC: f32 = 0.025;

/// Where a contain-fitted asset lands on the canvas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlacedRect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

/// Contain-fit: scale uniformly so the asset fits fully inside the canvas,
/// centered, with letterbox/pillarbox padding. An exact aspect-ratio tie
/// fills the canvas with no padding.
pub fn contain_fit(asset_w: u32, asset_h: u32, canvas_w: u32, canvas_h: u32) -> PlacedRect {
    let scale = f64::min(
        f64::from(canvas_w) / f64::from(asset_w.max(1)),
        f64::from(canvas_h) / f64::from(asset_h.max(1)),
    );
    let width = ((f64::from(asset_w) * scale).round() as u32).clamp(1, canvas_w);
    let height = ((f64::from(asset_h) * scale).round() as u32).clamp(1, canvas_h);
    PlacedRect {
        x: i64::from((canvas_w - width) / 2),
        y: i64::from((canvas_h - height) / 2),
        width,
        height,
    }
}

/// Per-layer transform during a transition window. `translate_x` is a
/// fraction of the canvas width; `scale` is applied about the canvas
/// midpoint.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerPlacement {
    pub opacity: f64,
    pub translate_x: f64,
    pub scale: f64,
}

impl LayerPlacement {
    pub const IDENTITY: LayerPlacement = LayerPlacement {
        opacity: 1.0,
        translate_x: 0.0,
        scale: 1.0,
    };
}

/// Transforms for the outgoing and incoming layers at progress `p` in
/// `[0, 1]` within a transition window.
pub fn transition_layers(kind: TransitionKind, p: f64) -> (LayerPlacement, LayerPlacement) {
    let p = p.clamp(0.0, 1.0);
    match kind {
        TransitionKind::Fade => (
            LayerPlacement {
                opacity: 1.0 - p,
                ..LayerPlacement::IDENTITY
            },
            LayerPlacement {
                opacity: p,
                ..LayerPlacement::IDENTITY
            },
        ),
        TransitionKind::Slide => (
            LayerPlacement {
                translate_x: -p,
                ..LayerPlacement::IDENTITY
            },
            LayerPlacement {
                translate_x: 1.0 - p,
                ..LayerPlacement::IDENTITY
            },
        ),
        TransitionKind::Zoom => (
            LayerPlacement {
                opacity: 1.0 - p,
                scale: 1.0 + 0.2 * p,
                translate_x: 0.0,
            },
            LayerPlacement {
                opacity: p,
                scale: 0.8 + 0.2 * p,
                translate_x: 0.0,
            },
        ),
    }
}

/// The subtitle visible at time `t`: half-open `[start, end)` containment,
/// first match in list order wins.
pub fn subtitle_at(segments: &[SubtitleSegment], t: f64) -> Option<&SubtitleSegment> {
    segments.iter().find(|s| t >= s.start && t < s.end)
}

/// Draw a contain-fitted layer onto the canvas with a transition transform.
pub fn draw_layer(
    canvas: &mut RgbaImage,
    layer: &RgbaImage,
    rect: PlacedRect,
    placement: LayerPlacement,
) {
    if placement.opacity <= 0.0 {
        return;
    }

    let canvas_w = canvas.width();
    let canvas_h = canvas.height();

    let scaled;
    let (img, rect) = if (placement.scale - 1.0).abs() > 1e-4 {
        let sw = ((f64::from(rect.width) * placement.scale).round() as u32).max(1);
        let sh = ((f64::from(rect.height) * placement.scale).round() as u32).max(1);
        scaled = imageops::resize(layer, sw, sh, imageops::FilterType::Triangle);
        // Re-center on the canvas midpoint after scaling.
        let rect = PlacedRect {
            x: i64::from(canvas_w) / 2 - i64::from(sw) / 2,
            y: i64::from(canvas_h) / 2 - i64::from(sh) / 2,
            width: sw,
            height: sh,
        };
        (&scaled, rect)
    } else {
        (layer, rect)
    };

    let tx = (placement.translate_x * f64::from(canvas_w)).round() as i64;
    blit_over(canvas, img, rect.x + tx, rect.y, placement.opacity as f32);
}

/// Draw the subtitle with a padded background box sized to the measured
/// text width, at a fixed bottom margin.
pub fn draw_subtitle(canvas: &mut RgbaImage, font: &FontRaster, text: &str) {
    let canvas_h = canvas.height();
    let px = (canvas_h as f32 * SUBTITLE_SIZE_FRAC).max(12.0);
    let patch = font.rasterize_line(text, px, [255, 255, 255, 255]);
    let (text_w, text_h) = patch.image.dimensions();

    let box_w = text_w + 2 * SUBTITLE_PAD_PX;
    let box_h = text_h + 2 * SUBTITLE_PAD_PX;
    let box_x = (i64::from(canvas.width()) - i64::from(box_w)) / 2;
    let box_y = i64::from(canvas_h) - i64::from(SUBTITLE_BOTTOM_MARGIN_PX) - i64::from(box_h);

    fill_rect(canvas, box_x, box_y, box_w, box_h, [0, 0, 0, 160]);
    blit_over(
        canvas,
        &patch.image,
        box_x + i64::from(SUBTITLE_PAD_PX),
        box_y + i64::from(SUBTITLE_PAD_PX),
        1.0,
    );
}

/// Draw the watermark text at one of four corner anchors.
pub fn draw_watermark(canvas: &mut RgbaImage, font: &FontRaster, watermark: &Watermark) {
    let px = (canvas.height() as f32 * WATERMARK_SIZE_FRAC).max(10.0);
    let patch = font.rasterize_line(&watermark.text, px, [255, 255, 255, 200]);
    let (w, h) = patch.image.dimensions();
    let (x, y) = watermark_anchor(watermark.corner, canvas.width(), canvas.height(), w, h);
    blit_over(canvas, &patch.image, x, y, 1.0);
}

/// Top-left position for a `w`×`h` patch anchored at a corner with the
/// fixed watermark padding.
pub fn watermark_anchor(
    corner: WatermarkCorner,
    canvas_w: u32,
    canvas_h: u32,
    w: u32,
    h: u32,
) -> (i64, i64) {
    let pad = i64::from(WATERMARK_PAD_PX);
    let right = i64::from(canvas_w) - i64::from(w) - pad;
    let bottom = i64::from(canvas_h) - i64::from(h) - pad;
    match corner {
        WatermarkCorner::TopLeft => (pad, pad),
        WatermarkCorner::TopRight => (right, pad),
        WatermarkCorner::BottomLeft => (pad, bottom),
        WatermarkCorner::BottomRight => (right, bottom),
    }
}

/// Source-over blend of straight-alpha RGBA pixels with an extra opacity.
pub fn over_straight(dst: [u8; 4], src: [u8; 4], opacity: f32) -> [u8; 4] {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 || src[3] == 0 {
        return dst;
    }

    let op = ((opacity * 255.0).round() as i32).clamp(0, 255) as u16;
    let sa = mul_div255(u16::from(src[3]), op);
    if sa == 0 {
        return dst;
    }

    let inv = 255u16 - u16::from(sa);
    let da = u16::from(dst[3]);
    let out_a = u16::from(sa) + mul_div255(da, inv) as u16;
    if out_a == 0 {
        return [0, 0, 0, 0];
    }

    let mut out = [0u8; 4];
    for i in 0..3 {
        let sc = u32::from(src[i]) * u32::from(sa);
        let dc = u32::from(dst[i]) * u32::from(mul_div255(da, inv) as u16);
        out[i] = ((sc + dc) / u32::from(out_a)) as u8;
    }
    out[3] = out_a.min(255) as u8;
    out
}

fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}

fn blit_over(canvas: &mut RgbaImage, src: &RgbaImage, x0: i64, y0: i64, opacity: f32) {
    let (cw, ch) = (i64::from(canvas.width()), i64::from(canvas.height()));
    for (sx, sy, pixel) in src.enumerate_pixels() {
        let x = x0 + i64::from(sx);
        let y = y0 + i64::from(sy);
        if x < 0 || y < 0 || x >= cw || y >= ch {
            continue;
        }
        let dst = canvas.get_pixel(x as u32, y as u32).0;
        let out = over_straight(dst, pixel.0, opacity);
        canvas.put_pixel(x as u32, y as u32, Rgba(out));
    }
}

fn fill_rect(canvas: &mut RgbaImage, x0: i64, y0: i64, w: u32, h: u32, rgba: [u8; 4]) {
    let (cw, ch) = (i64::from(canvas.width()), i64::from(canvas.height()));
    for dy in 0..i64::from(h) {
        for dx in 0..i64::from(w) {
            let x = x0 + dx;
            let y = y0 + dy;
            if x < 0 || y < 0 || x >= cw || y >= ch {
                continue;
            }
            let dst = canvas.get_pixel(x as u32, y as u32).0;
            canvas.put_pixel(x as u32, y as u32, Rgba(over_straight(dst, rgba, 1.0)));
        }
    }
}
