use std::path::PathBuf;

use crate::{
    audio::MuxPolicy,
    error::{EngineResult, RenderError},
    subtitles,
};

/// Everything one render call needs. Owned by the caller, passed by value
/// into the engine; the engine never holds it across renders.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct RenderRequest {
    pub assets: Vec<AssetClip>,
    #[serde(default)]
    pub audio: Option<PathBuf>,
    pub resolution: Resolution,
    pub frame_rate: u32,
    #[serde(default)]
    pub transition: Option<Transition>,
    #[serde(default)]
    pub subtitles: Vec<SubtitleSegment>,
    #[serde(default)]
    pub watermark: Option<Watermark>,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Upper bound on total duration in seconds. When the naive sum of
    /// display durations exceeds it, the timeline builder shrinks every
    /// segment proportionally (see [`crate::timeline::Timeline::build`]).
    #[serde(default)]
    pub max_total_duration: Option<f64>,
    #[serde(default)]
    pub audio_policy: MuxPolicy,
    /// Output file path for the encoded artifact.
    pub output_path: PathBuf,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct AssetClip {
    pub source: PathBuf,
    /// How long this still is shown, in seconds (before reconciliation).
    pub display_duration: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Transition {
    pub kind: TransitionKind,
    /// Blend window length in seconds. Zero disables the transition.
    pub duration: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Fade,
    Slide,
    Zoom,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SubtitleSegment {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Watermark {
    pub text: String,
    pub corner: WatermarkCorner,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkCorner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    High,
    #[default]
    Medium,
    Low,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Webm,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
        }
    }
}

/// Immutable summary of one successful render.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct RenderResult {
    pub artifact: PathBuf,
    pub duration_seconds: f64,
    pub size_bytes: u64,
    pub resolution: Resolution,
    pub format: OutputFormat,
    pub processing_time_ms: u64,
}

impl RenderRequest {
    /// Sum of display durations before any reconciliation.
    pub fn naive_total_duration(&self) -> f64 {
        self.assets.iter().map(|a| a.display_duration).sum()
    }

    /// Total duration after the timeline builder's reconciliation rule.
    pub fn expected_total_duration(&self) -> f64 {
        let naive = self.naive_total_duration();
        match self.max_total_duration {
            Some(max) if naive > max => max,
            _ => naive,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.assets.is_empty() {
            return Err(RenderError::validation(
                "request must contain at least one asset",
            ));
        }
        for (i, asset) in self.assets.iter().enumerate() {
            if !asset.display_duration.is_finite() || asset.display_duration <= 0.0 {
                return Err(RenderError::validation(format!(
                    "asset {i} display_duration must be finite and > 0 (got {})",
                    asset.display_duration
                )));
            }
        }

        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(RenderError::validation(
                "resolution width/height must be > 0",
            ));
        }
        if self.resolution.width % 2 != 0 || self.resolution.height % 2 != 0 {
            // Default settings target yuv420p output for maximum compatibility.
            return Err(RenderError::validation(
                "resolution width/height must be even (required for yuv420p output)",
            ));
        }
        if self.frame_rate == 0 {
            return Err(RenderError::validation("frame_rate must be > 0"));
        }

        if let Some(tr) = &self.transition {
            if !tr.duration.is_finite() || tr.duration < 0.0 {
                return Err(RenderError::validation(format!(
                    "transition duration must be finite and >= 0 (got {})",
                    tr.duration
                )));
            }
        }

        if let Some(max) = self.max_total_duration {
            if !max.is_finite() || max <= 0.0 {
                return Err(RenderError::validation(
                    "max_total_duration must be finite and > 0 when set",
                ));
            }
        }

        let total = self.expected_total_duration();
        for (i, seg) in self.subtitles.iter().enumerate() {
            if !seg.start.is_finite() || !seg.end.is_finite() || seg.start >= seg.end {
                return Err(RenderError::validation(format!(
                    "subtitle {i} must have finite start < end (got {}..{})",
                    seg.start, seg.end
                )));
            }
            if seg.start < 0.0 || seg.end > total + 1e-9 {
                return Err(RenderError::validation(format!(
                    "subtitle {i} ({}..{}) lies outside the 0..{total:.3}s timeline",
                    seg.start, seg.end
                )));
            }
        }
        subtitles::validate_non_overlapping(&self.subtitles)?;

        if let Some(wm) = &self.watermark {
            if wm.text.trim().is_empty() {
                return Err(RenderError::validation("watermark text must be non-empty"));
            }
        }

        Ok(())
    }
}
