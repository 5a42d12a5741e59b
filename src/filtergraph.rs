//! Declarative filter-graph planning for the process-based backends.
//!
//! The staged and native backends hand the whole composition to the
//! external encoder in one command. The graph is derived from the same
//! timeline and layout math the streaming compositor uses, so all
//! backends agree on geometry and timing.

use std::path::{Path, PathBuf};

use crate::{
    compositor::{SUBTITLE_BOTTOM_MARGIN_PX, SUBTITLE_PAD_PX, SUBTITLE_SIZE_FRAC, WATERMARK_PAD_PX, WATERMARK_SIZE_FRAC},
    error::{EngineResult, RenderError},
    ffmpeg::escape_drawtext,
    model::{RenderRequest, TransitionKind, WatermarkCorner},
    timeline::Timeline,
};

/// One looped still input with the exact duration the graph expects.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct InputClip {
    pub path: PathBuf,
    pub duration: f64,
}

#[derive(Clone, Debug)]
pub(crate) struct FilterGraph {
    pub inputs: Vec<InputClip>,
    pub filter_complex: String,
    /// Label of the final video stream, e.g. `vout`.
    pub output_label: String,
}

fn xfade_name(kind: TransitionKind) -> &'static str {
    match kind {
        TransitionKind::Fade => "fade",
        TransitionKind::Slide => "slideleft",
        TransitionKind::Zoom => "zoomin",
    }
}

/// Build the single-command graph for a request/timeline pair.
///
/// `asset_paths` carries one path per timeline asset; the staged backend
/// passes the staged copies, the native backend the original sources.
/// Blend windows are centered on segment boundaries, so each input is
/// extended by half a window on each blended side and the crossfade offset
/// is the window start in timeline time.
pub(crate) fn build_graph(
    request: &RenderRequest,
    timeline: &Timeline,
    asset_paths: &[PathBuf],
    font: Option<&Path>,
) -> EngineResult<FilterGraph> {
    if asset_paths.len() != timeline.segments.len() {
        return Err(RenderError::validation(format!(
            "asset path count {} does not match segment count {}",
            asset_paths.len(),
            timeline.segments.len()
        )));
    }
    if (!request.subtitles.is_empty() || request.watermark.is_some()) && font.is_none() {
        return Err(RenderError::validation(
            "text overlays require a font file",
        ));
    }

    let width = request.resolution.width;
    let height = request.resolution.height;
    let rate = request.frame_rate;
    let n = timeline.segments.len();

    let half_before = |i: usize| -> f64 {
        if i == 0 {
            return 0.0;
        }
        timeline.segments[i - 1]
            .transition_out
            .map(|t| t.duration / 2.0)
            .unwrap_or(0.0)
    };
    let half_after = |i: usize| -> f64 {
        timeline.segments[i]
            .transition_out
            .map(|t| t.duration / 2.0)
            .unwrap_or(0.0)
    };

    let mut inputs = Vec::with_capacity(n);
    let mut filters = Vec::new();

    for (i, seg) in timeline.segments.iter().enumerate() {
        inputs.push(InputClip {
            path: asset_paths[i].clone(),
            duration: seg.duration() + half_before(i) + half_after(i),
        });
        // Contain-fit per input, matching compositor::contain_fit.
        filters.push(format!(
            "[{i}:v]scale={width}:{height}:force_original_aspect_ratio=decrease,\
pad={width}:{height}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1,fps={rate},format=yuv420p[v{i}]"
        ));
    }

    // Chain the per-input streams: crossfades when transitions exist,
    // plain concat otherwise.
    let has_transitions = timeline
        .segments
        .iter()
        .any(|s| s.transition_out.is_some());
    let mut current = "v0".to_string();
    if n == 1 {
        // Single input, nothing to chain.
    } else if has_transitions {
        for (i, seg) in timeline.segments[..n - 1].iter().enumerate() {
            let next_label = if i + 2 == n {
                "vchain".to_string()
            } else {
                format!("x{}", i + 1)
            };
            match seg.transition_out {
                Some(tr) => {
                    let offset = seg.end - tr.duration / 2.0;
                    filters.push(format!(
                        "[{current}][v{}]xfade=transition={}:duration={:.6}:offset={:.6}[{next_label}]",
                        i + 1,
                        xfade_name(tr.kind),
                        tr.duration,
                        offset
                    ));
                }
                None => {
                    filters.push(format!(
                        "[{current}][v{}]concat=n=2:v=1:a=0[{next_label}]",
                        i + 1
                    ));
                }
            }
            current = next_label;
        }
    } else {
        let all: String = (0..n).map(|i| format!("[v{i}]")).collect();
        filters.push(format!("{all}concat=n={n}:v=1:a=0[vchain]"));
        current = "vchain".to_string();
    }

    // Text overlays on the chained stream.
    let mut overlay_filters = Vec::new();
    if let Some(font) = font {
        let font_arg = font.to_string_lossy().replace('\\', "/");
        let sub_px = (height as f32 * SUBTITLE_SIZE_FRAC).max(12.0).round() as u32;
        let sub_y = SUBTITLE_BOTTOM_MARGIN_PX + SUBTITLE_PAD_PX;
        for seg in &request.subtitles {
            // Half-open [start, end), matching compositor::subtitle_at;
            // between() would be inclusive at the end instant.
            overlay_filters.push(format!(
                "drawtext=fontfile={font_arg}:text='{}':fontsize={sub_px}:fontcolor=white:\
x=(w-text_w)/2:y=h-th-{sub_y}:box=1:boxcolor=black@0.63:boxborderw={SUBTITLE_PAD_PX}:\
enable='gte(t,{:.6})*lt(t,{:.6})'",
                escape_drawtext(&seg.text),
                seg.start,
                seg.end
            ));
        }
        if let Some(wm) = &request.watermark {
            let wm_px = (height as f32 * WATERMARK_SIZE_FRAC).max(10.0).round() as u32;
            let pad = WATERMARK_PAD_PX;
            let (x, y) = match wm.corner {
                WatermarkCorner::TopLeft => (format!("{pad}"), format!("{pad}")),
                WatermarkCorner::TopRight => (format!("w-text_w-{pad}"), format!("{pad}")),
                WatermarkCorner::BottomLeft => (format!("{pad}"), format!("h-th-{pad}")),
                WatermarkCorner::BottomRight => {
                    (format!("w-text_w-{pad}"), format!("h-th-{pad}"))
                }
            };
            overlay_filters.push(format!(
                "drawtext=fontfile={font_arg}:text='{}':fontsize={wm_px}:\
fontcolor=white@0.78:x={x}:y={y}",
                escape_drawtext(&wm.text)
            ));
        }
    }

    let output_label = "vout".to_string();
    if overlay_filters.is_empty() {
        filters.push(format!("[{current}]null[{output_label}]"));
    } else {
        filters.push(format!(
            "[{current}]{}[{output_label}]",
            overlay_filters.join(",")
        ));
    }

    Ok(FilterGraph {
        inputs,
        filter_complex: filters.join(";"),
        output_label,
    })
}
