//! SRT subtitle export, independent of which backend renders the video.

use std::path::Path;

use crate::{
    error::{EngineResult, RenderError},
    model::SubtitleSegment,
};

/// Generate SRT content from subtitle segments.
pub fn generate_srt(segments: &[SubtitleSegment]) -> String {
    let mut output = String::new();

    for (i, segment) in segments.iter().enumerate() {
        output.push_str(&format!("{}\n", i + 1));
        output.push_str(&format!(
            "{} --> {}\n",
            format_srt_time(segment.start),
            format_srt_time(segment.end),
        ));
        output.push_str(&segment.text);
        output.push_str("\n\n");
    }

    output
}

/// Save SRT content to a file.
pub fn save_srt(segments: &[SubtitleSegment], path: &Path) -> EngineResult<()> {
    use anyhow::Context as _;
    std::fs::write(path, generate_srt(segments))
        .with_context(|| format!("write srt '{}'", path.display()))?;
    Ok(())
}

/// Reject overlapping subtitle intervals.
///
/// The original behavior for overlaps was undefined; we treat them as a
/// configuration error here, while the compositor's lookup stays
/// first-match-wins for anything that slips through.
pub fn validate_non_overlapping(segments: &[SubtitleSegment]) -> EngineResult<()> {
    let mut sorted: Vec<(usize, &SubtitleSegment)> = segments.iter().enumerate().collect();
    sorted.sort_by(|a, b| a.1.start.total_cmp(&b.1.start));

    for pair in sorted.windows(2) {
        let (i, a) = pair[0];
        let (j, b) = pair[1];
        if b.start < a.end {
            return Err(RenderError::validation(format!(
                "subtitles {i} and {j} overlap ({}..{} vs {}..{})",
                a.start, a.end, b.start, b.end
            )));
        }
    }
    Ok(())
}

/// Format seconds as an SRT timestamp: HH:MM:SS,mmm
fn format_srt_time(secs: f64) -> String {
    let total_ms = (secs * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let seconds = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(text: &str, start: f64, end: f64) -> SubtitleSegment {
        SubtitleSegment {
            text: text.to_string(),
            start,
            end,
        }
    }

    #[test]
    fn srt_generation() {
        let segments = vec![seg("Hello world", 0.0, 2.5), seg("This is a test", 3.0, 5.0)];
        let srt = generate_srt(&segments);
        assert!(srt.contains("1\n00:00:00,000 --> 00:00:02,500\nHello world"));
        assert!(srt.contains("2\n00:00:03,000 --> 00:00:05,000\nThis is a test"));
        assert!(srt.ends_with("\n\n"));
    }

    #[test]
    fn time_formatting() {
        assert_eq!(format_srt_time(0.0), "00:00:00,000");
        assert_eq!(format_srt_time(3661.5), "01:01:01,500");
        assert_eq!(format_srt_time(0.0015), "00:00:00,002");
    }

    #[test]
    fn overlap_detection_is_order_independent() {
        let ok = vec![seg("b", 2.0, 3.0), seg("a", 0.0, 2.0)];
        assert!(validate_non_overlapping(&ok).is_ok());

        let bad = vec![seg("b", 1.5, 3.0), seg("a", 0.0, 2.0)];
        assert!(validate_non_overlapping(&bad).is_err());
    }

    #[test]
    fn touching_intervals_do_not_overlap() {
        let segs = vec![seg("a", 0.0, 1.0), seg("b", 1.0, 2.0)];
        assert!(validate_non_overlapping(&segs).is_ok());
    }
}
