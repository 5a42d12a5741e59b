//! Shared plumbing for the external `ffmpeg`/`ffprobe` binaries.
//!
//! We intentionally drive the system binaries over pipes rather than link
//! native FFmpeg libraries, so no dev headers are required.

use std::path::Path;

use crate::{
    error::{EngineResult, RenderError},
    model::{OutputFormat, Quality},
};

pub fn is_ffmpeg_on_path() -> bool {
    std::process::Command::new("ffmpeg")
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn ensure_parent_dir(path: &Path) -> EngineResult<()> {
    if let Some(parent) = path.parent() {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Container duration in seconds via ffprobe.
pub fn probe_duration_seconds(path: &Path) -> EngineResult<f64> {
    #[derive(serde::Deserialize)]
    struct ProbeFormat {
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        format: Option<ProbeFormat>,
    }

    let out = std::process::Command::new("ffprobe")
        .args(["-v", "error", "-print_format", "json", "-show_format"])
        .arg(path)
        .output()
        .map_err(|e| RenderError::validation(format!("failed to run ffprobe: {e}")))?;
    if !out.status.success() {
        return Err(RenderError::validation(format!(
            "ffprobe failed for '{}': {}",
            path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let parsed: ProbeOut = serde_json::from_slice(&out.stdout)
        .map_err(|e| RenderError::validation(format!("ffprobe json parse failed: {e}")))?;
    parsed
        .format
        .and_then(|f| f.duration)
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| {
            RenderError::validation(format!(
                "ffprobe reported no duration for '{}'",
                path.display()
            ))
        })
}

/// Encoder arguments for a quality/format pair.
pub fn codec_args(quality: Quality, format: OutputFormat, has_audio: bool) -> Vec<String> {
    let crf = match quality {
        Quality::High => 18,
        Quality::Medium => 23,
        Quality::Low => 28,
    };

    let mut args: Vec<String> = match format {
        OutputFormat::Mp4 => vec![
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "medium".into(),
            "-crf".into(),
            crf.to_string(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-movflags".into(),
            "+faststart".into(),
        ],
        OutputFormat::Webm => vec![
            "-c:v".into(),
            "libvpx-vp9".into(),
            "-b:v".into(),
            "0".into(),
            "-crf".into(),
            crf.to_string(),
            "-pix_fmt".into(),
            "yuv420p".into(),
        ],
    };

    if has_audio {
        let (codec, bitrate) = match format {
            OutputFormat::Mp4 => ("aac", "192k"),
            OutputFormat::Webm => ("libopus", "128k"),
        };
        args.extend(["-c:a".into(), codec.into(), "-b:a".into(), bitrate.into()]);
    }

    args
}

/// Accumulated state of an ffmpeg `-progress pipe:1` key/value stream.
#[derive(Clone, Debug, Default)]
pub struct ProgressState {
    pub frame: u64,
    pub out_time_secs: f64,
    pub speed: f64,
    pub ended: bool,
}

impl ProgressState {
    pub fn update(&mut self, key: &str, value: &str) {
        match key {
            "frame" => {
                if let Ok(v) = value.trim().parse::<u64>() {
                    self.frame = v;
                }
            }
            "out_time_us" | "out_time_ms" => {
                // ffmpeg historically reported microseconds under both keys.
                if let Ok(v) = value.trim().parse::<i64>() {
                    self.out_time_secs = (v.max(0) as f64) / 1_000_000.0;
                }
            }
            "speed" => {
                if let Ok(v) = value.trim().trim_end_matches('x').parse::<f64>() {
                    self.speed = v;
                }
            }
            "progress" => {
                self.ended = value.trim() == "end";
            }
            _ => {}
        }
    }

    /// Local percent against a known total duration.
    pub fn percent_of(&self, total_seconds: f64) -> f64 {
        if total_seconds <= 0.0 {
            return 0.0;
        }
        (self.out_time_secs / total_seconds * 100.0).min(100.0)
    }
}

/// Escape text for use inside an ffmpeg drawtext filter argument.
pub fn escape_drawtext(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            ':' => out.push_str("\\:"),
            '%' => out.push_str("\\%"),
            ',' => out.push_str("\\,"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_state_parses_stream_keys() {
        let mut state = ProgressState::default();
        state.update("frame", "42");
        state.update("out_time_us", "2500000");
        state.update("speed", "1.5x");
        state.update("progress", "continue");
        assert_eq!(state.frame, 42);
        assert!((state.out_time_secs - 2.5).abs() < 1e-9);
        assert!((state.speed - 1.5).abs() < 1e-9);
        assert!(!state.ended);

        state.update("progress", "end");
        assert!(state.ended);
    }

    #[test]
    fn percent_is_bounded() {
        let mut state = ProgressState::default();
        state.update("out_time_us", "5000000");
        assert!((state.percent_of(10.0) - 50.0).abs() < 1e-9);
        assert!((state.percent_of(2.0) - 100.0).abs() < 1e-9);
        assert_eq!(state.percent_of(0.0), 0.0);
    }

    #[test]
    fn garbage_progress_values_are_ignored() {
        let mut state = ProgressState::default();
        state.update("frame", "N/A");
        state.update("out_time_us", "??");
        assert_eq!(state.frame, 0);
        assert_eq!(state.out_time_secs, 0.0);
    }

    #[test]
    fn codec_args_follow_quality_and_format() {
        let mp4 = codec_args(Quality::High, OutputFormat::Mp4, true);
        assert!(mp4.contains(&"libx264".to_string()));
        assert!(mp4.contains(&"18".to_string()));
        assert!(mp4.contains(&"aac".to_string()));

        let webm = codec_args(Quality::Low, OutputFormat::Webm, false);
        assert!(webm.contains(&"libvpx-vp9".to_string()));
        assert!(webm.contains(&"28".to_string()));
        assert!(!webm.contains(&"-c:a".to_string()));
    }

    #[test]
    fn drawtext_escaping_covers_specials() {
        assert_eq!(escape_drawtext("a:b'c"), "a\\:b\\'c");
        assert_eq!(escape_drawtext("100%"), "100\\%");
    }
}
