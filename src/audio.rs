//! Audio decode and mux policy.
//!
//! The audio asset is decoded once into interleaved f32 PCM aligned to
//! timeline time zero; the mux policy then decides the final duration
//! before any encoder starts, never as a post-hoc shift.

use std::path::{Path, PathBuf};

use crate::error::{EngineResult, RenderError};

pub const MIX_SAMPLE_RATE: u32 = 48_000;
pub const MIX_CHANNELS: u16 = 2;

/// How the audio track length is reconciled against the visual stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MuxPolicy {
    /// Final duration is the shorter of visual and audio.
    #[default]
    Shortest,
    /// Audio is truncated or silence-padded to exactly the visual duration.
    VideoLength,
}

#[derive(Clone, Debug)]
pub struct AudioPcm {
    pub sample_rate: u32,
    pub channels: u16,
    pub interleaved_f32: Vec<f32>,
}

impl AudioPcm {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.interleaved_f32.len() as f64
            / f64::from(self.sample_rate)
            / f64::from(self.channels)
    }

    pub fn is_empty(&self) -> bool {
        self.interleaved_f32.is_empty()
    }
}

/// Final output duration for a visual duration plus an optional decoded
/// audio duration under the given policy.
pub fn muxed_duration(visual: f64, audio: Option<f64>, policy: MuxPolicy) -> f64 {
    match (audio, policy) {
        (None, _) => visual,
        (Some(a), MuxPolicy::Shortest) => visual.min(a),
        (Some(_), MuxPolicy::VideoLength) => visual,
    }
}

/// Truncate or silence-pad PCM so it lasts exactly `target_seconds`.
pub fn conform_to_duration(mut pcm: AudioPcm, target_seconds: f64) -> AudioPcm {
    let target_samples = ((target_seconds * f64::from(pcm.sample_rate)).round() as usize)
        .saturating_mul(usize::from(pcm.channels));
    if pcm.interleaved_f32.len() > target_samples {
        pcm.interleaved_f32.truncate(target_samples);
    } else {
        pcm.interleaved_f32.resize(target_samples, 0.0);
    }
    pcm
}

/// Decode any audio source to interleaved stereo f32 PCM via ffmpeg.
pub fn decode_audio_f32_stereo(path: &Path, sample_rate: u32) -> EngineResult<AudioPcm> {
    let out = std::process::Command::new("ffmpeg")
        .args(["-v", "error", "-i"])
        .arg(path)
        .args([
            "-vn",
            "-f",
            "f32le",
            "-acodec",
            "pcm_f32le",
            "-ac",
            &MIX_CHANNELS.to_string(),
            "-ar",
            &sample_rate.to_string(),
            "pipe:1",
        ])
        .output()
        .map_err(|e| {
            RenderError::validation(format!("failed to run ffmpeg for audio decode: {e}"))
        })?;

    if !out.status.success() {
        return Err(RenderError::validation(format!(
            "ffmpeg audio decode failed for '{}': {}",
            path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    if out.stdout.len() % 4 != 0 {
        return Err(RenderError::validation(
            "decoded audio byte length is not aligned to f32 samples",
        ));
    }
    let mut pcm = Vec::<f32>::with_capacity(out.stdout.len() / 4);
    for chunk in out.stdout.chunks_exact(4) {
        pcm.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }

    Ok(AudioPcm {
        sample_rate,
        channels: MIX_CHANNELS,
        interleaved_f32: pcm,
    })
}

/// Write PCM as a raw f32le file the encoder can read back as an input.
pub fn write_pcm_f32le(pcm: &AudioPcm, path: &Path) -> EngineResult<()> {
    use anyhow::Context as _;
    let mut bytes = Vec::with_capacity(pcm.interleaved_f32.len() * 4);
    for sample in &pcm.interleaved_f32 {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    std::fs::write(path, bytes)
        .with_context(|| format!("write pcm file '{}'", path.display()))?;
    Ok(())
}

/// Unique temp path for intermediate audio, removed on drop.
pub(crate) struct TempFileGuard(pub Option<PathBuf>);

impl TempFileGuard {
    pub fn fresh(prefix: &str, ext: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "{prefix}_{}_{}.{ext}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0)
        ))
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if let Some(path) = self.0.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_of_seconds(secs: f64) -> AudioPcm {
        let samples = (secs * f64::from(MIX_SAMPLE_RATE)) as usize * usize::from(MIX_CHANNELS);
        AudioPcm {
            sample_rate: MIX_SAMPLE_RATE,
            channels: MIX_CHANNELS,
            interleaved_f32: vec![0.25; samples],
        }
    }

    #[test]
    fn duration_round_trips() {
        let pcm = pcm_of_seconds(1.5);
        assert!((pcm.duration_seconds() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn shortest_policy_takes_min() {
        assert_eq!(muxed_duration(6.0, Some(9.0), MuxPolicy::Shortest), 6.0);
        assert_eq!(muxed_duration(6.0, Some(4.0), MuxPolicy::Shortest), 4.0);
        assert_eq!(muxed_duration(6.0, None, MuxPolicy::Shortest), 6.0);
    }

    #[test]
    fn video_length_policy_keeps_visual_duration() {
        assert_eq!(muxed_duration(6.0, Some(9.0), MuxPolicy::VideoLength), 6.0);
        assert_eq!(muxed_duration(6.0, Some(2.0), MuxPolicy::VideoLength), 6.0);
    }

    #[test]
    fn conform_truncates_long_audio() {
        let pcm = conform_to_duration(pcm_of_seconds(9.0), 6.0);
        assert!((pcm.duration_seconds() - 6.0).abs() < 1e-6);
        assert!(pcm.interleaved_f32.iter().all(|&s| s == 0.25));
    }

    #[test]
    fn conform_pads_short_audio_with_silence() {
        let pcm = conform_to_duration(pcm_of_seconds(2.0), 6.0);
        assert!((pcm.duration_seconds() - 6.0).abs() < 1e-6);
        let tail = &pcm.interleaved_f32[pcm.interleaved_f32.len() - 10..];
        assert!(tail.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn temp_guard_removes_file_on_drop() {
        let path = TempFileGuard::fresh("stillreel_test", "f32le");
        std::fs::write(&path, b"x").unwrap();
        {
            let _guard = TempFileGuard(Some(path.clone()));
        }
        assert!(!path.exists());
    }
}
