//! Streaming backend: frames are composed in process and piped into an
//! external encoder as raw RGBA.
//!
//! This is the portable fallback. Composition runs through the shared
//! [`crate::compositor`] primitives, so its geometry matches the
//! process-based backends exactly.

use std::{
    io::Write as _,
    path::Path,
    process::{Child, ChildStdin, Command, Stdio},
    time::{Duration, Instant},
};

use image::{imageops, Rgba, RgbaImage};

use crate::{
    audio::{self, AudioPcm, TempFileGuard, MIX_CHANNELS, MIX_SAMPLE_RATE},
    compositor::{self, LayerPlacement, PlacedRect},
    encode::{finish_result, BackendOptions, BusyFlag, CancelToken, EncoderBackend},
    error::{EngineResult, RenderError},
    ffmpeg,
    model::{RenderRequest, RenderResult},
    progress::{Phase, ProgressEvent},
    text::{resolve_font_path, FontRaster},
    timeline::{FrameSample, Timeline},
};

const BACKEND_NAME: &str = "stream";

/// A source image decoded once and pre-fitted to the canvas.
#[derive(Debug)]
struct PreparedAsset {
    image: RgbaImage,
    rect: PlacedRect,
}

#[derive(Debug)]
pub struct StreamBackend {
    opts: BackendOptions,
    busy: BusyFlag,
    cancel: CancelToken,
    initialized: bool,
}

impl StreamBackend {
    pub fn new(opts: BackendOptions) -> Self {
        Self {
            opts,
            busy: BusyFlag::default(),
            cancel: CancelToken::new(),
            initialized: false,
        }
    }

    /// Decode every asset up front; a bad asset fails the render before the
    /// encoder process is ever spawned.
    fn prepare_assets(
        &self,
        request: &RenderRequest,
    ) -> EngineResult<Vec<PreparedAsset>> {
        let mut prepared = Vec::with_capacity(request.assets.len());
        for (i, asset) in request.assets.iter().enumerate() {
            let decoded = image::open(&asset.source)
                .map_err(|e| {
                    RenderError::asset_load(i, format!("'{}': {e}", asset.source.display()))
                })?
                .to_rgba8();
            let rect = compositor::contain_fit(
                decoded.width(),
                decoded.height(),
                request.resolution.width,
                request.resolution.height,
            );
            let image = if decoded.dimensions() == (rect.width, rect.height) {
                decoded
            } else {
                imageops::resize(&decoded, rect.width, rect.height, imageops::FilterType::Triangle)
            };
            prepared.push(PreparedAsset { image, rect });
        }
        Ok(prepared)
    }

    fn compose_frame(
        &self,
        canvas: &mut RgbaImage,
        assets: &[PreparedAsset],
        timeline: &Timeline,
        request: &RenderRequest,
        font: Option<&FontRaster>,
        t: f64,
    ) {
        for px in canvas.pixels_mut() {
            *px = Rgba([0, 0, 0, 255]);
        }

        match timeline.sample(t) {
            Some(FrameSample::Single { asset_index }) => {
                let layer = &assets[asset_index];
                compositor::draw_layer(canvas, &layer.image, layer.rect, LayerPlacement::IDENTITY);
            }
            Some(FrameSample::Blend {
                outgoing,
                incoming,
                kind,
                progress,
            }) => {
                let (out_placement, in_placement) = compositor::transition_layers(kind, progress);
                let out_layer = &assets[outgoing];
                let in_layer = &assets[incoming];
                compositor::draw_layer(canvas, &out_layer.image, out_layer.rect, out_placement);
                compositor::draw_layer(canvas, &in_layer.image, in_layer.rect, in_placement);
            }
            None => {}
        }

        if let Some(font) = font {
            if let Some(seg) = compositor::subtitle_at(&request.subtitles, t) {
                compositor::draw_subtitle(canvas, font, &seg.text);
            }
            if let Some(wm) = &request.watermark {
                compositor::draw_watermark(canvas, font, wm);
            }
        }
    }
}

impl EncoderBackend for StreamBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn initialize(&mut self) -> EngineResult<()> {
        if self.initialized {
            return Ok(());
        }
        if !ffmpeg::is_ffmpeg_on_path() {
            return Err(RenderError::encoder(
                BACKEND_NAME,
                "ffmpeg is required but was not found on PATH",
            ));
        }
        self.initialized = true;
        Ok(())
    }

    fn render(
        &mut self,
        request: &RenderRequest,
        timeline: &Timeline,
        on_progress: &mut (dyn FnMut(ProgressEvent) + Send),
    ) -> EngineResult<RenderResult> {
        let _busy = self.busy.acquire(BACKEND_NAME)?;
        self.initialize()?;
        self.cancel.reset();
        let started = Instant::now();

        on_progress(ProgressEvent {
            phase: Phase::Prepare,
            percent: 0.0,
            message: "decoding assets".to_string(),
        });
        let assets = self.prepare_assets(request)?;

        let font = if !request.subtitles.is_empty() || request.watermark.is_some() {
            let path = resolve_font_path(self.opts.font_path.as_deref())?;
            Some(FontRaster::load(&path)?)
        } else {
            None
        };

        // Decode audio and fix the output duration before any frame is
        // encoded.
        let pcm = match &request.audio {
            Some(path) => Some(audio::decode_audio_f32_stereo(path, MIX_SAMPLE_RATE)?),
            None => None,
        };
        let mux_seconds = audio::muxed_duration(
            timeline.total_duration(),
            pcm.as_ref().map(AudioPcm::duration_seconds),
            request.audio_policy,
        );

        let mut pcm_guard = TempFileGuard(None);
        let pcm_path = match pcm {
            Some(pcm) => {
                let conformed = audio::conform_to_duration(pcm, mux_seconds);
                let path = TempFileGuard::fresh("stillreel_pcm", "f32le");
                audio::write_pcm_f32le(&conformed, &path)?;
                pcm_guard.0 = Some(path.clone());
                Some(path)
            }
            None => None,
        };

        ffmpeg::ensure_parent_dir(&request.output_path)?;
        let mut encoder = PipedEncoder::spawn(request, pcm_path.as_deref())?;

        let frame_count = ((mux_seconds * f64::from(request.frame_rate)).round() as u64).max(1);
        let frame_interval = Duration::from_secs_f64(1.0 / f64::from(request.frame_rate));
        let mut canvas = RgbaImage::new(request.resolution.width, request.resolution.height);
        let wall_start = Instant::now();

        for i in 0..frame_count {
            if self.cancel.is_cancelled() {
                encoder.abort();
                let _ = std::fs::remove_file(&request.output_path);
                return Err(RenderError::Cancelled);
            }

            // Frame times are derived from indices, never from the wall
            // clock, so output timing is deterministic.
            let t = i as f64 / f64::from(request.frame_rate);
            self.compose_frame(&mut canvas, &assets, timeline, request, font.as_ref(), t);
            encoder.write_frame(canvas.as_raw())?;

            if i % u64::from(request.frame_rate) == 0 || i + 1 == frame_count {
                on_progress(ProgressEvent {
                    phase: Phase::Compose,
                    percent: (i + 1) as f64 / frame_count as f64 * 100.0,
                    message: format!("frame {}/{frame_count}", i + 1),
                });
            }

            if self.opts.pace_realtime {
                let due = frame_interval * (i as u32 + 1);
                let elapsed = wall_start.elapsed();
                if due > elapsed {
                    std::thread::sleep(due - elapsed);
                }
            }
        }

        on_progress(ProgressEvent {
            phase: Phase::Encode,
            percent: 0.0,
            message: "finalizing encode".to_string(),
        });
        encoder.finish()?;

        on_progress(ProgressEvent {
            phase: Phase::Finalize,
            percent: 100.0,
            message: "done".to_string(),
        });
        finish_result(request, mux_seconds, started)
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    fn phase_weights(&self) -> &'static [(Phase, f64)] {
        crate::encode::COMPOSE_PHASE_WEIGHTS
    }
}

/// The external encoder process fed raw RGBA frames over stdin.
struct PipedEncoder {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl PipedEncoder {
    fn spawn(request: &RenderRequest, pcm_path: Option<&Path>) -> EngineResult<Self> {
        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        cmd.args([
            "-y",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!(
                "{}x{}",
                request.resolution.width, request.resolution.height
            ),
            "-r",
            &request.frame_rate.to_string(),
            "-i",
            "pipe:0",
        ]);

        let has_audio = pcm_path.is_some();
        if let Some(pcm) = pcm_path {
            cmd.args([
                "-f",
                "f32le",
                "-ar",
                &MIX_SAMPLE_RATE.to_string(),
                "-ac",
                &MIX_CHANNELS.to_string(),
                "-i",
            ])
            .arg(pcm);
        } else {
            cmd.arg("-an");
        }

        cmd.args(ffmpeg::codec_args(
            request.quality,
            request.output_format,
            has_audio,
        ));
        // The pcm input is already conformed to the output duration, but
        // guard against a trailing partial audio frame.
        if has_audio {
            cmd.arg("-shortest");
        }
        cmd.arg(&request.output_path);

        let mut child = cmd.spawn().map_err(|e| {
            RenderError::encoder(
                BACKEND_NAME,
                format!("failed to spawn ffmpeg (is it installed and on PATH?): {e}"),
            )
        })?;
        let stdin = child.stdin.take().ok_or_else(|| {
            RenderError::encoder(BACKEND_NAME, "failed to open ffmpeg stdin (unexpected)")
        })?;

        Ok(Self {
            child,
            stdin: Some(stdin),
        })
    }

    fn write_frame(&mut self, rgba: &[u8]) -> EngineResult<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(RenderError::encoder(
                BACKEND_NAME,
                "encoder is already finalized",
            ));
        };
        stdin.write_all(rgba).map_err(|e| {
            RenderError::encoder(
                BACKEND_NAME,
                format!("failed to write frame to ffmpeg stdin: {e}"),
            )
        })
    }

    fn finish(mut self) -> EngineResult<()> {
        drop(self.stdin.take());

        let output = self.child.wait_with_output().map_err(|e| {
            RenderError::encoder(
                BACKEND_NAME,
                format!("failed to wait for ffmpeg to finish: {e}"),
            )
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RenderError::encoder(
                BACKEND_NAME,
                format!(
                    "ffmpeg exited with status {}: {}",
                    output.status,
                    stderr.trim()
                ),
            ));
        }
        Ok(())
    }

    /// Kill the child without waiting for a clean exit.
    fn abort(mut self) {
        drop(self.stdin.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssetClip, OutputFormat, Quality, Resolution};
    use std::path::PathBuf;

    fn request_with_assets(paths: &[PathBuf]) -> RenderRequest {
        RenderRequest {
            assets: paths
                .iter()
                .map(|p| AssetClip {
                    source: p.clone(),
                    display_duration: 1.0,
                })
                .collect(),
            audio: None,
            resolution: Resolution {
                width: 64,
                height: 64,
            },
            frame_rate: 10,
            transition: None,
            subtitles: Vec::new(),
            watermark: None,
            quality: Quality::Low,
            output_format: OutputFormat::Mp4,
            max_total_duration: None,
            audio_policy: Default::default(),
            output_path: std::env::temp_dir().join("stillreel_stream_test.mp4"),
        }
    }

    #[test]
    fn missing_asset_fails_with_index_before_spawn() {
        let backend = StreamBackend::new(BackendOptions::default());
        let request = request_with_assets(&[
            PathBuf::from("/nonexistent/a.png"),
            PathBuf::from("/nonexistent/b.png"),
        ]);
        match backend.prepare_assets(&request) {
            Err(RenderError::AssetLoad { index, .. }) => assert_eq!(index, 0),
            other => panic!("expected asset load failure, got {other:?}"),
        }
    }

    #[test]
    fn prepared_assets_are_contain_fitted() {
        let dir = std::env::temp_dir();
        let path = dir.join("stillreel_stream_fit.png");
        let img = RgbaImage::from_pixel(128, 32, Rgba([10, 20, 30, 255]));
        img.save(&path).unwrap();

        let backend = StreamBackend::new(BackendOptions::default());
        let request = request_with_assets(&[path.clone()]);
        let prepared = backend.prepare_assets(&request).unwrap();
        // 128x32 into 64x64 is width-limited: 64x16, vertically centered.
        assert_eq!(prepared[0].image.dimensions(), (64, 16));
        assert_eq!(prepared[0].rect.y, 24);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn composed_frame_blends_during_transition() {
        use crate::model::{Transition, TransitionKind};

        let dir = std::env::temp_dir();
        let black = dir.join("stillreel_stream_black.png");
        let white = dir.join("stillreel_stream_white.png");
        RgbaImage::from_pixel(64, 64, Rgba([0, 0, 0, 255]))
            .save(&black)
            .unwrap();
        RgbaImage::from_pixel(64, 64, Rgba([255, 255, 255, 255]))
            .save(&white)
            .unwrap();

        let backend = StreamBackend::new(BackendOptions::default());
        let request = request_with_assets(&[black.clone(), white.clone()]);
        let assets = backend.prepare_assets(&request).unwrap();
        let timeline = Timeline::build(
            &request.assets,
            Some(Transition {
                kind: TransitionKind::Fade,
                duration: 0.5,
            }),
            None,
        )
        .unwrap();

        let mut canvas = RgbaImage::new(64, 64);
        // Boundary instant is the blend midpoint.
        backend.compose_frame(&mut canvas, &assets, &timeline, &request, None, 1.0);
        let px = canvas.get_pixel(32, 32).0;
        assert!(px[0] > 100 && px[0] < 160, "expected mid-gray, got {px:?}");

        let _ = std::fs::remove_file(black);
        let _ = std::fs::remove_file(white);
    }
}
