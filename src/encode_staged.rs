//! Staged backend: assets are copied into a private staging directory and
//! the whole composition is handed to the external encoder as one
//! declarative command.
//!
//! This is the variant for isolated runtimes where per-frame streaming is
//! wasteful but a scratch filesystem exists. The child is killable, so
//! cancellation works mid-encode; the staging directory is removed no
//! matter how the render ends.

use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::{Duration, Instant},
};

use crate::{
    audio::muxed_duration,
    encode::{finish_result, BackendOptions, BusyFlag, CancelToken, EncoderBackend},
    error::{EngineResult, RenderError},
    ffmpeg, filtergraph,
    model::{RenderRequest, RenderResult},
    progress::{Phase, ProgressEvent},
    text::resolve_font_path,
    timeline::Timeline,
};

const BACKEND_NAME: &str = "staged";

#[derive(Debug)]
pub struct StagedBackend {
    opts: BackendOptions,
    busy: BusyFlag,
    cancel: CancelToken,
    initialized: bool,
}

impl StagedBackend {
    pub fn new(opts: BackendOptions) -> Self {
        Self {
            opts,
            busy: BusyFlag::default(),
            cancel: CancelToken::new(),
            initialized: false,
        }
    }
}

impl EncoderBackend for StagedBackend {
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
            message: "staging assets".to_string(),
        });

        let staging = StagingDir::create()?;
        let staged_assets = stage_assets(&staging, request)?;
        let staged_audio = match &request.audio {
            Some(path) => Some(staging.stage(path, "audio").map_err(|e| {
                RenderError::validation(format!(
                    "failed to stage audio '{}': {e}",
                    path.display()
                ))
            })?),
            None => None,
        };

        let audio_seconds = match &staged_audio {
            Some(path) => Some(ffmpeg::probe_duration_seconds(path)?),
            None => None,
        };
        let mux_seconds = muxed_duration(
            timeline.total_duration(),
            audio_seconds,
            request.audio_policy,
        );

        let font = if !request.subtitles.is_empty() || request.watermark.is_some() {
            Some(resolve_font_path(self.opts.font_path.as_deref())?)
        } else {
            None
        };
        let graph = filtergraph::build_graph(request, timeline, &staged_assets, font.as_deref())?;

        ffmpeg::ensure_parent_dir(&request.output_path)?;
        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .args(["-y", "-loglevel", "error"]);

        for input in &graph.inputs {
            cmd.args(["-loop", "1", "-t", &format!("{:.6}", input.duration), "-i"])
                .arg(&input.path);
        }

        let mut filter_complex = graph.filter_complex.clone();
        let audio_input_index = graph.inputs.len();
        if staged_audio.is_some() {
            // Pad so video_length policy can extend past a short track; the
            // -t cap below trims the excess either way.
            filter_complex.push_str(&format!(";[{audio_input_index}:a]apad[aout]"));
        }
        if let Some(audio) = &staged_audio {
            cmd.arg("-i").arg(audio);
        }

        cmd.args(["-filter_complex", &filter_complex]);
        cmd.args(["-map", &format!("[{}]", graph.output_label)]);
        if staged_audio.is_some() {
            cmd.args(["-map", "[aout]"]);
        }
        cmd.args(ffmpeg::codec_args(
            request.quality,
            request.output_format,
            staged_audio.is_some(),
        ));
        cmd.args(["-t", &format!("{mux_seconds:.6}"), "-r", &request.frame_rate.to_string()]);
        cmd.arg(&request.output_path);

        on_progress(ProgressEvent {
            phase: Phase::Encode,
            percent: 0.0,
            message: "encoding".to_string(),
        });
        run_killable(
            cmd,
            BACKEND_NAME,
            &self.cancel,
            self.opts.timeout,
            &request.output_path,
        )?;

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
}

/// Copy every asset into the staging directory, failing with the asset
/// index before any encoder process starts.
fn stage_assets(staging: &StagingDir, request: &RenderRequest) -> EngineResult<Vec<PathBuf>> {
    let mut staged = Vec::with_capacity(request.assets.len());
    for (i, asset) in request.assets.iter().enumerate() {
        // Header-only decode check so unreadable images fail here, not
        // deep inside the encoder.
        image::image_dimensions(&asset.source).map_err(|e| {
            RenderError::asset_load(i, format!("'{}': {e}", asset.source.display()))
        })?;
        let dest = staging.stage(&asset.source, &format!("asset_{i:03}")).map_err(|e| {
            RenderError::asset_load(i, format!("'{}': {e}", asset.source.display()))
        })?;
        staged.push(dest);
    }
    Ok(staged)
}

/// Private scratch directory, removed on drop.
pub(crate) struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    pub fn create() -> EngineResult<Self> {
        use anyhow::Context as _;
        let path = std::env::temp_dir().join(format!(
            "stillreel_stage_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0)
        ));
        std::fs::create_dir_all(&path)
            .with_context(|| format!("create staging directory '{}'", path.display()))?;
        Ok(Self { path })
    }

    /// Copy `src` into the directory under `stem`, keeping its extension.
    pub fn stage(&self, src: &Path, stem: &str) -> std::io::Result<PathBuf> {
        let dest = match src.extension() {
            Some(ext) => self.path.join(format!("{stem}.{}", ext.to_string_lossy())),
            None => self.path.join(stem),
        };
        std::fs::copy(src, &dest)?;
        Ok(dest)
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// Run a spawned encoder to completion while honoring cancellation and an
/// optional timeout. A killed child's partial output file is removed.
pub(crate) fn run_killable(
    mut cmd: Command,
    backend: &'static str,
    cancel: &CancelToken,
    timeout: Option<Duration>,
    output_path: &Path,
) -> EngineResult<()> {
    let mut child = cmd.spawn().map_err(|e| {
        RenderError::encoder(
            backend,
            format!("failed to spawn ffmpeg (is it installed and on PATH?): {e}"),
        )
    })?;

    // Drain stderr on a separate thread so a chatty child cannot block on
    // a full pipe.
    let stderr_handle = child.stderr.take().map(|mut pipe| {
        std::thread::spawn(move || {
            use std::io::Read as _;
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf);
            buf
        })
    });

    let deadline = timeout.map(|t| Instant::now() + t);
    let status = loop {
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            let _ = std::fs::remove_file(output_path);
            return Err(RenderError::Cancelled);
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                let _ = std::fs::remove_file(output_path);
                return Err(RenderError::Timeout {
                    backend,
                    seconds: timeout.map(|t| t.as_secs()).unwrap_or(0),
                });
            }
        }
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => std::thread::sleep(Duration::from_millis(50)),
            Err(e) => {
                return Err(RenderError::encoder(
                    backend,
                    format!("failed to poll ffmpeg: {e}"),
                ));
            }
        }
    };

    let stderr = stderr_handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    if !status.success() {
        return Err(RenderError::encoder(
            backend,
            format!("ffmpeg exited with status {status}: {}", stderr.trim()),
        ));
    }
    Ok(())
}
