//! Native backend: one external encoder process works directly against the
//! source assets, with live progress parsed from `-progress pipe:1`.
//!
//! Preferred whenever a system encoder is reachable outside a sandbox. The
//! child is killable, cancellation and the configured timeout both discard
//! the partial output file.

use std::{
    io::BufRead as _,
    process::{Command, Stdio},
    sync::mpsc,
    time::{Duration, Instant},
};

use crate::{
    audio::muxed_duration,
    encode::{finish_result, BackendOptions, BusyFlag, CancelToken, EncoderBackend},
    error::{EngineResult, RenderError},
    ffmpeg::{self, ProgressState},
    filtergraph,
    model::{RenderRequest, RenderResult},
    progress::{Phase, ProgressEvent},
    text::resolve_font_path,
    timeline::Timeline,
};

const BACKEND_NAME: &str = "native";

#[derive(Debug)]
pub struct NativeBackend {
    opts: BackendOptions,
    busy: BusyFlag,
    cancel: CancelToken,
    initialized: bool,
}

impl NativeBackend {
    pub fn new(opts: BackendOptions) -> Self {
        Self {
            opts,
            busy: BusyFlag::default(),
            cancel: CancelToken::new(),
            initialized: false,
        }
    }
}

impl EncoderBackend for NativeBackend {
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
            message: "probing sources".to_string(),
        });

        let asset_paths: Vec<_> = request.assets.iter().map(|a| a.source.clone()).collect();
        for (i, path) in asset_paths.iter().enumerate() {
            image::image_dimensions(path).map_err(|e| {
                RenderError::asset_load(i, format!("'{}': {e}", path.display()))
            })?;
        }

        let audio_seconds = match &request.audio {
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
        let graph = filtergraph::build_graph(request, timeline, &asset_paths, font.as_deref())?;

        ffmpeg::ensure_parent_dir(&request.output_path)?;
        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .args(["-y", "-nostats", "-loglevel", "error"]);

        for input in &graph.inputs {
            cmd.args(["-loop", "1", "-t", &format!("{:.6}", input.duration), "-i"])
                .arg(&input.path);
        }

        let mut filter_complex = graph.filter_complex.clone();
        let audio_input_index = graph.inputs.len();
        if request.audio.is_some() {
            filter_complex.push_str(&format!(";[{audio_input_index}:a]apad[aout]"));
        }
        if let Some(audio) = &request.audio {
            cmd.arg("-i").arg(audio);
        }

        cmd.args(["-filter_complex", &filter_complex]);
        cmd.args(["-map", &format!("[{}]", graph.output_label)]);
        if request.audio.is_some() {
            cmd.args(["-map", "[aout]"]);
        }
        cmd.args(ffmpeg::codec_args(
            request.quality,
            request.output_format,
            request.audio.is_some(),
        ));
        cmd.args([
            "-t",
            &format!("{mux_seconds:.6}"),
            "-r",
            &request.frame_rate.to_string(),
            "-progress",
            "pipe:1",
        ]);
        cmd.arg(&request.output_path);

        self.drive_child(cmd, mux_seconds, request, on_progress)?;

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

impl NativeBackend {
    /// Spawn the encoder and pump its progress stream until it exits,
    /// killing it on cancellation or timeout.
    fn drive_child(
        &self,
        mut cmd: Command,
        mux_seconds: f64,
        request: &RenderRequest,
        on_progress: &mut (dyn FnMut(ProgressEvent) + Send),
    ) -> EngineResult<()> {
        let mut child = cmd.spawn().map_err(|e| {
            RenderError::encoder(
                BACKEND_NAME,
                format!("failed to spawn ffmpeg (is it installed and on PATH?): {e}"),
            )
        })?;

        let stderr_handle = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                use std::io::Read as _;
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf);
                buf
            })
        });

        // Progress lines arrive on a thread so the control loop can keep
        // polling cancellation and the deadline.
        let (tx, rx) = mpsc::channel::<String>();
        let stdout_handle = child.stdout.take().map(|pipe| {
            std::thread::spawn(move || {
                for line in std::io::BufReader::new(pipe).lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })
        });

        let deadline = self.opts.timeout.map(|t| Instant::now() + t);
        let mut state = ProgressState::default();
        let mut last_emitted = -1.0f64;
        let status = loop {
            if self.cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                let _ = std::fs::remove_file(&request.output_path);
                return Err(RenderError::Cancelled);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = std::fs::remove_file(&request.output_path);
                    return Err(RenderError::Timeout {
                        backend: BACKEND_NAME,
                        seconds: self.opts.timeout.map(|t| t.as_secs()).unwrap_or(0),
                    });
                }
            }

            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(line) => {
                    if let Some((key, value)) = line.split_once('=') {
                        state.update(key.trim(), value.trim());
                    }
                    let percent = state.percent_of(mux_seconds);
                    if percent - last_emitted >= 1.0 || state.ended {
                        last_emitted = percent;
                        on_progress(ProgressEvent {
                            phase: Phase::Encode,
                            percent,
                            message: format!(
                                "frame {} at {:.2}x",
                                state.frame, state.speed
                            ),
                        });
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if let Ok(Some(status)) = child.try_wait() {
                        break status;
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    break child.wait().map_err(|e| {
                        RenderError::encoder(
                            BACKEND_NAME,
                            format!("failed to wait for ffmpeg: {e}"),
                        )
                    })?;
                }
            }
        };

        if let Some(handle) = stdout_handle {
            let _ = handle.join();
        }
        let stderr = stderr_handle
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        if !status.success() {
            return Err(RenderError::encoder(
                BACKEND_NAME,
                format!("ffmpeg exited with status {status}: {}", stderr.trim()),
            ));
        }
        Ok(())
    }
}
