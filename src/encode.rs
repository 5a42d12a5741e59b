//! The uniform encoder backend contract and the shared backend machinery.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    capability::BackendKind,
    error::{EngineResult, RenderError},
    model::{RenderRequest, RenderResult},
    progress::{Phase, ProgressEvent},
    timeline::Timeline,
};

/// Phase weights for backends that hand the whole encode to one external
/// process and never report a compose phase.
pub const PROCESS_PHASE_WEIGHTS: &[(Phase, f64)] = &[
    (Phase::Prepare, 1.0),
    (Phase::Encode, 8.0),
    (Phase::Finalize, 1.0),
];

/// Phase weights for backends that compose frames in process, where the
/// per-frame loop dominates and the encoder drains quickly at the end.
pub const COMPOSE_PHASE_WEIGHTS: &[(Phase, f64)] = &[
    (Phase::Prepare, 1.0),
    (Phase::Compose, 7.0),
    (Phase::Encode, 1.0),
    (Phase::Finalize, 1.0),
];

/// One interchangeable encoder variant. A backend instance owns one render
/// at a time; a re-entrant call on a busy instance is rejected, never
/// queued.
pub trait EncoderBackend: Send + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Idempotent, lazy setup (codec probing, font loading). Calling it
    /// more than once is a no-op.
    fn initialize(&mut self) -> EngineResult<()>;

    fn render(
        &mut self,
        request: &RenderRequest,
        timeline: &Timeline,
        on_progress: &mut (dyn FnMut(ProgressEvent) + Send),
    ) -> EngineResult<RenderResult>;

    /// Request cancellation of the in-flight render, if any.
    fn cancel(&self);

    /// Relative time this backend expects to spend per phase; only the
    /// phases named here may appear in its progress events.
    fn phase_weights(&self) -> &'static [(Phase, f64)] {
        PROCESS_PHASE_WEIGHTS
    }
}

/// Shared cancellation flag between a backend and its caller.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Error out when cancellation was requested.
    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        Ok(())
    }
}

/// Single busy flag per backend instance; there is no other concurrent
/// mutation target, so no further locking is needed.
#[derive(Debug, Default)]
pub struct BusyFlag(Arc<AtomicBool>);

pub struct BusyGuard(Arc<AtomicBool>);

impl BusyFlag {
    pub fn acquire(&self, backend: &'static str) -> EngineResult<BusyGuard> {
        if self.0.swap(true, Ordering::SeqCst) {
            return Err(RenderError::validation(format!(
                "backend '{backend}' already has a render in flight; concurrent renders are rejected"
            )));
        }
        Ok(BusyGuard(Arc::clone(&self.0)))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Caller-supplied construction knobs, passed explicitly instead of living
/// in module-level singletons.
#[derive(Clone, Debug, Default)]
pub struct BackendOptions {
    /// Font for subtitle/watermark overlays; system fonts when unset.
    pub font_path: Option<PathBuf>,
    /// Reproduce the original wall-clock draw-then-sleep pacing in the
    /// streaming backend. Timestamp-driven scheduling is the default.
    pub pace_realtime: bool,
    /// Per-render timeout for the process-based backends.
    pub timeout: Option<Duration>,
}

/// Explicit backend factory.
pub fn create_backend(
    kind: BackendKind,
    opts: &BackendOptions,
) -> EngineResult<Box<dyn EncoderBackend>> {
    match kind {
        BackendKind::Stream => Ok(Box::new(crate::encode_stream::StreamBackend::new(
            opts.clone(),
        ))),
        BackendKind::Staged => Ok(Box::new(crate::encode_staged::StagedBackend::new(
            opts.clone(),
        ))),
        BackendKind::Native => Ok(Box::new(crate::encode_native::NativeBackend::new(
            opts.clone(),
        ))),
        BackendKind::Unsupported => Err(RenderError::CapabilityUnsupported),
    }
}

/// Assemble the immutable result record for a finished artifact.
pub(crate) fn finish_result(
    request: &RenderRequest,
    duration_seconds: f64,
    started: std::time::Instant,
) -> EngineResult<RenderResult> {
    use anyhow::Context as _;
    let size_bytes = std::fs::metadata(&request.output_path)
        .with_context(|| {
            format!(
                "stat rendered artifact '{}'",
                request.output_path.display()
            )
        })?
        .len();

    Ok(RenderResult {
        artifact: request.output_path.clone(),
        duration_seconds,
        size_bytes,
        resolution: request.resolution,
        format: request.output_format,
        processing_time_ms: started.elapsed().as_millis() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_flag_rejects_second_acquire() {
        let flag = BusyFlag::default();
        let guard = flag.acquire("stream").unwrap();
        assert!(flag.acquire("stream").is_err());
        drop(guard);
        assert!(flag.acquire("stream").is_ok());
    }

    #[test]
    fn cancel_token_round_trip() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert!(matches!(token.check(), Err(RenderError::Cancelled)));
        token.reset();
        assert!(token.check().is_ok());
    }

    #[test]
    fn factory_covers_all_supported_kinds() {
        let opts = BackendOptions::default();
        for (kind, name) in [
            (BackendKind::Stream, "stream"),
            (BackendKind::Staged, "staged"),
            (BackendKind::Native, "native"),
        ] {
            let backend = create_backend(kind, &opts).unwrap();
            assert_eq!(backend.name(), name);
        }
        assert!(matches!(
            create_backend(BackendKind::Unsupported, &opts),
            Err(RenderError::CapabilityUnsupported)
        ));
    }
}
