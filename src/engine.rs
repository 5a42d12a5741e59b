//! The render orchestrator: validation, timeline construction, backend
//! dispatch and progress aggregation.
//!
//! A [`Renderer`] wraps exactly one backend instance. Callers construct it
//! explicitly from a detected [`Environment`] or a chosen backend kind;
//! nothing here lives in process-global state.

use crate::{
    capability::{BackendKind, Environment},
    encode::{create_backend, BackendOptions, EncoderBackend},
    error::{EngineResult, RenderError},
    model::{RenderRequest, RenderResult},
    progress::{ProgressAggregator, ProgressEvent},
    timeline::Timeline,
};

pub struct Renderer {
    backend: Box<dyn EncoderBackend>,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Renderer {
    /// Build a renderer for the backend a capability detection recommended.
    pub fn from_environment(env: &Environment, opts: &BackendOptions) -> EngineResult<Self> {
        Self::new(env.backend, opts)
    }

    /// Build a renderer for an explicitly chosen backend kind.
    pub fn new(kind: BackendKind, opts: &BackendOptions) -> EngineResult<Self> {
        Ok(Self {
            backend: create_backend(kind, opts)?,
        })
    }

    /// Wrap an already-constructed backend. Mostly useful for tests and
    /// custom encoder implementations.
    pub fn with_backend(backend: Box<dyn EncoderBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Validate, build the timeline once, and run the backend. Progress
    /// events forwarded to `on_progress` are globally scaled and never
    /// decrease.
    pub fn render(
        &mut self,
        request: &RenderRequest,
        on_progress: &mut (dyn FnMut(ProgressEvent) + Send),
    ) -> EngineResult<RenderResult> {
        request.validate()?;
        let timeline = Timeline::build(
            &request.assets,
            request.transition,
            request.max_total_duration,
        )?;

        tracing::info!(
            backend = self.backend.name(),
            assets = request.assets.len(),
            duration_s = timeline.total_duration(),
            frames = timeline.frame_count(request.frame_rate),
            output = %request.output_path.display(),
            "starting render"
        );

        // Each backend declares its own phase mix, so the global scale has
        // no dead bands for phases the backend never reports.
        let mut aggregator = ProgressAggregator::new(self.backend.phase_weights())?;
        let mut forward = |event: ProgressEvent| {
            let scaled = aggregator.event(event.phase, event.percent, event.message);
            on_progress(scaled);
        };

        let backend_name = self.backend.name();
        let result = self
            .backend
            .render(request, &timeline, &mut forward)
            .map_err(|e| match e {
                // Unexpected internals surface as encoder failures with the
                // backend attached; typed errors pass through unchanged.
                RenderError::Other(inner) => RenderError::encoder(backend_name, format!("{inner:#}")),
                other => other,
            })?;

        tracing::info!(
            backend = backend_name,
            duration_s = result.duration_seconds,
            size_bytes = result.size_bytes,
            elapsed_ms = result.processing_time_ms,
            "render finished"
        );
        Ok(result)
    }

    /// Request cancellation of the in-flight render, if any.
    pub fn cancel(&self) {
        self.backend.cancel();
    }
}
