#![forbid(unsafe_code)]

pub mod audio;
pub mod capability;
pub mod compositor;
pub mod encode;
pub mod encode_native;
pub mod encode_staged;
pub mod encode_stream;
pub mod engine;
pub mod error;
pub mod ffmpeg;
mod filtergraph;
pub mod model;
pub mod progress;
pub mod subtitles;
pub mod text;
pub mod timeline;

pub use capability::{detect, detect_with, BackendKind, Capabilities, DetectOptions, Environment, PlatformHint};
pub use encode::{create_backend, BackendOptions, CancelToken, EncoderBackend};
pub use engine::Renderer;
pub use error::{EngineResult, RenderError};
pub use model::{
    AssetClip, OutputFormat, Quality, RenderRequest, RenderResult, Resolution, SubtitleSegment,
    Transition, TransitionKind, Watermark, WatermarkCorner,
};
pub use progress::{Phase, ProgressEvent};
pub use timeline::Timeline;
