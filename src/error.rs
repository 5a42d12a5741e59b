pub type EngineResult<T> = Result<T, RenderError>;

/// Failure taxonomy for one render call.
///
/// There is no generic catch-all besides [`RenderError::Other`], and no
/// automatic retries anywhere: every variant is surfaced to the caller with
/// temporary resources already released.
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("no supported encoder backend is available in this runtime")]
    CapabilityUnsupported,

    #[error("asset {index} failed to load: {message}")]
    AssetLoad { index: usize, message: String },

    #[error("encoder backend '{backend}' failed: {message}")]
    Encoder { backend: &'static str, message: String },

    #[error("encoder backend '{backend}' exceeded the {seconds}s timeout")]
    Timeout { backend: &'static str, seconds: u64 },

    #[error("render was cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RenderError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn asset_load(index: usize, msg: impl Into<String>) -> Self {
        Self::AssetLoad {
            index,
            message: msg.into(),
        }
    }

    pub fn encoder(backend: &'static str, msg: impl Into<String>) -> Self {
        Self::Encoder {
            backend,
            message: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            RenderError::validation("x")
                .to_string()
                .contains("validation error:")
        );
        assert!(
            RenderError::asset_load(3, "missing")
                .to_string()
                .contains("asset 3 failed to load")
        );
        assert!(
            RenderError::encoder("native", "boom")
                .to_string()
                .contains("encoder backend 'native' failed")
        );
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = RenderError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
