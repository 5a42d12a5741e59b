//! Runtime capability probing and backend selection.
//!
//! Probing is read-only and idempotent: the only side effect is a
//! non-fatal `ffmpeg -version` shell-out. The default [`detect`] result is
//! cached for the process lifetime; [`detect_with`] never caches and is
//! the deterministic-testing entry point.

use std::sync::OnceLock;

pub const FORCE_BACKEND_ENV: &str = "STILLREEL_FORCE_BACKEND";
pub const PLATFORM_ENV: &str = "STILLREEL_PLATFORM";

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// External encoder process driven directly against source assets.
    Native,
    /// Single declarative encode against assets staged into an isolated
    /// directory (the sandboxed, virtual-filesystem variant).
    Staged,
    /// In-process frame composition streamed into a piped encoder.
    Stream,
    Unsupported,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Native => "native",
            BackendKind::Staged => "staged",
            BackendKind::Stream => "stream",
            BackendKind::Unsupported => "unsupported",
        }
    }

    pub fn parse(s: &str) -> Option<BackendKind> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Some(BackendKind::Native),
            "staged" => Some(BackendKind::Staged),
            "stream" => Some(BackendKind::Stream),
            "unsupported" => Some(BackendKind::Unsupported),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformHint {
    #[default]
    Desktop,
    Server,
    /// Serverless/edge sandbox; native external processes are avoided here.
    Sandbox,
}

impl PlatformHint {
    pub fn parse(s: &str) -> Option<PlatformHint> {
        match s.trim().to_ascii_lowercase().as_str() {
            "desktop" => Some(PlatformHint::Desktop),
            "server" => Some(PlatformHint::Server),
            "sandbox" => Some(PlatformHint::Sandbox),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Capabilities {
    /// An external encoder binary answered a version query.
    pub encoder_binary: bool,
    pub encoder_version: Option<String>,
    /// A private staging directory is available for the staged backend.
    pub isolated_staging: bool,
    /// The runtime can stream raw frames into a piped encoder.
    pub stream_pipe: bool,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Environment {
    pub backend: BackendKind,
    pub platform: PlatformHint,
    pub capabilities: Capabilities,
}

/// Overrides for deterministic testing and explicit caller policy.
#[derive(Clone, Debug, Default)]
pub struct DetectOptions {
    pub force_backend: Option<BackendKind>,
    pub platform_hint: Option<PlatformHint>,
    /// Skip probing entirely and use these capabilities.
    pub capabilities: Option<Capabilities>,
}

/// Probe the runtime and recommend a backend. Cached per process.
pub fn detect() -> Environment {
    static CACHE: OnceLock<Environment> = OnceLock::new();
    CACHE.get_or_init(|| detect_with(&DetectOptions::default())).clone()
}

/// Probe (or use the supplied overrides) without caching.
pub fn detect_with(opts: &DetectOptions) -> Environment {
    let platform = opts
        .platform_hint
        .or_else(platform_from_env)
        .unwrap_or_else(probe_platform);

    let capabilities = opts.capabilities.clone().unwrap_or_else(probe_capabilities);

    let backend = opts
        .force_backend
        .or_else(backend_from_env)
        .unwrap_or_else(|| select_backend(&capabilities, platform));

    tracing::debug!(
        backend = backend.as_str(),
        ?platform,
        encoder_binary = capabilities.encoder_binary,
        isolated_staging = capabilities.isolated_staging,
        stream_pipe = capabilities.stream_pipe,
        "environment detected"
    );

    Environment {
        backend,
        platform,
        capabilities,
    }
}

/// Decision rule: native when an encoder binary is reachable outside a
/// sandbox; else the staged variant when isolated staging exists; else the
/// streaming variant; else unsupported.
pub fn select_backend(caps: &Capabilities, platform: PlatformHint) -> BackendKind {
    if caps.encoder_binary && platform != PlatformHint::Sandbox {
        return BackendKind::Native;
    }
    if caps.encoder_binary && caps.isolated_staging {
        return BackendKind::Staged;
    }
    if caps.encoder_binary && caps.stream_pipe {
        return BackendKind::Stream;
    }
    BackendKind::Unsupported
}

fn backend_from_env() -> Option<BackendKind> {
    let raw = std::env::var(FORCE_BACKEND_ENV).ok()?;
    match BackendKind::parse(&raw) {
        Some(kind) => Some(kind),
        None => {
            tracing::warn!(value = %raw, "ignoring unknown {FORCE_BACKEND_ENV} override");
            None
        }
    }
}

fn platform_from_env() -> Option<PlatformHint> {
    let raw = std::env::var(PLATFORM_ENV).ok()?;
    match PlatformHint::parse(&raw) {
        Some(hint) => Some(hint),
        None => {
            tracing::warn!(value = %raw, "ignoring unknown {PLATFORM_ENV} override");
            None
        }
    }
}

fn probe_platform() -> PlatformHint {
    // Common serverless/edge markers. Absence of all of them means a
    // regular desktop/server process.
    const SANDBOX_MARKERS: &[&str] = &[
        "AWS_LAMBDA_FUNCTION_NAME",
        "FUNCTION_TARGET",
        "VERCEL",
        "NETLIFY",
    ];
    if SANDBOX_MARKERS.iter().any(|k| std::env::var_os(k).is_some()) {
        return PlatformHint::Sandbox;
    }
    PlatformHint::Desktop
}

fn probe_capabilities() -> Capabilities {
    let encoder_version = probe_encoder_version();
    let encoder_binary = encoder_version.is_some();
    Capabilities {
        encoder_binary,
        encoder_version,
        isolated_staging: staging_dir_available(),
        stream_pipe: encoder_binary,
    }
}

/// Version query against the external encoder; failure is reported as the
/// capability being absent, never as an error.
fn probe_encoder_version() -> Option<String> {
    let out = std::process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&out.stdout);
    stdout.lines().next().map(|line| line.trim().to_string())
}

fn staging_dir_available() -> bool {
    let dir = std::env::temp_dir();
    dir.is_dir()
        && std::fs::metadata(&dir)
            .map(|m| !m.permissions().readonly())
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(encoder: bool, staging: bool, pipe: bool) -> Capabilities {
        Capabilities {
            encoder_binary: encoder,
            encoder_version: encoder.then(|| "ffmpeg version 6.0".to_string()),
            isolated_staging: staging,
            stream_pipe: pipe,
        }
    }

    #[test]
    fn native_preferred_outside_sandbox() {
        assert_eq!(
            select_backend(&caps(true, true, true), PlatformHint::Desktop),
            BackendKind::Native
        );
        assert_eq!(
            select_backend(&caps(true, true, true), PlatformHint::Server),
            BackendKind::Native
        );
    }

    #[test]
    fn sandbox_falls_back_to_staged_then_stream() {
        assert_eq!(
            select_backend(&caps(true, true, true), PlatformHint::Sandbox),
            BackendKind::Staged
        );
        assert_eq!(
            select_backend(&caps(true, false, true), PlatformHint::Sandbox),
            BackendKind::Stream
        );
    }

    #[test]
    fn nothing_available_is_unsupported() {
        assert_eq!(
            select_backend(&caps(false, false, false), PlatformHint::Desktop),
            BackendKind::Unsupported
        );
        // No capture primitive and no isolation support either.
        assert_eq!(
            select_backend(&caps(false, true, false), PlatformHint::Sandbox),
            BackendKind::Unsupported
        );
    }

    #[test]
    fn overrides_bypass_probing() {
        let env = detect_with(&DetectOptions {
            force_backend: Some(BackendKind::Stream),
            platform_hint: Some(PlatformHint::Sandbox),
            capabilities: Some(caps(false, false, false)),
        });
        assert_eq!(env.backend, BackendKind::Stream);
        assert_eq!(env.platform, PlatformHint::Sandbox);
        assert!(!env.capabilities.encoder_binary);
    }

    #[test]
    fn detect_with_is_deterministic_for_fixed_inputs() {
        let opts = DetectOptions {
            force_backend: None,
            platform_hint: Some(PlatformHint::Desktop),
            capabilities: Some(caps(true, true, true)),
        };
        assert_eq!(detect_with(&opts), detect_with(&opts));
    }

    #[test]
    fn backend_kind_parse_round_trips() {
        for kind in [
            BackendKind::Native,
            BackendKind::Staged,
            BackendKind::Stream,
            BackendKind::Unsupported,
        ] {
            assert_eq!(BackendKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(BackendKind::parse("webgpu"), None);
    }
}
