use std::path::PathBuf;

use stillreel::{
    capability, create_backend, AssetClip, BackendKind, BackendOptions, DetectOptions,
    RenderError, Timeline, Transition, TransitionKind,
};

fn clips(durations: &[f64]) -> Vec<AssetClip> {
    durations
        .iter()
        .enumerate()
        .map(|(i, &d)| AssetClip {
            source: PathBuf::from(format!("img{i}.png")),
            display_duration: d,
        })
        .collect()
}

// Three stills of 2s each at 30 fps: exactly 180 frames, in order, with
// contiguous segments.
#[test]
fn three_stills_make_exactly_180_frames() {
    let tl = Timeline::build(&clips(&[2.0, 2.0, 2.0]), None, None).unwrap();
    assert_eq!(tl.frame_count(30), 180);
    assert_eq!(
        tl.segments.iter().map(|s| s.asset_index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    for pair in tl.segments.windows(2) {
        assert!((pair[0].end - pair[1].start).abs() < 1e-12);
    }

    // Every frame instant resolves to a visible asset.
    for frame in 0..180u64 {
        let t = frame as f64 / 30.0;
        assert!(tl.sample(t).is_some(), "no sample at t={t}");
    }
}

#[test]
fn transition_blend_window_straddles_each_boundary() {
    let tr = Transition {
        kind: TransitionKind::Slide,
        duration: 1.0,
    };
    let tl = Timeline::build(&clips(&[2.0, 2.0, 2.0]), Some(tr), None).unwrap();

    // Total duration is preserved; the blend borrows half a window from
    // each neighbor instead of extending the video.
    assert!((tl.total_duration() - 6.0).abs() < 1e-12);

    use stillreel::timeline::FrameSample;
    assert!(matches!(
        tl.sample(1.4),
        Some(FrameSample::Single { asset_index: 0 })
    ));
    assert!(matches!(
        tl.sample(1.6),
        Some(FrameSample::Blend {
            outgoing: 0,
            incoming: 1,
            ..
        })
    ));
    assert!(matches!(
        tl.sample(2.6),
        Some(FrameSample::Single { asset_index: 1 })
    ));
}

#[test]
fn max_duration_reconciliation_is_exact_and_floored() {
    let tl = Timeline::build(&clips(&[4.0, 4.0, 4.0, 4.0]), None, Some(6.0)).unwrap();
    assert!((tl.total_duration() - 6.0).abs() < 1e-12);
    for seg in &tl.segments {
        assert!(seg.duration() >= 0.1 - 1e-12);
    }

    // Infeasible cap: 30 segments cannot fit a 1 second video at the floor.
    let many: Vec<f64> = vec![2.0; 30];
    assert!(matches!(
        Timeline::build(&clips(&many), None, Some(1.0)),
        Err(RenderError::Validation(_))
    ));
}

// An environment with no encoder capability at all must refuse the render
// before any asset is touched: the factory fails at construction.
#[test]
fn unsupported_environment_fails_before_asset_loading() {
    let env = capability::detect_with(&DetectOptions {
        force_backend: None,
        platform_hint: Some(stillreel::PlatformHint::Sandbox),
        capabilities: Some(stillreel::Capabilities {
            encoder_binary: false,
            encoder_version: None,
            isolated_staging: false,
            stream_pipe: false,
        }),
    });
    assert_eq!(env.backend, BackendKind::Unsupported);

    let err = create_backend(env.backend, &BackendOptions::default()).unwrap_err();
    assert!(matches!(err, RenderError::CapabilityUnsupported));
}

#[test]
fn forced_backend_override_wins_over_capabilities() {
    let env = capability::detect_with(&DetectOptions {
        force_backend: Some(BackendKind::Stream),
        platform_hint: Some(stillreel::PlatformHint::Desktop),
        capabilities: Some(stillreel::Capabilities {
            encoder_binary: true,
            encoder_version: Some("ffmpeg version 6.0".to_string()),
            isolated_staging: true,
            stream_pipe: true,
        }),
    });
    assert_eq!(env.backend, BackendKind::Stream);
}
