use std::path::PathBuf;

fn bin() -> PathBuf {
    std::env::var_os("CARGO_BIN_EXE_stillreel")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("target").join("debug").join("stillreel"))
}

#[test]
fn detect_prints_environment_json() {
    let out = std::process::Command::new(bin())
        .arg("detect")
        .output()
        .expect("run stillreel detect");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let env: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let backend = env["backend"].as_str().unwrap();
    assert!(["native", "staged", "stream", "unsupported"].contains(&backend));
    assert!(env["capabilities"]["encoder_binary"].is_boolean());
}

#[test]
fn srt_export_writes_the_subtitle_track() {
    let dir = PathBuf::from("target").join("cli_smoke_srt");
    std::fs::create_dir_all(&dir).unwrap();

    let request_path = dir.join("request.json");
    let srt_path = dir.join("out.srt");
    let _ = std::fs::remove_file(&srt_path);

    let request = serde_json::json!({
        "assets": [{ "source": "a.png", "display_duration": 4.0 }],
        "resolution": { "width": 720, "height": 1280 },
        "frame_rate": 30,
        "subtitles": [
            { "text": "first line", "start": 0.0, "end": 1.5 },
            { "text": "second line", "start": 1.5, "end": 3.0 }
        ],
        "output_path": "out.mp4"
    });
    std::fs::write(&request_path, serde_json::to_string_pretty(&request).unwrap()).unwrap();

    let out = std::process::Command::new(bin())
        .arg("srt")
        .arg("--in")
        .arg(&request_path)
        .arg("--out")
        .arg(&srt_path)
        .output()
        .expect("run stillreel srt");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let srt = std::fs::read_to_string(&srt_path).unwrap();
    assert!(srt.contains("1\n00:00:00,000 --> 00:00:01,500\nfirst line"));
    assert!(srt.contains("2\n00:00:01,500 --> 00:00:03,000\nsecond line"));
}
