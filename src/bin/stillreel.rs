use std::{path::PathBuf, time::Duration};

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use stillreel::{
    capability, subtitles, BackendKind, BackendOptions, DetectOptions, RenderRequest, Renderer,
};

#[derive(Parser, Debug)]
#[command(name = "stillreel", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe the runtime and print the detected environment as JSON.
    Detect,
    /// Render a request JSON into a video (requires `ffmpeg` on PATH).
    Render(RenderArgs),
    /// Export the subtitle track of a request JSON as an SRT file.
    Srt(SrtArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Input render request JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Override the output path from the request.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Force a specific backend instead of the detected one.
    #[arg(long)]
    backend: Option<String>,

    /// Font file for subtitle/watermark overlays.
    #[arg(long)]
    font: Option<PathBuf>,

    /// Abort the render after this many seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Pace frame submission against the wall clock (streaming backend).
    #[arg(long, default_value_t = false)]
    realtime: bool,
}

#[derive(Parser, Debug)]
struct SrtArgs {
    /// Input render request JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output SRT path.
    #[arg(long)]
    out: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Detect => cmd_detect(),
        Command::Render(args) => cmd_render(args),
        Command::Srt(args) => cmd_srt(args),
    }
}

fn cmd_detect() -> anyhow::Result<()> {
    let env = capability::detect_with(&DetectOptions::default());
    println!("{}", serde_json::to_string_pretty(&env)?);
    Ok(())
}

fn load_request(path: &PathBuf) -> anyhow::Result<RenderRequest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read request '{}'", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse request '{}'", path.display()))
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let mut request = load_request(&args.in_path)?;
    if let Some(out) = args.out {
        request.output_path = out;
    }

    let backend = match args.backend.as_deref() {
        Some(raw) => BackendKind::parse(raw)
            .with_context(|| format!("unknown backend '{raw}' (native, staged, stream)"))?,
        None => capability::detect().backend,
    };

    let opts = BackendOptions {
        font_path: args.font,
        pace_realtime: args.realtime,
        timeout: args.timeout.map(Duration::from_secs),
    };
    let mut renderer = Renderer::new(backend, &opts)?;

    let mut last_line = String::new();
    let result = renderer.render(&request, &mut |event| {
        let line = format!("[{:>8}] {:5.1}% {}", event.phase.as_str(), event.percent, event.message);
        if line != last_line {
            eprintln!("{line}");
            last_line = line;
        }
    })?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn cmd_srt(args: SrtArgs) -> anyhow::Result<()> {
    let request = load_request(&args.in_path)?;
    subtitles::save_srt(&request.subtitles, &args.out)?;
    eprintln!("wrote {}", args.out.display());
    Ok(())
}
