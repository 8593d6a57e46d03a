use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "stratum", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a composition request and print its output shape.
    Validate(RequestArgs),
    /// Print the stage plan a request compiles to.
    Plan(PlanArgs),
    /// Composite and encode an MP4 (requires `ffmpeg` on PATH).
    Render(RenderArgs),
    /// Print what `ffprobe` reports for a media file (requires the `media-ffmpeg` feature).
    Probe(ProbeArgs),
}

#[derive(Parser, Debug)]
struct RequestArgs {
    /// Input composition request JSON.
    #[arg(long = "in")]
    in_path: PathBuf,
}

#[derive(Parser, Debug)]
struct PlanArgs {
    /// Input composition request JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Emit the stages as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CodecChoice {
    #[value(name = "h264_nvenc")]
    Nvenc,
    #[value(name = "libx264")]
    X264,
}

impl From<CodecChoice> for stratum::OutputCodec {
    fn from(c: CodecChoice) -> Self {
        match c {
            CodecChoice::Nvenc => Self::H264Nvenc,
            CodecChoice::X264 => Self::Libx264,
        }
    }
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Input composition request JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output MP4 path.
    #[arg(long)]
    out: PathBuf,

    /// Overwrite output if it already exists.
    #[arg(long, default_value_t = true)]
    overwrite: bool,

    /// Override the codec named in the request.
    #[arg(long, value_enum)]
    codec: Option<CodecChoice>,

    /// Audio file to mux into the output.
    #[arg(long)]
    audio: Option<PathBuf>,

    /// Override rayon worker threads for the CPU backend.
    #[arg(long)]
    threads: Option<usize>,

    /// Device memory limit in MiB.
    #[arg(long)]
    memory_limit_mb: Option<u64>,

    /// Delete the output instead of keeping a partial file when the job does not complete.
    #[arg(long, default_value_t = false)]
    discard_partial: bool,
}

#[derive(Parser, Debug)]
struct ProbeArgs {
    /// Media file to inspect.
    #[arg(long = "in")]
    in_path: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Validate(args) => cmd_validate(args),
        Command::Plan(args) => cmd_plan(args),
        Command::Render(args) => cmd_render(args),
        Command::Probe(args) => cmd_probe(args),
    }
}

fn load(path: &std::path::Path) -> anyhow::Result<stratum::CompositionRequest> {
    stratum::CompositionRequest::from_path(path)
        .with_context(|| format!("load request '{}'", path.display()))
}

fn cmd_validate(args: RequestArgs) -> anyhow::Result<()> {
    let req = load(&args.in_path)?;
    let n = stratum::validate(&req)?;
    println!(
        "ok: {} @ {} fps, {} frames, {} layer(s), codec {}",
        n.resolution,
        n.fps,
        n.total_frames,
        n.layers.len(),
        n.codec
    );
    Ok(())
}

fn cmd_plan(args: PlanArgs) -> anyhow::Result<()> {
    let req = load(&args.in_path)?;
    let plan = stratum::build(&stratum::validate(&req)?);
    if args.json {
        let out = serde_json::to_string_pretty(plan.stages()).context("serialize stage plan")?;
        println!("{out}");
        return Ok(());
    }
    for (i, stage) in plan.stages().iter().enumerate() {
        println!("{i:>3}  {stage}");
    }
    println!("fingerprint {}", plan.fingerprint());
    Ok(())
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let req = load(&args.in_path)?;
    let device = stratum::CpuAccelerator::new(stratum::CpuAcceleratorOpts {
        threads: args.threads,
        memory_limit_bytes: args.memory_limit_mb.map(|mb| mb.saturating_mul(1024 * 1024)),
        ..stratum::CpuAcceleratorOpts::default()
    })?;
    let engine = stratum::Engine::new(device, stratum::EngineOpts::default());
    let job = engine.submit_with_default_sources(req)?;

    let mut sink = stratum::FfmpegSink::new(stratum::FfmpegSinkOpts {
        out_path: args.out.clone(),
        overwrite: args.overwrite,
        codec: args.codec.map(Into::into),
        audio_path: args.audio,
    });
    let partial_output = if args.discard_partial {
        stratum::PartialOutput::Discard
    } else {
        stratum::PartialOutput::Retain
    };
    let report = job.run(&mut sink, stratum::RunOpts { partial_output });

    if let Some(err) = report.error {
        return Err(anyhow::Error::new(err).context(format!(
            "job {} {} after {} of {} frames",
            report.job_id, report.state, report.frames_encoded, report.total_frames
        )));
    }
    eprintln!(
        "wrote {} ({} frames, {:.1} fps)",
        args.out.display(),
        report.frames_encoded,
        report.stats.frames_per_sec
    );
    Ok(())
}

fn cmd_probe(args: ProbeArgs) -> anyhow::Result<()> {
    let probe = stratum::probe_media(&args.in_path)?;
    println!("{}x{}", probe.width, probe.height);
    if let Some(fps) = probe.fps {
        println!("fps {fps}");
    }
    if let Some(frames) = probe.frames {
        println!("frames {frames}");
    }
    if let Some(secs) = probe.duration_secs {
        println!("duration {secs:.3}s");
    }
    println!("audio {}", probe.has_audio);
    Ok(())
}
