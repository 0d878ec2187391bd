//! upres CLI entrypoint.
//!
//! ```bash
//! upres probe --json
//! upres config --input unit.json --scale 4 --write unit.json
//! upres upscale --input in.rgb --output out.rgb --width 640 --height 360 --model model.onnx
//! ```

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use upres_core::config::{
    InterpolationKernel, ModelVariant, PacingConfig, ParameterStore, ScaleFactor,
    UnitConfiguration,
};
use upres_core::device::{DeviceProbe, SystemProbe};
use upres_core::error::{Result, UpresError};
use upres_pipeline::{
    RawFrameSink, RawFrameSource, StreamConfig, StreamReport, SuperResolutionUnit, run_stream,
};

const JSON_SCHEMA_VERSION: u32 = 1;

#[derive(Parser, Debug)]
#[command(
    name = "upres",
    version,
    about = "Real-time frame super-resolution",
    arg_required_else_help = true,
    after_help = "Examples:\n  upres probe --json\n  upres config --scale 4 --sharpen --write unit.json\n  upres upscale --input in.rgb --output out.rgb --width 640 --height 360 --config unit.json"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Report accelerator presence and the recommended precision.
    Probe(ProbeArgs),
    /// Resolve a unit configuration from a document plus overrides.
    Config(ConfigArgs),
    /// Upscale a raw rgb24 stream.
    Upscale(UpscaleArgs),
}

#[derive(Args, Debug, Clone)]
struct ProbeArgs {
    /// Emit structured JSON output to stdout.
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VariantArg {
    #[value(name = "realesrgan")]
    RealEsrgan,
    #[value(name = "srresnet", alias = "light")]
    SrResNet,
}

impl From<VariantArg> for ModelVariant {
    fn from(value: VariantArg) -> Self {
        match value {
            VariantArg::RealEsrgan => ModelVariant::RealEsrgan,
            VariantArg::SrResNet => ModelVariant::SrResNet,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InterpolationArg {
    Bicubic,
    Lanczos,
}

impl From<InterpolationArg> for InterpolationKernel {
    fn from(value: InterpolationArg) -> Self {
        match value {
            InterpolationArg::Bicubic => InterpolationKernel::Bicubic,
            InterpolationArg::Lanczos => InterpolationKernel::Lanczos,
        }
    }
}

/// Unit configuration overrides shared by `config` and `upscale`.
#[derive(Args, Debug, Clone, Default)]
struct UnitArgs {
    /// Parameter document to start from (defaults when absent).
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// ONNX model path.
    #[arg(short = 'm', long = "model")]
    model: Option<PathBuf>,

    /// Upscale factor: 2 or 4.
    #[arg(short = 's', long = "scale")]
    scale: Option<u32>,

    /// Tile edge in input pixels (0 = off).
    #[arg(long = "tile")]
    tile: Option<usize>,

    /// Enable unsharp-mask post-processing.
    #[arg(long = "sharpen", default_value_t = false)]
    sharpen: bool,

    /// Unsharp-mask amount in [0, 1].
    #[arg(long = "sharpen-amount")]
    sharpen_amount: Option<f32>,

    /// Try the model even without an accelerator.
    #[arg(long = "no-fast-fallback", default_value_t = false)]
    no_fast_fallback: bool,

    /// Model variant.
    #[arg(long = "variant", value_enum)]
    variant: Option<VariantArg>,

    /// Kernel for the interpolation tier.
    #[arg(long = "interpolation", value_enum)]
    interpolation: Option<InterpolationArg>,
}

impl UnitArgs {
    fn resolve(&self) -> Result<UnitConfiguration> {
        let mut config = match &self.config {
            Some(path) => ParameterStore::load(path)?,
            None => UnitConfiguration::default(),
        };
        if let Some(model) = &self.model {
            config.model_path = Some(model.clone());
        }
        if let Some(scale) = self.scale {
            config.scale = ScaleFactor::try_from(scale)?;
        }
        if let Some(tile) = self.tile {
            config.tiling_size = tile;
        }
        if self.sharpen {
            config.sharpen = true;
        }
        if let Some(amount) = self.sharpen_amount {
            config.sharpen_amount = amount;
        }
        if self.no_fast_fallback {
            config.fast_fallback = false;
        }
        if let Some(variant) = self.variant {
            config.model_variant = variant.into();
        }
        if let Some(interpolation) = self.interpolation {
            config.interpolation = interpolation.into();
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
struct ConfigArgs {
    #[command(flatten)]
    unit: UnitArgs,

    /// Write the resolved document to this path.
    #[arg(short = 'w', long = "write")]
    write: Option<PathBuf>,

    /// Emit structured JSON output to stdout.
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug, Clone)]
struct UpscaleArgs {
    /// Raw rgb24 input stream.
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Raw rgb24 output stream.
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    /// Input frame width in pixels.
    #[arg(long = "width")]
    width: usize,

    /// Input frame height in pixels.
    #[arg(long = "height")]
    height: usize,

    #[command(flatten)]
    unit: UnitArgs,

    /// Output rate used when the source rate is unknown.
    #[arg(long = "fps", default_value_t = 30.0)]
    fps: f64,

    /// Native rate of the input stream, reported to the rate governor.
    #[arg(long = "source-fps")]
    source_fps: Option<f64>,

    /// Ignore the source rate and pace at --fps.
    #[arg(long = "no-auto-fps", default_value_t = false)]
    no_auto_fps: bool,

    /// Emit frames as fast as they are computed.
    #[arg(long = "no-pace", default_value_t = false)]
    no_pace: bool,

    /// Channel capacity: compute -> emit.
    #[arg(long = "queue")]
    queue: Option<usize>,

    /// Emit structured JSON output to stdout.
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let json_error_command = match &cli.command {
        Commands::Probe(args) if args.json => Some("probe"),
        Commands::Config(args) if args.json => Some("config"),
        Commands::Upscale(args) if args.json => Some("upscale"),
        _ => None,
    };

    let result = match cli.command {
        Commands::Probe(args) => run_probe(args),
        Commands::Config(args) => run_config(args),
        Commands::Upscale(args) => {
            build_runtime().and_then(|rt| rt.block_on(run_upscale(args)))
        }
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            if let Some(command) = json_error_command {
                println!("{}", command_error_json(command, &err));
            } else {
                tracing::error!(error = %err, code = err.error_code(), "Command failed");
            }
            std::process::exit(err.error_code() as i32);
        }
    }
}

fn init_tracing() {
    let ansi_enabled = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(ansi_enabled)
        .init();
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

fn run_probe(args: ProbeArgs) -> Result<()> {
    let caps = SystemProbe.probe();
    let runtime = upres_onnx::runtime_available();
    if args.json {
        println!(
            "{}",
            json!({
                "schema_version": JSON_SCHEMA_VERSION,
                "command": "probe",
                "ok": true,
                "accelerator_present": caps.accelerator_present,
                "accelerator_name": caps.accelerator_name,
                "recommended_precision": caps.recommended_precision,
                "onnx_runtime": runtime,
            })
        );
    } else {
        println!(
            "accelerator: {}",
            caps.accelerator_name.as_deref().unwrap_or(if caps.accelerator_present {
                "present"
            } else {
                "none"
            })
        );
        println!("precision:   {}", caps.recommended_precision.as_str());
        println!("onnx:        {}", if runtime { "available" } else { "not built" });
    }
    Ok(())
}

fn run_config(args: ConfigArgs) -> Result<()> {
    let config = args.unit.resolve()?;
    if let Some(path) = &args.write {
        ParameterStore::save(path, &config)?;
        tracing::info!(path = %path.display(), "Parameter document written");
    }
    if args.json {
        println!(
            "{}",
            json!({
                "schema_version": JSON_SCHEMA_VERSION,
                "command": "config",
                "ok": true,
                "written": args.write.as_deref().map(path_str),
                "config": serde_json::to_value(&config)?,
            })
        );
    } else {
        println!("{}", ParameterStore::serialize_pretty(&config)?);
    }
    Ok(())
}

async fn run_upscale(args: UpscaleArgs) -> Result<()> {
    let config = args.unit.resolve()?;
    let scale = config.scale.get();
    let stream_config = StreamConfig {
        channel_capacity: args.queue.unwrap_or(StreamConfig::default().channel_capacity),
        pacing: PacingConfig {
            target_fps: args.fps,
            auto_fps: !args.no_auto_fps,
        },
        pace_output: !args.no_pace,
    };
    stream_config.pacing.validate()?;

    let source = RawFrameSource::open(&args.input, args.width, args.height, args.source_fps)?;
    let sink = RawFrameSink::create(&args.output)?;
    let unit = SuperResolutionUnit::new(config)?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; stopping stream");
            signal_cancel.cancel();
        }
    });

    tracing::info!(
        input = %args.input.display(),
        output = %args.output.display(),
        width = args.width,
        height = args.height,
        scale,
        "Starting upscale"
    );
    let report = run_stream(source, unit, sink, stream_config, cancel).await?;

    if args.json {
        println!("{}", upscale_json(&args, scale, &report)?);
    } else {
        tracing::info!(
            frames = report.frames_emitted,
            out_width = args.width * scale,
            out_height = args.height * scale,
            tier = ?report.selection.as_ref().map(|s| s.tier),
            elapsed_ms = report.elapsed_ms,
            "Upscale complete"
        );
    }
    Ok(())
}

fn path_str(path: &Path) -> String {
    path.display().to_string()
}

fn upscale_json(args: &UpscaleArgs, scale: usize, report: &StreamReport) -> Result<String> {
    Ok(json!({
        "schema_version": JSON_SCHEMA_VERSION,
        "command": "upscale",
        "ok": true,
        "input": path_str(&args.input),
        "output": path_str(&args.output),
        "width": args.width,
        "height": args.height,
        "out_width": args.width * scale,
        "out_height": args.height * scale,
        "report": serde_json::to_value(report)?,
    })
    .to_string())
}

fn command_error_json(command: &str, err: &UpresError) -> String {
    json!({
        "schema_version": JSON_SCHEMA_VERSION,
        "command": command,
        "ok": false,
        "error": err.to_string(),
        "code": err.error_code(),
    })
    .to_string()
}
