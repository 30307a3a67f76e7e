use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use reframe::{
    config::Config,
    pipeline::{JobOutcome, JobRequest, LogProgress, PipelineCoordinator},
    transform::{ModelSlot, RegionFile, TransformParams, TransformRegistry},
    video::{EncoderCapabilities, FfmpegEncoderProbe, StaticEncoders},
};

#[derive(Parser)]
#[command(
    name = "reframe",
    version,
    about = "Upscale, interpolate or inpaint videos frame by frame",
    long_about = "Reframe streams a video through an ffmpeg decoder, a batched per-frame transform and an ffmpeg encoder, keeping the original audio track."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (optional)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for output files (default: next to each input)
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    /// Encoder quality, 0-51, lower is better
    #[arg(short, long, global = true)]
    quality: Option<u8>,

    /// Accelerator encoder to use instead of detection (repeatable)
    #[arg(long = "encoder", global = true)]
    encoders: Vec<String>,

    /// Always encode in software
    #[arg(long, global = true)]
    no_accelerator: bool,

    /// Frames per transform call
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Write the effective configuration to this file
    #[arg(long, global = true)]
    save_config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Upscale every frame by an integer factor
    Enhance {
        /// Scale factor (1-8)
        #[arg(short, long, default_value_t = 2)]
        scale: u32,

        /// Input video files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Multiply the frame rate by synthesizing intermediate frames
    Interpolate {
        /// Frame-rate multiplier (2-10)
        #[arg(short, long, default_value_t = 2)]
        multiplier: u32,

        /// Skip the de-interlacing pre-filter
        #[arg(long)]
        keep_interlacing: bool,

        /// Input video files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Remove subtitles or watermarks inside mask regions
    Inpaint {
        /// TOML file with [[regions]] tables (default: bottom quarter)
        #[arg(short, long)]
        regions: Option<PathBuf>,

        /// Input video files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
}

impl Command {
    fn transform_name(&self) -> &'static str {
        match self {
            Command::Enhance { .. } => "enhance",
            Command::Interpolate { .. } => "interpolate",
            Command::Inpaint { .. } => "inpaint",
        }
    }

    fn inputs(&self) -> &[PathBuf] {
        match self {
            Command::Enhance { inputs, .. } | Command::Interpolate { inputs, .. } | Command::Inpaint { inputs, .. } => inputs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    info!("Starting Reframe v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(config_path) => {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(config_path)?
        }
        None => Config::default(),
    };
    apply_overrides(&mut config, &cli);
    config.validate()?;

    if let Some(path) = &cli.save_config {
        config.save_to_file(path)?;
        info!("Configuration written to {:?}", path);
    }

    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(config.pipeline.transform_threads)
        .build_global()
    {
        warn!("Could not size the transform thread pool: {}", e);
    }

    let params = match &cli.command {
        Command::Enhance { scale, .. } => TransformParams::with_scale(*scale),
        Command::Interpolate { multiplier, .. } => TransformParams::with_multiplier(*multiplier),
        Command::Inpaint { regions, .. } => match regions {
            Some(path) => TransformParams::with_regions(RegionFile::from_file(path)?.regions),
            None => TransformParams::default(),
        },
    };

    let name = cli.command.transform_name();
    let registry = TransformRegistry::new();
    let transform = registry
        .create(name)
        .ok_or_else(|| anyhow::anyhow!("Unknown transform: {}", name))?;
    info!("Using '{}' transform: {}", transform.name(), transform.description());

    let model = ModelSlot::with_transform(transform).await?;

    let encoders: Arc<dyn EncoderCapabilities> = if !cli.encoders.is_empty() {
        Arc::new(StaticEncoders(cli.encoders.clone()))
    } else if config.encoder.use_accelerator {
        Arc::new(FfmpegEncoderProbe::detect(&config.tools.ffmpeg, config.pipeline.probe_timeout()).await)
    } else {
        Arc::new(StaticEncoders::default())
    };

    let requests: Vec<JobRequest> = cli
        .command
        .inputs()
        .iter()
        .map(|input| JobRequest::named(input, &config.output, name))
        .collect();

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            interrupt.cancel();
        }
    });

    let coordinator =
        PipelineCoordinator::new(config, model.clone(), encoders).with_progress(Arc::new(LogProgress::new()));
    let report = coordinator.run_batch(&requests, params, &cancel).await;
    model.unload().await;

    for job in &report.jobs {
        match &job.outcome {
            JobOutcome::Completed => info!("{} -> {}", job.input.display(), job.output.display()),
            JobOutcome::Cancelled => warn!("{}: cancelled", job.input.display()),
            JobOutcome::Failed(e) => error!("{}: {}", job.input.display(), e.user_message()),
        }
        for notice in &job.notices {
            warn!("{}: {}", job.input.display(), notice);
        }
    }
    info!("Done: {}", report.summary());

    if report.failed() > 0 {
        anyhow::bail!("{} of {} file(s) failed", report.failed(), report.jobs.len());
    }
    if report.cancelled() > 0 {
        std::process::exit(130);
    }
    Ok(())
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(dir) = &cli.output_dir {
        config.output.directory = Some(dir.clone());
    }
    if let Some(quality) = cli.quality {
        config.encoder.quality = quality;
    }
    if cli.no_accelerator {
        config.encoder.use_accelerator = false;
    }
    if let Some(batch_size) = cli.batch_size {
        config.pipeline.batch_size = Some(batch_size);
    }
    if let Command::Interpolate { keep_interlacing, .. } = &cli.command {
        config.decoder.deinterlace = !keep_interlacing;
    }
}
