use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use watchpost_capture::{FrameSource, ImageDirSource, ReplayProvider};
use watchpost_core::registry::{JsonRegistryFile, RegistryLoader};
use watchpost_core::sink::{deliver_to_sinks, JsonLinesSink, ResultSink, TracingSink};
use watchpost_core::matcher::DEFAULT_TOLERANCE;
use watchpost_core::{Embedding, FramePipeline, IdentityId, IdentityMatcher, PipelineConfig};

#[derive(Parser)]
#[command(name = "watchpost", about = "Watchpost identity matching and analytics CLI")]
struct Cli {
    /// Identity registry file
    #[arg(short, long, global = true, default_value = "registry.json")]
    registry: PathBuf,

    /// Match tolerance (maximum embedding distance). `run` falls back to the
    /// config file's value, everything else to the built-in default.
    #[arg(short, long, global = true)]
    tolerance: Option<f32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize the registry and list its identities
    List {
        /// Include inactive identities
        #[arg(long)]
        all: bool,
    },
    /// Match one embedding against the registry
    Match {
        /// Comma-separated embedding values
        #[arg(long, value_parser = parse_embedding)]
        embedding: Embedding,
    },
    /// Show the closest identities to an embedding
    Similar {
        #[arg(long, value_parser = parse_embedding)]
        embedding: Embedding,
        /// Number of identities to show
        #[arg(short, default_value_t = 5)]
        k: usize,
    },
    /// Check an embedding against one specific identity
    Verify {
        /// Identity ID
        id: u64,
        #[arg(long, value_parser = parse_embedding)]
        embedding: Embedding,
        /// Tighten the threshold to 80% of the tolerance
        #[arg(long)]
        strict: bool,
    },
    /// Run the pipeline over an image directory with precomputed detections
    Run(RunArgs),
    /// Write the registry, inactive identities included, to another file
    Export {
        /// Destination file
        out: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Directory of frame images
    #[arg(long)]
    frames: PathBuf,
    /// Detections file (JSON lines)
    #[arg(long)]
    detections: PathBuf,
    /// TOML file with a [pipeline] table
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write results as JSON lines here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Frame rate used to timestamp replayed frames
    #[arg(long, default_value_t = 10.0)]
    fps: f64,
    /// Skip frames that are almost entirely black
    #[arg(long)]
    skip_dark: bool,
    /// Camera identifier stamped on results
    #[arg(long, default_value_t = 0)]
    camera_id: u32,
}

#[derive(Deserialize, Default)]
struct RunFile {
    #[serde(default)]
    pipeline: PipelineConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let registry = JsonRegistryFile::new(&cli.registry);
    let tolerance = cli.tolerance.unwrap_or(DEFAULT_TOLERANCE);

    match cli.command {
        Commands::List { all } => {
            let matcher = load_matcher(&registry, tolerance)?;
            print_json(&matcher.summary())?;
            let entries = if all {
                registry.read_all()?
            } else {
                matcher.snapshot().entries().to_vec()
            };
            for entry in entries {
                println!(
                    "{:>6}  {:<24} {:<20} {}",
                    entry.id,
                    entry.display_name,
                    entry.category,
                    if entry.active { "active" } else { "inactive" }
                );
            }
        }
        Commands::Match { embedding } => {
            let matcher = load_matcher(&registry, tolerance)?;
            let recognition = matcher.match_embedding(&embedding)?;
            print_json(&recognition)?;
        }
        Commands::Similar { embedding, k } => {
            let matcher = load_matcher(&registry, tolerance)?;
            print_json(&matcher.find_similar(&embedding, k)?)?;
        }
        Commands::Verify {
            id,
            embedding,
            strict,
        } => {
            let matcher = load_matcher(&registry, tolerance)?;
            let verification = matcher.verify(&embedding, IdentityId(id), strict)?;
            print_json(&verification)?;
            if !verification.verified {
                std::process::exit(1);
            }
        }
        Commands::Run(args) => {
            let matcher = Arc::new(load_matcher(&registry, tolerance)?);
            let overridden = cli.tolerance;
            tokio::task::spawn_blocking(move || run_offline(args, matcher, overridden)).await??;
        }
        Commands::Export { out } => {
            let entries = registry.read_all()?;
            JsonRegistryFile::new(&out).write_all(&entries)?;
            println!("Exported {} identities to {}", entries.len(), out.display());
        }
    }

    Ok(())
}

fn load_matcher(registry: &JsonRegistryFile, tolerance: f32) -> Result<IdentityMatcher> {
    let matcher = IdentityMatcher::new(tolerance)?;
    let entries = registry
        .load_active()
        .with_context(|| format!("failed to load registry {}", registry.path().display()))?;
    matcher.load(entries)?;
    Ok(matcher)
}

fn load_pipeline_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let Some(path) = path else {
        return Ok(PipelineConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let file: RunFile =
        toml::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))?;
    Ok(file.pipeline)
}

/// Replay every frame through the pipeline. Frames are stamped `1 / fps`
/// apart so cooldowns and behavior windows follow the recording, not the
/// replay speed. An explicit `--tolerance` wins over the config file.
fn run_offline(
    args: RunArgs,
    matcher: Arc<IdentityMatcher>,
    tolerance: Option<f32>,
) -> Result<()> {
    if !(args.fps.is_finite() && args.fps > 0.0) {
        bail!("--fps must be a positive number");
    }
    let mut config = load_pipeline_config(args.config.as_deref())?;
    if let Some(tolerance) = tolerance {
        config.tolerance = tolerance;
    }
    matcher
        .update_tolerance(config.tolerance)
        .context("invalid match tolerance")?;

    let mut pipeline = FramePipeline::new(&config, matcher, args.camera_id)?;
    let mut source = ImageDirSource::open(&args.frames)?;
    let mut provider = ReplayProvider::open(&args.detections)?;

    let mut sinks: Vec<Box<dyn ResultSink>> = vec![Box::new(TracingSink)];
    match &args.output {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            sinks.push(Box::new(JsonLinesSink::new(std::io::BufWriter::new(file))));
        }
        None => sinks.push(Box::new(JsonLinesSink::new(std::io::stdout()))),
    }

    let started = Instant::now();
    let started_at = chrono::Utc::now();
    let mut index = 0u64;
    let mut dark_skipped = 0u64;

    while let Some(mut frame) = source.next_frame()? {
        let offset = Duration::from_secs_f64(index as f64 / args.fps);
        index += 1;
        if args.skip_dark && frame.is_dark {
            dark_skipped += 1;
            continue;
        }
        frame.timestamp = started + offset;
        let now = started_at + chrono::Duration::from_std(offset)?;
        let result = pipeline.process_frame_at(&mut provider, &frame, now);
        deliver_to_sinks(&mut sinks, &result);
    }

    let stats = pipeline.stats();
    tracing::info!(frames = index, dark_skipped, "replay finished");
    eprintln!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn parse_embedding(raw: &str) -> Result<Embedding, String> {
    let values = raw
        .split(',')
        .map(|v| v.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid embedding value: {e}"))?;
    if values.is_empty() {
        return Err("embedding is empty".to_string());
    }
    Ok(Embedding::new(values))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
