//! FrameForge CLI: temporal forensics for video files.
//!
//! Usage:
//!   frameforge analyze <VIDEO>       Analyze a video and print the JSON report
//!   frameforge batch <VIDEO>...      Analyze several videos, one JSON line each
//!   frameforge info <VIDEO>          Show source metadata
//!   frameforge generate <OUT.y4m>    Write a synthetic test clip
//!   frameforge check                 Check decoder availability

use std::ops::Range;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use frameforge_common::config::AppConfig;

mod commands;
mod output;

#[derive(Parser)]
#[command(
    name = "frameforge",
    about = "Detect frame drops, motion stutter, and blur spikes in video files",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (defaults to ~/.config/frameforge/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Settings shared by the commands that run analyses.
#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Abort each run after this many seconds
    #[arg(long)]
    timeout_secs: Option<f64>,

    /// Also write <stem>_annotated.mp4 (requires ffmpeg)
    #[arg(long)]
    annotate: bool,

    /// Directory for annotated videos
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Analyze every Nth frame instead of the adaptive stride
    #[arg(long)]
    stride: Option<u32>,

    /// Maximum parallel runs
    #[arg(long)]
    jobs: Option<usize>,
}

impl RunArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(secs) = self.timeout_secs {
            config.pipeline.timeout_secs = Some(secs);
        }
        if self.annotate {
            config.annotate.enabled = true;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = Some(dir.clone());
        }
        if let Some(stride) = self.stride {
            config.analysis.sampling.stride = Some(stride);
        }
        if let Some(jobs) = self.jobs {
            config.pipeline.max_concurrent_runs = Some(jobs);
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a video and print the report
    Analyze {
        /// Path to the video file
        path: PathBuf,

        /// Pretty-print the report
        #[arg(long)]
        pretty: bool,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Analyze several videos in parallel, one JSON line per input
    Batch {
        /// Paths to the video files
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Show what the decoder knows about a video
    Info {
        /// Path to the video file
        path: PathBuf,
    },

    /// Write a synthetic Y4M clip with injected defects
    Generate {
        /// Output .y4m path
        output: PathBuf,

        #[arg(long, default_value = "320")]
        width: u32,

        #[arg(long, default_value = "180")]
        height: u32,

        #[arg(long, default_value = "30")]
        fps: f64,

        /// Number of frames
        #[arg(long, default_value = "150")]
        frames: u64,

        /// Freeze a frame range, e.g. 60..100 (repeatable)
        #[arg(long, value_parser = parse_range)]
        freeze: Vec<Range<u64>>,

        /// Blur a frame range, e.g. 50..53 (repeatable)
        #[arg(long, value_parser = parse_range)]
        blur: Vec<Range<u64>>,

        /// Gaussian sigma used for --blur ranges
        #[arg(long, default_value = "3.0")]
        blur_sigma: f32,

        /// Render a scene without camera motion
        #[arg(long = "static")]
        still: bool,
    },

    /// Check system capabilities
    Check,
}

fn parse_range(value: &str) -> Result<Range<u64>, String> {
    let (start, end) = value
        .split_once("..")
        .ok_or_else(|| format!("expected START..END, got '{value}'"))?;
    let start: u64 = start
        .trim()
        .parse()
        .map_err(|e| format!("bad range start '{start}': {e}"))?;
    let end: u64 = end
        .trim()
        .parse()
        .map_err(|e| format!("bad range end '{end}': {e}"))?;
    if end <= start {
        return Err(format!("empty range '{value}'"));
    }
    Ok(start..end)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match AppConfig::load_from(path) {
            Ok(config) => config,
            Err(e) => {
                output::print_error(&e);
                return ExitCode::FAILURE;
            }
        },
        None => AppConfig::load(),
    };

    // Initialize logging
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    frameforge_common::logging::init_logging(&config.logging);

    let result = match cli.command {
        Commands::Analyze { path, pretty, run } => {
            run.apply(&mut config);
            commands::analyze::run(path, config, pretty).await
        }
        Commands::Batch { paths, run } => {
            run.apply(&mut config);
            commands::batch::run(paths, config).await
        }
        Commands::Info { path } => commands::info::run(path, &config),
        Commands::Generate {
            output,
            width,
            height,
            fps,
            frames,
            freeze,
            blur,
            blur_sigma,
            still,
        } => commands::generate::run(commands::generate::GenerateArgs {
            output,
            width,
            height,
            fps,
            frames,
            freeze,
            blur,
            blur_sigma,
            static_scene: still,
        }),
        Commands::Check => commands::check::run(),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("60..100"), Ok(60..100));
        assert_eq!(parse_range(" 5 .. 7"), Ok(5..7));
        assert!(parse_range("7..7").is_err());
        assert!(parse_range("60-100").is_err());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args_override_config() {
        let cli = Cli::parse_from([
            "frameforge",
            "analyze",
            "clip.mp4",
            "--annotate",
            "--timeout-secs",
            "12.5",
            "--stride",
            "2",
        ]);
        let Commands::Analyze { run, .. } = cli.command else {
            panic!("expected analyze");
        };
        let mut config = AppConfig::default();
        run.apply(&mut config);
        assert!(config.annotate.enabled);
        assert_eq!(config.pipeline.timeout_secs, Some(12.5));
        assert_eq!(config.analysis.sampling.stride, Some(2));
    }
}
