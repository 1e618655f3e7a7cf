use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process;

use clap::Parser;

use video_watermark_locator::config::FallbackPolicy;
use video_watermark_locator::{Error, LocatorConfig, Strategy, TrackingMode, WatermarkLocator};

#[derive(Parser)]
#[command(
    name = "watermark-locate",
    about = "Locate a semi-transparent watermark in a video and print time segments as JSON",
    version,
    after_help = "Prints one JSON value on stdout: the report, or {\"error\": ...} with exit status 1.\n\
                  Logs go to stderr; use -v/-vv or RUST_LOG to see them."
)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Input video file
    video: PathBuf,

    /// TOML configuration file (flags below override its values)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds between sampled frames
    #[arg(short, long)]
    interval: Option<f64>,

    /// Detector strategy: color, overlay, edges, text-regions (repeatable)
    #[arg(short, long = "strategy")]
    strategies: Vec<Strategy>,

    /// Only search the best-scoring frame corner
    #[arg(long)]
    corner_scan: bool,

    /// Keep every persistent region (per-region) or only the best one (single)
    #[arg(short, long)]
    mode: Option<TrackingMode>,

    /// Share of sampled frames a region must appear in (0.0-1.0]
    #[arg(short, long)]
    persistence: Option<f64>,

    /// Emit no segments instead of the fallback band when nothing persists
    #[arg(long)]
    no_fallback: bool,

    /// Pretty-print the JSON report
    #[arg(long)]
    pretty: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all logging
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "off";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }

    fn load_config(&self) -> Result<LocatorConfig, Error> {
        let mut config = match &self.config {
            Some(path) => LocatorConfig::from_toml_file(path)?,
            None => LocatorConfig::default(),
        };

        if let Some(interval) = self.interval {
            config.sample_interval = interval;
        }
        if !self.strategies.is_empty() {
            config.strategies.clone_from(&self.strategies);
        }
        if self.corner_scan {
            config.corners.enabled = true;
        }
        if let Some(mode) = self.mode {
            config.tracking.mode = mode;
        }
        if let Some(persistence) = self.persistence {
            config.tracking.persistence = persistence;
        }
        if self.no_fallback {
            config.fallback = FallbackPolicy::Disabled;
        }
        Ok(config)
    }
}

fn run(cli: &Cli) -> Result<String, Error> {
    let config = cli.load_config()?;
    let locator = WatermarkLocator::new(config)?;
    let report = locator.locate_file(&cli.video)?;
    report.to_json(cli.pretty)
}

/// Flatten a run that may have panicked into the JSON line or an error message.
fn settle(outcome: Result<Result<String, Error>, Box<dyn Any + Send>>) -> Result<String, String> {
    match outcome {
        Ok(Ok(json)) => Ok(json),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            Err(format!("internal error: {detail}"))
        }
    }
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter()))
        .target(env_logger::Target::Stderr)
        .init();

    match settle(panic::catch_unwind(AssertUnwindSafe(|| run(&cli)))) {
        Ok(json) => println!("{json}"),
        Err(message) => {
            log::error!("{message}");
            println!("{}", serde_json::json!({ "error": message }));
            process::exit(1);
        }
    }
}
