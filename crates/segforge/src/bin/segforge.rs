use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use burn::config::Config;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use segforge::{
    backend::{default_device, SelectedBackend, BACKEND_NAME},
    data::{
        Ade20kDatasetConfig, CocoDatasetConfig, FineGrainedAde20kDatasetConfig,
        SegmentationDataset, SegmentationSource, Split,
    },
    inspect::{inspect, InspectReport},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "segforge")]
#[command(about = "Segmentation dataset pipeline for COCO and ADE20K")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a dataset and summarize its first samples
    Inspect {
        /// Dataset format
        #[arg(short, long, value_enum)]
        kind: DatasetKind,

        /// Dataset configuration file (JSON); defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Split to load
        #[arg(short, long, value_enum, default_value_t = SplitArg::Train)]
        split: SplitArg,

        /// Number of samples to load
        #[arg(short = 'n', long, default_value_t = 4)]
        samples: usize,
    },

    /// Write the default configuration of a dataset
    InitConfig {
        /// Dataset format
        #[arg(short, long, value_enum)]
        kind: DatasetKind,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Show backend information
    Info,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DatasetKind {
    /// COCO instance annotations
    Coco,
    /// ADE20K scene-parsing challenge
    Ade20k,
    /// Full ADE20K release with packed class ids
    Ade20kFine,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SplitArg {
    Train,
    Val,
}

impl From<SplitArg> for Split {
    fn from(split: SplitArg) -> Self {
        match split {
            SplitArg::Train => Self::Train,
            SplitArg::Val => Self::Val,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Inspect {
            kind,
            config,
            split,
            samples,
        } => {
            let split = Split::from(split);
            let config = config.as_deref();
            match kind {
                DatasetKind::Coco => {
                    let config = load_config(config, CocoDatasetConfig::new)?;
                    run_inspect(config.init(split)?, samples)
                }
                DatasetKind::Ade20k => {
                    let config = load_config(config, Ade20kDatasetConfig::new)?;
                    run_inspect(config.init(split)?, samples)
                }
                DatasetKind::Ade20kFine => {
                    let config = load_config(config, FineGrainedAde20kDatasetConfig::new)?;
                    run_inspect(config.init(split)?, samples)
                }
            }
        }

        Commands::InitConfig { kind, output } => {
            let saved = match kind {
                DatasetKind::Coco => CocoDatasetConfig::new().save(&output),
                DatasetKind::Ade20k => Ade20kDatasetConfig::new().save(&output),
                DatasetKind::Ade20kFine => FineGrainedAde20kDatasetConfig::new().save(&output),
            };
            saved.with_context(|| format!("Failed to write config to {}", output.display()))?;
            println!("Wrote {kind:?} configuration to {}", output.display());
            Ok(())
        }

        Commands::Info => {
            println!("segforge Information:");
            println!("  Backend: {BACKEND_NAME}");
            println!("  Device: {:?}", default_device());
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config<C: Config>(path: Option<&Path>, default: impl FnOnce() -> C) -> Result<C> {
    match path {
        Some(path) => C::load(path)
            .map_err(|e| anyhow!("Failed to load config {}: {e}", path.display())),
        None => Ok(default()),
    }
}

fn run_inspect<S: SegmentationSource>(
    dataset: SegmentationDataset<S>,
    samples: usize,
) -> Result<()> {
    let report = inspect::<SelectedBackend, _>(&dataset, samples, &default_device())
        .context("Failed to inspect dataset")?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &InspectReport) {
    println!("Samples: {} (inspected {})", report.len, report.inspected);
    println!("Item size: {}x{}", report.size.0, report.size.1);
    println!("Valid pixel ratio: {:.4}", report.valid_ratio);
    if let Some(loss) = report.baseline_loss {
        println!("Focal loss of a 0.5 prediction: {loss:.6}");
    }
    println!("Pixels per class:");
    for (idx, count) in report.class_pixels.iter().enumerate() {
        if *count > 0 {
            println!("  {:>4}: {count}", idx + 1);
        }
    }
}
