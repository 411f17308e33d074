//
// cli.rs
// T1wPreprocessing-rs
//
// Defines the CLI surface with Clap and dispatches user-selected commands to the corresponding modules.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::batch::{self, BatchConfig};
use crate::command::SystemRunner;
use crate::config::{Device, Environment, KeepWorkdir};
use crate::extract;
use crate::layout::Selection;
use crate::lock::DEFAULT_LOCK_TIMEOUT;
use crate::pipeline::PipelineOptions;
use crate::trim::DEFAULT_PAD_MM;

/// Command-line interface glue code: defines the available verbs and dispatches to modules.
#[derive(Parser)]
#[command(name = "t1w-preprocessing")]
#[command(
    about = "Brain extraction with HD-BET and optional neck trimming for BIDS T1w images",
    long_about = None
)]
pub struct Cli {
    /// Verbose output, including the output of every external tool
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Participant or session selection; exactly one is required.
#[derive(Args, Debug, Clone)]
pub struct SelectionArgs {
    /// Participant to process, or a text file containing a list of participants
    #[arg(long, alias = "participant-list")]
    pub participant: Option<String>,
    /// Session to process as 'participant,session', or a text file with one such pair per line
    #[arg(long, alias = "session-list")]
    pub session: Option<String>,
}

impl SelectionArgs {
    fn resolve(&self) -> Result<Selection> {
        Selection::from_args(self.participant.as_deref(), self.session.as_deref())
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reorient, brain-extract, optionally neck-trim, QC and write a BIDS derivative dataset
    Run {
        /// Input BIDS dataset dir, containing the source images
        #[arg(long)]
        input_dataset: PathBuf,
        /// Output BIDS dataset dir
        #[arg(long)]
        output_dataset: PathBuf,
        #[command(flatten)]
        selection: SelectionArgs,
        /// Accelerator for brain extraction. CPU mode is many times slower and may not be as robust
        #[arg(long, value_enum, default_value_t = Device::Cuda, ignore_case = true)]
        device: Device,
        /// Reset image and mask origin to mask centroid
        #[arg(long)]
        reset_origin: bool,
        /// Trim neck from image
        #[arg(long)]
        trim_neck: bool,
        /// Padding in mm added on each side after neck trimming
        #[arg(long, default_value_t = DEFAULT_PAD_MM)]
        pad_mm: u32,
        /// Copy working directory to output, for debugging purposes
        #[arg(long, value_enum, default_value_t = KeepWorkdir::OnError, ignore_case = true)]
        keep_workdir: KeepWorkdir,
    },
    /// Reorient selected T1w images into one directory, for directory-mode extraction
    Prepare {
        /// Input BIDS dataset dir, containing the source images
        #[arg(long)]
        input_dataset: PathBuf,
        /// Output directory containing all reoriented images
        #[arg(long)]
        output_directory: PathBuf,
        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Run HD-BET once over a directory of prepared images; masks are written alongside
    Hdbet {
        /// Directory of prepared images
        #[arg(long)]
        input_directory: PathBuf,
        #[arg(long, value_enum, default_value_t = Device::Cuda, ignore_case = true)]
        device: Device,
    },
}

pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A second initialisation (e.g. from tests) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

pub fn run() -> Result<()> {
    // Parse the raw CLI arguments once and dispatch to a subcommand handler.
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let environment = Environment::from_process();
    let runner = SystemRunner::new(cli.verbose);

    match cli.command {
        Commands::Run {
            input_dataset,
            output_dataset,
            selection,
            device,
            reset_origin,
            trim_neck,
            pad_mm,
            keep_workdir,
        } => {
            device.check_available(&environment)?;
            let config = BatchConfig {
                selection: selection.resolve()?,
                pipeline: PipelineOptions {
                    device,
                    trim_neck,
                    reset_origin,
                    pad_mm,
                },
                keep_workdir,
                provenance: environment.provenance.clone(),
                lock_timeout: DEFAULT_LOCK_TIMEOUT,
                input_dataset,
                output_dataset,
            };
            let summary = batch::run_batch(&runner, &config)?;
            println!(
                "Input dataset: {}\nOutput dataset: {}",
                config.input_dataset.display(),
                config.output_dataset.display()
            );
            summary.print_report();
        }
        Commands::Prepare {
            input_dataset,
            output_directory,
            selection,
        } => {
            let selection = selection.resolve()?;
            let summary = batch::prepare_batch(&runner, &input_dataset, &output_directory, &selection)?;
            summary.print_report();
        }
        Commands::Hdbet {
            input_directory,
            device,
        } => {
            device.check_available(&environment)?;
            let start = Instant::now();
            match extract::extract_directory(&runner, &input_directory, device, cli.verbose) {
                Ok(true) => info!(
                    "HD-BET processing completed in {:.0} seconds",
                    start.elapsed().as_secs_f64()
                ),
                Ok(false) => {}
                Err(e) => {
                    error!("{}", e);
                    bail!("HD-BET processing failed.");
                }
            }
        }
    }

    Ok(())
}
