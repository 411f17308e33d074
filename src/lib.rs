//
// lib.rs
// T1wPreprocessing-rs
//
// Exposes the crate's modules and re-exports the CLI entry point for both binary and library consumers.
//
// Thales Matheus Mendonça Santos - November 2025

// Public surface of the library: pipeline stages, bookkeeping, and the CLI.
pub mod batch;
pub mod cli;
pub mod command;
pub mod config;
pub mod conform;
pub mod dataset;
pub mod error;
pub mod extract;
pub mod layout;
pub mod lock;
pub mod models;
pub mod origin;
pub mod pipeline;
pub mod qc;
pub mod trim;
pub mod volume;

pub use cli::{run as run_cli, Cli, Commands};
pub use command::{CommandOutput, CommandRunner, SystemRunner, ToolCommand};
pub use error::{DatasetError, PipelineError};
