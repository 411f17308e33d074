//
// main.rs
// T1wPreprocessing-rs
//
// Entry point that hands off execution to the CLI layer. Any configuration error exits with status 1.
//
// Thales Matheus Mendonça Santos - November 2025

use t1w_preprocessing::cli;

fn main() -> anyhow::Result<()> {
    // Delegate all argument parsing and dispatching to the CLI module.
    cli::run()
}
