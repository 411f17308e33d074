//
// conform.rs
// T1wPreprocessing-rs
//
// Reorients input volumes to the axis ordering expected by the brain extraction model.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::Path;

use crate::command::{CommandRunner, ToolCommand, C3D};
use crate::error::PipelineError;

/// Canonical orientation for extraction input. HD-BET is indifferent to LPI vs RPI.
pub const CANONICAL_ORIENTATION: &str = "LPI";

pub fn reorient_command(input: &Path, output: &Path, orientation: &str) -> ToolCommand {
    ToolCommand::new(C3D)
        .path(input)
        .args(["-swapdim", orientation, "-o"])
        .path(output)
}

/// Reorient `input` to `orientation` and write it to `output`.
pub fn reorient(
    runner: &dyn CommandRunner,
    input: &Path,
    output: &Path,
    orientation: &str,
) -> Result<(), PipelineError> {
    runner.run(&reorient_command(input, output, orientation))?;
    Ok(())
}

pub fn conform_image(
    runner: &dyn CommandRunner,
    input: &Path,
    output: &Path,
) -> Result<(), PipelineError> {
    reorient(runner, input, output, CANONICAL_ORIENTATION)
}
