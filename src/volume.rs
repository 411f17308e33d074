//
// volume.rs
// T1wPreprocessing-rs
//
// Measures mask volume via the toolkit's voxel integral, reported in millilitres.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::Path;

use crate::command::{CommandRunner, ToolCommand, C3D};
use crate::error::PipelineError;

const MM3_PER_ML: f64 = 1000.0;

pub fn voxel_integral_command(mask: &Path) -> ToolCommand {
    ToolCommand::new(C3D).path(mask).arg("-voxel-integral")
}

/// Reads the integral in mm^3 from a report such as `Voxel Integral: 1.14778e+07`.
pub fn parse_voxel_integral(report: &str) -> Option<f64> {
    report.lines().find_map(|line| {
        let (label, value) = line.split_once(':')?;
        if label.trim() != "Voxel Integral" {
            return None;
        }
        value.split_whitespace().next()?.parse().ok()
    })
}

/// Volume of a binary mask in mL.
pub fn mask_volume_ml(runner: &dyn CommandRunner, mask: &Path) -> Result<f64, PipelineError> {
    let report = runner.run(&voxel_integral_command(mask))?;
    let mm3 = parse_voxel_integral(&report.stdout).ok_or_else(|| PipelineError::UnparsableOutput {
        command: report.command.clone(),
        detail: "no voxel integral in output".to_string(),
    })?;
    Ok(mm3 / MM3_PER_ML)
}
