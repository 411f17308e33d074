//
// trim.rs
// T1wPreprocessing-rs
//
// Neck trimming, symmetric padding, and nearest-neighbour reslicing of the brain mask into the trimmed grid.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::{Path, PathBuf};

use crate::command::{CommandRunner, ToolCommand, C3D, TRIM_NECK};
use crate::error::PipelineError;

pub const DEFAULT_PAD_MM: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimmedVolumes {
    /// Trimmed and padded image.
    pub image: PathBuf,
    /// Brain mask resliced into the padded grid, 8-bit.
    pub mask: PathBuf,
    /// Original-space mask: 1 where voxels were kept, 0 where trimmed away. QC only.
    pub trim_region: PathBuf,
}

pub fn trim_command(input_image: &Path, working_dir: &Path, trim_region: &Path, output: &Path) -> ToolCommand {
    ToolCommand::new(TRIM_NECK)
        .args(["-d", "-c", "20", "-w"])
        .path(working_dir)
        .arg("-m")
        .path(trim_region)
        .path(input_image)
        .path(output)
}

/// Pads `trimmed` in place and reslices `mask` into its geometry.
pub fn pad_and_reslice_command(trimmed: &Path, mask: &Path, mask_out: &Path, pad_mm: u32) -> ToolCommand {
    let pad = format!("{pad_mm}x{pad_mm}x{pad_mm}mm");
    ToolCommand::new(C3D)
        .path(trimmed)
        .arg("-pad")
        .arg(&pad)
        .arg(&pad)
        .arg("0")
        .arg("-o")
        .path(trimmed)
        // Mask is categorical: linear interpolation would invent fractional labels.
        .args(["-interpolation", "NearestNeighbor"])
        .path(mask)
        .args(["-reslice-identity", "-type", "uchar", "-o"])
        .path(mask_out)
}

pub fn trim_neck(
    runner: &dyn CommandRunner,
    input_image: &Path,
    input_mask: &Path,
    working_dir: &Path,
    pad_mm: u32,
) -> Result<TrimmedVolumes, PipelineError> {
    let image = working_dir.join("T1wNeckTrim.nii.gz");
    let mask = working_dir.join("T1wNeckTrim_mask.nii.gz");
    let trim_region = working_dir.join("T1wNeckTrim_region.nii.gz");

    runner.run(&trim_command(input_image, working_dir, &trim_region, &image))?;
    runner.run(&pad_and_reslice_command(&image, input_mask, &mask, pad_mm))?;

    Ok(TrimmedVolumes {
        image,
        mask,
        trim_region,
    })
}
