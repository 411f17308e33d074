//
// extract.rs
// T1wPreprocessing-rs
//
// Adapter around the HD-BET brain extraction model, for single images and for whole directories.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::command::{CommandRunner, ToolCommand, HD_BET};
use crate::config::Device;
use crate::error::PipelineError;

// Never written because of --no_bet_image; HD-BET derives the mask name from it.
const OUTPUT_BASENAME: &str = "hdBetOutput";

/// Image and mask in the same (reoriented, untrimmed) space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub reoriented_image: PathBuf,
    pub mask: PathBuf,
}

fn base_command(input: &Path, output: &Path) -> ToolCommand {
    ToolCommand::new(HD_BET)
        .arg("-i")
        .path(input)
        .arg("-o")
        .path(output)
        .args(["--no_bet_image", "--save_bet_mask"])
}

pub fn extraction_command(reoriented_image: &Path, working_dir: &Path, device: Device) -> ToolCommand {
    let output = working_dir.join(format!("{}.nii.gz", OUTPUT_BASENAME));
    base_command(reoriented_image, &output)
        .arg("--verbose")
        .args(device.extraction_args())
}

/// Run extraction on one conformed image. Only the binary mask is saved.
pub fn extract_brain(
    runner: &dyn CommandRunner,
    reoriented_image: &Path,
    working_dir: &Path,
    device: Device,
) -> Result<Extraction, PipelineError> {
    runner.run(&extraction_command(reoriented_image, working_dir, device))?;

    Ok(Extraction {
        reoriented_image: reoriented_image.to_path_buf(),
        mask: working_dir.join(format!("{}_bet.nii.gz", OUTPUT_BASENAME)),
    })
}

pub fn directory_command(directory: &Path, device: Device, verbose: bool) -> ToolCommand {
    let cmd = base_command(directory, directory).args(device.extraction_args());
    if verbose {
        cmd.arg("--verbose")
    } else {
        cmd
    }
}

/// Run extraction once over every image in `directory`, writing `*_bet.nii.gz` masks alongside.
///
/// Returns `false` without invoking the tool when there is nothing to process.
pub fn extract_directory(
    runner: &dyn CommandRunner,
    directory: &Path,
    device: Device,
    verbose: bool,
) -> Result<bool, PipelineError> {
    let entries = fs::read_dir(directory).map_err(|e| PipelineError::io(directory, e))?;
    let has_images = entries
        .filter_map(|e| e.ok())
        .any(|e| e.file_name().to_string_lossy().ends_with(".nii.gz"));

    if !has_images {
        info!("No NIfTI files found in input directory {:?}", directory);
        return Ok(false);
    }

    runner.run(&directory_command(directory, device, verbose))?;
    Ok(true)
}
