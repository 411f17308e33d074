//
// pipeline.rs
// T1wPreprocessing-rs
//
// Per-image stage sequencing: conform, extract, optional neck trim, QC gate, optional origin reset,
// and mask volume.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::{Path, PathBuf};

use tracing::info;

use crate::command::CommandRunner;
use crate::config::Device;
use crate::error::PipelineError;
use crate::qc::{self, QcRecord};
use crate::{conform, extract, origin, trim, volume};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub device: Device,
    pub trim_neck: bool,
    pub reset_origin: bool,
    pub pad_mm: u32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            device: Device::default(),
            trim_neck: false,
            reset_origin: false,
            pad_mm: trim::DEFAULT_PAD_MM,
        }
    }
}

/// Final image/mask pair (in the working directory) ready to be committed.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageOutputs {
    pub image: PathBuf,
    pub mask: PathBuf,
    pub qc: QcRecord,
    pub volume_ml: f64,
}

/// Why an image failed, plus the QC overlay if one was rendered before the failure.
#[derive(Debug)]
pub struct PipelineFailure {
    pub error: PipelineError,
    pub qc_png: Option<PathBuf>,
}

pub fn process_image(
    runner: &dyn CommandRunner,
    input: &Path,
    working_dir: &Path,
    options: &PipelineOptions,
) -> Result<ImageOutputs, PipelineFailure> {
    let mut qc_png = None;
    run_stages(runner, input, working_dir, options, &mut qc_png)
        .map_err(|error| PipelineFailure { error, qc_png })
}

fn run_stages(
    runner: &dyn CommandRunner,
    input: &Path,
    working_dir: &Path,
    options: &PipelineOptions,
    qc_png: &mut Option<PathBuf>,
) -> Result<ImageOutputs, PipelineError> {
    let reoriented = working_dir.join(format!(
        "input_reoriented_{}.nii.gz",
        conform::CANONICAL_ORIENTATION
    ));
    conform::conform_image(runner, input, &reoriented)?;

    let extraction = extract::extract_brain(runner, &reoriented, working_dir, options.device)?;

    // QC always looks at the untrimmed image and the raw extraction mask.
    let (mut image, mut mask, qc) = if options.trim_neck {
        let trimmed = trim::trim_neck(
            runner,
            &extraction.reoriented_image,
            &extraction.mask,
            working_dir,
            options.pad_mm,
        )?;
        let qc = qc::run_qc(
            runner,
            &extraction.reoriented_image,
            &extraction.mask,
            working_dir,
            Some(&trimmed.trim_region),
        )?;
        (trimmed.image, trimmed.mask, qc)
    } else {
        let qc = qc::run_qc(
            runner,
            &extraction.reoriented_image,
            &extraction.mask,
            working_dir,
            None,
        )?;
        (extraction.reoriented_image, extraction.mask, qc)
    };

    *qc_png = Some(qc.png.clone());
    if qc.failure {
        return Err(PipelineError::QcFailed {
            reasons: qc.reasons.clone(),
        });
    }

    if options.reset_origin {
        let reset = origin::reset_origin(runner, &image, &mask, working_dir)?;
        image = reset.image;
        mask = reset.mask;
    }

    // Measured in the final grid in case reslicing changed the voxel count slightly.
    let volume_ml = volume::mask_volume_ml(runner, &mask)?;
    info!("Brain mask volume: {:.1} ml", volume_ml);

    Ok(ImageOutputs {
        image,
        mask,
        qc,
        volume_ml,
    })
}
