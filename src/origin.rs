//
// origin.rs
// T1wPreprocessing-rs
//
// Moves image and mask origins to the mask centroid so repeat sessions share a consistent origin.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::{Path, PathBuf};

use crate::command::{CommandRunner, ToolCommand, C3D};
use crate::error::PipelineError;

const CENTROID_TAG: &str = "CENTROID_VOX";

/// Voxel-space centroid reported by `c3d -centroid`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Centroid(pub [f64; 3]);

impl Centroid {
    /// Parses the `CENTROID_VOX [x, y, z]` line from the toolkit report.
    pub fn parse(report: &str) -> Option<Self> {
        report.lines().find_map(|line| {
            let rest = line.trim().strip_prefix(CENTROID_TAG)?.trim();
            let inner = rest.strip_prefix('[')?.split(']').next()?;
            let mut coords = inner.split(',').map(|c| c.trim().parse::<f64>());
            let x = coords.next()?.ok()?;
            let y = coords.next()?.ok()?;
            let z = coords.next()?.ok()?;
            if coords.next().is_some() {
                return None;
            }
            Some(Centroid([x, y, z]))
        })
    }

    /// Voxel offset argument for `-origin-voxel`, e.g. `12.3x45.6x7.8vox`.
    pub fn voxel_offset(&self) -> String {
        let [x, y, z] = self.0;
        format!("{}x{}x{}vox", x, y, z)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginReset {
    pub image: PathBuf,
    pub mask: PathBuf,
}

pub fn centroid_command(mask: &Path) -> ToolCommand {
    ToolCommand::new(C3D).path(mask).arg("-centroid")
}

pub fn set_origin_command(
    image: &Path,
    mask: &Path,
    origin: &str,
    image_out: &Path,
    mask_out: &Path,
) -> ToolCommand {
    ToolCommand::new(C3D)
        .path(image)
        .args(["-origin-voxel", origin, "-o"])
        .path(image_out)
        .path(mask)
        .args(["-origin-voxel", origin, "-type", "uchar", "-o"])
        .path(mask_out)
}

pub fn reset_origin(
    runner: &dyn CommandRunner,
    image: &Path,
    mask: &Path,
    working_dir: &Path,
) -> Result<OriginReset, PipelineError> {
    let image_out = working_dir.join("inputOriginReset.nii.gz");
    let mask_out = working_dir.join("inputOriginReset_mask.nii.gz");

    let report = runner.run(&centroid_command(mask))?;
    let centroid = Centroid::parse(&report.stdout).ok_or_else(|| PipelineError::UnparsableOutput {
        command: report.command.clone(),
        detail: format!("could not get centroid from mask {:?}", mask),
    })?;

    runner.run(&set_origin_command(
        image,
        mask,
        &centroid.voxel_offset(),
        &image_out,
        &mask_out,
    ))?;

    Ok(OriginReset {
        image: image_out,
        mask: mask_out,
    })
}
