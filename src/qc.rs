//
// qc.rs
// T1wPreprocessing-rs
//
// Quality control: combines brain and trim-region masks into a label volume, gates on its label
// statistics, and renders a tiled sagittal/coronal overlay PNG for visual review.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use image::{imageops, Rgb, RgbImage};
use tracing::{error, warn};

use crate::command::{CommandRunner, ToolCommand, C3D};
use crate::error::PipelineError;

/// Inside the trim region, outside the brain.
pub const LABEL_TRIM_ONLY: i64 = 1;
/// Brain voxel outside the trim region. Never expected.
pub const LABEL_BRAIN_OUTSIDE_TRIM: i64 = 2;
/// Brain voxel inside the trim region.
pub const LABEL_BRAIN_IN_TRIM: i64 = 3;

/// Overlay colours as `label r g b alpha`. Background is transparent.
pub const COLOR_LUT: &str = "0 0 0 0 0\n1 255 0 0 0.3\n2 128 255 0 0.3\n3 32 32 255 0.3\n";

/// One row of the toolkit's `-lstat` table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelRow {
    pub label: i64,
    pub voxel_count: Option<u64>,
    pub volume_mm3: Option<f64>,
}

/// Parsed label statistics of the combined QC volume.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelStatistics {
    pub rows: Vec<LabelRow>,
}

impl LabelStatistics {
    /// Parses a `-lstat` report: a header line followed by whitespace-separated rows
    /// `LabelID Mean StdD Max Min Count Vol(mm^3) Extent...`.
    ///
    /// Rows whose first column is not an integral label are skipped. Returns `None` if
    /// no row could be read at all.
    pub fn parse(report: &str) -> Option<Self> {
        let rows: Vec<LabelRow> = report.lines().filter_map(parse_row).collect();
        if rows.is_empty() {
            None
        } else {
            Some(Self { rows })
        }
    }

    /// True if the label has at least one voxel.
    pub fn contains(&self, label: i64) -> bool {
        self.rows
            .iter()
            .any(|row| row.label == label && row.voxel_count.map_or(true, |count| count > 0))
    }
}

fn parse_row(line: &str) -> Option<LabelRow> {
    let mut columns = line.split_whitespace();
    let label = parse_label(columns.next()?)?;
    let rest: Vec<&str> = columns.collect();
    // Mean, StdD, Max, Min precede Count and Vol(mm^3).
    let voxel_count = rest.get(4).and_then(|c| c.parse::<u64>().ok());
    let volume_mm3 = rest.get(5).and_then(|v| v.parse::<f64>().ok());
    Some(LabelRow {
        label,
        voxel_count,
        volume_mm3,
    })
}

fn parse_label(token: &str) -> Option<i64> {
    if let Ok(label) = token.parse::<i64>() {
        return Some(label);
    }
    let value = token.parse::<f64>().ok()?;
    (value.fract() == 0.0 && value.is_finite()).then_some(value as i64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QcReason {
    MaskOutsideTrimRegion,
    NoBrainInTrimRegion,
}

impl fmt::Display for QcReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QcReason::MaskOutsideTrimRegion => write!(f, "mask extends outside trimmed region"),
            QcReason::NoBrainInTrimRegion => {
                write!(f, "no brain voxels found inside the trimmed region")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QcVerdict {
    pub reasons: Vec<QcReason>,
}

impl QcVerdict {
    pub fn failure(&self) -> bool {
        !self.reasons.is_empty()
    }
}

/// Label 2 anywhere fails; absence of label 3 fails.
pub fn evaluate(stats: &LabelStatistics) -> QcVerdict {
    let mut reasons = Vec::new();
    if stats.contains(LABEL_BRAIN_OUTSIDE_TRIM) {
        reasons.push(QcReason::MaskOutsideTrimRegion);
    }
    if !stats.contains(LABEL_BRAIN_IN_TRIM) {
        reasons.push(QcReason::NoBrainInTrimRegion);
    }
    QcVerdict { reasons }
}

/// Overlay PNG plus the gate verdict for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QcRecord {
    pub png: PathBuf,
    pub failure: bool,
    pub reasons: Vec<String>,
}

pub fn full_coverage_command(image: &Path, output: &Path) -> ToolCommand {
    ToolCommand::new(C3D)
        .path(image)
        .args(["-thresh", "0", "0", "1", "1", "-o"])
        .path(output)
}

/// `2 * brain + trim_region`: 3 = brain in region, 1 = region only, 2 = brain outside region.
pub fn combine_command(brain_mask: &Path, trim_region: &Path, output: &Path) -> ToolCommand {
    ToolCommand::new(C3D)
        .path(brain_mask)
        .args(["-scale", "2"])
        .path(trim_region)
        .args(["-add", "-o"])
        .path(output)
}

pub fn label_stats_command(combined: &Path) -> ToolCommand {
    ToolCommand::new(C3D).path(combined).args(["-dup", "-lstat"])
}

pub fn render_command(
    image: &Path,
    combined: &Path,
    color_lut: &Path,
    sagittal_png: &Path,
    coronal_png: &Path,
) -> ToolCommand {
    let lut = color_lut.as_os_str();
    ToolCommand::new(C3D)
        .args(["-type", "uchar"])
        .path(image)
        .args(["-stretch", "1%", "99%", "0", "255", "-clip", "0", "255", "-as", "gray"])
        .args(["-slice", "x", "50%", "-popas", "gslice_sag"])
        .args(["-push", "gray", "-slice", "y", "50%", "-popas", "gslice_cor"])
        .path(combined)
        .args(["-as", "mask", "-slice", "x", "50%", "-popas", "mslice_sag"])
        .args(["-push", "mask", "-slice", "y", "50%", "-popas", "mslice_cor"])
        .args(["-clear", "-push", "gslice_sag", "-push", "mslice_sag"])
        .args(["-foreach", "-flip", "xy", "-endfor", "-oli"])
        .arg(lut)
        .args(["1", "-omc"])
        .path(sagittal_png)
        .args(["-clear", "-push", "gslice_cor", "-push", "mslice_cor"])
        .args(["-foreach", "-flip", "xy", "-endfor", "-oli"])
        .arg(lut)
        .args(["1", "-omc"])
        .path(coronal_png)
}

/// Place images left to right, bottom-aligned, padding shorter ones with black above.
pub fn tile(images: &[RgbImage]) -> RgbImage {
    let height = images.iter().map(RgbImage::height).max().unwrap_or(0);
    let width = images.iter().map(RgbImage::width).sum();
    let mut canvas = RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));

    let mut x = 0i64;
    for img in images {
        let y = i64::from(height - img.height());
        imageops::replace(&mut canvas, img, x, y);
        x += i64::from(img.width());
    }
    canvas
}

pub fn tile_images(inputs: &[&Path], output: &Path) -> Result<(), PipelineError> {
    let images = inputs
        .iter()
        .map(|path| {
            image::open(path)
                .map(|img| img.to_rgb8())
                .map_err(|source| PipelineError::Image {
                    path: path.to_path_buf(),
                    source,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    tile(&images)
        .save(output)
        .map_err(|source| PipelineError::Image {
            path: output.to_path_buf(),
            source,
        })
}

/// Gate and render QC for one image, in untrimmed space.
///
/// Without a trim region the whole image counts as the trimmed region. The PNG is
/// rendered even when the gate fails.
pub fn run_qc(
    runner: &dyn CommandRunner,
    full_coverage_image: &Path,
    brain_mask: &Path,
    working_dir: &Path,
    trim_region: Option<&Path>,
) -> Result<QcRecord, PipelineError> {
    let trim_region = match trim_region {
        Some(region) => region.to_path_buf(),
        None => {
            let region = working_dir.join("full_coverage_mask.nii.gz");
            runner.run(&full_coverage_command(full_coverage_image, &region))?;
            region
        }
    };

    let combined = working_dir.join("combined_mask.nii.gz");
    runner.run(&combine_command(brain_mask, &trim_region, &combined))?;

    let report = runner.run(&label_stats_command(&combined))?;
    let stats = LabelStatistics::parse(&report.stdout).ok_or_else(|| {
        PipelineError::UnparsableOutput {
            command: report.command.clone(),
            detail: "no label rows in label statistics".to_string(),
        }
    })?;

    let verdict = evaluate(&stats);
    for reason in &verdict.reasons {
        match reason {
            QcReason::MaskOutsideTrimRegion => {
                error!("Neck trimming error: brain mask extends outside trimmed region")
            }
            QcReason::NoBrainInTrimRegion => {
                error!("Brain masking error: no brain voxels inside trimmed T1w space")
            }
        }
    }

    let color_lut = working_dir.join("color_lut.txt");
    fs::write(&color_lut, COLOR_LUT).map_err(|e| PipelineError::io(&color_lut, e))?;

    let sagittal = working_dir.join("qc_sag_slice.png");
    let coronal = working_dir.join("qc_cor_slice.png");
    let png = working_dir.join("qc_rgb_slices.png");

    runner.run(&render_command(
        full_coverage_image,
        &combined,
        &color_lut,
        &sagittal,
        &coronal,
    ))?;
    tile_images(&[&sagittal, &coronal], &png)?;

    if verdict.failure() {
        warn!("QC failed for {:?}", full_coverage_image);
    }

    Ok(QcRecord {
        png,
        failure: verdict.failure(),
        reasons: verdict.reasons.iter().map(ToString::to_string).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "LabelID        Mean        StdD         Max         Min       Count     Vol(mm^3)        Extent(Vox)\n";

    fn report(rows: &[&str]) -> String {
        let mut out = HEADER.to_string();
        for row in rows {
            out.push_str(row);
            out.push('\n');
        }
        out
    }

    #[test]
    fn parses_lstat_table() {
        let stats = LabelStatistics::parse(&report(&[
            "    0     0.00000     0.00000     0.00000     0.00000     8000000    8000000.000   256 256 170",
            "    1     1.00000     0.00000     1.00000     1.00000      500000     500000.000   200 200 150",
            "    3     3.00000     0.00000     3.00000     3.00000     1200000    1200000.000   140 170 130",
        ]))
        .expect("stats");
        assert_eq!(stats.rows.len(), 3);
        assert_eq!(stats.rows[2].label, 3);
        assert_eq!(stats.rows[2].voxel_count, Some(1_200_000));
        assert_eq!(stats.rows[2].volume_mm3, Some(1_200_000.0));
        assert!(stats.contains(1));
        assert!(!stats.contains(2));
    }

    #[test]
    fn label_prefix_is_not_mistaken_for_label() {
        // A label of 20 or 31 must not count as 2 or 3.
        let stats = LabelStatistics::parse(&report(&[
            "   20  1 0 1 1 10 10.0 1 1 1",
            "   31  1 0 1 1 10 10.0 1 1 1",
        ]))
        .expect("stats");
        assert!(!stats.contains(LABEL_BRAIN_OUTSIDE_TRIM));
        assert!(!stats.contains(LABEL_BRAIN_IN_TRIM));
    }

    #[test]
    fn zero_count_rows_are_absent() {
        let stats =
            LabelStatistics::parse(&report(&["    2  2 0 2 2 0 0.0 0 0 0"])).expect("stats");
        assert!(!stats.contains(2));
    }

    #[test]
    fn unparsable_report_is_none() {
        assert!(LabelStatistics::parse(HEADER).is_none());
        assert!(LabelStatistics::parse("").is_none());
    }

    #[test]
    fn label_two_fails_as_outside_trim_region() {
        let stats = LabelStatistics::parse(&report(&[
            "0 0 0 0 0 10 10.0 1 1 1",
            "1 1 0 1 1 10 10.0 1 1 1",
            "2 2 0 2 2 3 3.0 1 1 1",
            "3 3 0 3 3 10 10.0 1 1 1",
        ]))
        .expect("stats");
        let verdict = evaluate(&stats);
        assert!(verdict.failure());
        assert_eq!(verdict.reasons, vec![QcReason::MaskOutsideTrimRegion]);
        assert_eq!(
            verdict.reasons[0].to_string(),
            "mask extends outside trimmed region"
        );
    }

    #[test]
    fn trim_only_volume_fails_with_no_brain() {
        let stats = LabelStatistics::parse(&report(&["0 0 0 0 0 10 10.0 1 1 1", "1 1 0 1 1 10 10.0 1 1 1"]))
            .expect("stats");
        let verdict = evaluate(&stats);
        assert!(verdict.failure());
        assert_eq!(verdict.reasons, vec![QcReason::NoBrainInTrimRegion]);
    }

    #[test]
    fn brain_inside_region_passes() {
        let stats = LabelStatistics::parse(&report(&["1 1 0 1 1 10 10.0 1 1 1", "3 3 0 3 3 10 10.0 1 1 1"]))
            .expect("stats");
        assert!(!evaluate(&stats).failure());
    }

    #[test]
    fn tiling_pads_shorter_image_with_black() {
        let tall = RgbImage::from_pixel(4, 6, Rgb([200, 10, 10]));
        let short = RgbImage::from_pixel(3, 2, Rgb([10, 200, 10]));
        let tiled = tile(&[tall, short]);

        assert_eq!(tiled.width(), 7);
        assert_eq!(tiled.height(), 6);
        assert_eq!(*tiled.get_pixel(0, 0), Rgb([200, 10, 10]));
        // Gap above the short image stays black; it sits on the bottom edge.
        assert_eq!(*tiled.get_pixel(5, 0), Rgb([0, 0, 0]));
        assert_eq!(*tiled.get_pixel(5, 3), Rgb([0, 0, 0]));
        assert_eq!(*tiled.get_pixel(5, 4), Rgb([10, 200, 10]));
        assert_eq!(*tiled.get_pixel(6, 5), Rgb([10, 200, 10]));
    }

    #[test]
    fn tile_images_round_trips_through_png() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        let out = dir.path().join("out.png");
        RgbImage::from_pixel(2, 5, Rgb([1, 2, 3])).save(&a).expect("save a");
        RgbImage::from_pixel(6, 3, Rgb([4, 5, 6])).save(&b).expect("save b");

        tile_images(&[&a, &b], &out).expect("tile");
        let tiled = image::open(&out).expect("open").to_rgb8();
        assert_eq!(tiled.dimensions(), (8, 5));
    }

    #[test]
    fn render_command_writes_both_slices() {
        let cmd = render_command(
            Path::new("t1.nii.gz"),
            Path::new("combined.nii.gz"),
            Path::new("lut.txt"),
            Path::new("sag.png"),
            Path::new("cor.png"),
        );
        assert_eq!(cmd.values_after("-omc"), vec!["sag.png", "cor.png"]);
        assert_eq!(cmd.values_after("-oli"), vec!["lut.txt", "lut.txt"]);
    }
}
