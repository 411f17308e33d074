use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::{Builder, TempDir};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::command::CommandRunner;
use crate::config::{KeepWorkdir, Provenance};
use crate::conform;
use crate::dataset;
use crate::layout::{self, OutputPaths, Selection, SessionRef, T1wImage};
use crate::models::{MaskSidecar, T1wSidecar};
use crate::pipeline::{self, ImageOutputs, PipelineOptions};

/// Everything the batch driver needs for one run.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub input_dataset: PathBuf,
    pub output_dataset: PathBuf,
    pub selection: Selection,
    pub pipeline: PipelineOptions,
    pub keep_workdir: KeepWorkdir,
    pub provenance: Provenance,
    pub lock_timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped: usize,
    /// Failed images (input-relative paths) and unresolvable participants/sessions.
    pub failures: Vec<String>,
}

impl BatchSummary {
    pub fn print_report(&self) {
        println!("Total errors: {}", self.failures.len());
        if !self.failures.is_empty() {
            println!("Errors occurred on the following subjects / sessions / images:");
            for failure in &self.failures {
                println!("{}", failure);
            }
        }
    }
}

/// Run the full preprocessing pipeline over the selected images.
///
/// Configuration problems are returned as errors before any image is touched; per-image
/// failures are collected in the summary and never abort the batch.
pub fn run_batch(runner: &dyn CommandRunner, config: &BatchConfig) -> Result<BatchSummary> {
    let input_name = dataset::dataset_name(&config.input_dataset)
        .context("Failed to read input dataset description")?;

    let resolution = layout::resolve_sessions(&config.input_dataset, &config.selection);
    let mut summary = BatchSummary {
        failures: resolution.errors,
        ..BatchSummary::default()
    };

    dataset::update_output_dataset(
        &config.output_dataset,
        &format!("{} T1w Preprocessed", input_name),
        &[config.input_dataset.clone()],
        &config.provenance,
        config.lock_timeout,
    )
    .context("Failed to update output dataset description")?;

    // Removed, with everything under it, when the run ends.
    let base_workdir = Builder::new()
        .suffix("t1wpreproc.tmpdir")
        .tempdir()
        .context("Failed to create base working directory")?;

    for session in &resolution.sessions {
        info!(
            "Processing participant {}, session {}",
            session.participant, session.session
        );
        let session_dir = config.input_dataset.join(session.relative_dir());

        let images = match layout::find_t1w_images(&session_dir) {
            Some(images) if !images.is_empty() => images,
            Some(_) => {
                warn!("No T1w images found for {}", session.label());
                summary.failures.push(session.label());
                continue;
            }
            None => {
                warn!("{} not found in input dataset {:?}", session.label(), config.input_dataset);
                summary.failures.push(session.label());
                continue;
            }
        };

        for image in &images {
            process_one(runner, config, &input_name, session, image, &base_workdir, &mut summary);
        }
    }

    info!(
        "Finished: {} processed, {} skipped, {} errors",
        summary.processed,
        summary.skipped,
        summary.failures.len()
    );
    Ok(summary)
}

fn process_one(
    runner: &dyn CommandRunner,
    config: &BatchConfig,
    input_name: &str,
    session: &SessionRef,
    image: &T1wImage,
    base_workdir: &TempDir,
    summary: &mut BatchSummary,
) {
    let paths = OutputPaths::new(&config.output_dataset, session, &image.entities);
    let input_relative = layout::relative_uri_path(&image.path, &config.input_dataset)
        .unwrap_or_else(|| image.file_name.clone());

    if paths.mask.exists() {
        info!("Mask already exists: {:?}", paths.mask);
        summary.skipped += 1;
        return;
    }

    info!("Processing {}", image.file_name);

    let workdir = match prepare_workdir(&paths, &image.entities, base_workdir) {
        Ok(workdir) => workdir,
        Err(e) => {
            error!("Error processing {}: {:#}", input_relative, e);
            summary.failures.push(input_relative);
            return;
        }
    };

    let outcome = pipeline::process_image(runner, &image.path, workdir.path(), &config.pipeline);

    match outcome {
        Ok(outputs) => {
            let committed = commit_outputs(&outputs, &paths, input_name, &input_relative, config)
                .and_then(|_| {
                    if config.keep_workdir.keep_on_success() {
                        info!("Copying working directory to output");
                        preserve_workdir(workdir.path(), &paths.workdir)?;
                    }
                    Ok(())
                });
            match committed {
                Ok(()) => summary.processed += 1,
                Err(e) => {
                    error!("Error writing outputs for {}: {:#}", input_relative, e);
                    summary.failures.push(input_relative);
                }
            }
        }
        Err(failure) => {
            if failure.error.is_qc_failure() {
                error!("QC failed for {}: {}", input_relative, failure.error);
            } else {
                error!("Error processing {}: {}", input_relative, failure.error);
            }
            summary.failures.push(input_relative);

            if config.keep_workdir.keep_on_error() {
                info!("Copying working directory to output for debugging");
                if let Err(e) = preserve_workdir(workdir.path(), &paths.workdir) {
                    warn!("Could not preserve working directory: {:#}", e);
                }
            }
            match failure.qc_png.filter(|png| png.is_file()) {
                Some(png) => {
                    if let Err(e) = fs::copy(&png, &paths.qc_png) {
                        warn!("Could not copy QC image {:?}: {}", png, e);
                    }
                }
                // A QC image from an earlier attempt would not describe this one.
                None if paths.qc_png.exists() => {
                    if let Err(e) = fs::remove_file(&paths.qc_png) {
                        warn!("Could not remove stale QC image {:?}: {}", paths.qc_png, e);
                    }
                }
                None => {}
            }
        }
    }
}

fn prepare_workdir(paths: &OutputPaths, entities: &str, base_workdir: &TempDir) -> Result<TempDir> {
    fs::create_dir_all(&paths.anat_dir)
        .with_context(|| format!("Failed to create {:?}", paths.anat_dir))?;
    Builder::new()
        .suffix(&format!("_{}.tmpdir", entities))
        .tempdir_in(base_workdir.path())
        .context("Failed to create working directory")
}

fn commit_outputs(
    outputs: &ImageOutputs,
    paths: &OutputPaths,
    input_name: &str,
    input_relative: &str,
    config: &BatchConfig,
) -> Result<()> {
    fs::copy(&outputs.image, &paths.t1w)
        .with_context(|| format!("Failed to copy image to {:?}", paths.t1w))?;

    let input_uri = layout::bids_uri(input_name, input_relative);
    let output_relative = layout::relative_uri_path(&paths.t1w, &config.output_dataset)
        .context("Output image is outside the output dataset")?;

    let t1w_sidecar = T1wSidecar {
        skull_stripped: false,
        sources: vec![input_uri.clone()],
    };
    dataset::write_json(&paths.t1w_sidecar(), &t1w_sidecar, 2)?;

    let mask_sidecar = MaskSidecar {
        mask_type: "Brain".to_string(),
        sources: vec![input_uri, layout::bids_uri("", &output_relative)],
        volume: outputs.volume_ml,
        volume_unit: "ml".to_string(),
    };
    dataset::write_json(&paths.mask_sidecar(), &mask_sidecar, 2)?;

    fs::copy(&outputs.qc.png, &paths.qc_png)
        .with_context(|| format!("Failed to copy QC image to {:?}", paths.qc_png))?;

    // The mask marks the image as done for later runs, so it goes last.
    fs::copy(&outputs.mask, &paths.mask)
        .with_context(|| format!("Failed to copy mask to {:?}", paths.mask))?;
    Ok(())
}

/// Copy a working directory tree to `destination`, replacing any earlier copy.
pub fn preserve_workdir(source: &Path, destination: &Path) -> Result<()> {
    if destination.exists() {
        fs::remove_dir_all(destination)
            .with_context(|| format!("Failed to remove old copy {:?}", destination))?;
    }
    for entry in WalkDir::new(source) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(source)?;
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).with_context(|| format!("Failed to create {:?}", target))?;
        } else {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {:?}", entry.path()))?;
        }
    }
    Ok(())
}

/// Reorient every selected T1w image into one flat directory for directory-mode extraction.
pub fn prepare_batch(
    runner: &dyn CommandRunner,
    input_dataset: &Path,
    output_dir: &Path,
    selection: &Selection,
) -> Result<BatchSummary> {
    let resolution = layout::resolve_sessions(input_dataset, selection);
    let mut summary = BatchSummary {
        failures: resolution.errors,
        ..BatchSummary::default()
    };

    fs::create_dir_all(output_dir).with_context(|| format!("Failed to create {:?}", output_dir))?;

    for session in &resolution.sessions {
        info!(
            "Processing participant {}, session {}",
            session.participant, session.session
        );
        let session_dir = input_dataset.join(session.relative_dir());
        let images = match layout::find_t1w_images(&session_dir) {
            Some(images) if !images.is_empty() => images,
            _ => {
                warn!("No T1w images found for {}", session.label());
                summary.failures.push(session.label());
                continue;
            }
        };

        for image in images {
            let output = output_dir.join(&image.file_name);
            match conform::conform_image(runner, &image.path, &output) {
                Ok(()) => summary.processed += 1,
                Err(e) => {
                    error!("Error processing {:?}: {}", image.path, e);
                    summary.failures.push(image.path.display().to_string());
                }
            }
        }
    }

    Ok(summary)
}
