//
// layout.rs
// T1wPreprocessing-rs
//
// BIDS layout helpers: participant/session selection, session and T1w discovery, and derivative paths.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::warn;
use walkdir::WalkDir;

pub const T1W_SUFFIX: &str = "_T1w.nii.gz";

/// Which units of the input dataset to process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Participants(Vec<String>),
    Sessions(Vec<SessionRef>),
}

impl Selection {
    /// Exactly one of `participant` or `session` must be given. Either may name a text file
    /// with one entry per line.
    pub fn from_args(participant: Option<&str>, session: Option<&str>) -> Result<Self> {
        match (participant, session) {
            (None, None) => bail!("Either --participant or --session must be specified"),
            (Some(_), Some(_)) => bail!("Only one of --participant or --session can be specified"),
            (Some(participant), None) => Ok(Selection::Participants(
                value_or_lines(participant)?
                    .into_iter()
                    .map(|p| p.trim_start_matches("sub-").to_string())
                    .collect(),
            )),
            (None, Some(session)) => value_or_lines(session)?
                .iter()
                .map(|line| SessionRef::parse(line))
                .collect::<Result<Vec<_>>>()
                .map(Selection::Sessions),
        }
    }
}

fn value_or_lines(value: &str) -> Result<Vec<String>> {
    let path = Path::new(value);
    if !path.is_file() {
        return Ok(vec![value.to_string()]);
    }
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read list file {:?}", path))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// A participant/session pair, labels without the `sub-`/`ses-` prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRef {
    pub participant: String,
    pub session: String,
}

impl SessionRef {
    pub fn new(participant: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            participant: participant.into(),
            session: session.into(),
        }
    }

    /// Parses `participant,session`.
    pub fn parse(value: &str) -> Result<Self> {
        let parts: Vec<&str> = value.split(',').map(str::trim).collect();
        match parts.as_slice() {
            [participant, session] if !participant.is_empty() && !session.is_empty() => Ok(Self::new(
                participant.trim_start_matches("sub-"),
                session.trim_start_matches("ses-"),
            )),
            _ => bail!("Invalid session '{}', expected 'participant,session'", value),
        }
    }

    /// `sub-P/ses-S`
    pub fn label(&self) -> String {
        format!("sub-{}/ses-{}", self.participant, self.session)
    }

    pub fn relative_dir(&self) -> PathBuf {
        Path::new(&format!("sub-{}", self.participant)).join(format!("ses-{}", self.session))
    }
}

/// Sessions to visit plus units that could not be resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub sessions: Vec<SessionRef>,
    pub errors: Vec<String>,
}

/// Expand a selection into concrete sessions. Participants are expanded to every `ses-*`
/// directory, in sorted order.
pub fn resolve_sessions(dataset: &Path, selection: &Selection) -> Resolution {
    let mut resolution = Resolution::default();
    match selection {
        Selection::Sessions(sessions) => resolution.sessions = sessions.clone(),
        Selection::Participants(participants) => {
            for participant in participants {
                let participant_dir = dataset.join(format!("sub-{}", participant));
                if !participant_dir.is_dir() {
                    warn!("Participant {} not found in input dataset {:?}", participant, dataset);
                    resolution.errors.push(format!("sub-{}", participant));
                    continue;
                }
                let sessions = list_sessions(&participant_dir);
                if sessions.is_empty() {
                    warn!("No sessions found for participant {}", participant);
                    resolution.errors.push(format!("sub-{}", participant));
                    continue;
                }
                resolution
                    .sessions
                    .extend(sessions.into_iter().map(|s| SessionRef::new(participant.as_str(), s)));
            }
        }
    }
    resolution
}

fn list_sessions(participant_dir: &Path) -> Vec<String> {
    WalkDir::new(participant_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .filter_map(|e| {
            e.file_name()
                .to_str()
                .and_then(|name| name.strip_prefix("ses-"))
                .map(str::to_string)
        })
        .collect()
}

/// One input T1w image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct T1wImage {
    pub path: PathBuf,
    pub file_name: String,
    /// File name without the `_T1w.nii.gz` suffix, e.g. `sub-01_ses-MR1`.
    pub entities: String,
}

pub fn source_entities(file_name: &str) -> Option<&str> {
    file_name.strip_suffix(T1W_SUFFIX).filter(|e| !e.is_empty())
}

/// T1w images in `<session>/anat`, sorted by name. `None` if there is no `anat` directory.
pub fn find_t1w_images(session_dir: &Path) -> Option<Vec<T1wImage>> {
    let anat = session_dir.join("anat");
    if !anat.is_dir() {
        return None;
    }
    let images = WalkDir::new(&anat)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let file_name = e.file_name().to_str()?.to_string();
            let entities = source_entities(&file_name)?.to_string();
            Some(T1wImage {
                path: e.into_path(),
                file_name,
                entities,
            })
        })
        .collect();
    Some(images)
}

/// Replace a trailing `.nii.gz` with `.json`.
pub fn sidecar_path(image: &Path) -> PathBuf {
    let name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.strip_suffix(".nii.gz").unwrap_or(&name);
    image.with_file_name(format!("{}.json", stem))
}

/// Forward-slash relative path, as used in BIDS URIs.
pub fn relative_uri_path(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Some(parts.join("/"))
}

/// `bids:<dataset>:<relative path>`; an empty dataset name refers to the current dataset.
pub fn bids_uri(dataset_name: &str, relative: &str) -> String {
    format!("bids:{}:{}", dataset_name, relative)
}

/// Derivative file locations for one input image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub anat_dir: PathBuf,
    pub t1w: PathBuf,
    pub mask: PathBuf,
    pub qc_png: PathBuf,
    pub workdir: PathBuf,
}

impl OutputPaths {
    pub fn new(output_dataset: &Path, session: &SessionRef, entities: &str) -> Self {
        let anat_dir = output_dataset.join(session.relative_dir()).join("anat");
        Self {
            t1w: anat_dir.join(format!("{}_desc-preproc_T1w.nii.gz", entities)),
            mask: anat_dir.join(format!("{}_desc-brain_mask.nii.gz", entities)),
            qc_png: anat_dir.join(format!("{}_desc-qcslice_rgb.png", entities)),
            workdir: anat_dir.join(format!("{}_workdir", entities)),
            anat_dir,
        }
    }

    pub fn t1w_sidecar(&self) -> PathBuf {
        sidecar_path(&self.t1w)
    }

    pub fn mask_sidecar(&self) -> PathBuf {
        sidecar_path(&self.mask)
    }
}
