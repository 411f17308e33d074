//
// error.rs
// T1wPreprocessing-rs
//
// Typed failures raised by pipeline stages and by dataset metadata bookkeeping.
//
// Thales Matheus Mendonça Santos - November 2025

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure of one image's pipeline run. Fatal to that image only.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Error running command: {command}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("Failed to launch command: {command}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("Could not parse output of `{command}`: {detail}")]
    UnparsableOutput { command: String, detail: String },
    #[error("QC failure: {}", reasons.join("; "))]
    QcFailed { reasons: Vec<String> },
    #[error("Failed to read or write image {path:?}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("I/O error on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    /// QC failures are logged apart from tool failures.
    pub fn is_qc_failure(&self) -> bool {
        matches!(self, PipelineError::QcFailed { .. })
    }
}

/// Errors from reading or merging BIDS `dataset_description.json` files.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("dataset_description.json not found in dataset path {0:?}")]
    MissingDescription(PathBuf),
    #[error("Dataset name ('Name') not found in {0:?}")]
    MissingName(PathBuf),
    #[error("Dataset link {name} already exists with URI {existing}, but new URI {requested} provided")]
    LinkConflict {
        name: String,
        existing: String,
        requested: String,
    },
    #[error("Timed out after {waited_secs}s waiting for lock {path:?}")]
    LockTimeout { path: PathBuf, waited_secs: u64 },
    #[error("Malformed dataset description {path:?}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("I/O error on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DatasetError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DatasetError::Io {
            path: path.into(),
            source,
        }
    }
}
