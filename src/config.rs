//
// config.rs
// T1wPreprocessing-rs
//
// Run configuration: accelerator device mapping, working-directory policy, and an environment snapshot.
//
// Thales Matheus Mendonça Santos - November 2025

use std::env;

use anyhow::{bail, Result};
use clap::ValueEnum;
use tracing::{info, warn};

pub const CUDA_VISIBILITY_VAR: &str = "CUDA_VISIBLE_DEVICES";

/// Accelerator used by the brain extraction model.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Device {
    #[default]
    Cuda,
    Mps,
    Cpu,
}

impl Device {
    /// Extraction tool arguments for this device.
    ///
    /// Test-time augmentation is disabled on CPU because it is prohibitively slow without acceleration.
    pub fn extraction_args(self) -> Vec<&'static str> {
        match self {
            Device::Cuda => vec!["-device", "cuda"],
            Device::Mps => vec!["-device", "mps"],
            Device::Cpu => vec!["-device", "cpu", "--disable_tta"],
        }
    }

    /// Fails when a GPU device is requested but no GPU is visible to the process.
    pub fn check_available(self, environment: &Environment) -> Result<()> {
        match self {
            Device::Cuda => {
                if environment.cuda_visible_devices.as_deref().map_or(true, str::is_empty) {
                    bail!("{} is not set. No GPUs are visible to the process.", CUDA_VISIBILITY_VAR);
                }
            }
            Device::Mps => info!("Using Apple MPS (assuming supported GPU)"),
            Device::Cpu => warn!(
                "CPU mode is many times slower than GPU mode, and results may be suboptimal."
            ),
        }
        Ok(())
    }
}

/// When to copy a working directory into the output dataset.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum KeepWorkdir {
    Never,
    #[default]
    #[value(name = "on_error")]
    OnError,
    Always,
}

impl KeepWorkdir {
    pub fn keep_on_error(self) -> bool {
        !matches!(self, KeepWorkdir::Never)
    }

    pub fn keep_on_success(self) -> bool {
        matches!(self, KeepWorkdir::Always)
    }
}

/// Container runtime recorded in `GeneratedBy`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContainerType {
    Docker,
    Singularity,
    Apptainer,
}

impl ContainerType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContainerType::Docker => "docker",
            ContainerType::Singularity => "singularity",
            ContainerType::Apptainer => "apptainer",
        }
    }
}

/// Build provenance of the running container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub version: String,
    pub code_url: String,
    pub container_type: ContainerType,
    pub container_tag: String,
}

impl Default for Provenance {
    fn default() -> Self {
        Self {
            version: "unknown".to_string(),
            code_url: "unknown".to_string(),
            container_type: ContainerType::Docker,
            container_tag: "unknown".to_string(),
        }
    }
}

/// Process environment captured once at startup and passed explicitly afterwards.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub cuda_visible_devices: Option<String>,
    pub provenance: Provenance,
}

impl Environment {
    pub fn from_process() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let container_type = if lookup("APPTAINER_CONTAINER").is_some() {
            ContainerType::Apptainer
        } else if lookup("SINGULARITY_CONTAINER").is_some() {
            ContainerType::Singularity
        } else {
            ContainerType::Docker
        };
        let or_unknown = |key: &str| lookup(key).unwrap_or_else(|| "unknown".to_string());

        Self {
            cuda_visible_devices: lookup(CUDA_VISIBILITY_VAR),
            provenance: Provenance {
                version: or_unknown("DOCKER_IMAGE_VERSION"),
                code_url: or_unknown("GIT_REMOTE"),
                container_type,
                container_tag: or_unknown("DOCKER_IMAGE_TAG"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn cpu_disables_test_time_augmentation() {
        assert_eq!(Device::Cpu.extraction_args(), ["-device", "cpu", "--disable_tta"]);
        assert_eq!(Device::Cuda.extraction_args(), ["-device", "cuda"]);
        assert_eq!(Device::Mps.extraction_args(), ["-device", "mps"]);
    }

    #[test]
    fn cuda_requires_visible_devices() {
        assert!(Device::Cuda.check_available(&env_of(&[])).is_err());
        assert!(Device::Cuda
            .check_available(&env_of(&[(CUDA_VISIBILITY_VAR, "")]))
            .is_err());
        assert!(Device::Cuda
            .check_available(&env_of(&[(CUDA_VISIBILITY_VAR, "0")]))
            .is_ok());
        assert!(Device::Cpu.check_available(&env_of(&[])).is_ok());
        assert!(Device::Mps.check_available(&env_of(&[])).is_ok());
    }

    #[test]
    fn provenance_prefers_apptainer_then_singularity() {
        let env = env_of(&[
            ("SINGULARITY_CONTAINER", "x"),
            ("APPTAINER_CONTAINER", "y"),
            ("DOCKER_IMAGE_TAG", "cookpa/t1wpreproc:1.2"),
        ]);
        assert_eq!(env.provenance.container_type, ContainerType::Apptainer);
        assert_eq!(env.provenance.container_tag, "cookpa/t1wpreproc:1.2");
        assert_eq!(env.provenance.version, "unknown");

        let env = env_of(&[("SINGULARITY_CONTAINER", "x")]);
        assert_eq!(env.provenance.container_type, ContainerType::Singularity);

        assert_eq!(env_of(&[]).provenance, Provenance::default());
    }

    #[test]
    fn workdir_policy_flags() {
        assert!(!KeepWorkdir::Never.keep_on_error());
        assert!(KeepWorkdir::OnError.keep_on_error());
        assert!(!KeepWorkdir::OnError.keep_on_success());
        assert!(KeepWorkdir::Always.keep_on_success());
    }
}
