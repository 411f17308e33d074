//
// dataset.rs
// T1wPreprocessing-rs
//
// Creates and merges the output dataset's dataset_description.json under a soft file lock, and writes
// JSON sidecars with sorted keys.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tracing::{debug, info};

use crate::config::Provenance;
use crate::error::DatasetError;
use crate::lock::SoftFileLock;
use crate::models::{Container, DatasetDescription, GeneratedBy};

pub const DESCRIPTION_FILE: &str = "dataset_description.json";
pub const LOCK_FILE: &str = "t1wpreprocessing_dataset_metadata.lock";
pub const PIPELINE_NAME: &str = "T1wPreprocessing";
pub const BIDS_VERSION: &str = "1.10.1";

/// A named `file://` link to another dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLink {
    pub name: String,
    pub uri: String,
}

pub fn read_description(dataset_dir: &Path) -> Result<DatasetDescription, DatasetError> {
    let path = dataset_dir.join(DESCRIPTION_FILE);
    if !path.is_file() {
        return Err(DatasetError::MissingDescription(dataset_dir.to_path_buf()));
    }
    let text = fs::read_to_string(&path).map_err(|e| DatasetError::io(&path, e))?;
    serde_json::from_str(&text).map_err(|source| DatasetError::Malformed { path, source })
}

/// `Name` from a dataset's description.
pub fn dataset_name(dataset_dir: &Path) -> Result<String, DatasetError> {
    read_description(dataset_dir)?
        .name
        .ok_or_else(|| DatasetError::MissingName(dataset_dir.join(DESCRIPTION_FILE)))
}

pub fn dataset_link(dataset_dir: &Path) -> Result<DatasetLink, DatasetError> {
    let name = dataset_name(dataset_dir)?;
    let absolute = fs::canonicalize(dataset_dir).map_err(|e| DatasetError::io(dataset_dir, e))?;
    Ok(DatasetLink {
        name,
        uri: format!("file://{}", absolute.display()),
    })
}

pub fn generated_by_entry(provenance: &Provenance) -> GeneratedBy {
    GeneratedBy {
        name: PIPELINE_NAME.to_string(),
        version: Some(provenance.version.clone()),
        code_url: Some(provenance.code_url.clone()),
        container: Some(Container {
            container_type: provenance.container_type.as_str().to_string(),
            tag: Some(provenance.container_tag.clone()),
            extra: BTreeMap::new(),
        }),
        extra: BTreeMap::new(),
    }
}

/// Appends this pipeline's record unless one with the same container tag is already present.
/// Returns whether anything was appended.
pub fn merge_generated_by(generated_by: &mut Vec<GeneratedBy>, provenance: &Provenance) -> bool {
    let already_present = generated_by.iter().any(|entry| {
        entry.name == PIPELINE_NAME
            && entry.container.as_ref().and_then(|c| c.tag.as_deref())
                == Some(provenance.container_tag.as_str())
    });
    if already_present {
        return false;
    }
    generated_by.push(generated_by_entry(provenance));
    true
}

/// Adds links by name. Same name with the same URI is a no-op; a different URI is an error.
/// Returns whether anything was added.
pub fn merge_dataset_links(
    links: &mut BTreeMap<String, String>,
    new_links: &[DatasetLink],
) -> Result<bool, DatasetError> {
    let mut added = false;
    for link in new_links {
        match links.get(&link.name) {
            Some(existing) if existing != &link.uri => {
                return Err(DatasetError::LinkConflict {
                    name: link.name.clone(),
                    existing: existing.clone(),
                    requested: link.uri.clone(),
                });
            }
            Some(_) => {}
            None => {
                links.insert(link.name.clone(), link.uri.clone());
                added = true;
            }
        }
    }
    Ok(added)
}

/// Serialize with sorted keys and the given indent width.
pub fn write_json<T: Serialize>(path: &Path, value: &T, indent: usize) -> Result<(), DatasetError> {
    // Going through `Value` sorts object keys.
    let value = serde_json::to_value(value).map_err(|source| DatasetError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;
    let indent = " ".repeat(indent);
    let mut buffer = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(indent.as_bytes()));
    value
        .serialize(&mut serializer)
        .map_err(|source| DatasetError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
    fs::write(path, buffer).map_err(|e| DatasetError::io(path, e))
}

/// Create or update the output dataset's description.
///
/// The file is only rewritten when this pipeline's `GeneratedBy` record or a dataset link was
/// actually added, so repeated runs leave it byte-identical.
pub fn update_output_dataset(
    output_dir: &Path,
    output_name: &str,
    link_paths: &[PathBuf],
    provenance: &Provenance,
    lock_timeout: Duration,
) -> Result<(), DatasetError> {
    fs::create_dir_all(output_dir).map_err(|e| DatasetError::io(output_dir, e))?;

    let new_links = link_paths
        .iter()
        .map(|p| dataset_link(p))
        .collect::<Result<Vec<_>, _>>()?;

    let _lock = SoftFileLock::acquire(output_dir.join(LOCK_FILE), lock_timeout)?;
    let description_path = output_dir.join(DESCRIPTION_FILE);

    if !description_path.exists() {
        let mut links = BTreeMap::new();
        merge_dataset_links(&mut links, &new_links)?;
        let description = DatasetDescription {
            name: Some(output_name.to_string()),
            bids_version: Some(BIDS_VERSION.to_string()),
            dataset_type: Some("derivative".to_string()),
            generated_by: Some(vec![generated_by_entry(provenance)]),
            dataset_links: (!new_links.is_empty()).then_some(links),
            extra: BTreeMap::new(),
        };
        info!("Creating output dataset description {:?}", description_path);
        return write_json(&description_path, &description, 4);
    }

    let mut description = read_description(output_dir)?;
    if description.name.is_none() {
        return Err(DatasetError::MissingName(description_path));
    }

    let generated_by = description.generated_by.get_or_insert_with(Vec::new);
    let mut modified = merge_generated_by(generated_by, provenance);

    if !new_links.is_empty() {
        let links = description.dataset_links.get_or_insert_with(BTreeMap::new);
        modified |= merge_dataset_links(links, &new_links)?;
    }

    if modified {
        info!("Updating output dataset description {:?}", description_path);
        write_json(&description_path, &description, 4)?;
    } else {
        debug!("Output dataset description is up to date");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContainerType;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    fn provenance(tag: &str) -> Provenance {
        Provenance {
            version: "0.4.0".into(),
            code_url: "https://example.org/t1wpreproc".into(),
            container_type: ContainerType::Docker,
            container_tag: tag.into(),
        }
    }

    fn make_input_dataset(root: &Path, name: &str) -> PathBuf {
        let dir = root.join(name.replace(' ', "_"));
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(
            dir.join(DESCRIPTION_FILE),
            json!({"Name": name, "BIDSVersion": "1.8.0"}).to_string(),
        )
        .expect("write description");
        dir
    }

    #[test]
    fn generated_by_appends_at_most_once_per_tag() {
        let mut entries = Vec::new();
        assert!(merge_generated_by(&mut entries, &provenance("img:1")));
        assert!(!merge_generated_by(&mut entries, &provenance("img:1")));
        assert_eq!(entries.len(), 1);
        assert!(merge_generated_by(&mut entries, &provenance("img:2")));
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn other_pipelines_with_same_tag_do_not_suppress_append() {
        let mut entries = vec![GeneratedBy {
            name: "SomethingElse".into(),
            version: None,
            code_url: None,
            container: Some(Container {
                container_type: "docker".into(),
                tag: Some("img:1".into()),
                extra: BTreeMap::new(),
            }),
            extra: BTreeMap::new(),
        }];
        assert!(merge_generated_by(&mut entries, &provenance("img:1")));
    }

    #[test]
    fn dataset_links_merge_rules() {
        let mut links = BTreeMap::new();
        let link = DatasetLink {
            name: "raw".into(),
            uri: "file:///data/raw".into(),
        };
        assert!(merge_dataset_links(&mut links, &[link.clone()]).expect("first"));
        assert!(!merge_dataset_links(&mut links, &[link]).expect("repeat is no-op"));

        let conflicting = DatasetLink {
            name: "raw".into(),
            uri: "file:///elsewhere/raw".into(),
        };
        let err = merge_dataset_links(&mut links, &[conflicting]).unwrap_err();
        assert!(matches!(err, DatasetError::LinkConflict { .. }));
        assert_eq!(links["raw"], "file:///data/raw");
    }

    #[test]
    fn creates_then_leaves_description_byte_identical() {
        let root = tempdir().expect("tmpdir");
        let input = make_input_dataset(root.path(), "My Study");
        let output = root.path().join("derivatives");

        update_output_dataset(&output, "My Study T1w Preprocessed", &[input.clone()], &provenance("img:1"), Duration::from_secs(1))
            .expect("create");
        let first = fs::read(output.join(DESCRIPTION_FILE)).expect("read");

        let value: Value = serde_json::from_slice(&first).expect("json");
        assert_eq!(value["Name"], "My Study T1w Preprocessed");
        assert_eq!(value["DatasetType"], "derivative");
        assert_eq!(value["BIDSVersion"], BIDS_VERSION);
        assert_eq!(value["GeneratedBy"][0]["Name"], PIPELINE_NAME);
        assert_eq!(value["GeneratedBy"][0]["Container"]["Tag"], "img:1");
        let expected_uri = format!("file://{}", fs::canonicalize(&input).expect("canon").display());
        assert_eq!(value["DatasetLinks"]["My Study"], Value::String(expected_uri));
        SoftFileLock::acquire(output.join(LOCK_FILE), Duration::from_millis(50)).expect("lock released");

        update_output_dataset(&output, "ignored", &[input], &provenance("img:1"), Duration::from_secs(1))
            .expect("second run");
        let second = fs::read(output.join(DESCRIPTION_FILE)).expect("read again");
        assert_eq!(first, second);
    }

    #[test]
    fn new_container_tag_is_appended_to_existing_description() {
        let root = tempdir().expect("tmpdir");
        let input = make_input_dataset(root.path(), "raw");
        let output = root.path().join("out");
        update_output_dataset(&output, "out", &[input.clone()], &provenance("img:1"), Duration::from_secs(1))
            .expect("create");
        update_output_dataset(&output, "out", &[input], &provenance("img:2"), Duration::from_secs(1))
            .expect("update");

        let desc = read_description(&output).expect("read");
        let tags: Vec<_> = desc
            .generated_by
            .expect("generated by")
            .into_iter()
            .filter_map(|g| g.container.and_then(|c| c.tag))
            .collect();
        assert_eq!(tags, vec!["img:1", "img:2"]);
    }

    #[test]
    fn conflicting_link_in_existing_description_is_an_error() {
        let root = tempdir().expect("tmpdir");
        let input = make_input_dataset(root.path(), "raw");
        let output = root.path().join("out");
        fs::create_dir_all(&output).expect("mkdir");
        fs::write(
            output.join(DESCRIPTION_FILE),
            json!({"Name": "out", "DatasetLinks": {"raw": "file:///somewhere/else"}}).to_string(),
        )
        .expect("seed");

        let err = update_output_dataset(&output, "out", &[input], &provenance("img:1"), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, DatasetError::LinkConflict { .. }));
        SoftFileLock::acquire(output.join(LOCK_FILE), Duration::from_millis(50)).expect("lock released");
    }

    #[test]
    fn existing_description_without_name_is_rejected() {
        let root = tempdir().expect("tmpdir");
        let output = root.path().join("out");
        fs::create_dir_all(&output).expect("mkdir");
        fs::write(output.join(DESCRIPTION_FILE), "{}").expect("seed");
        let err = update_output_dataset(&output, "out", &[], &provenance("img:1"), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, DatasetError::MissingName(_)));
    }

    #[test]
    fn sidecar_keys_are_sorted_with_two_space_indent() {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("s.json");
        write_json(&path, &json!({"b": 1, "a": [true]}), 2).expect("write");
        let text = fs::read_to_string(&path).expect("read");
        assert_eq!(text, "{\n  \"a\": [\n    true\n  ],\n  \"b\": 1\n}");
    }
}
