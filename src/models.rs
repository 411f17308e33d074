//
// models.rs
// T1wPreprocessing-rs
//
// Serializable BIDS metadata: dataset descriptions, generator provenance, and per-derivative sidecars.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Top-level `dataset_description.json`. Unknown keys are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DatasetDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "BIDSVersion", default, skip_serializing_if = "Option::is_none")]
    pub bids_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_type: Option<String>,
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Option::is_none"
    )]
    pub generated_by: Option<Vec<GeneratedBy>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_links: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One `GeneratedBy` provenance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GeneratedBy {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(rename = "CodeURL", default, skip_serializing_if = "Option::is_none")]
    pub code_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Container {
    #[serde(rename = "Type")]
    pub container_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

// Older descriptions store a single object instead of a list.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(GeneratedBy),
    Many(Vec<GeneratedBy>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Option<Vec<GeneratedBy>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<OneOrMany>::deserialize(deserializer)?.map(|value| match value {
        OneOrMany::One(entry) => vec![entry],
        OneOrMany::Many(entries) => entries,
    }))
}

/// Sidecar for the preprocessed T1w image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct T1wSidecar {
    pub skull_stripped: bool,
    pub sources: Vec<String>,
}

/// Sidecar for the brain mask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MaskSidecar {
    #[serde(rename = "Type")]
    pub mask_type: String,
    pub sources: Vec<String>,
    pub volume: f64,
    pub volume_unit: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_generated_by_object_is_normalized_to_list() {
        let desc: DatasetDescription = serde_json::from_value(json!({
            "Name": "ds",
            "GeneratedBy": {"Name": "other", "Version": "1"}
        }))
        .expect("parse");
        let generated_by = desc.generated_by.expect("generated by");
        assert_eq!(generated_by.len(), 1);
        assert_eq!(generated_by[0].name, "other");
        assert!(generated_by[0].container.is_none());
    }

    #[test]
    fn unknown_keys_survive_a_round_trip() {
        let original = json!({
            "Name": "ds",
            "BIDSVersion": "1.8.0",
            "License": "CC0",
            "Authors": ["A", "B"],
            "GeneratedBy": [{"Name": "x", "Description": "kept", "Container": {"Type": "docker", "URI": "u"}}]
        });
        let desc: DatasetDescription = serde_json::from_value(original.clone()).expect("parse");
        assert_eq!(desc.extra.get("License"), Some(&json!("CC0")));
        assert_eq!(serde_json::to_value(&desc).expect("serialize"), original);
    }

    #[test]
    fn mask_sidecar_uses_bids_keys() {
        let sidecar = MaskSidecar {
            mask_type: "Brain".into(),
            sources: vec!["bids:raw:sub-01/anat/sub-01_T1w.nii.gz".into()],
            volume: 1234.5,
            volume_unit: "ml".into(),
        };
        let value = serde_json::to_value(&sidecar).expect("serialize");
        assert_eq!(value["Type"], "Brain");
        assert_eq!(value["VolumeUnit"], "ml");
        assert_eq!(value["Volume"], 1234.5);
    }
}
