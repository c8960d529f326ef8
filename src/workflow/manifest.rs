use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Handler key for detached (reference) steps; the version is the manifest version.
pub const UPDATE_MANIFEST_HANDLER_NAME: &str = "microsoft/update-manifest";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateManifest {
    pub manifest_version: String,
    pub update_id: UpdateId,
    #[serde(default)]
    pub update_type: Option<String>,
    #[serde(default)]
    pub installed_criteria: Option<String>,
    #[serde(default)]
    pub compatibility: Vec<Map<String, Value>>,
    #[serde(default)]
    pub instructions: Option<Instructions>,
    #[serde(default)]
    pub files: BTreeMap<String, ManifestFile>,
    #[serde(default)]
    pub created_date_time: Option<String>,
}

impl UpdateManifest {
    pub fn steps(&self) -> &[ManifestStep] {
        self.instructions
            .as_ref()
            .map(|instructions| instructions.steps.as_slice())
            .unwrap_or_default()
    }

    pub fn reference_handler_key(&self) -> String {
        let major = self
            .manifest_version
            .split('.')
            .next()
            .unwrap_or(self.manifest_version.as_str());
        format!("{UPDATE_MANIFEST_HANDLER_NAME}:{major}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpdateId {
    pub provider: String,
    pub name: String,
    pub version: String,
}

impl UpdateId {
    /// Compact JSON form reported as `installedUpdateId`.
    pub fn to_reported_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.to_string())
    }
}

impl std::fmt::Display for UpdateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.provider, self.name, self.version)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instructions {
    #[serde(default)]
    pub steps: Vec<ManifestStep>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    #[default]
    Inline,
    Reference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestStep {
    #[serde(default, rename = "type")]
    pub step_type: StepType,
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub handler_properties: Map<String, Value>,
    #[serde(default)]
    pub detached_manifest_file_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestFile {
    pub file_name: String,
    #[serde(default)]
    pub size_in_bytes: Option<u64>,
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
}

/// `provider/name:version` handler key, e.g. `microsoft/apt:1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UpdateType {
    pub provider: String,
    pub name: String,
    pub version: u32,
}

impl UpdateType {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let (qualified, version) = raw
            .rsplit_once(':')
            .ok_or_else(|| format!("update type `{raw}` is missing `:version`"))?;
        let (provider, name) = qualified
            .split_once('/')
            .ok_or_else(|| format!("update type `{raw}` is missing `provider/`"))?;
        if provider.trim().is_empty() || name.trim().is_empty() {
            return Err(format!("update type `{raw}` has an empty provider or name"));
        }
        let version = version
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("update type `{raw}` has a non-numeric version"))?;
        Ok(Self {
            provider: provider.to_string(),
            name: name.to_string(),
            version,
        })
    }

    /// Registry lookups are case-insensitive on provider and name.
    pub fn handler_key(&self) -> String {
        format!(
            "{}/{}:{}",
            self.provider.to_ascii_lowercase(),
            self.name.to_ascii_lowercase(),
            self.version
        )
    }
}

impl std::fmt::Display for UpdateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.provider, self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_type_parses_and_normalizes_handler_key() {
        let parsed = UpdateType::parse("Microsoft/APT:1").expect("parse");
        assert_eq!(parsed.provider, "Microsoft");
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.handler_key(), "microsoft/apt:1");
    }

    #[test]
    fn update_type_rejects_partial_keys() {
        assert!(UpdateType::parse("microsoft/apt").is_err());
        assert!(UpdateType::parse("apt:1").is_err());
        assert!(UpdateType::parse("microsoft/apt:one").is_err());
    }

    #[test]
    fn reference_handler_key_uses_manifest_major_version() {
        let manifest: UpdateManifest = serde_json::from_value(serde_json::json!({
            "manifestVersion": "4.0",
            "updateId": {"provider": "contoso", "name": "toaster", "version": "1.0"}
        }))
        .expect("manifest");
        assert_eq!(
            manifest.reference_handler_key(),
            "microsoft/update-manifest:4"
        );
        assert!(manifest.steps().is_empty());
    }

    #[test]
    fn installed_update_id_is_compact_json() {
        let id = UpdateId {
            provider: "contoso".to_string(),
            name: "toaster".to_string(),
            version: "1.2".to_string(),
        };
        assert_eq!(
            id.to_reported_string(),
            r#"{"provider":"contoso","name":"toaster","version":"1.2"}"#
        );
    }
}
