// SPDX-License-Identifier: MIT OR Apache-2.0
//! Update manifest data model.
//!
//! The manifest arrives as an escaped JSON string inside the goal state and
//! describes the update's identity, compatibility, file set, and steps.
//! Versions 2 through 5 are accepted; v4 moved `installedCriteria` into the
//! step handler properties, so [`UpdateManifest::effective_installed_criteria`]
//! hides the difference from callers.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lowest accepted `manifestVersion`.
pub const MIN_MANIFEST_VERSION: u32 = 2;
/// Highest accepted `manifestVersion`.
pub const MAX_MANIFEST_VERSION: u32 = 5;

// ---------------------------------------------------------------------------
// UpdateId / UpdateType
// ---------------------------------------------------------------------------

/// Identity of an update: who published it, what it is, which version.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateId {
    /// Publisher of the update.
    pub provider: String,
    /// Name of the update within the provider namespace.
    pub name: String,
    /// Version string, compared textually.
    pub version: String,
}

impl fmt::Display for UpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.provider, self.name, self.version)
    }
}

/// Parsed form of an update-type string `vendor/kind:major`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UpdateType {
    /// Vendor segment, e.g. `microsoft`.
    pub vendor: String,
    /// Kind segment, e.g. `swupdate`.
    pub kind: String,
    /// Major contract version of the handler interface.
    pub version: u32,
}

impl UpdateType {
    /// Parses `vendor/kind:major`; every segment is required.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let bad = || CoreError::BadUpdateType(raw.to_string());

        let (vendor, rest) = raw.split_once('/').ok_or_else(bad)?;
        let (kind, version) = rest.split_once(':').ok_or_else(bad)?;
        if vendor.is_empty() || kind.is_empty() {
            return Err(bad());
        }
        let version: u32 = version.parse().map_err(|_| bad())?;

        Ok(Self {
            vendor: vendor.to_string(),
            kind: kind.to_string(),
            version,
        })
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.vendor, self.kind, self.version)
    }
}

// ---------------------------------------------------------------------------
// File entries
// ---------------------------------------------------------------------------

/// One payload file described by the manifest.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntity {
    /// File name within the sandbox work folder.
    pub file_name: String,
    /// Expected size in bytes.
    #[serde(default)]
    pub size_in_bytes: u64,
    /// Digests keyed by algorithm name (e.g. `sha256`).
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
    /// Free-form handler properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Map<String, serde_json::Value>>,
    /// Pre-download hook that may produce this file without a full fetch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_handler: Option<DownloadHandlerRef>,
    /// Delta descriptors keyed by related-file id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_files: Option<BTreeMap<String, RelatedFile>>,
}

impl FileEntity {
    /// The first `(algorithm, digest)` pair, the one used for cache keying.
    #[must_use]
    pub fn primary_hash(&self) -> Option<(&str, &str)> {
        self.hashes
            .iter()
            .next()
            .map(|(alg, value)| (alg.as_str(), value.as_str()))
    }
}

/// Reference to a registered download handler.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadHandlerRef {
    /// Handler identity of form `vendor/kind:major`.
    pub id: String,
}

/// A delta payload relating the target file to a previously-installed source.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedFile {
    /// File name of the delta payload.
    pub file_name: String,
    /// Expected size in bytes.
    #[serde(default)]
    pub size_in_bytes: u64,
    /// Digests keyed by algorithm name.
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
    /// Handler properties; delta entries carry the source hash pair here.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl RelatedFile {
    /// Digest of the source artifact this delta applies against.
    #[must_use]
    pub fn source_hash(&self) -> Option<&str> {
        self.properties.get("microsoft.sourceFileHash").map(String::as_str)
    }

    /// Digest algorithm of the source artifact.
    #[must_use]
    pub fn source_hash_algorithm(&self) -> Option<&str> {
        self.properties
            .get("microsoft.sourceFileHashAlgorithm")
            .map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

/// Multi-step instructions (manifest v4+).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Instructions {
    /// Ordered steps; each runs through its own handler.
    #[serde(default)]
    pub steps: Vec<InstructionStep>,
}

/// One instruction step.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionStep {
    /// `inline` (default) or `reference` to a detached manifest.
    #[serde(default, rename = "type")]
    pub step_type: Option<String>,
    /// Update type of the handler that executes this step.
    #[serde(default)]
    pub handler: Option<String>,
    /// File ids (into the manifest file map) this step consumes.
    #[serde(default)]
    pub files: Vec<String>,
    /// Handler-specific settings, including v4+ `installedCriteria`.
    #[serde(default)]
    pub handler_properties: Option<serde_json::Map<String, serde_json::Value>>,
    /// File id of a detached child manifest for `reference` steps.
    #[serde(default)]
    pub detached_manifest_file_id: Option<String>,
}

impl InstructionStep {
    /// `installedCriteria` from the handler properties, if present.
    #[must_use]
    pub fn installed_criteria(&self) -> Option<&str> {
        self.handler_properties
            .as_ref()
            .and_then(|p| p.get("installedCriteria"))
            .and_then(|v| v.as_str())
    }
}

// ---------------------------------------------------------------------------
// UpdateManifest
// ---------------------------------------------------------------------------

/// The inner signed document describing one update.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateManifest {
    /// Schema version, `"2"` through `"5"`.
    pub manifest_version: String,
    /// Identity of the update.
    pub update_id: UpdateId,
    /// Update-type string (v2/v3; v4+ carries it per step).
    #[serde(default)]
    pub update_type: Option<String>,
    /// Installed criteria (v2/v3; v4+ carries it per step).
    #[serde(default)]
    pub installed_criteria: Option<String>,
    /// Device property sets this update is compatible with.
    #[serde(default)]
    pub compatibility: Vec<BTreeMap<String, String>>,
    /// Payload files keyed by file id.
    #[serde(default)]
    pub files: BTreeMap<String, FileEntity>,
    /// Multi-step instructions (v4+).
    #[serde(default)]
    pub instructions: Option<Instructions>,
    /// Creation timestamp, ISO-8601.
    #[serde(default)]
    pub created_date_time: Option<String>,
}

impl UpdateManifest {
    /// Parses and version-checks a manifest JSON document.
    pub fn parse(json: &str) -> Result<Self, CoreError> {
        let manifest: Self =
            serde_json::from_str(json).map_err(|e| CoreError::ManifestParse(e.to_string()))?;

        let version: u32 = manifest
            .manifest_version
            .parse()
            .map_err(|_| CoreError::UnsupportedManifestVersion(manifest.manifest_version.clone()))?;
        if !(MIN_MANIFEST_VERSION..=MAX_MANIFEST_VERSION).contains(&version) {
            return Err(CoreError::UnsupportedManifestVersion(
                manifest.manifest_version.clone(),
            ));
        }

        Ok(manifest)
    }

    /// The update-type string, from the top level or the first inline step.
    #[must_use]
    pub fn effective_update_type(&self) -> Option<&str> {
        if let Some(t) = self.update_type.as_deref() {
            return Some(t);
        }
        self.instructions
            .as_ref()
            .and_then(|i| i.steps.first())
            .and_then(|s| s.handler.as_deref())
    }

    /// Installed criteria, from the top level or the first inline step.
    #[must_use]
    pub fn effective_installed_criteria(&self) -> Option<&str> {
        if let Some(c) = self.installed_criteria.as_deref() {
            return Some(c);
        }
        self.instructions
            .as_ref()
            .and_then(|i| i.steps.first())
            .and_then(InstructionStep::installed_criteria)
    }

    /// Files in file-id order.
    pub fn files_ordered(&self) -> impl Iterator<Item = (&str, &FileEntity)> {
        self.files.iter().map(|(id, f)| (id.as_str(), f))
    }
}
