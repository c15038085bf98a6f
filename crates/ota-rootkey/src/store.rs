// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persistence for the root-key package overlay.

use crate::error::RootKeyError;
use crate::package::RootKeyPackage;
use crate::set::RootKeySet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Loads and persists the overlay package at a configured path.
///
/// Writes are atomic: the document lands in a sibling temp file which is
/// then renamed over the destination.
#[derive(Clone, Debug)]
pub struct RootKeyStore {
    path: PathBuf,
}

impl RootKeyStore {
    /// Creates a store over the given file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads and parses the persisted package, if the file exists.
    pub fn load(&self) -> Result<Option<RootKeyPackage>, RootKeyError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)?;
        Ok(Some(RootKeyPackage::parse(&text)?))
    }

    /// Builds the effective trust-anchor set.
    ///
    /// The persisted overlay is validated before use; an invalid or
    /// unreadable overlay degrades to the hardcoded set with a warning
    /// rather than leaving the agent unable to verify anything.
    pub fn load_set(&self) -> RootKeySet {
        match self.load() {
            Ok(Some(pkg)) => match pkg.validate() {
                Ok(()) => {
                    info!(path = %self.path.display(), version = pkg.protected.version,
                          "loaded root-key overlay");
                    RootKeySet::with_overlay(pkg)
                }
                Err(err) => {
                    warn!(path = %self.path.display(), %err,
                          "persisted root-key package failed validation; using hardcoded anchors");
                    RootKeySet::builtin()
                }
            },
            Ok(None) => RootKeySet::builtin(),
            Err(err) => {
                warn!(path = %self.path.display(), %err,
                      "could not load root-key package; using hardcoded anchors");
                RootKeySet::builtin()
            }
        }
    }

    /// Validates `package_json` and persists it atomically.
    ///
    /// The raw document is written as received so the verbatim `protected`
    /// text survives a round-trip through the store.
    pub fn save(&self, package_json: &str) -> Result<RootKeyPackage, RootKeyError> {
        let package = RootKeyPackage::parse(package_json)?;
        package.validate()?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, package_json)?;
        fs::rename(&tmp, &self.path)?;
        info!(path = %self.path.display(), version = package.protected.version,
              "persisted root-key overlay");

        Ok(package)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempdir().unwrap();
        let store = RootKeyStore::new(dir.path().join("rootkeys.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn load_set_degrades_to_builtin_on_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rootkeys.json");
        fs::write(&path, "not json").unwrap();
        let set = RootKeyStore::new(&path).load_set();
        assert!(set.overlay().is_none());
    }

    #[test]
    fn save_rejects_unvalidatable_packages_and_leaves_no_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys/rootkeys.json");
        let store = RootKeyStore::new(&path);
        // Parses but has no signatures, so validation fails.
        let err = store
            .save(r#"{ "protected": { "version": 1, "published": 1 }, "signatures": [] }"#)
            .unwrap_err();
        assert!(matches!(err, RootKeyError::MissingSignature(_)));
        assert!(!path.exists());
    }

    #[test]
    fn round_trip_preserves_verbatim_protected_text() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rootkeys.json");
        let doc = r#"{ "protected": {"published": 7,  "version": 1}, "signatures": [] }"#;
        // Bypass save() validation; write as the platform installer would.
        fs::write(&path, doc).unwrap();
        let loaded = RootKeyStore::new(&path).load().unwrap().unwrap();
        assert_eq!(loaded.protected_raw, r#"{"published": 7,  "version": 1}"#);
    }
}
