// SPDX-License-Identifier: MIT OR Apache-2.0
//! Parse-layer errors and their extended-result-code mapping.

use ota_result::codes;
use thiserror::Error;

/// Errors raised while decoding goal states and manifests.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The goal-state document is not valid JSON or has the wrong shape.
    #[error("goal state failed to parse: {0}")]
    GoalStateParse(String),
    /// A required goal-state field is absent.
    #[error("goal state is missing required field `{0}`")]
    MissingField(&'static str),
    /// The embedded manifest string is not a valid manifest document.
    #[error("update manifest failed to parse: {0}")]
    ManifestParse(String),
    /// `manifestVersion` is outside the supported range.
    #[error("unsupported manifest version `{0}`")]
    UnsupportedManifestVersion(String),
    /// An update-type string is not `vendor/kind:version`.
    #[error("malformed update type `{0}`")]
    BadUpdateType(String),
    /// Base64 content in the payload failed to decode.
    #[error("base64 decode failed: {0}")]
    Base64(String),
    /// The manifest digest does not match the signed digest.
    #[error("manifest digest does not match the signed envelope")]
    ManifestDigestMismatch,
}

impl CoreError {
    /// The extended result code reported for this error.
    #[must_use]
    pub fn erc(&self) -> i32 {
        match self {
            Self::GoalStateParse(_) => codes::INGRESS_GOAL_STATE_PARSE,
            Self::MissingField(_) => codes::INGRESS_MISSING_FIELD,
            Self::ManifestParse(_) => codes::INGRESS_MANIFEST_PARSE,
            Self::UnsupportedManifestVersion(_) => codes::INGRESS_UNSUPPORTED_MANIFEST_VERSION,
            Self::BadUpdateType(_) => codes::INGRESS_BAD_UPDATE_TYPE,
            Self::Base64(_) => codes::INGRESS_BAD_BASE64,
            Self::ManifestDigestMismatch => codes::TRUST_MANIFEST_HASH_MISMATCH,
        }
    }
}
