// SPDX-License-Identifier: MIT OR Apache-2.0
//! Goal-state envelope: the document the orchestrator pushes per change.

use crate::error::CoreError;
use crate::lifecycle::UpdateAction;
use crate::manifest::UpdateManifest;
use serde::Deserialize;
use std::collections::BTreeMap;

/// The `workflow` member of a goal state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowSection {
    /// Deployment identity chosen by the orchestrator.
    pub id: String,
    /// Requested action.
    pub action: UpdateAction,
    /// Retry token; a strictly-later token re-triggers the same deployment.
    pub retry_timestamp: Option<String>,
}

/// A parsed goal state.
///
/// `update_manifest` stays in its raw string form as well, because that exact
/// byte sequence is what the detached signature covers.
#[derive(Clone, Debug, PartialEq)]
pub struct GoalState {
    /// Workflow identity and action.
    pub workflow: WorkflowSection,
    /// The manifest document, verbatim as signed.
    pub update_manifest_raw: Option<String>,
    /// The parsed manifest, when one is present.
    pub update_manifest: Option<UpdateManifest>,
    /// Detached JWS over the manifest digest.
    pub update_manifest_signature: Option<String>,
    /// Download URLs keyed by file id.
    pub file_urls: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct GoalStateWire {
    workflow: WorkflowWire,
    #[serde(rename = "updateManifest")]
    update_manifest: Option<String>,
    #[serde(rename = "updateManifestSignature")]
    update_manifest_signature: Option<String>,
    #[serde(rename = "fileUrls", default)]
    file_urls: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct WorkflowWire {
    id: Option<String>,
    action: Option<i64>,
    #[serde(rename = "retryTimestamp")]
    retry_timestamp: Option<String>,
}

impl GoalState {
    /// Parses a goal-state JSON document.
    ///
    /// A `Cancel` needs only the workflow section; a `ProcessDeployment`
    /// must carry a parseable manifest.
    pub fn parse(json: &str) -> Result<Self, CoreError> {
        let wire: GoalStateWire =
            serde_json::from_str(json).map_err(|e| CoreError::GoalStateParse(e.to_string()))?;

        let id = wire.workflow.id.ok_or(CoreError::MissingField("workflow.id"))?;
        if id.is_empty() {
            return Err(CoreError::MissingField("workflow.id"));
        }
        let action = UpdateAction::from_code(
            wire.workflow
                .action
                .ok_or(CoreError::MissingField("workflow.action"))?,
        );

        let update_manifest = match (&wire.update_manifest, action) {
            (Some(raw), _) => Some(UpdateManifest::parse(raw)?),
            (None, UpdateAction::ProcessDeployment) => {
                return Err(CoreError::MissingField("updateManifest"));
            }
            (None, _) => None,
        };

        Ok(Self {
            workflow: WorkflowSection {
                id,
                action,
                retry_timestamp: wire.workflow.retry_timestamp,
            },
            update_manifest_raw: wire.update_manifest,
            update_manifest,
            update_manifest_signature: wire.update_manifest_signature,
            file_urls: wire.file_urls,
        })
    }
}

/// Checks that `manifest_raw` hashes to the digest inside a validated
/// signature payload (`{"sha256": "<base64 digest>"}`).
pub fn verify_manifest_digest(manifest_raw: &str, signature_payload: &[u8]) -> Result<(), CoreError> {
    #[derive(Deserialize)]
    struct DigestPayload {
        sha256: String,
    }

    let payload: DigestPayload = serde_json::from_slice(signature_payload)
        .map_err(|e| CoreError::GoalStateParse(e.to_string()))?;
    let expected =
        ota_crypto::base64_decode_any(&payload.sha256).map_err(|e| CoreError::Base64(e.to_string()))?;
    let actual = ota_crypto::sha256(manifest_raw.as_bytes());

    if expected == actual {
        Ok(())
    } else {
        Err(CoreError::ManifestDigestMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment_json() -> String {
        let manifest = r#"{
            "manifestVersion": "2",
            "updateId": { "provider": "contoso", "name": "toaster", "version": "1.1" },
            "updateType": "microsoft/swupdate:1",
            "installedCriteria": "1.1",
            "files": { "f1": { "fileName": "image.swu" } }
        }"#;
        serde_json::json!({
            "workflow": { "id": "wf-100", "action": 3, "retryTimestamp": "t1" },
            "updateManifest": manifest,
            "updateManifestSignature": "e30.e30.c2ln",
            "fileUrls": { "f1": "http://updates.contoso.example/image.swu" }
        })
        .to_string()
    }

    #[test]
    fn parses_deployment_goal_state() {
        let gs = GoalState::parse(&deployment_json()).unwrap();
        assert_eq!(gs.workflow.id, "wf-100");
        assert_eq!(gs.workflow.action, UpdateAction::ProcessDeployment);
        assert_eq!(gs.workflow.retry_timestamp.as_deref(), Some("t1"));
        let manifest = gs.update_manifest.unwrap();
        assert_eq!(manifest.update_id.name, "toaster");
        assert_eq!(gs.file_urls["f1"], "http://updates.contoso.example/image.swu");
    }

    #[test]
    fn cancel_needs_no_manifest() {
        let gs = GoalState::parse(r#"{ "workflow": { "id": "wf-1", "action": 255 } }"#).unwrap();
        assert_eq!(gs.workflow.action, UpdateAction::Cancel);
        assert!(gs.update_manifest.is_none());
    }

    #[test]
    fn deployment_without_manifest_is_rejected() {
        let err = GoalState::parse(r#"{ "workflow": { "id": "wf-1", "action": 3 } }"#).unwrap_err();
        assert!(matches!(err, CoreError::MissingField("updateManifest")));
    }

    #[test]
    fn missing_workflow_id_is_rejected() {
        assert!(GoalState::parse(r#"{ "workflow": { "action": 3 } }"#).is_err());
        assert!(GoalState::parse(r#"{ "workflow": { "id": "", "action": 3 } }"#).is_err());
    }

    #[test]
    fn digest_check_matches_sha256() {
        let manifest = r#"{"manifestVersion":"2"}"#;
        let digest = ota_crypto::sha256(manifest.as_bytes());
        let payload = serde_json::json!({ "sha256": ota_crypto::base64url_encode(&digest) });
        verify_manifest_digest(manifest, payload.to_string().as_bytes()).unwrap();

        let wrong = serde_json::json!({ "sha256": ota_crypto::base64url_encode(b"nope") });
        assert!(matches!(
            verify_manifest_digest(manifest, wrong.to_string().as_bytes()),
            Err(CoreError::ManifestDigestMismatch)
        ));
    }
}
