// SPDX-License-Identifier: MIT OR Apache-2.0
//! Reported-state egress: the document the orchestrator reads back.

use ota_core::{State, UpdateAction, UpdateId};
use ota_result::OpResult;
use serde_json::{Value, json};

/// One state/result report for the agent twin.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentReport {
    /// Workflow the report belongs to.
    pub workflow_id: String,
    /// Action being executed.
    pub action: UpdateAction,
    /// Lifecycle state to publish.
    pub state: State,
    /// Result pair, when one is carried.
    pub result: Option<OpResult>,
    /// Short human-readable detail string.
    pub result_details: Option<String>,
    /// Delivered only on idle after a successful deployment.
    pub installed_update_id: Option<UpdateId>,
}

impl AgentReport {
    /// Serializes to the twin document shape.
    ///
    /// `installedUpdateId` is an *escaped* JSON string by contract, matching
    /// how the manifest carries nested documents.
    #[must_use]
    pub fn to_twin_json(&self) -> Value {
        let result = self.result.unwrap_or_default();
        let mut agent = json!({
            "lastInstallResult": {
                "resultCode": result.code.value(),
                "extendedResultCode": result.extended,
                "resultDetails": self.result_details.clone().unwrap_or_default(),
                "stepResults": Value::Null,
            },
            "state": self.state.code(),
            "workflow": {
                "action": self.action.code(),
                "id": self.workflow_id,
            },
        });

        if let Some(update_id) = &self.installed_update_id {
            // Escaped-JSON form required by the twin schema.
            let escaped = serde_json::to_string(update_id).expect("update id serializes");
            agent["installedUpdateId"] = Value::String(escaped);
        }

        json!({ "deviceUpdate": { "__t": "c", "agent": agent } })
    }
}

/// Publishes reports to the orchestrator.
///
/// Returns `false` on transport failure, which the coordinator translates
/// into a local `Failed` state.
pub trait StateReporter: Send + Sync {
    /// Serializes and sends one report.
    fn report_state_and_result(&self, report: &AgentReport) -> bool;
}
