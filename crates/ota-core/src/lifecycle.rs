// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lifecycle enums shared between the agent and the orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// UpdateAction
// ---------------------------------------------------------------------------

/// Command pushed by the orchestrator inside a goal state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateAction {
    /// Run the full deployment workflow for the attached manifest.
    ProcessDeployment,
    /// Stop whatever is running and return to idle.
    Cancel,
    /// Sentinel for absent or unrecognized actions.
    #[default]
    Undefined,
}

impl UpdateAction {
    /// Decodes the wire integer (`3` process deployment, `255` cancel).
    #[must_use]
    pub fn from_code(code: i64) -> Self {
        match code {
            3 => Self::ProcessDeployment,
            255 => Self::Cancel,
            _ => Self::Undefined,
        }
    }

    /// The wire integer for this action.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::ProcessDeployment => 3,
            Self::Cancel => 255,
            Self::Undefined => -1,
        }
    }
}

impl fmt::Display for UpdateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ProcessDeployment => "ProcessDeployment",
            Self::Cancel => "Cancel",
            Self::Undefined => "Undefined",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// WorkflowStep
// ---------------------------------------------------------------------------

/// Position within a deployment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkflowStep {
    /// Accept the deployment and report it in progress.
    ProcessDeployment,
    /// Fetch payloads into the sandbox.
    Download,
    /// Stage the payloads onto the device.
    Install,
    /// Commit the staged content.
    Apply,
    /// End of workflow.
    #[default]
    Undefined,
}

impl WorkflowStep {
    /// The initial step for an accepted action; `Undefined` when the action
    /// starts no workflow.
    #[must_use]
    pub fn initial_for(action: UpdateAction) -> Self {
        match action {
            UpdateAction::ProcessDeployment => Self::ProcessDeployment,
            UpdateAction::Cancel | UpdateAction::Undefined => Self::Undefined,
        }
    }

    /// `Undefined` marks a finished workflow.
    #[must_use]
    pub fn is_end(self) -> bool {
        matches!(self, Self::Undefined)
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ProcessDeployment => "ProcessDeployment",
            Self::Download => "Download",
            Self::Install => "Install",
            Self::Apply => "Apply",
            Self::Undefined => "Undefined",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Reportable agent lifecycle state.
///
/// There is no `ApplySucceeded`; a successful apply transitions straight back
/// to [`State::Idle`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum State {
    /// Ready for a new deployment.
    #[default]
    Idle,
    /// A deployment has been accepted.
    DeploymentInProgress,
    /// Download step dispatched.
    DownloadStarted,
    /// Download step finished.
    DownloadSucceeded,
    /// Install step dispatched.
    InstallStarted,
    /// Install step finished.
    InstallSucceeded,
    /// Apply step dispatched.
    ApplyStarted,
    /// A step failed; awaiting a cancel from the orchestrator.
    Failed,
}

impl State {
    /// Wire code reported in the agent twin.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::Idle => 0,
            Self::DeploymentInProgress => 6,
            Self::Failed => 255,
            Self::DownloadStarted => 257,
            Self::DownloadSucceeded => 258,
            Self::InstallStarted => 259,
            Self::InstallSucceeded => 260,
            Self::ApplyStarted => 261,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "Idle",
            Self::DeploymentInProgress => "DeploymentInProgress",
            Self::DownloadStarted => "DownloadStarted",
            Self::DownloadSucceeded => "DownloadSucceeded",
            Self::InstallStarted => "InstallStarted",
            Self::InstallSucceeded => "InstallSucceeded",
            Self::ApplyStarted => "ApplyStarted",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// CancellationType
// ---------------------------------------------------------------------------

/// Why the current activity should stop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationType {
    /// Nothing pending.
    #[default]
    None,
    /// The orchestrator sent an explicit cancel.
    Normal,
    /// A different deployment arrived mid-flight.
    Replacement,
    /// The same deployment arrived with a newer retry token.
    Retry,
    /// Device topology changed out-of-band.
    ComponentChanged,
}

impl CancellationType {
    /// `true` for the variants that re-dispatch the workflow after the
    /// in-flight operation winds down.
    #[must_use]
    pub fn redeploys(self) -> bool {
        matches!(self, Self::Replacement | Self::Retry | Self::ComponentChanged)
    }
}

impl fmt::Display for CancellationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "None",
            Self::Normal => "Normal",
            Self::Replacement => "Replacement",
            Self::Retry => "Retry",
            Self::ComponentChanged => "ComponentChanged",
        };
        f.write_str(s)
    }
}
