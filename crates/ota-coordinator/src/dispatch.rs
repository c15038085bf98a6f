// SPDX-License-Identifier: MIT OR Apache-2.0
//! The static step dispatch table.

use ota_core::{State, WorkflowStep};

/// One row of the dispatch table: what runs for a step, where success
/// transitions, and which step follows.
#[derive(Debug)]
pub(crate) struct DispatchEntry {
    pub step: WorkflowStep,
    /// State reported when the step's operation succeeds.
    pub success_state: State,
    /// Step the workflow auto-transitions to next; `Undefined` ends it.
    pub next_step: WorkflowStep,
}

// There is no ApplySucceeded state: a successful apply returns to Idle.
const DISPATCH_TABLE: &[DispatchEntry] = &[
    DispatchEntry {
        step: WorkflowStep::ProcessDeployment,
        success_state: State::DeploymentInProgress,
        next_step: WorkflowStep::Download,
    },
    DispatchEntry {
        step: WorkflowStep::Download,
        success_state: State::DownloadSucceeded,
        next_step: WorkflowStep::Install,
    },
    DispatchEntry {
        step: WorkflowStep::Install,
        success_state: State::InstallSucceeded,
        next_step: WorkflowStep::Apply,
    },
    DispatchEntry {
        step: WorkflowStep::Apply,
        success_state: State::Idle,
        next_step: WorkflowStep::Undefined,
    },
];

/// Looks up the dispatch row for a step; `None` for `Undefined`.
pub(crate) fn dispatch_entry(step: WorkflowStep) -> Option<&'static DispatchEntry> {
    DISPATCH_TABLE.iter().find(|e| e.step == step)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_every_runnable_step() {
        for step in [
            WorkflowStep::ProcessDeployment,
            WorkflowStep::Download,
            WorkflowStep::Install,
            WorkflowStep::Apply,
        ] {
            assert!(dispatch_entry(step).is_some(), "{step} missing");
        }
        assert!(dispatch_entry(WorkflowStep::Undefined).is_none());
    }

    #[test]
    fn chain_ends_at_apply() {
        let mut step = WorkflowStep::ProcessDeployment;
        let mut hops = 0;
        while let Some(entry) = dispatch_entry(step) {
            step = entry.next_step;
            hops += 1;
            assert!(hops <= 4, "dispatch table loops");
        }
        assert_eq!(step, WorkflowStep::Undefined);
        assert_eq!(hops, 4);
    }

    #[test]
    fn apply_success_returns_to_idle() {
        let entry = dispatch_entry(WorkflowStep::Apply).unwrap();
        assert_eq!(entry.success_state, State::Idle);
        assert!(entry.next_step.is_end());
    }
}
