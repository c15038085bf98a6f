// SPDX-License-Identifier: MIT OR Apache-2.0
//! The workflow handle record and its operations.

use crate::error::WorkflowError;
use crate::signals::ExecSignals;
use ota_core::{
    CancellationType, FileEntity, GoalState, State, UpdateAction, UpdateId, UpdateManifest,
    UpdateType, WorkflowStep, verify_manifest_digest,
};
use ota_jws::EnvelopeValidator;
use ota_result::OpResult;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// One deployment's full context: parsed documents, identity, progress, and
/// the deferred-replacement slot.
///
/// Handles are uniquely owned by the coordinator. Step-scoped children share
/// the parent's documents; everything mutable is per-handle.
#[derive(Clone, Debug)]
pub struct WorkflowHandle {
    goal_state: Arc<GoalState>,
    goal_state_json: Arc<String>,

    retry_token: Option<String>,
    current_step: WorkflowStep,
    state: State,
    result: OpResult,
    result_details: Option<String>,
    cancellation_type: CancellationType,
    operation_in_progress: bool,
    signals: ExecSignals,

    work_folder: Option<PathBuf>,
    selected_components: Option<String>,
    // Shared with step contexts so workers can record without the
    // coordinator lock, like the cancel/reboot signals.
    file_inodes: Arc<Mutex<Vec<Option<u64>>>>,
    diagnostic_ercs: Arc<Mutex<Vec<i32>>>,

    level: u32,
    step_index: Option<usize>,

    deferred: Option<Box<WorkflowHandle>>,
}

impl WorkflowHandle {
    // -- construction -----------------------------------------------------

    /// Builds a handle from a goal-state document.
    ///
    /// With a validator, the goal state must carry both the manifest and a
    /// `updateManifestSignature` whose validated payload digest matches the
    /// manifest text.
    pub fn init(
        goal_state_json: &str,
        validator: Option<&EnvelopeValidator<'_>>,
    ) -> Result<Self, WorkflowError> {
        let goal_state = GoalState::parse(goal_state_json)?;

        if let Some(validator) = validator {
            if let Some(manifest_raw) = goal_state.update_manifest_raw.as_deref() {
                let signature = goal_state
                    .update_manifest_signature
                    .as_deref()
                    .ok_or(WorkflowError::MissingSignature)?;
                let payload = validator.validate(signature)?;
                verify_manifest_digest(manifest_raw, &payload)?;
                debug!(id = %goal_state.workflow.id, "manifest signature validated");
            }
        }

        let file_count = goal_state
            .update_manifest
            .as_ref()
            .map_or(0, |m| m.files.len());
        let retry_token = goal_state.workflow.retry_timestamp.clone();

        Ok(Self {
            goal_state: Arc::new(goal_state),
            goal_state_json: Arc::new(goal_state_json.to_string()),
            retry_token,
            current_step: WorkflowStep::Undefined,
            state: State::Idle,
            result: OpResult::default(),
            result_details: None,
            cancellation_type: CancellationType::None,
            operation_in_progress: false,
            signals: ExecSignals::new(),
            work_folder: None,
            selected_components: None,
            file_inodes: Arc::new(Mutex::new(vec![None; file_count])),
            diagnostic_ercs: Arc::new(Mutex::new(Vec::new())),
            level: 0,
            step_index: None,
            deferred: None,
        })
    }

    /// Builds a child handle scoped to one inline instruction step.
    ///
    /// The child shares the parent's documents and file-URL map; progress,
    /// signals, and the sandbox assignment are its own.
    pub fn for_step(&self, index: usize) -> Result<Self, WorkflowError> {
        let step_count = self
            .manifest()
            .and_then(|m| m.instructions.as_ref())
            .map_or(0, |i| i.steps.len());
        if index >= step_count {
            return Err(WorkflowError::NoSuchStep(index));
        }

        let mut child = Self {
            goal_state: Arc::clone(&self.goal_state),
            goal_state_json: Arc::clone(&self.goal_state_json),
            retry_token: self.retry_token.clone(),
            current_step: WorkflowStep::Undefined,
            state: State::Idle,
            result: OpResult::default(),
            result_details: None,
            cancellation_type: CancellationType::None,
            operation_in_progress: false,
            signals: ExecSignals::new(),
            work_folder: self.work_folder.clone(),
            selected_components: self.selected_components.clone(),
            file_inodes: Arc::new(Mutex::new(Vec::new())),
            diagnostic_ercs: Arc::new(Mutex::new(Vec::new())),
            level: self.level + 1,
            step_index: Some(index),
            deferred: None,
        };
        let slots = child.files().len();
        *child.file_inodes.lock().expect("inode lock poisoned") = vec![None; slots];
        Ok(child)
    }

    // -- identity and documents -------------------------------------------

    /// Workflow id chosen by the orchestrator.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.goal_state.workflow.id
    }

    /// Requested action.
    #[must_use]
    pub fn action(&self) -> UpdateAction {
        self.goal_state.workflow.action
    }

    /// The goal-state document this handle was built from.
    #[must_use]
    pub fn goal_state_json(&self) -> &str {
        &self.goal_state_json
    }

    /// Parsed manifest, when the goal state carries one.
    #[must_use]
    pub fn manifest(&self) -> Option<&UpdateManifest> {
        self.goal_state.update_manifest.as_ref()
    }

    /// The update id the orchestrator expects installed at the end.
    #[must_use]
    pub fn expected_update_id(&self) -> Option<&UpdateId> {
        self.manifest().map(|m| &m.update_id)
    }

    /// Raw update-type string, step-scoped for child handles.
    #[must_use]
    pub fn update_type_raw(&self) -> Option<&str> {
        match (self.step_index, self.manifest()) {
            (Some(i), Some(m)) => m
                .instructions
                .as_ref()
                .and_then(|ins| ins.steps.get(i))
                .and_then(|s| s.handler.as_deref()),
            (None, Some(m)) => m.effective_update_type(),
            _ => None,
        }
    }

    /// Parsed update type.
    pub fn update_type(&self) -> Result<UpdateType, WorkflowError> {
        let raw = self
            .update_type_raw()
            .ok_or(ota_core::CoreError::MissingField("updateType"))?;
        Ok(UpdateType::parse(raw)?)
    }

    /// Installed criteria, step-scoped for child handles.
    #[must_use]
    pub fn installed_criteria(&self) -> Option<&str> {
        match (self.step_index, self.manifest()) {
            (Some(i), Some(m)) => m
                .instructions
                .as_ref()
                .and_then(|ins| ins.steps.get(i))
                .and_then(|s| s.installed_criteria()),
            (None, Some(m)) => m.effective_installed_criteria(),
            _ => None,
        }
    }

    /// Payload files in manifest order; step-scoped children see only the
    /// files their step names.
    #[must_use]
    pub fn files(&self) -> Vec<(&str, &FileEntity)> {
        let Some(manifest) = self.manifest() else {
            return Vec::new();
        };
        match self.step_index {
            None => manifest.files_ordered().collect(),
            Some(i) => {
                let Some(step) = manifest.instructions.as_ref().and_then(|ins| ins.steps.get(i))
                else {
                    return Vec::new();
                };
                step.files
                    .iter()
                    .filter_map(|id| manifest.files.get_key_value(id))
                    .map(|(id, f)| (id.as_str(), f))
                    .collect()
            }
        }
    }

    /// Download URL for a file id.
    #[must_use]
    pub fn file_url(&self, file_id: &str) -> Option<&str> {
        self.goal_state.file_urls.get(file_id).map(String::as_str)
    }

    /// The whole file-URL map, including related-file entries.
    #[must_use]
    pub fn file_urls(&self) -> &std::collections::BTreeMap<String, String> {
        &self.goal_state.file_urls
    }

    /// Nesting depth: `0` for top-level deployments.
    #[must_use]
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Instruction-step index for step-scoped children.
    #[must_use]
    pub fn step_index(&self) -> Option<usize> {
        self.step_index
    }

    // -- progress fields --------------------------------------------------

    /// Current position in the deployment.
    #[must_use]
    pub fn current_step(&self) -> WorkflowStep {
        self.current_step
    }

    /// Repositions the workflow.
    pub fn set_current_step(&mut self, step: WorkflowStep) {
        self.current_step = step;
    }

    /// Last state recorded on the handle.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Records a state on the handle.
    pub fn set_state(&mut self, state: State) {
        self.state = state;
    }

    /// Last result recorded on the handle.
    #[must_use]
    pub fn result(&self) -> OpResult {
        self.result
    }

    /// Records a result on the handle.
    pub fn set_result(&mut self, result: OpResult) {
        self.result = result;
    }

    /// Human-readable result detail.
    #[must_use]
    pub fn result_details(&self) -> Option<&str> {
        self.result_details.as_deref()
    }

    /// Sets the human-readable result detail.
    pub fn set_result_details(&mut self, details: impl Into<String>) {
        self.result_details = Some(details.into());
    }

    /// Why the current activity should stop, if anything.
    #[must_use]
    pub fn cancellation_type(&self) -> CancellationType {
        self.cancellation_type
    }

    /// Sets the cancellation reason.
    pub fn set_cancellation_type(&mut self, cancellation: CancellationType) {
        self.cancellation_type = cancellation;
    }

    /// `true` between step dispatch and its completion callback.
    #[must_use]
    pub fn operation_in_progress(&self) -> bool {
        self.operation_in_progress
    }

    /// Marks the dispatch/completion window.
    pub fn set_operation_in_progress(&mut self, value: bool) {
        debug!(id = %self.id(), value, "operation_in_progress");
        self.operation_in_progress = value;
    }

    /// Clears both the in-progress marker and the cancel request, the state
    /// after a completed operation.
    pub fn clear_in_progress_and_cancel(&mut self) {
        self.operation_in_progress = false;
        self.signals.set_cancel_requested(false);
    }

    /// The cross-thread flags shared with workers.
    #[must_use]
    pub fn signals(&self) -> &ExecSignals {
        &self.signals
    }

    /// Retry token most recently accepted for this deployment.
    #[must_use]
    pub fn retry_token(&self) -> Option<&str> {
        self.retry_token.as_deref()
    }

    // -- sandbox and selection --------------------------------------------

    /// Sandbox folder, once assigned.
    #[must_use]
    pub fn work_folder(&self) -> Option<&Path> {
        self.work_folder.as_deref()
    }

    /// Assigns the sandbox folder.
    pub fn set_work_folder(&mut self, folder: impl Into<PathBuf>) {
        self.work_folder = Some(folder.into());
    }

    /// Path of a payload inside the sandbox.
    #[must_use]
    pub fn entity_work_folder_file_path(&self, entity: &FileEntity) -> Option<PathBuf> {
        self.work_folder.as_ref().map(|w| w.join(&entity.file_name))
    }

    /// Selected-components document for component-scoped updates.
    #[must_use]
    pub fn selected_components(&self) -> Option<&str> {
        self.selected_components.as_deref()
    }

    /// Sets the selected-components document.
    pub fn set_selected_components(&mut self, json: impl Into<String>) {
        self.selected_components = Some(json.into());
    }

    /// Records the cache inode of the payload at `index`. Shared with step
    /// contexts; callable from worker threads.
    pub fn set_file_inode(&self, index: usize, inode: u64) {
        let mut slots = self.file_inodes.lock().expect("inode lock poisoned");
        if let Some(slot) = slots.get_mut(index) {
            *slot = Some(inode);
        }
    }

    /// The recorded inodes; the eviction-safety set for this workflow.
    #[must_use]
    pub fn inode_set(&self) -> HashSet<u64> {
        self.file_inodes
            .lock()
            .expect("inode lock poisoned")
            .iter()
            .flatten()
            .copied()
            .collect()
    }

    /// Shared inode slots, for step contexts.
    #[must_use]
    pub fn file_inode_slots(&self) -> Arc<Mutex<Vec<Option<u64>>>> {
        Arc::clone(&self.file_inodes)
    }

    /// Records a non-fatal diagnostic without failing the workflow. Shared
    /// with step contexts; callable from worker threads.
    pub fn record_diagnostic_erc(&self, erc: i32) {
        self.diagnostic_ercs
            .lock()
            .expect("diagnostic lock poisoned")
            .push(erc);
    }

    /// Non-fatal diagnostics recorded so far.
    #[must_use]
    pub fn diagnostic_ercs(&self) -> Vec<i32> {
        self.diagnostic_ercs
            .lock()
            .expect("diagnostic lock poisoned")
            .clone()
    }

    /// Shared diagnostics sink, for step contexts.
    #[must_use]
    pub fn diagnostics_sink(&self) -> Arc<Mutex<Vec<i32>>> {
        Arc::clone(&self.diagnostic_ercs)
    }

    // -- identity comparison ----------------------------------------------

    /// Total order over workflow ids.
    #[must_use]
    pub fn id_compare(a: &Self, b: &Self) -> std::cmp::Ordering {
        a.id().cmp(b.id())
    }

    /// String-side id equality.
    #[must_use]
    pub fn is_equal_id(&self, id: &str) -> bool {
        self.id() == id
    }

    // -- replacement / retry ----------------------------------------------

    /// Adopts `source`'s documents, identity, and progress; the previous
    /// content of this handle is dropped. `source` ceases to exist.
    pub fn transfer_data(&mut self, source: WorkflowHandle) {
        debug!(from = %self.id(), to = %source.id(), "transferring workflow data");
        *self = source;
    }

    /// Handles an incoming replacement deployment.
    ///
    /// If an operation is in flight the replacement is parked in the
    /// deferred slot, the cancellation type becomes `Replacement`, and
    /// `None` is returned. Otherwise `next` is handed back for an immediate
    /// transfer.
    pub fn try_defer_replacement(&mut self, next: WorkflowHandle) -> Option<WorkflowHandle> {
        if self.operation_in_progress {
            self.cancellation_type = CancellationType::Replacement;
            self.deferred = Some(Box::new(next));
            None
        } else {
            Some(next)
        }
    }

    /// `true` when a deferred replacement is parked on this handle.
    #[must_use]
    pub fn has_deferred_replacement(&self) -> bool {
        self.deferred.is_some()
    }

    /// Marks a retry: cancellation type `Retry` plus the freshly accepted
    /// token.
    pub fn update_retry_deployment(&mut self, new_token: &str) {
        self.cancellation_type = CancellationType::Retry;
        self.retry_token = Some(new_token.to_string());
    }

    /// Promotes the deferred replacement into this handle and rewinds to
    /// `ProcessDeployment`. No-op (with a warning) when nothing is parked.
    pub fn update_for_replacement(&mut self) {
        match self.deferred.take() {
            Some(next) => {
                self.transfer_data(*next);
                self.rewind_for_redeploy();
            }
            None => warn!(id = %self.id(), "replacement promotion without a deferred handle"),
        }
    }

    /// Rewinds this handle to `ProcessDeployment` for a retry.
    pub fn update_for_retry(&mut self) {
        self.rewind_for_redeploy();
    }

    fn rewind_for_redeploy(&mut self) {
        self.current_step = WorkflowStep::ProcessDeployment;
        self.cancellation_type = CancellationType::None;
        self.operation_in_progress = false;
        self.signals.reset();
        self.result = OpResult::default();
        self.result_details = None;
    }
}
