// SPDX-License-Identifier: MIT OR Apache-2.0
//! The deployment coordination core.
//!
//! One decision thread (ingress) plus whatever worker threads step handlers
//! own. A single coarse mutex guards the coordinator state; it is held
//! across the whole ingress body and across the asynchronous branch of the
//! work-completion callback. Synchronous completions run on the calling
//! thread, under the already-held lock, without retaking it.
//!
//! The orchestrator holds the real state machine; the agent reacts to its
//! goal states, runs the steps through the handler adapters, and reports
//! what actually happened.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod dispatch;
mod orchestration;

pub use orchestration::retry_applicable;

use dispatch::dispatch_entry;
use ota_core::{CancellationType, State, UpdateAction, UpdateId, WorkflowStep};
use ota_handlers::{
    CompletionSink, HandlerRegistry, PreDownloadRegistry, StepContext, StepHandler,
};
use ota_jws::EnvelopeValidator;
use ota_platform::{AgentReport, PlatformOps, StateReporter};
use ota_result::{OpResult, ResultCode, codes};
use ota_rootkey::RootKeySet;
use ota_workflow::WorkflowHandle;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Everything the coordinator needs wired in at construction.
///
/// All collaborators are injected here; nothing is global, and tests swap in
/// recorders for any of them.
pub struct CoordinatorBuilder {
    downloads_root: PathBuf,
    reporter: Arc<dyn StateReporter>,
    platform: Arc<dyn PlatformOps>,
    handlers: HandlerRegistry,
    hooks: PreDownloadRegistry,
    trust: Option<Arc<RootKeySet>>,
}

impl CoordinatorBuilder {
    /// Starts a builder over the mandatory collaborators.
    #[must_use]
    pub fn new(
        downloads_root: impl Into<PathBuf>,
        reporter: Arc<dyn StateReporter>,
        platform: Arc<dyn PlatformOps>,
        handlers: HandlerRegistry,
    ) -> Self {
        Self {
            downloads_root: downloads_root.into(),
            reporter,
            platform,
            handlers,
            hooks: PreDownloadRegistry::new(),
            trust: None,
        }
    }

    /// Adds pre-download hooks (delta reconstruction and friends).
    #[must_use]
    pub fn with_hooks(mut self, hooks: PreDownloadRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    /// Enables manifest signature validation against the given anchors.
    /// Without trust anchors, ingress skips envelope validation (test rigs).
    #[must_use]
    pub fn with_trust(mut self, trust: Arc<RootKeySet>) -> Self {
        self.trust = Some(trust);
        self
    }

    /// Builds the coordinator.
    #[must_use]
    pub fn build(self) -> Coordinator {
        let trust = self.trust.clone();
        let inner = Arc::new_cyclic(|weak: &Weak<Mutex<CoordinatorState>>| {
            Mutex::new(CoordinatorState {
                self_ref: weak.clone(),
                current: None,
                last_reported_state: State::Idle,
                last_completed_workflow_id: None,
                last_goal_state_json: None,
                startup_idle_sent: false,
                system_reboot_state: PlatformOpState::None,
                agent_restart_state: PlatformOpState::None,
                dispatch_seq: 0,
                downloads_root: self.downloads_root,
                reporter: self.reporter,
                platform: self.platform,
                handlers: self.handlers,
                hooks: self.hooks,
            })
        });
        Coordinator { inner, trust }
    }
}

/// Progress of an out-of-band platform operation (reboot / agent restart).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PlatformOpState {
    None,
    Required,
    InProgress,
}

/// Read-only snapshot of the coordinator for observers and tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoordinatorSnapshot {
    /// State last reported (or elided as a duplicate).
    pub last_reported_state: State,
    /// Id of the current workflow, when one is adopted.
    pub current_workflow_id: Option<String>,
    /// Current step of the adopted workflow.
    pub current_step: Option<WorkflowStep>,
    /// `true` between step dispatch and completion.
    pub operation_in_progress: bool,
    /// Cancellation reason pending on the current workflow.
    pub cancellation_type: Option<CancellationType>,
    /// `true` when a deferred replacement is parked.
    pub has_deferred_replacement: bool,
    /// Workflow id most recently completed successfully.
    pub last_completed_workflow_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Public face of the deployment coordinator.
pub struct Coordinator {
    inner: Arc<Mutex<CoordinatorState>>,
    trust: Option<Arc<RootKeySet>>,
}

impl Coordinator {
    /// Handles one pushed goal state.
    ///
    /// Parsing and signature validation run before the lock is taken; all
    /// state decisions run under it. `force_deferral` makes an identical
    /// workflow id replace rather than retry (component-changed replays).
    pub fn handle_property_update(&self, goal_state_json: &str, force_deferral: bool) {
        let next = {
            let validator = self.trust.as_deref().map(EnvelopeValidator::new);
            WorkflowHandle::init(goal_state_json, validator.as_ref())
        };

        let mut state = self.lock();
        match next {
            Err(err) => {
                error!(%err, "rejecting goal state");
                state.report_rejected_goal_state(err.to_result(), err.to_string());
            }
            Ok(next) => state.on_goal_state(next, goal_state_json, force_deferral),
        }
        debug!("property update handled");
    }

    /// Re-processes the last cached goal state after a device topology
    /// change. Without a cached goal state there is nothing to do.
    pub fn handle_component_changed(&self) {
        let cached = self.lock().last_goal_state_json.clone();
        match cached {
            Some(json) => self.handle_property_update(&json, true),
            None => error!(
                "component change detected but no goal state is cached; \
                 the orchestrator must trigger an update"
            ),
        }
    }

    /// Cooperative-multitasking tick, forwarded to the platform layer.
    pub fn do_work(&self) {
        let platform = {
            let state = self.lock();
            Arc::clone(&state.platform)
        };
        platform.do_work();
    }

    /// Current coordinator state, for observers and tests.
    #[must_use]
    pub fn snapshot(&self) -> CoordinatorSnapshot {
        let state = self.lock();
        CoordinatorSnapshot {
            last_reported_state: state.last_reported_state,
            current_workflow_id: state.current.as_ref().map(|h| h.id().to_string()),
            current_step: state.current.as_ref().map(WorkflowHandle::current_step),
            operation_in_progress: state
                .current
                .as_ref()
                .is_some_and(WorkflowHandle::operation_in_progress),
            cancellation_type: state.current.as_ref().map(WorkflowHandle::cancellation_type),
            has_deferred_replacement: state
                .current
                .as_ref()
                .is_some_and(WorkflowHandle::has_deferred_replacement),
            last_completed_workflow_id: state.last_completed_workflow_id.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CoordinatorState> {
        self.inner.lock().expect("coordinator lock poisoned")
    }
}

// ---------------------------------------------------------------------------
// Completion sink
// ---------------------------------------------------------------------------

/// Completion callback handed to handlers for asynchronous steps.
///
/// Carries the dispatch token so a late completion from a superseded
/// operation cannot corrupt a newer one.
struct WorkCompletion {
    state: Weak<Mutex<CoordinatorState>>,
    token: u64,
}

impl CompletionSink for WorkCompletion {
    fn complete(&self, result: OpResult) {
        let Some(state) = self.state.upgrade() else {
            warn!("work completion after coordinator shutdown");
            return;
        };
        let mut state = state.lock().expect("coordinator lock poisoned");
        state.work_completion(self.token, result, true);
    }
}

/// Sink for contexts whose step cannot complete asynchronously (cancel,
/// is-installed, completion-time hooks).
struct NullCompletion;

impl CompletionSink for NullCompletion {
    fn complete(&self, result: OpResult) {
        warn!(%result, "completion delivered on a non-completing context; ignored");
    }
}

// ---------------------------------------------------------------------------
// The state machine proper
// ---------------------------------------------------------------------------

enum IngressDecision {
    DuplicateCancel,
    StartCancel,
    IgnoreRetry,
    StartRetry(String),
    Replacement,
    NewWorkflow,
}

struct CoordinatorState {
    self_ref: Weak<Mutex<CoordinatorState>>,

    current: Option<WorkflowHandle>,
    last_reported_state: State,
    last_completed_workflow_id: Option<String>,
    last_goal_state_json: Option<String>,
    startup_idle_sent: bool,
    system_reboot_state: PlatformOpState,
    agent_restart_state: PlatformOpState,
    dispatch_seq: u64,

    downloads_root: PathBuf,
    reporter: Arc<dyn StateReporter>,
    platform: Arc<dyn PlatformOps>,
    handlers: HandlerRegistry,
    hooks: PreDownloadRegistry,
}

impl CoordinatorState {
    // -- ingress ----------------------------------------------------------

    fn on_goal_state(&mut self, next: WorkflowHandle, goal_state_json: &str, force_deferral: bool) {
        let decision = match &self.current {
            None => IngressDecision::NewWorkflow,
            Some(current) => match next.action() {
                UpdateAction::Cancel => {
                    if current.cancellation_type() == CancellationType::None {
                        IngressDecision::StartCancel
                    } else {
                        IngressDecision::DuplicateCancel
                    }
                }
                UpdateAction::ProcessDeployment => {
                    if !force_deferral && current.id() == next.id() {
                        match (
                            retry_applicable(current.retry_token(), next.retry_token()),
                            next.retry_token(),
                        ) {
                            (true, Some(token)) => IngressDecision::StartRetry(token.to_string()),
                            _ => IngressDecision::IgnoreRetry,
                        }
                    } else if self.last_reported_state != State::Idle
                        && self.last_reported_state != State::Failed
                        && !current.current_step().is_end()
                    {
                        IngressDecision::Replacement
                    } else {
                        IngressDecision::NewWorkflow
                    }
                }
                UpdateAction::Undefined => IngressDecision::NewWorkflow,
            },
        };

        match decision {
            IngressDecision::DuplicateCancel => {
                let Some(current) = self.current.as_ref() else { return };
                info!(
                    cancellation = %current.cancellation_type(),
                    "ignoring duplicate cancel; cancellation already pending"
                );
            }
            IngressDecision::StartCancel => {
                let Some(current) = self.current.as_mut() else { return };
                current.set_cancellation_type(CancellationType::Normal);
                self.handle_update_action();
            }
            IngressDecision::IgnoreRetry => {
                let Some(current) = self.current.as_ref() else { return };
                warn!(
                    current_token = ?current.retry_token(),
                    next_token = ?next.retry_token(),
                    "ignoring retry; token does not advance"
                );
            }
            IngressDecision::StartRetry(token) => {
                let Some(current) = self.current.as_mut() else { return };
                current.update_retry_deployment(&token);
                self.handle_update_action();
            }
            IngressDecision::Replacement => {
                let Some(current) = self.current.as_mut() else { return };
                info!(
                    current_id = %current.id(),
                    next_id = %next.id(),
                    "replacing current workflow"
                );
                let next_id = next.id().to_string();
                match current.try_defer_replacement(next) {
                    None => {
                        info!(next_id = %next_id, "replacement deferred until in-flight operation winds down");
                        self.handle_update_action();
                    }
                    Some(next) => {
                        current.transfer_data(next);
                        let folder = self.downloads_root.join(current.id());
                        current.set_work_folder(folder);
                        self.last_goal_state_json = Some(goal_state_json.to_string());
                        self.handle_update_action();
                    }
                }
            }
            IngressDecision::NewWorkflow => {
                let mut next = next;
                let cancellation = if next.action() == UpdateAction::Cancel {
                    CancellationType::Normal
                } else {
                    CancellationType::None
                };
                next.set_cancellation_type(cancellation);
                next.set_work_folder(self.downloads_root.join(next.id()));
                self.current = Some(next);
                self.last_goal_state_json = Some(goal_state_json.to_string());

                if self.startup_idle_sent {
                    self.handle_update_action();
                } else {
                    self.handle_startup_workflow_data();
                }
            }
        }
    }

    /// Rejecting ingress before any handle is adopted: report `Failed` with
    /// the parse/trust result.
    fn report_rejected_goal_state(&mut self, result: OpResult, details: String) {
        let report = AgentReport {
            workflow_id: self
                .current
                .as_ref()
                .map(|h| h.id().to_string())
                .unwrap_or_default(),
            action: UpdateAction::Undefined,
            state: State::Failed,
            result: Some(result),
            result_details: Some(details),
            installed_update_id: None,
        };
        if !self.reporter.report_state_and_result(&report) {
            error!("failed to report rejected goal state");
        }
        self.last_reported_state = State::Failed;
    }

    // -- update-action handler (under lock) -------------------------------

    fn handle_update_action(&mut self) {
        let Some(current) = self.current.as_ref() else { return };
        let action = current.action();
        let cancellation = current.cancellation_type();
        debug!(%action, %cancellation, "handling update action");

        let is_replace_or_retry = matches!(
            cancellation,
            CancellationType::Replacement | CancellationType::Retry
        );

        if action == UpdateAction::Cancel
            || cancellation == CancellationType::Normal
            || (action == UpdateAction::ProcessDeployment && is_replace_or_retry)
        {
            if current.operation_in_progress() {
                info!(%action, %cancellation, "cancelling in-progress operation");
                current.signals().set_cancel_requested(true);
                self.method_call_cancel();
                return;
            }
            if action == UpdateAction::Cancel || cancellation == CancellationType::Normal {
                // Cancel with nothing running returns the agent to idle.
                let Some(current) = self.current.as_mut() else { return };
                current.signals().set_cancel_requested(false);
                current.set_cancellation_type(CancellationType::None);
                info!("cancel received with no operation in progress; returning to idle");
                if self.last_reported_state != State::Idle {
                    self.set_update_state_with_result(
                        State::Idle,
                        OpResult::from_code(ResultCode::IDLE_SUCCESS),
                    );
                }
                return;
            }
            // Replace/retry with nothing in flight: process it now.
            let Some(current) = self.current.as_mut() else { return };
            current.signals().set_cancel_requested(false);
            current.set_cancellation_type(CancellationType::None);
            info!("replace/retry with no operation in progress; processing workflow");
        }

        let Some(current) = self.current.as_ref() else { return };
        if self
            .last_completed_workflow_id
            .as_deref()
            .is_some_and(|id| current.is_equal_id(id))
        {
            // Connection refreshes re-deliver the last deployment.
            debug!(id = %current.id(), "ignoring duplicate of completed deployment");
            return;
        }

        let installed = self.method_call_is_installed();
        if installed.code == ResultCode::IS_INSTALLED_INSTALLED {
            let Some(current) = self.current.as_ref() else { return };
            info!(id = %current.id(), "update already installed");
            let update_id = current.expected_update_id().cloned();
            self.set_installed_update_id_and_go_idle(update_id);
            return;
        }

        let Some(current) = self.current.as_mut() else { return };
        let step = WorkflowStep::initial_for(current.action());
        current.set_current_step(step);
        self.transition_workflow();
    }

    // -- startup ----------------------------------------------------------

    /// First property-update after boot: decide between "already installed",
    /// "pending cancel", and "resume the pending deployment".
    fn handle_startup_workflow_data(&mut self) {
        if self.startup_idle_sent {
            debug!("startup idle already sent; skipping startup handling");
            return;
        }
        info!("performing startup tasks");

        if self.current.is_none() {
            info!("no update action in the goal state (first connection)");
            self.startup_idle_sent = true;
            return;
        }

        let installed = self.method_call_is_installed();
        if installed.code == ResultCode::IS_INSTALLED_INSTALLED {
            let update_id = self
                .current
                .as_ref()
                .and_then(|h| h.expected_update_id().cloned());
            self.set_installed_update_id_and_go_idle(update_id);
            self.startup_idle_sent = true;
            return;
        }

        let action = self.current.as_ref().map(WorkflowHandle::action);
        match action {
            Some(UpdateAction::Undefined) | None => {}
            Some(UpdateAction::Cancel) => {
                info!("cancel action at startup; reporting idle");
                self.set_update_state_with_result(
                    State::Idle,
                    OpResult::from_code(ResultCode::IDLE_SUCCESS),
                );
            }
            Some(UpdateAction::ProcessDeployment) => {
                // Resume as if the last report had been idle, so the pending
                // deployment dispatches normally.
                self.last_reported_state = State::Idle;
                self.startup_idle_sent = true;
                self.handle_update_action();
                return;
            }
        }

        self.startup_idle_sent = true;
    }

    // -- step dispatch -----------------------------------------------------

    /// Dispatches the current step. If the operation finishes on this
    /// thread (terminal result or failure), the completion callback runs
    /// synchronously under the already-held lock.
    fn transition_workflow(&mut self) {
        let Some(current) = self.current.as_mut() else { return };
        let step = current.current_step();
        let Some(_entry) = dispatch_entry(step) else {
            error!(%step, "no dispatch entry for step; ignoring");
            return;
        };
        debug!(%step, "processing step");

        self.dispatch_seq += 1;
        let token = self.dispatch_seq;
        current.set_operation_in_progress(true);

        let result = match step {
            WorkflowStep::ProcessDeployment => self.op_process_deployment(),
            WorkflowStep::Download => self.op_download(token),
            WorkflowStep::Install => self.op_install(token),
            WorkflowStep::Apply => self.op_apply(token),
            WorkflowStep::Undefined => return,
        };

        if !result.is_in_progress() || result.is_failure() {
            debug!(%result, "operation completed synchronously");
            self.work_completion(token, result, false);
        }
    }

    /// Advances to the dispatch table's next step, re-entering
    /// [`Self::transition_workflow`] unless the workflow is complete.
    fn auto_transition(&mut self) {
        if self.last_reported_state == State::Failed {
            debug!("skipping auto-transition from failed state");
            return;
        }
        let Some(current) = self.current.as_mut() else { return };
        let Some(entry) = dispatch_entry(current.current_step()) else {
            error!(step = %current.current_step(), "no dispatch entry during auto-transition");
            return;
        };
        if entry.next_step.is_end() {
            info!("workflow complete");
            return;
        }
        info!(next = %entry.next_step, "auto-transitioning workflow");
        current.set_current_step(entry.next_step);
        self.transition_workflow();
    }

    // -- work completion ---------------------------------------------------

    /// The single completion path for every step, synchronous or not.
    ///
    /// `is_async` marks completions arriving from worker threads (those
    /// took the lock on their way in); the synchronous branch runs under
    /// the dispatching thread's lock.
    fn work_completion(&mut self, token: u64, result: OpResult, is_async: bool) {
        if token != self.dispatch_seq {
            warn!(token, current = self.dispatch_seq, "stale work completion; ignoring");
            return;
        }
        self.dispatch_seq += 1;

        if result.is_in_progress() {
            error!("work completion delivered an in-progress result");
            return;
        }

        let Some(current) = self.current.as_ref() else {
            warn!("work completion with no current workflow");
            return;
        };
        let step = current.current_step();
        let Some(entry) = dispatch_entry(step) else {
            error!(%step, "no dispatch entry at completion");
            return;
        };
        info!(
            %step,
            %result,
            is_async,
            outcome = if result.is_success() { "succeeded" } else { "failed" },
            "step complete"
        );

        // Post-hook: install/apply translate reboot-or-restart outcomes into
        // platform operations.
        if matches!(step, WorkflowStep::Install | WorkflowStep::Apply) {
            self.on_install_or_apply_complete(result);
        }

        if result.is_success() {
            let next_state = entry.success_state;
            self.set_update_state(next_state);

            // Transitioning to idle frees the handle as a side effect.
            if self.last_reported_state != State::Idle {
                if let Some(current) = self.current.as_mut() {
                    current.clear_in_progress_and_cancel();
                }
                self.auto_transition();
            }
            return;
        }

        // Failure, possibly a requested cancellation.
        let Some(current) = self.current.as_mut() else { return };
        if current.signals().cancel_requested() {
            let cancellation = current.cancellation_type();
            warn!(%cancellation, "handling cancel completion");

            if cancellation.redeploys() {
                if cancellation == CancellationType::Replacement {
                    current.update_for_replacement();
                    let folder = self.downloads_root.join(current.id());
                    current.set_work_folder(folder);
                } else {
                    current.update_for_retry();
                }
                // In-memory only: the re-dispatch must see an idle baseline,
                // but nothing is reported.
                self.last_reported_state = State::Idle;
                self.transition_workflow();
                return;
            }

            if cancellation != CancellationType::Normal {
                error!(%cancellation, "invalid cancellation type at completion");
                return;
            }

            warn!("operation cancelled; returning to idle");
            self.set_update_state_with_result(State::Idle, OpResult::cancelled());
            return;
        }

        // Plain failure: report it and wait for the orchestrator's cancel.
        error!(%step, %result, "step failed; expecting a cancel from the orchestrator");
        self.set_update_state_with_result(State::Failed, result);
        if let Some(current) = self.current.as_mut() {
            current.set_operation_in_progress(false);
        }
    }

    /// Reboot/restart interlock for install and apply completions.
    fn on_install_or_apply_complete(&mut self, result: OpResult) {
        let Some(current) = self.current.as_ref() else { return };
        let signals = current.signals().clone();
        let wants_reboot = result.code.requests_reboot() || signals.reboot_requested();
        let wants_restart = result.code.requests_agent_restart() || signals.agent_restart_requested();

        if wants_reboot {
            info!("step requires a system reboot; rebooting now");
            self.system_reboot_state = PlatformOpState::Required;
            if self.platform.reboot() == 0 {
                self.system_reboot_state = PlatformOpState::InProgress;
            } else {
                error!("reboot attempt failed");
                if let Some(current) = self.current.as_mut() {
                    current.set_operation_in_progress(false);
                }
            }
        } else if wants_restart {
            info!("step requires an agent restart; restarting now");
            self.agent_restart_state = PlatformOpState::Required;
            if self.platform.restart_agent() == 0 {
                self.agent_restart_state = PlatformOpState::InProgress;
            } else {
                error!("agent restart attempt failed");
                if let Some(current) = self.current.as_mut() {
                    current.set_operation_in_progress(false);
                }
            }
        }
    }

    // -- state reporting ---------------------------------------------------

    fn set_update_state(&mut self, state: State) {
        self.set_update_state_helper(state, None);
    }

    fn set_update_state_with_result(&mut self, state: State, result: OpResult) {
        self.set_update_state_helper(state, Some(result));
    }

    fn set_update_state_helper(&mut self, state: State, result: Option<OpResult>) {
        info!(%state, "setting update state");

        if state == State::Idle {
            if self.last_reported_state == State::ApplyStarted {
                if self.system_reboot_state == PlatformOpState::None
                    && self.agent_restart_state == PlatformOpState::None
                {
                    // Apply finished with nothing pending: the deployment
                    // succeeded end to end.
                    let update_id = self
                        .current
                        .as_ref()
                        .and_then(|h| h.expected_update_id().cloned());
                    self.set_installed_update_id_and_go_idle(update_id);
                    return;
                }
                if self.system_reboot_state == PlatformOpState::InProgress
                    || self.agent_restart_state == PlatformOpState::InProgress
                {
                    // The device is going down; the post-reboot cycle will
                    // report. Idle is internal only.
                    self.method_call_idle();
                    return;
                }
                // Reboot/restart failed to initiate: fall through and report
                // idle without an installed update id.
            }

            if self.report(state, result, None) {
                self.method_call_idle();
                self.last_reported_state = State::Idle;
            } else {
                self.last_reported_state = State::Failed;
            }
            return;
        }

        // Duplicate report elision for non-idle states.
        if state == self.last_reported_state {
            debug!(%state, "eliding duplicate state report");
            return;
        }

        if let (Some(result), Some(current)) = (result, self.current.as_mut()) {
            current.set_result(result);
        }

        if self.report(state, result, None) {
            if let Some(current) = self.current.as_mut() {
                current.set_state(state);
            }
            self.last_reported_state = state;
        } else {
            if let Some(current) = self.current.as_mut() {
                current.set_state(State::Failed);
            }
            self.last_reported_state = State::Failed;
        }
    }

    /// Terminal success: report idle with the installed update id, latch the
    /// completed workflow id, retain payloads, and free the handle.
    fn set_installed_update_id_and_go_idle(&mut self, update_id: Option<UpdateId>) {
        let result = OpResult::from_code(ResultCode::APPLY_SUCCESS);
        if !self.report(State::Idle, Some(result), update_id) {
            error!("failed to report installed update id");
        }
        self.last_reported_state = State::Idle;

        if let Some(current) = self.current.as_ref() {
            self.last_completed_workflow_id = Some(current.id().to_string());
            self.run_completion_hooks();
        }

        self.method_call_idle();
        self.system_reboot_state = PlatformOpState::None;
        self.agent_restart_state = PlatformOpState::None;
    }

    /// Offers completed payloads to their pre-download hooks so they can be
    /// retained for future delta reconstruction.
    fn run_completion_hooks(&mut self) {
        let Some(current) = self.current.as_ref() else { return };

        let hook_ids: Vec<String> = {
            let mut ids: Vec<String> = current
                .files()
                .iter()
                .filter_map(|(_, f)| f.download_handler.as_ref().map(|h| h.id.clone()))
                .collect();
            ids.sort();
            ids.dedup();
            ids
        };
        if hook_ids.is_empty() {
            return;
        }

        let ctx = StepContext::from_handle(current, Arc::new(NullCompletion));
        for id in hook_ids {
            if let Some(hook) = self.hooks.get(&id) {
                let outcome = hook.on_update_workflow_completed(&ctx);
                if outcome.is_failure() {
                    warn!(hook = %id, %outcome, "completion hook failed");
                }
            }
        }
    }

    /// Entering idle destroys the sandbox and frees the current handle.
    fn method_call_idle(&mut self) {
        if !matches!(
            self.last_reported_state,
            State::Idle | State::ApplyStarted | State::Failed
        ) {
            warn!(state = %self.last_reported_state, "idle entered from unexpected state");
        }

        let Some(current) = self.current.take() else {
            info!("idle with no workflow; nothing to clean up");
            return;
        };
        info!(id = %current.id(), "ending workflow");
        if let Some(folder) = current.work_folder() {
            self.platform.sandbox_destroy(current.id(), folder);
        }
        self.platform.on_idle(current.id());
    }

    fn report(
        &self,
        state: State,
        result: Option<OpResult>,
        installed_update_id: Option<UpdateId>,
    ) -> bool {
        let (workflow_id, action, details) = match self.current.as_ref() {
            Some(h) => (
                h.id().to_string(),
                h.action(),
                h.result_details().map(str::to_string),
            ),
            None => (String::new(), UpdateAction::Undefined, None),
        };
        let report = AgentReport {
            workflow_id,
            action,
            state,
            result,
            result_details: details,
            installed_update_id,
        };
        let ok = self.reporter.report_state_and_result(&report);
        if !ok {
            error!(%state, "reporting state failed at the transport layer");
        }
        ok
    }

    // -- step operations ---------------------------------------------------

    fn op_process_deployment(&mut self) -> OpResult {
        info!("workflow step: process deployment");
        OpResult::success()
    }

    fn op_download(&mut self, token: u64) -> OpResult {
        info!("workflow step: download");
        if self.last_reported_state != State::DeploymentInProgress {
            error!(state = %self.last_reported_state, "download dispatched in unexpected state");
            return OpResult::failure(codes::COORDINATOR_UNEXPECTED_STATE);
        }

        let (id, folder) = {
            let Some(current) = self.current.as_ref() else {
                return OpResult::failure(codes::COORDINATOR_UNEXPECTED_STATE);
            };
            (
                current.id().to_string(),
                current.work_folder().map(std::path::Path::to_path_buf),
            )
        };
        if let Some(folder) = folder.as_deref() {
            let created = self.platform.sandbox_create(&id, folder);
            if created.is_failure() {
                return created;
            }
            info!(sandbox = %folder.display(), "using sandbox");
        }

        self.set_update_state(State::DownloadStarted);
        self.invoke_handler(token, |handler, ctx| handler.download(ctx))
    }

    fn op_install(&mut self, token: u64) -> OpResult {
        info!("workflow step: install");
        if self.last_reported_state != State::DownloadSucceeded {
            error!(state = %self.last_reported_state, "install dispatched in unexpected state");
            return OpResult::failure(codes::COORDINATOR_UNEXPECTED_STATE);
        }
        self.set_update_state(State::InstallStarted);
        self.invoke_handler(token, |handler, ctx| handler.install(ctx))
    }

    fn op_apply(&mut self, token: u64) -> OpResult {
        info!("workflow step: apply");
        if self.last_reported_state != State::InstallSucceeded {
            error!(state = %self.last_reported_state, "apply dispatched in unexpected state");
            return OpResult::failure(codes::COORDINATOR_UNEXPECTED_STATE);
        }
        self.set_update_state(State::ApplyStarted);
        self.invoke_handler(token, |handler, ctx| handler.apply(ctx))
    }

    fn invoke_handler(
        &mut self,
        token: u64,
        op: impl FnOnce(&dyn StepHandler, &StepContext) -> OpResult,
    ) -> OpResult {
        let Some(current) = self.current.as_ref() else {
            return OpResult::failure(codes::COORDINATOR_UNEXPECTED_STATE);
        };
        let handler = match current.update_type() {
            Ok(update_type) => match self.handlers.resolve(&update_type) {
                Ok(handler) => handler,
                Err(err) => {
                    error!(%err, "no step handler for update type");
                    return OpResult::failure(err.erc());
                }
            },
            Err(err) => {
                error!(%err, "unusable update type");
                return OpResult::failure(err.erc());
            }
        };

        let completion = Arc::new(WorkCompletion {
            state: self.self_ref.clone(),
            token,
        });
        let ctx = StepContext::from_handle(current, completion);
        op(handler.as_ref(), &ctx)
    }

    fn method_call_is_installed(&self) -> OpResult {
        let Some(current) = self.current.as_ref() else {
            return OpResult::from_code(ResultCode::IS_INSTALLED_NOT_INSTALLED);
        };
        let handler = match current.update_type().map(|t| self.handlers.resolve(&t)) {
            Ok(Ok(handler)) => handler,
            Ok(Err(err)) => {
                warn!(%err, "is-installed: no handler; treating as not installed");
                return OpResult {
                    code: ResultCode::IS_INSTALLED_NOT_INSTALLED,
                    extended: err.erc(),
                };
            }
            Err(err) => {
                warn!(%err, "is-installed: unusable update type");
                return OpResult::from_code(ResultCode::IS_INSTALLED_NOT_INSTALLED);
            }
        };
        let ctx = StepContext::from_handle(current, Arc::new(NullCompletion));
        handler.is_installed(&ctx)
    }

    fn method_call_cancel(&mut self) {
        let Some(current) = self.current.as_ref() else { return };
        if !current.operation_in_progress() {
            warn!("cancel requested without an operation in progress; ignoring");
            return;
        }
        info!("requesting cancel for ongoing operation");

        let handler = match current.update_type().map(|t| self.handlers.resolve(&t)) {
            Ok(Ok(handler)) => handler,
            _ => {
                warn!("cancel: no resolvable handler");
                return;
            }
        };
        let ctx = StepContext::from_handle(current, Arc::new(NullCompletion));
        let outcome = handler.cancel(&ctx);
        debug!(%outcome, "handler cancel returned");
    }
}
