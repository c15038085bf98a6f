// SPDX-License-Identifier: MIT OR Apache-2.0
//! A scripted step handler for development and tests.
//!
//! The simulator performs no real work: each lifecycle method returns the
//! result its [`SimulatorSpec`] prescribes. A `simulator-data.json` file in
//! the sandbox work folder overrides the in-memory spec, so scripted
//! end-to-end runs can steer the workflow without recompiling.

use crate::context::StepContext;
use crate::{CompletionSink as _, StepHandler};
use ota_result::{OpResult, ResultCode};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, info};

/// File name of the per-sandbox spec override.
pub const SPEC_FILE_NAME: &str = "simulator-data.json";

/// Scripted results for each lifecycle method.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimulatorSpec {
    /// Result for `is_installed`.
    pub is_installed: OpResult,
    /// Result for `download`.
    pub download: OpResult,
    /// Result for `install`.
    pub install: OpResult,
    /// Result for `apply`.
    pub apply: OpResult,
    /// Result for `cancel`.
    pub cancel: OpResult,
}

impl Default for SimulatorSpec {
    fn default() -> Self {
        Self {
            is_installed: OpResult::from_code(ResultCode::IS_INSTALLED_NOT_INSTALLED),
            download: OpResult::from_code(ResultCode::DOWNLOAD_SUCCESS),
            install: OpResult::from_code(ResultCode::INSTALL_SUCCESS),
            apply: OpResult::from_code(ResultCode::APPLY_SUCCESS),
            cancel: OpResult::success(),
        }
    }
}

/// The scripted handler.
#[derive(Debug)]
pub struct SimulatorHandler {
    spec: Mutex<SimulatorSpec>,
}

impl SimulatorHandler {
    /// A simulator whose every step succeeds.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::with_spec(SimulatorSpec::default())
    }

    /// A simulator with an explicit spec.
    #[must_use]
    pub fn with_spec(spec: SimulatorSpec) -> Self {
        Self {
            spec: Mutex::new(spec),
        }
    }

    /// Replaces the in-memory spec.
    pub fn set_spec(&self, spec: SimulatorSpec) {
        *self.spec.lock().expect("simulator spec lock poisoned") = spec;
    }

    /// The spec for one call: the sandbox override file when present,
    /// otherwise the in-memory spec.
    fn effective_spec(&self, ctx: &StepContext) -> SimulatorSpec {
        if let Some(path) = ctx.work_folder.as_ref().map(|w| w.join(SPEC_FILE_NAME)) {
            if let Ok(text) = std::fs::read_to_string(&path) {
                match serde_json::from_str(&text) {
                    Ok(spec) => {
                        debug!(path = %path.display(), "simulator spec loaded from sandbox");
                        return spec;
                    }
                    Err(err) => {
                        debug!(path = %path.display(), %err, "ignoring malformed simulator spec");
                    }
                }
            }
        }
        *self.spec.lock().expect("simulator spec lock poisoned")
    }

    fn scripted(&self, ctx: &StepContext, op: &str, result: OpResult) -> OpResult {
        if ctx.signals.cancel_requested() {
            info!(workflow_id = %ctx.workflow_id, op, "simulator observed cancel request");
            return OpResult::cancelled();
        }
        info!(workflow_id = %ctx.workflow_id, op, %result, "simulator step");
        result
    }
}

impl StepHandler for SimulatorHandler {
    fn is_installed(&self, ctx: &StepContext) -> OpResult {
        let spec = self.effective_spec(ctx);
        // Pure check: no cancellation shortcut, mirroring real handlers.
        info!(workflow_id = %ctx.workflow_id, "simulator is_installed");
        spec.is_installed
    }

    fn download(&self, ctx: &StepContext) -> OpResult {
        let result = self.effective_spec(ctx).download;
        let outcome = self.scripted(ctx, "download", result);
        if outcome.is_in_progress() {
            // Scripted async: a worker thread delivers the terminal result
            // through the sink, exactly like a real long download.
            let completion = std::sync::Arc::clone(&ctx.completion);
            let signals = ctx.signals.clone();
            std::thread::spawn(move || {
                let terminal = if signals.cancel_requested() {
                    OpResult::cancelled()
                } else {
                    OpResult::from_code(ResultCode::DOWNLOAD_SUCCESS)
                };
                completion.complete(terminal);
            });
        }
        outcome
    }

    fn install(&self, ctx: &StepContext) -> OpResult {
        let result = self.effective_spec(ctx).install;
        self.scripted(ctx, "install", result)
    }

    fn apply(&self, ctx: &StepContext) -> OpResult {
        let result = self.effective_spec(ctx).apply;
        self.scripted(ctx, "apply", result)
    }

    fn cancel(&self, ctx: &StepContext) -> OpResult {
        let result = self.effective_spec(ctx).cancel;
        info!(workflow_id = %ctx.workflow_id, "simulator cancel");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CompletionSink;
    use ota_workflow::ExecSignals;
    use std::sync::Arc;

    struct NullSink;
    impl CompletionSink for NullSink {
        fn complete(&self, _result: OpResult) {}
    }

    fn ctx(work_folder: Option<std::path::PathBuf>) -> StepContext {
        StepContext {
            workflow_id: "wf-sim".into(),
            update_type: None,
            installed_criteria: Some("1.0".into()),
            provider: None,
            work_folder,
            files: Vec::new(),
            file_urls: std::collections::BTreeMap::new(),
            selected_components: None,
            signals: ExecSignals::new(),
            inode_slots: Arc::new(std::sync::Mutex::new(Vec::new())),
            diagnostics: Arc::new(std::sync::Mutex::new(Vec::new())),
            completion: Arc::new(NullSink),
        }
    }

    #[test]
    fn default_spec_walks_the_happy_path() {
        let sim = SimulatorHandler::succeeding();
        let ctx = ctx(None);
        assert_eq!(
            sim.is_installed(&ctx).code,
            ResultCode::IS_INSTALLED_NOT_INSTALLED
        );
        assert_eq!(sim.download(&ctx).code, ResultCode::DOWNLOAD_SUCCESS);
        assert_eq!(sim.install(&ctx).code, ResultCode::INSTALL_SUCCESS);
        assert_eq!(sim.apply(&ctx).code, ResultCode::APPLY_SUCCESS);
    }

    #[test]
    fn cancel_request_preempts_scripted_result() {
        let sim = SimulatorHandler::succeeding();
        let ctx = ctx(None);
        ctx.signals.set_cancel_requested(true);
        assert_eq!(sim.download(&ctx).code, ResultCode::FAILURE_CANCELLED);
        assert_eq!(sim.install(&ctx).code, ResultCode::FAILURE_CANCELLED);
    }

    #[test]
    fn scripted_failure_is_returned_verbatim() {
        let sim = SimulatorHandler::with_spec(SimulatorSpec {
            install: OpResult::failure(42),
            ..SimulatorSpec::default()
        });
        assert_eq!(sim.install(&ctx(None)).extended, 42);
    }

    #[test]
    fn sandbox_spec_file_overrides_memory() {
        let dir = tempfile::tempdir().unwrap();
        let spec = SimulatorSpec {
            apply: OpResult::from_code(ResultCode::APPLY_REQUIRED_REBOOT),
            ..SimulatorSpec::default()
        };
        std::fs::write(
            dir.path().join(SPEC_FILE_NAME),
            serde_json::to_string(&spec).unwrap(),
        )
        .unwrap();

        let sim = SimulatorHandler::succeeding();
        let ctx = ctx(Some(dir.path().to_path_buf()));
        assert_eq!(sim.apply(&ctx).code, ResultCode::APPLY_REQUIRED_REBOOT);
    }
}
