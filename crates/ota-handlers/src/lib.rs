// SPDX-License-Identifier: MIT OR Apache-2.0
//! The step-handler contract every update type implements.
//!
//! A step handler is the adapter between the coordinator's fixed lifecycle
//! (Download → Install → Apply) and one concrete update format. Handlers may
//! complete a step synchronously by returning a terminal result, or return
//! an in-progress code and later deliver the outcome through the
//! [`CompletionSink`] carried by the [`StepContext`].
//!
//! Cancellation is cooperative: the coordinator flips the context's
//! [`ExecSignals`] and calls [`StepHandler::cancel`]; the handler's next
//! checkpoint returns a cancelled result.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod context;
mod download;
mod registry;
mod simulator;

pub use context::{PayloadFile, StepContext};
pub use download::{PreDownloadHook, PreDownloadRegistry, download_payloads};
pub use registry::{HandlerError, HandlerRegistry};
pub use simulator::{SimulatorHandler, SimulatorSpec};

use ota_result::{OpResult, ResultCode};

/// Delivers the outcome of an asynchronous step back to the coordinator.
pub trait CompletionSink: Send + Sync {
    /// Completes the in-flight step with `result`.
    fn complete(&self, result: OpResult);
}

/// The contract implemented by each update type.
///
/// Every method receives the step context; none may cache derived values
/// across calls, because the handle can change between them.
pub trait StepHandler: std::fmt::Debug + Send + Sync {
    /// Pure check against the installed criteria; consulted before download
    /// and at startup.
    fn is_installed(&self, ctx: &StepContext) -> OpResult;

    /// Fetches payloads into the sandbox. May return
    /// `DOWNLOAD_IN_PROGRESS` and complete through the sink.
    fn download(&self, ctx: &StepContext) -> OpResult;

    /// Stages the payloads onto the device.
    fn install(&self, ctx: &StepContext) -> OpResult;

    /// Commits the staged content. Cancelling apply reverses any partial
    /// bootloader flip.
    fn apply(&self, ctx: &StepContext) -> OpResult;

    /// Best-effort abort of whatever is currently running.
    fn cancel(&self, ctx: &StepContext) -> OpResult;

    /// Snapshots state needed to restore after a failed apply.
    fn backup(&self, _ctx: &StepContext) -> OpResult {
        OpResult::from_code(ResultCode::BACKUP_SUCCESS_UNSUPPORTED)
    }

    /// Rolls back to the last backup.
    fn restore(&self, _ctx: &StepContext) -> OpResult {
        OpResult::from_code(ResultCode::RESTORE_SUCCESS_UNSUPPORTED)
    }
}
