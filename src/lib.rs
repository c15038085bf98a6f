// SPDX-License-Identifier: MIT OR Apache-2.0
//! Umbrella crate for the device-side update agent.
//!
//! Re-exports the pieces a hosting service wires together: the coordinator,
//! the handler contract, and the boundary traits. The individual `ota-*`
//! crates remain usable on their own.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub use ota_coordinator::{Coordinator, CoordinatorBuilder, CoordinatorSnapshot, retry_applicable};
pub use ota_core::{
    CancellationType, FileEntity, GoalState, State, UpdateAction, UpdateId, UpdateManifest,
    UpdateType, WorkflowStep,
};
pub use ota_handlers::{
    CompletionSink, HandlerRegistry, PreDownloadHook, PreDownloadRegistry, SimulatorHandler,
    SimulatorSpec, StepContext, StepHandler,
};
pub use ota_platform::{
    AgentReport, ContentDownloader, DownloadProgress, DownloadProgressState, FsSandboxPlatform,
    PlatformOps, StateReporter,
};
pub use ota_result::{Facility, OpResult, ResultCode};
pub use ota_workflow::{ExecSignals, WorkflowHandle};
