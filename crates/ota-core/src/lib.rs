// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stable contract types for the update agent.
//!
//! Everything the orchestrator and the agent agree on lives here: the goal
//! state envelope, the update manifest, and the lifecycle enums with their
//! wire codes. The coordinator, handlers, and cache all consume these types;
//! none of them re-parse raw JSON.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod goal_state;
mod lifecycle;
mod manifest;

pub use error::CoreError;
pub use goal_state::{GoalState, WorkflowSection, verify_manifest_digest};
pub use lifecycle::{CancellationType, State, UpdateAction, WorkflowStep};
pub use manifest::{
    DownloadHandlerRef, FileEntity, InstructionStep, Instructions, RelatedFile, UpdateId,
    UpdateManifest, UpdateType,
};
