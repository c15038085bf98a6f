// SPDX-License-Identifier: MIT OR Apache-2.0
//! Handle-construction errors.

use ota_core::CoreError;
use ota_jws::JwsError;
use ota_result::{OpResult, codes};
use thiserror::Error;

/// Errors raised while building a workflow handle from a goal state.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The goal state or manifest failed to parse.
    #[error(transparent)]
    Core(#[from] CoreError),
    /// The manifest envelope failed trust validation.
    #[error(transparent)]
    Jws(#[from] JwsError),
    /// Signature validation was requested but the goal state carries no
    /// `updateManifestSignature`.
    #[error("goal state is missing `updateManifestSignature`")]
    MissingSignature,
    /// The handle has no inline step at the requested index.
    #[error("no instruction step at index {0}")]
    NoSuchStep(usize),
}

impl WorkflowError {
    /// The extended result code reported for this error.
    #[must_use]
    pub fn erc(&self) -> i32 {
        match self {
            Self::Core(e) => e.erc(),
            Self::Jws(e) => e.erc(),
            Self::MissingSignature => codes::INGRESS_MISSING_FIELD,
            Self::NoSuchStep(_) => codes::INGRESS_MANIFEST_PARSE,
        }
    }

    /// The failure result carried to the orchestrator.
    #[must_use]
    pub fn to_result(&self) -> OpResult {
        OpResult::failure(self.erc())
    }
}
