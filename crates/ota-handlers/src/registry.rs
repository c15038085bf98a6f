// SPDX-License-Identifier: MIT OR Apache-2.0
//! Step-handler registry keyed by `(vendor, kind, major)`.

use crate::StepHandler;
use ota_core::UpdateType;
use ota_result::codes;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Handler resolution failures, each with its own extended code so the
/// orchestrator can tell "no such update type" from "wrong contract
/// version".
#[derive(Debug, Error)]
pub enum HandlerError {
    /// No handler is registered for the vendor/kind at all.
    #[error("no step handler registered for `{0}`")]
    UnknownUpdateType(String),
    /// The vendor/kind exists but not at this major version.
    #[error("step handler for `{vendor}/{kind}` does not support version {version}")]
    WrongVersion {
        /// Vendor segment of the requested type.
        vendor: String,
        /// Kind segment of the requested type.
        kind: String,
        /// Requested major version.
        version: u32,
    },
}

impl HandlerError {
    /// The extended result code reported for this error.
    #[must_use]
    pub fn erc(&self) -> i32 {
        match self {
            Self::UnknownUpdateType(_) => codes::HANDLER_UNKNOWN_UPDATE_TYPE,
            Self::WrongVersion { .. } => codes::HANDLER_WRONG_VERSION,
        }
    }
}

/// A typed registry of step handlers.
///
/// Registration replaces any previous entry for the same key, so tests can
/// override built-ins.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(String, String, u32), Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for the given update type.
    pub fn register(&mut self, update_type: &UpdateType, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(
            (
                update_type.vendor.clone(),
                update_type.kind.clone(),
                update_type.version,
            ),
            handler,
        );
    }

    /// Resolves the handler for an update type.
    pub fn resolve(&self, update_type: &UpdateType) -> Result<Arc<dyn StepHandler>, HandlerError> {
        if let Some(handler) = self.handlers.get(&(
            update_type.vendor.clone(),
            update_type.kind.clone(),
            update_type.version,
        )) {
            return Ok(Arc::clone(handler));
        }

        let version_mismatch = self
            .handlers
            .keys()
            .any(|(v, k, _)| v == &update_type.vendor && k == &update_type.kind);
        if version_mismatch {
            Err(HandlerError::WrongVersion {
                vendor: update_type.vendor.clone(),
                kind: update_type.kind.clone(),
                version: update_type.version,
            })
        } else {
            Err(HandlerError::UnknownUpdateType(update_type.to_string()))
        }
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
