// SPDX-License-Identifier: MIT OR Apache-2.0
//! Result model shared by every layer of the update agent.
//!
//! Each operation yields an [`OpResult`]: a `(result code, extended result
//! code)` pair. The result code encodes the outcome *class* (success,
//! in-progress, or a specific failure kind) while the extended code carries a
//! sub-system-specific diagnostic built from a [`Facility`] tag and a local
//! value. Codes are stable: orchestrator-side tooling keys off the numeric
//! values, so they must not change across releases.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ResultCode
// ---------------------------------------------------------------------------

/// Outcome class of an agent operation.
///
/// Positive values are successes, zero and negative values are failures.
/// Each lifecycle step owns a numeric band so a reported code identifies both
/// the step and the outcome (e.g. `501` is "download in progress").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultCode(pub i32);

impl ResultCode {
    /// Generic failure.
    pub const FAILURE: Self = Self(0);
    /// The operation was cancelled before it completed.
    pub const FAILURE_CANCELLED: Self = Self(-1);
    /// Generic success.
    pub const SUCCESS: Self = Self(1);
    /// Success, but the requested item was not present.
    pub const SUCCESS_CACHE_MISS: Self = Self(2);

    /// Idle acknowledged.
    pub const IDLE_SUCCESS: Self = Self(200);
    /// Deployment accepted and now in progress.
    pub const DEPLOYMENT_IN_PROGRESS_SUCCESS: Self = Self(300);

    /// Download completed.
    pub const DOWNLOAD_SUCCESS: Self = Self(500);
    /// Download continues on a worker; completion arrives via callback.
    pub const DOWNLOAD_IN_PROGRESS: Self = Self(501);
    /// Download skipped: the payload already exists in the sandbox.
    pub const DOWNLOAD_SKIPPED_FILE_EXISTS: Self = Self(502);
    /// Download skipped: the update is already installed.
    pub const DOWNLOAD_SKIPPED_UPDATE_ALREADY_INSTALLED: Self = Self(503);
    /// Download skipped: no components match the update compatibility.
    pub const DOWNLOAD_SKIPPED_NO_MATCHING_COMPONENTS: Self = Self(504);
    /// Pre-download hook produced the payload; skip the full download.
    pub const DOWNLOAD_HANDLER_SUCCESS_SKIP_DOWNLOAD: Self = Self(520);
    /// Pre-download hook could not produce the payload; fall back to a
    /// full download. This is a success code by design.
    pub const DOWNLOAD_HANDLER_REQUIRED_FULL_DOWNLOAD: Self = Self(521);

    /// Install completed.
    pub const INSTALL_SUCCESS: Self = Self(600);
    /// Install continues on a worker.
    pub const INSTALL_IN_PROGRESS: Self = Self(601);
    /// Install skipped: content already installed.
    pub const INSTALL_SKIPPED_UPDATE_ALREADY_INSTALLED: Self = Self(603);
    /// Install succeeded and a system reboot is required to finish.
    pub const INSTALL_REQUIRED_REBOOT: Self = Self(605);
    /// Install succeeded and an immediate system reboot is required.
    pub const INSTALL_REQUIRED_IMMEDIATE_REBOOT: Self = Self(606);
    /// Install succeeded and an agent restart is required to finish.
    pub const INSTALL_REQUIRED_AGENT_RESTART: Self = Self(607);
    /// Install succeeded and an immediate agent restart is required.
    pub const INSTALL_REQUIRED_IMMEDIATE_AGENT_RESTART: Self = Self(608);

    /// Apply completed; the deployment is done.
    pub const APPLY_SUCCESS: Self = Self(700);
    /// Apply continues on a worker.
    pub const APPLY_IN_PROGRESS: Self = Self(701);
    /// Apply succeeded and a system reboot is required to finish.
    pub const APPLY_REQUIRED_REBOOT: Self = Self(705);
    /// Apply succeeded and an immediate system reboot is required.
    pub const APPLY_REQUIRED_IMMEDIATE_REBOOT: Self = Self(706);
    /// Apply succeeded and an agent restart is required to finish.
    pub const APPLY_REQUIRED_AGENT_RESTART: Self = Self(707);
    /// Apply succeeded and an immediate agent restart is required.
    pub const APPLY_REQUIRED_IMMEDIATE_AGENT_RESTART: Self = Self(708);

    /// Backup completed.
    pub const BACKUP_SUCCESS: Self = Self(800);
    /// Handler does not support backup; treated as success.
    pub const BACKUP_SUCCESS_UNSUPPORTED: Self = Self(801);

    /// The expected update is installed.
    pub const IS_INSTALLED_INSTALLED: Self = Self(900);
    /// The expected update is not installed.
    pub const IS_INSTALLED_NOT_INSTALLED: Self = Self(901);

    /// Restore completed.
    pub const RESTORE_SUCCESS: Self = Self(1000);
    /// Handler does not support restore; treated as success.
    pub const RESTORE_SUCCESS_UNSUPPORTED: Self = Self(1001);

    /// Returns `true` for any success-class code (strictly positive).
    #[must_use]
    pub fn is_success(self) -> bool {
        self.0 > 0
    }

    /// Returns `true` for any failure-class code (zero or negative).
    #[must_use]
    pub fn is_failure(self) -> bool {
        !self.is_success()
    }

    /// Returns `true` when the code signals an asynchronous operation whose
    /// completion will arrive later via the work-completion callback.
    #[must_use]
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            Self::DOWNLOAD_IN_PROGRESS | Self::INSTALL_IN_PROGRESS | Self::APPLY_IN_PROGRESS
        )
    }

    /// Returns `true` when the code asks for a system reboot (deferred or
    /// immediate) after install or apply.
    #[must_use]
    pub fn requests_reboot(self) -> bool {
        matches!(
            self,
            Self::INSTALL_REQUIRED_REBOOT
                | Self::INSTALL_REQUIRED_IMMEDIATE_REBOOT
                | Self::APPLY_REQUIRED_REBOOT
                | Self::APPLY_REQUIRED_IMMEDIATE_REBOOT
        )
    }

    /// Returns `true` when the code asks for an agent restart (deferred or
    /// immediate) after install or apply.
    #[must_use]
    pub fn requests_agent_restart(self) -> bool {
        matches!(
            self,
            Self::INSTALL_REQUIRED_AGENT_RESTART
                | Self::INSTALL_REQUIRED_IMMEDIATE_AGENT_RESTART
                | Self::APPLY_REQUIRED_AGENT_RESTART
                | Self::APPLY_REQUIRED_IMMEDIATE_AGENT_RESTART
        )
    }

    /// Raw numeric value as reported to the orchestrator.
    #[must_use]
    pub fn value(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Facility / extended result codes
// ---------------------------------------------------------------------------

/// Sub-system that produced an extended result code.
///
/// Encoded in the top four bits of the extended code so a raw diagnostic
/// number can always be traced back to its origin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Facility {
    /// Goal-state ingress and payload parsing.
    Ingress = 1,
    /// Root-key and manifest signature trust chain.
    Trust = 2,
    /// Step-handler execution.
    Handler = 3,
    /// Platform callbacks (sandbox, reboot, restart).
    Platform = 4,
    /// Source-update cache.
    Cache = 5,
    /// Pre-download (delta) handler.
    DownloadHandler = 6,
    /// Agent configuration.
    Config = 7,
    /// Deployment coordinator internals.
    Coordinator = 8,
    /// Anything that does not fit the above.
    Internal = 15,
}

impl Facility {
    /// Recover the facility from a raw extended result code.
    #[must_use]
    pub fn from_erc(erc: i32) -> Option<Self> {
        match ((erc as u32) >> 28) & 0xF {
            1 => Some(Self::Ingress),
            2 => Some(Self::Trust),
            3 => Some(Self::Handler),
            4 => Some(Self::Platform),
            5 => Some(Self::Cache),
            6 => Some(Self::DownloadHandler),
            7 => Some(Self::Config),
            8 => Some(Self::Coordinator),
            15 => Some(Self::Internal),
            _ => None,
        }
    }
}

impl fmt::Display for Facility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ingress => "ingress",
            Self::Trust => "trust",
            Self::Handler => "handler",
            Self::Platform => "platform",
            Self::Cache => "cache",
            Self::DownloadHandler => "download_handler",
            Self::Config => "config",
            Self::Coordinator => "coordinator",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Builds an extended result code from a facility and a facility-local value.
///
/// The value is masked to 28 bits; the facility occupies the top nibble.
#[must_use]
pub const fn erc(facility: Facility, value: u32) -> i32 {
    (((facility as u32) << 28) | (value & 0x0FFF_FFFF)) as i32
}

/// Well-known extended result codes.
///
/// Grouped by facility. The orchestrator surfaces these verbatim, so each
/// distinct failure the workflow can report gets its own constant.
pub mod codes {
    use super::{Facility, erc};

    // -- Ingress --
    /// Goal-state JSON failed to parse.
    pub const INGRESS_GOAL_STATE_PARSE: i32 = erc(Facility::Ingress, 1);
    /// A required goal-state field is missing or has the wrong type.
    pub const INGRESS_MISSING_FIELD: i32 = erc(Facility::Ingress, 2);
    /// The embedded update manifest failed to parse.
    pub const INGRESS_MANIFEST_PARSE: i32 = erc(Facility::Ingress, 3);
    /// The update-type string is not `vendor/kind:version`.
    pub const INGRESS_BAD_UPDATE_TYPE: i32 = erc(Facility::Ingress, 4);
    /// The manifest version is outside the supported range.
    pub const INGRESS_UNSUPPORTED_MANIFEST_VERSION: i32 = erc(Facility::Ingress, 5);
    /// Base64URL content in the payload failed to decode.
    pub const INGRESS_BAD_BASE64: i32 = erc(Facility::Ingress, 6);

    // -- Trust --
    /// The manifest signature envelope has the wrong structure.
    pub const TRUST_BAD_STRUCTURE: i32 = erc(Facility::Trust, 1);
    /// The signing algorithm is not supported.
    pub const TRUST_UNSUPPORTED_ALG: i32 = erc(Facility::Trust, 2);
    /// No root key matches the key identifier.
    pub const TRUST_UNKNOWN_KEY_ID: i32 = erc(Facility::Trust, 3);
    /// The referenced root key has been disabled.
    pub const TRUST_DISABLED_KEY_ID: i32 = erc(Facility::Trust, 4);
    /// A signature failed cryptographic verification.
    pub const TRUST_SIGNATURE_INVALID: i32 = erc(Facility::Trust, 5);
    /// A required signature is missing from the root-key package.
    pub const TRUST_MISSING_SIGNATURE: i32 = erc(Facility::Trust, 6);
    /// The root-key package failed to parse.
    pub const TRUST_PACKAGE_PARSE: i32 = erc(Facility::Trust, 7);
    /// The manifest hash does not match the signed digest.
    pub const TRUST_MANIFEST_HASH_MISMATCH: i32 = erc(Facility::Trust, 8);
    /// The embedded signing key has been disabled.
    pub const TRUST_DISABLED_SIGNING_KEY: i32 = erc(Facility::Trust, 9);

    // -- Handler --
    /// No step handler is registered for the update type.
    pub const HANDLER_UNKNOWN_UPDATE_TYPE: i32 = erc(Facility::Handler, 1);
    /// A handler exists for the vendor/kind but not this major version.
    pub const HANDLER_WRONG_VERSION: i32 = erc(Facility::Handler, 2);
    /// The handler reported an unspecified internal failure.
    pub const HANDLER_INTERNAL: i32 = erc(Facility::Handler, 3);

    // -- Platform --
    /// Sandbox creation failed.
    pub const PLATFORM_SANDBOX_CREATE: i32 = erc(Facility::Platform, 1);
    /// The system reboot call failed.
    pub const PLATFORM_REBOOT_FAILED: i32 = erc(Facility::Platform, 2);
    /// The agent restart call failed.
    pub const PLATFORM_RESTART_FAILED: i32 = erc(Facility::Platform, 3);

    // -- Cache --
    /// Could not derive a cache path for an entry.
    pub const CACHE_CREATE_PATH: i32 = erc(Facility::Cache, 1);
    /// Pre-move purge of the cache failed.
    pub const CACHE_PREPURGE: i32 = erc(Facility::Cache, 2);
    /// Moving a payload into the cache failed.
    pub const CACHE_MOVE_PAYLOAD: i32 = erc(Facility::Cache, 3);
    /// Post-move purge of the cache failed.
    pub const CACHE_POSTPURGE: i32 = erc(Facility::Cache, 4);
    /// Copy fallback after a failed rename also failed.
    pub const CACHE_COPY_FALLBACK: i32 = erc(Facility::Cache, 5);

    // -- Download handler --
    /// The pre-download hook was invoked with unusable metadata.
    pub const DOWNLOAD_HANDLER_BAD_ARGS: i32 = erc(Facility::DownloadHandler, 1);
    /// A related file carries no properties.
    pub const DOWNLOAD_HANDLER_RELATED_FILE_NO_PROPERTIES: i32 = erc(Facility::DownloadHandler, 2);
    /// A related file is missing the source-hash properties.
    pub const DOWNLOAD_HANDLER_MISSING_SOURCE_HASH: i32 = erc(Facility::DownloadHandler, 3);
    /// The source update was not in the cache.
    pub const DOWNLOAD_HANDLER_SOURCE_CACHE_MISS: i32 = erc(Facility::DownloadHandler, 4);
    /// Downloading the delta payload failed.
    pub const DOWNLOAD_HANDLER_DELTA_DOWNLOAD: i32 = erc(Facility::DownloadHandler, 5);
    /// The delta processor failed to reconstruct the target.
    pub const DOWNLOAD_HANDLER_DELTA_PROCESS: i32 = erc(Facility::DownloadHandler, 6);

    // -- Coordinator --
    /// A workflow step ran while the agent was in an unexpected state.
    pub const COORDINATOR_UNEXPECTED_STATE: i32 = erc(Facility::Coordinator, 1);
    /// The workflow step has no dispatch entry.
    pub const COORDINATOR_UNKNOWN_STEP: i32 = erc(Facility::Coordinator, 2);
    /// Reporting to the orchestrator failed at the transport layer.
    pub const COORDINATOR_REPORT_FAILED: i32 = erc(Facility::Coordinator, 3);

    // -- Config --
    /// The configuration file failed to load or validate.
    pub const CONFIG_INVALID: i32 = erc(Facility::Config, 1);
}

// ---------------------------------------------------------------------------
// OpResult
// ---------------------------------------------------------------------------

/// The `(resultCode, extendedResultCode)` pair carried by every operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpResult {
    /// Outcome class.
    #[serde(rename = "resultCode")]
    pub code: ResultCode,
    /// Sub-system diagnostic, zero when unset.
    #[serde(rename = "extendedResultCode")]
    pub extended: i32,
}

impl Default for ResultCode {
    fn default() -> Self {
        Self::FAILURE
    }
}

impl OpResult {
    /// Generic success with no diagnostic.
    #[must_use]
    pub fn success() -> Self {
        Self::from_code(ResultCode::SUCCESS)
    }

    /// Success with a specific success-class code.
    #[must_use]
    pub fn from_code(code: ResultCode) -> Self {
        Self { code, extended: 0 }
    }

    /// Generic failure carrying an extended diagnostic.
    #[must_use]
    pub fn failure(extended: i32) -> Self {
        Self {
            code: ResultCode::FAILURE,
            extended,
        }
    }

    /// Cancellation outcome.
    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            code: ResultCode::FAILURE_CANCELLED,
            extended: 0,
        }
    }

    /// A failure-class result with an explicit code and diagnostic.
    #[must_use]
    pub fn failure_with_code(code: ResultCode, extended: i32) -> Self {
        Self { code, extended }
    }

    /// See [`ResultCode::is_success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// See [`ResultCode::is_failure`].
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.code.is_failure()
    }

    /// See [`ResultCode::is_in_progress`].
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.code.is_in_progress()
    }
}

impl fmt::Display for OpResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (erc {:#010x})", self.code, self.extended)
    }
}
