// SPDX-License-Identifier: MIT OR Apache-2.0
//! External boundary contracts for the update agent.
//!
//! The coordinator never talks to a transport, a downloader, or the OS
//! directly; it goes through the traits here. Production wires in the real
//! twin client and platform shells, tests wire in recorders.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod progress;
mod report;
mod sandbox;

pub use progress::{DownloadProgress, DownloadProgressState, log_download_progress};
pub use report::{AgentReport, StateReporter};
pub use sandbox::FsSandboxPlatform;

use ota_core::FileEntity;
use ota_result::OpResult;
use std::path::Path;

/// Fetches one payload file into the sandbox.
///
/// Implementations stream progress through the callback and honor
/// cancellation at their own checkpoints.
pub trait ContentDownloader: Send + Sync {
    /// Downloads `file` from `url` to `target`.
    fn download(
        &self,
        file: &FileEntity,
        url: &str,
        target: &Path,
        progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> OpResult;
}

/// Platform hooks the coordinator invokes around a deployment.
pub trait PlatformOps: Send + Sync {
    /// Creates the per-deployment sandbox folder.
    fn sandbox_create(&self, workflow_id: &str, folder: &Path) -> OpResult;

    /// Destroys the sandbox when a workflow reaches terminal idle.
    fn sandbox_destroy(&self, workflow_id: &str, folder: &Path);

    /// Reboots the device. Returns `0` on successful initiation.
    fn reboot(&self) -> i32;

    /// Restarts the agent process. Returns `0` on successful initiation.
    fn restart_agent(&self) -> i32;

    /// Notification that the agent is idle and ready for new work.
    fn on_idle(&self, workflow_id: &str);

    /// Cooperative-multitasking tick, called regularly by the hosting
    /// service while work is pending.
    fn do_work(&self) {}
}
