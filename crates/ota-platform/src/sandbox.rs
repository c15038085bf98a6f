// SPDX-License-Identifier: MIT OR Apache-2.0
//! Filesystem-backed default platform hooks.

use crate::PlatformOps;
use ota_result::{OpResult, codes};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Default [`PlatformOps`]: sandboxes are plain directories; reboot and
/// agent restart are deferred to the hosting service and report failure
/// when invoked directly.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsSandboxPlatform;

impl PlatformOps for FsSandboxPlatform {
    fn sandbox_create(&self, workflow_id: &str, folder: &Path) -> OpResult {
        match fs::create_dir_all(folder) {
            Ok(()) => {
                info!(workflow_id, folder = %folder.display(), "sandbox created");
                OpResult::success()
            }
            Err(err) => {
                warn!(workflow_id, folder = %folder.display(), %err, "sandbox create failed");
                OpResult::failure(codes::PLATFORM_SANDBOX_CREATE)
            }
        }
    }

    fn sandbox_destroy(&self, workflow_id: &str, folder: &Path) {
        if let Err(err) = fs::remove_dir_all(folder) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(workflow_id, folder = %folder.display(), %err, "sandbox destroy failed");
            }
            return;
        }
        info!(workflow_id, folder = %folder.display(), "sandbox destroyed");
    }

    fn reboot(&self) -> i32 {
        warn!("reboot requested but no reboot shell is wired in");
        -1
    }

    fn restart_agent(&self) -> i32 {
        warn!("agent restart requested but no restart shell is wired in");
        -1
    }

    fn on_idle(&self, workflow_id: &str) {
        info!(workflow_id, "agent idle");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_and_destroy_sandbox() {
        let dir = tempdir().unwrap();
        let sandbox = dir.path().join("downloads/wf-1");
        let platform = FsSandboxPlatform;

        assert!(platform.sandbox_create("wf-1", &sandbox).is_success());
        assert!(sandbox.is_dir());

        platform.sandbox_destroy("wf-1", &sandbox);
        assert!(!sandbox.exists());
    }

    #[test]
    fn destroy_of_missing_sandbox_is_quiet() {
        let platform = FsSandboxPlatform;
        platform.sandbox_destroy("wf-1", Path::new("/nonexistent/sandbox/path"));
    }

    #[test]
    fn reboot_and_restart_report_failure_by_default() {
        let platform = FsSandboxPlatform;
        assert_ne!(platform.reboot(), 0);
        assert_ne!(platform.restart_agent(), 0);
    }
}
