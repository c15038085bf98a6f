// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cross-thread execution flags shared between the coordinator and workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Flags a step handler's worker thread and the coordinator both observe.
///
/// All clones share state. The coordinator sets `cancel_requested` under its
/// lock; workers poll it at their checkpoints without taking the lock.
/// Handlers set the reboot/restart requests from worker threads; the
/// coordinator reads them in the completion callback.
#[derive(Clone, Debug, Default)]
pub struct ExecSignals {
    inner: Arc<Flags>,
}

#[derive(Debug, Default)]
struct Flags {
    cancel_requested: AtomicBool,
    reboot_requested: AtomicBool,
    immediate_reboot_requested: AtomicBool,
    agent_restart_requested: AtomicBool,
    immediate_agent_restart_requested: AtomicBool,
}

impl ExecSignals {
    /// Fresh signals with nothing requested.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks or clears the cooperative cancel request.
    pub fn set_cancel_requested(&self, value: bool) {
        self.inner.cancel_requested.store(value, Ordering::SeqCst);
    }

    /// Polled by handlers at their checkpoints.
    #[must_use]
    pub fn cancel_requested(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::SeqCst)
    }

    /// Requests a deferred system reboot after the current step.
    pub fn request_reboot(&self) {
        self.inner.reboot_requested.store(true, Ordering::SeqCst);
    }

    /// Requests an immediate system reboot.
    pub fn request_immediate_reboot(&self) {
        self.inner
            .immediate_reboot_requested
            .store(true, Ordering::SeqCst);
    }

    /// Requests a deferred agent restart after the current step.
    pub fn request_agent_restart(&self) {
        self.inner.agent_restart_requested.store(true, Ordering::SeqCst);
    }

    /// Requests an immediate agent restart.
    pub fn request_immediate_agent_restart(&self) {
        self.inner
            .immediate_agent_restart_requested
            .store(true, Ordering::SeqCst);
    }

    /// `true` when any reboot request (deferred or immediate) is pending.
    #[must_use]
    pub fn reboot_requested(&self) -> bool {
        self.inner.reboot_requested.load(Ordering::SeqCst)
            || self.inner.immediate_reboot_requested.load(Ordering::SeqCst)
    }

    /// `true` when any agent-restart request is pending.
    #[must_use]
    pub fn agent_restart_requested(&self) -> bool {
        self.inner.agent_restart_requested.load(Ordering::SeqCst)
            || self
                .inner
                .immediate_agent_restart_requested
                .load(Ordering::SeqCst)
    }

    /// Clears everything; used when a handle is recycled for a retry or
    /// replacement.
    pub fn reset(&self) {
        self.inner.cancel_requested.store(false, Ordering::SeqCst);
        self.inner.reboot_requested.store(false, Ordering::SeqCst);
        self.inner
            .immediate_reboot_requested
            .store(false, Ordering::SeqCst);
        self.inner.agent_restart_requested.store(false, Ordering::SeqCst);
        self.inner
            .immediate_agent_restart_requested
            .store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let a = ExecSignals::new();
        let b = a.clone();
        a.set_cancel_requested(true);
        assert!(b.cancel_requested());
        b.set_cancel_requested(false);
        assert!(!a.cancel_requested());
    }

    #[test]
    fn reboot_covers_deferred_and_immediate() {
        let s = ExecSignals::new();
        assert!(!s.reboot_requested());
        s.request_immediate_reboot();
        assert!(s.reboot_requested());

        let s = ExecSignals::new();
        s.request_reboot();
        assert!(s.reboot_requested());
        assert!(!s.agent_restart_requested());
    }

    #[test]
    fn reset_clears_everything() {
        let s = ExecSignals::new();
        s.set_cancel_requested(true);
        s.request_reboot();
        s.request_immediate_agent_restart();
        s.reset();
        assert!(!s.cancel_requested());
        assert!(!s.reboot_requested());
        assert!(!s.agent_restart_requested());
    }
}
