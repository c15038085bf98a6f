// SPDX-License-Identifier: MIT OR Apache-2.0
//! Download progress reporting.

use std::fmt;
use tracing::info;

/// Phase of a payload download.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadProgressState {
    /// Queued but not yet transferring.
    NotStarted,
    /// Bytes are flowing.
    InProgress,
    /// Transfer finished and verified.
    Completed,
    /// Transfer stopped on a cancel request.
    Cancelled,
    /// Transfer failed.
    Error,
}

impl fmt::Display for DownloadProgressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "NotStarted",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
            Self::Error => "Error",
        };
        f.write_str(s)
    }
}

/// A progress sample for one file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Current phase.
    pub state: DownloadProgressState,
    /// Bytes transferred so far.
    pub bytes_transferred: u64,
    /// Total expected bytes, zero when unknown.
    pub bytes_total: u64,
}

/// The default progress callback: logs each sample.
pub fn log_download_progress(workflow_id: &str, file_id: &str, progress: DownloadProgress) {
    info!(
        workflow_id,
        file_id,
        state = %progress.state,
        bytes = progress.bytes_transferred,
        total = progress.bytes_total,
        "download progress"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_display_names() {
        assert_eq!(DownloadProgressState::NotStarted.to_string(), "NotStarted");
        assert_eq!(DownloadProgressState::Cancelled.to_string(), "Cancelled");
    }
}
