// SPDX-License-Identifier: MIT OR Apache-2.0
//! Payload download helper with pre-download hook routing.

use crate::context::{PayloadFile, StepContext};
use ota_platform::{ContentDownloader, log_download_progress};
use ota_result::{OpResult, ResultCode, codes};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A hook consulted before a payload's full download.
///
/// The canonical implementation reconstructs the payload from a cached prior
/// version plus a delta. Returning
/// [`ResultCode::DOWNLOAD_HANDLER_SUCCESS_SKIP_DOWNLOAD`] tells the caller
/// the payload already exists at the target path;
/// [`ResultCode::DOWNLOAD_HANDLER_REQUIRED_FULL_DOWNLOAD`] (also a success
/// code) asks for the normal full download.
pub trait PreDownloadHook: Send + Sync {
    /// Attempts to produce `file` at `target` without a full download.
    fn produce_payload(
        &self,
        ctx: &StepContext,
        file: &PayloadFile,
        target: &std::path::Path,
    ) -> OpResult;

    /// Called once when the deployment completes successfully, so the hook
    /// can retain artifacts for future use.
    fn on_update_workflow_completed(&self, _ctx: &StepContext) -> OpResult {
        OpResult::success()
    }
}

/// Pre-download hooks keyed by their `downloadHandler.id` string.
#[derive(Clone, Default)]
pub struct PreDownloadRegistry {
    hooks: HashMap<String, Arc<dyn PreDownloadHook>>,
}

impl PreDownloadRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook under its handler id (e.g. `microsoft/delta:1`).
    pub fn register(&mut self, id: impl Into<String>, hook: Arc<dyn PreDownloadHook>) {
        self.hooks.insert(id.into(), hook);
    }

    /// Looks up a hook by handler id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<dyn PreDownloadHook>> {
        self.hooks.get(id)
    }
}

/// Downloads every payload in the context into the sandbox.
///
/// Files whose manifest entry names a registered pre-download hook are
/// offered to that hook first; a `SuccessSkipDownload` outcome short-circuits
/// the fetch. Cancellation is checked between files.
pub fn download_payloads(
    ctx: &StepContext,
    downloader: &dyn ContentDownloader,
    hooks: &PreDownloadRegistry,
) -> OpResult {
    let Some(work_folder) = ctx.work_folder.as_deref() else {
        return OpResult::failure(codes::PLATFORM_SANDBOX_CREATE);
    };

    for file in &ctx.files {
        if ctx.signals.cancel_requested() {
            info!(workflow_id = %ctx.workflow_id, "download cancelled between payloads");
            return OpResult::cancelled();
        }

        let target = work_folder.join(&file.entity.file_name);

        if let Some(hook) = file
            .entity
            .download_handler
            .as_ref()
            .and_then(|h| hooks.get(&h.id))
        {
            let hook_result = hook.produce_payload(ctx, file, &target);
            if hook_result.code == ResultCode::DOWNLOAD_HANDLER_SUCCESS_SKIP_DOWNLOAD {
                debug!(file_id = %file.id, "pre-download hook produced payload; skipping fetch");
                continue;
            }
            if hook_result.is_failure() {
                return hook_result;
            }
            debug!(file_id = %file.id, "pre-download hook requested full download");
        }

        let Some(url) = file.url.as_deref() else {
            warn!(file_id = %file.id, "no download url for payload");
            return OpResult::failure(codes::INGRESS_MISSING_FIELD);
        };

        let workflow_id = ctx.workflow_id.clone();
        let file_id = file.id.clone();
        let result = downloader.download(&file.entity, url, &target, &move |progress| {
            log_download_progress(&workflow_id, &file_id, progress);
        });
        if result.is_failure() || result.is_in_progress() {
            return result;
        }
    }

    OpResult::from_code(ResultCode::DOWNLOAD_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CompletionSink;
    use ota_core::{DownloadHandlerRef, FileEntity};
    use ota_platform::DownloadProgress;
    use ota_workflow::ExecSignals;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    struct NullSink;
    impl CompletionSink for NullSink {
        fn complete(&self, _result: OpResult) {}
    }

    struct RecordingDownloader {
        fetched: Mutex<Vec<PathBuf>>,
        result: OpResult,
    }

    impl ContentDownloader for RecordingDownloader {
        fn download(
            &self,
            _file: &FileEntity,
            _url: &str,
            target: &Path,
            progress: &(dyn Fn(DownloadProgress) + Send + Sync),
        ) -> OpResult {
            progress(DownloadProgress {
                state: ota_platform::DownloadProgressState::Completed,
                bytes_transferred: 1,
                bytes_total: 1,
            });
            self.fetched.lock().unwrap().push(target.to_path_buf());
            self.result
        }
    }

    struct SkippingHook;
    impl PreDownloadHook for SkippingHook {
        fn produce_payload(
            &self,
            _ctx: &StepContext,
            _file: &PayloadFile,
            _target: &Path,
        ) -> OpResult {
            OpResult::from_code(ResultCode::DOWNLOAD_HANDLER_SUCCESS_SKIP_DOWNLOAD)
        }
    }

    fn ctx(files: Vec<PayloadFile>) -> StepContext {
        StepContext {
            workflow_id: "wf-dl".into(),
            update_type: None,
            installed_criteria: None,
            provider: Some("contoso".into()),
            work_folder: Some(PathBuf::from("/tmp/wf-dl")),
            files,
            file_urls: std::collections::BTreeMap::new(),
            selected_components: None,
            signals: ExecSignals::new(),
            inode_slots: std::sync::Arc::new(Mutex::new(Vec::new())),
            diagnostics: std::sync::Arc::new(Mutex::new(Vec::new())),
            completion: std::sync::Arc::new(NullSink),
        }
    }

    fn plain_file(id: &str, name: &str) -> PayloadFile {
        PayloadFile {
            id: id.into(),
            entity: FileEntity {
                file_name: name.into(),
                ..FileEntity::default()
            },
            url: Some(format!("http://u/{name}")),
        }
    }

    #[test]
    fn downloads_every_file() {
        let downloader = RecordingDownloader {
            fetched: Mutex::new(Vec::new()),
            result: OpResult::from_code(ResultCode::DOWNLOAD_SUCCESS),
        };
        let result = download_payloads(
            &ctx(vec![plain_file("f1", "a.bin"), plain_file("f2", "b.bin")]),
            &downloader,
            &PreDownloadRegistry::new(),
        );
        assert_eq!(result.code, ResultCode::DOWNLOAD_SUCCESS);
        assert_eq!(downloader.fetched.lock().unwrap().len(), 2);
    }

    #[test]
    fn hook_skip_bypasses_downloader() {
        let mut file = plain_file("f1", "a.bin");
        file.entity.download_handler = Some(DownloadHandlerRef {
            id: "microsoft/delta:1".into(),
        });

        let mut hooks = PreDownloadRegistry::new();
        hooks.register("microsoft/delta:1", std::sync::Arc::new(SkippingHook));

        let downloader = RecordingDownloader {
            fetched: Mutex::new(Vec::new()),
            result: OpResult::from_code(ResultCode::DOWNLOAD_SUCCESS),
        };
        let result = download_payloads(&ctx(vec![file]), &downloader, &hooks);
        assert!(result.is_success());
        assert!(downloader.fetched.lock().unwrap().is_empty());
    }

    #[test]
    fn cancellation_checkpoints_between_files() {
        let context = ctx(vec![plain_file("f1", "a.bin")]);
        context.signals.set_cancel_requested(true);
        let downloader = RecordingDownloader {
            fetched: Mutex::new(Vec::new()),
            result: OpResult::from_code(ResultCode::DOWNLOAD_SUCCESS),
        };
        let result = download_payloads(&context, &downloader, &PreDownloadRegistry::new());
        assert_eq!(result.code, ResultCode::FAILURE_CANCELLED);
        assert!(downloader.fetched.lock().unwrap().is_empty());
    }

    #[test]
    fn missing_url_fails() {
        let mut file = plain_file("f1", "a.bin");
        file.url = None;
        let downloader = RecordingDownloader {
            fetched: Mutex::new(Vec::new()),
            result: OpResult::from_code(ResultCode::DOWNLOAD_SUCCESS),
        };
        let result = download_payloads(&ctx(vec![file]), &downloader, &PreDownloadRegistry::new());
        assert!(result.is_failure());
    }

    #[test]
    fn downloader_failure_propagates() {
        let downloader = RecordingDownloader {
            fetched: Mutex::new(Vec::new()),
            result: OpResult::failure(7),
        };
        let result = download_payloads(
            &ctx(vec![plain_file("f1", "a.bin")]),
            &downloader,
            &PreDownloadRegistry::new(),
        );
        assert!(result.is_failure());
        assert_eq!(result.extended, 7);
    }
}
