// SPDX-License-Identifier: MIT OR Apache-2.0
//! Delta pre-download hook.
//!
//! A target file entry may list *related files*: deltas against prior
//! versions the device might still hold in the source-update cache. Deltas
//! are far smaller than full payloads, so before the coordinator downloads a
//! target in full, this hook tries every related file in order:
//!
//! 1. look the source up in the cache by `(provider, sourceHash, sourceAlg)`;
//! 2. download the delta into the sandbox;
//! 3. run the delta processor to reconstruct the target.
//!
//! One success skips the full download. Exhausting every related file is
//! *not* a failure: the hook asks for a normal full download instead.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use ota_cache::{CacheLookup, CachePayload, SourceUpdateCache};
use ota_handlers::{PayloadFile, PreDownloadHook, StepContext};
use ota_platform::{ContentDownloader, log_download_progress};
use ota_result::{OpResult, ResultCode, codes};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// The `downloadHandler.id` this hook registers under.
pub const DELTA_HANDLER_ID: &str = "microsoft/delta:1";

/// Reconstructs a target file from a source file and a delta.
pub trait DeltaProcessor: Send + Sync {
    /// Produces `target` from `source` + `delta`.
    fn apply(&self, source: &Path, delta: &Path, target: &Path) -> Result<(), DeltaProcessError>;
}

/// Failure of one delta application.
#[derive(Debug, Error)]
#[error("delta processing failed: {reason}")]
pub struct DeltaProcessError {
    /// Short diagnostic from the processor.
    pub reason: String,
}

/// The delta pre-download hook.
///
/// Collaborators are constructor-injected: the cache it consults, the
/// downloader it fetches deltas with, and the native processor that applies
/// them.
pub struct DeltaDownloadHandler {
    cache: SourceUpdateCache,
    downloader: Arc<dyn ContentDownloader>,
    processor: Arc<dyn DeltaProcessor>,
}

impl DeltaDownloadHandler {
    /// Creates the hook over its collaborators.
    #[must_use]
    pub fn new(
        cache: SourceUpdateCache,
        downloader: Arc<dyn ContentDownloader>,
        processor: Arc<dyn DeltaProcessor>,
    ) -> Self {
        Self {
            cache,
            downloader,
            processor,
        }
    }

    /// Tries one related file; `Ok` means the target now exists.
    fn try_related_file(
        &self,
        ctx: &StepContext,
        related_id: &str,
        related: &ota_core::RelatedFile,
        provider: &str,
        target: &Path,
    ) -> Result<(), i32> {
        let (Some(source_hash), Some(source_alg)) =
            (related.source_hash(), related.source_hash_algorithm())
        else {
            return Err(codes::DOWNLOAD_HANDLER_MISSING_SOURCE_HASH);
        };

        let source_path = match self.cache.lookup(provider, source_hash, source_alg) {
            CacheLookup::Hit(path) => path,
            CacheLookup::Miss => return Err(codes::DOWNLOAD_HANDLER_SOURCE_CACHE_MISS),
        };

        let work_folder = ctx
            .work_folder
            .as_deref()
            .ok_or(codes::DOWNLOAD_HANDLER_BAD_ARGS)?;
        let delta_path = work_folder.join(&related.file_name);

        // Related files resolve their URL through the same goal-state map
        // as payloads.
        let url = ctx
            .file_urls
            .get(related_id)
            .cloned()
            .ok_or(codes::DOWNLOAD_HANDLER_DELTA_DOWNLOAD)?;

        let delta_entity = ota_core::FileEntity {
            file_name: related.file_name.clone(),
            size_in_bytes: related.size_in_bytes,
            hashes: related.hashes.clone(),
            ..ota_core::FileEntity::default()
        };

        let workflow_id = ctx.workflow_id.clone();
        let related_label = related_id.to_string();
        let download = self.downloader.download(
            &delta_entity,
            &url,
            &delta_path,
            &move |progress| log_download_progress(&workflow_id, &related_label, progress),
        );
        if download.is_failure() {
            return Err(if download.extended != 0 {
                download.extended
            } else {
                codes::DOWNLOAD_HANDLER_DELTA_DOWNLOAD
            });
        }

        self.processor
            .apply(&source_path, &delta_path, target)
            .map_err(|err| {
                warn!(%err, "delta processor failed");
                codes::DOWNLOAD_HANDLER_DELTA_PROCESS
            })
    }
}

impl PreDownloadHook for DeltaDownloadHandler {
    fn produce_payload(&self, ctx: &StepContext, file: &PayloadFile, target: &Path) -> OpResult {
        let Some(related_files) = file.entity.related_files.as_ref().filter(|r| !r.is_empty())
        else {
            return OpResult::failure(codes::DOWNLOAD_HANDLER_BAD_ARGS);
        };
        let Some(provider) = ctx.provider.as_deref() else {
            return OpResult::failure(codes::DOWNLOAD_HANDLER_BAD_ARGS);
        };

        for (related_id, related) in related_files {
            if related.properties.is_empty() {
                return OpResult::failure(codes::DOWNLOAD_HANDLER_RELATED_FILE_NO_PROPERTIES);
            }

            match self.try_related_file(ctx, related_id, related, provider, target) {
                Ok(()) => {
                    info!(file_id = %file.id, related_id = %related_id,
                          "target reconstructed from delta");
                    return OpResult::from_code(
                        ResultCode::DOWNLOAD_HANDLER_SUCCESS_SKIP_DOWNLOAD,
                    );
                }
                Err(erc) if erc == codes::DOWNLOAD_HANDLER_SOURCE_CACHE_MISS => {
                    warn!(file_id = %file.id, related_id = %related_id, "source update cache miss");
                    ctx.record_diagnostic(erc);
                }
                Err(erc) => {
                    warn!(file_id = %file.id, related_id = %related_id, erc,
                          "delta attempt failed; trying next related file");
                    ctx.record_diagnostic(erc);
                }
            }
        }

        // Every related file failed: fall back to the full download. This is
        // a success code by contract.
        OpResult::from_code(ResultCode::DOWNLOAD_HANDLER_REQUIRED_FULL_DOWNLOAD)
    }

    fn on_update_workflow_completed(&self, ctx: &StepContext) -> OpResult {
        let Some(provider) = ctx.provider.as_deref() else {
            return OpResult::failure(codes::DOWNLOAD_HANDLER_BAD_ARGS);
        };

        let payloads: Vec<CachePayload> = ctx
            .files
            .iter()
            .enumerate()
            .filter_map(|(index, file)| {
                let (alg, hash) = file.entity.primary_hash()?;
                Some(CachePayload {
                    file_index: index,
                    sandbox_path: ctx.payload_path(file)?,
                    hash_algorithm: alg.to_string(),
                    hash: hash.to_string(),
                })
            })
            .collect();

        match self
            .cache
            .move_from_sandbox(provider, &payloads, &ctx.recorded_inodes())
        {
            Ok(recorded) => {
                for (index, inode) in recorded {
                    ctx.record_file_inode(index, inode);
                }
                OpResult::success()
            }
            Err(err) => {
                warn!(%err, "retaining payloads in the source-update cache failed");
                OpResult::failure(err.erc())
            }
        }
    }
}
