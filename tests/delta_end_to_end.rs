// SPDX-License-Identifier: MIT OR Apache-2.0
//! Two-deployment delta flow: the first deployment's payload is retained in
//! the source-update cache; the second reconstructs its payload from that
//! source plus a downloaded delta, skipping the full fetch.

use ota_agent::{
    AgentReport, ContentDownloader, Coordinator, CoordinatorBuilder, DownloadProgress,
    HandlerRegistry, OpResult, PlatformOps, PreDownloadRegistry, ResultCode, State, StateReporter,
    StepContext, StepHandler, UpdateType,
};
use ota_cache::{CacheLookup, SourceUpdateCache};
use ota_delta::{DELTA_HANDLER_ID, DeltaDownloadHandler, DeltaProcessError, DeltaProcessor};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

// -- doubles ----------------------------------------------------------------

#[derive(Default)]
struct TwinReporter {
    reports: Mutex<Vec<AgentReport>>,
}

impl StateReporter for TwinReporter {
    fn report_state_and_result(&self, report: &AgentReport) -> bool {
        self.reports.lock().unwrap().push(report.clone());
        true
    }
}

struct FsPlatform;

impl PlatformOps for FsPlatform {
    fn sandbox_create(&self, _workflow_id: &str, folder: &Path) -> OpResult {
        match std::fs::create_dir_all(folder) {
            Ok(()) => OpResult::success(),
            Err(_) => OpResult::failure(1),
        }
    }
    fn sandbox_destroy(&self, _workflow_id: &str, folder: &Path) {
        let _ = std::fs::remove_dir_all(folder);
    }
    fn reboot(&self) -> i32 {
        -1
    }
    fn restart_agent(&self) -> i32 {
        -1
    }
    fn on_idle(&self, _workflow_id: &str) {}
}

/// Serves canned bytes per URL and records every fetch.
struct MapDownloader {
    content: BTreeMap<String, Vec<u8>>,
    fetched: Mutex<Vec<String>>,
}

impl ContentDownloader for MapDownloader {
    fn download(
        &self,
        _file: &ota_agent::FileEntity,
        url: &str,
        target: &Path,
        _progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> OpResult {
        self.fetched.lock().unwrap().push(url.to_string());
        match self.content.get(url) {
            Some(bytes) => {
                std::fs::write(target, bytes).unwrap();
                OpResult::from_code(ResultCode::DOWNLOAD_SUCCESS)
            }
            None => OpResult::failure(404),
        }
    }
}

/// Applies a delta by concatenating source and delta bytes.
struct ConcatProcessor;

impl DeltaProcessor for ConcatProcessor {
    fn apply(&self, source: &Path, delta: &Path, target: &Path) -> Result<(), DeltaProcessError> {
        let mut out = std::fs::read(source).map_err(|e| DeltaProcessError {
            reason: e.to_string(),
        })?;
        out.extend(std::fs::read(delta).map_err(|e| DeltaProcessError {
            reason: e.to_string(),
        })?);
        std::fs::write(target, out).map_err(|e| DeltaProcessError {
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

/// A real payload-fetching handler: download goes through the shared helper
/// (and therefore through pre-download hooks); install/apply are trivial.
struct PayloadHandler {
    downloader: Arc<dyn ContentDownloader>,
    hooks: PreDownloadRegistry,
}

impl std::fmt::Debug for PayloadHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadHandler").finish_non_exhaustive()
    }
}

impl StepHandler for PayloadHandler {
    fn is_installed(&self, _ctx: &StepContext) -> OpResult {
        OpResult::from_code(ResultCode::IS_INSTALLED_NOT_INSTALLED)
    }
    fn download(&self, ctx: &StepContext) -> OpResult {
        ota_handlers::download_payloads(ctx, self.downloader.as_ref(), &self.hooks)
    }
    fn install(&self, _ctx: &StepContext) -> OpResult {
        OpResult::from_code(ResultCode::INSTALL_SUCCESS)
    }
    fn apply(&self, _ctx: &StepContext) -> OpResult {
        OpResult::from_code(ResultCode::APPLY_SUCCESS)
    }
    fn cancel(&self, _ctx: &StepContext) -> OpResult {
        OpResult::success()
    }
}

// -- fixtures ---------------------------------------------------------------

/// Goal state whose single payload opts into the delta download handler.
fn goal_state(
    id: &str,
    version: &str,
    payload_hash: &str,
    source_hash: Option<&str>,
    urls: &BTreeMap<String, String>,
) -> String {
    let mut file = serde_json::json!({
        "fileName": "image.swu",
        "sizeInBytes": 8,
        "hashes": { "sha256": payload_hash },
        "downloadHandler": { "id": DELTA_HANDLER_ID }
    });
    if let Some(source_hash) = source_hash {
        file["relatedFiles"] = serde_json::json!({
            "d1": {
                "fileName": "image.delta",
                "sizeInBytes": 4,
                "hashes": { "sha256": "ZGVsdGE=" },
                "properties": {
                    "microsoft.sourceFileHash": source_hash,
                    "microsoft.sourceFileHashAlgorithm": "sha256"
                }
            }
        });
    }

    let manifest = serde_json::json!({
        "manifestVersion": "2",
        "updateId": { "provider": "contoso", "name": "camera", "version": version },
        "updateType": "contoso/imaging:1",
        "installedCriteria": version,
        "files": { "f1": file }
    })
    .to_string();

    serde_json::json!({
        "workflow": { "id": id, "action": 3 },
        "updateManifest": manifest,
        "fileUrls": urls
    })
    .to_string()
}

fn build_rig(
    root: &Path,
    downloader: Arc<MapDownloader>,
) -> (Coordinator, Arc<TwinReporter>, SourceUpdateCache) {
    let cache = SourceUpdateCache::new(root.join("sdc"));

    let mut hooks = PreDownloadRegistry::new();
    hooks.register(
        DELTA_HANDLER_ID,
        Arc::new(DeltaDownloadHandler::new(
            cache.clone(),
            Arc::clone(&downloader) as Arc<dyn ContentDownloader>,
            Arc::new(ConcatProcessor),
        )),
    );

    let mut registry = HandlerRegistry::new();
    registry.register(
        &UpdateType::parse("contoso/imaging:1").unwrap(),
        Arc::new(PayloadHandler {
            downloader: Arc::clone(&downloader) as Arc<dyn ContentDownloader>,
            hooks: hooks.clone(),
        }),
    );

    let reporter = Arc::new(TwinReporter::default());
    let coordinator = CoordinatorBuilder::new(
        root.join("downloads"),
        Arc::clone(&reporter) as Arc<dyn StateReporter>,
        Arc::new(FsPlatform) as Arc<dyn PlatformOps>,
        registry,
    )
    .with_hooks(hooks)
    .build();

    (coordinator, reporter, cache)
}

// -- the flow ---------------------------------------------------------------

#[test]
fn full_download_then_delta_reconstruction() {
    let tmp = tempfile::tempdir().unwrap();
    let v1_hash = "djFoYXNo";
    let v2_hash = "djJoYXNo";

    let urls_v1: BTreeMap<String, String> = BTreeMap::from([(
        "f1".to_string(),
        "http://u/image-v1.swu".to_string(),
    )]);
    let urls_v2: BTreeMap<String, String> = BTreeMap::from([
        ("f1".to_string(), "http://u/image-v2.swu".to_string()),
        ("d1".to_string(), "http://u/v1-to-v2.delta".to_string()),
    ]);

    let downloader = Arc::new(MapDownloader {
        content: BTreeMap::from([
            ("http://u/image-v1.swu".to_string(), b"V1IMAGE!".to_vec()),
            ("http://u/v1-to-v2.delta".to_string(), b"+dlt".to_vec()),
            // image-v2.swu intentionally absent: the delta path must win.
        ]),
        fetched: Mutex::new(Vec::new()),
    });

    let (coordinator, reporter, cache) = build_rig(tmp.path(), Arc::clone(&downloader));

    // Deployment 1: no usable source yet, so the hook falls back to a full
    // download; on completion the payload is retained in the cache.
    coordinator.handle_property_update(
        &goal_state("D1", "1.0", v1_hash, Some("bm9zcmM="), &urls_v1),
        false,
    );
    assert_eq!(
        reporter.reports.lock().unwrap().last().unwrap().state,
        State::Idle
    );
    assert!(matches!(
        cache.lookup("contoso", v1_hash, "sha256"),
        CacheLookup::Hit(_)
    ));
    assert_eq!(
        downloader.fetched.lock().unwrap().as_slice(),
        &["http://u/image-v1.swu"]
    );

    // Deployment 2: the related file names v1 as its source; the target is
    // reconstructed from cache + delta and the full image is never fetched.
    coordinator.handle_property_update(
        &goal_state("D2", "2.0", v2_hash, Some(v1_hash), &urls_v2),
        false,
    );
    let last = reporter.reports.lock().unwrap().last().unwrap().clone();
    assert_eq!(last.state, State::Idle);
    assert_eq!(last.installed_update_id.unwrap().version, "2.0");

    let fetched = downloader.fetched.lock().unwrap().clone();
    assert!(
        fetched.contains(&"http://u/v1-to-v2.delta".to_string()),
        "the delta is downloaded"
    );
    assert!(
        !fetched.contains(&"http://u/image-v2.swu".to_string()),
        "the full image download is skipped"
    );

    // The reconstructed v2 payload is itself retained for future deltas.
    match cache.lookup("contoso", v2_hash, "sha256") {
        CacheLookup::Hit(path) => {
            assert_eq!(std::fs::read(path).unwrap(), b"V1IMAGE!+dlt");
        }
        CacheLookup::Miss => panic!("v2 payload should be cached"),
    }
}
