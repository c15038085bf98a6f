// SPDX-License-Identifier: MIT OR Apache-2.0
//! The per-call step context handed to handlers.

use crate::CompletionSink;
use ota_core::{FileEntity, UpdateType};
use ota_workflow::{ExecSignals, WorkflowHandle};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// One payload file with its resolved download URL.
#[derive(Clone, Debug)]
pub struct PayloadFile {
    /// File id from the manifest file map.
    pub id: String,
    /// Manifest entry.
    pub entity: FileEntity,
    /// Download URL, when the goal state supplied one.
    pub url: Option<String>,
}

/// Everything a handler may consult during one step call.
///
/// The context is a snapshot taken under the coordinator lock; it owns its
/// data so a handler can move it onto a worker thread. Handlers observing
/// the live workflow do so only through [`StepContext::signals`].
#[derive(Clone)]
pub struct StepContext {
    /// Workflow id of the deployment being executed.
    pub workflow_id: String,
    /// Parsed update type, when the manifest carries one.
    pub update_type: Option<UpdateType>,
    /// Installed criteria for `is_installed` checks.
    pub installed_criteria: Option<String>,
    /// Provider of the update id, the cache namespace.
    pub provider: Option<String>,
    /// Sandbox folder, when assigned.
    pub work_folder: Option<PathBuf>,
    /// Payload files in manifest order.
    pub files: Vec<PayloadFile>,
    /// Full file-URL map from the goal state, including related files.
    pub file_urls: std::collections::BTreeMap<String, String>,
    /// Selected-components document for component-scoped updates.
    pub selected_components: Option<String>,
    /// Cross-thread flags shared with the coordinator.
    pub signals: ExecSignals,
    /// Shared inode slots; records flow straight onto the handle.
    pub inode_slots: Arc<Mutex<Vec<Option<u64>>>>,
    /// Shared sink for non-fatal diagnostic codes.
    pub diagnostics: Arc<Mutex<Vec<i32>>>,
    /// Outcome sink for asynchronous steps.
    pub completion: Arc<dyn CompletionSink>,
}

impl StepContext {
    /// Builds a context snapshot from a workflow handle.
    pub fn from_handle(handle: &WorkflowHandle, completion: Arc<dyn CompletionSink>) -> Self {
        let files = handle
            .files()
            .into_iter()
            .map(|(id, entity)| PayloadFile {
                id: id.to_string(),
                entity: entity.clone(),
                url: handle.file_url(id).map(str::to_string),
            })
            .collect();

        Self {
            workflow_id: handle.id().to_string(),
            update_type: handle.update_type().ok(),
            installed_criteria: handle.installed_criteria().map(str::to_string),
            provider: handle.expected_update_id().map(|u| u.provider.clone()),
            work_folder: handle.work_folder().map(PathBuf::from),
            files,
            file_urls: handle.file_urls().clone(),
            selected_components: handle.selected_components().map(str::to_string),
            signals: handle.signals().clone(),
            inode_slots: handle.file_inode_slots(),
            diagnostics: handle.diagnostics_sink(),
            completion,
        }
    }

    /// Sandbox path for one payload file.
    #[must_use]
    pub fn payload_path(&self, file: &PayloadFile) -> Option<PathBuf> {
        self.work_folder.as_ref().map(|w| w.join(&file.entity.file_name))
    }

    /// Records a non-fatal diagnostic on the owning workflow.
    pub fn record_diagnostic(&self, erc: i32) {
        self.diagnostics
            .lock()
            .expect("diagnostic lock poisoned")
            .push(erc);
    }

    /// Records a retained payload's cache inode on the owning workflow.
    pub fn record_file_inode(&self, file_index: usize, inode: u64) {
        let mut slots = self.inode_slots.lock().expect("inode lock poisoned");
        if let Some(slot) = slots.get_mut(file_index) {
            *slot = Some(inode);
        }
    }

    /// The inode set recorded so far.
    #[must_use]
    pub fn recorded_inodes(&self) -> std::collections::HashSet<u64> {
        self.inode_slots
            .lock()
            .expect("inode lock poisoned")
            .iter()
            .flatten()
            .copied()
            .collect()
    }
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("workflow_id", &self.workflow_id)
            .field("update_type", &self.update_type)
            .field("work_folder", &self.work_folder)
            .field("files", &self.files.len())
            .finish_non_exhaustive()
    }
}
