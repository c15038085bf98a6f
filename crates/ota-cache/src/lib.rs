// SPDX-License-Identifier: MIT OR Apache-2.0
//! Content-addressed cache of verified prior-version artifacts.
//!
//! Entries are keyed `<base>/<provider>/<alg>-<encodedHash>`, where the hash
//! encoding keeps base64 text filesystem-safe. Payloads of a successful
//! deployment move here from the sandbox so future delta updates can
//! reconstruct their targets without a full download.
//!
//! Eviction is LRU by modification time, oldest first, and never touches a
//! file whose inode belongs to the current workflow: inodes, not paths, are
//! the identity that survives a rename within one filesystem.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use ota_result::codes;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Cache-layer errors. Purge problems never surface here; eviction is
/// best-effort by contract.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A cache path could not be derived from the key material.
    #[error("cannot derive cache path for provider `{0}`")]
    CreatePath(String),
    /// Moving a payload into the cache failed.
    #[error("failed to move `{path}` into the cache: {source}")]
    MovePayload {
        /// The sandbox payload being moved.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: std::io::Error,
    },
    /// Filesystem error outside the move loop.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// The extended result code reported for this error.
    #[must_use]
    pub fn erc(&self) -> i32 {
        match self {
            Self::CreatePath(_) => codes::CACHE_CREATE_PATH,
            Self::MovePayload { .. } => codes::CACHE_MOVE_PAYLOAD,
            Self::Io(_) => codes::CACHE_MOVE_PAYLOAD,
        }
    }
}

/// Outcome of a cache lookup. Absent or unreadable entries are a miss, not
/// an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheLookup {
    /// The artifact exists and is readable at this path.
    Hit(PathBuf),
    /// No usable artifact for the key.
    Miss,
}

/// One sandbox payload to retain, described by its cache key material.
#[derive(Clone, Debug)]
pub struct CachePayload {
    /// Index of the payload in the workflow's file list.
    pub file_index: usize,
    /// Current location in the sandbox.
    pub sandbox_path: PathBuf,
    /// Digest algorithm (first manifest hash entry).
    pub hash_algorithm: String,
    /// Digest value (base64 text).
    pub hash: String,
}

/// The content-addressed cache rooted at one base directory.
#[derive(Clone, Debug)]
pub struct SourceUpdateCache {
    base: PathBuf,
}

/// Replaces base64 characters that cannot appear in a file name.
fn encode_hash_for_path(hash: &str) -> String {
    let mut encoded = String::with_capacity(hash.len());
    for c in hash.chars() {
        match c {
            '+' => encoded.push_str("_2B"),
            '/' => encoded.push_str("_2F"),
            '=' => encoded.push_str("_3D"),
            c => encoded.push(c),
        }
    }
    encoded
}

/// Collapses a key segment to `[A-Za-z0-9._-]`.
fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(unix)]
fn inode_of(meta: &fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn inode_of(_meta: &fs::Metadata) -> Option<u64> {
    None
}

impl SourceUpdateCache {
    /// Opens (without creating) a cache rooted at `base`.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// The cache root.
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Derives the entry path for `(provider, alg, hash)`.
    pub fn entry_path(&self, provider: &str, alg: &str, hash: &str) -> Result<PathBuf, CacheError> {
        if provider.is_empty() || alg.is_empty() || hash.is_empty() {
            return Err(CacheError::CreatePath(provider.to_string()));
        }
        let file_name = format!("{}-{}", sanitize_segment(alg), encode_hash_for_path(hash));
        Ok(self.base.join(sanitize_segment(provider)).join(file_name))
    }

    /// Looks up a source artifact. The file must exist and be readable.
    #[must_use]
    pub fn lookup(&self, provider: &str, hash: &str, alg: &str) -> CacheLookup {
        let Ok(path) = self.entry_path(provider, alg, hash) else {
            return CacheLookup::Miss;
        };
        if !path.is_file() {
            return CacheLookup::Miss;
        }
        // Readability check: opening is the portable probe.
        match fs::File::open(&path) {
            Ok(_) => CacheLookup::Hit(path),
            Err(err) => {
                debug!(path = %path.display(), %err, "cache entry unreadable; treating as miss");
                CacheLookup::Miss
            }
        }
    }

    /// Moves a deployment's payloads from the sandbox into the cache and
    /// returns `(file_index, inode)` for each retained artifact.
    ///
    /// Payloads missing from the sandbox are skipped: an already-installed
    /// update never downloaded them. Rename is tried first; cross-filesystem
    /// failures fall back to copy-then-unlink. Space is reclaimed before the
    /// move, or after it when the `two-phase-commit` feature is enabled.
    pub fn move_from_sandbox(
        &self,
        provider: &str,
        payloads: &[CachePayload],
        keep_inodes: &HashSet<u64>,
    ) -> Result<Vec<(usize, u64)>, CacheError> {
        let space_required: u64 = payloads
            .iter()
            .filter_map(|p| fs::metadata(&p.sandbox_path).ok())
            .map(|m| m.len())
            .sum();

        if !cfg!(feature = "two-phase-commit") {
            self.purge_oldest(keep_inodes, space_required as i64);
        }

        let mut recorded = Vec::new();
        for payload in payloads {
            if !payload.sandbox_path.is_file() {
                debug!(path = %payload.sandbox_path.display(), "payload not in sandbox; skipping");
                continue;
            }

            let target = self.entry_path(provider, &payload.hash_algorithm, &payload.hash)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }

            if let Err(err) = fs::rename(&payload.sandbox_path, &target) {
                // Common across mount points; fall back to copy + unlink.
                warn!(
                    from = %payload.sandbox_path.display(),
                    to = %target.display(),
                    %err,
                    "rename failed; copying"
                );
                fs::copy(&payload.sandbox_path, &target).map_err(|source| {
                    CacheError::MovePayload {
                        path: payload.sandbox_path.clone(),
                        source,
                    }
                })?;
                let _ = fs::remove_file(&payload.sandbox_path);
            }

            if let Some(inode) = fs::metadata(&target).ok().as_ref().and_then(inode_of) {
                recorded.push((payload.file_index, inode));
            }
            info!(target = %target.display(), "payload retained in source-update cache");
        }

        if cfg!(feature = "two-phase-commit") {
            self.purge_oldest(keep_inodes, space_required as i64);
        }

        Ok(recorded)
    }

    /// Unlinks the oldest cache files (by mtime) until `bytes_to_free` is
    /// covered, never touching inodes in `keep_inodes`. Best-effort: unlink
    /// failures degrade to warnings. Returns the bytes actually freed.
    pub fn purge_oldest(&self, keep_inodes: &HashSet<u64>, mut bytes_to_free: i64) -> u64 {
        if bytes_to_free <= 0 || !self.base.is_dir() {
            return 0;
        }

        let mut candidates: Vec<(std::time::SystemTime, u64, PathBuf)> = Vec::new();
        for entry in WalkDir::new(&self.base).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if let Some(inode) = inode_of(&meta) {
                if keep_inodes.contains(&inode) {
                    continue;
                }
            }
            let mtime = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
            candidates.push((mtime, meta.len(), entry.into_path()));
        }
        candidates.sort_by_key(|(mtime, _, _)| *mtime);

        let mut freed = 0u64;
        for (_, len, path) in candidates {
            if bytes_to_free <= 0 {
                break;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), len, "evicted cache file");
                    bytes_to_free -= len as i64;
                    freed += len;
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "eviction unlink failed; continuing");
                }
            }
        }
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    fn touch(path: &Path, content: &[u8], age: Duration) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
        let mtime = SystemTime::now() - age;
        let file = fs::File::options().append(true).open(path).unwrap();
        file.set_modified(mtime).unwrap();
    }

    #[test]
    fn entry_paths_encode_base64_specials() {
        let cache = SourceUpdateCache::new("/var/lib/ota/cache");
        let path = cache
            .entry_path("contoso", "sha256", "a+b/c=")
            .unwrap();
        assert_eq!(
            path,
            PathBuf::from("/var/lib/ota/cache/contoso/sha256-a_2Bb_2Fc_3D")
        );
    }

    #[test]
    fn entry_path_sanitizes_segments() {
        let cache = SourceUpdateCache::new("/c");
        let path = cache.entry_path("con/toso", "sha 256", "abc").unwrap();
        assert_eq!(path, PathBuf::from("/c/con_toso/sha_256-abc"));
    }

    #[test]
    fn empty_key_material_is_an_error() {
        let cache = SourceUpdateCache::new("/c");
        assert!(cache.entry_path("", "sha256", "abc").is_err());
        assert!(cache.entry_path("p", "", "abc").is_err());
        assert!(cache.entry_path("p", "sha256", "").is_err());
    }

    #[test]
    fn lookup_hit_and_miss() {
        let dir = tempdir().unwrap();
        let cache = SourceUpdateCache::new(dir.path());
        assert_eq!(cache.lookup("contoso", "abc", "sha256"), CacheLookup::Miss);

        let path = cache.entry_path("contoso", "sha256", "abc").unwrap();
        touch(&path, b"artifact", Duration::ZERO);
        assert_eq!(
            cache.lookup("contoso", "abc", "sha256"),
            CacheLookup::Hit(path)
        );
    }

    #[test]
    fn move_renames_and_skips_missing() {
        let dir = tempdir().unwrap();
        let sandbox = dir.path().join("sandbox");
        fs::create_dir_all(&sandbox).unwrap();
        fs::write(sandbox.join("a.bin"), b"payload-a").unwrap();

        let cache = SourceUpdateCache::new(dir.path().join("cache"));
        let payloads = vec![
            CachePayload {
                file_index: 0,
                sandbox_path: sandbox.join("a.bin"),
                hash_algorithm: "sha256".into(),
                hash: "aaa=".into(),
            },
            CachePayload {
                file_index: 1,
                sandbox_path: sandbox.join("never-downloaded.bin"),
                hash_algorithm: "sha256".into(),
                hash: "bbb=".into(),
            },
        ];

        let recorded = cache
            .move_from_sandbox("contoso", &payloads, &HashSet::new())
            .unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, 0);

        assert!(!sandbox.join("a.bin").exists());
        let cached = cache.entry_path("contoso", "sha256", "aaa=").unwrap();
        assert_eq!(fs::read(cached).unwrap(), b"payload-a");
    }

    #[test]
    fn purge_removes_oldest_first_and_respects_keep_set() {
        let dir = tempdir().unwrap();
        let cache = SourceUpdateCache::new(dir.path());

        let oldest = dir.path().join("contoso/sha256-old");
        let middle = dir.path().join("contoso/sha256-mid");
        let newest = dir.path().join("contoso/sha256-new");
        touch(&oldest, &[0u8; 100], Duration::from_secs(300));
        touch(&middle, &[0u8; 100], Duration::from_secs(200));
        touch(&newest, &[0u8; 100], Duration::from_secs(100));

        // Protect the middle file by inode.
        let mut keep = HashSet::new();
        keep.insert(inode_of(&fs::metadata(&middle).unwrap()).unwrap());

        let freed = cache.purge_oldest(&keep, 150);
        assert_eq!(freed, 200);
        assert!(!oldest.exists());
        assert!(middle.exists());
        assert!(!newest.exists());
    }

    #[test]
    fn purge_of_nothing_needed_is_a_no_op() {
        let dir = tempdir().unwrap();
        let cache = SourceUpdateCache::new(dir.path());
        let file = dir.path().join("contoso/sha256-x");
        touch(&file, &[0u8; 10], Duration::from_secs(10));
        assert_eq!(cache.purge_oldest(&HashSet::new(), 0), 0);
        assert!(file.exists());
    }

    proptest! {
        #[test]
        fn distinct_keys_yield_distinct_paths(
            a in "[A-Za-z0-9+/=]{4,24}",
            b in "[A-Za-z0-9+/=]{4,24}",
        ) {
            prop_assume!(a != b);
            let cache = SourceUpdateCache::new("/c");
            let pa = cache.entry_path("p", "sha256", &a).unwrap();
            let pb = cache.entry_path("p", "sha256", &b).unwrap();
            prop_assert_ne!(pa, pb);
        }

        #[test]
        fn entry_paths_use_safe_characters(hash in "[A-Za-z0-9+/=]{1,40}") {
            let cache = SourceUpdateCache::new("/c");
            let path = cache.entry_path("prov.ider", "sha256", &hash).unwrap();
            let name = path.file_name().unwrap().to_str().unwrap();
            prop_assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')));
        }
    }
}
