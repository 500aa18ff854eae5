//! On-disk cache of converted artifacts.
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/
//!   models--org--name/
//!     checkpoint/            fetched upstream files, shared by all precisions
//!     int4/
//!       .lock                held while converting
//!       .tmp-<unique>/       converter output before promotion
//!       <artifact>           promoted artifact
//!       manifest.json        commit record, written last
//! ```
//!
//! An entry is only trusted when its manifest matches the key and the artifact
//! on disk has the recorded size. Nothing is ever rewritten in place: artifacts
//! and manifests land by rename.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::key::{join_key, CacheKey};
use super::lock::LOCK_FILE_NAME;
use crate::family::ModelFamily;
use crate::precision::Precision;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";
pub const CHECKPOINT_DIR_NAME: &str = "checkpoint";
const TEMP_PREFIX: &str = ".tmp-";
const MANIFEST_FORMAT_VERSION: u32 = 1;

static UNIQUE: AtomicU64 = AtomicU64::new(0);

/// Commit record for a promoted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub source: String,
    pub precision: Precision,
    pub family: ModelFamily,
    /// File name of the artifact, relative to the entry directory.
    pub artifact: String,
    pub size_bytes: u64,
    pub created_unix: u64,
}

/// A valid, promoted cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    dir: PathBuf,
    manifest: Manifest,
}

impl CacheEntry {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.dir.join(&self.manifest.artifact)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }
}

/// Cache rooted at an explicit directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        join_key(&self.root, key)
    }

    pub fn checkpoint_dir(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(key.source_dir_name())
            .join(CHECKPOINT_DIR_NAME)
    }

    pub fn lock_path(&self, key: &CacheKey) -> PathBuf {
        self.entry_dir(key).join(LOCK_FILE_NAME)
    }

    /// Returns the entry for `key` if it is valid for `family`.
    pub fn lookup(&self, key: &CacheKey, family: ModelFamily) -> Option<CacheEntry> {
        let dir = self.entry_dir(key);
        let entry = read_entry(&dir)?;
        let m = &entry.manifest;

        if m.source != key.source_label() || m.precision != key.precision() {
            log::warn!("cache entry {} belongs to another key, ignoring", dir.display());
            return None;
        }
        if m.family != family {
            log::info!(
                "cache entry {} was converted as {}, requested {}; treating as stale",
                dir.display(),
                m.family,
                family
            );
            return None;
        }
        Some(entry)
    }

    /// Creates the entry directory and a fresh, empty staging directory inside it.
    pub fn create_staging_dir(&self, key: &CacheKey) -> io::Result<PathBuf> {
        let dir = self.entry_dir(key);
        std::fs::create_dir_all(&dir)?;
        let staging = dir.join(format!("{TEMP_PREFIX}{}", unique_suffix()));
        std::fs::create_dir(&staging)?;
        Ok(staging)
    }

    /// Moves a staged artifact into the entry and commits it with a manifest.
    ///
    /// The artifact is renamed first; the manifest is written to a temporary
    /// file and renamed last, so a crash leaves either the previous state or
    /// an artifact without a manifest (which `lookup` ignores).
    pub fn promote(
        &self,
        key: &CacheKey,
        family: ModelFamily,
        staged_artifact: &Path,
    ) -> io::Result<CacheEntry> {
        let dir = self.entry_dir(key);
        let artifact = staged_artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "staged artifact has no file name")
            })?;
        if artifact == MANIFEST_FILE_NAME || artifact == LOCK_FILE_NAME {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("artifact name '{artifact}' collides with cache bookkeeping"),
            ));
        }

        let size_bytes = std::fs::metadata(staged_artifact)?.len();
        let manifest = Manifest {
            format_version: MANIFEST_FORMAT_VERSION,
            source: key.source_label(),
            precision: key.precision(),
            family,
            artifact: artifact.clone(),
            size_bytes,
            created_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };

        std::fs::rename(staged_artifact, dir.join(&artifact))?;
        write_atomically(&dir.join(MANIFEST_FILE_NAME), &manifest)?;

        log::info!("cached {} -> {}", key, dir.join(&artifact).display());
        Ok(CacheEntry { dir, manifest })
    }

    /// Every valid entry under the root.
    pub fn entries(&self) -> io::Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        if !self.root.exists() {
            return Ok(entries);
        }
        for source_dir in std::fs::read_dir(&self.root)? {
            let source_dir = source_dir?.path();
            if !source_dir.is_dir() {
                continue;
            }
            for precision_dir in std::fs::read_dir(&source_dir)? {
                let precision_dir = precision_dir?.path();
                if let Some(entry) = read_entry(&precision_dir) {
                    entries.push(entry);
                }
            }
        }
        entries.sort_by(|a, b| a.dir.cmp(&b.dir));
        Ok(entries)
    }

    /// Removes the entry directory for `key`, including staging leftovers.
    pub fn remove(&self, key: &CacheKey) -> io::Result<bool> {
        let dir = self.entry_dir(key);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Deletes staging directories left behind by interrupted conversions.
    /// Call only while holding the key's lock.
    pub fn clear_staging(&self, key: &CacheKey) -> io::Result<usize> {
        let dir = self.entry_dir(key);
        let mut removed = 0;
        let read = match std::fs::read_dir(&dir) {
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        for item in read {
            let path = item?.path();
            let is_temp = path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with(TEMP_PREFIX))
                .unwrap_or(false);
            if is_temp && path.is_dir() {
                std::fs::remove_dir_all(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn read_entry(dir: &Path) -> Option<CacheEntry> {
    let raw = std::fs::read_to_string(dir.join(MANIFEST_FILE_NAME)).ok()?;
    let manifest: Manifest = match serde_json::from_str(&raw) {
        Ok(m) => m,
        Err(e) => {
            log::warn!("unreadable manifest in {}: {}", dir.display(), e);
            return None;
        }
    };

    if manifest.format_version != MANIFEST_FORMAT_VERSION
        || manifest.artifact.contains(['/', '\\'])
        || manifest.artifact.is_empty()
    {
        return None;
    }

    let size = std::fs::metadata(dir.join(&manifest.artifact)).ok()?.len();
    if size != manifest.size_bytes {
        log::warn!(
            "artifact {} has {} bytes, manifest says {}; treating as stale",
            manifest.artifact,
            size,
            manifest.size_bytes
        );
        return None;
    }

    Some(CacheEntry {
        dir: dir.to_path_buf(),
        manifest,
    })
}

fn write_atomically(path: &Path, manifest: &Manifest) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(manifest)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let tmp = path.with_file_name(format!(
        "{TEMP_PREFIX}{}.{}",
        unique_suffix(),
        MANIFEST_FILE_NAME
    ));
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&tmp);
    })
}

/// Unique within this process and across processes sharing the cache.
pub(crate) fn unique_suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!(
        "{}-{}-{}",
        std::process::id(),
        UNIQUE.fetch_add(1, Ordering::Relaxed),
        nanos
    )
}
