//! Content-addressed file cache
//!
//! Every entry lives at `<area>/<slug>_<digest>.<ext>`. The slug only makes
//! the directory browsable; the digest is a SHA-256 prefix over the area and
//! the full key, so two URLs that slug identically still land on different
//! files.

use crate::crawler::FetchKind;
use crate::storage::{CacheArea, StorageError, StorageResult};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const MAX_SLUG_LEN: usize = 80;
const DIGEST_LEN: usize = 16;

/// On-disk cache of fetched bodies and diagnostic artifacts
#[derive(Debug)]
pub struct CacheStore {
    base_dir: PathBuf,
    read_enabled: bool,
    write_enabled: bool,
    write_lock: Mutex<()>,
}

impl CacheStore {
    /// Opens the cache rooted at `base_dir`, creating the area directories
    /// when writes are enabled
    pub fn open(
        base_dir: impl Into<PathBuf>,
        read_enabled: bool,
        write_enabled: bool,
    ) -> StorageResult<Self> {
        let store = Self {
            base_dir: base_dir.into(),
            read_enabled,
            write_enabled,
            write_lock: Mutex::new(()),
        };
        if write_enabled {
            store.ensure_dirs()?;
        }
        Ok(store)
    }

    /// A cache that never hits and never writes
    pub fn disabled() -> Self {
        Self {
            base_dir: PathBuf::new(),
            read_enabled: false,
            write_enabled: false,
            write_lock: Mutex::new(()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn ensure_dirs(&self) -> StorageResult<()> {
        for area in CacheArea::ALL {
            let dir = self.base_dir.join(area.dir_name());
            fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
                path: dir.display().to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// Deterministic path for `key` inside `area`
    pub fn path_for(&self, area: CacheArea, key: &str, ext: &str) -> PathBuf {
        let file_name = format!("{}_{}.{}", safe_slug(key), digest(area, key), ext);
        self.base_dir.join(area.dir_name()).join(file_name)
    }

    /// Path of the normal cache entry for a fetch
    pub fn entry_path(&self, kind: FetchKind, url: &str) -> PathBuf {
        self.path_for(kind.into(), url, kind.extension_for(url))
    }

    /// Returns the cached body, or None when missing, empty or reads are disabled
    pub fn read(&self, kind: FetchKind, url: &str) -> Option<String> {
        if !self.read_enabled {
            return None;
        }

        let path = self.entry_path(kind, url);
        match fs::read(&path) {
            Ok(bytes) if !bytes.is_empty() => {
                tracing::trace!("Cache hit for {} at {}", url, path.display());
                Some(String::from_utf8_lossy(&bytes).into_owned())
            }
            Ok(_) => None,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!("Failed to read cache entry {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Persists a successful body, overwriting any previous entry
    pub fn write(&self, kind: FetchKind, url: &str, text: &str) -> Option<PathBuf> {
        let path = self.entry_path(kind, url);
        self.write_file(&path, text.as_bytes())
    }

    /// Dumps a blocked body into the `blocked` area, away from the normal cache
    pub fn save_blocked(&self, kind: FetchKind, url: &str, text: &str) -> Option<PathBuf> {
        let key = artifact_key(kind, url);
        let path = self.path_for(CacheArea::Blocked, &key, "html");
        self.write_file(&path, text.as_bytes())
    }

    /// Reserves the screenshot path for a fetch; the browser writes the file
    pub fn screenshot_path(&self, kind: FetchKind, url: &str) -> Option<PathBuf> {
        if !self.write_enabled {
            return None;
        }
        let key = artifact_key(kind, url);
        Some(self.path_for(CacheArea::Screenshots, &key, "png"))
    }

    /// Removes every file in every area, returning how many were deleted
    pub fn clear(&self) -> StorageResult<usize> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut removed = 0;

        for area in CacheArea::ALL {
            let dir = self.base_dir.join(area.dir_name());
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => {
                    return Err(StorageError::Io {
                        path: dir.display().to_string(),
                        source,
                    })
                }
            };

            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_file() {
                    fs::remove_file(&path).map_err(|source| StorageError::Io {
                        path: path.display().to_string(),
                        source,
                    })?;
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }

    fn write_file(&self, path: &Path, bytes: &[u8]) -> Option<PathBuf> {
        if !self.write_enabled {
            return None;
        }

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                tracing::warn!("Failed to create cache directory {}: {}", parent.display(), e);
                return None;
            }
        }

        // Write-then-rename so a reader never sees a half-written entry
        let tmp = path.with_extension("part");
        let result = fs::write(&tmp, bytes).and_then(|_| fs::rename(&tmp, path));
        match result {
            Ok(()) => Some(path.to_path_buf()),
            Err(e) => {
                tracing::warn!("Failed to write cache entry {}: {}", path.display(), e);
                let _ = fs::remove_file(&tmp);
                None
            }
        }
    }
}

/// Filesystem-safe, human-readable slug of a key
///
/// Runs of non-alphanumeric characters collapse to `_`; the result is
/// trimmed of underscores, capped at 80 characters and never empty.
pub fn safe_slug(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_sep = false;

    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(c);
        } else {
            pending_sep = true;
        }
    }

    if slug.is_empty() {
        return "page".to_string();
    }

    slug.truncate(MAX_SLUG_LEN);
    slug.trim_end_matches('_').to_string()
}

fn artifact_key(kind: FetchKind, url: &str) -> String {
    format!("{}:{}", kind, url)
}

fn digest(area: CacheArea, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(area.dir_name().as_bytes());
    hasher.update(b"\n");
    hasher.update(key.as_bytes());
    let mut hex = hex::encode(hasher.finalize());
    hex.truncate(DIGEST_LEN);
    hex
}
