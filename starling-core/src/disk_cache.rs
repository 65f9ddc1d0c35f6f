//! Content-addressed on-disk store for raw cover art bytes.
//!
//! Each track's art lives in a single file whose name is derived from the SHA-256 of the
//! track's path. There is no index: an entry exists iff its file does.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use sha2::{Digest, Sha256};

pub const CACHE_EXTENSION: &str = "img";

/// How hard to try when a cache file is locked by someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}
impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct DiskCache {
    cache_dir: PathBuf,
    retry: RetryPolicy,
}
impl DiskCache {
    pub fn new(cache_dir: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            retry,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// The file that holds (or would hold) the art for `track_path`. Does no I/O.
    pub fn path_for(&self, track_path: &Path) -> PathBuf {
        self.cache_dir.join(cache_file_name(track_path))
    }

    pub fn contains(&self, track_path: &Path) -> bool {
        std::fs::metadata(self.path_for(track_path)).is_ok_and(|m| m.is_file() && m.len() > 0)
    }

    /// Returns the cached bytes for `track_path`, or `None` on a miss. Read errors count as misses.
    pub fn try_read(&self, track_path: &Path) -> Option<Vec<u8>> {
        let path = self.path_for(track_path);
        match std::fs::read(&path) {
            Ok(data) if data.is_empty() => {
                tracing::debug!("Ignoring empty cache file {}", path.display());
                None
            }
            Ok(data) => {
                tracing::debug!(
                    "Loaded cover art for {} from disk cache",
                    track_path.display()
                );
                Some(data)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                tracing::debug!("Failed to read cache file {}: {e}", path.display());
                None
            }
        }
    }

    /// Persist `bytes` as the art for `track_path`. Best-effort: returns whether the
    /// bytes made it to disk, and never fails the caller.
    pub fn write(&self, track_path: &Path, bytes: &[u8]) -> bool {
        self.write_with(track_path, bytes, |path, bytes| std::fs::write(path, bytes))
    }

    fn write_with(
        &self,
        track_path: &Path,
        bytes: &[u8],
        mut write_file: impl FnMut(&Path, &[u8]) -> std::io::Result<()>,
    ) -> bool {
        if let Err(e) = std::fs::create_dir_all(&self.cache_dir) {
            tracing::warn!(
                "Failed to create cache directory {}: {e}",
                self.cache_dir.display()
            );
            return false;
        }

        let path = self.path_for(track_path);
        for attempt in 1..=self.retry.attempts {
            match write_file(&path, bytes) {
                Ok(()) => {
                    tracing::debug!(
                        "Saved cover art for {} to disk cache",
                        track_path.display()
                    );
                    return true;
                }
                Err(e) if is_contention(&e) => {
                    tracing::debug!(
                        "Cache file {} is in use (attempt {attempt}/{}): {e}",
                        path.display(),
                        self.retry.attempts
                    );
                    if attempt < self.retry.attempts {
                        std::thread::sleep(self.retry.delay);
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to save cover art to {}: {e}", path.display());
                    return false;
                }
            }
        }

        tracing::warn!(
            "Giving up on cache file {} after {} attempts",
            path.display(),
            self.retry.attempts
        );
        false
    }

    pub fn remove(&self, track_path: &Path) -> bool {
        std::fs::remove_file(self.path_for(track_path)).is_ok()
    }

    /// Removes every cache entry. Returns how many files were deleted.
    pub fn clear(&self) -> usize {
        self.entries()
            .filter(|path| match std::fs::remove_file(path) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("Failed to remove {}: {e}", path.display());
                    false
                }
            })
            .count()
    }

    pub fn stats(&self) -> CacheStats {
        self.entries().fold(CacheStats::default(), |mut stats, path| {
            stats.entries += 1;
            stats.total_bytes += std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            stats
        })
    }

    fn entries(&self) -> impl Iterator<Item = PathBuf> {
        std::fs::read_dir(&self.cache_dir)
            .into_iter()
            .flatten()
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file() && path.extension().is_some_and(|ext| ext == CACHE_EXTENSION)
            })
    }
}

/// `<lowercase hex SHA-256 of the path>.<ext>`
pub fn cache_file_name(track_path: &Path) -> String {
    let digest = Sha256::digest(track_path.to_string_lossy().as_bytes());
    format!(
        "{}.{CACHE_EXTENSION}",
        data_encoding::HEXLOWER.encode(&digest)
    )
}

/// Whether an I/O error means another process is holding the file.
fn is_contention(e: &std::io::Error) -> bool {
    // ERROR_SHARING_VIOLATION and ERROR_LOCK_VIOLATION
    const WINDOWS_FILE_IN_USE: [i32; 2] = [32, 33];

    matches!(
        e.kind(),
        ErrorKind::ResourceBusy | ErrorKind::WouldBlock | ErrorKind::ExecutableFileBusy
    ) || (cfg!(windows)
        && e
            .raw_os_error()
            .is_some_and(|code| WINDOWS_FILE_IN_USE.contains(&code)))
}
