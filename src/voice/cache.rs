//! Bounded on-disk cache of synthesized audio
//!
//! Files are named randomly, so concurrent writers never contend. After each
//! write only the newest `max_files` (by modification time) are kept.
//! Eviction is best-effort: failures are reported, never raised.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::Result;

/// A stored audio file and the URL clients fetch it from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAudio {
    pub name: String,
    pub path: PathBuf,
    pub url: String,
}

/// A failure that eviction swallowed
#[derive(Debug, Clone)]
pub struct IgnoredError {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of one eviction pass
#[derive(Debug, Clone, Default)]
pub struct EvictionReport {
    pub kept: usize,
    pub removed: usize,
    pub ignored: Vec<IgnoredError>,
}

/// Audio file store
#[derive(Debug, Clone)]
pub struct AudioCache {
    dir: PathBuf,
    max_files: usize,
    public_url: String,
}

impl AudioCache {
    /// Create a cache rooted at `dir`, serving files under `{public_url}/audio/`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, max_files: usize, public_url: &str) -> Self {
        Self {
            dir: dir.into(),
            max_files,
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write audio under a fresh random name, then evict old files
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub async fn store(&self, audio: &[u8]) -> Result<CachedAudio> {
        let name = format!("{}.mp3", uuid::Uuid::new_v4().simple());
        let path = self.dir.join(&name);

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, audio).await?;
        tracing::debug!(name = %name, bytes = audio.len(), "cached audio");

        let report = self.evict().await;
        if report.removed > 0 || !report.ignored.is_empty() {
            tracing::debug!(
                kept = report.kept,
                removed = report.removed,
                ignored = report.ignored.len(),
                "evicted cached audio"
            );
        }
        for ignored in &report.ignored {
            tracing::debug!(path = %ignored.path.display(), error = %ignored.error, "ignored eviction failure");
        }

        Ok(CachedAudio {
            url: self.url_for(&name),
            name,
            path,
        })
    }

    /// Run an eviction pass off the async runtime
    pub async fn evict(&self) -> EvictionReport {
        let dir = self.dir.clone();
        let max_files = self.max_files;
        tokio::task::spawn_blocking(move || evict_dir(&dir, max_files))
            .await
            .unwrap_or_default()
    }

    /// Public URL for a cached file name
    #[must_use]
    pub fn url_for(&self, name: &str) -> String {
        format!("{}/audio/{name}", self.public_url)
    }

    /// Resolve a client-supplied name to a path inside the cache
    ///
    /// Returns `None` for anything that could escape the directory.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        valid.then(|| self.dir.join(name))
    }
}

/// Keep the newest `max_files` regular files in `dir`, deleting the rest
pub fn evict_dir(dir: &Path, max_files: usize) -> EvictionReport {
    let mut report = EvictionReport::default();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            report.ignored.push(IgnoredError {
                path: dir.to_path_buf(),
                error: e.to_string(),
            });
            return report;
        }
    };

    let mut files: Vec<(PathBuf, SystemTime)> = entries
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((entry.path(), modified))
        })
        .collect();

    files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in files.iter().skip(max_files) {
        match std::fs::remove_file(path) {
            Ok(()) => report.removed += 1,
            Err(e) => report.ignored.push(IgnoredError {
                path: path.clone(),
                error: e.to_string(),
            }),
        }
    }
    report.kept = files.len().min(max_files);
    report
}
