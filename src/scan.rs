//! Source tree walker.
//!
//! Walks the source directory with `walkdir`, keeping regular files whose
//! lowercase extension is a recognized photo or video type. Each entry is
//! stat-ed individually; a failure on one entry is yielded as an error item
//! and the walk carries on with the next one.

use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use thiserror::Error;
use walkdir::WalkDir;

/// Recognized media extensions, lowercase and without the leading dot.
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "heic", "heif", "webp", "bmp", "tif", "tiff", "mp4", "mov",
    "m4v", "avi", "mkv",
];

/// A media file found during one scan pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAsset {
    /// Absolute path used for I/O.
    pub path: PathBuf,
    /// Path relative to the source root with `/` separators; the identity key.
    pub relative_path: String,
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime_ns: i64,
}

/// Per-entry scan failure. Never fatal to the walk.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Failed to read {path}: {source}")]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },

    #[error("Failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),
}

/// Restartable scanner over a source root. Each call to [`Scanner::iter`]
/// starts a fresh walk.
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<LocalAsset, ScanError>> + '_ {
        WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_map(move |entry| {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(source) => {
                        let path = source
                            .path()
                            .map(Path::to_path_buf)
                            .unwrap_or_else(|| self.root.clone());
                        return Some(Err(ScanError::Walk { path, source }));
                    }
                };
                // WalkDir reports symlinks as symlinks when not following them,
                // so this also drops links to regular files.
                if !entry.file_type().is_file() || !is_media_file(entry.path()) {
                    return None;
                }
                Some(self.to_asset(entry.path()))
            })
    }

    fn to_asset(&self, path: &Path) -> Result<LocalAsset, ScanError> {
        let metadata = std::fs::symlink_metadata(path).map_err(|source| ScanError::Stat {
            path: path.to_path_buf(),
            source,
        })?;
        if !metadata.is_file() {
            return Err(ScanError::Stat {
                path: path.to_path_buf(),
                source: std::io::Error::other("no longer a regular file"),
            });
        }
        let modified = metadata.modified().map_err(|source| ScanError::Stat {
            path: path.to_path_buf(),
            source,
        })?;
        let relative_path = relative_path(&self.root, path)
            .ok_or_else(|| ScanError::NonUtf8Path(path.to_path_buf()))?;

        Ok(LocalAsset {
            path: path.to_path_buf(),
            relative_path,
            size: metadata.len(),
            mtime_ns: system_time_to_ns(modified),
        })
    }
}

/// Whether the path carries a recognized media extension (case-insensitive).
pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            MEDIA_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Relative path of `path` under `root`, joined with `/` regardless of the
/// host separator. `None` when `path` is outside `root` or not UTF-8.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Nanoseconds since the Unix epoch; negative for pre-1970 timestamps.
fn system_time_to_ns(time: std::time::SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        Err(e) => i64::try_from(e.duration().as_nanos())
            .map(|n| -n)
            .unwrap_or(i64::MIN),
    }
}
