//! Known-identity store: one reference image per label in a flat directory.

use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid label {0:?}: must be non-empty and contain no path separators")]
    InvalidLabel(String),
    #[error("{op} {}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("writing {}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

fn io_err<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(std::io::Error) -> StoreError + 'a {
    move |source| StoreError::Io {
        op,
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownIdentity {
    pub label: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct IdentityStore {
    dir: PathBuf,
}

/// Identity label for a reference image path: the file name without
/// directory or extension.
pub fn label_from_path(path: &Path) -> Option<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
}

fn validate_label(label: &str) -> Result<&str, StoreError> {
    let trimmed = label.trim();
    let bad = trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(&['/', '\\', '\0'][..]);
    if bad {
        return Err(StoreError::InvalidLabel(label.to_string()));
    }
    Ok(trimmed)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl IdentityStore {
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save `frame` as the reference for `label`, replacing any earlier
    /// enrollment under the same label.
    pub fn enroll(&self, label: &str, frame: &RgbImage) -> Result<PathBuf, StoreError> {
        let label = validate_label(label)?;
        std::fs::create_dir_all(&self.dir).map_err(io_err("creating", &self.dir))?;

        let path = self.dir.join(format!("{label}.jpg"));
        frame.save(&path).map_err(|source| StoreError::Image {
            path: path.clone(),
            source,
        })?;

        // Only one reference per label.
        for stale in self.references(label)? {
            if stale != path {
                std::fs::remove_file(&stale).map_err(io_err("removing", &stale))?;
            }
        }
        log::info!("enrolled {} at {}", label, path.display());
        Ok(path)
    }

    /// All enrolled identities, sorted by label. A missing directory is an
    /// empty store.
    pub fn list(&self) -> Result<Vec<KnownIdentity>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.dir).map_err(io_err("reading", &self.dir))?;
        let mut out = Vec::new();
        for entry in entries {
            let path = entry.map_err(io_err("reading", &self.dir))?.path();
            if !path.is_file() || !is_image(&path) {
                continue;
            }
            if let Some(label) = label_from_path(&path) {
                out.push(KnownIdentity { label, path });
            }
        }
        out.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.path.cmp(&b.path)));
        Ok(out)
    }

    /// Delete every reference stored for `label`. Returns whether anything
    /// was removed.
    pub fn remove(&self, label: &str) -> Result<bool, StoreError> {
        let label = validate_label(label)?;
        let refs = self.references(label)?;
        for path in &refs {
            std::fs::remove_file(path).map_err(io_err("removing", path))?;
        }
        Ok(!refs.is_empty())
    }

    fn references(&self, label: &str) -> Result<Vec<PathBuf>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|k| k.label == label)
            .map(|k| k.path)
            .collect())
    }
}
