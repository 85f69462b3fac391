use crate::config::ArtifactConfig;
use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// How to resolve an archive glob that matches more than one file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Take the first candidate in lexicographic order
    #[default]
    FirstSorted,
    /// Fail with `ArtifactAmbiguous`
    Reject,
}

/// Finds the module executable inside a base directory.
///
/// A pre-extracted layout (`squashfs-root/AppRun` by default) wins over a
/// single-file archive matched by glob in the same directory.
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    base_dir: PathBuf,
    extracted_path: PathBuf,
    archive_pattern: String,
    policy: AmbiguityPolicy,
}

impl ArtifactLocator {
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.into(),
            extracted_path: PathBuf::from("squashfs-root/AppRun"),
            archive_pattern: "*.AppImage".to_string(),
            policy: AmbiguityPolicy::default(),
        }
    }

    pub fn from_config(config: &ArtifactConfig) -> Self {
        Self {
            base_dir: config.base_dir.clone(),
            extracted_path: config.extracted_path.clone(),
            archive_pattern: config.archive_pattern.clone(),
            policy: config.on_ambiguous,
        }
    }

    pub fn extracted_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.extracted_path = path.into();
        self
    }

    pub fn archive_pattern<S: Into<String>>(mut self, pattern: S) -> Self {
        self.archive_pattern = pattern.into();
        self
    }

    pub fn policy(mut self, policy: AmbiguityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Return exactly one executable path
    pub fn locate(&self) -> Result<PathBuf> {
        let base_dir = absolute(&self.base_dir)?;

        let extracted = base_dir.join(&self.extracted_path);
        if extracted.is_file() {
            info!("Using extracted module at {}", extracted.display());
            return Ok(extracted);
        }

        debug!(
            "No extracted module at {}, falling back to '{}'",
            extracted.display(),
            self.archive_pattern
        );

        // The base directory is literal; only the archive pattern may glob
        let escaped = glob::Pattern::escape(&base_dir.to_string_lossy());
        let pattern = Path::new(&escaped).join(&self.archive_pattern);
        let pattern = pattern.to_string_lossy();
        let entries = glob::glob(&pattern).map_err(|e| HarnessError::ArtifactNotFound {
            base_dir: base_dir.clone(),
            reason: format!("invalid archive pattern '{}': {}", self.archive_pattern, e),
        })?;

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!("Skipping unreadable artifact candidate: {}", e);
                    None
                }
            })
            .filter(|path| path.is_file())
            .collect();
        candidates.sort();

        match candidates.len() {
            0 => Err(HarnessError::ArtifactNotFound {
                base_dir,
                reason: format!(
                    "neither {} nor any file matching '{}' exists",
                    self.extracted_path.display(),
                    self.archive_pattern
                ),
            }),
            1 => {
                let path = candidates.remove(0);
                info!("Using module archive at {}", path.display());
                Ok(path)
            }
            count => match self.policy {
                AmbiguityPolicy::Reject => Err(HarnessError::ArtifactAmbiguous {
                    base_dir,
                    candidates,
                }),
                AmbiguityPolicy::FirstSorted => {
                    warn!(
                        "{} module archives match '{}', using the first in sorted order",
                        count, self.archive_pattern
                    );
                    let path = candidates.remove(0);
                    info!("Using module archive at {}", path.display());
                    Ok(path)
                }
            },
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
