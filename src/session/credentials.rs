//! Credential directory for the protocol session.
//!
//! The contents are owned by the protocol library and treated as opaque: we
//! only make sure the directory exists and write the files it reports as
//! changed.

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

#[derive(Debug)]
pub enum CredentialError {
    /// File name isn't a single plain path component.
    InvalidName(String),
    Io { path: PathBuf, source: std::io::Error },
    Serialize(serde_json::Error),
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName(name) => write!(f, "invalid credential file name {name:?}"),
            Self::Io { path, source } => write!(f, "failed to write '{}': {}", path.display(), source),
            Self::Serialize(e) => write!(f, "failed to serialize credentials: {e}"),
        }
    }
}

impl std::error::Error for CredentialError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidName(_) => None,
            Self::Io { source, .. } => Some(source),
            Self::Serialize(e) => Some(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory if needed. Fresh credentials start out empty.
    pub fn ensure_dir(&self) -> Result<(), CredentialError> {
        if !self.dir.exists() {
            info!("No credentials at {:?}, a new pairing will be needed", self.dir);
        }
        std::fs::create_dir_all(&self.dir).map_err(|e| CredentialError::Io {
            path: self.dir.clone(),
            source: e,
        })
    }

    /// True when a previous session left credentials behind.
    pub fn has_credentials(&self) -> bool {
        std::fs::read_dir(&self.dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    /// Write each changed file atomically (temp file, then rename).
    pub fn persist(&self, files: &HashMap<String, Value>) -> Result<(), CredentialError> {
        self.ensure_dir()?;

        for (name, contents) in files {
            let path = self.file_path(name)?;
            let tmp = self.dir.join(format!(".{name}.tmp"));
            let json = serde_json::to_vec_pretty(contents).map_err(CredentialError::Serialize)?;

            std::fs::write(&tmp, json).map_err(|e| CredentialError::Io {
                path: tmp.clone(),
                source: e,
            })?;
            std::fs::rename(&tmp, &path).map_err(|e| CredentialError::Io {
                path: path.clone(),
                source: e,
            })?;
        }

        debug!("💾 Saved {} credential file(s)", files.len());
        Ok(())
    }

    fn file_path(&self, name: &str) -> Result<PathBuf, CredentialError> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.dir.join(name)),
            _ => Err(CredentialError::InvalidName(name.to_string())),
        }
    }
}
