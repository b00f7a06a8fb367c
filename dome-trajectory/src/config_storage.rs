//! Configuration document store.
//!
//! Documents live as YAML files in a single directory, by default
//! `~/.dome_trajectory/`. The `start` selector is the file name.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::config::DEFAULT_DOCUMENT;
use crate::error::ConfigurationError;

/// Environment variable overriding the default configuration directory.
pub const ENV_VAR: &str = "DOME_TRAJECTORY_CONFIG_DIR";

/// Name of the default directory under `$HOME`.
const DEFAULT_DIR_NAME: &str = ".dome_trajectory";

/// Resolves configuration selectors to documents.
#[derive(Debug, Clone)]
pub struct ConfigStorage {
    /// Directory holding the configuration documents
    root_path: PathBuf,
}

impl ConfigStorage {
    /// Create a store rooted at `$DOME_TRAJECTORY_CONFIG_DIR`, else `~/.dome_trajectory`.
    pub fn new() -> std::io::Result<Self> {
        if let Some(dir) = std::env::var_os(ENV_VAR).filter(|d| !d.is_empty()) {
            return Ok(Self::with_path(PathBuf::from(dir)));
        }
        let home = std::env::var("HOME")
            .map_err(|_| std::io::Error::new(ErrorKind::NotFound, "HOME not set"))?;
        Ok(Self::with_path(PathBuf::from(home).join(DEFAULT_DIR_NAME)))
    }

    /// Create a store with a custom root path
    pub fn with_path(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
        }
    }

    /// Get the root configuration path
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Path of the document a selector names, or `None` if the selector is not
    /// a plain file name.
    fn document_path(&self, selector: &str) -> Option<PathBuf> {
        let is_plain = !selector.is_empty()
            && selector != "."
            && selector != ".."
            && !selector.contains(['/', '\\'])
            && Path::new(selector).file_name().and_then(|n| n.to_str()) == Some(selector);
        is_plain.then(|| self.root_path.join(selector))
    }

    fn not_found(&self, selector: &str) -> ConfigurationError {
        ConfigurationError::NotFound {
            selector: selector.to_string(),
            dir: self.root_path.clone(),
        }
    }

    /// Load the document named by `selector`.
    ///
    /// The empty selector yields the built-in default document.
    pub fn load(&self, selector: &str) -> Result<String, ConfigurationError> {
        if selector.is_empty() {
            return Ok(DEFAULT_DOCUMENT.to_string());
        }

        let path = self
            .document_path(selector)
            .ok_or_else(|| self.not_found(selector))?;

        match std::fs::read_to_string(&path) {
            Ok(document) => Ok(document),
            Err(e) if e.kind() == ErrorKind::NotFound || path.is_dir() => {
                Err(self.not_found(selector))
            }
            Err(e) if e.kind() == ErrorKind::InvalidData => Err(ConfigurationError::Malformed(
                format!("{} is not valid UTF-8", path.display()),
            )),
            Err(source) => Err(ConfigurationError::Io { path, source }),
        }
    }

    /// Save a document under `name`.
    ///
    /// Creates the configuration directory if it doesn't exist.
    /// Returns the path where the document was saved.
    pub fn save(&self, name: &str, document: &str) -> Result<PathBuf, ConfigurationError> {
        let path = self.document_path(name).ok_or_else(|| {
            ConfigurationError::Malformed(format!("{name:?} is not a plain file name"))
        })?;

        std::fs::create_dir_all(&self.root_path).map_err(|source| ConfigurationError::Io {
            path: self.root_path.clone(),
            source,
        })?;
        std::fs::write(&path, document).map_err(|source| ConfigurationError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// List all `.yaml`/`.yml` documents in storage, sorted by name.
    ///
    /// A missing directory has no documents.
    pub fn list_configs(&self) -> std::io::Result<Vec<String>> {
        if !self.root_path.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root_path)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let is_yaml = matches!(
                path.extension().and_then(|s| s.to_str()),
                Some("yaml") | Some("yml")
            );
            if is_yaml {
                if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }
}

impl Default for ConfigStorage {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self::with_path(DEFAULT_DIR_NAME))
    }
}
