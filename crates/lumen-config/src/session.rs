use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::ConfigError;

/// Session options file, kept in the workspace root.
pub const SESSION_OPTIONS_FILE: &str = ".lumen-config.json";

/// String-keyed JSON options set by the user during a session.
///
/// Keys this crate does not interpret are kept and written back untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionOptions {
    path: PathBuf,
    values: Map<String, Value>,
}

impl SessionOptions {
    /// Options backed by `<root>/.lumen-config.json`, starting empty.
    pub fn for_root(root: &Path) -> Self {
        Self {
            path: root.join(SESSION_OPTIONS_FILE),
            values: Map::new(),
        }
    }

    /// Read the options file under `root`; a missing file yields empty options.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let mut options = Self::for_root(root);
        let text = match std::fs::read_to_string(&options.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(options),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: options.path,
                    source,
                })
            }
        };
        if !text.trim().is_empty() {
            options.values = serde_json::from_str(&text).map_err(|source| ConfigError::Json {
                path: options.path.clone(),
                source,
            })?;
        }
        Ok(options)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Typed lookup; `None` when missing or of the wrong shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Set `key`, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Write the options back as pretty-printed JSON.
    pub fn save(&self) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: self.path.clone(),
            source,
        };
        let mut text = serde_json::to_string_pretty(&self.values).map_err(|source| {
            ConfigError::Json {
                path: self.path.clone(),
                source,
            }
        })?;
        text.push('\n');
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(&self.path, text).map_err(io_err)?;
        tracing::debug!(
            target = "lumen.config",
            path = %self.path.display(),
            keys = self.values.len(),
            "saved session options"
        );
        Ok(())
    }
}
