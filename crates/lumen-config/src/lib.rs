//! Configuration for Lumen workspaces.
//!
//! `lumen.toml` (or `.lumen.toml`) in the workspace root configures the workspace, logging,
//! snippet wrapping and reference search. Everything is optional; a missing file means defaults.
//! Session options set at runtime are kept separately in `.lumen-config.json`.

mod logging;
mod session;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use logging::{init_tracing, LoggingConfig};
pub use session::{SessionOptions, SESSION_OPTIONS_FILE};

/// Environment variable overriding config discovery (absolute, or relative to the root).
pub const LUMEN_CONFIG_ENV_VAR: &str = "LUMEN_CONFIG";

/// File names probed in the workspace root, in order.
pub const CONFIG_FILE_NAMES: &[&str] = &["lumen.toml", ".lumen.toml"];

/// Default cache folder, relative to the workspace root.
pub const DEFAULT_CACHE_FOLDER: &str = "obj";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Toml(err.message().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LumenConfig {
    pub workspace: WorkspaceSettings,
    pub logging: LoggingConfig,
    pub snippets: SnippetConfig,
    pub references: ReferenceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSettings {
    /// Folder the project graph is discovered from.
    pub root_folder: PathBuf,
    /// Where artifacts are cached; `<root_folder>/obj` when unset.
    pub cache_folder: Option<PathBuf>,
    /// Watch the root for changes and reload automatically.
    pub monitor_for_changes: bool,
    /// Ignore a descriptor in the root folder and use its top-level sources instead.
    pub skip_auto_project_discovery: bool,
    /// Additional project descriptors loaded as roots.
    pub projects: Vec<PathBuf>,
    /// Package coordinates (`Name` or `Name::Version`) referenced by the session.
    pub packages: Vec<String>,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            root_folder: PathBuf::from("."),
            cache_folder: None,
            monitor_for_changes: false,
            skip_auto_project_discovery: false,
            projects: Vec::new(),
            packages: Vec::new(),
        }
    }
}

impl WorkspaceSettings {
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root_folder: root.into(),
            ..Self::default()
        }
    }

    /// Effective cache folder: the configured one (relative to the root) or `<root>/obj`.
    pub fn cache_folder(&self) -> PathBuf {
        match &self.cache_folder {
            Some(folder) => join_relative(&self.root_folder, folder),
            None => self.root_folder.join(DEFAULT_CACHE_FOLDER),
        }
    }
}

/// Overrides for the snippet wrapper; unset fields keep the engine defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnippetConfig {
    /// Synthetic namespace every snippet is wrapped in.
    pub namespace: Option<String>,
    /// Namespaces opened ahead of snippet text, mapped to an alias (empty for none).
    pub auto_open: Option<BTreeMap<String, String>>,
    /// Diagnostic codes dropped from snippet compilations.
    pub suppressed_codes: Option<Vec<String>>,
}

impl SnippetConfig {
    /// `auto_open` with empty aliases turned into `None`.
    pub fn auto_open_aliases(&self) -> Option<BTreeMap<String, Option<String>>> {
        self.auto_open.as_ref().map(|entries| {
            entries
                .iter()
                .map(|(name, alias)| {
                    let alias = alias.trim();
                    (name.clone(), (!alias.is_empty()).then(|| alias.to_string()))
                })
                .collect()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    /// Folders searched for library manifests, relative to the root.
    pub search_paths: Vec<PathBuf>,
    /// Libraries loaded into every session.
    pub libraries: Vec<String>,
    /// Identities treated as host-only; replaces the built-in list when set.
    pub known_irrelevant: Option<Vec<String>>,
}

impl LumenConfig {
    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Parse `text`, also returning the dotted paths of keys the schema does not know.
    pub fn load_from_str_with_unknown_keys(text: &str) -> Result<(Self, Vec<String>), ConfigError> {
        let mut unknown = Vec::new();
        let deserializer = toml::de::Deserializer::new(text);
        let config = serde_ignored::deserialize(deserializer, |path| {
            unknown.push(path.to_string().trim_start_matches('.').to_string());
        })?;
        unknown.sort();
        unknown.dedup();
        Ok((config, unknown))
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let (config, unknown) = Self::load_from_str_with_unknown_keys(&text)?;
        for key in unknown {
            tracing::warn!(
                target = "lumen.config",
                path = %path.display(),
                key = %key,
                "ignoring unknown config key"
            );
        }
        Ok(config)
    }

    /// Make every relative path absolute: the root against `workspace_root`, the rest against
    /// the resolved root.
    pub fn resolve_paths(&mut self, workspace_root: &Path) {
        let root = join_relative(workspace_root, &self.workspace.root_folder);
        self.workspace.root_folder = root.clone();
        if let Some(folder) = &self.workspace.cache_folder {
            self.workspace.cache_folder = Some(join_relative(&root, folder));
        }
        for project in &mut self.workspace.projects {
            *project = join_relative(&root, project);
        }
        for path in &mut self.references.search_paths {
            *path = join_relative(&root, path);
        }
        if let Some(file) = &self.logging.file {
            self.logging.file = Some(join_relative(&root, file));
        }
    }
}

fn join_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    if path == Path::new(".") {
        return base.to_path_buf();
    }
    base.join(path)
}

static CONFIG_ENV_LOCK: OnceLock<ReentrantMutex<()>> = OnceLock::new();

fn config_env_lock() -> &'static ReentrantMutex<()> {
    CONFIG_ENV_LOCK.get_or_init(|| ReentrantMutex::new(()))
}

/// Run `f` while holding the config environment lock.
///
/// Tests that set [`LUMEN_CONFIG_ENV_VAR`] wrap the mutation and the discovery in this so other
/// threads never observe the override.
pub fn with_config_env_lock<R>(f: impl FnOnce() -> R) -> R {
    let _guard = config_env_lock().lock();
    f()
}

/// Locate the config file for `workspace_root`.
///
/// Search order:
/// 1) `LUMEN_CONFIG` (absolute or relative to `workspace_root`)
/// 2) `lumen.toml` in `workspace_root`
/// 3) `.lumen.toml` in `workspace_root`
pub fn discover_config_path(workspace_root: &Path) -> Option<PathBuf> {
    let _guard = config_env_lock().lock();
    if let Some(value) = std::env::var_os(LUMEN_CONFIG_ENV_VAR) {
        let path = join_relative(workspace_root, Path::new(&value));
        return Some(path.canonicalize().unwrap_or(path));
    }

    CONFIG_FILE_NAMES
        .iter()
        .map(|name| workspace_root.join(name))
        .find(|path| path.is_file())
        .map(|path| path.canonicalize().unwrap_or(path))
}

/// Load the configuration for `workspace_root` with every path resolved.
///
/// Without a config file this is [`LumenConfig::default`] rooted at `workspace_root`.
pub fn load_for_workspace(
    workspace_root: &Path,
) -> Result<(LumenConfig, Option<PathBuf>), ConfigError> {
    let path = discover_config_path(workspace_root);
    let mut config = match &path {
        Some(path) => LumenConfig::load_from_path(path)?,
        None => LumenConfig::default(),
    };
    config.resolve_paths(workspace_root);
    tracing::debug!(
        target = "lumen.config",
        root = %config.workspace.root_folder.display(),
        config = ?path,
        "loaded workspace config"
    );
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_section() {
        let text = r#"
            [workspace]
            cache_folder = "build/cache"
            monitor_for_changes = true
            projects = ["Extra/Extra.lmproj"]
            packages = ["Contoso.Math::1.2.0"]

            [logging]
            level = "debug"
            json = true

            [snippets]
            namespace = "Notebook"
            suppressed_codes = ["LMN2001"]

            [snippets.auto_open]
            "Lumen.Canon" = ""
            "Lumen.Math" = "M"

            [references]
            search_paths = ["libs"]
            libraries = ["Contoso.Math"]
        "#;
        let mut config = LumenConfig::load_from_str(text).unwrap();
        config.resolve_paths(Path::new("/ws"));

        assert_eq!(config.workspace.root_folder, Path::new("/ws"));
        assert_eq!(config.workspace.cache_folder(), Path::new("/ws/build/cache"));
        assert!(config.workspace.monitor_for_changes);
        assert!(!config.workspace.skip_auto_project_discovery);
        assert_eq!(
            config.workspace.projects,
            vec![PathBuf::from("/ws/Extra/Extra.lmproj")]
        );
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.snippets.namespace.as_deref(), Some("Notebook"));
        let aliases = config.snippets.auto_open_aliases().unwrap();
        assert_eq!(aliases["Lumen.Canon"], None);
        assert_eq!(aliases["Lumen.Math"].as_deref(), Some("M"));
        assert_eq!(config.references.search_paths, vec![PathBuf::from("/ws/libs")]);
        assert_eq!(config.references.known_irrelevant, None);
    }

    #[test]
    fn defaults_cache_under_the_root() {
        let settings = WorkspaceSettings::for_root("/ws");
        assert_eq!(settings.cache_folder(), Path::new("/ws/obj"));
        assert!(!settings.monitor_for_changes);
    }

    #[test]
    fn unknown_keys_are_reported_with_their_path() {
        let (config, unknown) = LumenConfig::load_from_str_with_unknown_keys(
            "[workspace]\nmonitor_for_change = true\n[extra]\nx = 1\n",
        )
        .unwrap();
        assert!(!config.workspace.monitor_for_changes);
        assert_eq!(unknown, vec!["extra", "workspace.monitor_for_change"]);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let err = LumenConfig::load_from_str("[workspace]\nmonitor_for_changes = \"yes\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }
}
