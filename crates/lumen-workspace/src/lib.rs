//! A Lumen workspace session.
//!
//! [`Workspace`] ties the pieces together: it loads and builds the project graph, runs the
//! snippet session against the resulting artifacts, and keeps an operation catalog over both.
//! Reloads run on a single background worker; completed reloads are announced to subscribers as
//! [`ReloadEvent`]s.

mod events;
mod packages;
mod reload;
mod watch;
mod workspace;

use std::path::PathBuf;

use thiserror::Error;

pub use events::{ReloadEvent, ReloadStatus};
pub use packages::{LibraryPackageResolver, NoopPackageResolver, PackageResolver};
pub use watch::{
    categorize, normalize_event, requests_rescan, ChangeCategory, FileChange, FileWatcher,
    WatchConfig, WatchSignal,
};
pub use workspace::{OperationMetadata, Workspace, WorkspaceBuilder, SNIPPETS_SLOT};

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Project(#[from] lumen_project::ProjectError),
    #[error(transparent)]
    Config(#[from] lumen_config::ConfigError),
    #[error(transparent)]
    InvalidPackage(#[from] lumen_project::InvalidPackageReference),
    #[error("project descriptor {path} does not exist")]
    MissingProject { path: PathBuf },
    #[error("the reload worker has stopped")]
    WorkerStopped,
}

pub type Result<T, E = WorkspaceError> = std::result::Result<T, E>;
