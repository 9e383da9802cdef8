//! Workspace project discovery.
//!
//! A workspace folder either holds a single `.lmproj` descriptor (the root project) or is treated
//! as an implicit project made of its top-level `.lm` files. Descriptors pull in further projects
//! through `ProjectReference` items; the resulting graph is returned in build order.

mod descriptor;
mod discover;
mod model;

use std::path::PathBuf;

pub use descriptor::{
    parse_descriptor, parse_descriptor_str, ProjectDescriptor, DESCRIPTOR_EXTENSION,
    SOURCE_EXTENSION,
};
pub use discover::{descriptor_set, load_graph, LoadOptions};
pub use model::{InvalidPackageReference, PackageReference, Project, ProjectGraph};

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("workspace root {root} is not a directory")]
    MissingRoot { root: PathBuf },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Xml {
        path: PathBuf,
        #[source]
        source: roxmltree::Error,
    },

    #[error("invalid project descriptor {path}: {message}")]
    InvalidDescriptor { path: PathBuf, message: String },
}
