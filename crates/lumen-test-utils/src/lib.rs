//! Utilities shared by Lumen tests.
//!
//! The centrepiece is [`ToyCompiler`], a small deterministic stand-in for the real guest-language
//! compiler that understands just enough syntax to exercise the orchestration layer.

pub mod env;
pub mod fixtures;
mod libraries;
mod toy;

pub use env::EnvOverrides;
pub use fixtures::{set_mtime, write_files};
pub use libraries::StaticLibraryLoader;
pub use toy::{codes, ToyCompiler, DEFAULT_BUILTIN_NAMESPACES};
