//! The boundary between the orchestration layer and the guest-language compiler.
//!
//! The compiler itself (parser, type checker, code generator) is an external collaborator
//! reached through the [`Compiler`] trait. Everything else in Lumen talks to it through
//! [`compile_guarded`]/[`emit_guarded`], which turn faults into diagnostics so a misbehaving
//! compiler never takes the session down.

mod guard;

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use lumen_core::{CompileUnit, Diagnostic, UnitId};
use lumen_refs::ReferenceProjection;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use guard::{compile_guarded, emit_guarded, load_references_guarded};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeclarationKind {
    Operation,
    Function,
    Type,
}

/// A top-level callable or type declared by a typed program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    /// Fully-qualified name, e.g. `Contoso.Math.Add`.
    pub qualified_name: String,
    pub kind: DeclarationKind,
    pub source: UnitId,
    #[serde(default)]
    pub documentation: Option<String>,
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub deprecated: bool,
}

impl Declaration {
    /// Namespace part of the qualified name (empty for unqualified names).
    pub fn namespace(&self) -> &str {
        self.qualified_name
            .rsplit_once('.')
            .map(|(ns, _)| ns)
            .unwrap_or("")
    }

    /// Last segment of the qualified name.
    pub fn leaf_name(&self) -> &str {
        self.qualified_name
            .rsplit_once('.')
            .map(|(_, leaf)| leaf)
            .unwrap_or(&self.qualified_name)
    }
}

/// The typed output of a compilation, reduced to what the orchestration layer queries.
///
/// Always present, even for failed compilations: declarations from units that did parse are
/// still reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypedProgram {
    pub units: Vec<UnitId>,
    pub declarations: Vec<Declaration>,
}

impl TypedProgram {
    pub fn declared_names(&self) -> impl Iterator<Item = &str> {
        self.declarations.iter().map(|d| d.qualified_name.as_str())
    }

    pub fn declarations_in<'a>(&'a self, unit: &'a UnitId) -> impl Iterator<Item = &'a Declaration> {
        self.declarations.iter().filter(move |d| &d.source == unit)
    }

    /// Declarations that come from this program's own units, excluding anything the compiler
    /// surfaced from references.
    pub fn real_source_declarations(&self) -> Vec<Declaration> {
        self.declarations
            .iter()
            .filter(|d| self.units.contains(&d.source))
            .cloned()
            .collect()
    }
}

/// Result of one compile black-box invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compilation {
    pub program: TypedProgram,
    pub diagnostics: Vec<Diagnostic>,
}

impl Compilation {
    pub fn has_errors(&self) -> bool {
        lumen_core::has_errors(&self.diagnostics)
    }

    pub fn errors_in<'a>(&'a self, unit: &'a UnitId) -> impl Iterator<Item = &'a Diagnostic> {
        self.diagnostics
            .iter()
            .filter(move |d| d.is_error() && d.unit.as_ref() == Some(unit))
    }

    pub fn error_codes(&self) -> Vec<String> {
        self.diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| d.code.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Produce an executable image rather than a library.
    pub is_executable: bool,
    /// Entry point callable for executable builds.
    pub entry_point: Option<String>,
    /// Target capability level for executable builds.
    pub capability: Option<String>,
    /// Diagnostic codes dropped from this compilation's results.
    pub suppressed_codes: BTreeSet<String>,
}

/// A previously built artifact passed to the compiler as an additional reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReference {
    pub name: String,
    pub path: PathBuf,
    pub declarations: Vec<Declaration>,
}

#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    pub units: &'a [CompileUnit],
    pub references: &'a ReferenceProjection,
    pub artifacts: &'a [ArtifactReference],
    pub options: &'a CompileOptions,
}

/// Loadable binary output of the code generator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmittedImage {
    pub image: Vec<u8>,
    /// Optional intermediate representation payload for execution-target builds.
    pub ir: Option<Vec<u8>>,
}

#[derive(Debug, Error)]
pub enum CompilerFault {
    #[error("compiler panicked: {0}")]
    Panicked(String),
    #[error("failed to load references: {0}")]
    References(String),
    #[error("code generation failed: {0}")]
    Emit(String),
    #[error("internal compiler error: {0}")]
    Internal(String),
}

/// The external compiler.
///
/// Implementations must tolerate partial failure: declarations from units that parse are
/// returned even when other units have errors, and every diagnostic is attributed to the unit
/// it came from.
pub trait Compiler: Send + Sync + fmt::Debug {
    /// Replace the set of references the compiler resolves against.
    fn load_references(&self, _references: &ReferenceProjection) -> Result<(), CompilerFault> {
        Ok(())
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<Compilation, CompilerFault>;

    fn emit(
        &self,
        program: &TypedProgram,
        request: &CompileRequest<'_>,
    ) -> Result<EmittedImage, CompilerFault>;
}
