//! Interactive snippet accumulation.
//!
//! Every submission recompiles the accepted history together with the new fragment. A fragment
//! joins the history only when none of the resulting errors belong to it, so a bad cell never
//! disturbs what was accepted before.

mod history;
mod wrap;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use lumen_cache::{ArtifactCache, AssemblyArtifact};
use lumen_compiler::{
    compile_guarded, emit_guarded, load_references_guarded, ArtifactReference, CompileOptions,
    CompileRequest, Compiler, Declaration,
};
use lumen_core::{codes, CompileUnit, Diagnostic, UnitId};
use lumen_refs::{ClosureResolver, LibraryHandle, LibraryLoader, ReferenceClosure};

pub use history::SnippetHistory;
pub use wrap::{
    SnippetSettings, DEFAULT_AUTO_OPEN, DEFAULT_SNIPPET_NAMESPACE, NAMESPACE_ALREADY_OPEN,
};

/// Logical cache name of the snippet session's artifact; overwritten by every accepted compile.
pub const SNIPPET_ARTIFACT_NAME: &str = "snippets-session";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Nothing accepted yet and no failed attempt.
    Empty,
    /// The last submission was accepted.
    Accumulated,
    /// A submission is being compiled.
    Compiling,
    /// The last submission was rejected; the history is unchanged.
    Failed,
}

/// Result of one snippet submission.
#[derive(Debug, Clone)]
pub struct SnippetOutcome {
    pub accepted: bool,
    /// Declarations contributed by the submitted fragment. A rejected fragment reports what the
    /// compiler recovered from it; none of these join the session.
    pub declarations: Vec<Declaration>,
    pub diagnostics: Vec<Diagnostic>,
    /// The artifact built for the whole history, when accepted.
    pub artifact: Option<AssemblyArtifact>,
    /// `true` when the reference set changed and was reloaded before compiling.
    pub references_reloaded: bool,
}

impl SnippetOutcome {
    fn rejected(diagnostics: Vec<Diagnostic>, references_reloaded: bool) -> Self {
        Self {
            accepted: false,
            declarations: Vec::new(),
            diagnostics,
            artifact: None,
            references_reloaded,
        }
    }
}

/// Owns the snippet history and the session's reference closure.
#[derive(Debug)]
pub struct SnippetEngine<L: LibraryLoader> {
    compiler: Arc<dyn Compiler>,
    resolver: ClosureResolver<L>,
    closure: ReferenceClosure,
    /// Key set currently loaded into the compiler, if any load succeeded.
    loaded_keys: Option<BTreeSet<PathBuf>>,
    history: SnippetHistory,
    declarations: Vec<Declaration>,
    settings: SnippetSettings,
    cache: ArtifactCache,
    artifacts: Vec<ArtifactReference>,
    artifact: Option<AssemblyArtifact>,
    state: EngineState,
    last_diagnostics: Vec<Diagnostic>,
}

impl<L: LibraryLoader> SnippetEngine<L> {
    pub fn new(
        compiler: Arc<dyn Compiler>,
        resolver: ClosureResolver<L>,
        cache: ArtifactCache,
        settings: SnippetSettings,
    ) -> Self {
        Self {
            compiler,
            resolver,
            closure: ReferenceClosure::default(),
            loaded_keys: None,
            history: SnippetHistory::default(),
            declarations: Vec::new(),
            settings,
            cache,
            artifacts: Vec::new(),
            artifact: None,
            state: EngineState::Empty,
            last_diagnostics: Vec::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn history(&self) -> &SnippetHistory {
        &self.history
    }

    pub fn settings(&self) -> &SnippetSettings {
        &self.settings
    }

    pub fn closure(&self) -> &ReferenceClosure {
        &self.closure
    }

    /// Declarations of every accepted snippet.
    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn declared_names(&self) -> Vec<String> {
        self.declarations
            .iter()
            .map(|decl| decl.qualified_name.clone())
            .collect()
    }

    /// The most recently accepted artifact.
    pub fn artifact(&self) -> Option<&AssemblyArtifact> {
        self.artifact.as_ref()
    }

    pub fn last_diagnostics(&self) -> &[Diagnostic] {
        &self.last_diagnostics
    }

    /// Extend the session's reference closure with `seeds`.
    ///
    /// Only the new frontier is traversed. The compiler picks the change up on the next submission.
    pub fn add_references(&mut self, seeds: &[LibraryHandle]) {
        if seeds.is_empty() {
            return;
        }
        self.closure = self.resolver.extend(&self.closure, seeds);
    }

    /// Load seeds by name and extend the closure with those that load.
    pub fn add_reference_names<'a>(
        &mut self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Vec<Diagnostic> {
        let (seeds, diagnostics) = self.resolver.load_seeds(names);
        self.add_references(&seeds);
        diagnostics
    }

    /// Artifacts (typically workspace projects) that snippets compile against.
    pub fn set_artifact_references(&mut self, artifacts: Vec<ArtifactReference>) {
        self.artifacts = artifacts;
    }

    /// Compile `text` as snippet `id` on top of the accepted history.
    pub fn compile(&mut self, id: &str, text: &str) -> SnippetOutcome {
        let started = Instant::now();
        self.state = EngineState::Compiling;

        let outcome = self.compile_inner(UnitId::snippet(id), text);

        self.state = if outcome.accepted {
            EngineState::Accumulated
        } else {
            EngineState::Failed
        };
        self.last_diagnostics = outcome.diagnostics.clone();

        tracing::debug!(
            target = "lumen.snippets",
            snippet = id,
            accepted = outcome.accepted,
            history = self.history.len(),
            diagnostics = outcome.diagnostics.len(),
            references_reloaded = outcome.references_reloaded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "compiled snippet"
        );
        outcome
    }

    fn compile_inner(&mut self, id: UnitId, text: &str) -> SnippetOutcome {
        let projection = self.closure.projection();
        let keys = self.closure.key_set();

        // A changed reference set can retype earlier snippets, so it is reloaded before the
        // history is recompiled.
        let references_reloaded = self.loaded_keys.as_ref() != Some(&keys);
        if references_reloaded {
            if let Err(diagnostic) = load_references_guarded(self.compiler.as_ref(), &projection) {
                self.loaded_keys = None;
                return SnippetOutcome::rejected(vec![diagnostic], true);
            }
            tracing::debug!(
                target = "lumen.snippets",
                references = keys.len(),
                "reloaded references"
            );
            self.loaded_keys = Some(keys.clone());
        }

        let candidate = CompileUnit::new(id.clone(), self.settings.wrap(text));
        let units = self.history.with_candidate(&candidate);
        let options = CompileOptions {
            suppressed_codes: self.settings.suppressed_codes.clone(),
            ..CompileOptions::default()
        };
        let request = CompileRequest {
            units: &units,
            references: &projection,
            artifacts: &self.artifacts,
            options: &options,
        };

        let compilation = compile_guarded(self.compiler.as_ref(), &request);
        let mut diagnostics = compilation.diagnostics.clone();
        let fragment_declarations: Vec<Declaration> =
            compilation.program.declarations_in(&id).cloned().collect();

        let blocked = compilation.errors_in(&id).next().is_some()
            || diagnostics.iter().any(|d| d.is_error() && d.unit.is_none());
        if blocked {
            return SnippetOutcome {
                declarations: fragment_declarations,
                ..SnippetOutcome::rejected(diagnostics, references_reloaded)
            };
        }

        let emitted = match emit_guarded(self.compiler.as_ref(), &compilation.program, &request) {
            Ok(emitted) => emitted,
            Err(diagnostic) => {
                diagnostics.push(diagnostic);
                return SnippetOutcome {
                    declarations: fragment_declarations,
                    ..SnippetOutcome::rejected(diagnostics, references_reloaded)
                };
            }
        };

        let declarations = compilation.program.real_source_declarations();
        let artifact = AssemblyArtifact::new(
            self.cache.artifact_path(SNIPPET_ARTIFACT_NAME),
            emitted.image,
            declarations.clone(),
            emitted.ir,
        );
        if let Err(err) = self.cache.store(&artifact) {
            diagnostics.push(Diagnostic::warning(
                codes::ARTIFACT_NOT_PERSISTED,
                format!(
                    "snippet artifact could not be written to {}: {err}",
                    artifact.path().display()
                ),
            ));
        }

        self.history.accept(candidate, keys);
        self.declarations = declarations;
        self.artifact = Some(artifact.clone());

        SnippetOutcome {
            accepted: true,
            declarations: fragment_declarations,
            diagnostics,
            artifact: Some(artifact),
            references_reloaded,
        }
    }
}
