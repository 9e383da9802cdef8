use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use lumen_compiler::{
    Compilation, CompileRequest, Compiler, CompilerFault, Declaration, DeclarationKind,
    EmittedImage, TypedProgram,
};
use lumen_core::{CompileUnit, Diagnostic, Span, UnitId};
use lumen_refs::ReferenceProjection;
use regex::Regex;

/// Diagnostic codes produced by [`ToyCompiler`].
pub mod codes {
    pub const UNBALANCED_DELIMITER: &str = "LMN1001";
    pub const DUPLICATE_DECLARATION: &str = "LMN1002";
    pub const UNKNOWN_NAMESPACE: &str = "LMN1003";
    /// "namespace already open"; fires for a repeated `open` within one unit.
    pub const DUPLICATE_OPEN: &str = "LMN2001";
}

/// Namespaces that are always resolvable, as if shipped with the compiler.
pub const DEFAULT_BUILTIN_NAMESPACES: &[&str] = &["Lumen.Intrinsic", "Lumen.Canon"];

fn namespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"namespace\s+([A-Za-z_][\w.]*)\s*\{").expect("namespace regex should compile")
    })
}

fn open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[\s{;])open\s+([A-Za-z_][\w.]*)(?:\s+as\s+[A-Za-z_][\w.]*)?\s*;")
            .expect("open regex should compile")
    })
}

fn declaration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[\s{;}])(operation|function|newtype)\s+([A-Za-z_]\w*)")
            .expect("declaration regex should compile")
    })
}

fn attribute_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*@(([A-Za-z_]\w*)(?:\(.*\))?)\s*$").expect("attribute regex should compile")
    })
}

fn doc_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*///\s?(.*)$").expect("doc regex should compile"))
}

/// Deterministic regex-driven stand-in for the guest-language compiler.
///
/// It recognises `namespace N { ... }`, `open N;` / `open N as A;`, `operation`, `function` and
/// `newtype` declarations, `///` documentation and `@Attr(...)` lines (with `@Deprecated`
/// marking a declaration deprecated). Diagnostics:
///
/// * `LMN1001` unbalanced delimiters; the unit contributes no declarations.
/// * `LMN1002` a qualified name declared by an earlier unit; reported on the later unit.
/// * `LMN1003` `open` of a namespace that no unit, artifact, semantic reference or builtin provides.
/// * `LMN2001` warning for an `open` repeated within one unit.
///
/// Every invocation is recorded so tests can assert on what was compiled.
#[derive(Debug)]
pub struct ToyCompiler {
    builtin_namespaces: BTreeSet<String>,
    panic_marker: Option<String>,
    compiles: Mutex<Vec<Vec<UnitId>>>,
    emits: AtomicUsize,
    reference_loads: Mutex<Vec<BTreeSet<PathBuf>>>,
}

impl Default for ToyCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl ToyCompiler {
    pub fn new() -> Self {
        Self {
            builtin_namespaces: DEFAULT_BUILTIN_NAMESPACES
                .iter()
                .map(|ns| ns.to_string())
                .collect(),
            panic_marker: None,
            compiles: Mutex::new(Vec::new()),
            emits: AtomicUsize::new(0),
            reference_loads: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_builtin_namespaces(mut self, namespaces: &[&str]) -> Self {
        self.builtin_namespaces = namespaces.iter().map(|ns| ns.to_string()).collect();
        self
    }

    /// Panic inside `compile` whenever any unit contains `marker`.
    #[must_use]
    pub fn panic_on(mut self, marker: impl Into<String>) -> Self {
        self.panic_marker = Some(marker.into());
        self
    }

    pub fn compile_count(&self) -> usize {
        lock(&self.compiles).len()
    }

    /// Unit ids passed to every `compile` call, oldest first.
    pub fn compiled_units(&self) -> Vec<Vec<UnitId>> {
        lock(&self.compiles).clone()
    }

    pub fn last_compiled_units(&self) -> Option<Vec<UnitId>> {
        lock(&self.compiles).last().cloned()
    }

    pub fn emit_count(&self) -> usize {
        self.emits.load(Ordering::SeqCst)
    }

    pub fn reference_load_count(&self) -> usize {
        lock(&self.reference_loads).len()
    }

    /// Key set of the most recently loaded reference projection.
    pub fn loaded_references(&self) -> Option<BTreeSet<PathBuf>> {
        lock(&self.reference_loads).last().cloned()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct ParsedUnit {
    declarations: Vec<(Declaration, Span)>,
    namespaces: Vec<String>,
    opens: Vec<(String, Span)>,
    diagnostics: Vec<Diagnostic>,
}

/// Offset of the first delimiter that has no partner, skipping strings and `//` comments.
fn unbalanced_delimiter(text: &str) -> Option<(usize, char)> {
    let mut stack: Vec<(usize, char)> = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        match ch {
            '"' => {
                let mut escaped = false;
                for (_, c) in chars.by_ref() {
                    match c {
                        '\\' if !escaped => escaped = true,
                        '"' if !escaped => break,
                        _ => escaped = false,
                    }
                }
            }
            '/' if matches!(chars.peek(), Some((_, '/'))) => {
                for (_, c) in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '(' | '{' | '[' => stack.push((idx, ch)),
            ')' | '}' | ']' => {
                let expected = match ch {
                    ')' => '(',
                    '}' => '{',
                    _ => '[',
                };
                match stack.pop() {
                    Some((_, open)) if open == expected => {}
                    _ => return Some((idx, ch)),
                }
            }
            _ => {}
        }
    }
    stack.pop()
}

fn parse_unit(unit: &CompileUnit) -> ParsedUnit {
    let text = unit.text.as_str();
    let mut parsed = ParsedUnit::default();

    if let Some((offset, ch)) = unbalanced_delimiter(text) {
        parsed.diagnostics.push(
            Diagnostic::error(
                codes::UNBALANCED_DELIMITER,
                format!("unbalanced delimiter `{ch}`"),
            )
            .in_unit(unit.id.clone())
            .with_span(Span::from_offsets(text, offset, offset + ch.len_utf8())),
        );
        return parsed;
    }

    let namespace_starts: Vec<(usize, String)> = namespace_re()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((whole.start(), caps[1].to_string()))
        })
        .collect();
    parsed.namespaces = namespace_starts.iter().map(|(_, ns)| ns.clone()).collect();
    let namespace_at = |offset: usize| {
        namespace_starts
            .iter()
            .take_while(|(start, _)| *start < offset)
            .last()
            .map(|(_, ns)| ns.as_str())
    };

    let mut seen_opens = HashSet::new();
    let mut docs: Vec<String> = Vec::new();
    let mut attributes: Vec<String> = Vec::new();
    let mut offset = 0usize;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let content = line.trim_end_matches(['\n', '\r']);
        let span = Span::from_offsets(text, line_start, line_start + content.trim_end().len());

        if let Some(caps) = doc_re().captures(content) {
            docs.push(caps[1].trim_end().to_string());
            continue;
        }
        if let Some(caps) = attribute_re().captures(content) {
            attributes.push(caps[1].to_string());
            continue;
        }

        for caps in open_re().captures_iter(content) {
            let name = caps[1].to_string();
            if !seen_opens.insert(name.clone()) {
                parsed.diagnostics.push(
                    Diagnostic::warning(
                        codes::DUPLICATE_OPEN,
                        format!("namespace `{name}` is already open"),
                    )
                    .in_unit(unit.id.clone())
                    .with_span(span),
                );
            }
            parsed.opens.push((name, span));
        }

        for caps in declaration_re().captures_iter(content) {
            let keyword = caps.get(1).map_or(0, |m| m.start());
            let kind = match &caps[1] {
                "operation" => DeclarationKind::Operation,
                "function" => DeclarationKind::Function,
                _ => DeclarationKind::Type,
            };
            let leaf = &caps[2];
            let qualified_name = match namespace_at(line_start + keyword) {
                Some(ns) => format!("{ns}.{leaf}"),
                None => leaf.to_string(),
            };
            let deprecated = attributes
                .iter()
                .any(|attr| attr == "Deprecated" || attr.starts_with("Deprecated("));
            let documentation = (!docs.is_empty()).then(|| docs.join("\n"));
            parsed.declarations.push((
                Declaration {
                    qualified_name,
                    kind,
                    source: unit.id.clone(),
                    documentation,
                    attributes: std::mem::take(&mut attributes),
                    deprecated,
                },
                span,
            ));
            docs.clear();
        }

        if !content.trim().is_empty() {
            docs.clear();
            attributes.clear();
        }
    }

    parsed
}

fn known_namespaces(
    builtins: &BTreeSet<String>,
    parsed: &[ParsedUnit],
    request: &CompileRequest<'_>,
) -> HashSet<String> {
    let mut known: HashSet<String> = builtins.iter().cloned().collect();
    for unit in parsed {
        known.extend(unit.namespaces.iter().cloned());
    }
    for artifact in request.artifacts {
        known.extend(artifact.declarations.iter().map(|d| d.namespace().to_string()));
    }
    for library in &request.references.semantic {
        known.insert(library.simple_name().to_string());
    }
    known
}

impl Compiler for ToyCompiler {
    fn load_references(&self, references: &ReferenceProjection) -> Result<(), CompilerFault> {
        lock(&self.reference_loads).push(references.key_set());
        Ok(())
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<Compilation, CompilerFault> {
        lock(&self.compiles).push(request.units.iter().map(|u| u.id.clone()).collect());

        if let Some(marker) = &self.panic_marker {
            if request.units.iter().any(|u| u.text.contains(marker.as_str())) {
                panic!("toy compiler hit panic marker `{marker}`");
            }
        }

        let parsed: Vec<ParsedUnit> = request.units.iter().map(parse_unit).collect();
        let known = known_namespaces(&self.builtin_namespaces, &parsed, request);

        let mut program = TypedProgram {
            units: request.units.iter().map(|u| u.id.clone()).collect(),
            declarations: Vec::new(),
        };
        let mut diagnostics = Vec::new();
        let mut declared = HashSet::new();

        for (unit, parsed) in request.units.iter().zip(parsed) {
            diagnostics.extend(parsed.diagnostics);
            for (namespace, span) in parsed.opens {
                if !known.contains(&namespace) {
                    diagnostics.push(
                        Diagnostic::error(
                            codes::UNKNOWN_NAMESPACE,
                            format!("no namespace named `{namespace}` is available"),
                        )
                        .in_unit(unit.id.clone())
                        .with_span(span),
                    );
                }
            }
            for (declaration, span) in parsed.declarations {
                if !declared.insert(declaration.qualified_name.clone()) {
                    diagnostics.push(
                        Diagnostic::error(
                            codes::DUPLICATE_DECLARATION,
                            format!("`{}` is declared more than once", declaration.qualified_name),
                        )
                        .in_unit(unit.id.clone())
                        .with_span(span),
                    );
                    continue;
                }
                program.declarations.push(declaration);
            }
        }

        for artifact in request.artifacts {
            program
                .declarations
                .extend(artifact.declarations.iter().cloned());
        }

        Ok(Compilation {
            program,
            diagnostics,
        })
    }

    fn emit(
        &self,
        program: &TypedProgram,
        request: &CompileRequest<'_>,
    ) -> Result<EmittedImage, CompilerFault> {
        self.emits.fetch_add(1, Ordering::SeqCst);

        let mut image = String::from("toy-image v1\n");
        for declaration in program.real_source_declarations() {
            image.push_str(&format!(
                "{:?} {}{}\n",
                declaration.kind,
                declaration.qualified_name,
                if declaration.deprecated { " deprecated" } else { "" }
            ));
        }

        let options = request.options;
        let ir = options.is_executable.then(|| {
            format!(
                "entry={}\ncapability={}\n",
                options.entry_point.as_deref().unwrap_or(""),
                options.capability.as_deref().unwrap_or("")
            )
            .into_bytes()
        });

        Ok(EmittedImage {
            image: image.into_bytes(),
            ir,
        })
    }
}
