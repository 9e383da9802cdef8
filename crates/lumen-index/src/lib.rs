//! Operation catalog: declared callables and types, extracted from artifacts and resolvable by
//! name.
//!
//! Extraction happens once per artifact identity ([`ArtifactId`]) and is reused until the
//! artifact published under a slot is replaced by one with a different image.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use lumen_cache::{ArtifactId, AssemblyArtifact};
use lumen_compiler::{Declaration, DeclarationKind};
use lumen_core::UnitId;
use serde::{Deserialize, Serialize};

/// A declared callable or type as exposed to documentation and completion consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolEntry {
    pub qualified_name: String,
    pub kind: DeclarationKind,
    pub source: UnitId,
    pub documentation: Option<String>,
    pub attributes: Vec<String>,
    pub deprecated: bool,
}

impl SymbolEntry {
    pub fn namespace(&self) -> &str {
        self.qualified_name
            .rsplit_once('.')
            .map(|(ns, _)| ns)
            .unwrap_or("")
    }

    pub fn leaf_name(&self) -> &str {
        self.qualified_name
            .rsplit_once('.')
            .map(|(_, leaf)| leaf)
            .unwrap_or(&self.qualified_name)
    }
}

impl From<&Declaration> for SymbolEntry {
    fn from(decl: &Declaration) -> Self {
        Self {
            qualified_name: decl.qualified_name.clone(),
            kind: decl.kind,
            source: decl.source.clone(),
            documentation: decl.documentation.clone(),
            attributes: decl.attributes.clone(),
            deprecated: decl.deprecated,
        }
    }
}

/// Stable sort moving deprecated entries after all others, keeping relative order in each group.
pub fn deprecated_last(entries: &mut [SymbolEntry]) {
    entries.sort_by_key(|entry| entry.deprecated);
}

/// Build the ordered entry list for a set of declarations.
pub fn extract_entries(declarations: &[Declaration]) -> Vec<SymbolEntry> {
    let mut entries: Vec<SymbolEntry> = declarations.iter().map(SymbolEntry::from).collect();
    deprecated_last(&mut entries);
    entries
}

/// Resolve `name` against `entries` in enumeration order.
///
/// A name containing `.` only matches an identical fully-qualified name. A bare name matches the
/// first entry whose leaf name is equal.
pub fn resolve_in<'a>(entries: &'a [SymbolEntry], name: &str) -> Option<&'a SymbolEntry> {
    if name.contains('.') {
        entries.iter().find(|entry| entry.qualified_name == name)
    } else {
        entries.iter().find(|entry| entry.leaf_name() == name)
    }
}

/// Group qualified names by namespace, preserving entry order within each namespace.
pub fn group_by_namespace<'a>(
    entries: impl IntoIterator<Item = &'a SymbolEntry>,
) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in entries {
        grouped
            .entry(entry.namespace().to_string())
            .or_default()
            .push(entry.leaf_name().to_string());
    }
    grouped
}

/// Memoized symbol lists for the artifacts currently published under named slots.
///
/// Slots are enumerated in the order they were first published; republishing a slot replaces its
/// artifact in place.
#[derive(Debug, Default)]
pub struct OperationCatalog {
    memo: HashMap<ArtifactId, Arc<[SymbolEntry]>>,
    slots: Vec<(String, ArtifactId)>,
    extractions: u64,
}

impl OperationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordered symbol entries of `artifact`, extracted at most once per artifact identity.
    pub fn operations(&mut self, artifact: &AssemblyArtifact) -> Arc<[SymbolEntry]> {
        if let Some(entries) = self.memo.get(artifact.id()) {
            return Arc::clone(entries);
        }

        let entries: Arc<[SymbolEntry]> = extract_entries(artifact.declarations()).into();
        self.extractions += 1;
        tracing::debug!(
            target = "lumen.index",
            artifact = %artifact.id(),
            entries = entries.len(),
            "extracted operations"
        );
        self.memo.insert(artifact.id().clone(), Arc::clone(&entries));
        entries
    }

    /// Make `artifact` the current artifact for `slot`.
    pub fn publish(&mut self, slot: &str, artifact: &AssemblyArtifact) {
        self.operations(artifact);
        let id = artifact.id().clone();
        match self.slots.iter_mut().find(|(name, _)| name == slot) {
            Some((_, current)) => *current = id,
            None => self.slots.push((slot.to_string(), id)),
        }
        self.prune();
    }

    /// Drop `slot` from the catalog. Returns `true` when it was present.
    pub fn retract(&mut self, slot: &str) -> bool {
        let before = self.slots.len();
        self.slots.retain(|(name, _)| name != slot);
        let removed = self.slots.len() != before;
        if removed {
            self.prune();
        }
        removed
    }

    /// Retain only the slots for which `keep` returns `true`.
    pub fn retain_slots(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.slots.retain(|(name, _)| keep(name));
        self.prune();
    }

    pub fn slots(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|(name, _)| name.as_str())
    }

    /// Entries published under `slot`, if any.
    pub fn slot_entries(&self, slot: &str) -> Option<Arc<[SymbolEntry]>> {
        let (_, id) = self.slots.iter().find(|(name, _)| name == slot)?;
        self.memo.get(id).cloned()
    }

    /// All published entries across slots whose name satisfies `include`, deprecated last.
    pub fn entries_where(&self, mut include: impl FnMut(&str) -> bool) -> Vec<SymbolEntry> {
        let mut entries: Vec<SymbolEntry> = self
            .slots
            .iter()
            .filter(|(name, _)| include(name))
            .filter_map(|(_, id)| self.memo.get(id))
            .flat_map(|slot| slot.iter().cloned())
            .collect();
        deprecated_last(&mut entries);
        entries
    }

    pub fn entries(&self) -> Vec<SymbolEntry> {
        self.entries_where(|_| true)
    }

    pub fn resolve(&self, name: &str) -> Option<SymbolEntry> {
        resolve_in(&self.entries(), name).cloned()
    }

    pub fn by_namespace(&self) -> BTreeMap<String, Vec<String>> {
        group_by_namespace(&self.entries())
    }

    /// How many times declarations have been extracted from an artifact.
    pub fn extraction_count(&self) -> u64 {
        self.extractions
    }

    fn prune(&mut self) {
        let live: HashSet<&ArtifactId> = self.slots.iter().map(|(_, id)| id).collect();
        self.memo.retain(|id, _| live.contains(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(name: &str, deprecated: bool) -> Declaration {
        Declaration {
            qualified_name: name.to_string(),
            kind: DeclarationKind::Operation,
            source: UnitId::snippet("1"),
            documentation: None,
            attributes: Vec::new(),
            deprecated,
        }
    }

    #[test]
    fn deprecated_entries_sort_last_stably() {
        let entries = extract_entries(&[decl("B", true), decl("A", false), decl("C", false)]);
        let names: Vec<_> = entries.iter().map(|e| e.qualified_name.as_str()).collect();
        assert_eq!(names, vec!["A", "C", "B"]);
    }

    #[test]
    fn qualified_names_match_exactly_and_bare_names_match_leaves() {
        let entries = extract_entries(&[
            decl("Old.Api.Run", true),
            decl("New.Api.Run", false),
            decl("New.Api.Stop", false),
        ]);

        assert_eq!(
            resolve_in(&entries, "Run").map(|e| e.qualified_name.as_str()),
            Some("New.Api.Run")
        );
        assert_eq!(
            resolve_in(&entries, "Old.Api.Run").map(|e| e.qualified_name.as_str()),
            Some("Old.Api.Run")
        );
        assert!(resolve_in(&entries, "Api.Run").is_none());
        assert!(resolve_in(&entries, "Missing").is_none());
    }

    #[test]
    fn grouping_splits_at_the_last_separator() {
        let entries = extract_entries(&[decl("A.B.C", false), decl("A.B.D", false), decl("E", false)]);
        let grouped = group_by_namespace(&entries);
        assert_eq!(grouped["A.B"], vec!["C".to_string(), "D".to_string()]);
        assert_eq!(grouped[""], vec!["E".to_string()]);
    }
}
