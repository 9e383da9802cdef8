use std::collections::BTreeSet;
use std::path::PathBuf;

use lumen_core::{CompileUnit, UnitId};

/// Ordered, successfully accepted snippet units plus the reference key set they were compiled
/// against.
///
/// Only [`SnippetEngine`](crate::SnippetEngine) mutates a history, and only after the new unit
/// compiled without errors of its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnippetHistory {
    units: Vec<CompileUnit>,
    reference_keys: BTreeSet<PathBuf>,
}

impl SnippetHistory {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn units(&self) -> &[CompileUnit] {
        &self.units
    }

    pub fn ids(&self) -> impl Iterator<Item = &UnitId> {
        self.units.iter().map(|unit| &unit.id)
    }

    pub fn get(&self, id: &UnitId) -> Option<&CompileUnit> {
        self.units.iter().find(|unit| &unit.id == id)
    }

    /// Reference closure key set used for the last accepted compilation.
    pub fn reference_keys(&self) -> &BTreeSet<PathBuf> {
        &self.reference_keys
    }

    /// The unit list for compiling `candidate` on top of this history.
    ///
    /// A candidate reusing an accepted id takes that unit's place; otherwise it goes last.
    pub(crate) fn with_candidate(&self, candidate: &CompileUnit) -> Vec<CompileUnit> {
        let mut units = self.units.clone();
        match units.iter_mut().find(|unit| unit.id == candidate.id) {
            Some(slot) => *slot = candidate.clone(),
            None => units.push(candidate.clone()),
        }
        units
    }

    pub(crate) fn accept(&mut self, candidate: CompileUnit, reference_keys: BTreeSet<PathBuf>) {
        match self.units.iter_mut().find(|unit| unit.id == candidate.id) {
            Some(slot) => *slot = candidate,
            None => self.units.push(candidate),
        }
        self.reference_keys = reference_keys;
    }
}
