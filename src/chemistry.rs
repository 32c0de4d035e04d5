//! Chemistry triple ordering and model-name mapping.
//!
//! Reads carry a chemistry identifier resolved from the (binding kit,
//! sequencing kit, version) triple of the instrument run. Parsing the
//! mapping file is a caller concern; this module supplies the ordered key
//! type and the in-memory lookup with a fallback.

use std::collections::BTreeMap;

use serde::Serialize;

/// Identifies a sequencing chemistry by kits and software version.
///
/// Ordering is lexicographic over `(binding_kit, sequencing_kit,
/// major_version, minor_version)`, so the type is usable as an ordered map
/// key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ChemistryTriple {
    /// Binding kit part number
    pub binding_kit: u32,
    /// Sequencing kit part number
    pub sequencing_kit: u32,
    /// Basecaller major version
    pub major_version: u32,
    /// Basecaller minor version
    pub minor_version: u32,
}

impl ChemistryTriple {
    /// Creates a triple from its four components.
    #[must_use]
    pub fn new(binding_kit: u32, sequencing_kit: u32, major_version: u32, minor_version: u32) -> Self {
        ChemistryTriple { binding_kit, sequencing_kit, major_version, minor_version }
    }
}

/// Maps chemistry triples to model names.
#[derive(Debug, Clone, Default)]
pub struct ChemistryMapping {
    mapping: BTreeMap<ChemistryTriple, String>,
}

impl ChemistryMapping {
    /// Builds the mapping from `(triple, model name)` entries; a repeated
    /// triple keeps the last entry.
    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = (ChemistryTriple, String)>) -> Self {
        ChemistryMapping { mapping: entries.into_iter().collect() }
    }

    /// Resolves a triple to its model name, or `fallback` when unmapped.
    #[must_use]
    pub fn map_triple(&self, triple: &ChemistryTriple, fallback: &str) -> String {
        self.mapping.get(triple).cloned().unwrap_or_else(|| fallback.to_string())
    }
}
