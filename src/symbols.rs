//! Link-state symbol algebra.
//!
//! Resolution state is two name sets, defined and undefined, kept disjoint:
//! after every update any name present in `defined` is removed from
//! `undefined`. `BTreeSet` keeps iteration (and therefore logging and
//! archive-extraction order) deterministic.

use std::collections::BTreeSet;

use crate::bitcode::Unit;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SymbolSet {
    pub defined: BTreeSet<String>,
    pub undefined: BTreeSet<String>,
}

impl SymbolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract the symbol sets of a merged output unit.
    ///
    /// "main" is treated specially: if the unit has no definition of "main"
    /// it is inserted into the undefined set even though nothing referenced
    /// it. This seeds demand-driven archive extraction for the entry point.
    pub fn scan(unit: &Unit) -> Self {
        let mut set = unit.symbols();
        if !set.defined.contains("main") {
            set.undefined.insert("main".to_string());
        }
        set.normalize();
        set
    }

    /// Union `other` into this set, then subtract defined from undefined.
    pub fn merge(&mut self, other: &SymbolSet) {
        self.defined.extend(other.defined.iter().cloned());
        self.undefined.extend(other.undefined.iter().cloned());
        self.normalize();
    }

    /// Re-establish the disjointness invariant.
    pub fn normalize(&mut self) {
        for name in &self.defined {
            self.undefined.remove(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcode::{SymbolKind, Unit};

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn merge_keeps_sets_disjoint() {
        let mut global = SymbolSet {
            defined: set(&["foo"]),
            undefined: set(&["bar", "baz"]),
        };
        let local = SymbolSet {
            defined: set(&["bar"]),
            undefined: set(&["foo", "qux"]),
        };
        global.merge(&local);
        assert_eq!(global.defined, set(&["foo", "bar"]));
        assert_eq!(global.undefined, set(&["baz", "qux"]));
        assert!(global.defined.is_disjoint(&global.undefined));
    }

    #[test]
    fn scan_seeds_main_when_missing() {
        let mut unit = Unit::new("t", "le32-none-ndk");
        unit.add_symbol("foo", SymbolKind::Defined);
        let set = SymbolSet::scan(&unit);
        assert!(set.undefined.contains("main"));

        unit.add_symbol("main", SymbolKind::Defined);
        let set = SymbolSet::scan(&unit);
        assert!(!set.undefined.contains("main"));
    }

    #[test]
    fn scan_does_not_seed_main_for_alias_definition() {
        let mut unit = Unit::new("t", "le32-none-ndk");
        unit.add_symbol("main", SymbolKind::Alias);
        let set = SymbolSet::scan(&unit);
        assert!(set.defined.contains("main"));
        assert!(set.undefined.is_empty());
    }
}
