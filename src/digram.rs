use crate::symbol::SymbolValue;
use ahash::AHashMap as HashMap;
use slotmap::DefaultKey;
use std::collections::hash_map::Entry;

/// Canonical-occurrence index: maps a digram's value (not hash) to the
/// location of its first-seen occurrence.
///
/// Grounded on the teacher's `SymbolHash`-keyed `digram_index`, but keyed
/// directly on `(SymbolValue, SymbolValue)` rather than a 64-bit hash of each
/// side — `SymbolValue` is `Copy + Eq + Hash`, so there is no collision
/// bookkeeping to carry, unlike the teacher's hash-collision fallback in
/// `find_and_add_digram`.
#[derive(Debug, Default)]
pub(crate) struct DigramIndex {
    map: HashMap<(SymbolValue, SymbolValue), DefaultKey>,
}

impl DigramIndex {
    pub(crate) fn new() -> Self {
        Self {
            map: HashMap::default(),
        }
    }

    pub(crate) fn get(&self, key: (SymbolValue, SymbolValue)) -> Option<DefaultKey> {
        self.map.get(&key).copied()
    }

    pub(crate) fn insert(&mut self, key: (SymbolValue, SymbolValue), loc: DefaultKey) {
        self.map.insert(key, loc);
    }

    /// Removes the entry for `key` only if it still points at `loc` — a
    /// digram with the same value recorded at a different location must not
    /// be disturbed.
    pub(crate) fn remove_if(&mut self, key: (SymbolValue, SymbolValue), loc: DefaultKey) {
        if let Entry::Occupied(e) = self.map.entry(key) {
            if *e.get() == loc {
                e.remove();
            }
        }
    }

    /// Tries to insert `key -> loc`. Returns the prior occurrence's location
    /// if one was already recorded (the vacant case records `loc` and
    /// returns `None`).
    pub(crate) fn try_insert_or_get(
        &mut self,
        key: (SymbolValue, SymbolValue),
        loc: DefaultKey,
    ) -> Option<DefaultKey> {
        match self.map.entry(key) {
            Entry::Vacant(e) => {
                e.insert(loc);
                None
            }
            Entry::Occupied(e) => Some(*e.get()),
        }
    }
}
