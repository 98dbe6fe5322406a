use std::collections::HashMap;

/// Matches the single-byte operand encoding used by the bytecode format (§6):
/// a method symbol or global index must fit in one byte.
pub const MAX_SYMBOLS: usize = 256;

/// Interns short names into dense `u8` IDs, handed out in strictly increasing
/// insertion order so a compiler emitting symbol IDs sees a stable numbering.
/// Lookup itself goes through a hash map rather than the reference
/// implementation's linear scan.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    ids: HashMap<String, u8>,
    names: Vec<String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self { ids: HashMap::new(), names: Vec::new() }
    }

    /// Adds a new symbol. Returns `None` if the name is already present or
    /// the table is full, mirroring the source's sentinel-on-failure `add`.
    pub fn add(&mut self, name: &str) -> Option<u8> {
        if self.ids.contains_key(name) || self.names.len() >= MAX_SYMBOLS {
            return None;
        }
        self.insert_new(name)
    }

    /// Returns the existing ID for `name`, or adds and returns a fresh one.
    pub fn ensure(&mut self, name: &str) -> Option<u8> {
        if let Some(&id) = self.ids.get(name) {
            return Some(id);
        }
        self.insert_new(name)
    }

    pub fn find(&self, name: &str) -> Option<u8> {
        self.ids.get(name).copied()
    }

    pub fn name(&self, id: u8) -> Option<&str> {
        self.names.get(id as usize).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn insert_new(&mut self, name: &str) -> Option<u8> {
        if self.names.len() >= MAX_SYMBOLS {
            return None;
        }
        let id = self.names.len() as u8;
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_is_idempotent_and_preserves_id() {
        let mut table = SymbolTable::new();
        let s = table.ensure("foo").unwrap();
        assert_eq!(table.ensure("foo"), Some(s));
        assert_eq!(table.find("foo"), Some(s));
    }

    #[test]
    fn add_rejects_duplicates() {
        let mut table = SymbolTable::new();
        assert!(table.add("foo").is_some());
        assert_eq!(table.add("foo"), None);
    }

    #[test]
    fn ids_are_assigned_in_insertion_order() {
        let mut table = SymbolTable::new();
        assert_eq!(table.ensure("a"), Some(0));
        assert_eq!(table.ensure("b"), Some(1));
        assert_eq!(table.ensure("a"), Some(0));
        assert_eq!(table.ensure("c"), Some(2));
    }

    #[test]
    fn find_missing_is_sentinel_none() {
        let table = SymbolTable::new();
        assert_eq!(table.find("nope"), None);
    }

    #[test]
    fn table_enforces_max_symbols() {
        let mut table = SymbolTable::new();
        for i in 0..MAX_SYMBOLS {
            assert!(table.ensure(&format!("sym{i}")).is_some());
        }
        assert_eq!(table.add("overflow"), None);
    }
}
