//! Growable name -> stable-index interning.
//!
//! Used for `allMethodNames` (the single table that couples every class's
//! `methods` array to the compiler's signature construction, §3 "Method
//! table invariant") and for module-variable name tables (§4.2 variable
//! resolution).

use std::collections::HashMap;

#[derive(Default)]
pub struct SymbolTable {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable { names: Vec::new(), index: HashMap::new() }
    }

    /// Intern `name`, returning its stable index. Re-interning an existing
    /// name returns the same index every time.
    pub fn intern(&mut self, name: &str) -> usize {
        if let Some(&i) = self.index.get(name) {
            return i;
        }
        let i = self.names.len();
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), i);
        i
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn name(&self, symbol: usize) -> Option<&str> {
        self.names.get(symbol).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable_and_deduplicates() {
        let mut t = SymbolTable::new();
        let a = t.intern("foo");
        let b = t.intern("bar");
        let c = t.intern("foo");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(t.name(a), Some("foo"));
    }

    #[test]
    fn find_before_intern_is_none() {
        let t = SymbolTable::new();
        assert_eq!(t.find("missing"), None);
    }
}
