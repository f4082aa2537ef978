//! Interned property keys.
//!
//! A symbol denotes a property name: either a canonical array index or an
//! interned string. Two symbols compare equal iff they denote the same name,
//! which makes shape transitions and inline caches cheap to key.

use rustc_hash::FxHashMap;

/// Identifier of an interned name inside a [`SymbolTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NameId(pub u32);

/// An interned property key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    /// Canonical array index (`"0"`, `"1"`, …, up to `u32::MAX - 1`).
    Index(u32),
    /// Interned string name.
    Name(NameId),
}

/// The default symbols interned at engine bring-up.
///
/// These are process-wide state in spirit: the table is created once when the
/// engine is constructed and no entry is ever removed afterwards.
#[derive(Debug, Clone, Copy)]
pub struct DefaultSymbols {
    pub length: Symbol,
    pub eval: Symbol,
    pub arguments: Symbol,
    pub caller: Symbol,
    pub callee: Symbol,
    pub to_string: Symbol,
    pub value_of: Symbol,
    pub prototype: Symbol,
    pub constructor: Symbol,
    pub proto: Symbol,
    pub name: Symbol,
    pub message: Symbol,
}

/// Intern table mapping names to symbols.
///
/// # Examples
///
/// ```
/// use core_types::{Symbol, SymbolTable};
///
/// let mut table = SymbolTable::new();
/// let a = table.intern("foo");
/// let b = table.intern("foo");
/// assert_eq!(a, b);
///
/// // canonical numeric strings intern as index symbols
/// assert_eq!(table.intern("3"), Symbol::Index(3));
/// ```
#[derive(Debug)]
pub struct SymbolTable {
    names: Vec<String>,
    ids: FxHashMap<String, NameId>,
    defaults: DefaultSymbols,
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut table = SymbolTable {
            names: Vec::new(),
            ids: FxHashMap::default(),
            defaults: DefaultSymbols {
                length: Symbol::Index(0),
                eval: Symbol::Index(0),
                arguments: Symbol::Index(0),
                caller: Symbol::Index(0),
                callee: Symbol::Index(0),
                to_string: Symbol::Index(0),
                value_of: Symbol::Index(0),
                prototype: Symbol::Index(0),
                constructor: Symbol::Index(0),
                proto: Symbol::Index(0),
                name: Symbol::Index(0),
                message: Symbol::Index(0),
            },
        };
        table.defaults = DefaultSymbols {
            length: table.intern("length"),
            eval: table.intern("eval"),
            arguments: table.intern("arguments"),
            caller: table.intern("caller"),
            callee: table.intern("callee"),
            to_string: table.intern("toString"),
            value_of: table.intern("valueOf"),
            prototype: table.intern("prototype"),
            constructor: table.intern("constructor"),
            proto: table.intern("__proto__"),
            name: table.intern("name"),
            message: table.intern("message"),
        };
        table
    }

    pub fn defaults(&self) -> &DefaultSymbols {
        &self.defaults
    }

    /// Intern a name, returning the canonical symbol for it.
    pub fn intern(&mut self, name: &str) -> Symbol {
        if let Some(index) = canonical_index(name) {
            return Symbol::Index(index);
        }
        if let Some(&id) = self.ids.get(name) {
            return Symbol::Name(id);
        }
        let id = NameId(self.names.len() as u32);
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        Symbol::Name(id)
    }

    /// The textual name a symbol denotes.
    pub fn describe(&self, symbol: Symbol) -> String {
        match symbol {
            Symbol::Index(i) => i.to_string(),
            Symbol::Name(id) => self.names[id.0 as usize].clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses a canonical array-index string: no leading zeros (except `"0"`),
/// decimal digits only, below `u32::MAX`.
fn canonical_index(name: &str) -> Option<u32> {
    if name.is_empty() || name.len() > 10 {
        return None;
    }
    let bytes = name.as_bytes();
    if bytes[0] == b'0' && bytes.len() > 1 {
        return None;
    }
    if !bytes.iter().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u64 = name.parse().ok()?;
    if value < u32::MAX as u64 {
        Some(value as u32)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_name_same_symbol() {
        let mut table = SymbolTable::new();
        assert_eq!(table.intern("x"), table.intern("x"));
        assert_ne!(table.intern("x"), table.intern("y"));
    }

    #[test]
    fn test_index_symbols() {
        let mut table = SymbolTable::new();
        assert_eq!(table.intern("0"), Symbol::Index(0));
        assert_eq!(table.intern("42"), Symbol::Index(42));
        // leading zero is a plain name, not an index
        assert!(matches!(table.intern("07"), Symbol::Name(_)));
        assert!(matches!(table.intern("-1"), Symbol::Name(_)));
        // u32::MAX itself is not a valid array index
        assert!(matches!(table.intern("4294967295"), Symbol::Name(_)));
    }

    #[test]
    fn test_describe_roundtrip() {
        let mut table = SymbolTable::new();
        let sym = table.intern("hello");
        assert_eq!(table.describe(sym), "hello");
        assert_eq!(table.describe(Symbol::Index(9)), "9");
    }

    #[test]
    fn test_default_symbols_interned_at_startup() {
        let mut table = SymbolTable::new();
        let defaults = *table.defaults();
        assert_eq!(defaults.length, table.intern("length"));
        assert_eq!(defaults.to_string, table.intern("toString"));
        assert_eq!(defaults.proto, table.intern("__proto__"));
        assert_ne!(defaults.name, defaults.message);
    }
}
