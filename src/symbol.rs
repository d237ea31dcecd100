//! Interned names referenced by instructions and the on-disk symbol table.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::IndexMap;

/// Operator punctuators and the internal method names they are registered under.
const OPERATOR_NAMES: &[(&str, &str)] = &[
    ("==", "__eq__"),
    ("!=", "__ne__"),
    (">=", "__ge__"),
    (">", "__gt__"),
    ("<=", "__le__"),
    ("<", "__lt__"),
    ("!", "__not__"),
    ("+", "__add__"),
    ("-", "__sub__"),
    ("*", "__mul__"),
    ("/", "__div__"),
    ("^", "__xor__"),
    ("%", "__mod__"),
    ("**", "__pow__"),
    ("<<", "__lshift__"),
    (">>", "__rshift__"),
    ("~", "__invert__"),
    ("|", "__or__"),
    ("&", "__and__"),
    ("-@", "__uminus__"),
    ("+@", "__uplus__"),
    ("--@", "__pre_decr__"),
    ("++@", "__pre_incr__"),
    ("@--", "__post_decr__"),
    ("@++", "__post_incr__"),
];

/// Returns the internal operator name for a punctuator, if it has one.
///
/// Unary forms are spelled with `@` standing for the operand (`-@` is unary minus, `@++` is post-increment).
pub fn operator_name(punctuator: &str) -> Option<&'static str> {
    OPERATOR_NAMES.iter().find(|(p, _)| *p == punctuator).map(|(_, n)| *n)
}

/// Renders an internal operator name back to its punctuator for disassembly.
pub fn operator_punctuator(name: &str) -> &str {
    match name {
        "__elem__" => "[]",
        "__pow__" => "** (power)",
        "__minus__" | "__min__" => "-",
        _ => OPERATOR_NAMES.iter().find(|(_, n)| *n == name).map(|(p, _)| *p).unwrap_or(name),
    }
}

struct SymbolData {
    id: usize,
    name: Box<str>,
    has_hex_escape: bool,
}

/// A handle to an interned name. Cloning only bumps a reference count.
#[derive(Clone)]
pub struct Symbol(Rc<SymbolData>);
impl Symbol {
    fn new(id: usize, name: &str, has_hex_escape: bool) -> Self {
        Self(Rc::new(SymbolData { id, name: name.into(), has_hex_escape }))
    }
    /// Index of the symbol in the map that created it.
    pub fn id(&self) -> usize {
        self.0.id
    }
    pub fn name(&self) -> &str {
        &self.0.name
    }
    /// Hex-escaped names hold raw bytes (one char per byte) and are written without utf-8 encoding.
    pub fn has_hex_escape(&self) -> bool {
        self.0.has_hex_escape
    }
}
impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}
impl Eq for Symbol {}
impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name().hash(state)
    }
}
impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) {}", self.id(), self.name())
    }
}
impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Insertion-ordered symbol interner for one compilation unit.
#[derive(Default, Debug)]
pub struct SymbolMap {
    symbols: IndexMap<Box<str>, Symbol>,
    temp_counter: usize,
}
impl SymbolMap {
    pub fn new() -> Self {
        Self::default()
    }
    /// Interns `name`, translating operator punctuators to their internal names.
    pub fn register(&mut self, name: &str) -> Symbol {
        self.insert(operator_name(name).unwrap_or(name), false)
    }
    /// Interns `name` verbatim.
    pub fn register_raw(&mut self, name: &str) -> Symbol {
        self.insert(name, false)
    }
    /// Interns a name made of raw bytes (one char per byte).
    pub fn register_hex(&mut self, name: &str) -> Symbol {
        self.insert(name, true)
    }
    fn insert(&mut self, name: &str, has_hex_escape: bool) -> Symbol {
        if let Some(symbol) = self.symbols.get(name) {
            return symbol.clone();
        }
        let symbol = Symbol::new(self.symbols.len(), name, has_hex_escape);
        self.symbols.insert(name.into(), symbol.clone());
        symbol
    }
    /// Looks up `name` exactly as it was interned.
    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }
    pub fn get_index(&self, index: usize) -> Option<&Symbol> {
        self.symbols.get_index(index).map(|(_, v)| v)
    }
    pub fn len(&self) -> usize {
        self.symbols.len()
    }
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }
    /// Generates a fresh name for a compiler-introduced temporary.
    pub fn next_temp_name(&mut self, prefix: &str) -> String {
        let name = format!("{prefix}#{}", self.temp_counter);
        self.temp_counter += 1;
        name
    }
}

#[test]
fn test_symbol_map_interning() {
    let mut map = SymbolMap::new();
    let a = map.register("a");
    let b = map.register("b");
    let a2 = map.register("a");
    assert_eq!(a, a2);
    assert_eq!(a.id(), 0);
    assert_eq!(b.id(), 1);
    assert_eq!(map.len(), 2);

    let add = map.register("+");
    assert_eq!(add.name(), "__add__");
    assert_eq!(map.register_raw("+").name(), "+");
    assert_eq!(map.get("__add__").map(Symbol::id), Some(2));
    assert_eq!(map.get("+").map(Symbol::id), Some(3));
    assert!(map.get("-").is_none());
    assert_eq!(map.iter().map(Symbol::name).collect::<Vec<_>>(), ["a", "b", "__add__", "+"]);
}

#[test]
fn test_operator_punctuator() {
    assert_eq!(operator_punctuator("__eq__"), "==");
    assert_eq!(operator_punctuator("__post_incr__"), "@++");
    assert_eq!(operator_punctuator("__pow__"), "** (power)");
    assert_eq!(operator_punctuator("__elem__"), "[]");
    assert_eq!(operator_punctuator("foo"), "foo");
}
