//! Variable slot allocation and operand stack accounting for a code frame.
//!
//! Two on-disk dialects exist. Versions 11 and up split locals and statics into separate storages with local
//! slot 0 reserved for `self`; older versions keep everything in one combined storage. Both implement [`Stack`].

use crate::symbol::Symbol;
use crate::version::AdhocVersion;

/// Which storage a variable lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Local,
    Static,
}

/// A variable bound to a storage slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub symbol: Symbol,
    pub kind: VariableKind,
}

/// Operand stack depth with a high-water mark.
#[derive(Debug, Default, Clone)]
pub struct StackCounter {
    current: i32,
    max: i32,
}
impl StackCounter {
    fn set(&mut self, value: i32) {
        if value > self.max {
            self.max = value;
        }
        self.current = value;
    }
    pub fn increase(&mut self, count: i32) {
        self.set(self.current + count)
    }
    pub fn decrease(&mut self, count: i32) {
        self.set(self.current - count)
    }
    pub fn current(&self) -> i32 {
        self.current
    }
    pub fn max(&self) -> i32 {
        self.max
    }
}

/// Slot allocator contract shared by both dialects.
pub trait Stack {
    fn counter(&self) -> &StackCounter;
    fn counter_mut(&mut self) -> &mut StackCounter;

    /// Returns the local bound to `symbol`, allocating a slot if needed. The flag is true if it already existed.
    fn try_add_local(&mut self, symbol: &Symbol) -> (Variable, bool);
    /// Returns the static bound to `symbol`, allocating a slot if needed. The flag is true if it already existed.
    fn try_add_static(&mut self, symbol: &Symbol) -> (Variable, bool);
    fn free_local(&mut self, symbol: &Symbol);
    fn free_static(&mut self, symbol: &Symbol);
    fn has_local(&self, symbol: &Symbol) -> bool;
    fn has_static(&self, symbol: &Symbol) -> bool;
    fn local_index(&self, symbol: &Symbol) -> Option<usize>;
    fn static_index(&self, symbol: &Symbol) -> Option<usize>;
    /// Index just past the highest occupied local slot.
    fn last_local_index(&self) -> usize;
    fn local_storage_size(&self) -> usize;
    /// Only the split dialect tracks static storage separately.
    fn static_storage_size(&self) -> Option<usize>;
    /// Overwrites the recorded sizes with values read back from a binary.
    fn restore_sizes(&mut self, stack_size: i32, local_storage_size: usize, static_storage_size: usize);

    fn increment_stack_counter(&mut self) { self.counter_mut().increase(1) }
    fn decrement_stack_counter(&mut self) { self.counter_mut().decrease(1) }
    fn increase_stack_counter(&mut self, count: i32) { self.counter_mut().increase(count) }
    fn decrease_stack_counter(&mut self, count: i32) { self.counter_mut().decrease(count) }
    fn stack_size(&self) -> i32 { self.counter().max() }
}

/// Creates the allocator matching `version`.
pub fn new_stack(version: AdhocVersion) -> Box<dyn Stack> {
    if version.uses_new_split_stack() {
        Box::new(NewStack::default())
    } else {
        Box::new(OldStack::default())
    }
}

fn first_free(slots: &[Option<Symbol>], from: usize) -> Option<usize> {
    slots.iter().enumerate().skip(from).find(|(_, x)| x.is_none()).map(|(i, _)| i)
}
fn position(slots: &[Option<Symbol>], symbol: &Symbol) -> Option<usize> {
    slots.iter().position(|x| x.as_ref() == Some(symbol))
}

/// Split local/static storage used by versions 11 and up.
#[derive(Debug, Clone)]
pub struct NewStack {
    locals: Vec<Option<Symbol>>,
    statics: Vec<Option<Symbol>>,
    local_storage_size: usize,
    static_storage_size: usize,
    counter: StackCounter,
}
impl Default for NewStack {
    fn default() -> Self {
        Self {
            locals: vec![None], // slot 0 is self
            statics: vec![],
            local_storage_size: 1,
            static_storage_size: 0,
            counter: Default::default(),
        }
    }
}
impl Stack for NewStack {
    fn counter(&self) -> &StackCounter { &self.counter }
    fn counter_mut(&mut self) -> &mut StackCounter { &mut self.counter }

    fn try_add_local(&mut self, symbol: &Symbol) -> (Variable, bool) {
        let var = Variable { symbol: symbol.clone(), kind: VariableKind::Local };
        if self.has_local(symbol) {
            return (var, true);
        }
        match first_free(&self.locals, 1) {
            Some(i) => self.locals[i] = Some(symbol.clone()),
            None => {
                self.locals.push(Some(symbol.clone()));
                self.local_storage_size = self.local_storage_size.max(self.locals.len());
            }
        }
        (var, false)
    }
    fn try_add_static(&mut self, symbol: &Symbol) -> (Variable, bool) {
        let var = Variable { symbol: symbol.clone(), kind: VariableKind::Static };
        if self.has_static(symbol) {
            return (var, true);
        }
        self.statics.push(Some(symbol.clone()));
        self.static_storage_size = self.static_storage_size.max(self.statics.len());
        (var, false)
    }
    fn free_local(&mut self, symbol: &Symbol) {
        if let Some(i) = position(&self.locals, symbol) {
            self.locals[i] = None;
        }
    }
    fn free_static(&mut self, symbol: &Symbol) {
        if let Some(i) = position(&self.statics, symbol) {
            self.statics[i] = None;
        }
    }
    fn has_local(&self, symbol: &Symbol) -> bool {
        position(&self.locals, symbol).is_some()
    }
    fn has_static(&self, symbol: &Symbol) -> bool {
        position(&self.statics, symbol).is_some()
    }
    fn local_index(&self, symbol: &Symbol) -> Option<usize> {
        position(&self.locals, symbol)
    }
    fn static_index(&self, symbol: &Symbol) -> Option<usize> {
        position(&self.statics, symbol)
    }
    fn last_local_index(&self) -> usize {
        last_taken(&self.locals)
    }
    fn local_storage_size(&self) -> usize {
        self.local_storage_size
    }
    fn static_storage_size(&self) -> Option<usize> {
        Some(self.static_storage_size)
    }
    fn restore_sizes(&mut self, stack_size: i32, local_storage_size: usize, static_storage_size: usize) {
        self.counter = StackCounter { current: 0, max: stack_size };
        self.local_storage_size = local_storage_size;
        self.static_storage_size = static_storage_size;
    }
}

// scans down to slot 1 (slot 0 is never considered free)
fn last_taken(slots: &[Option<Symbol>]) -> usize {
    let mut res = slots.len();
    for i in (1..slots.len()).rev() {
        if slots[i].is_some() { break }
        res = i;
    }
    res
}

/// Combined storage used by versions before 11.
#[derive(Debug, Clone, Default)]
pub struct OldStack {
    slots: Vec<Option<Variable>>,
    storage_size: usize,
    counter: StackCounter,
}
impl OldStack {
    fn find(&self, symbol: &Symbol, kind: VariableKind) -> Option<usize> {
        self.slots.iter().position(|x| matches!(x, Some(v) if v.kind == kind && v.symbol == *symbol))
    }
    fn push(&mut self, var: Variable) {
        self.slots.push(Some(var));
        self.storage_size = self.storage_size.max(self.slots.len());
    }
}
impl Stack for OldStack {
    fn counter(&self) -> &StackCounter { &self.counter }
    fn counter_mut(&mut self) -> &mut StackCounter { &mut self.counter }

    fn try_add_local(&mut self, symbol: &Symbol) -> (Variable, bool) {
        let var = Variable { symbol: symbol.clone(), kind: VariableKind::Local };
        if self.find(symbol, VariableKind::Local).is_some() {
            return (var, true);
        }
        match self.slots.iter().position(Option::is_none) {
            Some(i) => self.slots[i] = Some(var.clone()),
            None => self.push(var.clone()),
        }
        (var, false)
    }
    fn try_add_static(&mut self, symbol: &Symbol) -> (Variable, bool) {
        let var = Variable { symbol: symbol.clone(), kind: VariableKind::Static };
        if self.find(symbol, VariableKind::Static).is_some() {
            return (var, true);
        }
        self.push(var.clone());
        (var, false)
    }
    fn free_local(&mut self, symbol: &Symbol) {
        if let Some(i) = self.find(symbol, VariableKind::Local) {
            self.slots[i] = None;
        }
    }
    fn free_static(&mut self, symbol: &Symbol) {
        if let Some(i) = self.find(symbol, VariableKind::Static) {
            self.slots[i] = None;
        }
    }
    fn has_local(&self, symbol: &Symbol) -> bool {
        self.find(symbol, VariableKind::Local).is_some()
    }
    fn has_static(&self, symbol: &Symbol) -> bool {
        self.find(symbol, VariableKind::Static).is_some()
    }
    fn local_index(&self, symbol: &Symbol) -> Option<usize> {
        self.find(symbol, VariableKind::Local)
    }
    fn static_index(&self, symbol: &Symbol) -> Option<usize> {
        self.find(symbol, VariableKind::Static)
    }
    fn last_local_index(&self) -> usize {
        let mut res = self.slots.len();
        for i in (1..self.slots.len()).rev() {
            if self.slots[i].is_some() { break }
            res = i;
        }
        res
    }
    fn local_storage_size(&self) -> usize {
        self.storage_size
    }
    fn static_storage_size(&self) -> Option<usize> {
        None
    }
    fn restore_sizes(&mut self, stack_size: i32, local_storage_size: usize, _: usize) {
        self.counter = StackCounter { current: 0, max: stack_size };
        self.storage_size = local_storage_size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolMap;

    #[test]
    fn test_new_stack_reuses_lowest_free_slot() {
        let mut map = SymbolMap::new();
        let (a, b, c, d) = (map.register("a"), map.register("b"), map.register("c"), map.register("d"));
        let mut stack = NewStack::default();

        assert_eq!(stack.try_add_local(&a).1, false);
        assert_eq!(stack.try_add_local(&b).1, false);
        assert_eq!(stack.local_index(&a), Some(1));
        assert_eq!(stack.local_index(&b), Some(2));
        assert_eq!(stack.try_add_local(&a).1, true);

        stack.free_local(&b);
        assert_eq!(stack.last_local_index(), 2);
        stack.try_add_local(&c);
        assert_eq!(stack.local_index(&c), Some(2));
        assert_eq!(stack.local_storage_size(), 3);

        stack.free_local(&a);
        stack.free_local(&c);
        assert_eq!(stack.last_local_index(), 1);
        stack.try_add_local(&d);
        assert_eq!(stack.local_index(&d), Some(1));
        assert_eq!(stack.local_storage_size(), 3);
    }

    #[test]
    fn test_storage_size_never_decreases() {
        let mut map = SymbolMap::new();
        let syms: Vec<_> = (0..6).map(|i| map.register(&format!("v{i}"))).collect();
        for mut stack in [new_stack(AdhocVersion::new(12).unwrap()), new_stack(AdhocVersion::new(10).unwrap())] {
            let mut prev = stack.local_storage_size();
            for (i, sym) in syms.iter().enumerate() {
                stack.try_add_local(sym);
                if i % 2 == 1 {
                    stack.free_local(&syms[i - 1]);
                }
                assert!(stack.local_storage_size() >= prev);
                prev = stack.local_storage_size();
            }
            for sym in &syms {
                stack.free_local(sym);
                assert_eq!(stack.local_storage_size(), prev);
            }
        }
    }

    #[test]
    fn test_statics() {
        let mut map = SymbolMap::new();
        let (a, s) = (map.register("a"), map.register("s"));

        let mut stack = NewStack::default();
        stack.try_add_local(&a);
        assert_eq!(stack.try_add_static(&s).1, false);
        assert_eq!(stack.try_add_static(&s).1, true);
        assert_eq!(stack.static_index(&s), Some(0));
        assert_eq!(stack.static_storage_size(), Some(1));

        let mut stack = OldStack::default();
        stack.try_add_local(&a);
        stack.try_add_static(&s);
        assert_eq!(stack.local_index(&a), Some(0));
        assert_eq!(stack.static_index(&s), Some(1));
        assert!(!stack.has_local(&s));
        assert_eq!(stack.static_storage_size(), None);
        assert_eq!(stack.local_storage_size(), 2);
    }

    #[test]
    fn test_stack_counter_watermark() {
        let mut stack = NewStack::default();
        stack.increment_stack_counter();
        stack.increase_stack_counter(3);
        stack.decrease_stack_counter(2);
        stack.increment_stack_counter();
        assert_eq!(stack.counter().current(), 3);
        assert_eq!(stack.stack_size(), 4);
        stack.decrease_stack_counter(3);
        assert_eq!(stack.stack_size(), 4);
    }
}
