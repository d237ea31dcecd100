//! Code frames: the instruction list of one subroutine (or the top-level body) plus its slot bookkeeping.

use std::fmt::{self, Write as _};

use crate::error::SerializationError;
use crate::instruction::Instruction;
use crate::stack::{new_stack, Stack, VariableKind};
use crate::stream::{AdhocReader, AdhocWriter, BinaryRead, BinaryWrite};
use crate::symbol::Symbol;
use crate::version::AdhocVersion;

/// Variables declared by one lexical scope, freed again when it is left.
#[derive(Debug, Default, Clone)]
pub struct ScopeContext {
    pub locals: Vec<Symbol>,
    pub statics: Vec<Symbol>,
}

/// How a scope is being left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeExit {
    /// A plain block. Its locals are released.
    Block,
    /// A module or class body at nesting `depth`. Its statics are released.
    Module { depth: i32, from_subroutine: bool },
}

/// How a variable is being referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableAccess {
    /// `var x` declares a new local.
    DeclareLocal,
    /// `static x` declares a new static.
    DeclareStatic,
    /// `x = ...` without a declaration. Reuses an existing local, otherwise the name is treated as a static.
    Assign,
    /// Plain read. Unknown names resolve to statics.
    Read,
}

/// Where a variable lives. Captured variables have negative indices (`-1` for the first capture).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef {
    pub kind: VariableKind,
    pub index: i32,
}

/// Storage sizes recorded in a frame header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSizes {
    pub stack: i32,
    pub local_storage: i32,
    pub static_storage: i32,
}

pub struct CodeFrame {
    version: AdhocVersion,
    pub source_file: Option<Symbol>,
    pub has_debug_info: bool,
    pub has_rest_element: bool,
    /// Set on function literals so unknown names may be captured from the enclosing frame.
    pub allows_capture: bool,
    params: Vec<Symbol>,
    captures: Vec<Symbol>,
    instructions: Vec<(u32, Instruction)>,
    stack: Box<dyn Stack>,
    scopes: Vec<ScopeContext>,
    sizes: Option<FrameSizes>,
}

impl fmt::Debug for CodeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeFrame")
            .field("version", &self.version)
            .field("source_file", &self.source_file)
            .field("params", &self.params)
            .field("captures", &self.captures)
            .field("sizes", &self.sizes())
            .field("instructions", &self.instructions)
            .finish()
    }
}

impl PartialEq for CodeFrame {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version && self.source_file == other.source_file && self.has_debug_info == other.has_debug_info
            && self.has_rest_element == other.has_rest_element && self.params == other.params && self.captures == other.captures
            && self.sizes() == other.sizes() && self.instructions == other.instructions
    }
}

impl CodeFrame {
    pub fn new(version: AdhocVersion) -> Self {
        Self {
            version,
            source_file: None,
            has_debug_info: true,
            has_rest_element: false,
            allows_capture: false,
            params: vec![],
            captures: vec![],
            instructions: vec![],
            stack: new_stack(version),
            scopes: vec![],
            sizes: None,
        }
    }

    pub fn version(&self) -> AdhocVersion {
        self.version
    }
    pub fn params(&self) -> &[Symbol] {
        &self.params
    }
    pub fn captures(&self) -> &[Symbol] {
        &self.captures
    }
    pub fn stack(&self) -> &dyn Stack {
        self.stack.as_ref()
    }
    pub fn instructions(&self) -> impl Iterator<Item = (u32, &Instruction)> {
        self.instructions.iter().map(|(line, ins)| (*line, ins))
    }
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }
    pub fn instruction_mut(&mut self, index: usize) -> Option<&mut Instruction> {
        self.instructions.get_mut(index).map(|(_, ins)| ins)
    }
    pub fn last_instruction(&self) -> Option<&Instruction> {
        self.instructions.last().map(|(_, ins)| ins)
    }

    /// Appends an instruction and applies its stack effect. Returns the instruction's index.
    pub fn add_instruction(&mut self, ins: Instruction, line: u32) -> usize {
        let (popped, pushed) = ins.stack_effect(self.version);
        self.stack.decrease_stack_counter(popped);
        self.stack.increase_stack_counter(pushed);
        self.instructions.push((line, ins));
        self.instructions.len() - 1
    }

    /// Declares a parameter, which also occupies a local slot.
    pub fn add_parameter(&mut self, symbol: &Symbol) -> SlotRef {
        self.params.push(symbol.clone());
        self.add_scope_variable(symbol, VariableAccess::DeclareLocal, &[])
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(ScopeContext::default());
    }
    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }
    pub fn current_scope(&self) -> Option<&ScopeContext> {
        self.scopes.last()
    }

    /// Pops the innermost scope. Versions 11+ release its slots and, if `emit_leave`, record a `LEAVE`.
    pub fn leave_scope(&mut self, exit: ScopeExit, emit_leave: bool) {
        let scope = self.scopes.pop().unwrap_or_default();
        if !self.version.has_leave_support() {
            return;
        }
        match exit {
            ScopeExit::Block => scope.locals.iter().for_each(|x| self.stack.free_local(x)),
            ScopeExit::Module { .. } => scope.statics.iter().for_each(|x| self.stack.free_static(x)),
        }
        if emit_leave {
            let (depth, rewind) = match exit {
                ScopeExit::Block => (0, self.stack.last_local_index() as i32),
                ScopeExit::Module { depth, from_subroutine: true } => (depth, self.stack.last_local_index() as i32),
                ScopeExit::Module { depth, from_subroutine: false } => (depth, 1),
            };
            self.add_instruction(Instruction::Leave { depth, rewind }, 0);
        }
    }

    fn record(&mut self, symbol: &Symbol, kind: VariableKind) {
        if let Some(scope) = self.scopes.last_mut() {
            let list = match kind {
                VariableKind::Local => &mut scope.locals,
                VariableKind::Static => &mut scope.statics,
            };
            if !list.contains(symbol) {
                list.push(symbol.clone());
            }
        }
    }

    fn is_captured_from(&self, symbol: &Symbol, ancestors: &[&CodeFrame]) -> bool {
        self.allows_capture && is_reachable(symbol, ancestors)
            && ((!self.stack.has_local(symbol) && !self.params.contains(symbol)) || self.captures.contains(symbol))
    }

    fn capture(&mut self, symbol: &Symbol) -> SlotRef {
        let index = match self.captures.iter().position(|x| x == symbol) {
            Some(i) => i,
            None => {
                self.captures.push(symbol.clone());
                self.stack.try_add_local(symbol);
                self.captures.len() - 1
            }
        };
        SlotRef { kind: VariableKind::Local, index: -(index as i32 + 1) }
    }

    /// Resolves `symbol` to a slot, allocating one as needed.
    ///
    /// `ancestors` are the enclosing frames, nearest first. Names that are locals there are captured when
    /// [`CodeFrame::allows_capture`] is set; a local further out passes through every capturing frame in between.
    pub fn add_scope_variable(&mut self, symbol: &Symbol, access: VariableAccess, ancestors: &[&CodeFrame]) -> SlotRef {
        let kind = match access {
            VariableAccess::DeclareLocal => VariableKind::Local,
            VariableAccess::DeclareStatic => VariableKind::Static,
            VariableAccess::Assign | VariableAccess::Read => {
                if self.is_captured_from(symbol, ancestors) {
                    return self.capture(symbol);
                }
                match self.stack.has_local(symbol) {
                    true => VariableKind::Local,
                    false => VariableKind::Static,
                }
            }
        };

        let added = match kind {
            VariableKind::Local => !self.stack.try_add_local(symbol).1,
            VariableKind::Static => !self.stack.try_add_static(symbol).1,
        };
        if added {
            self.record(symbol, kind);
        }

        let index = match kind {
            VariableKind::Local => self.stack.local_index(symbol),
            VariableKind::Static => self.stack.static_index(symbol),
        };
        SlotRef { kind, index: index.unwrap_or_default() as i32 }
    }

    /// Freezes the storage sizes from the allocator.
    pub fn finalize(&mut self) {
        self.sizes = Some(self.live_sizes());
    }
    fn live_sizes(&self) -> FrameSizes {
        let local_storage = self.stack.local_storage_size() as i32;
        FrameSizes {
            stack: self.stack.stack_size(),
            local_storage,
            static_storage: self.stack.static_storage_size().map(|x| x as i32).unwrap_or(local_storage),
        }
    }
    pub fn sizes(&self) -> FrameSizes {
        self.sizes.unwrap_or_else(|| self.live_sizes())
    }

    /// Fails if anything in this frame (or its nested frames) cannot be encoded for the frame's version.
    pub fn check(&self) -> Result<(), SerializationError> {
        let version = self.version;
        let unsupported = |feature| Err(SerializationError::UnsupportedFeature { feature, version: version.get() });
        if !version.has_parameters() && !self.params.is_empty() {
            return unsupported("parameters");
        }
        if !version.has_capture_support() && !self.captures.is_empty() {
            return unsupported("captured variables");
        }
        if !version.supports_rest_element() && self.has_rest_element {
            return unsupported("rest parameter");
        }
        if self.writes_source_file() && self.source_file.is_none() {
            return unsupported("frame without source file");
        }
        for (_, ins) in &self.instructions {
            ins.check_version(version)?;
            if let Some(frame) = ins.frame() {
                frame.check()?;
            }
        }
        Ok(())
    }

    fn writes_source_file(&self) -> bool {
        let v = self.version.get();
        v < 8 || (v > 8 && self.has_debug_info)
    }
    fn writes_lines(&self) -> bool {
        !self.version.has_frame_version_byte() || self.has_debug_info
    }

    /// Parameter and capture list as shown in disassembly, e.g. `(a, b...)[c]`.
    pub fn signature(&self) -> String {
        let mut res = String::from("(");
        res += &self.params.iter().map(Symbol::name).collect::<Vec<_>>().join(", ");
        if self.has_rest_element && !self.params.is_empty() {
            res += "...";
        }
        res.push(')');
        if !self.captures.is_empty() {
            res.push('[');
            res += &self.captures.iter().map(Symbol::name).collect::<Vec<_>>().join(", ");
            res.push(']');
        }
        res
    }

    /// Full listing of the frame, including nested frames.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        self.disassemble_into(&mut out, 0);
        out
    }
    fn disassemble_into(&self, out: &mut String, indent: usize) {
        let pad = " ".repeat(indent);
        let sizes = self.sizes();
        let statics = match self.version.has_static_storage_size() {
            true => sizes.static_storage.to_string(),
            false => "=Variable Heap Size".into(),
        };
        let _ = writeln!(out, "{pad}  > Instruction Count: {}", self.instructions.len());
        let _ = writeln!(out, "{pad}  > Stack Size: {} - Variable Heap Size: {} - Variable Heap Size Static: {statics}", sizes.stack, sizes.local_storage);
        for (i, (line, ins)) in self.instructions.iter().enumerate() {
            let _ = writeln!(out, "{pad}{line:>4}| {i:>3}| {ins}");
            if let Some(frame) = ins.frame() {
                frame.disassemble_into(out, indent + 4);
            }
        }
    }
}

/// Whether `symbol` is a local of the nearest ancestor, or can be captured into it from further out.
fn is_reachable(symbol: &Symbol, ancestors: &[&CodeFrame]) -> bool {
    match ancestors.split_first() {
        Some((parent, rest)) => parent.stack.has_local(symbol) || (parent.allows_capture && is_reachable(symbol, rest)),
        None => false,
    }
}

impl BinaryWrite for CodeFrame {
    fn write(&self, writer: &mut AdhocWriter) {
        let version = self.version;
        if version.has_frame_version_byte() {
            writer.write(&self.has_debug_info);
            writer.write(&version.get());
        }
        if self.writes_source_file() {
            if let Some(file) = &self.source_file {
                writer.write(file);
            }
        }
        if version.supports_rest_element() {
            writer.write(&self.has_rest_element);
        }
        if version.has_parameters() {
            writer.write(&(self.params.len() as i32));
            for (i, param) in self.params.iter().enumerate() {
                writer.write(param);
                if version.has_capture_support() {
                    writer.write(&(i as i32 + 1));
                }
            }
        }
        if version.has_capture_support() {
            writer.write(&(self.captures.len() as i32));
            for (i, capture) in self.captures.iter().enumerate() {
                writer.write(capture);
                writer.write(&-(i as i32 + 1));
            }
            writer.write(&0i32);
        }

        let sizes = self.sizes();
        if version.has_static_storage_size() {
            writer.write(&sizes.stack);
            writer.write(&sizes.local_storage);
            writer.write(&sizes.static_storage);
        } else {
            writer.write(&sizes.local_storage);
            writer.write(&sizes.stack);
        }

        writer.write(&(self.instructions.len() as i32));
        for (line, ins) in &self.instructions {
            if self.writes_lines() {
                writer.write(line);
            }
            writer.write(ins);
        }
    }
}

fn read_count(reader: &mut AdhocReader) -> Result<usize, SerializationError> {
    let offset = reader.position();
    let count = reader.read::<i32>()?;
    // every entry takes at least one byte, so anything larger than the input is corrupt
    usize::try_from(count).ok().filter(|&x| x <= reader.remaining()).ok_or(SerializationError::UnexpectedEof { offset })
}

impl BinaryRead for CodeFrame {
    fn read(reader: &mut AdhocReader) -> Result<Self, SerializationError> {
        let mut frame = CodeFrame::new(reader.version());
        if frame.version.has_frame_version_byte() {
            frame.has_debug_info = reader.read()?;
            frame.version = AdhocVersion::new(reader.read::<u8>()? as u32)?;
        }
        if frame.writes_source_file() {
            frame.source_file = Some(reader.read()?);
        }
        if frame.version.supports_rest_element() {
            frame.has_rest_element = reader.read()?;
        }
        if frame.version.has_parameters() {
            for _ in 0..read_count(reader)? {
                frame.params.push(reader.read()?);
                if frame.version.has_capture_support() {
                    reader.read::<i32>()?;
                }
            }
        }
        if frame.version.has_capture_support() {
            for _ in 0..read_count(reader)? {
                frame.captures.push(reader.read()?);
                reader.read::<i32>()?;
            }
            reader.read::<i32>()?;
        }

        let sizes = match frame.version.has_static_storage_size() {
            true => {
                let stack = reader.read()?;
                let local_storage = reader.read()?;
                FrameSizes { stack, local_storage, static_storage: reader.read()? }
            }
            false => {
                let local_storage = reader.read()?;
                FrameSizes { stack: reader.read()?, local_storage, static_storage: local_storage }
            }
        };
        frame.stack = new_stack(frame.version);
        frame.stack.restore_sizes(sizes.stack, sizes.local_storage.max(0) as usize, sizes.static_storage.max(0) as usize);
        frame.sizes = Some(sizes);

        for _ in 0..read_count(reader)? {
            let line = if frame.writes_lines() { reader.read()? } else { 0 };
            let ins = reader.read()?;
            frame.instructions.push((line, ins));
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::RunState;
    use crate::symbol::SymbolMap;

    fn version(v: u32) -> AdhocVersion {
        AdhocVersion::new(v).unwrap()
    }

    #[test]
    fn test_block_scope_slot_reuse() {
        let mut map = SymbolMap::new();
        let (a, b, c) = (map.register("a"), map.register("b"), map.register("c"));
        let mut frame = CodeFrame::new(version(12));
        frame.enter_scope();
        assert_eq!(frame.add_scope_variable(&a, VariableAccess::DeclareLocal, &[]).index, 1);
        frame.enter_scope();
        assert_eq!(frame.add_scope_variable(&b, VariableAccess::DeclareLocal, &[]).index, 2);
        frame.leave_scope(ScopeExit::Block, true);
        assert_eq!(frame.last_instruction(), Some(&Instruction::Leave { depth: 0, rewind: 2 }));
        assert_eq!(frame.add_scope_variable(&c, VariableAccess::DeclareLocal, &[]).index, 2);
        frame.finalize();
        assert_eq!(frame.sizes().local_storage, 3);
    }

    #[test]
    fn test_old_versions_keep_slots() {
        let mut map = SymbolMap::new();
        let (a, b) = (map.register("a"), map.register("b"));
        let mut frame = CodeFrame::new(version(10));
        frame.enter_scope();
        frame.enter_scope();
        assert_eq!(frame.add_scope_variable(&a, VariableAccess::DeclareLocal, &[]).index, 0);
        frame.leave_scope(ScopeExit::Block, true);
        assert_eq!(frame.instruction_count(), 0);
        assert_eq!(frame.add_scope_variable(&b, VariableAccess::DeclareLocal, &[]).index, 1);
    }

    #[test]
    fn test_unknown_names_are_statics() {
        let mut map = SymbolMap::new();
        let (a, g) = (map.register("a"), map.register("g"));
        let mut frame = CodeFrame::new(version(12));
        frame.enter_scope();
        frame.add_scope_variable(&a, VariableAccess::DeclareLocal, &[]);
        assert_eq!(frame.add_scope_variable(&a, VariableAccess::Assign, &[]), SlotRef { kind: VariableKind::Local, index: 1 });
        assert_eq!(frame.add_scope_variable(&g, VariableAccess::Read, &[]), SlotRef { kind: VariableKind::Static, index: 0 });
        assert_eq!(frame.current_scope().unwrap().statics, [g]);
    }

    #[test]
    fn test_captures() {
        let mut map = SymbolMap::new();
        let (x, y) = (map.register("x"), map.register("y"));
        let mut parent = CodeFrame::new(version(12));
        parent.enter_scope();
        parent.add_scope_variable(&x, VariableAccess::DeclareLocal, &[]);
        parent.add_scope_variable(&y, VariableAccess::DeclareLocal, &[]);

        let mut child = CodeFrame::new(version(12));
        child.allows_capture = true;
        child.enter_scope();
        assert_eq!(child.add_scope_variable(&y, VariableAccess::Read, &[&parent]).index, -1);
        assert_eq!(child.add_scope_variable(&x, VariableAccess::Read, &[&parent]).index, -2);
        assert_eq!(child.add_scope_variable(&y, VariableAccess::Assign, &[&parent]).index, -1);
        assert_eq!(child.captures(), [y, x]);
        assert_eq!(child.signature(), "()[y, x]");
    }

    #[test]
    fn test_captures_through_closures() {
        let mut map = SymbolMap::new();
        let (x, z) = (map.register("x"), map.register("z"));
        let mut outer = CodeFrame::new(version(12));
        outer.enter_scope();
        outer.add_scope_variable(&x, VariableAccess::DeclareLocal, &[]);

        let mut middle = CodeFrame::new(version(12));
        middle.allows_capture = true;
        middle.enter_scope();
        let mut inner = CodeFrame::new(version(12));
        inner.allows_capture = true;
        inner.enter_scope();

        assert_eq!(inner.add_scope_variable(&x, VariableAccess::Read, &[&middle, &outer]).index, -1);
        assert_eq!(inner.add_scope_variable(&z, VariableAccess::Read, &[&middle, &outer]).kind, VariableKind::Static);
        assert_eq!(middle.add_scope_variable(&x, VariableAccess::Read, &[&outer]).index, -1);

        // a named function in between stops the chain
        let mut inner = CodeFrame::new(version(12));
        inner.allows_capture = true;
        inner.enter_scope();
        let mut middle = CodeFrame::new(version(12));
        middle.enter_scope();
        assert_eq!(inner.add_scope_variable(&x, VariableAccess::Read, &[&middle, &outer]).kind, VariableKind::Static);
    }

    #[test]
    fn test_stack_watermark() {
        let mut frame = CodeFrame::new(version(12));
        frame.add_instruction(Instruction::IntConst { value: 1 }, 1);
        frame.add_instruction(Instruction::IntConst { value: 2 }, 1);
        frame.add_instruction(Instruction::IntConst { value: 3 }, 1);
        frame.add_instruction(Instruction::Call { argc: 1 }, 1);
        frame.add_instruction(Instruction::Pop, 1);
        frame.add_instruction(Instruction::SetState { state: RunState::Return }, 1);
        assert_eq!(frame.stack().counter().current(), 0);
        frame.finalize();
        assert_eq!(frame.sizes().stack, 3);
    }

    #[test]
    fn test_frame_round_trip() {
        for v in [1, 5, 8, 10, 11, 12, 13] {
            let mut map = SymbolMap::new();
            let (file, p, q, c) = (map.register("main.ad"), map.register("p"), map.register("q"), map.register("c"));
            let mut frame = CodeFrame::new(version(v));
            if v != 8 {
                frame.source_file = Some(file);
            }
            frame.enter_scope();
            if v > 3 {
                frame.add_parameter(&p);
                frame.add_parameter(&q);
            }
            if v >= 8 {
                frame.captures.push(c);
            }
            frame.add_instruction(Instruction::IntConst { value: 5 }, 3);
            frame.add_instruction(Instruction::PopOld, 4);
            frame.finalize();
            frame.check().unwrap();

            let mut writer = AdhocWriter::new(version(v));
            if v >= 9 && v < 13 {
                writer.write_symbol_table(&map);
            }
            writer.write(&frame);
            let bytes = writer.into_bytes();

            let mut reader = AdhocReader::new(&bytes, version(v));
            if v >= 9 && v < 13 {
                reader.read_symbol_table().unwrap();
            }
            let back = reader.read::<CodeFrame>().unwrap();
            assert_eq!(reader.remaining(), 0);
            assert_eq!(back, frame, "version {v}");
        }
    }

    #[test]
    fn test_missing_debug_lines() {
        let mut frame = CodeFrame::new(version(12));
        frame.has_debug_info = false;
        frame.add_instruction(Instruction::Nop, 7);
        let mut writer = AdhocWriter::new(version(12));
        writer.write(&frame);
        let bytes = writer.into_bytes();
        let back = AdhocReader::new(&bytes, version(12)).read::<CodeFrame>().unwrap();
        assert_eq!(back.instructions().next(), Some((0, &Instruction::Nop)));
    }

    #[test]
    fn test_check() {
        let mut map = SymbolMap::new();
        let mut frame = CodeFrame::new(version(3));
        frame.source_file = Some(map.register("f"));
        assert!(frame.check().is_ok());
        frame.params.push(map.register("p"));
        assert!(frame.check().is_err());

        let mut frame = CodeFrame::new(version(12));
        assert!(frame.check().is_err());
        frame.has_debug_info = false;
        frame.add_instruction(Instruction::ByteConst { value: 1 }, 0);
        assert!(matches!(frame.check(), Err(SerializationError::UnsupportedFeature { feature: "BYTE_CONST", version: 12 })));
    }
}
