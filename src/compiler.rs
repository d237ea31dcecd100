//! Lowering of a syntax tree into code frames.
//!
//! Instruction selection follows the target version: newer formats get `ASSIGN_POP`, split logical
//! operators, scope `LEAVE`s and element instructions, older ones the combinations their VMs understand.
//! Jumps are emitted with a zero target and patched once the destination is known. A jump target is the
//! index of the instruction *preceding* the destination, since the VM advances before executing.

use std::mem;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::ast::*;
use crate::codegen::CodeGen;
use crate::error::{CompilationError, ParseError, Result};
use crate::frame::{CodeFrame, ScopeExit, SlotRef, VariableAccess};
use crate::instruction::{Instruction, RunState};
use crate::preprocessor::Preprocessor;
use crate::stack::VariableKind;
use crate::symbol::{Symbol, SymbolMap};
use crate::version::AdhocVersion;

pub const SELF: &str = "self";
pub const NIL: &str = "nil";
pub const OBJECT: &str = "Object";
pub const SYSTEM: &str = "System";
pub const OPERATOR_STATIC: &str = "::";
pub const OPERATOR_IMPORT_ALL: &str = "*";
pub const OPERATOR_SUBSCRIPT: &str = "[]";
/// Callee name that turns a call into a variadic `VA_CALL`.
pub const VA_CALL_NAME: &str = "call";
pub const ITERATOR: &str = "iterator";
pub const FETCH_NEXT: &str = "fetch_next";

type CompileResult<T = ()> = std::result::Result<T, CompilationError>;

/// Settings for one compilation unit.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub version: AdhocVersion,
    /// Directory `#include` paths are resolved against first.
    pub base_include_dir: PathBuf,
    /// Fixed value for `__DATE__` and friends. Defaults to the current time.
    pub build_time: Option<OffsetDateTime>,
    /// Recorded in the top-level frame and used for `__FILE__`.
    pub source_file: Option<String>,
}
impl CompileOptions {
    pub fn new(version: AdhocVersion) -> Self {
        Self { version, base_include_dir: PathBuf::from("."), build_time: None, source_file: None }
    }
    pub fn with_base_include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_include_dir = dir.into();
        self
    }
    pub fn with_build_time(mut self, time: OffsetDateTime) -> Self {
        self.build_time = Some(time);
        self
    }
    pub fn with_source_file(mut self, file: impl Into<String>) -> Self {
        self.source_file = Some(file.into());
        self
    }
}

/// Pending jumps of a loop or switch. A switch only takes `break`s.
#[derive(Default)]
struct LoopContext {
    breaks: Vec<usize>,
    continues: Vec<usize>,
    is_switch: bool,
}

struct FrameContext {
    frame: CodeFrame,
    loops: Vec<LoopContext>,
    top_level_return: bool,
}
impl FrameContext {
    fn new(frame: CodeFrame) -> Self {
        Self { frame, loops: vec![], top_level_return: false }
    }
}

/// Compiles one syntax tree into a top-level [`CodeFrame`].
pub struct Compiler {
    version: AdhocVersion,
    source_file: Option<String>,
    symbols: SymbolMap,
    current: FrameContext,
    parents: Vec<FrameContext>,
    module_depth: i32,
    /// Line of the statement being compiled, used for nodes without a location.
    line: u32,
}

impl Compiler {
    pub fn new(options: &CompileOptions) -> Self {
        Self {
            version: options.version,
            source_file: options.source_file.clone(),
            symbols: SymbolMap::new(),
            current: FrameContext::new(CodeFrame::new(options.version)),
            parents: vec![],
            module_depth: 0,
            line: 0,
        }
    }

    pub fn compile(mut self, script: &Script) -> CompileResult<(CodeFrame, SymbolMap)> {
        info!(version = %self.version, statements = script.body.len(), "compiling script");
        if let Some(file) = &self.source_file {
            self.current.frame.source_file = Some(self.symbols.register_raw(file));
        }

        self.current.frame.enter_scope();
        self.compile_statements(&script.body)?;
        self.current.frame.leave_scope(ScopeExit::Block, true);
        self.set_state(RunState::Exit, 0);
        self.current.frame.finalize();

        debug!(instructions = self.current.frame.instruction_count(), symbols = self.symbols.len(), "script compiled");
        Ok((self.current.frame, self.symbols))
    }

    fn unsupported(&self, what: &str, line: u32) -> CompilationError {
        CompilationError::new(format!("{what} is not supported by adhoc version {}", self.version), Some(line))
    }
    fn require(&self, supported: bool, what: &str, line: u32) -> CompileResult {
        match supported {
            true => Ok(()),
            false => Err(self.unsupported(what, line)),
        }
    }

    fn emit(&mut self, ins: Instruction, line: u32) -> usize {
        self.current.frame.add_instruction(ins, line)
    }
    fn last_index(&self) -> i32 {
        self.current.frame.instruction_count() as i32 - 1
    }
    fn patch(&mut self, at: usize, target: i32) {
        if let Some(t) = self.current.frame.instruction_mut(at).and_then(Instruction::jump_target_mut) {
            *t = target;
        }
    }
    fn patch_to_last(&mut self, at: usize) {
        let target = self.last_index();
        self.patch(at, target);
    }

    fn pop(&mut self, line: u32) {
        let ins = if self.version.has_new_pop() { Instruction::Pop } else { Instruction::PopOld };
        self.emit(ins, line);
    }
    fn set_state(&mut self, state: RunState, line: u32) {
        let ins = if self.version.has_new_set_state() { Instruction::SetState { state } } else { Instruction::SetStateOld { state } };
        self.emit(ins, line);
    }
    fn assign_pop(&mut self, line: u32) {
        if self.version.has_assign_pop() {
            self.emit(Instruction::AssignPop, line);
        } else if self.version.has_new_assign() {
            self.emit(Instruction::Assign, line);
            self.emit(Instruction::Pop, line);
        } else {
            self.emit(Instruction::AssignOld, line);
            self.emit(Instruction::PopOld, line);
        }
    }
    fn assign(&mut self, line: u32) {
        let ins = if self.version.has_new_assign() { Instruction::Assign } else { Instruction::AssignOld };
        self.emit(ins, line);
    }
    fn void(&mut self, line: u32) {
        let ins = if self.version.get() > 10 { Instruction::VoidConst } else { Instruction::Nop };
        self.emit(ins, line);
    }
    fn operator(&mut self, punctuator: &str) -> Symbol {
        match self.version.uses_internal_operator_names() {
            true => self.symbols.register(punctuator),
            false => self.symbols.register_raw(punctuator),
        }
    }

    fn resolve(&mut self, symbol: &Symbol, access: VariableAccess) -> SlotRef {
        let ancestors: Vec<&CodeFrame> = self.parents.iter().rev().map(|x| &x.frame).collect();
        self.current.frame.add_scope_variable(symbol, access, &ancestors)
    }
    fn slot_symbols(symbol: &Symbol, slot: SlotRef) -> Vec<Symbol> {
        match slot.kind {
            VariableKind::Static => vec![symbol.clone(), symbol.clone()],
            VariableKind::Local => vec![symbol.clone()],
        }
    }
    fn variable_push(&mut self, name: &str, access: VariableAccess, line: u32) {
        let symbol = self.symbols.register_raw(name);
        let slot = self.resolve(&symbol, access);
        self.emit(Instruction::VariablePush { symbols: Self::slot_symbols(&symbol, slot), index: slot.index }, line);
    }
    fn variable_eval(&mut self, name: &str, line: u32) {
        let symbol = self.symbols.register_raw(name);
        let slot = self.resolve(&symbol, VariableAccess::Read);
        self.emit(Instruction::VariableEval { symbols: Self::slot_symbols(&symbol, slot), index: slot.index }, line);
    }
    /// `a::b::c` becomes the parts followed by the joined path.
    fn path_symbols(&mut self, path: &[Identifier]) -> Vec<Symbol> {
        let mut res: Vec<Symbol> = path.iter().map(|x| self.symbols.register_raw(&x.name)).collect();
        let full = path.iter().map(|x| x.name.as_str()).collect::<Vec<_>>().join(OPERATOR_STATIC);
        res.push(self.symbols.register_raw(&full));
        res
    }
    fn static_path(&mut self, path: &[Identifier], push: bool, line: u32) -> CompileResult {
        if path.is_empty() {
            return Err(CompilationError::new("empty static path", Some(line)));
        }
        let symbols = self.path_symbols(path);
        let full = symbols[symbols.len() - 1].clone();
        let slot = self.resolve(&full, VariableAccess::Read);
        let ins = match push {
            true => Instruction::VariablePush { symbols, index: slot.index },
            false => Instruction::VariableEval { symbols, index: slot.index },
        };
        self.emit(ins, line);
        Ok(())
    }

    fn enter_loop(&mut self) {
        self.current.frame.enter_scope();
        self.current.loops.push(LoopContext::default());
    }
    /// Patches pending `continue`s to `continue_target` and `break`s to the current end, then leaves the loop scope.
    fn leave_loop(&mut self, continue_target: i32) {
        let ctx = self.current.loops.pop().unwrap_or_default();
        let exit = self.last_index();
        for at in ctx.continues {
            self.patch(at, continue_target);
        }
        for at in ctx.breaks {
            self.patch(at, exit);
        }
        self.current.frame.leave_scope(ScopeExit::Block, true);
    }

    fn enter_module(&mut self) {
        self.current.frame.enter_scope();
        self.module_depth += 1;
    }
    fn leave_module(&mut self) {
        let exit = ScopeExit::Module { depth: self.module_depth, from_subroutine: !self.parents.is_empty() };
        self.current.frame.leave_scope(exit, true);
        self.module_depth -= 1;
    }

    fn compile_statements(&mut self, statements: &[Statement]) -> CompileResult {
        statements.iter().try_for_each(|x| self.compile_statement(x))
    }

    fn compile_block(&mut self, statements: &[Statement]) -> CompileResult {
        self.current.frame.enter_scope();
        self.compile_statements(statements)?;
        self.current.frame.leave_scope(ScopeExit::Block, !statements.is_empty());
        Ok(())
    }

    /// Bodies of control statements get their own scope unless they already are a block.
    fn compile_scoped(&mut self, statement: &Statement) -> CompileResult {
        match &statement.kind {
            StatementKind::Block(_) | StatementKind::Break | StatementKind::Continue => self.compile_statement(statement),
            _ => {
                self.current.frame.enter_scope();
                self.compile_statement(statement)?;
                self.current.frame.leave_scope(ScopeExit::Block, true);
                Ok(())
            }
        }
    }

    fn line_of(&self, range: &Range) -> u32 {
        match range.line {
            0 => self.line,
            line => line,
        }
    }

    fn compile_statement(&mut self, statement: &Statement) -> CompileResult {
        let line = self.line_of(&statement.range);
        let outer = mem::replace(&mut self.line, line);
        let res = self.compile_statement_at(statement, line);
        self.line = outer;
        res
    }

    fn compile_statement_at(&mut self, statement: &Statement, line: u32) -> CompileResult {
        match &statement.kind {
            StatementKind::Expression(expr) => self.compile_discarded(expr)?,
            StatementKind::Variable(declarators) => {
                for declarator in declarators {
                    self.compile_declarator(declarator, line)?;
                }
            }
            StatementKind::Static { name, value } => {
                let symbol = self.symbols.register_raw(&name.name);
                self.emit(Instruction::StaticDefine { name: symbol.clone() }, line);
                self.resolve(&symbol, VariableAccess::DeclareStatic);
                if let Some(value) = value {
                    if self.version.get() > 10 {
                        self.compile_expression(value)?;
                        self.variable_push(&name.name, VariableAccess::Assign, line);
                    } else {
                        self.variable_push(&name.name, VariableAccess::Assign, line);
                        self.compile_expression(value)?;
                    }
                    self.assign_pop(line);
                }
            }
            StatementKind::Attribute { name, value } => {
                match value {
                    Some(value) => self.compile_expression(value)?,
                    None => { self.emit(Instruction::NilConst, line); }
                }
                let symbol = self.symbols.register_raw(&name.name);
                self.resolve(&symbol, VariableAccess::DeclareStatic);
                self.emit(Instruction::AttributeDefine { name: symbol }, line);
            }
            StatementKind::Block(body) => self.compile_block(body)?,
            StatementKind::If { test, consequent, alternate } => {
                self.current.frame.enter_scope();
                self.compile_expression(test)?;
                let jif = self.emit(Instruction::JumpIfFalse { target: 0 }, line);
                self.compile_scoped(consequent)?;
                match alternate {
                    Some(alternate) => {
                        let jump = self.emit(Instruction::Jump { target: 0 }, line);
                        self.patch_to_last(jif);
                        self.compile_scoped(alternate)?;
                        self.patch_to_last(jump);
                    }
                    None => {
                        if self.version.get() < 12 {
                            let jump = self.emit(Instruction::Jump { target: 0 }, line);
                            self.patch_to_last(jump);
                        }
                        self.patch_to_last(jif);
                    }
                }
                self.current.frame.leave_scope(ScopeExit::Block, false);
            }
            StatementKind::While { test, body } => {
                self.enter_loop();
                let start = self.last_index();
                let jif = match test.kind {
                    ExpressionKind::Bool(true) => None,
                    _ => {
                        self.compile_expression(test)?;
                        Some(self.emit(Instruction::JumpIfFalse { target: 0 }, line))
                    }
                };
                self.compile_scoped(body)?;
                self.emit(Instruction::Jump { target: start }, line);
                if let Some(jif) = jif {
                    self.patch_to_last(jif);
                }
                self.leave_loop(start);
            }
            StatementKind::DoWhile { body, test } => {
                self.enter_loop();
                let start = self.last_index();
                self.compile_scoped(body)?;
                let test_start = self.last_index();
                self.compile_expression(test)?;
                let jif = self.emit(Instruction::JumpIfFalse { target: 0 }, line);
                self.emit(Instruction::Jump { target: start }, line);
                self.patch_to_last(jif);
                self.leave_loop(test_start);
            }
            StatementKind::For { init, test, update, body } => {
                self.enter_loop();
                if let Some(init) = init {
                    self.compile_statement(init)?;
                }
                let start = self.last_index();
                let jif = match test {
                    Some(test) => {
                        self.compile_expression(test)?;
                        Some(self.emit(Instruction::JumpIfFalse { target: 0 }, line))
                    }
                    None => None,
                };
                self.compile_scoped(body)?;
                let update_start = self.last_index();
                for expr in update {
                    self.compile_discarded(expr)?;
                }
                self.emit(Instruction::Jump { target: start }, line);
                if let Some(jif) = jif {
                    self.patch_to_last(jif);
                }
                self.leave_loop(update_start);
            }
            StatementKind::Foreach { target, iterable, body } => {
                self.require(self.version.has_foreach(), "foreach", line)?;
                self.enter_loop();
                let iterable_line = self.line_of(&iterable.range);
                self.compile_expression(iterable)?;
                let iterator = self.symbols.register_raw(ITERATOR);
                self.emit(Instruction::AttributeEval { symbols: vec![iterator] }, iterable_line);
                let temp = self.symbols.next_temp_name("in");
                self.variable_push(&temp, VariableAccess::DeclareLocal, iterable_line);
                self.assign_pop(iterable_line);

                let test_start = self.last_index();
                self.variable_eval(&temp, iterable_line);
                let fetch_next = self.symbols.register_raw(FETCH_NEXT);
                self.emit(Instruction::AttributeEval { symbols: vec![fetch_next] }, iterable_line);
                let exit = self.emit(Instruction::JumpIfFalse { target: 0 }, line);

                self.variable_eval(&temp, line);
                self.emit(Instruction::Eval, line);
                self.bind_pattern(target, line)?;
                self.compile_scoped(body)?;

                let continue_target = self.last_index();
                self.emit(Instruction::Jump { target: test_start }, line);
                self.patch_to_last(exit);
                self.leave_loop(continue_target);
            }
            StatementKind::Switch { discriminant, cases } => self.compile_switch(discriminant, cases, line)?,
            StatementKind::Break => {
                if self.current.loops.is_empty() {
                    return Err(CompilationError::new("break outside of a loop or switch", Some(line)));
                }
                let jump = self.emit(Instruction::Jump { target: 0 }, line);
                if let Some(ctx) = self.current.loops.last_mut() {
                    ctx.breaks.push(jump);
                }
            }
            StatementKind::Continue => {
                if !self.current.loops.iter().any(|x| !x.is_switch) {
                    return Err(CompilationError::new("continue outside of a loop", Some(line)));
                }
                let jump = self.emit(Instruction::Jump { target: 0 }, line);
                if let Some(ctx) = self.current.loops.iter_mut().rev().find(|x| !x.is_switch) {
                    ctx.continues.push(jump);
                }
            }
            StatementKind::Return(argument) => {
                if self.current.frame.scope_depth() == 1 {
                    self.current.top_level_return = true;
                }
                match argument {
                    Some(argument) => {
                        if let ExpressionKind::Assign { target, .. } = &argument.kind {
                            self.compile_expression_with(argument, true)?;
                            self.compile_expression(target)?;
                        } else {
                            self.compile_expression(argument)?;
                        }
                        if self.version.get() < 12 {
                            self.pop(line);
                            self.set_state(RunState::Return, line);
                        }
                    }
                    None => if self.version.get() >= 12 {
                        self.void(line);
                    }
                }
                self.set_state(RunState::Return, line);
            }
            StatementKind::Function(sub) => self.compile_subroutine(sub, false, line)?,
            StatementKind::Method(sub) => self.compile_subroutine(sub, true, line)?,
            StatementKind::Module { path, body } => {
                let names = match path.len() {
                    0 => return Err(CompilationError::new("module without a name", Some(line))),
                    1 => vec![self.symbols.register_raw(&path[0].name)],
                    _ => self.path_symbols(path),
                };
                self.emit(Instruction::ModuleDefine { names }, line);
                self.enter_module();
                self.compile_statements(body)?;
                self.leave_module();
                self.set_state(RunState::Exit, line);
            }
            StatementKind::Class { name, extends, body } => {
                if name.name.contains(OPERATOR_STATIC) {
                    return Err(CompilationError::new(format!("class name '{}' cannot be a static path", name.name), Some(line)));
                }
                let name = self.symbols.register_raw(&name.name);
                let extends = match extends.as_deref() {
                    Some([single]) => vec![self.symbols.register_raw(&single.name)],
                    Some(path) if !path.is_empty() => self.path_symbols(path),
                    _ if self.version.get() >= 10 => {
                        let path = [Identifier::new(SYSTEM), Identifier::new(OBJECT)];
                        self.path_symbols(&path)
                    }
                    _ => vec![self.symbols.register_raw(OBJECT)],
                };
                self.emit(Instruction::ClassDefine { name, extends }, line);
                self.enter_module();
                self.compile_statements(body)?;
                self.leave_module();
                self.set_state(RunState::Exit, line);
            }
            StatementKind::Import { path, target, alias } => {
                if path.is_empty() {
                    return Err(CompilationError::new("import without a module path", Some(line)));
                }
                let path = self.path_symbols(path);
                let property = self.symbols.register_raw(&target.name);
                let alias = match (self.version.has_import_alias(), alias) {
                    (true, Some(alias)) => Some(self.symbols.register_raw(&alias.name)),
                    (true, None) => Some(self.symbols.register_raw(NIL)),
                    (false, Some(_)) => return Err(self.unsupported("import alias", line)),
                    (false, None) => None,
                };
                if target.name != OPERATOR_IMPORT_ALL {
                    let declared = alias.as_ref().filter(|x| x.name() != NIL).unwrap_or(&property).clone();
                    self.resolve(&declared, VariableAccess::DeclareStatic);
                }
                self.emit(Instruction::Import { path, property, alias }, line);
            }
            StatementKind::Throw(expr) => {
                self.compile_expression(expr)?;
                self.emit(Instruction::Throw, line);
            }
            StatementKind::Try { block, param, handler } => {
                let try_catch = self.emit(Instruction::TryCatch { target: 0 }, line);
                self.compile_block(block)?;
                self.set_state(RunState::Exit, line);
                self.patch_to_last(try_catch);

                let jump = self.emit(Instruction::Jump { target: 0 }, line);
                match param {
                    Some(param) => {
                        self.emit(Instruction::IntConst { value: 0 }, line);
                        self.variable_push(&param.name, VariableAccess::DeclareLocal, line);
                        self.assign(line);
                        let temp = self.symbols.next_temp_name("catch");
                        self.variable_push(&temp, VariableAccess::DeclareLocal, line);
                        self.assign_pop(line);
                    }
                    None => {
                        self.emit(Instruction::IntConst { value: 0 }, line);
                        self.pop(line);
                    }
                }
                if let Some(handler) = handler {
                    self.compile_block(handler)?;
                }
                self.patch_to_last(jump);
            }
            StatementKind::Undef(path) => {
                let symbols = match path.len() {
                    0 => return Err(CompilationError::new("undef without a name", Some(line))),
                    1 => {
                        let name = self.symbols.register_raw(&path[0].name);
                        vec![name.clone(), name]
                    }
                    _ => self.path_symbols(path),
                };
                self.emit(Instruction::Undef { symbols }, line);
            }
            StatementKind::Print(exprs) => {
                for expr in exprs {
                    self.compile_expression(expr)?;
                }
                self.emit(Instruction::Print { argc: exprs.len() as i32 }, line);
                self.pop(line);
            }
            StatementKind::Require(expr) => {
                self.compile_expression(expr)?;
                self.emit(Instruction::Require, line);
            }
            StatementKind::ModuleConstructor { target, body } => {
                self.compile_expression(target)?;
                self.emit(Instruction::ModuleConstructor, line);
                self.compile_block(body)?;
                self.set_state(RunState::Exit, line);
            }
            StatementKind::SourceFile(file) => {
                let file = self.symbols.register_raw(file);
                self.emit(Instruction::SourceFile { file: file.clone() }, line);
                self.current.frame.source_file = Some(file);
            }
            StatementKind::Empty => (),
        }
        Ok(())
    }

    fn compile_declarator(&mut self, declarator: &VariableDeclarator, line: u32) -> CompileResult {
        match (&declarator.target, &declarator.init) {
            (Pattern::Identifier(name), None) => {
                let symbol = self.symbols.register_raw(&name.name);
                self.resolve(&symbol, VariableAccess::DeclareLocal);
            }
            (Pattern::Identifier(name), Some(init)) => {
                if self.version.get() > 10 {
                    self.compile_expression(init)?;
                    self.variable_push(&name.name, VariableAccess::DeclareLocal, line);
                } else {
                    self.variable_push(&name.name, VariableAccess::DeclareLocal, line);
                    self.compile_expression(init)?;
                }
                self.assign_pop(line);
            }
            (Pattern::List { elements, rest }, init) => {
                let init = init.as_ref().ok_or_else(|| CompilationError::new("list pattern without an initializer", Some(line)))?;
                if *rest {
                    self.require(self.version.supports_rest_element(), "rest element in list assignment", line)?;
                }
                let count = elements.len() as i32;
                if self.version.has_new_list_assign() {
                    self.compile_expression(init)?;
                    for element in elements {
                        self.variable_push(&element.name, VariableAccess::DeclareLocal, line);
                    }
                    self.emit(Instruction::ListAssign { count, has_rest: *rest }, line);
                } else {
                    for element in elements {
                        self.variable_push(&element.name, VariableAccess::DeclareLocal, line);
                    }
                    self.compile_expression(init)?;
                    self.emit(Instruction::ListAssignOld { count }, line);
                }
                self.pop(line);
            }
        }
        Ok(())
    }

    /// Declares the names of `target` and assigns them from the value on top of the stack.
    fn bind_pattern(&mut self, target: &Pattern, line: u32) -> CompileResult {
        match target {
            Pattern::Identifier(name) => {
                self.variable_push(&name.name, VariableAccess::DeclareLocal, line);
                self.assign_pop(line);
            }
            Pattern::List { elements, rest } => {
                if *rest {
                    self.require(self.version.supports_rest_element(), "rest element in list assignment", line)?;
                }
                for element in elements {
                    self.variable_push(&element.name, VariableAccess::DeclareLocal, line);
                }
                self.emit(Instruction::ListAssign { count: elements.len() as i32, has_rest: *rest }, line);
                self.pop(line);
            }
        }
        Ok(())
    }

    /// The discriminant is stored in a temporary, then every `case` compares against it and jumps to its
    /// body. Bodies follow the jump table in source order, so execution falls through until a `break`.
    fn compile_switch(&mut self, discriminant: &Expression, cases: &[SwitchCase], line: u32) -> CompileResult {
        self.current.frame.enter_scope();
        self.current.loops.push(LoopContext { is_switch: true, ..LoopContext::default() });

        let temp = self.symbols.next_temp_name("case");
        if self.version.get() > 10 {
            self.compile_expression(discriminant)?;
            self.variable_push(&temp, VariableAccess::DeclareLocal, line);
        } else {
            self.variable_push(&temp, VariableAccess::DeclareLocal, line);
            self.compile_expression(discriminant)?;
        }
        self.assign_pop(line);

        let mut case_jumps = Vec::with_capacity(cases.len());
        let mut default_jump = None;
        for case in cases {
            let case_line = self.line_of(&case.range);
            match &case.test {
                Some(test) => {
                    self.variable_eval(&temp, case_line);
                    self.compile_expression(test)?;
                    let operator = self.operator(BinaryOperator::Eq.punctuator());
                    self.emit(Instruction::BinaryOperator { operator }, case_line);
                    case_jumps.push(Some(self.emit(Instruction::JumpIfTrue { target: 0 }, case_line)));
                }
                None => {
                    if default_jump.is_some() {
                        return Err(CompilationError::new("switch has more than one default case", Some(case_line)));
                    }
                    default_jump = Some(self.emit(Instruction::Jump { target: 0 }, case_line));
                    case_jumps.push(None);
                }
            }
        }
        let has_default = default_jump.is_some();
        let default_jump = match default_jump {
            Some(at) => at,
            None => self.emit(Instruction::Jump { target: 0 }, line),
        };

        for (case, jump) in cases.iter().zip(case_jumps) {
            self.patch_to_last(jump.unwrap_or(default_jump));
            self.compile_statements(&case.body)?;
        }
        if !has_default {
            self.patch_to_last(default_jump);
        }
        self.leave_loop(0);
        Ok(())
    }

    /// Compiles an expression whose value is not used.
    fn compile_discarded(&mut self, expr: &Expression) -> CompileResult {
        match &expr.kind {
            ExpressionKind::Assign { .. } => self.compile_expression_with(expr, true),
            _ => {
                self.compile_expression(expr)?;
                let line = self.line_of(&expr.range);
                self.pop(line);
                Ok(())
            }
        }
    }

    fn compile_expression(&mut self, expr: &Expression) -> CompileResult {
        self.compile_expression_with(expr, false)
    }

    /// `pop_result` only matters for assignments, which can fold the pop into `ASSIGN_POP`.
    fn compile_expression_with(&mut self, expr: &Expression, pop_result: bool) -> CompileResult {
        let line = self.line_of(&expr.range);
        let v = self.version.get();
        match &expr.kind {
            ExpressionKind::Nil => { self.emit(Instruction::NilConst, line); }
            ExpressionKind::Bool(value) => {
                let ins = match self.version.has_extended_numerics() {
                    true => Instruction::BoolConst { value: *value },
                    false => Instruction::IntConst { value: *value as i32 },
                };
                self.emit(ins, line);
            }
            ExpressionKind::Int(value) => { self.emit(Instruction::IntConst { value: *value }, line); }
            ExpressionKind::Long(value) => { self.emit(Instruction::LongConst { value: *value }, line); }
            ExpressionKind::Float(value) => { self.emit(Instruction::FloatConst { value: *value }, line); }
            ExpressionKind::UInt(value) => {
                self.require(self.version.has_extended_numerics(), "unsigned integer literal", line)?;
                self.emit(Instruction::UIntConst { value: *value }, line);
            }
            ExpressionKind::ULong(value) => {
                self.require(self.version.has_extended_numerics(), "unsigned long literal", line)?;
                self.emit(Instruction::ULongConst { value: *value }, line);
            }
            ExpressionKind::Double(value) => {
                self.require(self.version.has_extended_numerics(), "double literal", line)?;
                self.emit(Instruction::DoubleConst { value: *value }, line);
            }
            ExpressionKind::String(value) => {
                if value.is_empty() && v > 10 {
                    self.emit(Instruction::StringPush { count: 0 }, line);
                } else {
                    let value = self.symbols.register_raw(value);
                    self.emit(Instruction::StringConst { value }, line);
                }
            }
            ExpressionKind::Template(parts) => {
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => {
                            let value = self.symbols.register_raw(text);
                            self.emit(Instruction::StringConst { value }, line);
                        }
                        TemplatePart::Expression(expr) => self.compile_expression(expr)?,
                    }
                }
                self.emit(Instruction::StringPush { count: parts.len() as i32 }, line);
            }
            ExpressionKind::Symbol(name) => {
                let value = self.symbols.register_raw(name);
                self.emit(Instruction::SymbolConst { value }, line);
            }
            ExpressionKind::Identifier(name) => self.variable_eval(name, line),
            ExpressionKind::StaticPath(path) => self.static_path(path, false, line)?,
            ExpressionKind::Line => {
                let ins = match self.version.has_extended_numerics() {
                    true => Instruction::UIntConst { value: line },
                    false => Instruction::IntConst { value: line as i32 },
                };
                self.emit(ins, line);
            }
            ExpressionKind::File => {
                let value = match &self.current.frame.source_file {
                    Some(file) => file.clone(),
                    None => self.symbols.register_raw(""),
                };
                self.emit(Instruction::StringConst { value }, line);
            }
            ExpressionKind::Binary { op, left, right } => {
                self.compile_expression(left)?;
                self.compile_expression(right)?;
                let operator = self.operator(op.punctuator());
                self.emit(Instruction::BinaryOperator { operator }, line);
            }
            ExpressionKind::Logical { op, left, right } => {
                self.compile_expression(left)?;
                let at = match (self.version.has_new_logical(), op) {
                    (true, LogicalOperator::And) => self.emit(Instruction::LogicalAnd { target: 0 }, line),
                    (true, LogicalOperator::Or) => self.emit(Instruction::LogicalOr { target: 0 }, line),
                    (false, LogicalOperator::And) => self.emit(Instruction::LogicalAndOld { target: 0 }, line),
                    (false, LogicalOperator::Or) => self.emit(Instruction::LogicalOrOld { target: 0 }, line),
                };
                if !self.version.has_new_logical() {
                    self.pop(line);
                }
                self.compile_expression(right)?;
                self.patch_to_last(at);
            }
            ExpressionKind::Unary { op, argument } => {
                self.compile_expression(argument)?;
                let operator = self.operator(op.punctuator());
                self.emit(Instruction::UnaryOperator { operator }, line);
            }
            ExpressionKind::Update { op, prefix, argument } => {
                self.compile_push(argument)?;
                let operator = self.operator(op.punctuator(*prefix));
                self.emit(Instruction::UnaryAssignOperator { operator }, line);
            }
            ExpressionKind::Assign { op, target, value } => self.compile_assign(*op, target, value, pop_result, line)?,
            ExpressionKind::Call { callee, arguments } => {
                let is_va_call = matches!(&callee.kind, ExpressionKind::Identifier(name) if name == VA_CALL_NAME);
                if is_va_call {
                    match arguments.len() {
                        0 => return Err(CompilationError::new("variadic call is missing its function target", Some(line))),
                        1 => return Err(CompilationError::new("variadic call is missing its arguments", Some(line))),
                        _ => (),
                    }
                } else {
                    self.compile_expression(callee)?;
                }
                for argument in arguments {
                    self.compile_expression(argument)?;
                }
                if is_va_call {
                    self.emit(Instruction::VaCall { count: arguments.len() as u32 }, line);
                    warn!(line, "variadic call compiled to VA_CALL");
                } else {
                    self.emit(Instruction::Call { argc: arguments.len() as i32 }, line);
                }
                if v < 12 {
                    self.emit(Instruction::Eval, line);
                }
            }
            ExpressionKind::Member { object, property } => {
                self.compile_expression(object)?;
                let symbol = self.symbols.register_raw(&property.name);
                self.emit(Instruction::AttributeEval { symbols: vec![symbol] }, line);
            }
            ExpressionKind::Element { object, index } => {
                self.compile_expression(object)?;
                self.compile_expression(index)?;
                if self.version.has_element_ops() {
                    self.emit(Instruction::ElementEval, line);
                } else {
                    let operator = self.symbols.register_raw(OPERATOR_SUBSCRIPT);
                    self.emit(Instruction::BinaryOperator { operator }, line);
                    self.emit(Instruction::Eval, line);
                }
            }
            ExpressionKind::ObjectSelector { object, property } => {
                self.compile_expression(object)?;
                self.compile_expression(property)?;
                self.emit(Instruction::ObjectSelector, line);
            }
            ExpressionKind::Conditional { test, consequent, alternate } => {
                self.compile_expression(test)?;
                let jif = self.emit(Instruction::JumpIfFalse { target: 0 }, line);
                self.compile_expression(consequent)?;
                let jump = self.emit(Instruction::Jump { target: 0 }, line);
                if v >= 12 {
                    self.pop(line);
                }
                self.patch_to_last(jif);
                self.compile_expression(alternate)?;
                self.patch_to_last(jump);
            }
            ExpressionKind::Array(elements) => {
                if self.version.has_new_array_const() {
                    self.emit(Instruction::ArrayConst { size: elements.len() as u32 }, line);
                    for element in elements {
                        self.compile_expression(element)?;
                        self.emit(Instruction::ArrayPush, line);
                    }
                } else {
                    for element in elements {
                        self.compile_expression(element)?;
                    }
                    self.emit(Instruction::ArrayConstOld { size: elements.len() as u32 }, line);
                }
            }
            ExpressionKind::Map(pairs) => {
                self.require(self.version.has_map_support(), "map literal", line)?;
                self.emit(Instruction::MapConst, line);
                for (key, value) in pairs {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                    self.emit(Instruction::MapInsert, line);
                }
            }
            ExpressionKind::Function(sub) => self.compile_subroutine_literal(sub, false, line)?,
            ExpressionKind::Method(sub) => self.compile_subroutine_literal(sub, true, line)?,
        }
        Ok(())
    }

    /// Pushes a reference to an assignable expression.
    fn compile_push(&mut self, target: &Expression) -> CompileResult {
        let line = self.line_of(&target.range);
        match &target.kind {
            ExpressionKind::Identifier(name) => self.variable_push(name, VariableAccess::Assign, line),
            ExpressionKind::StaticPath(path) => self.static_path(path, true, line)?,
            ExpressionKind::Member { object, property } => {
                self.compile_expression(object)?;
                let symbol = self.symbols.register_raw(&property.name);
                self.emit(Instruction::AttributePush { symbols: vec![symbol] }, line);
            }
            ExpressionKind::Element { object, index } => {
                self.compile_expression(object)?;
                self.compile_expression(index)?;
                if self.version.has_element_ops() {
                    self.emit(Instruction::ElementPush, line);
                } else {
                    let operator = self.symbols.register_raw(OPERATOR_SUBSCRIPT);
                    self.emit(Instruction::BinaryOperator { operator }, line);
                }
            }
            ExpressionKind::ObjectSelector { object, property } => {
                self.compile_expression(object)?;
                self.compile_expression(property)?;
                self.emit(Instruction::ObjectSelector, line);
            }
            _ => return Err(CompilationError::new("invalid assignment target", Some(line))),
        }
        Ok(())
    }

    fn compile_assign(&mut self, op: AssignOperator, target: &Expression, value: &Expression, pop_result: bool, line: u32) -> CompileResult {
        match op {
            AssignOperator::Assign if self.version.get() > 10 => {
                self.compile_expression(value)?;
                self.compile_push(target)?;
                match pop_result {
                    true => self.assign_pop(line),
                    false => self.assign(line),
                }
            }
            AssignOperator::Assign => {
                self.compile_push(target)?;
                self.compile_expression(value)?;
                match pop_result {
                    true => self.assign_pop(line),
                    false => self.assign(line),
                }
            }
            AssignOperator::Compound(bop) => {
                self.compile_push(target)?;
                self.compile_expression(value)?;
                let operator = self.operator(bop.punctuator());
                self.emit(Instruction::BinaryAssignOperator { operator }, line);
                if pop_result {
                    self.pop(line);
                }
            }
        }
        Ok(())
    }

    /// Sets up a fresh frame for a subroutine, declaring its parameters and emitting their defaults into the current frame.
    fn begin_subroutine(&mut self, sub: &Subroutine, is_method: bool, allows_capture: bool, line: u32) -> CompileResult<CodeFrame> {
        let mut frame = CodeFrame::new(self.version);
        frame.source_file = self.current.frame.source_file.clone();
        frame.has_debug_info = self.current.frame.has_debug_info;
        frame.allows_capture = allows_capture;
        frame.enter_scope();

        if !sub.params.is_empty() {
            self.require(self.version.has_parameters(), "subroutine parameters", line)?;
        }
        for (i, param) in sub.params.iter().enumerate() {
            if param.rest {
                if i + 1 != sub.params.len() {
                    return Err(CompilationError::new("rest parameter must be the last parameter", Some(line)));
                }
                self.require(self.version.supports_rest_element(), "rest parameter", line)?;
                frame.has_rest_element = true;
            }
            let symbol = self.symbols.register_raw(&param.name.name);
            frame.add_parameter(&symbol);
            match &param.default {
                Some(default) => self.compile_expression(default)?,
                None => { self.emit(Instruction::NilConst, line); }
            }
        }
        if is_method && !self.version.uses_new_split_stack() {
            let this = self.symbols.register_raw(SELF);
            frame.add_scope_variable(&this, VariableAccess::DeclareLocal, &[]);
        }
        Ok(frame)
    }

    /// Compiles `body` into `frame` and hands the finished frame back.
    fn finish_subroutine(&mut self, frame: CodeFrame, body: &SubroutineBody, line: u32) -> CompileResult<CodeFrame> {
        self.parents.push(mem::replace(&mut self.current, FrameContext::new(frame)));
        let res = self.compile_subroutine_body(body, line);
        let child = self.parents.pop().map(|x| mem::replace(&mut self.current, x));
        res?;
        let mut ctx = child.ok_or_else(|| CompilationError::new("subroutine frame lost", Some(line)))?;
        ctx.frame.finalize();
        Ok(ctx.frame)
    }

    fn compile_subroutine_body(&mut self, body: &SubroutineBody, line: u32) -> CompileResult {
        match body {
            SubroutineBody::Block(statements) => {
                self.compile_statements(statements)?;
                if !self.current.top_level_return {
                    if self.version.get() >= 12 {
                        self.void(line);
                    }
                    self.set_state(RunState::Return, line);
                }
            }
            SubroutineBody::Expression(expr) => {
                self.compile_expression(expr)?;
                self.set_state(RunState::Return, line);
            }
        }
        self.current.frame.leave_scope(ScopeExit::Block, false);
        Ok(())
    }

    fn compile_subroutine(&mut self, sub: &Subroutine, is_method: bool, line: u32) -> CompileResult {
        let name = sub.name.as_ref().ok_or_else(|| CompilationError::new("subroutine declaration without a name", Some(line)))?;
        let frame = self.begin_subroutine(sub, is_method, false, line)?;
        let name = self.symbols.register_raw(&name.name);
        self.resolve(&name, VariableAccess::DeclareStatic);

        debug!(name = name.name(), is_method, "compiling subroutine");
        let frame = Box::new(self.finish_subroutine(frame, &sub.body, line)?);
        let ins = match is_method {
            true => Instruction::MethodDefine { name, frame },
            false => Instruction::FunctionDefine { name, frame },
        };
        self.emit(ins, line);
        Ok(())
    }

    fn compile_subroutine_literal(&mut self, sub: &Subroutine, is_method: bool, line: u32) -> CompileResult {
        let frame = self.begin_subroutine(sub, is_method, true, line)?;
        let body = match &sub.body {
            // literal bodies get a scope of their own below the parameter scope
            SubroutineBody::Block(statements) => SubroutineBody::Block(vec![Statement::new(StatementKind::Block(statements.clone()), sub.range)]),
            SubroutineBody::Expression(expr) => SubroutineBody::Expression(expr.clone()),
        };
        let frame = self.finish_subroutine(frame, &body, line)?;
        if !frame.captures().is_empty() {
            self.require(self.version.has_capture_support(), "captured variables", line)?;
        }
        for capture in frame.captures().to_vec() {
            self.variable_eval(capture.name(), line);
        }
        let frame = Box::new(frame);
        let ins = match is_method {
            true => Instruction::MethodConst { frame },
            false => Instruction::FunctionConst { frame },
        };
        self.emit(ins, line);
        Ok(())
    }
}

/// Runs the whole pipeline on one source file: preprocess, parse, compile and generate.
///
/// Any parser diagnostic is fatal. Returns the generated binary.
pub fn build<P: Parser>(source: &str, options: &CompileOptions, parser: &mut P) -> Result<Vec<u8>> {
    let file_name = options.source_file.clone().unwrap_or_default();
    let mut preprocessor = match options.build_time {
        Some(time) => Preprocessor::with_build_time(time),
        None => Preprocessor::new(),
    };
    let timestamp = options.build_time.unwrap_or_else(crate::util::now);
    let text = preprocessor.preprocess(source, &options.base_include_dir, &file_name, timestamp)?;

    let (script, diagnostics) = parser.parse(&text);
    let script = match (script, diagnostics.is_empty()) {
        (Some(script), true) => script,
        _ => return Err(ParseError { diagnostics }.into()),
    };

    let (frame, symbols) = Compiler::new(options).compile(&script)?;
    Ok(CodeGen::generate(&frame, &symbols, options.version)?)
}

/// Looks up the directory of `path`, falling back to the working directory.
pub fn include_dir_of(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(v: u32, body: Vec<Statement>) -> (CodeFrame, SymbolMap) {
        let options = CompileOptions::new(AdhocVersion::new(v).unwrap()).with_source_file("main.ad");
        Compiler::new(&options).compile(&Script { body, range: Range::default() }).unwrap()
    }

    fn var(name: &str, value: i32) -> Statement {
        StatementKind::Variable(vec![VariableDeclarator {
            target: Pattern::Identifier(Identifier::new(name)),
            init: Some(Expression::int(value)),
        }]).at_line(1)
    }

    fn listing(frame: &CodeFrame) -> Vec<String> {
        frame.instructions().map(|(_, ins)| ins.to_string()).collect()
    }

    #[test]
    fn test_block_scope_reuses_slots() {
        let (frame, _) = compile(12, vec![var("a", 1), StatementKind::Block(vec![var("b", 2)]).at_line(1), var("c", 3)]);
        let slots: Vec<i32> = frame.instructions().filter_map(|(_, ins)| match ins {
            Instruction::VariablePush { index, .. } => Some(*index),
            _ => None,
        }).collect();
        assert_eq!(slots, [1, 2, 2]);
        assert_eq!(frame.sizes().local_storage, 3);
        assert!(frame.instructions().any(|(_, ins)| *ins == Instruction::Leave { depth: 0, rewind: 2 }));
    }

    #[test]
    fn test_assignment_selection() {
        let (frame, _) = compile(12, vec![var("a", 1)]);
        assert!(matches!(frame.instructions().nth(2), Some((_, Instruction::AssignPop))));

        let (frame, _) = compile(10, vec![var("a", 1)]);
        let kinds: Vec<_> = frame.instructions().map(|(_, ins)| ins.kind()).collect();
        use crate::instruction::InstructionType as T;
        assert_eq!(kinds, [T::VariablePush, T::IntConst, T::Assign, T::Pop, T::SetState]);

        let (frame, _) = compile(7, vec![var("a", 1)]);
        let kinds: Vec<_> = frame.instructions().map(|(_, ins)| ins.kind()).collect();
        assert_eq!(kinds, [T::VariablePush, T::IntConst, T::AssignOld, T::PopOld, T::SetStateOld]);
    }

    #[test]
    fn test_while_loop_patching() {
        let test = Expression::new(ExpressionKind::Binary {
            op: BinaryOperator::Lt,
            left: Box::new(Expression::ident("i")),
            right: Box::new(Expression::int(3)),
        }, Range::default());
        let body = StatementKind::Block(vec![StatementKind::Break.at_line(2)]).at_line(2);
        let (frame, _) = compile(12, vec![var("i", 0), StatementKind::While { test, body: Box::new(body) }.at_line(2)]);
        let ins: Vec<_> = frame.instructions().map(|(_, x)| x).collect();
        // 0 int, 1 push, 2 assign_pop, 3 eval, 4 int, 5 op, 6 jif, 7 break, 8 block leave, 9 jump to start, 10 loop leave
        assert_eq!(*ins[6], Instruction::JumpIfFalse { target: 9 });
        assert_eq!(*ins[7], Instruction::Jump { target: 9 });
        assert!(matches!(ins[8], Instruction::Leave { .. }));
        assert_eq!(*ins[9], Instruction::Jump { target: 2 });
        assert!(matches!(ins[10], Instruction::Leave { .. }));
    }

    #[test]
    fn test_break_outside_loop() {
        let options = CompileOptions::new(AdhocVersion::new(12).unwrap());
        let err = Compiler::new(&options).compile(&Script { body: vec![StatementKind::Break.at_line(4)], range: Range::default() }).unwrap_err();
        assert_eq!(err.line, Some(4));
    }

    #[test]
    fn test_version_gated_literals() {
        let options = CompileOptions::new(AdhocVersion::new(11).unwrap());
        let expr = Expression::new(ExpressionKind::Double(1.5), Range::default());
        let res = Compiler::new(&options).compile(&Script { body: vec![StatementKind::Expression(expr).at_line(1)], range: Range::default() });
        assert!(res.is_err());

        let (frame, _) = compile(11, vec![StatementKind::Expression(Expression::new(ExpressionKind::Bool(true), Range::default())).at_line(1)]);
        assert_eq!(listing(&frame)[0], "INT_CONST: 1 (0x01)");
    }

    #[test]
    fn test_function_frames() {
        let sub = Subroutine {
            name: Some(Identifier::new("add")),
            params: vec![
                Parameter { name: Identifier::new("x"), default: None, rest: false },
                Parameter { name: Identifier::new("y"), default: Some(Expression::int(2)), rest: false },
            ],
            body: SubroutineBody::Block(vec![]),
            range: Range::default(),
        };
        let (frame, _) = compile(12, vec![StatementKind::Function(sub).at_line(1)]);
        let ins: Vec<_> = frame.instructions().map(|(_, x)| x).collect();
        assert_eq!(*ins[0], Instruction::NilConst);
        assert_eq!(*ins[1], Instruction::IntConst { value: 2 });
        let Instruction::FunctionDefine { name, frame: inner } = ins[2] else { panic!("expected a function") };
        assert_eq!(name.name(), "add");
        assert_eq!(inner.signature(), "(x, y)");
        assert_eq!(listing(inner), ["VOID_CONST", "SET_STATE: State=RETURN (1)"]);
        assert_eq!(frame.sizes().stack, 2);
    }

    #[test]
    fn test_closure_captures() {
        let literal = Subroutine {
            name: None,
            params: vec![],
            body: SubroutineBody::Expression(Box::new(Expression::ident("a"))),
            range: Range::default(),
        };
        let expr = Expression::new(ExpressionKind::Function(Box::new(literal)), Range::default());
        let (frame, _) = compile(12, vec![var("a", 1), StatementKind::Expression(expr).at_line(2)]);
        let ins: Vec<_> = frame.instructions().map(|(_, x)| x).collect();
        assert!(matches!(ins[3], Instruction::VariableEval { index: 1, .. }));
        let Instruction::FunctionConst { frame: inner } = ins[4] else { panic!("expected a function literal") };
        assert_eq!(inner.signature(), "()[a]");
    }

    #[test]
    fn test_operator_names_by_version() {
        let expr = Expression::new(ExpressionKind::Binary {
            op: BinaryOperator::Add,
            left: Box::new(Expression::int(1)),
            right: Box::new(Expression::int(2)),
        }, Range::default());
        let stmt = StatementKind::Expression(expr).at_line(1);
        let (_, symbols) = compile(12, vec![stmt.clone()]);
        assert!(symbols.get("__add__").is_some());
        assert!(symbols.get("+").is_none());
        let (_, symbols) = compile(10, vec![stmt]);
        assert!(symbols.get("+").is_some());
        assert!(symbols.get("__add__").is_none());
    }

    #[test]
    fn test_unlocated_expressions_use_statement_line() {
        let value = Expression::new(ExpressionKind::Double(1.5), Range::default());
        let body = StatementKind::Block(vec![StatementKind::Expression(value).at_line(5)]).at_line(4);
        let options = CompileOptions::new(AdhocVersion::new(11).unwrap());
        let err = Compiler::new(&options).compile(&Script { body: vec![body.clone()], range: Range::default() }).unwrap_err();
        assert_eq!(err.line, Some(5));

        let (frame, _) = compile(12, vec![body]);
        let lines: Vec<u32> = frame.instructions().map(|(line, _)| line).collect();
        assert_eq!(lines[..2], [5, 5]);
    }

    #[test]
    fn test_map_needs_version_11() {
        let expr = Expression::new(ExpressionKind::Map(vec![]), Range::default());
        let options = CompileOptions::new(AdhocVersion::new(10).unwrap());
        let res = Compiler::new(&options).compile(&Script { body: vec![StatementKind::Expression(expr).at_line(3)], range: Range::default() });
        assert_eq!(res.unwrap_err().line, Some(3));
    }
}
