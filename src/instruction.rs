//! The adhoc instruction catalog.
//!
//! Every instruction is a variant of [`Instruction`] and carries a stable one byte tag ([`InstructionType`]).
//! Tags follow the VM's historic numbering, so obsolete forms (`*_OLD`) keep their slots next to their replacements.

use std::fmt;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::error::SerializationError;
use crate::frame::CodeFrame;
use crate::stream::{AdhocReader, AdhocWriter, BinaryRead, BinaryWrite};
use crate::symbol::{operator_punctuator, Symbol};
use crate::version::AdhocVersion;

/// The on-disk tag of an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u8)]
pub enum InstructionType {
    ArrayConstOld = 0,
    AssignOld,
    AttributeDefine,
    AttributePush,
    BinaryAssignOperator,
    BinaryOperator,
    Call,
    ClassDefine,
    Eval,
    FloatConst,
    FunctionDefine,
    Import,
    IntConst,
    Jump,
    JumpIfTrue,
    JumpIfFalse,
    ListAssignOld,
    LocalDefine,
    LogicalAndOld,
    LogicalOrOld,
    MethodDefine,
    ModuleDefine,
    NilConst,
    Nop,
    PopOld,
    Print,
    Require,
    SetStateOld,
    StaticDefine,
    StringConst,
    StringPush,
    Throw,
    TryCatch,
    UnaryAssignOperator,
    UnaryOperator,
    Undef,
    VariablePush,
    AttributeEval,
    VariableEval,
    SourceFile,
    FunctionConst,
    MethodConst,
    MapConstOld,
    LongConst,
    Assign,
    ListAssign,
    CallOld,
    ObjectSelector,
    SymbolConst,
    Leave,
    ArrayConst,
    ArrayPush,
    MapConst,
    MapInsert,
    Pop,
    SetState,
    VoidConst,
    AssignPop,
    UIntConst,
    ULongConst,
    DoubleConst,
    ElementPush,
    ElementEval,
    LogicalAnd,
    LogicalOr,
    BoolConst,
    ModuleConstructor,
    VaCall,
    CodeEval,
    DelegateDefine,
    JumpIfNil,
    JumpNotNil,
    ByteConst,
    UByteConst,
    ShortConst,
    UShortConst,
    LogicalOptional,
}

impl InstructionType {
    pub fn mnemonic(self) -> &'static str {
        use InstructionType::*;
        match self {
            ArrayConstOld => "ARRAY_CONST_OLD",
            AssignOld => "ASSIGN_OLD",
            AttributeDefine => "ATTRIBUTE_DEFINE",
            AttributePush => "ATTRIBUTE_PUSH",
            BinaryAssignOperator => "BINARY_ASSIGN_OPERATOR",
            BinaryOperator => "BINARY_OPERATOR",
            Call => "CALL",
            ClassDefine => "CLASS_DEFINE",
            Eval => "EVAL",
            FloatConst => "FLOAT_CONST",
            FunctionDefine => "FUNCTION_DEFINE",
            Import => "IMPORT",
            IntConst => "INT_CONST",
            Jump => "JUMP",
            JumpIfTrue => "JUMP_IF_TRUE",
            JumpIfFalse => "JUMP_IF_FALSE",
            ListAssignOld => "LIST_ASSIGN_OLD",
            LocalDefine => "LOCAL_DEFINE",
            LogicalAndOld => "LOGICAL_AND_OLD",
            LogicalOrOld => "LOGICAL_OR_OLD",
            MethodDefine => "METHOD_DEFINE",
            ModuleDefine => "MODULE_DEFINE",
            NilConst => "NIL_CONST",
            Nop => "NOP",
            PopOld => "POP_OLD",
            Print => "PRINT",
            Require => "REQUIRE",
            SetStateOld => "SET_STATE_OLD",
            StaticDefine => "STATIC_DEFINE",
            StringConst => "STRING_CONST",
            StringPush => "STRING_PUSH",
            Throw => "THROW",
            TryCatch => "TRY_CATCH",
            UnaryAssignOperator => "UNARY_ASSIGN_OPERATOR",
            UnaryOperator => "UNARY_OPERATOR",
            Undef => "UNDEF",
            VariablePush => "VARIABLE_PUSH",
            AttributeEval => "ATTRIBUTE_EVAL",
            VariableEval => "VARIABLE_EVAL",
            SourceFile => "SOURCE_FILE",
            FunctionConst => "FUNCTION_CONST",
            MethodConst => "METHOD_CONST",
            MapConstOld => "MAP_CONST_OLD",
            LongConst => "LONG_CONST",
            Assign => "ASSIGN",
            ListAssign => "LIST_ASSIGN",
            CallOld => "CALL_OLD",
            ObjectSelector => "OBJECT_SELECTOR",
            SymbolConst => "SYMBOL_CONST",
            Leave => "LEAVE",
            ArrayConst => "ARRAY_CONST",
            ArrayPush => "ARRAY_PUSH",
            MapConst => "MAP_CONST",
            MapInsert => "MAP_INSERT",
            Pop => "POP",
            SetState => "SET_STATE",
            VoidConst => "VOID_CONST",
            AssignPop => "ASSIGN_POP",
            UIntConst => "U_INT_CONST",
            ULongConst => "U_LONG_CONST",
            DoubleConst => "DOUBLE_CONST",
            ElementPush => "ELEMENT_PUSH",
            ElementEval => "ELEMENT_EVAL",
            LogicalAnd => "LOGICAL_AND",
            LogicalOr => "LOGICAL_OR",
            BoolConst => "BOOL_CONST",
            ModuleConstructor => "MODULE_CONSTRUCTOR",
            VaCall => "VA_CALL",
            CodeEval => "CODE_EVAL",
            DelegateDefine => "DELEGATE_DEFINE",
            JumpIfNil => "JUMP_IF_NIL",
            JumpNotNil => "JUMP_NOT_NIL",
            ByteConst => "BYTE_CONST",
            UByteConst => "U_BYTE_CONST",
            ShortConst => "SHORT_CONST",
            UShortConst => "U_SHORT_CONST",
            LogicalOptional => "LOGICAL_OPTIONAL",
        }
    }

    /// The first format version whose VM understands this instruction.
    pub fn min_version(self) -> u8 {
        use InstructionType::*;
        match self {
            Assign | Pop | SetState => 10,
            Leave | ArrayConst | ArrayPush | MapConst | MapInsert | AssignPop | ListAssign | LogicalAnd | LogicalOr => 11,
            UIntConst | ULongConst | DoubleConst | BoolConst | ElementPush | ElementEval | DelegateDefine
                | JumpIfNil | JumpNotNil | LogicalOptional => 12,
            ByteConst | UByteConst | ShortConst | UShortConst => 13,
            _ => AdhocVersion::MIN,
        }
    }
}
impl fmt::Display for InstructionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// VM run states targeted by `SET_STATE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum RunState {
    Exit = 0,
    Return,
    Yield,
    Exception,
    Call,
    Run,
}
impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Exit => "EXIT",
            RunState::Return => "RETURN",
            RunState::Yield => "YIELD",
            RunState::Exception => "EXCEPTION",
            RunState::Call => "CALL",
            RunState::Run => "RUN",
        })
    }
}
impl BinaryWrite for RunState {
    fn write(&self, writer: &mut AdhocWriter) {
        writer.write(&(*self as u8))
    }
}
impl BinaryRead for RunState {
    fn read(reader: &mut AdhocReader) -> Result<Self, SerializationError> {
        let offset = reader.position();
        let value = reader.read::<u8>()?;
        RunState::from_u8(value).ok_or(SerializationError::BadRunState { value, offset })
    }
}

/// A single VM instruction.
///
/// Jump targets are instruction indices within the owning frame.
#[derive(Debug, PartialEq)]
pub enum Instruction {
    /// Consumes `size` values and pushes an array made of them.
    ArrayConstOld { size: u32 },
    /// Assigns the top value to the reference below it, leaving the value on the stack.
    AssignOld,
    /// Defines an attribute of the current module, initialized from the top value.
    AttributeDefine { name: Symbol },
    /// Pushes a reference to an attribute of the value on the stack.
    AttributePush { symbols: Vec<Symbol> },
    /// Compound assignment through an operator (`+=` and friends).
    BinaryAssignOperator { operator: Symbol },
    BinaryOperator { operator: Symbol },
    /// Calls a function with `argc` arguments and pushes its result.
    Call { argc: i32 },
    ClassDefine { name: Symbol, extends: Vec<Symbol> },
    Eval,
    FloatConst { value: f32 },
    FunctionDefine { name: Symbol, frame: Box<CodeFrame> },
    /// Imports `property` from the module at `path`, optionally under an alias (versions 10+ always carry one).
    Import { path: Vec<Symbol>, property: Symbol, alias: Option<Symbol> },
    IntConst { value: i32 },
    Jump { target: i32 },
    JumpIfTrue { target: i32 },
    JumpIfFalse { target: i32 },
    ListAssignOld { count: i32 },
    LogicalAndOld { target: i32 },
    LogicalOrOld { target: i32 },
    MethodDefine { name: Symbol, frame: Box<CodeFrame> },
    ModuleDefine { names: Vec<Symbol> },
    NilConst,
    Nop,
    PopOld,
    Print { argc: i32 },
    Require,
    SetStateOld { state: RunState },
    StaticDefine { name: Symbol },
    StringConst { value: Symbol },
    /// Concatenates `count` values into a single string (template literals).
    StringPush { count: i32 },
    Throw,
    /// Registers a handler starting at instruction `target`.
    TryCatch { target: i32 },
    UnaryAssignOperator { operator: Symbol },
    UnaryOperator { operator: Symbol },
    Undef { symbols: Vec<Symbol> },
    /// Pushes a reference to a variable slot. Statics carry their symbol twice.
    VariablePush { symbols: Vec<Symbol>, index: i32 },
    AttributeEval { symbols: Vec<Symbol> },
    /// Pushes the value of a variable slot. Statics carry their symbol twice.
    VariableEval { symbols: Vec<Symbol>, index: i32 },
    SourceFile { file: Symbol },
    FunctionConst { frame: Box<CodeFrame> },
    MethodConst { frame: Box<CodeFrame> },
    MapConstOld { value: i32 },
    LongConst { value: i64 },
    Assign,
    /// Destructures an array into `count` references. `has_rest` marks a trailing rest element (versions 12+).
    ListAssign { count: i32, has_rest: bool },
    CallOld { argc: i32 },
    ObjectSelector,
    SymbolConst { value: Symbol },
    /// Leaves a scope, unwinding `depth` module levels and freeing local slots from `rewind` on.
    Leave { depth: i32, rewind: i32 },
    ArrayConst { size: u32 },
    ArrayPush,
    MapConst,
    MapInsert,
    Pop,
    SetState { state: RunState },
    VoidConst,
    AssignPop,
    UIntConst { value: u32 },
    ULongConst { value: u64 },
    DoubleConst { value: f64 },
    ElementPush,
    ElementEval,
    LogicalAnd { target: i32 },
    LogicalOr { target: i32 },
    BoolConst { value: bool },
    ModuleConstructor,
    VaCall { count: u32 },
    DelegateDefine { name: Symbol },
    JumpIfNil { target: i32 },
    JumpNotNil { target: i32 },
    ByteConst { value: i8 },
    UByteConst { value: u8 },
    ShortConst { value: i16 },
    UShortConst { value: u16 },
    LogicalOptional,
}

impl Instruction {
    pub fn kind(&self) -> InstructionType {
        use InstructionType as T;
        match self {
            Instruction::ArrayConstOld { .. } => T::ArrayConstOld,
            Instruction::AssignOld => T::AssignOld,
            Instruction::AttributeDefine { .. } => T::AttributeDefine,
            Instruction::AttributePush { .. } => T::AttributePush,
            Instruction::BinaryAssignOperator { .. } => T::BinaryAssignOperator,
            Instruction::BinaryOperator { .. } => T::BinaryOperator,
            Instruction::Call { .. } => T::Call,
            Instruction::ClassDefine { .. } => T::ClassDefine,
            Instruction::Eval => T::Eval,
            Instruction::FloatConst { .. } => T::FloatConst,
            Instruction::FunctionDefine { .. } => T::FunctionDefine,
            Instruction::Import { .. } => T::Import,
            Instruction::IntConst { .. } => T::IntConst,
            Instruction::Jump { .. } => T::Jump,
            Instruction::JumpIfTrue { .. } => T::JumpIfTrue,
            Instruction::JumpIfFalse { .. } => T::JumpIfFalse,
            Instruction::ListAssignOld { .. } => T::ListAssignOld,
            Instruction::LogicalAndOld { .. } => T::LogicalAndOld,
            Instruction::LogicalOrOld { .. } => T::LogicalOrOld,
            Instruction::MethodDefine { .. } => T::MethodDefine,
            Instruction::ModuleDefine { .. } => T::ModuleDefine,
            Instruction::NilConst => T::NilConst,
            Instruction::Nop => T::Nop,
            Instruction::PopOld => T::PopOld,
            Instruction::Print { .. } => T::Print,
            Instruction::Require => T::Require,
            Instruction::SetStateOld { .. } => T::SetStateOld,
            Instruction::StaticDefine { .. } => T::StaticDefine,
            Instruction::StringConst { .. } => T::StringConst,
            Instruction::StringPush { .. } => T::StringPush,
            Instruction::Throw => T::Throw,
            Instruction::TryCatch { .. } => T::TryCatch,
            Instruction::UnaryAssignOperator { .. } => T::UnaryAssignOperator,
            Instruction::UnaryOperator { .. } => T::UnaryOperator,
            Instruction::Undef { .. } => T::Undef,
            Instruction::VariablePush { .. } => T::VariablePush,
            Instruction::AttributeEval { .. } => T::AttributeEval,
            Instruction::VariableEval { .. } => T::VariableEval,
            Instruction::SourceFile { .. } => T::SourceFile,
            Instruction::FunctionConst { .. } => T::FunctionConst,
            Instruction::MethodConst { .. } => T::MethodConst,
            Instruction::MapConstOld { .. } => T::MapConstOld,
            Instruction::LongConst { .. } => T::LongConst,
            Instruction::Assign => T::Assign,
            Instruction::ListAssign { .. } => T::ListAssign,
            Instruction::CallOld { .. } => T::CallOld,
            Instruction::ObjectSelector => T::ObjectSelector,
            Instruction::SymbolConst { .. } => T::SymbolConst,
            Instruction::Leave { .. } => T::Leave,
            Instruction::ArrayConst { .. } => T::ArrayConst,
            Instruction::ArrayPush => T::ArrayPush,
            Instruction::MapConst => T::MapConst,
            Instruction::MapInsert => T::MapInsert,
            Instruction::Pop => T::Pop,
            Instruction::SetState { .. } => T::SetState,
            Instruction::VoidConst => T::VoidConst,
            Instruction::AssignPop => T::AssignPop,
            Instruction::UIntConst { .. } => T::UIntConst,
            Instruction::ULongConst { .. } => T::ULongConst,
            Instruction::DoubleConst { .. } => T::DoubleConst,
            Instruction::ElementPush => T::ElementPush,
            Instruction::ElementEval => T::ElementEval,
            Instruction::LogicalAnd { .. } => T::LogicalAnd,
            Instruction::LogicalOr { .. } => T::LogicalOr,
            Instruction::BoolConst { .. } => T::BoolConst,
            Instruction::ModuleConstructor => T::ModuleConstructor,
            Instruction::VaCall { .. } => T::VaCall,
            Instruction::DelegateDefine { .. } => T::DelegateDefine,
            Instruction::JumpIfNil { .. } => T::JumpIfNil,
            Instruction::JumpNotNil { .. } => T::JumpNotNil,
            Instruction::ByteConst { .. } => T::ByteConst,
            Instruction::UByteConst { .. } => T::UByteConst,
            Instruction::ShortConst { .. } => T::ShortConst,
            Instruction::UShortConst { .. } => T::UShortConst,
            Instruction::LogicalOptional => T::LogicalOptional,
        }
    }

    /// The nested code frame owned by function and method instructions.
    pub fn frame(&self) -> Option<&CodeFrame> {
        match self {
            Instruction::FunctionDefine { frame, .. } | Instruction::MethodDefine { frame, .. }
                | Instruction::FunctionConst { frame } | Instruction::MethodConst { frame } => Some(frame),
            _ => None,
        }
    }

    /// Mutable access to the jump target of branching instructions, used for back-patching.
    pub fn jump_target_mut(&mut self) -> Option<&mut i32> {
        match self {
            Instruction::Jump { target } | Instruction::JumpIfTrue { target } | Instruction::JumpIfFalse { target }
                | Instruction::JumpIfNil { target } | Instruction::JumpNotNil { target }
                | Instruction::LogicalAnd { target } | Instruction::LogicalOr { target }
                | Instruction::LogicalAndOld { target } | Instruction::LogicalOrOld { target }
                | Instruction::TryCatch { target } => Some(target),
            _ => None,
        }
    }

    /// Fails if this instruction (or one of its version-gated fields) cannot be encoded for `version`.
    /// Nested frames are checked by their owning [`CodeFrame`].
    pub fn check_version(&self, version: AdhocVersion) -> Result<(), SerializationError> {
        let kind = self.kind();
        if matches!(kind, InstructionType::LocalDefine | InstructionType::CodeEval) || version.get() < kind.min_version() {
            return Err(SerializationError::UnsupportedFeature { feature: kind.mnemonic(), version: version.get() });
        }
        match self {
            Instruction::AttributePush { symbols } if version.has_single_attribute_push() && symbols.len() != 1 => {
                Err(SerializationError::UnsupportedFeature { feature: "multi-symbol ATTRIBUTE_PUSH", version: version.get() })
            }
            Instruction::Import { alias: None, .. } if version.has_import_alias() => {
                Err(SerializationError::UnsupportedFeature { feature: "IMPORT without alias", version: version.get() })
            }
            Instruction::Import { alias: Some(_), .. } if !version.has_import_alias() => {
                Err(SerializationError::UnsupportedFeature { feature: "IMPORT alias", version: version.get() })
            }
            Instruction::ListAssign { has_rest: true, .. } if !version.supports_rest_element() => {
                Err(SerializationError::UnsupportedFeature { feature: "rest element", version: version.get() })
            }
            _ => Ok(()),
        }
    }

    /// Operand stack effect as `(popped, pushed)`.
    pub fn stack_effect(&self, version: AdhocVersion) -> (i32, i32) {
        let subroutine_args = |frame: &CodeFrame| match version.has_capture_support() {
            true => (frame.params().len() + frame.captures().len()) as i32,
            false => 0,
        };
        match self {
            Instruction::ArrayConst { .. } | Instruction::MapConst | Instruction::FloatConst { .. } | Instruction::IntConst { .. }
                | Instruction::UIntConst { .. } | Instruction::NilConst | Instruction::StringConst { .. } | Instruction::LongConst { .. }
                | Instruction::ULongConst { .. } | Instruction::BoolConst { .. } | Instruction::DoubleConst { .. }
                | Instruction::VariablePush { .. } | Instruction::VariableEval { .. } | Instruction::SymbolConst { .. }
                | Instruction::VoidConst | Instruction::ByteConst { .. } | Instruction::UByteConst { .. }
                | Instruction::ShortConst { .. } | Instruction::UShortConst { .. } => (0, 1),

            Instruction::FunctionDefine { frame, .. } | Instruction::MethodDefine { frame, .. } => (subroutine_args(frame), 0),
            Instruction::FunctionConst { frame } | Instruction::MethodConst { frame } => (subroutine_args(frame), 1),

            Instruction::Pop | Instruction::PopOld | Instruction::Assign | Instruction::JumpIfFalse { .. }
                | Instruction::JumpIfTrue { .. } | Instruction::JumpIfNil { .. } | Instruction::Require | Instruction::ArrayPush
                | Instruction::ModuleConstructor | Instruction::Throw => (1, 0),
            Instruction::AttributeDefine { .. } => (if version.get() > 6 { 1 } else { 0 }, 0),
            Instruction::AssignPop | Instruction::MapInsert => (2, 0),

            Instruction::AttributePush { .. } | Instruction::LogicalAnd { .. } | Instruction::LogicalOr { .. }
                | Instruction::LogicalAndOld { .. } | Instruction::LogicalOrOld { .. }
                | Instruction::UnaryAssignOperator { .. } | Instruction::UnaryOperator { .. } => (1, 1),
            Instruction::AssignOld | Instruction::BinaryAssignOperator { .. } | Instruction::BinaryOperator { .. }
                | Instruction::ObjectSelector | Instruction::ElementPush | Instruction::ElementEval
                | Instruction::VaCall { .. } => (2, 1),

            Instruction::Call { argc } => (1 + argc, 1),
            Instruction::ListAssignOld { .. } | Instruction::Print { .. } | Instruction::MapConstOld { .. } => (0, 1),
            Instruction::ArrayConstOld { size } => (*size as i32, 1),
            Instruction::StringPush { count } => (*count, 1),
            Instruction::ListAssign { count, .. } => (count + 1, 1),
            Instruction::SetState { state } => match state {
                RunState::Return | RunState::Yield => (1, 0),
                _ => (0, 0),
            },

            Instruction::ClassDefine { .. } | Instruction::Eval | Instruction::Import { .. } | Instruction::Jump { .. }
                | Instruction::ModuleDefine { .. } | Instruction::StaticDefine { .. } | Instruction::Nop
                | Instruction::SetStateOld { .. } | Instruction::TryCatch { .. } | Instruction::Undef { .. }
                | Instruction::AttributeEval { .. } | Instruction::SourceFile { .. } | Instruction::Leave { .. }
                | Instruction::DelegateDefine { .. } | Instruction::CallOld { .. } | Instruction::JumpNotNil { .. }
                | Instruction::LogicalOptional => (0, 0),
        }
    }
}

impl BinaryWrite for Instruction {
    fn write(&self, writer: &mut AdhocWriter) {
        writer.write(&(self.kind() as u8));
        let version = writer.version();
        match self {
            Instruction::AssignOld | Instruction::Eval | Instruction::NilConst | Instruction::Nop | Instruction::PopOld
                | Instruction::Require | Instruction::Throw | Instruction::Assign | Instruction::ObjectSelector
                | Instruction::ArrayPush | Instruction::MapConst | Instruction::MapInsert | Instruction::Pop
                | Instruction::VoidConst | Instruction::AssignPop | Instruction::ElementPush | Instruction::ElementEval
                | Instruction::ModuleConstructor | Instruction::LogicalOptional => (),

            Instruction::ArrayConstOld { size } | Instruction::ArrayConst { size } => writer.write(size),
            Instruction::VaCall { count } => writer.write(count),
            Instruction::UIntConst { value } => writer.write(value),

            Instruction::Call { argc } | Instruction::CallOld { argc } | Instruction::Print { argc } => writer.write(argc),
            Instruction::IntConst { value } | Instruction::MapConstOld { value } => writer.write(value),
            Instruction::StringPush { count } | Instruction::ListAssignOld { count } => writer.write(count),
            Instruction::Jump { target } | Instruction::JumpIfTrue { target } | Instruction::JumpIfFalse { target }
                | Instruction::LogicalAndOld { target } | Instruction::LogicalOrOld { target }
                | Instruction::LogicalAnd { target } | Instruction::LogicalOr { target } | Instruction::TryCatch { target }
                | Instruction::JumpIfNil { target } | Instruction::JumpNotNil { target } => writer.write(target),

            Instruction::AttributeDefine { name } | Instruction::StaticDefine { name } | Instruction::DelegateDefine { name } => writer.write(name),
            Instruction::BinaryAssignOperator { operator } | Instruction::BinaryOperator { operator }
                | Instruction::UnaryAssignOperator { operator } | Instruction::UnaryOperator { operator } => writer.write(operator),
            Instruction::StringConst { value } | Instruction::SymbolConst { value } => writer.write(value),
            Instruction::SourceFile { file } => writer.write(file),

            Instruction::AttributePush { symbols } => match version.has_single_attribute_push() {
                true => if let Some(first) = symbols.first() { writer.write(first) },
                false => writer.write(symbols),
            },
            Instruction::Undef { symbols } | Instruction::AttributeEval { symbols } => writer.write(symbols),
            Instruction::ModuleDefine { names } => writer.write(names),
            Instruction::VariablePush { symbols, index } | Instruction::VariableEval { symbols, index } => {
                writer.write(symbols);
                writer.write(index);
            }
            Instruction::ClassDefine { name, extends } => {
                writer.write(name);
                writer.write(extends);
            }
            Instruction::Import { path, property, alias } => {
                writer.write(path);
                writer.write(property);
                if let (true, Some(alias)) = (version.has_import_alias(), alias) {
                    writer.write(alias);
                }
            }

            Instruction::FunctionDefine { name, frame } | Instruction::MethodDefine { name, frame } => {
                writer.write(name);
                writer.write(frame.as_ref());
            }
            Instruction::FunctionConst { frame } | Instruction::MethodConst { frame } => writer.write(frame.as_ref()),

            Instruction::FloatConst { value } => writer.write(value),
            Instruction::DoubleConst { value } => writer.write(value),
            Instruction::LongConst { value } => writer.write(value),
            Instruction::ULongConst { value } => writer.write(value),
            Instruction::BoolConst { value } => writer.write(value),
            Instruction::ByteConst { value } => writer.write(value),
            Instruction::UByteConst { value } => writer.write(value),
            Instruction::ShortConst { value } => writer.write(value),
            Instruction::UShortConst { value } => writer.write(value),

            Instruction::SetStateOld { state } | Instruction::SetState { state } => writer.write(state),
            Instruction::ListAssign { count, has_rest } => {
                writer.write(count);
                if version.supports_rest_element() {
                    writer.write(has_rest);
                }
            }
            Instruction::Leave { depth, rewind } => {
                writer.write(depth);
                writer.write(rewind);
            }
        }
    }
}

impl BinaryRead for Instruction {
    fn read(reader: &mut AdhocReader) -> Result<Self, SerializationError> {
        let offset = reader.position();
        let tag = reader.read::<u8>()?;
        let kind = InstructionType::from_u8(tag)
            .filter(|kind| !matches!(kind, InstructionType::LocalDefine | InstructionType::CodeEval))
            .ok_or(SerializationError::UnknownInstruction { tag, offset })?;

        // struct expression fields are evaluated in source order, which is the wire order
        macro_rules! read_fields {
            ($root:ident) => { Instruction::$root };
            ($root:ident { $($field:ident),+ }) => { Instruction::$root { $($field: reader.read()?),+ } };
        }

        let version = reader.version();
        Ok(match kind {
            InstructionType::ArrayConstOld => read_fields!(ArrayConstOld { size }),
            InstructionType::AssignOld => read_fields!(AssignOld),
            InstructionType::AttributeDefine => read_fields!(AttributeDefine { name }),
            InstructionType::AttributePush => match version.has_single_attribute_push() {
                true => Instruction::AttributePush { symbols: vec![reader.read()?] },
                false => read_fields!(AttributePush { symbols }),
            },
            InstructionType::BinaryAssignOperator => read_fields!(BinaryAssignOperator { operator }),
            InstructionType::BinaryOperator => read_fields!(BinaryOperator { operator }),
            InstructionType::Call => read_fields!(Call { argc }),
            InstructionType::ClassDefine => read_fields!(ClassDefine { name, extends }),
            InstructionType::Eval => read_fields!(Eval),
            InstructionType::FloatConst => read_fields!(FloatConst { value }),
            InstructionType::FunctionDefine => Instruction::FunctionDefine { name: reader.read()?, frame: Box::new(reader.read()?) },
            InstructionType::Import => Instruction::Import {
                path: reader.read()?,
                property: reader.read()?,
                alias: if version.has_import_alias() { Some(reader.read()?) } else { None },
            },
            InstructionType::IntConst => read_fields!(IntConst { value }),
            InstructionType::Jump => read_fields!(Jump { target }),
            InstructionType::JumpIfTrue => read_fields!(JumpIfTrue { target }),
            InstructionType::JumpIfFalse => read_fields!(JumpIfFalse { target }),
            InstructionType::ListAssignOld => read_fields!(ListAssignOld { count }),
            InstructionType::LogicalAndOld => read_fields!(LogicalAndOld { target }),
            InstructionType::LogicalOrOld => read_fields!(LogicalOrOld { target }),
            InstructionType::MethodDefine => Instruction::MethodDefine { name: reader.read()?, frame: Box::new(reader.read()?) },
            InstructionType::ModuleDefine => read_fields!(ModuleDefine { names }),
            InstructionType::NilConst => read_fields!(NilConst),
            InstructionType::Nop => read_fields!(Nop),
            InstructionType::PopOld => read_fields!(PopOld),
            InstructionType::Print => read_fields!(Print { argc }),
            InstructionType::Require => read_fields!(Require),
            InstructionType::SetStateOld => read_fields!(SetStateOld { state }),
            InstructionType::StaticDefine => read_fields!(StaticDefine { name }),
            InstructionType::StringConst => read_fields!(StringConst { value }),
            InstructionType::StringPush => read_fields!(StringPush { count }),
            InstructionType::Throw => read_fields!(Throw),
            InstructionType::TryCatch => read_fields!(TryCatch { target }),
            InstructionType::UnaryAssignOperator => read_fields!(UnaryAssignOperator { operator }),
            InstructionType::UnaryOperator => read_fields!(UnaryOperator { operator }),
            InstructionType::Undef => read_fields!(Undef { symbols }),
            InstructionType::VariablePush => read_fields!(VariablePush { symbols, index }),
            InstructionType::AttributeEval => read_fields!(AttributeEval { symbols }),
            InstructionType::VariableEval => read_fields!(VariableEval { symbols, index }),
            InstructionType::SourceFile => read_fields!(SourceFile { file }),
            InstructionType::FunctionConst => Instruction::FunctionConst { frame: Box::new(reader.read()?) },
            InstructionType::MethodConst => Instruction::MethodConst { frame: Box::new(reader.read()?) },
            InstructionType::MapConstOld => read_fields!(MapConstOld { value }),
            InstructionType::LongConst => read_fields!(LongConst { value }),
            InstructionType::Assign => read_fields!(Assign),
            InstructionType::ListAssign => Instruction::ListAssign {
                count: reader.read()?,
                has_rest: if version.supports_rest_element() { reader.read()? } else { false },
            },
            InstructionType::CallOld => read_fields!(CallOld { argc }),
            InstructionType::ObjectSelector => read_fields!(ObjectSelector),
            InstructionType::SymbolConst => read_fields!(SymbolConst { value }),
            InstructionType::Leave => read_fields!(Leave { depth, rewind }),
            InstructionType::ArrayConst => read_fields!(ArrayConst { size }),
            InstructionType::ArrayPush => read_fields!(ArrayPush),
            InstructionType::MapConst => read_fields!(MapConst),
            InstructionType::MapInsert => read_fields!(MapInsert),
            InstructionType::Pop => read_fields!(Pop),
            InstructionType::SetState => read_fields!(SetState { state }),
            InstructionType::VoidConst => read_fields!(VoidConst),
            InstructionType::AssignPop => read_fields!(AssignPop),
            InstructionType::UIntConst => read_fields!(UIntConst { value }),
            InstructionType::ULongConst => read_fields!(ULongConst { value }),
            InstructionType::DoubleConst => read_fields!(DoubleConst { value }),
            InstructionType::ElementPush => read_fields!(ElementPush),
            InstructionType::ElementEval => read_fields!(ElementEval),
            InstructionType::LogicalAnd => read_fields!(LogicalAnd { target }),
            InstructionType::LogicalOr => read_fields!(LogicalOr { target }),
            InstructionType::BoolConst => read_fields!(BoolConst { value }),
            InstructionType::ModuleConstructor => read_fields!(ModuleConstructor),
            InstructionType::VaCall => read_fields!(VaCall { count }),
            InstructionType::DelegateDefine => read_fields!(DelegateDefine { name }),
            InstructionType::JumpIfNil => read_fields!(JumpIfNil { target }),
            InstructionType::JumpNotNil => read_fields!(JumpNotNil { target }),
            InstructionType::ByteConst => read_fields!(ByteConst { value }),
            InstructionType::UByteConst => read_fields!(UByteConst { value }),
            InstructionType::ShortConst => read_fields!(ShortConst { value }),
            InstructionType::UShortConst => read_fields!(UShortConst { value }),
            InstructionType::LogicalOptional => read_fields!(LogicalOptional),
            InstructionType::LocalDefine | InstructionType::CodeEval => return Err(SerializationError::UnknownInstruction { tag, offset }),
        })
    }
}

struct Names<'a>(&'a [Symbol]);
impl fmt::Display for Names<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, symbol) in self.0.iter().enumerate() {
            if i != 0 { f.write_str(",")?; }
            f.write_str(symbol.name())?;
        }
        Ok(())
    }
}

/// One-line disassembly. Nested frames only show their signature; see [`CodeFrame::disassemble`] for full listings.
impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind();
        match self {
            Instruction::AssignOld | Instruction::Eval | Instruction::NilConst | Instruction::Nop | Instruction::PopOld
                | Instruction::Require | Instruction::Throw | Instruction::Assign | Instruction::ObjectSelector
                | Instruction::ArrayPush | Instruction::MapConst | Instruction::MapInsert | Instruction::Pop
                | Instruction::VoidConst | Instruction::AssignPop | Instruction::ElementPush | Instruction::ElementEval
                | Instruction::ModuleConstructor | Instruction::LogicalOptional => write!(f, "{kind}"),

            Instruction::ArrayConstOld { size } | Instruction::ArrayConst { size } => write!(f, "{kind}: [{size}]"),
            Instruction::AttributeDefine { name } | Instruction::StaticDefine { name } | Instruction::DelegateDefine { name } => write!(f, "{kind}: {name}"),
            Instruction::StringConst { value } | Instruction::SymbolConst { value } => write!(f, "{kind}: {value}"),
            Instruction::SourceFile { file } => write!(f, "{kind}: {file}"),
            Instruction::AttributePush { symbols } | Instruction::AttributeEval { symbols } | Instruction::Undef { symbols } => write!(f, "{kind}: {}", Names(symbols)),
            Instruction::ModuleDefine { names } => write!(f, "{kind}: {}", Names(names)),
            Instruction::BinaryAssignOperator { operator } | Instruction::BinaryOperator { operator }
                | Instruction::UnaryAssignOperator { operator } | Instruction::UnaryOperator { operator } => {
                write!(f, "{kind}: {} ({operator})", operator_punctuator(operator.name()))
            }
            Instruction::Call { argc } | Instruction::CallOld { argc } | Instruction::Print { argc } => write!(f, "{kind}: ArgCount={argc}"),
            Instruction::ClassDefine { name, extends } => write!(f, "{kind}: {name} extends {}", Names(extends)),
            Instruction::FloatConst { value } => write!(f, "{kind}: Value={value}"),
            Instruction::DoubleConst { value } => write!(f, "{kind}: Value={value}"),
            Instruction::FunctionDefine { name, frame } | Instruction::MethodDefine { name, frame } => write!(f, "{kind} - {name}{}", frame.signature()),
            Instruction::FunctionConst { frame } | Instruction::MethodConst { frame } => write!(f, "{kind} - {}", frame.signature()),
            Instruction::Import { path, property, alias } => {
                let module = path.last().map(Symbol::name).unwrap_or_default();
                write!(f, "{kind}: Path:{module}, Property:{property}")?;
                match alias {
                    Some(alias) => write!(f, ", ImportAs:{alias}"),
                    None => Ok(()),
                }
            }
            Instruction::IntConst { value } => write!(f, "{kind}: {value} (0x{value:02X})"),
            Instruction::LongConst { value } => write!(f, "{kind}: {value} (0x{value:02X})"),
            Instruction::ByteConst { value } => write!(f, "{kind}: {value} (0x{value:02X})"),
            Instruction::UByteConst { value } => write!(f, "{kind}: {value} (0x{value:02X})"),
            Instruction::ShortConst { value } => write!(f, "{kind}: {value} (0x{value:04X})"),
            Instruction::UShortConst { value } => write!(f, "{kind}: {value} (0x{value:04X})"),
            Instruction::UIntConst { value } => write!(f, "{kind}: {value}"),
            Instruction::ULongConst { value } => write!(f, "{kind}: {value}"),
            Instruction::BoolConst { value } => write!(f, "{kind}: {value}"),
            Instruction::Jump { target } => write!(f, "{kind}: JumpTo={target}"),
            Instruction::JumpIfTrue { target } | Instruction::JumpIfFalse { target } => write!(f, "{kind}: Jump To Func Ins {target}"),
            Instruction::JumpIfNil { target } | Instruction::JumpNotNil { target } => write!(f, "{kind}: Jump To {target}"),
            Instruction::LogicalAndOld { target } | Instruction::LogicalOrOld { target }
                | Instruction::LogicalAnd { target } | Instruction::LogicalOr { target } => write!(f, "{kind}: Jump={target}"),
            Instruction::TryCatch { target } => write!(f, "{kind}: {target}"),
            Instruction::ListAssignOld { count } => write!(f, "{kind}: Count={count}"),
            Instruction::ListAssign { count, has_rest } => write!(f, "{kind}: ElemCount={count}, Rest={has_rest}"),
            Instruction::StringPush { count } => write!(f, "{kind}: Count={count}"),
            Instruction::MapConstOld { value } => write!(f, "{kind}: {value}"),
            Instruction::VaCall { count } => write!(f, "{kind}: Count={count}"),
            Instruction::SetStateOld { state } | Instruction::SetState { state } => write!(f, "{kind}: State={state} ({})", *state as u8),
            Instruction::Leave { depth, rewind } => write!(f, "{kind}: Depth:{depth}, RewindLocalsStorageTo:{rewind}"),
            Instruction::VariablePush { symbols, index } => write!(f, "{kind}: {}, PushAt:{index}", Names(symbols)),
            Instruction::VariableEval { symbols, index } => match symbols.len() > 1 {
                true => write!(f, "{kind}: {}, Static:{index}", Names(symbols)),
                false => write!(f, "{kind}: {}, Local:{index}", Names(symbols)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolMap;

    fn version(v: u32) -> AdhocVersion {
        AdhocVersion::new(v).unwrap()
    }

    fn encode(ins: &Instruction, v: u32) -> Vec<u8> {
        let mut writer = AdhocWriter::new(version(v));
        writer.write(ins);
        writer.into_bytes()
    }

    fn decode(bytes: &[u8], v: u32) -> Result<Instruction, SerializationError> {
        let mut reader = AdhocReader::new(bytes, version(v));
        let res = reader.read::<Instruction>()?;
        assert_eq!(reader.remaining(), 0);
        Ok(res)
    }

    // versions 9 to 12 refer to symbols by their index in the global table
    fn round_trip(ins: &Instruction, symbols: &SymbolMap, v: u32) -> Result<Instruction, SerializationError> {
        let mut writer = AdhocWriter::new(version(v));
        writer.write_symbol_table(symbols);
        writer.write(ins);
        let bytes = writer.into_bytes();
        let mut reader = AdhocReader::new(&bytes, version(v));
        reader.read_symbol_table()?;
        let res = reader.read::<Instruction>()?;
        assert_eq!(reader.remaining(), 0);
        Ok(res)
    }

    #[test]
    fn test_tag_values() {
        let tests = [
            (InstructionType::ArrayConstOld, 0),
            (InstructionType::LocalDefine, 17),
            (InstructionType::VariablePush, 36),
            (InstructionType::Leave, 49),
            (InstructionType::AssignPop, 57),
            (InstructionType::VaCall, 67),
            (InstructionType::CodeEval, 68),
            (InstructionType::DelegateDefine, 69),
            (InstructionType::JumpIfNil, 70),
            (InstructionType::JumpNotNil, 71),
            (InstructionType::ByteConst, 72),
            (InstructionType::UShortConst, 75),
            (InstructionType::LogicalOptional, 76),
        ];
        for (kind, tag) in tests {
            assert_eq!(kind as u8, tag);
            assert_eq!(InstructionType::from_u8(tag), Some(kind));
        }
        assert_eq!(InstructionType::from_u8(77), None);
    }

    #[test]
    fn test_fixed_encodings() {
        let mut map = SymbolMap::new();
        let x = map.register("x");
        let tests = [
            (Instruction::IntConst { value: -2 }, 13, vec![12, 0xfe, 0xff, 0xff, 0xff]),
            (Instruction::Jump { target: 7 }, 13, vec![13, 7, 0, 0, 0]),
            (Instruction::Pop, 13, vec![54]),
            (Instruction::SetState { state: RunState::Return }, 12, vec![55, 1]),
            (Instruction::Leave { depth: 0, rewind: 3 }, 11, vec![49, 0, 0, 0, 0, 3, 0, 0, 0]),
            (Instruction::ShortConst { value: 0x1234 }, 13, vec![74, 0x34, 0x12]),
            (Instruction::BoolConst { value: true }, 12, vec![65, 1]),
            (Instruction::ListAssign { count: 2, has_rest: true }, 12, vec![45, 2, 0, 0, 0, 1]),
            (Instruction::ListAssign { count: 2, has_rest: false }, 11, vec![45, 2, 0, 0, 0]),
            (Instruction::VariableEval { symbols: vec![x.clone()], index: 1 }, 13, vec![38, 1, 0, 0, 0, 0, 1, b'x', 1, 0, 0, 0]),
            (Instruction::AttributePush { symbols: vec![x.clone()] }, 5, vec![3, 1, 0, b'x']),
        ];
        for (ins, v, expect) in tests {
            let bytes = encode(&ins, v);
            assert_eq!(bytes, expect, "{ins}");
            assert_eq!(decode(&bytes, v).unwrap(), ins);
        }
    }

    #[test]
    fn test_import_alias_by_version() {
        let mut map = SymbolMap::new();
        let (m, p, nil) = (map.register("m"), map.register("p"), map.register("nil"));

        let ins = Instruction::Import { path: vec![m.clone()], property: p.clone(), alias: Some(nil) };
        assert_eq!(ins.to_string(), "IMPORT: Path:m, Property:p, ImportAs:nil");
        assert!(ins.check_version(version(10)).is_ok());
        assert!(ins.check_version(version(9)).is_err());
        assert_eq!(round_trip(&ins, &map, 12).unwrap(), ins);
        assert_eq!(decode(&encode(&ins, 13), 13).unwrap(), ins);
        assert!(matches!(decode(&encode(&ins, 12), 12), Err(SerializationError::BadSymbol { index: 0 })));

        let ins = Instruction::Import { path: vec![m], property: p, alias: None };
        assert!(ins.check_version(version(9)).is_ok());
        assert!(ins.check_version(version(10)).is_err());
        assert_eq!(round_trip(&ins, &map, 9).unwrap(), ins);
        assert_eq!(decode(&encode(&ins, 8), 8).unwrap(), ins);
    }

    #[test]
    fn test_unknown_tags() {
        for tag in [17u8, 68, 77, 200] {
            match decode(&[tag, 0, 0, 0, 0], 13) {
                Err(SerializationError::UnknownInstruction { tag: t, offset: 0 }) => assert_eq!(t, tag),
                x => panic!("{x:?}"),
            }
        }
        assert!(matches!(decode(&[55, 9], 12), Err(SerializationError::BadRunState { value: 9, .. })));
        assert!(matches!(decode(&[12, 1, 2], 12), Err(SerializationError::UnexpectedEof { .. })));
    }

    #[test]
    fn test_version_gates() {
        assert!(Instruction::AssignPop.check_version(version(10)).is_err());
        assert!(Instruction::AssignPop.check_version(version(11)).is_ok());
        assert!(Instruction::ByteConst { value: 1 }.check_version(version(12)).is_err());
        assert!(Instruction::ByteConst { value: 1 }.check_version(version(13)).is_ok());
        assert!(Instruction::Pop.check_version(version(9)).is_err());
        assert!(Instruction::PopOld.check_version(version(1)).is_ok());
        assert!(Instruction::ListAssign { count: 1, has_rest: true }.check_version(version(11)).is_err());
        assert!(Instruction::AttributePush { symbols: vec![] }.check_version(version(5)).is_err());
    }

    #[test]
    fn test_disassembly() {
        let mut map = SymbolMap::new();
        let (add, a, b, s) = (map.register("+"), map.register("a"), map.register("b"), map.register("s"));
        let tests = [
            (Instruction::BinaryOperator { operator: add }, "BINARY_OPERATOR: + (__add__)"),
            (Instruction::IntConst { value: 255 }, "INT_CONST: 255 (0xFF)"),
            (Instruction::SetState { state: RunState::Yield }, "SET_STATE: State=YIELD (2)"),
            (Instruction::Leave { depth: 1, rewind: 2 }, "LEAVE: Depth:1, RewindLocalsStorageTo:2"),
            (Instruction::ClassDefine { name: a.clone(), extends: vec![b.clone(), s.clone()] }, "CLASS_DEFINE: a extends b,s"),
            (Instruction::VariableEval { symbols: vec![a.clone()], index: 1 }, "VARIABLE_EVAL: a, Local:1"),
            (Instruction::VariableEval { symbols: vec![s.clone(), s.clone()], index: 0 }, "VARIABLE_EVAL: s,s, Static:0"),
            (Instruction::VariablePush { symbols: vec![b], index: 2 }, "VARIABLE_PUSH: b, PushAt:2"),
            (Instruction::JumpIfFalse { target: 9 }, "JUMP_IF_FALSE: Jump To Func Ins 9"),
            (Instruction::Call { argc: 3 }, "CALL: ArgCount=3"),
            (Instruction::AssignPop, "ASSIGN_POP"),
        ];
        for (ins, expect) in tests {
            assert_eq!(ins.to_string(), expect);
        }
    }

    #[test]
    fn test_stack_effects() {
        let v12 = version(12);
        assert_eq!(Instruction::IntConst { value: 1 }.stack_effect(v12), (0, 1));
        assert_eq!(Instruction::AssignPop.stack_effect(v12), (2, 0));
        assert_eq!(Instruction::Call { argc: 2 }.stack_effect(v12), (3, 1));
        assert_eq!(Instruction::ListAssign { count: 3, has_rest: false }.stack_effect(v12), (4, 1));
        assert_eq!(Instruction::SetState { state: RunState::Return }.stack_effect(v12), (1, 0));
        assert_eq!(Instruction::SetState { state: RunState::Exit }.stack_effect(v12), (0, 0));
        assert_eq!(Instruction::AttributeDefine { name: SymbolMap::new().register("a") }.stack_effect(version(6)), (0, 0));
    }
}
