//! Syntax tree consumed by the compiler and the analyzer.
//!
//! The crate does not ship a source parser. Front ends implement [`Parser`] and hand back a [`Script`];
//! every node carries the [`Range`] it was parsed from.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Byte offsets into the preprocessed text plus the 1-based line of `start`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Range {
    pub start: usize,
    pub end: usize,
    pub line: u32,
}
impl Range {
    pub fn new(start: usize, end: usize, line: u32) -> Self {
        Self { start, end, line }
    }
    pub fn contains(&self, pos: usize) -> bool {
        self.start <= pos && pos <= self.end
    }
}

/// A parse error or warning.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Diagnostic {
    pub start: usize,
    pub end: usize,
    pub message: String,
}
impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}: {}", self.start, self.end, self.message)
    }
}

/// A front end turning (preprocessed) source text into a syntax tree.
pub trait Parser {
    /// Returns the tree if parsing succeeded, along with any diagnostics produced on the way.
    fn parse(&mut self, text: &str) -> (Option<Script>, Vec<Diagnostic>);
}

#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Script {
    pub body: Vec<Statement>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Identifier {
    pub name: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub range: Range,
}
impl Identifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), range: Range::default() }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Statement {
    pub kind: StatementKind,
    #[cfg_attr(feature = "serde", serde(default))]
    pub range: Range,
}
impl Statement {
    pub fn new(kind: StatementKind, range: Range) -> Self {
        Self { kind, range }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StatementKind {
    Expression(Expression),
    /// `var a = 1, [b, c] = d;`
    Variable(Vec<VariableDeclarator>),
    Static { name: Identifier, value: Option<Expression> },
    Attribute { name: Identifier, value: Option<Expression> },
    Block(Vec<Statement>),
    If { test: Expression, consequent: Box<Statement>, alternate: Option<Box<Statement>> },
    While { test: Expression, body: Box<Statement> },
    DoWhile { body: Box<Statement>, test: Expression },
    For { init: Option<Box<Statement>>, test: Option<Expression>, update: Vec<Expression>, body: Box<Statement> },
    /// `foreach (var x in xs) ...`
    Foreach { target: Pattern, iterable: Expression, body: Box<Statement> },
    Switch { discriminant: Expression, cases: Vec<SwitchCase> },
    Break,
    Continue,
    Return(Option<Expression>),
    /// `function name(...) { ... }`
    Function(Subroutine),
    /// `method name(...) { ... }`
    Method(Subroutine),
    /// `module a::b { ... }`
    Module { path: Vec<Identifier>, body: Vec<Statement> },
    Class { name: Identifier, extends: Option<Vec<Identifier>>, body: Vec<Statement> },
    /// `import a::b::c as d;` where `c` may be `*`.
    Import { path: Vec<Identifier>, target: Identifier, alias: Option<Identifier> },
    Throw(Expression),
    Try { block: Vec<Statement>, param: Option<Identifier>, handler: Option<Vec<Statement>> },
    Undef(Vec<Identifier>),
    Print(Vec<Expression>),
    Require(Expression),
    /// Runs `body` in the context of the module object `target` evaluates to.
    ModuleConstructor { target: Expression, body: Vec<Statement> },
    /// Switches the recorded source file (emitted by the preprocessor's line markers).
    SourceFile(String),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VariableDeclarator {
    pub target: Pattern,
    pub init: Option<Expression>,
}

/// One `case test:` or, without a test, the `default:` arm.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SwitchCase {
    pub test: Option<Expression>,
    pub body: Vec<Statement>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Pattern {
    Identifier(Identifier),
    /// `[a, b, ...rest]`
    List { elements: Vec<Identifier>, rest: bool },
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Parameter {
    pub name: Identifier,
    pub default: Option<Expression>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub rest: bool,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SubroutineBody {
    Block(Vec<Statement>),
    /// Arrow-style body returning a single expression.
    Expression(Box<Expression>),
}

/// A function or method, named or anonymous.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Subroutine {
    pub name: Option<Identifier>,
    pub params: Vec<Parameter>,
    pub body: SubroutineBody,
    #[cfg_attr(feature = "serde", serde(default))]
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Expression {
    pub kind: ExpressionKind,
    #[cfg_attr(feature = "serde", serde(default))]
    pub range: Range,
}
impl Expression {
    pub fn new(kind: ExpressionKind, range: Range) -> Self {
        Self { kind, range }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TemplatePart {
    Text(String),
    Expression(Expression),
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExpressionKind {
    Nil,
    Bool(bool),
    Int(i32),
    UInt(u32),
    Long(i64),
    ULong(u64),
    Float(f32),
    Double(f64),
    String(String),
    Template(Vec<TemplatePart>),
    /// `'name` symbol literal.
    Symbol(String),
    Identifier(String),
    /// `a::b::c`
    StaticPath(Vec<Identifier>),
    /// `__LINE__` as seen by the parser.
    Line,
    /// `__FILE__` as seen by the parser.
    File,
    Binary { op: BinaryOperator, left: Box<Expression>, right: Box<Expression> },
    Logical { op: LogicalOperator, left: Box<Expression>, right: Box<Expression> },
    Unary { op: UnaryOperator, argument: Box<Expression> },
    Update { op: UpdateOperator, prefix: bool, argument: Box<Expression> },
    Assign { op: AssignOperator, target: Box<Expression>, value: Box<Expression> },
    Call { callee: Box<Expression>, arguments: Vec<Expression> },
    /// `a.b`
    Member { object: Box<Expression>, property: Identifier },
    /// `a[b]`
    Element { object: Box<Expression>, index: Box<Expression> },
    /// `a->b`
    ObjectSelector { object: Box<Expression>, property: Box<Expression> },
    Conditional { test: Box<Expression>, consequent: Box<Expression>, alternate: Box<Expression> },
    Array(Vec<Expression>),
    Map(Vec<(Expression, Expression)>),
    Function(Box<Subroutine>),
    Method(Box<Subroutine>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BinaryOperator {
    Add, Sub, Mul, Div, Mod, Pow,
    Shl, Shr, BitAnd, BitOr, BitXor,
    Eq, Ne, Lt, Le, Gt, Ge,
}
impl BinaryOperator {
    pub fn punctuator(self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Mod => "%",
            BinaryOperator::Pow => "**",
            BinaryOperator::Shl => "<<",
            BinaryOperator::Shr => ">>",
            BinaryOperator::BitAnd => "&",
            BinaryOperator::BitOr => "|",
            BinaryOperator::BitXor => "^",
            BinaryOperator::Eq => "==",
            BinaryOperator::Ne => "!=",
            BinaryOperator::Lt => "<",
            BinaryOperator::Le => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LogicalOperator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum UnaryOperator {
    Not,
    Minus,
    Plus,
    Invert,
}
impl UnaryOperator {
    /// Operator symbol as stored in the binary (`-@` and `+@` distinguish the unary forms).
    pub fn punctuator(self) -> &'static str {
        match self {
            UnaryOperator::Not => "!",
            UnaryOperator::Minus => "-@",
            UnaryOperator::Plus => "+@",
            UnaryOperator::Invert => "~",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum UpdateOperator {
    Increment,
    Decrement,
}
impl UpdateOperator {
    pub fn punctuator(self, prefix: bool) -> &'static str {
        match (self, prefix) {
            (UpdateOperator::Increment, true) => "++@",
            (UpdateOperator::Increment, false) => "@++",
            (UpdateOperator::Decrement, true) => "--@",
            (UpdateOperator::Decrement, false) => "@--",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AssignOperator {
    Assign,
    Compound(BinaryOperator),
}

// small constructors for building trees by hand
impl Expression {
    pub fn ident(name: &str) -> Self {
        Self::new(ExpressionKind::Identifier(name.into()), Range::default())
    }
    pub fn int(value: i32) -> Self {
        Self::new(ExpressionKind::Int(value), Range::default())
    }
    pub fn at_line(mut self, line: u32) -> Self {
        self.range.line = line;
        self
    }
}
impl StatementKind {
    pub fn at_line(self, line: u32) -> Statement {
        Statement::new(self, Range { line, ..Range::default() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_punctuators() {
        assert_eq!(BinaryOperator::Pow.punctuator(), "**");
        assert_eq!(UnaryOperator::Minus.punctuator(), "-@");
        assert_eq!(UpdateOperator::Decrement.punctuator(false), "@--");
        assert_eq!(UpdateOperator::Increment.punctuator(true), "++@");
    }

    #[test]
    fn test_range() {
        let r = Range::new(4, 9, 2);
        assert!(r.contains(4) && r.contains(9));
        assert!(!r.contains(10));
        assert_eq!(Diagnostic { start: 1, end: 3, message: "unexpected token".into() }.to_string(), "1..3: unexpected token");
    }
}
