//! Error types shared by every stage of the toolchain.

use thiserror::Error;

use crate::ast::Diagnostic;

/// A malformed directive, bad macro invocation or failed `#if` evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{file}:{line}: {message}")]
pub struct PreprocessorError {
    pub file: String,
    pub line: u32,
    pub message: String,
}

/// The external parser reported diagnostics for the unit.
#[derive(Debug, Clone, Error)]
#[error("{}", format_diagnostics(.diagnostics))]
pub struct ParseError {
    pub diagnostics: Vec<Diagnostic>,
}

fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    match diagnostics.first() {
        Some(first) if diagnostics.len() > 1 => format!("{} (and {} more)", first, diagnostics.len() - 1),
        Some(first) => first.to_string(),
        None => "parse failed".into(),
    }
}

/// A construct that could not be lowered into bytecode for the target version.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}{message}", line_prefix(.line))]
pub struct CompilationError {
    pub message: String,
    pub line: Option<u32>,
}
impl CompilationError {
    pub fn new(message: impl Into<String>, line: Option<u32>) -> Self {
        Self { message: message.into(), line }
    }
}

fn line_prefix(line: &Option<u32>) -> String {
    line.map(|line| format!("line {line}: ")).unwrap_or_default()
}

/// Failures while writing or reading the binary script format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializationError {
    #[error("unsupported adhoc version {version}")]
    UnsupportedVersion { version: u32 },
    #[error("{feature} is not supported by adhoc version {version}")]
    UnsupportedFeature { feature: &'static str, version: u8 },
    #[error("unknown instruction tag {tag} at offset {offset:#x}")]
    UnknownInstruction { tag: u8, offset: usize },
    #[error("unexpected end of input at offset {offset:#x}")]
    UnexpectedEof { offset: usize },
    #[error("not an adhoc script (bad magic)")]
    BadMagic,
    #[error("{region} digest mismatch")]
    DigestMismatch { region: &'static str },
    #[error("invalid run state {value} at offset {offset:#x}")]
    BadRunState { value: u8, offset: usize },
    #[error("invalid symbol reference {index}")]
    BadSymbol { index: usize },
    #[error("string at offset {offset:#x} is not valid utf-8")]
    InvalidUtf8 { offset: usize },
    #[error("symbol of {len} bytes is too long for adhoc version {version}")]
    SymbolTooLong { len: usize, version: u8 },
    #[error("character {ch:?} does not fit in a byte")]
    InvalidByteChar { ch: char },
}

/// Any error produced by the toolchain.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Preprocessor(#[from] PreprocessorError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Compilation(#[from] CompilationError),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
