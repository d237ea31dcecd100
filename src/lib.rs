#![forbid(unsafe_code)]

pub mod analyzer;
pub mod ast;
pub mod codegen;
pub mod compiler;
pub mod error;
pub mod frame;
pub mod instruction;
pub mod preprocessor;
pub mod scrambler;
pub mod stack;
pub mod stream;
pub mod symbol;
pub mod util;
pub mod version;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(test)]
mod test;

pub use codegen::{CodeGen, CodeReader};
pub use compiler::{build, CompileOptions, Compiler};
pub use error::{Error, Result};
pub use frame::CodeFrame;
pub use preprocessor::Preprocessor;
pub use symbol::SymbolMap;
pub use version::AdhocVersion;
