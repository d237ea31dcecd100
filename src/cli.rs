use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{debug, info};

use crate::analyzer::Analyzer;
use crate::ast::{self, Diagnostic, Script};
use crate::codegen::CodeReader;
use crate::compiler::{self, CompileOptions};
use crate::preprocessor::Preprocessor;
use crate::util::{now, HexDump};
use crate::version::AdhocVersion;

macro_rules! crash {
    ($ret:literal : $($tt:tt)*) => {{
        eprint!($($tt)*);
        eprint!("\n");
        std::process::exit($ret);
    }}
}

/// Reads syntax trees serialized as JSON, the interchange format of external Adhoc front ends.
pub struct JsonParser;
impl ast::Parser for JsonParser {
    fn parse(&mut self, text: &str) -> (Option<Script>, Vec<Diagnostic>) {
        match serde_json::from_str(text) {
            Ok(script) => (Some(script), vec![]),
            Err(e) => {
                let offset = offset_of(text, e.line(), e.column());
                (None, vec![Diagnostic { start: offset, end: offset, message: e.to_string() }])
            }
        }
    }
}

// serde_json reports 1-based lines and columns
fn offset_of(text: &str, line: usize, column: usize) -> usize {
    let line_start: usize = text.split_inclusive('\n').take(line.saturating_sub(1)).map(str::len).sum();
    (line_start + column.saturating_sub(1)).min(text.len())
}

/// Adhoc toolchain actions that can be performed
#[derive(Parser, Debug)]
pub enum Mode {
    /// Preprocesses and compiles a script into an .adc binary
    Build {
        /// Path to the script, a syntax tree in JSON form (macros are expanded first)
        src: String,
        /// Output path (default: the source path with an .adc extension)
        #[clap(long, short)]
        output: Option<String>,
        /// Adhoc format version to target (1-15)
        #[clap(long, default_value_t = 12)]
        version: u32,
        /// Directory includes are resolved against (default: the source directory)
        #[clap(long)]
        include_dir: Option<String>,
    },
    /// Runs only the preprocessor and prints the result
    Preprocess {
        /// Path to the source file
        src: String,
        /// Write the output here instead of stdout
        #[clap(long, short)]
        output: Option<String>,
        /// Directory includes are resolved against (default: the source directory)
        #[clap(long)]
        include_dir: Option<String>,
    },
    /// Dumps the disassembly of an .adc binary to stdout
    Disasm {
        /// Path to the binary
        src: String,
        /// Also print a hex dump of the (decrypted) file
        #[clap(long)]
        hex: bool,
    },
    /// Prints the names in scope at a position of a script as JSON
    Scopes {
        /// Path to the script, a syntax tree in JSON form
        src: String,
        /// Byte offset to inspect
        position: usize,
    },
}

fn read_text(src: &str) -> String {
    fs::read_to_string(src).unwrap_or_else(|e| crash!(1: "failed to read file '{src}': {e}"))
}

fn include_dir(src: &str, include_dir: Option<String>) -> PathBuf {
    include_dir.map(PathBuf::from).unwrap_or_else(|| compiler::include_dir_of(Path::new(src)))
}

fn file_name(src: &str) -> String {
    Path::new(src).file_name().map(|x| x.to_string_lossy().into_owned()).unwrap_or_else(|| src.to_owned())
}

fn write_output(path: &str, content: &[u8]) {
    if let Err(e) = fs::write(path, content) {
        crash!(4: "failed to write '{path}': {e}");
    }
}

pub fn run(mode: Mode) {
    match mode {
        Mode::Build { src, output, version, include_dir: dir } => {
            let content = read_text(&src);
            let version = AdhocVersion::new(version).unwrap_or_else(|e| crash!(2: "{e}"));
            let options = CompileOptions::new(version)
                .with_base_include_dir(include_dir(&src, dir))
                .with_source_file(file_name(&src));

            let bytes = compiler::build(&content, &options, &mut JsonParser).unwrap_or_else(|e| crash!(3: "{src}: {e}"));
            let output = output.unwrap_or_else(|| Path::new(&src).with_extension("adc").to_string_lossy().into_owned());
            write_output(&output, &bytes);
            info!(output = %output, size = bytes.len(), "build finished");
        }
        Mode::Preprocess { src, output, include_dir: dir } => {
            let content = read_text(&src);
            let timestamp = fs::metadata(&src).and_then(|x| x.modified()).map(Into::into).unwrap_or_else(|_| now());
            let res = Preprocessor::new().preprocess(&content, &include_dir(&src, dir), &file_name(&src), timestamp)
                .unwrap_or_else(|e| crash!(3: "{e}"));
            match output {
                Some(output) => write_output(&output, res.as_bytes()),
                None => print!("{res}"),
            }
        }
        Mode::Disasm { src, hex } => {
            let bytes = fs::read(&src).unwrap_or_else(|e| crash!(1: "failed to read file '{src}': {e}"));
            let script = CodeReader::read(&bytes).unwrap_or_else(|e| crash!(3: "{src}: {e}"));
            debug!(version = %script.version, "disassembling");
            print!("{}", script.disassemble());
            if hex {
                let plain = CodeReader::decrypt(&bytes).unwrap_or_else(|e| crash!(3: "{src}: {e}"));
                print!("\n{}", HexDump(&plain));
            }
        }
        Mode::Scopes { src, position } => {
            let content = read_text(&src);
            let (script, diagnostics) = ast::Parser::parse(&mut JsonParser, &content);
            let mut analyzer = Analyzer::new();
            if let Some(script) = &script {
                analyzer.analyze(script, diagnostics);
            } else if let Some(first) = diagnostics.first() {
                crash!(3: "{src}: {first}");
            }
            let snapshot = analyzer.get_scopes_at(position);
            match serde_json::to_string_pretty(&snapshot) {
                Ok(json) => println!("{json}"),
                Err(e) => crash!(4: "failed to serialize scopes: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ast::Parser as _;

    #[test]
    fn test_json_parser() {
        let text = r#"{ "body": [ { "kind": { "Expression": { "kind": { "Int": 5 } } } } ] }"#;
        let (script, diagnostics) = JsonParser.parse(text);
        assert!(diagnostics.is_empty());
        assert_eq!(script.unwrap().body.len(), 1);

        let (script, diagnostics) = JsonParser.parse("{\n  \"body\": [,]\n}");
        assert!(script.is_none());
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("line 2"));
    }

    #[test]
    fn test_offset_of() {
        assert_eq!(offset_of("ab\ncd", 2, 2), 4);
        assert_eq!(offset_of("ab", 9, 9), 2);
    }
}
