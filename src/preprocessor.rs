//! C-style macro preprocessor run over Adhoc sources before they reach the parser.
//!
//! Directives are recognised only when `#` is the first non-trivia token of a line. Everything
//! else is copied through token by token, with identifiers replaced by their macro expansion.
//! Lines consumed by directives or skipped by a conditional keep their line breaks, so line
//! numbers in the output match the input.

mod builtins;
mod expr;
mod lexer;

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use time::OffsetDateTime;
use tracing::{debug, trace, warn};

use crate::error::PreprocessorError;
use crate::util::{c_date, c_time, c_timestamp, quote};

pub use builtins::COMPILER_PROVIDED_CONSTANTS;
pub use expr::{evaluate, parse_integer};
pub use lexer::{lex, Spanned, TokenKind};

/// Maximum nesting of `#include` directives.
pub const MAX_INCLUDE_DEPTH: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: u32,
}
impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: u32) -> Self {
        Self { kind, text: text.into(), line }
    }
    pub fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punctuator && self.text == punct
    }
    fn is_blank(&self) -> bool {
        self.kind.is_trivia() || self.kind == TokenKind::Newline
    }
}

/// Lexes `source` into owned tokens, numbering lines from `first_line`.
pub fn tokenize(source: &str, first_line: u32) -> Vec<Token> {
    let mut line = first_line;
    lex(source).into_iter().map(|spanned| {
        let text = &source[spanned.span];
        let token = Token::new(spanned.token, text, line);
        line += text.matches('\n').count() as u32;
        token
    }).collect()
}

fn trim_blank(tokens: &[Token]) -> &[Token] {
    let start = tokens.iter().position(|t| !t.is_blank()).unwrap_or(tokens.len());
    let end = tokens.iter().rposition(|t| !t.is_blank()).map_or(start, |x| x + 1);
    &tokens[start..end]
}

/// Drops trivia, inserting a single space wherever two tokens were not adjacent.
fn compact(tokens: &[Token]) -> Vec<Token> {
    let mut res: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut gap = false;
    for token in trim_blank(tokens) {
        if token.is_blank() {
            gap = true;
            continue;
        }
        if gap {
            res.push(Token::new(TokenKind::Whitespace, " ", token.line));
            gap = false;
        }
        res.push(token.clone());
    }
    res
}

fn line_breaks(tokens: &[Token]) -> usize {
    tokens.iter().map(|t| t.text.matches('\n').count()).sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroKind {
    /// Defined by `#define`.
    User,
    /// One of [`COMPILER_PROVIDED_CONSTANTS`].
    Constant,
    Line,
    File,
    Date,
    Time,
    Timestamp,
    Counter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MacroDefinition {
    pub name: String,
    /// Parameter names of a function macro, `None` for object macros.
    pub params: Option<Vec<String>>,
    pub body: Vec<Token>,
    pub kind: MacroKind,
}
impl MacroDefinition {
    pub fn object(name: impl Into<String>, body: Vec<Token>) -> Self {
        Self { name: name.into(), params: None, body, kind: MacroKind::User }
    }
    pub fn is_builtin(&self) -> bool {
        self.kind != MacroKind::User
    }
    pub fn is_function(&self) -> bool {
        self.params.is_some()
    }
}

struct SourceFile<'a> {
    name: &'a str,
    dir: &'a Path,
    base_dir: &'a Path,
    timestamp: OffsetDateTime,
}
impl SourceFile<'_> {
    fn error(&self, line: u32, message: impl Into<String>) -> PreprocessorError {
        PreprocessorError { file: self.name.into(), line, message: message.into() }
    }
}

struct Conditional {
    line: u32,
    parent_active: bool,
    taken: bool,
    active: bool,
    seen_else: bool,
}

/// Macro table and state shared by a unit and everything it includes.
pub struct Preprocessor {
    macros: IndexMap<String, MacroDefinition>,
    build_time: OffsetDateTime,
    counter: u32,
    depth: usize,
}
impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}
impl Preprocessor {
    pub fn new() -> Self {
        Self::with_build_time(crate::util::now())
    }
    /// Uses `build_time` for `__DATE__` and `__TIME__` instead of the current time.
    pub fn with_build_time(build_time: OffsetDateTime) -> Self {
        let mut macros = IndexMap::new();
        for (name, value) in COMPILER_PROVIDED_CONSTANTS {
            let body = tokenize(value, 0);
            macros.insert(name.to_string(), MacroDefinition { name: name.to_string(), params: None, body, kind: MacroKind::Constant });
        }
        for (name, kind) in [
            ("__LINE__", MacroKind::Line),
            ("__FILE__", MacroKind::File),
            ("__DATE__", MacroKind::Date),
            ("__TIME__", MacroKind::Time),
            ("__TIMESTAMP__", MacroKind::Timestamp),
            ("__COUNTER__", MacroKind::Counter),
        ] {
            macros.insert(name.to_owned(), MacroDefinition { name: name.to_owned(), params: None, body: vec![], kind });
        }
        Self { macros, build_time, counter: 0, depth: 0 }
    }

    pub fn macros(&self) -> impl Iterator<Item = &MacroDefinition> {
        self.macros.values()
    }
    pub fn get(&self, name: &str) -> Option<&MacroDefinition> {
        self.macros.get(name)
    }
    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }
    /// Defines an object macro as if by `#define name value`.
    pub fn define(&mut self, name: &str, value: &str) {
        self.insert(MacroDefinition::object(name, compact(&tokenize(value, 0))), "<command line>", 0);
    }

    /// Preprocesses one unit. Includes are resolved against `base_include_dir`, then the
    /// directory of `current_file_name`.
    pub fn preprocess(&mut self, source: &str, base_include_dir: &Path, current_file_name: &str, current_file_timestamp: OffsetDateTime) -> Result<String, PreprocessorError> {
        trace!(file = current_file_name, "preprocessing");
        let file = SourceFile {
            name: current_file_name,
            dir: Path::new(current_file_name).parent().unwrap_or(Path::new("")),
            base_dir: base_include_dir,
            timestamp: current_file_timestamp,
        };
        let mut out = String::with_capacity(source.len());
        self.process(source, &file, &mut out)?;
        Ok(out)
    }

    fn process(&mut self, source: &str, file: &SourceFile, out: &mut String) -> Result<(), PreprocessorError> {
        let tokens = tokenize(source, 1);
        let mut conditionals: Vec<Conditional> = Vec::new();

        for line in tokens.split_inclusive(|t| t.kind == TokenKind::Newline) {
            let active = conditionals.last().map_or(true, |c| c.active);
            match line.iter().position(|t| !t.kind.is_trivia()) {
                Some(hash) if line[hash].is_punct("#") => {
                    let next_line = line[0].line + line_breaks(line) as u32;
                    if !self.directive(&line[hash + 1..], line[hash].line, next_line, active, &mut conditionals, file, out)? {
                        out.extend(std::iter::repeat('\n').take(line_breaks(line)));
                    }
                }
                _ if active => {
                    for token in self.expand(line, &mut Vec::new(), None, file)? {
                        out.push_str(&token.text);
                    }
                }
                _ => out.extend(std::iter::repeat('\n').take(line_breaks(line))),
            }
        }

        match conditionals.last() {
            Some(open) => Err(file.error(open.line, "unterminated #ifdef/#if")),
            None => Ok(()),
        }
    }

    /// Handles the tokens after `#`. Returns true if the directive wrote its own line break.
    #[allow(clippy::too_many_arguments)]
    fn directive(&mut self, tokens: &[Token], line: u32, next_line: u32, active: bool, conditionals: &mut Vec<Conditional>, file: &SourceFile, out: &mut String) -> Result<bool, PreprocessorError> {
        let tokens = trim_blank(tokens);
        let Some((name, args)) = tokens.split_first().filter(|(name, _)| name.kind == TokenKind::Identifier) else {
            if !active {
                return Ok(false);
            }
            return Err(match tokens.first() {
                Some(token) => file.error(line, format!("invalid preprocessor directive #{}", token.text)),
                None => file.error(line, "expected a directive name after '#'"),
            });
        };
        let args = trim_blank(args);

        match name.text.as_str() {
            "ifdef" | "ifndef" => {
                let taken = active && (self.is_defined(expect_name(args, name, line, file)?) == (name.text == "ifdef"));
                conditionals.push(Conditional { line, parent_active: active, taken: taken || !active, active: taken, seen_else: false });
            }
            "if" => {
                let taken = active && self.condition(args, line, file)? != 0;
                conditionals.push(Conditional { line, parent_active: active, taken: taken || !active, active: taken, seen_else: false });
            }
            "elif" => {
                let group = conditionals.last_mut().ok_or_else(|| file.error(line, "#elif without #if"))?;
                if group.seen_else {
                    return Err(file.error(line, "#elif after #else"));
                }
                group.active = group.parent_active && !group.taken && self.condition(args, line, file)? != 0;
                group.taken |= group.active;
            }
            "else" => {
                let group = conditionals.last_mut().ok_or_else(|| file.error(line, "#else without #if"))?;
                if group.seen_else {
                    return Err(file.error(line, "#else after #else"));
                }
                group.active = group.parent_active && !group.taken;
                group.taken = true;
                group.seen_else = true;
            }
            "endif" => {
                conditionals.pop().ok_or_else(|| file.error(line, "#endif without #if"))?;
            }
            _ if !active => (),
            "define" => {
                let definition = parse_define(args, line, file)?;
                self.insert(definition, file.name, line);
            }
            "undef" => {
                let target = expect_name(args, name, line, file)?;
                match self.macros.get(target) {
                    None => warn!(file = file.name, line, "#undef of undefined macro '{target}'"),
                    Some(definition) if definition.is_builtin() => warn!(file = file.name, line, "cannot undefine builtin macro '{target}'"),
                    Some(_) => {
                        self.macros.shift_remove(target);
                    }
                }
            }
            "include" => {
                self.include(args, line, next_line, file, out)?;
                return Ok(true);
            }
            "error" => {
                let message = match args {
                    [single] if single.kind == TokenKind::String => single.text[1..single.text.len() - 1].to_owned(),
                    _ => args.iter().map(|t| t.text.as_str()).collect(),
                };
                return Err(file.error(line, message));
            }
            other => return Err(file.error(line, format!("invalid preprocessor directive #{other}"))),
        }
        Ok(false)
    }

    fn insert(&mut self, definition: MacroDefinition, file: &str, line: u32) {
        if let Some(old) = self.macros.get(&definition.name) {
            if old.is_builtin() {
                warn!(file, line, "redefinition of builtin macro '{}'", definition.name);
            } else {
                warn!(file, line, "redefinition of macro '{}'", definition.name);
            }
        }
        self.macros.insert(definition.name.clone(), definition);
    }

    fn condition(&mut self, args: &[Token], line: u32, file: &SourceFile) -> Result<i32, PreprocessorError> {
        let mut resolved = Vec::with_capacity(args.len());
        let mut iter = args.iter().filter(|t| !t.is_blank());
        while let Some(token) = iter.next() {
            if token.kind != TokenKind::Identifier || token.text != "defined" {
                resolved.push(token.clone());
                continue;
            }
            let mut target = iter.next();
            let parenthesized = target.is_some_and(|t| t.is_punct("("));
            if parenthesized {
                target = iter.next();
            }
            let target = target.filter(|t| t.kind == TokenKind::Identifier).ok_or_else(|| file.error(line, "operator 'defined' requires an identifier"))?;
            if parenthesized && !iter.next().is_some_and(|t| t.is_punct(")")) {
                return Err(file.error(line, "missing ')' after 'defined'"));
            }
            let value = if self.is_defined(&target.text) { "1" } else { "0" };
            resolved.push(Token::new(TokenKind::Number, value, line));
        }

        let expanded = self.expand(&resolved, &mut Vec::new(), Some(line), file)?;
        evaluate(&expanded, file.name, line)
    }

    fn include(&mut self, args: &[Token], line: u32, next_line: u32, file: &SourceFile, out: &mut String) -> Result<(), PreprocessorError> {
        let path = match args {
            [token] if token.kind == TokenKind::String && token.text.starts_with('"') => &token.text[1..token.text.len() - 1],
            _ => return Err(file.error(line, "#include expects \"FILENAME\"")),
        };
        if self.depth >= MAX_INCLUDE_DEPTH {
            return Err(file.error(line, format!("#include nested too deeply (limit is {MAX_INCLUDE_DEPTH})")));
        }

        let resolved = [file.base_dir.join(path), file.dir.join(path)].into_iter()
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| file.error(line, format!("cannot find include file '{path}'")))?;
        debug!(path = %resolved.display(), depth = self.depth + 1, "including file");

        let text = fs::read_to_string(&resolved).map_err(|e| file.error(line, format!("cannot read '{}': {e}", resolved.display())))?;
        let timestamp = fs::metadata(&resolved).and_then(|m| m.modified()).map(OffsetDateTime::from).unwrap_or(self.build_time);
        let name = resolved.to_string_lossy().into_owned();
        let included = SourceFile {
            name: &name,
            dir: resolved.parent().unwrap_or(Path::new("")),
            base_dir: file.base_dir,
            timestamp,
        };

        let _ = writeln!(out, "# 1 {}", quote(&name));
        self.depth += 1;
        let res = self.process(&text, &included, out);
        self.depth -= 1;
        res?;
        if !out.ends_with('\n') {
            out.push('\n');
        }
        let _ = writeln!(out, "# {next_line} {}", quote(file.name));
        Ok(())
    }

    /// Expands every macro invocation in `input`. `disabled` holds the macros currently being
    /// expanded, which are left alone. `site` is the line of the outermost invocation.
    fn expand(&mut self, input: &[Token], disabled: &mut Vec<String>, site: Option<u32>, file: &SourceFile) -> Result<Vec<Token>, PreprocessorError> {
        let mut out = Vec::with_capacity(input.len());
        let mut i = 0;
        while i < input.len() {
            let token = &input[i];
            i += 1;

            let definition = match self.macros.get(&token.text) {
                Some(definition) if token.kind == TokenKind::Identifier && !disabled.contains(&token.text) => definition.clone(),
                _ => {
                    out.push(token.clone());
                    continue;
                }
            };
            let line = site.unwrap_or(token.line);

            let body = match &definition.params {
                None => match self.dynamic_value(definition.kind, line, file) {
                    Some(value) => {
                        out.push(value);
                        continue;
                    }
                    None => definition.body,
                },
                Some(params) => {
                    let open = input[i..].iter().position(|t| !t.kind.is_trivia()).map(|x| x + i);
                    let Some(open) = open.filter(|&x| input[x].is_punct("(")) else {
                        out.push(token.clone());
                        continue;
                    };
                    let (mut args, end) = collect_arguments(input, open + 1)
                        .ok_or_else(|| file.error(line, format!("unterminated argument list invoking macro '{}'", definition.name)))?;
                    i = end;

                    if params.is_empty() && args.len() == 1 && args[0].is_empty() {
                        args.clear();
                    }
                    if args.len() < params.len() {
                        return Err(file.error(line, format!("not enough arguments for macro '{}' (expected {}, got {})", definition.name, params.len(), args.len())));
                    }
                    if args.len() > params.len() {
                        return Err(file.error(line, format!("too many arguments for macro '{}' (expected {}, got {})", definition.name, params.len(), args.len())));
                    }

                    let mut expanded_args = Vec::with_capacity(args.len());
                    for arg in &args {
                        expanded_args.push(self.expand(arg, disabled, Some(line), file)?);
                    }
                    substitute(&definition.body, params, &expanded_args)
                }
            };

            disabled.push(definition.name);
            let res = self.expand(&body, disabled, Some(line), file);
            disabled.pop();
            out.extend(res?);
        }
        Ok(out)
    }

    /// The value of a builtin computed at the expansion site, or `None` for macros with a fixed body.
    fn dynamic_value(&mut self, kind: MacroKind, line: u32, file: &SourceFile) -> Option<Token> {
        let token = match kind {
            MacroKind::User | MacroKind::Constant => return None,
            MacroKind::Line => Token::new(TokenKind::Number, format!("{line}u"), line),
            MacroKind::File => Token::new(TokenKind::String, quote(file.name), line),
            MacroKind::Date => Token::new(TokenKind::String, quote(&c_date(&self.build_time)), line),
            MacroKind::Time => Token::new(TokenKind::String, quote(&c_time(&self.build_time)), line),
            MacroKind::Timestamp => Token::new(TokenKind::String, quote(&c_timestamp(&file.timestamp)), line),
            MacroKind::Counter => {
                let value = self.counter;
                self.counter += 1;
                Token::new(TokenKind::Number, value.to_string(), line)
            }
        };
        Some(token)
    }
}

fn expect_name<'a>(args: &'a [Token], directive: &Token, line: u32, file: &SourceFile) -> Result<&'a str, PreprocessorError> {
    match args.first() {
        Some(token) if token.kind == TokenKind::Identifier => Ok(&token.text),
        _ => Err(file.error(line, format!("#{} expects a macro name", directive.text))),
    }
}

fn parse_define(args: &[Token], line: u32, file: &SourceFile) -> Result<MacroDefinition, PreprocessorError> {
    let Some((name, rest)) = args.split_first().filter(|(name, _)| name.kind == TokenKind::Identifier) else {
        return Err(file.error(line, "macro names must be identifiers"));
    };

    let (params, body) = match rest.first() {
        Some(open) if open.is_punct("(") => {
            let mut params: Vec<String> = Vec::new();
            let mut iter = rest[1..].iter().enumerate().filter(|(_, t)| !t.is_blank());
            let close = loop {
                match iter.next() {
                    Some((i, t)) if t.is_punct(")") && params.is_empty() => break i,
                    Some((_, t)) if t.kind == TokenKind::Identifier => {
                        if params.contains(&t.text) {
                            return Err(file.error(line, format!("duplicate macro parameter '{}'", t.text)));
                        }
                        params.push(t.text.clone());
                    }
                    _ => return Err(file.error(line, format!("expected parameter name in definition of macro '{}'", name.text))),
                }
                match iter.next() {
                    Some((_, t)) if t.is_punct(",") => (),
                    Some((i, t)) if t.is_punct(")") => break i,
                    _ => return Err(file.error(line, format!("missing ')' in parameter list of macro '{}'", name.text))),
                }
            };
            (Some(params), &rest[close + 2..])
        }
        _ => (None, rest),
    };

    Ok(MacroDefinition { name: name.text.clone(), params, body: compact(body), kind: MacroKind::User })
}

/// Splits the arguments of an invocation whose `(` is just before `start`.
/// Returns the trimmed arguments and the index after the closing `)`.
fn collect_arguments(input: &[Token], start: usize) -> Option<(Vec<Vec<Token>>, usize)> {
    let mut args = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    let mut depth = 0usize;
    for (i, token) in input.iter().enumerate().skip(start) {
        if token.is_punct(")") && depth == 0 {
            args.push(trim_blank(&current).to_vec());
            return Some((args, i + 1));
        }
        if token.is_punct(",") && depth == 0 {
            args.push(trim_blank(&current).to_vec());
            current.clear();
            continue;
        }
        if token.is_punct("(") {
            depth += 1;
        } else if token.is_punct(")") {
            depth -= 1;
        }
        current.push(token.clone());
    }
    None
}

fn substitute(body: &[Token], params: &[String], args: &[Vec<Token>]) -> Vec<Token> {
    let mut res = Vec::with_capacity(body.len());
    for token in body {
        match params.iter().position(|p| token.kind == TokenKind::Identifier && *p == token.text) {
            Some(i) => res.extend(args[i].iter().cloned()),
            None => res.push(token.clone()),
        }
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file() -> SourceFile<'static> {
        SourceFile { name: "test.ad", dir: Path::new(""), base_dir: Path::new(""), timestamp: OffsetDateTime::UNIX_EPOCH }
    }

    #[test]
    fn test_parse_define() {
        let args = tokenize("SQ(x) ((x) * /* c */ (x))", 1);
        let def = parse_define(&args, 1, &file()).unwrap();
        assert_eq!(def.name, "SQ");
        assert_eq!(def.params, Some(vec!["x".to_owned()]));
        assert_eq!(def.body.iter().map(|t| t.text.as_str()).collect::<String>(), "((x) * (x))");

        let def = parse_define(&tokenize("PAIR (a, b)", 1), 1, &file()).unwrap();
        assert!(!def.is_function());
        assert_eq!(def.body.len(), 6);

        let def = parse_define(&tokenize("NONE()", 1), 1, &file()).unwrap();
        assert_eq!(def.params, Some(vec![]));
        assert!(def.body.is_empty());

        assert!(parse_define(&tokenize("F(a, a) a", 1), 1, &file()).is_err());
        assert!(parse_define(&tokenize("F(a b) a", 1), 1, &file()).is_err());
        assert!(parse_define(&tokenize("F(a,", 1), 1, &file()).is_err());
        assert!(parse_define(&tokenize("1 2", 1), 1, &file()).is_err());
    }

    #[test]
    fn test_collect_arguments() {
        let tokens = tokenize("(a, f(b, c), ) rest", 1);
        let (args, end) = collect_arguments(&tokens, 1).unwrap();
        let args: Vec<String> = args.iter().map(|a| a.iter().map(|t| t.text.as_str()).collect()).collect();
        assert_eq!(args, ["a", "f(b, c)", ""]);
        assert!(tokens[end - 1].is_punct(")"));
        assert!(collect_arguments(&tokenize("(a, (b)", 1), 1).is_none());
    }

    #[test]
    fn test_compact() {
        let tokens = compact(&tokenize("  a  +\\\n b//x\n", 1));
        assert_eq!(tokens.iter().map(|t| t.text.as_str()).collect::<String>(), "a + b");
    }
}
