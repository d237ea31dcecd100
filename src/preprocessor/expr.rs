//! Integer constant expressions for `#if` and `#elif`.

use super::lexer::TokenKind;
use super::Token;
use crate::error::PreprocessorError;

const LOOSEST: u8 = 11;

fn binary_precedence(op: &str) -> Option<u8> {
    Some(match op {
        "**" => 1,
        "*" | "/" | "%" => 2,
        "+" | "-" => 3,
        "<<" | ">>" => 4,
        "<" | "<=" | ">" | ">=" => 5,
        "==" | "!=" => 6,
        "&" => 7,
        "^" => 8,
        "|" => 9,
        "&&" => 10,
        "||" => 11,
        _ => return None,
    })
}

/// Evaluates a fully macro-expanded token run. Trivia is ignored.
pub fn evaluate(tokens: &[Token], file: &str, line: u32) -> Result<i32, PreprocessorError> {
    let tokens: Vec<&Token> = tokens.iter().filter(|t| !t.kind.is_trivia() && t.kind != TokenKind::Newline).collect();
    let mut evaluator = Evaluator { tokens: &tokens, pos: 0, file, line };

    if tokens.is_empty() {
        return Err(evaluator.error("expected an expression"));
    }
    let value = evaluator.ternary()?;
    match evaluator.peek() {
        None => Ok(value),
        Some(token) => Err(evaluator.error(format!("unexpected token '{}' in expression", token.text))),
    }
}

struct Evaluator<'a> {
    tokens: &'a [&'a Token],
    pos: usize,
    file: &'a str,
    line: u32,
}
impl Evaluator<'_> {
    fn error(&self, message: impl Into<String>) -> PreprocessorError {
        PreprocessorError { file: self.file.into(), line: self.line, message: message.into() }
    }
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).copied()
    }
    fn peek_punct(&self) -> Option<&str> {
        self.peek().filter(|t| t.kind == TokenKind::Punctuator).map(|t| t.text.as_str())
    }
    fn expect(&mut self, punct: &str) -> Result<(), PreprocessorError> {
        match self.peek_punct() {
            Some(x) if x == punct => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.error(format!("expected '{punct}' in expression"))),
        }
    }

    fn ternary(&mut self) -> Result<i32, PreprocessorError> {
        let condition = self.binary(LOOSEST)?;
        if self.peek_punct() != Some("?") {
            return Ok(condition);
        }
        self.pos += 1;
        let a = self.ternary()?;
        self.expect(":")?;
        let b = self.ternary()?;
        Ok(if condition != 0 { a } else { b })
    }

    fn binary(&mut self, precedence: u8) -> Result<i32, PreprocessorError> {
        if precedence == 0 {
            return self.unary();
        }

        let mut value = self.binary(precedence - 1)?;
        while let Some(op) = self.peek_punct().filter(|op| binary_precedence(op) == Some(precedence)) {
            let op = op.to_owned();
            self.pos += 1;
            let rhs = self.binary(precedence - 1)?;
            value = self.apply(&op, value, rhs)?;
        }
        Ok(value)
    }

    fn apply(&self, op: &str, a: i32, b: i32) -> Result<i32, PreprocessorError> {
        Ok(match op {
            "**" => (a as f64).powf(b as f64) as i64 as i32,
            "*" => a.wrapping_mul(b),
            "/" | "%" if b == 0 => return Err(self.error("division by zero in preprocessor expression")),
            "/" => a.wrapping_div(b),
            "%" => a.wrapping_rem(b),
            "+" => a.wrapping_add(b),
            "-" => a.wrapping_sub(b),
            "<<" => a.wrapping_shl(b as u32),
            ">>" => a.wrapping_shr(b as u32),
            "<" => (a < b) as i32,
            "<=" => (a <= b) as i32,
            ">" => (a > b) as i32,
            ">=" => (a >= b) as i32,
            "==" => (a == b) as i32,
            "!=" => (a != b) as i32,
            "&" => a & b,
            "^" => a ^ b,
            "|" => a | b,
            "&&" => (a != 0 && b != 0) as i32,
            "||" => (a != 0 || b != 0) as i32,
            _ => return Err(self.error(format!("unknown operator '{op}'"))),
        })
    }

    fn unary(&mut self) -> Result<i32, PreprocessorError> {
        let Some(token) = self.peek() else {
            return Err(self.error("unexpected end of expression"));
        };

        match (token.kind, token.text.as_str()) {
            (TokenKind::Punctuator, "!") => { self.pos += 1; Ok((self.unary()? == 0) as i32) }
            (TokenKind::Punctuator, "~") => { self.pos += 1; Ok(!self.unary()?) }
            (TokenKind::Punctuator, "+") => { self.pos += 1; self.unary() }
            (TokenKind::Punctuator, "-") => { self.pos += 1; Ok(self.unary()?.wrapping_neg()) }
            (TokenKind::Punctuator, "(") => {
                self.pos += 1;
                let value = self.ternary()?;
                self.expect(")")?;
                Ok(value)
            }
            (TokenKind::Identifier, "true") => { self.pos += 1; Ok(1) }
            (TokenKind::Identifier, "false") => { self.pos += 1; Ok(0) }
            (TokenKind::Identifier, name) => Err(self.error(format!("identifier '{name}' is not supported in preprocessor expressions"))),
            (TokenKind::Number, text) => {
                let value = parse_integer(text).ok_or_else(|| self.error(format!("invalid integer literal '{text}'")))?;
                self.pos += 1;
                Ok(value)
            }
            (_, text) => Err(self.error(format!("syntax error at '{text}'"))),
        }
    }
}

/// Parses a decimal or `0x` literal with optional `u`/`l` suffixes, truncated to 32 bits.
pub fn parse_integer(text: &str) -> Option<i32> {
    let digits = text.trim_end_matches(['u', 'U', 'l', 'L']);
    let value = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<u64>().ok()?,
    };
    Some(value as u32 as i32)
}
