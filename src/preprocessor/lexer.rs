//! Token scanner for the preprocessor.
//!
//! Unlike a language lexer nothing is skipped here: whitespace, comments and line breaks are
//! kept as trivia so that text which is not touched by a directive or macro is copied out verbatim.

use logos::{Lexer, Logos, Span};

/// Token kinds recognised by the preprocessor.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    #[regex(r"[ \t\r\x0b\x0c]+")]
    Whitespace,
    /// A backslash immediately followed by a line break.
    #[regex(r"\\\r?\n")]
    Continuation,
    #[token("\n")]
    Newline,
    #[regex(r"//[^\n]*")]
    LineComment,
    #[token("/*", block_comment)]
    BlockComment,

    #[regex(r"[A-Za-z_$][A-Za-z0-9_$]*")]
    Identifier,
    #[regex(r"\.?[0-9]([0-9A-Za-z_.]|[eE][+-])*")]
    Number,
    #[regex(r#""([^"\\\n]|\\.)*""#)]
    #[regex(r"'([^'\\\n]|\\.)*'")]
    String,

    #[token("...")]
    #[token("::")]
    #[token("->")]
    #[token("=>")]
    #[token("++")]
    #[token("--")]
    #[token("**")]
    #[token("**=")]
    #[token("<<")]
    #[token(">>")]
    #[token("<<=")]
    #[token(">>=")]
    #[token("<=")]
    #[token(">=")]
    #[token("==")]
    #[token("!=")]
    #[token("&&")]
    #[token("||")]
    #[token("+=")]
    #[token("-=")]
    #[token("*=")]
    #[token("/=")]
    #[token("%=")]
    #[token("&=")]
    #[token("|=")]
    #[token("^=")]
    #[token("?.")]
    #[token("??")]
    #[regex(r"[-+*/%&|^!~<>=?:;,.()\[\]{}#@\\`]")]
    Punctuator,

    /// Anything the scanner does not recognise, passed through untouched.
    Other,
}
impl TokenKind {
    /// Whitespace, comments and line continuations.
    pub fn is_trivia(self) -> bool {
        matches!(self, Self::Whitespace | Self::Continuation | Self::LineComment | Self::BlockComment)
    }
}

// an unterminated comment runs to the end of the input
fn block_comment(lex: &mut Lexer<TokenKind>) {
    let rest = lex.remainder();
    let len = rest.find("*/").map(|i| i + 2).unwrap_or(rest.len());
    lex.bump(len);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub token: T,
    pub span: Span,
}

/// Splits `source` into tokens covering every byte of the input.
pub fn lex(source: &str) -> Vec<Spanned<TokenKind>> {
    let mut lexer = TokenKind::lexer(source);
    let mut tokens: Vec<Spanned<TokenKind>> = Vec::new();

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let token = result.unwrap_or(TokenKind::Other);
        match tokens.last_mut() {
            Some(last) if token == TokenKind::Other && last.token == TokenKind::Other && last.span.end == span.start => last.span.end = span.end,
            _ => tokens.push(Spanned { token, span }),
        }
    }

    tokens
}
