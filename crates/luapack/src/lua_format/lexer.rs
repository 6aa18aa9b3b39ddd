//! Lua tokenizer
//!
//! Produces borrowed tokens; whitespace is dropped, comments are kept as
//! tokens so callers decide whether to print them.

use crate::error::{BundleError, BundleResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Name,
    Keyword,
    Number,
    String,
    Comment,
    Symbol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// Byte offset in the source
    pub offset: usize,
}

impl Token<'_> {
    pub fn is_symbol(&self, symbol: &str) -> bool {
        self.kind == TokenKind::Symbol && self.text == symbol
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Keyword && self.text == keyword
    }

    pub fn is_name(&self) -> bool {
        self.kind == TokenKind::Name
    }
}

pub const KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in",
    "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

const SYMBOLS: &[&str] = &[
    "...", "..", "==", "~=", "<=", ">=", "<<", ">>", "//", "::", "+", "-", "*", "/", "%", "^",
    "#", "&", "~", "|", "<", ">", "=", "(", ")", "{", "}", "[", "]", ";", ":", ",", ".",
];

/// Split `source` into tokens
///
/// A leading `#` line (shebang) is skipped the same way the Lua loader does.
pub fn tokenize(source: &str) -> BundleResult<Vec<Token<'_>>> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    tokens: Vec<Token<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> BundleResult<Vec<Token<'a>>> {
        if self.bytes.first() == Some(&b'#') {
            self.pos = self.find_line_end(0);
        }

        while let Some(&byte) = self.bytes.get(self.pos) {
            let start = self.pos;
            match byte {
                b' ' | b'\t' | b'\r' | b'\n' | 0x0b | 0x0c => {
                    self.pos += 1;
                }
                b'-' if self.peek(1) == Some(b'-') => {
                    self.pos += 2;
                    if let Some(level) = self.long_bracket_level(self.pos) {
                        self.pos = self.long_bracket_end(self.pos, level, "comment")?;
                    } else {
                        self.pos = self.find_line_end(self.pos);
                    }
                    self.push(TokenKind::Comment, start);
                }
                b'[' if self.long_bracket_level(self.pos).is_some() => {
                    let level = self.long_bracket_level(self.pos).unwrap_or_default();
                    self.pos = self.long_bracket_end(self.pos, level, "string")?;
                    self.push(TokenKind::String, start);
                }
                b'"' | b'\'' => {
                    self.pos = self.short_string_end(byte)?;
                    self.push(TokenKind::String, start);
                }
                b'0'..=b'9' => {
                    self.pos = self.number_end();
                    self.push(TokenKind::Number, start);
                }
                b'.' if self.peek(1).is_some_and(|next| next.is_ascii_digit()) => {
                    self.pos = self.number_end();
                    self.push(TokenKind::Number, start);
                }
                b if b.is_ascii_alphabetic() || b == b'_' => {
                    while self
                        .bytes
                        .get(self.pos)
                        .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_')
                    {
                        self.pos += 1;
                    }
                    let kind = if is_keyword(&self.source[start..self.pos]) {
                        TokenKind::Keyword
                    } else {
                        TokenKind::Name
                    };
                    self.push(kind, start);
                }
                _ => {
                    let rest = &self.source[self.pos..];
                    let Some(symbol) = SYMBOLS.iter().find(|symbol| rest.starts_with(**symbol))
                    else {
                        return Err(self.error(&format!(
                            "unexpected character '{}'",
                            rest.chars().next().unwrap_or_default()
                        )));
                    };
                    self.pos += symbol.len();
                    self.push(TokenKind::Symbol, start);
                }
            }
        }

        Ok(self.tokens)
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.tokens.push(Token {
            kind,
            text: &self.source[start..self.pos],
            offset: start,
        });
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn find_line_end(&self, from: usize) -> usize {
        self.bytes[from..]
            .iter()
            .position(|b| *b == b'\n')
            .map_or(self.bytes.len(), |index| from + index)
    }

    /// Level of a long bracket (`[[`, `[=[`, ...) opening at `at`
    fn long_bracket_level(&self, at: usize) -> Option<usize> {
        if self.bytes.get(at) != Some(&b'[') {
            return None;
        }
        let mut cursor = at + 1;
        while self.bytes.get(cursor) == Some(&b'=') {
            cursor += 1;
        }
        (self.bytes.get(cursor) == Some(&b'[')).then_some(cursor - at - 1)
    }

    fn long_bracket_end(&self, at: usize, level: usize, what: &str) -> BundleResult<usize> {
        let close = format!("]{}]", "=".repeat(level));
        let body_start = at + level + 2;
        self.source[body_start..]
            .find(&close)
            .map(|index| body_start + index + close.len())
            .ok_or_else(|| self.error_at(at, &format!("unfinished long {what}")))
    }

    fn short_string_end(&self, quote: u8) -> BundleResult<usize> {
        let start = self.pos;
        let mut cursor = self.pos + 1;
        while let Some(&byte) = self.bytes.get(cursor) {
            match byte {
                b'\\' => cursor += 2,
                b'\n' => break,
                b if b == quote => return Ok(cursor + 1),
                _ => cursor += 1,
            }
        }
        Err(self.error_at(start, "unfinished string"))
    }

    fn number_end(&self) -> usize {
        let mut cursor = self.pos;
        let is_hex = self.bytes.get(cursor) == Some(&b'0')
            && matches!(self.bytes.get(cursor + 1), Some(b'x' | b'X'));
        let exponent: &[u8] = if is_hex { b"pP" } else { b"eE" };
        if is_hex {
            cursor += 2;
        }
        while let Some(&byte) = self.bytes.get(cursor) {
            if exponent.contains(&byte) && matches!(self.bytes.get(cursor + 1), Some(b'+' | b'-'))
            {
                cursor += 2;
            } else if byte.is_ascii_alphanumeric() || byte == b'.' || byte == b'_' {
                // `1..2` is a number followed by the concat operator
                if byte == b'.' && self.bytes.get(cursor + 1) == Some(&b'.') {
                    break;
                }
                cursor += 1;
            } else {
                break;
            }
        }
        cursor
    }

    fn error(&self, message: &str) -> BundleError {
        self.error_at(self.pos, message)
    }

    fn error_at(&self, offset: usize, message: &str) -> BundleError {
        let line = self.source[..offset.min(self.source.len())]
            .bytes()
            .filter(|b| *b == b'\n')
            .count()
            + 1;
        BundleError::Format(format!("{message} at line {line}"))
    }
}
