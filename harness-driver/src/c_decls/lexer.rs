// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use super::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    Int { value: u64, unsigned: bool, long: bool },
    /// A floating constant, kept as written
    Float(String),
    Char(i64),
    Str(String),
    Punct(&'static str),
    /// Text that is not a valid token. Rejected by the parser, so only the item or function
    /// body containing it fails.
    Invalid(String),
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

impl Token {
    pub fn is_punct(&self, punct: &str) -> bool {
        matches!(self.kind, TokenKind::Punct(p) if p == punct)
    }

    pub fn is_ident(&self, ident: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(name) if name == ident)
    }

    /// Source-like spelling, used to render attribute arguments and messages.
    pub fn text(&self) -> String {
        match &self.kind {
            TokenKind::Ident(name) => name.clone(),
            TokenKind::Int { value, .. } => value.to_string(),
            TokenKind::Float(text) | TokenKind::Invalid(text) => text.clone(),
            TokenKind::Char(value) => value.to_string(),
            TokenKind::Str(text) => text.clone(),
            TokenKind::Punct(p) => p.to_string(),
            TokenKind::Eof => "end of file".to_string(),
        }
    }
}

/// Longest punctuators first.
const PUNCTUATORS: &[&str] = &[
    "<<=", ">>=", "...", "->", "++", "--", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "+=",
    "-=", "*=", "/=", "%=", "&=", "^=", "|=", "##", "[", "]", "(", ")", "{", "}", ".", "&", "*",
    "+", "-", "~", "!", "/", "%", "<", ">", "^", "|", "?", ":", ";", "=", ",", "#",
];

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
    /// Only whitespace seen since the last newline
    at_line_start: bool,
}

/// Split C source into tokens. Comments and preprocessor lines are dropped.
/// The result always ends with an `Eof` token.
pub fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer { src: src.as_bytes(), pos: 0, line: 1, at_line_start: true };
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

impl Lexer<'_> {
    fn peek(&self, ahead: usize) -> Option<u8> {
        self.src.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek(0)?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.at_line_start = true;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError { line: self.line, message: message.into() }
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match (self.peek(0), self.peek(1)) {
                (Some(b'/'), Some(b'/')) => {
                    while !matches!(self.peek(0), None | Some(b'\n')) {
                        self.bump();
                    }
                }
                (Some(b'/'), Some(b'*')) => {
                    let line = self.line;
                    self.pos += 2;
                    loop {
                        match (self.peek(0), self.peek(1)) {
                            (Some(b'*'), Some(b'/')) => {
                                self.pos += 2;
                                break;
                            }
                            (None, _) => {
                                return Err(ParseError {
                                    line,
                                    message: "unterminated block comment".into(),
                                });
                            }
                            _ => {
                                self.bump();
                            }
                        }
                    }
                }
                (Some(b'#'), _) if self.at_line_start => self.skip_preprocessor_line(),
                (Some(b'\\'), Some(b'\n')) => {
                    self.pos += 1;
                    self.bump();
                }
                (Some(c), _) if c.is_ascii_whitespace() => {
                    self.bump();
                }
                _ => return Ok(()),
            }
        }
    }

    fn skip_preprocessor_line(&mut self) {
        while let Some(c) = self.peek(0) {
            if c == b'\\' && self.peek(1) == Some(b'\n') {
                self.pos += 1;
                self.line += 1;
                self.pos += 1;
            } else if c == b'\n' {
                break;
            } else {
                self.pos += 1;
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_trivia()?;
        let line = self.line;
        self.at_line_start = false;
        let Some(c) = self.peek(0) else {
            return Ok(Token { kind: TokenKind::Eof, line });
        };
        let starts_number =
            c.is_ascii_digit() || (c == b'.' && self.peek(1).is_some_and(|d| d.is_ascii_digit()));
        let kind = if is_ident_byte(c) && !c.is_ascii_digit() {
            let start = self.pos;
            while self.peek(0).is_some_and(is_ident_byte) {
                self.pos += 1;
            }
            TokenKind::Ident(String::from_utf8_lossy(&self.src[start..self.pos]).into_owned())
        } else if starts_number {
            self.number()
        } else if c == b'\'' {
            self.pos += 1;
            let value = self.escaped_char()?;
            if self.bump() != Some(b'\'') {
                return Err(self.error("unterminated character literal"));
            }
            TokenKind::Char(value)
        } else if c == b'"' {
            self.pos += 1;
            let mut text = String::new();
            loop {
                match self.peek(0) {
                    Some(b'"') => {
                        self.pos += 1;
                        break;
                    }
                    None | Some(b'\n') => return Err(self.error("unterminated string literal")),
                    Some(_) => {
                        let value = self.escaped_char()?;
                        text.push(char::from(value as u8));
                    }
                }
            }
            TokenKind::Str(text)
        } else {
            let rest = &self.src[self.pos..];
            match PUNCTUATORS.iter().find(|p| rest.starts_with(p.as_bytes())) {
                Some(punct) => {
                    self.pos += punct.len();
                    TokenKind::Punct(punct)
                }
                None => {
                    // One whole UTF-8 character.
                    let len = match c {
                        0xf0..=0xff => 4,
                        0xe0..=0xef => 3,
                        0xc0..=0xdf => 2,
                        _ => 1,
                    }
                    .min(rest.len());
                    self.pos += len;
                    TokenKind::Invalid(String::from_utf8_lossy(&rest[..len]).into_owned())
                }
            }
        };
        Ok(Token { kind, line })
    }

    /// A preprocessing number: digits, letters, `.`, and a sign right after an exponent.
    fn number(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(c) = self.peek(0) {
            let exponent_sign = matches!(c, b'+' | b'-')
                && matches!(self.src[self.pos - 1], b'e' | b'E' | b'p' | b'P');
            if is_ident_byte(c) || c == b'.' || exponent_sign {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        let hex = text.starts_with("0x") || text.starts_with("0X");
        let exponent = if hex { ['p', 'P'] } else { ['e', 'E'] };
        if text.contains('.') || text.contains(exponent) {
            return TokenKind::Float(text);
        }
        let digits = text.trim_end_matches(['u', 'U', 'l', 'L']);
        let suffix = &text[digits.len()..];
        let unsigned = suffix.contains(['u', 'U']);
        let long = suffix.contains(['l', 'L']);
        let parsed = if let Some(hex) =
            digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X"))
        {
            u64::from_str_radix(hex, 16)
        } else if digits.len() > 1 && digits.starts_with('0') {
            u64::from_str_radix(&digits[1..], 8)
        } else {
            digits.parse::<u64>()
        };
        match parsed {
            Ok(value) => TokenKind::Int { value, unsigned, long },
            Err(_) => TokenKind::Invalid(text),
        }
    }

    fn escaped_char(&mut self) -> Result<i64, ParseError> {
        let c = self.bump().ok_or_else(|| self.error("unexpected end of file in literal"))?;
        if c != b'\\' {
            return Ok(i64::from(c));
        }
        let escape = self.bump().ok_or_else(|| self.error("unexpected end of file in literal"))?;
        let value = match escape {
            b'n' => b'\n',
            b't' => b'\t',
            b'r' => b'\r',
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0c,
            b'v' => 0x0b,
            b'\\' | b'\'' | b'"' | b'?' => escape,
            b'x' => {
                let mut value: i64 = 0;
                while let Some(digit) = self.peek(0).and_then(|c| char::from(c).to_digit(16)) {
                    value = (value * 16 + i64::from(digit)) & 0xff;
                    self.pos += 1;
                }
                return Ok(value);
            }
            b'0'..=b'7' => {
                let mut value = i64::from(escape - b'0');
                for _ in 0..2 {
                    match self.peek(0) {
                        Some(c @ b'0'..=b'7') => {
                            value = value * 8 + i64::from(c - b'0');
                            self.pos += 1;
                        }
                        _ => break,
                    }
                }
                return Ok(value & 0xff);
            }
            other => return Err(self.error(format!("unknown escape `\\{}`", char::from(other)))),
        };
        Ok(i64::from(value))
    }
}

/// GCC accepts `$` in identifiers.
fn is_ident_byte(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn check_skips_comments_and_preprocessor() {
        let src = "/* Copyright */\n#include <stddef.h>\n#define X \\\n  1\n// note\nint x;";
        let tokens = tokenize(src).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Ident("int".into()));
        assert_eq!(tokens[0].line, 6);
        assert_eq!(tokens.len(), 4);
    }

    #[test]
    fn check_literals() {
        assert_eq!(
            kinds("0x1F 010 7UL 'a' '\\n' \"hi\""),
            vec![
                TokenKind::Int { value: 31, unsigned: false, long: false },
                TokenKind::Int { value: 8, unsigned: false, long: false },
                TokenKind::Int { value: 7, unsigned: true, long: true },
                TokenKind::Char(97),
                TokenKind::Char(10),
                TokenKind::Str("hi".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn check_longest_punctuator() {
        assert_eq!(
            kinds("a<<=b->c...++"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Punct("<<="),
                TokenKind::Ident("b".into()),
                TokenKind::Punct("->"),
                TokenKind::Ident("c".into()),
                TokenKind::Punct("..."),
                TokenKind::Punct("++"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn check_errors() {
        assert_eq!(tokenize("int x;\n/* open").unwrap_err().line, 2);
        assert!(tokenize("\"open").is_err());
    }

    #[test]
    fn check_invalid_text_is_a_token() {
        assert_eq!(
            kinds("int @ 09 ¤"),
            vec![
                TokenKind::Ident("int".into()),
                TokenKind::Invalid("@".into()),
                TokenKind::Invalid("09".into()),
                TokenKind::Invalid("¤".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn check_floats_and_dollar_identifiers() {
        assert_eq!(
            kinds("1.5e0 .5f 1e-3 0x1p+4 us$ 2+x"),
            vec![
                TokenKind::Float("1.5e0".into()),
                TokenKind::Float(".5f".into()),
                TokenKind::Float("1e-3".into()),
                TokenKind::Float("0x1p+4".into()),
                TokenKind::Ident("us$".into()),
                TokenKind::Int { value: 2, unsigned: false, long: false },
                TokenKind::Punct("+"),
                TokenKind::Ident("x".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn check_long_hex_escape() {
        assert_eq!(kinds("'\\x11111111111111111'")[0], TokenKind::Char(0x11));
    }
}
