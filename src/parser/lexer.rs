//! Tokenizer for sensor graph source text.

use crate::error::{Result, SensorGraphError};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier or keyword; array types keep their `[]` suffix
    Ident(String),
    Number(i64),
    Str(String),
    /// `hex:...` literal
    Hex(Vec<u8>),
    /// Punctuation and operators
    Symbol(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// 1-based source line
    pub line: usize,
}

impl Token {
    pub fn is_symbol(&self, symbol: &str) -> bool {
        matches!(&self.kind, TokenKind::Symbol(s) if *s == symbol)
    }

    pub fn is_word(&self, word: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(w) if w == word)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TokenKind::Ident(word) => f.write_str(word),
            TokenKind::Number(value) => write!(f, "{}", value),
            TokenKind::Str(text) => write!(f, "{:?}", text),
            TokenKind::Hex(bytes) => {
                write!(f, "hex:")?;
                for byte in bytes {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            TokenKind::Symbol(symbol) => f.write_str(symbol),
        }
    }
}

/// Longest symbols first so `=>` wins over `=`
const SYMBOLS: [&str; 16] = [
    "=>", "==", ">=", "<=", "&&", "||", "(", ")", "{", "}", ";", ",", "=", ">", "<", ":",
];

pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '#' {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if c == '"' {
            let (text, next) = lex_string(&chars, i, line)?;
            tokens.push(Token {
                kind: TokenKind::Str(text),
                line,
            });
            i = next;
            continue;
        }

        let signed = (c == '-' || c == '+') && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
        if c.is_ascii_digit() || signed {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric()) {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = parse_number(&text)
                .ok_or_else(|| SensorGraphError::syntax(line, format!("invalid number '{}'", text)))?;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                line,
            });
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let mut word: String = chars[start..i].iter().collect();

            if word == "hex" && chars.get(i) == Some(&':') {
                let (bytes, next) = lex_hex(&chars, i + 1, line)?;
                tokens.push(Token {
                    kind: TokenKind::Hex(bytes),
                    line,
                });
                i = next;
                continue;
            }

            if chars.get(i) == Some(&'[') && chars.get(i + 1) == Some(&']') {
                word.push_str("[]");
                i += 2;
            }
            tokens.push(Token {
                kind: TokenKind::Ident(word),
                line,
            });
            continue;
        }

        let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
        let symbol = SYMBOLS
            .iter()
            .find(|s| rest.starts_with(**s))
            .ok_or_else(|| SensorGraphError::syntax(line, format!("unexpected character '{}'", c)))?;
        tokens.push(Token {
            kind: TokenKind::Symbol(symbol),
            line,
        });
        i += symbol.len();
    }

    Ok(tokens)
}

/// Decimal or `0x` hex, with an optional sign
pub fn parse_number(text: &str) -> Option<i64> {
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    Some(if negative { -magnitude } else { magnitude })
}

fn lex_string(chars: &[char], start: usize, line: usize) -> Result<(String, usize)> {
    let mut text = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '"' => return Ok((text, i + 1)),
            '\\' if i + 1 < chars.len() => {
                text.push(chars[i + 1]);
                i += 2;
            }
            '\n' => break,
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    Err(SensorGraphError::syntax(line, "unterminated string"))
}

fn lex_hex(chars: &[char], start: usize, line: usize) -> Result<(Vec<u8>, usize)> {
    let mut i = start;
    while i < chars.len() && chars[i].is_ascii_hexdigit() {
        i += 1;
    }
    let digits: String = chars[start..i].iter().collect();
    if digits.is_empty() || digits.len() % 2 != 0 {
        return Err(SensorGraphError::syntax(
            line,
            format!("invalid hex literal 'hex:{}'", digits),
        ));
    }

    let bytes = (0..digits.len())
        .step_by(2)
        .map(|at| u8::from_str_radix(&digits[at..at + 2], 16))
        .collect::<std::result::Result<Vec<u8>, _>>()
        .map_err(|_| SensorGraphError::syntax(line, "invalid hex literal"))?;
    Ok((bytes, i))
}
