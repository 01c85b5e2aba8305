//! Tokenizer for evaluator expressions

use crate::core::error::{LoggerError, Result};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Ident(String),
    Str(String),
    Int(i64),
    True,
    False,
    Null,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    OrOr,
    AndAnd,
    Bang,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub tok: Tok,
    pub offset: usize,
}

pub(crate) fn tokenize(src: &str) -> Result<Vec<Token>> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        let two = bytes.get(i..i + 2);
        let tok = match c {
            b'(' => Tok::LParen,
            b')' => Tok::RParen,
            b'[' => Tok::LBracket,
            b']' => Tok::RBracket,
            b'.' => Tok::Dot,
            b',' => Tok::Comma,
            b'|' if two == Some(b"||") => Tok::OrOr,
            b'&' if two == Some(b"&&") => Tok::AndAnd,
            b'=' if two == Some(b"==") => Tok::EqEq,
            b'!' if two == Some(b"!=") => Tok::NotEq,
            b'!' => Tok::Bang,
            b'<' if two == Some(b"<=") => Tok::Le,
            b'<' => Tok::Lt,
            b'>' if two == Some(b">=") => Tok::Ge,
            b'>' => Tok::Gt,
            b'"' | b'\'' => {
                let (text, end) = lex_string(src, i)?;
                tokens.push(Token {
                    tok: Tok::Str(text),
                    offset: start,
                });
                i = end;
                continue;
            }
            b'0'..=b'9' | b'-' => {
                let mut end = i + 1;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                let text = &src[i..end];
                let value = text
                    .parse::<i64>()
                    .map_err(|_| LoggerError::compile(start, format!("bad number '{}'", text)))?;
                tokens.push(Token {
                    tok: Tok::Int(value),
                    offset: start,
                });
                i = end;
                continue;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let mut end = i + 1;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
                {
                    end += 1;
                }
                let word = &src[i..end];
                let tok = match word {
                    "true" => Tok::True,
                    "false" => Tok::False,
                    "null" => Tok::Null,
                    _ => Tok::Ident(word.to_string()),
                };
                tokens.push(Token { tok, offset: start });
                i = end;
                continue;
            }
            _ => {
                let ch = src[i..].chars().next().unwrap_or('?');
                return Err(LoggerError::compile(
                    start,
                    format!("unexpected character '{}'", ch),
                ));
            }
        };
        i += match tok {
            Tok::OrOr | Tok::AndAnd | Tok::EqEq | Tok::NotEq | Tok::Le | Tok::Ge => 2,
            _ => 1,
        };
        tokens.push(Token { tok, offset: start });
    }

    tokens.push(Token {
        tok: Tok::Eof,
        offset: src.len(),
    });
    Ok(tokens)
}

fn lex_string(src: &str, start: usize) -> Result<(String, usize)> {
    let mut chars = src[start..].char_indices();
    let quote = match chars.next() {
        Some((_, q)) => q,
        None => return Err(LoggerError::compile(start, "expected string")),
    };
    let mut out = String::new();
    let mut escaped = false;
    for (pos, ch) in chars {
        if escaped {
            out.push(match ch {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                other => other,
            });
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == quote {
            return Ok((out, start + pos + ch.len_utf8()));
        } else {
            out.push(ch);
        }
    }
    Err(LoggerError::compile(start, "unterminated string literal"))
}
