//! Recursive-descent parser producing a resolved expression tree
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! or      := and ( "||" and )*
//! and     := unary ( "&&" unary )*
//! unary   := "!" unary | compare
//! compare := postfix ( ("==" | "!=" | "<" | "<=" | ">" | ">=") postfix )?
//! postfix := primary ( "." IDENT "(" args? ")" | "[" or "]" )*
//! primary := STRING | INT | true | false | null | IDENT | "(" or ")"
//! ```
//!
//! Identifiers and method names are resolved here, so an unknown name is a
//! compile error rather than a per-event failure.

use super::lexer::{tokenize, Tok, Token};
use crate::core::error::{LoggerError, Result};
use crate::core::log_level::LogLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Field {
    Message,
    FormattedMessage,
    Logger,
    Level,
    TimeStamp,
    Thread,
    Mdc,
    Marker,
    Throwable,
}

impl Field {
    fn resolve(name: &str) -> Option<Field> {
        Some(match name {
            "message" => Field::Message,
            "formattedMessage" => Field::FormattedMessage,
            "logger" => Field::Logger,
            "level" => Field::Level,
            "timeStamp" => Field::TimeStamp,
            "thread" => Field::Thread,
            "mdc" => Field::Mdc,
            "marker" => Field::Marker,
            "throwable" | "throwableProxy" => Field::Throwable,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Method {
    Contains,
    StartsWith,
    EndsWith,
    EqualsIgnoreCase,
    IsEmpty,
    Length,
    Matches,
    GetMessage,
    GetClassName,
    GetCause,
}

impl Method {
    fn resolve(name: &str) -> Option<Method> {
        Some(match name {
            "contains" => Method::Contains,
            "startsWith" => Method::StartsWith,
            "endsWith" => Method::EndsWith,
            "equalsIgnoreCase" => Method::EqualsIgnoreCase,
            "isEmpty" => Method::IsEmpty,
            "length" => Method::Length,
            "matches" => Method::Matches,
            "getMessage" => Method::GetMessage,
            "getClassName" => Method::GetClassName,
            "getCause" => Method::GetCause,
            _ => return None,
        })
    }

    fn arity(self) -> usize {
        match self {
            Method::IsEmpty
            | Method::Length
            | Method::GetMessage
            | Method::GetClassName
            | Method::GetCause => 0,
            _ => 1,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Method::Contains => "contains",
            Method::StartsWith => "startsWith",
            Method::EndsWith => "endsWith",
            Method::EqualsIgnoreCase => "equalsIgnoreCase",
            Method::IsEmpty => "isEmpty",
            Method::Length => "length",
            Method::Matches => "matches",
            Method::GetMessage => "getMessage",
            Method::GetClassName => "getClassName",
            Method::GetCause => "getCause",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Literal),
    Field(Field),
    /// Index into the evaluator's matcher list
    Matcher(usize),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Call {
        target: Box<Expr>,
        method: Method,
        args: Vec<Expr>,
    },
}

/// Parse `src`; `matchers` lists the names bound as matcher identifiers
pub(crate) fn parse(src: &str, matchers: &[&str]) -> Result<Expr> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        matchers,
    };
    let expr = parser.or()?;
    parser.expect(&Tok::Eof, "end of expression")?;
    Ok(expr)
}

struct Parser<'m> {
    tokens: Vec<Token>,
    pos: usize,
    matchers: &'m [&'m str],
}

impl<'m> Parser<'m> {
    fn peek(&self) -> &Token {
        // tokenize always ends with Eof, and the parser never advances past it
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.tok != Tok::Eof {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if &self.peek().tok == tok {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<Token> {
        if &self.peek().tok == tok {
            Ok(self.advance())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, what: &str) -> LoggerError {
        let token = self.peek();
        LoggerError::compile(
            token.offset,
            format!("expected {} but found {:?}", what, token.tok),
        )
    }

    fn or(&mut self) -> Result<Expr> {
        let mut lhs = self.and()?;
        while self.eat(&Tok::OrOr) {
            let rhs = self.and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        while self.eat(&Tok::AndAnd) {
            let rhs = self.unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&Tok::Bang) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.compare()
    }

    fn compare(&mut self) -> Result<Expr> {
        let lhs = self.postfix()?;
        let op = match self.peek().tok {
            Tok::EqEq => CmpOp::Eq,
            Tok::NotEq => CmpOp::Ne,
            Tok::Lt => CmpOp::Lt,
            Tok::Le => CmpOp::Le,
            Tok::Gt => CmpOp::Gt,
            Tok::Ge => CmpOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.postfix()?;
        Ok(Expr::Compare(op, Box::new(lhs), Box::new(rhs)))
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Tok::Dot) {
                let name_token = self.advance();
                let name = match name_token.tok {
                    Tok::Ident(name) => name,
                    _ => {
                        return Err(LoggerError::compile(
                            name_token.offset,
                            "expected method name after '.'",
                        ))
                    }
                };
                let method = Method::resolve(&name).ok_or_else(|| {
                    LoggerError::compile(name_token.offset, format!("unknown method '{}'", name))
                })?;
                let is_matcher = matches!(expr, Expr::Matcher(_));
                if is_matcher != (method == Method::Matches) {
                    return Err(LoggerError::compile(
                        name_token.offset,
                        format!("method '{}' is not available on this value", name),
                    ));
                }
                self.expect(&Tok::LParen, "'('")?;
                let mut args = Vec::new();
                if !self.eat(&Tok::RParen) {
                    loop {
                        args.push(self.or()?);
                        if self.eat(&Tok::RParen) {
                            break;
                        }
                        self.expect(&Tok::Comma, "',' or ')'")?;
                    }
                }
                if args.len() != method.arity() {
                    return Err(LoggerError::compile(
                        name_token.offset,
                        format!(
                            "method '{}' takes {} argument(s), got {}",
                            name,
                            method.arity(),
                            args.len()
                        ),
                    ));
                }
                expr = Expr::Call {
                    target: Box::new(expr),
                    method,
                    args,
                };
            } else if self.eat(&Tok::LBracket) {
                let key = self.or()?;
                self.expect(&Tok::RBracket, "']'")?;
                expr = Expr::Index(Box::new(expr), Box::new(key));
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        let token = self.advance();
        let expr = match token.tok {
            Tok::Str(s) => Expr::Literal(Literal::Str(s)),
            Tok::Int(i) => Expr::Literal(Literal::Int(i)),
            Tok::True => Expr::Literal(Literal::Bool(true)),
            Tok::False => Expr::Literal(Literal::Bool(false)),
            Tok::Null => Expr::Literal(Literal::Null),
            Tok::LParen => {
                let inner = self.or()?;
                self.expect(&Tok::RParen, "')'")?;
                inner
            }
            Tok::Ident(name) => self.resolve(&name, token.offset)?,
            other => {
                return Err(LoggerError::compile(
                    token.offset,
                    format!("unexpected {:?}", other),
                ))
            }
        };
        Ok(expr)
    }

    fn resolve(&self, name: &str, offset: usize) -> Result<Expr> {
        if let Some(field) = Field::resolve(name) {
            return Ok(Expr::Field(field));
        }
        if let Ok(level) = name.parse::<LogLevel>() {
            if name == level.to_str() {
                return Ok(Expr::Literal(Literal::Int(level.as_int())));
            }
        }
        if let Some(index) = self.matchers.iter().position(|m| *m == name) {
            return Ok(Expr::Matcher(index));
        }
        Err(LoggerError::compile(
            offset,
            format!("unknown identifier '{}'", name),
        ))
    }
}
