use std::fmt;

use thiserror::Error;

/// Location of a token's first character in the source text, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn start() -> Position {
        Position { line: 1, column: 1 }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// A syntax error together with where it happened.
#[derive(Debug, PartialEq, Error)]
#[error("{error} ({pos})")]
pub struct FullSyntaxError {
    pub pos: Position,
    pub error: SyntaxError,
}

#[derive(Debug, PartialEq, Error)]
pub enum SyntaxError {
    #[error("unexpected token '{0}', expected '{1}'")]
    UnexpectedToken(String, String),
    #[error("unexpected character: {0}")]
    BadChar(char),
    #[error("cannot parse number literal: {0}")]
    BadNumberLiteral(String),
    #[error("Unclosed string")]
    UnclosedString,
    #[error("expected identifier")]
    ExpectedIdentifier,
    #[error("expected expression")]
    ExpectedPrimary,
    #[error("cannot assign to this expression")]
    ExpectedLvalue,
}
