//! Lexical analyzer

use std::iter::Peekable;
use std::rc::Rc;
use std::str::Chars;

use thiserror::Error;

use crate::ctx::Context;
use crate::diag::{FullSyntaxError, Position, SyntaxError};
use crate::token::Token;

/// Turn source text into a sequence of tokens.
///
/// The scanner is infallible in the sense that it never panics; lexical
/// problems surface as `Err` items and callers stop at the first one.
pub struct Scanner<'src> {
    input: Peekable<Chars<'src>>,
    pos: Position,
    ctx: Rc<Context>,

    // Buffer used when scanning longer tokens.  Allocated here to reuse memory.
    buf: String,
}

#[derive(Debug, PartialEq, Error)]
#[error(transparent)]
pub struct ScanError(#[from] pub FullSyntaxError);

impl<'src> Scanner<'src> {
    /// Creates a new scanner operating on `source`.
    pub fn new(source: &'src str, ctx: Rc<Context>) -> Scanner<'src> {
        Scanner {
            input: source.chars().peekable(),
            pos: Position::start(),
            ctx,
            buf: String::new(),
        }
    }

    /// Scan the next token and return it with the position of its first
    /// character.  At end of input every call returns `Token::Eof`.
    pub fn get_token(&mut self) -> Result<(Position, Token), ScanError> {
        self.skip_blanks_and_comments();
        let start = self.pos;
        let ch = match self.next_char() {
            None => return Ok((start, Token::Eof)),
            Some(ch) => ch,
        };
        let token = match ch {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '#' => Token::Hash,
            '(' => Token::LeftParen,
            ')' => Token::RightParen,
            '[' => Token::LeftBracket,
            ']' => Token::RightBracket,
            '{' => Token::LeftCurly,
            '}' => Token::RightCurly,
            ',' => Token::Comma,
            ';' => Token::Semicolon,
            '=' => {
                if self.consume_if('=') {
                    Token::EqualEqual
                } else {
                    Token::Equal
                }
            }
            '~' => {
                if self.consume_if('=') {
                    Token::TildeEqual
                } else {
                    Token::Tilde
                }
            }
            '<' => {
                if self.consume_if('=') {
                    Token::LessEqual
                } else {
                    Token::Less
                }
            }
            '>' => {
                if self.consume_if('=') {
                    Token::GreaterEqual
                } else {
                    Token::Greater
                }
            }
            ':' => {
                if self.consume_if(':') {
                    Token::ColonColon
                } else {
                    Token::Colon
                }
            }
            '.' => {
                if self.consume_if('.') {
                    if self.consume_if('.') {
                        Token::DotDotDot
                    } else {
                        Token::DotDot
                    }
                } else {
                    Token::Dot
                }
            }
            '\'' | '"' => self.scan_string(ch, start)?,
            '0'..='9' => self.scan_number(ch, start)?,
            'a'..='z' | 'A'..='Z' | '_' => self.scan_identifier(ch),
            _ => {
                return Err(ScanError(FullSyntaxError {
                    pos: start,
                    error: SyntaxError::BadChar(ch),
                }));
            }
        };
        Ok((start, token))
    }

    fn skip_blanks_and_comments(&mut self) {
        loop {
            match self.input.peek().copied() {
                Some(' ' | '\t' | '\r' | '\n') => {
                    self.next_char();
                }
                Some('-') if self.peek_second() == Some('-') => {
                    while let Some(&ch) = self.input.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.next_char();
                    }
                }
                _ => break,
            }
        }
    }

    fn scan_number(&mut self, first_digit: char, start: Position) -> Result<Token, ScanError> {
        self.buf.clear();
        self.buf.push(first_digit);
        self.push_digits();

        // A '.' only belongs to the number when a digit follows; otherwise it
        // is left in place as the '.' operator.
        if self.input.peek() == Some(&'.') && self.peek_second().is_some_and(|ch| ch.is_ascii_digit())
        {
            let dot = self.next_char_unchecked();
            self.buf.push(dot);
            self.push_digits();
        }

        // Same care for the exponent marker: 'e' with no digits after it is
        // the start of the next token, not a malformed number.
        if matches!(self.input.peek(), Some('e' | 'E')) {
            let mut ahead = self.input.clone();
            ahead.next();
            let signed = matches!(ahead.clone().next(), Some('+' | '-'));
            if signed {
                ahead.next();
            }
            if ahead.next().is_some_and(|ch| ch.is_ascii_digit()) {
                let e = self.next_char_unchecked();
                self.buf.push(e);
                if signed {
                    let sign = self.next_char_unchecked();
                    self.buf.push(sign);
                }
                self.push_digits();
            }
        }

        let n = self.buf.parse::<f64>().map_err(|_| {
            ScanError(FullSyntaxError {
                pos: start,
                error: SyntaxError::BadNumberLiteral(self.buf.clone()),
            })
        })?;
        Ok(Token::Number(n))
    }

    fn push_digits(&mut self) {
        while self
            .input
            .peek()
            .is_some_and(|ch| ch.is_ascii_digit())
        {
            let ch = self.next_char_unchecked();
            self.buf.push(ch);
        }
    }

    fn scan_string(&mut self, quote: char, start: Position) -> Result<Token, ScanError> {
        self.buf.clear();
        loop {
            match self.input.peek() {
                None | Some('\n') => {
                    return Err(ScanError(FullSyntaxError {
                        pos: start,
                        error: SyntaxError::UnclosedString,
                    }));
                }
                Some(&ch) if ch == quote => {
                    self.next_char();
                    break;
                }
                Some('\\') => {
                    self.next_char();
                    match self.next_char() {
                        None => {
                            return Err(ScanError(FullSyntaxError {
                                pos: start,
                                error: SyntaxError::UnclosedString,
                            }));
                        }
                        Some('\\') => self.buf.push('\\'),
                        Some('\'') => self.buf.push('\''),
                        Some('"') => self.buf.push('"'),
                        Some('a') => self.buf.push('\x07'),
                        Some('b') => self.buf.push('\x08'),
                        Some('f') => self.buf.push('\x0c'),
                        Some('n') => self.buf.push('\n'),
                        Some('r') => self.buf.push('\r'),
                        Some('t') => self.buf.push('\t'),
                        Some('v') => self.buf.push('\x0b'),
                        // Unknown escapes keep the backslash.
                        Some(other) => {
                            self.buf.push('\\');
                            self.buf.push(other);
                        }
                    }
                }
                Some(_) => {
                    let ch = self.next_char_unchecked();
                    self.buf.push(ch);
                }
            }
        }
        Ok(Token::Str(self.buf.clone()))
    }

    fn scan_identifier(&mut self, first_char: char) -> Token {
        self.buf.clear();
        self.buf.push(first_char);
        while self
            .input
            .peek()
            .is_some_and(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        {
            let ch = self.next_char_unchecked();
            self.buf.push(ch);
        }

        let sym = self.ctx.symbol(&self.buf);
        if let Some(token) = self.ctx.keyword(&sym) {
            token
        } else {
            Token::Identifier(sym)
        }
    }

    fn next_char(&mut self) -> Option<char> {
        let ch = self.input.next()?;
        if ch == '\n' {
            self.pos.line += 1;
            self.pos.column = 1;
        } else {
            self.pos.column += 1;
        }
        Some(ch)
    }

    /// Return the next character.  Panics on EOF; use after peek()ing only.
    fn next_char_unchecked(&mut self) -> char {
        self.next_char().unwrap()
    }

    fn consume_if(&mut self, expected: char) -> bool {
        if self.input.peek() == Some(&expected) {
            self.next_char();
            true
        } else {
            false
        }
    }

    /// One character past the peekable one.  `Chars` is a cheap iterator to
    /// clone, which spares us a pushback buffer.
    fn peek_second(&self) -> Option<char> {
        let mut ahead = self.input.clone();
        ahead.next();
        ahead.next()
    }
}

impl Iterator for Scanner<'_> {
    type Item = Result<Token, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.get_token() {
            Ok((_, Token::Eof)) => None,
            Ok((_, t)) => Some(Ok(t)),
            Err(e) => Some(Err(e)),
        }
    }
}
