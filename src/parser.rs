use std::rc::Rc;

use thiserror::Error;

use crate::ast::{BinOp, Block, Expr, Field, FuncBody, FunctionTarget, Stmt, UnOp};
use crate::ctx::Context;
use crate::diag::{FullSyntaxError, Position, SyntaxError};
use crate::interner::Symbol;
use crate::scanner::{ScanError, Scanner};
use crate::token::Token;

#[derive(Debug, PartialEq, Error)]
pub enum ParserError {
    /// The scanner rejected the input before it ever reached the grammar.
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Syntax(FullSyntaxError),
}

/// Recursive-descent parser with two tokens of lookahead.
///
/// `current` drives every dispatch decision; `next` is only consulted where
/// the grammar is not LL(1), i.e. to tell a `name = value` table field from a
/// positional field starting with an identifier.
pub struct Parser<'src> {
    scanner: Scanner<'src>,
    current: Token,
    current_pos: Position,
    next: Token,
    next_pos: Position,
    ctx: Rc<Context>,
}

impl<'src> Parser<'src> {
    pub fn new(source: &'src str, ctx: Rc<Context>) -> Parser<'src> {
        Parser {
            scanner: Scanner::new(source, ctx.clone()),
            // We haven't scanned anything yet.
            current: Token::Eof,
            current_pos: Position::start(),
            next: Token::Eof,
            next_pos: Position::start(),
            ctx,
        }
    }

    /// Parse a whole program: a block running to end of input.
    pub fn parse_program(&mut self) -> Result<Block, ParserError> {
        self.prime()?;
        let block = self.block()?;
        self.expect(Token::Eof)?;
        Ok(block)
    }

    /// Parse a single expression spanning the whole input.
    #[allow(dead_code)]
    fn parse_expression(&mut self) -> Result<Expr, ParserError> {
        self.prime()?;
        let expr = self.expression()?;
        self.expect(Token::Eof)?;
        Ok(expr)
    }

    fn prime(&mut self) -> Result<(), ParserError> {
        self.advance()?;
        self.advance()?;
        Ok(())
    }

    fn block(&mut self) -> Result<Block, ParserError> {
        let mut stmts = vec![];
        loop {
            match self.current {
                Token::End | Token::Elseif | Token::Else | Token::Until | Token::Eof => break,
                Token::Semicolon => self.advance()?,
                _ => stmts.push(self.statement()?),
            }
        }
        Ok(stmts)
    }

    fn statement(&mut self) -> Result<Stmt, ParserError> {
        match self.current {
            Token::Local => self.local_decl(),
            Token::If => self.if_stmt(),
            Token::While => self.while_stmt(),
            Token::For => self.for_stmt(),
            Token::Repeat => self.repeat_stmt(),
            // An anonymous definition at statement position falls through to
            // the expression path below.
            Token::Function if matches!(self.next, Token::Identifier(_)) => self.function_stmt(),
            Token::Return => self.return_stmt(),
            Token::Break => {
                self.advance()?;
                Ok(Stmt::Break)
            }
            Token::Do => {
                self.advance()?;
                let body = self.block()?;
                self.expect(Token::End)?;
                Ok(Stmt::Do(body))
            }
            _ => self.expr_or_assign(),
        }
    }

    /// Parse `local name, ... [= expr, ...]` or `local function name(...) ... end`.
    /// Current token is Token::Local.
    fn local_decl(&mut self) -> Result<Stmt, ParserError> {
        self.advance()?;
        if self.current == Token::Function {
            self.advance()?;
            let name = self.identifier()?;
            let func = self.func_rest(false)?;
            return Ok(Stmt::LocalFunction(name, Rc::new(func)));
        }

        let mut names = vec![self.identifier()?];
        while self.advance_if(Token::Comma)? {
            names.push(self.identifier()?);
        }
        let inits = if self.advance_if(Token::Equal)? {
            self.expression_list()?
        } else {
            vec![]
        };
        Ok(Stmt::Local(names, inits))
    }

    fn if_stmt(&mut self) -> Result<Stmt, ParserError> {
        self.advance()?;
        let cond = self.expression()?;
        self.expect(Token::Then)?;
        let body = self.block()?;
        let mut arms = vec![(cond, body)];
        while self.current == Token::Elseif {
            self.advance()?;
            let cond = self.expression()?;
            self.expect(Token::Then)?;
            arms.push((cond, self.block()?));
        }
        let else_block = if self.advance_if(Token::Else)? {
            Some(self.block()?)
        } else {
            None
        };
        self.expect(Token::End)?;
        Ok(Stmt::If(arms, else_block))
    }

    fn while_stmt(&mut self) -> Result<Stmt, ParserError> {
        self.advance()?;
        let cond = self.expression()?;
        self.expect(Token::Do)?;
        let body = self.block()?;
        self.expect(Token::End)?;
        Ok(Stmt::While(cond, body))
    }

    /// Numeric `for var = start, finish [, step] do ... end`; the generic
    /// `for ... in` form is not part of the language.
    fn for_stmt(&mut self) -> Result<Stmt, ParserError> {
        self.advance()?;
        let var = self.identifier()?;
        self.expect(Token::Equal)?;
        let start = self.expression()?;
        self.expect(Token::Comma)?;
        let finish = self.expression()?;
        let step = if self.advance_if(Token::Comma)? {
            Some(self.expression()?)
        } else {
            None
        };
        self.expect(Token::Do)?;
        let body = self.block()?;
        self.expect(Token::End)?;
        Ok(Stmt::NumericFor {
            var,
            start,
            finish,
            step,
            body,
        })
    }

    fn repeat_stmt(&mut self) -> Result<Stmt, ParserError> {
        self.advance()?;
        let body = self.block()?;
        self.expect(Token::Until)?;
        let cond = self.expression()?;
        Ok(Stmt::Repeat(body, cond))
    }

    /// Parse `function name(...) ... end` or `function owner:method(...) ... end`.
    /// Method definitions get `self` as an implicit first parameter.
    fn function_stmt(&mut self) -> Result<Stmt, ParserError> {
        self.advance()?;
        let name = self.identifier()?;
        if self.advance_if(Token::Colon)? {
            let method = self.identifier()?;
            let func = self.func_rest(true)?;
            Ok(Stmt::Function(
                FunctionTarget::Method(name, method),
                Rc::new(func),
            ))
        } else {
            let func = self.func_rest(false)?;
            Ok(Stmt::Function(FunctionTarget::Name(name), Rc::new(func)))
        }
    }

    /// Parse the parameter list and body shared by all function forms.
    /// Current token is the opening parenthesis.
    fn func_rest(&mut self, is_method: bool) -> Result<FuncBody, ParserError> {
        self.expect(Token::LeftParen)?;
        let mut params = vec![];
        if is_method {
            params.push(self.ctx.self_symbol());
        }
        if self.current != Token::RightParen {
            loop {
                params.push(self.identifier()?);
                if !self.advance_if(Token::Comma)? {
                    break;
                }
            }
        }
        self.expect(Token::RightParen)?;
        let body = self.block()?;
        self.expect(Token::End)?;
        Ok(FuncBody { params, body })
    }

    fn return_stmt(&mut self) -> Result<Stmt, ParserError> {
        self.advance()?;
        let exprs = match self.current {
            Token::End
            | Token::Elseif
            | Token::Else
            | Token::Until
            | Token::Eof
            | Token::Semicolon => vec![],
            _ => self.expression_list()?,
        };
        Ok(Stmt::Return(exprs))
    }

    fn expr_or_assign(&mut self) -> Result<Stmt, ParserError> {
        let expr = self.expression()?;
        if self.current != Token::Equal {
            return Ok(Stmt::Expr(expr));
        }
        match expr {
            Expr::Var(_) | Expr::Index(..) | Expr::Member(..) => {
                self.advance()?;
                let value = self.expression()?;
                Ok(Stmt::Assign(expr, value))
            }
            _ => Err(self.error(SyntaxError::ExpectedLvalue)),
        }
    }

    fn expression_list(&mut self) -> Result<Vec<Expr>, ParserError> {
        let mut exprs = vec![self.expression()?];
        while self.advance_if(Token::Comma)? {
            exprs.push(self.expression()?);
        }
        Ok(exprs)
    }

    fn expression(&mut self) -> Result<Expr, ParserError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, ParserError> {
        let mut expr = self.and_expr()?;
        while self.advance_if(Token::Or)? {
            expr = Expr::Binary(BinOp::Or, Box::new(expr), Box::new(self.and_expr()?));
        }
        Ok(expr)
    }

    fn and_expr(&mut self) -> Result<Expr, ParserError> {
        let mut expr = self.rel_expr()?;
        while self.advance_if(Token::And)? {
            expr = Expr::Binary(BinOp::And, Box::new(expr), Box::new(self.rel_expr()?));
        }
        Ok(expr)
    }

    fn rel_expr(&mut self) -> Result<Expr, ParserError> {
        let mut expr = self.concat_expr()?;
        loop {
            let op = match self.current {
                Token::EqualEqual => BinOp::Eq,
                // A bare '~' between operands is inequality too; older
                // programs rely on it.
                Token::TildeEqual | Token::Tilde => BinOp::Ne,
                Token::Less => BinOp::Lt,
                Token::LessEqual => BinOp::Le,
                Token::Greater => BinOp::Gt,
                Token::GreaterEqual => BinOp::Ge,
                _ => break,
            };
            self.advance()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(self.concat_expr()?));
        }
        Ok(expr)
    }

    /// `..` is right-associative, so the right operand recurses at this same
    /// level instead of looping.
    fn concat_expr(&mut self) -> Result<Expr, ParserError> {
        let expr = self.add_expr()?;
        if self.advance_if(Token::DotDot)? {
            Ok(Expr::Binary(
                BinOp::Concat,
                Box::new(expr),
                Box::new(self.concat_expr()?),
            ))
        } else {
            Ok(expr)
        }
    }

    fn add_expr(&mut self) -> Result<Expr, ParserError> {
        let mut expr = self.mul_expr()?;
        loop {
            let op = match self.current {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(self.mul_expr()?));
        }
        Ok(expr)
    }

    fn mul_expr(&mut self) -> Result<Expr, ParserError> {
        let mut expr = self.unary()?;
        loop {
            let op = match self.current {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Rem,
                _ => break,
            };
            self.advance()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(self.unary()?));
        }
        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr, ParserError> {
        let op = match self.current {
            Token::Not => UnOp::Not,
            Token::Minus => UnOp::Neg,
            Token::Hash => UnOp::Len,
            Token::Tilde => UnOp::BitNot,
            _ => return self.postfix(),
        };
        self.advance()?;
        Ok(Expr::Unary(op, Box::new(self.unary()?)))
    }

    /// Parse a primary expression followed by any chain of calls, index, and
    /// member steps.  Each step wraps the tree built so far, so `a.b[c](d).e`
    /// comes out left-leaning.
    fn postfix(&mut self) -> Result<Expr, ParserError> {
        let mut expr = self.primary()?;
        loop {
            match self.current {
                Token::LeftParen => {
                    self.advance()?;
                    let mut args = vec![];
                    if self.current != Token::RightParen {
                        args = self.expression_list()?;
                    }
                    self.expect(Token::RightParen)?;
                    expr = Expr::Call(Box::new(expr), args);
                }
                Token::LeftBracket => {
                    self.advance()?;
                    let key = self.expression()?;
                    self.expect(Token::RightBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(key));
                }
                Token::Dot => {
                    self.advance()?;
                    let name = self.identifier()?;
                    expr = Expr::Member(Box::new(expr), name);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, ParserError> {
        match self.current.clone() {
            Token::Nil => {
                self.advance()?;
                Ok(Expr::Nil)
            }
            Token::True => {
                self.advance()?;
                Ok(Expr::Bool(true))
            }
            Token::False => {
                self.advance()?;
                Ok(Expr::Bool(false))
            }
            Token::Number(n) => {
                self.advance()?;
                Ok(Expr::Number(n))
            }
            Token::Str(s) => {
                self.advance()?;
                Ok(Expr::Str(s))
            }
            Token::Function => {
                self.advance()?;
                let func = self.func_rest(false)?;
                Ok(Expr::Function(Rc::new(func)))
            }
            Token::LeftParen => {
                self.advance()?;
                let expr = self.expression()?;
                self.expect(Token::RightParen)?;
                Ok(expr)
            }
            Token::LeftCurly => self.table_constructor(),
            Token::Identifier(sym) => {
                self.advance()?;
                Ok(Expr::Var(sym))
            }
            _ => Err(self.error(SyntaxError::ExpectedPrimary)),
        }
    }

    /// Current token is the opening curly brace.
    fn table_constructor(&mut self) -> Result<Expr, ParserError> {
        self.expect(Token::LeftCurly)?;
        let mut fields = vec![];
        while self.current != Token::RightCurly {
            let field = if matches!(self.current, Token::Identifier(_)) && self.next == Token::Equal
            {
                let name = self.identifier()?;
                self.expect(Token::Equal)?;
                Field::Named(name, self.expression()?)
            } else if self.advance_if(Token::LeftBracket)? {
                let key = self.expression()?;
                self.expect(Token::RightBracket)?;
                self.expect(Token::Equal)?;
                Field::Keyed(key, self.expression()?)
            } else {
                Field::Positional(self.expression()?)
            };
            fields.push(field);
            if !self.advance_if(Token::Comma)? {
                break;
            }
        }
        self.expect(Token::RightCurly)?;
        Ok(Expr::Table(fields))
    }

    fn identifier(&mut self) -> Result<Symbol, ParserError> {
        if let Token::Identifier(sym) = self.current.clone() {
            self.advance()?;
            Ok(sym)
        } else {
            Err(self.error(SyntaxError::ExpectedIdentifier))
        }
    }

    fn advance(&mut self) -> Result<(), ParserError> {
        let (pos, token) = self.scanner.get_token()?;
        self.current = std::mem::replace(&mut self.next, token);
        self.current_pos = self.next_pos;
        self.next_pos = pos;
        Ok(())
    }

    fn advance_if(&mut self, expected: Token) -> Result<bool, ParserError> {
        if self.current == expected {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParserError> {
        if self.current == expected {
            self.advance()
        } else {
            Err(self.error(SyntaxError::UnexpectedToken(
                self.current.to_string(),
                expected.to_string(),
            )))
        }
    }

    fn error(&self, error: SyntaxError) -> ParserError {
        ParserError::Syntax(FullSyntaxError {
            pos: self.current_pos,
            error,
        })
    }
}
