//! API to control the interpreter.

use std::rc::Rc;

use thiserror::Error;

use crate::builtins;
use crate::ctx::Context;
use crate::diag::FullSyntaxError;
use crate::eval::{Evaluator, RuntimeError, Table, Value};
use crate::parser::{Parser, ParserError};
use crate::scanner::ScanError;

/// Errors the interpreter can raise, labeled with the pipeline stage that
/// produced them.
#[derive(Debug, Error)]
pub enum MoonletError {
    /// The scanner rejected the source text.
    #[error("lexical analysis failed: {0}")]
    Lex(ScanError),

    /// The source text did not match the grammar.
    #[error("parse failed: {0}")]
    Parse(FullSyntaxError),

    /// The program failed while running.
    #[error("execution failed: {0}")]
    Runtime(#[from] RuntimeError),
}

impl From<ParserError> for MoonletError {
    fn from(e: ParserError) -> MoonletError {
        match e {
            ParserError::Scan(e) => MoonletError::Lex(e),
            ParserError::Syntax(e) => MoonletError::Parse(e),
        }
    }
}

/// Tree-walk interpreter holding a sandbox and symbol context across runs.
///
/// # Example
///
/// Invoke the interpreter a first time to define a function, then additional
/// times to call it:
///
/// ```
/// use moonlet::interpreter::{Interpreter, MoonletError};
/// use moonlet::Value;
///
/// let mut interp = Interpreter::new();
///
/// let func_def = "
///     function max(x, y)
///         if x > y then
///             return x
///         end
///         return y
///     end
/// ";
/// interp.eval(func_def)?;
///
/// assert_eq!(interp.eval("return max(10, 20)")?, Value::Number(20.0));
/// assert_eq!(interp.eval("return max(5, 4)")?, Value::Number(5.0));
/// # Ok::<(), MoonletError>(())
/// ```
#[derive(Debug)]
pub struct Interpreter {
    ctx: Rc<Context>,
    evaluator: Evaluator,
}

impl Interpreter {
    /// Creates an interpreter with the default sandbox.
    pub fn new() -> Interpreter {
        Interpreter::with_sandbox(builtins::default_sandbox())
    }

    /// Creates an interpreter whose programs see exactly the given sandbox.
    pub fn with_sandbox(sandbox: Table) -> Interpreter {
        Interpreter {
            ctx: Context::new(),
            evaluator: Evaluator::new(sandbox),
        }
    }

    /// The global table this interpreter runs against.  Top-level writes made
    /// by evaluated programs are visible here afterwards.
    pub fn sandbox(&self) -> Table {
        self.evaluator.sandbox()
    }

    /// Runs one source text to completion and returns the program's result.
    pub fn eval(&mut self, source: &str) -> Result<Value, MoonletError> {
        let mut parser = Parser::new(source, self.ctx.clone());
        let block = parser.parse_program()?;
        Ok(self.evaluator.eval_program(&block)?)
    }
}

impl Default for Interpreter {
    fn default() -> Interpreter {
        Interpreter::new()
    }
}

/// One-shot convenience entry point: run `source` against `sandbox`, or
/// against the default sandbox when none is given.
pub fn execute(source: &str, sandbox: Option<Table>) -> Result<Value, MoonletError> {
    let mut interp = match sandbox {
        Some(sandbox) => Interpreter::with_sandbox(sandbox),
        None => Interpreter::new(),
    };
    interp.eval(source)
}
