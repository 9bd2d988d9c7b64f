//! Tree-walking evaluator: runtime values, environments, and execution.

use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem;
use std::rc::Rc;

use ordered_float::OrderedFloat;
use thiserror::Error;

use crate::ast::{BinOp, Block, Expr, Field, FuncBody, FunctionTarget, Stmt, UnOp};
use crate::interner::Symbol;

/// A runtime value.
///
/// Primitives compare structurally; tables and functions compare by identity.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Table(Table),
    Function(Function),
}

impl Value {
    /// Only `nil` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
            Value::Function(_) => "function",
        }
    }

    pub fn string(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }

    /// Wraps a host function so it can live in a sandbox table.
    pub fn builtin<F>(name: &str, func: F) -> Value
    where
        F: Fn(&[Value]) -> Result<Value, RuntimeError> + 'static,
    {
        Value::Function(Function::Builtin(Rc::new(Builtin {
            name: name.to_string(),
            func: Box::new(func),
        })))
    }

    fn into_key(self) -> Result<Key, RuntimeError> {
        match self {
            Value::Nil => Err(RuntimeError::NilTableKey),
            Value::Bool(b) => Ok(Key::Bool(b)),
            Value::Number(n) => Ok(Key::Number(OrderedFloat(n))),
            Value::Str(s) => Ok(Key::Str(s)),
            Value::Table(t) => Ok(Key::Table(t)),
            Value::Function(f) => Ok(Key::Function(f)),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(l), Value::Bool(r)) => l == r,
            (Value::Number(l), Value::Number(r)) => l == r,
            (Value::Str(l), Value::Str(r)) => l == r,
            (Value::Table(l), Value::Table(r)) => l.ptr_eq(r),
            (Value::Function(l), Value::Function(r)) => l.addr() == r.addr(),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::Table(t) => write!(f, "table: {:p}", Rc::as_ptr(&t.0)),
            Value::Function(Function::Builtin(b)) => write!(f, "function: builtin '{}'", b.name),
            Value::Function(Function::Closure(c)) => write!(f, "function: {:p}", Rc::as_ptr(c)),
        }
    }
}

/// The sole compound data structure: a shared, mutable map from non-nil
/// values to values.  Cloning a `Table` clones the handle, not the contents.
#[derive(Clone, Default)]
pub struct Table(Rc<RefCell<HashMap<Key, Value>>>);

impl Table {
    pub fn new() -> Table {
        Table::default()
    }

    pub fn get(&self, key: &Key) -> Value {
        self.0.borrow().get(key).cloned().unwrap_or(Value::Nil)
    }

    /// Storing nil removes the entry, so a table only ever holds non-nil
    /// values and its length is the count of live entries.
    pub fn set(&self, key: Key, value: Value) {
        if let Value::Nil = value {
            self.0.borrow_mut().remove(&key);
        } else {
            self.0.borrow_mut().insert(key, value);
        }
    }

    pub fn get_name(&self, name: &str) -> Value {
        self.get(&Key::Str(Rc::from(name)))
    }

    pub fn set_name(&self, name: &str, value: Value) {
        self.set(Key::Str(Rc::from(name)), value);
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    fn ptr_eq(&self, other: &Table) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

// Tables can contain themselves; print the handle, not the contents.
impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Table").field(&Rc::as_ptr(&self.0)).finish()
    }
}

/// A table key: any non-nil value.  Strings and numbers hash by content,
/// tables and functions by identity.
#[derive(Debug, Clone)]
pub enum Key {
    Bool(bool),
    Number(OrderedFloat<f64>),
    Str(Rc<str>),
    Table(Table),
    Function(Function),
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Key::Bool(l), Key::Bool(r)) => l == r,
            (Key::Number(l), Key::Number(r)) => l == r,
            (Key::Str(l), Key::Str(r)) => l == r,
            (Key::Table(l), Key::Table(r)) => l.ptr_eq(r),
            (Key::Function(l), Key::Function(r)) => l.addr() == r.addr(),
            _ => false,
        }
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        mem::discriminant(self).hash(state);
        match self {
            Key::Bool(b) => b.hash(state),
            Key::Number(n) => n.hash(state),
            Key::Str(s) => s.hash(state),
            Key::Table(t) => (Rc::as_ptr(&t.0) as usize).hash(state),
            Key::Function(f) => f.addr().hash(state),
        }
    }
}

/// A callable value: either a host-supplied builtin or a closure over its
/// defining environment.
#[derive(Clone)]
pub enum Function {
    Builtin(Rc<Builtin>),
    Closure(Rc<Closure>),
}

impl Function {
    fn addr(&self) -> usize {
        match self {
            Function::Builtin(b) => Rc::as_ptr(b) as usize,
            Function::Closure(c) => Rc::as_ptr(c) as usize,
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Builtin(b) => b.fmt(f),
            Function::Closure(c) => c.fmt(f),
        }
    }
}

pub struct Builtin {
    name: String,
    func: Box<dyn Fn(&[Value]) -> Result<Value, RuntimeError>>,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builtin")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

pub struct Closure {
    func: Rc<FuncBody>,
    env: Rc<Env>,
}

// The captured environment can contain this closure; print the parameter
// list only.
impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("params", &self.func.params)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("division by zero")]
    DivByZero,
    #[error("attempt to perform arithmetic on a {0} value")]
    ArithmeticOnNonNumber(&'static str),
    #[error("attempt to compare {0} with {1}")]
    BadComparison(&'static str, &'static str),
    #[error("attempt to call a non-function value (a {0} value)")]
    NotCallable(&'static str),
    #[error("attempt to index a {0} value")]
    NotIndexable(&'static str),
    #[error("attempt to get length of a {0} value")]
    BadLength(&'static str),
    #[error("table index is nil")]
    NilTableKey,
    #[error("invalid assignment target")]
    InvalidAssignmentTarget,
    #[error("'for' {0} must be a number")]
    BadForBound(&'static str),
    #[error("'for' step is zero")]
    ZeroForStep,
    #[error("break outside a loop")]
    BreakOutsideLoop,
    #[error("bad argument to '{0}': {1}")]
    BadArgument(&'static str, String),
}

/// What a statement hands back to its enclosing block: a plain value, or one
/// of the control-flow escapes that bubble through nested blocks until a
/// loop (`Break`) or a function call (`Return`) catches them.
#[derive(Debug, PartialEq)]
enum Flow {
    Value(Value),
    Return(Vec<Value>),
    Break,
}

/// A lexical scope: bindings plus a parent link, with the shared sandbox
/// table as the final lookup fallback.
#[derive(Debug)]
pub struct Env {
    parent: Option<Rc<Env>>,
    sandbox: Table,
    // Set on the program root scope only: every write that lands here is
    // copied into the sandbox so callers can inspect top-level bindings.
    mirrors_sandbox: bool,
    bindings: RefCell<HashMap<Symbol, Value>>,
}

impl Env {
    fn root(sandbox: Table) -> Rc<Env> {
        Rc::new(Env {
            parent: None,
            sandbox,
            mirrors_sandbox: true,
            bindings: RefCell::new(HashMap::new()),
        })
    }

    fn with_parent(parent: &Rc<Env>) -> Rc<Env> {
        Rc::new(Env {
            parent: Some(parent.clone()),
            sandbox: parent.sandbox.clone(),
            mirrors_sandbox: false,
            bindings: RefCell::new(HashMap::new()),
        })
    }

    fn get(&self, sym: &Symbol) -> Value {
        if let Some(v) = self.bindings.borrow().get(sym) {
            return v.clone();
        }
        match &self.parent {
            Some(parent) => parent.get(sym),
            None => self.sandbox.get_name(sym.name()),
        }
    }

    /// Creates or overwrites an own slot, shadowing any ancestor binding.
    fn declare(&self, sym: &Symbol, val: Value) {
        if self.mirrors_sandbox {
            self.sandbox.set_name(sym.name(), val.clone());
        }
        self.bindings.borrow_mut().insert(sym.clone(), val);
    }

    /// Overwrites the innermost scope that owns `sym`; if none does, the
    /// name springs into existence in this scope.
    fn assign(&self, sym: &Symbol, val: Value) {
        if !self.try_assign(sym, &val) {
            self.declare(sym, val);
        }
    }

    fn try_assign(&self, sym: &Symbol, val: &Value) -> bool {
        if let Entry::Occupied(mut entry) = self.bindings.borrow_mut().entry(sym.clone()) {
            entry.insert(val.clone());
            if self.mirrors_sandbox {
                self.sandbox.set_name(sym.name(), val.clone());
            }
            true
        } else {
            self.parent
                .as_ref()
                .is_some_and(|parent| parent.try_assign(sym, val))
        }
    }
}

/// Walks the AST, threading an environment chain.
#[derive(Debug)]
pub struct Evaluator {
    root: Rc<Env>,
}

impl Evaluator {
    pub fn new(sandbox: Table) -> Evaluator {
        Evaluator {
            root: Env::root(sandbox),
        }
    }

    pub fn sandbox(&self) -> Table {
        self.root.sandbox.clone()
    }

    /// Runs a program block directly in the root scope and returns its
    /// result: the first value of a terminating `return`, or the last
    /// statement's value.
    pub fn eval_program(&self, block: &Block) -> Result<Value, RuntimeError> {
        match self.eval_block_in(block, self.root.clone())? {
            Flow::Value(v) => Ok(v),
            Flow::Return(values) => Ok(values.into_iter().next().unwrap_or(Value::Nil)),
            Flow::Break => Err(RuntimeError::BreakOutsideLoop),
        }
    }

    /// Evaluates a block in a fresh child scope of `parent`.
    fn eval_block(&self, block: &Block, parent: &Rc<Env>) -> Result<Flow, RuntimeError> {
        self.eval_block_in(block, Env::with_parent(parent))
    }

    /// Evaluates a block in exactly the given scope.  `Return` and `Break`
    /// propagate unchanged; otherwise the block yields its last statement's
    /// value.
    fn eval_block_in(&self, block: &Block, env: Rc<Env>) -> Result<Flow, RuntimeError> {
        let mut last = Value::Nil;
        for stmt in block {
            match self.eval_stmt(stmt, &env)? {
                Flow::Value(v) => last = v,
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Value(last))
    }

    fn eval_stmt(&self, stmt: &Stmt, env: &Rc<Env>) -> Result<Flow, RuntimeError> {
        match stmt {
            Stmt::Expr(e) => Ok(Flow::Value(self.eval_expr(e, env)?)),
            Stmt::Local(names, inits) => {
                let mut values = Vec::with_capacity(inits.len());
                for init in inits {
                    values.push(self.eval_expr(init, env)?);
                }
                for (i, name) in names.iter().enumerate() {
                    let val = values.get(i).cloned().unwrap_or(Value::Nil);
                    env.declare(name, val);
                }
                Ok(Flow::Value(Value::Nil))
            }
            Stmt::LocalFunction(name, func) => {
                // The closure captures `env` itself, so once the name is
                // declared the body can call it recursively.
                let closure = self.make_closure(func, env);
                env.declare(name, closure);
                Ok(Flow::Value(Value::Nil))
            }
            Stmt::Assign(target, value) => {
                self.eval_assign(target, value, env)?;
                Ok(Flow::Value(Value::Nil))
            }
            Stmt::If(arms, else_block) => {
                for (cond, block) in arms {
                    if self.eval_expr(cond, env)?.is_truthy() {
                        return self.eval_block(block, env);
                    }
                }
                match else_block {
                    Some(block) => self.eval_block(block, env),
                    None => Ok(Flow::Value(Value::Nil)),
                }
            }
            Stmt::While(cond, body) => {
                while self.eval_expr(cond, env)?.is_truthy() {
                    match self.eval_block(body, env)? {
                        Flow::Break => break,
                        ret @ Flow::Return(_) => return Ok(ret),
                        Flow::Value(_) => (),
                    }
                }
                Ok(Flow::Value(Value::Nil))
            }
            Stmt::NumericFor {
                var,
                start,
                finish,
                step,
                body,
            } => self.eval_numeric_for(var, start, finish, step.as_ref(), body, env),
            Stmt::Repeat(body, cond) => {
                loop {
                    // The condition is evaluated in the body's scope so that
                    // locals declared in the body are visible to it.
                    let loop_env = Env::with_parent(env);
                    match self.eval_block_in(body, loop_env.clone())? {
                        Flow::Break => break,
                        ret @ Flow::Return(_) => return Ok(ret),
                        Flow::Value(_) => {
                            if self.eval_expr(cond, &loop_env)?.is_truthy() {
                                break;
                            }
                        }
                    }
                }
                Ok(Flow::Value(Value::Nil))
            }
            Stmt::Function(target, func) => {
                let closure = self.make_closure(func, env);
                match target {
                    FunctionTarget::Name(name) => env.assign(name, closure),
                    FunctionTarget::Method(owner, method) => {
                        let table = match env.get(owner) {
                            Value::Table(t) => t,
                            other => return Err(RuntimeError::NotIndexable(other.type_name())),
                        };
                        table.set_name(method.name(), closure);
                    }
                }
                Ok(Flow::Value(Value::Nil))
            }
            Stmt::Return(exprs) => {
                let mut values = Vec::with_capacity(exprs.len());
                for e in exprs {
                    values.push(self.eval_expr(e, env)?);
                }
                Ok(Flow::Return(values))
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Do(block) => self.eval_block(block, env),
        }
    }

    fn eval_assign(&self, target: &Expr, value: &Expr, env: &Rc<Env>) -> Result<(), RuntimeError> {
        match target {
            Expr::Var(sym) => {
                let val = self.eval_expr(value, env)?;
                env.assign(sym, val);
            }
            Expr::Index(prefix, key) => {
                let table = self.table_operand(prefix, env)?;
                let key = self.eval_expr(key, env)?.into_key()?;
                let val = self.eval_expr(value, env)?;
                table.set(key, val);
            }
            Expr::Member(prefix, name) => {
                let table = self.table_operand(prefix, env)?;
                let val = self.eval_expr(value, env)?;
                table.set_name(name.name(), val);
            }
            // The parser only builds the three target forms above; anything
            // else means the AST was constructed by hand.
            _ => return Err(RuntimeError::InvalidAssignmentTarget),
        }
        Ok(())
    }

    fn eval_numeric_for(
        &self,
        var: &Symbol,
        start: &Expr,
        finish: &Expr,
        step: Option<&Expr>,
        body: &Block,
        env: &Rc<Env>,
    ) -> Result<Flow, RuntimeError> {
        let start = self.number_operand(start, env, "initial value")?;
        let finish = self.number_operand(finish, env, "limit")?;
        let step = match step {
            Some(e) => self.number_operand(e, env, "step")?,
            None => 1.0,
        };
        if step == 0.0 {
            return Err(RuntimeError::ZeroForStep);
        }

        // One loop-private scope holds the variable across all iterations;
        // each iteration's body still gets its own child scope.
        let loop_env = Env::with_parent(env);
        let mut i = start;
        while (step > 0.0 && i <= finish) || (step < 0.0 && i >= finish) {
            loop_env.declare(var, Value::Number(i));
            match self.eval_block(body, &loop_env)? {
                Flow::Break => break,
                ret @ Flow::Return(_) => return Ok(ret),
                Flow::Value(_) => (),
            }
            i += step;
        }
        Ok(Flow::Value(Value::Nil))
    }

    fn number_operand(
        &self,
        expr: &Expr,
        env: &Rc<Env>,
        what: &'static str,
    ) -> Result<f64, RuntimeError> {
        match self.eval_expr(expr, env)? {
            Value::Number(n) => Ok(n),
            _ => Err(RuntimeError::BadForBound(what)),
        }
    }

    fn table_operand(&self, expr: &Expr, env: &Rc<Env>) -> Result<Table, RuntimeError> {
        match self.eval_expr(expr, env)? {
            Value::Table(t) => Ok(t),
            other => Err(RuntimeError::NotIndexable(other.type_name())),
        }
    }

    fn eval_expr(&self, expr: &Expr, env: &Rc<Env>) -> Result<Value, RuntimeError> {
        match expr {
            Expr::Nil => Ok(Value::Nil),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::string(s)),
            Expr::Var(sym) => Ok(env.get(sym)),
            Expr::Unary(op, operand) => {
                let val = self.eval_expr(operand, env)?;
                self.eval_unary(*op, val)
            }
            Expr::Binary(op, lhs, rhs) => self.eval_binary(*op, lhs, rhs, env),
            Expr::Call(callee, args) => {
                let callee = self.eval_expr(callee, env)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval_expr(arg, env)?);
                }
                self.call_value(callee, &values)
            }
            Expr::Function(func) => Ok(self.make_closure(func, env)),
            Expr::Index(prefix, key) => {
                let table = self.table_operand(prefix, env)?;
                let key = self.eval_expr(key, env)?.into_key()?;
                Ok(table.get(&key))
            }
            Expr::Member(prefix, name) => {
                let table = self.table_operand(prefix, env)?;
                Ok(table.get_name(name.name()))
            }
            Expr::Table(fields) => self.eval_table_constructor(fields, env),
        }
    }

    fn eval_unary(&self, op: UnOp, val: Value) -> Result<Value, RuntimeError> {
        match op {
            UnOp::Not => Ok(Value::Bool(!val.is_truthy())),
            UnOp::Neg => match val {
                Value::Number(n) => Ok(Value::Number(-n)),
                other => Err(RuntimeError::ArithmeticOnNonNumber(other.type_name())),
            },
            UnOp::BitNot => match val {
                Value::Number(n) => Ok(Value::Number(!(n as i64) as f64)),
                other => Err(RuntimeError::ArithmeticOnNonNumber(other.type_name())),
            },
            UnOp::Len => match val {
                Value::Str(s) => Ok(Value::Number(s.len() as f64)),
                Value::Table(t) => Ok(Value::Number(t.len() as f64)),
                other => Err(RuntimeError::BadLength(other.type_name())),
            },
        }
    }

    fn eval_binary(
        &self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        env: &Rc<Env>,
    ) -> Result<Value, RuntimeError> {
        // The logical operators must not evaluate their right operand
        // eagerly; everything else is strict and left-to-right.
        match op {
            BinOp::And => {
                let left = self.eval_expr(lhs, env)?;
                return if left.is_truthy() {
                    self.eval_expr(rhs, env)
                } else {
                    Ok(left)
                };
            }
            BinOp::Or => {
                let left = self.eval_expr(lhs, env)?;
                return if left.is_truthy() {
                    Ok(left)
                } else {
                    self.eval_expr(rhs, env)
                };
            }
            _ => (),
        }

        let left = self.eval_expr(lhs, env)?;
        let right = self.eval_expr(rhs, env)?;
        match op {
            BinOp::Eq => Ok(Value::Bool(left == right)),
            BinOp::Ne => Ok(Value::Bool(left != right)),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => match (&left, &right) {
                (Value::Number(l), Value::Number(r)) => Ok(Value::Bool(compare(op, l, r))),
                (Value::Str(l), Value::Str(r)) => {
                    Ok(Value::Bool(compare(op, &l.as_ref(), &r.as_ref())))
                }
                _ => Err(RuntimeError::BadComparison(
                    left.type_name(),
                    right.type_name(),
                )),
            },
            BinOp::Concat => Ok(Value::string(&format!("{}{}", left, right))),
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
                let (l, r) = match (&left, &right) {
                    (Value::Number(l), Value::Number(r)) => (*l, *r),
                    (Value::Number(_), other) | (other, _) => {
                        return Err(RuntimeError::ArithmeticOnNonNumber(other.type_name()));
                    }
                };
                match op {
                    BinOp::Add => Ok(Value::Number(l + r)),
                    BinOp::Sub => Ok(Value::Number(l - r)),
                    BinOp::Mul => Ok(Value::Number(l * r)),
                    BinOp::Rem => Ok(Value::Number(l % r)),
                    BinOp::Div => {
                        if r == 0.0 {
                            Err(RuntimeError::DivByZero)
                        } else {
                            Ok(Value::Number(l / r))
                        }
                    }
                    _ => unreachable!(),
                }
            }
            BinOp::And | BinOp::Or => unreachable!(),
        }
    }

    fn eval_table_constructor(
        &self,
        fields: &[Field],
        env: &Rc<Env>,
    ) -> Result<Value, RuntimeError> {
        let table = Table::new();
        let mut next_index = 1.0;
        for field in fields {
            match field {
                Field::Positional(e) => {
                    let val = self.eval_expr(e, env)?;
                    table.set(Key::Number(OrderedFloat(next_index)), val);
                    next_index += 1.0;
                }
                Field::Named(name, e) => {
                    let val = self.eval_expr(e, env)?;
                    table.set_name(name.name(), val);
                }
                Field::Keyed(key, e) => {
                    let key = self.eval_expr(key, env)?.into_key()?;
                    let val = self.eval_expr(e, env)?;
                    table.set(key, val);
                }
            }
        }
        Ok(Value::Table(table))
    }

    fn make_closure(&self, func: &Rc<FuncBody>, env: &Rc<Env>) -> Value {
        Value::Function(Function::Closure(Rc::new(Closure {
            func: func.clone(),
            env: env.clone(),
        })))
    }

    /// Calls a value with already-evaluated arguments.  Closure parameters
    /// bind positionally: missing arguments become nil, extras are dropped.
    pub fn call_value(&self, callee: Value, args: &[Value]) -> Result<Value, RuntimeError> {
        let func = match callee {
            Value::Function(f) => f,
            other => return Err(RuntimeError::NotCallable(other.type_name())),
        };
        match func {
            Function::Builtin(b) => (b.func)(args),
            Function::Closure(c) => {
                let call_env = Env::with_parent(&c.env);
                for (i, param) in c.func.params.iter().enumerate() {
                    call_env.declare(param, args.get(i).cloned().unwrap_or(Value::Nil));
                }
                match self.eval_block_in(&c.func.body, call_env)? {
                    Flow::Return(values) => Ok(values.into_iter().next().unwrap_or(Value::Nil)),
                    Flow::Value(_) => Ok(Value::Nil),
                    Flow::Break => Err(RuntimeError::BreakOutsideLoop),
                }
            }
        }
    }
}

fn compare<T: PartialOrd>(op: BinOp, l: &T, r: &T) -> bool {
    match op {
        BinOp::Lt => l < r,
        BinOp::Le => l <= r,
        BinOp::Gt => l > r,
        BinOp::Ge => l >= r,
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::Context;
    use crate::parser::Parser;
    use std::rc::Rc;

    fn run(input: &str) -> Result<Value, RuntimeError> {
        run_in_sandbox(input, Table::new())
    }

    fn run_in_sandbox(input: &str, sandbox: Table) -> Result<Value, RuntimeError> {
        let ctx = Context::new();
        let mut parser = Parser::new(input, ctx);
        let block = parser.parse_program().expect("parse error in test input");
        let evaluator = Evaluator::new(sandbox);
        evaluator.eval_program(&block)
    }

    #[test]
    fn arithmetic_with_precedence() -> Result<(), RuntimeError> {
        assert_eq!(run("return 1 + 2 * 3")?, Value::Number(7.0));
        Ok(())
    }

    #[test]
    fn subtraction_is_left_associative() -> Result<(), RuntimeError> {
        assert_eq!(run("return 10 - 4 - 3")?, Value::Number(3.0));
        Ok(())
    }

    #[test]
    fn division_by_zero() {
        match run("return 1 / 0") {
            Err(RuntimeError::DivByZero) => (),
            r => panic!("unexpected output: {:?}", r),
        }
    }

    #[test]
    fn arithmetic_on_nil() {
        match run("return 1 + nil") {
            Err(RuntimeError::ArithmeticOnNonNumber("nil")) => (),
            r => panic!("unexpected output: {:?}", r),
        }
    }

    #[test]
    fn modulo() -> Result<(), RuntimeError> {
        assert_eq!(run("return 7 % 3")?, Value::Number(1.0));
        Ok(())
    }

    #[test]
    fn string_comparison() -> Result<(), RuntimeError> {
        assert_eq!(run("return 'abc' < 'abd'")?, Value::Bool(true));
        Ok(())
    }

    #[test]
    fn comparing_mixed_types_fails() {
        match run("return 1 < 'x'") {
            Err(RuntimeError::BadComparison("number", "string")) => (),
            r => panic!("unexpected output: {:?}", r),
        }
    }

    #[test]
    fn equality_across_types_is_false() -> Result<(), RuntimeError> {
        assert_eq!(run("return 1 == '1'")?, Value::Bool(false));
        assert_eq!(run("return 1 ~= '1'")?, Value::Bool(true));
        Ok(())
    }

    #[test]
    fn concat_coerces_to_string() -> Result<(), RuntimeError> {
        assert_eq!(run("return 'n=' .. 42")?, Value::string("n=42"));
        assert_eq!(run("return 1 .. 2 .. 3")?, Value::string("123"));
        Ok(())
    }

    #[test]
    fn logical_operators_yield_operands() -> Result<(), RuntimeError> {
        assert_eq!(run("return nil or 'fallback'")?, Value::string("fallback"));
        assert_eq!(run("return 1 and 2")?, Value::Number(2.0));
        assert_eq!(run("return false and 2")?, Value::Bool(false));
        Ok(())
    }

    #[test]
    fn short_circuit_skips_right_operand() -> Result<(), RuntimeError> {
        // Calling nil would fail, so these only pass if the call is skipped.
        assert_eq!(run("return false and missing()")?, Value::Bool(false));
        assert_eq!(run("return true or missing()")?, Value::Bool(true));
        Ok(())
    }

    #[test]
    fn unary_operators() -> Result<(), RuntimeError> {
        assert_eq!(run("return -(1 + 2)")?, Value::Number(-3.0));
        assert_eq!(run("return not nil")?, Value::Bool(true));
        assert_eq!(run("return not 0")?, Value::Bool(false));
        assert_eq!(run("return #'abcd'")?, Value::Number(4.0));
        assert_eq!(run("return #{1, 2, 3}")?, Value::Number(3.0));
        assert_eq!(run("return ~0")?, Value::Number(-1.0));
        Ok(())
    }

    #[test]
    fn zero_is_truthy() -> Result<(), RuntimeError> {
        assert_eq!(run("if 0 then return 'yes' else return 'no' end")?, Value::string("yes"));
        Ok(())
    }

    #[test]
    fn unknown_variable_reads_nil() -> Result<(), RuntimeError> {
        assert_eq!(run("return missing")?, Value::Nil);
        Ok(())
    }

    #[test]
    fn local_shadows_outer_scope() -> Result<(), RuntimeError> {
        assert_eq!(
            run("local x = 1 do local x = 2 end return x")?,
            Value::Number(1.0)
        );
        Ok(())
    }

    #[test]
    fn assignment_reaches_outer_scope() -> Result<(), RuntimeError> {
        assert_eq!(
            run("local x = 1 do x = 2 end return x")?,
            Value::Number(2.0)
        );
        Ok(())
    }

    #[test]
    fn local_lists_pad_with_nil() -> Result<(), RuntimeError> {
        assert_eq!(run("local a, b = 1 return b")?, Value::Nil);
        assert_eq!(run("local a, b = 1, 2, 3 return a + b")?, Value::Number(3.0));
        Ok(())
    }

    #[test]
    fn if_elseif_else() -> Result<(), RuntimeError> {
        let prg = "
            local function pick(n)
                if n < 0 then
                    return 'negative'
                elseif n == 0 then
                    return 'zero'
                else
                    return 'positive'
                end
            end
            return pick(0) .. ' ' .. pick(-1) .. ' ' .. pick(3)
        ";
        assert_eq!(run(prg)?, Value::string("zero negative positive"));
        Ok(())
    }

    #[test]
    fn while_loop_with_break() -> Result<(), RuntimeError> {
        let prg = "
            local i = 0
            while true do
                i = i + 1
                if i == 5 then break end
            end
            return i
        ";
        assert_eq!(run(prg)?, Value::Number(5.0));
        Ok(())
    }

    #[test]
    fn numeric_for_sums() -> Result<(), RuntimeError> {
        assert_eq!(
            run("local s = 0 for i = 1, 10 do s = s + i end return s")?,
            Value::Number(55.0)
        );
        Ok(())
    }

    #[test]
    fn numeric_for_counts_down() -> Result<(), RuntimeError> {
        assert_eq!(
            run("local s = '' for i = 3, 1, -1 do s = s .. i end return s")?,
            Value::string("321")
        );
        Ok(())
    }

    #[test]
    fn numeric_for_with_negative_step_skips_ascending_range() -> Result<(), RuntimeError> {
        assert_eq!(
            run("local n = 0 for i = 1, 10, -1 do n = n + 1 end return n")?,
            Value::Number(0.0)
        );
        Ok(())
    }

    #[test]
    fn numeric_for_rejects_zero_step() {
        match run("for i = 1, 10, 0 do end") {
            Err(RuntimeError::ZeroForStep) => (),
            r => panic!("unexpected output: {:?}", r),
        }
    }

    #[test]
    fn repeat_condition_sees_body_locals() -> Result<(), RuntimeError> {
        let prg = "
            local i = 0
            repeat
                i = i + 1
                local done = i == 3
            until done
            return i
        ";
        assert_eq!(run(prg)?, Value::Number(3.0));
        Ok(())
    }

    #[test]
    fn repeat_runs_body_at_least_once() -> Result<(), RuntimeError> {
        assert_eq!(
            run("local i = 0 repeat i = i + 1 until true return i")?,
            Value::Number(1.0)
        );
        Ok(())
    }

    #[test]
    fn functions_return_nil_without_return() -> Result<(), RuntimeError> {
        assert_eq!(run("local function f() end return f()")?, Value::Nil);
        Ok(())
    }

    #[test]
    fn return_collapses_to_first_value() -> Result<(), RuntimeError> {
        assert_eq!(
            run("local function f() return 1, 2, 3 end return f()")?,
            Value::Number(1.0)
        );
        Ok(())
    }

    #[test]
    fn missing_arguments_become_nil() -> Result<(), RuntimeError> {
        assert_eq!(
            run("local function f(a, b) return b end return f(1)")?,
            Value::Nil
        );
        Ok(())
    }

    #[test]
    fn extra_arguments_are_dropped() -> Result<(), RuntimeError> {
        assert_eq!(
            run("local function f(a) return a end return f(1, 2, 3)")?,
            Value::Number(1.0)
        );
        Ok(())
    }

    #[test]
    fn recursion() -> Result<(), RuntimeError> {
        let prg = "
            local function fib(n)
                if n <= 1 then return n end
                return fib(n - 1) + fib(n - 2)
            end
            return fib(10)
        ";
        assert_eq!(run(prg)?, Value::Number(55.0));
        Ok(())
    }

    #[test]
    fn closure_captures_defining_environment() -> Result<(), RuntimeError> {
        let prg = "
            local function mk(x)
                return function() return x end
            end
            local g = mk(42)
            return g()
        ";
        assert_eq!(run(prg)?, Value::Number(42.0));
        Ok(())
    }

    #[test]
    fn closure_writes_to_captured_environment() -> Result<(), RuntimeError> {
        let prg = "
            local function counter()
                local n = 0
                return function()
                    n = n + 1
                    return n
                end
            end
            local tick = counter()
            tick()
            tick()
            return tick()
        ";
        assert_eq!(run(prg)?, Value::Number(3.0));
        Ok(())
    }

    #[test]
    fn call_non_function() {
        match run("local x = 1 return x()") {
            Err(RuntimeError::NotCallable("number")) => (),
            r => panic!("unexpected output: {:?}", r),
        }
    }

    #[test]
    fn table_constructor_and_access() -> Result<(), RuntimeError> {
        let prg = "local t = {a = 1, [2] = 'two', 3} return t.a";
        assert_eq!(run(prg)?, Value::Number(1.0));
        let prg = "local t = {a = 1, [2] = 'two', 3} return t[2]";
        assert_eq!(run(prg)?, Value::string("two"));
        let prg = "local t = {a = 1, [2] = 'two', 3} return t[1]";
        assert_eq!(run(prg)?, Value::Number(3.0));
        Ok(())
    }

    #[test]
    fn positional_fields_count_from_one() -> Result<(), RuntimeError> {
        assert_eq!(run("local t = {'a', 'b'} return t[1]")?, Value::string("a"));
        assert_eq!(run("local t = {'a', 'b'} return t[2]")?, Value::string("b"));
        Ok(())
    }

    #[test]
    fn table_mutation() -> Result<(), RuntimeError> {
        let prg = "
            local t = {}
            t.x = 1
            t['y'] = 2
            t[3] = 3
            return t.x + t.y + t[3]
        ";
        assert_eq!(run(prg)?, Value::Number(6.0));
        Ok(())
    }

    #[test]
    fn assigning_nil_removes_the_entry() -> Result<(), RuntimeError> {
        let prg = "
            local t = {1, 2, 3}
            t[2] = nil
            return #t
        ";
        assert_eq!(run(prg)?, Value::Number(2.0));
        Ok(())
    }

    #[test]
    fn tables_are_reference_values() -> Result<(), RuntimeError> {
        let prg = "
            local a = {}
            local b = a
            b.x = 42
            return a.x
        ";
        assert_eq!(run(prg)?, Value::Number(42.0));
        Ok(())
    }

    #[test]
    fn table_equality_is_identity() -> Result<(), RuntimeError> {
        assert_eq!(run("local a = {} local b = {} return a == b")?, Value::Bool(false));
        assert_eq!(run("local a = {} local b = a return a == b")?, Value::Bool(true));
        Ok(())
    }

    #[test]
    fn tables_can_key_tables() -> Result<(), RuntimeError> {
        let prg = "
            local k = {}
            local t = {}
            t[k] = 'found'
            return t[k]
        ";
        assert_eq!(run(prg)?, Value::string("found"));
        Ok(())
    }

    #[test]
    fn nil_table_key_is_rejected() {
        match run("local t = {} t[nil] = 1") {
            Err(RuntimeError::NilTableKey) => (),
            r => panic!("unexpected output: {:?}", r),
        }
    }

    #[test]
    fn indexing_nil_fails() {
        match run("return missing.field") {
            Err(RuntimeError::NotIndexable("nil")) => (),
            r => panic!("unexpected output: {:?}", r),
        }
    }

    #[test]
    fn method_definition_binds_self() -> Result<(), RuntimeError> {
        let prg = "
            local acc = {total = 0}
            function acc:add(n)
                self.total = self.total + n
                return self.total
            end
            acc.add(acc, 5)
            return acc.add(acc, 3)
        ";
        assert_eq!(run(prg)?, Value::Number(8.0));
        Ok(())
    }

    #[test]
    fn global_function_lands_in_sandbox() -> Result<(), RuntimeError> {
        let sandbox = Table::new();
        run_in_sandbox("function greet() return 'hi' end", sandbox.clone())?;
        match sandbox.get_name("greet") {
            Value::Function(_) => Ok(()),
            other => panic!("unexpected sandbox entry: {:?}", other),
        }
    }

    #[test]
    fn root_assignments_mirror_into_sandbox() -> Result<(), RuntimeError> {
        let sandbox = Table::new();
        run_in_sandbox("x = 42", sandbox.clone())?;
        assert_eq!(sandbox.get_name("x"), Value::Number(42.0));
        Ok(())
    }

    #[test]
    fn sandbox_bindings_are_readable() -> Result<(), RuntimeError> {
        let sandbox = Table::new();
        sandbox.set_name("answer", Value::Number(42.0));
        assert_eq!(
            run_in_sandbox("return answer", sandbox)?,
            Value::Number(42.0)
        );
        Ok(())
    }

    #[test]
    fn builtins_are_callable_from_source() -> Result<(), RuntimeError> {
        let sandbox = Table::new();
        sandbox.set_name(
            "double",
            Value::builtin("double", |args| match args.first() {
                Some(Value::Number(n)) => Ok(Value::Number(n * 2.0)),
                _ => Err(RuntimeError::BadArgument(
                    "double",
                    "number expected".to_string(),
                )),
            }),
        );
        assert_eq!(
            run_in_sandbox("return double(21)", sandbox)?,
            Value::Number(42.0)
        );
        Ok(())
    }

    #[test]
    fn builtin_side_effects_observe_argument_order() -> Result<(), RuntimeError> {
        let seen = Rc::new(RefCell::new(String::new()));
        let sandbox = Table::new();
        let log = seen.clone();
        sandbox.set_name(
            "note",
            Value::builtin("note", move |args| {
                for arg in args {
                    log.borrow_mut().push_str(&arg.to_string());
                }
                Ok(Value::Nil)
            }),
        );
        run_in_sandbox("note(1) note(2, 3) note(4)", sandbox)?;
        assert_eq!(*seen.borrow(), "1234");
        Ok(())
    }

    #[test]
    fn program_yields_last_statement_value() -> Result<(), RuntimeError> {
        assert_eq!(run("1 + 1\n2 + 2")?, Value::Number(4.0));
        Ok(())
    }

    #[test]
    fn break_outside_loop_fails() {
        match run("break") {
            Err(RuntimeError::BreakOutsideLoop) => (),
            r => panic!("unexpected output: {:?}", r),
        }
    }

    #[test]
    fn break_escapes_only_the_enclosing_loop() -> Result<(), RuntimeError> {
        let prg = "
            local n = 0
            for i = 1, 3 do
                for j = 1, 10 do
                    if j == 2 then break end
                    n = n + 1
                end
            end
            return n
        ";
        assert_eq!(run(prg)?, Value::Number(3.0));
        Ok(())
    }

    #[test]
    fn return_escapes_nested_blocks() -> Result<(), RuntimeError> {
        let prg = "
            local function f()
                for i = 1, 10 do
                    if i == 3 then return i end
                end
                return -1
            end
            return f()
        ";
        assert_eq!(run(prg)?, Value::Number(3.0));
        Ok(())
    }

    #[test]
    fn value_display() {
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Number(42.0).to_string(), "42");
        assert_eq!(Value::Number(4.5).to_string(), "4.5");
        assert_eq!(Value::string("hi").to_string(), "hi");
    }
}
