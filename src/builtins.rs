//! Host functions installed into the default sandbox.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::eval::{RuntimeError, Table, Value};

/// Builds the sandbox used when the caller does not supply one: the standard
/// host bindings.  Callers that need to capture output or restrict the
/// program's reach pass their own table instead.
pub fn default_sandbox() -> Table {
    let sandbox = Table::new();
    sandbox.set_name("print", Value::builtin("print", builtin_print));
    sandbox.set_name("type", Value::builtin("type", builtin_type));
    sandbox.set_name("tostring", Value::builtin("tostring", builtin_tostring));
    sandbox.set_name("clock", Value::builtin("clock", builtin_clock));
    sandbox.set_name("sqrt", Value::builtin("sqrt", builtin_sqrt));
    sandbox
}

fn builtin_print(args: &[Value]) -> Result<Value, RuntimeError> {
    let line = args
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join("\t");
    println!("{}", line);
    Ok(Value::Nil)
}

fn builtin_type(args: &[Value]) -> Result<Value, RuntimeError> {
    match args.first() {
        Some(v) => Ok(Value::string(v.type_name())),
        None => Err(RuntimeError::BadArgument(
            "type",
            "value expected".to_string(),
        )),
    }
}

fn builtin_tostring(args: &[Value]) -> Result<Value, RuntimeError> {
    match args.first() {
        Some(v) => Ok(Value::string(&v.to_string())),
        None => Err(RuntimeError::BadArgument(
            "tostring",
            "value expected".to_string(),
        )),
    }
}

fn builtin_clock(_args: &[Value]) -> Result<Value, RuntimeError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Ok(Value::Number(now.as_secs_f64()))
}

fn builtin_sqrt(args: &[Value]) -> Result<Value, RuntimeError> {
    match args.first() {
        Some(Value::Number(n)) => Ok(Value::Number(n.sqrt())),
        _ => Err(RuntimeError::BadArgument(
            "sqrt",
            "number expected".to_string(),
        )),
    }
}
