//! End-to-end programs run through the public entry point.

use std::cell::RefCell;
use std::rc::Rc;

use moonlet::interpreter::{execute, MoonletError};
use moonlet::{Table, Value};

fn run(source: &str) -> Result<Value, MoonletError> {
    execute(source, Some(Table::new()))
}

#[test]
fn precedence() -> Result<(), MoonletError> {
    assert_eq!(run("return 1 + 2 * 3")?, Value::Number(7.0));
    assert_eq!(run("return 1 * 2 + 3 * 4 + 5")?, Value::Number(19.0));
    Ok(())
}

#[test]
fn left_associativity() -> Result<(), MoonletError> {
    assert_eq!(run("return 10 - 4 - 3")?, Value::Number(3.0));
    assert_eq!(run("return 100 / 10 / 5")?, Value::Number(2.0));
    Ok(())
}

#[test]
fn numeric_for_sum() -> Result<(), MoonletError> {
    assert_eq!(
        run("local s = 0; for i = 1, 10 do s = s + i end; return s")?,
        Value::Number(55.0)
    );
    Ok(())
}

#[test]
fn recursive_fibonacci() -> Result<(), MoonletError> {
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
fn closure_keeps_captured_value() -> Result<(), MoonletError> {
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
fn closure_reads_and_writes_after_caller_returned() -> Result<(), MoonletError> {
    let prg = "
        local function pair()
            local state = 10
            local get = function() return state end
            local bump = function(n) state = state + n end
            return {get = get, bump = bump}
        end
        local p = pair()
        p.bump(5)
        p.bump(1)
        return p.get()
    ";
    assert_eq!(run(prg)?, Value::Number(16.0));
    Ok(())
}

#[test]
fn multi_value_return_collapses_to_first() -> Result<(), MoonletError> {
    assert_eq!(
        run("local t = {a = 1, [2] = \"two\", 3}; return t.a, t[2], t[1]")?,
        Value::Number(1.0)
    );
    Ok(())
}

#[test]
fn repeat_until() -> Result<(), MoonletError> {
    assert_eq!(
        run("local i = 0; repeat i = i + 1 until i == 3; return i")?,
        Value::Number(3.0)
    );
    Ok(())
}

#[test]
fn do_block_shadowing() -> Result<(), MoonletError> {
    assert_eq!(
        run("local x = 1; do local x = 2 end; return x")?,
        Value::Number(1.0)
    );
    Ok(())
}

#[test]
fn short_circuit_never_calls_the_right_operand() -> Result<(), MoonletError> {
    let calls = Rc::new(RefCell::new(0));
    let sandbox = Table::new();
    let counter = calls.clone();
    sandbox.set_name(
        "f",
        Value::builtin("f", move |_| {
            *counter.borrow_mut() += 1;
            Ok(Value::Bool(true))
        }),
    );
    execute("return false and f()", Some(sandbox.clone()))?;
    execute("return true or f()", Some(sandbox))?;
    assert_eq!(*calls.borrow(), 0);
    Ok(())
}

#[test]
fn method_sugar_defines_a_table_entry() -> Result<(), MoonletError> {
    let prg = "
        local stack = {n = 0}
        function stack:push(v)
            self.n = self.n + 1
            self[self.n] = v
        end
        stack.push(stack, 'a')
        stack.push(stack, 'b')
        return stack[stack.n]
    ";
    assert_eq!(run(prg)?, Value::string("b"));
    Ok(())
}

#[test]
fn string_concat_and_length() -> Result<(), MoonletError> {
    assert_eq!(
        run("local s = 'count: ' .. #'abc'; return s")?,
        Value::string("count: 3")
    );
    Ok(())
}

#[test]
fn default_sandbox_when_none_given() -> Result<(), MoonletError> {
    assert_eq!(execute("return sqrt(16)", None)?, Value::Number(4.0));
    Ok(())
}

#[test]
fn sandbox_round_trip() -> Result<(), MoonletError> {
    let sandbox = Table::new();
    sandbox.set_name("seed", Value::Number(20.0));
    execute("grown = seed * 2 + 2", Some(sandbox.clone()))?;
    assert_eq!(sandbox.get_name("grown"), Value::Number(42.0));
    Ok(())
}

#[test]
fn runtime_failure_carries_stage_label() {
    match run("local t = nil; return t.x") {
        Err(e) => assert_eq!(
            e.to_string(),
            "execution failed: attempt to index a nil value"
        ),
        r => panic!("unexpected output: {:?}", r),
    }
}
