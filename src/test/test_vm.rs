use crate::lua_value::LuaValue;
use crate::execute;

fn run(source: &str) -> Vec<LuaValue> {
    execute(source, "vmtest").unwrap_or_else(|e| panic!("{source}\n{e}"))
}

fn run_err(source: &str) -> String {
    match execute(source, "vmtest") {
        Ok(v) => panic!("expected error, got {v:?}"),
        Err(e) => e.to_string(),
    }
}

#[test]
fn integer_arithmetic_stays_integer() {
    assert_eq!(run("return 7 // 2, 7 % 2"), vec![LuaValue::Integer(3), LuaValue::Integer(1)]);
}

#[test]
fn mixed_int_float_promotes_to_float() {
    assert_eq!(run("return 1 + 2.0"), vec![LuaValue::Float(3.0)]);
}

#[test]
fn division_is_always_float() {
    assert_eq!(run("return 4 / 2"), vec![LuaValue::Float(2.0)]);
}

#[test]
fn floor_division_rounds_toward_negative_infinity() {
    assert_eq!(run("return -7 // 2"), vec![LuaValue::Integer(-4)]);
}

#[test]
fn modulo_follows_divisor_sign() {
    assert_eq!(run("return -1 % 5"), vec![LuaValue::Integer(4)]);
}

#[test]
fn string_concat_coerces_numbers() {
    assert_eq!(run("return 'x=' .. 1 .. 'y'"), vec![LuaValue::string("x=1y")]);
}

#[test]
fn numeric_for_with_zero_step_errors() {
    let msg = run_err("for i=1,10,0 do end");
    assert!(msg.contains("'for' step is zero"), "{msg}");
}

#[test]
fn indexing_nil_is_a_runtime_error() {
    let msg = run_err("local t = nil; return t.x");
    assert!(msg.contains("attempt to index"), "{msg}");
}

#[test]
fn metatable_index_function_is_consulted() {
    let src = "local t = setmetatable({}, {__index = function(_, k) return k .. '!' end})
               return t.missing";
    assert_eq!(run(src), vec![LuaValue::string("missing!")]);
}

#[test]
fn metatable_index_table_chain_is_followed() {
    let src = "local base = {greet = 'hi'}
               local t = setmetatable({}, {__index = base})
               return t.greet";
    assert_eq!(run(src), vec![LuaValue::string("hi")]);
}

#[test]
fn metatable_newindex_function_intercepts_writes() {
    let src = "local log = {}
               local t = setmetatable({}, {__newindex = function(_, k, v) log[k] = v end})
               t.a = 1
               return log.a, rawget(t, 'a')";
    assert_eq!(run(src), vec![LuaValue::Integer(1), LuaValue::Nil]);
}

#[test]
fn metatable_arithmetic_dispatches_add() {
    let src = "local mt = {__add = function(a, b) return a.v + b end}
               local t = setmetatable({v = 10}, mt)
               return t + 5";
    assert_eq!(run(src), vec![LuaValue::Integer(15)]);
}

#[test]
fn metatable_eq_only_consulted_for_tables() {
    let src = "local mt = {__eq = function(a, b) return true end}
               local a, b = setmetatable({}, mt), setmetatable({}, mt)
               return a == b, a == a";
    assert_eq!(run(src), vec![LuaValue::Boolean(true), LuaValue::Boolean(true)]);
}

#[test]
fn table_length_finds_a_border_after_holes() {
    assert_eq!(run("local t = {1,2,3}; t[2] = nil; return (#t == 1 or #t == 3)"), vec![LuaValue::Boolean(true)]);
}

#[test]
fn multiple_assignment_adjusts_value_count() {
    assert_eq!(run("local a, b, c = 1, 2; return a, b, c"), vec![
        LuaValue::Integer(1),
        LuaValue::Integer(2),
        LuaValue::Nil,
    ]);
}

#[test]
fn varargs_forward_through_a_table_constructor() {
    let src = "local function f(...) local t = {...}; return #t end
               return f(1, 2, 3)";
    assert_eq!(run(src), vec![LuaValue::Integer(3)]);
}

#[test]
fn rawequal_bypasses_eq_metamethod() {
    let src = "local mt = {__eq = function() return true end}
               local a, b = setmetatable({}, mt), setmetatable({}, mt)
               return rawequal(a, b)";
    assert_eq!(run(src), vec![LuaValue::Boolean(false)]);
}

#[test]
fn pcall_recovers_and_execution_continues() {
    let src = "local ok = pcall(function() error('boom') end)
               return ok, 1 + 1";
    assert_eq!(run(src), vec![LuaValue::Boolean(false), LuaValue::Integer(2)]);
}

#[test]
fn deep_recursion_raises_stack_overflow_not_a_rust_panic() {
    let src = "local function f(n) return f(n + 1) end return f(0)";
    let msg = run_err(src);
    assert!(msg.contains("stack overflow"), "{msg}");
}
