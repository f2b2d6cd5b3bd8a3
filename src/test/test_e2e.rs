//! The six end-to-end scenarios, each checked once for the literal
//! `print`-based source and once by trading `print` for `return` so the
//! result can be asserted on directly.

use crate::lua_value::LuaValue;
use crate::{execute, LuaVm};

fn run(source: &str) -> Vec<LuaValue> {
    execute(source, "e2e").unwrap_or_else(|e| panic!("{source}\n{e}"))
}

#[test]
fn scenario_1_print_sum() {
    run("print(1+2)");
    assert_eq!(run("return 1+2"), vec![LuaValue::Integer(3)]);
}

#[test]
fn scenario_2_table_length_and_index() {
    run("local t={10,20,30}; print(#t, t[2])");
    assert_eq!(run("local t={10,20,30}; return #t, t[2]"), vec![LuaValue::Integer(3), LuaValue::Integer(20)]);
}

#[test]
fn scenario_3_varargs_and_select() {
    run("local function f(a,...) return a, select('#', ...) end; print(f(1,2,3,4))");
    assert_eq!(
        run("local function f(a,...) return a, select('#', ...) end; return f(1,2,3,4)"),
        vec![LuaValue::Integer(1), LuaValue::Integer(3)]
    );
}

#[test]
fn scenario_4_numeric_for_accumulation() {
    run("local s=0; for i=1,10 do s=s+i end; print(s)");
    assert_eq!(run("local s=0; for i=1,10 do s=s+i end; return s"), vec![LuaValue::Integer(55)]);
}

#[test]
fn scenario_5_upvalue_capture_and_closing() {
    let source = "local function make() local x=0; return function() x=x+1; return x end end
                  local c=make(); c(); c(); return c()";
    assert_eq!(run(source), vec![LuaValue::Integer(3)]);
}

#[test]
fn scenario_6_pcall_reports_error_with_position() {
    let results = run("local ok,err = pcall(function() error(\"boom\") end); return ok, err");
    assert_eq!(results[0], LuaValue::Boolean(false));
    match &results[1] {
        LuaValue::Str(s) => {
            assert!(s.starts_with("e2e:"), "missing chunk:line prefix: {s}");
            assert!(s.ends_with("boom"), "missing message: {s}");
        }
        other => panic!("expected string error value, got {other:?}"),
    }
}

#[test]
fn scenario_5_separate_closures_do_not_share_state() {
    let source = "local function make() local x=0; return function() x=x+1; return x end end
                  local c1=make(); local c2=make(); c1(); c1(); c2();
                  return c1(), c2()";
    assert_eq!(run(source), vec![LuaValue::Integer(3), LuaValue::Integer(2)]);
}

#[test]
fn reusing_one_vm_across_chunks_shares_globals() {
    let mut vm = LuaVm::new();
    vm.open_libs();
    crate::execute_with_vm(&mut vm, "g = 41", "a").unwrap();
    let result = crate::execute_with_vm(&mut vm, "return g + 1", "b").unwrap();
    assert_eq!(result, vec![LuaValue::Integer(42)]);
}
