//! The ambient standard library: the handful of global functions a Lua
//! program can always assume exist (`print`, `pcall`, `pairs`, ...).
//!
//! Grounded on the teacher's `stdlib/basic.rs` (`_G` function set and
//! doc-comment-per-function style), trimmed to the names the spec keeps in
//! scope — no `string`/`table`/`math`/`io`/`os` library tables, no
//! coroutines, no `load`/`require`.

use crate::lua_value::{Closure, LuaValue};
use crate::lua_vm::metamethod;
use crate::lua_vm::{LuaError, LuaState, LuaVmResult};

/// Install every ambient global into `state.globals`.
pub fn install(state: &mut LuaState) {
    let entries: &[(&'static str, crate::lua_value::HostFn)] = &[
        ("print", lua_print),
        ("type", lua_type),
        ("tostring", lua_tostring),
        ("tonumber", lua_tonumber),
        ("pairs", lua_pairs),
        ("ipairs", lua_ipairs),
        ("next", lua_next),
        ("pcall", lua_pcall),
        ("xpcall", lua_xpcall),
        ("error", lua_error),
        ("assert", lua_assert),
        ("select", lua_select),
        ("rawget", lua_rawget),
        ("rawset", lua_rawset),
        ("rawequal", lua_rawequal),
        ("rawlen", lua_rawlen),
        ("setmetatable", lua_setmetatable),
        ("getmetatable", lua_getmetatable),
        ("unpack", lua_unpack),
    ];
    for (name, func) in entries {
        let closure = Closure::host(*name, *func);
        state.globals.borrow_mut().set(LuaValue::string(*name), LuaValue::closure(closure));
    }
    state.globals.borrow_mut().set(LuaValue::string("_VERSION"), LuaValue::string("Lua 5.3"));
}

/// `print(...)`: write each argument's `tostring` form, tab-separated.
fn lua_print(_state: &mut LuaState, args: &[LuaValue]) -> LuaVmResult<Vec<LuaValue>> {
    let rendered: Vec<String> = args.iter().map(|v| v.to_lua_string()).collect();
    println!("{}", rendered.join("\t"));
    Ok(Vec::new())
}

fn lua_type(state: &mut LuaState, args: &[LuaValue]) -> LuaVmResult<Vec<LuaValue>> {
    let v = args.first().ok_or_else(|| state.raise(LuaError::RuntimeError, "bad argument #1 to 'type' (value expected)"))?;
    Ok(vec![LuaValue::string(v.type_name())])
}

fn lua_tostring(_state: &mut LuaState, args: &[LuaValue]) -> LuaVmResult<Vec<LuaValue>> {
    let v = args.first().cloned().unwrap_or(LuaValue::Nil);
    Ok(vec![LuaValue::string(v.to_lua_string())])
}

/// `tonumber(v [, base])`: with one numeric/string argument, parse it
/// preserving integer-vs-float; with a base, parse as an integer literal in
/// that base (strings only).
fn lua_tonumber(_state: &mut LuaState, args: &[LuaValue]) -> LuaVmResult<Vec<LuaValue>> {
    let v = args.first().cloned().unwrap_or(LuaValue::Nil);
    if let Some(base) = args.get(1) {
        let Some(base) = base.to_integer() else { return Ok(vec![LuaValue::Nil]) };
        let LuaValue::Str(s) = &v else { return Ok(vec![LuaValue::Nil]) };
        return Ok(vec![i64::from_str_radix(s.trim(), base as u32).map(LuaValue::Integer).unwrap_or(LuaValue::Nil)]);
    }
    match &v {
        LuaValue::Integer(_) | LuaValue::Float(_) => Ok(vec![v]),
        LuaValue::Str(s) => {
            let looks_float = {
                let t = s.trim().to_ascii_lowercase();
                t.contains('.') || t.contains('e') || t.contains('p') || t.contains("inf") || t.contains("nan")
            };
            if !looks_float {
                if let Some(i) = v.to_integer() {
                    return Ok(vec![LuaValue::Integer(i)]);
                }
            }
            Ok(vec![v.to_number().map(LuaValue::Float).unwrap_or(LuaValue::Nil)])
        }
        _ => Ok(vec![LuaValue::Nil]),
    }
}

fn lua_next(state: &mut LuaState, args: &[LuaValue]) -> LuaVmResult<Vec<LuaValue>> {
    let t = match args.first() {
        Some(LuaValue::Table(t)) => t.clone(),
        _ => return Err(state.raise(LuaError::RuntimeError, "bad argument #1 to 'next' (table expected)")),
    };
    let key = args.get(1).cloned().unwrap_or(LuaValue::Nil);
    match t.borrow().next(&key) {
        Ok(Some((k, v))) => Ok(vec![k, v]),
        Ok(None) => Ok(vec![LuaValue::Nil]),
        Err(_) => Err(state.raise(LuaError::RuntimeError, "invalid key to 'next'")),
    }
}

/// `pairs(t)`: `next`, `t`, `nil` — the stateless iterator triple `for`
/// unpacks into its control variables.
fn lua_pairs(state: &mut LuaState, args: &[LuaValue]) -> LuaVmResult<Vec<LuaValue>> {
    let t = args.first().cloned().unwrap_or(LuaValue::Nil);
    if !matches!(t, LuaValue::Table(_)) {
        return Err(state.raise(LuaError::RuntimeError, "bad argument #1 to 'pairs' (table expected)"));
    }
    let next_fn = LuaValue::closure(Closure::host("next", lua_next));
    Ok(vec![next_fn, t, LuaValue::Nil])
}

fn lua_ipairs_iter(state: &mut LuaState, args: &[LuaValue]) -> LuaVmResult<Vec<LuaValue>> {
    let t = args[0].clone();
    let i = args[1].to_integer().unwrap_or(0) + 1;
    let v = metamethod::index(state, t, LuaValue::Integer(i))?;
    if v.is_nil() {
        Ok(vec![LuaValue::Nil])
    } else {
        Ok(vec![LuaValue::Integer(i), v])
    }
}

/// `ipairs(t)`: iterates `t[1], t[2], ...` through `__index` until a nil,
/// matching the Lua 5.3 manual (5.2's raw-only `ipairs` was reverted).
fn lua_ipairs(state: &mut LuaState, args: &[LuaValue]) -> LuaVmResult<Vec<LuaValue>> {
    let t = args.first().cloned().unwrap_or(LuaValue::Nil);
    if !matches!(t, LuaValue::Table(_)) {
        return Err(state.raise(LuaError::RuntimeError, "bad argument #1 to 'ipairs' (table expected)"));
    }
    let iter_fn = LuaValue::closure(Closure::host("ipairs_iterator", lua_ipairs_iter));
    Ok(vec![iter_fn, t, LuaValue::Integer(0)])
}

/// `pcall(f, ...)`: call `f` and catch anything it raises. A failing call
/// always unwinds its own frames first (`execute::call_closure` pops its
/// frame on every return path), so there is nothing left to clean up here.
fn lua_pcall(state: &mut LuaState, args: &[LuaValue]) -> LuaVmResult<Vec<LuaValue>> {
    let Some((func, rest)) = args.split_first() else {
        return Err(state.raise(LuaError::RuntimeError, "bad argument #1 to 'pcall' (value expected)"));
    };
    match metamethod::call_value(state, func.clone(), rest.to_vec()) {
        Ok(mut results) => {
            let mut out = vec![LuaValue::Boolean(true)];
            out.append(&mut results);
            Ok(out)
        }
        Err(_) => {
            let msg = std::mem::replace(&mut state.error_value, LuaValue::Nil);
            Ok(vec![LuaValue::Boolean(false), msg])
        }
    }
}

/// `xpcall(f, handler, ...)`: like `pcall`, but a failing call's error value
/// is passed through `handler` before being returned.
fn lua_xpcall(state: &mut LuaState, args: &[LuaValue]) -> LuaVmResult<Vec<LuaValue>> {
    if args.len() < 2 {
        return Err(state.raise(LuaError::RuntimeError, "bad argument #2 to 'xpcall' (value expected)"));
    }
    let func = args[0].clone();
    let handler = args[1].clone();
    let rest = args[2..].to_vec();
    match metamethod::call_value(state, func, rest) {
        Ok(mut results) => {
            let mut out = vec![LuaValue::Boolean(true)];
            out.append(&mut results);
            Ok(out)
        }
        Err(_) => {
            let msg = std::mem::replace(&mut state.error_value, LuaValue::Nil);
            let handled = metamethod::call_value(state, handler, vec![msg])?;
            let mut out = vec![LuaValue::Boolean(false)];
            out.extend(handled);
            Ok(out)
        }
    }
}

/// `error(message [, level])`: string messages get a `chunk:line:` prefix
/// unless `level == 0`; any other value is raised verbatim.
fn lua_error(state: &mut LuaState, args: &[LuaValue]) -> LuaVmResult<Vec<LuaValue>> {
    let value = args.first().cloned().unwrap_or(LuaValue::Nil);
    let level = args.get(1).and_then(|v| v.to_integer()).unwrap_or(1);
    if let LuaValue::Str(s) = &value {
        if level != 0 {
            return Err(state.raise(LuaError::RuntimeError, s.to_string()));
        }
    }
    Err(state.raise_value(LuaError::RuntimeError, value))
}

fn lua_assert(state: &mut LuaState, args: &[LuaValue]) -> LuaVmResult<Vec<LuaValue>> {
    let cond = args.first().cloned().unwrap_or(LuaValue::Nil);
    if cond.is_truthy() {
        return Ok(args.to_vec());
    }
    match args.get(1) {
        Some(LuaValue::Str(s)) => Err(state.raise(LuaError::RuntimeError, s.to_string())),
        Some(other) => Err(state.raise_value(LuaError::RuntimeError, other.clone())),
        None => Err(state.raise(LuaError::RuntimeError, "assertion failed!")),
    }
}

fn lua_select(state: &mut LuaState, args: &[LuaValue]) -> LuaVmResult<Vec<LuaValue>> {
    let Some(first) = args.first() else {
        return Err(state.raise(LuaError::RuntimeError, "bad argument #1 to 'select' (number expected, got no value)"));
    };
    if let LuaValue::Str(s) = first {
        if &**s == "#" {
            return Ok(vec![LuaValue::Integer((args.len() - 1) as i64)]);
        }
    }
    let n = match first.to_integer() {
        Some(n) => n,
        None => return Err(state.raise(LuaError::RuntimeError, "bad argument #1 to 'select' (number expected)")),
    };
    let rest = &args[1..];
    if n < 0 {
        let idx = rest.len() as i64 + n;
        if idx < 0 {
            return Err(state.raise(LuaError::RuntimeError, "bad argument #1 to 'select' (index out of range)"));
        }
        return Ok(rest[idx as usize..].to_vec());
    }
    if n == 0 {
        return Err(state.raise(LuaError::RuntimeError, "bad argument #1 to 'select' (index out of range)"));
    }
    Ok(rest.get((n - 1) as usize..).map(<[LuaValue]>::to_vec).unwrap_or_default())
}

fn lua_rawget(state: &mut LuaState, args: &[LuaValue]) -> LuaVmResult<Vec<LuaValue>> {
    let t = match args.first() {
        Some(LuaValue::Table(t)) => t.clone(),
        _ => return Err(state.raise(LuaError::RuntimeError, "bad argument #1 to 'rawget' (table expected)")),
    };
    let key = args.get(1).cloned().unwrap_or(LuaValue::Nil);
    Ok(vec![t.borrow().get(&key)])
}

fn lua_rawset(state: &mut LuaState, args: &[LuaValue]) -> LuaVmResult<Vec<LuaValue>> {
    let t = match args.first() {
        Some(LuaValue::Table(t)) => t.clone(),
        _ => return Err(state.raise(LuaError::RuntimeError, "bad argument #1 to 'rawset' (table expected)")),
    };
    let key = args.get(1).cloned().unwrap_or(LuaValue::Nil);
    let val = args.get(2).cloned().unwrap_or(LuaValue::Nil);
    t.borrow_mut().set(key, val);
    Ok(vec![LuaValue::Table(t)])
}

fn lua_rawequal(_state: &mut LuaState, args: &[LuaValue]) -> LuaVmResult<Vec<LuaValue>> {
    let a = args.first().cloned().unwrap_or(LuaValue::Nil);
    let b = args.get(1).cloned().unwrap_or(LuaValue::Nil);
    Ok(vec![LuaValue::Boolean(a == b)])
}

fn lua_rawlen(state: &mut LuaState, args: &[LuaValue]) -> LuaVmResult<Vec<LuaValue>> {
    match args.first() {
        Some(LuaValue::Table(t)) => Ok(vec![LuaValue::Integer(t.borrow().length())]),
        Some(LuaValue::Str(s)) => Ok(vec![LuaValue::Integer(s.len() as i64)]),
        _ => Err(state.raise(LuaError::RuntimeError, "table or string expected")),
    }
}

fn lua_setmetatable(state: &mut LuaState, args: &[LuaValue]) -> LuaVmResult<Vec<LuaValue>> {
    let t = match args.first() {
        Some(LuaValue::Table(t)) => t.clone(),
        _ => return Err(state.raise(LuaError::RuntimeError, "bad argument #1 to 'setmetatable' (table expected)")),
    };
    if let Some(existing) = t.borrow().metatable() {
        if !existing.borrow().get_str("__metatable").is_nil() {
            return Err(state.raise(LuaError::RuntimeError, "cannot change a protected metatable"));
        }
    }
    match args.get(1) {
        Some(LuaValue::Table(mt)) => t.borrow_mut().set_metatable(Some(mt.clone())),
        Some(LuaValue::Nil) | None => t.borrow_mut().set_metatable(None),
        _ => return Err(state.raise(LuaError::RuntimeError, "bad argument #2 to 'setmetatable' (nil or table expected)")),
    }
    Ok(vec![LuaValue::Table(t)])
}

fn lua_getmetatable(_state: &mut LuaState, args: &[LuaValue]) -> LuaVmResult<Vec<LuaValue>> {
    let mt = match args.first() {
        Some(LuaValue::Table(t)) => t.borrow().metatable(),
        _ => None,
    };
    match mt {
        Some(mt) => {
            let protected = mt.borrow().get_str("__metatable");
            if protected.is_nil() {
                Ok(vec![LuaValue::Table(mt)])
            } else {
                Ok(vec![protected])
            }
        }
        None => Ok(vec![LuaValue::Nil]),
    }
}

/// `unpack(list [, i [, j]])`: the Lua 5.1-era global kept on since the spec
/// lists it in the ambient surface, equivalent to `table.unpack`.
fn lua_unpack(state: &mut LuaState, args: &[LuaValue]) -> LuaVmResult<Vec<LuaValue>> {
    let t = args.first().cloned().unwrap_or(LuaValue::Nil);
    if !matches!(t, LuaValue::Table(_)) {
        return Err(state.raise(LuaError::RuntimeError, "bad argument #1 to 'unpack' (table expected)"));
    }
    let i = args.get(1).and_then(|v| v.to_integer()).unwrap_or(1);
    let j = match args.get(2).and_then(|v| v.to_integer()) {
        Some(j) => j,
        None => match &t {
            LuaValue::Table(tr) => tr.borrow().length(),
            _ => unreachable!(),
        },
    };
    let mut out = Vec::new();
    let mut k = i;
    while k <= j {
        out.push(metamethod::index(state, t.clone(), LuaValue::Integer(k))?);
        k += 1;
    }
    Ok(out)
}
