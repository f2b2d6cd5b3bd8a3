//! Metamethod event dispatch: `__index`, `__newindex`, arithmetic, ordering,
//! `__concat`, `__len`, `__call`.
//!
//! Grounded on the teacher's `lua_vm/execute/metamethod.rs` event-name
//! table and its chased-`__index` loop guard (`MAXTAGLOOP`), adapted to
//! this crate's single `Rc<RefCell<LuaTable>>` table representation (no
//! userdata, so only tables carry a metatable).

use crate::lua_value::{LuaValue, TableRef};
use crate::lua_vm::execute::call_closure;
use crate::lua_vm::lua_error::LuaError;
use crate::lua_vm::lua_limits::MAXTAGLOOP;
use crate::lua_vm::LuaState;

/// Metamethod event names, exactly as the reference implementation spells
/// them (the leading `__` is part of the table key).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Unm,
    BNot,
    Concat,
    Len,
    Eq,
    Lt,
    Le,
    Index,
    NewIndex,
    Call,
}

impl Event {
    pub fn name(self) -> &'static str {
        match self {
            Event::Add => "__add",
            Event::Sub => "__sub",
            Event::Mul => "__mul",
            Event::Mod => "__mod",
            Event::Pow => "__pow",
            Event::Div => "__div",
            Event::IDiv => "__idiv",
            Event::BAnd => "__band",
            Event::BOr => "__bor",
            Event::BXor => "__bxor",
            Event::Shl => "__shl",
            Event::Shr => "__shr",
            Event::Unm => "__unm",
            Event::BNot => "__bnot",
            Event::Concat => "__concat",
            Event::Len => "__len",
            Event::Eq => "__eq",
            Event::Lt => "__lt",
            Event::Le => "__le",
            Event::Index => "__index",
            Event::NewIndex => "__newindex",
            Event::Call => "__call",
        }
    }
}

/// A value's metatable, if it has one. Only tables carry metatables in this
/// implementation (no userdata; strings have no shared string-library
/// metatable since `string.*` is out of scope — see DESIGN.md).
pub fn get_metatable(v: &LuaValue) -> Option<TableRef> {
    match v {
        LuaValue::Table(t) => t.borrow().metatable(),
        _ => None,
    }
}

fn metamethod_of(v: &LuaValue, event: Event) -> Option<LuaValue> {
    let mt = get_metatable(v)?;
    let handler = mt.borrow().get_str(event.name());
    if handler.is_nil() {
        None
    } else {
        Some(handler)
    }
}

fn binary_metamethod(a: &LuaValue, b: &LuaValue, event: Event) -> Option<LuaValue> {
    metamethod_of(a, event).or_else(|| metamethod_of(b, event))
}

/// Call `handler(args...)`, returning its first result (the convention for
/// every metamethod except `__index`'s table form, which callers special-case).
pub fn call_handler(state: &mut LuaState, handler: LuaValue, args: Vec<LuaValue>) -> Result<LuaValue, LuaError> {
    match handler {
        LuaValue::Closure(c) => {
            let mut results = call_closure(state, c, args)?;
            Ok(if results.is_empty() { LuaValue::Nil } else { results.remove(0) })
        }
        other => Err(state.raise(LuaError::NotCallable, format!("attempt to call a {} value", other.type_name()))),
    }
}

/// Dispatch an arithmetic/bitwise binary metamethod, or raise a type error
/// naming the offending operand if neither side has one.
pub fn arith(state: &mut LuaState, event: Event, a: LuaValue, b: LuaValue) -> Result<LuaValue, LuaError> {
    if let Some(h) = binary_metamethod(&a, &b, event) {
        return call_handler(state, h, vec![a, b]);
    }
    let bad = if a.to_number().is_none() { &a } else { &b };
    Err(state.raise(LuaError::RuntimeError, format!("attempt to perform arithmetic on a {} value", bad.type_name())))
}

pub fn unary_arith(state: &mut LuaState, event: Event, a: LuaValue) -> Result<LuaValue, LuaError> {
    if let Some(h) = metamethod_of(&a, event) {
        return call_handler(state, h, vec![a.clone(), a]);
    }
    Err(state.raise(LuaError::RuntimeError, format!("attempt to perform arithmetic on a {} value", a.type_name())))
}

/// `__concat`: tried when at least one side is neither a string nor a number.
pub fn concat(state: &mut LuaState, a: LuaValue, b: LuaValue) -> Result<LuaValue, LuaError> {
    if let Some(h) = binary_metamethod(&a, &b, Event::Concat) {
        return call_handler(state, h, vec![a, b]);
    }
    let bad = if coercible_to_string(&a) { &b } else { &a };
    Err(state.raise(LuaError::RuntimeError, format!("attempt to concatenate a {} value", bad.type_name())))
}

fn coercible_to_string(v: &LuaValue) -> bool {
    matches!(v, LuaValue::Str(_) | LuaValue::Integer(_) | LuaValue::Float(_))
}

/// `__len`: tried for tables with a `__len` entry (and required for every
/// other non-string type, which has no raw length).
pub fn len(state: &mut LuaState, v: &LuaValue) -> Result<LuaValue, LuaError> {
    match v {
        LuaValue::Str(s) => Ok(LuaValue::Integer(s.len() as i64)),
        LuaValue::Table(t) => {
            if let Some(h) = metamethod_of(v, Event::Len) {
                return call_handler(state, h, vec![v.clone()]);
            }
            Ok(LuaValue::Integer(t.borrow().length()))
        }
        other => Err(state.raise(LuaError::RuntimeError, format!("attempt to get length of a {} value", other.type_name()))),
    }
}

/// `__eq`: only consulted when both operands are tables (matching Lua 5.3;
/// raw-equal tables short-circuit before this is ever called).
pub fn eq(state: &mut LuaState, a: &LuaValue, b: &LuaValue) -> Result<bool, LuaError> {
    if a == b {
        return Ok(true);
    }
    if let (LuaValue::Table(_), LuaValue::Table(_)) = (a, b) {
        if let Some(h) = binary_metamethod(a, b, Event::Eq) {
            return Ok(call_handler(state, h, vec![a.clone(), b.clone()])?.is_truthy());
        }
    }
    Ok(false)
}

/// `__lt`/`__le`, tried when the raw numeric/string comparison doesn't apply.
pub fn compare(state: &mut LuaState, event: Event, a: &LuaValue, b: &LuaValue) -> Result<bool, LuaError> {
    use LuaValue::*;
    match (a, b) {
        (Integer(x), Integer(y)) => return Ok(if event == Event::Lt { x < y } else { x <= y }),
        (Str(x), Str(y)) => return Ok(if event == Event::Lt { x < y } else { x <= y }),
        _ => {
            if a.is_number() && b.is_number() {
                let (x, y) = (a.to_number().unwrap(), b.to_number().unwrap());
                return Ok(if event == Event::Lt { x < y } else { x <= y });
            }
        }
    }
    if let Some(h) = binary_metamethod(a, b, event) {
        return Ok(call_handler(state, h, vec![a.clone(), b.clone()])?.is_truthy());
    }
    Err(state.raise(
        LuaError::RuntimeError,
        format!("attempt to compare {} with {}", a.type_name(), b.type_name()),
    ))
}

/// `__index` chase: raw table lookup, then metatable `__index` (table or
/// function), bounded by `MAXTAGLOOP` to catch a cyclic metatable chain.
pub fn index(state: &mut LuaState, mut target: LuaValue, key: LuaValue) -> Result<LuaValue, LuaError> {
    for _ in 0..MAXTAGLOOP {
        match &target {
            LuaValue::Table(t) => {
                let raw = t.borrow().get(&key);
                if !raw.is_nil() {
                    return Ok(raw);
                }
                match metamethod_of(&target, Event::Index) {
                    None => return Ok(LuaValue::Nil),
                    Some(LuaValue::Closure(c)) => {
                        let mut results = call_closure(state, c, vec![target.clone(), key.clone()])?;
                        return Ok(if results.is_empty() { LuaValue::Nil } else { results.remove(0) });
                    }
                    Some(next) => target = next,
                }
            }
            other => {
                return Err(state.raise(LuaError::RuntimeError, format!("attempt to index a {} value", other.type_name())))
            }
        }
    }
    Err(state.raise(LuaError::RuntimeError, "'__index' chain too long; possible loop"))
}

/// `__newindex` chase: raw set when the table already has the key or no
/// handler; otherwise recurse into a table handler or call a function one.
pub fn newindex(state: &mut LuaState, mut target: LuaValue, key: LuaValue, value: LuaValue) -> Result<(), LuaError> {
    for _ in 0..MAXTAGLOOP {
        match &target {
            LuaValue::Table(t) => {
                let has_raw = !t.borrow().get(&key).is_nil();
                if has_raw {
                    t.borrow_mut().set(key, value);
                    return Ok(());
                }
                match metamethod_of(&target, Event::NewIndex) {
                    None => {
                        t.borrow_mut().set(key, value);
                        return Ok(());
                    }
                    Some(LuaValue::Closure(c)) => {
                        call_closure(state, c, vec![target.clone(), key, value])?;
                        return Ok(());
                    }
                    Some(next) => target = next,
                }
            }
            other => {
                return Err(state.raise(LuaError::RuntimeError, format!("attempt to index a {} value", other.type_name())))
            }
        }
    }
    Err(state.raise(LuaError::RuntimeError, "'__newindex' chain too long; possible loop"))
}

/// `__call`: invoked when a non-function value appears in call position.
pub fn call_nonfunction(state: &mut LuaState, callee: LuaValue, mut args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    match metamethod_of(&callee, Event::Call) {
        Some(LuaValue::Closure(c)) => {
            args.insert(0, callee);
            call_closure(state, c, args)
        }
        _ => Err(state.raise(LuaError::NotCallable, format!("attempt to call a {} value", callee.type_name()))),
    }
}

/// Dispatch a call to any callable `LuaValue` (a real closure, or a table
/// with `__call`), used by CALL/TAILCALL and by host functions that invoke
/// a callback argument.
pub fn call_value(state: &mut LuaState, callee: LuaValue, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaError> {
    match callee {
        LuaValue::Closure(c) => call_closure(state, c, args),
        other => call_nonfunction(state, other, args),
    }
}
