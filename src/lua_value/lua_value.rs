//! `LuaValue` — the tagged value union every register, constant, and table
//! slot holds. Grounded on the teacher's `lua_value/lua_value.rs`, simplified
//! from its 8-byte tagged `Value` union + GC-arena ids to a safe tagged enum
//! over `Rc`-shared heap objects (see DESIGN.md for why).

use std::fmt;
use std::rc::Rc;

use super::{Closure, LuaTable};

pub type LuaInteger = i64;
pub type LuaFloat = f64;

/// A reference-counted, interior-mutable table. Two `LuaValue::Table`s alias
/// the same table iff their `Rc` pointers are equal.
pub type TableRef = Rc<std::cell::RefCell<LuaTable>>;
/// A reference-counted closure (Lua or host). Immutable once built; the
/// upvalue cells it holds are the mutable part.
pub type ClosureRef = Rc<Closure>;

#[derive(Clone)]
pub enum LuaValue {
    Nil,
    Boolean(bool),
    Integer(LuaInteger),
    Float(LuaFloat),
    Str(Rc<str>),
    Table(TableRef),
    Closure(ClosureRef),
}

impl LuaValue {
    pub fn table(t: TableRef) -> Self {
        LuaValue::Table(t)
    }

    pub fn closure(c: ClosureRef) -> Self {
        LuaValue::Closure(c)
    }

    pub fn string(s: impl Into<Rc<str>>) -> Self {
        LuaValue::Str(s.into())
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    /// Lua truthiness: everything is true except `nil` and `false`.
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, LuaValue::Nil | LuaValue::Boolean(false))
    }

    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, LuaValue::Integer(_) | LuaValue::Float(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            LuaValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The `type()` name, as seen from Lua.
    pub fn type_name(&self) -> &'static str {
        match self {
            LuaValue::Nil => "nil",
            LuaValue::Boolean(_) => "boolean",
            LuaValue::Integer(_) | LuaValue::Float(_) => "number",
            LuaValue::Str(_) => "string",
            LuaValue::Table(_) => "table",
            LuaValue::Closure(_) => "function",
        }
    }

    /// Coerce to `f64` following arithmetic-context conversion rules
    /// (numbers convert directly; numeric strings parse).
    pub fn to_number(&self) -> Option<f64> {
        match self {
            LuaValue::Integer(i) => Some(*i as f64),
            LuaValue::Float(f) => Some(*f),
            LuaValue::Str(s) => parse_lua_number(s).map(|n| match n {
                LuaNumberLit::Int(i) => i as f64,
                LuaNumberLit::Float(f) => f,
            }),
            _ => None,
        }
    }

    /// Coerce to `i64` without precision loss; fails for floats with a
    /// fractional part and for non-numeric strings.
    pub fn to_integer(&self) -> Option<i64> {
        match self {
            LuaValue::Integer(i) => Some(*i),
            LuaValue::Float(f) => float_to_integer_exact(*f),
            LuaValue::Str(s) => match parse_lua_number(s)? {
                LuaNumberLit::Int(i) => Some(i),
                LuaNumberLit::Float(f) => float_to_integer_exact(f),
            },
            _ => None,
        }
    }

    /// `tostring()` semantics for primitive types (tables/closures print
    /// their identity, the way the reference implementation does).
    pub fn to_lua_string(&self) -> String {
        match self {
            LuaValue::Nil => "nil".to_string(),
            LuaValue::Boolean(b) => b.to_string(),
            LuaValue::Integer(i) => {
                let mut buf = itoa::Buffer::new();
                buf.format(*i).to_string()
            }
            LuaValue::Float(f) => format_lua_float(*f),
            LuaValue::Str(s) => s.to_string(),
            LuaValue::Table(t) => format!("table: {:p}", Rc::as_ptr(t)),
            LuaValue::Closure(c) => format!("function: {:p}", Rc::as_ptr(c)),
        }
    }
}

/// Lua prints floats with `%.14g`-like formatting; integral floats still
/// carry a trailing `.0` so `1.0` never prints as `1`.
pub fn format_lua_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    let s = format!("{:.14e}", f);
    // Prefer a plain decimal rendering when it round-trips and is short.
    let plain = format!("{}", f);
    if plain.parse::<f64>() == Ok(f) {
        if plain.contains('.') || plain.contains('e') || plain.contains("inf") || plain.contains("nan") {
            plain
        } else {
            format!("{}.0", plain)
        }
    } else {
        s
    }
}

pub(crate) enum LuaNumberLit {
    Int(i64),
    Float(f64),
}

/// Parse a Lua numeral the way the lexer/`tonumber` do: optional sign,
/// decimal or `0x` hex, with fractional/exponent parts.
pub(crate) fn parse_lua_number(raw: &str) -> Option<LuaNumberLit> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let (neg, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let lower = body.to_ascii_lowercase();
    if let Some(hex) = lower.strip_prefix("0x") {
        if hex.contains('.') || hex.contains('p') {
            let f = crate::compiler::parse_hex_float(hex)?;
            return Some(LuaNumberLit::Float(if neg { -f } else { f }));
        }
        let i = i64::from_str_radix(hex, 16).ok()?;
        return Some(LuaNumberLit::Int(if neg { i.wrapping_neg() } else { i }));
    }
    if let Ok(i) = body.parse::<i64>() {
        return Some(LuaNumberLit::Int(if neg { -i } else { i }));
    }
    let f: f64 = body.parse().ok()?;
    Some(LuaNumberLit::Float(if neg { -f } else { f }))
}

fn float_to_integer_exact(f: f64) -> Option<i64> {
    if f.fract() == 0.0 && f >= -(2f64.powi(63)) && f < 2f64.powi(63) {
        Some(f as i64)
    } else {
        None
    }
}

impl fmt::Debug for LuaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_lua_string())
    }
}

/// Lua equality: numbers compare by mathematical value across int/float;
/// strings by content; tables/closures by identity.
impl PartialEq for LuaValue {
    fn eq(&self, other: &Self) -> bool {
        use LuaValue::*;
        match (self, other) {
            (Nil, Nil) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Integer(a), Float(b)) | (Float(b), Integer(a)) => (*a as f64) == *b,
            (Str(a), Str(b)) => a == b,
            (Table(a), Table(b)) => Rc::ptr_eq(a, b),
            (Closure(a), Closure(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}
