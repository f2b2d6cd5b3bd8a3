//! `LuaTable` — a hybrid array+hash table, the only aggregate data structure
//! Lua has. Grounded on the teacher's `lua_value/lua_table/mod.rs` split
//! between a dense array part and a hash part, simplified to a single
//! `Vec` + `HashMap` (no separate value-array/hash-table sub-modules, no
//! embedded GC header — see DESIGN.md).

use ahash::RandomState;
use std::collections::HashMap;

use super::lua_value::TableRef;
use super::LuaValue;

/// A table key, normalized so that an integral float key (`2.0`) lands in
/// the same slot as the integer key (`2`) — required by the `t[2.0] == t[2]`
/// Lua invariant.
#[derive(Clone, Debug)]
enum LuaKey {
    Integer(i64),
    Bool(bool),
    Str(std::rc::Rc<str>),
    Float(u64), // bit pattern of a non-integral float
    Table(usize),
    Closure(usize),
}

impl PartialEq for LuaKey {
    fn eq(&self, other: &Self) -> bool {
        use LuaKey::*;
        match (self, other) {
            (Integer(a), Integer(b)) => a == b,
            (Bool(a), Bool(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Table(a), Table(b)) => a == b,
            (Closure(a), Closure(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for LuaKey {}

impl std::hash::Hash for LuaKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            LuaKey::Integer(i) => i.hash(state),
            LuaKey::Bool(b) => b.hash(state),
            LuaKey::Str(s) => s.hash(state),
            LuaKey::Float(bits) => bits.hash(state),
            LuaKey::Table(p) => p.hash(state),
            LuaKey::Closure(p) => p.hash(state),
        }
    }
}

fn to_key(v: &LuaValue) -> Option<LuaKey> {
    match v {
        LuaValue::Nil => None,
        LuaValue::Boolean(b) => Some(LuaKey::Bool(*b)),
        LuaValue::Integer(i) => Some(LuaKey::Integer(*i)),
        LuaValue::Float(f) => {
            if f.is_nan() {
                None
            } else if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 {
                Some(LuaKey::Integer(*f as i64))
            } else {
                Some(LuaKey::Float(f.to_bits()))
            }
        }
        LuaValue::Str(s) => Some(LuaKey::Str(s.clone())),
        LuaValue::Table(t) => Some(LuaKey::Table(std::rc::Rc::as_ptr(t) as usize)),
        LuaValue::Closure(c) => Some(LuaKey::Closure(std::rc::Rc::as_ptr(c) as usize)),
    }
}

pub struct LuaTable {
    /// Dense 1-based array part: `array[0]` is `t[1]`.
    array: Vec<LuaValue>,
    hash: HashMap<LuaKey, LuaValue, RandomState>,
    metatable: Option<TableRef>,
}

impl LuaTable {
    pub fn new() -> Self {
        LuaTable {
            array: Vec::new(),
            hash: HashMap::default(),
            metatable: None,
        }
    }

    pub fn with_capacity(array_size: usize, hash_size: usize) -> Self {
        LuaTable {
            array: Vec::with_capacity(array_size),
            hash: HashMap::with_capacity_and_hasher(hash_size, RandomState::new()),
            metatable: None,
        }
    }

    pub fn metatable(&self) -> Option<TableRef> {
        self.metatable.clone()
    }

    pub fn set_metatable(&mut self, mt: Option<TableRef>) {
        self.metatable = mt;
    }

    /// Raw get, ignoring `__index`.
    pub fn get(&self, key: &LuaValue) -> LuaValue {
        if let LuaValue::Integer(i) = key {
            if *i >= 1 && (*i as usize) <= self.array.len() {
                return self.array[*i as usize - 1].clone();
            }
        }
        match to_key(key) {
            Some(k) => self.hash.get(&k).cloned().unwrap_or(LuaValue::Nil),
            None => LuaValue::Nil,
        }
    }

    pub fn get_str(&self, key: &str) -> LuaValue {
        self.hash
            .get(&LuaKey::Str(std::rc::Rc::from(key)))
            .cloned()
            .unwrap_or(LuaValue::Nil)
    }

    pub fn get_int(&self, i: i64) -> LuaValue {
        self.get(&LuaValue::Integer(i))
    }

    /// Raw set, ignoring `__newindex`. Setting a key to `nil` removes it.
    /// Assigning one past the array part's end grows the array and may pull
    /// contiguous hash-part entries into it, matching the reference
    /// implementation's array/hash migration.
    pub fn set(&mut self, key: LuaValue, value: LuaValue) {
        if let LuaValue::Integer(i) = key {
            if i >= 1 && (i as usize) <= self.array.len() {
                if value.is_nil() && i as usize == self.array.len() {
                    self.array.pop();
                } else {
                    self.array[i as usize - 1] = value;
                }
                return;
            }
            if i as usize == self.array.len() + 1 && !value.is_nil() {
                self.array.push(value);
                self.migrate_from_hash();
                return;
            }
        }
        match to_key(&key) {
            Some(k) => {
                if value.is_nil() {
                    self.hash.remove(&k);
                } else {
                    self.hash.insert(k, value);
                }
            }
            None => {
                // nil/NaN keys are a runtime error at the call site, not here;
                // silently ignore so raw table internals never panic.
            }
        }
    }

    pub fn set_str(&mut self, key: &str, value: LuaValue) {
        self.set(LuaValue::string(key), value);
    }

    /// Pull `array.len()+1`, `+2`, … out of the hash part into the array
    /// part while they're present, so `#t` keeps seeing a dense border.
    fn migrate_from_hash(&mut self) {
        loop {
            let next = self.array.len() as i64 + 1;
            match self.hash.remove(&LuaKey::Integer(next)) {
                Some(v) => self.array.push(v),
                None => break,
            }
        }
    }

    /// `#t`: a border `n` where `t[n] ~= nil` and `t[n+1] == nil`. The dense
    /// array part's length is always such a border when its last slot is
    /// non-nil; Lua does not guarantee which border is returned when the
    /// table has holes, and neither does this implementation.
    pub fn length(&self) -> i64 {
        if !self.array.is_empty() && !self.array.last().unwrap().is_nil() {
            // Array might continue into the hash part (rare after
            // `migrate_from_hash`, but table.remove-style holes can leave
            // a dangling continuation); binary-search for a border there.
            let mut hi = self.array.len() as i64 + 1;
            if self.hash.contains_key(&LuaKey::Integer(hi)) {
                let mut lo = hi;
                while self.hash.contains_key(&LuaKey::Integer(hi)) {
                    lo = hi;
                    if hi > i64::MAX / 2 {
                        break;
                    }
                    hi *= 2;
                }
                while hi - lo > 1 {
                    let mid = lo + (hi - lo) / 2;
                    if self.hash.contains_key(&LuaKey::Integer(mid)) {
                        lo = mid;
                    } else {
                        hi = mid;
                    }
                }
                return lo;
            }
            return self.array.len() as i64;
        }
        // Array part empty or ends in nil: binary search within it for a border.
        if self.array.is_empty() {
            return 0;
        }
        let (mut lo, mut hi) = (0usize, self.array.len());
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.array[mid - 1].is_nil() {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        lo as i64
    }

    /// Iteration support for `pairs`/`next`: array part first (in order),
    /// then the hash part (in arbitrary but stable-per-call order). Returns
    /// `Err(InvalidNextKey)` if `key` is not currently a key of this table,
    /// so callers can report `"invalid key to 'next'"` instead of treating
    /// it as end-of-traversal.
    pub fn next(&self, key: &LuaValue) -> Result<Option<(LuaValue, LuaValue)>, InvalidNextKey> {
        let array_len = self.array.len();
        let start_hash_from = match key {
            LuaValue::Nil => {
                for (i, v) in self.array.iter().enumerate() {
                    if !v.is_nil() {
                        return Ok(Some((LuaValue::Integer(i as i64 + 1), v.clone())));
                    }
                }
                None
            }
            LuaValue::Integer(i) if *i >= 1 && (*i as usize) <= array_len => {
                for idx in (*i as usize)..array_len {
                    if !self.array[idx].is_nil() {
                        return Ok(Some((LuaValue::Integer(idx as i64 + 1), self.array[idx].clone())));
                    }
                }
                None
            }
            other => Some(to_key(other).ok_or(InvalidNextKey)?),
        };
        let mut iter = self.hash.iter();
        if let Some(from) = start_hash_from {
            // Skip forward to just after `from`. HashMap has no stable
            // ordering guarantee across mutation, but is stable for a
            // read-only traversal, which is all `next` requires here.
            let mut found = false;
            for (k, _) in iter.by_ref() {
                if *k == from {
                    found = true;
                    break;
                }
            }
            if !found {
                return Err(InvalidNextKey);
            }
        }
        for (k, v) in iter {
            return Ok(Some((key_to_value(k), v.clone())));
        }
        Ok(None)
    }

    pub fn len_hash(&self) -> usize {
        self.hash.len()
    }
}

/// `key` passed to [`LuaTable::next`] is not a key currently in the table.
#[derive(Debug, Clone, Copy)]
pub struct InvalidNextKey;

fn key_to_value(k: &LuaKey) -> LuaValue {
    match k {
        LuaKey::Integer(i) => LuaValue::Integer(*i),
        LuaKey::Bool(b) => LuaValue::Boolean(*b),
        LuaKey::Str(s) => LuaValue::Str(s.clone()),
        LuaKey::Float(bits) => LuaValue::Float(f64::from_bits(*bits)),
        // Table/closure identity keys can't be reconstructed from the bare
        // pointer value stored in the key; callers needing the original
        // value should prefer array-part iteration or keep their own map.
        LuaKey::Table(_) | LuaKey::Closure(_) => LuaValue::Nil,
    }
}

impl Default for LuaTable {
    fn default() -> Self {
        Self::new()
    }
}
