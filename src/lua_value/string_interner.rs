//! String interning: identical string contents share one `Rc<str>`
//! allocation, so string equality and table-key hashing stay cheap.
//!
//! Grounded on the teacher's `gc/string_interner.rs` hash-then-compare
//! strategy, simplified from its mark-sweep-aware GC string pool to a plain
//! `Rc<str>` cache — this crate uses reference counting instead of tracing
//! GC (see DESIGN.md), so there is no "dead string" sweep to perform.

use ahash::RandomState;
use std::collections::HashMap;
use std::rc::Rc;

/// Interns short strings (identifiers, table keys, small literals) so that
/// repeated occurrences of the same text share one allocation. Long strings
/// (beyond `long_string_limit`) are passed through uninterned, matching the
/// reference implementation's short/long string split.
pub struct StringInterner {
    map: HashMap<Rc<str>, (), RandomState>,
    long_string_limit: usize,
}

impl StringInterner {
    pub fn new(long_string_limit: usize) -> Self {
        StringInterner {
            map: HashMap::with_capacity_and_hasher(256, RandomState::new()),
            long_string_limit,
        }
    }

    /// Intern `s`, returning the shared `Rc<str>` for it. Strings longer
    /// than the configured limit are allocated fresh every call.
    pub fn intern(&mut self, s: &str) -> Rc<str> {
        if s.len() > self.long_string_limit {
            return Rc::from(s);
        }
        if let Some((existing, _)) = self.map.get_key_value(s) {
            return existing.clone();
        }
        let rc: Rc<str> = Rc::from(s);
        self.map.insert(rc.clone(), ());
        rc
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new(40)
    }
}
