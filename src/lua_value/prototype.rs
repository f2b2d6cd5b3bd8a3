//! The function prototype: the immutable, compiled form of a Lua function.
//!
//! Grounded on the teacher's `Chunk` (crates/luars/src/lua_value/chunk_serializer.rs)
//! and on `original_source/common/binary_chunk_reader.go`'s `Prototype`, which
//! fixes the exact field set and order used by the Lua 5.3 binary chunk format.

use std::rc::Rc;

/// An entry in a prototype's constant pool.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Str(Rc<str>),
}

/// Upvalue descriptor: where a closure's upvalue comes from when the closure
/// is instantiated by `CLOSURE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpvalDesc {
    /// true: capture the enclosing function's local at `idx`.
    /// false: capture the enclosing function's own upvalue at `idx`.
    pub in_stack: bool,
    pub idx: u8,
    /// Debug name only; not used by the VM.
    pub name: String,
}

/// Debug info for one local variable's live range, keyed by declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVarDesc {
    pub name: String,
    pub start_pc: i32,
    pub end_pc: i32,
}

/// The compiled, immutable form of a Lua function (a "proto" in reference
/// terminology). A chunk is the prototype of its anonymous top-level vararg
/// function.
#[derive(Debug, Clone, PartialEq)]
pub struct Prototype {
    pub source: Rc<str>,
    pub line_defined: i32,
    pub last_line_defined: i32,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    pub code: Vec<u32>,
    pub constants: Vec<Constant>,
    pub upvalues: Vec<UpvalDesc>,
    pub protos: Vec<Rc<Prototype>>,
    pub line_info: Vec<i32>,
    pub local_vars: Vec<LocalVarDesc>,
    pub upvalue_names: Vec<String>,
}

impl Prototype {
    pub fn new(source: Rc<str>) -> Self {
        Prototype {
            source,
            line_defined: 0,
            last_line_defined: 0,
            num_params: 0,
            is_vararg: false,
            max_stack_size: 2,
            code: Vec::new(),
            constants: Vec::new(),
            upvalues: Vec::new(),
            protos: Vec::new(),
            line_info: Vec::new(),
            local_vars: Vec::new(),
            upvalue_names: Vec::new(),
        }
    }

    /// Line number attributed to instruction `pc`, or the function's first
    /// line if no debug info was kept.
    pub fn line_at(&self, pc: usize) -> i32 {
        self.line_info.get(pc).copied().unwrap_or(self.line_defined)
    }
}
