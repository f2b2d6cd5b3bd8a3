//! Closures and upvalues. Grounded on the teacher's `lua_vm/lua_call_frame.rs`
//! upvalue handling, reshaped around safe `Rc<RefCell<_>>` cells instead of
//! raw pointers into the teacher's GC arena (see DESIGN.md).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::lua_value::LuaValue;
use super::Prototype;
use crate::lua_vm::{LuaState, LuaVmResult};

/// A captured variable shared between a closure and the stack frame that
/// created it. Starts `Open` (aliasing a live stack slot) and is `Close`d
/// (its value copied in) when the owning frame returns or the block exits.
pub enum Upvalue {
    Open { frame_depth: usize, register: usize },
    Closed(LuaValue),
}

pub type UpvalueRef = Rc<RefCell<Upvalue>>;

/// Signature for a host (Rust-native) function exposed to Lua, e.g. `print`.
pub type HostFn = fn(&mut LuaState, &[LuaValue]) -> LuaVmResult<Vec<LuaValue>>;

pub enum Closure {
    Lua(LuaClosure),
    Host(HostClosure),
}

pub struct LuaClosure {
    pub proto: Rc<Prototype>,
    pub upvalues: Vec<UpvalueRef>,
}

pub struct HostClosure {
    pub name: &'static str,
    pub func: HostFn,
}

impl Closure {
    pub fn lua(proto: Rc<Prototype>, upvalues: Vec<UpvalueRef>) -> Rc<Closure> {
        Rc::new(Closure::Lua(LuaClosure { proto, upvalues }))
    }

    pub fn host(name: &'static str, func: HostFn) -> Rc<Closure> {
        Rc::new(Closure::Host(HostClosure { name, func }))
    }

    pub fn as_lua(&self) -> Option<&LuaClosure> {
        match self {
            Closure::Lua(c) => Some(c),
            Closure::Host(_) => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Closure::Lua(c) => &c.proto.source,
            Closure::Host(c) => c.name,
        }
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Closure::Lua(c) => write!(f, "LuaClosure({})", c.proto.source),
            Closure::Host(c) => write!(f, "HostClosure({})", c.name),
        }
    }
}

impl Upvalue {
    pub fn open(frame_depth: usize, register: usize) -> UpvalueRef {
        Rc::new(RefCell::new(Upvalue::Open { frame_depth, register }))
    }

    pub fn closed(value: LuaValue) -> UpvalueRef {
        Rc::new(RefCell::new(Upvalue::Closed(value)))
    }
}
