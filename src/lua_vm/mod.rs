//! Virtual machine: instruction decoder, activation-frame stack, closure and
//! upvalue handling, metamethod dispatch, and the interpreter loop itself.
//!
//! Grounded on the teacher's `lua_vm/mod.rs` layout (a thin `LuaVM` facade
//! over `lua_state`/`execute`/`opcode` submodules) and its `SafeOption`
//! configuration knob, renamed here to [`VmOptions`]. The teacher's GC,
//! coroutine, and async-thread submodules have no counterpart (see
//! DESIGN.md): this crate shares heap objects via `Rc<RefCell<_>>` rather
//! than a tracing collector, and coroutines are out of scope.

pub mod execute;
pub mod lua_error;
pub mod lua_limits;
pub mod lua_state;
pub mod metamethod;
pub mod opcode;

pub use lua_error::{LuaError, LuaErrorSource, LuaFullError};
pub use lua_state::{Frame, LuaState, VmOptions};

use std::io::Cursor;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::compiler::{self, CompileError};
use crate::lua_value::{binary_chunk, ChunkError, Closure, LuaTable, LuaValue, Prototype};
use crate::stdlib;

/// Result type for anything that can fail with a [`LuaError`] tag; the
/// explanatory message, if any, is recorded on [`LuaState::error_value`].
pub type LuaVmResult<T> = Result<T, LuaError>;

/// Embeddable Lua 5.3 virtual machine: owns one [`LuaState`] plus the
/// compiler's entry point, mirroring the teacher's `LuaVM` facade.
pub struct LuaVm {
    state: LuaState,
}

impl LuaVm {
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    pub fn with_options(options: VmOptions) -> Self {
        LuaVm { state: LuaState::new(options) }
    }

    /// Register the ambient stdlib surface (`print`, `pcall`, `pairs`, ...)
    /// into the globals table, the way the teacher's `open_stdlib` does.
    pub fn open_libs(&mut self) {
        stdlib::install(&mut self.state);
    }

    pub fn globals(&self) -> std::rc::Rc<std::cell::RefCell<LuaTable>> {
        self.state.globals.clone()
    }

    pub fn state_mut(&mut self) -> &mut LuaState {
        &mut self.state
    }

    /// Compile Lua source into a top-level prototype without running it.
    pub fn compile(&mut self, source: &str, chunk_name: &str) -> Result<Prototype, CompileError> {
        debug!(chunk_name, "compiling chunk");
        compiler::compile(source, chunk_name)
    }

    /// Load a precompiled binary chunk (`.luac`-shaped bytes).
    pub fn load_binary(&mut self, bytes: &[u8]) -> Result<Prototype, ChunkError> {
        binary_chunk::load(&mut Cursor::new(bytes))
    }

    /// Wrap `proto` in a closure over `_ENV` = this VM's globals and run it.
    pub fn execute(&mut self, proto: Rc<Prototype>) -> Result<Vec<LuaValue>, LuaFullError> {
        let env_upvalue = crate::lua_value::Upvalue::closed(LuaValue::table(self.state.globals.clone()));
        let closure = Closure::lua(proto, vec![env_upvalue]);
        match execute::call_closure(&mut self.state, closure, Vec::new()) {
            Ok(values) => Ok(values),
            Err(kind) => {
                warn!(?kind, "unhandled error escaped top-level execution");
                Err(self.state.take_full_error(kind))
            }
        }
    }
}

impl Default for LuaVm {
    fn default() -> Self {
        Self::new()
    }
}
