//! lua53: a Lua 5.3 source-to-bytecode compiler and register-based virtual machine.
//!
//! Source text (or a precompiled binary chunk) goes in; side effects and/or
//! values come out. See `compiler` for the front end and code generator,
//! `lua_vm` for the instruction set and interpreter, and `lua_value` for the
//! tagged value, table, and prototype representations shared by both.

#[cfg(test)]
mod test;

pub mod compiler;
pub mod lua_value;
pub mod lua_vm;
pub mod stdlib;

pub use compiler::CompileError;
pub use lua_value::{Closure, LuaTable, LuaValue, Prototype};
pub use lua_vm::{LuaError, LuaFullError, LuaVm, VmOptions};

use std::rc::Rc;

/// Compile and execute `source` with a fresh VM and the standard ambient
/// library installed. Convenience wrapper around [`LuaVm`] for simple
/// embeddings and for the CLI.
pub fn execute(source: &str, chunk_name: &str) -> Result<Vec<LuaValue>, LuaFullError> {
    let mut vm = LuaVm::new();
    vm.open_libs();
    let proto = vm
        .compile(source, chunk_name)
        .map_err(|e| LuaFullError::compile(e.to_string()))?;
    vm.execute(Rc::new(proto))
}

/// Compile and execute `source` against an already-configured VM, reusing
/// its globals, registry, and any previously interned strings.
pub fn execute_with_vm(vm: &mut LuaVm, source: &str, chunk_name: &str) -> Result<Vec<LuaValue>, LuaFullError> {
    let proto = vm
        .compile(source, chunk_name)
        .map_err(|e| LuaFullError::compile(e.to_string()))?;
    vm.execute(Rc::new(proto))
}
