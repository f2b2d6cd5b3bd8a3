//! Value representation shared by the compiler and the VM: the tagged
//! `LuaValue`, tables, closures/upvalues, function prototypes, the string
//! interner, and the binary chunk codec.

mod closure;
mod lua_table;
mod lua_value;
mod prototype;
mod string_interner;

pub mod binary_chunk;

pub use binary_chunk::ChunkError;
pub use closure::{Closure, HostClosure, HostFn, LuaClosure, Upvalue, UpvalueRef};
pub use lua_table::{InvalidNextKey, LuaTable};
pub use lua_value::{ClosureRef, LuaFloat, LuaInteger, LuaValue, TableRef};
pub use prototype::{Constant, LocalVarDesc, Prototype, UpvalDesc};
pub use string_interner::StringInterner;
