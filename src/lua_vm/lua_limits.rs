//! Centralized VM and compiler limits.
//!
//! Grounded on the teacher's `lua_vm/lua_limits.rs`, trimmed to the limits
//! this Lua 5.3 subset actually enforces — the GC pacing and pattern-match
//! constants it lists belong to features this crate's Non-goals exclude
//! (incremental GC, `string.find`/`gmatch`); see DESIGN.md.

// ===== Stack =====

/// Extra stack slots above frame_top reserved for temporaries.
pub const EXTRA_STACK: usize = 5;

/// Minimum guaranteed stack slots available to a called function.
pub const LUA_MINSTACK: usize = 20;

/// Initial stack capacity for a new Lua state.
pub const BASIC_STACK_SIZE: usize = 2 * LUA_MINSTACK;

/// Hard ceiling on stack size (register count across all live frames).
pub const LUAI_MAXSTACK: usize = 1_000_000;

/// Maximum function call nesting depth before `LuaError::StackOverflow`.
pub const MAX_CALL_DEPTH: usize = 200;

// ===== Strings =====

/// Strings at or under this length are interned; longer ones are not.
/// Matches Lua 5.3's `LUAI_MAXSHORTLEN`.
pub const LUAI_MAXSHORTLEN: usize = 40;

// ===== Compiler =====

/// Maximum number of local variables live at once per function.
pub const MAXVARS: usize = 200;

/// Maximum number of upvalues per function.
pub const MAXUPVAL: usize = 255;

/// Maximum parser/expression recursion depth.
pub const MAXCCALLS: usize = 200;

/// Largest index directly addressable as a constant via an RK operand.
pub const MAXINDEXRK: usize = 255;

/// "No register assigned yet" sentinel used by the code generator.
pub const NO_REG: u32 = 255;

/// Number of array-constructor items flushed per `SETLIST`.
pub const LFIELDS_PER_FLUSH: u32 = 50;

/// Unary operator binding priority, between `..` and exponentiation.
pub const UNARY_PRIORITY: i32 = 12;

/// Maximum length of a chunk name retained in error messages.
pub const MAX_SRC_LEN: usize = 59;

// ===== Metamethods =====

/// Maximum chased length of an `__index`/`__newindex` metamethod chain.
pub const MAXTAGLOOP: usize = 2000;
