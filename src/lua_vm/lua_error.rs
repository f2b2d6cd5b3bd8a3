//! Runtime error kinds.
//!
//! Grounded on the teacher's `lua_vm/lua_error.rs` split between a
//! lightweight `LuaError` tag (cheap to carry through `Result` on the hot
//! dispatch path) and a richer [`LuaFullError`] that attaches the message
//! once an error actually needs reporting. Coroutine-related variants
//! (`Yield`, `CloseThread`, `ErrorInErrorHandling`) are dropped — this
//! crate has no coroutine support (see DESIGN.md).

use thiserror::Error;

/// The kind of a VM-level failure. Message text lives alongside, in
/// [`LuaFullError`] or the raised [`crate::LuaValue`] error object —
/// keeping this enum small keeps `Result<T, LuaError>` cheap on the
/// instruction dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LuaError {
    #[error("runtime error")]
    RuntimeError,
    #[error("attempt to call a non-function value")]
    NotCallable,
    #[error("stack overflow")]
    StackOverflow,
    #[error("index out of bounds")]
    IndexOutOfBounds,
}

/// A [`LuaError`] kind paired with the message/value that actually explains
/// it, plus an optional traceback. This is what escapes `pcall`-less
/// execution and what the CLI prints.
#[derive(Debug, Clone)]
pub struct LuaFullError {
    pub kind: LuaErrorSource,
    pub message: String,
    pub traceback: Vec<String>,
}

/// Where a [`LuaFullError`] originated, for callers that want to branch on
/// it (e.g. the CLI choosing an exit code).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaErrorSource {
    Compile,
    Runtime(LuaError),
}

impl std::fmt::Display for LuaFullError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        for line in &self.traceback {
            write!(f, "\n\t{line}")?;
        }
        Ok(())
    }
}

impl std::error::Error for LuaFullError {}

impl LuaFullError {
    pub fn compile(message: impl Into<String>) -> Self {
        LuaFullError { kind: LuaErrorSource::Compile, message: message.into(), traceback: Vec::new() }
    }

    pub fn runtime(kind: LuaError, message: impl Into<String>, traceback: Vec<String>) -> Self {
        LuaFullError { kind: LuaErrorSource::Runtime(kind), message: message.into(), traceback }
    }
}
