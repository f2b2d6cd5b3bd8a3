//! Compile-time errors: lexical and syntactic failures from the front end.
//!
//! Grounded on the teacher's `lua_vm/lua_error.rs` split between a cheap
//! tag and a message, adapted with `thiserror` (as `iGentAI-ferrous`'s
//! `Cargo.toml` does for its own compiler errors) since front-end errors
//! are rare enough that a heap-allocated message per error is fine.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("{chunk_name}:{line}: {message}")]
pub struct CompileError {
    pub chunk_name: String,
    pub line: u32,
    pub message: String,
}

impl CompileError {
    pub fn new(chunk_name: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        CompileError { chunk_name: chunk_name.into(), line, message: message.into() }
    }

    pub fn syntax_near(chunk_name: &str, line: u32, near: &str) -> Self {
        CompileError::new(chunk_name, line, format!("syntax error near '{near}'"))
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
