//! Front end: lexing, parsing (with constant folding), and single-pass code
//! generation from source text down to a [`Prototype`].
//!
//! Grounded on the teacher's `compiler/mod.rs` module layout (lexer, parser,
//! AST, codegen as siblings re-exported from here).

pub mod ast;
pub mod code;
pub mod codegen;
pub mod error;
pub mod func_state;
pub mod lexer;
pub mod parser;
pub mod token;

pub use error::{CompileError, CompileResult};
pub use lexer::parse_hex_float;

use std::rc::Rc;

use crate::lua_value::Prototype;

/// Compile Lua source text into the prototype of its top-level chunk.
pub fn compile(source: &str, chunk_name: &str) -> CompileResult<Prototype> {
    let block = parser::Parser::new(source, chunk_name).parse_chunk()?;
    codegen::compile_chunk(Rc::from(chunk_name), chunk_name, &block)
}
