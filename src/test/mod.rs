//! Test modules, one file per concern, matching the teacher's `src/test/`
//! layout.

mod test_binary_chunk;
mod test_codegen;
mod test_e2e;
mod test_lexer;
mod test_parser;
mod test_vm;
