//! Low-level instruction emission: encoding opcodes into a function's code
//! vector and patching jump offsets.
//!
//! Grounded on the teacher's `compiler/code.rs` (itself a port of `lcode.c`):
//! same emit-then-return-pc shape, adapted to this crate's `FuncState` and
//! Lua 5.3's `Instruction` bit layout instead of the teacher's 5.4 one.

use crate::compiler::func_state::FuncState;
use crate::lua_vm::opcode::{Instruction, OpCode};

pub fn emit_abc(fs: &mut FuncState, op: OpCode, a: u32, b: u32, c: u32, line: i32) -> usize {
    fs.emit(Instruction::create_abc(op, a, b, c), line)
}

pub fn emit_abx(fs: &mut FuncState, op: OpCode, a: u32, bx: u32, line: i32) -> usize {
    fs.emit(Instruction::create_abx(op, a, bx), line)
}

pub fn emit_asbx(fs: &mut FuncState, op: OpCode, a: u32, sbx: i32, line: i32) -> usize {
    fs.emit(Instruction::create_asbx(op, a, sbx), line)
}

pub fn emit_ax(fs: &mut FuncState, op: OpCode, ax: u32, line: i32) -> usize {
    fs.emit(Instruction::create_ax(op, ax), line)
}

pub fn emit_move(fs: &mut FuncState, dst: u8, src: u8, line: i32) -> usize {
    emit_abc(fs, OpCode::Move, dst as u32, src as u32, 0, line)
}

pub fn emit_loadnil(fs: &mut FuncState, from: u8, n: u8, line: i32) -> usize {
    emit_abc(fs, OpCode::LoadNil, from as u32, n.saturating_sub(1) as u32, 0, line)
}

pub fn emit_loadbool(fs: &mut FuncState, dst: u8, b: bool, skip_next: bool, line: i32) -> usize {
    emit_abc(fs, OpCode::LoadBool, dst as u32, b as u32, skip_next as u32, line)
}

pub fn emit_loadk(fs: &mut FuncState, dst: u8, k: u32, line: i32) -> usize {
    emit_abx(fs, OpCode::LoadK, dst as u32, k, line)
}

pub fn emit_return(fs: &mut FuncState, first: u8, n: i32, line: i32) -> usize {
    // n == -1 means "all values from `first` to top"; encoded as B=0.
    let b = if n < 0 { 0 } else { (n + 1) as u32 };
    emit_abc(fs, OpCode::Return, first as u32, b, 0, line)
}

/// An unconditional jump with a placeholder offset; patch later with
/// [`patch_jump`].
pub fn emit_jump(fs: &mut FuncState, line: i32) -> usize {
    emit_asbx(fs, OpCode::Jmp, 0, 0, line)
}

/// Point the jump instruction at `jump_pc` to land at `target_pc`.
pub fn patch_jump(fs: &mut FuncState, jump_pc: usize, target_pc: usize) {
    let offset = target_pc as i32 - (jump_pc as i32 + 1);
    let mut instr = fs.code[jump_pc];
    Instruction::set_sbx(&mut instr, offset);
    fs.code[jump_pc] = instr;
}

/// Point the jump instruction at `jump_pc` to land at the current end of
/// the code vector.
pub fn patch_jump_to_here(fs: &mut FuncState, jump_pc: usize) {
    let here = fs.pc();
    patch_jump(fs, jump_pc, here);
}

/// RK-encode a constant pool index for a B or C operand.
pub fn rk_from_const(k: u32) -> u32 {
    Instruction::rk_as_constant(k)
}

/// RK-encode a register number for a B or C operand.
pub fn rk_from_reg(r: u8) -> u32 {
    Instruction::rk_as_register(r as u32)
}
