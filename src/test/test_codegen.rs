use crate::compiler::compile;
use crate::lua_value::Constant;
use crate::lua_vm::opcode::{Instruction, OpCode};

fn opcodes(source: &str) -> Vec<OpCode> {
    let proto = compile(source, "test").expect("compile");
    proto.code.iter().map(|&i| Instruction::get_opcode(i)).collect()
}

#[test]
fn constant_folded_return_is_a_single_loadk() {
    let proto = compile("return 1 + 2 * 3", "test").expect("compile");
    assert_eq!(opcodes("return 1 + 2 * 3"), vec![OpCode::LoadK, OpCode::Return]);
    assert_eq!(proto.constants, vec![Constant::Integer(7)]);
}

#[test]
fn simple_arithmetic_on_locals_emits_add() {
    assert_eq!(opcodes("local a, b = 1, 2; return a + b"), vec![
        OpCode::LoadK,
        OpCode::LoadK,
        OpCode::Add,
        OpCode::Return,
    ]);
}

#[test]
fn if_statement_emits_test_and_jump() {
    let proto = compile("local x = 1; if x then x = 2 end", "test").expect("compile");
    let ops: Vec<OpCode> = proto.code.iter().map(|&i| Instruction::get_opcode(i)).collect();
    assert!(ops.contains(&OpCode::Test) || ops.contains(&OpCode::TestSet));
    assert!(ops.contains(&OpCode::Jmp));
}

#[test]
fn numeric_for_emits_forprep_and_forloop() {
    let proto = compile("local s = 0; for i=1,10 do s = s + i end; return s", "test").expect("compile");
    let ops: Vec<OpCode> = proto.code.iter().map(|&i| Instruction::get_opcode(i)).collect();
    assert!(ops.contains(&OpCode::ForPrep));
    assert!(ops.contains(&OpCode::ForLoop));
}

#[test]
fn closure_over_local_emits_closure_and_upvalue_access() {
    let proto = compile("local x = 0; local function f() return x end; return f", "test").expect("compile");
    let ops: Vec<OpCode> = proto.code.iter().map(|&i| Instruction::get_opcode(i)).collect();
    assert!(ops.contains(&OpCode::Closure));
    assert_eq!(proto.protos.len(), 1);
    let inner_ops: Vec<OpCode> = proto.protos[0].code.iter().map(|&i| Instruction::get_opcode(i)).collect();
    assert!(inner_ops.contains(&OpCode::GetUpval));
}

#[test]
fn jump_targets_stay_in_range() {
    let proto = compile(
        "local x = 1
         while x < 10 do
           x = x + 1
           if x == 5 then break end
         end
         return x",
        "test",
    )
    .expect("compile");
    for (idx, &instr) in proto.code.iter().enumerate() {
        if matches!(Instruction::get_opcode(instr), OpCode::Jmp | OpCode::ForLoop | OpCode::ForPrep | OpCode::TForLoop) {
            let sbx = Instruction::get_sbx(instr);
            let dest = idx as i64 + 1 + sbx as i64;
            assert!(dest >= 0 && dest <= proto.code.len() as i64);
        }
    }
}
