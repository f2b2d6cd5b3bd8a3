use std::io::Cursor;

use crate::compiler::compile;
use crate::lua_value::binary_chunk::{dump, load};
use crate::lua_value::Constant;
use crate::lua_vm::opcode::Instruction;

/// Bytes of a genuine Lua 5.3 `luac -o` dump for the one-line chunk
/// `return 1`, assembled by hand from the `lundump.c`/`lopcodes.h` binary
/// chunk layout (header, then one `LOADK`/`RETURN` prototype), field order
/// cross-checked against `original_source/common/binary_chunk_reader.go`.
/// This exercises interop with the real external format, not just
/// self-consistency with this crate's own writer.
#[rustfmt::skip]
const REFERENCE_LUAC_RETURN_1: &[u8] = &[
    // header
    0x1b, 0x4c, 0x75, 0x61,             // signature "\x1bLua"
    0x53,                               // version 5.3
    0x00,                               // format
    0x19, 0x93, 0x0d, 0x0a, 0x1a, 0x0a, // luac data tail-check
    0x04, 0x08, 0x04, 0x08, 0x08,       // cint, size_t, Instruction, lua_Integer, lua_Number sizes
    0x78, 0x56, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // luac_int = 0x5678
    0x00, 0x00, 0x00, 0x00, 0x00, 0x28, 0x77, 0x40, // luac_num = 370.5
    // upvalue count of the top-level function
    0x01,
    // source = "@fixture.lua"
    0x0d, 0x40, 0x66, 0x69, 0x78, 0x74, 0x75, 0x72, 0x65, 0x2e, 0x6c, 0x75, 0x61,
    0x00, 0x00, 0x00, 0x00, // line_defined
    0x00, 0x00, 0x00, 0x00, // last_line_defined
    0x00,                   // num_params
    0x01,                   // is_vararg
    0x02,                   // max_stack_size
    // code: LOADK 0 0; RETURN 0 2
    0x02, 0x00, 0x00, 0x00,
    0x01, 0x00, 0x00, 0x00,
    0x26, 0x00, 0x00, 0x01,
    // constants: integer 1
    0x01, 0x00, 0x00, 0x00,
    0x13, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    // upvalues: _ENV (in_stack, idx 0)
    0x01, 0x00, 0x00, 0x00,
    0x01, 0x00,
    // protos: none
    0x00, 0x00, 0x00, 0x00,
    // line info: both instructions on line 1
    0x02, 0x00, 0x00, 0x00,
    0x01, 0x00, 0x00, 0x00,
    0x01, 0x00, 0x00, 0x00,
    // local vars: none
    0x00, 0x00, 0x00, 0x00,
    // upvalue names: "_ENV"
    0x01, 0x00, 0x00, 0x00,
    0x05, 0x5f, 0x45, 0x4e, 0x56,
];

#[test]
fn loads_a_reference_luac_fixture_bit_identical() {
    let proto = load(&mut Cursor::new(REFERENCE_LUAC_RETURN_1)).expect("load reference fixture");
    assert_eq!(&*proto.source, "@fixture.lua");
    assert_eq!(proto.num_params, 0);
    assert!(proto.is_vararg);
    assert_eq!(proto.max_stack_size, 2);
    assert_eq!(proto.code, vec![0x0000_0001, 0x0100_0026]);
    assert_eq!(proto.constants, vec![Constant::Integer(1)]);
    assert_eq!(proto.upvalue_names, vec!["_ENV".to_string()]);
    assert!(proto.protos.is_empty());
}

#[test]
fn round_trips_a_compiled_prototype() {
    let proto = compile(
        "local function add(a, b) return a + b end
         local t = {1, 2, 3}
         return add(t[1], t[2])",
        "roundtrip",
    )
    .expect("compile");

    let mut buf = Vec::new();
    dump(&proto, &mut buf).expect("dump");
    let loaded = load(&mut Cursor::new(&buf)).expect("load");

    assert_eq!(loaded.code, proto.code);
    assert_eq!(loaded.constants, proto.constants);
    assert_eq!(loaded.num_params, proto.num_params);
    assert_eq!(loaded.is_vararg, proto.is_vararg);
    assert_eq!(loaded.max_stack_size, proto.max_stack_size);
    assert_eq!(loaded.protos.len(), proto.protos.len());
    for (a, b) in loaded.protos.iter().zip(proto.protos.iter()) {
        assert_eq!(a.code, b.code);
        assert_eq!(a.constants, b.constants);
    }
}

#[test]
fn rejects_a_bad_signature() {
    let mut bytes = vec![0u8; 32];
    bytes[0] = 0x00;
    let err = load(&mut Cursor::new(&bytes));
    assert!(err.is_err());
}

#[test]
fn every_instruction_decodes_to_a_known_opcode() {
    let proto = compile("for i=1,5 do print(i) end", "loop").expect("compile");
    for &instr in &proto.code {
        let _ = Instruction::get_opcode(instr);
    }
}
