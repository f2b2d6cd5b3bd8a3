//! Lua 5.3 binary chunk (`.luac`) reader and writer.
//!
//! Grounded on `HybridEidolon-lua-kit`'s `read.rs`/`write.rs` for the
//! byteorder-based field layout and constant tag bytes, cross-checked
//! against `original_source/common/binary_chunk_reader.go` for the header
//! layout and the exact tag values Lua 5.3 uses.

use std::rc::Rc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::prototype::{Constant, LocalVarDesc, Prototype, UpvalDesc};

pub const LUA_SIGNATURE: &[u8; 4] = b"\x1bLua";
pub const LUAC_VERSION: u8 = 0x53;
pub const LUAC_FORMAT: u8 = 0;
pub const LUAC_DATA: &[u8; 6] = &[0x19, 0x93, 0x0d, 0x0a, 0x1a, 0x0a];
pub const LUAC_INT: i64 = 0x5678;
pub const LUAC_NUM: f64 = 370.5;

const TAG_NIL: u8 = 0x00;
const TAG_BOOLEAN: u8 = 0x01;
const TAG_NUMBER_FLOAT: u8 = 0x03;
const TAG_NUMBER_INT: u8 = 0x13;
const TAG_SHORT_STR: u8 = 0x04;
const TAG_LONG_STR: u8 = 0x14;

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("truncated or corrupt binary chunk: {0}")]
    Truncated(#[from] std::io::Error),
    #[error("not a precompiled chunk")]
    BadSignature,
    #[error("version mismatch (expected Lua 5.3 bytecode)")]
    BadVersion,
    #[error("corrupt header (incompatible format, endianness, or sizes)")]
    BadHeader,
    #[error("unrecognized constant tag 0x{0:02x}")]
    BadConstantTag(u8),
}

pub type ChunkResult<T> = Result<T, ChunkError>;

/// Read a full binary chunk (header + top-level prototype) from `r`.
pub fn load(r: &mut impl std::io::Read) -> ChunkResult<Prototype> {
    check_header(r)?;
    let _upvalue_count = r.read_u8()?;
    read_function(r, Rc::from(""))
}

fn check_header(r: &mut impl std::io::Read) -> ChunkResult<()> {
    let mut sig = [0u8; 4];
    r.read_exact(&mut sig)?;
    if &sig != LUA_SIGNATURE {
        return Err(ChunkError::BadSignature);
    }
    let version = r.read_u8()?;
    if version != LUAC_VERSION {
        return Err(ChunkError::BadVersion);
    }
    let format = r.read_u8()?;
    if format != LUAC_FORMAT {
        return Err(ChunkError::BadHeader);
    }
    let mut luac_data = [0u8; 6];
    r.read_exact(&mut luac_data)?;
    if &luac_data != LUAC_DATA {
        return Err(ChunkError::BadHeader);
    }
    let size_cint = r.read_u8()?;
    let size_sizet = r.read_u8()?;
    let size_instruction = r.read_u8()?;
    let size_lua_integer = r.read_u8()?;
    let size_lua_number = r.read_u8()?;
    if size_cint != 4 || size_sizet != 8 || size_instruction != 4 || size_lua_integer != 8 || size_lua_number != 8 {
        return Err(ChunkError::BadHeader);
    }
    let luac_int = r.read_i64::<LittleEndian>()?;
    let luac_num = r.read_f64::<LittleEndian>()?;
    if luac_int != LUAC_INT || luac_num != LUAC_NUM {
        return Err(ChunkError::BadHeader);
    }
    Ok(())
}

fn read_lua_string(r: &mut impl std::io::Read) -> ChunkResult<Rc<str>> {
    let size = r.read_u8()?;
    let len: u64 = if size == 0xff {
        r.read_u64::<LittleEndian>()?
    } else {
        size as u64
    };
    if len == 0 {
        return Ok(Rc::from(""));
    }
    let mut buf = vec![0u8; (len - 1) as usize];
    r.read_exact(&mut buf)?;
    Ok(Rc::from(String::from_utf8_lossy(&buf).into_owned()))
}

fn read_function(r: &mut impl std::io::Read, parent_source: Rc<str>) -> ChunkResult<Prototype> {
    let source = read_lua_string(r)?;
    let source = if source.is_empty() { parent_source } else { source };
    let line_defined = r.read_u32::<LittleEndian>()? as i32;
    let last_line_defined = r.read_u32::<LittleEndian>()? as i32;
    let num_params = r.read_u8()?;
    let is_vararg = r.read_u8()? != 0;
    let max_stack_size = r.read_u8()?;

    let code_len = r.read_u32::<LittleEndian>()?;
    let mut code = Vec::with_capacity(code_len as usize);
    for _ in 0..code_len {
        code.push(r.read_u32::<LittleEndian>()?);
    }

    let const_len = r.read_u32::<LittleEndian>()?;
    let mut constants = Vec::with_capacity(const_len as usize);
    for _ in 0..const_len {
        constants.push(read_constant(r)?);
    }

    let upval_len = r.read_u32::<LittleEndian>()?;
    let mut upvalues = Vec::with_capacity(upval_len as usize);
    for _ in 0..upval_len {
        let in_stack = r.read_u8()? != 0;
        let idx = r.read_u8()?;
        upvalues.push(UpvalDesc { in_stack, idx, name: String::new() });
    }

    let proto_len = r.read_u32::<LittleEndian>()?;
    let mut protos = Vec::with_capacity(proto_len as usize);
    for _ in 0..proto_len {
        protos.push(Rc::new(read_function(r, source.clone())?));
    }

    let line_info_len = r.read_u32::<LittleEndian>()?;
    let mut line_info = Vec::with_capacity(line_info_len as usize);
    for _ in 0..line_info_len {
        line_info.push(r.read_u32::<LittleEndian>()? as i32);
    }

    let local_len = r.read_u32::<LittleEndian>()?;
    let mut local_vars = Vec::with_capacity(local_len as usize);
    for _ in 0..local_len {
        let name = read_lua_string(r)?;
        let start_pc = r.read_u32::<LittleEndian>()? as i32;
        let end_pc = r.read_u32::<LittleEndian>()? as i32;
        local_vars.push(LocalVarDesc { name: name.to_string(), start_pc, end_pc });
    }

    let upvalue_name_len = r.read_u32::<LittleEndian>()?;
    let mut upvalue_names = Vec::with_capacity(upvalue_name_len as usize);
    for _ in 0..upvalue_name_len {
        upvalue_names.push(read_lua_string(r)?.to_string());
    }
    for (desc, name) in upvalues.iter_mut().zip(upvalue_names.iter()) {
        desc.name = name.clone();
    }

    Ok(Prototype {
        source,
        line_defined,
        last_line_defined,
        num_params,
        is_vararg,
        max_stack_size,
        code,
        constants,
        upvalues,
        protos,
        line_info,
        local_vars,
        upvalue_names,
    })
}

fn read_constant(r: &mut impl std::io::Read) -> ChunkResult<Constant> {
    let tag = r.read_u8()?;
    Ok(match tag {
        TAG_NIL => Constant::Nil,
        TAG_BOOLEAN => Constant::Boolean(r.read_u8()? != 0),
        TAG_NUMBER_FLOAT => Constant::Float(r.read_f64::<LittleEndian>()?),
        TAG_NUMBER_INT => Constant::Integer(r.read_i64::<LittleEndian>()?),
        TAG_SHORT_STR | TAG_LONG_STR => Constant::Str(read_lua_string(r)?),
        other => return Err(ChunkError::BadConstantTag(other)),
    })
}

/// Serialize `proto` as a standalone binary chunk, matching the header and
/// field order [`load`] reads back.
pub fn dump(proto: &Prototype, w: &mut impl std::io::Write) -> ChunkResult<()> {
    write_header(w)?;
    w.write_u8(proto.upvalues.len() as u8)?;
    write_function(proto, w)?;
    Ok(())
}

fn write_header(w: &mut impl std::io::Write) -> ChunkResult<()> {
    w.write_all(LUA_SIGNATURE)?;
    w.write_u8(LUAC_VERSION)?;
    w.write_u8(LUAC_FORMAT)?;
    w.write_all(LUAC_DATA)?;
    w.write_u8(4)?; // cint
    w.write_u8(8)?; // size_t
    w.write_u8(4)?; // Instruction
    w.write_u8(8)?; // lua_Integer
    w.write_u8(8)?; // lua_Number
    w.write_i64::<LittleEndian>(LUAC_INT)?;
    w.write_f64::<LittleEndian>(LUAC_NUM)?;
    Ok(())
}

fn write_lua_string(s: &str, w: &mut impl std::io::Write) -> ChunkResult<()> {
    if s.is_empty() {
        w.write_u8(0)?;
        return Ok(());
    }
    let len = s.len() as u64 + 1;
    if len < 0xff {
        w.write_u8(len as u8)?;
    } else {
        w.write_u8(0xff)?;
        w.write_u64::<LittleEndian>(len)?;
    }
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn write_function(proto: &Prototype, w: &mut impl std::io::Write) -> ChunkResult<()> {
    write_lua_string(&proto.source, w)?;
    w.write_u32::<LittleEndian>(proto.line_defined as u32)?;
    w.write_u32::<LittleEndian>(proto.last_line_defined as u32)?;
    w.write_u8(proto.num_params)?;
    w.write_u8(proto.is_vararg as u8)?;
    w.write_u8(proto.max_stack_size)?;

    w.write_u32::<LittleEndian>(proto.code.len() as u32)?;
    for ins in &proto.code {
        w.write_u32::<LittleEndian>(*ins)?;
    }

    w.write_u32::<LittleEndian>(proto.constants.len() as u32)?;
    for c in &proto.constants {
        write_constant(c, w)?;
    }

    w.write_u32::<LittleEndian>(proto.upvalues.len() as u32)?;
    for u in &proto.upvalues {
        w.write_u8(u.in_stack as u8)?;
        w.write_u8(u.idx)?;
    }

    w.write_u32::<LittleEndian>(proto.protos.len() as u32)?;
    for p in &proto.protos {
        write_function(p, w)?;
    }

    w.write_u32::<LittleEndian>(proto.line_info.len() as u32)?;
    for l in &proto.line_info {
        w.write_u32::<LittleEndian>(*l as u32)?;
    }

    w.write_u32::<LittleEndian>(proto.local_vars.len() as u32)?;
    for lv in &proto.local_vars {
        write_lua_string(&lv.name, w)?;
        w.write_u32::<LittleEndian>(lv.start_pc as u32)?;
        w.write_u32::<LittleEndian>(lv.end_pc as u32)?;
    }

    w.write_u32::<LittleEndian>(proto.upvalue_names.len() as u32)?;
    for n in &proto.upvalue_names {
        write_lua_string(n, w)?;
    }

    Ok(())
}

fn write_constant(c: &Constant, w: &mut impl std::io::Write) -> ChunkResult<()> {
    match c {
        Constant::Nil => w.write_u8(TAG_NIL)?,
        Constant::Boolean(b) => {
            w.write_u8(TAG_BOOLEAN)?;
            w.write_u8(*b as u8)?;
        }
        Constant::Float(f) => {
            w.write_u8(TAG_NUMBER_FLOAT)?;
            w.write_f64::<LittleEndian>(*f)?;
        }
        Constant::Integer(i) => {
            w.write_u8(TAG_NUMBER_INT)?;
            w.write_i64::<LittleEndian>(*i)?;
        }
        Constant::Str(s) => {
            w.write_u8(if s.len() < 0xff - 1 { TAG_SHORT_STR } else { TAG_LONG_STR })?;
            write_lua_string(s, w)?;
        }
    }
    Ok(())
}
