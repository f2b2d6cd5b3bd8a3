//! `LuaState`: the stack of activation frames, the globals/registry tables,
//! and the pending-error slot that [`super::execute`] threads `Result`s
//! through instead of unwinding.
//!
//! Grounded on the teacher's `lua_vm/lua_state.rs` (call-frame stack,
//! registry, `SafeOption`) and its `lua_call_frame.rs` (per-frame open
//! upvalue tracking), simplified to safe `Rc<RefCell<_>>` registers instead
//! of a shared raw-pointer stack (see DESIGN.md).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::lua_value::{Closure, LuaTable, LuaValue, StringInterner, TableRef, Upvalue, UpvalueRef};
use crate::lua_vm::lua_error::{LuaError, LuaErrorSource, LuaFullError};
use crate::lua_vm::lua_limits::{LUAI_MAXSTACK, MAX_CALL_DEPTH};

/// Registry pseudo-indices, matching real Lua's reserved slots (§6).
pub const LUA_RIDX_MAINTHREAD: i64 = 1;
pub const LUA_RIDX_GLOBALS: i64 = 2;

/// Runtime limits supplied at VM construction, mirroring the teacher's
/// `SafeOption`.
#[derive(Debug, Clone)]
pub struct VmOptions {
    pub max_call_depth: usize,
    pub max_stack_size: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions { max_call_depth: MAX_CALL_DEPTH, max_stack_size: LUAI_MAXSTACK }
    }
}

/// One activation record: a closure's registers, its varargs, the program
/// counter, and the open-upvalue cells captured from its registers so far.
pub struct Frame {
    pub closure: Rc<Closure>,
    pub registers: Vec<LuaValue>,
    /// Logical count of valid registers, `>= registers.len()` only while a
    /// multiret call/vararg result is pending consumption by the following
    /// instruction (CALL/RETURN/SETLIST/VARARG with B or C == 0).
    pub top: usize,
    pub varargs: Vec<LuaValue>,
    pub pc: usize,
    pub open_upvalues: HashMap<u8, UpvalueRef>,
    /// Line of the instruction last dispatched, for error messages/tracebacks.
    pub current_line: i32,
}

impl Frame {
    fn new(closure: Rc<Closure>, registers: Vec<LuaValue>, varargs: Vec<LuaValue>) -> Self {
        let top = registers.len();
        Frame { closure, registers, top, varargs, pc: 0, open_upvalues: HashMap::new(), current_line: 0 }
    }

    /// Grow the register file so index `idx` is addressable, the way a real
    /// stack's `luaD_checkstack` extends past the statically-sized frame
    /// when a multiret call leaves more live values than `MaxStackSize`
    /// accounted for.
    pub fn ensure_reg(&mut self, idx: usize) {
        if idx >= self.registers.len() {
            self.registers.resize(idx + 1, LuaValue::Nil);
        }
    }

    pub fn get(&self, idx: u8) -> LuaValue {
        self.registers.get(idx as usize).cloned().unwrap_or(LuaValue::Nil)
    }

    pub fn set(&mut self, idx: u8, v: LuaValue) {
        self.ensure_reg(idx as usize);
        self.registers[idx as usize] = v;
    }
}

pub struct LuaState {
    pub globals: TableRef,
    pub registry: TableRef,
    pub frames: Vec<Frame>,
    pub interner: StringInterner,
    pub options: VmOptions,
    /// The value most recently raised by `error()`/a failing opcode; read by
    /// `pcall`/`xpcall` and by the top-level caller when no protected call
    /// catches it.
    pub error_value: LuaValue,
    pub traceback: Vec<String>,
}

impl LuaState {
    pub fn new(options: VmOptions) -> Self {
        let globals: TableRef = Rc::new(RefCell::new(LuaTable::with_capacity(0, 32)));
        let registry: TableRef = Rc::new(RefCell::new(LuaTable::with_capacity(0, 4)));
        registry.borrow_mut().set(LuaValue::Integer(LUA_RIDX_GLOBALS), LuaValue::table(globals.clone()));
        LuaState {
            globals,
            registry,
            frames: Vec::new(),
            interner: StringInterner::default(),
            options,
            error_value: LuaValue::Nil,
            traceback: Vec::new(),
        }
    }

    pub fn intern(&mut self, s: &str) -> Rc<str> {
        self.interner.intern(s)
    }

    /// Current (innermost) frame. Panics if called outside `run_frame`,
    /// which never happens: every opcode handler runs with at least one
    /// frame pushed.
    pub fn current(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("dispatch always runs with an active frame")
    }

    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    pub fn push_frame(&mut self, closure: Rc<Closure>, registers: Vec<LuaValue>, varargs: Vec<LuaValue>) -> usize {
        self.frames.push(Frame::new(closure, registers, varargs));
        self.frames.len() - 1
    }

    pub fn pop_frame(&mut self) -> Frame {
        self.frames.pop().expect("pop_frame without a matching push_frame")
    }

    /// Read an upvalue cell's current value, whether open (live in some
    /// ancestor frame's registers) or closed (owned).
    pub fn read_upvalue(&self, uv: &UpvalueRef) -> LuaValue {
        let snapshot = match &*uv.borrow() {
            Upvalue::Open { frame_depth, register } => Some((*frame_depth, *register)),
            Upvalue::Closed(v) => return v.clone(),
        };
        let (frame_depth, register) = snapshot.unwrap();
        self.frames[frame_depth].registers.get(register).cloned().unwrap_or(LuaValue::Nil)
    }

    pub fn write_upvalue(&mut self, uv: &UpvalueRef, value: LuaValue) {
        let snapshot = match &*uv.borrow() {
            Upvalue::Open { frame_depth, register } => Some((*frame_depth, *register)),
            Upvalue::Closed(_) => None,
        };
        match snapshot {
            Some((frame_depth, register)) => {
                self.frames[frame_depth].ensure_reg(register);
                self.frames[frame_depth].registers[register] = value;
            }
            None => *uv.borrow_mut() = Upvalue::Closed(value),
        }
    }

    /// Find (or create) the open-upvalue cell for `register` in the frame
    /// at `frame_depth`, deduping so every closure capturing the same live
    /// local shares one cell.
    pub fn open_upvalue(&mut self, frame_depth: usize, register: u8) -> UpvalueRef {
        if let Some(existing) = self.frames[frame_depth].open_upvalues.get(&register) {
            return existing.clone();
        }
        let cell = Upvalue::open(frame_depth, register as usize);
        self.frames[frame_depth].open_upvalues.insert(register, cell.clone());
        cell
    }

    /// Close every open upvalue in frame `frame_depth` at or above
    /// `from_register` — invariant (e): closing at slot `s` closes all
    /// cells with slot `>= s-1` is honored by callers passing `s-1` already
    /// folded into `from_register`.
    pub fn close_upvalues_from(&mut self, frame_depth: usize, from_register: u8) {
        let to_close: Vec<u8> =
            self.frames[frame_depth].open_upvalues.keys().copied().filter(|&r| r >= from_register).collect();
        for r in to_close {
            if let Some(cell) = self.frames[frame_depth].open_upvalues.remove(&r) {
                let value = self.frames[frame_depth].get(r);
                *cell.borrow_mut() = Upvalue::Closed(value);
            }
        }
    }

    /// Raise a runtime error: records `message` as the pending error value
    /// and returns the cheap tag that propagates through `dispatch`.
    pub fn raise(&mut self, kind: LuaError, message: impl Into<String>) -> LuaError {
        let chunk_name = self.frames.last().map(|f| self.source_name(f)).unwrap_or_default();
        let line = self.frames.last().map(|f| f.current_line).unwrap_or(0);
        self.error_value = LuaValue::string(format!("{chunk_name}:{line}: {}", message.into()));
        kind
    }

    /// Raise with an already-built Lua value (e.g. `error({})` with a
    /// table), bypassing the `file:line:` prefix real Lua only adds to
    /// string messages.
    pub fn raise_value(&mut self, kind: LuaError, value: LuaValue) -> LuaError {
        self.error_value = value;
        kind
    }

    fn source_name(&self, frame: &Frame) -> String {
        match &*frame.closure {
            Closure::Lua(c) => c.proto.source.to_string(),
            Closure::Host(c) => format!("[C:{}]", c.name),
        }
    }

    pub fn traceback_snapshot(&self) -> Vec<String> {
        self.frames
            .iter()
            .rev()
            .map(|f| format!("{}:{}: in {}", self.source_name(f), f.current_line, f.closure.name()))
            .collect()
    }

    /// Convert the current pending error into a [`LuaFullError`] for a
    /// caller with no protected-call boundary (the CLI, or `LuaVm::execute`
    /// directly).
    pub fn take_full_error(&mut self, kind: LuaError) -> LuaFullError {
        let message = self.error_value.to_lua_string();
        let traceback = std::mem::take(&mut self.traceback);
        self.error_value = LuaValue::Nil;
        LuaFullError { kind: LuaErrorSource::Runtime(kind), message, traceback }
    }
}
