//! Per-function compilation state: the register file, active locals,
//! upvalue table, constant pool, and in-progress instruction stream for one
//! function body being translated.
//!
//! Grounded on the teacher's `compiler/func_state.rs` (`FuncState`/`VarDesc`
//! naming), simplified: code generation here runs over an already-built AST
//! rather than interleaved with the lexer, so `FuncState` holds no lexer
//! reference; and `goto`/labels and the `<const>`/`<close>` attributes are
//! dropped (out of scope — see DESIGN.md).

use std::rc::Rc;

use crate::lua_value::{Constant, Prototype, UpvalDesc};
use crate::lua_vm::lua_limits::{MAXUPVAL, MAXVARS, NO_REG};

/// One declared local variable, tracked for the whole function's lifetime
/// (even after it goes out of scope) so debug info can be emitted.
pub struct LocalVar {
    pub name: String,
    pub slot: u8,
    pub start_pc: i32,
    pub end_pc: i32,
    pub captured: bool,
}

/// A local currently in scope: points back at its `LocalVar` record.
struct ActiveLocal {
    name: String,
    slot: u8,
    record: usize,
}

/// A pending `break` jump, recorded at the innermost enclosing loop.
pub struct BreakScope {
    pub pending: Vec<usize>,
}

pub struct FuncState {
    pub source: Rc<str>,
    pub line_defined: i32,
    pub num_params: u8,
    pub is_vararg: bool,

    pub code: Vec<u32>,
    pub line_info: Vec<i32>,
    constants: Vec<Constant>,
    pub protos: Vec<Rc<Prototype>>,
    pub upvalues: Vec<UpvalDesc>,

    active: Vec<ActiveLocal>,
    pub locals: Vec<LocalVar>,
    pub scope_level: u32,

    pub freereg: u8,
    pub max_stack_size: u8,

    pub break_scopes: Vec<BreakScope>,
}

impl FuncState {
    pub fn new(source: Rc<str>, line_defined: i32, is_vararg: bool) -> Self {
        FuncState {
            source,
            line_defined,
            num_params: 0,
            is_vararg,
            code: Vec::new(),
            line_info: Vec::new(),
            constants: Vec::new(),
            protos: Vec::new(),
            upvalues: Vec::new(),
            active: Vec::new(),
            locals: Vec::new(),
            scope_level: 0,
            freereg: 0,
            max_stack_size: 2,
            break_scopes: Vec::new(),
        }
    }

    // ---- registers ----

    /// Allocate and return the next free register, bumping `max_stack_size`.
    pub fn alloc_reg(&mut self) -> u8 {
        let r = self.freereg;
        self.freereg += 1;
        if self.freereg as u16 > self.max_stack_size as u16 {
            self.max_stack_size = self.freereg;
        }
        r
    }

    pub fn alloc_regs(&mut self, n: u8) -> u8 {
        let base = self.freereg;
        for _ in 0..n {
            self.alloc_reg();
        }
        base
    }

    /// Free back to `to_reg`, LIFO. Only valid for a register above every
    /// active local's slot (locals are freed via `leave_scope`, not this).
    pub fn free_to(&mut self, to_reg: u8) {
        self.freereg = to_reg;
    }

    pub fn nactive(&self) -> u8 {
        self.active.len() as u8
    }

    // ---- locals ----

    pub fn new_local(&mut self, name: &str) -> u8 {
        let slot = self.alloc_reg();
        self.declare_local(name, slot)
    }

    /// Register `name` against an already-materialized register (used for
    /// `local` statements, whose initializer values are compiled directly
    /// into the registers that become the locals — no extra move).
    pub fn declare_local(&mut self, name: &str, slot: u8) -> u8 {
        let record = self.locals.len();
        self.locals.push(LocalVar {
            name: name.to_string(),
            slot,
            start_pc: self.code.len() as i32,
            end_pc: -1,
            captured: false,
        });
        self.active.push(ActiveLocal { name: name.to_string(), slot, record });
        assert!(self.active.len() <= MAXVARS, "too many local variables");
        slot
    }

    /// Resolve `name` to a register among currently active locals, most
    /// recently declared first — this is exactly what a `prev`-chained
    /// shadow map would return, without needing a separate map.
    pub fn resolve_local(&self, name: &str) -> Option<u8> {
        self.active.iter().rev().find(|l| l.name == name).map(|l| l.slot)
    }

    pub fn mark_captured(&mut self, slot: u8) {
        if let Some(l) = self.active.iter().find(|l| l.slot == slot) {
            self.locals[l.record].captured = true;
        }
    }

    pub fn is_captured(&self, slot: u8) -> bool {
        self.active.iter().find(|l| l.slot == slot).map(|l| self.locals[l.record].captured).unwrap_or(false)
    }

    pub fn enter_scope(&mut self, is_loop: bool) {
        self.scope_level += 1;
        if is_loop {
            self.break_scopes.push(BreakScope { pending: Vec::new() });
        }
    }

    /// Leave the current scope, closing out locals declared within it.
    /// Returns the break-scope's pending jumps if this scope was a loop.
    pub fn leave_scope(&mut self, to_nactive: u8, was_loop: bool) -> Vec<usize> {
        while self.active.len() > to_nactive as usize {
            let l = self.active.pop().unwrap();
            self.locals[l.record].end_pc = self.code.len() as i32;
        }
        self.free_to(to_nactive);
        self.scope_level -= 1;
        if was_loop {
            self.break_scopes.pop().map(|b| b.pending).unwrap_or_default()
        } else {
            Vec::new()
        }
    }

    /// Lowest slot among currently active locals at or beyond `to_nactive`
    /// that has been captured by a nested closure, if any. Codegen uses this
    /// just before leaving a scope to decide whether a closing `JMP` (its
    /// `A` field signals "close upvalues from `R[A-1]` up") is needed.
    pub fn first_captured_from(&self, to_nactive: u8) -> Option<u8> {
        self.active[to_nactive as usize..]
            .iter()
            .map(|l| l.slot)
            .filter(|&slot| self.is_captured(slot))
            .min()
    }

    pub fn add_break(&mut self, pc: usize) {
        self.break_scopes.last_mut().expect("break outside loop").pending.push(pc);
    }

    // ---- constants ----

    pub fn constant_index(&mut self, c: Constant) -> u32 {
        if let Some(idx) = self.constants.iter().position(|k| *k == c) {
            return idx as u32;
        }
        self.constants.push(c);
        (self.constants.len() - 1) as u32
    }

    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    // ---- upvalues ----

    /// Add (or find) an upvalue descriptor capturing the given parent slot
    /// (`in_stack = true`) or parent-upvalue index (`in_stack = false`).
    pub fn add_upvalue(&mut self, name: &str, in_stack: bool, idx: u8) -> u8 {
        for (i, u) in self.upvalues.iter().enumerate() {
            if u.in_stack == in_stack && u.idx == idx {
                return i as u8;
            }
        }
        assert!(self.upvalues.len() < MAXUPVAL, "too many upvalues");
        self.upvalues.push(UpvalDesc { in_stack, idx, name: name.to_string() });
        (self.upvalues.len() - 1) as u8
    }

    pub fn resolve_upvalue_by_name(&self, name: &str) -> Option<u8> {
        self.upvalues.iter().position(|u| u.name == name).map(|i| i as u8)
    }

    // ---- code emission ----

    pub fn emit(&mut self, instr: u32, line: i32) -> usize {
        self.code.push(instr);
        self.line_info.push(line);
        self.code.len() - 1
    }

    pub fn pc(&self) -> usize {
        self.code.len()
    }

    pub fn no_reg() -> u32 {
        NO_REG
    }

    pub fn into_prototype(self) -> Prototype {
        let local_vars = self
            .locals
            .iter()
            .map(|l| crate::lua_value::LocalVarDesc {
                name: l.name.clone(),
                start_pc: l.start_pc,
                end_pc: if l.end_pc < 0 { self.code.len() as i32 } else { l.end_pc },
            })
            .collect();
        let upvalue_names = self.upvalues.iter().map(|u| u.name.clone()).collect();
        Prototype {
            source: self.source,
            line_defined: self.line_defined,
            last_line_defined: self.line_info.last().copied().unwrap_or(self.line_defined),
            num_params: self.num_params,
            is_vararg: self.is_vararg,
            max_stack_size: self.max_stack_size.max(2),
            code: self.code,
            constants: self.constants,
            upvalues: self.upvalues,
            protos: self.protos,
            line_info: self.line_info,
            local_vars,
            upvalue_names,
        }
    }
}
