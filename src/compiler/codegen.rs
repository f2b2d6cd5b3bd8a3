//! Single-pass AST-to-bytecode translation.
//!
//! Grounded on the teacher's `compiler/func_state.rs`/`compiler/code.rs`
//! emit-and-patch idiom and on `original_source/compiler/cg_*.go`'s
//! register-discharge and return-statement shapes (see DESIGN.md for the
//! global/`_ENV` upvalue convention, drawn from `cg_code_gen.go`'s
//! `fi.addLocVar("_ENV", 0)` seeding). Comparisons/`TEST`/`TESTSET` jump
//! polarities are grounded on `original_source/vm/inst_operators.go`.

use std::rc::Rc;

use crate::compiler::ast::{BinOp, Block, Expr, FunctionBody, Stat, TableField, UnOp};
use crate::compiler::code::*;
use crate::compiler::error::{CompileError, CompileResult};
use crate::compiler::func_state::FuncState;
use crate::lua_value::{Constant, Prototype};
use crate::lua_vm::lua_limits::{LFIELDS_PER_FLUSH, MAXINDEXRK};
use crate::lua_vm::opcode::OpCode;

/// Top-level entry point: compile a parsed chunk into its main prototype.
/// The chunk is treated as an anonymous vararg function with a single
/// upvalue, `_ENV`, through which every free name resolves.
pub fn compile_chunk(source: Rc<str>, chunk_name: &str, block: &Block) -> CompileResult<Prototype> {
    let mut cg = CodeGen { funcs: Vec::new(), chunk_name: chunk_name.to_string() };
    let mut fs = FuncState::new(source, 0, true);
    fs.add_upvalue("_ENV", false, 0);
    cg.funcs.push(fs);
    cg.compile_block(block)?;
    cg.finish_function(0);
    Ok(cg.funcs.pop().unwrap().into_prototype())
}

struct CodeGen {
    funcs: Vec<FuncState>,
    chunk_name: String,
}

/// Where a resolved name lives relative to the function currently compiling it.
enum VarLoc {
    Local(u8),
    Upval(u8),
}

fn is_multivalued(e: &Expr) -> bool {
    matches!(e, Expr::Call { .. } | Expr::MethodCall { .. } | Expr::Vararg)
}

impl CodeGen {
    fn cur(&self) -> &FuncState {
        self.funcs.last().unwrap()
    }

    fn cur_mut(&mut self) -> &mut FuncState {
        self.funcs.last_mut().unwrap()
    }

    fn err(&self, line: u32, msg: impl Into<String>) -> CompileError {
        CompileError::new(self.chunk_name.clone(), line, msg)
    }

    fn finish_function(&mut self, line: i32) {
        emit_return(self.cur_mut(), 0, 0, line);
    }

    // ---- name resolution ----

    /// Resolve `name` against `funcs[idx]`, walking outward and threading
    /// upvalue captures through every enclosing function on the way, the
    /// way `lparser.c`'s `singlevaraux` does with its recursive call.
    fn resolve_var(funcs: &mut [FuncState], idx: usize, name: &str) -> Option<VarLoc> {
        if let Some(slot) = funcs[idx].resolve_local(name) {
            return Some(VarLoc::Local(slot));
        }
        if let Some(u) = funcs[idx].resolve_upvalue_by_name(name) {
            return Some(VarLoc::Upval(u));
        }
        if idx == 0 {
            return None;
        }
        match Self::resolve_var(funcs, idx - 1, name) {
            Some(VarLoc::Local(slot)) => {
                funcs[idx - 1].mark_captured(slot);
                Some(VarLoc::Upval(funcs[idx].add_upvalue(name, true, slot)))
            }
            Some(VarLoc::Upval(u)) => Some(VarLoc::Upval(funcs[idx].add_upvalue(name, false, u))),
            None => None,
        }
    }

    fn env_loc(&mut self) -> VarLoc {
        let top = self.funcs.len() - 1;
        Self::resolve_var(&mut self.funcs, top, "_ENV").expect("_ENV always resolves: seeded on the root function")
    }

    fn string_const(&mut self, s: &str) -> u32 {
        self.cur_mut().constant_index(Constant::Str(Rc::from(s)))
    }

    // ---- blocks and statements ----

    fn compile_block(&mut self, block: &Block) -> CompileResult<()> {
        for stat in block {
            self.compile_stat(stat)?;
        }
        Ok(())
    }

    /// Compile a nested block in its own scope, closing any locals it
    /// captured via a closing `JMP` before control leaves.
    fn compile_scoped_block(&mut self, block: &Block, is_loop: bool, line: i32) -> CompileResult<Vec<usize>> {
        let to_nactive = self.cur().nactive();
        self.cur_mut().enter_scope(is_loop);
        self.compile_block(block)?;
        self.close_scope(to_nactive, line);
        Ok(self.cur_mut().leave_scope(to_nactive, is_loop))
    }

    fn close_scope(&mut self, to_nactive: u8, line: i32) {
        if let Some(slot) = self.cur().first_captured_from(to_nactive) {
            let jmp = emit_asbx(self.cur_mut(), OpCode::Jmp, slot as u32 + 1, 0, line);
            patch_jump_to_here(self.cur_mut(), jmp);
        }
    }

    fn compile_stat(&mut self, stat: &Stat) -> CompileResult<()> {
        match stat {
            Stat::Expr(e) => {
                let base = self.cur().freereg;
                self.compile_expr_discard(e)?;
                self.cur_mut().free_to(base);
                Ok(())
            }
            Stat::Local { names, exprs, line } => self.compile_local(names, exprs, *line as i32),
            Stat::Assign { targets, exprs, line } => self.compile_assign(targets, exprs, *line as i32),
            Stat::Do(body) => {
                self.compile_scoped_block(body, false, 0)?;
                Ok(())
            }
            Stat::While { cond, body } => self.compile_while(cond, body),
            Stat::Repeat { body, cond } => self.compile_repeat(body, cond),
            Stat::If { arms, else_block } => self.compile_if(arms, else_block),
            Stat::NumericFor { var, start, stop, step, body, line } => {
                self.compile_numeric_for(var, start, stop, step.as_ref(), body, *line as i32)
            }
            Stat::GenericFor { names, exprs, body, line } => self.compile_generic_for(names, exprs, body, *line as i32),
            Stat::FunctionDecl { target, body, is_method } => self.compile_function_decl(target, body, *is_method),
            Stat::LocalFunction { name, body } => self.compile_local_function(name, body),
            Stat::Return { exprs, line } => self.compile_return(exprs, *line as i32),
            Stat::Break => {
                let line = 0;
                let jmp = emit_jump(self.cur_mut(), line);
                self.cur_mut().add_break(jmp);
                Ok(())
            }
        }
    }

    /// Evaluate an expression purely for side effects (an expression
    /// statement must be a call — enforced by the parser).
    fn compile_expr_discard(&mut self, e: &Expr) -> CompileResult<()> {
        let reg = self.cur().freereg;
        match e {
            Expr::Call { func, args, line } => self.compile_call(func, args, None, reg, 1, *line as i32),
            Expr::MethodCall { obj, method, args, line } => {
                self.compile_call(obj, args, Some(method.as_str()), reg, 1, *line as i32)
            }
            _ => {
                self.compile_expr_to_reg(e, self.cur_mut().alloc_reg())?;
                Ok(())
            }
        }
    }

    fn compile_local(&mut self, names: &[String], exprs: &[Expr], line: i32) -> CompileResult<()> {
        let base = self.cur().freereg;
        self.compile_expr_list_adjusted(exprs, names.len(), line)?;
        for (i, name) in names.iter().enumerate() {
            self.cur_mut().declare_local(name, base + i as u8);
        }
        Ok(())
    }

    fn compile_local_function(&mut self, name: &str, body: &FunctionBody) -> CompileResult<()> {
        // The local is declared before the body compiles, so the function
        // can see itself for recursion.
        let reg = self.cur_mut().new_local(name);
        let proto_idx = self.compile_function_body(body)?;
        emit_abx(self.cur_mut(), OpCode::Closure, reg as u32, proto_idx, body.line as i32);
        Ok(())
    }

    fn compile_function_decl(&mut self, target: &Expr, body: &FunctionBody, is_method: bool) -> CompileResult<()> {
        let mut full_body = body.clone();
        if is_method {
            full_body.params.insert(0, "self".to_string());
        }
        let line = body.line as i32;
        let proto_idx = self.compile_function_body(&full_body)?;
        let base = self.cur().freereg;
        let reg = self.cur_mut().alloc_reg();
        emit_abx(self.cur_mut(), OpCode::Closure, reg as u32, proto_idx, line);
        self.compile_assign_to_target(target, reg, line)?;
        self.cur_mut().free_to(base);
        Ok(())
    }

    fn compile_function_body(&mut self, body: &FunctionBody) -> CompileResult<u32> {
        let source = self.cur().source.clone();
        let mut fs = FuncState::new(source, body.line as i32, body.is_vararg);
        fs.num_params = body.params.len() as u8;
        self.funcs.push(fs);
        for p in &body.params {
            self.cur_mut().new_local(p);
        }
        self.compile_block(&body.body)?;
        self.finish_function(body.line as i32);
        let finished = self.funcs.pop().unwrap();
        let proto = Rc::new(finished.into_prototype());
        let parent = self.cur_mut();
        parent.protos.push(proto);
        Ok((parent.protos.len() - 1) as u32)
    }

    fn compile_assign(&mut self, targets: &[Expr], exprs: &[Expr], line: i32) -> CompileResult<()> {
        let base = self.cur().freereg;
        self.compile_expr_list_adjusted(exprs, targets.len(), line)?;
        for (i, target) in targets.iter().enumerate() {
            self.compile_assign_to_target(target, base + i as u8, line)?;
        }
        self.cur_mut().free_to(base);
        Ok(())
    }

    fn compile_assign_to_target(&mut self, target: &Expr, value_reg: u8, line: i32) -> CompileResult<()> {
        match target {
            Expr::Name(name) => {
                let top = self.funcs.len() - 1;
                match Self::resolve_var(&mut self.funcs, top, name) {
                    Some(VarLoc::Local(slot)) => {
                        if slot != value_reg {
                            emit_move(self.cur_mut(), slot, value_reg, line);
                        }
                    }
                    Some(VarLoc::Upval(u)) => {
                        emit_abc(self.cur_mut(), OpCode::SetUpval, value_reg as u32, u as u32, 0, line);
                    }
                    None => {
                        let VarLoc::Upval(env) = self.env_loc() else { unreachable!("_ENV is always an upvalue") };
                        let k = self.string_const(name);
                        emit_abc(self.cur_mut(), OpCode::SetTabUp, env as u32, rk_from_const(k), rk_from_reg(value_reg), line);
                    }
                }
            }
            Expr::Index(t, k) => {
                let base = self.cur().freereg;
                let treg = self.cur_mut().alloc_reg();
                self.compile_expr_to_reg(t, treg)?;
                let krk = self.expr_to_rk(k)?;
                emit_abc(self.cur_mut(), OpCode::SetTable, treg as u32, krk, rk_from_reg(value_reg), line);
                self.cur_mut().free_to(base);
            }
            Expr::Field(t, name) => {
                let base = self.cur().freereg;
                let treg = self.cur_mut().alloc_reg();
                self.compile_expr_to_reg(t, treg)?;
                let k = self.string_const(name);
                emit_abc(self.cur_mut(), OpCode::SetTable, treg as u32, rk_from_const(k), rk_from_reg(value_reg), line);
                self.cur_mut().free_to(base);
            }
            _ => return Err(self.err(line as u32, "cannot assign to this expression")),
        }
        Ok(())
    }

    fn compile_return(&mut self, exprs: &[Expr], line: i32) -> CompileResult<()> {
        if exprs.is_empty() {
            emit_return(self.cur_mut(), 0, 0, line);
            return Ok(());
        }
        if exprs.len() == 1 {
            if let Expr::Name(name) = &exprs[0] {
                let top = self.funcs.len() - 1;
                if let Some(VarLoc::Local(slot)) = Self::resolve_var(&mut self.funcs, top, name) {
                    emit_return(self.cur_mut(), slot, 1, line);
                    return Ok(());
                }
            }
            let base = self.cur().freereg;
            match &exprs[0] {
                Expr::Call { func, args, line: cline } => {
                    let reg = self.cur_mut().alloc_reg();
                    self.compile_tail_call(func, args, None, reg, *cline as i32)?;
                    emit_return(self.cur_mut(), reg, -1, line);
                    return Ok(());
                }
                Expr::MethodCall { obj, method, args, line: cline } => {
                    let reg = self.cur_mut().alloc_reg();
                    self.compile_tail_call(obj, args, Some(method.as_str()), reg, *cline as i32)?;
                    emit_return(self.cur_mut(), reg, -1, line);
                    return Ok(());
                }
                _ => {
                    self.cur_mut().free_to(base);
                }
            }
        }
        let base = self.cur().freereg;
        let multiret = exprs.last().map(is_multivalued).unwrap_or(false);
        for (i, e) in exprs.iter().enumerate() {
            if i + 1 == exprs.len() && multiret {
                let reg = self.cur().freereg;
                self.compile_multret_expr(e, reg)?;
            } else {
                let reg = self.cur_mut().alloc_reg();
                self.compile_expr_to_reg(e, reg)?;
            }
        }
        if multiret {
            emit_return(self.cur_mut(), base, -1, line);
        } else {
            emit_return(self.cur_mut(), base, exprs.len() as i32, line);
        }
        Ok(())
    }

    // ---- control flow ----

    fn compile_if(&mut self, arms: &[(Expr, Block)], else_block: &Option<Block>) -> CompileResult<()> {
        let mut end_jumps = Vec::new();
        for (i, (cond, body)) in arms.iter().enumerate() {
            let false_jump = self.compile_condition(cond, false)?;
            self.compile_scoped_block(body, false, 0)?;
            if i + 1 < arms.len() || else_block.is_some() {
                end_jumps.push(emit_jump(self.cur_mut(), 0));
            }
            patch_jump_to_here(self.cur_mut(), false_jump);
        }
        if let Some(eb) = else_block {
            self.compile_scoped_block(eb, false, 0)?;
        }
        for j in end_jumps {
            patch_jump_to_here(self.cur_mut(), j);
        }
        Ok(())
    }

    fn compile_while(&mut self, cond: &Expr, body: &Block) -> CompileResult<()> {
        let top = self.cur().pc();
        let false_jump = self.compile_condition(cond, false)?;
        let pending = self.compile_scoped_block(body, true, 0)?;
        let back = emit_jump(self.cur_mut(), 0);
        patch_jump(self.cur_mut(), back, top);
        patch_jump_to_here(self.cur_mut(), false_jump);
        for b in pending {
            patch_jump_to_here(self.cur_mut(), b);
        }
        Ok(())
    }

    fn compile_repeat(&mut self, body: &Block, cond: &Expr) -> CompileResult<()> {
        let top = self.cur().pc();
        let to_nactive = self.cur().nactive();
        self.cur_mut().enter_scope(true);
        self.compile_block(body)?;
        // `until` can see locals declared in the body, so the condition is
        // compiled before the scope closes.
        let back = self.compile_condition(cond, false)?;
        patch_jump(self.cur_mut(), back, top);
        self.close_scope(to_nactive, 0);
        let pending = self.cur_mut().leave_scope(to_nactive, true);
        for b in pending {
            patch_jump_to_here(self.cur_mut(), b);
        }
        Ok(())
    }

    fn compile_numeric_for(
        &mut self,
        var: &str,
        start: &Expr,
        stop: &Expr,
        step: Option<&Expr>,
        body: &Block,
        line: i32,
    ) -> CompileResult<()> {
        let base = self.cur_mut().alloc_regs(3);
        self.compile_expr_to_reg(start, base)?;
        self.compile_expr_to_reg(stop, base + 1)?;
        match step {
            Some(e) => {
                self.compile_expr_to_reg(e, base + 2)?;
            }
            None => {
                let k = self.cur_mut().constant_index(Constant::Integer(1));
                emit_loadk(self.cur_mut(), base + 2, k, line);
            }
        }
        let prep = emit_asbx(self.cur_mut(), OpCode::ForPrep, base as u32, 0, line);
        let to_nactive = self.cur().nactive();
        self.cur_mut().enter_scope(true);
        self.cur_mut().declare_local(var, base + 3);
        let body_start = self.cur().pc();
        self.compile_block(body)?;
        self.close_scope(to_nactive, line);
        let pending = self.cur_mut().leave_scope(to_nactive, true);
        let loop_pc = emit_asbx(self.cur_mut(), OpCode::ForLoop, base as u32, 0, line);
        patch_jump(self.cur_mut(), prep, loop_pc);
        patch_jump(self.cur_mut(), loop_pc, body_start);
        for b in pending {
            patch_jump_to_here(self.cur_mut(), b);
        }
        self.cur_mut().free_to(base);
        Ok(())
    }

    fn compile_generic_for(&mut self, names: &[String], exprs: &[Expr], body: &Block, line: i32) -> CompileResult<()> {
        let base = self.cur().freereg;
        self.compile_expr_list_adjusted(exprs, 3, line)?;
        let prep = emit_jump(self.cur_mut(), line);
        let to_nactive = self.cur().nactive();
        self.cur_mut().enter_scope(true);
        for (i, name) in names.iter().enumerate() {
            self.cur_mut().declare_local(name, base + 3 + i as u8);
        }
        let body_start = self.cur().pc();
        self.compile_block(body)?;
        self.close_scope(to_nactive, line);
        let pending = self.cur_mut().leave_scope(to_nactive, true);
        patch_jump_to_here(self.cur_mut(), prep);
        emit_abc(self.cur_mut(), OpCode::TForCall, base as u32, 0, names.len() as u32, line);
        let loop_pc = emit_asbx(self.cur_mut(), OpCode::TForLoop, base as u32 + 2, 0, line);
        patch_jump(self.cur_mut(), loop_pc, body_start);
        for b in pending {
            patch_jump_to_here(self.cur_mut(), b);
        }
        self.cur_mut().free_to(base);
        Ok(())
    }

    /// Compile `cond` so that the returned (unpatched) `JMP` fires exactly
    /// when `cond`'s truth value equals `want`.
    fn compile_condition(&mut self, cond: &Expr, want: bool) -> CompileResult<usize> {
        let line = 0;
        match cond {
            Expr::Unary(UnOp::Not, inner, _) => self.compile_condition(inner, !want),
            Expr::Binary(op @ (BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge), l, r, bline) => {
                let (opcode, lhs, rhs, invert) = match op {
                    BinOp::Eq => (OpCode::Eq, l.as_ref(), r.as_ref(), false),
                    BinOp::Ne => (OpCode::Eq, l.as_ref(), r.as_ref(), true),
                    BinOp::Lt => (OpCode::Lt, l.as_ref(), r.as_ref(), false),
                    BinOp::Gt => (OpCode::Lt, r.as_ref(), l.as_ref(), false),
                    BinOp::Le => (OpCode::Le, l.as_ref(), r.as_ref(), false),
                    BinOp::Ge => (OpCode::Le, r.as_ref(), l.as_ref(), false),
                    _ => unreachable!(),
                };
                let rb = self.expr_to_rk(lhs)?;
                let rc = self.expr_to_rk(rhs)?;
                let a = (want ^ invert) as u32;
                emit_abc(self.cur_mut(), opcode, a, rb, rc, *bline as i32);
                Ok(emit_jump(self.cur_mut(), *bline as i32))
            }
            _ => {
                let base = self.cur().freereg;
                let reg = self.cur_mut().alloc_reg();
                self.compile_expr_to_reg(cond, reg)?;
                emit_abc(self.cur_mut(), OpCode::Test, reg as u32, 0, want as u32, line);
                let jmp = emit_jump(self.cur_mut(), line);
                self.cur_mut().free_to(base);
                Ok(jmp)
            }
        }
    }

    // ---- expressions ----

    /// Compile `e` and force its value into `reg` exactly.
    fn compile_expr_to_reg(&mut self, e: &Expr, reg: u8) -> CompileResult<()> {
        let line = expr_line(e);
        match e {
            Expr::Nil => {
                emit_loadnil(self.cur_mut(), reg, 1, line);
            }
            Expr::True => {
                emit_loadbool(self.cur_mut(), reg, true, false, line);
            }
            Expr::False => {
                emit_loadbool(self.cur_mut(), reg, false, false, line);
            }
            Expr::Int(i) => {
                let k = self.cur_mut().constant_index(Constant::Integer(*i));
                emit_loadk(self.cur_mut(), reg, k, line);
            }
            Expr::Float(f) => {
                let k = self.cur_mut().constant_index(Constant::Float(*f));
                emit_loadk(self.cur_mut(), reg, k, line);
            }
            Expr::Str(s) => {
                let k = self.string_const(s);
                emit_loadk(self.cur_mut(), reg, k, line);
            }
            Expr::Vararg => {
                emit_abc(self.cur_mut(), OpCode::VarArg, reg as u32, 2, 0, line);
            }
            Expr::Paren(inner) => {
                self.compile_expr_to_reg(inner, reg)?;
            }
            Expr::Name(name) => self.compile_name_to_reg(name, reg, line)?,
            Expr::Index(t, k) => {
                let base = self.cur().freereg;
                let treg = self.cur_mut().alloc_reg();
                self.compile_expr_to_reg(t, treg)?;
                let krk = self.expr_to_rk(k)?;
                emit_abc(self.cur_mut(), OpCode::GetTable, reg as u32, treg as u32, krk, line);
                self.cur_mut().free_to(base.max(reg + 1));
            }
            Expr::Field(t, name) => {
                let base = self.cur().freereg;
                let treg = self.cur_mut().alloc_reg();
                self.compile_expr_to_reg(t, treg)?;
                let k = self.string_const(name);
                emit_abc(self.cur_mut(), OpCode::GetTable, reg as u32, treg as u32, rk_from_const(k), line);
                self.cur_mut().free_to(base.max(reg + 1));
            }
            Expr::Call { func, args, line: cline } => {
                self.compile_call(func, args, None, reg, 2, *cline as i32)?;
            }
            Expr::MethodCall { obj, method, args, line: cline } => {
                self.compile_call(obj, args, Some(method.as_str()), reg, 2, *cline as i32)?;
            }
            Expr::Function(body) => {
                let proto_idx = self.compile_function_body(body)?;
                emit_abx(self.cur_mut(), OpCode::Closure, reg as u32, proto_idx, body.line as i32);
            }
            Expr::Table(fields) => self.compile_table(fields, reg, line)?,
            Expr::Binary(BinOp::And, l, r, bline) => self.compile_and_or(true, l, r, reg, *bline as i32)?,
            Expr::Binary(BinOp::Or, l, r, bline) => self.compile_and_or(false, l, r, reg, *bline as i32)?,
            Expr::Binary(op @ (BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge), ..) => {
                self.compile_relational_to_reg(op, e, reg, line)?
            }
            Expr::Binary(op, l, r, bline) => {
                let opcode = arith_opcode(op);
                let rb = self.expr_to_rk(l)?;
                let rc = self.expr_to_rk(r)?;
                if *op == BinOp::Concat {
                    let base = self.cur().freereg;
                    let lreg = self.cur_mut().alloc_reg();
                    self.compile_expr_to_reg(l, lreg)?;
                    let rreg = self.cur_mut().alloc_reg();
                    self.compile_expr_to_reg(r, rreg)?;
                    emit_abc(self.cur_mut(), OpCode::Concat, reg as u32, lreg as u32, rreg as u32, *bline as i32);
                    self.cur_mut().free_to(base.max(reg + 1));
                } else {
                    emit_abc(self.cur_mut(), opcode, reg as u32, rb, rc, *bline as i32);
                }
            }
            Expr::Unary(op, inner, uline) => {
                let opcode = match op {
                    UnOp::Neg => OpCode::Unm,
                    UnOp::Not => OpCode::Not,
                    UnOp::Len => OpCode::Len,
                };
                let base = self.cur().freereg;
                let ireg = self.cur_mut().alloc_reg();
                self.compile_expr_to_reg(inner, ireg)?;
                emit_abc(self.cur_mut(), opcode, reg as u32, ireg as u32, 0, *uline as i32);
                self.cur_mut().free_to(base.max(reg + 1));
            }
        }
        Ok(())
    }

    fn compile_relational_to_reg(&mut self, _op: &BinOp, e: &Expr, reg: u8, line: i32) -> CompileResult<()> {
        let jfalse = self.compile_condition(e, false)?;
        emit_loadbool(self.cur_mut(), reg, true, true, line);
        let f = emit_loadbool(self.cur_mut(), reg, false, false, line);
        patch_jump(self.cur_mut(), jfalse, f);
        Ok(())
    }

    fn compile_name_to_reg(&mut self, name: &str, reg: u8, line: i32) -> CompileResult<()> {
        let top = self.funcs.len() - 1;
        match Self::resolve_var(&mut self.funcs, top, name) {
            Some(VarLoc::Local(slot)) => {
                if slot != reg {
                    emit_move(self.cur_mut(), reg, slot, line);
                }
            }
            Some(VarLoc::Upval(u)) => {
                emit_abc(self.cur_mut(), OpCode::GetUpval, reg as u32, u as u32, 0, line);
            }
            None => {
                let VarLoc::Upval(env) = self.env_loc() else { unreachable!("_ENV is always an upvalue") };
                let k = self.string_const(name);
                emit_abc(self.cur_mut(), OpCode::GetTabUp, reg as u32, env as u32, rk_from_const(k), line);
            }
        }
        Ok(())
    }

    /// Compile a `Call`/`MethodCall`/`Vararg` so that *all* of its results
    /// land starting at `reg` (which must equal the current `freereg`).
    fn compile_multret_expr(&mut self, e: &Expr, reg: u8) -> CompileResult<()> {
        match e {
            Expr::Call { func, args, line } => self.compile_call(func, args, None, reg, 0, *line as i32),
            Expr::MethodCall { obj, method, args, line } => {
                self.compile_call(obj, args, Some(method.as_str()), reg, 0, *line as i32)
            }
            Expr::Vararg => {
                emit_abc(self.cur_mut(), OpCode::VarArg, reg as u32, 0, 0, 0);
                Ok(())
            }
            _ => self.compile_expr_to_reg(e, reg),
        }
    }

    fn compile_tail_call(&mut self, func: &Expr, args: &[Expr], method: Option<&str>, reg: u8, line: i32) -> CompileResult<()> {
        self.cur_mut().free_to(reg);
        self.compile_expr_to_reg(func, reg)?;
        let first_arg = if let Some(name) = method {
            let k = self.string_const(name);
            let obj_reg = self.cur_mut().alloc_reg();
            emit_abc(self.cur_mut(), OpCode::Self_, reg as u32, reg as u32, rk_from_const(k), line);
            obj_reg + 1
        } else {
            reg + 1
        };
        self.cur_mut().free_to(first_arg);
        let nargs = self.compile_args(args)?;
        let extra = if method.is_some() { 1 } else { 0 };
        let b = if nargs < 0 { 0 } else { (nargs + extra + 1) as u32 };
        emit_abc(self.cur_mut(), OpCode::TailCall, reg as u32, b, 0, line);
        Ok(())
    }

    /// Compile a call (or method call), placing `nresults` results (or all,
    /// if negative) starting at `reg`.
    fn compile_call(&mut self, func: &Expr, args: &[Expr], method: Option<&str>, reg: u8, nresults: i32, line: i32) -> CompileResult<()> {
        self.cur_mut().free_to(reg);
        self.compile_expr_to_reg(func, reg)?;
        let first_arg = if let Some(name) = method {
            let k = self.string_const(name);
            let obj_reg = self.cur_mut().alloc_reg();
            emit_abc(self.cur_mut(), OpCode::Self_, reg as u32, reg as u32, rk_from_const(k), line);
            obj_reg + 1
        } else {
            reg + 1
        };
        self.cur_mut().free_to(first_arg);
        let nargs = self.compile_args(args)?;
        let extra = if method.is_some() { 1 } else { 0 };
        let b = if nargs < 0 { 0 } else { (nargs + extra + 1) as u32 };
        let c = if nresults < 0 { 0 } else { (nresults + 1) as u32 };
        emit_abc(self.cur_mut(), OpCode::Call, reg as u32, b, c, line);
        if nresults >= 0 {
            self.cur_mut().free_to(reg + nresults as u8);
        } else {
            self.cur_mut().free_to(reg + 1);
        }
        Ok(())
    }

    /// Compile an argument list; returns the argument count, or -1 if the
    /// last argument is multivalued (all its results are passed).
    fn compile_args(&mut self, args: &[Expr]) -> CompileResult<i32> {
        if args.is_empty() {
            return Ok(0);
        }
        for a in &args[..args.len() - 1] {
            let r = self.cur_mut().alloc_reg();
            self.compile_expr_to_reg(a, r)?;
        }
        let last = args.last().unwrap();
        if is_multivalued(last) {
            let r = self.cur().freereg;
            self.compile_multret_expr(last, r)?;
            Ok(-1)
        } else {
            let r = self.cur_mut().alloc_reg();
            self.compile_expr_to_reg(last, r)?;
            Ok(args.len() as i32)
        }
    }

    fn compile_and_or(&mut self, is_and: bool, l: &Expr, r: &Expr, reg: u8, line: i32) -> CompileResult<()> {
        self.compile_expr_to_reg(l, reg)?;
        let c = if is_and { 0 } else { 1 };
        emit_abc(self.cur_mut(), OpCode::TestSet, reg as u32, reg as u32, c, line);
        let jmp = emit_jump(self.cur_mut(), line);
        self.compile_expr_to_reg(r, reg)?;
        patch_jump_to_here(self.cur_mut(), jmp);
        Ok(())
    }

    fn compile_table(&mut self, fields: &[TableField], target: u8, line: i32) -> CompileResult<()> {
        let arr_n = fields.iter().filter(|f| matches!(f, TableField::Positional(_))).count();
        let hash_n = fields.len() - arr_n;
        emit_abc(self.cur_mut(), OpCode::NewTable, target as u32, arr_n.min(255) as u32, hash_n.min(255) as u32, line);
        let array_base = target + 1;
        self.cur_mut().free_to(array_base);
        let mut pending: u32 = 0;
        let n = fields.len();
        for (i, f) in fields.iter().enumerate() {
            match f {
                TableField::Positional(e) => {
                    if i + 1 == n && is_multivalued(e) {
                        let reg = self.cur().freereg;
                        self.compile_multret_expr(e, reg)?;
                        emit_abc(self.cur_mut(), OpCode::SetList, target as u32, 0, 1, line);
                        self.cur_mut().free_to(array_base);
                        pending = 0;
                    } else {
                        let r = self.cur_mut().alloc_reg();
                        self.compile_expr_to_reg(e, r)?;
                        pending += 1;
                        if pending >= LFIELDS_PER_FLUSH {
                            emit_abc(self.cur_mut(), OpCode::SetList, target as u32, pending, 1, line);
                            self.cur_mut().free_to(array_base);
                            pending = 0;
                        }
                    }
                }
                TableField::Named(name, e) => {
                    let base = self.cur().freereg;
                    let vreg = self.cur_mut().alloc_reg();
                    self.compile_expr_to_reg(e, vreg)?;
                    let k = self.string_const(name);
                    emit_abc(self.cur_mut(), OpCode::SetTable, target as u32, rk_from_const(k), rk_from_reg(vreg), line);
                    self.cur_mut().free_to(base);
                }
                TableField::Indexed(ke, ve) => {
                    let base = self.cur().freereg;
                    let kreg = self.cur_mut().alloc_reg();
                    self.compile_expr_to_reg(ke, kreg)?;
                    let vreg = self.cur_mut().alloc_reg();
                    self.compile_expr_to_reg(ve, vreg)?;
                    emit_abc(self.cur_mut(), OpCode::SetTable, target as u32, rk_from_reg(kreg), rk_from_reg(vreg), line);
                    self.cur_mut().free_to(base);
                }
            }
        }
        if pending > 0 {
            emit_abc(self.cur_mut(), OpCode::SetList, target as u32, pending, 1, line);
            self.cur_mut().free_to(array_base);
        }
        self.cur_mut().free_to(target + 1);
        Ok(())
    }

    /// Compile `exprs`, leaving exactly `want` values in consecutive
    /// registers starting at the current `freereg`: padding with `nil` if
    /// there are too few, expanding the trailing call/vararg if there are
    /// too many wanted, truncating (after evaluating, for side effects) if
    /// there are more expressions than wanted.
    fn compile_expr_list_adjusted(&mut self, exprs: &[Expr], want: usize, line: i32) -> CompileResult<()> {
        let base = self.cur().freereg;
        if exprs.is_empty() {
            if want > 0 {
                let r = self.cur_mut().alloc_regs(want as u8);
                emit_loadnil(self.cur_mut(), r, want as u8, line);
            }
            return Ok(());
        }
        let n = exprs.len();
        for (i, e) in exprs.iter().enumerate() {
            let is_last = i + 1 == n;
            if is_last && is_multivalued(e) && want > n - 1 {
                let reg = self.cur().freereg;
                let need = (want - (n - 1)) as i32;
                self.compile_multret_n(e, reg, need)?;
            } else {
                let r = self.cur_mut().alloc_reg();
                self.compile_expr_to_reg(e, r)?;
            }
        }
        if want > n {
            let extra = want - n;
            let r = self.cur_mut().alloc_regs(extra as u8);
            emit_loadnil(self.cur_mut(), r, extra as u8, line);
        } else if want < n {
            self.cur_mut().free_to(base + want as u8);
        }
        Ok(())
    }

    /// Like [`Self::compile_multret_expr`] but requests exactly `need`
    /// results (`CALL`'s `C`/`VARARG`'s `B` encode `need + 1`) instead of
    /// "all of them".
    fn compile_multret_n(&mut self, e: &Expr, reg: u8, need: i32) -> CompileResult<()> {
        match e {
            Expr::Call { func, args, line } => self.compile_call(func, args, None, reg, need, *line as i32),
            Expr::MethodCall { obj, method, args, line } => {
                self.compile_call(obj, args, Some(method.as_str()), reg, need, *line as i32)
            }
            Expr::Vararg => {
                emit_abc(self.cur_mut(), OpCode::VarArg, reg as u32, (need + 1) as u32, 0, 0);
                self.cur_mut().free_to(reg + need.max(0) as u8);
                Ok(())
            }
            _ => self.compile_expr_to_reg(e, reg),
        }
    }

    /// Compile `e` to an RK operand: a register or constant-pool index,
    /// whichever avoids materializing a fresh temporary.
    fn expr_to_rk(&mut self, e: &Expr) -> CompileResult<u32> {
        match e {
            Expr::Nil | Expr::True | Expr::False | Expr::Int(_) | Expr::Float(_) | Expr::Str(_) => {
                let k = self.const_index_of(e);
                if k <= MAXINDEXRK as u32 {
                    return Ok(rk_from_const(k));
                }
                let r = self.cur_mut().alloc_reg();
                self.compile_expr_to_reg(e, r)?;
                Ok(rk_from_reg(r))
            }
            Expr::Name(name) => {
                let top = self.funcs.len() - 1;
                if let Some(VarLoc::Local(slot)) = Self::resolve_var(&mut self.funcs, top, name) {
                    return Ok(rk_from_reg(slot));
                }
                let r = self.cur_mut().alloc_reg();
                self.compile_name_to_reg(name, r, 0)?;
                Ok(rk_from_reg(r))
            }
            _ => {
                let r = self.cur_mut().alloc_reg();
                self.compile_expr_to_reg(e, r)?;
                Ok(rk_from_reg(r))
            }
        }
    }

    fn const_index_of(&mut self, e: &Expr) -> u32 {
        let c = match e {
            Expr::Nil => Constant::Nil,
            Expr::True => Constant::Boolean(true),
            Expr::False => Constant::Boolean(false),
            Expr::Int(i) => Constant::Integer(*i),
            Expr::Float(f) => Constant::Float(*f),
            Expr::Str(s) => Constant::Str(Rc::from(s.as_str())),
            _ => unreachable!(),
        };
        self.cur_mut().constant_index(c)
    }
}

fn arith_opcode(op: &BinOp) -> OpCode {
    match op {
        BinOp::Add => OpCode::Add,
        BinOp::Sub => OpCode::Sub,
        BinOp::Mul => OpCode::Mul,
        BinOp::Mod => OpCode::Mod,
        BinOp::Pow => OpCode::Pow,
        BinOp::Div => OpCode::Div,
        BinOp::IDiv => OpCode::IDiv,
        BinOp::Concat => OpCode::Concat,
        _ => unreachable!("handled separately"),
    }
}

fn expr_line(e: &Expr) -> i32 {
    match e {
        Expr::Call { line, .. } | Expr::MethodCall { line, .. } => *line as i32,
        Expr::Binary(_, _, _, line) | Expr::Unary(_, _, line) => *line as i32,
        Expr::Function(b) => b.line as i32,
        _ => 0,
    }
}
