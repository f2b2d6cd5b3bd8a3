//! Recursive-descent parser. Produces an AST obeying Lua's precedence and
//! associativity rules, folding constants as each node is built.
//!
//! Grounded on `original_source`'s parser for the exact precedence table
//! and constant-folding rules, styled after the teacher's parser module
//! split (lexer feeds a one-token-lookahead parser).

use super::ast::*;
use super::error::{CompileError, CompileResult};
use super::lexer::Lexer;
use super::token::{Token, TokenKind};

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    chunk_name: String,
}

/// Binary operator binding priorities: (left, right). A right priority
/// lower than left makes the operator right-associative (`..`, `^`).
fn priority(op: &BinOp) -> (i32, i32) {
    use BinOp::*;
    match op {
        Or => (1, 1),
        And => (2, 2),
        Lt | Gt | Le | Ge | Ne | Eq => (3, 3),
        Concat => (9, 8), // right-assoc
        Add | Sub => (10, 10),
        Mul | Div | IDiv | Mod => (11, 11),
        Pow => (14, 13), // right-assoc, binds tighter than unary
    }
}

use crate::lua_vm::lua_limits::UNARY_PRIORITY;

impl<'a> Parser<'a> {
    pub fn new(src: &'a str, chunk_name: &str) -> Self {
        Parser { lexer: Lexer::new(src, chunk_name), chunk_name: chunk_name.to_string() }
    }

    fn err(&self, line: u32, msg: impl Into<String>) -> CompileError {
        CompileError::new(&self.chunk_name, line, msg)
    }

    fn peek(&mut self) -> CompileResult<Token> {
        self.lexer.lookahead().cloned()
    }

    fn advance(&mut self) -> CompileResult<Token> {
        self.lexer.next_token()
    }

    fn check(&mut self, k: &TokenKind) -> CompileResult<bool> {
        Ok(&self.peek()?.kind == k)
    }

    fn accept(&mut self, k: &TokenKind) -> CompileResult<bool> {
        if self.check(k)? {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, k: TokenKind) -> CompileResult<Token> {
        let t = self.advance()?;
        if t.kind == k {
            Ok(t)
        } else {
            Err(self.err(t.line, format!("'{:?}' expected near '{}'", k, t.kind.describe())))
        }
    }

    fn expect_name(&mut self) -> CompileResult<String> {
        let t = self.advance()?;
        match t.kind {
            TokenKind::Name(n) => Ok(n),
            _ => Err(self.err(t.line, format!("<name> expected near '{}'", t.kind.describe()))),
        }
    }

    pub fn parse_chunk(&mut self) -> CompileResult<Block> {
        let block = self.parse_block()?;
        let t = self.peek()?;
        if t.kind != TokenKind::Eof {
            return Err(self.err(t.line, format!("syntax error near '{}'", t.kind.describe())));
        }
        Ok(block)
    }

    fn block_follow(&mut self) -> CompileResult<bool> {
        use TokenKind::*;
        Ok(matches!(self.peek()?.kind, Eof | End | Else | Elseif | Until))
    }

    fn parse_block(&mut self) -> CompileResult<Block> {
        let mut stats = Vec::new();
        while !self.block_follow()? {
            if self.check(&TokenKind::Return)? {
                stats.push(self.parse_return()?);
                break;
            }
            if let Some(s) = self.parse_statement()? {
                stats.push(s);
            }
        }
        Ok(stats)
    }

    fn parse_return(&mut self) -> CompileResult<Stat> {
        let line = self.advance()?.line; // `return`
        let exprs = if self.block_follow()? || self.check(&TokenKind::Semi)? {
            Vec::new()
        } else {
            self.parse_expr_list()?
        };
        self.accept(&TokenKind::Semi)?;
        Ok(Stat::Return { exprs, line })
    }

    fn parse_statement(&mut self) -> CompileResult<Option<Stat>> {
        use TokenKind::*;
        let t = self.peek()?;
        match t.kind {
            Semi => {
                self.advance()?;
                Ok(None)
            }
            Break => {
                self.advance()?;
                Ok(Some(Stat::Break))
            }
            Do => {
                self.advance()?;
                let body = self.parse_block()?;
                self.expect(End)?;
                Ok(Some(Stat::Do(body)))
            }
            While => {
                self.advance()?;
                let cond = self.parse_expr()?;
                self.expect(Do)?;
                let body = self.parse_block()?;
                self.expect(End)?;
                Ok(Some(Stat::While { cond, body }))
            }
            Repeat => {
                self.advance()?;
                let body = self.parse_block()?;
                self.expect(Until)?;
                let cond = self.parse_expr()?;
                Ok(Some(Stat::Repeat { body, cond }))
            }
            If => Ok(Some(self.parse_if()?)),
            For => Ok(Some(self.parse_for()?)),
            Function => Ok(Some(self.parse_function_stat()?)),
            Local => Ok(Some(self.parse_local()?)),
            _ => Ok(Some(self.parse_expr_stat()?)),
        }
    }

    fn parse_if(&mut self) -> CompileResult<Stat> {
        self.advance()?; // if
        let mut arms = Vec::new();
        let cond = self.parse_expr()?;
        self.expect(TokenKind::Then)?;
        let body = self.parse_block()?;
        arms.push((cond, body));
        loop {
            if self.accept(&TokenKind::Elseif)? {
                let cond = self.parse_expr()?;
                self.expect(TokenKind::Then)?;
                let body = self.parse_block()?;
                arms.push((cond, body));
            } else {
                break;
            }
        }
        let else_block = if self.accept(&TokenKind::Else)? { Some(self.parse_block()?) } else { None };
        self.expect(TokenKind::End)?;
        Ok(Stat::If { arms, else_block })
    }

    fn parse_for(&mut self) -> CompileResult<Stat> {
        let line = self.advance()?.line; // for
        let first = self.expect_name()?;
        if self.accept(&TokenKind::Assign)? {
            let start = self.parse_expr()?;
            self.expect(TokenKind::Comma)?;
            let stop = self.parse_expr()?;
            let step = if self.accept(&TokenKind::Comma)? { Some(self.parse_expr()?) } else { None };
            self.expect(TokenKind::Do)?;
            let body = self.parse_block()?;
            self.expect(TokenKind::End)?;
            Ok(Stat::NumericFor { var: first, start, stop, step, body, line })
        } else {
            let mut names = vec![first];
            while self.accept(&TokenKind::Comma)? {
                names.push(self.expect_name()?);
            }
            self.expect(TokenKind::In)?;
            let exprs = self.parse_expr_list()?;
            self.expect(TokenKind::Do)?;
            let body = self.parse_block()?;
            self.expect(TokenKind::End)?;
            Ok(Stat::GenericFor { names, exprs, body, line })
        }
    }

    fn parse_function_stat(&mut self) -> CompileResult<Stat> {
        let line = self.advance()?.line; // function
        let mut target = Expr::Name(self.expect_name()?);
        let mut is_method = false;
        loop {
            if self.accept(&TokenKind::Dot)? {
                target = Expr::Field(Box::new(target), self.expect_name()?);
            } else if self.accept(&TokenKind::Colon)? {
                target = Expr::Field(Box::new(target), self.expect_name()?);
                is_method = true;
                break;
            } else {
                break;
            }
        }
        let mut body = self.parse_function_body(line)?;
        if is_method {
            body.params.insert(0, "self".to_string());
        }
        Ok(Stat::FunctionDecl { target, body, is_method })
    }

    fn parse_function_body(&mut self, line: u32) -> CompileResult<FunctionBody> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        let mut is_vararg = false;
        if !self.check(&TokenKind::RParen)? {
            loop {
                if self.accept(&TokenKind::Ellipsis)? {
                    is_vararg = true;
                    break;
                }
                params.push(self.expect_name()?);
                if !self.accept(&TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        let body = self.parse_block()?;
        self.expect(TokenKind::End)?;
        Ok(FunctionBody { params, is_vararg, body, line })
    }

    fn parse_local(&mut self) -> CompileResult<Stat> {
        let line = self.advance()?.line; // local
        if self.accept(&TokenKind::Function)? {
            let name = self.expect_name()?;
            let body = self.parse_function_body(line)?;
            return Ok(Stat::LocalFunction { name, body });
        }
        let mut names = Vec::new();
        loop {
            names.push(self.expect_name()?);
            if !self.accept(&TokenKind::Comma)? {
                break;
            }
        }
        let exprs = if self.accept(&TokenKind::Assign)? { self.parse_expr_list()? } else { Vec::new() };
        Ok(Stat::Local { names, exprs, line })
    }

    fn parse_expr_stat(&mut self) -> CompileResult<Stat> {
        let line = self.peek()?.line;
        let first = self.parse_suffixed_expr()?;
        if self.check(&TokenKind::Assign)? || self.check(&TokenKind::Comma)? {
            let mut targets = vec![first];
            while self.accept(&TokenKind::Comma)? {
                targets.push(self.parse_suffixed_expr()?);
            }
            self.expect(TokenKind::Assign)?;
            let exprs = self.parse_expr_list()?;
            for target in &targets {
                if !matches!(target, Expr::Name(_) | Expr::Field(_, _) | Expr::Index(_, _)) {
                    return Err(self.err(line, "syntax error (cannot assign to this expression)"));
                }
            }
            Ok(Stat::Assign { targets, exprs, line })
        } else {
            match &first {
                Expr::Call { .. } | Expr::MethodCall { .. } => Ok(Stat::Expr(first)),
                _ => Err(self.err(line, "syntax error (expression statement must be a call)")),
            }
        }
    }

    fn parse_expr_list(&mut self) -> CompileResult<Vec<Expr>> {
        let mut list = vec![self.parse_expr()?];
        while self.accept(&TokenKind::Comma)? {
            list.push(self.parse_expr()?);
        }
        Ok(list)
    }

    // ---- expression precedence cascade ----

    fn parse_expr(&mut self) -> CompileResult<Expr> {
        self.parse_subexpr(0)
    }

    fn parse_subexpr(&mut self, limit: i32) -> CompileResult<Expr> {
        let t = self.peek()?;
        let mut left = if let Some(op) = unop(&t.kind) {
            self.advance()?;
            let operand = self.parse_subexpr(UNARY_PRIORITY)?;
            fold_unary(op, operand, t.line)
        } else {
            self.parse_simple_expr()?
        };

        loop {
            let t = self.peek()?;
            let op = match binop(&t.kind) {
                Some(op) => op,
                None => break,
            };
            let (lp, rp) = priority(&op);
            if lp <= limit {
                break;
            }
            self.advance()?;
            let right = self.parse_subexpr(rp)?;
            left = fold_binary(op, left, right, t.line);
        }
        Ok(left)
    }

    fn parse_simple_expr(&mut self) -> CompileResult<Expr> {
        let t = self.peek()?;
        let e = match &t.kind {
            TokenKind::Nil => { self.advance()?; Expr::Nil }
            TokenKind::True => { self.advance()?; Expr::True }
            TokenKind::False => { self.advance()?; Expr::False }
            TokenKind::Int(i) => { let i = *i; self.advance()?; Expr::Int(i) }
            TokenKind::Float(f) => { let f = *f; self.advance()?; Expr::Float(f) }
            TokenKind::Str(s) => { let s = s.clone(); self.advance()?; Expr::Str(s) }
            TokenKind::Ellipsis => { self.advance()?; Expr::Vararg }
            TokenKind::Function => {
                let line = self.advance()?.line;
                Expr::Function(self.parse_function_body(line)?)
            }
            TokenKind::LBrace => self.parse_table()?,
            _ => self.parse_suffixed_expr()?,
        };
        Ok(e)
    }

    fn parse_primary_expr(&mut self) -> CompileResult<Expr> {
        let t = self.advance()?;
        match t.kind {
            TokenKind::Name(n) => Ok(Expr::Name(n)),
            TokenKind::LParen => {
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            other => Err(self.err(t.line, format!("unexpected symbol near '{}'", other.describe()))),
        }
    }

    fn parse_suffixed_expr(&mut self) -> CompileResult<Expr> {
        let mut e = self.parse_primary_expr()?;
        loop {
            let t = self.peek()?;
            match &t.kind {
                TokenKind::Dot => {
                    self.advance()?;
                    let name = self.expect_name()?;
                    e = Expr::Field(Box::new(e), name);
                }
                TokenKind::LBracket => {
                    self.advance()?;
                    let idx = self.parse_expr()?;
                    self.expect(TokenKind::RBracket)?;
                    e = Expr::Index(Box::new(e), Box::new(idx));
                }
                TokenKind::Colon => {
                    self.advance()?;
                    let method = self.expect_name()?;
                    let line = self.peek()?.line;
                    let args = self.parse_call_args()?;
                    e = Expr::MethodCall { obj: Box::new(e), method, args, line };
                }
                TokenKind::LParen | TokenKind::Str(_) | TokenKind::LBrace => {
                    let line = t.line;
                    let args = self.parse_call_args()?;
                    e = Expr::Call { func: Box::new(e), args, line };
                }
                _ => break,
            }
        }
        Ok(e)
    }

    fn parse_call_args(&mut self) -> CompileResult<Vec<Expr>> {
        let t = self.peek()?;
        match &t.kind {
            TokenKind::LParen => {
                self.advance()?;
                let args = if self.check(&TokenKind::RParen)? { Vec::new() } else { self.parse_expr_list()? };
                self.expect(TokenKind::RParen)?;
                Ok(args)
            }
            TokenKind::Str(s) => {
                let s = s.clone();
                self.advance()?;
                Ok(vec![Expr::Str(s)])
            }
            TokenKind::LBrace => Ok(vec![self.parse_table()?]),
            _ => Err(self.err(t.line, "function arguments expected")),
        }
    }

    fn parse_table(&mut self) -> CompileResult<Expr> {
        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace)? {
            let t = self.peek()?;
            let field = match &t.kind {
                TokenKind::LBracket => {
                    self.advance()?;
                    let key = self.parse_expr()?;
                    self.expect(TokenKind::RBracket)?;
                    self.expect(TokenKind::Assign)?;
                    let value = self.parse_expr()?;
                    TableField::Indexed(key, value)
                }
                TokenKind::Name(n) if self.lexer.peek_second()?.kind == TokenKind::Assign => {
                    let name = n.clone();
                    self.advance()?; // name
                    self.advance()?; // '='
                    let value = self.parse_expr()?;
                    TableField::Named(name, value)
                }
                _ => TableField::Positional(self.parse_expr()?),
            };
            fields.push(field);
            if !self.accept(&TokenKind::Comma)? && !self.accept(&TokenKind::Semi)? {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Expr::Table(fields))
    }

}

fn unop(k: &TokenKind) -> Option<UnOp> {
    match k {
        TokenKind::Minus => Some(UnOp::Neg),
        TokenKind::Not => Some(UnOp::Not),
        TokenKind::Hash => Some(UnOp::Len),
        _ => None,
    }
}

fn binop(k: &TokenKind) -> Option<BinOp> {
    use BinOp::*;
    Some(match k {
        TokenKind::Plus => Add,
        TokenKind::Minus => Sub,
        TokenKind::Star => Mul,
        TokenKind::Percent => Mod,
        TokenKind::Caret => Pow,
        TokenKind::Slash => Div,
        TokenKind::DSlash => IDiv,
        TokenKind::Concat => Concat,
        TokenKind::Eq => Eq,
        TokenKind::Ne => Ne,
        TokenKind::Lt => Lt,
        TokenKind::Le => Le,
        TokenKind::Gt => Gt,
        TokenKind::Ge => Ge,
        TokenKind::And => And,
        TokenKind::Or => Or,
        _ => return None,
    })
}

/// `true` if folding `e` into an arithmetic constant would be unsound
/// (division/modulo by a literal zero) — the reference implementation
/// leaves these unfolded so the runtime raises the proper error.
fn is_multivalued(e: &Expr) -> bool {
    matches!(e, Expr::Call { .. } | Expr::MethodCall { .. } | Expr::Vararg)
}

fn fold_unary(op: UnOp, e: Expr, line: u32) -> Expr {
    match (&op, &e) {
        (UnOp::Neg, Expr::Int(i)) => Expr::Int(i.wrapping_neg()),
        (UnOp::Neg, Expr::Float(f)) => Expr::Float(-f),
        (UnOp::Not, Expr::Nil) | (UnOp::Not, Expr::False) => Expr::True,
        (UnOp::Not, _) if is_truthy_literal(&e) => Expr::False,
        _ => Expr::Unary(op, Box::new(e), line),
    }
}

fn is_truthy_literal(e: &Expr) -> bool {
    matches!(e, Expr::True | Expr::Int(_) | Expr::Float(_) | Expr::Str(_) | Expr::Table(_) | Expr::Function(_))
}

fn fold_binary(op: BinOp, l: Expr, r: Expr, line: u32) -> Expr {
    use BinOp::*;
    match op {
        And => {
            if matches!(l, Expr::Nil | Expr::False) {
                return l;
            }
            if is_truthy_literal(&l) && !is_multivalued(&r) {
                return r;
            }
        }
        Or => {
            if is_truthy_literal(&l) {
                return l;
            }
            if matches!(l, Expr::Nil | Expr::False) && !is_multivalued(&r) {
                return r;
            }
        }
        _ => {}
    }
    if let (Some(lv), Some(rv)) = (as_number(&l), as_number(&r)) {
        if let Some(folded) = fold_arith(&op, lv, rv) {
            return folded;
        }
    }
    Expr::Binary(op, Box::new(l), Box::new(r), line)
}

enum Num {
    Int(i64),
    Float(f64),
}

fn as_number(e: &Expr) -> Option<Num> {
    match e {
        Expr::Int(i) => Some(Num::Int(*i)),
        Expr::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

fn fold_arith(op: &BinOp, l: Num, r: Num) -> Option<Expr> {
    use BinOp::*;
    match (op, l, r) {
        (Add, Num::Int(a), Num::Int(b)) => Some(Expr::Int(a.wrapping_add(b))),
        (Sub, Num::Int(a), Num::Int(b)) => Some(Expr::Int(a.wrapping_sub(b))),
        (Mul, Num::Int(a), Num::Int(b)) => Some(Expr::Int(a.wrapping_mul(b))),
        (Mod, Num::Int(a), Num::Int(b)) => {
            if b == 0 {
                None
            } else {
                let r = a.wrapping_rem(b);
                let r = if r != 0 && (r < 0) != (b < 0) { r + b } else { r };
                Some(Expr::Int(r))
            }
        }
        (IDiv, Num::Int(a), Num::Int(b)) => {
            if b == 0 {
                None
            } else {
                let q = a.wrapping_div(b);
                let q = if a.wrapping_rem(b) != 0 && (a < 0) != (b < 0) { q - 1 } else { q };
                Some(Expr::Int(q))
            }
        }
        (Pow, a, b) => Some(Expr::Float(to_f(a).powf(to_f(b)))),
        (Div, a, b) => Some(Expr::Float(to_f(a) / to_f(b))),
        (Add, a, b) => Some(Expr::Float(to_f(a) + to_f(b))),
        (Sub, a, b) => Some(Expr::Float(to_f(a) - to_f(b))),
        (Mul, a, b) => Some(Expr::Float(to_f(a) * to_f(b))),
        (Mod, a, b) => {
            let (a, b) = (to_f(a), to_f(b));
            if b == 0.0 { None } else { Some(Expr::Float(a - (a / b).floor() * b)) }
        }
        (IDiv, a, b) => {
            let (a, b) = (to_f(a), to_f(b));
            if b == 0.0 { None } else { Some(Expr::Float((a / b).floor())) }
        }
        _ => None,
    }
}

fn to_f(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    }
}

