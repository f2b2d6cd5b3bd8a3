mod instruction;

pub use instruction::Instruction;

/// Instruction format modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    IABC,
    IABx,
    IAsBx,
    IAx,
}

/// The Lua 5.3 opcode set, in the reference implementation's numeric order.
///
/// Grounded on the teacher's `lua_vm/opcode/mod.rs` enum-with-doc-comment
/// style, replacing its Lua 5.4/5.5 83-opcode set with the 47-opcode Lua 5.3
/// set named in `original_source/vm/opcodes.go`. `BAND`/`BOR`/`BXOR`/`SHL`/
/// `SHR`/`BNOT`/`IDIV` are implemented by the VM but never emitted by this
/// crate's code generator (no bitwise-operator syntax in the parser).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Move = 0,    // R[A] := R[B]
    LoadK,       // R[A] := K[Bx]
    LoadKX,      // R[A] := K[extra arg]
    LoadBool,    // R[A] := (bool)B; if C then pc++
    LoadNil,     // R[A], ..., R[A+B] := nil
    GetUpval,    // R[A] := UpValue[B]
    GetTabUp,    // R[A] := UpValue[B][RK(C)]
    GetTable,    // R[A] := R[B][RK(C)]
    SetTabUp,    // UpValue[A][RK(B)] := RK(C)
    SetUpval,    // UpValue[B] := R[A]
    SetTable,    // R[A][RK(B)] := RK(C)
    NewTable,    // R[A] := {} (array hint B, hash hint C)
    Self_,       // R[A+1] := R[B]; R[A] := R[B][RK(C)]
    Add,         // R[A] := RK(B) + RK(C)
    Sub,         // R[A] := RK(B) - RK(C)
    Mul,         // R[A] := RK(B) * RK(C)
    Mod,         // R[A] := RK(B) % RK(C)
    Pow,         // R[A] := RK(B) ^ RK(C)
    Div,         // R[A] := RK(B) / RK(C)
    IDiv,        // R[A] := RK(B) // RK(C)
    BAnd,        // R[A] := RK(B) & RK(C)
    BOr,         // R[A] := RK(B) | RK(C)
    BXor,        // R[A] := RK(B) ~ RK(C)
    Shl,         // R[A] := RK(B) << RK(C)
    Shr,         // R[A] := RK(B) >> RK(C)
    Unm,         // R[A] := -R[B]
    BNot,        // R[A] := ~R[B]
    Not,         // R[A] := not R[B]
    Len,         // R[A] := #R[B]
    Concat,      // R[A] := R[B].. ... ..R[C]
    Jmp,         // pc += sBx; if A != 0, close upvalues >= R[A-1]
    Eq,          // if (R[B] == RK(C)) != A then pc++
    Lt,          // if (R[B] <  RK(C)) != A then pc++
    Le,          // if (R[B] <= RK(C)) != A then pc++
    Test,        // if (bool(R[A]) != C) then pc++
    TestSet,     // if (bool(R[B]) == C) then R[A] := R[B] else pc++
    Call,        // R[A], ..., R[A+C-2] := R[A](R[A+1], ..., R[A+B-1])
    TailCall,    // return R[A](R[A+1], ..., R[A+B-1])
    Return,      // return R[A], ..., R[A+B-2]
    ForLoop,     // R[A] += R[A+2]; if loop continues, pc += sBx
    ForPrep,     // R[A] -= R[A+2]; pc += sBx
    TForCall,    // R[A+3], ... := R[A](R[A+1], R[A+2])
    TForLoop,    // if R[A+1] != nil then R[A] := R[A+1]; pc += sBx
    SetList,     // R[A][(C-1)*FPF+i] := R[A+i], 1 <= i <= B
    Closure,     // R[A] := closure(KPROTO[Bx])
    VarArg,      // R[A], ..., R[A+B-2] := vararg
    ExtraArg,    // extra (larger) argument for previous opcode
}

const COUNT: usize = 47;

impl OpCode {
    #[inline]
    pub fn from_u8(b: u8) -> OpCode {
        debug_assert!((b as usize) < COUNT, "opcode byte out of range: {b}");
        // SAFETY: OpCode is `#[repr(u8)]` and covers every value in 0..COUNT;
        // the binary-chunk loader and code generator are the only producers
        // of raw opcode bytes and both are bounded to COUNT.
        unsafe { std::mem::transmute::<u8, OpCode>(b) }
    }

    pub fn get_mode(self) -> OpMode {
        use OpCode::*;
        match self {
            LoadK | Closure => OpMode::IABx,
            Jmp | ForLoop | ForPrep | TForLoop => OpMode::IAsBx,
            ExtraArg => OpMode::IAx,
            _ => OpMode::IABC,
        }
    }

    /// `true` for opcodes that conditionally skip the following instruction
    /// (always a `JMP`) rather than writing a register.
    pub fn is_test(self) -> bool {
        matches!(self, OpCode::Eq | OpCode::Lt | OpCode::Le | OpCode::Test | OpCode::TestSet)
    }

    pub fn name(self) -> &'static str {
        use OpCode::*;
        match self {
            Move => "MOVE",
            LoadK => "LOADK",
            LoadKX => "LOADKX",
            LoadBool => "LOADBOOL",
            LoadNil => "LOADNIL",
            GetUpval => "GETUPVAL",
            GetTabUp => "GETTABUP",
            GetTable => "GETTABLE",
            SetTabUp => "SETTABUP",
            SetUpval => "SETUPVAL",
            SetTable => "SETTABLE",
            NewTable => "NEWTABLE",
            Self_ => "SELF",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Mod => "MOD",
            Pow => "POW",
            Div => "DIV",
            IDiv => "IDIV",
            BAnd => "BAND",
            BOr => "BOR",
            BXor => "BXOR",
            Shl => "SHL",
            Shr => "SHR",
            Unm => "UNM",
            BNot => "BNOT",
            Not => "NOT",
            Len => "LEN",
            Concat => "CONCAT",
            Jmp => "JMP",
            Eq => "EQ",
            Lt => "LT",
            Le => "LE",
            Test => "TEST",
            TestSet => "TESTSET",
            Call => "CALL",
            TailCall => "TAILCALL",
            Return => "RETURN",
            ForLoop => "FORLOOP",
            ForPrep => "FORPREP",
            TForCall => "TFORCALL",
            TForLoop => "TFORLOOP",
            SetList => "SETLIST",
            Closure => "CLOSURE",
            VarArg => "VARARG",
            ExtraArg => "EXTRAARG",
        }
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_match_reference() {
        assert_eq!(OpCode::Move.get_mode(), OpMode::IABC);
        assert_eq!(OpCode::LoadK.get_mode(), OpMode::IABx);
        assert_eq!(OpCode::Jmp.get_mode(), OpMode::IAsBx);
        assert_eq!(OpCode::ForLoop.get_mode(), OpMode::IAsBx);
        assert_eq!(OpCode::TForLoop.get_mode(), OpMode::IAsBx);
        assert_eq!(OpCode::TForCall.get_mode(), OpMode::IABC);
        assert_eq!(OpCode::ExtraArg.get_mode(), OpMode::IAx);
        assert_eq!(OpCode::Closure.get_mode(), OpMode::IABx);
    }

    #[test]
    fn from_u8_roundtrips_every_opcode() {
        for b in 0..COUNT as u8 {
            assert_eq!(OpCode::from_u8(b) as u8, b);
        }
    }

    #[test]
    fn names_are_upper_snake() {
        assert_eq!(OpCode::GetTabUp.name(), "GETTABUP");
        assert_eq!(OpCode::TailCall.name(), "TAILCALL");
    }
}
