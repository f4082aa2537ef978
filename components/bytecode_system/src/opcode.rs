//! Bytecode opcodes for the register-based VM.
//!
//! Instructions are fixed-width: two 32-bit words. The first halfword of
//! word 0 is the opcode; the remaining three halfwords are operand slots,
//! interpreted per opcode as signed register indices, short literals,
//! constant-pool indices, or a signed program-counter delta (in words,
//! relative to the instruction start).

/// All opcodes. Operand naming below: `a`, `b`, `c` are the three halfword
/// slots in encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    Nop = 0,

    // moves and literals
    /// a=dst, b=src
    Move,
    /// a=dst, b=constant-pool index
    LoadConst,
    /// a=dst
    LoadUndefined,
    /// a=dst
    LoadNull,
    /// a=dst
    LoadTrue,
    /// a=dst
    LoadFalse,
    /// a=dst, b=signed 16-bit immediate
    LoadInt,
    /// a=dst
    LoadThis,

    // binary arithmetic: a=dst, b=lhs, c=rhs
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,

    // unary: a=dst, b=src
    Neg,
    Not,
    BitNot,
    TypeOf,

    // comparisons: a=dst, b=lhs, c=rhs
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,

    // control transfer: a=signed pc delta in words
    Jump,
    /// a=delta, b=condition register
    JumpIfTrue,
    /// a=delta, b=condition register
    JumpIfFalse,
    // fused compare-and-branch: a=delta, b=lhs, c=rhs
    JumpIfLess,
    JumpIfLessEq,
    JumpIfGreater,
    JumpIfGreaterEq,

    // globals: name comes from the constant pool
    /// a=dst, b=name constant index
    LoadGlobal,
    /// a=name constant index, b=src
    StoreGlobal,

    // properties: name comes from the constant pool
    /// a=dst, b=object register, c=name constant index
    GetProperty,
    /// a=object register, b=name constant index, c=src
    SetProperty,
    /// a=dst, b=object register, c=key register
    GetElement,
    /// a=object register, b=key register, c=src
    SetElement,
    /// a=dst, b=object register, c=name constant index
    DeleteProperty,
    /// a=dst
    NewObject,

    // environments and closures
    /// a=slot count; installs a fresh environment as current
    NewEnvironment,
    /// a=dst, b=depth, c=slot index
    LoadUpvalue,
    /// a=depth, b=slot index, c=src
    StoreUpvalue,
    /// a=dst, b=engine function index
    CreateClosure,

    // calls: args live at func_reg+1 .. func_reg+argc
    /// a=dst, b=callee register, c=argc
    Call,
    /// a=dst, b=callee register, c=argc
    Construct,
    /// a=src
    Return,
    /// a=src
    Throw,
}

/// Number of distinct opcodes, for table sizing.
pub const OPCODE_COUNT: usize = Opcode::Throw as usize + 1;

impl Opcode {
    /// Decode an opcode halfword. Returns `None` for out-of-range values.
    pub fn from_u16(raw: u16) -> Option<Opcode> {
        if (raw as usize) < OPCODE_COUNT {
            // SAFETY: Opcode is repr(u16), dense from 0, and raw is in range.
            Some(unsafe { std::mem::transmute::<u16, Opcode>(raw) })
        } else {
            None
        }
    }

    /// True for instructions that end a basic block.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Jump
                | Opcode::JumpIfTrue
                | Opcode::JumpIfFalse
                | Opcode::JumpIfLess
                | Opcode::JumpIfLessEq
                | Opcode::JumpIfGreater
                | Opcode::JumpIfGreaterEq
                | Opcode::Return
                | Opcode::Throw
        )
    }

    /// True for any control transfer carrying a pc delta in slot `a`.
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::Jump
                | Opcode::JumpIfTrue
                | Opcode::JumpIfFalse
                | Opcode::JumpIfLess
                | Opcode::JumpIfLessEq
                | Opcode::JumpIfGreater
                | Opcode::JumpIfGreaterEq
        )
    }

    pub fn is_binary_arithmetic(self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Mod
                | Opcode::BitAnd
                | Opcode::BitOr
                | Opcode::BitXor
                | Opcode::Shl
                | Opcode::Shr
                | Opcode::UShr
        )
    }
}
