//! OpCode definitions for the Weft VM
//!
//! The interpreter is a stack machine. Each instruction carries an opcode and
//! an optional 64-bit operand whose meaning depends on the opcode:
//!
//! - constant-pool index (`LoadConst`, attribute names, `MakeRecord`, `MakeClosure`)
//! - slot index (locals, captures, globals)
//! - argument or element count (`Call`, `CallKw`, `MakeArray`)
//! - absolute instruction offset (jumps)
//! - immediate integer (`LoadInt`)

use std::fmt;

/// Virtual machine instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    // ===== Stack =====
    /// No operation
    Nop = 0,
    /// Discard the top operand
    Pop = 1,
    /// Duplicate the top operand
    Dup = 2,
    /// Swap the two top operands
    Swap = 3,

    // ===== Constants =====
    /// Push K[k]
    LoadConst = 10,
    /// Push null
    LoadNull = 11,
    /// Push true
    LoadTrue = 12,
    /// Push false
    LoadFalse = 13,
    /// Push the immediate integer operand
    LoadInt = 14,

    // ===== Variables =====
    /// Push L[i]
    LoadLocal = 20,
    /// L[i] = pop
    StoreLocal = 21,
    /// Push the content of capture cell C[i]
    LoadCapture = 22,
    /// C[i] = pop
    StoreCapture = 23,
    /// Push G[i] of the frame's module
    LoadGlobal = 24,
    /// G[i] = pop
    StoreGlobal = 25,
    /// Push the callable's receiver
    LoadSelf = 26,

    // ===== Attributes =====
    /// Replace target with target.K[k]
    LoadAttr = 30,
    /// value = pop, target = pop, target.K[k] = value, push target
    StoreAttr = 31,
    /// Like `StoreAttr`, marking the attribute constant
    StoreConstAttr = 32,
    /// target = pop, remove target.K[k], push target
    DeleteAttr = 33,
    /// index = pop, target = pop, push target[index]
    LoadIndex = 34,
    /// value = pop, index = pop, target = pop, target[index] = value, push target
    StoreIndex = 35,

    // ===== Arithmetic =====
    Add = 40,
    Sub = 41,
    Mul = 42,
    Div = 43,
    Mod = 44,
    /// Unary negation
    Neg = 45,

    // ===== Comparison =====
    Eq = 50,
    Ne = 51,
    Lt = 52,
    Le = 53,
    Gt = 54,
    Ge = 55,
    /// Logical NOT on truthiness
    Not = 56,

    // ===== Bitwise =====
    BitAnd = 60,
    BitOr = 61,
    BitXor = 62,
    Shl = 63,
    Shr = 64,
    BitNot = 65,

    // ===== Jumps =====
    /// IP = t
    Jump = 70,
    /// if truthy(pop) then IP = t
    JumpIfTrue = 71,
    /// if !truthy(pop) then IP = t
    JumpIfFalse = 72,

    // ===== Construction =====
    /// Pop n values, push them as an array
    MakeArray = 80,
    /// Push a new empty object
    MakeObject = 81,
    /// Pop one value per field of record template K[k], push a sealed record
    MakeRecord = 82,
    /// Seal the top operand in place
    Seal = 83,
    /// Push a callable for code K[k], capturing per its template
    MakeClosure = 84,
    /// receiver = pop, callable = pop, push callable rebound to receiver
    Bind = 85,

    // ===== Calls =====
    /// Pop n arguments then the callable, enter a child frame
    Call = 90,
    /// Pop a keyword object, n arguments, then the callable
    CallKw = 91,
    /// Complete the frame with pop
    Return = 92,
    /// Complete the frame with pop as error
    Raise = 93,
}

impl OpCode {
    /// Get opcode from byte value
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(OpCode::Nop),
            1 => Some(OpCode::Pop),
            2 => Some(OpCode::Dup),
            3 => Some(OpCode::Swap),
            10 => Some(OpCode::LoadConst),
            11 => Some(OpCode::LoadNull),
            12 => Some(OpCode::LoadTrue),
            13 => Some(OpCode::LoadFalse),
            14 => Some(OpCode::LoadInt),
            20 => Some(OpCode::LoadLocal),
            21 => Some(OpCode::StoreLocal),
            22 => Some(OpCode::LoadCapture),
            23 => Some(OpCode::StoreCapture),
            24 => Some(OpCode::LoadGlobal),
            25 => Some(OpCode::StoreGlobal),
            26 => Some(OpCode::LoadSelf),
            30 => Some(OpCode::LoadAttr),
            31 => Some(OpCode::StoreAttr),
            32 => Some(OpCode::StoreConstAttr),
            33 => Some(OpCode::DeleteAttr),
            34 => Some(OpCode::LoadIndex),
            35 => Some(OpCode::StoreIndex),
            40 => Some(OpCode::Add),
            41 => Some(OpCode::Sub),
            42 => Some(OpCode::Mul),
            43 => Some(OpCode::Div),
            44 => Some(OpCode::Mod),
            45 => Some(OpCode::Neg),
            50 => Some(OpCode::Eq),
            51 => Some(OpCode::Ne),
            52 => Some(OpCode::Lt),
            53 => Some(OpCode::Le),
            54 => Some(OpCode::Gt),
            55 => Some(OpCode::Ge),
            56 => Some(OpCode::Not),
            60 => Some(OpCode::BitAnd),
            61 => Some(OpCode::BitOr),
            62 => Some(OpCode::BitXor),
            63 => Some(OpCode::Shl),
            64 => Some(OpCode::Shr),
            65 => Some(OpCode::BitNot),
            70 => Some(OpCode::Jump),
            71 => Some(OpCode::JumpIfTrue),
            72 => Some(OpCode::JumpIfFalse),
            80 => Some(OpCode::MakeArray),
            81 => Some(OpCode::MakeObject),
            82 => Some(OpCode::MakeRecord),
            83 => Some(OpCode::Seal),
            84 => Some(OpCode::MakeClosure),
            85 => Some(OpCode::Bind),
            90 => Some(OpCode::Call),
            91 => Some(OpCode::CallKw),
            92 => Some(OpCode::Return),
            93 => Some(OpCode::Raise),
            _ => None,
        }
    }

    /// Convert opcode to byte value
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether the instruction reads its operand.
    pub fn takes_operand(self) -> bool {
        matches!(
            self,
            OpCode::LoadConst
                | OpCode::LoadInt
                | OpCode::LoadLocal
                | OpCode::StoreLocal
                | OpCode::LoadCapture
                | OpCode::StoreCapture
                | OpCode::LoadGlobal
                | OpCode::StoreGlobal
                | OpCode::LoadAttr
                | OpCode::StoreAttr
                | OpCode::StoreConstAttr
                | OpCode::DeleteAttr
                | OpCode::Jump
                | OpCode::JumpIfTrue
                | OpCode::JumpIfFalse
                | OpCode::MakeArray
                | OpCode::MakeRecord
                | OpCode::MakeClosure
                | OpCode::Call
                | OpCode::CallKw
        )
    }

    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Nop => "NOP",
            OpCode::Pop => "POP",
            OpCode::Dup => "DUP",
            OpCode::Swap => "SWAP",
            OpCode::LoadConst => "LOAD_CONST",
            OpCode::LoadNull => "LOAD_NULL",
            OpCode::LoadTrue => "LOAD_TRUE",
            OpCode::LoadFalse => "LOAD_FALSE",
            OpCode::LoadInt => "LOAD_INT",
            OpCode::LoadLocal => "LOAD_LOCAL",
            OpCode::StoreLocal => "STORE_LOCAL",
            OpCode::LoadCapture => "LOAD_CAPTURE",
            OpCode::StoreCapture => "STORE_CAPTURE",
            OpCode::LoadGlobal => "LOAD_GLOBAL",
            OpCode::StoreGlobal => "STORE_GLOBAL",
            OpCode::LoadSelf => "LOAD_SELF",
            OpCode::LoadAttr => "LOAD_ATTR",
            OpCode::StoreAttr => "STORE_ATTR",
            OpCode::StoreConstAttr => "STORE_CONST_ATTR",
            OpCode::DeleteAttr => "DELETE_ATTR",
            OpCode::LoadIndex => "LOAD_INDEX",
            OpCode::StoreIndex => "STORE_INDEX",
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Div => "DIV",
            OpCode::Mod => "MOD",
            OpCode::Neg => "NEG",
            OpCode::Eq => "EQ",
            OpCode::Ne => "NE",
            OpCode::Lt => "LT",
            OpCode::Le => "LE",
            OpCode::Gt => "GT",
            OpCode::Ge => "GE",
            OpCode::Not => "NOT",
            OpCode::BitAnd => "BIT_AND",
            OpCode::BitOr => "BIT_OR",
            OpCode::BitXor => "BIT_XOR",
            OpCode::Shl => "SHL",
            OpCode::Shr => "SHR",
            OpCode::BitNot => "BIT_NOT",
            OpCode::Jump => "JUMP",
            OpCode::JumpIfTrue => "JUMP_IF_TRUE",
            OpCode::JumpIfFalse => "JUMP_IF_FALSE",
            OpCode::MakeArray => "MAKE_ARRAY",
            OpCode::MakeObject => "MAKE_OBJECT",
            OpCode::MakeRecord => "MAKE_RECORD",
            OpCode::Seal => "SEAL",
            OpCode::MakeClosure => "MAKE_CLOSURE",
            OpCode::Bind => "BIND",
            OpCode::Call => "CALL",
            OpCode::CallKw => "CALL_KW",
            OpCode::Return => "RETURN",
            OpCode::Raise => "RAISE",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_conversion() {
        assert_eq!(OpCode::Add.as_u8(), 40);
        assert_eq!(OpCode::from_u8(40), Some(OpCode::Add));
        assert_eq!(OpCode::from_u8(93), Some(OpCode::Raise));
        assert_eq!(OpCode::from_u8(4), None);
        assert_eq!(OpCode::from_u8(255), None);
    }

    #[test]
    fn test_every_byte_round_trips() {
        for byte in 0..=u8::MAX {
            if let Some(op) = OpCode::from_u8(byte) {
                assert_eq!(op.as_u8(), byte, "{} decoded from {}", op, byte);
            }
        }
    }

    #[test]
    fn test_operand_usage() {
        assert!(OpCode::Call.takes_operand());
        assert!(OpCode::JumpIfFalse.takes_operand());
        assert!(!OpCode::Return.takes_operand());
        assert!(!OpCode::Bind.takes_operand());
        assert_eq!(OpCode::CallKw.to_string(), "CALL_KW");
    }
}
