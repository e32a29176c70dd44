use std::fmt;

use crate::addressing::Operand;

/// The instruction set. The numbering is the binary ABI and must stay in
/// sync with every producer of images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Opcode {
    NOP = 0,
    SYSCALL = 1,
    // Register operations
    LDA = 2,
    LDX = 3,
    LDY = 4,
    STA = 5,
    STX = 6,
    STY = 7,
    TAX = 8,
    TAY = 9,
    TSX = 10,
    TXA = 11,
    TXS = 12,
    TYA = 13,
    // Arithmetic
    INC = 14,
    INX = 15,
    INY = 16,
    DEC = 17,
    DEX = 18,
    DEY = 19,
    ADD = 20,
    SUB = 21,
    MUL = 22,
    DIV = 23,
    MOD = 24,
    // Bitwise
    AND = 25,
    ORA = 26,
    XOR = 27,
    // Shift & rotate
    SHL = 28,
    LSR = 29,
    ROL = 30,
    ROR = 31,
    BIT = 32,
    // Jumps
    JMP = 33,
    JSR = 34,
    RTS = 35,
    // Branches
    BCC = 36,
    BCS = 37,
    BEQ = 38,
    BMI = 39,
    BNE = 40,
    BPL = 41,
    BVC = 42,
    BVS = 43,
    // Flags
    SEC = 44,
    SED = 45,
    CLC = 46,
    CLD = 47,
    CLV = 48,
    // Stack
    PHA = 49,
    PHP = 50,
    PLA = 51,
    PLP = 52,
    // Compare
    CMP = 53,
    CPX = 54,
    CPY = 55,
    MOV = 56,
    // Privileged
    INT = 57,
    RTI = 58,
    CLP = 59,
    SWT = 60,
    HLT = 61,
    // Devices
    IN = 62,
    OUT = 63,
}

const OPCODES: [Opcode; 64] = {
    use Opcode::*;

    [
        NOP, SYSCALL, LDA, LDX, LDY, STA, STX, STY, TAX, TAY, TSX, TXA, TXS, TYA, INC, INX, INY,
        DEC, DEX, DEY, ADD, SUB, MUL, DIV, MOD, AND, ORA, XOR, SHL, LSR, ROL, ROR, BIT, JMP, JSR,
        RTS, BCC, BCS, BEQ, BMI, BNE, BPL, BVC, BVS, SEC, SED, CLC, CLD, CLV, PHA, PHP, PLA, PLP,
        CMP, CPX, CPY, MOV, INT, RTI, CLP, SWT, HLT, IN, OUT,
    ]
};

impl Opcode {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        if (value as usize) < OPCODES.len() {
            Some(OPCODES[value as usize])
        } else {
            None
        }
    }

    /// Smallest and largest accepted operand count.
    pub const fn arity(self) -> (u8, u8) {
        use Opcode::*;

        match self {
            INC | DEC => (0, 1),
            MOV => (2, 2),
            LDA | LDX | LDY | STA | STX | STY | ADD | SUB | MUL | DIV | MOD | AND | ORA | XOR
            | BIT | JMP | JSR | BCC | BCS | BEQ | BMI | BNE | BPL | BVC | BVS | CMP | CPX | CPY => {
                (1, 1)
            }
            _ => (0, 0),
        }
    }

    pub const fn accepts(self, operand_count: u8) -> bool {
        let (min, max) = self.arity();

        min <= operand_count && operand_count <= max
    }

    /// Absolute operands of these are addresses, not values to dereference.
    pub const fn is_control_transfer(self) -> bool {
        use Opcode::*;

        matches!(
            self,
            JMP | JSR | BCC | BCS | BEQ | BMI | BNE | BPL | BVC | BVS
        )
    }

    pub const fn is_privileged(self) -> bool {
        matches!(self, Opcode::RTI | Opcode::CLP | Opcode::SWT)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Opcode::from_u8(value).ok_or(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: impl Into<Vec<Operand>>) -> Self {
        Self {
            opcode,
            operands: operands.into(),
        }
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> u16 {
        2 + 2 * self.operands.len() as u16
    }

    /// `[operandCount][opcode]` followed by two bytes per operand.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.size() as usize);

        bytes.push(self.operands.len() as u8);
        bytes.push(self.opcode.as_u8());

        for operand in &self.operands {
            bytes.extend_from_slice(&operand.to_bytes());
        }

        bytes
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.opcode)?;

        for (i, operand) in self.operands.iter().enumerate() {
            let separator = if i == 0 { " " } else { ", " };

            write!(f, "{separator}{operand}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Instruction, Opcode, OPCODES};
    use crate::addressing::Operand;
    use crate::registers::A;

    #[test]
    fn table_matches_discriminants() {
        for (i, opcode) in OPCODES.iter().enumerate() {
            assert_eq!(opcode.as_u8() as usize, i);
        }

        assert_eq!(Opcode::from_u8(0), Some(Opcode::NOP));
        assert_eq!(Opcode::from_u8(56), Some(Opcode::MOV));
        assert_eq!(Opcode::from_u8(63), Some(Opcode::OUT));
        assert_eq!(Opcode::try_from(64), Err(64));
        assert_eq!(Opcode::try_from(0xFF), Err(0xFF));
    }

    #[test]
    fn arity() {
        assert!(Opcode::LDA.accepts(1));
        assert!(!Opcode::LDA.accepts(0));
        assert!(Opcode::INC.accepts(0));
        assert!(Opcode::INC.accepts(1));
        assert!(!Opcode::MOV.accepts(1));
        assert!(!Opcode::HLT.accepts(1));
    }

    #[test]
    fn encode() {
        let instruction = Instruction::new(Opcode::LDA, [Operand::immediate(5)]);

        assert_eq!(instruction.encode(), vec![1, 2, 0x40, 5]);
        assert_eq!(instruction.size(), 4);
        assert_eq!(Instruction::new(Opcode::HLT, Vec::new()).encode(), vec![0, 61]);
    }

    #[test]
    fn display() {
        let instruction = Instruction::new(
            Opcode::MOV,
            [Operand::register(A), Operand::absolute(0x20)],
        );

        assert_eq!(instruction.to_string(), "MOV r0, $32");
    }
}
