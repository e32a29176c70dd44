use std::fmt;

/// Trap causes, delivered to the kernel in its accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interrupt {
    Syscall,
    IllegalInstruction,
    MemoryViolation,
    InvalidProcessId,
    InvalidOperandCount,
    /// Division or remainder by zero
    ArithmeticFault,
    /// Raised by `INT` with a code outside the fixed causes
    Software(u16),
}

impl Interrupt {
    pub const fn code(self) -> u16 {
        match self {
            Interrupt::Syscall => 0,
            Interrupt::IllegalInstruction => 1,
            Interrupt::MemoryViolation => 2,
            Interrupt::InvalidProcessId => 3,
            Interrupt::InvalidOperandCount => 4,
            Interrupt::ArithmeticFault => 5,
            Interrupt::Software(code) => code,
        }
    }

    pub const fn from_code(code: u16) -> Self {
        match code {
            0 => Interrupt::Syscall,
            1 => Interrupt::IllegalInstruction,
            2 => Interrupt::MemoryViolation,
            3 => Interrupt::InvalidProcessId,
            4 => Interrupt::InvalidOperandCount,
            5 => Interrupt::ArithmeticFault,
            code => Interrupt::Software(code),
        }
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::Syscall => f.write_str("syscall"),
            Interrupt::IllegalInstruction => f.write_str("illegal instruction"),
            Interrupt::MemoryViolation => f.write_str("memory violation"),
            Interrupt::InvalidProcessId => f.write_str("invalid process id"),
            Interrupt::InvalidOperandCount => f.write_str("invalid operand count"),
            Interrupt::ArithmeticFault => f.write_str("arithmetic fault"),
            Interrupt::Software(code) => write!(f, "software interrupt {code}"),
        }
    }
}
