use crate::{
    addressing::Operand,
    interrupt::Interrupt,
    isa::{Instruction, Opcode},
    mmu::{Access, MMUError, MMU},
};
use thiserror::Error;

/// Operand counts at or above this are rejected before decoding.
pub const MAX_OPERANDS: u8 = 10;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum IFUError {
    #[error(transparent)]
    MMUError(#[from] MMUError),
    #[error("Unknown opcode '0x{opcode:02X}'")]
    UnknownInstruction { opcode: u8 },
    #[error("Invalid operand count {count}")]
    InvalidOperandCount { count: u8 },
    #[error("{opcode:?} does not take {count} operands")]
    ArityMismatch { opcode: Opcode, count: u8 },
}

impl IFUError {
    /// The trap a decode failure turns into, `None` for a fetch outside memory.
    pub fn interrupt(&self) -> Option<Interrupt> {
        match self {
            IFUError::MMUError(MMUError::RAMError(_)) => None,
            IFUError::MMUError(_) => Some(Interrupt::MemoryViolation),
            IFUError::UnknownInstruction { .. } => Some(Interrupt::IllegalInstruction),
            IFUError::InvalidOperandCount { .. } | IFUError::ArityMismatch { .. } => {
                Some(Interrupt::InvalidOperandCount)
            }
        }
    }
}

/// Instruction fetch unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct IFU;

impl IFU {
    pub fn fetch(&self, mmu: &mut MMU, access: Access, pc: u16) -> Result<Instruction, IFUError> {
        let count = mmu.read(pc, access)?;

        if count >= MAX_OPERANDS {
            return Err(IFUError::InvalidOperandCount { count });
        }

        let opcode = mmu.read(step(pc, 1)?, access)?;
        let opcode = Opcode::from_u8(opcode).ok_or(IFUError::UnknownInstruction { opcode })?;

        if !opcode.accepts(count) {
            return Err(IFUError::ArityMismatch { opcode, count });
        }

        let mut operands = Vec::with_capacity(count as usize);

        for i in 0..count as u16 {
            let address = step(pc, 2 + 2 * i)?;
            let byte1 = mmu.read(address, access)?;
            let byte2 = mmu.read(step(address, 1)?, access)?;

            operands.push(Operand::from_bytes([byte1, byte2]));
        }

        Ok(Instruction::new(opcode, operands))
    }
}

/// An instruction never wraps around the top of the address space.
fn step(pc: u16, offset: u16) -> Result<u16, IFUError> {
    pc.checked_add(offset).ok_or(IFUError::MMUError(MMUError::RAMError(
        crate::ram::RAMError::OutOfBounds {
            address: pc as u32 + offset as u32,
        },
    )))
}
