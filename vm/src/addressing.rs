//! Operand encoding shared with the assembler.
//!
//! Every operand is two bytes: the top two bits of the first byte select the
//! [`AddressingMode`], the remaining 14 bits carry the value (high six bits in
//! the first byte, low eight in the second).

use std::fmt;

use crate::registers::{Register, Registers};
use thiserror::Error;

pub const VALUE_BITS: u32 = 14;
pub const VALUE_MASK: u16 = (1 << VALUE_BITS) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AddressingError {
    #[error("{operand} can not be used as a destination")]
    InvalidDestination { operand: Operand },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AddressingMode {
    /// `rN`
    Register = 0b00,
    /// `#N`
    Immediate = 0b01,
    /// `$N`
    Absolute = 0b10,
    /// `+N`, from the address of the executing instruction
    Relative = 0b11,
}

impl AddressingMode {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Only the low two bits are looked at.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::Register,
            0b01 => Self::Immediate,
            0b10 => Self::Absolute,
            _ => Self::Relative,
        }
    }
}

/// Values wider than 14 bits are masked, never rejected.
pub const fn encode(mode: AddressingMode, value: u16) -> (u8, u8) {
    let value = value & VALUE_MASK;

    ((mode.as_u8() << 6) | (value >> 8) as u8, value as u8)
}

pub const fn decode(byte1: u8, byte2: u8) -> (AddressingMode, u16) {
    let mode = AddressingMode::from_bits(byte1 >> 6);
    let value = ((byte1 as u16 & 0x3F) << 8) | byte2 as u16;

    (mode, value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operand {
    pub mode: AddressingMode,
    pub value: u16,
}

impl Operand {
    pub const fn new(mode: AddressingMode, value: u16) -> Self {
        Self {
            mode,
            value: value & VALUE_MASK,
        }
    }

    pub const fn register(register: Register) -> Self {
        Self::new(AddressingMode::Register, register.as_u8() as u16)
    }

    pub const fn immediate(value: u16) -> Self {
        Self::new(AddressingMode::Immediate, value)
    }

    pub const fn absolute(address: u16) -> Self {
        Self::new(AddressingMode::Absolute, address)
    }

    pub const fn relative(offset: u16) -> Self {
        Self::new(AddressingMode::Relative, offset)
    }

    pub const fn from_bytes(bytes: [u8; 2]) -> Self {
        let (mode, value) = decode(bytes[0], bytes[1]);

        Self { mode, value }
    }

    pub const fn to_bytes(self) -> [u8; 2] {
        let (byte1, byte2) = encode(self.mode, self.value);

        [byte1, byte2]
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            AddressingMode::Register => write!(f, "r{}", self.value),
            AddressingMode::Immediate => write!(f, "#{}", self.value),
            AddressingMode::Absolute => write!(f, "${}", self.value),
            AddressingMode::Relative => write!(f, "+{}", self.value),
        }
    }
}

/// Where a store, increment or decrement lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Register(Register),
    Memory(u16),
}

/// Resolves an operand to the value an instruction consumes.
///
/// `pc` is the address of the executing instruction. Control transfers take
/// absolute operands as addresses instead of dereferencing them; every other
/// memory read goes through `read`, which is expected to apply the memory
/// protection check.
pub fn resolve<E>(
    operand: Operand,
    registers: &Registers,
    pc: u16,
    control_transfer: bool,
    read: impl FnOnce(u16) -> Result<u8, E>,
) -> Result<u16, E> {
    match operand.mode {
        AddressingMode::Register => Ok(registers.get_index(operand.value)),
        AddressingMode::Immediate => Ok(operand.value),
        AddressingMode::Absolute if control_transfer => Ok(operand.value),
        AddressingMode::Absolute => read(operand.value).map(u16::from),
        AddressingMode::Relative => Ok(pc.wrapping_add(operand.value)),
    }
}

pub fn resolve_target(operand: Operand, pc: u16) -> Result<Target, AddressingError> {
    match operand.mode {
        AddressingMode::Register => Register::new(operand.value)
            .map(Target::Register)
            .ok_or(AddressingError::InvalidDestination { operand }),
        AddressingMode::Immediate => Err(AddressingError::InvalidDestination { operand }),
        AddressingMode::Absolute => Ok(Target::Memory(operand.value)),
        AddressingMode::Relative => Ok(Target::Memory(pc.wrapping_add(operand.value))),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        decode, encode, resolve, resolve_target, AddressingError, AddressingMode, Operand, Target,
    };
    use crate::registers::{Registers, X};
    use proptest::prelude::*;
    use std::convert::Infallible;

    fn mode() -> impl Strategy<Value = AddressingMode> {
        prop_oneof![
            Just(AddressingMode::Register),
            Just(AddressingMode::Immediate),
            Just(AddressingMode::Absolute),
            Just(AddressingMode::Relative),
        ]
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(mode in mode(), value in 0u16..0x4000) {
            let (byte1, byte2) = encode(mode, value);

            prop_assert_eq!(decode(byte1, byte2), (mode, value));
        }
    }

    #[test]
    fn layout() {
        assert_eq!(encode(AddressingMode::Immediate, 5), (0b0100_0000, 5));
        assert_eq!(encode(AddressingMode::Relative, 0x3ABC), (0xFA, 0xBC));
        assert_eq!(decode(0x80, 0x10), (AddressingMode::Absolute, 0x10));
    }

    #[test]
    fn wide_values_are_masked() {
        assert_eq!(
            encode(AddressingMode::Register, 0xFFFF),
            encode(AddressingMode::Register, 0x3FFF)
        );
        assert_eq!(Operand::immediate(0x4001).value, 1);
    }

    #[test]
    fn resolve_modes() {
        let mut registers = Registers::default();

        registers.set(X, 77);

        let read = |address: u16| -> Result<u8, Infallible> { Ok(address as u8 ^ 0xFF) };

        assert_eq!(resolve(Operand::new(AddressingMode::Register, 6), &registers, 0, false, read), Ok(77));
        assert_eq!(resolve(Operand::new(AddressingMode::Register, 12), &registers, 0, false, read), Ok(0));
        assert_eq!(resolve(Operand::immediate(300), &registers, 0, false, read), Ok(300));
        assert_eq!(resolve(Operand::absolute(0x0F), &registers, 0, false, read), Ok(0xF0));
        assert_eq!(resolve(Operand::absolute(0x0F), &registers, 0, true, read), Ok(0x0F));
        assert_eq!(resolve(Operand::relative(4), &registers, 0x100, false, read), Ok(0x104));
    }

    #[test]
    fn absolute_read_errors_propagate() {
        let registers = Registers::default();
        let result = resolve(Operand::absolute(1), &registers, 0, false, |_| Err("denied"));

        assert_eq!(result, Err("denied"));
    }

    #[test]
    fn targets() {
        assert_eq!(
            resolve_target(Operand::new(AddressingMode::Register, 6), 0),
            Ok(Target::Register(X))
        );
        assert_eq!(resolve_target(Operand::absolute(0x20), 0), Ok(Target::Memory(0x20)));
        assert_eq!(resolve_target(Operand::relative(2), 0x10), Ok(Target::Memory(0x12)));
        assert_eq!(
            resolve_target(Operand::immediate(1), 0),
            Err(AddressingError::InvalidDestination {
                operand: Operand::immediate(1)
            })
        );
        assert!(resolve_target(Operand::new(AddressingMode::Register, 10), 0).is_err());
    }

    #[test]
    fn display_uses_assembler_syntax() {
        assert_eq!(Operand::register(X).to_string(), "r6");
        assert_eq!(Operand::immediate(5).to_string(), "#5");
        assert_eq!(Operand::absolute(16).to_string(), "$16");
        assert_eq!(Operand::relative(3).to_string(), "+3");
    }
}
