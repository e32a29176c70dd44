/// Accumulator, implicit operand of arithmetic
pub const A: Register = Register(0);
/// Scratch register 0
pub const B: Register = Register(1);
/// Scratch register 1
pub const C: Register = Register(2);
/// Scratch register 2
pub const D: Register = Register(3);
/// Scratch register 3
pub const E: Register = Register(4);
/// Scratch register 4
pub const F: Register = Register(5);
/// Index register X
pub const X: Register = Register(6);
/// Index register Y
pub const Y: Register = Register(7);
/// Auxiliary register
pub const Z: Register = Register(8);
/// Stack pointer
pub const SP: Register = Register(9);

pub const REGISTER_COUNT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Register(u8);

impl Register {
    pub const fn new(i: u16) -> Option<Self> {
        if (i as usize) < REGISTER_COUNT {
            Some(Self(i as u8))
        } else {
            None
        }
    }

    pub const fn as_u8(&self) -> u8 {
        self.0
    }

    pub const fn name(&self) -> &'static str {
        match self.0 {
            0 => "a",
            1 => "b",
            2 => "c",
            3 => "d",
            4 => "e",
            5 => "f",
            6 => "x",
            7 => "y",
            8 => "z",
            _ => "sp",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Flags(u8);

impl Flags {
    pub const CARRY: u8 = 0b0000_0001;
    pub const ZERO: u8 = 0b0000_0010;
    pub const DECIMAL: u8 = 0b0000_1000;
    pub const OVERFLOW: u8 = 0b0100_0000;
    pub const NEGATIVE: u8 = 0b1000_0000;

    const DEFINED: u8 = Self::CARRY | Self::ZERO | Self::DECIMAL | Self::OVERFLOW | Self::NEGATIVE;

    /// Reserved bits are dropped.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::DEFINED)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    pub fn set(&mut self, flag: u8, on: bool) {
        if on {
            self.0 |= flag & Self::DEFINED;
        } else {
            self.0 &= !flag;
        }
    }
}

/// Per-process CPU state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    registers: [u16; REGISTER_COUNT],
    pc: u16,
    flags: Flags,
    data_section: u16,
}

impl Registers {
    pub fn with_stack_pointer(sp: u16) -> Self {
        let mut registers = Self::default();

        registers.set(SP, sp);

        registers
    }

    pub fn get(&self, register: Register) -> u16 {
        self.registers[register.as_u8() as usize]
    }

    pub fn set(&mut self, register: Register, value: u16) {
        self.registers[register.as_u8() as usize] = value;
    }

    /// Reads a register by raw operand index, out of range reads as 0.
    pub fn get_index(&self, index: u16) -> u16 {
        Register::new(index).map_or(0, |register| self.get(register))
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn pc_mut(&mut self) -> &mut u16 {
        &mut self.pc
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn flags_mut(&mut self) -> &mut Flags {
        &mut self.flags
    }

    pub fn data_section(&self) -> u16 {
        self.data_section
    }

    pub fn set_data_section(&mut self, address: u16) {
        self.data_section = address;
    }
}

#[cfg(test)]
mod tests {
    use super::{Flags, Register, Registers, A, SP, X};

    #[test]
    fn register_index_bounds() {
        assert_eq!(Register::new(0), Some(A));
        assert_eq!(Register::new(9), Some(SP));
        assert_eq!(Register::new(10), None);
    }

    #[test]
    fn out_of_range_index_reads_zero() {
        let mut registers = Registers::default();

        registers.set(X, 7);

        assert_eq!(registers.get_index(6), 7);
        assert_eq!(registers.get_index(10), 0);
        assert_eq!(registers.get_index(0x3FFF), 0);
    }

    #[test]
    fn flag_bits_are_independent() {
        let mut flags = Flags::default();

        flags.set(Flags::CARRY, true);
        flags.set(Flags::NEGATIVE, true);
        flags.set(Flags::CARRY, false);

        assert!(!flags.contains(Flags::CARRY));
        assert!(flags.contains(Flags::NEGATIVE));
        assert_eq!(flags.bits(), 0b1000_0000);
    }

    #[test]
    fn reserved_flag_bits_are_masked() {
        assert_eq!(Flags::from_bits(0xFF).bits(), 0b1100_1011);
    }
}
