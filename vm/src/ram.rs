use thiserror::Error;

/// Largest memory the 16-bit address space can reach.
pub const MAX_RAM_SIZE: u32 = 0x1_0000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RAMError {
    #[error("Memory size should be between 1 and {MAX_RAM_SIZE}, but it is {size}")]
    InvalidSize { size: u32 },
    #[error("The address '0x{address:04X}' is out of bounds")]
    OutOfBounds { address: u32 },
}

#[derive(Debug, Clone)]
pub struct RAM {
    memory: Vec<u8>,
}

impl RAM {
    pub fn new(size: u32) -> Result<Self, RAMError> {
        if size == 0 || size > MAX_RAM_SIZE {
            return Err(RAMError::InvalidSize { size });
        }

        let memory = vec![0; size as usize];

        Ok(Self { memory })
    }

    pub fn len(&self) -> u32 {
        self.memory.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        self.memory.as_slice()
    }

    pub fn check_bounds(&self, address: u32) -> Result<(), RAMError> {
        if address >= self.len() {
            return Err(RAMError::OutOfBounds { address });
        }

        Ok(())
    }

    pub fn read_u8(&self, address: u16) -> Result<u8, RAMError> {
        self.check_bounds(address as u32)?;

        Ok(self.memory[address as usize])
    }

    pub fn write_u8(&mut self, value: u8, address: u16) -> Result<(), RAMError> {
        self.check_bounds(address as u32)?;

        self.memory[address as usize] = value;

        Ok(())
    }
}
