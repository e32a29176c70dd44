//! Program images.
//!
//! An image starts with a big-endian header word holding the offset of its
//! data section from the start of the image, followed by code and then data:
//!
//! ```text
//! [header: u16][code ...][data ...]
//! ```
//!
//! A header of zero means the image has no data section.

use crate::{cpu::CPU, isa::Instruction, mmu::MMUError};
use thiserror::Error;

pub const HEADER_SIZE: u16 = 2;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoadError {
    #[error("Image of {len} bytes is too short for a header")]
    MissingHeader { len: usize },
    #[error("Image of {len} bytes at '0x{offset:04X}' does not fit in {size} bytes of memory")]
    DoesNotFit { len: usize, offset: u16, size: u32 },
    #[error(transparent)]
    MMUError(#[from] MMUError),
}

impl CPU {
    /// Copies `image` to `offset` on behalf of the current process, which
    /// becomes the owner of that memory, and points its `pc` at the first
    /// instruction. Returns the number of bytes written.
    pub fn load(&mut self, image: &[u8], offset: u16) -> Result<usize, LoadError> {
        let len = image.len();

        if len < HEADER_SIZE as usize {
            return Err(LoadError::MissingHeader { len });
        }

        let size = self.mmu.size();

        if offset as usize + len > size as usize {
            return Err(LoadError::DoesNotFit { len, offset, size });
        }

        let access = self.access();

        self.mmu.allocate(access.pid, offset as u32, len as u32)?;

        for (i, byte) in image.iter().enumerate() {
            self.mmu.write(*byte, offset + i as u16, access)?;
        }

        let header = self.mmu.read_word(offset, access)?;
        let data_section = offset.wrapping_add(header);
        let registers = self.registers_mut();

        registers.set_data_section(data_section);
        *registers.pc_mut() = offset.wrapping_add(HEADER_SIZE);

        tracing::info!(pid = access.pid, offset, len, data_section, "loaded image");

        Ok(len)
    }
}

/// Builds an image from instructions and a data section.
pub fn assemble_image(code: &[Instruction], data: &[u8]) -> Vec<u8> {
    let code = code.iter().flat_map(Instruction::encode).collect::<Vec<_>>();
    let header = if data.is_empty() {
        0
    } else {
        HEADER_SIZE + code.len() as u16
    };
    let mut image = Vec::with_capacity(HEADER_SIZE as usize + code.len() + data.len());

    image.extend_from_slice(&header.to_be_bytes());
    image.extend_from_slice(&code);
    image.extend_from_slice(data);

    image
}

#[cfg(test)]
mod tests {
    use super::{assemble_image, LoadError};
    use crate::{
        addressing::Operand,
        cpu::{
            tests::{make_cpu, spawn},
            Tick,
        },
        isa::{Instruction, Opcode},
        mmu::{Extent, MMUError},
        process::KERNEL_PID,
        registers::A,
    };
    use hex_literal::hex;

    #[test]
    fn load_and_run_first_instruction() {
        let mut cpu = make_cpu(&[]);

        assert_eq!(cpu.load(&hex!("0000 0102 4005"), 0), Ok(6));
        assert_eq!(cpu.registers().pc(), 2);
        assert_eq!(cpu.tick().unwrap(), Tick::Executed);
        assert_eq!(cpu.registers().get(A), 5);
        assert_eq!(cpu.registers().pc(), 6);
    }

    #[test]
    fn data_section() {
        let image = assemble_image(
            &[
                Instruction::new(Opcode::LDA, [Operand::absolute(0x18)]),
                Instruction::new(Opcode::HLT, Vec::new()),
            ],
            b"Hi",
        );

        assert_eq!(image, hex!("0008 0102 8018 003D 4869"));

        let mut cpu = make_cpu(&[]);

        cpu.load(&image, 0x10).unwrap();

        assert_eq!(cpu.registers().data_section(), 0x18);
        assert_eq!(cpu.registers().pc(), 0x12);
        assert_eq!(cpu.run(None).unwrap(), Some(b'H' as u16));
    }

    #[test]
    fn no_data_section() {
        let image = assemble_image(&[Instruction::new(Opcode::NOP, Vec::new())], &[]);

        assert_eq!(image, hex!("0000 0000"));
    }

    #[test]
    fn rejects_bad_images() {
        let mut cpu = make_cpu(&[]);

        assert_eq!(cpu.load(&[0], 0), Err(LoadError::MissingHeader { len: 1 }));
        assert_eq!(
            cpu.load(&[0; 0x20], 0x3F0),
            Err(LoadError::DoesNotFit {
                len: 0x20,
                offset: 0x3F0,
                size: 0x400
            })
        );
    }

    #[test]
    fn loaded_memory_belongs_to_the_process() {
        let mut cpu = make_cpu(&[]);
        let pid = spawn(&mut cpu, &hex!("003D"), 0x100);

        assert_eq!(
            cpu.mmu.allocations().extents_of(pid).copied().collect::<Vec<_>>(),
            vec![Extent {
                pid,
                start: 0x100,
                end: 0x104
            }]
        );
        assert_eq!(cpu.tick().unwrap(), Tick::Exited { pid, status: 0 });
        assert_eq!(cpu.current_pid(), KERNEL_PID);
    }

    #[test]
    fn cannot_load_over_another_process() {
        let mut cpu = make_cpu(&[]);

        spawn(&mut cpu, &hex!("003D"), 0x100);

        let pid = cpu.admit().unwrap();

        cpu.switch_to(pid).unwrap();

        assert!(matches!(
            cpu.load(&hex!("0000 003D"), 0x102),
            Err(LoadError::MMUError(MMUError::Overlap { .. }))
        ));
    }
}
