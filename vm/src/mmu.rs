use crate::{
    privilege_level::PrivilegeLevel,
    process::Pid,
    ram::{RAMError, MAX_RAM_SIZE, RAM},
};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MMUError {
    #[error(transparent)]
    RAMError(#[from] RAMError),
    #[error("Process {pid} may not access '0x{address:04X}' owned by process {owner}")]
    Violation { address: u16, pid: Pid, owner: Pid },
    #[error("Range 0x{start:04X}..0x{end:04X} for process {pid} overlaps memory of process {owner}")]
    Overlap {
        start: u32,
        end: u32,
        pid: Pid,
        owner: Pid,
    },
}

#[derive(Debug, Clone)]
pub struct RAMConfig {
    pub size: u32,
}

impl Default for RAMConfig {
    fn default() -> Self {
        Self { size: MAX_RAM_SIZE }
    }
}

/// Half-open address range `start..end` owned by one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub pid: Pid,
    pub start: u32,
    pub end: u32,
}

impl Extent {
    pub fn contains(&self, address: u32) -> bool {
        self.start <= address && address < self.end
    }
}

/// Extents of one process never overlap and never abut.
#[derive(Debug, Clone, Default)]
pub struct AllocationTable {
    extents: Vec<Extent>,
}

impl AllocationTable {
    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    pub fn extents_of(&self, pid: Pid) -> impl Iterator<Item = &Extent> + '_ {
        self.extents.iter().filter(move |extent| extent.pid == pid)
    }

    pub fn owner(&self, address: u32) -> Option<Pid> {
        self.extents
            .iter()
            .find(|extent| extent.contains(address))
            .map(|extent| extent.pid)
    }

    pub fn allocate(&mut self, pid: Pid, address: u32, size: u32) -> Result<(), MMUError> {
        if size == 0 {
            return Ok(());
        }

        let mut start = address;
        let mut end = address.saturating_add(size);

        if let Some(other) = self
            .extents
            .iter()
            .find(|extent| extent.pid != pid && extent.start < end && start < extent.end)
        {
            return Err(MMUError::Overlap {
                start,
                end,
                pid,
                owner: other.pid,
            });
        }

        // Absorb every neighbour that touches the new range.
        self.extents.retain(|extent| {
            if extent.pid == pid && extent.start <= end && start <= extent.end {
                start = start.min(extent.start);
                end = end.max(extent.end);

                false
            } else {
                true
            }
        });

        self.extents.push(Extent { pid, start, end });
        self.extents.sort_by_key(|extent| extent.start);

        Ok(())
    }

    pub fn release(&mut self, pid: Pid) {
        self.extents.retain(|extent| extent.pid != pid);
    }
}

/// Who is touching memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub pid: Pid,
    pub privilege_level: PrivilegeLevel,
}

#[derive(Debug, Clone)]
pub struct MMU {
    ram: RAM,
    allocations: AllocationTable,
}

impl MMU {
    pub fn new(ram_config: RAMConfig) -> Result<Self, MMUError> {
        let ram = RAM::new(ram_config.size)?;

        Ok(Self {
            ram,
            allocations: AllocationTable::default(),
        })
    }

    pub fn ram(&self) -> &RAM {
        &self.ram
    }

    pub fn size(&self) -> u32 {
        self.ram.len()
    }

    pub fn allocations(&self) -> &AllocationTable {
        &self.allocations
    }

    pub fn allocate(&mut self, pid: Pid, address: u32, size: u32) -> Result<(), MMUError> {
        if address.saturating_add(size) > self.ram.len() {
            return Err(RAMError::OutOfBounds {
                address: address.saturating_add(size),
            }
            .into());
        }

        self.allocations.allocate(pid, address, size)
    }

    pub fn release(&mut self, pid: Pid) {
        tracing::debug!(pid, "releasing memory");

        self.allocations.release(pid);
    }

    /// Checks an access without changing ownership. `Ok(true)` means the
    /// cell is unowned and the access would allocate it.
    fn check(&self, address: u16, access: Access) -> Result<bool, MMUError> {
        self.ram.check_bounds(address as u32)?;

        if access.privilege_level.is_privileged() {
            return Ok(false);
        }

        match self.allocations.owner(address as u32) {
            Some(owner) if owner == access.pid => Ok(false),
            Some(owner) => {
                tracing::warn!(pid = access.pid, owner, address, "memory violation");

                Err(MMUError::Violation {
                    address,
                    pid: access.pid,
                    owner,
                })
            }
            None => Ok(true),
        }
    }

    /// Unowned cells are handed to the first process that touches them.
    pub fn check_access(&mut self, address: u16, access: Access) -> Result<(), MMUError> {
        if self.check(address, access)? {
            tracing::debug!(pid = access.pid, address, "allocating on first touch");

            self.allocations.allocate(access.pid, address as u32, 1)?;
        }

        Ok(())
    }

    pub fn read(&mut self, address: u16, access: Access) -> Result<u8, MMUError> {
        self.check_access(address, access)?;

        Ok(self.ram.read_u8(address)?)
    }

    pub fn write(&mut self, value: u8, address: u16, access: Access) -> Result<(), MMUError> {
        self.check_access(address, access)?;

        Ok(self.ram.write_u8(value, address)?)
    }

    /// Big-endian word at `address` and `address + 1`.
    pub fn read_word(&mut self, address: u16, access: Access) -> Result<u16, MMUError> {
        let high = self.read(address, access)?;
        let low = self.read(next_address(address)?, access)?;

        Ok(u16::from_be_bytes([high, low]))
    }

    pub fn write_word(&mut self, value: u16, address: u16, access: Access) -> Result<(), MMUError> {
        let [high, low] = value.to_be_bytes();
        let next = next_address(address)?;

        // Neither byte lands unless both may.
        self.check(address, access)?;
        self.check(next, access)?;

        self.write(high, address, access)?;
        self.write(low, next, access)
    }
}

fn next_address(address: u16) -> Result<u16, MMUError> {
    address.checked_add(1).ok_or(MMUError::RAMError(RAMError::OutOfBounds {
        address: address as u32 + 1,
    }))
}

#[cfg(test)]
mod tests {
    use super::{Access, AllocationTable, Extent, MMUError, RAMConfig, MMU};
    use crate::{privilege_level::PrivilegeLevel, ram::RAMError};

    fn user(pid: u16) -> Access {
        Access {
            pid,
            privilege_level: PrivilegeLevel::User,
        }
    }

    fn kernel() -> Access {
        Access {
            pid: 0,
            privilege_level: PrivilegeLevel::Kernel,
        }
    }

    fn make_mmu() -> MMU {
        MMU::new(RAMConfig { size: 0x100 }).unwrap()
    }

    #[test]
    fn merges_left_neighbour() {
        let mut table = AllocationTable::default();

        table.allocate(1, 0x10, 4).unwrap();
        table.allocate(1, 0x14, 4).unwrap();

        assert_eq!(
            table.extents(),
            &[Extent {
                pid: 1,
                start: 0x10,
                end: 0x18
            }]
        );
    }

    #[test]
    fn merges_right_neighbour() {
        let mut table = AllocationTable::default();

        table.allocate(1, 0x14, 4).unwrap();
        table.allocate(1, 0x10, 4).unwrap();

        assert_eq!(
            table.extents(),
            &[Extent {
                pid: 1,
                start: 0x10,
                end: 0x18
            }]
        );
    }

    #[test]
    fn bridges_both_neighbours() {
        let mut table = AllocationTable::default();

        table.allocate(1, 0x00, 0x10).unwrap();
        table.allocate(1, 0x20, 0x10).unwrap();
        table.allocate(2, 0x40, 0x10).unwrap();
        table.allocate(1, 0x10, 0x10).unwrap();

        assert_eq!(
            table.extents_of(1).copied().collect::<Vec<_>>(),
            vec![Extent {
                pid: 1,
                start: 0x00,
                end: 0x30
            }]
        );
        assert_eq!(table.extents_of(2).count(), 1);
    }

    #[test]
    fn allocating_twice_is_idempotent() {
        let mut table = AllocationTable::default();

        table.allocate(3, 0x80, 8).unwrap();
        table.allocate(3, 0x80, 8).unwrap();
        table.allocate(3, 0x82, 2).unwrap();

        assert_eq!(
            table.extents(),
            &[Extent {
                pid: 3,
                start: 0x80,
                end: 0x88
            }]
        );
    }

    #[test]
    fn same_range_for_other_process_is_rejected() {
        let mut table = AllocationTable::default();

        table.allocate(1, 0x10, 4).unwrap();

        assert_eq!(
            table.allocate(2, 0x12, 4),
            Err(MMUError::Overlap {
                start: 0x12,
                end: 0x16,
                pid: 2,
                owner: 1
            })
        );
        // Abutting another process is fine and is not merged.
        table.allocate(2, 0x14, 4).unwrap();

        assert_eq!(table.extents().len(), 2);
    }

    #[test]
    fn release_drops_only_owner() {
        let mut table = AllocationTable::default();

        table.allocate(1, 0x00, 4).unwrap();
        table.allocate(2, 0x10, 4).unwrap();
        table.allocate(1, 0x20, 4).unwrap();
        table.release(1);

        assert_eq!(
            table.extents(),
            &[Extent {
                pid: 2,
                start: 0x10,
                end: 0x14
            }]
        );
    }

    #[test]
    fn first_touch_allocates() {
        let mut mmu = make_mmu();

        mmu.write(7, 0x30, user(1)).unwrap();
        mmu.write(8, 0x31, user(1)).unwrap();

        assert_eq!(mmu.read(0x30, user(1)), Ok(7));
        assert_eq!(
            mmu.allocations().extents(),
            &[Extent {
                pid: 1,
                start: 0x30,
                end: 0x32
            }]
        );
    }

    #[test]
    fn isolation_between_processes() {
        let mut mmu = make_mmu();

        mmu.allocate(2, 0x40, 0x10).unwrap();
        mmu.write(0x55, 0x44, user(2)).unwrap();

        assert_eq!(
            mmu.read(0x44, user(1)),
            Err(MMUError::Violation {
                address: 0x44,
                pid: 1,
                owner: 2
            })
        );
        assert!(mmu.write(0, 0x44, user(1)).is_err());
        assert_eq!(mmu.read(0x44, user(2)), Ok(0x55));
        assert_eq!(
            mmu.allocations().extents(),
            &[Extent {
                pid: 2,
                start: 0x40,
                end: 0x50
            }]
        );
    }

    #[test]
    fn kernel_bypasses_protection() {
        let mut mmu = make_mmu();

        mmu.allocate(2, 0x40, 0x10).unwrap();
        mmu.write(9, 0x41, kernel()).unwrap();

        assert_eq!(mmu.read(0x41, kernel()), Ok(9));
        assert_eq!(mmu.allocations().extents().len(), 1);
    }

    #[test]
    fn words_are_big_endian() {
        let mut mmu = make_mmu();

        mmu.write_word(0x1234, 0x10, kernel()).unwrap();

        assert_eq!(mmu.ram().as_slice()[0x10..0x12], [0x12, 0x34]);
        assert_eq!(mmu.read_word(0x10, kernel()), Ok(0x1234));
    }

    #[test]
    fn word_write_is_all_or_nothing() {
        let mut mmu = make_mmu();

        mmu.allocate(2, 0x80, 0x10).unwrap();

        assert_eq!(
            mmu.write_word(0x1234, 0x7F, user(1)),
            Err(MMUError::Violation {
                address: 0x80,
                pid: 1,
                owner: 2
            })
        );
        assert_eq!(mmu.ram().as_slice()[0x7F], 0);
        assert_eq!(mmu.allocations().owner(0x7F), None);
    }

    #[test]
    fn out_of_bounds() {
        let mut mmu = make_mmu();

        assert_eq!(
            mmu.read(0x100, kernel()),
            Err(MMUError::RAMError(RAMError::OutOfBounds { address: 0x100 }))
        );
        assert!(mmu.allocate(1, 0xF0, 0x20).is_err());
    }
}
