use std::collections::BTreeMap;

use crate::registers::Registers;

pub type Pid = u16;

/// The permanently privileged context that handles traps.
pub const KERNEL_PID: Pid = 0;

/// Process id to register file. Ids are never reused, so a pid stays valid
/// while unrelated processes come and go.
#[derive(Debug, Clone)]
pub struct ProcessTable {
    processes: BTreeMap<Pid, Registers>,
    next_pid: Option<Pid>,
}

impl ProcessTable {
    pub fn new(kernel: Registers) -> Self {
        let mut processes = BTreeMap::new();

        processes.insert(KERNEL_PID, kernel);

        Self {
            processes,
            next_pid: Some(KERNEL_PID + 1),
        }
    }

    /// Returns `None` once every pid has been handed out.
    pub fn admit(&mut self, registers: Registers) -> Option<Pid> {
        let pid = self.next_pid?;

        self.next_pid = pid.checked_add(1);
        self.processes.insert(pid, registers);

        Some(pid)
    }

    /// The kernel entry is never removed.
    pub fn remove(&mut self, pid: Pid) -> Option<Registers> {
        if pid == KERNEL_PID {
            return None;
        }

        self.processes.remove(&pid)
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.processes.contains_key(&pid)
    }

    pub fn get(&self, pid: Pid) -> Option<&Registers> {
        self.processes.get(&pid)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Registers> {
        self.processes.get_mut(&pid)
    }

    pub fn kernel_mut(&mut self) -> &mut Registers {
        self.processes.entry(KERNEL_PID).or_default()
    }

    pub fn pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.processes.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}
