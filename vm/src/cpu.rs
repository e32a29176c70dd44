use crate::{
    addressing::{resolve, resolve_target, AddressingError, Operand, Target},
    ifu::IFU,
    interrupt::Interrupt,
    io::Device,
    isa::{Instruction, Opcode},
    mmu::{Access, MMUError, RAMConfig, MMU},
    privilege_level::PrivilegeLevel,
    process::{Pid, ProcessTable, KERNEL_PID},
    registers::{Flags, Register, Registers, A, B, SP, X, Y},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CPUError {
    #[error("Process {pid} ran off the end of memory at '0x{pc:04X}'")]
    PcOutOfBounds { pid: Pid, pc: u16 },
    #[error("The machine halted with status {status}")]
    Halted { status: u16 },
    #[error("The kernel faulted at '0x{pc:04X}': {cause}")]
    KernelFault { cause: Interrupt, pc: u16 },
    #[error("No process ids left")]
    ProcessTableFull,
    #[error("Device failure: {0}")]
    Device(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default)]
pub struct CPUConfig {
    pub ram: RAMConfig,
}

/// Outcome of a single [CPU::tick].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Executed,
    /// Control is now with the kernel.
    Trapped(Interrupt),
    Exited { pid: Pid, status: u16 },
}

/// Why an instruction did not complete.
enum Fault {
    Trap(Interrupt),
    Fatal(CPUError),
}

impl From<MMUError> for Fault {
    fn from(_: MMUError) -> Self {
        Fault::Trap(Interrupt::MemoryViolation)
    }
}

impl From<AddressingError> for Fault {
    fn from(_: AddressingError) -> Self {
        Fault::Trap(Interrupt::IllegalInstruction)
    }
}

impl From<std::io::Error> for Fault {
    fn from(err: std::io::Error) -> Self {
        Fault::Fatal(CPUError::Device(err))
    }
}

/// What a completed instruction leaves to do.
enum Effect {
    Next,
    /// `pc` was set by the instruction.
    Jump,
    Trap(Interrupt),
    Privilege(PrivilegeLevel),
    Exit(u16),
}

fn operand(instruction: &Instruction, index: usize) -> Result<Operand, Fault> {
    instruction
        .operands
        .get(index)
        .copied()
        .ok_or(Fault::Trap(Interrupt::InvalidOperandCount))
}

/// A fresh process starts with its stack at the top of memory.
fn initial_stack_pointer(memory_size: u32) -> u16 {
    (memory_size - 1) as u16
}

/// The whole machine: memory, processes, privilege state and devices.
#[derive(Debug)]
pub struct CPU {
    pub privilege_level: PrivilegeLevel,
    processes: ProcessTable,
    pub mmu: MMU,
    pub ifu: IFU,
    current: Pid,
    io: Box<dyn Device>,
    exit_status: Option<u16>,
}

impl CPU {
    pub fn new(config: CPUConfig, io: Box<dyn Device>) -> Result<Self, anyhow::Error> {
        let mmu = MMU::new(config.ram)?;
        let kernel = Registers::with_stack_pointer(initial_stack_pointer(mmu.size()));

        Ok(Self {
            privilege_level: PrivilegeLevel::Kernel,
            processes: ProcessTable::new(kernel),
            mmu,
            ifu: IFU,
            current: KERNEL_PID,
            io,
            exit_status: None,
        })
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn current_pid(&self) -> Pid {
        self.current
    }

    /// Set once the kernel has executed `HLT`.
    pub fn exit_status(&self) -> Option<u16> {
        self.exit_status
    }

    pub fn access(&self) -> Access {
        Access {
            pid: self.current,
            privilege_level: self.privilege_level,
        }
    }

    pub fn registers(&self) -> &Registers {
        match self.processes.get(self.current) {
            Some(registers) => registers,
            None => unreachable!("current process {} is not in the table", self.current),
        }
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        self.processes.get_mut(self.current).unwrap_or_else(|| unreachable!())
    }

    pub fn admit(&mut self) -> Result<Pid, CPUError> {
        let registers = Registers::with_stack_pointer(initial_stack_pointer(self.mmu.size()));
        let pid = self
            .processes
            .admit(registers)
            .ok_or(CPUError::ProcessTableFull)?;

        tracing::debug!(pid, "admitted process");

        Ok(pid)
    }

    /// Moves the cursor to `pid`. An unknown pid raises
    /// [Interrupt::InvalidProcessId], which is also returned.
    pub fn switch_to(&mut self, pid: Pid) -> Result<(), Interrupt> {
        if !self.processes.contains(pid) {
            self.raise(Interrupt::InvalidProcessId);

            return Err(Interrupt::InvalidProcessId);
        }

        tracing::debug!(from = self.current, to = pid, "context switch");

        self.current = pid;

        Ok(())
    }

    /// Switches to `pid` and drops to user mode unless it is the kernel.
    pub fn resume(&mut self, pid: Pid) -> Result<(), Interrupt> {
        self.switch_to(pid)?;

        if pid != KERNEL_PID {
            self.privilege_level = PrivilegeLevel::User;
        }

        Ok(())
    }

    /// Hands control to the kernel: the cause goes into its accumulator and
    /// the interrupted pid into `b`. The interrupted process is left as is.
    pub fn raise(&mut self, cause: Interrupt) {
        let origin = self.current;

        tracing::debug!(pid = origin, %cause, "trap");

        self.current = KERNEL_PID;
        self.privilege_level = PrivilegeLevel::Kernel;

        let kernel = self.processes.kernel_mut();

        kernel.set(A, cause.code());
        kernel.set(B, origin);
    }

    /// Removes a process and frees its memory. The kernel can't be removed.
    pub fn terminate(&mut self, pid: Pid) -> bool {
        if self.processes.remove(pid).is_none() {
            return false;
        }

        self.mmu.release(pid);

        if self.current == pid {
            self.current = KERNEL_PID;
            self.privilege_level = PrivilegeLevel::Kernel;
        }

        true
    }

    /// Ticks until the kernel halts, or until `limit` instructions ran.
    pub fn run(&mut self, limit: Option<u64>) -> Result<Option<u16>, CPUError> {
        let mut steps = 0;

        while limit.map_or(true, |limit| steps < limit) {
            if let Tick::Exited {
                pid: KERNEL_PID,
                status,
            } = self.tick()?
            {
                return Ok(Some(status));
            }

            steps += 1;
        }

        Ok(None)
    }

    pub fn tick(&mut self) -> Result<Tick, CPUError> {
        if let Some(status) = self.exit_status {
            return Err(CPUError::Halted { status });
        }

        let pid = self.current;
        let access = self.access();
        let pc = self.registers().pc();

        let instruction = match self.ifu.fetch(&mut self.mmu, access, pc) {
            Ok(instruction) => instruction,
            Err(err) => {
                let Some(cause) = err.interrupt() else {
                    return Err(CPUError::PcOutOfBounds { pid, pc });
                };

                tracing::debug!(pid, pc, %err, "decode failed");

                return self.fault(cause, pc);
            }
        };

        tracing::trace!(pid, pc, %instruction);

        // Work on a copy so a faulting instruction leaves no trace.
        let mut registers = *self.registers();
        let next = pc.checked_add(instruction.size());

        let effect = match self.execute(&instruction, next, &mut registers) {
            Ok(effect) => effect,
            Err(Fault::Trap(cause)) => return self.fault(cause, pc),
            Err(Fault::Fatal(err)) => return Err(err),
        };

        if !matches!(effect, Effect::Jump) {
            let Some(next) = next else {
                return Err(CPUError::PcOutOfBounds { pid, pc });
            };

            *registers.pc_mut() = next;
        }

        *self.registers_mut() = registers;

        match effect {
            Effect::Next | Effect::Jump => Ok(Tick::Executed),
            Effect::Privilege(level) => {
                self.privilege_level = level;

                Ok(Tick::Executed)
            }
            Effect::Trap(cause) => {
                self.raise(cause);

                Ok(Tick::Trapped(cause))
            }
            Effect::Exit(status) => {
                tracing::info!(pid, status, "process exited");

                if pid == KERNEL_PID {
                    self.exit_status = Some(status);
                } else {
                    self.terminate(pid);
                }

                Ok(Tick::Exited { pid, status })
            }
        }
    }

    /// A fault in a user process traps into the kernel. The kernel has
    /// nobody to trap to, so its own faults stop the machine.
    fn fault(&mut self, cause: Interrupt, pc: u16) -> Result<Tick, CPUError> {
        if self.current == KERNEL_PID {
            tracing::error!(pc, %cause, "kernel fault");

            return Err(CPUError::KernelFault { cause, pc });
        }

        self.raise(cause);

        Ok(Tick::Trapped(cause))
    }

    /// `next` is the address after the instruction, `None` past the top of
    /// the address space.
    fn execute(
        &mut self,
        instruction: &Instruction,
        next: Option<u16>,
        registers: &mut Registers,
    ) -> Result<Effect, Fault> {
        let opcode = instruction.opcode;
        let flags = registers.flags();
        // The kernel may re-elevate after dropping privilege itself.
        let kernel_swt = opcode == Opcode::SWT && self.current == KERNEL_PID;

        if opcode.is_privileged() && !self.privilege_level.is_privileged() && !kernel_swt {
            return Err(Fault::Trap(Interrupt::IllegalInstruction));
        }

        match opcode {
            Opcode::NOP => {}
            Opcode::SYSCALL => return Ok(Effect::Trap(Interrupt::Syscall)),
            Opcode::LDA => self.load_register(registers, instruction, A)?,
            Opcode::LDX => self.load_register(registers, instruction, X)?,
            Opcode::LDY => self.load_register(registers, instruction, Y)?,
            Opcode::STA => self.store_register(registers, instruction, A)?,
            Opcode::STX => self.store_register(registers, instruction, X)?,
            Opcode::STY => self.store_register(registers, instruction, Y)?,
            Opcode::TAX => registers.set(X, registers.get(A)),
            Opcode::TAY => registers.set(Y, registers.get(A)),
            Opcode::TSX => registers.set(X, registers.get(SP)),
            Opcode::TXA => registers.set(A, registers.get(X)),
            Opcode::TXS => registers.set(SP, registers.get(X)),
            Opcode::TYA => registers.set(A, registers.get(Y)),
            Opcode::INC => self.adjust(registers, instruction, 1)?,
            Opcode::DEC => self.adjust(registers, instruction, u16::MAX)?,
            Opcode::INX => registers.set(X, registers.get(X).wrapping_add(1)),
            Opcode::INY => registers.set(Y, registers.get(Y).wrapping_add(1)),
            Opcode::DEX => registers.set(X, registers.get(X).wrapping_sub(1)),
            Opcode::DEY => registers.set(Y, registers.get(Y).wrapping_sub(1)),
            Opcode::ADD => self.accumulate(registers, instruction, |a, v| Some(a.wrapping_add(v)))?,
            Opcode::SUB => self.accumulate(registers, instruction, |a, v| Some(a.wrapping_sub(v)))?,
            Opcode::MUL => self.accumulate(registers, instruction, |a, v| Some(a.wrapping_mul(v)))?,
            Opcode::DIV => self.accumulate(registers, instruction, u16::checked_div)?,
            Opcode::MOD => self.accumulate(registers, instruction, u16::checked_rem)?,
            Opcode::AND => self.accumulate(registers, instruction, |a, v| Some(a & v))?,
            Opcode::ORA => self.accumulate(registers, instruction, |a, v| Some(a | v))?,
            Opcode::XOR => self.accumulate(registers, instruction, |a, v| Some(a ^ v))?,
            Opcode::SHL => registers.set(A, registers.get(A) << 1),
            Opcode::LSR => registers.set(A, registers.get(A) >> 1),
            Opcode::ROL => registers.set(A, registers.get(A).rotate_left(1)),
            Opcode::ROR => registers.set(A, registers.get(A).rotate_right(1)),
            Opcode::BIT => {
                let value = self.value(registers, instruction, 0)?;
                let zero = registers.get(A) & value == 0;

                registers.flags_mut().set(Flags::ZERO, zero);
            }
            Opcode::JMP => return self.jump(registers, instruction),
            Opcode::JSR => {
                let target = self.value(registers, instruction, 0)?;
                let next = next.ok_or(Fault::Fatal(CPUError::PcOutOfBounds {
                    pid: self.current,
                    pc: registers.pc(),
                }))?;

                self.push(registers, next)?;
                *registers.pc_mut() = target;

                return Ok(Effect::Jump);
            }
            Opcode::RTS | Opcode::RTI => {
                let target = self.pop(registers)?;

                *registers.pc_mut() = target;

                return Ok(Effect::Jump);
            }
            Opcode::BCC => return self.branch(registers, instruction, !flags.contains(Flags::CARRY)),
            Opcode::BCS => return self.branch(registers, instruction, flags.contains(Flags::CARRY)),
            Opcode::BEQ => return self.branch(registers, instruction, flags.contains(Flags::ZERO)),
            Opcode::BNE => return self.branch(registers, instruction, !flags.contains(Flags::ZERO)),
            Opcode::BMI => return self.branch(registers, instruction, flags.contains(Flags::NEGATIVE)),
            Opcode::BPL => return self.branch(registers, instruction, !flags.contains(Flags::NEGATIVE)),
            Opcode::BVC => return self.branch(registers, instruction, !flags.contains(Flags::OVERFLOW)),
            Opcode::BVS => return self.branch(registers, instruction, flags.contains(Flags::OVERFLOW)),
            Opcode::SEC => registers.flags_mut().set(Flags::CARRY, true),
            Opcode::SED => registers.flags_mut().set(Flags::DECIMAL, true),
            Opcode::CLC => registers.flags_mut().set(Flags::CARRY, false),
            Opcode::CLD => registers.flags_mut().set(Flags::DECIMAL, false),
            Opcode::CLV => registers.flags_mut().set(Flags::OVERFLOW, false),
            Opcode::PHA => {
                let value = registers.get(A);

                self.push(registers, value)?;
            }
            Opcode::PHP => self.push(registers, flags.bits() as u16)?,
            Opcode::PLA => {
                let value = self.pop(registers)?;

                registers.set(A, value);
            }
            Opcode::PLP => {
                let value = self.pop(registers)?;

                *registers.flags_mut() = Flags::from_bits(value as u8);
            }
            Opcode::CMP => self.compare(registers, instruction, A)?,
            Opcode::CPX => self.compare(registers, instruction, X)?,
            Opcode::CPY => self.compare(registers, instruction, Y)?,
            Opcode::MOV => {
                let target = resolve_target(operand(instruction, 0)?, registers.pc())?;
                let value = self.value(registers, instruction, 1)?;

                self.store(registers, target, value)?;
            }
            Opcode::INT => return Ok(Effect::Trap(Interrupt::from_code(registers.get(A)))),
            Opcode::CLP => return Ok(Effect::Privilege(PrivilegeLevel::User)),
            Opcode::SWT => return Ok(Effect::Privilege(PrivilegeLevel::Kernel)),
            Opcode::HLT => return Ok(Effect::Exit(registers.get(A))),
            Opcode::IN => {
                let value = self.io.input()?.map_or(u16::MAX, u16::from);

                registers.set(A, value);
            }
            Opcode::OUT => self.io.output(registers.get(A) as u8)?,
        }

        Ok(Effect::Next)
    }

    /// Resolves operand `index`. Control transfers take absolute operands as
    /// addresses.
    fn value(
        &mut self,
        registers: &Registers,
        instruction: &Instruction,
        index: usize,
    ) -> Result<u16, Fault> {
        let operand = operand(instruction, index)?;
        let control_transfer = instruction.opcode.is_control_transfer();
        let access = self.access();
        let mmu = &mut self.mmu;

        Ok(resolve(operand, registers, registers.pc(), control_transfer, |address| {
            mmu.read(address, access)
        })?)
    }

    fn read_target(&mut self, registers: &Registers, target: Target) -> Result<u16, Fault> {
        let access = self.access();

        match target {
            Target::Register(register) => Ok(registers.get(register)),
            Target::Memory(address) => Ok(self.mmu.read(address, access)? as u16),
        }
    }

    /// Memory cells keep the low byte.
    fn store(&mut self, registers: &mut Registers, target: Target, value: u16) -> Result<(), Fault> {
        let access = self.access();

        match target {
            Target::Register(register) => registers.set(register, value),
            Target::Memory(address) => self.mmu.write(value as u8, address, access)?,
        }

        Ok(())
    }

    fn load_register(
        &mut self,
        registers: &mut Registers,
        instruction: &Instruction,
        register: Register,
    ) -> Result<(), Fault> {
        let value = self.value(registers, instruction, 0)?;

        registers.set(register, value);

        Ok(())
    }

    fn store_register(
        &mut self,
        registers: &mut Registers,
        instruction: &Instruction,
        register: Register,
    ) -> Result<(), Fault> {
        let target = resolve_target(operand(instruction, 0)?, registers.pc())?;
        let value = registers.get(register);

        self.store(registers, target, value)
    }

    /// Without an operand the accumulator is adjusted.
    fn adjust(
        &mut self,
        registers: &mut Registers,
        instruction: &Instruction,
        delta: u16,
    ) -> Result<(), Fault> {
        let target = match instruction.operands.first() {
            Some(operand) => resolve_target(*operand, registers.pc())?,
            None => Target::Register(A),
        };
        let value = self.read_target(registers, target)?;

        self.store(registers, target, value.wrapping_add(delta))
    }

    /// `None` from `op` is a division by zero.
    fn accumulate(
        &mut self,
        registers: &mut Registers,
        instruction: &Instruction,
        op: impl FnOnce(u16, u16) -> Option<u16>,
    ) -> Result<(), Fault> {
        let value = self.value(registers, instruction, 0)?;
        let result =
            op(registers.get(A), value).ok_or(Fault::Trap(Interrupt::ArithmeticFault))?;

        registers.set(A, result);

        Ok(())
    }

    /// Rebuilds the flags from scratch.
    fn compare(
        &mut self,
        registers: &mut Registers,
        instruction: &Instruction,
        register: Register,
    ) -> Result<(), Fault> {
        let lhs = registers.get(register);
        let rhs = self.value(registers, instruction, 0)?;
        let mut flags = Flags::default();

        flags.set(Flags::ZERO, lhs == rhs);
        flags.set(Flags::CARRY, lhs >= rhs);
        flags.set(Flags::NEGATIVE, (lhs as i32 - rhs as i32) < 0);

        *registers.flags_mut() = flags;

        Ok(())
    }

    fn jump(&mut self, registers: &mut Registers, instruction: &Instruction) -> Result<Effect, Fault> {
        let target = self.value(registers, instruction, 0)?;

        *registers.pc_mut() = target;

        Ok(Effect::Jump)
    }

    fn branch(
        &mut self,
        registers: &mut Registers,
        instruction: &Instruction,
        taken: bool,
    ) -> Result<Effect, Fault> {
        if taken {
            self.jump(registers, instruction)
        } else {
            Ok(Effect::Next)
        }
    }

    /// Stack slots are big-endian words, the stack grows down.
    fn push(&mut self, registers: &mut Registers, value: u16) -> Result<(), Fault> {
        let access = self.access();
        let sp = registers.get(SP);

        self.mmu.write_word(value, sp.wrapping_sub(1), access)?;
        registers.set(SP, sp.wrapping_sub(2));

        Ok(())
    }

    fn pop(&mut self, registers: &mut Registers) -> Result<u16, Fault> {
        let access = self.access();
        let sp = registers.get(SP).wrapping_add(2);
        let value = self.mmu.read_word(sp.wrapping_sub(1), access)?;

        registers.set(SP, sp);

        Ok(value)
    }
}
