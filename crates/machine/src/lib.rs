//! The CPU/memory wire contract.
//!
//! This crate owns the architectural state an instruction engine and the
//! guest-OS personality share: the register file, the flat guest arena
//! with its page-attribute map, machine exceptions, and the `CpuEngine`
//! trait that execution engines implement. It deliberately knows nothing
//! about Linux; syscall semantics live in the `emu` crate.

pub mod arena;
pub mod cpu;

pub use arena::{Arena, PageAttributes, PAGE_SIZE};
pub use cpu::{Cpu, REG_A0, REG_A7, REG_FP, REG_RA, REG_SP, REG_TP};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    /// Access outside the arena.
    OutOfBounds,
    /// Access violating the page-attribute map.
    Protection,
    /// Undecodable or unsupported instruction.
    IllegalInstruction,
}

/// A fault raised by guest execution or guest-memory access. `addr` is
/// the faulting guest address (0 when there is none); the run loop uses
/// it to decide between page promotion and a fatal report.
#[derive(Debug, Clone, Error)]
#[error("{kind:?} fault at {addr:#x} ({detail})")]
pub struct MachineException {
    pub kind: ExceptionKind,
    pub addr: u64,
    pub detail: String,
}

impl MachineException {
    pub fn oob(addr: u64, detail: impl Into<String>) -> Self {
        MachineException {
            kind: ExceptionKind::OutOfBounds,
            addr,
            detail: detail.into(),
        }
    }

    pub fn protection(addr: u64, detail: impl Into<String>) -> Self {
        MachineException {
            kind: ExceptionKind::Protection,
            addr,
            detail: detail.into(),
        }
    }

    pub fn illegal(pc: u64, detail: impl Into<String>) -> Self {
        MachineException {
            kind: ExceptionKind::IllegalInstruction,
            addr: pc,
            detail: detail.into(),
        }
    }
}

/// Why `simulate` returned without a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `Machine::stop` was called (guest exit, stdin wait, execve).
    Stopped,
    /// The instruction budget for this call ran out.
    LimitReached,
}

/// Architectural state plus the host-facing plumbing every engine and
/// syscall handler works against.
pub struct Machine {
    pub cpu: Cpu,
    pub memory: Arena,
    running: bool,
    /// Instructions retired across the machine's lifetime.
    pub instret: u64,
    limit_reached: bool,
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("pc", &format_args!("{:#x}", self.cpu.pc()))
            .field("running", &self.running)
            .field("instret", &self.instret)
            .finish()
    }
}

impl Machine {
    pub fn new(arena_bits: u32) -> Self {
        Machine {
            cpu: Cpu::new(),
            memory: Arena::new(arena_bits),
            running: true,
            instret: 0,
            limit_reached: false,
        }
    }

    /// Syscall argument from a0..a5.
    pub fn sysarg(&self, index: usize) -> u64 {
        debug_assert!(index < 6);
        self.cpu.reg(REG_A0 + index)
    }

    pub fn sysarg_i32(&self, index: usize) -> i32 {
        self.sysarg(index) as i32
    }

    pub fn sysarg_i64(&self, index: usize) -> i64 {
        self.sysarg(index) as i64
    }

    /// Syscall return value, written to a0.
    pub fn set_result(&mut self, value: i64) {
        self.cpu.set_reg(REG_A0, value as u64);
    }

    /// a0 as seen by the host after the machine stops.
    pub fn return_value(&self) -> i64 {
        self.cpu.reg(REG_A0) as i64
    }

    /// Request that the engine exits its dispatch loop at the next
    /// checkpoint. Cleared by `restart`.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn stopped(&self) -> bool {
        !self.running
    }

    /// Re-arm after a stop so `simulate` can be entered again.
    pub fn restart(&mut self) {
        self.running = true;
    }

    pub fn set_instruction_limit_reached(&mut self, reached: bool) {
        self.limit_reached = reached;
    }

    pub fn instruction_limit_reached(&self) -> bool {
        self.limit_reached
    }
}

/// An instruction-set engine. The bundled `rv64` crate provides the
/// reference interpreter; a JIT or AOT backend plugs in here as well.
///
/// `ecall` is invoked for every guest `ecall` with the syscall number
/// from a7; the engine must re-check `Machine::stopped` afterwards since
/// handlers stop the machine for exit, execve and stdin waits.
pub trait CpuEngine {
    fn simulate(
        &mut self,
        machine: &mut Machine,
        ecall: &mut dyn FnMut(&mut Machine, u64),
        budget: u64,
    ) -> Result<StopReason, MachineException>;
}
