//! The outer control flow: drive the engine, absorb execve restarts,
//! promote faulting pages, surface stdin waits to the embedder.

use anyhow::{bail, Result};
use log::{debug, warn};
use machine::{CpuEngine, Machine, MachineException, PageAttributes, StopReason, PAGE_SIZE};

use crate::proc::EmuCore;
use crate::sys;
use crate::{ARENA_BITS, MAX_INSTRUCTIONS, SIM_SLICE};

/// Why control came back to the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Guest exited with this status.
    Exited(i32),
    /// A read/poll on stdin found the queue empty; feed the terminal
    /// bridge and call `resume`.
    WaitingForStdin,
}

/// Faulting pages are promoted and retried this many times before the
/// fault is reported as fatal.
const FAULT_RETRIES: u32 = 8;

/// The assembled guest: one machine, one process context, one engine.
///
/// EMULATOR ARCHITECTURE OVERVIEW:
/// - Machine: architectural state (registers, arena, page attributes)
/// - EmuCore: the Linux personality (rootfs, scheduler, fork/exec state)
/// - CpuEngine: pluggable instruction execution (the bundled rv64
///   interpreter, or a JIT/AOT backend)
///
/// CONTROL FLOW: `run` slices execution so an embedding event loop can
/// interleave host work. Three things bring control back here: the
/// guest exits, a stdin read finds the queue empty (feed the terminal
/// bridge, then `resume`), or a fault needs page promotion, which is
/// handled internally with a bounded retry.
///
/// SINGLE-THREADED BY DESIGN: guest concurrency is cooperative inside
/// the syscall layer; embedders must serialize calls into one Emulator.
pub struct Emulator {
    pub machine: Machine,
    pub core: EmuCore,
    engine: Box<dyn CpuEngine>,
}

impl Emulator {
    pub fn new(engine: Box<dyn CpuEngine>) -> Self {
        Emulator {
            machine: Machine::new(ARENA_BITS),
            core: EmuCore::new(),
            engine,
        }
    }

    pub fn with_core(engine: Box<dyn CpuEngine>, core: EmuCore) -> Self {
        Emulator {
            machine: Machine::new(ARENA_BITS),
            core,
            engine,
        }
    }

    /// Load the entry binary and prepare the initial stack.
    pub fn load(&mut self, binary: Vec<u8>, args: Vec<String>, env: Vec<String>) -> Result<()> {
        crate::loader::boot(&mut self.machine, &mut self.core, binary, args, env)
    }

    /// Run until the guest exits or needs stdin. Time-sliced so an
    /// embedding event loop can interleave work between chunks; in this
    /// synchronous entry point the slices just loop.
    pub fn run(&mut self) -> Result<RunOutcome> {
        loop {
            if let Some(outcome) = self.run_slice(SIM_SLICE)? {
                return Ok(outcome);
            }
            if self.machine.instret >= MAX_INSTRUCTIONS {
                bail!(
                    "instruction ceiling reached ({} executed)",
                    self.machine.instret
                );
            }
        }
    }

    /// Re-enter after the embedder fed the stdin queue (or set EOF).
    /// The parked ecall re-executes and observes the new state.
    pub fn resume(&mut self) -> Result<RunOutcome> {
        self.run()
    }

    /// One bounded simulation slice. `None` means the budget ran out
    /// with the guest still runnable.
    pub fn run_slice(&mut self, budget: u64) -> Result<Option<RunOutcome>> {
        let mut fault_retries = 0u32;
        loop {
            self.machine.restart();
            self.core.waiting_for_stdin = false;

            let Emulator { machine, core, engine } = self;
            let result = engine.simulate(
                machine,
                &mut |m: &mut Machine, nr: u64| sys::dispatch(m, core, nr),
                budget,
            );

            match result {
                Ok(StopReason::Stopped) => {
                    if self.core.execve_restart {
                        // New binary in place; re-enter with clean caches.
                        self.core.execve_restart = false;
                        continue;
                    }
                    if self.core.waiting_for_stdin {
                        return Ok(Some(RunOutcome::WaitingForStdin));
                    }
                    return Ok(Some(RunOutcome::Exited(
                        self.machine.return_value() as i32
                    )));
                }
                Ok(StopReason::LimitReached) => return Ok(None),
                Err(e) if e.addr != 0 && fault_retries < FAULT_RETRIES => {
                    // Lazily-permissioned pages (BRK spans, restored
                    // snapshots): promote and retry in place.
                    fault_retries += 1;
                    debug!("fault retry {}: {}", fault_retries, e);
                    self.machine.memory.set_page_attr(
                        e.addr & !(PAGE_SIZE - 1),
                        PAGE_SIZE,
                        PageAttributes::rwx(),
                    );
                    continue;
                }
                Err(e) => {
                    self.report_fatal(&e);
                    bail!("machine exception: {}", e);
                }
            }
        }
    }

    fn report_fatal(&self, e: &MachineException) {
        warn!(
            "fatal guest fault: {} (pc={:#x}, data={:#x})",
            e,
            self.machine.cpu.pc(),
            e.addr
        );
        warn!("register state:\n{}", self.machine.cpu.dump());
        // Strings reachable from argument registers, best effort.
        for r in 10..=15 {
            let addr = self.machine.cpu.reg(r);
            if addr > 0x10000 && addr < self.machine.memory.size() {
                if let Ok(s) = self.machine.memory.memstring(addr) {
                    if !s.is_empty() && s.chars().all(|c| !c.is_control() || c == '\n') {
                        warn!("  x{} -> {:?}", r, s.chars().take(128).collect::<String>());
                    }
                }
            }
        }
    }
}
