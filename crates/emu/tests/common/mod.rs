//! Shared test scaffolding: a machine + core pair with a queue-backed
//! terminal, and helpers to issue syscalls the way the engine would.
#![allow(dead_code)]

use emu::net::NoNetwork;
use emu::proc::EmuCore;
use emu::term::{QueueTerminal, SharedTerminal};
use machine::{Machine, REG_A0, REG_A7};

/// 16 MiB arena keeps direct-dispatch tests fast.
pub const TEST_ARENA_BITS: u32 = 24;

pub struct TestEnv {
    pub m: Machine,
    pub core: EmuCore,
    pub term: SharedTerminal,
}

pub fn env() -> TestEnv {
    let term = SharedTerminal::new(QueueTerminal::new());
    let core = EmuCore::with_bridges(Box::new(term.clone()), Box::new(NoNetwork));
    let m = Machine::new(TEST_ARENA_BITS);
    TestEnv { m, core, term }
}

/// Like `env`, with a plausible post-load layout so the memory and fork
/// handlers have regions to work with.
pub fn env_with_layout() -> TestEnv {
    let mut t = env();
    t.core.exec.exec_rw_start = 0x10_0000;
    t.core.exec.exec_rw_end = 0x18_0000;
    t.core.exec.heap_start = 0x20_0000;
    t.core.exec.heap_size = 0x10_0000;
    t.core.exec.brk_base = 0x20_0000;
    t.core.exec.brk_current = 0x20_0000;
    t.core.exec.original_stack_top = 0xf0_0000;
    t.m.memory.set_heap(0x20_0000, 0x10_0000);
    t.m.memory.set_mmap_start(0x40_0000);
    t.m.cpu.set_reg(machine::REG_SP, 0xef_0000);
    t
}

/// Issue one syscall exactly like the engine's ecall sink does.
pub fn ecall(t: &mut TestEnv, nr: u64, args: &[u64]) -> i64 {
    for i in 0..6 {
        t.m.cpu.set_reg(REG_A0 + i, args.get(i).copied().unwrap_or(0));
    }
    t.m.cpu.set_reg(REG_A7, nr);
    emu::sys::dispatch(&mut t.m, &mut t.core, nr);
    t.m.return_value()
}

/// Place a NUL-terminated string in guest memory.
pub fn put_cstr(t: &mut TestEnv, addr: u64, s: &str) -> u64 {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    t.m.memory.memcpy(addr, &bytes).unwrap();
    addr
}

/// Read guest bytes into a host vector.
pub fn get_bytes(t: &TestEnv, addr: u64, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    t.m.memory.memcpy_out(&mut buf, addr).unwrap();
    buf
}
