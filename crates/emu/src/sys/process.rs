//! Process identity, limits and the signal acknowledgement stubs.
//!
//! The guest is always PID 1 running as root. Signals are accepted but
//! never delivered; tkill(SIGABRT) produces a best-effort diagnostic
//! dump instead of terminating anything.

use log::{error, trace};
use machine::{Machine, REG_FP, REG_RA, REG_SP};

use super::errno;
use crate::proc::EmuCore;

pub fn sys_getpid(m: &mut Machine, _core: &mut EmuCore) {
    m.set_result(1);
}

pub fn sys_getppid(m: &mut Machine, _core: &mut EmuCore) {
    m.set_result(0);
}

pub fn sys_gettid(m: &mut Machine, core: &mut EmuCore) {
    m.set_result(core.sched.current_tid() as i64);
}

/// getuid/geteuid/getgid/getegid: root everywhere.
pub fn sys_id_zero(m: &mut Machine, _core: &mut EmuCore) {
    m.set_result(0);
}

/// getresuid/getresgid share a shape: three out-pointers, all zero.
pub fn sys_getresids(m: &mut Machine, _core: &mut EmuCore) {
    for i in 0..3 {
        if m.memory.write_u32(m.sysarg(i), 0).is_err() {
            m.set_result(errno::EFAULT);
            return;
        }
    }
    m.set_result(0);
}

pub fn sys_getpgid(m: &mut Machine, _core: &mut EmuCore) {
    m.set_result(1);
}

/// No supplementary groups.
pub fn sys_getgroups(m: &mut Machine, _core: &mut EmuCore) {
    m.set_result(0);
}

pub fn sys_umask(m: &mut Machine, core: &mut EmuCore) {
    let new_mask = m.sysarg(0) as u32;
    let old = core.umask;
    core.umask = new_mask & 0o777;
    m.set_result(old as i64);
}

pub fn sys_uname(m: &mut Machine, _core: &mut EmuCore) {
    const FIELD: usize = 65;
    let mut buf = [0u8; FIELD * 6];
    for (i, value) in [
        "Linux",
        "friscy",
        "6.1.0-friscy",
        "#1 SMP PREEMPT_DYNAMIC",
        "riscv64",
        "(none)",
    ]
    .iter()
    .enumerate()
    {
        let bytes = value.as_bytes();
        let n = bytes.len().min(FIELD - 1);
        buf[i * FIELD..i * FIELD + n].copy_from_slice(&bytes[..n]);
    }
    if m.memory.memcpy(m.sysarg(0), &buf).is_err() {
        m.set_result(errno::EFAULT);
        return;
    }
    m.set_result(0);
}

pub fn sys_sysinfo(m: &mut Machine, _core: &mut EmuCore) {
    // struct sysinfo, 64-bit layout.
    let mut buf = [0u8; 112];
    buf[0..8].copy_from_slice(&100i64.to_le_bytes()); // uptime
    buf[32..40].copy_from_slice(&(256u64 << 20).to_le_bytes()); // totalram
    buf[40..48].copy_from_slice(&(128u64 << 20).to_le_bytes()); // freeram
    buf[72..74].copy_from_slice(&1u16.to_le_bytes()); // procs
    buf[96..100].copy_from_slice(&1u32.to_le_bytes()); // mem_unit
    if m.memory.memcpy(m.sysarg(0), &buf).is_err() {
        m.set_result(errno::EFAULT);
        return;
    }
    m.set_result(0);
}

const RLIMIT_STACK: u32 = 3;
const RLIMIT_NOFILE: u32 = 7;
const RLIMIT_AS: u32 = 9;

fn rlimit_values(resource: u32) -> (u64, u64) {
    match resource {
        RLIMIT_NOFILE => (1024, 1024),
        RLIMIT_STACK => (8 << 20, u64::MAX),
        RLIMIT_AS => (u64::MAX, u64::MAX),
        _ => (u64::MAX, u64::MAX),
    }
}

fn write_rlimit(m: &mut Machine, addr: u64, resource: u32) -> bool {
    if addr == 0 {
        return true;
    }
    let (cur, max) = rlimit_values(resource);
    m.memory.write_u64(addr, cur).is_ok() && m.memory.write_u64(addr + 8, max).is_ok()
}

/// New limits are accepted and dropped; old limits report the fixed
/// table above.
pub fn sys_prlimit64(m: &mut Machine, _core: &mut EmuCore) {
    let resource = m.sysarg(1) as u32;
    let old_rlim = m.sysarg(3);
    if !write_rlimit(m, old_rlim, resource) {
        m.set_result(errno::EFAULT);
        return;
    }
    m.set_result(0);
}

pub fn sys_getrlimit(m: &mut Machine, _core: &mut EmuCore) {
    let resource = m.sysarg(0) as u32;
    let rlim = m.sysarg(1);
    if !write_rlimit(m, rlim, resource) {
        m.set_result(errno::EFAULT);
        return;
    }
    m.set_result(0);
}

pub fn sys_sched_getscheduler(m: &mut Machine, _core: &mut EmuCore) {
    m.set_result(0); // SCHED_OTHER
}

pub fn sys_sched_getparam(m: &mut Machine, _core: &mut EmuCore) {
    let param = m.sysarg(1);
    if m.memory.write_u32(param, 0).is_err() {
        m.set_result(errno::EFAULT);
        return;
    }
    m.set_result(0);
}

/// One emulated core.
pub fn sys_sched_getaffinity(m: &mut Machine, _core: &mut EmuCore) {
    let mask_addr = m.sysarg(2);
    if m.memory.write_u64(mask_addr, 1).is_err() {
        m.set_result(errno::EFAULT);
        return;
    }
    m.set_result(8);
}

/// MEMBARRIER_CMD_QUERY reports no commands; everything else is
/// unsupported so callers use compiler barriers.
pub fn sys_membarrier(m: &mut Machine, _core: &mut EmuCore) {
    if m.sysarg_i32(0) == 0 {
        m.set_result(0);
    } else {
        m.set_result(errno::ENOSYS);
    }
}

pub fn sys_prctl(m: &mut Machine, _core: &mut EmuCore) {
    m.set_result(0);
}

pub fn sys_capget(m: &mut Machine, _core: &mut EmuCore) {
    m.set_result(errno::EPERM);
}

pub fn sys_enosys(m: &mut Machine, _core: &mut EmuCore) {
    m.set_result(errno::ENOSYS);
}

// Signal handling is acknowledgement-only: handlers are recorded
// nowhere and never invoked.

pub fn sys_sigaction(m: &mut Machine, _core: &mut EmuCore) {
    trace!("rt_sigaction sig={}", m.sysarg_i32(0));
    m.set_result(0);
}

pub fn sys_sigprocmask(m: &mut Machine, _core: &mut EmuCore) {
    m.set_result(0);
}

pub fn sys_sigaltstack(m: &mut Machine, _core: &mut EmuCore) {
    m.set_result(0);
}

pub fn sys_rt_sigreturn(m: &mut Machine, _core: &mut EmuCore) {
    m.set_result(0);
}

pub fn sys_kill(m: &mut Machine, core: &mut EmuCore) {
    let pid = m.sysarg_i32(0);
    let sig = m.sysarg_i32(1);
    // Ourselves, our process group, or the one cooperative child.
    if pid <= 1 || pid == core.fork.child_pid {
        trace!("kill(pid={}, sig={}) accepted", pid, sig);
        m.set_result(0);
    } else {
        m.set_result(errno::ESRCH);
    }
}

/// tkill/tgkill. SIGABRT produces the post-mortem dump the original
/// debugging workflow depends on, then still reports success (no signal
/// is delivered).
pub fn sys_tkill(m: &mut Machine, core: &mut EmuCore) {
    let sig = m.sysarg_i32(1);
    if sig == 6 {
        abort_dump(m, core);
    }
    m.set_result(0);
}

fn abort_dump(m: &Machine, core: &EmuCore) {
    error!("guest abort: tkill(SIGABRT)");
    error!("recent syscalls:");
    for (i, e) in core.trace.recent().iter().enumerate() {
        error!(
            "  [{}] sys#{} a0={:#x} a1={:#x} a2={:#x} => {} (pc={:#x})",
            i, e.nr, e.a0, e.a1, e.a2, e.result, e.pc
        );
    }
    error!(
        "pc={:#x} ra={:#x} sp={:#x}",
        m.cpu.pc(),
        m.cpu.reg(REG_RA),
        m.cpu.reg(REG_SP)
    );
    error!("registers:\n{}", m.cpu.dump());

    // Strings reachable from the argument registers often carry the
    // abort message.
    for r in 10..=15 {
        let addr = m.cpu.reg(r);
        if addr > 0x10000 && addr < m.memory.size() {
            if let Ok(s) = m.memory.memstring(addr) {
                let printable: String = s
                    .chars()
                    .take_while(|c| !c.is_control() || *c == '\n' || *c == '\t')
                    .take(256)
                    .collect();
                if !printable.is_empty() {
                    error!("  x{} string: {:?}", r, printable);
                }
            }
        }
    }

    // Return addresses near the stack pointer.
    let sp = m.cpu.reg(REG_SP);
    let mut stack_words = String::new();
    for i in 0..32 {
        if let Ok(value) = m.memory.read_u64(sp + i * 8) {
            if value > 0x40000 && value < m.memory.size() {
                stack_words.push_str(&format!(" SP+{}: {:#x}", i * 8, value));
            }
        } else {
            break;
        }
    }
    if !stack_words.is_empty() {
        error!("stack words:{}", stack_words);
    }

    // Frame-pointer chain walk.
    let mut fp = m.cpu.reg(REG_FP);
    for depth in 0..20 {
        if fp <= 0x40000 || fp >= m.memory.size() {
            break;
        }
        let (Ok(saved_ra), Ok(saved_fp)) =
            (m.memory.read_u64(fp.wrapping_sub(8)), m.memory.read_u64(fp.wrapping_sub(16)))
        else {
            break;
        };
        error!("  frame[{}] ra={:#x} fp={:#x}", depth, saved_ra, saved_fp);
        fp = saved_fp;
    }
}
