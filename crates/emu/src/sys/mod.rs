//! Syscall dispatch.
//!
//! Handlers read their arguments from a0..a5, perform the operation
//! against the process context, and write the result register
//! themselves. Failures never propagate to the host: filesystem errors
//! become negated errnos and guest-memory faults become -EFAULT. A ring
//! of the most recent calls is kept for the abort dump.

pub mod errno;
pub mod exec;
pub mod fork;
pub mod fs;
pub mod io;
pub mod mem;
pub mod nr;
pub mod poll;
pub mod process;
pub mod thread;
pub mod time;

use log::warn;
use machine::Machine;

use crate::proc::{EmuCore, TraceEntry};

/// riscv64 `*at` syscalls only support the current-directory token.
pub const AT_FDCWD: i32 = -100;
pub const AT_EMPTY_PATH: i32 = 0x1000;
pub const AT_SYMLINK_NOFOLLOW: i32 = 0x100;

/// Route one `ecall` to its handler. This is the `ecall` sink handed to
/// the engine by the run loop.
pub fn dispatch(m: &mut Machine, core: &mut EmuCore, number: u64) {
    let (a0, a1, a2) = (m.sysarg(0), m.sysarg(1), m.sysarg(2));

    match number {
        nr::OPENAT => fs::sys_openat(m, core),
        nr::CLOSE => fs::sys_close(m, core),
        nr::GETDENTS64 => fs::sys_getdents64(m, core),
        nr::NEWFSTATAT => fs::sys_newfstatat(m, core),
        nr::FSTAT => fs::sys_fstat(m, core),
        nr::STATX => fs::sys_statx(m, core),
        nr::READLINKAT => fs::sys_readlinkat(m, core),
        nr::GETCWD => fs::sys_getcwd(m, core),
        nr::CHDIR => fs::sys_chdir(m, core),
        nr::FACCESSAT | nr::FACCESSAT2 => fs::sys_faccessat(m, core),
        nr::MKDIRAT => fs::sys_mkdirat(m, core),
        nr::UNLINKAT => fs::sys_unlinkat(m, core),
        nr::SYMLINKAT => fs::sys_symlinkat(m, core),
        nr::LINKAT => fs::sys_linkat(m, core),
        nr::RENAMEAT => fs::sys_renameat(m, core),
        nr::FTRUNCATE => fs::sys_ftruncate(m, core),
        nr::FCHMOD => fs::sys_fchmod(m, core),
        nr::FCHMODAT => fs::sys_fchmodat(m, core),
        nr::FCHOWNAT => fs::sys_fchownat(m, core),
        nr::LSEEK => fs::sys_lseek(m, core),
        nr::FLOCK => fs::sys_flock(m, core),
        nr::FSYNC => fs::sys_fsync(m, core),

        nr::READ => io::sys_read(m, core),
        nr::WRITE => io::sys_write(m, core),
        nr::READV => io::sys_readv(m, core),
        nr::WRITEV => io::sys_writev(m, core),
        nr::PREAD64 => io::sys_pread64(m, core),
        nr::PWRITE64 => io::sys_pwrite64(m, core),
        nr::PWRITEV => io::sys_pwritev(m, core),
        nr::SENDFILE => io::sys_sendfile(m, core),
        nr::IOCTL => io::sys_ioctl(m, core),
        nr::FCNTL => io::sys_fcntl(m, core),
        nr::DUP => io::sys_dup(m, core),
        nr::DUP3 => io::sys_dup3(m, core),
        nr::PIPE2 => io::sys_pipe2(m, core),
        nr::EVENTFD2 => io::sys_eventfd2(m, core),
        nr::CLOSE_RANGE => io::sys_close_range(m, core),
        nr::SOCKETPAIR => io::sys_socketpair(m, core),
        nr::SENDMSG => io::sys_sendmsg(m, core),
        nr::RECVMSG => io::sys_recvmsg(m, core),
        nr::GETSOCKOPT => io::sys_getsockopt(m, core),

        nr::MMAP => mem::sys_mmap(m, core),
        nr::MUNMAP => mem::sys_munmap(m, core),
        nr::MPROTECT => mem::sys_mprotect(m, core),
        nr::BRK => mem::sys_brk(m, core),
        nr::MREMAP => mem::sys_mremap(m, core),
        nr::MADVISE => mem::sys_madvise(m, core),

        nr::GETPID => process::sys_getpid(m, core),
        nr::GETPPID => process::sys_getppid(m, core),
        nr::GETTID => process::sys_gettid(m, core),
        nr::GETUID | nr::GETEUID | nr::GETGID | nr::GETEGID => process::sys_id_zero(m, core),
        nr::GETRESUID | nr::GETRESGID => process::sys_getresids(m, core),
        nr::GETPGID => process::sys_getpgid(m, core),
        nr::GETGROUPS => process::sys_getgroups(m, core),
        nr::UMASK => process::sys_umask(m, core),
        nr::UNAME => process::sys_uname(m, core),
        nr::SYSINFO => process::sys_sysinfo(m, core),
        nr::PRLIMIT64 => process::sys_prlimit64(m, core),
        nr::GETRLIMIT => process::sys_getrlimit(m, core),
        nr::SCHED_GETSCHEDULER => process::sys_sched_getscheduler(m, core),
        nr::SCHED_GETPARAM => process::sys_sched_getparam(m, core),
        nr::SCHED_GETAFFINITY => process::sys_sched_getaffinity(m, core),
        nr::MEMBARRIER => process::sys_membarrier(m, core),
        nr::PRCTL => process::sys_prctl(m, core),
        nr::CAPGET => process::sys_capget(m, core),
        nr::RSEQ | nr::IO_URING_SETUP | nr::RISCV_HWPROBE => process::sys_enosys(m, core),
        nr::RT_SIGACTION => process::sys_sigaction(m, core),
        nr::RT_SIGPROCMASK => process::sys_sigprocmask(m, core),
        nr::SIGALTSTACK => process::sys_sigaltstack(m, core),
        nr::RT_SIGRETURN => process::sys_rt_sigreturn(m, core),
        nr::KILL => process::sys_kill(m, core),
        nr::TKILL | nr::TGKILL => process::sys_tkill(m, core),

        nr::CLOCK_GETTIME => time::sys_clock_gettime(m, core),
        nr::CLOCK_GETRES => time::sys_clock_getres(m, core),
        nr::NANOSLEEP => time::sys_nanosleep(m, core),
        nr::GETRANDOM => time::sys_getrandom(m, core),

        nr::PPOLL => poll::sys_ppoll(m, core),
        nr::EPOLL_CREATE1 => poll::sys_epoll_create1(m, core),
        nr::EPOLL_CTL => poll::sys_epoll_ctl(m, core),
        nr::EPOLL_PWAIT => poll::sys_epoll_pwait(m, core),

        nr::CLONE => thread::sys_clone(m, core),
        nr::FUTEX => thread::sys_futex(m, core),
        nr::SCHED_YIELD => thread::sys_sched_yield(m, core),
        nr::SET_TID_ADDRESS => thread::sys_set_tid_address(m, core),
        nr::SET_ROBUST_LIST => thread::sys_set_robust_list(m, core),
        nr::EXIT => thread::sys_exit(m, core),
        nr::EXIT_GROUP => thread::sys_exit_group(m, core),

        nr::WAIT4 => fork::sys_wait4(m, core),
        nr::EXECVE => exec::sys_execve(m, core),

        other => {
            warn!("unimplemented syscall {} at pc {:#x}", other, m.cpu.pc());
            m.set_result(errno::ENOSYS);
        }
    }

    core.trace.record(TraceEntry {
        nr: number,
        a0,
        a1,
        a2,
        result: m.return_value(),
        pc: m.cpu.pc(),
    });
}

/// Read the C-string pointed to by syscall argument `index`; on fault,
/// fail the syscall with -EFAULT and return None.
pub(crate) fn memstr(m: &mut Machine, index: usize) -> Option<String> {
    let addr = m.sysarg(index);
    match m.memory.memstring(addr) {
        Ok(s) => Some(s),
        Err(_) => {
            m.set_result(errno::EFAULT);
            None
        }
    }
}

/// `*at` dirfd check: anything but AT_FDCWD is unsupported.
pub(crate) fn require_cwd(m: &mut Machine, dirfd: i32) -> bool {
    if dirfd != AT_FDCWD {
        m.set_result(errno::EOPNOTSUPP);
        return false;
    }
    true
}

/// Read iovec entry `i` at `iov_addr`: (base, len).
pub(crate) fn iovec(m: &Machine, iov_addr: u64, i: u64) -> Result<(u64, u64), machine::MachineException> {
    let base = m.memory.read_u64(iov_addr + i * 16)?;
    let len = m.memory.read_u64(iov_addr + i * 16 + 8)?;
    Ok((base, len))
}

/// Park the machine until the embedder feeds stdin: rewind the PC over
/// the ecall and stop. On resume the ecall re-executes the handler.
pub(crate) fn yield_for_stdin(m: &mut Machine, core: &mut EmuCore) {
    core.waiting_for_stdin = true;
    m.cpu.increment_pc(-4);
    m.stop();
}
