//! The singleton process context.
//!
//! Everything the syscall handlers mutate lives here: the rootfs, the
//! terminal/net seams, the scheduler, fork and exec state, termios, the
//! epoll table and the PRNG. The CPU machine itself stays separate so
//! handlers can borrow both halves at once.

use std::collections::{BTreeSet, HashMap};

use rand::rngs::StdRng;
use rand::SeedableRng;
use vfs::{FileKind, VirtualFs};

use crate::net::{NetworkShim, NoNetwork};
use crate::sched::ThreadScheduler;
use crate::term::{QueueTerminal, TermiosState, TerminalBridge};

/// First PID handed to guest clones; the main "process" is PID 1.
pub const FIRST_GUEST_PID: i32 = 100;

/// Epoll fds are synthesized above socket-fd territory.
pub const FIRST_EPOLL_FD: i32 = 2000;

/// A saved span of guest memory (fork snapshot).
#[derive(Debug, Default, Clone)]
pub struct MemRegion {
    pub addr: u64,
    pub data: Vec<u8>,
}

impl MemRegion {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.addr = 0;
        self.data = Vec::new();
    }
}

/// Single-child fork emulation state. A snapshot exists exactly while
/// `in_child` is true; nested fork is refused.
#[derive(Debug, Default)]
pub struct ForkState {
    pub in_child: bool,
    pub child_reaped: bool,
    pub child_pid: i32,
    pub exit_status: i32,
    pub regs: [u64; 32],
    /// Parent resume point, already past the clone ecall.
    pub pc: u64,
    /// data/BSS plus the brk region of the main binary.
    pub exec_data: MemRegion,
    pub interp_data: MemRegion,
    pub stack_data: MemRegion,
    /// Guest mmap allocations between the heap end and the bump frontier.
    pub mmap_data: MemRegion,
    pub parent_open_fds: BTreeSet<i32>,
}

/// Layout state persisted across execve so a new binary can overwrite
/// the old one in place.
#[derive(Debug, Default)]
pub struct ExecContext {
    pub exec_binary: Vec<u8>,
    pub interp_binary: Vec<u8>,
    /// Base the main executable was placed at (0 for ET_EXEC).
    pub exec_base: u64,
    pub exec_rw_start: u64,
    pub exec_rw_end: u64,
    pub interp_base: u64,
    pub interp_rw_start: u64,
    pub interp_rw_end: u64,
    pub interp_entry: u64,
    /// Adjusted (post-relocation) auxv inputs for the loaded binary.
    pub entry: u64,
    pub phdr_vaddr: u64,
    pub phent: u64,
    pub phnum: u64,
    pub original_stack_top: u64,
    pub heap_start: u64,
    pub heap_size: u64,
    pub brk_base: u64,
    pub brk_current: u64,
    pub brk_overridden: bool,
    pub env: Vec<String>,
    pub dynamic: bool,
}

/// One epoll interest: event mask plus the caller's opaque cookie.
#[derive(Debug, Clone, Copy)]
pub struct EpollInterest {
    pub events: u32,
    pub data: u64,
}

#[derive(Debug, Default)]
pub struct EpollInstance {
    pub interests: HashMap<i32, EpollInterest>,
}

/// Ring buffer of recent syscalls, dumped on guest aborts.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceEntry {
    pub nr: u64,
    pub a0: u64,
    pub a1: u64,
    pub a2: u64,
    pub result: i64,
    pub pc: u64,
}

#[derive(Debug)]
pub struct TraceRing {
    entries: [TraceEntry; Self::LEN],
    index: usize,
}

impl TraceRing {
    pub const LEN: usize = 32;

    pub fn new() -> Self {
        TraceRing {
            entries: [TraceEntry::default(); Self::LEN],
            index: 0,
        }
    }

    pub fn record(&mut self, entry: TraceEntry) {
        self.entries[self.index % Self::LEN] = entry;
        self.index += 1;
    }

    /// Oldest-first view of the recorded tail.
    pub fn recent(&self) -> Vec<TraceEntry> {
        let mut out = Vec::new();
        let len = self.index.min(Self::LEN);
        for i in 0..len {
            out.push(self.entries[(self.index - len + i) % Self::LEN]);
        }
        out
    }
}

impl Default for TraceRing {
    fn default() -> Self {
        Self::new()
    }
}

pub struct EmuCore {
    pub fs: VirtualFs,
    pub term: Box<dyn TerminalBridge>,
    pub net: Box<dyn NetworkShim>,
    pub rng: StdRng,
    pub termios: TermiosState,
    /// Fds that behave like the controlling terminal. 0-2 stay members
    /// even when closed.
    pub tty_fds: BTreeSet<i32>,
    pub epoll: HashMap<i32, EpollInstance>,
    next_epoll_fd: i32,
    pub umask: u32,
    pub sched: ThreadScheduler,
    pub next_pid: i32,
    pub fork: ForkState,
    pub exec: ExecContext,
    pub trace: TraceRing,
    /// Set when a handler stopped the machine to wait for stdin.
    pub waiting_for_stdin: bool,
    /// Set when execve loaded new code and the run loop must re-enter.
    pub execve_restart: bool,
}

impl EmuCore {
    pub fn new() -> Self {
        Self::with_bridges(Box::new(QueueTerminal::new()), Box::new(NoNetwork))
    }

    pub fn with_bridges(term: Box<dyn TerminalBridge>, net: Box<dyn NetworkShim>) -> Self {
        EmuCore {
            fs: VirtualFs::new(),
            term,
            net,
            rng: StdRng::from_entropy(),
            termios: TermiosState::default(),
            tty_fds: BTreeSet::from([0, 1, 2]),
            epoll: HashMap::new(),
            next_epoll_fd: FIRST_EPOLL_FD,
            umask: 0o022,
            sched: ThreadScheduler::new(),
            next_pid: FIRST_GUEST_PID,
            fork: ForkState::default(),
            exec: ExecContext::default(),
            trace: TraceRing::new(),
            waiting_for_stdin: false,
            execve_restart: false,
        }
    }

    pub fn alloc_pid(&mut self) -> i32 {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    pub fn alloc_epoll_fd(&mut self) -> i32 {
        let fd = self.next_epoll_fd;
        self.next_epoll_fd += 1;
        self.epoll.insert(fd, EpollInstance::default());
        fd
    }

    pub fn is_tty_fd(&self, fd: i32) -> bool {
        self.tty_fds.contains(&fd)
    }

    /// Resolve a path through symlinks the way execve does (bounded at
    /// 10 hops, empty string when the chain dangles).
    pub fn resolve_path(&mut self, path: &str) -> String {
        let mut resolved = path.to_string();
        for _ in 0..10 {
            let node = match self.fs.resolve_nofollow(&resolved) {
                Some(n) => n,
                None => return String::new(),
            };
            if node.borrow().kind != FileKind::Symlink {
                return resolved;
            }
            let mut target = node.borrow().link_target.clone();
            if !target.starts_with('/') {
                if let Some(pos) = resolved.rfind('/') {
                    target = format!("{}/{}", &resolved[..pos], target);
                }
            }
            resolved = target;
        }
        String::new()
    }

    /// Search $PATH (from the exec environment) for a bare command name.
    /// Absolute and relative paths pass through unchanged.
    pub fn search_path(&mut self, cmd: &str) -> String {
        if cmd.is_empty() || cmd.contains('/') {
            return cmd.to_string();
        }
        let path_val = self
            .exec
            .env
            .iter()
            .find_map(|e| e.strip_prefix("PATH="))
            .unwrap_or("/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin")
            .to_string();
        for dir in path_val.split(':') {
            if dir.is_empty() {
                continue;
            }
            let candidate = format!("{}/{}", dir, cmd);
            let resolved = self.resolve_path(&candidate);
            if resolved.is_empty() {
                continue;
            }
            if let Some(node) = self.fs.resolve(&resolved) {
                if node.borrow().kind == FileKind::Regular {
                    return candidate;
                }
            }
        }
        String::new()
    }
}

impl Default for EmuCore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EmuCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmuCore")
            .field("tty_fds", &self.tty_fds)
            .field("threads", &self.sched.count)
            .field("in_child", &self.fork.in_child)
            .field("dynamic", &self.exec.dynamic)
            .finish()
    }
}
