//! Linux syscall numbers for riscv64.

pub const GETCWD: u64 = 17;
pub const EVENTFD2: u64 = 19;
pub const EPOLL_CREATE1: u64 = 20;
pub const EPOLL_CTL: u64 = 21;
pub const EPOLL_PWAIT: u64 = 22;
pub const DUP: u64 = 23;
pub const DUP3: u64 = 24;
pub const FCNTL: u64 = 25;
pub const IOCTL: u64 = 29;
pub const FLOCK: u64 = 32;
pub const MKDIRAT: u64 = 34;
pub const UNLINKAT: u64 = 35;
pub const SYMLINKAT: u64 = 36;
pub const LINKAT: u64 = 37;
pub const RENAMEAT: u64 = 38;
pub const FTRUNCATE: u64 = 46;
pub const FACCESSAT: u64 = 48;
pub const CHDIR: u64 = 49;
pub const FCHMOD: u64 = 52;
pub const FCHMODAT: u64 = 53;
pub const FCHOWNAT: u64 = 54;
pub const OPENAT: u64 = 56;
pub const CLOSE: u64 = 57;
pub const PIPE2: u64 = 59;
pub const GETDENTS64: u64 = 61;
pub const LSEEK: u64 = 62;
pub const READ: u64 = 63;
pub const WRITE: u64 = 64;
pub const READV: u64 = 65;
pub const WRITEV: u64 = 66;
pub const PREAD64: u64 = 67;
pub const PWRITE64: u64 = 68;
pub const PWRITEV: u64 = 70;
pub const SENDFILE: u64 = 71;
pub const PPOLL: u64 = 73;
pub const READLINKAT: u64 = 78;
pub const NEWFSTATAT: u64 = 79;
pub const FSTAT: u64 = 80;
pub const FSYNC: u64 = 82;
pub const CAPGET: u64 = 90;
pub const EXIT: u64 = 93;
pub const EXIT_GROUP: u64 = 94;
pub const SET_TID_ADDRESS: u64 = 96;
pub const FUTEX: u64 = 98;
pub const SET_ROBUST_LIST: u64 = 99;
pub const NANOSLEEP: u64 = 101;
pub const CLOCK_GETTIME: u64 = 113;
pub const CLOCK_GETRES: u64 = 114;
pub const SCHED_GETSCHEDULER: u64 = 120;
pub const SCHED_GETPARAM: u64 = 121;
pub const SCHED_GETAFFINITY: u64 = 123;
pub const SCHED_YIELD: u64 = 124;
pub const KILL: u64 = 129;
pub const TKILL: u64 = 130;
pub const TGKILL: u64 = 131;
pub const SIGALTSTACK: u64 = 132;
pub const RT_SIGACTION: u64 = 134;
pub const RT_SIGPROCMASK: u64 = 135;
pub const RT_SIGRETURN: u64 = 139;
pub const GETRESUID: u64 = 148;
pub const GETRESGID: u64 = 150;
pub const GETPGID: u64 = 155;
pub const GETGROUPS: u64 = 158;
pub const UNAME: u64 = 160;
pub const GETRLIMIT: u64 = 163;
pub const UMASK: u64 = 166;
pub const PRCTL: u64 = 167;
pub const GETPID: u64 = 172;
pub const GETPPID: u64 = 173;
pub const GETUID: u64 = 174;
pub const GETEUID: u64 = 175;
pub const GETGID: u64 = 176;
pub const GETEGID: u64 = 177;
pub const GETTID: u64 = 178;
pub const SYSINFO: u64 = 179;
pub const SOCKETPAIR: u64 = 199;
pub const GETSOCKOPT: u64 = 209;
pub const SENDMSG: u64 = 211;
pub const RECVMSG: u64 = 212;
pub const BRK: u64 = 214;
pub const MUNMAP: u64 = 215;
pub const MREMAP: u64 = 216;
pub const CLONE: u64 = 220;
pub const EXECVE: u64 = 221;
pub const MMAP: u64 = 222;
pub const MPROTECT: u64 = 226;
pub const MADVISE: u64 = 233;
pub const WAIT4: u64 = 260;
pub const PRLIMIT64: u64 = 261;
pub const GETRANDOM: u64 = 278;
pub const MEMBARRIER: u64 = 283;
pub const STATX: u64 = 291;
pub const RSEQ: u64 = 293;
pub const RISCV_HWPROBE: u64 = 258;
pub const IO_URING_SETUP: u64 = 425;
pub const CLOSE_RANGE: u64 = 436;
pub const FACCESSAT2: u64 = 439;
