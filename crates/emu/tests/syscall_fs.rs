//! Filesystem syscall behavior at the dispatch layer.

mod common;

use common::{ecall, env, get_bytes, put_cstr};
use emu::sys::nr;

const AT_FDCWD: u64 = (-100i64) as u64;
const O_CREAT_RDWR: u64 = 0o102;
const SEEK_CUR: u64 = 1;

#[test]
fn open_write_seek_read_round_trip() {
    let mut t = env();
    t.core.fs.add_directory("/tmp");
    let path = put_cstr(&mut t, 0x1000, "/tmp/out");

    let fd = ecall(&mut t, nr::OPENAT, &[AT_FDCWD, path, O_CREAT_RDWR]);
    assert!(fd >= 3);

    put_cstr(&mut t, 0x2000, "hello world");
    let n = ecall(&mut t, nr::WRITE, &[fd as u64, 0x2000, 11]);
    assert_eq!(n, 11);

    let pos = ecall(&mut t, nr::LSEEK, &[fd as u64, (-11i64) as u64, SEEK_CUR]);
    assert_eq!(pos, 0);

    let n = ecall(&mut t, nr::READ, &[fd as u64, 0x3000, 11]);
    assert_eq!(n, 11);
    assert_eq!(get_bytes(&t, 0x3000, 11), b"hello world");
}

#[test]
fn open_missing_without_creat_is_enoent() {
    let mut t = env();
    let path = put_cstr(&mut t, 0x1000, "/no/such/file");
    assert_eq!(ecall(&mut t, nr::OPENAT, &[AT_FDCWD, path, 0]), -2);
}

#[test]
fn write_open_on_directory_is_eisdir() {
    let mut t = env();
    t.core.fs.add_directory("/data");
    let path = put_cstr(&mut t, 0x1000, "/data");
    assert_eq!(ecall(&mut t, nr::OPENAT, &[AT_FDCWD, path, 0o2]), -21);
    // Read-only open of a directory succeeds (getdents needs it).
    assert!(ecall(&mut t, nr::OPENAT, &[AT_FDCWD, path, 0]) >= 3);
}

#[test]
fn stat_mode_reflects_node_kind() {
    let mut t = env();
    t.core.fs.add_virtual_file("/etc/hosts", "x");
    t.core.fs.add_directory("/etc/sub");

    let path = put_cstr(&mut t, 0x1000, "/etc/hosts");
    assert_eq!(ecall(&mut t, nr::NEWFSTATAT, &[AT_FDCWD, path, 0x4000, 0]), 0);
    let st = get_bytes(&t, 0x4000, 128);
    let mode = u32::from_le_bytes(st[16..20].try_into().unwrap());
    assert_eq!(mode & 0o170000, 0o100000); // S_IFREG
    let size = i64::from_le_bytes(st[48..56].try_into().unwrap());
    assert_eq!(size, 1);

    let path = put_cstr(&mut t, 0x1100, "/etc/sub");
    assert_eq!(ecall(&mut t, nr::NEWFSTATAT, &[AT_FDCWD, path, 0x4000, 0]), 0);
    let st = get_bytes(&t, 0x4000, 128);
    let mode = u32::from_le_bytes(st[16..20].try_into().unwrap());
    assert_eq!(mode & 0o170000, 0o040000); // S_IFDIR
    let nlink = u32::from_le_bytes(st[20..24].try_into().unwrap());
    assert_eq!(nlink, 2);
}

#[test]
fn fstat_after_close_is_ebadf() {
    let mut t = env();
    t.core.fs.add_virtual_file("/f", "data");
    let path = put_cstr(&mut t, 0x1000, "/f");
    let fd = ecall(&mut t, nr::OPENAT, &[AT_FDCWD, path, 0]);
    assert_eq!(ecall(&mut t, nr::FSTAT, &[fd as u64, 0x4000]), 0);
    assert_eq!(ecall(&mut t, nr::CLOSE, &[fd as u64]), 0);
    assert_eq!(ecall(&mut t, nr::FSTAT, &[fd as u64, 0x4000]), -9);
}

#[test]
fn fstat_stdio_reports_character_device() {
    let mut t = env();
    assert_eq!(ecall(&mut t, nr::FSTAT, &[1, 0x4000]), 0);
    let st = get_bytes(&t, 0x4000, 128);
    let mode = u32::from_le_bytes(st[16..20].try_into().unwrap());
    assert_eq!(mode, 0o20666);
}

#[test]
fn dup3_reads_drain_the_same_node() {
    let mut t = env();
    t.core.fs.add_virtual_file("/f", "abcdef");
    let path = put_cstr(&mut t, 0x1000, "/f");
    let fd = ecall(&mut t, nr::OPENAT, &[AT_FDCWD, path, 0]) as u64;

    assert_eq!(ecall(&mut t, nr::DUP3, &[fd, 50, 0]), 50);
    assert_eq!(ecall(&mut t, nr::READ, &[fd, 0x2000, 3]), 3);
    assert_eq!(ecall(&mut t, nr::READ, &[50, 0x3000, 3]), 3);
    assert_eq!(get_bytes(&t, 0x2000, 3), b"abc");
    assert_eq!(get_bytes(&t, 0x3000, 3), b"def");
}

#[test]
fn getdents64_yields_sorted_names() {
    let mut t = env();
    for name in ["usr", "bin", "etc", "dev"] {
        t.core.fs.add_directory(&format!("/{}", name));
    }
    let path = put_cstr(&mut t, 0x1000, "/");
    let fd = ecall(&mut t, nr::OPENAT, &[AT_FDCWD, path, 0o200000]) as u64;
    let n = ecall(&mut t, nr::GETDENTS64, &[fd, 0x6000, 4096]);
    assert!(n > 0);

    let buf = get_bytes(&t, 0x6000, n as usize);
    let mut names = Vec::new();
    let mut off = 0usize;
    while off < n as usize {
        let reclen = u16::from_le_bytes(buf[off + 16..off + 18].try_into().unwrap()) as usize;
        let name_end = buf[off + 19..off + reclen]
            .iter()
            .position(|&b| b == 0)
            .unwrap();
        names.push(String::from_utf8_lossy(&buf[off + 19..off + 19 + name_end]).into_owned());
        off += reclen;
    }
    assert_eq!(names, ["bin", "dev", "etc", "usr"]);

    // The stream is exhausted; another call returns zero.
    assert_eq!(ecall(&mut t, nr::GETDENTS64, &[fd, 0x6000, 4096]), 0);
}

#[test]
fn readlinkat_returns_target_without_nul() {
    let mut t = env();
    t.core.fs.add_virtual_file("/bin/busybox", "x");
    t.core.fs.symlink("busybox", "/bin/ls").unwrap();
    let path = put_cstr(&mut t, 0x1000, "/bin/ls");
    let n = ecall(&mut t, nr::READLINKAT, &[AT_FDCWD, path, 0x2000, 256]);
    assert_eq!(n, 7);
    assert_eq!(get_bytes(&t, 0x2000, 7), b"busybox");

    // Non-symlink target is EINVAL.
    let path = put_cstr(&mut t, 0x1100, "/bin/busybox");
    assert_eq!(ecall(&mut t, nr::READLINKAT, &[AT_FDCWD, path, 0x2000, 256]), -22);
}

#[test]
fn chdir_and_getcwd() {
    let mut t = env();
    t.core.fs.add_directory("/home/user");
    let path = put_cstr(&mut t, 0x1000, "/home/user");
    assert_eq!(ecall(&mut t, nr::CHDIR, &[path]), 0);

    let ret = ecall(&mut t, nr::GETCWD, &[0x2000, 64]);
    assert_eq!(ret, 0x2000);
    assert_eq!(get_bytes(&t, 0x2000, 10), b"/home/user");

    // Too-small buffer reports -ERANGE.
    assert_eq!(ecall(&mut t, nr::GETCWD, &[0x2000, 4]), -34);
}

#[test]
fn unlink_keeps_open_fd_alive() {
    let mut t = env();
    t.core.fs.add_virtual_file("/f", "keep");
    let path = put_cstr(&mut t, 0x1000, "/f");
    let fd = ecall(&mut t, nr::OPENAT, &[AT_FDCWD, path, 0]) as u64;
    assert_eq!(ecall(&mut t, nr::UNLINKAT, &[AT_FDCWD, path, 0]), 0);
    assert_eq!(ecall(&mut t, nr::FACCESSAT, &[AT_FDCWD, path, 0]), -2);
    assert_eq!(ecall(&mut t, nr::READ, &[fd, 0x2000, 4]), 4);
    assert_eq!(get_bytes(&t, 0x2000, 4), b"keep");
}

#[test]
fn mkdir_rename_and_remove() {
    let mut t = env();
    let old = put_cstr(&mut t, 0x1000, "/work");
    let new = put_cstr(&mut t, 0x1100, "/done");
    assert_eq!(ecall(&mut t, nr::MKDIRAT, &[AT_FDCWD, old, 0o755]), 0);
    assert_eq!(ecall(&mut t, nr::MKDIRAT, &[AT_FDCWD, old, 0o755]), -17);
    assert_eq!(ecall(&mut t, nr::RENAMEAT, &[AT_FDCWD, old, AT_FDCWD, new]), 0);
    assert!(t.core.fs.resolve("/done").is_some());
    // AT_REMOVEDIR on the renamed directory.
    assert_eq!(ecall(&mut t, nr::UNLINKAT, &[AT_FDCWD, new, 0x200]), 0);
    assert!(t.core.fs.resolve("/done").is_none());
}

#[test]
fn at_dirfd_other_than_cwd_is_refused() {
    let mut t = env();
    let path = put_cstr(&mut t, 0x1000, "/x");
    assert_eq!(ecall(&mut t, nr::OPENAT, &[5, path, 0]), -95);
    assert_eq!(ecall(&mut t, nr::NEWFSTATAT, &[5, path, 0x4000, 0]), -95);
}

#[test]
fn statx_fills_basic_stats() {
    let mut t = env();
    t.core.fs.add_virtual_file("/f", "1234");
    let path = put_cstr(&mut t, 0x1000, "/f");
    assert_eq!(ecall(&mut t, nr::STATX, &[AT_FDCWD, path, 0, 0x7ff, 0x5000]), 0);
    let buf = get_bytes(&t, 0x5000, 256);
    let mask = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    assert_eq!(mask, 0x7ff);
    let size = u64::from_le_bytes(buf[40..48].try_into().unwrap());
    assert_eq!(size, 4);
    let mode = u16::from_le_bytes(buf[28..30].try_into().unwrap());
    assert_eq!(mode as u32 & 0o170000, 0o100000);
}
