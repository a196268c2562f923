//! Filesystem syscalls backed by the in-memory rootfs.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

use machine::Machine;
use vfs::{FileKind, NodeRef, O_RDWR, O_WRONLY};

use super::{errno, memstr, require_cwd, AT_EMPTY_PATH, AT_SYMLINK_NOFOLLOW};
use crate::proc::EmuCore;

fn path_inode(path: &str) -> u64 {
    let mut h = DefaultHasher::new();
    path.hash(&mut h);
    h.finish()
}

/// Fill a Linux riscv64 `struct stat` (128 bytes).
fn encode_stat(node: &NodeRef, path: &str) -> [u8; 128] {
    let node = node.borrow();
    let mut buf = [0u8; 128];
    let mode = node.kind.mode_bits() | node.mode;
    let nlink: u32 = if node.is_dir() { 2 } else { 1 };
    let blocks = (node.size + 511) / 512;

    buf[0..8].copy_from_slice(&1u64.to_le_bytes()); // st_dev
    buf[8..16].copy_from_slice(&path_inode(path).to_le_bytes());
    buf[16..20].copy_from_slice(&mode.to_le_bytes());
    buf[20..24].copy_from_slice(&nlink.to_le_bytes());
    buf[24..28].copy_from_slice(&node.uid.to_le_bytes());
    buf[28..32].copy_from_slice(&node.gid.to_le_bytes());
    buf[48..56].copy_from_slice(&(node.size as i64).to_le_bytes());
    buf[56..60].copy_from_slice(&4096i32.to_le_bytes());
    buf[64..72].copy_from_slice(&(blocks as i64).to_le_bytes());
    for off in [72, 88, 104] {
        buf[off..off + 8].copy_from_slice(&(node.mtime as i64).to_le_bytes());
    }
    buf
}

/// Character-device stat used for the unredirected stdio descriptors.
fn encode_tty_stat() -> [u8; 128] {
    let mut buf = [0u8; 128];
    buf[0..8].copy_from_slice(&1u64.to_le_bytes());
    buf[16..20].copy_from_slice(&0o20666u32.to_le_bytes());
    buf[20..24].copy_from_slice(&1u32.to_le_bytes());
    buf[56..60].copy_from_slice(&4096i32.to_le_bytes());
    buf
}

pub fn sys_openat(m: &mut Machine, core: &mut EmuCore) {
    let dirfd = m.sysarg_i32(0);
    if !require_cwd(m, dirfd) {
        return;
    }
    let Some(path) = memstr(m, 1) else { return };
    let flags = m.sysarg_i32(2);

    // Device nodes that may be absent in standalone mode spring into
    // existence on first open; their reads are routed by the I/O layer.
    if matches!(path.as_str(), "/dev/urandom" | "/dev/random" | "/dev/null")
        && core.fs.resolve(&path).is_none()
    {
        core.fs.add_virtual_file(&path, Vec::new());
    }

    if let Some(node) = core.fs.resolve(&path) {
        if node.borrow().is_dir() && flags & (O_WRONLY | O_RDWR) != 0 {
            m.set_result(errno::EISDIR);
            return;
        }
    }

    match core.fs.open(&path, flags) {
        Ok(fd) => {
            if path == "/dev/tty" || path == "/dev/console" || path.starts_with("/dev/pts/") {
                core.tty_fds.insert(fd);
            }
            m.set_result(fd as i64);
        }
        Err(e) => m.set_result(errno::from_vfs(e)),
    }
}

pub fn sys_close(m: &mut Machine, core: &mut EmuCore) {
    let fd = m.sysarg_i32(0);
    if fd > 2 {
        core.tty_fds.remove(&fd);
    }
    core.epoll.remove(&fd);
    core.fs.close(fd);
    m.set_result(0);
}

pub fn sys_getdents64(m: &mut Machine, core: &mut EmuCore) {
    let fd = m.sysarg_i32(0);
    let buf_addr = m.sysarg(1);
    let count = m.sysarg(2) as usize;

    let mut buf = vec![0u8; count.min(1 << 20)];
    match core.fs.getdents64(fd, &mut buf) {
        Ok(n) => {
            if m.memory.memcpy(buf_addr, &buf[..n]).is_err() {
                m.set_result(errno::EFAULT);
                return;
            }
            m.set_result(n as i64);
        }
        Err(e) => m.set_result(errno::from_vfs(e)),
    }
}

pub fn sys_newfstatat(m: &mut Machine, core: &mut EmuCore) {
    let dirfd = m.sysarg_i32(0);
    let flags = m.sysarg_i32(3);
    if flags & AT_EMPTY_PATH != 0 {
        m.set_result(errno::EOPNOTSUPP);
        return;
    }
    if !require_cwd(m, dirfd) {
        return;
    }
    let Some(path) = memstr(m, 1) else { return };
    let statbuf = m.sysarg(2);

    let node = if flags & AT_SYMLINK_NOFOLLOW != 0 {
        core.fs.resolve_nofollow(&path)
    } else {
        core.fs.resolve(&path)
    };
    match node {
        Some(node) => {
            let stat = encode_stat(&node, &path);
            if m.memory.memcpy(statbuf, &stat).is_err() {
                m.set_result(errno::EFAULT);
                return;
            }
            m.set_result(0);
        }
        None => m.set_result(errno::ENOENT),
    }
}

pub fn sys_fstat(m: &mut Machine, core: &mut EmuCore) {
    let fd = m.sysarg_i32(0);
    let statbuf = m.sysarg(1);

    let stat = if (0..=2).contains(&fd) && !core.fs.is_open(fd) {
        encode_tty_stat()
    } else {
        match core.fs.node_of(fd) {
            Some(node) => {
                let path = core.fs.path_of(fd).unwrap_or_default();
                encode_stat(&node, &path)
            }
            None => {
                m.set_result(errno::EBADF);
                return;
            }
        }
    };
    if m.memory.memcpy(statbuf, &stat).is_err() {
        m.set_result(errno::EFAULT);
        return;
    }
    m.set_result(0);
}

pub fn sys_statx(m: &mut Machine, core: &mut EmuCore) {
    let dirfd = m.sysarg_i32(0);
    if !require_cwd(m, dirfd) {
        return;
    }
    let Some(path) = memstr(m, 1) else { return };
    let buf_addr = m.sysarg(4);

    if path.is_empty() {
        m.set_result(errno::ENOENT);
        return;
    }
    let Some(node) = core.fs.resolve(&path) else {
        m.set_result(errno::ENOENT);
        return;
    };

    let node_ref = node.borrow();
    let mut buf = [0u8; 256];
    buf[0..4].copy_from_slice(&0x07ffu32.to_le_bytes()); // STATX_BASIC_STATS
    buf[4..8].copy_from_slice(&4096u32.to_le_bytes()); // stx_blksize
    let nlink: u32 = if node_ref.is_dir() { 2 } else { 1 };
    buf[16..20].copy_from_slice(&nlink.to_le_bytes());
    let mode = (node_ref.kind.mode_bits() | node_ref.mode) as u16;
    buf[28..30].copy_from_slice(&mode.to_le_bytes());
    buf[32..40].copy_from_slice(&path_inode(&path).to_le_bytes());
    let size = if node_ref.is_dir() { 4096 } else { node_ref.size };
    buf[40..48].copy_from_slice(&size.to_le_bytes());
    buf[48..56].copy_from_slice(&((size + 511) / 512).to_le_bytes());

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    for i in 0..4 {
        let off = 64 + i * 16;
        buf[off..off + 8].copy_from_slice(&(now.as_secs() as i64).to_le_bytes());
        buf[off + 8..off + 12].copy_from_slice(&now.subsec_nanos().to_le_bytes());
    }
    drop(node_ref);

    if m.memory.memcpy(buf_addr, &buf).is_err() {
        m.set_result(errno::EFAULT);
        return;
    }
    m.set_result(0);
}

pub fn sys_readlinkat(m: &mut Machine, core: &mut EmuCore) {
    let dirfd = m.sysarg_i32(0);
    if !require_cwd(m, dirfd) {
        return;
    }
    let Some(path) = memstr(m, 1) else { return };
    let buf_addr = m.sysarg(2);
    let bufsiz = m.sysarg(3) as usize;

    match core.fs.readlink(&path) {
        Ok(target) => {
            let bytes = target.as_bytes();
            let n = bytes.len().min(bufsiz);
            if m.memory.memcpy(buf_addr, &bytes[..n]).is_err() {
                m.set_result(errno::EFAULT);
                return;
            }
            m.set_result(n as i64);
        }
        Err(e) => m.set_result(errno::from_vfs(e)),
    }
}

pub fn sys_getcwd(m: &mut Machine, core: &mut EmuCore) {
    let buf_addr = m.sysarg(0);
    let size = m.sysarg(1) as usize;
    let cwd = core.fs.getcwd().to_string();
    if cwd.len() + 1 > size {
        m.set_result(errno::ERANGE);
        return;
    }
    let mut bytes = cwd.into_bytes();
    bytes.push(0);
    if m.memory.memcpy(buf_addr, &bytes).is_err() {
        m.set_result(errno::EFAULT);
        return;
    }
    m.set_result(buf_addr as i64);
}

pub fn sys_chdir(m: &mut Machine, core: &mut EmuCore) {
    let Some(path) = memstr(m, 0) else { return };
    match core.fs.chdir(&path) {
        Ok(()) => m.set_result(0),
        Err(e) => m.set_result(errno::from_vfs(e)),
    }
}

/// faccessat and faccessat2 (extra flags argument ignored): existence
/// is the only check, every file is accessible to root.
pub fn sys_faccessat(m: &mut Machine, core: &mut EmuCore) {
    let dirfd = m.sysarg_i32(0);
    if !require_cwd(m, dirfd) {
        return;
    }
    let Some(path) = memstr(m, 1) else { return };
    m.set_result(if core.fs.resolve(&path).is_some() {
        0
    } else {
        errno::ENOENT
    });
}

pub fn sys_mkdirat(m: &mut Machine, core: &mut EmuCore) {
    let dirfd = m.sysarg_i32(0);
    if !require_cwd(m, dirfd) {
        return;
    }
    let Some(path) = memstr(m, 1) else { return };
    let mode = m.sysarg(2) as u32;
    match core.fs.mkdir(&path, mode & !core.umask) {
        Ok(()) => m.set_result(0),
        Err(e) => m.set_result(errno::from_vfs(e)),
    }
}

pub fn sys_unlinkat(m: &mut Machine, core: &mut EmuCore) {
    let dirfd = m.sysarg_i32(0);
    if !require_cwd(m, dirfd) {
        return;
    }
    let Some(path) = memstr(m, 1) else { return };
    let flags = m.sysarg_i32(2);
    match core.fs.unlink(&path, flags) {
        Ok(()) => m.set_result(0),
        Err(e) => m.set_result(errno::from_vfs(e)),
    }
}

pub fn sys_symlinkat(m: &mut Machine, core: &mut EmuCore) {
    let Some(target) = memstr(m, 0) else { return };
    let newdirfd = m.sysarg_i32(1);
    if !require_cwd(m, newdirfd) {
        return;
    }
    let Some(linkpath) = memstr(m, 2) else { return };
    match core.fs.symlink(&target, &linkpath) {
        Ok(()) => m.set_result(0),
        Err(e) => m.set_result(errno::from_vfs(e)),
    }
}

pub fn sys_linkat(m: &mut Machine, core: &mut EmuCore) {
    let olddirfd = m.sysarg_i32(0);
    let newdirfd = m.sysarg_i32(2);
    if olddirfd != super::AT_FDCWD || newdirfd != super::AT_FDCWD {
        m.set_result(errno::EOPNOTSUPP);
        return;
    }
    let Some(oldpath) = memstr(m, 1) else { return };
    let Some(newpath) = memstr(m, 3) else { return };
    match core.fs.link(&oldpath, &newpath) {
        Ok(()) => m.set_result(0),
        Err(e) => m.set_result(errno::from_vfs(e)),
    }
}

pub fn sys_renameat(m: &mut Machine, core: &mut EmuCore) {
    let olddirfd = m.sysarg_i32(0);
    let newdirfd = m.sysarg_i32(2);
    if olddirfd != super::AT_FDCWD || newdirfd != super::AT_FDCWD {
        m.set_result(errno::EOPNOTSUPP);
        return;
    }
    let Some(oldpath) = memstr(m, 1) else { return };
    let Some(newpath) = memstr(m, 3) else { return };
    match core.fs.rename(&oldpath, &newpath) {
        Ok(()) => m.set_result(0),
        Err(e) => m.set_result(errno::from_vfs(e)),
    }
}

pub fn sys_ftruncate(m: &mut Machine, core: &mut EmuCore) {
    let fd = m.sysarg_i32(0);
    let length = m.sysarg(1);
    match core.fs.ftruncate(fd, length) {
        Ok(()) => m.set_result(0),
        Err(e) => m.set_result(errno::from_vfs(e)),
    }
}

pub fn sys_fchmod(m: &mut Machine, core: &mut EmuCore) {
    let fd = m.sysarg_i32(0);
    let mode = m.sysarg(1) as u32;
    match core.fs.node_of(fd) {
        Some(node) => {
            node.borrow_mut().mode = mode & 0o7777;
            m.set_result(0);
        }
        None => m.set_result(errno::EBADF),
    }
}

pub fn sys_fchmodat(m: &mut Machine, core: &mut EmuCore) {
    let dirfd = m.sysarg_i32(0);
    if !require_cwd(m, dirfd) {
        return;
    }
    let Some(path) = memstr(m, 1) else { return };
    let mode = m.sysarg(2) as u32;
    match core.fs.resolve(&path) {
        Some(node) => {
            node.borrow_mut().mode = mode & 0o7777;
            m.set_result(0);
        }
        None => m.set_result(errno::ENOENT),
    }
}

/// We are always root; ownership changes succeed silently.
pub fn sys_fchownat(m: &mut Machine, _core: &mut EmuCore) {
    m.set_result(0);
}

pub fn sys_lseek(m: &mut Machine, core: &mut EmuCore) {
    let fd = m.sysarg_i32(0);
    let offset = m.sysarg_i64(1);
    let whence = m.sysarg_i32(2);
    match core.fs.lseek(fd, offset, whence) {
        Ok(pos) => m.set_result(pos as i64),
        Err(e) => m.set_result(errno::from_vfs(e)),
    }
}

/// Single-process VFS: file locks always succeed.
pub fn sys_flock(m: &mut Machine, _core: &mut EmuCore) {
    m.set_result(0);
}

/// In-memory filesystem: nothing to flush.
pub fn sys_fsync(m: &mut Machine, _core: &mut EmuCore) {
    m.set_result(0);
}

/// Shared with the I/O layer: kind of the node behind `fd`, if any.
pub(crate) fn fd_kind(core: &EmuCore, fd: i32) -> Option<FileKind> {
    core.fs.node_of(fd).map(|n| n.borrow().kind)
}
