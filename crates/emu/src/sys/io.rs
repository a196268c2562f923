//! Read/write paths, descriptor plumbing and terminal control.
//!
//! Descriptors 0-2 belong to the host terminal unless the guest has
//! redirected them through dup3; extra tty-like fds (open of /dev/tty
//! and friends) route reads to stdin and writes to stdout. Reads from
//! an empty stdin park the machine so the embedder can feed the queue.

use log::trace;
use machine::Machine;
use rand::RngCore;
use vfs::{FileKind, Node};

use super::{errno, iovec, yield_for_stdin};
use crate::proc::EmuCore;

/// Upper bound for a single transfer buffer.
const MAX_XFER: usize = 1 << 24;

// Terminal ioctls.
const TCGETS: u64 = 0x5401;
const TCSETS: u64 = 0x5402;
const TCSETSW: u64 = 0x5403;
const TCSETSF: u64 = 0x5404;
const TIOCGPGRP: u64 = 0x540f;
const TIOCSPGRP: u64 = 0x5410;
const TIOCGWINSZ: u64 = 0x5413;
const TIOCSWINSZ: u64 = 0x5414;
const FIONREAD: u64 = 0x541b;
const FIONBIO: u64 = 0x5421;

fn dev_path(core: &EmuCore, fd: i32) -> String {
    core.fs.path_of(fd).unwrap_or_default()
}

pub fn sys_read(m: &mut Machine, core: &mut EmuCore) {
    let mut fd = m.sysarg_i32(0);
    let buf_addr = m.sysarg(1);
    let count = (m.sysarg(2) as usize).min(MAX_XFER);

    // Extra tty fds behave like stdin.
    if fd > 2 && core.is_tty_fd(fd) {
        fd = 0;
    }

    if fd > 2 {
        match dev_path(core, fd).as_str() {
            "/dev/urandom" | "/dev/random" => {
                let mut buf = vec![0u8; count];
                core.rng.fill_bytes(&mut buf);
                if m.memory.memcpy(buf_addr, &buf).is_err() {
                    m.set_result(errno::EFAULT);
                    return;
                }
                m.set_result(count as i64);
                return;
            }
            "/dev/null" => {
                m.set_result(0);
                return;
            }
            _ => {}
        }
    }

    if fd == 0 {
        // Redirected stdin (dup3'd pipe) drains the VFS instead.
        if core.fs.is_open(0) {
            vfs_read_into(m, core, 0, buf_addr, count);
            return;
        }
        if core.term.stdin_has_data() {
            let mut buf = vec![0u8; count];
            let n = core.term.stdin_read(&mut buf);
            if m.memory.memcpy(buf_addr, &buf[..n]).is_err() {
                m.set_result(errno::EFAULT);
                return;
            }
            m.set_result(n as i64);
        } else if core.term.stdin_eof() {
            m.set_result(0);
        } else {
            yield_for_stdin(m, core);
        }
        return;
    }

    if core.net.is_socket_fd(fd) {
        let mut buf = vec![0u8; count];
        let n = core.net.read(fd, &mut buf);
        if n > 0 && m.memory.memcpy(buf_addr, &buf[..n as usize]).is_err() {
            m.set_result(errno::EFAULT);
            return;
        }
        m.set_result(n);
        return;
    }

    vfs_read_into(m, core, fd, buf_addr, count);
}

fn vfs_read_into(m: &mut Machine, core: &mut EmuCore, fd: i32, buf_addr: u64, count: usize) {
    let mut buf = vec![0u8; count];
    match core.fs.read(fd, &mut buf) {
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

pub fn sys_write(m: &mut Machine, core: &mut EmuCore) {
    let mut fd = m.sysarg_i32(0);
    let buf_addr = m.sysarg(1);
    let count = (m.sysarg(2) as usize).min(MAX_XFER);

    if fd > 2 && core.is_tty_fd(fd) {
        fd = 1;
    }
    if fd > 2 && dev_path(core, fd) == "/dev/null" {
        m.set_result(count as i64);
        return;
    }

    // dup3'd stdio lands in the VFS before the terminal does.
    if core.fs.is_open(fd) {
        let mut buf = vec![0u8; count];
        if m.memory.memcpy_out(&mut buf, buf_addr).is_err() {
            m.set_result(errno::EFAULT);
            return;
        }
        match core.fs.write(fd, &buf) {
            Ok(n) => m.set_result(n as i64),
            Err(e) => m.set_result(errno::from_vfs(e)),
        }
        return;
    }

    if fd == 1 || fd == 2 {
        match m.memory.memview(buf_addr, count as u64) {
            Ok(view) => {
                let bytes = view.to_vec();
                core.term.term_write(&bytes);
                m.set_result(count as i64);
            }
            Err(_) => m.set_result(errno::EINVAL),
        }
        return;
    }

    if core.net.is_socket_fd(fd) {
        let mut buf = vec![0u8; count];
        if m.memory.memcpy_out(&mut buf, buf_addr).is_err() {
            m.set_result(errno::EFAULT);
            return;
        }
        m.set_result(core.net.write(fd, &buf));
        return;
    }

    m.set_result(errno::EBADF);
}

pub fn sys_readv(m: &mut Machine, core: &mut EmuCore) {
    let fd = m.sysarg_i32(0);
    let iov_addr = m.sysarg(1);
    let iovcnt = m.sysarg(2).min(64);

    if fd == 0 && !core.fs.is_open(0) {
        if core.term.stdin_eof() {
            m.set_result(0);
            return;
        }
        if !core.term.stdin_has_data() {
            yield_for_stdin(m, core);
            return;
        }
        let mut total = 0i64;
        for i in 0..iovcnt {
            let Ok((base, len)) = iovec(m, iov_addr, i) else {
                m.set_result(errno::EFAULT);
                return;
            };
            if len == 0 {
                continue;
            }
            let mut buf = vec![0u8; (len as usize).min(MAX_XFER)];
            let n = core.term.stdin_read(&mut buf);
            if n > 0 && m.memory.memcpy(base, &buf[..n]).is_err() {
                m.set_result(errno::EFAULT);
                return;
            }
            total += n as i64;
            if n < buf.len() {
                break;
            }
        }
        m.set_result(total);
        return;
    }

    let mut total = 0i64;
    for i in 0..iovcnt {
        let Ok((base, len)) = iovec(m, iov_addr, i) else {
            m.set_result(errno::EFAULT);
            return;
        };
        if len == 0 {
            continue;
        }
        let mut buf = vec![0u8; (len as usize).min(MAX_XFER)];
        match core.fs.read(fd, &mut buf) {
            Ok(n) => {
                if n > 0 && m.memory.memcpy(base, &buf[..n]).is_err() {
                    m.set_result(errno::EFAULT);
                    return;
                }
                total += n as i64;
                if n < buf.len() {
                    break;
                }
            }
            Err(e) => {
                m.set_result(if total > 0 { total } else { errno::from_vfs(e) });
                return;
            }
        }
    }
    m.set_result(total);
}

pub fn sys_writev(m: &mut Machine, core: &mut EmuCore) {
    let fd = m.sysarg_i32(0);
    let iov_addr = m.sysarg(1);
    let iovcnt = m.sysarg(2).min(64);

    let redirected = core.fs.is_open(fd);
    let mut total = 0i64;
    for i in 0..iovcnt {
        let Ok((base, len)) = iovec(m, iov_addr, i) else {
            m.set_result(errno::EFAULT);
            return;
        };
        if len == 0 {
            continue;
        }
        let mut buf = vec![0u8; (len as usize).min(MAX_XFER)];
        if m.memory.memcpy_out(&mut buf, base).is_err() {
            m.set_result(errno::EFAULT);
            return;
        }
        if redirected {
            match core.fs.write(fd, &buf) {
                Ok(n) => total += n as i64,
                Err(e) => {
                    m.set_result(if total > 0 { total } else { errno::from_vfs(e) });
                    return;
                }
            }
        } else if fd == 1 || fd == 2 {
            core.term.term_write(&buf);
            total += buf.len() as i64;
        } else if core.net.is_socket_fd(fd) {
            let n = core.net.write(fd, &buf);
            if n < 0 {
                m.set_result(if total > 0 { total } else { n });
                return;
            }
            total += n;
        } else {
            m.set_result(errno::EBADF);
            return;
        }
    }
    m.set_result(total);
}

pub fn sys_pread64(m: &mut Machine, core: &mut EmuCore) {
    let fd = m.sysarg_i32(0);
    let buf_addr = m.sysarg(1);
    let count = (m.sysarg(2) as usize).min(MAX_XFER);
    let offset = m.sysarg(3);

    let mut buf = vec![0u8; count];
    match core.fs.pread(fd, &mut buf, offset) {
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

pub fn sys_pwrite64(m: &mut Machine, core: &mut EmuCore) {
    let fd = m.sysarg_i32(0);
    let buf_addr = m.sysarg(1);
    let count = (m.sysarg(2) as usize).min(MAX_XFER);
    let offset = m.sysarg(3);

    let mut buf = vec![0u8; count];
    if m.memory.memcpy_out(&mut buf, buf_addr).is_err() {
        m.set_result(errno::EFAULT);
        return;
    }
    match core.fs.pwrite(fd, &buf, offset) {
        Ok(n) => m.set_result(n as i64),
        Err(e) => m.set_result(errno::from_vfs(e)),
    }
}

pub fn sys_pwritev(m: &mut Machine, core: &mut EmuCore) {
    let fd = m.sysarg_i32(0);
    let iov_addr = m.sysarg(1);
    let iovcnt = m.sysarg(2).min(16);
    let offset = m.sysarg(3);

    let mut combined = Vec::new();
    for i in 0..iovcnt {
        let Ok((base, len)) = iovec(m, iov_addr, i) else {
            m.set_result(errno::EFAULT);
            return;
        };
        if len == 0 {
            continue;
        }
        let prev = combined.len();
        combined.resize(prev + (len as usize).min(MAX_XFER), 0);
        if m.memory.memcpy_out(&mut combined[prev..], base).is_err() {
            m.set_result(errno::EFAULT);
            return;
        }
    }
    if combined.is_empty() {
        m.set_result(0);
        return;
    }
    match core.fs.pwrite(fd, &combined, offset) {
        Ok(n) => m.set_result(n as i64),
        Err(e) => m.set_result(errno::from_vfs(e)),
    }
}

pub fn sys_sendfile(m: &mut Machine, core: &mut EmuCore) {
    let out_fd = m.sysarg_i32(0);
    let in_fd = m.sysarg_i32(1);
    let offset_ptr = m.sysarg(2);
    let count = (m.sysarg(3) as usize).min(65536);

    let mut buf = vec![0u8; count];
    let n = if offset_ptr != 0 {
        let Ok(off) = m.memory.read_u64(offset_ptr) else {
            m.set_result(errno::EFAULT);
            return;
        };
        match core.fs.pread(in_fd, &mut buf, off) {
            Ok(n) => {
                if m.memory.write_u64(offset_ptr, off + n as u64).is_err() {
                    m.set_result(errno::EFAULT);
                    return;
                }
                n
            }
            Err(e) => {
                m.set_result(errno::from_vfs(e));
                return;
            }
        }
    } else {
        match core.fs.read(in_fd, &mut buf) {
            Ok(n) => n,
            Err(e) => {
                m.set_result(errno::from_vfs(e));
                return;
            }
        }
    };

    if n == 0 {
        m.set_result(0);
        return;
    }
    if (out_fd == 1 || out_fd == 2) && !core.fs.is_open(out_fd) {
        core.term.term_write(&buf[..n]);
        m.set_result(n as i64);
    } else {
        match core.fs.write(out_fd, &buf[..n]) {
            Ok(written) => m.set_result(written as i64),
            Err(e) => m.set_result(errno::from_vfs(e)),
        }
    }
}

pub fn sys_ioctl(m: &mut Machine, core: &mut EmuCore) {
    let fd = m.sysarg_i32(0);
    let request = m.sysarg(1);
    let is_tty = core.is_tty_fd(fd);

    match request {
        TIOCGWINSZ if is_tty => {
            let (rows, cols) = core.term.winsize();
            let mut ws = [0u8; 8];
            ws[0..2].copy_from_slice(&rows.to_le_bytes());
            ws[2..4].copy_from_slice(&cols.to_le_bytes());
            if m.memory.memcpy(m.sysarg(2), &ws).is_err() {
                m.set_result(errno::EFAULT);
                return;
            }
            m.set_result(0);
        }
        TIOCSWINSZ if is_tty => m.set_result(0),
        TCGETS if is_tty => {
            let buf = core.termios.serialize();
            if m.memory.memcpy(m.sysarg(2), &buf).is_err() {
                m.set_result(errno::EFAULT);
                return;
            }
            m.set_result(0);
        }
        TCSETS | TCSETSW | TCSETSF if is_tty => {
            let mut buf = [0u8; 44];
            if m.memory.memcpy_out(&mut buf, m.sysarg(2)).is_err() {
                m.set_result(errno::EFAULT);
                return;
            }
            core.termios.deserialize(&buf);
            trace!("termios updated, raw={}", core.termios.is_raw());
            m.set_result(0);
        }
        TIOCGPGRP if is_tty => {
            // PID 1 owns the terminal.
            if m.memory.write_u32(m.sysarg(2), 1).is_err() {
                m.set_result(errno::EFAULT);
                return;
            }
            m.set_result(0);
        }
        TIOCSPGRP if is_tty => m.set_result(0),
        FIONBIO => m.set_result(0),
        FIONREAD if fd == 0 => {
            let avail = core.term.stdin_len() as u32;
            if m.memory.write_u32(m.sysarg(2), avail).is_err() {
                m.set_result(errno::EFAULT);
                return;
            }
            m.set_result(0);
        }
        _ => {
            trace!("ioctl fd={} request={:#x} unsupported", fd, request);
            m.set_result(errno::EOPNOTSUPP);
        }
    }
}

pub fn sys_fcntl(m: &mut Machine, core: &mut EmuCore) {
    let fd = m.sysarg_i32(0);
    let cmd = m.sysarg_i32(1);

    const F_DUPFD: i32 = 0;
    const F_GETFD: i32 = 1;
    const F_SETFD: i32 = 2;
    const F_GETFL: i32 = 3;
    const F_SETFL: i32 = 4;
    const F_DUPFD_CLOEXEC: i32 = 1030;

    // Closed fds must report -EBADF: libuv's cloexec sweep terminates
    // on it.
    let valid = (0..=2).contains(&fd) || core.fs.is_open(fd);
    if !valid {
        m.set_result(errno::EBADF);
        return;
    }

    match cmd {
        F_DUPFD | F_DUPFD_CLOEXEC => match core.fs.dup(fd) {
            Ok(newfd) => {
                if core.is_tty_fd(fd) {
                    core.tty_fds.insert(newfd);
                }
                m.set_result(newfd as i64);
            }
            Err(e) => m.set_result(errno::from_vfs(e)),
        },
        F_GETFD | F_SETFD | F_SETFL => m.set_result(0),
        F_GETFL => m.set_result(if fd == 1 || fd == 2 { 1 } else { 0 }),
        _ => m.set_result(0),
    }
}

pub fn sys_dup(m: &mut Machine, core: &mut EmuCore) {
    let oldfd = m.sysarg_i32(0);
    match core.fs.dup(oldfd) {
        Ok(newfd) => {
            if core.is_tty_fd(oldfd) {
                core.tty_fds.insert(newfd);
            }
            m.set_result(newfd as i64);
        }
        Err(e) => m.set_result(errno::from_vfs(e)),
    }
}

pub fn sys_dup3(m: &mut Machine, core: &mut EmuCore) {
    let oldfd = m.sysarg_i32(0);
    let newfd = m.sysarg_i32(1);
    if oldfd == newfd {
        m.set_result(errno::EINVAL);
        return;
    }
    match core.fs.dup2(oldfd, newfd) {
        Ok(fd) => {
            // tty-ness travels with the description; a non-tty dup over
            // a tty fd clears it (0-2 stay terminal-backed fallbacks).
            if core.is_tty_fd(oldfd) {
                core.tty_fds.insert(fd);
            } else if fd > 2 {
                core.tty_fds.remove(&fd);
            }
            m.set_result(fd as i64);
        }
        Err(e) => m.set_result(errno::from_vfs(e)),
    }
}

pub fn sys_pipe2(m: &mut Machine, core: &mut EmuCore) {
    let pipefd_addr = m.sysarg(0);
    let node = Node::fifo();
    let read_fd = core.fs.open_pipe(node.clone(), false);
    let write_fd = core.fs.open_pipe(node, true);

    let mut buf = [0u8; 8];
    buf[0..4].copy_from_slice(&read_fd.to_le_bytes());
    buf[4..8].copy_from_slice(&write_fd.to_le_bytes());
    if m.memory.memcpy(pipefd_addr, &buf).is_err() {
        m.set_result(errno::EFAULT);
        return;
    }
    trace!("pipe2 -> read={} write={}", read_fd, write_fd);
    m.set_result(0);
}

/// Notification counter backed by a drainable buffer; write signals,
/// read consumes. Enough for libuv's async wakeup.
pub fn sys_eventfd2(m: &mut Machine, core: &mut EmuCore) {
    let node = Node::new(FileKind::Regular, 0o600);
    node.borrow_mut().content = vec![0u8; 8];
    node.borrow_mut().size = 8;
    let fd = core.fs.open_pipe(node, false);
    m.set_result(fd as i64);
}

/// Bulk cloexec marking: our fds carry no cloexec state, accept as a
/// no-op so musl's startup sweep stays O(1).
pub fn sys_close_range(m: &mut Machine, _core: &mut EmuCore) {
    m.set_result(0);
}

/// Approximated as one FIFO with both ends open. Each side can read
/// what the other wrote; half-close and SCM_RIGHTS are unsupported.
pub fn sys_socketpair(m: &mut Machine, core: &mut EmuCore) {
    let sv_addr = m.sysarg(3);
    let node = Node::fifo();
    let sv0 = core.fs.open_pipe(node.clone(), true);
    let sv1 = core.fs.open_pipe(node, false);

    let mut buf = [0u8; 8];
    buf[0..4].copy_from_slice(&sv0.to_le_bytes());
    buf[4..8].copy_from_slice(&sv1.to_le_bytes());
    if m.memory.memcpy(sv_addr, &buf).is_err() {
        m.set_result(errno::EFAULT);
        return;
    }
    m.set_result(0);
}

/// struct msghdr: iov pointer at +16, iovlen at +24. No ancillary data.
fn msghdr_iov(m: &Machine, msghdr: u64) -> Result<(u64, u64), machine::MachineException> {
    let iov = m.memory.read_u64(msghdr + 16)?;
    let iovlen = m.memory.read_u64(msghdr + 24)?;
    Ok((iov, iovlen.min(16)))
}

pub fn sys_sendmsg(m: &mut Machine, core: &mut EmuCore) {
    let fd = m.sysarg_i32(0);
    let Ok((iov_addr, iovlen)) = msghdr_iov(m, m.sysarg(1)) else {
        m.set_result(errno::EFAULT);
        return;
    };
    let mut total = 0i64;
    for i in 0..iovlen {
        let Ok((base, len)) = iovec(m, iov_addr, i) else {
            m.set_result(errno::EFAULT);
            return;
        };
        if len == 0 {
            continue;
        }
        let mut buf = vec![0u8; (len as usize).min(MAX_XFER)];
        if m.memory.memcpy_out(&mut buf, base).is_err() {
            m.set_result(errno::EFAULT);
            return;
        }
        match core.fs.write(fd, &buf) {
            Ok(n) => {
                total += n as i64;
                if n < buf.len() {
                    break;
                }
            }
            Err(e) => {
                m.set_result(if total > 0 { total } else { errno::from_vfs(e) });
                return;
            }
        }
    }
    m.set_result(total);
}

pub fn sys_recvmsg(m: &mut Machine, core: &mut EmuCore) {
    let fd = m.sysarg_i32(0);
    let msghdr = m.sysarg(1);
    let Ok((iov_addr, iovlen)) = msghdr_iov(m, msghdr) else {
        m.set_result(errno::EFAULT);
        return;
    };
    let mut total = 0i64;
    for i in 0..iovlen {
        let Ok((base, len)) = iovec(m, iov_addr, i) else {
            m.set_result(errno::EFAULT);
            return;
        };
        if len == 0 {
            continue;
        }
        let mut buf = vec![0u8; (len as usize).min(MAX_XFER)];
        match core.fs.read(fd, &mut buf) {
            Ok(n) => {
                if n > 0 && m.memory.memcpy(base, &buf[..n]).is_err() {
                    m.set_result(errno::EFAULT);
                    return;
                }
                total += n as i64;
                if n < buf.len() {
                    break;
                }
            }
            Err(e) => {
                m.set_result(if total > 0 { total } else { errno::from_vfs(e) });
                return;
            }
        }
    }
    // msg_controllen = 0, msg_flags = 0.
    let _ = m.memory.write_u64(msghdr + 40, 0);
    let _ = m.memory.write_u32(msghdr + 48, 0);
    m.set_result(total);
}

pub fn sys_getsockopt(m: &mut Machine, _core: &mut EmuCore) {
    m.set_result(errno::ENOTSOCK);
}
