//! ppoll and epoll.
//!
//! Readiness is synthesized: the stdin queue and FIFO contents are the
//! only sources of blocking, regular files and the terminal are always
//! ready, sockets defer to the network shim. When nothing is ready and
//! the guest would block, the machine parks via the stdin-wait
//! mechanism so host timers and input can make progress.

use machine::Machine;
use vfs::FileKind;

use super::{errno, fs::fd_kind, yield_for_stdin};
use crate::proc::{EmuCore, EpollInterest};

const POLLIN: i16 = 0x1;
const POLLOUT: i16 = 0x4;
const POLLHUP: i16 = 0x10;

const EPOLLIN: u32 = 0x1;
const EPOLLOUT: u32 = 0x4;
const EPOLLHUP: u32 = 0x10;

const EPOLL_CTL_ADD: i32 = 1;
const EPOLL_CTL_DEL: i32 = 2;
const EPOLL_CTL_MOD: i32 = 3;

pub fn sys_ppoll(m: &mut Machine, core: &mut EmuCore) {
    let fds_addr = m.sysarg(0);
    let nfds = m.sysarg(1).min(64);
    let timeout_addr = m.sysarg(2);

    if nfds == 0 {
        m.set_result(0);
        return;
    }

    // NULL timeout blocks forever; {0,0} polls.
    let mut zero_timeout = false;
    if timeout_addr != 0 {
        let (Ok(sec), Ok(nsec)) = (
            m.memory.read_u64(timeout_addr),
            m.memory.read_u64(timeout_addr + 8),
        ) else {
            m.set_result(errno::EFAULT);
            return;
        };
        zero_timeout = sec == 0 && nsec == 0;
    }

    let mut ready = 0i64;
    for i in 0..nfds {
        let entry = fds_addr + i * 8;
        let (Ok(fd_raw), Ok(events_raw)) =
            (m.memory.read_u32(entry), m.memory.read_u16(entry + 4))
        else {
            m.set_result(errno::EFAULT);
            return;
        };
        let fd = fd_raw as i32;
        let events = events_raw as i16;
        let mut revents: i16 = 0;

        if fd == 0 && events & POLLIN != 0 && !core.fs.is_open(0) {
            if core.term.stdin_has_data() {
                revents |= POLLIN;
            } else if core.term.stdin_eof() {
                revents |= POLLHUP;
            }
        } else if fd == 1 || fd == 2 {
            if events & POLLOUT != 0 {
                revents |= POLLOUT;
            }
        } else if fd >= 0 && core.fs.is_open(fd) {
            match fd_kind(core, fd) {
                Some(FileKind::Fifo) => {
                    let has_bytes = core
                        .fs
                        .node_of(fd)
                        .map(|n| !n.borrow().content.is_empty())
                        .unwrap_or(false);
                    if has_bytes {
                        revents |= events & POLLIN;
                    }
                    revents |= events & POLLOUT;
                }
                _ => revents |= events & POLLIN,
            }
        }

        if revents != 0 {
            ready += 1;
        }
        if m.memory.write_u16(entry + 6, revents as u16).is_err() {
            m.set_result(errno::EFAULT);
            return;
        }
    }

    if ready > 0 {
        m.set_result(ready);
    } else if zero_timeout {
        m.set_result(0);
    } else {
        // Also covers the shell's post-wait signal poll, which would
        // otherwise spin for billions of instructions.
        yield_for_stdin(m, core);
    }
}

pub fn sys_epoll_create1(m: &mut Machine, core: &mut EmuCore) {
    let fd = core.alloc_epoll_fd();
    m.set_result(fd as i64);
}

pub fn sys_epoll_ctl(m: &mut Machine, core: &mut EmuCore) {
    let epfd = m.sysarg_i32(0);
    let op = m.sysarg_i32(1);
    let fd = m.sysarg_i32(2);
    let event_addr = m.sysarg(3);

    if !core.epoll.contains_key(&epfd) {
        m.set_result(errno::EBADF);
        return;
    }

    match op {
        EPOLL_CTL_ADD | EPOLL_CTL_MOD => {
            // struct epoll_event: { u32 events; u64 data } packed to 16.
            let (Ok(events), Ok(data)) = (
                m.memory.read_u32(event_addr),
                m.memory.read_u64(event_addr + 8),
            ) else {
                m.set_result(errno::EFAULT);
                return;
            };
            core.epoll
                .get_mut(&epfd)
                .unwrap()
                .interests
                .insert(fd, EpollInterest { events, data });
            m.set_result(0);
        }
        EPOLL_CTL_DEL => {
            core.epoll.get_mut(&epfd).unwrap().interests.remove(&fd);
            m.set_result(0);
        }
        _ => m.set_result(errno::EINVAL),
    }
}

fn interest_readiness(core: &mut EmuCore, fd: i32, interest: EpollInterest) -> u32 {
    let mut revents = 0u32;
    if fd == 0 {
        if core.term.stdin_has_data() && interest.events & EPOLLIN != 0 {
            revents |= EPOLLIN;
        } else if core.term.stdin_eof() {
            revents |= EPOLLHUP;
        }
    } else if fd == 1 || fd == 2 {
        if interest.events & EPOLLOUT != 0 {
            revents |= EPOLLOUT;
        }
    } else if core.fs.is_open(fd) {
        match fd_kind(core, fd) {
            Some(FileKind::Fifo) => {
                let has_bytes = core
                    .fs
                    .node_of(fd)
                    .map(|n| !n.borrow().content.is_empty())
                    .unwrap_or(false);
                if has_bytes && interest.events & EPOLLIN != 0 {
                    revents |= EPOLLIN;
                }
                if interest.events & EPOLLOUT != 0 {
                    revents |= EPOLLOUT;
                }
            }
            _ => {
                revents |= interest.events & (EPOLLIN | EPOLLOUT);
            }
        }
    } else if core.net.is_socket_fd(fd) {
        revents |= core.net.readiness(fd, interest.events);
    }
    revents
}

pub fn sys_epoll_pwait(m: &mut Machine, core: &mut EmuCore) {
    let epfd = m.sysarg_i32(0);
    let events_addr = m.sysarg(1);
    let maxevents = m.sysarg_i32(2).max(0) as usize;
    let timeout = m.sysarg_i32(3);

    let Some(instance) = core.epoll.get(&epfd) else {
        m.set_result(errno::EBADF);
        return;
    };
    let interests: Vec<(i32, EpollInterest)> =
        instance.interests.iter().map(|(k, v)| (*k, *v)).collect();

    let mut ready = 0usize;
    for (fd, interest) in interests {
        if ready >= maxevents {
            break;
        }
        let revents = interest_readiness(core, fd, interest);
        if revents != 0 {
            let slot = events_addr + (ready as u64) * 16;
            let ok = m.memory.write_u32(slot, revents).is_ok()
                && m.memory.write_u32(slot + 4, 0).is_ok()
                && m.memory.write_u64(slot + 8, interest.data).is_ok();
            if !ok {
                m.set_result(errno::EFAULT);
                return;
            }
            ready += 1;
        }
    }

    if ready > 0 {
        m.set_result(ready as i64);
    } else if timeout == 0 {
        m.set_result(0);
    } else {
        // Block: let the embedder deliver stdin bytes or tick timers,
        // then the re-executed ecall polls again.
        yield_for_stdin(m, core);
    }
}
