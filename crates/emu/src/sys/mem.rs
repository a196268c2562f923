//! Guest memory management over the bump arena.
//!
//! There is no freelist: anonymous mappings come from a single monotone
//! frontier, munmap only zeroes, and the break lives in a fixed span
//! carved out at load time. The quirky hint rules exist for real
//! runtimes: Go probes with huge out-of-arena hints and handles -ENOMEM,
//! while V8 never retries, so small hints must succeed at the bump.

use log::{debug, trace};
use machine::{Machine, PageAttributes, PAGE_SIZE};

use super::errno;
use crate::loader::page_up;
use crate::proc::EmuCore;
use crate::sched::maybe_preempt;
use crate::BRK_MAX;

const MAP_FIXED: i32 = 0x10;

/// Hints at or past the arena edge at this size or larger are refused
/// instead of ignored.
const LARGE_HINT: u64 = 4 << 20;

pub fn sys_mmap(m: &mut Machine, core: &mut EmuCore) {
    let vfd = m.sysarg_i32(4);
    if vfd == -1 {
        anon_mmap(m, core);
    } else {
        file_mmap(m, core, vfd);
    }
}

fn anon_mmap(m: &mut Machine, core: &mut EmuCore) {
    let hint = m.sysarg(0);
    let length = m.sysarg(1);
    let flags = m.sysarg_i32(3);
    let limit = m.memory.size();

    if length == 0 {
        m.set_result(errno::EINVAL);
        return;
    }
    let aligned = page_up(length);

    let result = if flags & MAP_FIXED != 0 {
        if hint.checked_add(aligned).map_or(true, |end| end > limit) {
            m.set_result(errno::ENOMEM);
            return;
        }
        // Fixed mappings can land on code the CPU already decoded;
        // code pages are executable by default, so there is no attr to
        // consult and the eviction is unconditional.
        m.memory.evict_execute_segments();
        m.memory.invalidate_range(hint, aligned);
        if hint + aligned > m.memory.mmap_address() && hint >= m.memory.mmap_start() {
            m.memory.set_mmap_address(hint + aligned);
        }
        hint
    } else if hint != 0 && hint >= limit && aligned >= LARGE_HINT {
        // Go's arena reservations: refuse so its fallback path runs.
        trace!("mmap large hint {:#x} len {:#x} refused", hint, length);
        m.set_result(errno::ENOMEM);
        return;
    } else {
        // Hints we cannot honor are ignored; the bump serves everyone.
        let bump = m.memory.mmap_address();
        if bump + aligned > limit {
            debug!("mmap out of arena: len {:#x} bump {:#x}", length, bump);
            m.set_result(errno::ENOMEM);
            return;
        }
        m.memory.set_mmap_address(bump + aligned);
        // Fresh anonymous memory must read as zero even after a
        // munmap+remap cycle over the same range.
        m.memory.memdiscard(bump, aligned);
        bump
    };

    m.set_result(result as i64);
    maybe_preempt(m, &mut core.sched);
}

fn file_mmap(m: &mut Machine, core: &mut EmuCore, vfd: i32) {
    let hint = m.sysarg(0);
    let length = page_up(m.sysarg(1));
    let prot = m.sysarg_i32(2);
    let flags = m.sysarg_i32(3);
    let offset = m.sysarg(5);

    if hint % PAGE_SIZE != 0 {
        m.set_result(errno::EINVAL);
        return;
    }
    let Some(node) = core.fs.node_of(vfd) else {
        m.set_result(errno::EBADF);
        return;
    };
    if !node.borrow().is_file() {
        m.set_result(errno::EBADF);
        return;
    }

    let limit = m.memory.size();
    let mmap_start = m.memory.mmap_start();
    let bump = m.memory.mmap_address();

    let dst = if hint == 0 {
        if bump + length > limit {
            m.set_result(errno::ENOMEM);
            return;
        }
        m.memory.set_mmap_address(bump + length);
        bump
    } else if flags & MAP_FIXED != 0 {
        if hint + length > limit {
            m.set_result(errno::ENOMEM);
            return;
        }
        if hint >= mmap_start && hint + length > bump {
            m.memory.set_mmap_address(hint + length);
        }
        hint
    } else {
        hint
    };

    if flags & MAP_FIXED != 0 {
        m.memory.evict_execute_segments();
    }
    m.memory.invalidate_range(dst, length);

    // Stage the copy like the anonymous path: writable, zeroed, then
    // the file bytes, then exactly the requested protection.
    m.memory.set_page_attr(dst, length, PageAttributes::rw());
    m.memory.memdiscard(dst, length);

    let content = node.borrow().content.clone();
    if (offset as usize) < content.len() {
        let avail = content.len() - offset as usize;
        let to_copy = (length as usize).min(avail);
        if m
            .memory
            .memcpy(dst, &content[offset as usize..offset as usize + to_copy])
            .is_err()
        {
            m.set_result(errno::EFAULT);
            return;
        }
    }

    m.memory
        .set_page_attr(dst, length, PageAttributes::from_prot(prot));
    debug!(
        "mmap file fd={} dst={:#x} len={:#x} prot={}",
        vfd, dst, length, prot
    );
    m.set_result(dst as i64);
}

/// No freelist: zero the span so later allocations read fresh memory,
/// report success.
pub fn sys_munmap(m: &mut Machine, _core: &mut EmuCore) {
    let addr = m.sysarg(0);
    let len = page_up(m.sysarg(1));
    m.memory.memdiscard(addr, len);
    m.memory.invalidate_range(addr, len);
    m.set_result(0);
}

/// Attribute changes apply verbatim inside the mmap region. Below it,
/// mprotect is a no-op: RELRO would otherwise flip relocated pages
/// read-only and leave decoder state the fork restore cannot repair.
pub fn sys_mprotect(m: &mut Machine, _core: &mut EmuCore) {
    let addr = m.sysarg(0);
    let len = m.sysarg(1);
    let prot = m.sysarg_i32(2);

    trace!("mprotect addr={:#x} len={:#x} prot={}", addr, len, prot);

    if addr >= m.memory.mmap_start() {
        if prot & 2 != 0 {
            // Writable over possibly-decoded code (V8 patches its own
            // code pages this way).
            m.memory.evict_execute_segments();
            m.memory.invalidate_range(addr, len);
        }
        m.memory
            .set_page_attr(addr, len, PageAttributes::from_prot(prot));
    }
    m.set_result(0);
}

/// Program break. One clamped span regardless of execve state: querying
/// or shrinking returns the current break, growth is capped at BRK_MAX
/// past the base and newly exposed pages become writable.
pub fn sys_brk(m: &mut Machine, core: &mut EmuCore) {
    let requested = m.sysarg(0);
    let base = core.exec.brk_base;
    let cap = base + BRK_MAX;

    let new_end = if requested == 0 || requested < base {
        core.exec.brk_current
    } else if requested > cap {
        cap
    } else {
        requested
    };

    if new_end > core.exec.brk_current {
        let start = core.exec.brk_current;
        m.memory
            .set_page_attr(start, new_end - start, PageAttributes::rw());
    }
    core.exec.brk_current = new_end;
    trace!("brk({:#x}) -> {:#x}", requested, new_end);
    m.set_result(new_end as i64);
}

/// Matches QEMU: -EFAULT outside the arena (musl's chunk walk relies on
/// it as a stop signal), -ENOMEM otherwise so callers fall back to
/// mmap+copy.
pub fn sys_mremap(m: &mut Machine, _core: &mut EmuCore) {
    let old_addr = m.sysarg(0);
    let old_size = m.sysarg(1);
    let limit = m.memory.size();
    if old_addr >= limit || old_addr.saturating_add(old_size) > limit {
        m.set_result(errno::EFAULT);
        return;
    }
    m.set_result(errno::ENOMEM);
}

pub fn sys_madvise(m: &mut Machine, _core: &mut EmuCore) {
    m.set_result(0);
}
