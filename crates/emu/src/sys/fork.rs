//! Single-child fork emulation.
//!
//! clone() without CLONE_THREAD snapshots the writable guest memory and
//! the open-fd set, then lets the "child" run in place. When the child
//! exits, the snapshot is copied back, extra fds are closed and the
//! parent resumes after its clone with the child pid in a0. wait4 then
//! reports the recorded exit status once.
//!
//! Ordering matters: all copies happen before `in_child` flips, so a
//! fault mid-snapshot can be retried by re-entering the handler with
//! clean state.

use log::debug;
use machine::{Machine, PageAttributes, PAGE_SIZE, REG_SP};

use super::errno;
use crate::proc::{EmuCore, MemRegion};

/// Copy a guest span to the host. Unreadable pages (PROT_NONE guards
/// inside thread stacks) are promoted page by page, matching what the
/// run loop's fault-retry would do.
fn snapshot_region(m: &mut Machine, addr: u64, size: u64) -> MemRegion {
    let mut data = vec![0u8; size as usize];
    let mut attempts = 0u32;
    loop {
        match m.memory.memcpy_out(&mut data, addr) {
            Ok(()) => return MemRegion { addr, data },
            Err(e) if attempts < 1024 => {
                attempts += 1;
                m.memory.set_page_attr(
                    e.addr & !(PAGE_SIZE - 1),
                    PAGE_SIZE,
                    PageAttributes::rwx(),
                );
            }
            Err(_) => return MemRegion { addr, data },
        }
    }
}

pub fn sys_fork(m: &mut Machine, core: &mut EmuCore) {
    if core.fork.in_child {
        // One snapshot at a time; a nested fork has nowhere to restore.
        m.set_result(errno::EAGAIN);
        return;
    }
    let flags = m.sysarg(0);
    debug!("clone: fork flags={:#x}", flags);

    core.fork.regs = m.cpu.save_regs();
    core.fork.pc = m.cpu.pc(); // already past the ecall
    core.fork.child_pid = core.alloc_pid();
    core.fork.exit_status = 0;

    let rw_start = core.exec.exec_rw_start;
    let save_end = core.exec.heap_start.max(core.exec.exec_rw_end);
    let (irw_start, irw_end) = (core.exec.interp_rw_start, core.exec.interp_rw_end);
    let (heap_start, heap_size) = (core.exec.heap_start, core.exec.heap_size);
    let stack_top = core.exec.original_stack_top;

    // Region 1: main binary data/BSS plus the brk span. Shell state
    // ($PWD and friends) lives here.
    if rw_start > 0 && save_end > rw_start {
        core.fork.exec_data = snapshot_region(m, rw_start, save_end - rw_start);
    }

    // Region 2: interpreter data/BSS (ld.so state).
    if irw_start > 0 && irw_end > irw_start {
        core.fork.interp_data = snapshot_region(m, irw_start, irw_end - irw_start);
    }

    // Region 3: the live stack from SP to its original top.
    let sp = m.cpu.reg(REG_SP);
    if sp < stack_top {
        core.fork.stack_data = snapshot_region(m, sp, stack_top - sp);
    }

    // Region 4: guest mmap pages between the heap end and the bump
    // frontier (TLS and malloc'd memory; musl mallocs via mmap).
    if heap_start > 0 && heap_size > 0 {
        let region_start = heap_start + heap_size;
        let frontier = m.memory.mmap_address();
        if frontier > region_start {
            core.fork.mmap_data = snapshot_region(m, region_start, frontier - region_start);
        }
    }

    core.fork.parent_open_fds = core.fs.open_fds();

    // Flip only after every copy succeeded so a retried entry starts
    // from scratch.
    core.fork.in_child = true;
    core.fork.child_reaped = false;

    m.set_result(0);
}

/// The cooperative child called exit: put the parent's world back.
pub fn restore_parent(m: &mut Machine, core: &mut EmuCore) {
    core.fork.exit_status = m.sysarg_i32(0);
    core.fork.in_child = false;
    debug!(
        "fork child pid={} exited status={}",
        core.fork.child_pid, core.fork.exit_status
    );

    // Permissions first: the child's dynamic linker may have applied
    // RELRO to pages the copy-in has to write.
    let fix = |m: &mut Machine, addr: u64, size: u64| {
        if addr > 0 && size > 0 {
            m.memory.set_page_attr(addr, size, PageAttributes::rwx());
        }
    };
    let exec = &core.exec;
    let save_end = exec.heap_start.max(exec.exec_rw_end);
    fix(m, exec.exec_rw_start, save_end.saturating_sub(exec.exec_rw_start));
    fix(
        m,
        exec.interp_rw_start,
        exec.interp_rw_end.saturating_sub(exec.interp_rw_start),
    );
    if !core.fork.mmap_data.is_empty() {
        fix(m, core.fork.mmap_data.addr, core.fork.mmap_data.data.len() as u64);
    }
    let saved_sp = core.fork.regs[REG_SP];
    fix(m, saved_sp, exec.original_stack_top.saturating_sub(saved_sp));

    for region in [
        &mut core.fork.exec_data,
        &mut core.fork.interp_data,
        &mut core.fork.stack_data,
        &mut core.fork.mmap_data,
    ] {
        if !region.is_empty() {
            let _ = m.memory.memcpy(region.addr, &region.data);
            region.clear();
        }
    }

    // Undo child-side fd churn (pipes, dup3 redirections).
    let current = core.fs.open_fds();
    for fd in current {
        if !core.fork.parent_open_fds.contains(&fd) {
            core.fs.close(fd);
            if fd > 2 {
                core.tty_fds.remove(&fd);
            }
        }
    }
    core.fork.parent_open_fds.clear();

    m.cpu.restore_regs(&core.fork.regs);
    m.cpu.jump(core.fork.pc);
    m.set_result(core.fork.child_pid as i64);
}

/// Reap the one cooperative child. By construction the child has
/// already exited when the parent runs again, so this never blocks;
/// a second wait reports -ECHILD.
pub fn sys_wait4(m: &mut Machine, core: &mut EmuCore) {
    if core.fork.child_reaped || core.fork.child_pid == 0 {
        m.set_result(errno::ECHILD);
        return;
    }
    let wstatus_addr = m.sysarg(1);
    if wstatus_addr != 0 {
        let wstatus = ((core.fork.exit_status & 0xff) as u32) << 8;
        if m.memory.write_u32(wstatus_addr, wstatus).is_err() {
            m.set_result(errno::EFAULT);
            return;
        }
    }
    core.fork.child_reaped = true;
    m.set_result(core.fork.child_pid as i64);
}
