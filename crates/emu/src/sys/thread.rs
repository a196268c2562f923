//! clone(CLONE_THREAD), futex and thread lifecycle.
//!
//! Covers the pattern V8 and musl pthreads rely on: create a thread,
//! park the creator on a futex, let the worker run, wake on completion.
//! `CLONE_CHILD_CLEARTID` is honored on thread exit so pthread_join
//! observes completion.

use log::{debug, trace};
use machine::{Machine, REG_SP, REG_TP};

use super::{errno, fork};
use crate::proc::EmuCore;
use crate::sched::{restore_thread, save_thread, switch_to, MAX_VTHREADS};

const CLONE_VM: u64 = 0x100;
const CLONE_VFORK: u64 = 0x4000;
const CLONE_THREAD: u64 = 0x10000;
const CLONE_SETTLS: u64 = 0x80000;
const CLONE_PARENT_SETTID: u64 = 0x100000;
const CLONE_CHILD_CLEARTID: u64 = 0x200000;

const FUTEX_WAIT: i32 = 0;
const FUTEX_WAKE: i32 = 1;
const FUTEX_WAIT_BITSET: i32 = 9;
const FUTEX_WAKE_BITSET: i32 = 10;

pub fn sys_clone(m: &mut Machine, core: &mut EmuCore) {
    let flags = m.sysarg(0);
    let is_thread =
        flags & CLONE_THREAD != 0 || (flags & CLONE_VM != 0 && flags & CLONE_VFORK == 0);
    if is_thread {
        clone_thread(m, core, flags);
    } else {
        fork::sys_fork(m, core);
    }
}

fn clone_thread(m: &mut Machine, core: &mut EmuCore, flags: u64) {
    let child_stack = m.sysarg(1);
    let tid = core.alloc_pid();

    if flags & CLONE_PARENT_SETTID != 0 {
        let parent_tidptr = m.sysarg(2);
        if parent_tidptr != 0 && m.memory.write_u32(parent_tidptr, tid as u32).is_err() {
            m.set_result(errno::EFAULT);
            return;
        }
    }

    if core.sched.count == 0 {
        core.sched.init(1);
    }

    let Some(child_idx) = core.sched.add_thread(tid) else {
        // Table full: pretend the thread exists, it just never runs.
        debug!("thread slots full, faking tid={}", tid);
        m.set_result(tid as i64);
        return;
    };

    // The parent's saved context returns the child tid from clone.
    let parent_idx = core.sched.current;
    save_thread(m, &mut core.sched.threads[parent_idx]);
    core.sched.threads[parent_idx].regs[machine::REG_A0] = tid as u64;

    // Execution continues as the child: fresh stack, zero return,
    // optional TLS.
    m.cpu.set_reg(REG_SP, child_stack);
    m.set_result(0);
    if flags & CLONE_SETTLS != 0 {
        m.cpu.set_reg(REG_TP, m.sysarg(3));
    }
    if flags & CLONE_CHILD_CLEARTID != 0 {
        core.sched.threads[child_idx].clear_child_tid = m.sysarg(4);
    }
    core.sched.current = child_idx;
    save_thread(m, &mut core.sched.threads[child_idx]);
    debug!("clone: thread tid={} stack={:#x}", tid, child_stack);
}

pub fn sys_futex(m: &mut Machine, core: &mut EmuCore) {
    let uaddr = m.sysarg(0);
    let op = m.sysarg_i32(1);
    let cmd = op & 0x7f;

    match cmd {
        FUTEX_WAIT | FUTEX_WAIT_BITSET => {
            let expected = m.sysarg_i32(2);
            let Ok(actual) = m.memory.read_u32(uaddr) else {
                m.set_result(errno::EFAULT);
                return;
            };
            if actual as i32 != expected {
                m.set_result(errno::EAGAIN);
                return;
            }

            if core.sched.count > 1 {
                let current = core.sched.current;
                core.sched.threads[current].waiting = true;
                core.sched.threads[current].futex_addr = uaddr;
                core.sched.threads[current].futex_val = expected;
                // Return value seen when this thread is resumed.
                m.set_result(0);

                if let Some(next) = core.sched.next_runnable(current) {
                    trace!("futex wait: switch t{} -> t{} addr={:#x}", current, next, uaddr);
                    switch_to(m, &mut core.sched, next);
                    return;
                }
                // Cooperative deadlock: every thread is waiting. Force
                // one awake so it can observe whatever was stored before
                // the wait; the guest sees a spurious wakeup.
                for i in 0..MAX_VTHREADS {
                    if i != current && core.sched.threads[i].active && core.sched.threads[i].waiting
                    {
                        core.sched.threads[i].waiting = false;
                        debug!("futex deadlock-break: force-wake t{}", i);
                        switch_to(m, &mut core.sched, i);
                        return;
                    }
                }
                core.sched.threads[current].waiting = false;
            }

            if core.sched.count <= 1 {
                // A lone waiter can never be woken; break the spin.
                m.set_result(errno::EAGAIN);
                return;
            }
            let _ = m.memory.write_u32(uaddr, 0);
            m.set_result(0);
        }
        FUTEX_WAKE | FUTEX_WAKE_BITSET => {
            let max_wake = m.sysarg_i32(2);
            let woken = core.sched.wake(uaddr, max_wake);
            if woken > 0 {
                trace!("futex wake addr={:#x} woken={}", uaddr, woken);
            }
            // The waker keeps running until its next preemption point.
            m.set_result(woken as i64);
        }
        _ => m.set_result(errno::ENOSYS),
    }
}

pub fn sys_sched_yield(m: &mut Machine, core: &mut EmuCore) {
    m.set_result(0);
    if core.sched.count > 1 {
        let current = core.sched.current;
        if let Some(next) = core.sched.next_runnable(current) {
            switch_to(m, &mut core.sched, next);
        }
    }
}

pub fn sys_set_tid_address(m: &mut Machine, core: &mut EmuCore) {
    let tidptr = m.sysarg(0);
    if core.sched.count > 0 {
        let current = core.sched.current;
        core.sched.threads[current].clear_child_tid = tidptr;
        m.set_result(core.sched.threads[current].tid as i64);
    } else {
        m.set_result(1);
    }
}

pub fn sys_set_robust_list(m: &mut Machine, _core: &mut EmuCore) {
    m.set_result(0);
}

pub fn sys_exit(m: &mut Machine, core: &mut EmuCore) {
    // A sibling thread exiting: publish the tid clear, drop the slot,
    // hand the CPU to someone runnable.
    if core.sched.count > 1 && core.sched.current != 0 {
        let exiting = core.sched.current;
        let exit_code = m.sysarg_i32(0);
        let clear_tid = core.sched.threads[exiting].clear_child_tid;
        debug!(
            "thread tid={} exit code={}",
            core.sched.threads[exiting].tid, exit_code
        );

        if clear_tid != 0 {
            let _ = m.memory.write_u32(clear_tid, 0);
            core.sched.wake(clear_tid, 1);
        }
        core.sched.deactivate(exiting);

        if let Some(next) = core.sched.next_runnable(exiting) {
            let thread = core.sched.threads[next];
            restore_thread(m, &thread);
            core.sched.current = next;
            return;
        }
        // Nobody left to run; fall through to process exit.
    }

    if core.fork.in_child {
        fork::restore_parent(m, core);
        return;
    }

    let exit_code = m.sysarg_i32(0);
    debug!("main thread exit code={}", exit_code);
    m.stop();
    m.set_result(exit_code as i64);
}

pub fn sys_exit_group(m: &mut Machine, core: &mut EmuCore) {
    if core.fork.in_child {
        fork::restore_parent(m, core);
        return;
    }
    let exit_code = m.sysarg_i32(0);
    core.sched.kill_all();
    m.stop();
    m.set_result(exit_code as i64);
}
