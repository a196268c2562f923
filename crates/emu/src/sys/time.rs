//! Clocks, sleeping and randomness.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use machine::Machine;
use rand::RngCore;

use super::errno;
use crate::proc::EmuCore;
use crate::sched::{maybe_preempt, switch_to};

/// Every clock id collapses to the host's real-time clock. This is also
/// the preemption hot path: busy guests poll the clock constantly, so
/// the quantum countdown lives here.
pub fn sys_clock_gettime(m: &mut Machine, core: &mut EmuCore) {
    let tp_addr = m.sysarg(1);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let ok = m.memory.write_u64(tp_addr, now.as_secs()).is_ok()
        && m
            .memory
            .write_u64(tp_addr + 8, now.subsec_nanos() as u64)
            .is_ok();
    if !ok {
        m.set_result(errno::EFAULT);
        return;
    }
    m.set_result(0);
    maybe_preempt(m, &mut core.sched);
}

/// 1 ms resolution, matching the embedder-driven sleep granularity.
pub fn sys_clock_getres(m: &mut Machine, _core: &mut EmuCore) {
    let res_addr = m.sysarg(1);
    if res_addr != 0 {
        let ok = m.memory.write_u64(res_addr, 0).is_ok()
            && m.memory.write_u64(res_addr + 8, 1_000_000).is_ok();
        if !ok {
            m.set_result(errno::EFAULT);
            return;
        }
    }
    m.set_result(0);
}

/// Sleeping yields to any runnable sibling thread first; only a lone
/// thread actually blocks the host.
pub fn sys_nanosleep(m: &mut Machine, core: &mut EmuCore) {
    let req_addr = m.sysarg(0);
    let (Ok(sec), Ok(nsec)) = (
        m.memory.read_u64(req_addr),
        m.memory.read_u64(req_addr + 8),
    ) else {
        m.set_result(errno::EFAULT);
        return;
    };

    if core.sched.count > 1 {
        let current = core.sched.current;
        if let Some(next) = core.sched.next_runnable(current) {
            m.set_result(0);
            switch_to(m, &mut core.sched, next);
            return;
        }
    }

    let ms = (sec * 1000 + nsec / 1_000_000).clamp(1, 10_000);
    std::thread::sleep(Duration::from_millis(ms));
    m.set_result(0);
}

/// Host entropy when available, the seeded PRNG otherwise.
pub fn sys_getrandom(m: &mut Machine, core: &mut EmuCore) {
    let buf_addr = m.sysarg(0);
    let count = (m.sysarg(1) as usize).min(1 << 20);

    let mut buf = vec![0u8; count];
    if let Ok(mut f) = std::fs::File::open("/dev/urandom") {
        use std::io::Read;
        let n = f.read(&mut buf).unwrap_or(0);
        if n < count {
            core.rng.fill_bytes(&mut buf[n..]);
        }
    } else {
        core.rng.fill_bytes(&mut buf);
    }
    if m.memory.memcpy(buf_addr, &buf).is_err() {
        m.set_result(errno::EFAULT);
        return;
    }
    m.set_result(count as i64);
}
