//! Initial-stack construction: argv, envp and the auxiliary vector, laid
//! out per the SysV RISC-V ABI. Used for the first program load, for
//! execve, and for the busybox same-binary restart path.

use machine::{Machine, MachineException};

use crate::proc::ExecContext;

pub const AT_NULL: u64 = 0;
pub const AT_PHDR: u64 = 3;
pub const AT_PHENT: u64 = 4;
pub const AT_PHNUM: u64 = 5;
pub const AT_PAGESZ: u64 = 6;
pub const AT_BASE: u64 = 7;
pub const AT_FLAGS: u64 = 8;
pub const AT_ENTRY: u64 = 9;
pub const AT_UID: u64 = 11;
pub const AT_EUID: u64 = 12;
pub const AT_GID: u64 = 13;
pub const AT_EGID: u64 = 14;
pub const AT_SECURE: u64 = 23;
pub const AT_RANDOM: u64 = 25;
pub const AT_EXECFN: u64 = 31;

/// Build the initial stack below `stack_top` and return the final SP
/// (16-byte aligned). The interpreter base goes into AT_BASE; a static
/// binary passes 0 there and jumps straight to AT_ENTRY.
pub fn setup_stack(
    m: &mut Machine,
    exec: &ExecContext,
    args: &[String],
    env: &[String],
    stack_top: u64,
    random: [u8; 16],
) -> Result<u64, MachineException> {
    let mut sp = stack_top;

    let push_bytes = |m: &mut Machine, bytes: &[u8], sp: &mut u64| -> Result<u64, MachineException> {
        *sp -= bytes.len() as u64;
        m.memory.memcpy(*sp, bytes)?;
        Ok(*sp)
    };

    // Strings first, from the top down.
    let mut arg_ptrs = Vec::with_capacity(args.len());
    for a in args {
        let mut bytes = a.clone().into_bytes();
        bytes.push(0);
        arg_ptrs.push(push_bytes(m, &bytes, &mut sp)?);
    }
    let mut env_ptrs = Vec::with_capacity(env.len());
    for e in env {
        let mut bytes = e.clone().into_bytes();
        bytes.push(0);
        env_ptrs.push(push_bytes(m, &bytes, &mut sp)?);
    }
    let random_ptr = push_bytes(m, &random, &mut sp)?;

    // The AT_EXECFN pointer references argv[0]'s string.
    let execfn_ptr = arg_ptrs.first().copied().unwrap_or(0);

    let auxv: Vec<(u64, u64)> = vec![
        (AT_PHDR, exec.phdr_vaddr),
        (AT_PHENT, exec.phent),
        (AT_PHNUM, exec.phnum),
        (AT_PAGESZ, 4096),
        (AT_BASE, if exec.dynamic { exec.interp_base } else { 0 }),
        (AT_FLAGS, 0),
        (AT_ENTRY, exec.entry),
        (AT_UID, 0),
        (AT_EUID, 0),
        (AT_GID, 0),
        (AT_EGID, 0),
        (AT_SECURE, 0),
        (AT_RANDOM, random_ptr),
        (AT_EXECFN, execfn_ptr),
        (AT_NULL, 0),
    ];

    // Vector area: argc, argv[..] NULL, envp[..] NULL, auxv pairs.
    let words = 1 + arg_ptrs.len() + 1 + env_ptrs.len() + 1 + auxv.len() * 2;
    let mut vec_size = (words * 8) as u64;

    sp &= !15;
    if vec_size % 16 != 0 {
        // Keep the final SP on a 16-byte boundary.
        vec_size += 8;
    }
    sp -= vec_size;

    let mut addr = sp;
    let put = |m: &mut Machine, addr: &mut u64, v: u64| -> Result<(), MachineException> {
        m.memory.write_u64(*addr, v)?;
        *addr += 8;
        Ok(())
    };

    put(m, &mut addr, args.len() as u64)?;
    for p in &arg_ptrs {
        put(m, &mut addr, *p)?;
    }
    put(m, &mut addr, 0)?;
    for p in &env_ptrs {
        put(m, &mut addr, *p)?;
    }
    put(m, &mut addr, 0)?;
    for (key, value) in &auxv {
        put(m, &mut addr, *key)?;
        put(m, &mut addr, *value)?;
    }

    Ok(sp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_vec_entry(m: &Machine, sp: u64, index: u64) -> u64 {
        m.memory.read_u64(sp + index * 8).unwrap()
    }

    fn find_auxv(m: &Machine, sp: u64, key: u64) -> Option<u64> {
        // Walk argc/argv/envp, then scan pairs.
        let argc = read_vec_entry(m, sp, 0);
        let mut idx = 1 + argc + 1;
        while read_vec_entry(m, sp, idx) != 0 {
            idx += 1;
        }
        idx += 1;
        loop {
            let k = read_vec_entry(m, sp, idx);
            let v = read_vec_entry(m, sp, idx + 1);
            if k == AT_NULL {
                return None;
            }
            if k == key {
                return Some(v);
            }
            idx += 2;
        }
    }

    fn build() -> (Machine, u64) {
        let mut m = Machine::new(20);
        let exec = ExecContext {
            entry: 0x41000,
            phdr_vaddr: 0x40040,
            phent: 56,
            phnum: 9,
            interp_base: 0x80000,
            dynamic: true,
            ..Default::default()
        };
        let args = vec!["ls".to_string(), "/".to_string()];
        let env = vec!["PATH=/bin".to_string(), "HOME=/root".to_string()];
        let sp = setup_stack(&mut m, &exec, &args, &env, 0xf0000, [7u8; 16]).unwrap();
        (m, sp)
    }

    #[test]
    fn sp_is_16_byte_aligned() {
        let (_m, sp) = build();
        assert_eq!(sp % 16, 0);
    }

    #[test]
    fn argc_and_argv_strings_are_reachable() {
        let (m, sp) = build();
        assert_eq!(read_vec_entry(&m, sp, 0), 2);
        let argv0 = read_vec_entry(&m, sp, 1);
        assert_eq!(m.memory.memstring(argv0).unwrap(), "ls");
        let argv1 = read_vec_entry(&m, sp, 2);
        assert_eq!(m.memory.memstring(argv1).unwrap(), "/");
        assert_eq!(read_vec_entry(&m, sp, 3), 0);
    }

    #[test]
    fn auxv_reports_page_size_and_bases() {
        let (m, sp) = build();
        assert_eq!(find_auxv(&m, sp, AT_PAGESZ), Some(4096));
        assert_eq!(find_auxv(&m, sp, AT_BASE), Some(0x80000));
        assert_eq!(find_auxv(&m, sp, AT_ENTRY), Some(0x41000));
        assert_eq!(find_auxv(&m, sp, AT_PHNUM), Some(9));
        let rand_ptr = find_auxv(&m, sp, AT_RANDOM).unwrap();
        let mut bytes = [0u8; 16];
        m.memory.memcpy_out(&mut bytes, rand_ptr).unwrap();
        assert_eq!(bytes, [7u8; 16]);
    }

    #[test]
    fn execfn_points_at_argv0() {
        let (m, sp) = build();
        let argv0 = read_vec_entry(&m, sp, 1);
        assert_eq!(find_auxv(&m, sp, AT_EXECFN), Some(argv0));
    }
}
