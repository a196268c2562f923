//! Fork snapshot/restore and the execve restart paths.

mod common;

use common::{ecall, env_with_layout, get_bytes, put_cstr, TestEnv};
use emu::sys::nr;
use machine::{REG_A0, REG_SP};
use vfs::Node;

const SIGCHLD: u64 = 17;

fn fork(t: &mut TestEnv) -> i64 {
    ecall(t, nr::CLONE, &[SIGCHLD, 0, 0, 0, 0])
}

#[test]
fn fork_then_child_exit_restores_parent_memory_and_fds() {
    let mut t = env_with_layout();
    t.m.cpu.jump(0x5004);
    t.m.cpu.set_reg(REG_SP, 0xe0_0000);
    t.m.cpu.set_reg(20, 0xdead_beef); // callee-saved marker

    // Parent data the child will trample.
    t.m.memory.memcpy(0x10_0000, b"parent data").unwrap();
    t.m.memory.memcpy(0xe0_1000, b"parent stack").unwrap();

    let ret = fork(&mut t);
    assert_eq!(ret, 0, "child continues in place");
    assert!(t.core.fork.in_child);
    let pre_fork_fds = t.core.fs.open_fds();

    // Child-side damage: memory, registers, a new pipe.
    t.m.memory.memcpy(0x10_0000, b"child  data").unwrap();
    t.m.memory.memcpy(0xe0_1000, b"child  stack").unwrap();
    t.m.cpu.set_reg(20, 0);
    let pipe = Node::fifo();
    let child_fd = t.core.fs.open_pipe(pipe, false);

    // Child exits with status 42: the parent world comes back.
    let ret = ecall(&mut t, nr::EXIT_GROUP, &[42]);
    let child_pid = t.core.fork.child_pid as i64;
    assert_eq!(ret, child_pid);
    assert!(!t.core.fork.in_child);
    assert_eq!(get_bytes(&t, 0x10_0000, 11), b"parent data");
    assert_eq!(get_bytes(&t, 0xe0_1000, 12), b"parent stack");
    assert_eq!(t.m.cpu.reg(20), 0xdead_beef);
    assert_eq!(t.m.cpu.pc(), 0x5004);
    assert!(!t.core.fs.is_open(child_fd));
    assert_eq!(t.core.fs.open_fds(), pre_fork_fds);

    // wait4 reports the encoded status once, then ECHILD.
    let status_addr = 0xa000u64;
    let pid = ecall(&mut t, nr::WAIT4, &[u64::MAX, status_addr, 0, 0]);
    assert_eq!(pid, child_pid);
    let status = t.m.memory.read_u32(status_addr).unwrap();
    assert_eq!(status, 42 << 8);
    assert_eq!(ecall(&mut t, nr::WAIT4, &[u64::MAX, status_addr, 0, 0]), -10);
}

#[test]
fn nested_fork_is_refused() {
    let mut t = env_with_layout();
    t.m.cpu.set_reg(REG_SP, 0xe0_0000);
    assert_eq!(fork(&mut t), 0);
    assert_eq!(fork(&mut t), -11);
}

#[test]
fn fork_snapshot_copes_with_guard_pages() {
    let mut t = env_with_layout();
    t.m.cpu.set_reg(REG_SP, 0xe0_0000);

    // A PROT_NONE guard inside the mmap region (musl thread stacks).
    let guard = 0x40_0000u64;
    t.m.memory.set_mmap_address(guard + 0x3000);
    t.m.memory
        .set_page_attr(guard, 4096, machine::PageAttributes::none());

    assert_eq!(fork(&mut t), 0);
    assert!(t.core.fork.in_child, "snapshot survived the guard page");
}

#[test]
fn wait_without_child_is_echild() {
    let mut t = env_with_layout();
    assert_eq!(ecall(&mut t, nr::WAIT4, &[u64::MAX, 0, 0, 0]), -10);
}

// ---- execve ----

/// Minimal RV64 ELF: one RX segment at vaddr 0 covering the header
/// area, one RW segment; entry as given.
fn synth_elf(e_type: u16, entry: u64) -> Vec<u8> {
    let mut out = vec![0u8; 64];
    out[0..4].copy_from_slice(b"\x7fELF");
    out[4] = 2;
    out[5] = 1;
    out[6] = 1;
    out[16..18].copy_from_slice(&e_type.to_le_bytes());
    out[18..20].copy_from_slice(&243u16.to_le_bytes());
    out[20..24].copy_from_slice(&1u32.to_le_bytes());
    out[24..32].copy_from_slice(&entry.to_le_bytes());
    out[32..40].copy_from_slice(&64u64.to_le_bytes());
    out[52..54].copy_from_slice(&64u16.to_le_bytes());
    out[54..56].copy_from_slice(&56u16.to_le_bytes());
    out[56..58].copy_from_slice(&2u16.to_le_bytes());

    let mut text = [0u8; 56];
    text[0..4].copy_from_slice(&1u32.to_le_bytes());
    text[4..8].copy_from_slice(&5u32.to_le_bytes());
    text[32..40].copy_from_slice(&0x1000u64.to_le_bytes());
    text[40..48].copy_from_slice(&0x1000u64.to_le_bytes());
    out.extend_from_slice(&text);

    let mut data = [0u8; 56];
    data[0..4].copy_from_slice(&1u32.to_le_bytes());
    data[4..8].copy_from_slice(&6u32.to_le_bytes());
    data[16..24].copy_from_slice(&0x2000u64.to_le_bytes());
    data[24..32].copy_from_slice(&0x2000u64.to_le_bytes());
    data[40..48].copy_from_slice(&0x800u64.to_le_bytes());
    out.extend_from_slice(&data);
    out
}

/// A fake dynamic container layout so execve's gate opens.
fn dynamic_env() -> TestEnv {
    let mut t = env_with_layout();
    t.core.exec.dynamic = true;
    t.core.exec.exec_binary = b"not-an-elf-but-loaded".to_vec();
    t.core.exec.interp_base = 0x60_0000;
    t.core.exec.interp_entry = 0x60_0100;
    t.core.exec.env = vec!["PATH=/bin".to_string()];
    t
}

fn put_argv(t: &mut TestEnv, addrs: &[(&str, u64)], vec_addr: u64) -> u64 {
    for (i, (s, addr)) in addrs.iter().enumerate() {
        put_cstr(t, *addr, s);
        t.m.memory.write_u64(vec_addr + i as u64 * 8, *addr).unwrap();
    }
    t.m.memory
        .write_u64(vec_addr + addrs.len() as u64 * 8, 0)
        .unwrap();
    vec_addr
}

#[test]
fn execve_without_dynamic_context_is_enosys() {
    let mut t = env_with_layout();
    let path = put_cstr(&mut t, 0x1000, "/bin/anything");
    assert_eq!(ecall(&mut t, nr::EXECVE, &[path, 0, 0]), -38);
}

#[test]
fn execve_missing_target_is_enoent() {
    let mut t = dynamic_env();
    let path = put_cstr(&mut t, 0x1000, "/bin/missing");
    let argv = put_argv(&mut t, &[("missing", 0x1100)], 0x2000);
    assert_eq!(ecall(&mut t, nr::EXECVE, &[path, argv, 0]), -2);
}

#[test]
fn execve_same_binary_takes_the_restart_path() {
    let mut t = dynamic_env();
    // The applet file holds the exact bytes already loaded.
    t.core
        .fs
        .add_virtual_file("/bin/applet", b"not-an-elf-but-loaded".to_vec());
    let path = put_cstr(&mut t, 0x1000, "/bin/applet");
    let argv = put_argv(&mut t, &[("applet", 0x1100), ("-x", 0x1180)], 0x2000);

    ecall(&mut t, nr::EXECVE, &[path, argv, 0]);

    // Restarted through the interpreter with a fresh stack.
    assert_eq!(t.m.cpu.pc(), 0x60_0100);
    assert!(!t.core.execve_restart, "restart path does not stop the cpu");
    let sp = t.m.cpu.reg(REG_SP);
    assert_eq!(sp % 16, 0);
    assert_eq!(t.m.memory.read_u64(sp).unwrap(), 2); // argc
    let argv0 = t.m.memory.read_u64(sp + 8).unwrap();
    assert_eq!(t.m.memory.memstring(argv0).unwrap(), "applet");
}

#[test]
fn execve_new_static_binary_reloads_layout() {
    let mut t = dynamic_env();
    let elf = synth_elf(2, 0x500); // ET_EXEC, entry inside text
    t.core.fs.add_virtual_file("/bin/tool", elf);
    let path = put_cstr(&mut t, 0x1000, "/bin/tool");
    let argv = put_argv(&mut t, &[("tool", 0x1100)], 0x2000);

    let g0 = t.m.memory.evict_generation();
    ecall(&mut t, nr::EXECVE, &[path, argv, 0]);

    assert!(t.core.execve_restart, "new binary stops for a clean restart");
    assert!(t.m.stopped());
    assert!(t.m.memory.evict_generation() > g0, "decoder cache evicted");
    assert_eq!(t.m.cpu.pc(), 0x500, "static entry, no interpreter");
    assert!(!t.core.exec.dynamic);
    // Break sits above the loaded image, bump above the break.
    assert!(t.core.exec.brk_base >= 0x2800);
    assert_eq!(t.core.exec.brk_current, t.core.exec.brk_base);
    assert!(t.m.memory.mmap_address() >= t.core.exec.brk_base + emu::BRK_MAX);
    // Registers were cleared apart from SP.
    assert_eq!(t.m.cpu.reg(REG_A0), 0);
    assert_ne!(t.m.cpu.reg(REG_SP), 0);
}

#[test]
fn execve_shebang_rewrites_argv() {
    let mut t = dynamic_env();
    // The interpreter is the loaded binary itself, so the script takes
    // the restart path and we can inspect the rebuilt argv.
    t.core
        .fs
        .add_virtual_file("/bin/sh", b"not-an-elf-but-loaded".to_vec());
    t.core
        .fs
        .add_virtual_file("/usr/bin/tool.sh", b"#!/bin/sh -e\necho hi\n".to_vec());
    let path = put_cstr(&mut t, 0x1000, "/usr/bin/tool.sh");
    let argv = put_argv(&mut t, &[("tool.sh", 0x1100), ("arg1", 0x1180)], 0x2000);

    ecall(&mut t, nr::EXECVE, &[path, argv, 0]);

    let sp = t.m.cpu.reg(REG_SP);
    assert_eq!(t.m.memory.read_u64(sp).unwrap(), 4); // sh, -e, script, arg1
    let read_arg = |t: &TestEnv, i: u64| {
        let p = t.m.memory.read_u64(sp + 8 + i * 8).unwrap();
        t.m.memory.memstring(p).unwrap()
    };
    assert_eq!(read_arg(&t, 0), "/bin/sh");
    assert_eq!(read_arg(&t, 1), "-e");
    assert_eq!(read_arg(&t, 2), "/usr/bin/tool.sh");
    assert_eq!(read_arg(&t, 3), "arg1");
}

#[test]
fn execve_env_shebang_searches_path() {
    let mut t = dynamic_env();
    t.core
        .fs
        .add_virtual_file("/bin/tool", b"not-an-elf-but-loaded".to_vec());
    t.core
        .fs
        .add_virtual_file("/srv/run.sh", b"#!/usr/bin/env tool\n".to_vec());
    let path = put_cstr(&mut t, 0x1000, "/srv/run.sh");
    let argv = put_argv(&mut t, &[("run.sh", 0x1100)], 0x2000);

    ecall(&mut t, nr::EXECVE, &[path, argv, 0]);

    let sp = t.m.cpu.reg(REG_SP);
    assert_eq!(t.m.memory.read_u64(sp).unwrap(), 2);
    let argv0 = t.m.memory.read_u64(sp + 8).unwrap();
    // env itself is gone; the PATH hit leads.
    assert_eq!(t.m.memory.memstring(argv0).unwrap(), "/bin/tool");
}
