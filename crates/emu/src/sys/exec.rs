//! execve: replace the running program inside the live arena.
//!
//! Busybox applets re-enter the already-loaded binary with a fresh
//! stack; anything else is loaded over the old image after a decoder
//! cache eviction, with the interpreter reloaded at its existing base
//! (PIC makes that legal) and the break and stack rebuilt above the new
//! layout. Partially-loaded leftovers after a failure are tolerated:
//! bump addresses never recycle.

use elf::{looks_like_rv64_elf, ElfImage, ElfKind};
use log::{debug, info, warn};
use machine::{Machine, PageAttributes, REG_SP};
use rand::Rng;

use super::{errno, memstr};
use crate::loader::{load_delta, load_segments, page_up};
use crate::proc::EmuCore;
use crate::{auxv, BRK_MAX, EXEC_STACK_SIZE, PIE_BASE};

pub fn sys_execve(m: &mut Machine, core: &mut EmuCore) {
    // Without a dynamic container layout there is no interpreter entry
    // to restart through.
    if !core.exec.dynamic || core.exec.exec_binary.is_empty() {
        m.set_result(errno::ENOSYS);
        return;
    }

    let Some(path) = memstr(m, 0) else { return };
    let argv_addr = m.sysarg(1);

    let mut resolved = core.resolve_path(&path);
    if resolved.is_empty() {
        m.set_result(errno::ENOENT);
        return;
    }

    let mut args = Vec::new();
    for i in 0..256u64 {
        let Ok(ptr) = m.memory.read_u64(argv_addr + i * 8) else {
            m.set_result(errno::EFAULT);
            return;
        };
        if ptr == 0 {
            break;
        }
        let Ok(arg) = m.memory.memstring(ptr) else {
            m.set_result(errno::EFAULT);
            return;
        };
        args.push(arg);
    }
    if args.is_empty() {
        args.push(path.clone());
    }

    if let Some(new_resolved) = rewrite_shebang(core, &resolved, &mut args) {
        if new_resolved.is_empty() {
            m.set_result(errno::ENOENT);
            return;
        }
        resolved = new_resolved;
    }

    let new_binary = core.fs.read_file(&resolved).unwrap_or_default();
    let is_new_elf = looks_like_rv64_elf(&new_binary);

    if is_new_elf && new_binary != core.exec.exec_binary {
        load_new_binary(m, core, resolved, new_binary, args);
        return;
    }

    // Same binary (busybox applet) or a non-ELF target: rebuild the
    // stack with the new argv and restart through the interpreter.
    let env = core.exec.env.clone();
    let random: [u8; 16] = core.rng.gen();
    let sp = match auxv::setup_stack(
        m,
        &core.exec,
        &args,
        &env,
        core.exec.original_stack_top,
        random,
    ) {
        Ok(sp) => sp,
        Err(_) => {
            m.set_result(errno::ENOEXEC);
            return;
        }
    };
    m.cpu.restore_regs(&[0u64; 32]);
    m.cpu.set_reg(REG_SP, sp);
    m.cpu.jump(core.exec.interp_entry);
    debug!("execve restart: {} argv0={}", resolved, args[0]);
}

/// If the target starts with "#!", rewrite argv to run the interpreter
/// and return the interpreter's resolved path (empty when dangling).
/// Returns None when the target has no shebang.
fn rewrite_shebang(core: &mut EmuCore, resolved: &str, args: &mut Vec<String>) -> Option<String> {
    let node = core.fs.resolve(resolved)?;
    let head: Vec<u8> = {
        let n = node.borrow();
        if n.content.len() < 4 || &n.content[0..2] != b"#!" {
            return None;
        }
        n.content.iter().take(256).copied().collect()
    };
    let line_end = head
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or(head.len());
    let line = String::from_utf8_lossy(&head[2..line_end]).into_owned();
    // Trailing whitespace (including a stray CR) is trimmed; an
    // interior CR stays part of the path.
    let line = line.trim_start().trim_end_matches([' ', '\t', '\r']);

    let (interp_path, interp_arg) = match line.find([' ', '\t']) {
        Some(pos) => {
            let (p, rest) = line.split_at(pos);
            (p.to_string(), {
                let rest = rest.trim();
                if rest.is_empty() {
                    None
                } else {
                    Some(rest.to_string())
                }
            })
        }
        None => (line.to_string(), None),
    };

    let mut new_args = vec![interp_path.clone()];
    if let Some(arg) = interp_arg {
        new_args.push(arg);
    }
    new_args.push(resolved.to_string());
    new_args.extend(args.iter().skip(1).cloned());
    *args = new_args;

    // "#!/usr/bin/env CMD": PATH-search CMD and drop env itself.
    if interp_path == "/usr/bin/env" && args.len() >= 2 {
        let cmd = args[1].clone();
        let found = core.search_path(&cmd);
        if !found.is_empty() {
            args[0] = found.clone();
            args.remove(1);
            return Some(core.resolve_path(&found));
        }
    }
    Some(core.resolve_path(&interp_path))
}

fn load_new_binary(
    m: &mut Machine,
    core: &mut EmuCore,
    resolved: String,
    new_binary: Vec<u8>,
    args: Vec<String>,
) {
    let image = match ElfImage::parse(&new_binary) {
        Ok(image) => image,
        Err(e) => {
            warn!("execve: cannot parse {}: {}", resolved, e);
            m.set_result(errno::ENOEXEC);
            return;
        }
    };
    info!("execve: loading {} ({} bytes)", resolved, new_binary.len());

    let delta = load_delta(&image, PIE_BASE);
    let (lo, hi) = image.load_range();
    let load_end = hi.wrapping_add(delta);
    if load_end >= m.memory.size() {
        warn!(
            "execve: {} needs {:#x}, arena is {:#x}",
            resolved,
            load_end,
            m.memory.size()
        );
        m.set_result(errno::ENOMEM);
        return;
    }

    // Stale decoded instructions from the old image must never execute.
    m.memory.evict_execute_segments();

    // Old image pages become plain memory before the overwrite.
    if let Ok(old) = ElfImage::parse(&core.exec.exec_binary.clone()) {
        let old_delta = load_delta(&old, PIE_BASE);
        let (old_lo, old_hi) = old.load_range();
        m.memory.set_page_attr(
            old_lo.wrapping_add(old_delta),
            old_hi - old_lo,
            PageAttributes::rw(),
        );
    }

    if let Err(e) = load_segments(m, &new_binary, &image, delta) {
        warn!("execve: loading {} failed: {}", resolved, e);
        m.set_result(errno::ENOEXEC);
        return;
    }

    core.exec.exec_base = if image.kind == ElfKind::Dyn { PIE_BASE } else { lo };
    let (rw_lo, rw_hi) = image.writable_range();
    core.exec.exec_rw_start = rw_lo.wrapping_add(delta);
    core.exec.exec_rw_end = rw_hi.wrapping_add(delta);
    core.exec.entry = image.entry.wrapping_add(delta);
    core.exec.phdr_vaddr = image.phdr_vaddr.wrapping_add(delta);
    core.exec.phent = image.phent;
    core.exec.phnum = image.phnum;

    // Interpreter: reload at the previous base so PIC code lands where
    // the arena already has room carved out.
    let mut interp_end = 0u64;
    if let Some(interp_path) = image.interpreter.clone() {
        let interp_resolved = core.resolve_path(&interp_path);
        let interp_bytes = core.fs.read_file(&interp_resolved).unwrap_or_default();
        if interp_bytes.is_empty() {
            warn!("execve: interpreter {} not found", interp_path);
            m.set_result(errno::ENOENT);
            return;
        }
        let interp = match ElfImage::parse(&interp_bytes) {
            Ok(i) => i,
            Err(_) => {
                m.set_result(errno::ENOEXEC);
                return;
            }
        };
        let base = core.exec.interp_base;
        let (ilo, ihi) = interp.load_range();

        // Writable before overwrite; the old interpreter lived here.
        if let Ok(old_interp) = ElfImage::parse(&core.exec.interp_binary.clone()) {
            let (olo, ohi) = old_interp.load_range();
            m.memory
                .set_page_attr(base, ohi - olo, PageAttributes::rw());
        }

        let idelta = base.wrapping_sub(ilo);
        if load_segments(m, &interp_bytes, &interp, idelta).is_err() {
            m.set_result(errno::ENOEXEC);
            return;
        }
        core.exec.interp_entry = interp.entry.wrapping_add(idelta);
        let (irw_lo, irw_hi) = interp.writable_range();
        core.exec.interp_rw_start = irw_lo.wrapping_add(idelta);
        core.exec.interp_rw_end = irw_hi.wrapping_add(idelta);
        core.exec.interp_binary = interp_bytes;
        interp_end = ihi.wrapping_add(idelta);
        core.exec.dynamic = true;
    } else {
        core.exec.dynamic = false;
    }

    // Break bookkeeping rooted above everything just loaded. Without
    // this, brk would hand out addresses inside the new text segment.
    let brk_base = page_up(load_end.max(interp_end));
    core.exec.brk_base = brk_base;
    core.exec.brk_current = brk_base;
    core.exec.brk_overridden = true;
    m.memory
        .set_page_attr(brk_base, BRK_MAX, PageAttributes::rw());
    let min_bump = brk_base + BRK_MAX;
    if m.memory.mmap_address() < min_bump {
        m.memory.set_mmap_address(min_bump);
    }

    // Fresh stack above the bump so brk and malloc cannot clobber it.
    let mut stack_top = m.memory.mmap_address() + EXEC_STACK_SIZE;
    if stack_top >= m.memory.size() {
        stack_top = core.exec.interp_base.saturating_sub(0x1000);
    }
    m.memory.set_page_attr(
        stack_top - EXEC_STACK_SIZE,
        EXEC_STACK_SIZE,
        PageAttributes::rw(),
    );
    if m.memory.mmap_address() < stack_top + machine::PAGE_SIZE {
        m.memory.set_mmap_address(stack_top + machine::PAGE_SIZE);
    }
    core.exec.original_stack_top = stack_top;
    core.exec.exec_binary = new_binary;
    debug!(
        "execve layout: brk={:#x} mmap={:#x} stack={:#x}",
        brk_base,
        m.memory.mmap_address(),
        stack_top
    );

    let env = core.exec.env.clone();
    let random: [u8; 16] = core.rng.gen();
    let sp = match auxv::setup_stack(m, &core.exec, &args, &env, stack_top, random) {
        Ok(sp) => sp,
        Err(e) => {
            warn!("execve: stack build failed: {}", e);
            m.set_result(errno::ENOEXEC);
            return;
        }
    };

    m.cpu.restore_regs(&[0u64; 32]);
    m.cpu.set_reg(REG_SP, sp);
    let target = if core.exec.dynamic {
        core.exec.interp_entry
    } else {
        core.exec.entry
    };
    m.cpu.jump(target);
    info!("execve: jumping to {:#x}", target);

    // Stop so the run loop re-enters the engine with clean caches
    // instead of letting it fetch through freed decode state.
    core.execve_restart = true;
    m.stop();
}
