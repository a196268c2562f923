//! Program bring-up: place the main binary (and its interpreter) in the
//! arena, carve out the heap and mmap territory, and build the first
//! stack. The execve pipeline reuses `load_segments` to overwrite the
//! layout in place.

use anyhow::{bail, Context, Result};
use elf::{ElfImage, ElfKind};
use log::{debug, warn};
use machine::{Machine, MachineException, PageAttributes, PAGE_SIZE, REG_SP};
use rand::Rng;

use crate::proc::EmuCore;
use crate::{auxv, HEAP_SIZE, INTERP_BASE, PIE_BASE};

pub fn page_up(v: u64) -> u64 {
    (v + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Copy every PT_LOAD segment into the arena at `vaddr + delta`. Pages
/// are made writable for the copy; execute stays implicit (fetch allows
/// readable pages), so no attrs are tightened afterwards.
pub fn load_segments(
    m: &mut Machine,
    bytes: &[u8],
    image: &ElfImage,
    delta: u64,
) -> Result<(), MachineException> {
    for seg in &image.segments {
        let dest = seg.vaddr.wrapping_add(delta);
        m.memory.set_page_attr(dest, seg.memsz, PageAttributes::rw());
        m.memory.memdiscard(dest, seg.memsz);
        let start = seg.offset as usize;
        let end = start + seg.filesz as usize;
        if end > bytes.len() {
            return Err(MachineException::oob(dest, "segment past end of file"));
        }
        m.memory.memcpy(dest, &bytes[start..end])?;
    }
    Ok(())
}

/// Relocation delta for placing `image` at `base` (identity for fixed
/// executables).
pub fn load_delta(image: &ElfImage, base: u64) -> u64 {
    match image.kind {
        ElfKind::Dyn => base.wrapping_sub(image.load_range().0),
        ElfKind::Exec => 0,
    }
}

/// First load of the entry binary. Fills `core.exec`, lays out heap and
/// mmap territory, builds the stack and points the CPU at the entry.
pub fn boot(
    m: &mut Machine,
    core: &mut EmuCore,
    binary: Vec<u8>,
    args: Vec<String>,
    env: Vec<String>,
) -> Result<()> {
    let image = ElfImage::parse(&binary).context("parsing entry binary")?;

    let delta = load_delta(&image, PIE_BASE);
    let (lo, hi) = image.load_range();
    let load_end = hi.wrapping_add(delta);
    if load_end >= m.memory.size() {
        bail!("binary does not fit the guest arena ({:#x} bytes)", m.memory.size());
    }

    // Catch null dereferences early.
    m.memory.set_page_attr(0, PAGE_SIZE, PageAttributes::none());

    load_segments(m, &binary, &image, delta).context("loading segments")?;

    let (rw_lo, rw_hi) = image.writable_range();
    core.exec.exec_base = if image.kind == ElfKind::Dyn { PIE_BASE } else { lo };
    core.exec.exec_rw_start = rw_lo.wrapping_add(delta);
    core.exec.exec_rw_end = rw_hi.wrapping_add(delta);
    core.exec.entry = image.entry.wrapping_add(delta);
    core.exec.phdr_vaddr = image.phdr_vaddr.wrapping_add(delta);
    core.exec.phent = image.phent;
    core.exec.phnum = image.phnum;

    // Heap right after the binary, carved off the allocation frontier;
    // the brk handler clamps inside it.
    m.memory.set_mmap_start(page_up(load_end.max(PIE_BASE)));
    let heap_start = m.memory.mmap_allocate(HEAP_SIZE);
    m.memory.set_heap(heap_start, HEAP_SIZE);
    core.exec.heap_start = m.memory.heap_address();
    core.exec.heap_size = HEAP_SIZE;
    core.exec.brk_base = heap_start;
    core.exec.brk_current = heap_start;

    // Interpreter, when the binary asks for one and the rootfs has it.
    let mut interp_end = 0u64;
    core.exec.dynamic = false;
    if let Some(interp_path) = image.interpreter.clone() {
        let resolved = core.resolve_path(&interp_path);
        match core.fs.read_file(&resolved) {
            Ok(interp_bytes) if !interp_bytes.is_empty() => {
                let interp = ElfImage::parse(&interp_bytes).context("parsing interpreter")?;
                let (ilo, ihi) = interp.load_range();
                let idelta = INTERP_BASE.wrapping_sub(ilo);
                load_segments(m, &interp_bytes, &interp, idelta)
                    .context("loading interpreter")?;
                let (irw_lo, irw_hi) = interp.writable_range();
                core.exec.interp_base = INTERP_BASE;
                core.exec.interp_entry = interp.entry.wrapping_add(idelta);
                core.exec.interp_rw_start = irw_lo.wrapping_add(idelta);
                core.exec.interp_rw_end = irw_hi.wrapping_add(idelta);
                core.exec.interp_binary = interp_bytes;
                core.exec.dynamic = true;
                interp_end = ihi.wrapping_add(idelta);
                debug!(
                    "interpreter {} at {:#x}, entry {:#x}",
                    interp_path, INTERP_BASE, core.exec.interp_entry
                );
            }
            _ => {
                warn!("interpreter {} not found, running as static", interp_path);
            }
        }
    }

    // Anonymous mmap starts above the heap and above the interpreter so
    // bump allocations never land inside loaded images.
    let mmap_start = page_up((heap_start + HEAP_SIZE).max(interp_end).max(load_end));
    m.memory.set_mmap_start(mmap_start);

    let stack_top = m.memory.size() - PAGE_SIZE;
    core.exec.original_stack_top = stack_top;
    core.exec.exec_binary = binary;
    core.exec.env = env;

    let random: [u8; 16] = core.rng.gen();
    let sp = auxv::setup_stack(m, &core.exec, &args, &core.exec.env.clone(), stack_top, random)
        .context("building initial stack")?;

    m.cpu.set_reg(REG_SP, sp);
    let target = if core.exec.dynamic {
        core.exec.interp_entry
    } else {
        core.exec.entry
    };
    m.cpu.jump(target);
    debug!(
        "boot: entry {:#x} sp {:#x} heap {:#x} mmap {:#x}",
        target, sp, heap_start, mmap_start
    );
    Ok(())
}
