//! Memory-management syscall behavior: bump allocation, hint rules,
//! munmap zeroing, brk clamping.

mod common;

use common::{ecall, env_with_layout, get_bytes, TestEnv};
use emu::sys::nr;
use emu::BRK_MAX;
use proptest::prelude::*;

const MAP_PRIVATE_ANON: u64 = 0x22;
const MAP_FIXED: u64 = 0x10;
const PROT_RW: u64 = 3;
const FD_NONE: u64 = (-1i64) as u64;

fn mmap_anon(t: &mut TestEnv, hint: u64, len: u64, flags: u64) -> i64 {
    ecall(t, nr::MMAP, &[hint, len, PROT_RW, flags, FD_NONE, 0])
}

#[test]
fn zero_length_mmap_is_einval() {
    let mut t = env_with_layout();
    assert_eq!(mmap_anon(&mut t, 0, 0, MAP_PRIVATE_ANON), -22);
}

#[test]
fn bump_allocations_are_page_aligned_and_monotone() {
    let mut t = env_with_layout();
    let a = mmap_anon(&mut t, 0, 100, MAP_PRIVATE_ANON);
    let b = mmap_anon(&mut t, 0, 5000, MAP_PRIVATE_ANON);
    let c = mmap_anon(&mut t, 0, 4096, MAP_PRIVATE_ANON);
    assert_eq!(a as u64, 0x40_0000);
    assert_eq!(b as u64, 0x40_1000);
    assert_eq!(c as u64, 0x40_3000);
    assert_eq!(t.m.memory.mmap_address(), 0x40_4000);
}

#[test]
fn map_fixed_returns_the_hint() {
    let mut t = env_with_layout();
    let addr = 0x50_0000u64;
    let got = mmap_anon(&mut t, addr, 8192, MAP_PRIVATE_ANON | MAP_FIXED);
    assert_eq!(got as u64, addr);
}

#[test]
fn map_fixed_outside_arena_is_enomem() {
    let mut t = env_with_layout();
    let limit = t.m.memory.size();
    assert_eq!(
        mmap_anon(&mut t, limit - 4096, 8192, MAP_PRIVATE_ANON | MAP_FIXED),
        -12
    );
}

#[test]
fn large_out_of_arena_hint_is_refused_small_is_ignored() {
    let mut t = env_with_layout();
    let limit = t.m.memory.size();

    // Go-style huge reservation hint: refused so the caller falls back.
    assert_eq!(
        mmap_anon(&mut t, limit + 0x1000, 8 << 20, MAP_PRIVATE_ANON),
        -12
    );

    // Small out-of-arena hint: ignored, served at the bump.
    let got = mmap_anon(&mut t, limit + 0x1000, 4096, MAP_PRIVATE_ANON);
    assert_eq!(got as u64, 0x40_0000);
}

#[test]
fn munmap_zeroes_and_remap_reads_zero() {
    let mut t = env_with_layout();
    let addr = mmap_anon(&mut t, 0, 4096, MAP_PRIVATE_ANON) as u64;
    t.m.memory.memcpy(addr, b"secret").unwrap();
    assert_eq!(ecall(&mut t, nr::MUNMAP, &[addr, 4096]), 0);
    assert_eq!(get_bytes(&t, addr, 6), vec![0u8; 6]);

    // A later MAP_FIXED over the same range still reads zero.
    let again = mmap_anon(&mut t, addr, 4096, MAP_PRIVATE_ANON | MAP_FIXED) as u64;
    assert_eq!(again, addr);
    assert_eq!(get_bytes(&t, again, 6), vec![0u8; 6]);
}

#[test]
fn map_fixed_evicts_decoded_code() {
    let mut t = env_with_layout();
    let g0 = t.m.memory.evict_generation();
    mmap_anon(&mut t, 0x50_0000, 4096, MAP_PRIVATE_ANON | MAP_FIXED);
    assert!(t.m.memory.evict_generation() > g0);
    // Plain bump allocations do not.
    let g1 = t.m.memory.evict_generation();
    mmap_anon(&mut t, 0, 4096, MAP_PRIVATE_ANON);
    assert_eq!(t.m.memory.evict_generation(), g1);
}

#[test]
fn brk_clamps_to_cap_and_reports_current() {
    let mut t = env_with_layout();
    let base = t.core.exec.brk_base;

    // Query.
    assert_eq!(ecall(&mut t, nr::BRK, &[0]) as u64, base);
    // Grow.
    let grown = ecall(&mut t, nr::BRK, &[base + 0x10000]) as u64;
    assert_eq!(grown, base + 0x10000);
    // Past the cap: clamped.
    let clamped = ecall(&mut t, nr::BRK, &[base + BRK_MAX + 0x1000]) as u64;
    assert_eq!(clamped, base + BRK_MAX);
    // Below base: reports current.
    assert_eq!(ecall(&mut t, nr::BRK, &[base - 1]) as u64, base + BRK_MAX);
}

#[test]
fn mprotect_below_mmap_region_is_a_noop() {
    let mut t = env_with_layout();
    let code = 0x10_0000u64; // below mmap_start
    t.m.memory.memcpy(code, b"text").unwrap();
    // RELRO-style read-only request is swallowed.
    assert_eq!(ecall(&mut t, nr::MPROTECT, &[code, 4096, 1]), 0);
    assert!(t.m.memory.memcpy(code, b"still writable").is_ok());
}

#[test]
fn mprotect_inside_mmap_region_applies_verbatim() {
    let mut t = env_with_layout();
    let addr = mmap_anon(&mut t, 0, 4096, MAP_PRIVATE_ANON) as u64;
    assert_eq!(ecall(&mut t, nr::MPROTECT, &[addr, 4096, 0]), 0); // PROT_NONE
    assert!(t.m.memory.read_u8(addr).is_err());
    assert_eq!(ecall(&mut t, nr::MPROTECT, &[addr, 4096, 3]), 0);
    assert!(t.m.memory.read_u8(addr).is_ok());
}

#[test]
fn mremap_is_efault_outside_arena_enomem_inside() {
    let mut t = env_with_layout();
    let limit = t.m.memory.size();
    assert_eq!(ecall(&mut t, nr::MREMAP, &[limit + 1, 4096, 8192]), -14);
    assert_eq!(ecall(&mut t, nr::MREMAP, &[0x40_0000, 4096, 8192]), -12);
}

proptest! {
    /// The bump frontier never moves backwards over any sequence of
    /// anonymous allocations, and every non-FIXED result is fresh
    /// territory at or above the old frontier.
    #[test]
    fn bump_frontier_is_monotone(sizes in prop::collection::vec(1u64..256 * 1024, 1..40)) {
        let mut t = env_with_layout();
        let mut last_frontier = t.m.memory.mmap_address();
        for size in sizes {
            let before = t.m.memory.mmap_address();
            let got = mmap_anon(&mut t, 0, size, MAP_PRIVATE_ANON);
            if got >= 0 {
                prop_assert!(got as u64 >= last_frontier);
                prop_assert!(t.m.memory.mmap_address() >= before);
                last_frontier = t.m.memory.mmap_address();
            } else {
                // Only legitimate failure is arena exhaustion.
                prop_assert_eq!(got, -12);
            }
        }
    }
}
