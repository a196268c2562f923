//! RV64 ELF inspection.
//!
//! Parses the fields the loader and the execve pipeline need: executable
//! kind, entry point, program-header table address, `PT_INTERP` payload
//! and the `PT_LOAD` layout. Segment bytes are copied into the guest
//! arena by the caller; this crate never touches guest memory.

use goblin::elf::header::{EM_RISCV, ET_DYN, ET_EXEC};
use goblin::elf::program_header::{PF_W, PT_INTERP, PT_LOAD, PT_PHDR};
use goblin::elf::Elf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ElfError {
    #[error("not an ELF file")]
    NotElf,
    #[error("not a 64-bit ELF")]
    Not64Bit,
    #[error("not a RISC-V binary (e_machine={0:#x})")]
    WrongMachine(u16),
    #[error("unsupported ELF type {0:#x}")]
    WrongType(u16),
    #[error("malformed ELF: {0}")]
    Malformed(String),
}

impl From<goblin::error::Error> for ElfError {
    fn from(e: goblin::error::Error) -> Self {
        ElfError::Malformed(e.to_string())
    }
}

/// Fixed executable vs position-independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfKind {
    Exec,
    Dyn,
}

/// One PT_LOAD entry.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub vaddr: u64,
    pub memsz: u64,
    pub filesz: u64,
    pub offset: u64,
    pub flags: u32,
}

impl Segment {
    pub fn is_writable(&self) -> bool {
        self.flags & PF_W != 0
    }
}

/// Everything the personality needs to know about one binary.
#[derive(Debug, Clone)]
pub struct ElfImage {
    pub kind: ElfKind,
    pub entry: u64,
    /// Virtual address of the program-header table (pre-relocation).
    pub phdr_vaddr: u64,
    pub phent: u64,
    pub phnum: u64,
    pub interpreter: Option<String>,
    pub segments: Vec<Segment>,
}

impl ElfImage {
    pub fn parse(bytes: &[u8]) -> Result<ElfImage, ElfError> {
        if bytes.len() < 64 || &bytes[0..4] != b"\x7fELF" {
            return Err(ElfError::NotElf);
        }
        if bytes[4] != 2 {
            return Err(ElfError::Not64Bit);
        }
        let elf = Elf::parse(bytes)?;
        if elf.header.e_machine != EM_RISCV {
            return Err(ElfError::WrongMachine(elf.header.e_machine));
        }
        let kind = match elf.header.e_type {
            ET_EXEC => ElfKind::Exec,
            ET_DYN => ElfKind::Dyn,
            other => return Err(ElfError::WrongType(other)),
        };

        let segments: Vec<Segment> = elf
            .program_headers
            .iter()
            .filter(|ph| ph.p_type == PT_LOAD)
            .map(|ph| Segment {
                vaddr: ph.p_vaddr,
                memsz: ph.p_memsz,
                filesz: ph.p_filesz,
                offset: ph.p_offset,
                flags: ph.p_flags,
            })
            .collect();
        if segments.is_empty() {
            return Err(ElfError::Malformed("no PT_LOAD segments".into()));
        }

        // PT_PHDR when present; otherwise derive from the segment that
        // maps the header (its file offset 0 page covers e_phoff).
        let phdr_vaddr = elf
            .program_headers
            .iter()
            .find(|ph| ph.p_type == PT_PHDR)
            .map(|ph| ph.p_vaddr)
            .or_else(|| {
                elf.program_headers
                    .iter()
                    .filter(|ph| ph.p_type == PT_LOAD)
                    .find(|ph| {
                        elf.header.e_phoff >= ph.p_offset
                            && elf.header.e_phoff < ph.p_offset + ph.p_filesz
                    })
                    .map(|ph| ph.p_vaddr + (elf.header.e_phoff - ph.p_offset))
            })
            .unwrap_or(elf.header.e_phoff);

        let interpreter = elf
            .program_headers
            .iter()
            .find(|ph| ph.p_type == PT_INTERP)
            .and_then(|ph| {
                let start = ph.p_offset as usize;
                let end = start.checked_add(ph.p_filesz as usize)?;
                let raw = bytes.get(start..end)?;
                let nul = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                Some(String::from_utf8_lossy(&raw[..nul]).into_owned())
            });

        Ok(ElfImage {
            kind,
            entry: elf.header.e_entry,
            phdr_vaddr,
            phent: elf.header.e_phentsize as u64,
            phnum: elf.header.e_phnum as u64,
            interpreter,
            segments,
        })
    }

    /// Needs the dynamic linker at runtime.
    pub fn is_dynamic(&self) -> bool {
        self.interpreter.is_some()
    }

    /// Lowest..highest virtual address across all PT_LOAD segments.
    pub fn load_range(&self) -> (u64, u64) {
        let lo = self.segments.iter().map(|s| s.vaddr).min().unwrap_or(0);
        let hi = self
            .segments
            .iter()
            .map(|s| s.vaddr + s.memsz)
            .max()
            .unwrap_or(0);
        (lo, hi)
    }

    /// Same, restricted to PF_W segments. (0, 0) when nothing is writable.
    pub fn writable_range(&self) -> (u64, u64) {
        let writable = self.segments.iter().filter(|s| s.is_writable());
        let lo = writable.clone().map(|s| s.vaddr).min().unwrap_or(0);
        let hi = writable.map(|s| s.vaddr + s.memsz).max().unwrap_or(0);
        (lo, hi)
    }
}

/// Quick check used before full parsing: RV64 ELF magic + machine.
pub fn looks_like_rv64_elf(bytes: &[u8]) -> bool {
    bytes.len() >= 64
        && &bytes[0..4] == b"\x7fELF"
        && bytes[4] == 2
        && u16::from_le_bytes([bytes[18], bytes[19]]) == EM_RISCV
}
