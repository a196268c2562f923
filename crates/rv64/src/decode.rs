//! RV64 instruction decoding.
//!
//! Compressed (16-bit) forms are expanded to their base-ISA equivalents
//! at decode time so the executor only deals with full operations. The
//! decoded form is a flat record rather than a variant-per-instruction
//! enum; at this instruction count the flat shape keeps both the decoder
//! and the executor readable.

/// Operations after compressed expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Lui,
    Auipc,
    Jal,
    Jalr,
    Beq,
    Bne,
    Blt,
    Bge,
    Bltu,
    Bgeu,
    Lb,
    Lh,
    Lw,
    Ld,
    Lbu,
    Lhu,
    Lwu,
    Sb,
    Sh,
    Sw,
    Sd,
    Addi,
    Slti,
    Sltiu,
    Xori,
    Ori,
    Andi,
    Slli,
    Srli,
    Srai,
    Addiw,
    Slliw,
    Srliw,
    Sraiw,
    Add,
    Sub,
    Sll,
    Slt,
    Sltu,
    Xor,
    Srl,
    Sra,
    Or,
    And,
    Addw,
    Subw,
    Sllw,
    Srlw,
    Sraw,
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
    Mulw,
    Divw,
    Divuw,
    Remw,
    Remuw,
    LrW,
    ScW,
    AmoswapW,
    AmoaddW,
    AmoxorW,
    AmoandW,
    AmoorW,
    AmominW,
    AmomaxW,
    AmominuW,
    AmomaxuW,
    LrD,
    ScD,
    AmoswapD,
    AmoaddD,
    AmoxorD,
    AmoandD,
    AmoorD,
    AmominD,
    AmomaxD,
    AmominuD,
    AmomaxuD,
    Fence,
    FenceI,
    Ecall,
    Ebreak,
    Csrrw,
    Csrrs,
    Csrrc,
    Csrrwi,
    Csrrsi,
    Csrrci,
    // F/D subset: loads/stores, moves, conversions, arithmetic, compares.
    Flw,
    Fld,
    Fsw,
    Fsd,
    FaddS,
    FsubS,
    FmulS,
    FdivS,
    FsqrtS,
    FaddD,
    FsubD,
    FmulD,
    FdivD,
    FsqrtD,
    FsgnjS,
    FsgnjnS,
    FsgnjxS,
    FsgnjD,
    FsgnjnD,
    FsgnjxD,
    FminS,
    FmaxS,
    FminD,
    FmaxD,
    FcvtSD,
    FcvtDS,
    FeqS,
    FltS,
    FleS,
    FeqD,
    FltD,
    FleD,
    FcvtWS,
    FcvtWuS,
    FcvtLS,
    FcvtLuS,
    FcvtWD,
    FcvtWuD,
    FcvtLD,
    FcvtLuD,
    FcvtSW,
    FcvtSWu,
    FcvtSL,
    FcvtSLu,
    FcvtDW,
    FcvtDWu,
    FcvtDL,
    FcvtDLu,
    FmvXW,
    FmvWX,
    FmvXD,
    FmvDX,
    FclassS,
    FclassD,
    FmaddS,
    FmsubS,
    FnmsubS,
    FnmaddS,
    FmaddD,
    FmsubD,
    FnmsubD,
    FnmaddD,
    /// Explicit zero word / unimplemented marker.
    Unimp,
}

/// One decoded instruction: flat fields, `len` is 2 or 4.
#[derive(Debug, Clone, Copy)]
pub struct Insn {
    pub op: Op,
    pub rd: usize,
    pub rs1: usize,
    pub rs2: usize,
    pub rs3: usize,
    pub imm: i64,
    pub len: u8,
}

impl Insn {
    fn new(op: Op) -> Self {
        Insn { op, rd: 0, rs1: 0, rs2: 0, rs3: 0, imm: 0, len: 4 }
    }

    fn r(op: Op, rd: usize, rs1: usize, rs2: usize) -> Self {
        Insn { op, rd, rs1, rs2, rs3: 0, imm: 0, len: 4 }
    }

    fn i(op: Op, rd: usize, rs1: usize, imm: i64) -> Self {
        Insn { op, rd, rs1, rs2: 0, rs3: 0, imm, len: 4 }
    }

    fn s(op: Op, rs1: usize, rs2: usize, imm: i64) -> Self {
        Insn { op, rd: 0, rs1, rs2, rs3: 0, imm, len: 4 }
    }

    fn compressed(mut self) -> Self {
        self.len = 2;
        self
    }
}

/// Decode the instruction starting with `word` (little-endian bytes from
/// the guest). Returns `None` for encodings outside the supported set.
pub fn decode(word: u32) -> Option<Insn> {
    if word & 0b11 != 0b11 {
        decode_compressed(word as u16)
    } else {
        decode_full(word)
    }
}

fn decode_full(word: u32) -> Option<Insn> {
    let opcode = word & 0x7f;
    let rd = ((word >> 7) & 0x1f) as usize;
    let funct3 = (word >> 12) & 0x7;
    let rs1 = ((word >> 15) & 0x1f) as usize;
    let rs2 = ((word >> 20) & 0x1f) as usize;
    let funct7 = (word >> 25) & 0x7f;

    match opcode {
        0x37 => Some(Insn::i(Op::Lui, rd, 0, (word & 0xffff_f000) as i32 as i64)),
        0x17 => Some(Insn::i(Op::Auipc, rd, 0, (word & 0xffff_f000) as i32 as i64)),
        0x6f => Some(Insn::i(Op::Jal, rd, 0, j_imm(word))),
        0x67 => Some(Insn::i(Op::Jalr, rd, rs1, i_imm(word))),
        0x63 => {
            let op = match funct3 {
                0 => Op::Beq,
                1 => Op::Bne,
                4 => Op::Blt,
                5 => Op::Bge,
                6 => Op::Bltu,
                7 => Op::Bgeu,
                _ => return None,
            };
            Some(Insn::s(op, rs1, rs2, b_imm(word)))
        }
        0x03 => {
            let op = match funct3 {
                0 => Op::Lb,
                1 => Op::Lh,
                2 => Op::Lw,
                3 => Op::Ld,
                4 => Op::Lbu,
                5 => Op::Lhu,
                6 => Op::Lwu,
                _ => return None,
            };
            Some(Insn::i(op, rd, rs1, i_imm(word)))
        }
        0x23 => {
            let op = match funct3 {
                0 => Op::Sb,
                1 => Op::Sh,
                2 => Op::Sw,
                3 => Op::Sd,
                _ => return None,
            };
            Some(Insn::s(op, rs1, rs2, s_imm(word)))
        }
        0x13 => {
            // RV64 shifts carry a 6-bit shamt; the discriminator is the
            // top 6 bits, not funct7.
            let shamt = ((word >> 20) & 0x3f) as i64;
            let funct6 = word >> 26;
            let insn = match funct3 {
                0 => Insn::i(Op::Addi, rd, rs1, i_imm(word)),
                1 if funct6 == 0x00 => Insn::i(Op::Slli, rd, rs1, shamt),
                2 => Insn::i(Op::Slti, rd, rs1, i_imm(word)),
                3 => Insn::i(Op::Sltiu, rd, rs1, i_imm(word)),
                4 => Insn::i(Op::Xori, rd, rs1, i_imm(word)),
                5 if funct6 == 0x00 => Insn::i(Op::Srli, rd, rs1, shamt),
                5 if funct6 == 0x10 => Insn::i(Op::Srai, rd, rs1, shamt),
                6 => Insn::i(Op::Ori, rd, rs1, i_imm(word)),
                7 => Insn::i(Op::Andi, rd, rs1, i_imm(word)),
                _ => return None,
            };
            Some(insn)
        }
        0x1b => {
            let shamt = ((word >> 20) & 0x1f) as i64;
            let insn = match funct3 {
                0 => Insn::i(Op::Addiw, rd, rs1, i_imm(word)),
                1 if funct7 == 0x00 => Insn::i(Op::Slliw, rd, rs1, shamt),
                5 if funct7 == 0x00 => Insn::i(Op::Srliw, rd, rs1, shamt),
                5 if funct7 == 0x20 => Insn::i(Op::Sraiw, rd, rs1, shamt),
                _ => return None,
            };
            Some(insn)
        }
        0x33 => {
            let op = match (funct7, funct3) {
                (0x00, 0) => Op::Add,
                (0x20, 0) => Op::Sub,
                (0x00, 1) => Op::Sll,
                (0x00, 2) => Op::Slt,
                (0x00, 3) => Op::Sltu,
                (0x00, 4) => Op::Xor,
                (0x00, 5) => Op::Srl,
                (0x20, 5) => Op::Sra,
                (0x00, 6) => Op::Or,
                (0x00, 7) => Op::And,
                (0x01, 0) => Op::Mul,
                (0x01, 1) => Op::Mulh,
                (0x01, 2) => Op::Mulhsu,
                (0x01, 3) => Op::Mulhu,
                (0x01, 4) => Op::Div,
                (0x01, 5) => Op::Divu,
                (0x01, 6) => Op::Rem,
                (0x01, 7) => Op::Remu,
                _ => return None,
            };
            Some(Insn::r(op, rd, rs1, rs2))
        }
        0x3b => {
            let op = match (funct7, funct3) {
                (0x00, 0) => Op::Addw,
                (0x20, 0) => Op::Subw,
                (0x00, 1) => Op::Sllw,
                (0x00, 5) => Op::Srlw,
                (0x20, 5) => Op::Sraw,
                (0x01, 0) => Op::Mulw,
                (0x01, 4) => Op::Divw,
                (0x01, 5) => Op::Divuw,
                (0x01, 6) => Op::Remw,
                (0x01, 7) => Op::Remuw,
                _ => return None,
            };
            Some(Insn::r(op, rd, rs1, rs2))
        }
        0x0f => {
            if funct3 == 1 {
                Some(Insn::new(Op::FenceI))
            } else {
                Some(Insn::new(Op::Fence))
            }
        }
        0x73 => {
            if word == 0x0000_0073 {
                return Some(Insn::new(Op::Ecall));
            }
            if word == 0x0010_0073 {
                return Some(Insn::new(Op::Ebreak));
            }
            let csr = ((word >> 20) & 0xfff) as i64;
            let op = match funct3 {
                1 => Op::Csrrw,
                2 => Op::Csrrs,
                3 => Op::Csrrc,
                5 => Op::Csrrwi,
                6 => Op::Csrrsi,
                7 => Op::Csrrci,
                _ => return None,
            };
            Some(Insn { op, rd, rs1, rs2: 0, rs3: 0, imm: csr, len: 4 })
        }
        0x2f => {
            let funct5 = funct7 >> 2;
            let op = match (funct3, funct5) {
                (2, 0x02) => Op::LrW,
                (2, 0x03) => Op::ScW,
                (2, 0x01) => Op::AmoswapW,
                (2, 0x00) => Op::AmoaddW,
                (2, 0x04) => Op::AmoxorW,
                (2, 0x0c) => Op::AmoandW,
                (2, 0x08) => Op::AmoorW,
                (2, 0x10) => Op::AmominW,
                (2, 0x14) => Op::AmomaxW,
                (2, 0x18) => Op::AmominuW,
                (2, 0x1c) => Op::AmomaxuW,
                (3, 0x02) => Op::LrD,
                (3, 0x03) => Op::ScD,
                (3, 0x01) => Op::AmoswapD,
                (3, 0x00) => Op::AmoaddD,
                (3, 0x04) => Op::AmoxorD,
                (3, 0x0c) => Op::AmoandD,
                (3, 0x08) => Op::AmoorD,
                (3, 0x10) => Op::AmominD,
                (3, 0x14) => Op::AmomaxD,
                (3, 0x18) => Op::AmominuD,
                (3, 0x1c) => Op::AmomaxuD,
                _ => return None,
            };
            Some(Insn::r(op, rd, rs1, rs2))
        }
        0x07 => {
            let op = match funct3 {
                2 => Op::Flw,
                3 => Op::Fld,
                _ => return None,
            };
            Some(Insn::i(op, rd, rs1, i_imm(word)))
        }
        0x27 => {
            let op = match funct3 {
                2 => Op::Fsw,
                3 => Op::Fsd,
                _ => return None,
            };
            Some(Insn::s(op, rs1, rs2, s_imm(word)))
        }
        0x43 | 0x47 | 0x4b | 0x4f => {
            let rs3 = (word >> 27) as usize;
            let double = funct7 & 0x3 == 1;
            let op = match (opcode, double) {
                (0x43, false) => Op::FmaddS,
                (0x47, false) => Op::FmsubS,
                (0x4b, false) => Op::FnmsubS,
                (0x4f, false) => Op::FnmaddS,
                (0x43, true) => Op::FmaddD,
                (0x47, true) => Op::FmsubD,
                (0x4b, true) => Op::FnmsubD,
                (0x4f, true) => Op::FnmaddD,
                _ => return None,
            };
            Some(Insn { op, rd, rs1, rs2, rs3, imm: 0, len: 4 })
        }
        0x53 => decode_op_fp(word, rd, rs1, rs2, funct3, funct7),
        _ => {
            if word == 0 {
                Some(Insn::new(Op::Unimp))
            } else {
                None
            }
        }
    }
}

fn decode_op_fp(word: u32, rd: usize, rs1: usize, rs2: usize, funct3: u32, funct7: u32) -> Option<Insn> {
    let _ = word;
    let op = match funct7 {
        0x00 => Op::FaddS,
        0x01 => Op::FaddD,
        0x04 => Op::FsubS,
        0x05 => Op::FsubD,
        0x08 => Op::FmulS,
        0x09 => Op::FmulD,
        0x0c => Op::FdivS,
        0x0d => Op::FdivD,
        0x2c => Op::FsqrtS,
        0x2d => Op::FsqrtD,
        0x10 => match funct3 {
            0 => Op::FsgnjS,
            1 => Op::FsgnjnS,
            2 => Op::FsgnjxS,
            _ => return None,
        },
        0x11 => match funct3 {
            0 => Op::FsgnjD,
            1 => Op::FsgnjnD,
            2 => Op::FsgnjxD,
            _ => return None,
        },
        0x14 => match funct3 {
            0 => Op::FminS,
            1 => Op::FmaxS,
            _ => return None,
        },
        0x15 => match funct3 {
            0 => Op::FminD,
            1 => Op::FmaxD,
            _ => return None,
        },
        0x20 => Op::FcvtSD, // rs2 == 1
        0x21 => Op::FcvtDS, // rs2 == 0
        0x50 => match funct3 {
            2 => Op::FeqS,
            1 => Op::FltS,
            0 => Op::FleS,
            _ => return None,
        },
        0x51 => match funct3 {
            2 => Op::FeqD,
            1 => Op::FltD,
            0 => Op::FleD,
            _ => return None,
        },
        0x60 => match rs2 {
            0 => Op::FcvtWS,
            1 => Op::FcvtWuS,
            2 => Op::FcvtLS,
            3 => Op::FcvtLuS,
            _ => return None,
        },
        0x61 => match rs2 {
            0 => Op::FcvtWD,
            1 => Op::FcvtWuD,
            2 => Op::FcvtLD,
            3 => Op::FcvtLuD,
            _ => return None,
        },
        0x68 => match rs2 {
            0 => Op::FcvtSW,
            1 => Op::FcvtSWu,
            2 => Op::FcvtSL,
            3 => Op::FcvtSLu,
            _ => return None,
        },
        0x69 => match rs2 {
            0 => Op::FcvtDW,
            1 => Op::FcvtDWu,
            2 => Op::FcvtDL,
            3 => Op::FcvtDLu,
            _ => return None,
        },
        0x70 => match funct3 {
            0 => Op::FmvXW,
            1 => Op::FclassS,
            _ => return None,
        },
        0x71 => match funct3 {
            0 => Op::FmvXD,
            1 => Op::FclassD,
            _ => return None,
        },
        0x78 => Op::FmvWX,
        0x79 => Op::FmvDX,
        _ => return None,
    };
    Some(Insn::r(op, rd, rs1, rs2))
}

fn decode_compressed(hword: u16) -> Option<Insn> {
    if hword == 0 {
        // All-zero padding decodes as the canonical illegal instruction.
        return Some(Insn::new(Op::Unimp).compressed());
    }
    let word = hword as u32;
    let quadrant = word & 0x3;
    let funct3 = (word >> 13) & 0x7;

    let insn = match (quadrant, funct3) {
        (0, 0) => {
            // C.ADDI4SPN
            let rd = ((word >> 2) & 0x7) as usize + 8;
            let imm = ciw_imm(word);
            if imm == 0 {
                return None; // reserved encoding
            }
            Insn::i(Op::Addi, rd, 2, imm)
        }
        (0, 1) => {
            // C.FLD
            let rd = ((word >> 2) & 0x7) as usize + 8;
            let rs1 = ((word >> 7) & 0x7) as usize + 8;
            Insn::i(Op::Fld, rd, rs1, cl_imm_d(word))
        }
        (0, 2) => {
            let rd = ((word >> 2) & 0x7) as usize + 8;
            let rs1 = ((word >> 7) & 0x7) as usize + 8;
            Insn::i(Op::Lw, rd, rs1, cl_imm_w(word))
        }
        (0, 3) => {
            let rd = ((word >> 2) & 0x7) as usize + 8;
            let rs1 = ((word >> 7) & 0x7) as usize + 8;
            Insn::i(Op::Ld, rd, rs1, cl_imm_d(word))
        }
        (0, 5) => {
            // C.FSD
            let rs2 = ((word >> 2) & 0x7) as usize + 8;
            let rs1 = ((word >> 7) & 0x7) as usize + 8;
            Insn::s(Op::Fsd, rs1, rs2, cl_imm_d(word))
        }
        (0, 6) => {
            let rs2 = ((word >> 2) & 0x7) as usize + 8;
            let rs1 = ((word >> 7) & 0x7) as usize + 8;
            Insn::s(Op::Sw, rs1, rs2, cl_imm_w(word))
        }
        (0, 7) => {
            let rs2 = ((word >> 2) & 0x7) as usize + 8;
            let rs1 = ((word >> 7) & 0x7) as usize + 8;
            Insn::s(Op::Sd, rs1, rs2, cl_imm_d(word))
        }
        (1, 0) => {
            // C.NOP / C.ADDI
            let rd = ((word >> 7) & 0x1f) as usize;
            Insn::i(Op::Addi, rd, rd, ci_imm(word))
        }
        (1, 1) => {
            // C.ADDIW (RV64; C.JAL is RV32-only)
            let rd = ((word >> 7) & 0x1f) as usize;
            if rd == 0 {
                return None;
            }
            Insn::i(Op::Addiw, rd, rd, ci_imm(word))
        }
        (1, 2) => {
            let rd = ((word >> 7) & 0x1f) as usize;
            Insn::i(Op::Addi, rd, 0, ci_imm(word))
        }
        (1, 3) => {
            let rd = ((word >> 7) & 0x1f) as usize;
            if rd == 2 {
                let imm = addi16sp_imm(word);
                if imm == 0 {
                    return None;
                }
                Insn::i(Op::Addi, 2, 2, imm)
            } else if rd != 0 {
                let imm = ci_lui_imm(word);
                if imm == 0 {
                    return None;
                }
                Insn::i(Op::Lui, rd, 0, imm)
            } else {
                return None;
            }
        }
        (1, 4) => {
            let rd = ((word >> 7) & 0x7) as usize + 8;
            let funct2 = (word >> 10) & 0x3;
            match funct2 {
                0 => Insn::i(Op::Srli, rd, rd, ci_shamt(word)),
                1 => Insn::i(Op::Srai, rd, rd, ci_shamt(word)),
                2 => Insn::i(Op::Andi, rd, rd, ci_imm(word)),
                _ => {
                    let rs2 = ((word >> 2) & 0x7) as usize + 8;
                    let bit12 = (word >> 12) & 0x1;
                    let funct = (word >> 5) & 0x3;
                    let op = match (bit12, funct) {
                        (0, 0) => Op::Sub,
                        (0, 1) => Op::Xor,
                        (0, 2) => Op::Or,
                        (0, 3) => Op::And,
                        (1, 0) => Op::Subw,
                        (1, 1) => Op::Addw,
                        _ => return None,
                    };
                    Insn::r(op, rd, rd, rs2)
                }
            }
        }
        (1, 5) => Insn::i(Op::Jal, 0, 0, cj_imm(word)),
        (1, 6) => {
            let rs1 = ((word >> 7) & 0x7) as usize + 8;
            Insn::s(Op::Beq, rs1, 0, cb_imm(word))
        }
        (1, 7) => {
            let rs1 = ((word >> 7) & 0x7) as usize + 8;
            Insn::s(Op::Bne, rs1, 0, cb_imm(word))
        }
        (2, 0) => {
            let rd = ((word >> 7) & 0x1f) as usize;
            Insn::i(Op::Slli, rd, rd, ci_shamt(word))
        }
        (2, 1) => {
            // C.FLDSP
            let rd = ((word >> 7) & 0x1f) as usize;
            Insn::i(Op::Fld, rd, 2, ci_ldsp_imm(word))
        }
        (2, 2) => {
            let rd = ((word >> 7) & 0x1f) as usize;
            if rd == 0 {
                return None;
            }
            Insn::i(Op::Lw, rd, 2, ci_lwsp_imm(word))
        }
        (2, 3) => {
            let rd = ((word >> 7) & 0x1f) as usize;
            if rd == 0 {
                return None;
            }
            Insn::i(Op::Ld, rd, 2, ci_ldsp_imm(word))
        }
        (2, 4) => {
            let rs1 = ((word >> 7) & 0x1f) as usize;
            let rs2 = ((word >> 2) & 0x1f) as usize;
            let bit12 = (word >> 12) & 0x1;
            if bit12 == 0 {
                if rs2 == 0 {
                    if rs1 == 0 {
                        return None;
                    }
                    Insn::i(Op::Jalr, 0, rs1, 0) // C.JR
                } else {
                    Insn::r(Op::Add, rs1, 0, rs2) // C.MV
                }
            } else if rs2 == 0 {
                if rs1 == 0 {
                    Insn::new(Op::Ebreak)
                } else {
                    Insn::i(Op::Jalr, 1, rs1, 0) // C.JALR
                }
            } else {
                Insn::r(Op::Add, rs1, rs1, rs2) // C.ADD
            }
        }
        (2, 5) => {
            // C.FSDSP
            let rs2 = ((word >> 2) & 0x1f) as usize;
            Insn::s(Op::Fsd, 2, rs2, css_imm_d(word))
        }
        (2, 6) => {
            let rs2 = ((word >> 2) & 0x1f) as usize;
            Insn::s(Op::Sw, 2, rs2, css_imm_w(word))
        }
        (2, 7) => {
            let rs2 = ((word >> 2) & 0x1f) as usize;
            Insn::s(Op::Sd, 2, rs2, css_imm_d(word))
        }
        _ => return None,
    };
    Some(insn.compressed())
}

// ---- immediate extraction ----

fn i_imm(word: u32) -> i64 {
    (word as i32 >> 20) as i64
}

fn s_imm(word: u32) -> i64 {
    let imm = ((word >> 25) & 0x7f) << 5 | ((word >> 7) & 0x1f);
    ((imm as i32) << 20 >> 20) as i64
}

fn b_imm(word: u32) -> i64 {
    let imm = ((word >> 31) & 0x1) << 12
        | ((word >> 7) & 0x1) << 11
        | ((word >> 25) & 0x3f) << 5
        | ((word >> 8) & 0xf) << 1;
    ((imm as i32) << 19 >> 19) as i64
}

fn j_imm(word: u32) -> i64 {
    let imm = ((word >> 31) & 0x1) << 20
        | ((word >> 12) & 0xff) << 12
        | ((word >> 20) & 0x1) << 11
        | ((word >> 21) & 0x3ff) << 1;
    ((imm as i32) << 11 >> 11) as i64
}

fn ci_imm(word: u32) -> i64 {
    let imm = ((word >> 12) & 0x1) << 5 | ((word >> 2) & 0x1f);
    ((imm as i32) << 26 >> 26) as i64
}

fn ci_shamt(word: u32) -> i64 {
    (((word >> 12) & 0x1) << 5 | ((word >> 2) & 0x1f)) as i64
}

fn ci_lui_imm(word: u32) -> i64 {
    let imm = ((word >> 12) & 0x1) << 17 | ((word >> 2) & 0x1f) << 12;
    ((imm as i32) << 14 >> 14) as i64
}

fn ci_lwsp_imm(word: u32) -> i64 {
    (((word >> 12) & 0x1) << 5 | ((word >> 4) & 0x7) << 2 | ((word >> 2) & 0x3) << 6) as i64
}

fn ci_ldsp_imm(word: u32) -> i64 {
    (((word >> 12) & 0x1) << 5 | ((word >> 5) & 0x3) << 3 | ((word >> 2) & 0x7) << 6) as i64
}

fn css_imm_w(word: u32) -> i64 {
    (((word >> 9) & 0xf) << 2 | ((word >> 7) & 0x3) << 6) as i64
}

fn css_imm_d(word: u32) -> i64 {
    (((word >> 10) & 0x7) << 3 | ((word >> 7) & 0x7) << 6) as i64
}

fn ciw_imm(word: u32) -> i64 {
    (((word >> 11) & 0x3) << 4
        | ((word >> 7) & 0xf) << 6
        | ((word >> 6) & 0x1) << 2
        | ((word >> 5) & 0x1) << 3) as i64
}

fn cl_imm_w(word: u32) -> i64 {
    (((word >> 10) & 0x7) << 3 | ((word >> 6) & 0x1) << 2 | ((word >> 5) & 0x1) << 6) as i64
}

fn cl_imm_d(word: u32) -> i64 {
    (((word >> 10) & 0x7) << 3 | ((word >> 5) & 0x3) << 6) as i64
}

fn cb_imm(word: u32) -> i64 {
    let imm = ((word >> 12) & 0x1) << 8
        | ((word >> 10) & 0x3) << 3
        | ((word >> 5) & 0x3) << 6
        | ((word >> 3) & 0x3) << 1
        | ((word >> 2) & 0x1) << 5;
    ((imm as i32) << 23 >> 23) as i64
}

fn cj_imm(word: u32) -> i64 {
    let imm = ((word >> 12) & 0x1) << 11
        | ((word >> 11) & 0x1) << 4
        | ((word >> 9) & 0x3) << 8
        | ((word >> 8) & 0x1) << 10
        | ((word >> 7) & 0x1) << 6
        | ((word >> 6) & 0x1) << 7
        | ((word >> 3) & 0x7) << 1
        | ((word >> 2) & 0x1) << 5;
    ((imm as i32) << 20 >> 20) as i64
}

fn addi16sp_imm(word: u32) -> i64 {
    let imm = ((word >> 12) & 0x1) << 9
        | ((word >> 6) & 0x1) << 4
        | ((word >> 5) & 0x1) << 6
        | ((word >> 3) & 0x3) << 7
        | ((word >> 2) & 0x1) << 5;
    ((imm as i32) << 22 >> 22) as i64
}
