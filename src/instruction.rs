//! Single-opcode classification for the instruction follower.
//!
//! This is not a disassembler. The follower only needs to know, per
//! opcode: can execution leave the straight line here (branch,
//! barrier), where does a direct branch go, and is it a call or a
//! return. Everything else is `Normal` regardless of what it computes.

use bitmatch::bitmatch;

use crate::packet::Isa;

/// What an opcode means to the instruction follower.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InstrKind {
    /// Not a waypoint; execution continues at the next opcode.
    Normal,

    /// Direct branch with a PC-relative, statically known target.
    Branch,

    /// Branch through a register or a loaded value; the target is not
    /// in the opcode.
    BranchIndirect,

    /// Instruction synchronization barrier. Always a waypoint.
    Isb,

    /// Data synchronization / memory barrier. A waypoint only when the
    /// trace unit was configured to treat it as one.
    DsbDmb,

    /// Undecodable encoding; walked over like `Normal`.
    Unknown,
}

/// Classification of a single opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InstrInfo {
    /// Opcode size in bytes: 4 for ARM and 32-bit Thumb encodings, 2
    /// for 16-bit Thumb.
    pub size: u8,

    pub kind: InstrKind,

    /// Execution is conditional (the atom may be N).
    pub conditional: bool,

    /// Branch with link: pushes a return address.
    pub link: bool,

    /// Indirect branch that returns to a pushed address (`BX lr`,
    /// `MOV pc, lr`, a pop into the PC).
    pub is_return: bool,

    /// Target of a direct branch.
    pub branch_target: Option<u32>,

    /// ISA after the branch, when the opcode switches it (`BLX`
    /// immediate).
    pub next_isa: Option<Isa>,
}

impl InstrInfo {
    fn normal(size: u8, conditional: bool) -> InstrInfo {
        InstrInfo {
            size,
            kind: InstrKind::Normal,
            conditional,
            link: false,
            is_return: false,
            branch_target: None,
            next_isa: None,
        }
    }
}

/// Classifies the opcode at `pc` from the bytes read there. `None` when
/// too few bytes were provided for the encoding.
pub fn decode(isa: Isa, bytes: &[u8], pc: u32) -> Option<InstrInfo> {
    match isa {
        Isa::Arm => {
            let op = bytes.get(0..4)?;
            Some(decode_arm(
                u32::from_le_bytes([op[0], op[1], op[2], op[3]]),
                pc,
            ))
        }
        Isa::Thumb2 | Isa::ThumbEe => {
            let hw = bytes.get(0..2)?;
            let hw1 = u16::from_le_bytes([hw[0], hw[1]]);
            if thumb_is_32bit(hw1) {
                let hw = bytes.get(2..4)?;
                let hw2 = u16::from_le_bytes([hw[0], hw[1]]);
                Some(decode_thumb32(hw1, hw2, pc))
            } else {
                Some(decode_thumb16(hw1, pc))
            }
        }
        // a PTM never traces A64; walked over defensively
        Isa::Aarch64 => Some(InstrInfo {
            size: 4,
            kind: InstrKind::Unknown,
            conditional: false,
            link: false,
            is_return: false,
            branch_target: None,
            next_isa: None,
        }),
    }
}

/// Whether a Thumb halfword opens a 32-bit encoding.
pub fn thumb_is_32bit(hw1: u16) -> bool {
    hw1 >> 11 >= 0b11101
}

fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

/// Classifies an A32 opcode.
pub fn decode_arm(op: u32, pc: u32) -> InstrInfo {
    let cond = op >> 28;

    if cond == 0xf {
        // unconditional space
        let mut info = InstrInfo::normal(4, false);
        if op & 0x0e00_0000 == 0x0a00_0000 {
            // BLX (immediate): exchanges to Thumb, bit 24 is the
            // halfword offset
            let offset = (sign_extend(op & 0x00ff_ffff, 24) << 2) | (((op >> 24) & 1) << 1) as i32;
            info.kind = InstrKind::Branch;
            info.link = true;
            info.branch_target = Some(pc.wrapping_add(8).wrapping_add(offset as u32));
            info.next_isa = Some(Isa::Thumb2);
        } else if op & 0xffff_fff0 == 0xf57f_f060 {
            info.kind = InstrKind::Isb;
        } else if op & 0xffff_ffe0 == 0xf57f_f040 {
            // DSB (0x4x) and DMB (0x5x)
            info.kind = InstrKind::DsbDmb;
        }
        return info;
    }

    let mut info = InstrInfo::normal(4, cond != 0xe);

    if op & 0x0e00_0000 == 0x0a00_0000 {
        // B, BL
        info.kind = InstrKind::Branch;
        info.link = op & 0x0100_0000 != 0;
        let offset = sign_extend(op & 0x00ff_ffff, 24) << 2;
        info.branch_target = Some(pc.wrapping_add(8).wrapping_add(offset as u32));
    } else if op & 0x0fff_fff0 == 0x012f_ff10 {
        // BX
        info.kind = InstrKind::BranchIndirect;
        info.is_return = op & 0xf == 14;
    } else if op & 0x0fff_fff0 == 0x012f_ff30 {
        // BLX (register)
        info.kind = InstrKind::BranchIndirect;
        info.link = true;
    } else if op & 0x0fff_fff0 == 0x01a0_f000 {
        // MOV pc, Rm
        info.kind = InstrKind::BranchIndirect;
        info.is_return = op & 0xf == 14;
    } else if op & 0x0c50_f000 == 0x0410_f000 {
        // LDR pc, [...]
        info.kind = InstrKind::BranchIndirect;
        // pop {pc} spelled LDR pc, [sp], #4
        info.is_return = op & 0x0fff_ffff == 0x049d_f004;
    } else if op & 0x0e10_8000 == 0x0810_8000 {
        // LDM with pc in the register list
        info.kind = InstrKind::BranchIndirect;
        info.is_return = (op >> 16) & 0xf == 13;
    }

    info
}

/// Classifies a 16-bit Thumb opcode.
#[bitmatch]
pub fn decode_thumb16(op: u16, pc: u32) -> InstrInfo {
    let mut info = InstrInfo::normal(2, false);

    #[bitmatch]
    match op {
        "1101_111?_????_????" => {
            // UDF, SVC
        }
        "1101_cccc_iiii_iiii" => {
            // B<c>
            let _ = c;
            info.kind = InstrKind::Branch;
            info.conditional = true;
            let offset = sign_extend(u32::from(i), 8) << 1;
            info.branch_target = Some(pc.wrapping_add(4).wrapping_add(offset as u32));
        }
        "1110_0iii_iiii_iiii" => {
            // B
            info.kind = InstrKind::Branch;
            let offset = sign_extend(u32::from(i), 11) << 1;
            info.branch_target = Some(pc.wrapping_add(4).wrapping_add(offset as u32));
        }
        "0100_0111_0rrr_r000" => {
            // BX
            info.kind = InstrKind::BranchIndirect;
            info.is_return = r == 14;
        }
        "0100_0111_1rrr_r000" => {
            // BLX (register)
            let _ = r;
            info.kind = InstrKind::BranchIndirect;
            info.link = true;
        }
        "1011_1101_rrrr_rrrr" => {
            // POP {..., pc}
            let _ = r;
            info.kind = InstrKind::BranchIndirect;
            info.is_return = true;
        }
        "1011_n0i1_iiii_irrr" => {
            // CBZ/CBNZ: forward-only conditional branch
            let _ = (n, r);
            info.kind = InstrKind::Branch;
            info.conditional = true;
            info.branch_target = Some(pc.wrapping_add(4).wrapping_add(u32::from(i) << 1));
        }
        "0100_0110_1rrr_r111" => {
            // MOV pc, Rm
            info.kind = InstrKind::BranchIndirect;
            info.is_return = r == 14;
        }
        "0100_0100_1rrr_r111" => {
            // ADD pc, Rm
            let _ = r;
            info.kind = InstrKind::BranchIndirect;
        }
        "????_????_????_????" => {}
    }

    info
}

/// Classifies a 32-bit Thumb opcode.
pub fn decode_thumb32(hw1: u16, hw2: u16, pc: u32) -> InstrInfo {
    let mut info = InstrInfo::normal(4, false);

    // barriers sit inside the branch-and-misc space, match them first
    if hw1 == 0xf3bf {
        match hw2 & 0xfff0 {
            0x8f40 | 0x8f50 => {
                info.kind = InstrKind::DsbDmb;
                return info;
            }
            0x8f60 => {
                info.kind = InstrKind::Isb;
                return info;
            }
            _ => {}
        }
    }

    if hw1 & 0xf800 == 0xf000 && hw2 & 0x8000 == 0x8000 {
        // branch and miscellaneous control
        let s = u32::from(hw1 >> 10) & 1;
        let j1 = u32::from(hw2 >> 13) & 1;
        let j2 = u32::from(hw2 >> 11) & 1;
        let imm11 = u32::from(hw2 & 0x7ff);
        let bl_form = hw2 & 0x4000 != 0;

        if bl_form {
            let i1 = !(j1 ^ s) & 1;
            let i2 = !(j2 ^ s) & 1;
            let imm10 = u32::from(hw1 & 0x3ff);
            info.kind = InstrKind::Branch;
            info.link = true;
            if hw2 & 0x1000 != 0 {
                // BL
                let offset =
                    sign_extend(s << 24 | i1 << 23 | i2 << 22 | imm10 << 12 | imm11 << 1, 25);
                info.branch_target = Some(pc.wrapping_add(4).wrapping_add(offset as u32));
            } else {
                // BLX (immediate): exchanges to ARM, target word-aligned
                let offset =
                    sign_extend(s << 24 | i1 << 23 | i2 << 22 | imm10 << 12 | (imm11 & !1) << 1, 25);
                let base = pc.wrapping_add(4) & !3;
                info.branch_target = Some(base.wrapping_add(offset as u32));
                info.next_isa = Some(Isa::Arm);
            }
        } else if hw2 & 0x1000 != 0 {
            // B.W (unconditional)
            let i1 = !(j1 ^ s) & 1;
            let i2 = !(j2 ^ s) & 1;
            let imm10 = u32::from(hw1 & 0x3ff);
            info.kind = InstrKind::Branch;
            let offset = sign_extend(s << 24 | i1 << 23 | i2 << 22 | imm10 << 12 | imm11 << 1, 25);
            info.branch_target = Some(pc.wrapping_add(4).wrapping_add(offset as u32));
        } else {
            // B<c>.W, unless the condition field selects the
            // miscellaneous-control encodings
            let cond = (hw1 >> 6) & 0xf;
            if cond < 0xe {
                let imm6 = u32::from(hw1 & 0x3f);
                info.kind = InstrKind::Branch;
                info.conditional = true;
                let offset = sign_extend(s << 20 | j2 << 19 | j1 << 18 | imm6 << 12 | imm11 << 1, 21);
                info.branch_target = Some(pc.wrapping_add(4).wrapping_add(offset as u32));
            }
        }
        return info;
    }

    if hw1 & 0xfff0 == 0xe8d0 && hw2 & 0xffe0 == 0xf000 {
        // TBB, TBH
        info.kind = InstrKind::BranchIndirect;
    } else if (hw1 & 0xffd0 == 0xe890 || hw1 & 0xffd0 == 0xe910) && hw2 & 0x8000 != 0 {
        // LDMIA/LDMDB with pc in the register list
        info.kind = InstrKind::BranchIndirect;
        info.is_return = hw1 == 0xe8bd;
    } else if hw1 & 0xff50 == 0xf850 && hw2 >> 12 == 0xf {
        // LDR.W pc
        info.kind = InstrKind::BranchIndirect;
        info.is_return = hw1 == 0xf85d && hw2 == 0xfb04;
    }

    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_direct_branch() {
        let info = decode_arm(0xea00_000e, 0x8000_0000);
        assert_eq!(info.kind, InstrKind::Branch);
        assert_eq!(info.size, 4);
        assert_eq!(info.branch_target, Some(0x8000_0040));
        assert!(!info.conditional);
        assert!(!info.link);
    }

    #[test]
    fn arm_bl_backwards() {
        // BL .-8 (imm24 = -4)
        let info = decode_arm(0xebff_fffc, 0x1000);
        assert_eq!(info.kind, InstrKind::Branch);
        assert!(info.link);
        assert_eq!(info.branch_target, Some(0x1000 + 8 - 16));
    }

    #[test]
    fn arm_conditional_branch() {
        // BNE
        let info = decode_arm(0x1a00_0000, 0x0);
        assert!(info.conditional);
        assert_eq!(info.branch_target, Some(8));
    }

    #[test]
    fn arm_blx_immediate_switches_isa() {
        let info = decode_arm(0xfa00_0000, 0x0);
        assert_eq!(info.kind, InstrKind::Branch);
        assert!(info.link);
        assert_eq!(info.next_isa, Some(Isa::Thumb2));
        assert_eq!(info.branch_target, Some(8));
    }

    #[test]
    fn arm_bx_lr_is_return() {
        let info = decode_arm(0xe12f_ff1e, 0x0);
        assert_eq!(info.kind, InstrKind::BranchIndirect);
        assert!(info.is_return);
        assert!(!info.link);

        // BX r3 is not a return
        let info = decode_arm(0xe12f_ff13, 0x0);
        assert!(!info.is_return);
    }

    #[test]
    fn arm_blx_register_links() {
        let info = decode_arm(0xe12f_ff33, 0x0);
        assert_eq!(info.kind, InstrKind::BranchIndirect);
        assert!(info.link);
    }

    #[test]
    fn arm_pop_pc_forms() {
        // LDMIA sp!, {pc}
        let info = decode_arm(0xe8bd_8000, 0x0);
        assert_eq!(info.kind, InstrKind::BranchIndirect);
        assert!(info.is_return);

        // LDR pc, [sp], #4
        let info = decode_arm(0xe49d_f004, 0x0);
        assert_eq!(info.kind, InstrKind::BranchIndirect);
        assert!(info.is_return);

        // MOV pc, lr
        let info = decode_arm(0xe1a0_f00e, 0x0);
        assert_eq!(info.kind, InstrKind::BranchIndirect);
        assert!(info.is_return);
    }

    #[test]
    fn arm_barriers() {
        assert_eq!(decode_arm(0xf57f_f04f, 0x0).kind, InstrKind::DsbDmb);
        assert_eq!(decode_arm(0xf57f_f05f, 0x0).kind, InstrKind::DsbDmb);
        assert_eq!(decode_arm(0xf57f_f06f, 0x0).kind, InstrKind::Isb);
    }

    #[test]
    fn arm_data_processing_is_normal() {
        // ADD r0, r1, r2
        let info = decode_arm(0xe081_0002, 0x0);
        assert_eq!(info.kind, InstrKind::Normal);
        assert_eq!(info.size, 4);
    }

    #[test]
    fn thumb16_conditional_branch_backwards() {
        // BEQ .-4
        let info = decode_thumb16(0xd0fe, 0x2000);
        assert_eq!(info.kind, InstrKind::Branch);
        assert_eq!(info.size, 2);
        assert!(info.conditional);
        assert_eq!(info.branch_target, Some(0x2000));
    }

    #[test]
    fn thumb16_unconditional_branch() {
        // B .-4 (the classic busy loop)
        let info = decode_thumb16(0xe7fe, 0x2000);
        assert_eq!(info.kind, InstrKind::Branch);
        assert!(!info.conditional);
        assert_eq!(info.branch_target, Some(0x2000));
    }

    #[test]
    fn thumb16_bx_and_pop() {
        let info = decode_thumb16(0x4770, 0x0); // BX lr
        assert_eq!(info.kind, InstrKind::BranchIndirect);
        assert!(info.is_return);

        let info = decode_thumb16(0x4798, 0x0); // BLX r3
        assert_eq!(info.kind, InstrKind::BranchIndirect);
        assert!(info.link);

        let info = decode_thumb16(0xbd10, 0x0); // POP {r4, pc}
        assert_eq!(info.kind, InstrKind::BranchIndirect);
        assert!(info.is_return);
    }

    #[test]
    fn thumb16_cbz_forward() {
        // CBZ r0, .+6
        let info = decode_thumb16(0xb108, 0x1000);
        assert_eq!(info.kind, InstrKind::Branch);
        assert!(info.conditional);
        assert_eq!(info.branch_target, Some(0x1000 + 4 + 2));
    }

    #[test]
    fn thumb16_svc_is_normal() {
        let info = decode_thumb16(0xdf01, 0x0);
        assert_eq!(info.kind, InstrKind::Normal);
    }

    #[test]
    fn thumb32_detection() {
        assert!(thumb_is_32bit(0xf000));
        assert!(thumb_is_32bit(0xe800));
        assert!(!thumb_is_32bit(0xe7fe));
        assert!(!thumb_is_32bit(0x4770));
    }

    #[test]
    fn thumb32_bl_forward() {
        // BL .+8
        let info = decode_thumb32(0xf000, 0xf804, 0x4000);
        assert_eq!(info.kind, InstrKind::Branch);
        assert!(info.link);
        assert_eq!(info.branch_target, Some(0x4000 + 4 + 8));
    }

    #[test]
    fn thumb32_blx_switches_isa() {
        // BLX .+8 (word aligned)
        let info = decode_thumb32(0xf000, 0xe804, 0x4000);
        assert_eq!(info.kind, InstrKind::Branch);
        assert!(info.link);
        assert_eq!(info.next_isa, Some(Isa::Arm));
        assert_eq!(info.branch_target, Some(0x4000 + 4 + 8));
    }

    #[test]
    fn thumb32_conditional_branch() {
        // BNE.W .+4
        let info = decode_thumb32(0xf040, 0x8002, 0x4000);
        assert_eq!(info.kind, InstrKind::Branch);
        assert!(info.conditional);
        assert_eq!(info.branch_target, Some(0x4000 + 4 + 4));
    }

    #[test]
    fn thumb32_indirect_forms() {
        // TBB [r0, r1]
        let info = decode_thumb32(0xe8d0, 0xf001, 0x0);
        assert_eq!(info.kind, InstrKind::BranchIndirect);

        // POP.W {r4-r11, pc}
        let info = decode_thumb32(0xe8bd, 0x8ff0, 0x0);
        assert_eq!(info.kind, InstrKind::BranchIndirect);
        assert!(info.is_return);

        // LDR pc, [sp], #4
        let info = decode_thumb32(0xf85d, 0xfb04, 0x0);
        assert_eq!(info.kind, InstrKind::BranchIndirect);
        assert!(info.is_return);
    }

    #[test]
    fn thumb32_barriers() {
        assert_eq!(decode_thumb32(0xf3bf, 0x8f4f, 0x0).kind, InstrKind::DsbDmb);
        assert_eq!(decode_thumb32(0xf3bf, 0x8f5f, 0x0).kind, InstrKind::DsbDmb);
        assert_eq!(decode_thumb32(0xf3bf, 0x8f6f, 0x0).kind, InstrKind::Isb);
    }

    #[test]
    fn decode_by_isa() {
        let bytes = [0x0e, 0x00, 0x00, 0xea];
        let info = decode(Isa::Arm, &bytes, 0x8000_0000).unwrap();
        assert_eq!(info.branch_target, Some(0x8000_0040));

        assert_eq!(decode(Isa::Arm, &bytes[..2], 0x0), None);

        let bytes = [0xfe, 0xe7];
        let info = decode(Isa::Thumb2, &bytes, 0x2000).unwrap();
        assert_eq!(info.size, 2);
        assert_eq!(info.branch_target, Some(0x2000));
    }
}
