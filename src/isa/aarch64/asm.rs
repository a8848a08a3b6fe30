//! AArch64 instruction encoder.
//!
//! Instructions accumulate as 32-bit words. Branch targets are labels;
//! forward references are recorded and patched when the buffer is
//! finalized. Only the encodings the RTL emitter needs are implemented.

use crate::isa::aarch64::imms::ImmLogic;
use crate::isa::aarch64::regs::{Vreg, Xreg, ZR};

/// Condition codes, by encoding.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Cond {
    /// Equal (Z set).
    Eq = 0,
    /// Not equal.
    Ne = 1,
    /// Carry set / unsigned >=.
    Cs = 2,
    /// Carry clear / unsigned <.
    Cc = 3,
    /// Negative.
    Mi = 4,
    /// Positive or zero.
    Pl = 5,
    /// Unsigned >.
    Hi = 8,
    /// Unsigned <=.
    Ls = 9,
    /// Signed >=.
    Ge = 10,
    /// Signed <.
    Lt = 11,
    /// Signed >.
    Gt = 12,
    /// Signed <=.
    Le = 13,
}

impl Cond {
    /// The 4-bit condition field.
    pub fn bits(self) -> u32 {
        self as u32
    }

    /// The inverted condition.
    pub fn invert(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Cs => Cond::Cc,
            Cond::Cc => Cond::Cs,
            Cond::Mi => Cond::Pl,
            Cond::Pl => Cond::Mi,
            Cond::Hi => Cond::Ls,
            Cond::Ls => Cond::Hi,
            Cond::Ge => Cond::Lt,
            Cond::Lt => Cond::Ge,
            Cond::Gt => Cond::Le,
            Cond::Le => Cond::Gt,
        }
    }
}

/// Shift applied to the second source of a shifted-register operation.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum RegShift {
    /// Logical shift left.
    Lsl = 0,
    /// Logical shift right.
    Lsr = 1,
    /// Arithmetic shift right.
    Asr = 2,
}

/// Extension applied to the second source of an extended-register
/// operation.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Extend {
    /// Sign-extend a byte.
    Sxtb = 0b100,
    /// Sign-extend a halfword.
    Sxth = 0b101,
}

/// A forward-referenceable position in the instruction stream.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Label(u32);

#[derive(Copy, Clone)]
enum Fixup {
    /// Unconditional branch, imm26 at bit 0.
    B26,
    /// Conditional branch, imm19 at bit 5.
    Cond19,
}

fn to_gpr(reg: Xreg) -> u32 {
    u32::from(reg.num())
}

fn to_vec(reg: Vreg) -> u32 {
    u32::from(reg.num())
}

fn enc_arith_rrr(bits_31_21: u32, bits_15_10: u32, rd: u32, rn: u32, rm: u32) -> u32 {
    (bits_31_21 << 21) | (bits_15_10 << 10) | rd | (rn << 5) | (rm << 16)
}

fn enc_arith_rr_imm12(bits_31_24: u32, immshift: u32, imm12: u32, rn: u32, rd: u32) -> u32 {
    debug_assert!(imm12 < (1 << 12));
    (bits_31_24 << 24) | (immshift << 22) | (imm12 << 10) | (rn << 5) | rd
}

fn enc_arith_rr_imml(bits_31_23: u32, imm_bits: u32, rn: u32, rd: u32) -> u32 {
    (bits_31_23 << 23) | (imm_bits << 10) | (rn << 5) | rd
}

fn enc_arith_rrrr(top11: u32, rm: u32, bit15: u32, ra: u32, rn: u32, rd: u32) -> u32 {
    (top11 << 21) | (rm << 16) | (bit15 << 15) | (ra << 10) | (rn << 5) | rd
}

fn enc_jump26(op_31_26: u32, off_26_0: u32) -> u32 {
    debug_assert!(off_26_0 < (1 << 26));
    (op_31_26 << 26) | off_26_0
}

fn enc_cbr(op_31_24: u32, off_18_0: u32, op_4: u32, cond: u32) -> u32 {
    debug_assert!(off_18_0 < (1 << 19));
    debug_assert!(cond < (1 << 4));
    (op_31_24 << 24) | (off_18_0 << 5) | (op_4 << 4) | cond
}

fn enc_ldst_imm12(op_31_22: u32, imm12: u32, rn: u32, rt: u32) -> u32 {
    debug_assert!(imm12 < (1 << 12));
    (op_31_22 << 22) | (imm12 << 10) | (rn << 5) | rt
}

fn enc_ldst_imm9(op_31_21: u32, imm9: i32, op_11_10: u32, rn: u32, rt: u32) -> u32 {
    debug_assert!((-256..256).contains(&imm9));
    (op_31_21 << 21) | (((imm9 as u32) & 0x1ff) << 12) | (op_11_10 << 10) | (rn << 5) | rt
}

fn enc_ldst_pair(op_31_22: u32, imm7: i32, rt2: u32, rn: u32, rt: u32) -> u32 {
    debug_assert!((-64..64).contains(&imm7));
    (op_31_22 << 22) | (((imm7 as u32) & 0x7f) << 15) | (rt2 << 10) | (rn << 5) | rt
}

fn sf(is64: bool) -> u32 {
    u32::from(is64)
}

/// The instruction encoder.
#[derive(Default)]
pub struct Assembler {
    words: Vec<u32>,
    /// Word index each label resolved to.
    labels: Vec<Option<u32>>,
    fixups: Vec<(u32, Label, Fixup)>,
}

impl Assembler {
    /// A fresh assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instruction words emitted so far.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// True when nothing has been emitted.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    fn put(&mut self, word: u32) {
        self.words.push(word);
    }

    /// Allocate an unbound label.
    pub fn create_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    /// Bind a label to the current position.
    pub fn bind_label(&mut self, label: Label) {
        assert!(self.labels[label.0 as usize].is_none(), "label bound twice");
        self.labels[label.0 as usize] = Some(self.words.len() as u32);
    }

    /// Resolve all branches and return the emitted bytes, little endian.
    pub fn finish(mut self) -> Vec<u8> {
        for &(at, label, fixup) in &self.fixups {
            let target = self.labels[label.0 as usize].expect("branch to unbound label");
            let offset = target as i64 - i64::from(at);
            match fixup {
                Fixup::B26 => {
                    assert!((-(1 << 25)..(1 << 25)).contains(&offset));
                    self.words[at as usize] |= (offset as u32) & 0x03ff_ffff;
                }
                Fixup::Cond19 => {
                    assert!((-(1 << 18)..(1 << 18)).contains(&offset));
                    self.words[at as usize] |= ((offset as u32) & 0x7_ffff) << 5;
                }
            }
        }

        let mut bytes = Vec::with_capacity(self.words.len() * 4);
        for word in &self.words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    /// `add rd, rn, rm` (shifted register, no shift).
    pub fn add_reg(&mut self, is64: bool, rd: Xreg, rn: Xreg, rm: Xreg) {
        self.add_shifted(is64, rd, rn, rm, RegShift::Lsl, 0);
    }

    /// `add rd, rn, rm, <shift> #amount`.
    pub fn add_shifted(
        &mut self,
        is64: bool,
        rd: Xreg,
        rn: Xreg,
        rm: Xreg,
        shift: RegShift,
        amount: u8,
    ) {
        debug_assert!(amount < if is64 { 64 } else { 32 });
        let top = (sf(is64) << 10) | (0b0001011 << 3) | ((shift as u32) << 1);
        self.put(enc_arith_rrr(
            top,
            u32::from(amount),
            to_gpr(rd),
            to_gpr(rn),
            to_gpr(rm),
        ));
    }

    /// `add rd, rn, rm, <extend>` (extended register).
    pub fn add_extended(&mut self, is64: bool, rd: Xreg, rn: Xreg, rm: Xreg, extend: Extend) {
        let top = (sf(is64) << 10) | (0b0001011 << 3) | 0b001;
        let bits_15_10 = (extend as u32) << 3;
        self.put(enc_arith_rrr(top, bits_15_10, to_gpr(rd), to_gpr(rn), to_gpr(rm)));
    }

    /// `add rd, rn, #imm12`.
    pub fn add_imm(&mut self, is64: bool, rd: Xreg, rn: Xreg, imm12: u32) {
        let top = (sf(is64) << 7) | 0b0010001;
        self.put(enc_arith_rr_imm12(top, 0, imm12, to_gpr(rn), to_gpr(rd)));
    }

    /// Register-to-register move (`add rd, rn, #0`).
    pub fn mov_reg(&mut self, is64: bool, rd: Xreg, rn: Xreg) {
        self.add_imm(is64, rd, rn, 0);
    }

    /// `sub rd, rn, rm`.
    pub fn sub_reg(&mut self, is64: bool, rd: Xreg, rn: Xreg, rm: Xreg) {
        let top = (sf(is64) << 10) | (0b1001011 << 3);
        self.put(enc_arith_rrr(top, 0, to_gpr(rd), to_gpr(rn), to_gpr(rm)));
    }

    /// `subs rd, rn, rm` (rd = 31 gives `cmp rn, rm`).
    pub fn subs_reg(&mut self, is64: bool, rd: Xreg, rn: Xreg, rm: Xreg) {
        let top = (sf(is64) << 10) | (0b1101011 << 3);
        self.put(enc_arith_rrr(top, 0, to_gpr(rd), to_gpr(rn), to_gpr(rm)));
    }

    fn logical_reg(&mut self, is64: bool, opc: u32, rd: Xreg, rn: Xreg, rm: Xreg) {
        let top = (sf(is64) << 10) | (opc << 8) | (0b01010 << 3);
        self.put(enc_arith_rrr(top, 0, to_gpr(rd), to_gpr(rn), to_gpr(rm)));
    }

    /// `and rd, rn, rm`.
    pub fn and_reg(&mut self, is64: bool, rd: Xreg, rn: Xreg, rm: Xreg) {
        self.logical_reg(is64, 0b00, rd, rn, rm);
    }

    /// `orr rd, rn, rm`.
    pub fn orr_reg(&mut self, is64: bool, rd: Xreg, rn: Xreg, rm: Xreg) {
        self.logical_reg(is64, 0b01, rd, rn, rm);
    }

    /// `eor rd, rn, rm`.
    pub fn eor_reg(&mut self, is64: bool, rd: Xreg, rn: Xreg, rm: Xreg) {
        self.logical_reg(is64, 0b10, rd, rn, rm);
    }

    /// `ands rd, rn, rm` (rd = 31 gives `tst rn, rm`).
    pub fn ands_reg(&mut self, is64: bool, rd: Xreg, rn: Xreg, rm: Xreg) {
        self.logical_reg(is64, 0b11, rd, rn, rm);
    }

    fn logical_imm(&mut self, is64: bool, opc: u32, rd: Xreg, rn: Xreg, imm: ImmLogic) {
        let bits_31_23 = (sf(is64) << 8) | (opc << 6) | 0b100100;
        self.put(enc_arith_rr_imml(bits_31_23, imm.bits(), to_gpr(rn), to_gpr(rd)));
    }

    /// `and rd, rn, #imm`.
    pub fn and_imm(&mut self, is64: bool, rd: Xreg, rn: Xreg, imm: ImmLogic) {
        self.logical_imm(is64, 0b00, rd, rn, imm);
    }

    /// `orr rd, rn, #imm`.
    pub fn orr_imm(&mut self, is64: bool, rd: Xreg, rn: Xreg, imm: ImmLogic) {
        self.logical_imm(is64, 0b01, rd, rn, imm);
    }

    /// `eor rd, rn, #imm`.
    pub fn eor_imm(&mut self, is64: bool, rd: Xreg, rn: Xreg, imm: ImmLogic) {
        self.logical_imm(is64, 0b10, rd, rn, imm);
    }

    /// `movz rd, #imm16, lsl #shift`.
    pub fn movz(&mut self, is64: bool, rd: Xreg, imm16: u16, shift: u8) {
        debug_assert!(shift % 16 == 0 && shift < if is64 { 64 } else { 32 });
        let hw = u32::from(shift / 16);
        let word = (sf(is64) << 31)
            | (0b10_100101 << 23)
            | (hw << 21)
            | (u32::from(imm16) << 5)
            | to_gpr(rd);
        self.put(word);
    }

    /// `movk rd, #imm16, lsl #shift`.
    pub fn movk(&mut self, is64: bool, rd: Xreg, imm16: u16, shift: u8) {
        debug_assert!(shift % 16 == 0 && shift < if is64 { 64 } else { 32 });
        let hw = u32::from(shift / 16);
        let word = (sf(is64) << 31)
            | (0b11_100101 << 23)
            | (hw << 21)
            | (u32::from(imm16) << 5)
            | to_gpr(rd);
        self.put(word);
    }

    fn shift_variable(&mut self, is64: bool, op2: u32, rd: Xreg, rn: Xreg, rm: Xreg) {
        let top = (sf(is64) << 10) | 0b0011010110;
        self.put(enc_arith_rrr(top, 0b001000 | op2, to_gpr(rd), to_gpr(rn), to_gpr(rm)));
    }

    /// `lslv rd, rn, rm`.
    pub fn lslv(&mut self, is64: bool, rd: Xreg, rn: Xreg, rm: Xreg) {
        self.shift_variable(is64, 0b00, rd, rn, rm);
    }

    /// `lsrv rd, rn, rm`.
    pub fn lsrv(&mut self, is64: bool, rd: Xreg, rn: Xreg, rm: Xreg) {
        self.shift_variable(is64, 0b01, rd, rn, rm);
    }

    /// `asrv rd, rn, rm`.
    pub fn asrv(&mut self, is64: bool, rd: Xreg, rn: Xreg, rm: Xreg) {
        self.shift_variable(is64, 0b10, rd, rn, rm);
    }

    /// `smaddl xd, wn, wm, xa`.
    pub fn smaddl(&mut self, rd: Xreg, rn: Xreg, rm: Xreg, ra: Xreg) {
        self.put(enc_arith_rrrr(
            0b10011011001,
            to_gpr(rm),
            0,
            to_gpr(ra),
            to_gpr(rn),
            to_gpr(rd),
        ));
    }

    /// `umaddl xd, wn, wm, xa`.
    pub fn umaddl(&mut self, rd: Xreg, rn: Xreg, rm: Xreg, ra: Xreg) {
        self.put(enc_arith_rrrr(
            0b10011011101,
            to_gpr(rm),
            0,
            to_gpr(ra),
            to_gpr(rn),
            to_gpr(rd),
        ));
    }

    /// `csel rd, rn, rm, cond`.
    pub fn csel(&mut self, is64: bool, rd: Xreg, rn: Xreg, rm: Xreg, cond: Cond) {
        let top = (sf(is64) << 10) | 0b0011010100;
        self.put(enc_arith_rrr(
            top,
            cond.bits() << 2,
            to_gpr(rd),
            to_gpr(rn),
            to_gpr(rm),
        ));
    }

    /// `cset rd, cond`: rd = cond ? 1 : 0 (`csinc rd, zr, zr, !cond`).
    pub fn cset(&mut self, is64: bool, rd: Xreg, cond: Cond) {
        let top = (sf(is64) << 10) | 0b0011010100;
        let zr = u32::from(ZR);
        self.put(enc_arith_rrr(
            top,
            (cond.invert().bits() << 2) | 0b01,
            to_gpr(rd),
            zr,
            zr,
        ));
    }

    /// `ldr wt|xt, [rn, #offset]` (unsigned scaled offset, in bytes).
    pub fn ldr_imm(&mut self, is64: bool, rt: Xreg, rn: Xreg, offset: u32) {
        let scale = if is64 { 8 } else { 4 };
        assert_eq!(offset % scale, 0, "unaligned load offset");
        let size = if is64 { 0b11 } else { 0b10 };
        let op = (size << 8) | 0b1110_0101;
        self.put(enc_ldst_imm12(op, offset / scale, to_gpr(rn), to_gpr(rt)));
    }

    /// `str wt|xt, [rn, #offset]`.
    pub fn str_imm(&mut self, is64: bool, rt: Xreg, rn: Xreg, offset: u32) {
        let scale = if is64 { 8 } else { 4 };
        assert_eq!(offset % scale, 0, "unaligned store offset");
        let size = if is64 { 0b11 } else { 0b10 };
        let op = (size << 8) | 0b1110_0100;
        self.put(enc_ldst_imm12(op, offset / scale, to_gpr(rn), to_gpr(rt)));
    }

    /// `ldr st|dt, [rn, #offset]` (FP load).
    pub fn ldr_fp_imm(&mut self, is64: bool, rt: Vreg, rn: Xreg, offset: u32) {
        let scale = if is64 { 8 } else { 4 };
        assert_eq!(offset % scale, 0, "unaligned load offset");
        let size = if is64 { 0b11 } else { 0b10 };
        let op = (size << 8) | 0b1111_0101;
        self.put(enc_ldst_imm12(op, offset / scale, to_gpr(rn), to_vec(rt)));
    }

    /// `str st|dt, [rn, #offset]` (FP store).
    pub fn str_fp_imm(&mut self, is64: bool, rt: Vreg, rn: Xreg, offset: u32) {
        let scale = if is64 { 8 } else { 4 };
        assert_eq!(offset % scale, 0, "unaligned store offset");
        let size = if is64 { 0b11 } else { 0b10 };
        let op = (size << 8) | 0b1111_0100;
        self.put(enc_ldst_imm12(op, offset / scale, to_gpr(rn), to_vec(rt)));
    }

    /// `ldr wt, [rn, wm, uxtw]` (register-offset load).
    pub fn ldr_reg(&mut self, rt: Xreg, rn: Xreg, rm: Xreg) {
        self.ldst_reg(0b10, 0b01, rt, rn, rm);
    }

    /// `ldrh wt, [rn, wm, uxtw]`.
    pub fn ldrh_reg(&mut self, rt: Xreg, rn: Xreg, rm: Xreg) {
        self.ldst_reg(0b01, 0b01, rt, rn, rm);
    }

    /// `ldrb wt, [rn, wm, uxtw]`.
    pub fn ldrb_reg(&mut self, rt: Xreg, rn: Xreg, rm: Xreg) {
        self.ldst_reg(0b00, 0b01, rt, rn, rm);
    }

    fn ldst_reg(&mut self, size: u32, opc: u32, rt: Xreg, rn: Xreg, rm: Xreg) {
        // Register offset, UXTW extend, no shift.
        let word = (size << 30)
            | (0b111_0_00 << 24)
            | (opc << 22)
            | (1 << 21)
            | (to_gpr(rm) << 16)
            | (0b010 << 13)
            | (0b10 << 10)
            | (to_gpr(rn) << 5)
            | to_gpr(rt);
        self.put(word);
    }

    /// `str xt, [rn, #imm]!` (pre-indexed).
    pub fn str_pre(&mut self, rt: Xreg, rn: Xreg, imm: i32) {
        self.put(enc_ldst_imm9(0b11_111_0_00_00_0, imm, 0b11, to_gpr(rn), to_gpr(rt)));
    }

    /// `ldr xt, [rn], #imm` (post-indexed).
    pub fn ldr_post(&mut self, rt: Xreg, rn: Xreg, imm: i32) {
        self.put(enc_ldst_imm9(0b11_111_0_00_01_0, imm, 0b01, to_gpr(rn), to_gpr(rt)));
    }

    /// `str dt, [rn, #imm]!` (pre-indexed FP store).
    pub fn str_fp_pre(&mut self, rt: Vreg, rn: Xreg, imm: i32) {
        self.put(enc_ldst_imm9(0b11_111_1_00_00_0, imm, 0b11, to_gpr(rn), to_vec(rt)));
    }

    /// `ldr dt, [rn], #imm` (post-indexed FP load).
    pub fn ldr_fp_post(&mut self, rt: Vreg, rn: Xreg, imm: i32) {
        self.put(enc_ldst_imm9(0b11_111_1_00_01_0, imm, 0b01, to_gpr(rn), to_vec(rt)));
    }

    /// `stp xt, xt2, [rn, #imm]!` (pre-indexed pair store).
    pub fn stp_pre(&mut self, rt: Xreg, rt2: Xreg, rn: Xreg, imm: i32) {
        debug_assert_eq!(imm % 8, 0);
        self.put(enc_ldst_pair(
            0b10_101_0_011_0,
            imm / 8,
            to_gpr(rt2),
            to_gpr(rn),
            to_gpr(rt),
        ));
    }

    /// `ldp xt, xt2, [rn], #imm` (post-indexed pair load).
    pub fn ldp_post(&mut self, rt: Xreg, rt2: Xreg, rn: Xreg, imm: i32) {
        debug_assert_eq!(imm % 8, 0);
        self.put(enc_ldst_pair(
            0b10_101_0_001_1,
            imm / 8,
            to_gpr(rt2),
            to_gpr(rn),
            to_gpr(rt),
        ));
    }

    fn fp_2src(&mut self, is64: bool, opcode: u32, rd: Vreg, rn: Vreg, rm: Vreg) {
        let ty = u32::from(is64);
        let word = (0b000_11110 << 24)
            | (ty << 22)
            | (1 << 21)
            | (to_vec(rm) << 16)
            | (opcode << 12)
            | (0b10 << 10)
            | (to_vec(rn) << 5)
            | to_vec(rd);
        self.put(word);
    }

    /// `fadd sd|dd, sn, sm`.
    pub fn fadd(&mut self, is64: bool, rd: Vreg, rn: Vreg, rm: Vreg) {
        self.fp_2src(is64, 0b0010, rd, rn, rm);
    }

    /// `fsub`.
    pub fn fsub(&mut self, is64: bool, rd: Vreg, rn: Vreg, rm: Vreg) {
        self.fp_2src(is64, 0b0011, rd, rn, rm);
    }

    /// `fmul`.
    pub fn fmul(&mut self, is64: bool, rd: Vreg, rn: Vreg, rm: Vreg) {
        self.fp_2src(is64, 0b0000, rd, rn, rm);
    }

    /// `fdiv`.
    pub fn fdiv(&mut self, is64: bool, rd: Vreg, rn: Vreg, rm: Vreg) {
        self.fp_2src(is64, 0b0001, rd, rn, rm);
    }

    /// `fsqrt sd|dd, sn`.
    pub fn fsqrt(&mut self, is64: bool, rd: Vreg, rn: Vreg) {
        let ty = u32::from(is64);
        let word = (0b000_11110 << 24)
            | (ty << 22)
            | (1 << 21)
            | (0b000011 << 15)
            | (0b10000 << 10)
            | (to_vec(rn) << 5)
            | to_vec(rd);
        self.put(word);
    }

    fn fmov_int(&mut self, is64: bool, opcode: u32, rd: u32, rn: u32) {
        let word = (sf(is64) << 31)
            | (0b00_11110 << 24)
            | (u32::from(is64) << 22)
            | (1 << 21)
            | (opcode << 16)
            | (rn << 5)
            | rd;
        self.put(word);
    }

    /// `fmov wd|xd, sn|dn` (FP to general).
    pub fn fmov_to_gpr(&mut self, is64: bool, rd: Xreg, rn: Vreg) {
        self.fmov_int(is64, 0b00_110, to_gpr(rd), to_vec(rn));
    }

    /// `fmov sd|dd, wn|xn` (general to FP).
    pub fn fmov_from_gpr(&mut self, is64: bool, rd: Vreg, rn: Xreg) {
        self.fmov_int(is64, 0b00_111, to_vec(rd), to_gpr(rn));
    }

    /// `b label`.
    pub fn b(&mut self, label: Label) {
        self.fixups.push((self.words.len() as u32, label, Fixup::B26));
        self.put(enc_jump26(0b000101, 0));
    }

    /// `b.cond label`.
    pub fn b_cond(&mut self, cond: Cond, label: Label) {
        self.fixups
            .push((self.words.len() as u32, label, Fixup::Cond19));
        self.put(enc_cbr(0b01010100, 0, 0, cond.bits()));
    }

    /// `blr rn`.
    pub fn blr(&mut self, rn: Xreg) {
        self.put(0b1101011_0_0_01_11111_0000_0_0 << 10 | (to_gpr(rn) << 5));
    }

    /// `ret` (through x30).
    pub fn ret(&mut self) {
        self.put(0b1101011_0_0_10_11111_0000_0_0 << 10 | (30 << 5));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::aarch64::regs::xreg;

    fn words(f: impl FnOnce(&mut Assembler)) -> Vec<u32> {
        let mut asm = Assembler::new();
        f(&mut asm);
        asm.finish()
            .chunks(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn arith() {
        // add w0, w1, w2
        assert_eq!(words(|a| a.add_reg(false, xreg(0), xreg(1), xreg(2))), vec![0x0b020020]);
        // add x0, x1, x2
        assert_eq!(words(|a| a.add_reg(true, xreg(0), xreg(1), xreg(2))), vec![0x8b020020]);
        // sub w3, w4, w5
        assert_eq!(words(|a| a.sub_reg(false, xreg(3), xreg(4), xreg(5))), vec![0x4b050083]);
        // mov x9, x1 (add x9, x1, #0)
        assert_eq!(words(|a| a.mov_reg(true, xreg(9), xreg(1))), vec![0x91000029]);
    }

    #[test]
    fn moves() {
        // movz w0, #0x2a
        assert_eq!(words(|a| a.movz(false, xreg(0), 0x2a, 0)), vec![0x52800540]);
        // movk x1, #0x1234, lsl #16
        assert_eq!(words(|a| a.movk(true, xreg(1), 0x1234, 16)), vec![0xf2a24681]);
    }

    #[test]
    fn logical() {
        // orr w2, w3, w4
        assert_eq!(words(|a| a.orr_reg(false, xreg(2), xreg(3), xreg(4))), vec![0x2a040062]);
        // and x5, x6, #0xff
        let imm = crate::isa::aarch64::imms::ImmLogic::maybe_from_u64(0xff).unwrap();
        assert_eq!(words(|a| a.and_imm(true, xreg(5), xreg(6), imm)), vec![0x92401cc5]);
    }

    #[test]
    fn shifts() {
        // lsrv w0, w1, w2
        assert_eq!(words(|a| a.lsrv(false, xreg(0), xreg(1), xreg(2))), vec![0x1ac22420]);
        // lsl w0, w1, #4 via add w0, wzr, w1, lsl #4
        assert_eq!(
            words(|a| a.add_shifted(false, xreg(0), xreg(31), xreg(1), RegShift::Lsl, 4)),
            vec![0x0b0113e0]
        );
    }

    #[test]
    fn loads_and_stores() {
        // ldr w0, [x10, #8]
        assert_eq!(words(|a| a.ldr_imm(false, xreg(0), xreg(10), 8)), vec![0xb9400940]);
        // str x1, [sp, #-16]!
        assert_eq!(words(|a| a.str_pre(xreg(1), xreg(31), -16)), vec![0xf81f0fe1]);
        // ldr x1, [sp], #16
        assert_eq!(words(|a| a.ldr_post(xreg(1), xreg(31), 16)), vec![0xf84107e1]);
        // stp x29, x30, [sp, #-16]!
        assert_eq!(
            words(|a| a.stp_pre(xreg(29), xreg(30), xreg(31), -16)),
            vec![0xa9bf7bfd]
        );
        // ldp x29, x30, [sp], #16
        assert_eq!(
            words(|a| a.ldp_post(xreg(29), xreg(30), xreg(31), 16)),
            vec![0xa8c17bfd]
        );
        // ldr w0, [x9, w1, uxtw]
        assert_eq!(words(|a| a.ldr_reg(xreg(0), xreg(9), xreg(1))), vec![0xb8614920]);
    }

    #[test]
    fn branches() {
        // Forward branch over one instruction.
        let ws = words(|a| {
            let label = a.create_label();
            a.b(label);
            a.movz(false, xreg(0), 1, 0);
            a.bind_label(label);
            a.ret();
        });
        assert_eq!(ws[0], 0x14000002);
        assert_eq!(ws[2], 0xd65f03c0);

        // Backward conditional branch.
        let ws = words(|a| {
            let label = a.create_label();
            a.bind_label(label);
            a.movz(false, xreg(0), 1, 0);
            a.b_cond(Cond::Ne, label);
        });
        assert_eq!(ws[1], 0x54ffffe1);
    }

    #[test]
    fn calls() {
        // blr x3
        assert_eq!(words(|a| a.blr(xreg(3))), vec![0xd63f0060]);
        // ret
        assert_eq!(words(|a| a.ret()), vec![0xd65f03c0]);
    }

    #[test]
    fn floating_point() {
        // fadd s0, s1, s2
        assert_eq!(
            words(|a| a.fadd(false, Vreg::new(0), Vreg::new(1), Vreg::new(2))),
            vec![0x1e222820]
        );
        // fmov w0, s1
        assert_eq!(words(|a| a.fmov_to_gpr(false, xreg(0), Vreg::new(1))), vec![0x1e260020]);
        // fmov d2, x3
        assert_eq!(words(|a| a.fmov_from_gpr(true, Vreg::new(2), xreg(3))), vec![0x9e670062]);
    }
}
