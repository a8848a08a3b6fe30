//! x86-64 instruction encoder.
//!
//! Only the encodings the RTL emitter needs are implemented: 64-bit mode,
//! register or base+displacement operands, no index registers. Operand
//! order follows Intel convention (destination first).

use crate::binemit::{CodeBuffer, CodeOffset};
pub(crate) use crate::isa::x64::regs::{Gpr, Xmm};
use crate::rtl::RegisterSize;

/// A base + 32-bit displacement memory operand.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Amode {
    /// Base register.
    pub base: Gpr,
    /// Signed byte displacement.
    pub disp: i32,
}

impl Amode {
    /// `[base + disp]`.
    pub fn base_disp(base: Gpr, disp: i32) -> Self {
        Self { base, disp }
    }
}

/// A register-or-memory operand.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RegMem {
    /// A general purpose register.
    Reg(Gpr),
    /// A memory location.
    Mem(Amode),
}

impl From<Gpr> for RegMem {
    fn from(reg: Gpr) -> Self {
        RegMem::Reg(reg)
    }
}

impl From<Amode> for RegMem {
    fn from(mem: Amode) -> Self {
        RegMem::Mem(mem)
    }
}

/// An XMM-register-or-memory operand.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum XmmMem {
    /// An XMM register.
    Reg(Xmm),
    /// A memory location.
    Mem(Amode),
}

impl From<Xmm> for XmmMem {
    fn from(reg: Xmm) -> Self {
        XmmMem::Reg(reg)
    }
}

impl From<Amode> for XmmMem {
    fn from(mem: Amode) -> Self {
        XmmMem::Mem(mem)
    }
}

/// Condition codes, by encoding.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Cc {
    /// Below (unsigned <).
    B = 2,
    /// Zero / equal.
    Z = 4,
    /// Not zero / not equal.
    Nz = 5,
    /// Below or equal (unsigned <=).
    Be = 6,
    /// Less (signed <).
    L = 12,
    /// Less or equal (signed <=).
    Le = 14,
}

/// Shift and rotate operations, by /digit.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ShiftKind {
    /// Rotate left.
    Rol = 0,
    /// Rotate right.
    Ror = 1,
    /// Shift left.
    Shl = 4,
    /// Logical shift right.
    Shr = 5,
    /// Arithmetic shift right.
    Sar = 7,
}

/// ALU group-1 operations, by /digit.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum AluOp {
    /// Integer add.
    Add = 0,
    /// Bitwise or.
    Or = 1,
    /// Bitwise and.
    And = 4,
    /// Integer subtract.
    Sub = 5,
    /// Bitwise exclusive or.
    Xor = 6,
    /// Compare (subtract, flags only).
    Cmp = 7,
}

impl AluOp {
    // Opcode byte of the `op r/m, r` form at 16/32/64-bit width. The
    // 8-bit form is one less, the `op r, r/m` form two more.
    fn store_opcode(self) -> u8 {
        (self as u8) << 3 | 0x01
    }
}

/// Encode the ModR/M byte.
fn encode_modrm(m0d: u8, enc_reg_g: u8, rm_e: u8) -> u8 {
    debug_assert!(m0d < 4);
    debug_assert!(enc_reg_g < 8);
    debug_assert!(rm_e < 8);
    ((m0d & 3) << 6) | ((enc_reg_g & 7) << 3) | (rm_e & 7)
}

/// Encode the SIB byte (scale-index-base).
fn encode_sib(scale: u8, enc_index: u8, enc_base: u8) -> u8 {
    debug_assert!(scale < 4);
    debug_assert!(enc_index < 8);
    debug_assert!(enc_base < 8);
    ((scale & 3) << 6) | ((enc_index & 7) << 3) | (enc_base & 7)
}

/// A REX prefix specification: whether REX.W is set and whether the prefix
/// must be emitted even when all of its fields are zero (needed to reach
/// spl/bpl/sil/dil in 8-bit operations).
#[derive(Copy, Clone)]
struct RexFlags {
    w: bool,
    always_emit: bool,
}

impl RexFlags {
    fn from_size(size: RegisterSize) -> Self {
        Self {
            w: size == RegisterSize::Qword,
            always_emit: false,
        }
    }

    /// Force emission of the REX byte if an 8-bit operation touches the
    /// encodings that alias ah/ch/dh/bh without it.
    fn always_emit_if_8bit_needed(&mut self, size: RegisterSize, enc: u8) {
        if size == RegisterSize::Byte && (4..=7).contains(&enc) {
            self.always_emit = true;
        }
    }

    fn emit_two_op(self, sink: &mut CodeBuffer, enc_g: u8, enc_e: u8) {
        let w = u8::from(self.w);
        let r = (enc_g >> 3) & 1;
        let b = (enc_e >> 3) & 1;
        let rex = 0x40 | (w << 3) | (r << 2) | b;
        if rex != 0x40 || self.always_emit {
            sink.put1(rex);
        }
    }
}

// Displacement classification for ModR/M encoding.
#[derive(Copy, Clone)]
enum Disp {
    None,
    Imm8(i8),
    Imm32(i32),
}

impl Disp {
    fn new(disp: i32, enc_base: u8) -> Self {
        // rbp/r13 as base with mod=00 would read [rip+disp32]; force a
        // zero displacement byte instead.
        if disp == 0 && (enc_base & 7) != 5 {
            Disp::None
        } else if let Ok(disp) = i8::try_from(disp) {
            Disp::Imm8(disp)
        } else {
            Disp::Imm32(disp)
        }
    }

    fn m0d(self) -> u8 {
        match self {
            Disp::None => 0b00,
            Disp::Imm8(_) => 0b01,
            Disp::Imm32(_) => 0b10,
        }
    }

    fn emit(self, sink: &mut CodeBuffer) {
        match self {
            Disp::None => {}
            Disp::Imm8(n) => sink.put1(n as u8),
            Disp::Imm32(n) => sink.put4(n as u32),
        }
    }
}

/// The instruction encoder. Bytes accumulate in an owned [`CodeBuffer`].
#[derive(Default)]
pub struct Assembler {
    buf: CodeBuffer,
}

impl Assembler {
    /// A fresh assembler with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard all emitted code.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Bytes emitted so far.
    pub fn size(&self) -> usize {
        self.buf.data().len()
    }

    /// The current emission offset.
    pub fn cur_offset(&self) -> CodeOffset {
        self.buf.cur_offset()
    }

    /// The emitted bytes.
    pub fn data(&self) -> &[u8] {
        self.buf.data()
    }

    /// Overwrite a previously emitted 32-bit displacement field.
    pub fn patch_disp32(&mut self, offset: CodeOffset, displacement: i32) {
        self.buf.patch_disp32(offset, displacement);
    }

    /// Consume the assembler, returning the emitted bytes.
    pub fn finish(self) -> Vec<u8> {
        self.buf.into_vec()
    }

    // Emit ModR/M (+ SIB + displacement) addressing a memory operand.
    fn modrm_mem(&mut self, enc_g: u8, mem: Amode) {
        let enc_base = mem.base.enc();
        let disp = Disp::new(mem.disp, enc_base);
        // rsp/r12 as base requires a SIB byte with no index.
        if enc_base & 7 == 4 {
            self.buf.put1(encode_modrm(disp.m0d(), enc_g & 7, 4));
            self.buf.put1(encode_sib(0, 4, 4));
        } else {
            self.buf.put1(encode_modrm(disp.m0d(), enc_g & 7, enc_base & 7));
        }
        disp.emit(&mut self.buf);
    }

    // Emit prefixes + opcode + ModR/M (+ SIB + disp) for one reg/opcode
    // extension `enc_g` against a reg-or-mem operand. The 0x0f escape is
    // emitted when `map_0f` is set; the 8-bit opcode form must be selected
    // by the caller.
    fn op_rm(
        &mut self,
        size: RegisterSize,
        mut rex: RexFlags,
        map_0f: bool,
        opcode: u8,
        enc_g: u8,
        rm: RegMem,
    ) {
        if size == RegisterSize::Word {
            self.buf.put1(0x66);
        }
        match rm {
            RegMem::Reg(reg) => {
                rex.always_emit_if_8bit_needed(size, reg.enc());
                rex.always_emit_if_8bit_needed(size, enc_g);
                rex.emit_two_op(&mut self.buf, enc_g, reg.enc());
                if map_0f {
                    self.buf.put1(0x0f);
                }
                self.buf.put1(opcode);
                self.buf.put1(encode_modrm(0b11, enc_g & 7, reg.enc() & 7));
            }
            RegMem::Mem(mem) => {
                rex.always_emit_if_8bit_needed(size, enc_g);
                rex.emit_two_op(&mut self.buf, enc_g, mem.base.enc());
                if map_0f {
                    self.buf.put1(0x0f);
                }
                self.buf.put1(opcode);
                self.modrm_mem(enc_g, mem);
            }
        }
    }

    // Pick the 8-bit or wider opcode byte for the operand size.
    fn opcode_for(size: RegisterSize, opcode8: u8, opcode: u8) -> u8 {
        if size == RegisterSize::Byte {
            opcode8
        } else {
            opcode
        }
    }

    /// `mov dst, src`. Exactly one operand may be memory.
    pub fn mov(&mut self, size: RegisterSize, dst: RegMem, src: RegMem) {
        let rex = RexFlags::from_size(size);
        match (dst, src) {
            (dst, RegMem::Reg(src)) => {
                let opcode = Self::opcode_for(size, 0x88, 0x89);
                self.op_rm(size, rex, false, opcode, src.enc(), dst);
            }
            (RegMem::Reg(dst), src) => {
                let opcode = Self::opcode_for(size, 0x8a, 0x8b);
                self.op_rm(size, rex, false, opcode, dst.enc(), src);
            }
            _ => panic!("mov mem, mem"),
        }
    }

    fn alu(&mut self, size: RegisterSize, op: AluOp, dst: RegMem, src: RegMem) {
        let rex = RexFlags::from_size(size);
        let store = op.store_opcode();
        match (dst, src) {
            (dst, RegMem::Reg(src)) => {
                let opcode = Self::opcode_for(size, store - 1, store);
                self.op_rm(size, rex, false, opcode, src.enc(), dst);
            }
            (RegMem::Reg(dst), src) => {
                let opcode = Self::opcode_for(size, store + 1, store + 2);
                self.op_rm(size, rex, false, opcode, dst.enc(), src);
            }
            _ => panic!("alu mem, mem"),
        }
    }

    /// `add dst, src`.
    pub fn add(&mut self, size: RegisterSize, dst: RegMem, src: RegMem) {
        self.alu(size, AluOp::Add, dst, src);
    }

    /// `sub dst, src`.
    pub fn sub(&mut self, size: RegisterSize, dst: RegMem, src: RegMem) {
        self.alu(size, AluOp::Sub, dst, src);
    }

    /// `and dst, src`.
    pub fn and(&mut self, size: RegisterSize, dst: RegMem, src: RegMem) {
        self.alu(size, AluOp::And, dst, src);
    }

    /// `or dst, src`.
    pub fn or(&mut self, size: RegisterSize, dst: RegMem, src: RegMem) {
        self.alu(size, AluOp::Or, dst, src);
    }

    /// `xor dst, src`.
    pub fn xor(&mut self, size: RegisterSize, dst: RegMem, src: RegMem) {
        self.alu(size, AluOp::Xor, dst, src);
    }

    /// `cmp lhs, rhs` (flags only).
    pub fn cmp(&mut self, size: RegisterSize, lhs: RegMem, rhs: RegMem) {
        self.alu(size, AluOp::Cmp, lhs, rhs);
    }

    /// `test lhs, rhs` (flags only). Test is commutative, so two-register
    /// forms and either-operand-memory forms all reduce to `85 /r`.
    pub fn test(&mut self, size: RegisterSize, lhs: RegMem, rhs: RegMem) {
        let rex = RexFlags::from_size(size);
        let opcode = Self::opcode_for(size, 0x84, 0x85);
        match (lhs, rhs) {
            (lhs, RegMem::Reg(rhs)) => self.op_rm(size, rex, false, opcode, rhs.enc(), lhs),
            (RegMem::Reg(lhs), rhs) => self.op_rm(size, rex, false, opcode, lhs.enc(), rhs),
            _ => panic!("test mem, mem"),
        }
    }

    /// `imul dst, src` (two-operand signed multiply; destination must be a
    /// register).
    pub fn imul(&mut self, size: RegisterSize, dst: RegMem, src: RegMem) {
        debug_assert!(size != RegisterSize::Byte, "no dst,src form of 8-bit imul");
        let RegMem::Reg(dst) = dst else {
            panic!("imul destination must be a register");
        };
        self.op_rm(size, RexFlags::from_size(size), true, 0xaf, dst.enc(), src);
    }

    /// One-operand unsigned multiply: `rdx:rax = rax * src`.
    pub fn mul(&mut self, size: RegisterSize, src: RegMem) {
        let opcode = Self::opcode_for(size, 0xf6, 0xf7);
        self.op_rm(size, RexFlags::from_size(size), false, opcode, 4, src);
    }

    /// `not dst`.
    pub fn not(&mut self, size: RegisterSize, dst: RegMem) {
        let opcode = Self::opcode_for(size, 0xf6, 0xf7);
        self.op_rm(size, RexFlags::from_size(size), false, opcode, 2, dst);
    }

    /// `cmovcc dst, src` (destination must be a register).
    pub fn cmov(&mut self, size: RegisterSize, cc: Cc, dst: RegMem, src: RegMem) {
        debug_assert!(size != RegisterSize::Byte);
        let RegMem::Reg(dst) = dst else {
            panic!("cmov destination must be a register");
        };
        self.op_rm(size, RexFlags::from_size(size), true, 0x40 + cc as u8, dst.enc(), src);
    }

    /// `setcc dst` (8-bit destination).
    pub fn set(&mut self, cc: Cc, dst: RegMem) {
        let rex = RexFlags::from_size(RegisterSize::Byte);
        self.op_rm(RegisterSize::Byte, rex, true, 0x90 + cc as u8, 0, dst);
    }

    /// Shift/rotate by the cl register.
    pub fn shift_cl(&mut self, size: RegisterSize, kind: ShiftKind, dst: RegMem) {
        let opcode = Self::opcode_for(size, 0xd2, 0xd3);
        self.op_rm(size, RexFlags::from_size(size), false, opcode, kind as u8, dst);
    }

    /// Shift/rotate by an immediate count.
    pub fn shift_imm(&mut self, size: RegisterSize, kind: ShiftKind, dst: RegMem, count: u8) {
        let opcode = Self::opcode_for(size, 0xc0, 0xc1);
        self.op_rm(size, RexFlags::from_size(size), false, opcode, kind as u8, dst);
        self.buf.put1(count);
    }

    /// Shift/rotate by one.
    pub fn shift_1(&mut self, size: RegisterSize, kind: ShiftKind, dst: RegMem) {
        let opcode = Self::opcode_for(size, 0xd0, 0xd1);
        self.op_rm(size, RexFlags::from_size(size), false, opcode, kind as u8, dst);
    }

    /// ALU group-1 operation with a 32-bit immediate (sign-extended at
    /// 64-bit width).
    pub fn alu_imm32(&mut self, size: RegisterSize, op: AluOp, dst: RegMem, imm: u32) {
        debug_assert!(size != RegisterSize::Byte);
        self.op_rm(size, RexFlags::from_size(size), false, 0x81, op as u8, dst);
        self.buf.put4(imm);
    }

    /// ALU group-1 operation with a sign-extended 8-bit immediate.
    pub fn alu_imm8(&mut self, size: RegisterSize, op: AluOp, dst: RegMem, imm: i8) {
        debug_assert!(size != RegisterSize::Byte);
        self.op_rm(size, RexFlags::from_size(size), false, 0x83, op as u8, dst);
        self.buf.put1(imm as u8);
    }

    /// `test dst, imm32`.
    pub fn test_imm32(&mut self, size: RegisterSize, dst: RegMem, imm: u32) {
        debug_assert!(size != RegisterSize::Byte);
        self.op_rm(size, RexFlags::from_size(size), false, 0xf7, 0, dst);
        self.buf.put4(imm);
    }

    /// `mov r32, imm32` (zero-extends into the full register).
    pub fn mov_imm32(&mut self, dst: Gpr, imm: u32) {
        let rex = RexFlags::from_size(RegisterSize::Dword);
        rex.emit_two_op(&mut self.buf, 0, dst.enc());
        self.buf.put1(0xb8 + (dst.enc() & 7));
        self.buf.put4(imm);
    }

    /// `mov r64, imm64`.
    pub fn mov_imm64(&mut self, dst: Gpr, imm: u64) {
        let rex = RexFlags::from_size(RegisterSize::Qword);
        rex.emit_two_op(&mut self.buf, 0, dst.enc());
        self.buf.put1(0xb8 + (dst.enc() & 7));
        self.buf.put8(imm);
    }

    /// `mov r/m8, imm8`.
    pub fn mov_imm8_rm(&mut self, dst: RegMem, imm: u8) {
        self.op_rm(RegisterSize::Byte, RexFlags::from_size(RegisterSize::Byte), false, 0xc6, 0, dst);
        self.buf.put1(imm);
    }

    /// `movzx dst, src` widening from `from` to `to` size.
    pub fn movzx(&mut self, to: RegisterSize, from: RegisterSize, dst: Gpr, src: RegMem) {
        let opcode = match from {
            RegisterSize::Byte => 0xb6,
            RegisterSize::Word => 0xb7,
            _ => panic!("movzx from {from:?}"),
        };
        let mut rex = RexFlags::from_size(to);
        // The *source* is the byte-width operand here.
        if from == RegisterSize::Byte {
            if let RegMem::Reg(reg) = src {
                rex.always_emit_if_8bit_needed(RegisterSize::Byte, reg.enc());
            }
        }
        self.op_rm(to, rex, true, opcode, dst.enc(), src);
    }

    /// `movsx dst, src` sign-extending from `from` to `to` size.
    pub fn movsx(&mut self, to: RegisterSize, from: RegisterSize, dst: Gpr, src: RegMem) {
        match from {
            RegisterSize::Byte | RegisterSize::Word => {
                let opcode = if from == RegisterSize::Byte { 0xbe } else { 0xbf };
                let mut rex = RexFlags::from_size(to);
                if from == RegisterSize::Byte {
                    if let RegMem::Reg(reg) = src {
                        rex.always_emit_if_8bit_needed(RegisterSize::Byte, reg.enc());
                    }
                }
                self.op_rm(to, rex, true, opcode, dst.enc(), src);
            }
            RegisterSize::Dword => {
                // movsxd r64, r/m32.
                debug_assert_eq!(to, RegisterSize::Qword);
                self.op_rm(to, RexFlags::from_size(to), false, 0x63, dst.enc(), src);
            }
            _ => panic!("movsx from {from:?}"),
        }
    }

    /// `push r64`.
    pub fn push(&mut self, reg: Gpr) {
        let rex = RexFlags { w: false, always_emit: false };
        rex.emit_two_op(&mut self.buf, 0, reg.enc());
        self.buf.put1(0x50 + (reg.enc() & 7));
    }

    /// `pop r64`.
    pub fn pop(&mut self, reg: Gpr) {
        let rex = RexFlags { w: false, always_emit: false };
        rex.emit_two_op(&mut self.buf, 0, reg.enc());
        self.buf.put1(0x58 + (reg.enc() & 7));
    }

    /// `call reg`.
    pub fn call(&mut self, reg: Gpr) {
        let rex = RexFlags { w: false, always_emit: false };
        rex.emit_two_op(&mut self.buf, 2, reg.enc());
        self.buf.put1(0xff);
        self.buf.put1(encode_modrm(0b11, 2, reg.enc() & 7));
    }

    /// `ret`.
    pub fn ret(&mut self) {
        self.buf.put1(0xc3);
    }

    /// `jmp rel32` with a zero placeholder; returns the offset of the
    /// displacement field for later patching.
    pub fn jmp_disp32(&mut self) -> CodeOffset {
        self.buf.put1(0xe9);
        let at = self.buf.cur_offset();
        self.buf.put4(0);
        at
    }

    /// `jcc rel32` with a zero placeholder; returns the offset of the
    /// displacement field for later patching.
    pub fn jcc_disp32(&mut self, cc: Cc) -> CodeOffset {
        self.buf.put1(0x0f);
        self.buf.put1(0x80 + cc as u8);
        let at = self.buf.cur_offset();
        self.buf.put4(0);
        at
    }

    // SSE helper: optional mandatory prefix, REX, 0f, opcode, ModR/M with
    // an XMM register in the reg field and a GPR or XMM encoding in r/m.
    fn sse_op_enc(&mut self, prefix: Option<u8>, w: bool, opcode: u8, enc_g: u8, rm_enc: u8) {
        if let Some(prefix) = prefix {
            self.buf.put1(prefix);
        }
        let rex = RexFlags { w, always_emit: false };
        rex.emit_two_op(&mut self.buf, enc_g, rm_enc);
        self.buf.put1(0x0f);
        self.buf.put1(opcode);
        self.buf.put1(encode_modrm(0b11, enc_g & 7, rm_enc & 7));
    }

    fn sse_op_mem(&mut self, prefix: Option<u8>, w: bool, opcode: u8, enc_g: u8, mem: Amode) {
        if let Some(prefix) = prefix {
            self.buf.put1(prefix);
        }
        let rex = RexFlags { w, always_emit: false };
        rex.emit_two_op(&mut self.buf, enc_g, mem.base.enc());
        self.buf.put1(0x0f);
        self.buf.put1(opcode);
        self.modrm_mem(enc_g, mem);
    }

    fn sse_op(&mut self, prefix: Option<u8>, w: bool, opcode: u8, enc_g: u8, rm: XmmMem) {
        match rm {
            XmmMem::Reg(reg) => self.sse_op_enc(prefix, w, opcode, enc_g, reg.enc()),
            XmmMem::Mem(mem) => self.sse_op_mem(prefix, w, opcode, enc_g, mem),
        }
    }

    /// `movd`/`movq` general-register-or-memory to XMM.
    pub fn movd_g2x(&mut self, size: RegisterSize, dst: Xmm, src: RegMem) {
        let w = size == RegisterSize::Qword;
        match src {
            RegMem::Reg(reg) => self.sse_op_enc(Some(0x66), w, 0x6e, dst.enc(), reg.enc()),
            RegMem::Mem(mem) => self.sse_op_mem(Some(0x66), w, 0x6e, dst.enc(), mem),
        }
    }

    /// `movd`/`movq` XMM to general-register-or-memory.
    pub fn movd_x2g(&mut self, size: RegisterSize, dst: RegMem, src: Xmm) {
        let w = size == RegisterSize::Qword;
        match dst {
            RegMem::Reg(reg) => self.sse_op_enc(Some(0x66), w, 0x7e, src.enc(), reg.enc()),
            RegMem::Mem(mem) => self.sse_op_mem(Some(0x66), w, 0x7e, src.enc(), mem),
        }
    }

    /// `movups dst, src` (unaligned packed-single move). One side must be
    /// a register.
    pub fn movups(&mut self, dst: XmmMem, src: XmmMem) {
        match (dst, src) {
            (XmmMem::Reg(dst), src) => self.sse_op(None, false, 0x10, dst.enc(), src),
            (dst, XmmMem::Reg(src)) => self.sse_op(None, false, 0x11, src.enc(), dst),
            _ => panic!("movups mem, mem"),
        }
    }

    /// `movupd dst, src` (unaligned packed-double move).
    pub fn movupd(&mut self, dst: XmmMem, src: XmmMem) {
        match (dst, src) {
            (XmmMem::Reg(dst), src) => self.sse_op(Some(0x66), false, 0x10, dst.enc(), src),
            (dst, XmmMem::Reg(src)) => self.sse_op(Some(0x66), false, 0x11, src.enc(), dst),
            _ => panic!("movupd mem, mem"),
        }
    }

    /// `addss dst, src`.
    pub fn addss(&mut self, dst: Xmm, src: XmmMem) {
        self.sse_op(Some(0xf3), false, 0x58, dst.enc(), src);
    }

    /// `addsd dst, src`.
    pub fn addsd(&mut self, dst: Xmm, src: XmmMem) {
        self.sse_op(Some(0xf2), false, 0x58, dst.enc(), src);
    }

    /// `subss dst, src`.
    pub fn subss(&mut self, dst: Xmm, src: XmmMem) {
        self.sse_op(Some(0xf3), false, 0x5c, dst.enc(), src);
    }

    /// `subsd dst, src`.
    pub fn subsd(&mut self, dst: Xmm, src: XmmMem) {
        self.sse_op(Some(0xf2), false, 0x5c, dst.enc(), src);
    }

    /// `mulss dst, src`.
    pub fn mulss(&mut self, dst: Xmm, src: XmmMem) {
        self.sse_op(Some(0xf3), false, 0x59, dst.enc(), src);
    }

    /// `mulsd dst, src`.
    pub fn mulsd(&mut self, dst: Xmm, src: XmmMem) {
        self.sse_op(Some(0xf2), false, 0x59, dst.enc(), src);
    }

    /// `divss dst, src`.
    pub fn divss(&mut self, dst: Xmm, src: XmmMem) {
        self.sse_op(Some(0xf3), false, 0x5e, dst.enc(), src);
    }

    /// `divsd dst, src`.
    pub fn divsd(&mut self, dst: Xmm, src: XmmMem) {
        self.sse_op(Some(0xf2), false, 0x5e, dst.enc(), src);
    }

    /// `sqrtss dst, src`.
    pub fn sqrtss(&mut self, dst: Xmm, src: XmmMem) {
        self.sse_op(Some(0xf3), false, 0x51, dst.enc(), src);
    }

    /// `sqrtsd dst, src`.
    pub fn sqrtsd(&mut self, dst: Xmm, src: XmmMem) {
        self.sse_op(Some(0xf2), false, 0x51, dst.enc(), src);
    }

    /// `cvttss2si dst, src` (truncating float32 to integer).
    pub fn cvttss2si(&mut self, dst_size: RegisterSize, dst: Gpr, src: XmmMem) {
        let w = dst_size == RegisterSize::Qword;
        self.sse_op(Some(0xf3), w, 0x2c, dst.enc(), src);
    }

    /// `cvttsd2si dst, src` (truncating float64 to integer).
    pub fn cvttsd2si(&mut self, dst_size: RegisterSize, dst: Gpr, src: XmmMem) {
        let w = dst_size == RegisterSize::Qword;
        self.sse_op(Some(0xf2), w, 0x2c, dst.enc(), src);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::x64::regs::*;

    fn bytes(f: impl FnOnce(&mut Assembler)) -> Vec<u8> {
        let mut asm = Assembler::new();
        f(&mut asm);
        asm.finish()
    }

    #[test]
    fn mov_reg_reg() {
        // mov rax, rbx
        assert_eq!(
            bytes(|a| a.mov(RegisterSize::Qword, RAX.into(), RBX.into())),
            vec![0x48, 0x89, 0xd8]
        );
        // mov ecx, r9d
        assert_eq!(
            bytes(|a| a.mov(RegisterSize::Dword, RCX.into(), R9.into())),
            vec![0x44, 0x89, 0xc9]
        );
    }

    #[test]
    fn mov_mem() {
        // mov rax, [rbp + 8]
        assert_eq!(
            bytes(|a| a.mov(
                RegisterSize::Qword,
                RAX.into(),
                Amode::base_disp(RBP, 8).into()
            )),
            vec![0x48, 0x8b, 0x45, 0x08]
        );
        // mov [rsp + 16], rcx  (SIB form)
        assert_eq!(
            bytes(|a| a.mov(
                RegisterSize::Qword,
                Amode::base_disp(RSP, 16).into(),
                RCX.into()
            )),
            vec![0x48, 0x89, 0x4c, 0x24, 0x10]
        );
        // mov [rbp], edx needs an explicit zero displacement.
        assert_eq!(
            bytes(|a| a.mov(
                RegisterSize::Dword,
                Amode::base_disp(RBP, 0).into(),
                RDX.into()
            )),
            vec![0x89, 0x55, 0x00]
        );
    }

    #[test]
    fn alu_forms() {
        // add eax, ecx
        assert_eq!(
            bytes(|a| a.add(RegisterSize::Dword, RAX.into(), RCX.into())),
            vec![0x01, 0xc8]
        );
        // sub rsp, 32 (imm32 form)
        assert_eq!(
            bytes(|a| a.alu_imm32(RegisterSize::Qword, AluOp::Sub, RSP.into(), 32)),
            vec![0x48, 0x81, 0xec, 0x20, 0x00, 0x00, 0x00]
        );
        // and sil, dil forces a REX prefix.
        assert_eq!(
            bytes(|a| a.and(RegisterSize::Byte, RSI.into(), RDI.into())),
            vec![0x40, 0x20, 0xfe]
        );
    }

    #[test]
    fn shifts() {
        // shr edx, cl
        assert_eq!(
            bytes(|a| a.shift_cl(RegisterSize::Dword, ShiftKind::Shr, RDX.into())),
            vec![0xd3, 0xea]
        );
        // sar r8d, 3
        assert_eq!(
            bytes(|a| a.shift_imm(RegisterSize::Dword, ShiftKind::Sar, R8.into(), 3)),
            vec![0x41, 0xc1, 0xf8, 0x03]
        );
    }

    #[test]
    fn imm_moves() {
        // mov eax, 0x2a
        assert_eq!(
            bytes(|a| a.mov_imm32(RAX, 0x2a)),
            vec![0xb8, 0x2a, 0x00, 0x00, 0x00]
        );
        // mov r11, 0x1122334455667788
        assert_eq!(
            bytes(|a| a.mov_imm64(R11, 0x1122_3344_5566_7788)),
            vec![0x49, 0xbb, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]
        );
    }

    #[test]
    fn control_flow() {
        assert_eq!(bytes(|a| a.ret()), vec![0xc3]);
        assert_eq!(bytes(|a| a.call(RAX)), vec![0xff, 0xd0]);
        assert_eq!(bytes(|a| a.push(R12)), vec![0x41, 0x54]);
        assert_eq!(bytes(|a| a.pop(RBX)), vec![0x5b]);
        // jmp / jnz leave a zero rel32 for the patch pass.
        assert_eq!(
            bytes(|a| {
                let _ = a.jmp_disp32();
            }),
            vec![0xe9, 0, 0, 0, 0]
        );
        assert_eq!(
            bytes(|a| {
                let _ = a.jcc_disp32(Cc::Nz);
            }),
            vec![0x0f, 0x85, 0, 0, 0, 0]
        );
    }

    #[test]
    fn widening_moves() {
        // movzx eax, cl
        assert_eq!(
            bytes(|a| a.movzx(RegisterSize::Dword, RegisterSize::Byte, RAX, RCX.into())),
            vec![0x0f, 0xb6, 0xc1]
        );
        // movsxd rdx, eax
        assert_eq!(
            bytes(|a| a.movsx(RegisterSize::Qword, RegisterSize::Dword, RDX, RAX.into())),
            vec![0x48, 0x63, 0xd0]
        );
    }

    #[test]
    fn sse_moves() {
        // movd xmm0, eax
        assert_eq!(
            bytes(|a| a.movd_g2x(RegisterSize::Dword, Xmm::new(0), RAX.into())),
            vec![0x66, 0x0f, 0x6e, 0xc0]
        );
        // movq rax, xmm1
        assert_eq!(
            bytes(|a| a.movd_x2g(RegisterSize::Qword, RAX.into(), Xmm::new(1))),
            vec![0x66, 0x48, 0x0f, 0x7e, 0xc8]
        );
        // addss xmm2, xmm3
        assert_eq!(
            bytes(|a| a.addss(Xmm::new(2), XmmMem::Reg(Xmm::new(3)))),
            vec![0xf3, 0x0f, 0x58, 0xd3]
        );
    }

    #[test]
    fn setcc() {
        // setz al / setnz sil (REX)
        assert_eq!(bytes(|a| a.set(Cc::Z, RAX.into())), vec![0x0f, 0x94, 0xc0]);
        assert_eq!(
            bytes(|a| a.set(Cc::Nz, RSI.into())),
            vec![0x40, 0x0f, 0x95, 0xc6]
        );
    }
}
