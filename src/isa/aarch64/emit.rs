//! AArch64 emission: allocated RTL to machine code.
//!
//! No spill support: the register pool is sized so the IR produced today
//! never spills, and a spill-typed assignment is reported as a recoverable
//! error rather than emitting anything. Callee saves use `stp`/`ldp`
//! pre-indexed pairs; an odd count falls back to a single `str` with
//! 16-byte alignment padding.

use log::trace;

use crate::isa::aarch64::asm::{Assembler, Cond, Extend, Label, RegShift};
use crate::isa::aarch64::imms::ImmLogic;
use crate::isa::aarch64::opcodes::Opcode;
use crate::isa::aarch64::regs::{
    self, vreg, xreg, Vreg, Xreg, FP, GPR_MEMORY_BASE, GPR_REGISTER_BASE, LR, SP,
};
use crate::isa::RegisterAddressFn;
use crate::result::{CodegenError, CodegenResult};
use crate::rtl::{HwRegister, HwRegisterType, RtlInstruction, RtlOpcode, RtlProgram};

fn wx(hw: HwRegister) -> Xreg {
    Xreg::from_hw(hw)
}

fn v(hw: HwRegister) -> Vreg {
    Vreg::from_hw(hw)
}

fn cond_from_bits(bits: u64) -> Cond {
    match bits {
        0 => Cond::Eq,
        1 => Cond::Ne,
        2 => Cond::Cs,
        3 => Cond::Cc,
        4 => Cond::Mi,
        5 => Cond::Pl,
        8 => Cond::Hi,
        9 => Cond::Ls,
        10 => Cond::Ge,
        11 => Cond::Lt,
        12 => Cond::Gt,
        13 => Cond::Le,
        _ => panic!("invalid condition code {bits}"),
    }
}

pub(crate) struct EmitCtx<'a> {
    asm: Assembler,
    program: &'a RtlProgram,
    register_address: RegisterAddressFn,
    exit_label: Label,
    /// RTL label id to assembler label.
    rtl_labels: Vec<Option<Label>>,
}

impl<'a> EmitCtx<'a> {
    pub(crate) fn new(program: &'a RtlProgram, register_address: RegisterAddressFn) -> Self {
        let mut asm = Assembler::new();
        let exit_label = asm.create_label();
        Self {
            asm,
            program,
            register_address,
            exit_label,
            rtl_labels: vec![None; program.label_count()],
        }
    }

    pub(crate) fn assemble(mut self) -> CodegenResult<Vec<u8>> {
        // Function prologue: save fp + lr for stack unwinding, then move
        // the incoming memory and register file bases to their dedicated
        // registers.
        self.asm.stp_pre(FP, LR, SP, -16);
        self.asm.mov_reg(true, GPR_MEMORY_BASE, xreg(1));
        self.asm.mov_reg(true, GPR_REGISTER_BASE, xreg(2));

        let program = self.program;
        for rtl in program.block(0).instructions() {
            // Register pressure forcing a spill has no emission strategy
            // here yet; report it so the caller falls back.
            for i in 0..rtl.result_count() {
                if rtl.result(i).rtl.valid() && rtl.result(i).hw.is_spill() {
                    return Err(CodegenError::SpillUnsupported);
                }
            }
            for i in 0..rtl.source_count() {
                if rtl.source(i).rtl.valid() && rtl.source(i).hw.is_spill() {
                    return Err(CodegenError::SpillUnsupported);
                }
            }

            self.emit_instruction(rtl);
        }

        // Function epilogue.
        let exit_label = self.exit_label;
        self.asm.bind_label(exit_label);
        self.asm.ldp_post(FP, LR, SP, 16);
        self.asm.ret();

        Ok(self.asm.finish())
    }

    // Load a 32-bit immediate with movz / movk.
    fn load_imm32(&mut self, rd: Xreg, value: u32) {
        self.asm.movz(false, rd, value as u16, 0);
        if value & !0xffff != 0 {
            self.asm.movk(false, rd, (value >> 16) as u16, 16);
        }
    }

    fn load_imm64(&mut self, rd: Xreg, value: u64) {
        self.asm.movz(true, rd, value as u16, 0);
        if value >= 0x1_0000 {
            self.asm.movk(true, rd, (value >> 16) as u16, 16);
            if value >= 0x1_0000_0000 {
                self.asm.movk(true, rd, (value >> 32) as u16, 32);
                if value >= 0x1_0000_0000_0000 {
                    self.asm.movk(true, rd, (value >> 48) as u16, 48);
                }
            }
        }
    }

    fn guest_register_offset(&self, rtl: &RtlInstruction) -> u32 {
        (self.register_address)(rtl.data as u16)
    }

    fn emit_instruction(&mut self, rtl: &RtlInstruction) {
        // Special reg-to-reg opcodes inserted by the register allocator.
        if rtl.op & RtlOpcode::FLAG != 0 {
            match RtlOpcode::from_op(rtl.op) {
                Some(RtlOpcode::Move) => {
                    assert!(
                        rtl.result(0).hw.ty() == HwRegisterType::Scalar,
                        "vector move from the allocator"
                    );
                    self.asm
                        .mov_reg(true, wx(rtl.result(0).hw), wx(rtl.source(0).hw));
                }
                Some(RtlOpcode::None) => {}
                None => panic!("invalid allocator RTL opcode {:#x}", rtl.op),
            }
            return;
        }

        let opcode = Opcode::from_op(rtl.op).expect("invalid arm64 RTL opcode");
        match opcode {
            Opcode::PushGprs => {
                for num in 0..32 {
                    if rtl.data & (1 << num) != 0 {
                        self.asm.str_pre(xreg(num), SP, -16);
                    }
                }
            }

            Opcode::PopGprs => {
                for num in (0..32).rev() {
                    if rtl.data & (1 << num) != 0 {
                        self.asm.ldr_post(xreg(num), SP, 16);
                    }
                }
            }

            Opcode::Label => {
                let id = rtl.data as usize;
                assert!(self.rtl_labels[id].is_none(), "label bound twice");
                let label = self.asm.create_label();
                self.asm.bind_label(label);
                self.rtl_labels[id] = Some(label);
                trace!("arm64 emit: label {id}");
            }

            Opcode::LoadImm32 => {
                assert!(rtl.result(0).hw.assigned());
                assert_eq!(rtl.data >> 32, 0);
                match rtl.result(0).hw.ty() {
                    HwRegisterType::Scalar => {
                        self.load_imm32(wx(rtl.result(0).hw), rtl.data as u32)
                    }
                    // Float constants are materialized through a scalar
                    // register and an fmov by the lowering.
                    _ => panic!("LoadImm32 into a non-scalar register"),
                }
            }

            Opcode::LoadImm64 => {
                assert!(rtl.result(0).hw.assigned());
                match rtl.result(0).hw.ty() {
                    HwRegisterType::Scalar => self.load_imm64(wx(rtl.result(0).hw), rtl.data),
                    _ => panic!("LoadImm64 into a non-scalar register"),
                }
            }

            Opcode::ReadGuestRegister32 => {
                let offset = self.guest_register_offset(rtl);
                match rtl.result(0).hw.ty() {
                    HwRegisterType::Scalar => {
                        self.asm
                            .ldr_imm(false, wx(rtl.result(0).hw), GPR_REGISTER_BASE, offset)
                    }
                    HwRegisterType::Vector => {
                        self.asm
                            .ldr_fp_imm(false, v(rtl.result(0).hw), GPR_REGISTER_BASE, offset)
                    }
                    HwRegisterType::Spill => unreachable!(),
                }
            }

            Opcode::ReadGuestRegister64 => {
                let offset = self.guest_register_offset(rtl);
                match rtl.result(0).hw.ty() {
                    HwRegisterType::Scalar => {
                        self.asm
                            .ldr_imm(true, wx(rtl.result(0).hw), GPR_REGISTER_BASE, offset)
                    }
                    HwRegisterType::Vector => {
                        self.asm
                            .ldr_fp_imm(true, v(rtl.result(0).hw), GPR_REGISTER_BASE, offset)
                    }
                    HwRegisterType::Spill => unreachable!(),
                }
            }

            Opcode::WriteGuestRegister32 => {
                let offset = self.guest_register_offset(rtl);
                match rtl.source(0).hw.ty() {
                    HwRegisterType::Scalar => {
                        self.asm
                            .str_imm(false, wx(rtl.source(0).hw), GPR_REGISTER_BASE, offset)
                    }
                    HwRegisterType::Vector => {
                        self.asm
                            .str_fp_imm(false, v(rtl.source(0).hw), GPR_REGISTER_BASE, offset)
                    }
                    HwRegisterType::Spill => unreachable!(),
                }
            }

            Opcode::WriteGuestRegister64 => {
                let offset = self.guest_register_offset(rtl);
                match rtl.source(0).hw.ty() {
                    HwRegisterType::Scalar => {
                        self.asm
                            .str_imm(true, wx(rtl.source(0).hw), GPR_REGISTER_BASE, offset)
                    }
                    HwRegisterType::Vector => {
                        self.asm
                            .str_fp_imm(true, v(rtl.source(0).hw), GPR_REGISTER_BASE, offset)
                    }
                    HwRegisterType::Spill => unreachable!(),
                }
            }

            // Fast-memory load: direct ldr through base + index.
            Opcode::LoadGuestMemory => {
                let dst = wx(rtl.result(0).hw);
                let address = wx(rtl.source(0).hw);
                match rtl.data {
                    4 => self.asm.ldr_reg(dst, GPR_MEMORY_BASE, address),
                    2 => self.asm.ldrh_reg(dst, GPR_MEMORY_BASE, address),
                    1 => self.asm.ldrb_reg(dst, GPR_MEMORY_BASE, address),
                    bytes => panic!("unhandled fast-memory load of {bytes} bytes"),
                }
            }

            Opcode::Fmov32 => self.emit_fmov(rtl, false),
            Opcode::Fmov64 => self.emit_fmov(rtl, true),

            Opcode::Add32 => self.emit_arith(rtl, false, Assembler::add_reg, Assembler::fadd),
            Opcode::Add64 => self.emit_arith(rtl, true, Assembler::add_reg, Assembler::fadd),
            Opcode::Sub32 => self.emit_arith(rtl, false, Assembler::sub_reg, Assembler::fsub),
            Opcode::Sub64 => self.emit_arith(rtl, true, Assembler::sub_reg, Assembler::fsub),

            Opcode::Umul32 => {
                let dst = wx(rtl.result(0).hw);
                let src1 = wx(rtl.source(0).hw);
                let src2 = wx(rtl.source(1).hw);
                self.asm.umaddl(dst, src1, src2, xreg(regs::ZR));
            }

            Opcode::Mul32 => {
                if rtl.result(0).hw.ty() == HwRegisterType::Vector {
                    let dst = v(rtl.result(0).hw);
                    let src1 = v(rtl.source(0).hw);
                    let src2 = v(rtl.source(1).hw);
                    self.asm.fmul(false, dst, src1, src2);
                } else {
                    let dst = wx(rtl.result(0).hw);
                    let src1 = wx(rtl.source(0).hw);
                    let src2 = wx(rtl.source(1).hw);
                    self.asm.smaddl(dst, src1, src2, xreg(regs::ZR));
                }
            }

            Opcode::Div32 => {
                assert!(rtl.result(0).hw.ty() == HwRegisterType::Vector);
                let dst = v(rtl.result(0).hw);
                let src1 = v(rtl.source(0).hw);
                let src2 = v(rtl.source(1).hw);
                self.asm.fdiv(false, dst, src1, src2);
            }

            Opcode::Sqrt32 => {
                assert!(rtl.result(0).hw.ty() == HwRegisterType::Vector);
                self.asm.fsqrt(false, v(rtl.result(0).hw), v(rtl.source(0).hw));
            }

            Opcode::Or32 => {
                self.asm.orr_reg(
                    false,
                    wx(rtl.result(0).hw),
                    wx(rtl.source(0).hw),
                    wx(rtl.source(1).hw),
                );
            }

            Opcode::And32 => {
                self.asm.and_reg(
                    false,
                    wx(rtl.result(0).hw),
                    wx(rtl.source(0).hw),
                    wx(rtl.source(1).hw),
                );
            }

            Opcode::And64 => {
                self.asm.and_reg(
                    true,
                    wx(rtl.result(0).hw),
                    wx(rtl.source(0).hw),
                    wx(rtl.source(1).hw),
                );
            }

            Opcode::Xor32 => {
                self.asm.eor_reg(
                    false,
                    wx(rtl.result(0).hw),
                    wx(rtl.source(0).hw),
                    wx(rtl.source(1).hw),
                );
            }

            Opcode::Or32Imm => {
                let imm = ImmLogic::maybe_from_u32(rtl.data as u32)
                    .expect("unencodable logical immediate");
                self.asm
                    .orr_imm(false, wx(rtl.result(0).hw), wx(rtl.source(0).hw), imm);
            }

            Opcode::And32Imm => {
                let imm = ImmLogic::maybe_from_u32(rtl.data as u32)
                    .expect("unencodable logical immediate");
                self.asm
                    .and_imm(false, wx(rtl.result(0).hw), wx(rtl.source(0).hw), imm);
            }

            Opcode::And64Imm => {
                let imm =
                    ImmLogic::maybe_from_u64(rtl.data).expect("unencodable logical immediate");
                self.asm
                    .and_imm(true, wx(rtl.result(0).hw), wx(rtl.source(0).hw), imm);
            }

            Opcode::Xor32Imm => {
                let imm = ImmLogic::maybe_from_u32(rtl.data as u32)
                    .expect("unencodable logical immediate");
                self.asm
                    .eor_imm(false, wx(rtl.result(0).hw), wx(rtl.source(0).hw), imm);
            }

            Opcode::Shl32Imm => self.emit_shift_imm(rtl, RegShift::Lsl),
            Opcode::Shr32Imm => self.emit_shift_imm(rtl, RegShift::Lsr),
            Opcode::Sar32Imm => self.emit_shift_imm(rtl, RegShift::Asr),

            Opcode::Shl32 => {
                self.asm.lslv(
                    false,
                    wx(rtl.result(0).hw),
                    wx(rtl.source(0).hw),
                    wx(rtl.source(1).hw),
                );
            }

            Opcode::Shr32 => {
                self.asm.lsrv(
                    false,
                    wx(rtl.result(0).hw),
                    wx(rtl.source(0).hw),
                    wx(rtl.source(1).hw),
                );
            }

            Opcode::Sar32 => {
                self.asm.asrv(
                    false,
                    wx(rtl.result(0).hw),
                    wx(rtl.source(0).hw),
                    wx(rtl.source(1).hw),
                );
            }

            Opcode::Extend32Byte => {
                // rd = zero + sxtb(src); the zero arrives as a register.
                self.asm.add_extended(
                    false,
                    wx(rtl.result(0).hw),
                    wx(rtl.source(1).hw),
                    wx(rtl.source(0).hw),
                    Extend::Sxtb,
                );
            }

            Opcode::Extend32Word => {
                self.asm.add_extended(
                    false,
                    wx(rtl.result(0).hw),
                    wx(rtl.source(1).hw),
                    wx(rtl.source(0).hw),
                    Extend::Sxth,
                );
            }

            Opcode::Test32 => {
                // rd = (src != 0); tst then cset.
                let dst = wx(rtl.result(0).hw);
                let src = wx(rtl.source(0).hw);
                self.asm.ands_reg(false, xreg(regs::ZR), src, src);
                self.asm.cset(false, dst, Cond::Ne);
            }

            Opcode::CondSelect32 => {
                let dst = wx(rtl.result(0).hw);
                let decision = wx(rtl.source(0).hw);
                let on_false = wx(rtl.source(1).hw);
                let on_true = wx(rtl.source(2).hw);
                self.asm
                    .subs_reg(false, xreg(regs::ZR), decision, xreg(regs::ZR));
                self.asm.csel(false, dst, on_false, on_true, Cond::Eq);
            }

            Opcode::Cmp => {
                let dst = wx(rtl.result(0).hw);
                let src1 = wx(rtl.source(0).hw);
                let src2 = wx(rtl.source(1).hw);
                let cond = cond_from_bits(rtl.data);
                self.asm.subs_reg(false, xreg(regs::ZR), src1, src2);
                self.asm.cset(false, dst, cond);
            }

            Opcode::CallFramed => self.emit_call_framed(rtl),

            Opcode::Ret => {
                let exit = self.exit_label;
                self.load_imm32(xreg(0), rtl.data as u32);
                self.asm.b(exit);
            }

            Opcode::CondRet => {
                let exit = self.exit_label;
                let decision = wx(rtl.source(0).hw);
                let skip = self.asm.create_label();
                self.asm
                    .subs_reg(true, xreg(regs::ZR), xreg(regs::ZR), decision);
                self.asm.b_cond(Cond::Eq, skip);
                self.load_imm32(xreg(0), rtl.data as u32);
                self.asm.b(exit);
                self.asm.bind_label(skip);
            }
        }
    }

    fn emit_fmov(&mut self, rtl: &RtlInstruction, is64: bool) {
        let dst = rtl.result(0).hw;
        let src = rtl.source(0).hw;
        match (dst.ty(), src.ty()) {
            (HwRegisterType::Scalar, HwRegisterType::Vector) => {
                self.asm.fmov_to_gpr(is64, wx(dst), v(src));
            }
            (HwRegisterType::Vector, HwRegisterType::Scalar) => {
                self.asm.fmov_from_gpr(is64, v(dst), wx(src));
            }
            (dst, src) => panic!("fmov between {dst:?} and {src:?}"),
        }
    }

    fn emit_arith(
        &mut self,
        rtl: &RtlInstruction,
        is64: bool,
        gpr: fn(&mut Assembler, bool, Xreg, Xreg, Xreg),
        fp: fn(&mut Assembler, bool, Vreg, Vreg, Vreg),
    ) {
        assert!(rtl.source(0).hw.assigned());
        assert!(rtl.source(1).hw.assigned());
        assert!(rtl.result(0).hw.assigned());

        if rtl.result(0).hw.ty() == HwRegisterType::Vector {
            fp(
                &mut self.asm,
                is64,
                v(rtl.result(0).hw),
                v(rtl.source(0).hw),
                v(rtl.source(1).hw),
            );
        } else {
            gpr(
                &mut self.asm,
                is64,
                wx(rtl.result(0).hw),
                wx(rtl.source(0).hw),
                wx(rtl.source(1).hw),
            );
        }
    }

    fn emit_shift_imm(&mut self, rtl: &RtlInstruction, shift: RegShift) {
        // Shift-by-constant through the shifted-register add against the
        // zero register.
        let amount = (rtl.data & 0x1f) as u8;
        self.asm.add_shifted(
            false,
            wx(rtl.result(0).hw),
            xreg(regs::ZR),
            wx(rtl.source(0).hw),
            shift,
            amount,
        );
    }

    // Form: {result =} source[0](guest, source[1], source[2], {source[3]}).
    // Caller-saved GPRs live across the call are saved in pairs; every
    // live vector register is saved individually.
    fn emit_call_framed(&mut self, rtl: &RtlInstruction) {
        let has_result = rtl.result_count() > 0;
        assert!(rtl.source(0).hw.assigned());
        let saved_state = rtl.saved_state();

        let call_address = wx(rtl.source(0).hw);

        let gpr_state = saved_state.get(HwRegisterType::Scalar);
        let caller_saved = regs::abi_caller_saved();
        let mut gpr_save_set: Vec<u8> = Vec::new();
        for num in 0..32u8 {
            let reg = HwRegister::new(HwRegisterType::Scalar, num.into());
            // The result register is overwritten anyway; even when it
            // shows as allocated, it was allocated for the result.
            if has_result && rtl.result(0).hw.index() == u16::from(num) {
                continue;
            }
            if !gpr_state.is_free(reg) && caller_saved & (1 << num) != 0 {
                gpr_save_set.push(num);
            }
        }

        let vec_state = saved_state.get(HwRegisterType::Vector);
        let mut vec_save_set: Vec<u8> = Vec::new();
        for num in 0..32u8 {
            let reg = HwRegister::new(HwRegisterType::Vector, num.into());
            if !vec_state.is_free(reg) {
                vec_save_set.push(num);
            }
        }

        // Save pairs, then a single str with padding when the count is
        // odd, keeping 16-byte alignment throughout.
        let mut i = 0;
        while i + 1 < gpr_save_set.len() {
            self.asm
                .stp_pre(xreg(gpr_save_set[i]), xreg(gpr_save_set[i + 1]), SP, -16);
            i += 2;
        }
        if gpr_save_set.len() % 2 == 1 {
            self.asm.str_pre(xreg(gpr_save_set[i]), SP, -16);
        }

        for &num in &vec_save_set {
            self.asm.str_fp_pre(vreg(num), SP, -16);
        }

        // x0 holds the guest pointer; the remaining arguments arrived in
        // x1-x3 through the operand pins.
        self.asm.blr(call_address);

        if has_result {
            self.asm.mov_reg(true, wx(rtl.result(0).hw), xreg(0));
        }

        for &num in vec_save_set.iter().rev() {
            self.asm.ldr_fp_post(vreg(num), SP, 16);
        }

        if gpr_save_set.len() % 2 == 1 {
            self.asm.ldr_post(xreg(gpr_save_set[gpr_save_set.len() - 1]), SP, 16);
        }
        let mut i = gpr_save_set.len() & !1;
        while i > 0 {
            self.asm
                .ldp_post(xreg(gpr_save_set[i - 2]), xreg(gpr_save_set[i - 1]), SP, 16);
            i -= 2;
        }
    }
}
