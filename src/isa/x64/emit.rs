//! x86-64 emission: allocated RTL to machine code.
//!
//! Two concerns meet here: selecting the native encoding for each RTL
//! opcode, and reconciling operand storage (register vs. spill memory)
//! with each instruction's addressing-mode restrictions. The common
//! two-operand shapes run through the descriptor table; everything with
//! custom operand handling (labels, branches, immediates, widening
//! multiplies, guest accesses, framed calls) has an explicit arm.

use log::trace;

use crate::binemit::CodeOffset;
use crate::isa::x64::asm::{AluOp, Amode, Assembler, Cc, RegMem, ShiftKind, XmmMem};
use crate::isa::x64::opcodes::{emit_entry, EmitEntry, EmitKind, Opcode};
use crate::isa::x64::regs::{
    self, Gpr, Xmm, GPR_REGISTER_BASE, GPR_SCRATCH, VEC_SCRATCH,
};
use crate::isa::x64::LoadEmitter;
use crate::isa::RegisterAddressFn;
use crate::rtl::{
    HwRegister, HwRegisterType, RegisterSize, RtlInstruction, RtlOpcode, RtlProgram,
};

/// Spill slots live below the frame base register, 8 bytes each.
fn spill_slot(hw: HwRegister) -> Amode {
    Amode::base_disp(regs::RBP, i32::from(hw.spill_index()) * 8)
}

/// A hardware assignment as a reg-or-mem operand.
fn assignment(hw: HwRegister) -> RegMem {
    if hw.is_spill() {
        RegMem::Mem(spill_slot(hw))
    } else {
        RegMem::Reg(Gpr::from_hw(hw))
    }
}

/// A vector hardware assignment as an xmm-or-mem operand.
fn assignment_vec(hw: HwRegister) -> XmmMem {
    if hw.is_spill() {
        XmmMem::Mem(spill_slot(hw))
    } else {
        XmmMem::Reg(Xmm::from_hw(hw))
    }
}

pub(crate) struct EmitCtx<'a> {
    asm: Assembler,
    program: &'a RtlProgram,
    register_address: RegisterAddressFn,
    load_helper_address: u64,
    load_emitter: Option<LoadEmitter>,
    /// Byte offset each label resolved to.
    labels: Vec<Option<CodeOffset>>,
    /// Recorded branch displacement fields: (disp32 offset, label id).
    /// The displacement is relative to the byte after the field.
    branches: Vec<(CodeOffset, u16)>,
    /// Callee-saved registers the prologue actually saves.
    push_mask: u32,
    /// Stack the prologue carves out: the aligned spill area plus an 8
    /// byte pad when the push count is odd, keeping call sites 16-byte
    /// aligned.
    frame_bytes: u32,
}

impl<'a> EmitCtx<'a> {
    pub(crate) fn new(
        program: &'a RtlProgram,
        register_address: RegisterAddressFn,
        load_helper_address: u64,
        load_emitter: Option<LoadEmitter>,
    ) -> Self {
        let touched = program.register_usage(HwRegisterType::Scalar).allocated_mask() as u32;
        let push_mask = regs::abi_callee_saved() & touched;
        let spill_bytes = (program.spill_size() * 8 + 15) & !15;
        let pad = if push_mask.count_ones() % 2 == 1 { 8 } else { 0 };
        Self {
            asm: Assembler::new(),
            program,
            register_address,
            load_helper_address,
            load_emitter,
            labels: vec![None; program.label_count()],
            branches: Vec::new(),
            push_mask,
            frame_bytes: spill_bytes + pad,
        }
    }

    /// Emit the whole program and return the machine code.
    pub(crate) fn assemble(mut self) -> Vec<u8> {
        let program = self.program;
        for rtl in program.block(0).instructions() {
            self.emit_instruction(rtl);
        }

        // Patch all relative-offset branches in the emitted stream.
        for &(field, label) in &self.branches {
            let target = self.labels[label as usize].expect("branch to unbound label");
            let reference = field as i64 + 4;
            let displacement =
                i32::try_from(target as i64 - reference).expect("branch displacement overflow");
            self.asm.patch_disp32(field, displacement);
        }

        self.asm.finish()
    }

    fn emit_instruction(&mut self, rtl: &RtlInstruction) {
        // Allocator-internal opcodes sit in the high half of the space.
        if rtl.op & RtlOpcode::FLAG != 0 {
            match RtlOpcode::from_op(rtl.op) {
                Some(RtlOpcode::Move) => self.emit_move(rtl),
                Some(RtlOpcode::None) => {}
                None => panic!("invalid allocator RTL opcode {:#x}", rtl.op),
            }
            return;
        }

        let entry = emit_entry(rtl.op);
        match entry.opcode {
            Opcode::Label => {
                let id = rtl.data as usize;
                assert!(self.labels[id].is_none(), "label bound twice");
                self.labels[id] = Some(self.asm.cur_offset());
                trace!("x64 emit: label {id} at {}", self.asm.cur_offset());
            }

            Opcode::PushRegisters => {
                let mask = (rtl.data as u32) & self.push_mask;
                for reg in 0..16 {
                    if mask & (1 << reg) != 0 {
                        self.asm.push(Gpr::new(reg));
                    }
                }
                if self.frame_bytes > 0 {
                    self.asm.alu_imm32(
                        RegisterSize::Qword,
                        AluOp::Sub,
                        regs::RSP.into(),
                        self.frame_bytes,
                    );
                    self.asm
                        .mov(RegisterSize::Qword, regs::RBP.into(), regs::RSP.into());
                }
            }

            Opcode::PopRegisters => {
                if self.frame_bytes > 0 {
                    self.asm.alu_imm32(
                        RegisterSize::Qword,
                        AluOp::Add,
                        regs::RSP.into(),
                        self.frame_bytes,
                    );
                }
                let mask = (rtl.data as u32) & self.push_mask;
                for i in 0..16 {
                    // Restore in reverse order of the saves.
                    let reg = 15 - i;
                    if mask & (1 << reg) != 0 {
                        self.asm.pop(Gpr::new(reg));
                    }
                }
            }

            // The frame (spill area + alignment pad) is carved out as part
            // of PushRegisters so its size can depend on the push count;
            // these opcodes mark where it logically begins and ends.
            Opcode::AllocateSpill | Opcode::FreeSpill => {}

            Opcode::ReadGuestRegister32 => self.emit_read_guest(rtl, RegisterSize::Dword),
            Opcode::ReadGuestRegister64 => self.emit_read_guest(rtl, RegisterSize::Qword),
            Opcode::WriteGuestRegister32 => self.emit_write_guest(rtl, RegisterSize::Dword),
            Opcode::WriteGuestRegister64 => self.emit_write_guest(rtl, RegisterSize::Qword),

            Opcode::LoadGuestMemory => self.emit_load_guest_memory(rtl),
            Opcode::CallFramed => self.emit_call_framed(rtl),

            Opcode::Ret => self.asm.ret(),

            Opcode::LoadByteImm8 => {
                self.asm.mov_imm8_rm(assignment(rtl.result(0).hw), rtl.data as u8);
            }

            Opcode::LoadQwordImm32 => {
                // A 32-bit register write zero-extends.
                let hw = rtl.result(0).hw;
                if !hw.is_spill() {
                    self.asm.mov_imm32(Gpr::from_hw(hw), rtl.data as u32);
                } else {
                    self.asm.mov_imm32(GPR_SCRATCH, rtl.data as u32);
                    self.asm
                        .mov(RegisterSize::Qword, assignment(hw), GPR_SCRATCH.into());
                }
            }

            Opcode::LoadQwordImm64 => {
                let hw = rtl.result(0).hw;
                assert!(!hw.is_spill());
                self.asm.mov_imm64(Gpr::from_hw(hw), rtl.data);
            }

            Opcode::ShrByte => self.emit_shift_cl(rtl, RegisterSize::Byte, ShiftKind::Shr),
            Opcode::ShrWord => self.emit_shift_cl(rtl, RegisterSize::Word, ShiftKind::Shr),
            Opcode::ShrDword => self.emit_shift_cl(rtl, RegisterSize::Dword, ShiftKind::Shr),
            Opcode::ShrQword => self.emit_shift_cl(rtl, RegisterSize::Qword, ShiftKind::Shr),
            Opcode::ShlByte => self.emit_shift_cl(rtl, RegisterSize::Byte, ShiftKind::Shl),
            Opcode::ShlWord => self.emit_shift_cl(rtl, RegisterSize::Word, ShiftKind::Shl),
            Opcode::ShlDword => self.emit_shift_cl(rtl, RegisterSize::Dword, ShiftKind::Shl),
            Opcode::ShlQword => self.emit_shift_cl(rtl, RegisterSize::Qword, ShiftKind::Shl),
            Opcode::SarByte => self.emit_shift_cl(rtl, RegisterSize::Byte, ShiftKind::Sar),
            Opcode::SarWord => self.emit_shift_cl(rtl, RegisterSize::Word, ShiftKind::Sar),
            Opcode::SarDword => self.emit_shift_cl(rtl, RegisterSize::Dword, ShiftKind::Sar),
            Opcode::SarQword => self.emit_shift_cl(rtl, RegisterSize::Qword, ShiftKind::Sar),
            Opcode::RolByte => self.emit_shift_cl(rtl, RegisterSize::Byte, ShiftKind::Rol),
            Opcode::RolWord => self.emit_shift_cl(rtl, RegisterSize::Word, ShiftKind::Rol),
            Opcode::RolDword => self.emit_shift_cl(rtl, RegisterSize::Dword, ShiftKind::Rol),
            Opcode::RolQword => self.emit_shift_cl(rtl, RegisterSize::Qword, ShiftKind::Rol),
            Opcode::RorByte => self.emit_shift_cl(rtl, RegisterSize::Byte, ShiftKind::Ror),
            Opcode::RorWord => self.emit_shift_cl(rtl, RegisterSize::Word, ShiftKind::Ror),
            Opcode::RorDword => self.emit_shift_cl(rtl, RegisterSize::Dword, ShiftKind::Ror),
            Opcode::RorQword => self.emit_shift_cl(rtl, RegisterSize::Qword, ShiftKind::Ror),

            Opcode::ShrDwordImm8 => self.emit_shift_imm(rtl, ShiftKind::Shr),
            Opcode::ShlDwordImm8 => self.emit_shift_imm(rtl, ShiftKind::Shl),
            Opcode::SarDwordImm8 => self.emit_shift_imm(rtl, ShiftKind::Sar),

            Opcode::AndDwordImm32 => self.emit_alu_imm32(rtl, AluOp::And),
            Opcode::OrDwordImm32 => self.emit_alu_imm32(rtl, AluOp::Or),
            Opcode::AddDwordImm32 => self.emit_alu_imm32(rtl, AluOp::Add),
            Opcode::SubDwordImm32 => self.emit_alu_imm32(rtl, AluOp::Sub),

            Opcode::XorByteImm8 => {
                self.fix_result_source0_mismatch(rtl);
                self.asm.alu_imm8(
                    RegisterSize::Dword,
                    AluOp::Xor,
                    assignment(rtl.result(0).hw),
                    rtl.data as i8,
                );
            }

            Opcode::TestDwordImm32 => {
                self.asm
                    .test_imm32(RegisterSize::Dword, assignment(rtl.source(0).hw), rtl.data as u32);
            }

            Opcode::CmpDwordImm32 => {
                self.asm.alu_imm32(
                    RegisterSize::Dword,
                    AluOp::Cmp,
                    assignment(rtl.source(0).hw),
                    rtl.data as u32,
                );
            }

            // One-operand widening multiply; rax/rdx arrive via pins.
            Opcode::MulByte => self.emit_mul(rtl, RegisterSize::Byte),
            Opcode::MulWord => self.emit_mul(rtl, RegisterSize::Word),
            Opcode::MulDword => self.emit_mul(rtl, RegisterSize::Dword),
            Opcode::MulQword => self.emit_mul(rtl, RegisterSize::Qword),

            Opcode::Extend32Byte => self.emit_extend(rtl, RegisterSize::Dword, RegisterSize::Byte, true),
            Opcode::Extend32Word => self.emit_extend(rtl, RegisterSize::Dword, RegisterSize::Word, true),
            Opcode::Extend64Byte => self.emit_extend(rtl, RegisterSize::Qword, RegisterSize::Byte, true),
            Opcode::Extend64Word => self.emit_extend(rtl, RegisterSize::Qword, RegisterSize::Word, true),
            Opcode::Extend64Dword => self.emit_extend(rtl, RegisterSize::Qword, RegisterSize::Dword, true),
            Opcode::Zextend32Byte => self.emit_extend(rtl, RegisterSize::Dword, RegisterSize::Byte, false),
            Opcode::Zextend32Word => self.emit_extend(rtl, RegisterSize::Dword, RegisterSize::Word, false),
            Opcode::Zextend64Byte => self.emit_extend(rtl, RegisterSize::Dword, RegisterSize::Byte, false),
            Opcode::Zextend64Word => self.emit_extend(rtl, RegisterSize::Qword, RegisterSize::Word, false),

            Opcode::Zextend64Dword => {
                // A plain 32-bit move zero-extends to 64 bits.
                self.emit_unary_to_reg(rtl, RegisterSize::Dword, |asm, dst, src| {
                    asm.mov(RegisterSize::Dword, dst.into(), src)
                });
            }

            Opcode::MovdDword => self.emit_movd(rtl, RegisterSize::Dword),
            Opcode::MovdQword => self.emit_movd(rtl, RegisterSize::Qword),

            Opcode::Jmp => {
                let field = self.asm.jmp_disp32();
                self.branches.push((field, rtl.data as u16));
            }

            Opcode::Jnz => {
                let field = self.asm.jcc_disp32(Cc::Nz);
                self.branches.push((field, rtl.data as u16));
            }

            Opcode::CvtSsI32 => self.emit_cvt(rtl, RegisterSize::Dword, false),
            Opcode::CvtSsI64 => self.emit_cvt(rtl, RegisterSize::Qword, false),
            Opcode::CvtSdI32 => self.emit_cvt(rtl, RegisterSize::Dword, true),
            Opcode::CvtSdI64 => self.emit_cvt(rtl, RegisterSize::Qword, true),

            // Everything else runs through the descriptor table.
            _ => match entry.emit {
                EmitKind::Unary(_) => self.emit1(entry, rtl),
                EmitKind::Binary(_) => self.emit2(entry, rtl),
                EmitKind::Vector(_) => self.emit_vec2(entry, rtl),
                EmitKind::Custom => panic!("unhandled x64 RTL opcode {:?}", entry.opcode),
            },
        }
    }

    // Move instructions are inserted by the register allocator to satisfy
    // constraints that hit conflicts. Only scalar moves occur; vector
    // operands carry no pins on this back-end.
    fn emit_move(&mut self, rtl: &RtlInstruction) {
        let dst = rtl.result(0).hw;
        let src = rtl.source(0).hw;
        assert!(
            dst.ty() != HwRegisterType::Vector && src.ty() != HwRegisterType::Vector,
            "vector move from the allocator"
        );
        if dst.is_spill() {
            assert!(!src.is_spill());
            self.asm
                .mov(RegisterSize::Qword, spill_slot(dst).into(), assignment(src));
        } else if src.is_spill() {
            self.asm
                .mov(RegisterSize::Qword, assignment(dst), spill_slot(src).into());
        } else {
            self.asm
                .mov(RegisterSize::Qword, assignment(dst), assignment(src));
        }
    }

    // Copy between two hardware locations, routing through the scratch
    // register when both are spill slots.
    fn mov_any(&mut self, size: RegisterSize, dst: HwRegister, src: HwRegister) {
        if dst.is_spill() && src.is_spill() {
            self.asm.mov(size, GPR_SCRATCH.into(), assignment(src));
            self.asm.mov(size, assignment(dst), GPR_SCRATCH.into());
        } else if dst != src {
            self.asm.mov(size, assignment(dst), assignment(src));
        }
    }

    fn movd_any(&mut self, size: RegisterSize, dst: HwRegister, src: HwRegister) {
        // Vector copies, spill slots included. Packed-single suffices for
        // every scalar width in use.
        let _ = size;
        if dst.is_spill() {
            assert!(!src.is_spill());
            self.asm
                .movups(assignment_vec(dst), XmmMem::Reg(Xmm::from_hw(src)));
        } else {
            self.asm
                .movups(XmmMem::Reg(Xmm::from_hw(dst)), assignment_vec(src));
        }
    }

    // Non-destructive operation writing a register; a spilled destination
    // computes into scratch and stores.
    fn emit_unary_to_reg(
        &mut self,
        rtl: &RtlInstruction,
        store_size: RegisterSize,
        emit: impl Fn(&mut Assembler, Gpr, RegMem),
    ) {
        let src = assignment(rtl.source(0).hw);
        let dst = rtl.result(0).hw;
        if !dst.is_spill() {
            emit(&mut self.asm, Gpr::from_hw(dst), src);
        } else {
            emit(&mut self.asm, GPR_SCRATCH, src);
            self.asm.mov(store_size, assignment(dst), GPR_SCRATCH.into());
        }
    }

    fn emit_extend(
        &mut self,
        rtl: &RtlInstruction,
        to: RegisterSize,
        from: RegisterSize,
        signed: bool,
    ) {
        self.emit_unary_to_reg(rtl, to, |asm, dst, src| {
            if signed {
                asm.movsx(to, from, dst, src);
            } else {
                asm.movzx(to, from, dst, src);
            }
        });
    }

    fn emit_cvt(&mut self, rtl: &RtlInstruction, to: RegisterSize, double: bool) {
        let src = assignment_vec(rtl.source(0).hw);
        let dst = rtl.result(0).hw;
        let reg = if dst.is_spill() { GPR_SCRATCH } else { Gpr::from_hw(dst) };
        if double {
            self.asm.cvttsd2si(to, reg, src);
        } else {
            self.asm.cvttss2si(to, reg, src);
        }
        if dst.is_spill() {
            self.asm.mov(to, assignment(dst), GPR_SCRATCH.into());
        }
    }

    // GPR <-> XMM transfers; also covers the GPR-to-GPR and spill cases
    // the lowering produces around loads and stores of float values.
    fn emit_movd(&mut self, rtl: &RtlInstruction, size: RegisterSize) {
        let dst = rtl.result(0).hw;
        let src = rtl.source(0).hw;
        if dst.is_spill() && src.is_spill() {
            self.asm.mov(size, GPR_SCRATCH.into(), assignment(src));
            self.asm.mov(size, assignment(dst), GPR_SCRATCH.into());
        } else if dst.ty() == HwRegisterType::Vector {
            self.asm.movd_g2x(size, Xmm::from_hw(dst), assignment(src));
        } else if src.ty() == HwRegisterType::Vector {
            self.asm.movd_x2g(size, assignment(dst), Xmm::from_hw(src));
        } else {
            self.asm.mov(size, assignment(dst), assignment(src));
        }
    }

    // Destructive shift/rotate by cl. The count is pinned to rcx by the
    // lowering; when source and destination were not merged, either move
    // the source into place or work in scratch if the destination aliases
    // rcx or sits in a spill slot.
    fn emit_shift_cl(&mut self, rtl: &RtlInstruction, size: RegisterSize, kind: ShiftKind) {
        debug_assert_eq!(rtl.source(1).hw.index(), u16::from(regs::RCX.enc()));
        let dst = rtl.result(0).hw;
        let src = rtl.source(0).hw;

        let mut use_scratch = false;
        if src != dst {
            if !dst.is_spill() && dst != rtl.source(1).hw {
                self.asm.mov(size, assignment(dst), assignment(src));
            } else {
                self.asm.mov(size, GPR_SCRATCH.into(), assignment(src));
                use_scratch = true;
            }
        }

        if use_scratch {
            self.asm.shift_cl(size, kind, GPR_SCRATCH.into());
            self.asm.mov(size, assignment(dst), GPR_SCRATCH.into());
        } else {
            self.asm.shift_cl(size, kind, assignment(dst));
        }
    }

    fn emit_shift_imm(&mut self, rtl: &RtlInstruction, kind: ShiftKind) {
        self.fix_result_source0_mismatch(rtl);
        self.asm
            .shift_imm(RegisterSize::Dword, kind, assignment(rtl.result(0).hw), rtl.data as u8);
    }

    fn emit_alu_imm32(&mut self, rtl: &RtlInstruction, op: AluOp) {
        self.fix_result_source0_mismatch(rtl);
        self.asm
            .alu_imm32(RegisterSize::Dword, op, assignment(rtl.result(0).hw), rtl.data as u32);
    }

    // For instructions with one in/out register and an immediate second
    // operand: initialize the destination from the source when the
    // allocator could not merge them.
    fn fix_result_source0_mismatch(&mut self, rtl: &RtlInstruction) {
        let dst = rtl.result(0).hw;
        let src = rtl.source(0).hw;
        if dst != src {
            self.mov_any(RegisterSize::Dword, dst, src);
        }
    }

    fn emit_mul(&mut self, rtl: &RtlInstruction, size: RegisterSize) {
        let src = rtl.source(0).hw;
        if src.is_spill() {
            self.asm.mov(size, GPR_SCRATCH.into(), assignment(src));
            self.asm.mul(size, GPR_SCRATCH.into());
        } else {
            self.asm.mul(size, assignment(src));
        }
    }

    // Generic emission for one-operand instructions, via the descriptor
    // table.
    fn emit1(&mut self, entry: &EmitEntry, rtl: &RtlInstruction) {
        let EmitKind::Unary(emit) = entry.emit else {
            unreachable!()
        };
        assert!(entry.first_output);
        assert!(
            (rtl.source_count() == 1 && entry.first_input)
                || (rtl.source_count() == 0 && !entry.first_input)
        );
        assert_eq!(rtl.result_count(), 1);

        // Destructive input: initialize the destination when source and
        // destination were not merged.
        if entry.first_input && rtl.result(0).hw != rtl.source(0).hw {
            self.mov_any(entry.size, rtl.result(0).hw, rtl.source(0).hw);
        }

        emit(&mut self.asm, entry.size, assignment(rtl.result(0).hw));
    }

    // Generic emission for two-operand GPR instructions, via the
    // descriptor table. At most one operand ends up in the scratch
    // register.
    fn emit2(&mut self, entry: &EmitEntry, rtl: &RtlInstruction) {
        let EmitKind::Binary(emit) = entry.emit else {
            unreachable!()
        };
        assert!(entry.first_input || entry.first_output);
        assert!((rtl.result_count() == 1 && entry.first_output) || !entry.first_output);

        // Whether operand 0 must go through scratch:
        //   (1) the destination is spilled but the instruction wants a
        //       register there,
        //   (2) input and output share the operand but were not merged,
        //       and either both sides are memory or the destination
        //       aliases the other source.
        // If both operands are memory we prefer to keep operand 0 in
        // memory, saving the final writeback.
        let mut first_scratch = false;
        let mut first_memory;
        if entry.first_input {
            assert_eq!(rtl.source_count(), 2);
            first_memory = if entry.first_output {
                rtl.result(0).hw.is_spill()
            } else {
                rtl.source(0).hw.is_spill()
            };
            if first_memory && !entry.first_memory {
                first_scratch = true;
                first_memory = false;
            } else if entry.first_output && rtl.result(0).hw != rtl.source(0).hw {
                if rtl.result(0).hw == rtl.source(1).hw {
                    first_scratch = true;
                    first_memory = false;
                } else if rtl.result(0).hw.is_spill() && rtl.source(0).hw.is_spill() {
                    first_scratch = true;
                    first_memory = false;
                }
            }
        } else {
            assert_eq!(rtl.source_count(), 1);
            assert!(!rtl.result(0).hw.is_spill() || entry.first_memory);
            first_memory = rtl.result(0).hw.is_spill();
        }

        // Whether operand 1 must go through scratch: it is spilled and the
        // instruction wants a register, or both operands would be memory.
        let second_source = if entry.first_input {
            rtl.source(1).hw
        } else {
            rtl.source(0).hw
        };
        let second_scratch =
            second_source.is_spill() && (!entry.second_memory || first_memory);

        assert!(!(first_scratch && second_scratch));

        // Prepare operand 0 storage when it is an input.
        if entry.first_input {
            if first_scratch {
                self.mov_any(entry.size, GPR_SCRATCH.hw(), rtl.source(0).hw);
            } else if entry.first_output && rtl.result(0).hw != rtl.source(0).hw {
                self.mov_any(entry.size, rtl.result(0).hw, rtl.source(0).hw);
            }
        }

        // Prepare operand 1 storage.
        if second_scratch {
            self.mov_any(entry.size, GPR_SCRATCH.hw(), second_source);
        }

        let operand0 = if entry.first_input {
            if first_scratch {
                GPR_SCRATCH.hw()
            } else if entry.first_output {
                rtl.result(0).hw
            } else {
                rtl.source(0).hw
            }
        } else {
            assert!(!first_scratch);
            rtl.result(0).hw
        };
        let operand1 = if second_scratch {
            GPR_SCRATCH.hw()
        } else {
            second_source
        };

        emit(&mut self.asm, entry.size, assignment(operand0), assignment(operand1));

        // Write the result back when the operation ran in scratch.
        if entry.first_output && first_scratch {
            self.mov_any(entry.size, rtl.result(0).hw, GPR_SCRATCH.hw());
        }
    }

    // Generic emission for two-operand vector instructions. All the
    // implemented SSE forms accept memory in the second operand and
    // require a register destination.
    fn emit_vec2(&mut self, entry: &EmitEntry, rtl: &RtlInstruction) {
        let EmitKind::Vector(emit) = entry.emit else {
            unreachable!()
        };
        assert!(entry.second_memory && entry.first_output);

        let mut first_scratch = false;
        if rtl.result(0).hw.is_spill() {
            first_scratch = true;
        } else if entry.first_input {
            assert_eq!(rtl.source_count(), 2);
            if rtl.result(0).hw != rtl.source(0).hw && rtl.result(0).hw == rtl.source(1).hw {
                first_scratch = true;
            }
        } else {
            assert_eq!(rtl.source_count(), 1);
        }

        if entry.first_input {
            if first_scratch {
                self.movd_any(entry.size, VEC_SCRATCH.hw(), rtl.source(0).hw);
            } else if rtl.result(0).hw != rtl.source(0).hw {
                self.movd_any(entry.size, rtl.result(0).hw, rtl.source(0).hw);
            }
        }

        let operand0 = if first_scratch {
            VEC_SCRATCH
        } else {
            Xmm::from_hw(rtl.result(0).hw)
        };
        let operand1 = if entry.first_input {
            rtl.source(1).hw
        } else {
            rtl.source(0).hw
        };

        emit(&mut self.asm, operand0, assignment_vec(operand1));

        if first_scratch {
            self.movd_any(entry.size, rtl.result(0).hw, VEC_SCRATCH.hw());
        }
    }

    fn guest_register(&self, rtl: &RtlInstruction) -> Amode {
        let index = rtl.data as u16;
        let displacement = (self.register_address)(index);
        Amode::base_disp(
            GPR_REGISTER_BASE,
            i32::try_from(displacement).expect("guest register displacement overflow"),
        )
    }

    fn emit_read_guest(&mut self, rtl: &RtlInstruction, size: RegisterSize) {
        let guest = self.guest_register(rtl);
        let dst = rtl.result(0).hw;
        if dst.is_spill() {
            self.asm.mov(size, GPR_SCRATCH.into(), guest.into());
            self.asm
                .mov(size, assignment(dst), GPR_SCRATCH.into());
        } else if dst.ty() == HwRegisterType::Vector {
            self.asm.movd_g2x(size, Xmm::from_hw(dst), guest.into());
        } else {
            self.asm.mov(size, assignment(dst), guest.into());
        }
    }

    fn emit_write_guest(&mut self, rtl: &RtlInstruction, size: RegisterSize) {
        let guest = self.guest_register(rtl);
        let src = rtl.source(0).hw;
        if src.is_spill() {
            self.asm.mov(size, GPR_SCRATCH.into(), assignment(src));
            self.asm.mov(size, guest.into(), GPR_SCRATCH.into());
        } else if src.ty() == HwRegisterType::Vector {
            self.asm.movd_x2g(size, guest.into(), Xmm::from_hw(src));
        } else {
            self.asm.mov(size, guest.into(), assignment(src));
        }
    }

    // The caller-saved registers that are live across a helper call: the
    // intersection of the ABI caller-saved set with the registers the
    // allocator had handed out at this point, minus rax (result) and the
    // scratch.
    fn call_save_masks(&self, rtl: &RtlInstruction) -> (u32, u32) {
        let saved_state = rtl.saved_state();

        let gpr_state = saved_state.get(HwRegisterType::Scalar);
        let mut gpmask = regs::abi_caller_saved()
            & !(1 << regs::RAX.enc())
            & !(1 << GPR_SCRATCH.enc());
        for i in 0..16u16 {
            if gpr_state.is_free(HwRegister::new(HwRegisterType::Scalar, i)) {
                gpmask &= !(1 << i);
            }
        }

        let vec_state = saved_state.get(HwRegisterType::Vector);
        let mut vecmask: u32 = 0xffff & !(1 << VEC_SCRATCH.enc());
        for i in 0..16u16 {
            if vec_state.is_free(HwRegister::new(HwRegisterType::Vector, i)) {
                vecmask &= !(1 << i);
            }
        }

        (gpmask, vecmask)
    }

    fn push_call_frame(&mut self, gpmask: u32, vecmask: u32) {
        // An odd number of pushes keeps the call site 16-byte aligned
        // (the frame below already re-established alignment minus the
        // return address slot).
        let mut pushes = 0u32;
        for reg in 0..16 {
            if gpmask & (1 << reg) != 0 {
                self.asm.push(Gpr::new(reg));
                pushes += 1;
            }
        }
        if pushes % 2 == 0 {
            self.asm.push(regs::RCX);
        }

        if vecmask != 0 {
            self.asm.alu_imm32(
                RegisterSize::Qword,
                AluOp::Sub,
                regs::RSP.into(),
                16 * 8,
            );
            for reg in 0..16u8 {
                if vecmask & (1 << reg) != 0 {
                    self.asm.movd_x2g(
                        RegisterSize::Qword,
                        Amode::base_disp(regs::RSP, i32::from(reg) * 8).into(),
                        Xmm::new(reg),
                    );
                }
            }
        }
    }

    fn pop_call_frame(&mut self, gpmask: u32, vecmask: u32) {
        if vecmask != 0 {
            for i in 0..16u8 {
                let reg = 15 - i;
                if vecmask & (1 << reg) != 0 {
                    self.asm.movd_g2x(
                        RegisterSize::Qword,
                        Xmm::new(reg),
                        Amode::base_disp(regs::RSP, i32::from(reg) * 8).into(),
                    );
                }
            }
            self.asm.alu_imm32(
                RegisterSize::Qword,
                AluOp::Add,
                regs::RSP.into(),
                16 * 8,
            );
        }

        let pushes: u32 = (0..16).map(|reg| (gpmask >> reg) & 1).sum();
        if pushes % 2 == 0 {
            self.asm.pop(regs::RCX);
        }
        for i in 0..16 {
            let reg = 15 - i;
            if gpmask & (1 << reg) != 0 {
                self.asm.pop(Gpr::new(reg));
            }
        }
    }

    fn emit_load_guest_memory(&mut self, rtl: &RtlInstruction) {
        let bytes = rtl.data as usize;

        // Fast path: the embedder inlines the access.
        if let Some(load_emitter) = self.load_emitter {
            let address = if rtl.source(0).hw.is_spill() {
                self.asm.mov(
                    RegisterSize::Dword,
                    GPR_SCRATCH.into(),
                    assignment(rtl.source(0).hw),
                );
                GPR_SCRATCH
            } else {
                Gpr::from_hw(rtl.source(0).hw)
            };

            let result_spilled = rtl.result(0).hw.is_spill();
            let result = if result_spilled {
                GPR_SCRATCH
            } else {
                Gpr::from_hw(rtl.result(0).hw)
            };

            load_emitter(&mut self.asm, bytes, address, result);

            if result_spilled {
                self.asm.mov(
                    RegisterSize::Qword,
                    assignment(rtl.result(0).hw),
                    GPR_SCRATCH.into(),
                );
            }
            return;
        }

        let (gpmask, vecmask) = self.call_save_masks(rtl);
        self.push_call_frame(gpmask, vecmask);

        // Arguments: guest pointer already lives in rdi; the address goes
        // to esi, the byte count to edx, the helper address rides in rax.
        if rtl.source(0).hw.is_spill() {
            self.asm.mov(
                RegisterSize::Dword,
                regs::RSI.into(),
                assignment(rtl.source(0).hw),
            );
        } else if rtl.source(0).hw != regs::RSI.hw() {
            self.asm.mov(
                RegisterSize::Dword,
                regs::RSI.into(),
                assignment(rtl.source(0).hw),
            );
        }

        assert!(bytes == 1 || bytes == 2 || bytes == 4 || bytes == 8);
        self.asm.mov_imm32(regs::RDX, bytes as u32);
        self.asm.mov_imm64(regs::RAX, self.load_helper_address);
        self.asm.call(regs::RAX);

        self.pop_call_frame(gpmask, vecmask);
    }

    fn emit_call_framed(&mut self, rtl: &RtlInstruction) {
        let (gpmask, vecmask) = self.call_save_masks(rtl);
        self.push_call_frame(gpmask, vecmask);

        // Argument registers are populated by the allocator's enforcement
        // of the operand pins; only the call itself remains.
        self.asm.call(Gpr::from_hw(rtl.source(0).hw));

        self.pop_call_frame(gpmask, vecmask);
    }
}
