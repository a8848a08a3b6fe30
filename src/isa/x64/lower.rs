//! x86-64 lowering: guest IR to back-end RTL.
//!
//! One pass over the IR, one match arm per guest opcode. Register
//! constraints are expressed purely through operand records: a shift by a
//! variable count pins its count to rcx, a widening multiply pins its
//! results to rax/rdx, helper calls pin their arguments to the Sys V
//! argument registers. Constants are materialized through load-immediate
//! opcodes the first time they are used, and common 32-bit immediate
//! shapes take single-instruction fast paths instead.

use crate::ir::{self, IrProgram};
use crate::isa::x64::opcodes::Opcode;
use crate::isa::x64::regs::{self, Gpr, GPR_MEMORY_BASE, GPR_REGISTER_BASE, GPR_SCRATCH};
use crate::rtl::{
    HwRegisterType, LabelId, RegisterAssignment, RegisterSize, RtlFlags, RtlProgram, RtlRegister,
};

/// The finished lowering of one guest block.
pub(crate) struct Lowering {
    pub rtl: RtlProgram,
    /// True when the block touched guest memory; reserves the memory base
    /// register.
    pub uses_memory: bool,
}

fn hw_any(ssa: RtlRegister) -> RegisterAssignment {
    RegisterAssignment::any(ssa, HwRegisterType::Scalar)
}

fn vec_any(ssa: RtlRegister) -> RegisterAssignment {
    RegisterAssignment::any(ssa, HwRegisterType::Vector)
}

fn hw_at(ssa: RtlRegister, reg: Gpr) -> RegisterAssignment {
    RegisterAssignment::pinned(ssa, reg.hw())
}

fn hw_x(reg: Gpr) -> RegisterAssignment {
    RegisterAssignment::fixed(reg.hw())
}

fn size_of(ty: ir::Type) -> RegisterSize {
    match ty {
        ir::Type::Integer8 | ir::Type::Bool => RegisterSize::Byte,
        ir::Type::Integer16 => RegisterSize::Word,
        ir::Type::Integer32 | ir::Type::BranchLabel => RegisterSize::Dword,
        ir::Type::Integer64 | ir::Type::HostAddress => RegisterSize::Qword,
        ir::Type::Float32 => RegisterSize::VecSs,
        ir::Type::Float64 => RegisterSize::VecSd,
    }
}

pub(crate) struct LowerCtx<'a> {
    source: &'a IrProgram,
    rtl: RtlProgram,
    ir_to_rtl: Vec<RtlRegister>,
    uses_memory: bool,
    store_helper_address: u64,
}

impl<'a> LowerCtx<'a> {
    pub(crate) fn new(source: &'a IrProgram, store_helper_address: u64) -> Self {
        Self {
            source,
            rtl: RtlProgram::new(),
            ir_to_rtl: Vec::new(),
            uses_memory: false,
            store_helper_address,
        }
    }

    fn encode(
        &mut self,
        op: Opcode,
        data: u64,
        results: &[RegisterAssignment],
        sources: &[RegisterAssignment],
        flags: RtlFlags,
    ) {
        self.rtl
            .block_mut(0)
            .append(op.op(), data, results, sources, flags);
    }

    fn encode_0n(&mut self, op: Opcode, data: u64) {
        self.encode(op, data, &[], &[], RtlFlags::empty());
    }

    fn encode_0r(&mut self, op: Opcode, data: u64, out: RegisterAssignment) {
        self.encode(op, data, &[out], &[], RtlFlags::empty());
    }

    fn encode_1n(&mut self, op: Opcode, data: u64, in1: RegisterAssignment) {
        self.encode(op, data, &[], &[in1], RtlFlags::empty());
    }

    fn encode_1r(&mut self, op: Opcode, data: u64, out: RegisterAssignment, in1: RegisterAssignment) {
        self.encode(op, data, &[out], &[in1], RtlFlags::empty());
    }

    fn encode_1rs(
        &mut self,
        op: Opcode,
        data: u64,
        out: RegisterAssignment,
        in1: RegisterAssignment,
    ) {
        self.encode(op, data, &[out], &[in1], RtlFlags::SAVE_STATE);
    }

    fn encode_2n(&mut self, op: Opcode, data: u64, in1: RegisterAssignment, in2: RegisterAssignment) {
        self.encode(op, data, &[], &[in1, in2], RtlFlags::empty());
    }

    fn encode_2r(
        &mut self,
        op: Opcode,
        data: u64,
        out: RegisterAssignment,
        in1: RegisterAssignment,
        in2: RegisterAssignment,
    ) {
        self.encode(op, data, &[out], &[in1, in2], RtlFlags::DESTRUCTIVE);
    }

    fn encode_2rr(
        &mut self,
        op: Opcode,
        data: u64,
        out1: RegisterAssignment,
        out2: RegisterAssignment,
        in1: RegisterAssignment,
        in2: RegisterAssignment,
    ) {
        self.encode(op, data, &[out1, out2], &[in1, in2], RtlFlags::DESTRUCTIVE);
    }

    fn encode_2rs(
        &mut self,
        op: Opcode,
        data: u64,
        out: RegisterAssignment,
        in1: RegisterAssignment,
        in2: RegisterAssignment,
    ) {
        self.encode(
            op,
            data,
            &[out],
            &[in1, in2],
            RtlFlags::DESTRUCTIVE | RtlFlags::SAVE_STATE,
        );
    }

    fn encode_3rs(
        &mut self,
        op: Opcode,
        data: u64,
        out: RegisterAssignment,
        in1: RegisterAssignment,
        in2: RegisterAssignment,
        in3: RegisterAssignment,
    ) {
        self.encode(
            op,
            data,
            &[out],
            &[in1, in2, in3],
            RtlFlags::DESTRUCTIVE | RtlFlags::SAVE_STATE,
        );
    }

    fn encode_4ns(
        &mut self,
        op: Opcode,
        data: u64,
        in1: RegisterAssignment,
        in2: RegisterAssignment,
        in3: RegisterAssignment,
        in4: RegisterAssignment,
    ) {
        self.encode(op, data, &[], &[in1, in2, in3, in4], RtlFlags::SAVE_STATE);
    }

    /// The RTL register for an IR result operand. The operand must not
    /// have been defined yet.
    fn make_rtl_ssa(&mut self, operand: ir::Operand) -> RtlRegister {
        let index = operand.register_index() as usize;
        if index >= self.ir_to_rtl.len() {
            self.ir_to_rtl.resize(index + 1, RtlRegister::none());
        }
        assert!(
            !self.ir_to_rtl[index].valid(),
            "guest register v{index} defined twice"
        );
        self.ir_to_rtl[index] = self.rtl.ssa_allocate(size_of(operand.ty()));
        self.ir_to_rtl[index]
    }

    /// The RTL register for an IR source operand; constants are
    /// materialized through a load-immediate.
    fn get_rtl_ssa(&mut self, operand: ir::Operand) -> RtlRegister {
        if operand.is_register() {
            let index = operand.register_index() as usize;
            assert!(
                index < self.ir_to_rtl.len() && self.ir_to_rtl[index].valid(),
                "use of undefined guest register v{index}"
            );
            return self.ir_to_rtl[index];
        }

        let value = operand.value();
        match operand.ty() {
            ir::Type::Integer8 => {
                let ssa = self.rtl.ssa_allocate(RegisterSize::Byte);
                self.encode_0r(Opcode::LoadQwordImm32, value.u8_value().into(), hw_any(ssa));
                ssa
            }
            ir::Type::Integer16 => {
                let ssa = self.rtl.ssa_allocate(RegisterSize::Word);
                self.encode_0r(Opcode::LoadQwordImm32, value.u16_value().into(), hw_any(ssa));
                ssa
            }
            ir::Type::Integer32 => {
                let ssa = self.rtl.ssa_allocate(RegisterSize::Dword);
                self.encode_0r(Opcode::LoadQwordImm32, value.u32_value().into(), hw_any(ssa));
                ssa
            }
            ir::Type::Integer64 | ir::Type::HostAddress => {
                let ssa = self.rtl.ssa_allocate(RegisterSize::Qword);
                self.encode_0r(Opcode::LoadQwordImm64, value.u64_value(), hw_any(ssa));
                ssa
            }
            ir::Type::Bool => {
                let ssa = self.rtl.ssa_allocate(RegisterSize::Byte);
                self.encode_0r(
                    Opcode::LoadQwordImm32,
                    u64::from(value.bool_value()),
                    hw_any(ssa),
                );
                ssa
            }
            ir::Type::Float32 => {
                let temp = self.rtl.ssa_allocate(RegisterSize::Dword);
                let ssa = self.rtl.ssa_allocate(RegisterSize::VecSs);
                self.encode_0r(Opcode::LoadQwordImm32, value.u32_value().into(), hw_any(temp));
                self.encode_1r(Opcode::MovdDword, 0, vec_any(ssa), hw_any(temp));
                ssa
            }
            ir::Type::Float64 => {
                let temp = self.rtl.ssa_allocate(RegisterSize::Qword);
                let ssa = self.rtl.ssa_allocate(RegisterSize::VecSd);
                self.encode_0r(Opcode::LoadQwordImm64, value.u64_value(), hw_any(temp));
                self.encode_1r(Opcode::MovdQword, 0, vec_any(ssa), hw_any(temp));
                ssa
            }
            ir::Type::BranchLabel => panic!("branch label used as a value"),
        }
    }

    /// Lower the whole program.
    pub(crate) fn generate_rtl(mut self, use_load_emitter: bool) -> Lowering {
        let exit_label = self.rtl.allocate_label("exit");
        let block = self.rtl.allocate_block("amd64_entry");
        assert_eq!(block, 0);

        // Whether the memory base register gets claimed is decided up
        // front so the prologue only touches it when something will read
        // it.
        self.uses_memory = self
            .source
            .instructions()
            .iter()
            .any(|i| matches!(i.opcode(), ir::Opcode::Load | ir::Opcode::Store));

        // Stack frame, then the incoming arguments move to their dedicated
        // registers: rsi (memory base) and rdx (register file base) are
        // argument registers the allocator may reuse.
        self.encode_0n(Opcode::PushRegisters, regs::abi_callee_saved().into());
        self.encode_0n(Opcode::AllocateSpill, 0);
        if self.uses_memory {
            self.encode_1r(Opcode::MovQword, 0, hw_x(GPR_MEMORY_BASE), hw_x(regs::RSI));
        }
        self.encode_1r(Opcode::MovQword, 0, hw_x(GPR_REGISTER_BASE), hw_x(regs::RDX));

        for index in 0..self.source.instructions().len() {
            let current = self.source.instructions()[index].clone();
            self.lower_instruction(&current, exit_label, use_load_emitter);
        }

        self.encode_0n(Opcode::Label, exit_label.0.into());
        self.encode_0n(Opcode::FreeSpill, 0);
        self.encode_1r(Opcode::MovQword, 0, hw_x(regs::RAX), hw_x(GPR_SCRATCH));
        self.encode_0n(Opcode::PopRegisters, regs::abi_callee_saved().into());
        self.encode_0n(Opcode::Ret, 0);

        Lowering {
            rtl: self.rtl,
            uses_memory: self.uses_memory,
        }
    }

    fn lower_instruction(
        &mut self,
        current: &ir::Instruction,
        exit_label: LabelId,
        use_load_emitter: bool,
    ) {
        use ir::Opcode as Ir;

        match current.opcode() {
            // Read from a guest register in host memory.
            Ir::ReadGuest => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let index = current.source(0).value().u16_value();
                match current.result(0).ty() {
                    ir::Type::Integer32 => {
                        self.encode_0r(Opcode::ReadGuestRegister32, index.into(), hw_any(ssa_result))
                    }
                    ir::Type::Float32 => {
                        self.encode_0r(Opcode::ReadGuestRegister32, index.into(), vec_any(ssa_result))
                    }
                    ir::Type::Integer64 => {
                        self.encode_0r(Opcode::ReadGuestRegister64, index.into(), hw_any(ssa_result))
                    }
                    ir::Type::Float64 => {
                        self.encode_0r(Opcode::ReadGuestRegister64, index.into(), vec_any(ssa_result))
                    }
                    ty => panic!("ReadGuest of type {ty:?}"),
                }
            }

            // Write to a guest register in host memory.
            Ir::WriteGuest => {
                let ssa_value = self.get_rtl_ssa(current.source(1));
                let index = current.source(0).value().u16_value();
                match current.source(1).ty() {
                    ir::Type::Integer32 => {
                        self.encode_1n(Opcode::WriteGuestRegister32, index.into(), hw_any(ssa_value))
                    }
                    ir::Type::Float32 => {
                        self.encode_1n(Opcode::WriteGuestRegister32, index.into(), vec_any(ssa_value))
                    }
                    ir::Type::Integer64 => {
                        self.encode_1n(Opcode::WriteGuestRegister64, index.into(), hw_any(ssa_value))
                    }
                    ir::Type::Float64 => {
                        self.encode_1n(Opcode::WriteGuestRegister64, index.into(), vec_any(ssa_value))
                    }
                    ty => panic!("WriteGuest of type {ty:?}"),
                }
            }

            // Load from guest memory, either inlined through the fast
            // memory emitter or via a framed helper call with the result
            // arriving in rax.
            Ir::Load => {
                self.uses_memory = true;

                let ty = current.result(0).ty();
                let bytes = ty.bytes() as u64;
                let is_float = ty.is_float();

                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_address = self.get_rtl_ssa(current.source(0));

                let scalar_result = if is_float {
                    self.rtl.ssa_allocate(if bytes == 4 {
                        RegisterSize::Dword
                    } else {
                        RegisterSize::Qword
                    })
                } else {
                    ssa_result
                };

                if use_load_emitter {
                    self.encode_1r(
                        Opcode::LoadGuestMemory,
                        bytes,
                        hw_any(scalar_result),
                        hw_any(ssa_address),
                    );
                } else {
                    self.encode_1rs(
                        Opcode::LoadGuestMemory,
                        bytes,
                        hw_at(scalar_result, regs::RAX),
                        hw_any(ssa_address),
                    );
                }

                if is_float {
                    let movd = if bytes == 4 {
                        Opcode::MovdDword
                    } else {
                        Opcode::MovdQword
                    };
                    self.encode_1r(movd, 0, vec_any(ssa_result), hw_any(scalar_result));
                }
            }

            // Store to guest memory through the helper. The value, byte
            // count and address travel in the Sys V argument registers;
            // the guest pointer already sits in rdi.
            Ir::Store => {
                self.uses_memory = true;

                let ssa_call_target = self.rtl.ssa_allocate(RegisterSize::Qword);
                let ssa_address = self.get_rtl_ssa(current.source(0));
                let ssa_value = self.get_rtl_ssa(current.source(1));
                let ssa_bytes = self.rtl.ssa_allocate(RegisterSize::Qword);

                let ty = current.ty();
                let is_float = ty.is_float();
                let bytes = ty.bytes() as u64;
                self.encode_0r(Opcode::LoadQwordImm32, bytes, hw_any(ssa_bytes));

                let scalar_value = if is_float {
                    let temp = self.rtl.ssa_allocate(if bytes == 4 {
                        RegisterSize::Dword
                    } else {
                        RegisterSize::Qword
                    });
                    let movd = if bytes == 4 {
                        Opcode::MovdDword
                    } else {
                        Opcode::MovdQword
                    };
                    self.encode_1r(movd, 0, hw_any(temp), vec_any(ssa_value));
                    temp
                } else {
                    ssa_value
                };

                self.encode_0r(
                    Opcode::LoadQwordImm64,
                    self.store_helper_address,
                    hw_any(ssa_call_target),
                );
                self.encode_4ns(
                    Opcode::CallFramed,
                    0,
                    hw_at(ssa_call_target, regs::RAX),
                    hw_at(ssa_address, regs::RSI),
                    hw_at(ssa_bytes, regs::RDX),
                    hw_at(scalar_value, regs::RCX),
                );
            }

            Ir::LogicalShiftRight => {
                self.lower_shift(current, Opcode::ShrDwordImm8, SHR_BY_SIZE);
            }

            Ir::LogicalShiftLeft => {
                self.lower_shift(current, Opcode::ShlDwordImm8, SHL_BY_SIZE);
            }

            Ir::ArithmeticShiftRight => {
                self.lower_shift(current, Opcode::SarDwordImm8, SAR_BY_SIZE);
            }

            Ir::RotateRight => {
                self.lower_rotate(current, ROR1_BY_SIZE, ROR_BY_SIZE);
            }

            Ir::RotateLeft => {
                self.lower_rotate(current, ROL1_BY_SIZE, ROL_BY_SIZE);
            }

            Ir::And => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_arg1 = self.get_rtl_ssa(current.source(0));
                if current.source(1).is_constant() && current.ty() == ir::Type::Integer32 {
                    let constant = current.source(1).value().u32_value();
                    self.encode_1r(
                        Opcode::AndDwordImm32,
                        constant.into(),
                        hw_any(ssa_result),
                        hw_any(ssa_arg1),
                    );
                    return;
                }
                let ssa_arg2 = self.get_rtl_ssa(current.source(1));
                let op = match current.ty() {
                    ir::Type::Bool | ir::Type::Integer8 => Opcode::AndByte,
                    ir::Type::Integer16 => Opcode::AndWord,
                    ir::Type::Integer32 => Opcode::AndDword,
                    ir::Type::Integer64 => Opcode::AndQword,
                    ty => panic!("And of type {ty:?}"),
                };
                self.encode_2r(op, 0, hw_any(ssa_result), hw_any(ssa_arg1), hw_any(ssa_arg2));
            }

            Ir::Or => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_arg1 = self.get_rtl_ssa(current.source(0));
                if current.source(1).is_constant() && current.ty() == ir::Type::Integer32 {
                    let constant = current.source(1).value().u32_value();
                    self.encode_1r(
                        Opcode::OrDwordImm32,
                        constant.into(),
                        hw_any(ssa_result),
                        hw_any(ssa_arg1),
                    );
                    return;
                }
                let ssa_arg2 = self.get_rtl_ssa(current.source(1));
                let op = match current.ty() {
                    ir::Type::Bool | ir::Type::Integer8 => Opcode::OrByte,
                    ir::Type::Integer16 => Opcode::OrWord,
                    ir::Type::Integer32 => Opcode::OrDword,
                    ir::Type::Integer64 => Opcode::OrQword,
                    ty => panic!("Or of type {ty:?}"),
                };
                self.encode_2r(op, 0, hw_any(ssa_result), hw_any(ssa_arg1), hw_any(ssa_arg2));
            }

            Ir::ExclusiveOr => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_arg1 = self.get_rtl_ssa(current.source(0));
                let ssa_arg2 = self.get_rtl_ssa(current.source(1));
                let op = match current.ty() {
                    ir::Type::Bool | ir::Type::Integer8 => Opcode::XorByte,
                    ir::Type::Integer16 => Opcode::XorWord,
                    ir::Type::Integer32 => Opcode::XorDword,
                    ir::Type::Integer64 => Opcode::XorQword,
                    ty => panic!("ExclusiveOr of type {ty:?}"),
                };
                self.encode_2r(op, 0, hw_any(ssa_result), hw_any(ssa_arg1), hw_any(ssa_arg2));
            }

            Ir::Not => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_arg1 = self.get_rtl_ssa(current.source(0));
                match current.ty() {
                    ir::Type::Integer8 => {
                        self.encode_1r(Opcode::NotByte, 0, hw_any(ssa_result), hw_any(ssa_arg1))
                    }
                    ir::Type::Integer16 => {
                        self.encode_1r(Opcode::NotWord, 0, hw_any(ssa_result), hw_any(ssa_arg1))
                    }
                    ir::Type::Integer32 => {
                        self.encode_1r(Opcode::NotDword, 0, hw_any(ssa_result), hw_any(ssa_arg1))
                    }
                    ir::Type::Integer64 => {
                        self.encode_1r(Opcode::NotQword, 0, hw_any(ssa_result), hw_any(ssa_arg1))
                    }
                    // Booleans are 0/1 bytes; logical not is xor 1.
                    ir::Type::Bool => {
                        self.encode_1r(Opcode::XorByteImm8, 1, hw_any(ssa_result), hw_any(ssa_arg1))
                    }
                    ty => panic!("Not of type {ty:?}"),
                }
            }

            Ir::BitSetClear => {
                assert!(current.source(2).is_constant());
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_input = self.get_rtl_ssa(current.source(0));
                let ssa_control = self.get_rtl_ssa(current.source(1));
                let position = current.source(2).value().u8_value();
                match current.ty() {
                    ir::Type::Integer32 => {
                        let ssa_masked = self.rtl.ssa_allocate(RegisterSize::Dword);
                        let ssa_bit = self.rtl.ssa_allocate(RegisterSize::Dword);
                        self.encode_1r(
                            Opcode::AndDwordImm32,
                            u64::from(!(1u32 << position)),
                            hw_any(ssa_masked),
                            hw_any(ssa_input),
                        );
                        if position != 0 {
                            let ssa_bit_temp = self.rtl.ssa_allocate(RegisterSize::Dword);
                            self.encode_1r(
                                Opcode::Zextend32Byte,
                                0,
                                hw_any(ssa_bit_temp),
                                hw_any(ssa_control),
                            );
                            self.encode_1r(
                                Opcode::ShlDwordImm8,
                                position.into(),
                                hw_any(ssa_bit),
                                hw_any(ssa_bit_temp),
                            );
                        } else {
                            self.encode_1r(
                                Opcode::Zextend32Byte,
                                0,
                                hw_any(ssa_bit),
                                hw_any(ssa_control),
                            );
                        }
                        self.encode_2r(
                            Opcode::OrDword,
                            0,
                            hw_any(ssa_result),
                            hw_any(ssa_masked),
                            hw_any(ssa_bit),
                        );
                    }
                    ty => panic!("BitSetClear of type {ty:?}"),
                }
            }

            Ir::Add => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_arg1 = self.get_rtl_ssa(current.source(0));
                if current.source(1).is_constant() && current.ty() == ir::Type::Integer32 {
                    let constant = current.source(1).value().u32_value();
                    self.encode_1r(
                        Opcode::AddDwordImm32,
                        constant.into(),
                        hw_any(ssa_result),
                        hw_any(ssa_arg1),
                    );
                    return;
                }
                let ssa_arg2 = self.get_rtl_ssa(current.source(1));
                match current.ty() {
                    ir::Type::Integer8 => self.encode_2r(
                        Opcode::AddByte,
                        0,
                        hw_any(ssa_result),
                        hw_any(ssa_arg1),
                        hw_any(ssa_arg2),
                    ),
                    ir::Type::Integer16 => self.encode_2r(
                        Opcode::AddWord,
                        0,
                        hw_any(ssa_result),
                        hw_any(ssa_arg1),
                        hw_any(ssa_arg2),
                    ),
                    ir::Type::Integer32 => self.encode_2r(
                        Opcode::AddDword,
                        0,
                        hw_any(ssa_result),
                        hw_any(ssa_arg1),
                        hw_any(ssa_arg2),
                    ),
                    ir::Type::Integer64 => self.encode_2r(
                        Opcode::AddQword,
                        0,
                        hw_any(ssa_result),
                        hw_any(ssa_arg1),
                        hw_any(ssa_arg2),
                    ),
                    ir::Type::Float32 => self.encode_2r(
                        Opcode::AddSs,
                        0,
                        vec_any(ssa_result),
                        vec_any(ssa_arg1),
                        vec_any(ssa_arg2),
                    ),
                    ir::Type::Float64 => self.encode_2r(
                        Opcode::AddSd,
                        0,
                        vec_any(ssa_result),
                        vec_any(ssa_arg1),
                        vec_any(ssa_arg2),
                    ),
                    ty => panic!("Add of type {ty:?}"),
                }
            }

            Ir::Subtract => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_arg1 = self.get_rtl_ssa(current.source(0));
                if current.source(1).is_constant() && current.ty() == ir::Type::Integer32 {
                    let constant = current.source(1).value().u32_value();
                    self.encode_1r(
                        Opcode::SubDwordImm32,
                        constant.into(),
                        hw_any(ssa_result),
                        hw_any(ssa_arg1),
                    );
                    return;
                }
                let ssa_arg2 = self.get_rtl_ssa(current.source(1));
                match current.ty() {
                    ir::Type::Integer8 => self.encode_2r(
                        Opcode::SubByte,
                        0,
                        hw_any(ssa_result),
                        hw_any(ssa_arg1),
                        hw_any(ssa_arg2),
                    ),
                    ir::Type::Integer16 => self.encode_2r(
                        Opcode::SubWord,
                        0,
                        hw_any(ssa_result),
                        hw_any(ssa_arg1),
                        hw_any(ssa_arg2),
                    ),
                    ir::Type::Integer32 => self.encode_2r(
                        Opcode::SubDword,
                        0,
                        hw_any(ssa_result),
                        hw_any(ssa_arg1),
                        hw_any(ssa_arg2),
                    ),
                    ir::Type::Integer64 => self.encode_2r(
                        Opcode::SubQword,
                        0,
                        hw_any(ssa_result),
                        hw_any(ssa_arg1),
                        hw_any(ssa_arg2),
                    ),
                    ir::Type::Float32 => self.encode_2r(
                        Opcode::SubSs,
                        0,
                        vec_any(ssa_result),
                        vec_any(ssa_arg1),
                        vec_any(ssa_arg2),
                    ),
                    ir::Type::Float64 => self.encode_2r(
                        Opcode::SubSd,
                        0,
                        vec_any(ssa_result),
                        vec_any(ssa_arg1),
                        vec_any(ssa_arg2),
                    ),
                    ty => panic!("Subtract of type {ty:?}"),
                }
            }

            Ir::Multiply => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_arg1 = self.get_rtl_ssa(current.source(0));
                let ssa_arg2 = self.get_rtl_ssa(current.source(1));
                match current.ty() {
                    // There is no dst,src encoding of 8-bit imul.
                    ir::Type::Integer8 => panic!("8-bit signed multiply unimplemented"),
                    ir::Type::Integer16 => self.encode_2r(
                        Opcode::ImulWord,
                        0,
                        hw_any(ssa_result),
                        hw_any(ssa_arg1),
                        hw_any(ssa_arg2),
                    ),
                    ir::Type::Integer32 => self.encode_2r(
                        Opcode::ImulDword,
                        0,
                        hw_any(ssa_result),
                        hw_any(ssa_arg1),
                        hw_any(ssa_arg2),
                    ),
                    ir::Type::Integer64 => self.encode_2r(
                        Opcode::ImulQword,
                        0,
                        hw_any(ssa_result),
                        hw_any(ssa_arg1),
                        hw_any(ssa_arg2),
                    ),
                    ir::Type::Float32 => self.encode_2r(
                        Opcode::MulSs,
                        0,
                        vec_any(ssa_result),
                        vec_any(ssa_arg1),
                        vec_any(ssa_arg2),
                    ),
                    ir::Type::Float64 => self.encode_2r(
                        Opcode::MulSd,
                        0,
                        vec_any(ssa_result),
                        vec_any(ssa_arg1),
                        vec_any(ssa_arg2),
                    ),
                    ty => panic!("Multiply of type {ty:?}"),
                }
            }

            // One-operand hardware multiply: the low half lands in rax,
            // the high half clobbers rdx. The second result exists only to
            // claim rdx; no IR consumer reads it.
            Ir::Multiply_u => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_arg1 = self.get_rtl_ssa(current.source(0));
                let ssa_arg2 = self.get_rtl_ssa(current.source(1));
                match current.ty() {
                    ir::Type::Integer8 => {
                        // 8-bit mul writes ax only; no rdx tie-down.
                        self.encode_2r(
                            Opcode::MulByte,
                            0,
                            hw_at(ssa_result, regs::RAX),
                            hw_any(ssa_arg1),
                            hw_at(ssa_arg2, regs::RAX),
                        );
                    }
                    ir::Type::Integer16 => {
                        let high = self.rtl.ssa_allocate(RegisterSize::Word);
                        self.encode_2rr(
                            Opcode::MulWord,
                            0,
                            hw_at(ssa_result, regs::RAX),
                            hw_at(high, regs::RDX),
                            hw_any(ssa_arg1),
                            hw_at(ssa_arg2, regs::RAX),
                        );
                    }
                    ir::Type::Integer32 => {
                        let high = self.rtl.ssa_allocate(RegisterSize::Dword);
                        self.encode_2rr(
                            Opcode::MulDword,
                            0,
                            hw_at(ssa_result, regs::RAX),
                            hw_at(high, regs::RDX),
                            hw_any(ssa_arg1),
                            hw_at(ssa_arg2, regs::RAX),
                        );
                    }
                    ir::Type::Integer64 => {
                        let high = self.rtl.ssa_allocate(RegisterSize::Qword);
                        self.encode_2rr(
                            Opcode::MulQword,
                            0,
                            hw_at(ssa_result, regs::RAX),
                            hw_at(high, regs::RDX),
                            hw_any(ssa_arg1),
                            hw_at(ssa_arg2, regs::RAX),
                        );
                    }
                    ty => panic!("Multiply_u of type {ty:?}"),
                }
            }

            Ir::Divide => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_arg1 = self.get_rtl_ssa(current.source(0));
                let ssa_arg2 = self.get_rtl_ssa(current.source(1));
                match current.ty() {
                    ir::Type::Float32 => self.encode_2r(
                        Opcode::DivSs,
                        0,
                        vec_any(ssa_result),
                        vec_any(ssa_arg1),
                        vec_any(ssa_arg2),
                    ),
                    ir::Type::Float64 => self.encode_2r(
                        Opcode::DivSd,
                        0,
                        vec_any(ssa_result),
                        vec_any(ssa_arg1),
                        vec_any(ssa_arg2),
                    ),
                    ty => panic!("Divide of type {ty:?}"),
                }
            }

            Ir::SquareRoot => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_arg1 = self.get_rtl_ssa(current.source(0));
                match current.ty() {
                    ir::Type::Float32 => {
                        self.encode_1r(Opcode::SqrtSs, 0, vec_any(ssa_result), vec_any(ssa_arg1))
                    }
                    ir::Type::Float64 => {
                        self.encode_1r(Opcode::SqrtSd, 0, vec_any(ssa_result), vec_any(ssa_arg1))
                    }
                    ty => panic!("SquareRoot of type {ty:?}"),
                }
            }

            // Call a host helper. The guest pointer is the implicit first
            // argument and already lives in rdi; explicit arguments are
            // pinned to the following Sys V argument registers. The result
            // is assumed, potentially unused.
            Ir::Call => {
                assert!(current.source(0).is_constant());
                assert_eq!(current.source(0).ty(), ir::Type::HostAddress);

                let ssa_call_target = self.rtl.ssa_allocate(RegisterSize::Qword);
                self.encode_0r(
                    Opcode::LoadQwordImm64,
                    current.source(0).value().u64_value(),
                    hw_any(ssa_call_target),
                );

                assert!(current.result_count() <= 1);
                let ssa_result = if current.result_count() > 0 {
                    self.make_rtl_ssa(current.result(0))
                } else {
                    self.rtl.ssa_allocate(RegisterSize::Qword)
                };

                match current.source_count() {
                    1 => self.encode_1rs(
                        Opcode::CallFramed,
                        0,
                        hw_at(ssa_result, regs::RAX),
                        hw_at(ssa_call_target, regs::RAX),
                    ),
                    2 => {
                        let ssa_arg1 = self.get_rtl_ssa(current.source(1));
                        self.encode_2rs(
                            Opcode::CallFramed,
                            0,
                            hw_at(ssa_result, regs::RAX),
                            hw_at(ssa_call_target, regs::RAX),
                            hw_at(ssa_arg1, regs::RSI),
                        );
                    }
                    3 => {
                        let ssa_arg1 = self.get_rtl_ssa(current.source(1));
                        let ssa_arg2 = self.get_rtl_ssa(current.source(2));
                        self.encode_3rs(
                            Opcode::CallFramed,
                            0,
                            hw_at(ssa_result, regs::RAX),
                            hw_at(ssa_call_target, regs::RAX),
                            hw_at(ssa_arg1, regs::RSI),
                            hw_at(ssa_arg2, regs::RDX),
                        );
                    }
                    n => panic!("Call with {n} sources"),
                }
            }

            Ir::Extend32 => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_arg = self.get_rtl_ssa(current.source(0));
                match current.ty() {
                    ir::Type::Integer8 => {
                        self.encode_1r(Opcode::Extend32Byte, 0, hw_any(ssa_result), hw_any(ssa_arg))
                    }
                    ir::Type::Integer16 => {
                        self.encode_1r(Opcode::Extend32Word, 0, hw_any(ssa_result), hw_any(ssa_arg))
                    }
                    ty => panic!("Extend32 of type {ty:?}"),
                }
            }

            Ir::Extend64 => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_arg = self.get_rtl_ssa(current.source(0));
                match current.ty() {
                    ir::Type::Integer8 => {
                        self.encode_1r(Opcode::Extend64Byte, 0, hw_any(ssa_result), hw_any(ssa_arg))
                    }
                    ir::Type::Integer16 => {
                        self.encode_1r(Opcode::Extend64Word, 0, hw_any(ssa_result), hw_any(ssa_arg))
                    }
                    ir::Type::Integer32 => {
                        self.encode_1r(Opcode::Extend64Dword, 0, hw_any(ssa_result), hw_any(ssa_arg))
                    }
                    ty => panic!("Extend64 of type {ty:?}"),
                }
            }

            Ir::BitCast => self.lower_bitcast(current),

            Ir::CastFloatInt => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_arg = self.get_rtl_ssa(current.source(0));
                let op = match (current.source(0).ty(), current.result(0).ty()) {
                    (ir::Type::Float32, ir::Type::Integer32) => Opcode::CvtSsI32,
                    (ir::Type::Float32, ir::Type::Integer64) => Opcode::CvtSsI64,
                    (ir::Type::Float64, ir::Type::Integer32) => Opcode::CvtSdI32,
                    (ir::Type::Float64, ir::Type::Integer64) => Opcode::CvtSdI64,
                    (from, to) => panic!("CastFloatInt {from:?} -> {to:?}"),
                };
                self.encode_1r(op, 0, hw_any(ssa_result), vec_any(ssa_arg));
            }

            Ir::Test => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_arg1 = self.get_rtl_ssa(current.source(0));
                let mut constant_encoded = false;
                if current.source(1).is_constant() && current.ty() == ir::Type::Integer32 {
                    let constant = current.source(1).value().u32_value();
                    self.encode_1n(Opcode::TestDwordImm32, constant.into(), hw_any(ssa_arg1));
                    constant_encoded = true;
                }

                if !constant_encoded {
                    let ssa_arg2 = self.get_rtl_ssa(current.source(1));
                    let op = match current.ty() {
                        ir::Type::Integer8 => Opcode::TestByte,
                        ir::Type::Integer16 => Opcode::TestWord,
                        ir::Type::Integer32 => Opcode::TestDword,
                        ir::Type::Integer64 => Opcode::TestQword,
                        ty => panic!("Test of type {ty:?}"),
                    };
                    self.encode_2n(op, 0, hw_any(ssa_arg1), hw_any(ssa_arg2));
                }

                self.encode_0r(Opcode::Setnz, 0, hw_any(ssa_result));
            }

            Ir::Compare_eq | Ir::Compare_lt | Ir::Compare_lte | Ir::Compare_ult
            | Ir::Compare_ulte => {
                let mut constant_encoded = false;
                if !current.source(0).is_constant()
                    && current.source(1).is_constant()
                    && current.ty() == ir::Type::Integer32
                {
                    let ssa_arg = self.get_rtl_ssa(current.source(0));
                    let constant = current.source(1).value().u32_value();
                    self.encode_1n(Opcode::CmpDwordImm32, constant.into(), hw_any(ssa_arg));
                    constant_encoded = true;
                }

                if !constant_encoded {
                    let ssa_arg1 = self.get_rtl_ssa(current.source(0));
                    let ssa_arg2 = self.get_rtl_ssa(current.source(1));
                    let op = match current.ty() {
                        ir::Type::Bool => {
                            assert_eq!(current.opcode(), Ir::Compare_eq);
                            Opcode::CmpByte
                        }
                        ir::Type::Integer8 => Opcode::CmpByte,
                        ir::Type::Integer16 => Opcode::CmpWord,
                        ir::Type::Integer32 => Opcode::CmpDword,
                        ir::Type::Integer64 => Opcode::CmpQword,
                        ty => panic!("Compare of type {ty:?}"),
                    };
                    self.encode_2n(op, 0, hw_any(ssa_arg1), hw_any(ssa_arg2));
                }

                let ssa_result = self.make_rtl_ssa(current.result(0));
                let set = match current.opcode() {
                    Ir::Compare_eq => Opcode::Setz,
                    Ir::Compare_lt => Opcode::Setl,
                    Ir::Compare_lte => Opcode::Setle,
                    Ir::Compare_ult => Opcode::Setb,
                    Ir::Compare_ulte => Opcode::Setbe,
                    _ => unreachable!(),
                };
                self.encode_0r(set, 0, hw_any(ssa_result));
            }

            Ir::Select => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_decision = self.get_rtl_ssa(current.source(0));

                // A 0/1 select of a boolean is just the boolean widened.
                if current.source(1).is_constant()
                    && current.source(2).is_constant()
                    && current.ty() == ir::Type::Integer32
                {
                    let false_value = current.source(1).value().u32_value();
                    let true_value = current.source(2).value().u32_value();
                    if false_value == 0 && true_value == 1 {
                        self.encode_1r(
                            Opcode::Zextend32Byte,
                            0,
                            hw_any(ssa_result),
                            hw_any(ssa_decision),
                        );
                        return;
                    }
                }

                let ssa_false = self.get_rtl_ssa(current.source(1));
                let ssa_true = self.get_rtl_ssa(current.source(2));
                self.encode_2n(Opcode::TestByte, 0, hw_any(ssa_decision), hw_any(ssa_decision));
                let op = match current.ty() {
                    ir::Type::Integer16 => Opcode::CmovnzWord,
                    ir::Type::Integer32 => Opcode::CmovnzDword,
                    ir::Type::Integer64 => Opcode::CmovnzQword,
                    ty => panic!("Select of type {ty:?}"),
                };
                self.encode_2r(op, 0, hw_any(ssa_result), hw_any(ssa_false), hw_any(ssa_true));
            }

            // Exit the routine with a constant code when the decision is
            // set. The exit value travels in the scratch register so the
            // epilogue can move it to rax after any exit site.
            Ir::Exit => {
                let decision = current.source(0);
                let returned = current.source(1).value().u64_value();
                assert!(returned < (1u64 << 32));
                if decision.is_constant() {
                    if decision.value().bool_value() {
                        self.encode_0r(Opcode::LoadQwordImm32, returned, hw_x(GPR_SCRATCH));
                        self.encode_0n(Opcode::Jmp, exit_label.0.into());
                    }
                } else {
                    let ssa_bool = self.get_rtl_ssa(decision);
                    self.encode_2n(Opcode::TestByte, 0, hw_any(ssa_bool), hw_any(ssa_bool));
                    self.encode_0r(Opcode::LoadQwordImm32, returned, hw_x(GPR_SCRATCH));
                    self.encode_0n(Opcode::Jnz, exit_label.0.into());
                }
            }
        }
    }

    fn lower_shift(
        &mut self,
        current: &ir::Instruction,
        imm_op: Opcode,
        by_size: [Opcode; 4],
    ) {
        let ssa_result = self.make_rtl_ssa(current.result(0));
        let ssa_arg1 = self.get_rtl_ssa(current.source(0));

        if current.source(1).is_constant() && current.ty() == ir::Type::Integer32 {
            let constant = current.source(1).value().u8_value();
            self.encode_1r(imm_op, constant.into(), hw_any(ssa_result), hw_any(ssa_arg1));
            return;
        }

        let ssa_arg2 = self.get_rtl_ssa(current.source(1));
        let op = match current.ty() {
            ir::Type::Integer8 => by_size[0],
            ir::Type::Integer16 => by_size[1],
            ir::Type::Integer32 => by_size[2],
            ir::Type::Integer64 => by_size[3],
            ty => panic!("shift of type {ty:?}"),
        };
        // Variable shift counts live in cl.
        self.encode_2r(
            op,
            0,
            hw_any(ssa_result),
            hw_any(ssa_arg1),
            hw_at(ssa_arg2, regs::RCX),
        );
    }

    fn lower_rotate(&mut self, current: &ir::Instruction, by_1: [Opcode; 4], by_cl: [Opcode; 4]) {
        let ssa_result = self.make_rtl_ssa(current.result(0));
        let ssa_arg1 = self.get_rtl_ssa(current.source(0));
        let count = current.source(1);

        let size_index = match current.ty() {
            ir::Type::Integer8 => 0,
            ir::Type::Integer16 => 1,
            ir::Type::Integer32 => 2,
            ir::Type::Integer64 => 3,
            ty => panic!("rotate of type {ty:?}"),
        };

        if count.is_constant() && count.value().u64_value() == 1 {
            self.encode_1r(by_1[size_index], 0, hw_any(ssa_result), hw_any(ssa_arg1));
        } else {
            let ssa_arg2 = self.get_rtl_ssa(count);
            self.encode_2r(
                by_cl[size_index],
                0,
                hw_any(ssa_result),
                hw_any(ssa_arg1),
                hw_at(ssa_arg2, regs::RCX),
            );
        }
    }

    fn lower_bitcast(&mut self, current: &ir::Instruction) {
        let ssa_result = self.make_rtl_ssa(current.result(0));
        let ssa_arg = self.get_rtl_ssa(current.source(0));
        let from = current.source(0).ty();
        use ir::Type::*;

        // Same-width integer casts are no-ops at the bit level, but the
        // result is a fresh SSA name and still needs the value.
        match current.ty() {
            Integer8 => {
                self.encode_1r(Opcode::Zextend32Byte, 0, hw_any(ssa_result), hw_any(ssa_arg))
            }
            Integer16 => match from {
                Integer8 => {
                    self.encode_1r(Opcode::Zextend32Byte, 0, hw_any(ssa_result), hw_any(ssa_arg))
                }
                Integer16 | Integer32 => {
                    self.encode_1r(Opcode::Zextend32Word, 0, hw_any(ssa_result), hw_any(ssa_arg))
                }
                from => panic!("BitCast {from:?} -> Integer16"),
            },
            Integer32 => match from {
                Integer8 => {
                    self.encode_1r(Opcode::Zextend32Byte, 0, hw_any(ssa_result), hw_any(ssa_arg))
                }
                Integer16 => {
                    self.encode_1r(Opcode::Zextend32Word, 0, hw_any(ssa_result), hw_any(ssa_arg))
                }
                Integer32 | Integer64 => {
                    self.encode_1r(Opcode::Zextend64Dword, 0, hw_any(ssa_result), hw_any(ssa_arg))
                }
                Float32 => {
                    self.encode_1r(Opcode::MovdDword, 0, hw_any(ssa_result), vec_any(ssa_arg))
                }
                from => panic!("BitCast {from:?} -> Integer32"),
            },
            Integer64 => match from {
                Integer8 => {
                    self.encode_1r(Opcode::Zextend64Byte, 0, hw_any(ssa_result), hw_any(ssa_arg))
                }
                Integer16 => {
                    self.encode_1r(Opcode::Zextend64Word, 0, hw_any(ssa_result), hw_any(ssa_arg))
                }
                Integer32 => {
                    self.encode_1r(Opcode::Zextend64Dword, 0, hw_any(ssa_result), hw_any(ssa_arg))
                }
                Integer64 => {
                    self.encode_1r(Opcode::MovQword, 0, hw_any(ssa_result), hw_any(ssa_arg))
                }
                Float64 => {
                    self.encode_1r(Opcode::MovdQword, 0, hw_any(ssa_result), vec_any(ssa_arg))
                }
                from => panic!("BitCast {from:?} -> Integer64"),
            },
            Float32 => match from {
                Integer32 => {
                    self.encode_1r(Opcode::MovdDword, 0, vec_any(ssa_result), hw_any(ssa_arg))
                }
                from => panic!("BitCast {from:?} -> Float32"),
            },
            Float64 => match from {
                Integer64 => {
                    self.encode_1r(Opcode::MovdQword, 0, vec_any(ssa_result), hw_any(ssa_arg))
                }
                from => panic!("BitCast {from:?} -> Float64"),
            },
            ty => panic!("BitCast to {ty:?}"),
        }
    }
}

const SHR_BY_SIZE: [Opcode; 4] = [
    Opcode::ShrByte,
    Opcode::ShrWord,
    Opcode::ShrDword,
    Opcode::ShrQword,
];
const SHL_BY_SIZE: [Opcode; 4] = [
    Opcode::ShlByte,
    Opcode::ShlWord,
    Opcode::ShlDword,
    Opcode::ShlQword,
];
const SAR_BY_SIZE: [Opcode; 4] = [
    Opcode::SarByte,
    Opcode::SarWord,
    Opcode::SarDword,
    Opcode::SarQword,
];
const ROL1_BY_SIZE: [Opcode; 4] = [
    Opcode::Rol1Byte,
    Opcode::Rol1Word,
    Opcode::Rol1Dword,
    Opcode::Rol1Qword,
];
const ROL_BY_SIZE: [Opcode; 4] = [
    Opcode::RolByte,
    Opcode::RolWord,
    Opcode::RolDword,
    Opcode::RolQword,
];
const ROR1_BY_SIZE: [Opcode; 4] = [
    Opcode::Ror1Byte,
    Opcode::Ror1Word,
    Opcode::Ror1Dword,
    Opcode::Ror1Qword,
];
const ROR_BY_SIZE: [Opcode; 4] = [
    Opcode::RorByte,
    Opcode::RorWord,
    Opcode::RorDword,
    Opcode::RorQword,
];
