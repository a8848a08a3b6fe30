//! AArch64 lowering: guest IR to back-end RTL.
//!
//! Same shape as the x86-64 lowering, but three-operand style: no
//! destructive pairing is needed at the ISA level (the flag is still set
//! so the allocator coalesces where it can), and bitwise constants must
//! pass the logical-immediate check before taking the immediate form.
//! Guest IR opcodes (or type variants) the back-end cannot lower are
//! collected over the whole block and reported as one structured
//! diagnostic so the caller can fall back to its interpreter.

use std::collections::BTreeSet;

use crate::ir::{self, IrProgram};
use crate::isa::aarch64::asm::Cond;
use crate::isa::aarch64::imms::ImmLogic;
use crate::isa::aarch64::opcodes::Opcode;
use crate::result::{CodegenError, CodegenResult};
use crate::rtl::{
    HwRegister, HwRegisterType, RegisterAssignment, RegisterSize, RtlFlags, RtlProgram,
    RtlRegister,
};

/// The finished lowering of one guest block.
pub(crate) struct Lowering {
    pub rtl: RtlProgram,
    pub uses_memory: bool,
}

// Lowering of one instruction hit a case this back-end does not handle.
struct Unsupported;

fn hw_any(ssa: RtlRegister) -> RegisterAssignment {
    RegisterAssignment::any(ssa, HwRegisterType::Scalar)
}

fn vec_any(ssa: RtlRegister) -> RegisterAssignment {
    RegisterAssignment::any(ssa, HwRegisterType::Vector)
}

fn hw_at(ssa: RtlRegister, num: u8) -> RegisterAssignment {
    RegisterAssignment::pinned(ssa, HwRegister::new(HwRegisterType::Scalar, num.into()))
}

pub(crate) struct LowerCtx<'a> {
    source: &'a IrProgram,
    rtl: RtlProgram,
    ir_to_rtl: Vec<RtlRegister>,
    uses_memory: bool,
    use_fastmem: bool,
    load_helper_address: u64,
    store_helper_address: u64,
}

impl<'a> LowerCtx<'a> {
    pub(crate) fn new(
        source: &'a IrProgram,
        use_fastmem: bool,
        load_helper_address: u64,
        store_helper_address: u64,
    ) -> Self {
        Self {
            source,
            rtl: RtlProgram::new(),
            ir_to_rtl: Vec::new(),
            uses_memory: false,
            use_fastmem,
            load_helper_address,
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

    fn encode_3r(
        &mut self,
        op: Opcode,
        data: u64,
        out: RegisterAssignment,
        in1: RegisterAssignment,
        in2: RegisterAssignment,
        in3: RegisterAssignment,
    ) {
        self.encode(op, data, &[out], &[in1, in2, in3], RtlFlags::DESTRUCTIVE);
    }

    fn encode_call(
        &mut self,
        result: Option<RegisterAssignment>,
        sources: &[RegisterAssignment],
    ) {
        let flags = if result.is_some() {
            RtlFlags::DESTRUCTIVE | RtlFlags::SAVE_STATE
        } else {
            RtlFlags::SAVE_STATE
        };
        let results: &[RegisterAssignment] = match &result {
            Some(out) => core::slice::from_ref(out),
            None => &[],
        };
        self.encode(Opcode::CallFramed, 0, results, sources, flags);
    }

    fn make_rtl_ssa(&mut self, operand: ir::Operand) -> RtlRegister {
        let index = operand.register_index() as usize;
        if index >= self.ir_to_rtl.len() {
            self.ir_to_rtl.resize(index + 1, RtlRegister::none());
        }
        assert!(
            !self.ir_to_rtl[index].valid(),
            "guest register v{index} defined twice"
        );
        let size = if operand.ty().bytes() == 8 {
            RegisterSize::Qword
        } else {
            RegisterSize::Dword
        };
        self.ir_to_rtl[index] = self.rtl.ssa_allocate(size);
        self.ir_to_rtl[index]
    }

    fn get_rtl_ssa(&mut self, operand: ir::Operand) -> Result<RtlRegister, Unsupported> {
        if operand.is_register() {
            // A register left undefined by an earlier instruction that
            // failed to lower poisons this one too.
            let index = operand.register_index() as usize;
            if index >= self.ir_to_rtl.len() || !self.ir_to_rtl[index].valid() {
                return Err(Unsupported);
            }
            return Ok(self.ir_to_rtl[index]);
        }

        let value = operand.value();
        match operand.ty() {
            ir::Type::Integer8 => {
                let ssa = self.rtl.ssa_allocate(RegisterSize::Dword);
                self.encode_0r(Opcode::LoadImm32, value.u8_value().into(), hw_any(ssa));
                Ok(ssa)
            }
            ir::Type::Integer16 => {
                let ssa = self.rtl.ssa_allocate(RegisterSize::Dword);
                self.encode_0r(Opcode::LoadImm32, value.u16_value().into(), hw_any(ssa));
                Ok(ssa)
            }
            ir::Type::Integer32 => {
                let ssa = self.rtl.ssa_allocate(RegisterSize::Dword);
                self.encode_0r(Opcode::LoadImm32, value.u32_value().into(), hw_any(ssa));
                Ok(ssa)
            }
            ir::Type::Integer64 | ir::Type::HostAddress => {
                let ssa = self.rtl.ssa_allocate(RegisterSize::Qword);
                self.encode_0r(Opcode::LoadImm64, value.u64_value(), hw_any(ssa));
                Ok(ssa)
            }
            ir::Type::Bool => {
                let ssa = self.rtl.ssa_allocate(RegisterSize::Dword);
                self.encode_0r(Opcode::LoadImm32, u64::from(value.bool_value()), hw_any(ssa));
                Ok(ssa)
            }
            ir::Type::Float32 => {
                let temp = self.rtl.ssa_allocate(RegisterSize::Dword);
                let ssa = self.rtl.ssa_allocate(RegisterSize::Dword);
                self.encode_0r(Opcode::LoadImm32, value.u32_value().into(), hw_any(temp));
                self.encode_1r(Opcode::Fmov32, 0, vec_any(ssa), hw_any(temp));
                Ok(ssa)
            }
            ir::Type::Float64 => {
                let temp = self.rtl.ssa_allocate(RegisterSize::Qword);
                let ssa = self.rtl.ssa_allocate(RegisterSize::Qword);
                self.encode_0r(Opcode::LoadImm64, value.u64_value(), hw_any(temp));
                self.encode_1r(Opcode::Fmov64, 0, vec_any(ssa), hw_any(temp));
                Ok(ssa)
            }
            ir::Type::BranchLabel => Err(Unsupported),
        }
    }

    /// Lower the whole program. Returns `CodegenError::Unsupported` with
    /// the full set of offending opcodes if anything could not be lowered.
    pub(crate) fn generate_rtl(mut self) -> CodegenResult<Lowering> {
        let block = self.rtl.allocate_block("arm64_entry");
        assert_eq!(block, 0);

        let mut unsupported: BTreeSet<u32> = BTreeSet::new();

        for index in 0..self.source.instructions().len() {
            let current = self.source.instructions()[index].clone();
            if self.lower_instruction(&current).is_err() {
                unsupported.insert(current.opcode().index());
            }
        }

        if !unsupported.is_empty() {
            return Err(CodegenError::Unsupported {
                opcodes: unsupported,
            });
        }

        Ok(Lowering {
            rtl: self.rtl,
            uses_memory: self.uses_memory,
        })
    }

    fn lower_instruction(&mut self, current: &ir::Instruction) -> Result<(), Unsupported> {
        use ir::Opcode as Ir;

        match current.opcode() {
            Ir::ReadGuest => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let index = u64::from(current.source(0).value().u16_value());
                match current.result(0).ty() {
                    ir::Type::Integer32 => {
                        self.encode_0r(Opcode::ReadGuestRegister32, index, hw_any(ssa_result))
                    }
                    ir::Type::Float32 => {
                        self.encode_0r(Opcode::ReadGuestRegister32, index, vec_any(ssa_result))
                    }
                    ir::Type::Integer64 => {
                        self.encode_0r(Opcode::ReadGuestRegister64, index, hw_any(ssa_result))
                    }
                    ir::Type::Float64 => {
                        self.encode_0r(Opcode::ReadGuestRegister64, index, vec_any(ssa_result))
                    }
                    _ => return Err(Unsupported),
                }
            }

            Ir::WriteGuest => {
                let ssa_value = self.get_rtl_ssa(current.source(1))?;
                let index = u64::from(current.source(0).value().u16_value());
                match current.source(1).ty() {
                    ir::Type::Integer32 => {
                        self.encode_1n(Opcode::WriteGuestRegister32, index, hw_any(ssa_value))
                    }
                    ir::Type::Integer64 => {
                        self.encode_1n(Opcode::WriteGuestRegister64, index, hw_any(ssa_value))
                    }
                    ir::Type::Float32 => {
                        self.encode_1n(Opcode::WriteGuestRegister32, index, vec_any(ssa_value))
                    }
                    ir::Type::Float64 => {
                        self.encode_1n(Opcode::WriteGuestRegister64, index, vec_any(ssa_value))
                    }
                    _ => return Err(Unsupported),
                }
            }

            Ir::Load => {
                self.uses_memory = true;
                let ty = current.result(0).ty();
                let bytes = ty.bytes() as u64;
                let is_float = ty.is_float();

                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_address = self.get_rtl_ssa(current.source(0))?;

                if !is_float && self.use_fastmem && bytes != 8 {
                    self.encode_1r(
                        Opcode::LoadGuestMemory,
                        bytes,
                        hw_any(ssa_result),
                        hw_any(ssa_address),
                    );
                    return Ok(());
                }

                let ssa_bytes = self.rtl.ssa_allocate(RegisterSize::Qword);
                self.encode_0r(Opcode::LoadImm64, bytes, hw_any(ssa_bytes));

                let ssa_call_target = self.rtl.ssa_allocate(RegisterSize::Qword);
                self.encode_0r(
                    Opcode::LoadImm64,
                    self.load_helper_address,
                    hw_any(ssa_call_target),
                );

                // The guest pointer is already in x0 by convention.
                if is_float {
                    let ssa_load = self.rtl.ssa_allocate(RegisterSize::Qword);
                    self.encode_call(
                        Some(hw_any(ssa_load)),
                        &[
                            hw_any(ssa_call_target),
                            hw_at(ssa_address, 1),
                            hw_at(ssa_bytes, 2),
                        ],
                    );
                    let fmov = if bytes == 4 { Opcode::Fmov32 } else { Opcode::Fmov64 };
                    self.encode_1r(fmov, 0, vec_any(ssa_result), hw_any(ssa_load));
                } else {
                    self.encode_call(
                        Some(hw_any(ssa_result)),
                        &[
                            hw_any(ssa_call_target),
                            hw_at(ssa_address, 1),
                            hw_at(ssa_bytes, 2),
                        ],
                    );
                }
            }

            Ir::Store => {
                self.uses_memory = true;

                let ssa_address = self.get_rtl_ssa(current.source(0))?;
                let ssa_value = self.get_rtl_ssa(current.source(1))?;
                let is_float = current.source(1).ty().is_float();

                let ssa_bytes = self.rtl.ssa_allocate(RegisterSize::Qword);
                self.encode_0r(Opcode::LoadImm64, current.ty().bytes() as u64, hw_any(ssa_bytes));

                let ssa_call_target = self.rtl.ssa_allocate(RegisterSize::Qword);
                self.encode_0r(
                    Opcode::LoadImm64,
                    self.store_helper_address,
                    hw_any(ssa_call_target),
                );

                let scalar_value = if is_float {
                    let temp = self.rtl.ssa_allocate(RegisterSize::Qword);
                    let fmov = if current.source(1).ty() == ir::Type::Float32 {
                        Opcode::Fmov32
                    } else {
                        Opcode::Fmov64
                    };
                    self.encode_1r(fmov, 0, hw_any(temp), vec_any(ssa_value));
                    temp
                } else {
                    ssa_value
                };

                self.encode_call(
                    None,
                    &[
                        hw_any(ssa_call_target),
                        hw_at(ssa_address, 1),
                        hw_at(ssa_bytes, 2),
                        hw_at(scalar_value, 3),
                    ],
                );
            }

            Ir::Call => {
                assert!(current.source(0).is_constant());
                assert_eq!(current.source(0).ty(), ir::Type::HostAddress);

                let ssa_call_target = self.rtl.ssa_allocate(RegisterSize::Qword);
                self.encode_0r(
                    Opcode::LoadImm64,
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
                    1 => self.encode_call(Some(hw_any(ssa_result)), &[hw_any(ssa_call_target)]),
                    2 => {
                        let ssa_arg1 = self.get_rtl_ssa(current.source(1))?;
                        self.encode_call(
                            Some(hw_any(ssa_result)),
                            &[hw_any(ssa_call_target), hw_at(ssa_arg1, 1)],
                        );
                    }
                    3 => {
                        let ssa_arg1 = self.get_rtl_ssa(current.source(1))?;
                        let ssa_arg2 = self.get_rtl_ssa(current.source(2))?;
                        self.encode_call(
                            Some(hw_any(ssa_result)),
                            &[
                                hw_any(ssa_call_target),
                                hw_at(ssa_arg1, 1),
                                hw_at(ssa_arg2, 2),
                            ],
                        );
                    }
                    _ => return Err(Unsupported),
                }
            }

            Ir::Compare_eq | Ir::Compare_lt | Ir::Compare_lte | Ir::Compare_ult
            | Ir::Compare_ulte => {
                if current.ty() != ir::Type::Integer32 {
                    return Err(Unsupported);
                }

                let ssa_result = self.make_rtl_ssa(current.result(0));
                let mut sources = [RtlRegister::none(); 2];
                for i in 0..2 {
                    sources[i] = if current.source(i).is_constant() {
                        let constant = current.source(i).value().u32_value();
                        let ssa = self.rtl.ssa_allocate(RegisterSize::Dword);
                        self.encode_0r(Opcode::LoadImm32, constant.into(), hw_any(ssa));
                        ssa
                    } else {
                        self.get_rtl_ssa(current.source(i))?
                    };
                }

                let cond = match current.opcode() {
                    Ir::Compare_eq => Cond::Eq,
                    Ir::Compare_ulte => Cond::Ls,
                    Ir::Compare_lte => Cond::Le,
                    Ir::Compare_ult => Cond::Cc,
                    Ir::Compare_lt => Cond::Mi,
                    _ => unreachable!(),
                };
                self.encode_2r(
                    Opcode::Cmp,
                    cond.bits().into(),
                    hw_any(ssa_result),
                    hw_any(sources[0]),
                    hw_any(sources[1]),
                );
            }

            Ir::BitSetClear => {
                assert!(current.source(2).is_constant());
                if current.ty() != ir::Type::Integer32 {
                    return Err(Unsupported);
                }
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_input = self.get_rtl_ssa(current.source(0))?;
                let ssa_control = self.get_rtl_ssa(current.source(1))?;
                let position = current.source(2).value().u8_value();

                let mask = !(1u32 << position);
                let ssa_masked = self.rtl.ssa_allocate(RegisterSize::Dword);
                if ImmLogic::maybe_from_u32(mask).is_some() {
                    self.encode_1r(
                        Opcode::And32Imm,
                        mask.into(),
                        hw_any(ssa_masked),
                        hw_any(ssa_input),
                    );
                } else {
                    let ssa_mask = self.rtl.ssa_allocate(RegisterSize::Dword);
                    self.encode_0r(Opcode::LoadImm32, mask.into(), hw_any(ssa_mask));
                    self.encode_2r(
                        Opcode::And32,
                        0,
                        hw_any(ssa_masked),
                        hw_any(ssa_input),
                        hw_any(ssa_mask),
                    );
                }

                let ssa_bit = self.rtl.ssa_allocate(RegisterSize::Dword);
                self.encode_1r(
                    Opcode::Shl32Imm,
                    position.into(),
                    hw_any(ssa_bit),
                    hw_any(ssa_control),
                );

                self.encode_2r(
                    Opcode::Or32,
                    0,
                    hw_any(ssa_result),
                    hw_any(ssa_masked),
                    hw_any(ssa_bit),
                );
            }

            Ir::LogicalShiftLeft => {
                self.lower_shift(current, Opcode::Shl32Imm, Opcode::Shl32)?
            }
            Ir::LogicalShiftRight => {
                self.lower_shift(current, Opcode::Shr32Imm, Opcode::Shr32)?
            }
            Ir::ArithmeticShiftRight => {
                self.lower_shift(current, Opcode::Sar32Imm, Opcode::Sar32)?
            }

            Ir::Extend32 => {
                assert!(current.source(0).is_register());
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_arg = self.get_rtl_ssa(current.source(0))?;
                let ssa_zero = self.rtl.ssa_allocate(RegisterSize::Dword);
                self.encode_0r(Opcode::LoadImm32, 0, hw_any(ssa_zero));
                let op = match current.ty() {
                    ir::Type::Integer8 => Opcode::Extend32Byte,
                    ir::Type::Integer16 => Opcode::Extend32Word,
                    _ => return Err(Unsupported),
                };
                self.encode_2r(op, 0, hw_any(ssa_result), hw_any(ssa_arg), hw_any(ssa_zero));
            }

            Ir::Add => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_arg1 = self.get_rtl_ssa(current.source(0))?;

                if current.source(1).is_constant() {
                    match current.ty() {
                        ir::Type::Integer8 | ir::Type::Integer16 | ir::Type::Integer32 => {
                            let constant = current.source(1).value().u32_value();
                            let ssa_temp = self.rtl.ssa_allocate(RegisterSize::Dword);
                            self.encode_0r(Opcode::LoadImm32, constant.into(), hw_any(ssa_temp));
                            self.encode_2r(
                                Opcode::Add32,
                                0,
                                hw_any(ssa_result),
                                hw_any(ssa_arg1),
                                hw_any(ssa_temp),
                            );
                            return Ok(());
                        }
                        _ => return Err(Unsupported),
                    }
                }

                let ssa_arg2 = self.get_rtl_ssa(current.source(1))?;
                match current.ty() {
                    ir::Type::Integer32 => self.encode_2r(
                        Opcode::Add32,
                        0,
                        hw_any(ssa_result),
                        hw_any(ssa_arg1),
                        hw_any(ssa_arg2),
                    ),
                    ir::Type::Float32 => self.encode_2r(
                        Opcode::Add32,
                        0,
                        vec_any(ssa_result),
                        vec_any(ssa_arg1),
                        vec_any(ssa_arg2),
                    ),
                    ir::Type::Float64 => self.encode_2r(
                        Opcode::Add64,
                        0,
                        vec_any(ssa_result),
                        vec_any(ssa_arg1),
                        vec_any(ssa_arg2),
                    ),
                    _ => return Err(Unsupported),
                }
            }

            Ir::Subtract => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_arg1 = self.get_rtl_ssa(current.source(0))?;
                let ssa_arg2 = self.get_rtl_ssa(current.source(1))?;
                match current.result(0).ty() {
                    ir::Type::Integer32 => self.encode_2r(
                        Opcode::Sub32,
                        0,
                        hw_any(ssa_result),
                        hw_any(ssa_arg1),
                        hw_any(ssa_arg2),
                    ),
                    ir::Type::Float32 => self.encode_2r(
                        Opcode::Sub32,
                        0,
                        vec_any(ssa_result),
                        vec_any(ssa_arg1),
                        vec_any(ssa_arg2),
                    ),
                    ir::Type::Float64 => self.encode_2r(
                        Opcode::Sub64,
                        0,
                        vec_any(ssa_result),
                        vec_any(ssa_arg1),
                        vec_any(ssa_arg2),
                    ),
                    _ => return Err(Unsupported),
                }
            }

            Ir::Multiply_u => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_arg1 = self.get_rtl_ssa(current.source(0))?;
                let ssa_arg2 = self.get_rtl_ssa(current.source(1))?;
                match current.ty() {
                    ir::Type::Integer32 => self.encode_2r(
                        Opcode::Umul32,
                        0,
                        hw_any(ssa_result),
                        hw_any(ssa_arg1),
                        hw_any(ssa_arg2),
                    ),
                    _ => return Err(Unsupported),
                }
            }

            Ir::Multiply => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_arg1 = self.get_rtl_ssa(current.source(0))?;
                let ssa_arg2 = self.get_rtl_ssa(current.source(1))?;
                match current.ty() {
                    ir::Type::Integer32 => self.encode_2r(
                        Opcode::Mul32,
                        0,
                        hw_any(ssa_result),
                        hw_any(ssa_arg1),
                        hw_any(ssa_arg2),
                    ),
                    ir::Type::Float32 => self.encode_2r(
                        Opcode::Mul32,
                        0,
                        vec_any(ssa_result),
                        vec_any(ssa_arg1),
                        vec_any(ssa_arg2),
                    ),
                    _ => return Err(Unsupported),
                }
            }

            Ir::Divide => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_arg1 = self.get_rtl_ssa(current.source(0))?;
                let ssa_arg2 = self.get_rtl_ssa(current.source(1))?;
                match current.result(0).ty() {
                    ir::Type::Float32 => self.encode_2r(
                        Opcode::Div32,
                        0,
                        vec_any(ssa_result),
                        vec_any(ssa_arg1),
                        vec_any(ssa_arg2),
                    ),
                    _ => return Err(Unsupported),
                }
            }

            Ir::SquareRoot => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_arg1 = self.get_rtl_ssa(current.source(0))?;
                match current.result(0).ty() {
                    ir::Type::Float32 => {
                        self.encode_1r(Opcode::Sqrt32, 0, vec_any(ssa_result), vec_any(ssa_arg1))
                    }
                    _ => return Err(Unsupported),
                }
            }

            Ir::Or => self.lower_logical(current, Opcode::Or32, Some(Opcode::Or32Imm))?,
            Ir::And => self.lower_logical(current, Opcode::And32, Some(Opcode::And32Imm))?,
            Ir::ExclusiveOr => {
                self.lower_logical(current, Opcode::Xor32, Some(Opcode::Xor32Imm))?
            }

            Ir::Test => {
                let ssa_and = self.rtl.ssa_allocate(RegisterSize::Dword);
                let ssa_arg1 = self.get_rtl_ssa(current.source(0))?;

                if current.source(1).is_constant() {
                    match current.ty() {
                        ir::Type::Integer8 | ir::Type::Integer16 | ir::Type::Integer32 => {
                            let constant = current.source(1).value().u32_value();
                            if ImmLogic::maybe_from_u32(constant).is_some() {
                                self.encode_1r(
                                    Opcode::And32Imm,
                                    constant.into(),
                                    hw_any(ssa_and),
                                    hw_any(ssa_arg1),
                                );
                            } else {
                                let ssa_temp = self.rtl.ssa_allocate(RegisterSize::Dword);
                                self.encode_0r(Opcode::LoadImm32, constant.into(), hw_any(ssa_temp));
                                self.encode_2r(
                                    Opcode::And32,
                                    0,
                                    hw_any(ssa_and),
                                    hw_any(ssa_arg1),
                                    hw_any(ssa_temp),
                                );
                            }
                        }
                        _ => return Err(Unsupported),
                    }
                } else {
                    let ssa_arg2 = self.get_rtl_ssa(current.source(1))?;
                    let op = match current.ty() {
                        ir::Type::Integer32 => Opcode::And32,
                        ir::Type::Integer64 => Opcode::And64,
                        _ => return Err(Unsupported),
                    };
                    self.encode_2r(op, 0, hw_any(ssa_and), hw_any(ssa_arg1), hw_any(ssa_arg2));
                }

                let ssa_result = self.make_rtl_ssa(current.result(0));
                self.encode_1r(Opcode::Test32, 0, hw_any(ssa_result), hw_any(ssa_and));
            }

            Ir::Not => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_arg1 = self.get_rtl_ssa(current.source(0))?;
                match current.result(0).ty() {
                    ir::Type::Integer8 => self.lower_not_mask(ssa_result, ssa_arg1, 0xff),
                    ir::Type::Integer16 => self.lower_not_mask(ssa_result, ssa_arg1, 0xffff),
                    ir::Type::Integer32 => self.lower_not_mask(ssa_result, ssa_arg1, 0xffff_ffff),
                    ir::Type::Bool => {
                        self.encode_1r(Opcode::Xor32Imm, 1, hw_any(ssa_result), hw_any(ssa_arg1))
                    }
                    _ => return Err(Unsupported),
                }
            }

            Ir::BitCast => self.lower_bitcast(current)?,

            Ir::Select => {
                let ssa_result = self.make_rtl_ssa(current.result(0));
                let ssa_decision = self.get_rtl_ssa(current.source(0))?;
                let ssa_false = self.get_rtl_ssa(current.source(1))?;
                let ssa_true = self.get_rtl_ssa(current.source(2))?;
                self.encode_3r(
                    Opcode::CondSelect32,
                    0,
                    hw_any(ssa_result),
                    hw_any(ssa_decision),
                    hw_any(ssa_false),
                    hw_any(ssa_true),
                );
            }

            Ir::Exit => {
                // If the decision is set, exit and return the constant to
                // the caller.
                assert!(current.source(1).is_constant());
                let value = u64::from(current.source(1).value().u32_value());
                if current.source(0).is_constant() {
                    if current.source(0).value().bool_value() {
                        self.encode_0n(Opcode::Ret, value);
                    }
                } else {
                    let ssa_decision = self.get_rtl_ssa(current.source(0))?;
                    self.encode_1n(Opcode::CondRet, value, hw_any(ssa_decision));
                }
            }

            _ => return Err(Unsupported),
        }

        Ok(())
    }

    // 32-bit bitwise operation with a logical-immediate fast path. A
    // constant that fails the encoding check is loaded into a register
    // first.
    fn lower_logical(
        &mut self,
        current: &ir::Instruction,
        reg_op: Opcode,
        imm_op: Option<Opcode>,
    ) -> Result<(), Unsupported> {
        let ssa_result = self.make_rtl_ssa(current.result(0));
        let ssa_arg1 = self.get_rtl_ssa(current.source(0))?;

        if current.source(1).is_constant() {
            match current.ty() {
                ir::Type::Integer8 | ir::Type::Integer16 | ir::Type::Integer32 => {
                    let constant = current.source(1).value().u32_value();
                    match imm_op {
                        Some(imm_op) if ImmLogic::maybe_from_u32(constant).is_some() => {
                            self.encode_1r(
                                imm_op,
                                constant.into(),
                                hw_any(ssa_result),
                                hw_any(ssa_arg1),
                            );
                        }
                        _ => {
                            let ssa_temp = self.rtl.ssa_allocate(RegisterSize::Dword);
                            self.encode_0r(Opcode::LoadImm32, constant.into(), hw_any(ssa_temp));
                            self.encode_2r(
                                reg_op,
                                0,
                                hw_any(ssa_result),
                                hw_any(ssa_arg1),
                                hw_any(ssa_temp),
                            );
                        }
                    }
                    return Ok(());
                }
                _ => return Err(Unsupported),
            }
        }

        let ssa_arg2 = self.get_rtl_ssa(current.source(1))?;
        match current.ty() {
            ir::Type::Integer32 | ir::Type::Bool => {
                self.encode_2r(reg_op, 0, hw_any(ssa_result), hw_any(ssa_arg1), hw_any(ssa_arg2))
            }
            _ => return Err(Unsupported),
        }
        Ok(())
    }

    // Bitwise not of an `width`-bit value: xor against the all-ones mask.
    fn lower_not_mask(&mut self, ssa_result: RtlRegister, ssa_arg: RtlRegister, mask: u32) {
        if ImmLogic::maybe_from_u32(mask).is_some() {
            self.encode_1r(Opcode::Xor32Imm, mask.into(), hw_any(ssa_result), hw_any(ssa_arg));
        } else {
            let ssa_temp = self.rtl.ssa_allocate(RegisterSize::Dword);
            self.encode_0r(Opcode::LoadImm32, mask.into(), hw_any(ssa_temp));
            self.encode_2r(
                Opcode::Xor32,
                0,
                hw_any(ssa_result),
                hw_any(ssa_arg),
                hw_any(ssa_temp),
            );
        }
    }

    fn lower_shift(
        &mut self,
        current: &ir::Instruction,
        imm_op: Opcode,
        reg_op: Opcode,
    ) -> Result<(), Unsupported> {
        let ssa_result = self.make_rtl_ssa(current.result(0));
        let ssa_arg1 = self.get_rtl_ssa(current.source(0))?;

        if current.source(1).is_constant() {
            match current.ty() {
                ir::Type::Integer32 => {
                    let constant = current.source(1).value().u8_value();
                    self.encode_1r(imm_op, constant.into(), hw_any(ssa_result), hw_any(ssa_arg1));
                    return Ok(());
                }
                _ => return Err(Unsupported),
            }
        }

        if current.ty() != ir::Type::Integer32 {
            return Err(Unsupported);
        }
        let ssa_arg2 = self.get_rtl_ssa(current.source(1))?;
        self.encode_2r(reg_op, 0, hw_any(ssa_result), hw_any(ssa_arg1), hw_any(ssa_arg2));
        Ok(())
    }

    fn lower_bitcast(&mut self, current: &ir::Instruction) -> Result<(), Unsupported> {
        let ssa_result = self.make_rtl_ssa(current.result(0));
        let ssa_arg1 = self.get_rtl_ssa(current.source(0))?;
        let from = current.source(0).ty();
        use ir::Type::*;

        match (from, current.ty()) {
            (Integer16 | Integer32, Integer8) => {
                self.encode_1r(Opcode::And32Imm, 0xff, hw_any(ssa_result), hw_any(ssa_arg1));
            }
            (Integer32, Integer16) => {
                self.encode_1r(Opcode::And32Imm, 0xffff, hw_any(ssa_result), hw_any(ssa_arg1));
            }
            (Integer8, Integer32 | Integer16) => {
                self.encode_1r(Opcode::And32Imm, 0xff, hw_any(ssa_result), hw_any(ssa_arg1));
            }
            (Integer16, Integer32) => {
                self.encode_1r(Opcode::And32Imm, 0xffff, hw_any(ssa_result), hw_any(ssa_arg1));
            }
            (Integer64, Integer32) | (Integer32, Integer64) => {
                self.encode_1r(
                    Opcode::And64Imm,
                    0xffff_ffff,
                    hw_any(ssa_result),
                    hw_any(ssa_arg1),
                );
            }
            (Float32, Integer32) => {
                self.encode_1r(Opcode::Fmov32, 0, hw_any(ssa_result), vec_any(ssa_arg1));
            }
            (Integer32, Float32) => {
                self.encode_1r(Opcode::Fmov32, 0, vec_any(ssa_result), hw_any(ssa_arg1));
            }
            (Float64, Integer64) => {
                self.encode_1r(Opcode::Fmov64, 0, hw_any(ssa_result), vec_any(ssa_arg1));
            }
            (Integer64, Float64) => {
                self.encode_1r(Opcode::Fmov64, 0, vec_any(ssa_result), hw_any(ssa_arg1));
            }
            _ => return Err(Unsupported),
        }
        Ok(())
    }
}
