//! End-to-end x86-64 scenarios: build guest IR, compile, execute, compare
//! observable guest state. Execution only happens on matching hosts; the
//! compilation side runs everywhere.

mod common;

use rtl_codegen::ir::{Instruction, IrProgram, Opcode, Operand, Type};
use rtl_codegen::isa::x64::Compiler;
use rtl_codegen::Constant;

fn const_u16(value: u16) -> Operand {
    Operand::constant(Constant::from_u16(value), Type::Integer16)
}

fn const_i32(value: u32) -> Operand {
    Operand::constant(Constant::from_u32(value), Type::Integer32)
}

fn const_bool(value: bool) -> Operand {
    Operand::constant(Constant::from_bool(value), Type::Bool)
}

fn read_guest(program: &mut IrProgram, index: u16, ty: Type) -> Operand {
    let result = program.allocate_register(ty);
    program.push(Instruction::new(
        Opcode::ReadGuest,
        ty,
        &[result],
        &[const_u16(index)],
    ));
    result
}

fn write_guest(program: &mut IrProgram, index: u16, value: Operand) {
    program.push(Instruction::new(
        Opcode::WriteGuest,
        value.ty(),
        &[],
        &[const_u16(index), value],
    ));
}

fn binary(program: &mut IrProgram, opcode: Opcode, ty: Type, a: Operand, b: Operand) -> Operand {
    let result = program.allocate_register(ty);
    program.push(Instruction::new(opcode, ty, &[result], &[a, b]));
    result
}

fn exit_if(program: &mut IrProgram, decision: Operand, value: u32) {
    program.push(Instruction::new(
        Opcode::Exit,
        Type::Integer64,
        &[],
        &[
            decision,
            Operand::constant(Constant::from_u32(value), Type::Integer64),
        ],
    ));
}

fn exit_always(program: &mut IrProgram, value: u32) {
    exit_if(program, const_bool(true), value);
}

fn compiler() -> Compiler {
    let mut compiler = Compiler::new();
    compiler.set_register_address(common::register_address);
    compiler
}

#[test]
fn compiles_to_nonempty_code() {
    let mut program = IrProgram::new();
    let r0 = read_guest(&mut program, 0, Type::Integer32);
    let r1 = binary(&mut program, Opcode::Add, Type::Integer32, r0, const_i32(1));
    write_guest(&mut program, 0, r1);
    exit_always(&mut program, 0);

    let routine = compiler().compile(program).unwrap();
    assert!(routine.size() > 0);
    // push rbx is the first callee save of the prologue.
    assert_eq!(routine.data()[0], 0x53);
    // The stream ends with ret.
    assert_eq!(*routine.data().last().unwrap(), 0xc3);
}

#[cfg(all(unix, target_arch = "x86_64"))]
mod execute {
    use super::*;
    use crate::common::{ExecBuffer, TestGuest};

    fn run(program: IrProgram, guest: &mut TestGuest) -> u64 {
        let routine = compiler().compile(program).unwrap();
        ExecBuffer::new(routine.data()).run(guest)
    }

    // Scenario 1: pure arithmetic, no spill.
    #[test]
    fn add_immediate() {
        let mut program = IrProgram::new();
        let r0 = read_guest(&mut program, 0, Type::Integer32);
        let r1 = binary(&mut program, Opcode::Add, Type::Integer32, r0, const_i32(1));
        write_guest(&mut program, 0, r1);
        exit_always(&mut program, 0);

        let mut guest = TestGuest::new(0);
        guest.registers[0] = 41;
        assert_eq!(run(program, &mut guest), 0);
        assert_eq!(guest.registers[0], 42);
    }

    // Scenario 2: logical shift right, variable count (pinned to cl).
    #[test]
    fn shift_variable_by_variable() {
        let mut program = IrProgram::new();
        let r0 = read_guest(&mut program, 0, Type::Integer32);
        let r1 = read_guest(&mut program, 1, Type::Integer32);
        let r2 = binary(
            &mut program,
            Opcode::LogicalShiftRight,
            Type::Integer32,
            r0,
            r1,
        );
        write_guest(&mut program, 2, r2);
        exit_always(&mut program, 0);

        let mut guest = TestGuest::new(0);
        guest.registers[0] = 0x8000_0000;
        guest.registers[1] = 4;
        run(program, &mut guest);
        assert_eq!(guest.registers[2], 0x0800_0000);
    }

    // Scenario 3: widening unsigned multiply with the rdx tie-down.
    #[test]
    fn multiply_unsigned() {
        let mut program = IrProgram::new();
        let r0 = read_guest(&mut program, 0, Type::Integer32);
        let r1 = read_guest(&mut program, 1, Type::Integer32);
        let r2 = binary(&mut program, Opcode::Multiply_u, Type::Integer32, r0, r1);
        write_guest(&mut program, 2, r2);
        exit_always(&mut program, 0);

        let mut guest = TestGuest::new(0);
        guest.registers[0] = 0xffff_ffff;
        guest.registers[1] = 2;
        run(program, &mut guest);
        assert_eq!(guest.registers[2], 0xffff_fffe);
    }

    // Scenario 4: forced spill with 32 simultaneously live values.
    #[test]
    fn spill_under_pressure() {
        let mut program = IrProgram::new();
        let r0 = read_guest(&mut program, 0, Type::Integer32);

        let mut values = Vec::new();
        for i in 0..32u32 {
            values.push(binary(
                &mut program,
                Opcode::Add,
                Type::Integer32,
                r0,
                const_i32(i),
            ));
        }

        // Sum everything; every value stays live until consumed.
        let mut sum = values[0];
        for &value in &values[1..] {
            sum = binary(&mut program, Opcode::Add, Type::Integer32, sum, value);
        }
        write_guest(&mut program, 1, sum);
        exit_always(&mut program, 0);

        let mut guest = TestGuest::new(0);
        guest.registers[0] = 3;
        run(program, &mut guest);

        // 32 * 3 + sum(0..32)
        assert_eq!(guest.registers[1], 32 * 3 + (0..32).sum::<u32>());
    }

    // Scenario 5: load through the helper with the save-state framing. The
    // helper deliberately corrupts caller-saved registers before
    // returning.
    #[test]
    fn load_through_helper() {
        use rtl_codegen::isa::guest_store;

        unsafe extern "C" fn clobbering_load(
            guest: *mut u8,
            address: u32,
            bytes: usize,
        ) -> Constant {
            let value = rtl_codegen::isa::guest_load(guest, address, bytes);
            // Trash every caller-saved register we can name; the emitted
            // frame must protect anything live.
            core::arch::asm!(
                "mov r8, 0x5a5a5a5a",
                "mov r9, 0x5a5a5a5a",
                "mov r10, 0x5a5a5a5a",
                "mov r11, 0x5a5a5a5a",
                out("r8") _,
                out("r9") _,
                out("r10") _,
                out("r11") _,
            );
            value
        }

        let mut program = IrProgram::new();
        let r0 = read_guest(&mut program, 0, Type::Integer32);
        let loaded = program.allocate_register(Type::Integer32);
        program.push(Instruction::new(
            Opcode::Load,
            Type::Integer32,
            &[loaded],
            &[r0],
        ));
        let r2 = binary(&mut program, Opcode::Add, Type::Integer32, loaded, const_i32(3));
        write_guest(&mut program, 1, r2);
        exit_always(&mut program, 0);

        let mut compiler = compiler();
        compiler.set_memory_helpers(clobbering_load, guest_store);
        let routine = compiler.compile(program).unwrap();

        let mut guest = TestGuest::new(0x100);
        guest.registers[0] = 0x40;
        guest.memory[0x40..0x44].copy_from_slice(&0x100u32.to_le_bytes());
        ExecBuffer::new(routine.data()).run(&mut guest);

        assert_eq!(guest.registers[1], 0x103);
        assert_eq!(guest.loads, 1);
    }

    // Scenario 6: branch patching through the exit label.
    #[test]
    fn conditional_exit() {
        fn build() -> IrProgram {
            let mut program = IrProgram::new();
            let r0 = read_guest(&mut program, 0, Type::Integer32);
            let is_zero = binary(
                &mut program,
                Opcode::Compare_eq,
                Type::Integer32,
                r0,
                const_i32(0),
            );
            exit_if(&mut program, is_zero, 7);
            write_guest(&mut program, 0, const_i32(9));
            exit_always(&mut program, 0);
            program
        }

        let mut guest = TestGuest::new(0);
        guest.registers[0] = 0;
        assert_eq!(run(build(), &mut guest), 7);
        assert_eq!(guest.registers[0], 0);

        let mut guest = TestGuest::new(0);
        guest.registers[0] = 5;
        assert_eq!(run(build(), &mut guest), 0);
        assert_eq!(guest.registers[0], 9);
    }

    #[test]
    fn store_through_helper() {
        let mut program = IrProgram::new();
        let r0 = read_guest(&mut program, 0, Type::Integer32);
        let r1 = read_guest(&mut program, 1, Type::Integer32);
        program.push(Instruction::new(
            Opcode::Store,
            Type::Integer32,
            &[],
            &[r0, r1],
        ));
        exit_always(&mut program, 0);

        let mut guest = TestGuest::new(0x100);
        guest.registers[0] = 0x20;
        guest.registers[1] = 0xdead_beef;
        run(program, &mut guest);

        assert_eq!(guest.stores, 1);
        assert_eq!(
            u32::from_le_bytes(guest.memory[0x20..0x24].try_into().unwrap()),
            0xdead_beef
        );
    }

    #[test]
    fn float_add() {
        let mut program = IrProgram::new();
        let r0 = read_guest(&mut program, 0, Type::Float32);
        let r1 = read_guest(&mut program, 1, Type::Float32);
        let r2 = binary(&mut program, Opcode::Add, Type::Float32, r0, r1);
        write_guest(&mut program, 2, r2);
        exit_always(&mut program, 0);

        let mut guest = TestGuest::new(0);
        guest.registers[0] = 1.5f32.to_bits();
        guest.registers[1] = 2.25f32.to_bits();
        run(program, &mut guest);
        assert_eq!(f32::from_bits(guest.registers[2]), 3.75);
    }

    #[test]
    fn select_and_compare() {
        let mut program = IrProgram::new();
        let r0 = read_guest(&mut program, 0, Type::Integer32);
        let r1 = read_guest(&mut program, 1, Type::Integer32);
        let less = binary(&mut program, Opcode::Compare_ult, Type::Integer32, r0, r1);
        let min = program.allocate_register(Type::Integer32);
        // select(cond, on_false, on_true)
        program.push(Instruction::new(
            Opcode::Select,
            Type::Integer32,
            &[min],
            &[less, r1, r0],
        ));
        write_guest(&mut program, 2, min);
        exit_always(&mut program, 0);

        let mut guest = TestGuest::new(0);
        guest.registers[0] = 17;
        guest.registers[1] = 90;
        run(program, &mut guest);
        assert_eq!(guest.registers[2], 17);
    }

    #[test]
    fn rotate_and_bitops() {
        let mut program = IrProgram::new();
        let r0 = read_guest(&mut program, 0, Type::Integer32);
        let rotated = binary(
            &mut program,
            Opcode::RotateLeft,
            Type::Integer32,
            r0,
            const_i32(8),
        );
        let masked = binary(
            &mut program,
            Opcode::And,
            Type::Integer32,
            rotated,
            const_i32(0xffff),
        );
        let combined = binary(
            &mut program,
            Opcode::Or,
            Type::Integer32,
            masked,
            const_i32(0x5000_0000),
        );
        write_guest(&mut program, 1, combined);
        exit_always(&mut program, 0);

        let mut guest = TestGuest::new(0);
        guest.registers[0] = 0xab00_00cd;
        run(program, &mut guest);
        // rol8: 0x0000cdab, mask: 0xcdab, or: 0x5000cdab
        assert_eq!(guest.registers[1], 0x5000_cdab);
    }

    #[test]
    fn fast_memory_emitter() {
        use rtl_codegen::isa::x64::asm::{Amode, Assembler, RegMem};
        use rtl_codegen::isa::x64::regs::{Gpr, GPR_MEMORY_BASE};
        use rtl_codegen::rtl::RegisterSize;

        // Inline a load as base + address arithmetic instead of the
        // helper call.
        fn emit_load(asm: &mut Assembler, bytes: usize, address: Gpr, result: Gpr) {
            assert_eq!(bytes, 4);
            if result == address {
                asm.add(RegisterSize::Qword, result.into(), GPR_MEMORY_BASE.into());
            } else {
                asm.mov(RegisterSize::Qword, result.into(), GPR_MEMORY_BASE.into());
                asm.add(RegisterSize::Qword, result.into(), address.into());
            }
            asm.mov(
                RegisterSize::Dword,
                result.into(),
                RegMem::Mem(Amode::base_disp(result, 0)),
            );
        }

        let mut program = IrProgram::new();
        let r0 = read_guest(&mut program, 0, Type::Integer32);
        let loaded = program.allocate_register(Type::Integer32);
        program.push(Instruction::new(
            Opcode::Load,
            Type::Integer32,
            &[loaded],
            &[r0],
        ));
        write_guest(&mut program, 1, loaded);
        exit_always(&mut program, 0);

        let mut compiler = compiler();
        compiler.set_load_emitter(Some(emit_load));
        let routine = compiler.compile(program).unwrap();

        let mut guest = TestGuest::new(0x100);
        guest.registers[0] = 0x40;
        guest.memory[0x40..0x44].copy_from_slice(&0x1234_5678u32.to_le_bytes());
        ExecBuffer::new(routine.data()).run(&mut guest);

        assert_eq!(guest.registers[1], 0x1234_5678);
        // The helper was never involved.
        assert_eq!(guest.loads, 0);
    }
}
