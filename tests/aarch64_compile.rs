//! AArch64 back-end tests: prologue/epilogue shape and instruction words
//! are checked structurally everywhere; execution runs on matching hosts.

mod common;

use rtl_codegen::ir::{Instruction, IrProgram, Opcode, Operand, Type};
use rtl_codegen::isa::aarch64::Compiler;
use rtl_codegen::{CodegenError, Constant};

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

fn words(code: &[u8]) -> Vec<u32> {
    code.chunks(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn simple_add_program() -> IrProgram {
    let mut program = IrProgram::new();
    let r0 = read_guest(&mut program, 0, Type::Integer32);
    let r1 = binary(&mut program, Opcode::Add, Type::Integer32, r0, const_i32(1));
    write_guest(&mut program, 0, r1);
    exit_always(&mut program, 0);
    program
}

#[test]
fn prologue_and_epilogue_shape() {
    let routine = compiler().compile(simple_add_program()).unwrap();
    let words = words(routine.data());

    // stp x29, x30, [sp, #-16]! opens the frame.
    assert_eq!(words[0], 0xa9bf7bfd);
    // ldp x29, x30, [sp], #16 then ret close it.
    let n = words.len();
    assert_eq!(words[n - 2], 0xa8c17bfd);
    assert_eq!(words[n - 1], 0xd65f03c0);
}

#[test]
fn unsupported_opcodes_are_collected() {
    let mut program = IrProgram::new();
    let r0 = read_guest(&mut program, 0, Type::Integer32);
    let rotated = binary(
        &mut program,
        Opcode::RotateLeft,
        Type::Integer32,
        r0,
        const_i32(1),
    );
    let extended = program.allocate_register(Type::Integer64);
    program.push(Instruction::new(
        Opcode::Extend64,
        Type::Integer32,
        &[extended],
        &[rotated],
    ));
    write_guest(&mut program, 0, rotated);
    exit_always(&mut program, 0);

    // Both unimplemented opcodes are reported at once, not just the
    // first.
    match compiler().compile(program) {
        Err(CodegenError::Unsupported { opcodes }) => {
            assert!(opcodes.contains(&Opcode::RotateLeft.index()));
            assert!(opcodes.contains(&Opcode::Extend64.index()));
        }
        other => panic!("expected unsupported-opcode error, got {other:?}"),
    }
}

#[test]
fn logical_immediate_fallback() {
    // 0xff is a logical immediate; 0x1234_5678 is not and must take the
    // load-immediate + register form.
    let mut program = IrProgram::new();
    let r0 = read_guest(&mut program, 0, Type::Integer32);
    let a = binary(&mut program, Opcode::And, Type::Integer32, r0, const_i32(0xff));
    let b = binary(
        &mut program,
        Opcode::And,
        Type::Integer32,
        a,
        const_i32(0x1234_5678),
    );
    write_guest(&mut program, 1, b);
    exit_always(&mut program, 0);

    let routine = compiler().compile(program).unwrap();
    let words = words(routine.data());

    // One and-immediate for 0xff...
    assert!(words.iter().any(|&w| w & 0xffc0_0000 == 0x1200_0000));
    // ...and a register-form and for the other constant.
    assert!(words.iter().any(|&w| w & 0xffe0_fc00 == 0x0a00_0000));
}

#[test]
fn constant_arithmetic_shift_uses_immediate_form() {
    let mut program = IrProgram::new();
    let r0 = read_guest(&mut program, 0, Type::Integer32);
    let shifted = binary(
        &mut program,
        Opcode::ArithmeticShiftRight,
        Type::Integer32,
        r0,
        const_i32(3),
    );
    write_guest(&mut program, 1, shifted);
    exit_always(&mut program, 0);

    let routine = compiler().compile(program).unwrap();
    let words = words(routine.data());

    // add wd, wzr, wn, asr #3: shifted-register add with the ASR shift
    // and the zero register as the first source.
    assert!(words.iter().any(|&w| {
        w & 0xffc0_0000 == 0x0b80_0000      // add (shifted register), asr
            && (w >> 10) & 0x3f == 3        // shift amount
            && (w >> 5) & 0x1f == 31        // wzr as the first source
    }));
}

#[cfg(all(unix, target_arch = "aarch64"))]
mod execute {
    use super::*;
    use crate::common::{ExecBuffer, TestGuest};

    fn run(program: IrProgram, guest: &mut TestGuest) -> u64 {
        let routine = compiler().compile(program).unwrap();
        ExecBuffer::new(routine.data()).run(guest)
    }

    #[test]
    fn add_immediate() {
        let mut guest = TestGuest::new(0);
        guest.registers[0] = 41;
        assert_eq!(run(simple_add_program(), &mut guest), 0);
        assert_eq!(guest.registers[0], 42);
    }

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
    fn load_through_helper() {
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

        let mut guest = TestGuest::new(0x100);
        guest.registers[0] = 0x40;
        guest.memory[0x40..0x44].copy_from_slice(&0x100u32.to_le_bytes());
        run(program, &mut guest);

        assert_eq!(guest.registers[1], 0x103);
        assert_eq!(guest.loads, 1);
    }

    #[test]
    fn fast_memory_load() {
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
        compiler.set_fastmem(true);
        let routine = compiler.compile(program).unwrap();

        let mut guest = TestGuest::new(0x100);
        guest.registers[0] = 0x40;
        guest.memory[0x40..0x44].copy_from_slice(&0x1234_5678u32.to_le_bytes());
        ExecBuffer::new(routine.data()).run(&mut guest);

        assert_eq!(guest.registers[1], 0x1234_5678);
        assert_eq!(guest.loads, 0);
    }

    #[test]
    fn arithmetic_shift_immediate_matches_register_form() {
        for value in [0x8000_0000u32, 0x7fff_ffff, 1, 0] {
            let mut immediate = IrProgram::new();
            let r0 = read_guest(&mut immediate, 0, Type::Integer32);
            let shifted = binary(
                &mut immediate,
                Opcode::ArithmeticShiftRight,
                Type::Integer32,
                r0,
                const_i32(5),
            );
            write_guest(&mut immediate, 1, shifted);
            exit_always(&mut immediate, 0);

            let mut through_register = IrProgram::new();
            let r0 = read_guest(&mut through_register, 0, Type::Integer32);
            let count = read_guest(&mut through_register, 2, Type::Integer32);
            let shifted = binary(
                &mut through_register,
                Opcode::ArithmeticShiftRight,
                Type::Integer32,
                r0,
                count,
            );
            write_guest(&mut through_register, 1, shifted);
            exit_always(&mut through_register, 0);

            let mut a = TestGuest::new(0);
            a.registers[0] = value;
            run(immediate, &mut a);

            let mut b = TestGuest::new(0);
            b.registers[0] = value;
            b.registers[2] = 5;
            run(through_register, &mut b);

            assert_eq!(a.registers[1], b.registers[1]);
            assert_eq!(a.registers[1], ((value as i32) >> 5) as u32);
        }
    }
}
