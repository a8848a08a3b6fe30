//! Register allocator tests: constraint handling, coalescing, spilling,
//! and the save-state snapshots.

use rtl_codegen::regalloc::{LinearAllocator, RangeSet};
use rtl_codegen::rtl::{
    HwRegister, HwRegisterType, RegisterAssignment, RegisterSet, RegisterSize, RtlFlags,
    RtlInstruction, RtlOpcode, RtlProgram, RtlRegister,
};

const T: HwRegisterType = HwRegisterType::Scalar;

fn any(rtl: RtlRegister) -> RegisterAssignment {
    RegisterAssignment::any(rtl, T)
}

fn at(rtl: RtlRegister, index: u16) -> RegisterAssignment {
    RegisterAssignment::pinned(rtl, HwRegister::new(T, index))
}

// A generic placeholder instruction; `op` is in the back-end opcode space.
fn instruction(
    tag: u64,
    results: &[RegisterAssignment],
    sources: &[RegisterAssignment],
) -> RtlInstruction {
    RtlInstruction::new(1, tag, results, sources, RtlFlags::empty())
}

fn allocator(registers: u16) -> LinearAllocator {
    let mut allocator = LinearAllocator::new();
    allocator.define_register_type(RegisterSet::new(T, registers));
    allocator
}

// Recompute per-SSA intervals from the allocated output and check that no
// two overlapping intervals of the same register class share a hardware
// assignment. Spill slots count as registers of their own class.
fn check_no_double_assignment(program: &RtlProgram) {
    struct Interval {
        hw: HwRegister,
        from: usize,
        to: usize,
    }

    let mut intervals: Vec<Option<Interval>> = Vec::new();
    intervals.resize_with(program.ssa_count() as usize, || None);

    // Pruned moves still count: their operands name real definitions.
    for (position, instruction) in program.block(0).instructions().iter().enumerate() {
        for i in 0..instruction.source_count() {
            let operand = instruction.source(i);
            if !operand.rtl.valid() {
                continue;
            }
            assert!(operand.hw.assigned(), "unassigned source {}", operand.rtl);
            let interval = intervals[operand.rtl.index() as usize]
                .as_mut()
                .expect("use before definition");
            assert_eq!(interval.hw, operand.hw, "{} reassigned", operand.rtl);
            interval.to = position;
        }
        for i in 0..instruction.result_count() {
            let operand = instruction.result(i);
            if !operand.rtl.valid() {
                continue;
            }
            assert!(operand.hw.assigned(), "unassigned result {}", operand.rtl);
            let slot = &mut intervals[operand.rtl.index() as usize];
            assert!(slot.is_none(), "{} defined twice", operand.rtl);
            *slot = Some(Interval {
                hw: operand.hw,
                from: position,
                to: position + 1,
            });
        }
    }

    // Two values of one class must not share a hardware location while
    // both are live; intervals that merely touch at a boundary come from
    // coalescing and are fine.
    let live: Vec<&Interval> = intervals.iter().flatten().collect();
    for (i, a) in live.iter().enumerate() {
        for b in &live[i + 1..] {
            let overlap = a.from < b.to && b.from < a.to;
            assert!(
                !(overlap && a.hw == b.hw),
                "two values share {} around instruction {}",
                a.hw,
                a.from.max(b.from)
            );
        }
    }
}

#[test]
fn allocate_constraints() {
    let mut allocator = allocator(3);
    let mut target = RtlProgram::new();
    let block = target.allocate_block("test");
    assert_eq!(block, 0);

    // A few definitions to fill in space.
    let mut defs = Vec::new();
    for i in 0..4 {
        let ssa = target.ssa_allocate(RegisterSize::Dword);
        defs.push(ssa);
        let entry = instruction(i, &[any(ssa)], &[]);
        target.block_mut(0).push(entry);
    }

    // An input constraint, an output constraint, and both at once.
    let r4 = target.ssa_allocate(RegisterSize::Dword);
    target
        .block_mut(0)
        .push(instruction(10, &[any(r4)], &[at(defs[1], 2), any(defs[3])]));

    let r5 = target.ssa_allocate(RegisterSize::Dword);
    target
        .block_mut(0)
        .push(instruction(11, &[at(r5, 2)], &[any(defs[2]), any(r4)]));

    let r6 = target.ssa_allocate(RegisterSize::Dword);
    target
        .block_mut(0)
        .push(instruction(12, &[at(r6, 2)], &[at(defs[2], 1), any(defs[0])]));

    let result = allocator.allocate(target);

    check_no_double_assignment(&result);

    // Every pre-pinned operand holds exactly the requested register.
    for entry in result.block(0).instructions() {
        match entry.data {
            10 => assert_eq!(entry.source(0).hw, HwRegister::new(T, 2)),
            11 => assert_eq!(entry.result(0).hw, HwRegister::new(T, 2)),
            12 => {
                assert_eq!(entry.result(0).hw, HwRegister::new(T, 2));
                assert_eq!(entry.source(0).hw, HwRegister::new(T, 1));
            }
            _ => (),
        }
    }
}

#[test]
fn allocate_external_constraint() {
    let mut allocator = allocator(3);
    let mut target = RtlProgram::new();
    target.allocate_block("test");

    let r0 = target.ssa_allocate(RegisterSize::Dword);
    target.block_mut(0).push(instruction(0, &[any(r0)], &[]));

    // A manually assigned non-allocatable register rides along as a pure
    // constraint; the allocator must leave it untouched.
    let r1 = target.ssa_allocate(RegisterSize::Dword);
    target.block_mut(0).push(instruction(
        1,
        &[any(r1)],
        &[any(r0), RegisterAssignment::fixed(HwRegister::new(T, 99))],
    ));

    let result = allocator.allocate(target);
    check_no_double_assignment(&result);

    let entry = &result.block(0).instructions()[result.block(0).len() - 1];
    assert_eq!(entry.data, 1);
    assert!(!entry.source(1).rtl.valid());
    assert_eq!(entry.source(1).hw, HwRegister::new(T, 99));
}

#[test]
fn allocate_duplicate_source() {
    let mut allocator = allocator(3);
    let mut target = RtlProgram::new();
    target.allocate_block("test");

    let r0 = target.ssa_allocate(RegisterSize::Dword);
    target.block_mut(0).push(instruction(0, &[any(r0)], &[]));

    // The same SSA register used for both sources.
    let r1 = target.ssa_allocate(RegisterSize::Dword);
    target
        .block_mut(0)
        .push(instruction(1, &[any(r1)], &[any(r0), any(r0)]));

    let result = allocator.allocate(target);
    check_no_double_assignment(&result);

    let entry = &result.block(0).instructions()[result.block(0).len() - 1];
    assert_eq!(entry.source(0).hw, entry.source(1).hw);
}

#[test]
fn allocate_multiple_results() {
    let mut allocator = allocator(3);
    let mut target = RtlProgram::new();
    target.allocate_block("test");

    let r0 = target.ssa_allocate(RegisterSize::Dword);
    target.block_mut(0).push(instruction(0, &[any(r0)], &[]));
    let r1 = target.ssa_allocate(RegisterSize::Dword);
    target.block_mut(0).push(instruction(1, &[any(r1)], &[]));

    let r2 = target.ssa_allocate(RegisterSize::Dword);
    let r3 = target.ssa_allocate(RegisterSize::Dword);
    target
        .block_mut(0)
        .push(instruction(2, &[any(r2), any(r3)], &[any(r0), any(r1)]));

    let result = allocator.allocate(target);
    check_no_double_assignment(&result);

    let entry = &result.block(0).instructions()[result.block(0).len() - 1];
    assert_ne!(entry.result(0).hw, entry.result(1).hw);
}

#[test]
fn destructive_results_coalesce() {
    let mut allocator = allocator(4);
    let mut target = RtlProgram::new();
    target.allocate_block("test");

    let r0 = target.ssa_allocate(RegisterSize::Dword);
    target.block_mut(0).push(instruction(0, &[any(r0)], &[]));
    let r1 = target.ssa_allocate(RegisterSize::Dword);
    target.block_mut(0).push(instruction(1, &[any(r1)], &[]));

    let r2 = target.ssa_allocate(RegisterSize::Dword);
    target.block_mut(0).push(RtlInstruction::new(
        1,
        2,
        &[any(r2)],
        &[any(r0), any(r1)],
        RtlFlags::DESTRUCTIVE,
    ));

    let result = allocator.allocate(target);
    check_no_double_assignment(&result);

    // The result shares its first source's register; the second source
    // keeps its own.
    let entry = &result.block(0).instructions()[result.block(0).len() - 1];
    assert_eq!(entry.result(0).hw, entry.source(0).hw);
    assert_ne!(entry.result(0).hw, entry.source(1).hw);
}

#[test]
fn pinned_operands_produce_no_surviving_self_moves() {
    let mut allocator = allocator(4);
    let mut target = RtlProgram::new();
    target.allocate_block("test");

    let r0 = target.ssa_allocate(RegisterSize::Dword);
    target.block_mut(0).push(instruction(0, &[any(r0)], &[]));

    let r1 = target.ssa_allocate(RegisterSize::Dword);
    target
        .block_mut(0)
        .push(instruction(1, &[any(r1)], &[at(r0, 3)]));

    let result = allocator.allocate(target);
    check_no_double_assignment(&result);

    // After pruning, no Move may have identical source and destination.
    for entry in result.block(0).instructions() {
        if entry.op == RtlOpcode::Move as u16 {
            assert_ne!(entry.result(0).hw, entry.source(0).hw);
        }
    }
}

#[test]
fn spills_when_pool_is_dry() {
    let mut allocator = allocator(3);
    let mut target = RtlProgram::new();
    target.allocate_block("test");

    // Eight simultaneously live values in a three-register pool.
    let mut values = Vec::new();
    for i in 0..8 {
        let ssa = target.ssa_allocate(RegisterSize::Dword);
        values.push(ssa);
        target.block_mut(0).push(instruction(i, &[any(ssa)], &[]));
    }

    // One instruction consuming everything keeps all of them live.
    let uses: Vec<RegisterAssignment> = values.iter().map(|&v| any(v)).collect();
    let sink = target.ssa_allocate(RegisterSize::Dword);
    target
        .block_mut(0)
        .push(RtlInstruction::new(1, 100, &[any(sink)], &uses, RtlFlags::empty()));

    let result = allocator.allocate(target);
    check_no_double_assignment(&result);

    // Five values cannot fit; each takes a distinct slot, and the count
    // is one past the largest slot index used.
    assert!(result.spill_size() >= 5);
    let mut max_slot = 0;
    for entry in result.block(0).instructions() {
        for i in 0..entry.source_count() {
            if entry.source(i).hw.is_spill() {
                max_slot = max_slot.max(entry.source(i).hw.spill_index() as u32);
            }
        }
    }
    assert_eq!(result.spill_size(), max_slot + 1);
}

#[test]
fn type_integrity_across_classes() {
    let mut allocator = LinearAllocator::new();
    allocator.define_register_type(RegisterSet::new(HwRegisterType::Scalar, 4));
    allocator.define_register_type(RegisterSet::new(HwRegisterType::Vector, 4));

    let mut target = RtlProgram::new();
    target.allocate_block("test");

    let scalar = target.ssa_allocate(RegisterSize::Dword);
    target.block_mut(0).push(instruction(0, &[any(scalar)], &[]));
    let vector = target.ssa_allocate(RegisterSize::VecSs);
    target.block_mut(0).push(instruction(
        1,
        &[RegisterAssignment::any(vector, HwRegisterType::Vector)],
        &[],
    ));

    let sink = target.ssa_allocate(RegisterSize::Dword);
    target.block_mut(0).push(instruction(
        2,
        &[any(sink)],
        &[
            any(scalar),
            RegisterAssignment::any(vector, HwRegisterType::Vector),
        ],
    ));

    let result = allocator.allocate(target);

    for entry in result.block(0).instructions() {
        for i in 0..entry.source_count() {
            let operand = entry.source(i);
            if operand.rtl == scalar {
                assert_eq!(operand.hw.ty(), HwRegisterType::Scalar);
            }
            if operand.rtl == vector {
                assert_eq!(operand.hw.ty(), HwRegisterType::Vector);
            }
        }
    }
}

#[test]
fn save_state_snapshots_allocations() {
    let mut allocator = allocator(4);
    let mut target = RtlProgram::new();
    target.allocate_block("test");

    // Two values live across the save-state point, one dead before it.
    let live_a = target.ssa_allocate(RegisterSize::Dword);
    target.block_mut(0).push(instruction(0, &[any(live_a)], &[]));
    let dead = target.ssa_allocate(RegisterSize::Dword);
    target.block_mut(0).push(instruction(1, &[any(dead)], &[]));
    let live_b = target.ssa_allocate(RegisterSize::Dword);
    target
        .block_mut(0)
        .push(instruction(2, &[any(live_b)], &[any(dead)]));

    let call_result = target.ssa_allocate(RegisterSize::Dword);
    target.block_mut(0).push(RtlInstruction::new(
        2,
        3,
        &[any(call_result)],
        &[],
        RtlFlags::SAVE_STATE,
    ));

    let sink = target.ssa_allocate(RegisterSize::Dword);
    target.block_mut(0).push(instruction(
        4,
        &[any(sink)],
        &[any(live_a), any(live_b), any(call_result)],
    ));

    let result = allocator.allocate(target);

    let snapshot = result
        .block(0)
        .instructions()
        .iter()
        .find(|entry| entry.data == 3)
        .expect("save-state instruction lost")
        .saved_state();

    let live_regs: Vec<HwRegister> = result
        .block(0)
        .instructions()
        .iter()
        .find(|entry| entry.data == 4)
        .map(|entry| vec![entry.source(0).hw, entry.source(1).hw])
        .unwrap();

    // The two values live across the point are allocated in the snapshot;
    // the instruction's own result is not yet.
    let set = snapshot.get(T);
    for reg in live_regs {
        assert!(!set.is_free(reg), "{reg} live across the call but free");
    }

    let own = result
        .block(0)
        .instructions()
        .iter()
        .find(|entry| entry.data == 3)
        .unwrap()
        .result(0)
        .hw;
    assert!(set.is_free(own), "snapshot taken after own result went live");
}

#[test]
fn range_set_probes() {
    let mut set = RangeSet::new();
    set.add_range(0, 5, 10);
    set.add_range(0, 20, 21);
    set.add_range(0, 11, 12);
    set.add_range(1, 7, 13);
    set.add_range(0, 13, 15);
    set.add_range(0, 12, 13);

    for position in [3, 17, 24] {
        assert!(!set.is_contended(0, position));
    }
    assert!(set.is_contended(0, 7));
    assert!(set.is_contended(0, 13));
    assert!(set.is_contended(1, 7));
    assert!(!set.is_contended(1, 3));

    assert!(!set.is_contended_range(0, 1, 5));
    assert!(set.is_contended_range(0, 3, 7));
    assert!(set.is_contended_range(0, 0, 50));
    assert!(!set.is_contended_range(0, 25, 50));
    assert!(set.is_contended_range(1, 3, 8));
    assert!(!set.is_contended_range(1, 13, 50));
}
