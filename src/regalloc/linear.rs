//! SSA linear-scan register allocator with support for pre-pinned
//! hardware-register constraints.
//!
//! The allocator runs six stages over a single extended basic block:
//!
//! 1. `prepare` renames every pinned operand and inserts a `Move` next to
//!    it, so that pins only ever sit on trivial copies.
//! 2. `calculate_live_ranges` assigns each SSA name the interval from its
//!    defining instruction to its last use. A use does not extend the
//!    range *through* the using instruction, which is what lets a
//!    destructive result share its first source's register.
//! 3. `join_live_ranges` coalesces compatible ranges (destructive results
//!    with their first source; move results with any source) so the copies
//!    from stage 1 can be deleted again.
//! 4. `assign_registers` performs the linear scan, spilling when the pool
//!    is dry and snapshotting allocation state at save-state points.
//! 5. `encode_rtl` writes the resolved assignment into every operand.
//! 6. `prune_rtl` removes the moves whose source and destination landed in
//!    the same place.

use std::collections::BTreeMap;

use log::trace;

use crate::rtl::{
    HwRegister, HwRegisterType, RegisterAssignment, RegisterSet, RtlFlags, RtlInstruction,
    RtlOpcode, RtlProgram, RtlRegister, SavedState, MAX_REGISTER_TYPES,
};

use crate::regalloc::range_set::RangeSet;

const NO_RANGE: u32 = u32::MAX;

/// Metadata for a register assignment over a contiguous span of RTL
/// instructions.
#[derive(Clone, Debug)]
struct LiveRange {
    rtl: RtlRegister,
    hw: HwRegister,
    /// Index of the instruction whose allocation snapshot must be captured
    /// when this range starts.
    state_at: Option<usize>,
    from: u32,
    to: u32,
    /// When two ranges are merged the earlier range becomes the parent of
    /// the later one and assignment is done only on roots. Children inherit
    /// the root's register after allocation.
    parent: Option<u32>,
}

/// The linear-scan allocator. One instance can be reused across
/// compilations; state is reset by each [`LinearAllocator::allocate`] call.
pub struct LinearAllocator {
    /// Registers available for allocation per class. Register indices are
    /// not shared across classes.
    hw_registers: [RegisterSet; MAX_REGISTER_TYPES],
    /// Registers handed out at least once, including the caller's reserved
    /// set. Drives prologue save masks and spill sizing.
    hw_used: [RegisterSet; MAX_REGISTER_TYPES],
    /// Spans where specific hardware registers are already claimed, per
    /// class, keyed by register number.
    hw_ranges: [RangeSet; MAX_REGISTER_TYPES],
    target: RtlProgram,
    /// Live ranges ordered by start instruction.
    live_ranges: Vec<LiveRange>,
    /// SSA index to `live_ranges` index.
    ranges_reverse: Vec<u32>,
}

impl Default for LinearAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearAllocator {
    /// Create an allocator with empty scalar/vector pools and the default
    /// spill area of 64 slots.
    pub fn new() -> Self {
        Self {
            hw_registers: [
                RegisterSet::new(HwRegisterType::Spill, 64),
                RegisterSet::new(HwRegisterType::Scalar, 0),
                RegisterSet::new(HwRegisterType::Vector, 0),
            ],
            hw_used: [
                RegisterSet::new(HwRegisterType::Spill, 0),
                RegisterSet::new(HwRegisterType::Scalar, 0),
                RegisterSet::new(HwRegisterType::Vector, 0),
            ],
            hw_ranges: Default::default(),
            target: RtlProgram::new(),
            live_ranges: Vec::new(),
            ranges_reverse: Vec::new(),
        }
    }

    /// Define the usable pool for one register class. Registers the
    /// back-end reserves for itself must be marked allocated in `available`
    /// before this call. The spill pool cannot be redefined.
    pub fn define_register_type(&mut self, available: RegisterSet) {
        assert!(available.ty() != HwRegisterType::Spill);
        self.hw_registers[available.ty() as usize] = available;
    }

    /// Run the allocation pipeline over `input`, returning the same
    /// program with every operand's hardware field filled in and the
    /// per-class usage sets recorded.
    pub fn allocate(&mut self, input: RtlProgram) -> RtlProgram {
        self.target = input;
        assert_eq!(self.target.block_count(), 1, "multi-block RTL not supported");

        self.prepare();
        self.calculate_live_ranges();
        self.join_live_ranges();
        self.assign_registers();
        self.encode_rtl();
        self.prune_rtl();

        for set in self.hw_used {
            self.target.set_register_usage(set);
        }

        core::mem::take(&mut self.target)
    }

    /// Lift fixed register constraints onto adjacent `Move` instructions:
    /// pinned sources get a move in front, pinned results a move behind,
    /// with the SSA name on the pinned side renamed. Afterwards every pin
    /// covers a minimal range around its instruction and cannot conflict
    /// with arbitrary algebraic operations.
    fn prepare(&mut self) {
        let old = self.target.block_mut(0).replace_instructions(Vec::new());
        let mut result: Vec<RtlInstruction> = Vec::with_capacity(old.len());

        for mut entry in old {
            assert_eq!(entry.op & RtlOpcode::FLAG, 0, "allocator opcode in input");

            for i in 0..entry.source_count() {
                let source = *entry.source(i);
                if !source.rtl.valid() {
                    continue;
                }
                assert!(source.rtl.index() < self.target.ssa_count());
                if !source.hw.assigned() {
                    continue;
                }

                let renamed = self.target.ssa_allocate(source.rtl.size());
                result.push(RtlInstruction::new(
                    RtlOpcode::Move as u16,
                    0,
                    &[RegisterAssignment {
                        rtl: renamed,
                        hw: source.hw,
                    }],
                    &[RegisterAssignment::any(source.rtl, source.hw.ty())],
                    RtlFlags::empty(),
                ));
                entry.source_mut(i).rtl = renamed;
            }

            let entry_index = result.len();
            result.push(entry);

            for i in 0..result[entry_index].result_count() {
                let res = *result[entry_index].result(i);
                if !res.rtl.valid() {
                    continue;
                }
                assert!(res.rtl.index() < self.target.ssa_count());
                if !res.hw.assigned() {
                    continue;
                }

                let renamed = self.target.ssa_allocate(res.rtl.size());
                result.push(RtlInstruction::new(
                    RtlOpcode::Move as u16,
                    0,
                    &[RegisterAssignment::any(res.rtl, res.hw.ty())],
                    &[RegisterAssignment {
                        rtl: renamed,
                        hw: res.hw,
                    }],
                    RtlFlags::empty(),
                ));
                result[entry_index].result_mut(i).rtl = renamed;
            }
        }

        self.target.block_mut(0).replace_instructions(result);
    }

    /// A single pass assigning each SSA name the interval from its defining
    /// instruction to its last use. Save-state instructions with no result
    /// get a placeholder range with a null SSA so a snapshot slot is still
    /// captured at the right point.
    fn calculate_live_ranges(&mut self) {
        self.live_ranges.clear();
        self.live_ranges.reserve(self.target.ssa_count() as usize);
        self.ranges_reverse.clear();
        self.ranges_reverse
            .resize(self.target.ssa_count() as usize, NO_RANGE);

        let block = self.target.block(0);
        for (i, entry) in block.instructions().iter().enumerate() {
            let i = i as u32;
            for j in 0..entry.source_count() {
                let source = entry.source(j);
                if !source.rtl.valid() {
                    // Allocation disabled for this operand.
                    continue;
                }

                let range_index = self.ranges_reverse[source.rtl.index() as usize];
                assert!(
                    (range_index as usize) < self.live_ranges.len(),
                    "use of undefined SSA register {}",
                    source.rtl
                );
                let range = &mut self.live_ranges[range_index as usize];
                assert!(!source.hw.assigned() || source.hw == range.hw);
                range.to = i;
            }

            let save_state = entry.flags.contains(RtlFlags::SAVE_STATE);
            assert!(!save_state || entry.result_count() <= 1);

            for j in 0..entry.result_count() {
                let result = entry.result(j);
                if !result.rtl.valid() {
                    continue;
                }

                // Results always open a new range.
                assert_eq!(
                    self.ranges_reverse[result.rtl.index() as usize],
                    NO_RANGE,
                    "SSA register {} defined twice",
                    result.rtl
                );
                self.ranges_reverse[result.rtl.index() as usize] =
                    self.live_ranges.len() as u32;
                self.live_ranges.push(LiveRange {
                    rtl: result.rtl,
                    hw: result.hw,
                    state_at: save_state.then_some(i as usize),
                    from: i,
                    to: i + 1,
                    parent: None,
                });
            }

            if entry.result_count() == 0 && save_state {
                // Instructions with no output are otherwise invisible to
                // the assignment phase; insert a placeholder range so state
                // is still captured at this point.
                self.live_ranges.push(LiveRange {
                    rtl: RtlRegister::none(),
                    hw: HwRegister::any(HwRegisterType::Spill),
                    state_at: Some(i as usize),
                    from: i,
                    to: i + 1,
                    parent: None,
                });
            }
        }
    }

    /// Coalesce ranges that can share a register: destructive results with
    /// their first source, and otherwise (covering the `prepare` moves) the
    /// result with any source, left to right.
    fn join_live_ranges(&mut self) {
        for ranges in &mut self.hw_ranges {
            ranges.clear();
        }

        // Initial contention map of all pre-pinned spans.
        for range in &self.live_ranges {
            if range.hw.assigned() {
                self.hw_ranges[range.hw.ty() as usize].add_range(
                    range.hw.index().into(),
                    range.from,
                    range.to,
                );
            }
        }

        let instruction_count = self.target.block(0).len();
        for i in 0..instruction_count {
            let (result_range, destructive, sources) = {
                let instruction = &self.target.block(0).instructions()[i];

                // Instructions with no outputs are not candidates for
                // joining.
                if instruction.result_count() == 0 || !instruction.result(0).rtl.valid() {
                    continue;
                }

                let sources: smallvec::SmallVec<[RtlRegister; 4]> = (0..instruction
                    .source_count())
                    .map(|j| instruction.source(j).rtl)
                    .collect();
                (
                    self.ranges_reverse[instruction.result(0).rtl.index() as usize],
                    instruction.flags.contains(RtlFlags::DESTRUCTIVE),
                    sources,
                )
            };

            if destructive {
                // Only try the first source; merging any other source would
                // need a re-ordering move and gain nothing.
                if sources.first().is_some_and(|rtl| rtl.valid()) {
                    let source_range = self.ranges_reverse[sources[0].index() as usize];
                    self.join_ranges(result_range, source_range);
                }
                continue;
            }

            for source in sources {
                if !source.valid() {
                    continue;
                }
                let source_range = self.ranges_reverse[source.index() as usize];
                if self.join_ranges(result_range, source_range) {
                    break;
                }
            }
        }
    }

    /// Attempt to join two live ranges, given by index into `live_ranges`.
    /// Returns true if the ranges were joined (or already share a root).
    fn join_ranges(&mut self, a_index: u32, b_index: u32) -> bool {
        let mut a_index = self.resolve_root(a_index);
        let mut b_index = self.resolve_root(b_index);

        if a_index > b_index {
            core::mem::swap(&mut a_index, &mut b_index);
        } else if a_index == b_index {
            return true;
        }

        let (head, tail) = self.live_ranges.split_at_mut(b_index as usize);
        let target = &mut head[a_index as usize];
        let later = &mut tail[0];
        debug_assert!(target.parent.is_none() && later.parent.is_none());
        debug_assert!(target.from <= later.from);

        if target.to > later.from || target.from == later.from {
            // Ranges overlap.
            return false;
        }
        if target.hw.ty() != later.hw.ty() {
            // Register classes differ.
            return false;
        }

        // Reconcile fixed hardware assignments between the two ranges.
        let fixed_hw = if target.hw.assigned() {
            if later.hw.assigned() && later.hw != target.hw {
                // Mismatched fixed register allocation.
                return false;
            }
            target.hw
        } else if later.hw.assigned() {
            later.hw
        } else {
            HwRegister::any(target.hw.ty())
        };

        // The join extends the span where the fixed register is claimed;
        // make sure the newly covered gap is not already contended.
        let mut new_fixed = None;
        if fixed_hw.assigned() {
            let (gap_start, gap_end) = if !later.hw.assigned() {
                // Fixed register comes from the earlier range.
                (target.to, later.to)
            } else if !target.hw.assigned() {
                // Fixed register comes from the later range.
                (target.from, later.from)
            } else {
                // Both pinned to the same register; only the hole between
                // the ranges is new.
                (target.to, later.from)
            };

            if gap_start != gap_end {
                let ranges = &self.hw_ranges[fixed_hw.ty() as usize];
                if ranges.is_contended_range(fixed_hw.index().into(), gap_start, gap_end) {
                    return false;
                }
                new_fixed = Some((gap_start, gap_end));
            }
        }

        trace!(
            "regalloc: join {} [{}..{}) into {} [{}..{})",
            later.rtl,
            later.from,
            later.to,
            target.rtl,
            target.from,
            target.to
        );

        target.hw = fixed_hw;
        target.to = later.to;
        later.parent = Some(a_index);

        if let Some((gap_start, gap_end)) = new_fixed {
            self.hw_ranges[fixed_hw.ty() as usize].add_range(
                fixed_hw.index().into(),
                gap_start,
                gap_end,
            );
        }

        true
    }

    fn resolve_root(&self, mut index: u32) -> u32 {
        while let Some(parent) = self.live_ranges[index as usize].parent {
            index = parent;
        }
        index
    }

    /// The linear scan proper: walk ranges in start order, retiring
    /// finished ranges, honoring pins, avoiding registers claimed by
    /// pinned ranges further ahead, and falling back to spill slots when
    /// the pool runs dry.
    fn assign_registers(&mut self) {
        let mut available = self.hw_registers;
        self.hw_used = self.hw_registers;

        // Ranges overlapping the current position, keyed by (end, range
        // index) so retirement pops in end order.
        let mut active: BTreeMap<(u32, u32), ()> = BTreeMap::new();

        for index in 0..self.live_ranges.len() {
            let (from, to) = (self.live_ranges[index].from, self.live_ranges[index].to);

            // Retire ranges that ended at or before this start; their
            // registers (and spill slots) return to the pool.
            while let Some((&(end, retired), _)) = active.first_key_value() {
                if end > from {
                    break;
                }
                let reg = self.live_ranges[retired as usize].hw;
                debug_assert!(reg.assigned());
                available[reg.ty() as usize].free(reg);
                active.remove(&(end, retired));
            }

            // Snapshot the allocator state before this range's own register
            // becomes live.
            if let Some(instruction) = self.live_ranges[index].state_at {
                self.target.block_mut(0).instructions_mut()[instruction].saved_state =
                    Some(Box::new(SavedState::new(available)));
            }

            // Children inherit the root's assignment.
            if self.live_ranges[index].parent.is_some() {
                continue;
            }

            // Placeholder ranges only exist to capture state.
            if !self.live_ranges[index].rtl.valid() {
                continue;
            }

            let pinned = self.live_ranges[index].hw;
            assert!(pinned.ty() != HwRegisterType::Spill);
            active.insert((to, index as u32), ());

            // Pre-pinned ranges keep their register; just mark it taken.
            if pinned.assigned() {
                assert!(
                    available[pinned.ty() as usize].is_free(pinned),
                    "pinned register {pinned} already claimed"
                );
                available[pinned.ty() as usize].mark_allocated(pinned);
                self.hw_used[pinned.ty() as usize].mark_allocated_unchecked(pinned);
                continue;
            }

            // Pick any free register that is not pinned by an overlapping
            // range further ahead.
            let ty = pinned.ty();
            let mut candidates = available[ty as usize];
            candidates.mark_allocated_set(&self.fixed_in_range(ty, index + 1, to));
            if candidates.has_free() {
                let reg = candidates.allocate();
                available[ty as usize].mark_allocated(reg);
                self.hw_used[ty as usize].mark_allocated_unchecked(reg);
                self.live_ranges[index].hw = reg;
                trace!("regalloc: {} [{}..{}) -> {}", self.live_ranges[index].rtl, from, to, reg);
                continue;
            }

            // No register left; take a spill slot and treat it like a
            // (slow) register. The emitters insert the actual spill moves.
            let spill = HwRegisterType::Spill as usize;
            assert!(available[spill].has_free(), "spill area exhausted");
            let reg = available[spill].allocate();
            self.hw_used[spill].mark_allocated_unchecked(reg);
            self.live_ranges[index].hw = reg;
            trace!("regalloc: {} [{}..{}) spilled -> {}", self.live_ranges[index].rtl, from, to, reg);
        }
    }

    /// Collect the registers of class `ty` pinned by ranges that start
    /// before `until_instruction`, scanning forward from `start_index`.
    /// Returned as a set with those registers marked allocated.
    fn fixed_in_range(&self, ty: HwRegisterType, start_index: usize, until_instruction: u32) -> RegisterSet {
        let mut result = RegisterSet::new(ty, self.hw_registers[ty as usize].capacity());
        for range in &self.live_ranges[start_index.min(self.live_ranges.len())..] {
            if range.from >= until_instruction {
                break;
            }
            if range.parent.is_none() && range.hw.assigned() && range.hw.ty() == ty {
                result.mark_allocated_unchecked(range.hw);
            }
        }
        result
    }

    /// Copy the resolved assignment of each root range into every operand
    /// that references the SSA name, walking parent chains for coalesced
    /// ranges.
    fn encode_rtl(&mut self) {
        let mut instructions = self.target.block_mut(0).replace_instructions(Vec::new());

        for instruction in &mut instructions {
            for i in 0..instruction.result_count() {
                let rtl = instruction.result(i).rtl;
                if !rtl.valid() {
                    continue;
                }
                let hw = self.resolved_hw(rtl);
                let result = instruction.result_mut(i);
                assert!(!result.hw.assigned() || result.hw == hw);
                result.hw = hw;
            }

            for i in 0..instruction.source_count() {
                let rtl = instruction.source(i).rtl;
                if !rtl.valid() {
                    continue;
                }
                let hw = self.resolved_hw(rtl);
                let source = instruction.source_mut(i);
                assert!(!source.hw.assigned() || source.hw == hw);
                source.hw = hw;
            }
        }

        self.target.block_mut(0).replace_instructions(instructions);
    }

    fn resolved_hw(&self, rtl: RtlRegister) -> HwRegister {
        let index = self.ranges_reverse[rtl.index() as usize];
        let root = self.resolve_root(index);
        let hw = self.live_ranges[root as usize].hw;
        debug_assert!(hw.assigned(), "{rtl} left unassigned");
        hw
    }

    /// Turn coalesced `Move` instructions into `None`; their source and
    /// destination resolved to the same hardware location.
    fn prune_rtl(&mut self) {
        for instruction in self.target.block_mut(0).instructions_mut() {
            if instruction.op == RtlOpcode::Move as u16
                && instruction.result(0).hw == instruction.source(0).hw
            {
                instruction.op = RtlOpcode::None as u16;
            }
        }
    }
}
