//! Set of allocatable registers of one class, as a bit vector.
//!
//! The allocator tracks which registers are available with one set per
//! register class. A set is created with a capacity and everything free;
//! the back-end pre-allocates its reserved registers before handing the
//! set over, and the allocator takes and frees registers as live ranges
//! begin and end. Spill slots are modelled as a register class like any
//! other, so "allocate a spill slot" is the same operation as "allocate a
//! register".

use core::fmt;

use crate::rtl::register::{HwRegister, HwRegisterType};

/// Set of registers of a single class available for allocation.
#[derive(Copy, Clone, Debug)]
pub struct RegisterSet {
    ty: HwRegisterType,
    capacity: u16,
    /// Bit `i` set means register `i` is free.
    avail: u64,
}

// Bit mask covering `capacity` registers.
fn capacity_mask(capacity: u16) -> u64 {
    debug_assert!(capacity <= 64);
    if capacity == 64 {
        u64::MAX
    } else {
        (1u64 << capacity) - 1
    }
}

impl RegisterSet {
    /// Create a set of `capacity` registers, all available.
    pub fn new(ty: HwRegisterType, capacity: u16) -> Self {
        Self {
            ty,
            capacity,
            avail: capacity_mask(capacity),
        }
    }

    /// The register class this set describes.
    pub fn ty(&self) -> HwRegisterType {
        self.ty
    }

    /// Total number of registers in the class, free or not.
    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    /// Returns `true` if the specified register is available.
    pub fn is_free(&self, reg: HwRegister) -> bool {
        debug_assert_eq!(reg.ty(), self.ty);
        if reg.index() >= self.capacity {
            // Registers outside the capacity (e.g. pure-constraint pins on
            // non-allocatable registers) are never part of the pool.
            return false;
        }
        self.avail & (1u64 << reg.index()) != 0
    }

    /// Remove `reg` from the set of available registers.
    ///
    /// It is an error to take a register that is not free.
    pub fn mark_allocated(&mut self, reg: HwRegister) {
        debug_assert!(self.is_free(reg), "{reg} not available in {self}");
        self.avail &= !(1u64 << reg.index());
    }

    /// Remove `reg` without requiring it to be free. Used for the usage
    /// bookkeeping sets, where marking the same register twice is normal.
    pub fn mark_allocated_unchecked(&mut self, reg: HwRegister) {
        debug_assert_eq!(reg.ty(), self.ty);
        if reg.index() < self.capacity {
            self.avail &= !(1u64 << reg.index());
        }
    }

    /// Remove every register that is allocated in `other` from this set.
    pub fn mark_allocated_set(&mut self, other: &RegisterSet) {
        debug_assert_eq!(other.ty, self.ty);
        let allocated = capacity_mask(other.capacity) & !other.avail;
        self.avail &= !allocated;
    }

    /// Return `reg` to the set of available registers.
    pub fn free(&mut self, reg: HwRegister) {
        debug_assert_eq!(reg.ty(), self.ty);
        debug_assert!(reg.index() < self.capacity);
        debug_assert!(!self.is_free(reg), "{reg} is already free in {self}");
        self.avail |= 1u64 << reg.index();
    }

    /// True if at least one register is still available.
    pub fn has_free(&self) -> bool {
        self.avail != 0
    }

    /// Take the lowest-numbered available register.
    pub fn allocate(&mut self) -> HwRegister {
        assert!(self.has_free(), "register set {self} exhausted");
        let index = self.avail.trailing_zeros() as u16;
        self.avail &= self.avail - 1;
        HwRegister::new(self.ty, index)
    }

    /// Number of registers currently marked allocated.
    pub fn allocated_count(&self) -> u32 {
        (capacity_mask(self.capacity) & !self.avail).count_ones()
    }

    /// Bit mask of the allocated registers, bit `i` for register `i`.
    pub fn allocated_mask(&self) -> u64 {
        capacity_mask(self.capacity) & !self.avail
    }
}

impl fmt::Display for RegisterSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{:?}:", self.ty)?;
        for i in 0..self.capacity {
            if self.avail & (1u64 << i) != 0 {
                write!(f, " {i}")?;
            } else {
                write!(f, " -")?;
            }
        }
        write!(f, " ]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: HwRegisterType = HwRegisterType::Scalar;

    #[test]
    fn take_and_free() {
        let mut regs = RegisterSet::new(T, 4);
        assert!(regs.has_free());
        assert!(regs.is_free(HwRegister::new(T, 2)));

        regs.mark_allocated(HwRegister::new(T, 2));
        assert!(!regs.is_free(HwRegister::new(T, 2)));
        assert_eq!(regs.allocated_count(), 1);

        // allocate() picks the lowest free index and skips taken ones.
        assert_eq!(regs.allocate().index(), 0);
        assert_eq!(regs.allocate().index(), 1);
        assert_eq!(regs.allocate().index(), 3);
        assert!(!regs.has_free());

        regs.free(HwRegister::new(T, 1));
        assert_eq!(regs.allocate().index(), 1);
    }

    #[test]
    fn allocated_set_union() {
        let mut pool = RegisterSet::new(T, 8);
        let mut taken = RegisterSet::new(T, 8);
        taken.mark_allocated(HwRegister::new(T, 1));
        taken.mark_allocated(HwRegister::new(T, 5));

        pool.mark_allocated_set(&taken);
        assert!(!pool.is_free(HwRegister::new(T, 1)));
        assert!(!pool.is_free(HwRegister::new(T, 5)));
        assert!(pool.is_free(HwRegister::new(T, 0)));
    }

    #[test]
    fn out_of_capacity_pins_are_not_free() {
        let regs = RegisterSet::new(T, 3);
        assert!(!regs.is_free(HwRegister::new(T, 99)));
    }

    #[test]
    fn full_width_set() {
        let mut regs = RegisterSet::new(HwRegisterType::Spill, 64);
        for i in 0..64 {
            assert_eq!(regs.allocate().index(), i);
        }
        assert!(!regs.has_free());
        assert_eq!(regs.allocated_count(), 64);
    }
}
