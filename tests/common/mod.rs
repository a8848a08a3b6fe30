//! Shared scaffolding for the end-to-end compile tests: a guest with a
//! flat memory and a register file, plus an executable mapping for
//! emitted routines.

#![allow(dead_code)]

use rtl_codegen::isa::{Guest, GuestContext};
use rtl_codegen::Constant;

/// A guest with a flat byte-addressable memory and a file of 32 registers
/// stored as little-endian u32 values.
pub struct TestGuest {
    pub memory: Vec<u8>,
    pub registers: [u32; 32],
    pub loads: usize,
    pub stores: usize,
}

impl TestGuest {
    pub fn new(memory_size: usize) -> Self {
        Self {
            memory: vec![0; memory_size],
            registers: [0; 32],
            loads: 0,
            stores: 0,
        }
    }
}

impl Guest for TestGuest {
    fn guest_load(&mut self, address: u32, bytes: usize) -> Constant {
        self.loads += 1;
        let address = address as usize;
        let mut value = 0u64;
        for i in 0..bytes {
            value |= u64::from(self.memory[address + i]) << (8 * i);
        }
        Constant::from_u64(value)
    }

    fn guest_store(&mut self, address: u32, bytes: usize, value: Constant) {
        self.stores += 1;
        let address = address as usize;
        let bits = value.u64_value();
        for i in 0..bytes {
            self.memory[address + i] = (bits >> (8 * i)) as u8;
        }
    }
}

/// The register-address callback: registers are a flat array of 4-byte
/// slots.
pub fn register_address(index: u16) -> u32 {
    u32::from(index) * 4
}

#[cfg(unix)]
pub use exec::ExecBuffer;

#[cfg(unix)]
mod exec {
    use super::{GuestContext, TestGuest};

    /// An executable copy of an emitted routine.
    pub struct ExecBuffer {
        ptr: *mut core::ffi::c_void,
        len: usize,
    }

    impl ExecBuffer {
        pub fn new(code: &[u8]) -> Self {
            use rustix::mm::{mmap_anonymous, mprotect, MapFlags, MprotectFlags, ProtFlags};

            let page = 4096;
            let len = code.len().div_ceil(page) * page;
            unsafe {
                let ptr = mmap_anonymous(
                    core::ptr::null_mut(),
                    len,
                    ProtFlags::READ | ProtFlags::WRITE,
                    MapFlags::PRIVATE,
                )
                .expect("mmap failed");
                core::ptr::copy_nonoverlapping(code.as_ptr(), ptr as *mut u8, code.len());
                mprotect(ptr, len, MprotectFlags::READ | MprotectFlags::EXEC)
                    .expect("mprotect failed");
                Self { ptr, len }
            }
        }

        /// Run the routine under the guest ABI and return its exit code.
        pub fn run(&self, guest: &mut TestGuest) -> u64 {
            let memory_base = guest.memory.as_mut_ptr();
            let register_base = guest.registers.as_mut_ptr() as *mut u8;
            let mut context = GuestContext::new(guest);
            let entry: extern "C" fn(*mut u8, *mut u8, *mut u8) -> u64 =
                unsafe { core::mem::transmute(self.ptr) };
            entry(context.as_ptr(), memory_base, register_base)
        }
    }

    impl Drop for ExecBuffer {
        fn drop(&mut self) {
            unsafe {
                let _ = rustix::mm::munmap(self.ptr, self.len);
            }
        }
    }
}
