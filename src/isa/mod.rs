//! Target ISA back-ends and the embedder-facing compile driver surface.
//!
//! A back-end lowers a finished guest IR program into RTL, runs the linear
//! register allocator, and assembles native machine code. The emitted
//! routine follows a fixed guest ABI on every architecture:
//!
//! ```text
//! extern "C" fn(guest: *mut u8, memory_base: *mut u8, register_base: *mut u8) -> u64
//! ```
//!
//! On entry the guest handle is in the first argument register (rdi / x0),
//! the flat guest memory base in the second (rsi / x1) and the guest
//! register file base in the third (rdx / x2). Callee-saved registers are
//! preserved; the return value is the exit code set by the last executed
//! `Exit`.

pub mod aarch64;
pub mod x64;

use target_lexicon::{Architecture, Triple};

use crate::constant::Constant;
use crate::ir::IrProgram;
use crate::result::{CodegenError, CodegenResult};
use crate::routine::Routine;

/// Maps a guest register index to its byte displacement from the register
/// file base pointer. Provided by the embedder; consulted at compile time
/// for every `ReadGuest` / `WriteGuest`.
pub type RegisterAddressFn = fn(u16) -> u32;

/// Host helper called by emitted code to load from guest memory:
/// `(guest, address, bytes) -> value`.
pub type LoadHelper = unsafe extern "C" fn(*mut u8, u32, usize) -> Constant;

/// Host helper called by emitted code to store to guest memory:
/// `(guest, address, bytes, value)`.
pub type StoreHelper = unsafe extern "C" fn(*mut u8, u32, usize, Constant);

/// The guest side of the memory helpers.
///
/// Loads and stores that the back-end does not inline go through these
/// callbacks, so MMIO, texture invalidation and friends keep working under
/// the JIT.
pub trait Guest {
    /// Read `bytes` bytes from the guest address space.
    fn guest_load(&mut self, address: u32, bytes: usize) -> Constant;
    /// Write `bytes` bytes to the guest address space.
    fn guest_store(&mut self, address: u32, bytes: usize, value: Constant);
}

/// A thin, C-compatible handle around a `Guest`, suitable for passing as
/// the first argument of an emitted routine.
#[repr(C)]
pub struct GuestContext<'a> {
    guest: &'a mut dyn Guest,
}

impl<'a> GuestContext<'a> {
    /// Wrap a guest implementation.
    pub fn new(guest: &'a mut dyn Guest) -> Self {
        Self { guest }
    }

    /// The pointer to hand to an emitted routine.
    pub fn as_ptr(&mut self) -> *mut u8 {
        self as *mut Self as *mut u8
    }
}

/// Default load helper: dispatches through a [`GuestContext`].
///
/// # Safety
///
/// `guest` must point at a live `GuestContext` (the pointer an emitted
/// routine received as its first argument).
pub unsafe extern "C" fn guest_load(guest: *mut u8, address: u32, bytes: usize) -> Constant {
    let context = &mut *(guest as *mut GuestContext);
    context.guest.guest_load(address, bytes)
}

/// Default store helper: dispatches through a [`GuestContext`].
///
/// # Safety
///
/// `guest` must point at a live `GuestContext` (the pointer an emitted
/// routine received as its first argument).
pub unsafe extern "C" fn guest_store(guest: *mut u8, address: u32, bytes: usize, value: Constant) {
    let context = &mut *(guest as *mut GuestContext);
    context.guest.guest_store(address, bytes, value);
}

/// A compiler back-end for one target architecture.
pub trait TargetIsa {
    /// Short architecture name ("x64", "aarch64").
    fn name(&self) -> &'static str;

    /// Install the guest-register address callback. Must be called before
    /// the first `compile`.
    fn set_register_address(&mut self, callback: RegisterAddressFn);

    /// Compile a guest IR program into an executable routine.
    fn compile(&mut self, program: IrProgram) -> CodegenResult<Routine>;
}

/// Look up a back-end for the given target triple.
pub fn lookup(triple: Triple) -> CodegenResult<Box<dyn TargetIsa>> {
    match triple.architecture {
        Architecture::X86_64 => Ok(Box::new(x64::Compiler::new())),
        Architecture::Aarch64(_) => Ok(Box::new(aarch64::Compiler::new())),
        _ => Err(CodegenError::UnsupportedTarget(triple.to_string())),
    }
}

/// Look up the back-end for the machine this code runs on.
pub fn host() -> CodegenResult<Box<dyn TargetIsa>> {
    lookup(Triple::host())
}
