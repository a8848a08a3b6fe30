//! RTL code generation library.
//!
//! This crate is the JIT back-end pipeline shared by the per-guest
//! front-ends of the emulator: a target-independent RTL (register transfer
//! list) program form in SSA style, a linear-scan register allocator that
//! understands pre-pinned hardware registers, and back-ends that lower a
//! machine-independent guest IR into RTL and then into native machine code
//! for x86-64 and AArch64.
//!
//! A front-end hands a finished [`ir::IrProgram`] to a back-end obtained
//! from [`isa::lookup`]; `compile` returns an opaque [`Routine`] wrapping
//! the emitted bytes, invokable as
//! `extern "C" fn(*mut u8, *mut u8, *mut u8) -> u64`
//! (guest handle, guest memory base, guest register file base).

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub mod binemit;
pub mod ir;
pub mod isa;
pub mod regalloc;
pub mod rtl;

mod constant;
mod fx;
mod result;
mod routine;

pub use crate::constant::Constant;
pub use crate::result::{CodegenError, CodegenResult};
pub use crate::routine::{Routine, RoutineArch};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
