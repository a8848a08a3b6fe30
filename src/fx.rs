//! HashMap alias using the FxHash algorithm. The compiler hashes small
//! integers (immediates, SSA indices) where a strong hash buys nothing.

pub use rustc_hash::FxHashMap;
