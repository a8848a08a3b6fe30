//! The compiled-routine wrapper.

use core::fmt;
use std::io::Write;
use std::process::Command;

/// Architecture tag carried by a routine, for disassembly.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RoutineArch {
    /// x86-64 machine code.
    X64,
    /// AArch64 machine code.
    Aarch64,
}

/// An opaque wrapper around the bytes of one emitted function.
///
/// The caller is responsible for copying the bytes into executable memory,
/// keeping them mapped while any thread may run them, and coordinating
/// invalidation. The contained code follows the documented guest ABI:
/// `extern "C" fn(guest, memory_base, register_base) -> u64`.
pub struct Routine {
    code: Vec<u8>,
    arch: RoutineArch,
}

impl Routine {
    pub(crate) fn new(code: Vec<u8>, arch: RoutineArch) -> Self {
        Self { code, arch }
    }

    /// The emitted machine code.
    pub fn data(&self) -> &[u8] {
        &self.code
    }

    /// Size of the emitted machine code in bytes.
    pub fn size(&self) -> usize {
        self.code.len()
    }

    /// The architecture the code was emitted for.
    pub fn arch(&self) -> RoutineArch {
        self.arch
    }

    /// Disassemble via objdump, on platforms that provide it. Returns a
    /// description of the failure otherwise; this is a debugging aid, not
    /// an API.
    pub fn disassemble(&self) -> String {
        let machine = match self.arch {
            RoutineArch::X64 => "i386:x86-64",
            RoutineArch::Aarch64 => "aarch64",
        };

        let path = std::env::temp_dir().join(format!("rtl-codegen-disas-{}", std::process::id()));
        let write = std::fs::File::create(&path)
            .and_then(|mut file| file.write_all(&self.code));
        if let Err(error) = write {
            return format!("<disassembly unavailable: {error}>");
        }

        let output = Command::new("objdump")
            .args(["-b", "binary", "-m", machine, "-D"])
            .arg(&path)
            .output();
        let _ = std::fs::remove_file(&path);

        match output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).into_owned(),
            Ok(out) => format!("<objdump failed: {}>", String::from_utf8_lossy(&out.stderr)),
            Err(error) => format!("<disassembly unavailable: {error}>"),
        }
    }
}

impl fmt::Debug for Routine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Routine({:?}, {} bytes)", self.arch, self.code.len())
    }
}
