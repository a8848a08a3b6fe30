//! AArch64 logical-immediate encodings.
//!
//! The bitwise instructions (`AND`, `ORR`, `EOR`, `ANDS`) accept only the
//! "logical immediate" family: rotations of replicated 2/4/8/16/32/64-bit
//! patterns of consecutive ones. The set is dense but irregular, so every
//! representable value (5334 of them) is generated once at startup into a
//! map from value to its `(N, immr, imms)` field triple.

use std::sync::LazyLock;

use crate::fx::FxHashMap;

/// The instruction fields encoding one logical immediate.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ImmLogic {
    /// The N bit (element size 64).
    pub n: u8,
    /// Rotation count.
    pub immr: u8,
    /// Element size class and run length.
    pub imms: u8,
}

impl ImmLogic {
    /// Compute the encoding of `value` as a 64-bit logical immediate, if
    /// one exists.
    pub fn maybe_from_u64(value: u64) -> Option<ImmLogic> {
        ENCODINGS.get(&value).copied()
    }

    /// Compute the encoding of `value` as a 32-bit logical immediate: the
    /// pattern must repeat in both halves of the 64-bit search key.
    pub fn maybe_from_u32(value: u32) -> Option<ImmLogic> {
        ImmLogic::maybe_from_u64(u64::from(value) | (u64::from(value) << 32))
    }

    /// The `N:immr:imms` bits as they appear at bit 10 of a logical
    /// immediate instruction.
    pub fn bits(self) -> u32 {
        (u32::from(self.n) << 12) | (u32::from(self.immr) << 6) | u32::from(self.imms)
    }
}

static ENCODINGS: LazyLock<FxHashMap<u64, ImmLogic>> = LazyLock::new(build_encodings);

fn build_encodings() -> FxHashMap<u64, ImmLogic> {
    let mut map = FxHashMap::default();

    for size_log in 1u32..=6 {
        let size = 1u64 << size_log;
        // The high imms bits select the element size; the low bits hold
        // the run length minus one. All-ones elements are not
        // representable, hence length < size - 1.
        let imms_high = (0b11_1100u8 << (size_log - 1)) & 0b11_1111;

        for length in 0..size - 1 {
            // A run of length+1 ones, replicated across the word.
            let mut pattern = (1u64 << (length + 1)) - 1;
            let mut element = size;
            while element < 64 {
                pattern |= pattern << element;
                element *= 2;
            }

            let n = u8::from(size == 64);
            for rotation in 0..size {
                let encoding = ImmLogic {
                    n,
                    immr: rotation as u8,
                    imms: imms_high | length as u8,
                };
                let previous = map.insert(pattern, encoding);
                debug_assert!(previous.is_none(), "duplicate logical immediate");
                pattern = pattern.rotate_right(1);
            }
        }
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_size() {
        assert_eq!(ENCODINGS.len(), 5334);
    }

    #[test]
    fn unrepresentable_values() {
        assert_eq!(ImmLogic::maybe_from_u64(0), None);
        assert_eq!(ImmLogic::maybe_from_u64(u64::MAX), None);
        assert_eq!(ImmLogic::maybe_from_u64(5), None);
        assert_eq!(ImmLogic::maybe_from_u64(11), None);
        assert_eq!(ImmLogic::maybe_from_u32(0), None);
        assert_eq!(ImmLogic::maybe_from_u32(u32::MAX), None);
    }

    #[test]
    fn known_encodings() {
        assert_eq!(
            ImmLogic::maybe_from_u64(1),
            Some(ImmLogic {
                n: 1,
                immr: 0,
                imms: 0,
            })
        );
        assert_eq!(
            ImmLogic::maybe_from_u64(2),
            Some(ImmLogic {
                n: 1,
                immr: 63,
                imms: 0,
            })
        );
        assert_eq!(
            ImmLogic::maybe_from_u64(248),
            Some(ImmLogic {
                n: 1,
                immr: 61,
                imms: 4,
            })
        );
        assert_eq!(ImmLogic::maybe_from_u64(249), None);
        // 0x5555...: alternating ones are 2-bit elements.
        assert_eq!(
            ImmLogic::maybe_from_u64(0x5555_5555_5555_5555),
            Some(ImmLogic {
                n: 0,
                immr: 0,
                imms: 0b11_1100,
            })
        );
        // Byte masks used by the narrowing casts.
        assert!(ImmLogic::maybe_from_u32(0xff).is_some());
        assert!(ImmLogic::maybe_from_u32(0xffff).is_some());
        assert!(ImmLogic::maybe_from_u64(0xffff_ffff).is_some());
    }
}
