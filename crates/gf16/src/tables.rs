//! Log/antilog tables for GF(2^16) with polynomial 0x1100B.
//!
//! The tables are built once on first use and shared process-wide; every
//! reader treats them as immutable. `log[0]` holds the sentinel 65535
//! (zero has no logarithm), and `antilog` carries one wrap-around entry
//! so that a folded index of exactly 65535 resolves to `antilog[0]`.

use std::sync::OnceLock;

/// The PAR2 field polynomial: x^16 + x^12 + x^3 + x + 1.
pub const GF16_POLYNOMIAL: u32 = 0x1100B;

/// Sentinel stored in `log[0]`; zero is not a power of the generator.
pub const LOG_ZERO: u16 = 65535;

/// Multiplicative order of the field (2^16 - 1).
pub const FIELD_ORDER: u32 = 65535;

/// The immutable log/antilog table pair.
pub struct GfTables {
    log: Box<[u16]>,
    antilog: Box<[u16]>,
}

impl GfTables {
    fn build() -> Self {
        let mut log = vec![0u16; 65536].into_boxed_slice();
        let mut antilog = vec![0u16; 65536].into_boxed_slice();

        log[0] = LOG_ZERO;
        let mut x: u32 = 1;
        for i in 0..FIELD_ORDER {
            antilog[i as usize] = x as u16;
            log[x as usize] = i as u16;
            x <<= 1;
            if x & 0x10000 != 0 {
                x ^= GF16_POLYNOMIAL;
            }
        }
        // index 65535 ≡ 0 (mod 65535): one wrap entry saves a reduction
        // in the coefficient fold
        antilog[FIELD_ORDER as usize] = 1;

        Self { log, antilog }
    }

    /// Logarithm of `x` to the generator base; `LOG_ZERO` for `x == 0`.
    #[inline]
    #[must_use]
    pub fn log(&self, x: u16) -> u16 {
        self.log[usize::from(x)]
    }

    /// The generator raised to `i`, for `i <= 65535` (65535 wraps to 1).
    #[inline]
    #[must_use]
    pub fn antilog(&self, i: u32) -> u16 {
        debug_assert!(i <= FIELD_ORDER);
        self.antilog[i as usize]
    }
}

/// Returns the process-wide tables, building them on first use.
#[must_use]
pub fn tables() -> &'static GfTables {
    static TABLES: OnceLock<GfTables> = OnceLock::new();
    TABLES.get_or_init(GfTables::build)
}

/// Multiplies two field elements.
#[inline]
#[must_use]
pub fn mul(a: u16, b: u16) -> u16 {
    if a == 0 || b == 0 {
        return 0;
    }
    let t = tables();
    let sum = u32::from(t.log(a)) + u32::from(t.log(b));
    t.antilog(if sum >= FIELD_ORDER { sum - FIELD_ORDER } else { sum })
}

/// Doubles a field element: `x * 2` without a table lookup.
///
/// Used by the running-checksum fold, where the doubling happens once
/// per stride block on every checksum lane.
#[inline]
#[must_use]
pub fn mul2(x: u16) -> u16 {
    (x << 1) ^ (if x & 0x8000 != 0 { GF16_POLYNOMIAL as u16 } else { 0 })
}

/// Multiplicative inverse of a non-zero element.
#[inline]
#[must_use]
pub fn inv(x: u16) -> u16 {
    debug_assert_ne!(x, 0, "zero has no inverse");
    let t = tables();
    t.antilog(FIELD_ORDER - u32::from(t.log(x)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn generator_identities() {
        let t = tables();
        assert_eq!(t.antilog(0), 1);
        assert_eq!(t.log(1), 0);
        assert_eq!(t.log(0), LOG_ZERO);
        assert_eq!(t.antilog(FIELD_ORDER), 1);
    }

    #[test]
    fn log_antilog_roundtrip() {
        let t = tables();
        for x in 1u16..=u16::MAX {
            assert_eq!(t.antilog(u32::from(t.log(x))), x);
        }
    }

    #[test]
    fn mul_matches_carryless_reference() {
        // Bitwise polynomial multiplication with reduction by 0x1100B.
        fn slow_mul(a: u16, b: u16) -> u16 {
            let mut acc: u32 = 0;
            let mut a = u32::from(a);
            let mut b = u32::from(b);
            while b != 0 {
                if b & 1 != 0 {
                    acc ^= a;
                }
                a <<= 1;
                if a & 0x10000 != 0 {
                    a ^= GF16_POLYNOMIAL;
                }
                b >>= 1;
            }
            acc as u16
        }

        for &(a, b) in &[(1, 1), (2, 3), (0x1234, 0xFEDC), (0x8000, 2), (65535, 65535)] {
            assert_eq!(mul(a, b), slow_mul(a, b), "mul({a:#x}, {b:#x})");
        }
    }

    #[test]
    fn mul2_is_mul_by_two() {
        for x in [0u16, 1, 2, 0x7FFF, 0x8000, 0xFFFF, 0x1234] {
            assert_eq!(mul2(x), mul(x, 2));
        }
    }

    #[test]
    fn inv_is_multiplicative_inverse() {
        for x in [1u16, 2, 3, 0x1234, 0x8000, 0xFFFF] {
            assert_eq!(mul(x, inv(x)), 1);
        }
    }

    proptest! {
        #[test]
        fn mul_commutes(a: u16, b: u16) {
            prop_assert_eq!(mul(a, b), mul(b, a));
        }

        #[test]
        fn mul_associates(a: u16, b: u16, c: u16) {
            prop_assert_eq!(mul(mul(a, b), c), mul(a, mul(b, c)));
        }

        #[test]
        fn mul_distributes_over_xor(a: u16, b: u16, c: u16) {
            prop_assert_eq!(mul(a, b ^ c), mul(a, b) ^ mul(a, c));
        }

        #[test]
        fn one_is_identity(a: u16) {
            prop_assert_eq!(mul(a, 1), a);
        }
    }
}
