//! Two-limb wide unsigned integer for the liquidation accumulator.
//!
//! ## Purpose
//!
//! The tick ledger maintains a running sum of `exposure × unadjusted price`
//! products. Both factors are `u128` fixed-point values, so a single product
//! can occupy up to 256 bits and the running sum must never silently wrap.
//! `HugeUint` is a 256-bit unsigned integer stored as two `u128` limbs with
//! explicit carry/borrow propagation.
//!
//! ## Operations
//!
//! - `checked_add` / `checked_sub`: limb-wise with carry/borrow
//! - `mul(a, b)`: full-width 128×128→256 product (never overflows)
//! - `checked_mul_scalar`: 256×128→256 with overflow detection
//! - `div_scalar`: exact floor division by a `u128` (restoring division)
//! - `checked_div`: 256÷256 floor division
//!
//! ## Rounding
//!
//! All division floors. Sequential scalar division is exact:
//! `(x / a) / b == x / (a * b)` for positive integers, which lets callers
//! divide by oversized products one scalar at a time.

use std::fmt;

/// Bit width of one limb.
const LIMB_BITS: usize = 128;

/// A 256-bit unsigned integer as two `u128` limbs.
///
/// Field order matters: `hi` first so the derived ordering is numeric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HugeUint {
    /// Most-significant 128 bits
    pub hi: u128,

    /// Least-significant 128 bits
    pub lo: u128,
}

impl HugeUint {
    /// The additive identity
    pub const ZERO: HugeUint = HugeUint { hi: 0, lo: 0 };

    /// Wrap a `u128` into the low limb
    #[inline]
    pub const fn from_u128(lo: u128) -> Self {
        Self { hi: 0, lo }
    }

    /// Most-significant limb
    #[inline]
    pub const fn hi(&self) -> u128 {
        self.hi
    }

    /// Least-significant limb
    #[inline]
    pub const fn lo(&self) -> u128 {
        self.lo
    }

    /// Check for zero without comparing both limbs at call sites
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.hi == 0 && self.lo == 0
    }

    /// Narrow back to `u128`
    ///
    /// Returns `None` if the value does not fit in the low limb.
    #[inline]
    pub const fn to_u128(self) -> Option<u128> {
        if self.hi == 0 {
            Some(self.lo)
        } else {
            None
        }
    }

    /// Add with carry propagation between limbs
    ///
    /// Returns `None` on 256-bit overflow.
    pub fn checked_add(self, rhs: HugeUint) -> Option<HugeUint> {
        let (lo, carry) = self.lo.overflowing_add(rhs.lo);
        let hi = self.hi.checked_add(rhs.hi)?.checked_add(carry as u128)?;
        Some(HugeUint { hi, lo })
    }

    /// Subtract with borrow propagation between limbs
    ///
    /// Returns `None` if `rhs > self`.
    pub fn checked_sub(self, rhs: HugeUint) -> Option<HugeUint> {
        if rhs > self {
            return None;
        }
        Some(self.wrapping_sub(rhs))
    }

    /// Wrapping 256-bit subtraction (used internally by division)
    fn wrapping_sub(self, rhs: HugeUint) -> HugeUint {
        let (lo, borrow) = self.lo.overflowing_sub(rhs.lo);
        let hi = self.hi.wrapping_sub(rhs.hi).wrapping_sub(borrow as u128);
        HugeUint { hi, lo }
    }

    /// Full-width product of two `u128` values
    ///
    /// The result always fits: `(2^128 - 1)^2 < 2^256`.
    pub fn mul(a: u128, b: u128) -> HugeUint {
        const MASK: u128 = (1u128 << 64) - 1;

        let (a1, a0) = (a >> 64, a & MASK);
        let (b1, b0) = (b >> 64, b & MASK);

        // Four 64×64→128 partial products
        let ll = a0 * b0;
        let lh = a0 * b1;
        let hl = a1 * b0;
        let hh = a1 * b1;

        // Middle column may carry one bit past 128
        let (mid, mid_carry) = lh.overflowing_add(hl);

        let (lo, lo_carry) = ll.overflowing_add(mid << 64);
        let hi = hh + (mid >> 64) + ((mid_carry as u128) << 64) + lo_carry as u128;

        HugeUint { hi, lo }
    }

    /// Multiply by a `u128` scalar
    ///
    /// Returns `None` if the true product exceeds 256 bits.
    pub fn checked_mul_scalar(self, scalar: u128) -> Option<HugeUint> {
        let lo_prod = Self::mul(self.lo, scalar);
        let hi_prod = Self::mul(self.hi, scalar);

        // Anything the high limb pushes past bit 255 is an overflow
        if hi_prod.hi != 0 {
            return None;
        }

        let hi = lo_prod.hi.checked_add(hi_prod.lo)?;
        Some(HugeUint { hi, lo: lo_prod.lo })
    }

    /// Floor-divide by a `u128` scalar
    ///
    /// Returns `None` for a zero divisor. The quotient keeps full 256-bit
    /// width; the remainder always fits one limb because it is `< divisor`.
    pub fn div_scalar(self, divisor: u128) -> Option<HugeUint> {
        if divisor == 0 {
            return None;
        }
        if self.hi == 0 {
            return Some(HugeUint::from_u128(self.lo / divisor));
        }

        // Restoring division, one bit per iteration. The remainder is kept
        // in a u128; the bit shifted out of it is folded into the compare.
        let mut quotient = HugeUint::ZERO;
        let mut rem: u128 = 0;
        for i in (0..2 * LIMB_BITS).rev() {
            let carry = rem >> 127;
            rem = (rem << 1) | self.bit(i);
            if carry == 1 || rem >= divisor {
                rem = rem.wrapping_sub(divisor);
                quotient.set_bit(i);
            }
        }
        Some(quotient)
    }

    /// Floor-divide by another `HugeUint`
    ///
    /// Returns `None` for a zero divisor.
    pub fn checked_div(self, divisor: HugeUint) -> Option<HugeUint> {
        if divisor.is_zero() {
            return None;
        }
        if divisor.hi == 0 {
            return self.div_scalar(divisor.lo);
        }

        // Same restoring scheme with a 256-bit remainder. The bit shifted
        // out of the remainder is folded into the compare, mirroring the
        // scalar path one level up.
        let mut quotient = HugeUint::ZERO;
        let mut rem = HugeUint::ZERO;
        for i in (0..2 * LIMB_BITS).rev() {
            let carry = rem.hi >> 127;
            rem = HugeUint {
                hi: (rem.hi << 1) | (rem.lo >> 127),
                lo: (rem.lo << 1) | self.bit(i),
            };
            if carry == 1 || rem >= divisor {
                rem = rem.wrapping_sub(divisor);
                quotient.set_bit(i);
            }
        }
        Some(quotient)
    }

    /// Extract bit `i` (0 = least significant)
    #[inline]
    fn bit(&self, i: usize) -> u128 {
        if i >= LIMB_BITS {
            (self.hi >> (i - LIMB_BITS)) & 1
        } else {
            (self.lo >> i) & 1
        }
    }

    /// Set bit `i` (0 = least significant)
    #[inline]
    fn set_bit(&mut self, i: usize) {
        if i >= LIMB_BITS {
            self.hi |= 1u128 << (i - LIMB_BITS);
        } else {
            self.lo |= 1u128 << i;
        }
    }
}

impl fmt::Display for HugeUint {
    /// Hex rendering, high limb first, leading zeros trimmed
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hi == 0 {
            write!(f, "0x{:x}", self.lo)
        } else {
            write!(f, "0x{:x}{:032x}", self.hi, self.lo)
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_from_u128_roundtrip() {
        let x = HugeUint::from_u128(12345);
        assert_eq!(x.hi(), 0);
        assert_eq!(x.lo(), 12345);
        assert_eq!(x.to_u128(), Some(12345));

        let wide = HugeUint { hi: 1, lo: 0 };
        assert_eq!(wide.to_u128(), None);
    }

    #[test]
    fn test_add_with_carry() {
        let a = HugeUint::from_u128(u128::MAX);
        let b = HugeUint::from_u128(1);

        let sum = a.checked_add(b).unwrap();
        assert_eq!(sum, HugeUint { hi: 1, lo: 0 });
    }

    #[test]
    fn test_add_overflow() {
        let max = HugeUint {
            hi: u128::MAX,
            lo: u128::MAX,
        };
        assert_eq!(max.checked_add(HugeUint::from_u128(1)), None);
    }

    #[test]
    fn test_sub_with_borrow() {
        let a = HugeUint { hi: 1, lo: 0 };
        let b = HugeUint::from_u128(1);

        let diff = a.checked_sub(b).unwrap();
        assert_eq!(diff, HugeUint::from_u128(u128::MAX));
    }

    #[test]
    fn test_sub_underflow() {
        let a = HugeUint::from_u128(5);
        let b = HugeUint::from_u128(6);
        assert_eq!(a.checked_sub(b), None);
    }

    #[test]
    fn test_mul_small() {
        let p = HugeUint::mul(6, 7);
        assert_eq!(p, HugeUint::from_u128(42));
    }

    #[test]
    fn test_mul_max() {
        // (2^128 - 1)^2 = 2^256 - 2^129 + 1
        let p = HugeUint::mul(u128::MAX, u128::MAX);
        assert_eq!(p.hi, u128::MAX - 1);
        assert_eq!(p.lo, 1);
    }

    #[test]
    fn test_mul_limb_boundary() {
        // 2^64 * 2^64 = 2^128 -> exactly one unit in the high limb
        let p = HugeUint::mul(1u128 << 64, 1u128 << 64);
        assert_eq!(p, HugeUint { hi: 1, lo: 0 });
    }

    #[test]
    fn test_mul_scalar() {
        let x = HugeUint::mul(u128::MAX, 2);
        let doubled = x.checked_mul_scalar(2).unwrap();
        assert_eq!(doubled, HugeUint::mul(u128::MAX, 4));
    }

    #[test]
    fn test_mul_scalar_overflow() {
        let max = HugeUint {
            hi: u128::MAX,
            lo: u128::MAX,
        };
        assert_eq!(max.checked_mul_scalar(2), None);
        assert_eq!(max.checked_mul_scalar(1), Some(max));
    }

    #[test]
    fn test_div_scalar_narrow() {
        let x = HugeUint::from_u128(100);
        assert_eq!(x.div_scalar(7), Some(HugeUint::from_u128(14)));
        assert_eq!(x.div_scalar(0), None);
    }

    #[test]
    fn test_div_scalar_wide() {
        // (a * b) / b == a for any non-zero b
        let a = 0x1234_5678_9abc_def0_1122_3344_5566_7788u128;
        let b = 0xdead_beef_0000_0001u128;
        let prod = HugeUint::mul(a, b);
        assert_eq!(prod.div_scalar(b).unwrap().to_u128(), Some(a));
    }

    #[test]
    fn test_div_scalar_max_divisor() {
        let x = HugeUint {
            hi: u128::MAX,
            lo: u128::MAX,
        };
        // (2^256 - 1) / (2^128 - 1) = 2^128 + 1
        let q = x.div_scalar(u128::MAX).unwrap();
        assert_eq!(q, HugeUint { hi: 1, lo: 1 });
    }

    #[test]
    fn test_checked_div_wide_divisor() {
        let a = 0xffff_ffff_ffff_ffff_ffff_ffff_ffff_fff1u128;
        let b = 0x1_0000_0000_0000_0001u128;
        let prod = HugeUint::mul(a, b);
        let q = prod.checked_div(HugeUint::from_u128(b)).unwrap();
        assert_eq!(q.to_u128(), Some(a));

        // divisor with a populated high limb
        let big = HugeUint { hi: 2, lo: 0 };
        let num = HugeUint { hi: 7, lo: 0 };
        assert_eq!(num.checked_div(big).unwrap().to_u128(), Some(3));
    }

    #[test]
    fn test_checked_div_zero() {
        let x = HugeUint::from_u128(1);
        assert_eq!(x.checked_div(HugeUint::ZERO), None);
    }

    #[test]
    fn test_sequential_division_composes() {
        // (x / a) / b == x / (a*b) for positive integers
        let x = HugeUint::mul(u128::MAX, 1_000_000_007);
        let a = 97u128;
        let b = 1009u128;

        let seq = x.div_scalar(a).unwrap().div_scalar(b).unwrap();
        let combined = x.div_scalar(a * b).unwrap();
        assert_eq!(seq, combined);
    }

    #[test]
    fn test_ordering_is_numeric() {
        let small = HugeUint { hi: 0, lo: u128::MAX };
        let big = HugeUint { hi: 1, lo: 0 };
        assert!(small < big);
    }

    #[test]
    fn test_display_hex() {
        assert_eq!(HugeUint::from_u128(0xff).to_string(), "0xff");
        let wide = HugeUint { hi: 1, lo: 2 };
        assert_eq!(wide.to_string(), format!("0x1{:032x}", 2u128));
    }

    // ------------------------------------------------------------------
    // Property-based coverage: compare against native u128 arithmetic on
    // the domain where both representations are exact.
    // ------------------------------------------------------------------

    proptest! {
        #[test]
        fn prop_mul_matches_native_on_64bit_inputs(a in any::<u64>(), b in any::<u64>()) {
            let wide = HugeUint::mul(a as u128, b as u128);
            prop_assert_eq!(wide.to_u128(), Some(a as u128 * b as u128));
        }

        #[test]
        fn prop_mul_div_roundtrip(a in any::<u128>(), b in 1u128..) {
            let prod = HugeUint::mul(a, b);
            let q = prod.div_scalar(b).unwrap();
            prop_assert_eq!(q.to_u128(), Some(a));
        }

        #[test]
        fn prop_add_commutes(a in any::<u128>(), b in any::<u128>(), c in any::<u128>()) {
            let x = HugeUint::mul(a, b);
            let y = HugeUint::from_u128(c);
            prop_assert_eq!(x.checked_add(y), y.checked_add(x));
        }

        #[test]
        fn prop_add_associates_without_overflow(
            a in any::<u64>(), b in any::<u64>(), c in any::<u64>()
        ) {
            // 64-bit inputs cannot overflow 256 bits under two additions
            let (a, b, c) = (
                HugeUint::from_u128(a as u128),
                HugeUint::from_u128(b as u128),
                HugeUint::from_u128(c as u128),
            );
            let left = a.checked_add(b).unwrap().checked_add(c).unwrap();
            let right = a.checked_add(b.checked_add(c).unwrap()).unwrap();
            prop_assert_eq!(left, right);
        }

        #[test]
        fn prop_sub_inverts_add(a in any::<u128>(), b in any::<u128>()) {
            let x = HugeUint::mul(a, 3);
            let y = HugeUint::from_u128(b);
            let sum = x.checked_add(y).unwrap();
            prop_assert_eq!(sum.checked_sub(y), Some(x));
        }

        #[test]
        fn prop_div_matches_native_on_narrow_values(x in any::<u128>(), d in 1u128..) {
            let q = HugeUint::from_u128(x).div_scalar(d).unwrap();
            prop_assert_eq!(q.to_u128(), Some(x / d));
        }

        #[test]
        fn prop_div_remainder_bound(a in any::<u128>(), b in any::<u128>(), d in 1u128..) {
            // quotient * d <= value < (quotient + 1) * d
            let value = HugeUint::mul(a, b);
            let q = value.div_scalar(d).unwrap();
            let back = q.checked_mul_scalar(d).unwrap();
            prop_assert!(back <= value);
            let diff = value.checked_sub(back).unwrap();
            prop_assert!(diff < HugeUint::from_u128(d));
        }
    }
}
