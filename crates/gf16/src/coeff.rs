//! Coefficient algebra for the recovery matrix.
//!
//! A recovery slice with output exponent `e` accumulates each input
//! slice `i` scaled by `coeff(i, e) = (i + 1)^e`: the base for input
//! index `i` is the field element `i + 1`, and raising it to `e` is a
//! single multiplication in log space. The dispatch path computes one
//! matrix cell per (input, output) pair, so `input_log` is hoisted per
//! input and `coeff_from_log` runs in the inner loop.

use crate::tables::{tables, LOG_ZERO};

/// Logarithm of the coefficient base for an input index.
///
/// Input indices are 15-bit (`< 32768`); index 0 maps to base 1, so the
/// base can never be zero and the `LOG_ZERO` sentinel is unreachable for
/// valid indices.
#[inline]
#[must_use]
pub fn input_log(input_index: u16) -> u16 {
    debug_assert!(input_index < 32768, "input index out of range");
    tables().log(input_index + 1)
}

/// Coefficient from a precomputed input log and an output exponent.
///
/// The 32-bit product `input_log * output_exp` is reduced mod 65535 by
/// folding the high half into the low half, with one carry correction;
/// the fold can land on exactly 65535, which the antilog table's wrap
/// entry resolves to 1.
#[inline]
#[must_use]
pub fn coeff_from_log(input_log: u16, output_exp: u16) -> u16 {
    if input_log == LOG_ZERO {
        return 0;
    }
    let product = u32::from(input_log) * u32::from(output_exp);
    let folded = (product >> 16) + (product & 0xFFFF);
    let folded = (folded >> 16) + (folded & 0xFFFF);
    tables().antilog(folded)
}

/// Coefficient for an (input index, output exponent) pair.
#[inline]
#[must_use]
pub fn coeff(input_index: u16, output_exp: u16) -> u16 {
    coeff_from_log(input_log(input_index), output_exp)
}
