//! Integer semantics shared by builder constant folding and the VM, so a folded
//! expression always agrees with its run-time evaluation.
//!
//! Arithmetic wraps; division and remainder by zero yield 0; a negative
//! exponent yields 0; shift amounts are taken modulo 64.

use crate::typ::FlowNumber;

#[inline]
pub fn add(a: FlowNumber, b: FlowNumber) -> FlowNumber {
    a.wrapping_add(b)
}

#[inline]
pub fn sub(a: FlowNumber, b: FlowNumber) -> FlowNumber {
    a.wrapping_sub(b)
}

#[inline]
pub fn mul(a: FlowNumber, b: FlowNumber) -> FlowNumber {
    a.wrapping_mul(b)
}

#[inline]
pub fn div(a: FlowNumber, b: FlowNumber) -> FlowNumber {
    if b == 0 { 0 } else { a.wrapping_div(b) }
}

#[inline]
pub fn rem(a: FlowNumber, b: FlowNumber) -> FlowNumber {
    if b == 0 { 0 } else { a.wrapping_rem(b) }
}

pub fn pow(base: FlowNumber, exp: FlowNumber) -> FlowNumber {
    if exp < 0 {
        return 0;
    }
    let exp = u32::try_from(exp).unwrap_or(u32::MAX);
    base.wrapping_pow(exp)
}

#[inline]
pub fn shl(a: FlowNumber, b: FlowNumber) -> FlowNumber {
    a.wrapping_shl((b & 63) as u32)
}

#[inline]
pub fn shr(a: FlowNumber, b: FlowNumber) -> FlowNumber {
    a.wrapping_shr((b & 63) as u32)
}

#[inline]
pub fn neg(a: FlowNumber) -> FlowNumber {
    a.wrapping_neg()
}

/// String to number conversion used by casts: surrounding whitespace is
/// ignored and anything unparsable converts to 0.
pub fn parse(s: &str) -> FlowNumber {
    s.trim().parse().unwrap_or(0)
}
