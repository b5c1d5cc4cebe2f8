//! Two's-complement integer semantics shared by the arithmetic opcodes.
//!
//! Division and remainder work on magnitudes and re-apply the sign, so the
//! result always truncates toward zero. Shift counts outside `0..32` are
//! defined rather than left to the host.

use crate::error::{VmError, VmResult};

pub fn div(a: u32, b: u32) -> VmResult<u32> {
    let (a, b) = (a as i32, b as i32);
    if b == 0 {
        return Err(VmError::DivisionByZero);
    }
    let quotient = a.unsigned_abs() / b.unsigned_abs();
    Ok(if (a < 0) != (b < 0) {
        quotient.wrapping_neg()
    } else {
        quotient
    })
}

pub fn rem(a: u32, b: u32) -> VmResult<u32> {
    let (a, b) = (a as i32, b as i32);
    if b == 0 {
        return Err(VmError::DivisionByZero);
    }
    let remainder = a.unsigned_abs() % b.unsigned_abs();
    Ok(if a < 0 {
        remainder.wrapping_neg()
    } else {
        remainder
    })
}

pub fn shift_left(value: u32, count: u32) -> u32 {
    if count >= 32 { 0 } else { value << count }
}

pub fn shift_right_logical(value: u32, count: u32) -> u32 {
    if count >= 32 { 0 } else { value >> count }
}

pub fn shift_right_arith(value: u32, count: u32) -> u32 {
    let value = value as i32;
    if count >= 32 {
        if value < 0 { u32::MAX } else { 0 }
    } else {
        (value >> count) as u32
    }
}

pub fn sign_extend_16(value: u32) -> u32 {
    value as u16 as i16 as i32 as u32
}

pub fn sign_extend_8(value: u32) -> u32 {
    value as u8 as i8 as i32 as u32
}

/// Byte address and bit number for `aloadbit`/`astorebit`. Negative bit
/// indices reach backwards from `base`.
pub fn bit_address(base: u32, bit: u32) -> (u32, u8) {
    let bit = bit as i32;
    (base.wrapping_add((bit >> 3) as u32), (bit & 7) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sdiv(a: i32, b: i32) -> i32 {
        div(a as u32, b as u32).unwrap() as i32
    }

    fn srem(a: i32, b: i32) -> i32 {
        rem(a as u32, b as u32).unwrap() as i32
    }

    #[test]
    fn division_truncates_toward_zero() {
        assert_eq!(sdiv(7, 2), 3);
        assert_eq!(sdiv(-7, 2), -3);
        assert_eq!(sdiv(7, -2), -3);
        assert_eq!(sdiv(-7, -2), 3);
        assert_eq!(srem(7, 2), 1);
        assert_eq!(srem(-7, 2), -1);
        assert_eq!(srem(7, -2), 1);
        assert_eq!(srem(-7, -2), -1);
    }

    #[test]
    fn int_min_boundaries() {
        assert_eq!(sdiv(i32::MIN, -1), i32::MIN);
        assert_eq!(srem(i32::MIN, -1), 0);
        assert_eq!(sdiv(i32::MIN, 1), i32::MIN);
        assert_eq!(sdiv(i32::MIN, 2), -0x4000_0000);
        assert_eq!(srem(i32::MIN, 3), -2);
        assert_eq!(sdiv(5, i32::MIN), 0);
        assert_eq!(srem(5, i32::MIN), 5);
    }

    #[test]
    fn quotient_identity_holds() {
        let samples = [0, 1, -1, 2, -2, 7, -7, 1000, -1000, i32::MAX, i32::MIN, 12345, -98765];
        for &a in &samples {
            for &b in &samples {
                if b == 0 {
                    continue;
                }
                let q = sdiv(a, b);
                let r = srem(a, b);
                assert_eq!(q.wrapping_mul(b).wrapping_add(r), a, "{} / {}", a, b);
            }
        }
    }

    #[test]
    fn division_by_zero_is_fatal() {
        assert_eq!(div(1, 0), Err(VmError::DivisionByZero));
        assert_eq!(rem(1, 0), Err(VmError::DivisionByZero));
    }

    #[test]
    fn wide_shifts_are_defined() {
        for count in [32, 33, 100, 0x8000_0000, u32::MAX] {
            assert_eq!(shift_left(0xFFFF_FFFF, count), 0);
            assert_eq!(shift_right_logical(0xFFFF_FFFF, count), 0);
            assert_eq!(shift_right_arith(0x8000_0000, count), 0xFFFF_FFFF);
            assert_eq!(shift_right_arith(0x7FFF_FFFF, count), 0);
        }
        assert_eq!(shift_left(1, 31), 0x8000_0000);
        assert_eq!(shift_right_arith(0x8000_0000, 4), 0xF800_0000);
        assert_eq!(shift_right_logical(0x8000_0000, 4), 0x0800_0000);
    }

    #[test]
    fn sign_extension() {
        assert_eq!(sign_extend_16(0x8000), 0xFFFF_8000);
        assert_eq!(sign_extend_16(0x1234_7FFF), 0x7FFF);
        assert_eq!(sign_extend_8(0x80), 0xFFFF_FF80);
        assert_eq!(sign_extend_8(0xFF7F), 0x7F);
    }

    #[test]
    fn bit_addressing() {
        assert_eq!(bit_address(0x100, 0), (0x100, 0));
        assert_eq!(bit_address(0x100, 11), (0x101, 3));
        assert_eq!(bit_address(0x100, (-1i32) as u32), (0xFF, 7));
        assert_eq!(bit_address(0x100, (-9i32) as u32), (0xFE, 7));
    }
}
