//! Single and double precision helpers for the float opcode families.
//!
//! Floats travel as raw IEEE-754 bit patterns in ordinary words; doubles as
//! a high word and a low word.

fn f(bits: u32) -> f32 {
    f32::from_bits(bits)
}

fn bits(value: f32) -> u32 {
    value.to_bits()
}

pub fn to_double(hi: u32, lo: u32) -> f64 {
    f64::from_bits(((hi as u64) << 32) | lo as u64)
}

/// `(hi, lo)` words of a double.
pub fn from_double(value: f64) -> (u32, u32) {
    let raw = value.to_bits();
    ((raw >> 32) as u32, raw as u32)
}

pub fn numtof(value: u32) -> u32 {
    bits(value as i32 as f32)
}

/// Clamp an out-of-range or NaN value the way `ftonum*` and `dtonum*`
/// require: positive side to `i32::MAX`, negative side to `i32::MIN`.
fn clamp_to_int(value: f64, negative: bool) -> u32 {
    if value.is_nan() || value.is_infinite() || value >= 2147483648.0 || value < -2147483648.0 {
        if negative {
            0x8000_0000
        } else {
            0x7FFF_FFFF
        }
    } else {
        value as i32 as u32
    }
}

pub fn ftonumz(value: u32) -> u32 {
    clamp_to_int(f(value).trunc() as f64, value & 0x8000_0000 != 0)
}

pub fn ftonumn(value: u32) -> u32 {
    clamp_to_int(f(value).round() as f64, value & 0x8000_0000 != 0)
}

/// `ceil`; a zero result keeps the sign of the argument.
pub fn ceil(value: u32) -> u32 {
    let result = bits(f(value).ceil());
    if result & 0x7FFF_FFFF == 0 {
        value & 0x8000_0000
    } else {
        result
    }
}

pub fn floor(value: u32) -> u32 {
    bits(f(value).floor())
}

pub fn add(a: u32, b: u32) -> u32 {
    bits(f(a) + f(b))
}

pub fn sub(a: u32, b: u32) -> u32 {
    bits(f(a) - f(b))
}

pub fn mul(a: u32, b: u32) -> u32 {
    bits(f(a) * f(b))
}

pub fn div(a: u32, b: u32) -> u32 {
    bits(f(a) / f(b))
}

/// `fmod`: remainder and truncated quotient. A zero quotient carries the
/// sign `a` and `b` would give it.
pub fn fmod(a: u32, b: u32) -> (u32, u32) {
    let (x, y) = (f(a), f(b));
    let rem = x % y;
    let mut quot = bits(((x - rem) / y).trunc());
    if quot & 0x7FFF_FFFF == 0 {
        quot = (a ^ b) & 0x8000_0000;
    }
    (bits(rem), quot)
}

pub fn sqrt(a: u32) -> u32 {
    bits(f(a).sqrt())
}

pub fn exp(a: u32) -> u32 {
    bits(f(a).exp())
}

pub fn log(a: u32) -> u32 {
    bits(f(a).ln())
}

/// `pow` with the C99 special cases: `pow(1, y)` and `pow(x, ±0)` are 1 and
/// `pow(-1, ±inf)` is 1.
pub fn pow(a: u32, b: u32) -> u32 {
    let (x, y) = (f(a), f(b));
    if x == 1.0 || y == 0.0 || (x == -1.0 && y.is_infinite()) {
        return bits(1.0);
    }
    bits(x.powf(y))
}

pub fn sin(a: u32) -> u32 {
    bits(f(a).sin())
}

pub fn cos(a: u32) -> u32 {
    bits(f(a).cos())
}

pub fn tan(a: u32) -> u32 {
    bits(f(a).tan())
}

pub fn asin(a: u32) -> u32 {
    bits(f(a).asin())
}

pub fn acos(a: u32) -> u32 {
    bits(f(a).acos())
}

pub fn atan(a: u32) -> u32 {
    bits(f(a).atan())
}

pub fn atan2(a: u32, b: u32) -> u32 {
    bits(f(a).atan2(f(b)))
}

/// `jfeq`: `|b - a| <= |eps|`. Infinities are only equal to themselves and
/// NaN is never equal to anything.
pub fn approx_eq(a: u32, b: u32, eps: u32) -> bool {
    let (x, y, e) = (f(a), f(b), f(eps));
    if x.is_nan() || y.is_nan() || e.is_nan() {
        return false;
    }
    if x.is_infinite() && y.is_infinite() {
        return a == b;
    }
    (y - x).abs() <= e.abs()
}

pub fn lt(a: u32, b: u32) -> bool {
    f(a) < f(b)
}

pub fn le(a: u32, b: u32) -> bool {
    f(a) <= f(b)
}

pub fn gt(a: u32, b: u32) -> bool {
    f(a) > f(b)
}

pub fn ge(a: u32, b: u32) -> bool {
    f(a) >= f(b)
}

pub fn is_nan(a: u32) -> bool {
    f(a).is_nan()
}

pub fn is_inf(a: u32) -> bool {
    f(a).is_infinite()
}

pub mod double {
    //! Double-precision counterparts. Arguments and results are `f64`; the
    //! executor splits them into word pairs.

    use super::clamp_to_int;

    pub fn numtod(value: u32) -> f64 {
        value as i32 as f64
    }

    pub fn dtonumz(value: f64) -> u32 {
        clamp_to_int(value.trunc(), value.is_sign_negative())
    }

    pub fn dtonumn(value: f64) -> u32 {
        clamp_to_int(value.round(), value.is_sign_negative())
    }

    pub fn ftod(value: u32) -> f64 {
        f32::from_bits(value) as f64
    }

    pub fn dtof(value: f64) -> u32 {
        (value as f32).to_bits()
    }

    pub fn ceil(value: f64) -> f64 {
        let result = value.ceil();
        if result == 0.0 {
            0.0f64.copysign(value)
        } else {
            result
        }
    }

    /// `dmodr` and `dmodq`: remainder and truncated quotient.
    pub fn modulo(x: f64, y: f64) -> (f64, f64) {
        let rem = x % y;
        let mut quot = ((x - rem) / y).trunc();
        if quot == 0.0 {
            let negative = x.is_sign_negative() != y.is_sign_negative();
            quot = if negative { -0.0 } else { 0.0 };
        }
        (rem, quot)
    }

    pub fn pow(x: f64, y: f64) -> f64 {
        if x == 1.0 || y == 0.0 || (x == -1.0 && y.is_infinite()) {
            return 1.0;
        }
        x.powf(y)
    }

    pub fn approx_eq(x: f64, y: f64, eps: f64) -> bool {
        if x.is_nan() || y.is_nan() || eps.is_nan() {
            return false;
        }
        if x.is_infinite() && y.is_infinite() {
            return x.to_bits() == y.to_bits();
        }
        (y - x).abs() <= eps.abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: u32 = 0x3F80_0000;
    const NAN: u32 = 0x7FC0_0000;
    const INF: u32 = 0x7F80_0000;
    const NEG_INF: u32 = 0xFF80_0000;

    #[test]
    fn conversions_clamp_by_sign() {
        assert_eq!(ftonumz(bits(-2.7)), -2i32 as u32);
        assert_eq!(ftonumn(bits(-2.5)), -3i32 as u32);
        assert_eq!(ftonumn(bits(2.5)), 3);
        assert_eq!(ftonumz(INF), 0x7FFF_FFFF);
        assert_eq!(ftonumz(NEG_INF), 0x8000_0000);
        assert_eq!(ftonumz(NAN), 0x7FFF_FFFF);
        assert_eq!(ftonumz(NAN | 0x8000_0000), 0x8000_0000);
        assert_eq!(ftonumz(bits(3e9)), 0x7FFF_FFFF);
        assert_eq!(numtof(-1i32 as u32), bits(-1.0));
    }

    #[test]
    fn ceil_keeps_negative_zero() {
        assert_eq!(ceil(bits(-0.5)), 0x8000_0000);
        assert_eq!(ceil(bits(0.5)), ONE);
        assert_eq!(double::ceil(-0.25).to_bits(), (-0.0f64).to_bits());
    }

    #[test]
    fn fmod_signs() {
        let (rem, quot) = fmod(bits(7.0), bits(-2.0));
        assert_eq!(f(rem), 1.0);
        assert_eq!(f(quot), -3.0);
        let (_, quot) = fmod(bits(-1.0), bits(4.0));
        assert_eq!(quot, 0x8000_0000);
        let (rem, quot) = double::modulo(-7.0, 2.0);
        assert_eq!((rem, quot), (-1.0, -3.0));
    }

    #[test]
    fn pow_special_cases() {
        assert_eq!(pow(ONE, NAN), ONE);
        assert_eq!(pow(NAN, 0), ONE);
        assert_eq!(pow(bits(-1.0), INF), ONE);
        assert_eq!(f(pow(bits(2.0), bits(10.0))), 1024.0);
    }

    #[test]
    fn approximate_equality() {
        assert!(approx_eq(bits(1.0), bits(1.05), bits(0.1)));
        assert!(!approx_eq(bits(1.0), bits(1.5), bits(-0.1)));
        assert!(approx_eq(INF, INF, 0));
        assert!(!approx_eq(INF, NEG_INF, INF));
        assert!(!approx_eq(NAN, NAN, INF));
        assert!(double::approx_eq(f64::INFINITY, f64::INFINITY, 0.0));
    }

    #[test]
    fn double_words() {
        let (hi, lo) = from_double(1.5);
        assert_eq!((hi, lo), (0x3FF8_0000, 0));
        assert_eq!(to_double(hi, lo), 1.5);
        assert_eq!(double::dtonumz(-1e12), 0x8000_0000);
    }
}
