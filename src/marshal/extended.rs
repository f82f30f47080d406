//! `long double` codec
//!
//! Script floats are binary64. The native `long double` is one of: x87
//! 80-bit extended (x86, stored in 12 or 16 bytes), IEEE binary128
//! (most 64-bit non-x86 targets) or plain binary64.

/// Storage format of the platform `long double`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedFormat {
    X87,
    Quad,
    Double,
}

const X87_BIAS: i32 = 16383;
const F64_BIAS: i32 = 1023;
const F64_FRAC_BITS: u32 = 52;
const F64_FRAC_MASK: u64 = (1 << F64_FRAC_BITS) - 1;

impl ExtendedFormat {
    /// Format of a `long double` occupying `size` bytes on this target
    pub const fn for_size(size: usize) -> Self {
        if size <= 8 {
            Self::Double
        } else if cfg!(any(target_arch = "x86", target_arch = "x86_64")) {
            Self::X87
        } else {
            Self::Quad
        }
    }

    /// Encode `v` into `out`; bytes past the format's width are zeroed
    pub fn encode(self, v: f64, out: &mut [u8]) {
        out.fill(0);
        match self {
            Self::Double => out[..8].copy_from_slice(&v.to_ne_bytes()),
            Self::X87 => encode_x87(v, out),
            Self::Quad => encode_quad(v, out),
        }
    }

    /// Decode to the nearest binary64
    pub fn decode(self, bytes: &[u8]) -> f64 {
        match self {
            Self::Double => f64::from_ne_bytes(take::<8>(bytes)),
            Self::X87 => decode_x87(bytes),
            Self::Quad => decode_quad(bytes),
        }
    }
}

fn take<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(&bytes[..N]);
    buf
}

/// Split a binary64 into sign, unbiased exponent and a significand with the
/// leading one at bit 52; `None` exponent marks infinity/NaN
fn unpack(v: f64) -> (bool, Option<i32>, u64) {
    let bits = v.to_bits();
    let negative = bits >> 63 != 0;
    let exp = ((bits >> F64_FRAC_BITS) & 0x7ff) as i32;
    let frac = bits & F64_FRAC_MASK;

    match exp {
        0x7ff => (negative, None, frac),
        0 if frac == 0 => (negative, Some(i32::MIN), 0),
        0 => {
            let shift = frac.leading_zeros() - (63 - F64_FRAC_BITS);
            (negative, Some(1 - F64_BIAS - shift as i32), frac << shift)
        }
        _ => (negative, Some(exp - F64_BIAS), frac | (1 << F64_FRAC_BITS)),
    }
}

/// `x * 2^e` without overflowing the intermediate power
fn scale(mut x: f64, mut e: i32) -> f64 {
    while e > 1000 && x.is_finite() {
        x *= 2f64.powi(1000);
        e -= 1000;
    }
    while e < -1000 && x != 0.0 {
        x *= 2f64.powi(-1000);
        e += 1000;
    }
    x * 2f64.powi(e)
}

fn signed(negative: bool, magnitude: f64) -> f64 {
    if negative {
        -magnitude
    } else {
        magnitude
    }
}

fn encode_x87(v: f64, out: &mut [u8]) {
    let (negative, exp, significand) = unpack(v);
    let (exp80, mantissa) = match exp {
        None => (0x7fff, (1 << 63) | (significand << 11)),
        Some(i32::MIN) => (0, 0),
        Some(e) => ((e + X87_BIAS) as u16, significand << 11),
    };
    let sign_exp = (u16::from(negative) << 15) | exp80;

    out[..8].copy_from_slice(&mantissa.to_le_bytes());
    out[8..10].copy_from_slice(&sign_exp.to_le_bytes());
}

fn decode_x87(bytes: &[u8]) -> f64 {
    let mantissa = u64::from_le_bytes(take::<8>(bytes));
    let sign_exp = u16::from_le_bytes(take::<2>(&bytes[8..]));
    let negative = sign_exp & 0x8000 != 0;
    let exp = i32::from(sign_exp & 0x7fff);

    let magnitude = match exp {
        0x7fff if mantissa << 1 == 0 => f64::INFINITY,
        0x7fff => f64::NAN,
        0 => scale(mantissa as f64, 1 - X87_BIAS - 63),
        _ => scale(mantissa as f64, exp - X87_BIAS - 63),
    };
    signed(negative, magnitude)
}

fn encode_quad(v: f64, out: &mut [u8]) {
    let (negative, exp, significand) = unpack(v);
    let (exp15, fraction) = match exp {
        None => (0x7fff_u128, u128::from(significand) << 60),
        Some(i32::MIN) => (0, 0),
        Some(e) => ((e + X87_BIAS) as u128, u128::from(significand & F64_FRAC_MASK) << 60),
    };
    let bits = (u128::from(negative) << 127) | (exp15 << 112) | fraction;
    out[..16].copy_from_slice(&bits.to_ne_bytes());
}

fn decode_quad(bytes: &[u8]) -> f64 {
    let bits = u128::from_ne_bytes(take::<16>(bytes));
    let negative = bits >> 127 != 0;
    let exp = ((bits >> 112) & 0x7fff) as i32;
    let fraction = bits & ((1 << 112) - 1);

    let magnitude = match exp {
        0x7fff if fraction == 0 => f64::INFINITY,
        0x7fff => f64::NAN,
        0 => scale(fraction as f64, 1 - X87_BIAS - 112),
        _ => scale((fraction | (1 << 112)) as f64, exp - X87_BIAS - 112),
    };
    signed(negative, magnitude)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: [f64; 10] = [
        0.0,
        1.0,
        -1.5,
        0.1,
        3.141592653589793,
        1e300,
        -2.5e-300,
        f64::MIN_POSITIVE,
        5e-324,
        f64::MAX,
    ];

    fn round_trip(format: ExtendedFormat, v: f64) -> f64 {
        let mut buf = [0u8; 16];
        format.encode(v, &mut buf);
        format.decode(&buf)
    }

    #[test]
    fn test_x87_preserves_doubles() {
        for v in SAMPLES {
            assert_eq!(round_trip(ExtendedFormat::X87, v).to_bits(), v.to_bits(), "{}", v);
        }
    }

    #[test]
    fn test_quad_preserves_doubles() {
        for v in SAMPLES {
            assert_eq!(round_trip(ExtendedFormat::Quad, v).to_bits(), v.to_bits(), "{}", v);
        }
    }

    #[test]
    fn test_x87_known_encoding() {
        let mut buf = [0u8; 10];
        ExtendedFormat::X87.encode(1.0, &mut buf);
        // 1.0 = explicit integer bit, exponent 0x3fff
        assert_eq!(buf, [0, 0, 0, 0, 0, 0, 0, 0x80, 0xff, 0x3f]);

        ExtendedFormat::X87.encode(-2.0, &mut buf);
        assert_eq!(&buf[8..], &[0x00, 0xc0]);
    }

    #[test]
    fn test_special_values() {
        for format in [ExtendedFormat::X87, ExtendedFormat::Quad, ExtendedFormat::Double] {
            assert_eq!(round_trip(format, f64::INFINITY), f64::INFINITY);
            assert_eq!(round_trip(format, f64::NEG_INFINITY), f64::NEG_INFINITY);
            assert!(round_trip(format, f64::NAN).is_nan());
            assert!(round_trip(format, -0.0).is_sign_negative());
        }
    }

    #[test]
    fn test_padding_zeroed() {
        let mut buf = [0xaau8; 16];
        ExtendedFormat::X87.encode(2.0, &mut buf);
        assert!(buf[10..].iter().all(|&b| b == 0));
    }
}
