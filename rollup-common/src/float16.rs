//! Lossy 16-bit decimal float used to publish amounts on-chain.
//!
//! Layout (MSB first): `eeeee h mmmmmmmmmm`. The value is `m * 10^e`, plus
//! `10^e / 2` when the half-unit flag `h` is set and `e > 0`.

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use thiserror::Error;

use crate::constants::{
    FLOAT_EXPONENT_SHIFT, FLOAT_HALF_FLAG, FLOAT_MANTISSA_BITS, FLOAT_MANTISSA_MASK,
    FLOAT_MAX_EXPONENT,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Float16Error {
    #[error("Amount too big to be encoded as float16: {0}")]
    Overflow(BigUint),
}

/// Decodes a float16 into the integer amount it stands for.
pub fn float2fix(fl: u16) -> BigUint {
    let m = fl & FLOAT_MANTISSA_MASK;
    let e = u32::from(fl >> FLOAT_EXPONENT_SHIFT);
    let exp = BigUint::from(10u32).pow(e);

    let mut res = BigUint::from(m) * &exp;
    if fl & FLOAT_HALF_FLAG != 0 && e > 0 {
        res += exp / 2u32;
    }
    res
}

/// Largest value with a float16 encoding.
pub fn max_float() -> BigUint {
    float2fix(0xFFFF)
}

fn encode(m: u16, e: u32) -> u16 {
    m | ((e as u16) << FLOAT_EXPONENT_SHIFT)
}

/// Truncating encoding: drops decimal digits until the mantissa fits.
fn floor_fix2float(f: &BigUint) -> Result<u16, Float16Error> {
    if f.is_zero() {
        return Ok(0);
    }

    let mut m = f.clone();
    let mut e = 0u32;
    while !(&m >> FLOAT_MANTISSA_BITS).is_zero() {
        m /= 10u32;
        e += 1;
    }

    if e > FLOAT_MAX_EXPONENT {
        return Err(Float16Error::Overflow(f.clone()));
    }
    // m < 1024 after the loop
    let m = m.to_u16().ok_or_else(|| Float16Error::Overflow(f.clone()))?;
    Ok(encode(m, e))
}

fn dist(a: &BigUint, b: &BigUint) -> BigUint {
    if a > b {
        a - b
    } else {
        b - a
    }
}

/// Encodes `f` as the float16 whose decoded value is closest to it.
///
/// Three candidates are compared: the truncated encoding, the truncated
/// encoding with the half-unit flag, and the next mantissa step. Only a
/// strictly smaller distance replaces an earlier candidate.
pub fn fix2float(f: &BigUint) -> Result<u16, Float16Error> {
    let fl1 = floor_fix2float(f)?;
    let fl2 = fl1 | FLOAT_HALF_FLAG;

    let mut m3 = (fl1 & FLOAT_MANTISSA_MASK) + 1;
    let mut e3 = u32::from(fl1 >> FLOAT_EXPONENT_SHIFT);
    if m3 == FLOAT_MANTISSA_MASK + 1 {
        m3 = (FLOAT_MANTISSA_MASK + 1) / 10;
        e3 += 1;
    }

    let mut res = fl1;
    let mut d = dist(&float2fix(fl1), f);

    let d2 = dist(&float2fix(fl2), f);
    if d > d2 {
        res = fl2;
        d = d2;
    }

    if e3 <= FLOAT_MAX_EXPONENT {
        let fl3 = encode(m3, e3);
        let d3 = dist(&float2fix(fl3), f);
        if d > d3 {
            res = fl3;
        }
    }

    Ok(res)
}

/// Rounds an amount through the codec, yielding what gets published.
pub fn round(f: &BigUint) -> Result<BigUint, Float16Error> {
    Ok(float2fix(fix2float(f)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn big(s: &str) -> BigUint {
        BigUint::parse_bytes(s.as_bytes(), 10).unwrap()
    }

    #[test]
    fn test_float2fix_known_values() {
        assert_eq!(float2fix(0x307B), big("123000000"));
        assert_eq!(float2fix(0x1DC6), big("454500"));
        assert_eq!(float2fix(0xFFFF), big("10235000000000000000000000000000000"));
        assert_eq!(float2fix(0x0000), BigUint::zero());
        assert_eq!(float2fix(0x0400), BigUint::zero());
        assert_eq!(float2fix(0x0001), BigUint::from(1u32));
    }

    #[test]
    fn test_fix2float_known_values() {
        let cases: &[(&str, u16)] = &[
            ("0", 0x0000),
            ("1", 0x0001),
            ("1023", 0x03FF),
            ("1024", 0x0C66),
            ("1029", 0x0867),
            ("1036", 0x0C67),
            ("2047", 0x0CCC),
            ("10240", 0x1466),
            ("123000000", 0x307B),
            ("123456789", 0x347B),
            ("5000000000000000003", 0x81F4),
            ("10235000000000000000000000000000000", 0xFFFF),
            ("10239000000000000000000000000000000", 0xFFFF),
        ];
        for (amount, expected) in cases {
            assert_eq!(fix2float(&big(amount)).unwrap(), *expected, "amount {}", amount);
        }
    }

    #[test]
    fn test_fix2float_ties_prefer_earlier_candidate() {
        // 10325 is equidistant from 10300 (floor) and 10350 (half flag)
        assert_eq!(fix2float(&big("10325")).unwrap(), 0x1067);
        // 10375 is equidistant from 10350 (half flag) and 10400 (next step)
        assert_eq!(fix2float(&big("10375")).unwrap(), 0x1467);
    }

    #[test]
    fn test_fix2float_overflow() {
        let too_big = big("10240000000000000000000000000000000");
        assert!(matches!(fix2float(&too_big), Err(Float16Error::Overflow(_))));
    }

    #[test]
    fn test_round_trip_has_minimal_error() {
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let digits = rng.gen_range(1..30);
            let amount: BigUint = (0..digits).fold(BigUint::zero(), |acc, _| {
                acc * 10u32 + rng.gen_range(0u32..10)
            });
            let fl = fix2float(&amount).unwrap();
            let err = dist(&float2fix(fl), &amount);

            let fl1 = floor_fix2float(&amount).unwrap();
            assert!(err <= dist(&float2fix(fl1), &amount));
            assert!(err <= dist(&float2fix(fl1 | FLOAT_HALF_FLAG), &amount));
        }
    }
}
