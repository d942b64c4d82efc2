//! Multiplicative inverses modulo 2^32 and 2^64.

use anyhow::Result;

/// Integer constant of either JVM integral width.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum Number {
    Int(i32),
    Long(i64),
}

impl Number {
    /// Odd values are the only units of a power-of-two modulus.
    pub(crate) fn is_invertible(self) -> bool {
        match self {
            Number::Int(value) => value & 1 == 1,
            Number::Long(value) => value & 1 == 1,
        }
    }

    pub(crate) fn invert(self) -> Result<Number> {
        Ok(match self {
            Number::Int(value) => Number::Int(invert_i32(value)?),
            Number::Long(value) => Number::Long(invert_i64(value)?),
        })
    }

    /// An invertible value that is not its own inverse.
    pub(crate) fn is_multiplier(self) -> bool {
        if !self.is_invertible() {
            return false;
        }
        match self.invert() {
            Ok(inverse) => inverse != self,
            Err(_) => false,
        }
    }

    /// Wrapping product; the width of `self` decides the result width.
    pub(crate) fn wrapping_mul(self, other: Number) -> Number {
        match self {
            Number::Int(value) => Number::Int(value.wrapping_mul(other.as_i64() as i32)),
            Number::Long(value) => Number::Long(value.wrapping_mul(other.as_i64())),
        }
    }

    pub(crate) fn as_i64(self) -> i64 {
        match self {
            Number::Int(value) => value as i64,
            Number::Long(value) => value,
        }
    }

    pub(crate) fn is_one(self) -> bool {
        self.as_i64() == 1
    }
}

/// Inverse of an odd `n` modulo 2^32.
pub(crate) fn invert_i32(n: i32) -> Result<i32> {
    let value = n as u32 as i128;
    let Some(inverse) = mod_inverse(value, 1i128 << 32) else {
        anyhow::bail!("{n} has no inverse modulo 2^32");
    };
    Ok(inverse as u32 as i32)
}

/// Inverse of an odd `n` modulo 2^64.
pub(crate) fn invert_i64(n: i64) -> Result<i64> {
    let value = n as u64 as i128;
    let Some(inverse) = mod_inverse(value, 1i128 << 64) else {
        anyhow::bail!("{n} has no inverse modulo 2^64");
    };
    Ok(inverse as u64 as i64)
}

/// Extended Euclidean algorithm.
fn mod_inverse(value: i128, modulus: i128) -> Option<i128> {
    let (mut old_r, mut r) = (value.rem_euclid(modulus), modulus);
    let (mut old_s, mut s) = (1i128, 0i128);
    while r != 0 {
        let quotient = old_r / r;
        (old_r, r) = (r, old_r - quotient * r);
        (old_s, s) = (s, old_s - quotient * s);
    }
    if old_r != 1 {
        return None;
    }
    Some(old_s.rem_euclid(modulus))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES_I32: [i32; 8] = [1, -1, 3, 1_364_231_567, -1_640_531_527, i32::MAX, i32::MIN + 1, 0x7f3a_9bd5];
    const SAMPLES_I64: [i64; 6] = [1, -1, 7, -5_316_563_087_651_917_309, i64::MAX, 0x1234_5678_9abc_def1];

    #[test]
    fn int_inverse_round_trips() {
        for n in SAMPLES_I32 {
            let inverse = invert_i32(n).expect("odd value");
            assert_eq!(n.wrapping_mul(inverse), 1, "n = {n}");
            assert_eq!(invert_i32(inverse).expect("odd inverse"), n);
        }
    }

    #[test]
    fn long_inverse_round_trips() {
        for n in SAMPLES_I64 {
            let inverse = invert_i64(n).expect("odd value");
            assert_eq!(n.wrapping_mul(inverse), 1, "n = {n}");
            assert_eq!(invert_i64(inverse).expect("odd inverse"), n);
        }
    }

    #[test]
    fn even_values_are_rejected() {
        for n in [0, 2, -4, 1 << 20] {
            assert!(invert_i32(n).is_err());
            assert!(!Number::Int(n).is_invertible());
        }
        assert!(invert_i64(1 << 40).is_err());
    }

    #[test]
    fn self_inverse_values_are_not_multipliers() {
        assert!(!Number::Int(1).is_multiplier());
        assert!(!Number::Int(-1).is_multiplier());
        assert!(!Number::Long(1).is_multiplier());
        assert!(!Number::Int(6).is_multiplier());
        assert!(Number::Int(1_364_231_567).is_multiplier());
        assert!(Number::Long(7).is_multiplier());
    }

    #[test]
    fn int_times_long_truncates_to_int() {
        let product = Number::Int(3).wrapping_mul(Number::Long(0x1_0000_0005));
        assert_eq!(product, Number::Int(15));
    }
}
