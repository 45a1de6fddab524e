//! Finite field arithmetic.
//!
//! This module provides arithmetic in a prime field Z_p.  The
//! [`Field`](struct.Field.html) type encapsulates a prime modulus and exposes
//! methods for addition, subtraction, multiplication, exponentiation,
//! inversion and division.  All operations reduce their results into
//! `[0, p)`, including values that started out negative.

use thiserror::Error;

/// Errors raised when a modulus cannot back a tally field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FieldError {
    /// The modulus must exceed 3 so that votes and shares stay meaningful.
    #[error("modulus {0} is too small, the prime must be greater than 3")]
    ModulusTooSmall(u64),
    /// The modulus is not prime, so some non-zero elements lack an inverse.
    #[error("modulus {0} is not prime")]
    CompositeModulus(u64),
    /// Reported values travel as `i64`, so every field element must fit one.
    #[error("modulus {0} exceeds {max}", max = MAX_MODULUS)]
    ModulusTooLarge(u64),
}

/// Largest accepted modulus.  Elements and reported values are carried as
/// `i64`, and the sum of two elements must not overflow `u64`.
pub const MAX_MODULUS: u64 = i64::MAX as u64;

/// Errors raised by field operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArithmeticError {
    /// `gcd(value, modulus) != 1`; in a prime field this only happens for zero.
    #[error("{value} has no inverse modulo {modulus}")]
    NotInvertible {
        /// Element that was inverted.
        value: u64,
        /// Field modulus.
        modulus: u64,
    },
}

/// A finite field defined by a prime modulus greater than 3.
///
/// The `Field` type stores the modulus `p` and provides elementary
/// arithmetic operations over the integers modulo `p`.  Construction checks
/// primality, so every non-zero element below `p` is invertible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    p: u64,
}

impl Field {
    /// Creates a new finite field with the given modulus.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::ModulusTooSmall`] for `p <= 3`,
    /// [`FieldError::ModulusTooLarge`] for `p > MAX_MODULUS` and
    /// [`FieldError::CompositeModulus`] when `p` is not prime.
    pub fn new(p: u64) -> Result<Self, FieldError> {
        if p <= 3 {
            return Err(FieldError::ModulusTooSmall(p));
        }
        if p > MAX_MODULUS {
            return Err(FieldError::ModulusTooLarge(p));
        }
        if !is_prime(p) {
            return Err(FieldError::CompositeModulus(p));
        }
        Ok(Field { p })
    }

    /// Returns the modulus of the field.
    #[inline]
    pub fn modulus(&self) -> u64 {
        self.p
    }

    /// Returns true if `value` is already a canonical element of `[0, p)`.
    #[inline]
    pub fn contains(&self, value: i64) -> bool {
        value >= 0 && (value as u64) < self.p
    }

    /// Maps a signed integer onto its representative in `[0, p)`.
    ///
    /// The `%` operator keeps the sign of the dividend, so the euclidean
    /// remainder is used instead.
    #[inline]
    pub fn normalize(&self, value: i64) -> u64 {
        (value as i128).rem_euclid(self.p as i128) as u64
    }

    /// Adds two field elements.
    #[inline]
    pub fn add(&self, a: u64, b: u64) -> u64 {
        let mut s = (a % self.p) + (b % self.p);
        if s >= self.p {
            s -= self.p;
        }
        s
    }

    /// Subtracts `b` from `a`.
    #[inline]
    pub fn sub(&self, a: u64, b: u64) -> u64 {
        let a = a % self.p;
        let b = b % self.p;
        if a >= b {
            a - b
        } else {
            self.p - (b - a)
        }
    }

    /// Returns the additive inverse of `a`.
    #[inline]
    pub fn neg(&self, a: u64) -> u64 {
        self.sub(0, a)
    }

    /// Multiplies two field elements.
    #[inline]
    pub fn mul(&self, a: u64, b: u64) -> u64 {
        let a = a % self.p;
        let b = b % self.p;
        ((a as u128 * b as u128) % self.p as u128) as u64
    }

    /// Computes the multiplicative inverse of `a` with the extended
    /// Euclidean algorithm.
    ///
    /// # Errors
    ///
    /// Returns [`ArithmeticError::NotInvertible`] if `gcd(a, p) != 1`, which
    /// for a prime modulus means `a ≡ 0`.
    pub fn inverse(&self, a: u64) -> Result<u64, ArithmeticError> {
        let modulus = self.p as i128;
        let (mut r, mut new_r) = (modulus, (a % self.p) as i128);
        let (mut t, mut new_t) = (0i128, 1i128);
        while new_r != 0 {
            let q = r / new_r;
            (t, new_t) = (new_t, t - q * new_t);
            (r, new_r) = (new_r, r - q * new_r);
        }
        if r != 1 {
            return Err(ArithmeticError::NotInvertible {
                value: a,
                modulus: self.p,
            });
        }
        Ok(t.rem_euclid(modulus) as u64)
    }

    /// Divides `n` by `d`.
    #[inline]
    pub fn div(&self, n: u64, d: u64) -> Result<u64, ArithmeticError> {
        Ok(self.mul(n, self.inverse(d)?))
    }

    /// Exponentiates `a` by `e` modulo `p`.
    #[inline]
    pub fn pow(&self, mut a: u64, mut e: u64) -> u64 {
        a %= self.p;
        let mut result = 1u64;
        while e > 0 {
            if e & 1 == 1 {
                result = self.mul(result, a);
            }
            a = self.mul(a, a);
            e >>= 1;
        }
        result
    }

    /// Sums an iterator of field elements.
    pub fn sum<I: IntoIterator<Item = u64>>(&self, values: I) -> u64 {
        values.into_iter().fold(0, |acc, v| self.add(acc, v))
    }
}

fn mul_mod(a: u64, b: u64, m: u64) -> u64 {
    ((a as u128 * b as u128) % m as u128) as u64
}

fn pow_mod(mut base: u64, mut exp: u64, m: u64) -> u64 {
    let mut result = 1u64;
    base %= m;
    while exp > 0 {
        if exp & 1 == 1 {
            result = mul_mod(result, base, m);
        }
        base = mul_mod(base, base, m);
        exp >>= 1;
    }
    result
}

/// Deterministic Miller-Rabin test for 64-bit integers.
///
/// The witness set below is known to be exact for every `n < 2^64`.
pub fn is_prime(n: u64) -> bool {
    const WITNESSES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];
    if n < 2 {
        return false;
    }
    for &w in &WITNESSES {
        if n % w == 0 {
            return n == w;
        }
    }
    let t = n - 1;
    let h = t.trailing_zeros();
    let d = t >> h;
    'witness: for &a in &WITNESSES {
        let mut b = pow_mod(a, d, n);
        if b == 1 || b == n - 1 {
            continue;
        }
        for _ in 1..h {
            b = mul_mod(b, b, n);
            if b == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SMALL_PRIMES: [u64; 6] = [5, 7, 11, 13, 101, 1997];

    #[test]
    fn rejects_small_and_composite_moduli() {
        assert_eq!(Field::new(3), Err(FieldError::ModulusTooSmall(3)));
        assert_eq!(Field::new(0), Err(FieldError::ModulusTooSmall(0)));
        assert_eq!(Field::new(15), Err(FieldError::CompositeModulus(15)));
        assert_eq!(Field::new(561), Err(FieldError::CompositeModulus(561)));
        assert!(Field::new(991).is_ok());
        assert_eq!(
            Field::new(18_446_744_073_709_551_557),
            Err(FieldError::ModulusTooLarge(18_446_744_073_709_551_557))
        );
    }

    #[test]
    fn largest_accepted_prime_does_not_overflow() {
        // 2^63 - 25 is the largest prime below 2^63.
        let field = Field::new(9_223_372_036_854_775_783).unwrap();
        let top = field.modulus() - 1;
        assert_eq!(field.add(top, top), top - 1);
        assert_eq!(field.sub(0, top), 1);
        assert_eq!(field.mul(top, top), 1);
        assert!(field.contains(top as i64));
        assert_eq!(field.normalize(-1), top);
    }

    #[test]
    fn inverse_is_exact_for_every_unit() {
        for p in SMALL_PRIMES {
            let field = Field::new(p).unwrap();
            for x in 1..p {
                let inv = field.inverse(x).unwrap();
                assert!(inv < p);
                assert_eq!(field.mul(x, inv), 1, "p={p} x={x}");
            }
        }
    }

    #[test]
    fn zero_is_not_invertible() {
        let field = Field::new(1997).unwrap();
        assert_eq!(
            field.inverse(0),
            Err(ArithmeticError::NotInvertible {
                value: 0,
                modulus: 1997
            })
        );
        assert!(field.div(5, 1997).is_err());
    }

    #[test]
    fn additive_inverse_cancels() {
        for p in SMALL_PRIMES {
            let field = Field::new(p).unwrap();
            for a in 0..p.min(200) {
                assert_eq!(field.add(a, field.sub(p, a)), 0);
            }
        }
    }

    #[test]
    fn normalize_handles_negative_values() {
        let field = Field::new(7).unwrap();
        assert_eq!(field.normalize(-1), 6);
        assert_eq!(field.normalize(-7), 0);
        assert_eq!(field.normalize(-15), 6);
        assert_eq!(field.normalize(22), 1);
        assert!(!field.contains(-1));
        assert!(!field.contains(7));
        assert!(field.contains(6));
    }

    #[test]
    fn miller_rabin_matches_trial_division() {
        let naive = |n: u64| n >= 2 && (2..n).take_while(|d| d * d <= n).all(|d| n % d != 0);
        for n in 0..5000u64 {
            assert_eq!(is_prime(n), naive(n), "n={n}");
        }
        assert!(is_prime(18_446_744_073_709_551_557));
    }

    proptest! {
        #[test]
        fn division_undoes_multiplication(a in 0u64..1997, b in 1u64..1997) {
            let field = Field::new(1997).unwrap();
            prop_assert_eq!(field.div(field.mul(a, b), b).unwrap(), a);
        }

        #[test]
        fn pow_matches_repeated_multiplication(x in 0u64..101, y in 0u64..40) {
            let field = Field::new(101).unwrap();
            let expected = (0..y).fold(1, |acc, _| field.mul(acc, x));
            prop_assert_eq!(field.pow(x, y), expected);
        }
    }
}
