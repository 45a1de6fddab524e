//! Shamir share generation and Lagrange reconstruction.
//!
//! A vote `v ∈ {0, 1}` is hidden as the constant term of a random polynomial
//! `f(x) = v + a_1 x + ... + a_k x^k` over Z_p.  Server `i` receives `f(i)`.
//! Because evaluation is linear, summing the shares held by one server over
//! all voters yields a point on the *sum* polynomial, whose constant term is
//! the number of yes votes.

use crate::field::{ArithmeticError, Field};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One server's sample of the shared polynomial.
///
/// `x` is the server's public index (never 0).  `y` is the value that server
/// *reported*; it is signed because a dishonest server may report something
/// outside the field, which the decoder must be able to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    /// Public server index, `1..=n`.
    pub x: u64,
    /// Reported evaluation at `x`.
    pub y: i64,
}

impl Point {
    /// Creates a point from an index and an in-field value.
    pub fn new(x: u64, y: u64) -> Self {
        Point { x, y: y as i64 }
    }
}

/// Errors raised when a vote cannot be shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SharingError {
    /// Votes are binary.
    #[error("vote must be 0 or 1, got {0}")]
    InvalidVote(u64),
    /// A degree-0 polynomial would hand the vote to every server.
    #[error("polynomial degree must be at least 1")]
    ZeroDegree,
    /// Fewer than `k + 1` shares cannot reconstruct the vote.
    #[error("{shares} shares cannot reconstruct a degree {degree} polynomial")]
    TooFewShares {
        /// Requested share count.
        shares: usize,
        /// Polynomial degree.
        degree: usize,
    },
    /// Indices `1..=n` must be distinct non-zero field elements.
    #[error("{shares} share indices do not fit in a field of order {modulus}")]
    TooManyShares {
        /// Requested share count.
        shares: usize,
        /// Field modulus.
        modulus: u64,
    },
}

/// Evaluates the polynomial with the given coefficients (constant term first)
/// at `x` using Horner's rule.
pub fn evaluate(field: &Field, coefficients: &[u64], x: u64) -> u64 {
    coefficients
        .iter()
        .rev()
        .fold(0, |acc, &c| field.add(field.mul(acc, x), c))
}

/// Draws a random degree-`k` polynomial whose constant term is `secret`.
pub fn random_polynomial<R: Rng + ?Sized>(
    field: &Field,
    secret: u64,
    k: usize,
    rng: &mut R,
) -> Vec<u64> {
    let mut coefficients = Vec::with_capacity(k + 1);
    coefficients.push(secret % field.modulus());
    coefficients.extend((0..k).map(|_| rng.gen_range(0..field.modulus())));
    coefficients
}

/// Splits `vote` into `n` shares on a random degree-`k` polynomial.
///
/// Share `i` (0-based) is the evaluation at server index `i + 1`.  Any `k`
/// shares are uniformly distributed and reveal nothing about the vote; any
/// `k + 1` determine it.
///
/// ```
/// use shamir_tally::{interpolate, secrify, Field, Point};
///
/// let field = Field::new(1997).unwrap();
/// let shares = secrify(&field, 1, 1, 4, &mut rand::thread_rng()).unwrap();
/// let points: Vec<Point> = shares
///     .iter()
///     .enumerate()
///     .map(|(i, &y)| Point::new(i as u64 + 1, y))
///     .collect();
/// assert_eq!(interpolate(&field, 0, &points[..2]).unwrap(), 1);
/// ```
pub fn secrify<R: Rng + ?Sized>(
    field: &Field,
    vote: u64,
    k: usize,
    n: usize,
    rng: &mut R,
) -> Result<Vec<u64>, SharingError> {
    if vote > 1 {
        return Err(SharingError::InvalidVote(vote));
    }
    if k == 0 {
        return Err(SharingError::ZeroDegree);
    }
    if n < k + 1 {
        return Err(SharingError::TooFewShares {
            shares: n,
            degree: k,
        });
    }
    if n as u64 >= field.modulus() {
        return Err(SharingError::TooManyShares {
            shares: n,
            modulus: field.modulus(),
        });
    }
    let poly = random_polynomial(field, vote, k, rng);
    Ok((1..=n as u64).map(|x| evaluate(field, &poly, x)).collect())
}

/// Evaluates at `x` the unique polynomial of degree `< points.len()` through
/// `points`, by Lagrange interpolation.
///
/// Reported values are reduced into the field first.  Distinct
/// x-coordinates guarantee non-zero denominators; a repeated coordinate
/// surfaces as [`ArithmeticError::NotInvertible`].
pub fn interpolate(field: &Field, x: u64, points: &[Point]) -> Result<u64, ArithmeticError> {
    let mut acc = 0;
    for (i, pi) in points.iter().enumerate() {
        let mut num = 1;
        let mut den = 1;
        for (j, pj) in points.iter().enumerate() {
            if i == j {
                continue;
            }
            num = field.mul(num, field.sub(x, pj.x));
            den = field.mul(den, field.sub(pi.x, pj.x));
        }
        let term = field.mul(field.normalize(pi.y), num);
        acc = field.add(acc, field.div(term, den)?);
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn points_of(shares: &[u64]) -> Vec<Point> {
        shares
            .iter()
            .enumerate()
            .map(|(i, &y)| Point::new(i as u64 + 1, y))
            .collect()
    }

    #[test]
    fn horner_matches_direct_evaluation() {
        let field = Field::new(1997).unwrap();
        // 1 + 562x
        assert_eq!(evaluate(&field, &[1, 562], 3), 1687);
        assert_eq!(evaluate(&field, &[1, 562], 4), 2249 % 1997);
        // 3 + 0x + 2x^2
        assert_eq!(evaluate(&field, &[3, 0, 2], 5), 53);
    }

    #[test]
    fn rejects_bad_parameters() {
        let field = Field::new(11).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(
            secrify(&field, 2, 1, 4, &mut rng),
            Err(SharingError::InvalidVote(2))
        );
        assert_eq!(
            secrify(&field, 1, 0, 4, &mut rng),
            Err(SharingError::ZeroDegree)
        );
        assert_eq!(
            secrify(&field, 1, 3, 3, &mut rng),
            Err(SharingError::TooFewShares {
                shares: 3,
                degree: 3
            })
        );
        assert_eq!(
            secrify(&field, 1, 1, 11, &mut rng),
            Err(SharingError::TooManyShares {
                shares: 11,
                modulus: 11
            })
        );
    }

    #[test]
    fn shares_stay_in_field() {
        let field = Field::new(13).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let shares = secrify(&field, 1, 2, 6, &mut rng).unwrap();
            assert!(shares.iter().all(|&s| s < 13));
        }
    }

    #[test]
    fn repeated_coordinate_is_not_invertible() {
        let field = Field::new(1997).unwrap();
        let points = [Point::new(2, 5), Point::new(2, 9)];
        assert!(interpolate(&field, 0, &points).is_err());
    }

    #[test]
    fn interpolation_tolerates_unreduced_values() {
        let field = Field::new(1997).unwrap();
        let points = [Point { x: 1, y: 563 }, Point { x: 2, y: 1125 - 1997 }];
        assert_eq!(interpolate(&field, 0, &points).unwrap(), 1);
    }

    proptest! {
        #[test]
        fn secret_survives_round_trip(
            vote in 0u64..=1,
            p in prop::sample::select(vec![5u64, 7, 11, 101, 991, 1997, 65_537]),
            k in 1usize..4,
            extra in 0usize..3,
            seed in any::<u64>(),
        ) {
            let field = Field::new(p).unwrap();
            let n = k + 1 + extra;
            prop_assume!((n as u64) < p);
            let mut rng = StdRng::seed_from_u64(seed);
            let shares = secrify(&field, vote, k, n, &mut rng).unwrap();
            let points = points_of(&shares);
            prop_assert_eq!(interpolate(&field, 0, &points).unwrap(), vote);
            prop_assert_eq!(interpolate(&field, 0, &points[..=k]).unwrap(), vote);
        }

        #[test]
        fn shares_add_homomorphically(
            vote1 in 0u64..=1,
            vote2 in 0u64..=1,
            seed in any::<u64>(),
        ) {
            let field = Field::new(1997).unwrap();
            let mut rng = StdRng::seed_from_u64(seed);
            let a = secrify(&field, vote1, 1, 4, &mut rng).unwrap();
            let b = secrify(&field, vote2, 1, 4, &mut rng).unwrap();
            let summed: Vec<u64> = a.iter().zip(&b).map(|(&x, &y)| field.add(x, y)).collect();
            let points = points_of(&summed);
            prop_assert_eq!(interpolate(&field, 0, &points[1..3]).unwrap(), vote1 + vote2);
        }
    }
}
