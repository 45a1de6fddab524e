//! Gaussian elimination over a prime field.
//!
//! Real-valued elimination picks the pivot of largest magnitude for
//! numerical stability.  In Z_p every non-zero element is equally good, so
//! the pivot is simply the first row (at or below the diagonal) whose entry
//! in the current column is non-zero.  Division is multiplication by the
//! field inverse.

use crate::field::{ArithmeticError, Field};
use thiserror::Error;

/// Errors raised by [`solve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SolveError {
    /// The matrix is not square or does not match the right-hand side.
    #[error("expected a square system, got {rows}x{cols} with {rhs} right-hand values")]
    Shape {
        /// Number of rows.
        rows: usize,
        /// Length of the first row.
        cols: usize,
        /// Length of the right-hand side.
        rhs: usize,
    },
    /// No non-zero pivot exists for the given column.
    #[error("system is singular at column {0}")]
    Singular(usize),
    /// A field inverse failed (unreachable for a checked pivot).
    #[error(transparent)]
    Arithmetic(#[from] ArithmeticError),
}

/// Solves `matrix · x = rhs` over `field` for a square, non-singular system.
///
/// Entries are reduced modulo `p` on entry, so callers may pass unreduced
/// values.
pub fn solve(field: &Field, matrix: &[Vec<u64>], rhs: &[u64]) -> Result<Vec<u64>, SolveError> {
    let n = matrix.len();
    let cols = matrix.first().map_or(0, Vec::len);
    if rhs.len() != n || matrix.iter().any(|row| row.len() != n) {
        return Err(SolveError::Shape {
            rows: n,
            cols,
            rhs: rhs.len(),
        });
    }

    // Augmented matrix [A | b], reduced into the field.
    let mut aug: Vec<Vec<u64>> = matrix
        .iter()
        .zip(rhs)
        .map(|(row, &b)| {
            row.iter()
                .chain(std::iter::once(&b))
                .map(|&v| v % field.modulus())
                .collect()
        })
        .collect();

    for col in 0..n {
        let pivot = (col..n)
            .find(|&r| aug[r][col] != 0)
            .ok_or(SolveError::Singular(col))?;
        aug.swap(col, pivot);
        let inv = field.inverse(aug[col][col])?;
        for r in col + 1..n {
            let factor = field.mul(aug[r][col], inv);
            if factor == 0 {
                continue;
            }
            for c in col..=n {
                let scaled = field.mul(factor, aug[col][c]);
                aug[r][c] = field.sub(aug[r][c], scaled);
            }
        }
    }

    back_substitute(field, &aug)
}

/// Solves an upper-triangular augmented system.
fn back_substitute(field: &Field, aug: &[Vec<u64>]) -> Result<Vec<u64>, SolveError> {
    let n = aug.len();
    let mut x = vec![0u64; n];
    for i in (0..n).rev() {
        let dot = field.sum((i + 1..n).map(|j| field.mul(aug[i][j], x[j])));
        let num = field.sub(aug[i][n], dot);
        x[i] = field.div(num, aug[i][i])?;
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_small_system() {
        let field = Field::new(13).unwrap();
        // x + 2y = 5, 3x + 4y = 6  (mod 13)
        let m = vec![vec![1, 2], vec![3, 4]];
        let x = solve(&field, &m, &[5, 6]).unwrap();
        assert_eq!(field.add(x[0], field.mul(2, x[1])), 5);
        assert_eq!(field.add(field.mul(3, x[0]), field.mul(4, x[1])), 6);
    }

    #[test]
    fn swaps_rows_for_zero_pivot() {
        let field = Field::new(7).unwrap();
        let m = vec![vec![0, 1], vec![1, 0]];
        assert_eq!(solve(&field, &m, &[3, 4]).unwrap(), vec![4, 3]);
    }

    #[test]
    fn reports_singular_systems() {
        let field = Field::new(7).unwrap();
        let m = vec![vec![1, 2], vec![2, 4]];
        assert_eq!(solve(&field, &m, &[1, 2]), Err(SolveError::Singular(1)));
        // Singular only modulo p: 7 ≡ 0.
        let m = vec![vec![7, 0], vec![0, 1]];
        assert_eq!(solve(&field, &m, &[1, 1]), Err(SolveError::Singular(0)));
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let field = Field::new(7).unwrap();
        let m = vec![vec![1, 2, 3], vec![2, 4, 1]];
        assert!(matches!(
            solve(&field, &m, &[1, 2]),
            Err(SolveError::Shape { rows: 2, .. })
        ));
    }
}
