//! Minimal dense linear algebra for the Markov analyzer.
//!
//! Partial-pivoted Gauss-Jordan inversion, sized for the 4x4 transient
//! sub-matrix of the task state chain. The pivot threshold doubles as a
//! cheap singularity guard; callers also get a condition estimate
//! (max/min absolute pivot) to report near-singular systems.

/// Pivots with absolute value below this are treated as zero.
pub const PIVOT_THRESHOLD: f64 = 1e-10;

/// Inversion output: the inverse plus a rough condition estimate.
#[derive(Clone, Debug)]
pub struct Inversion {
    pub inverse: Vec<Vec<f64>>,
    /// max |pivot| / min |pivot| across elimination steps.
    pub condition_estimate: f64,
}

/// A matrix the elimination could not invert.
#[derive(Clone, Debug, PartialEq)]
pub struct SingularMatrix {
    /// Column where no usable pivot remained.
    pub column: usize,
}

impl std::fmt::Display for SingularMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "matrix is singular at column {}", self.column)
    }
}

impl std::error::Error for SingularMatrix {}

/// Invert a square matrix by Gauss-Jordan elimination with partial pivoting.
pub fn invert(matrix: &[Vec<f64>]) -> Result<Inversion, SingularMatrix> {
    let n = matrix.len();
    debug_assert!(matrix.iter().all(|row| row.len() == n));

    // Augment [A | I].
    let mut work: Vec<Vec<f64>> = matrix
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let mut augmented = row.clone();
            augmented.extend((0..n).map(|j| if i == j { 1.0 } else { 0.0 }));
            augmented
        })
        .collect();

    let mut min_pivot = f64::INFINITY;
    let mut max_pivot: f64 = 0.0;

    for col in 0..n {
        // Partial pivoting: bring the largest remaining entry up.
        let pivot_row = (col..n)
            .max_by(|&a, &b| {
                work[a][col]
                    .abs()
                    .partial_cmp(&work[b][col].abs())
                    .expect("matrix entries are finite")
            })
            .expect("non-empty column range");
        let pivot = work[pivot_row][col];
        if pivot.abs() < PIVOT_THRESHOLD {
            return Err(SingularMatrix { column: col });
        }
        work.swap(col, pivot_row);
        min_pivot = min_pivot.min(pivot.abs());
        max_pivot = max_pivot.max(pivot.abs());

        let inv_pivot = 1.0 / pivot;
        for value in &mut work[col] {
            *value *= inv_pivot;
        }
        let pivot_values = work[col].clone();
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = work[row][col];
            if factor == 0.0 {
                continue;
            }
            for (value, pivot_value) in work[row].iter_mut().zip(&pivot_values) {
                *value -= factor * pivot_value;
            }
        }
    }

    let inverse = work.into_iter().map(|row| row[n..].to_vec()).collect();
    let condition_estimate = if min_pivot > 0.0 {
        max_pivot / min_pivot
    } else {
        f64::INFINITY
    };
    Ok(Inversion {
        inverse,
        condition_estimate,
    })
}

/// y = M x
pub fn mat_vec(matrix: &[Vec<f64>], x: &[f64]) -> Vec<f64> {
    matrix
        .iter()
        .map(|row| row.iter().zip(x).map(|(m, v)| m * v).sum())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn identity_inverts_to_itself() {
        let identity = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let result = invert(&identity).unwrap();
        assert_close(result.inverse[0][0], 1.0);
        assert_close(result.inverse[0][1], 0.0);
        assert_close(result.condition_estimate, 1.0);
    }

    #[test]
    fn known_2x2_inverse() {
        // [[4, 7], [2, 6]]^-1 = [[0.6, -0.7], [-0.2, 0.4]]
        let m = vec![vec![4.0, 7.0], vec![2.0, 6.0]];
        let result = invert(&m).unwrap();
        assert_close(result.inverse[0][0], 0.6);
        assert_close(result.inverse[0][1], -0.7);
        assert_close(result.inverse[1][0], -0.2);
        assert_close(result.inverse[1][1], 0.4);
    }

    #[test]
    fn product_with_inverse_is_identity() {
        let m = vec![
            vec![2.0, 1.0, 0.0],
            vec![1.0, 3.0, 1.0],
            vec![0.0, 1.0, 4.0],
        ];
        let result = invert(&m).unwrap();
        for i in 0..3 {
            let unit = mat_vec(&m, &result.inverse.iter().map(|r| r[i]).collect::<Vec<_>>());
            for (j, value) in unit.iter().enumerate() {
                assert_close(*value, if i == j { 1.0 } else { 0.0 });
            }
        }
    }

    #[test]
    fn singular_matrix_is_reported() {
        let m = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        assert!(invert(&m).is_err());
    }

    #[test]
    fn pivoting_handles_zero_diagonal() {
        let m = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
        let result = invert(&m).unwrap();
        assert_close(result.inverse[0][1], 1.0);
        assert_close(result.inverse[1][0], 1.0);
    }
}
