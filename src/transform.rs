// transform.rs

use crate::error::{DistanceError, Result};
use ndarray::Array2;
use rayon::prelude::*;

/// Distance for a gene pair with no scoring evidence in either direction.
/// Serialization replaces it with a value just beyond the most distant known pair.
pub const UNKNOWN_DISTANCE: f64 = f64::NEG_INFINITY;

#[inline]
pub fn is_unknown(distance: f64) -> bool {
    distance == UNKNOWN_DISTANCE || distance.is_nan()
}

/// `-ln(a + b)` for the two half contributions of a gene pair, or
/// `UNKNOWN_DISTANCE` when neither direction contributed anything.
#[inline]
pub fn pair_distance(forward: f64, reverse: f64) -> f64 {
    let similarity = forward + reverse;
    if similarity > 0.0 {
        -similarity.ln()
    } else {
        UNKNOWN_DISTANCE
    }
}

/// Converts a scattered matrix into symmetric distances in place and returns
/// the largest finite distance it produced (`0.0` if none).
///
/// The diagonal is left as is. Both halves of each pair are read before either
/// cell is overwritten.
pub fn finalize(matrix: &mut Array2<f64>) -> Result<f64> {
    let (n, cols) = matrix.dim();
    if n != cols {
        return Err(DistanceError::DimensionMismatch(format!(
            "cannot finalize a non-square {}x{} matrix",
            n, cols
        )));
    }
    let mut max_finite = 0.0_f64;
    for i in 0..n {
        for j in 0..i {
            let distance = pair_distance(matrix[[i, j]], matrix[[j, i]]);
            matrix[[i, j]] = distance;
            matrix[[j, i]] = distance;
            if !is_unknown(distance) {
                max_finite = max_finite.max(distance);
            }
        }
    }
    Ok(max_finite)
}

/// Finalizes every matrix. Orthogroups are independent, so they run in parallel;
/// each matrix is still transformed sequentially.
pub fn finalize_all(matrices: &mut [Array2<f64>]) -> Result<Vec<f64>> {
    matrices.par_iter_mut().map(finalize).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn full_similarity_is_zero_distance() {
        let mut m = array![[0.0, 0.5], [0.5, 0.0]];
        let max = finalize(&mut m).unwrap();
        assert_eq!(m[[0, 1]], 0.0);
        assert_eq!(m[[1, 0]], 0.0);
        assert_eq!(max, 0.0);
    }

    #[test]
    fn uses_both_halves_before_overwriting() {
        let mut m = array![
            [0.0, 0.1, 0.2],
            [0.3, 0.0, 0.05],
            [0.25, 0.15, 0.0],
        ];
        let max = finalize(&mut m).unwrap();
        assert_eq!(m[[1, 0]], -(0.1_f64 + 0.3).ln());
        assert_eq!(m[[2, 0]], -(0.2_f64 + 0.25).ln());
        assert_eq!(m[[2, 1]], -(0.05_f64 + 0.15).ln());
        assert_eq!(max, -(0.05_f64 + 0.15).ln());
    }

    #[test]
    fn finalized_matrix_is_symmetric() {
        let mut m = Array2::from_shape_fn((5, 5), |(i, j)| ((i * 5 + j) % 7) as f64 / 14.0);
        finalize(&mut m).unwrap();
        for i in 0..5 {
            for j in 0..5 {
                let (a, b) = (m[[i, j]], m[[j, i]]);
                assert!(a == b || (is_unknown(a) && is_unknown(b)));
            }
        }
    }

    #[test]
    fn no_evidence_becomes_unknown_sentinel() {
        let mut m = array![[0.0, 0.0, 0.4], [0.0, 0.0, 0.0], [0.1, 0.0, 0.0]];
        let max = finalize(&mut m).unwrap();
        assert!(is_unknown(m[[0, 1]]));
        assert!(is_unknown(m[[1, 0]]));
        assert!(is_unknown(m[[1, 2]]));
        assert_eq!(max, -(0.5_f64).ln());
        assert!(max.is_finite());
    }

    #[test]
    fn one_sided_evidence_is_still_finite() {
        assert_eq!(pair_distance(0.5, 0.0), -(0.5_f64).ln());
        assert!(is_unknown(pair_distance(0.0, 0.0)));
    }

    #[test]
    fn rejects_non_square_and_handles_many() {
        let mut bad = Array2::<f64>::zeros((2, 3));
        assert!(finalize(&mut bad).is_err());

        let mut many = vec![array![[0.0, 0.25], [0.25, 0.0]], array![[0.0]]];
        let maxes = finalize_all(&mut many).unwrap();
        assert_eq!(maxes, vec![-(0.5_f64).ln(), 0.0]);
    }
}
