// extremes.rs

use sprs::CsMat;

/// Row minimum reported for a row with no nonzero score. It marks "no data"
/// and must never be read as a real score.
pub const NO_SCORE_MIN: f64 = 9e99;

/// Per-row minimum and maximum nonzero scores of one or more score matrices.
///
/// Rows without any nonzero entry hold `(NO_SCORE_MIN, 0.0)`.
#[derive(Clone, Debug, PartialEq)]
pub struct RowExtremes {
    pub mins: Vec<f64>,
    pub maxes: Vec<f64>,
}

impl RowExtremes {
    pub fn empty(n_rows: usize) -> Self {
        Self {
            mins: vec![NO_SCORE_MIN; n_rows],
            maxes: vec![0.0; n_rows],
        }
    }

    /// Scans the stored entries of `matrix`, visiting only its nonzero structure.
    pub fn scan(matrix: &CsMat<f64>) -> Self {
        let mut extremes = Self::empty(matrix.rows());
        for (&value, (row, _col)) in matrix.iter() {
            if value == 0.0 {
                continue;
            }
            let (min, max) = (&mut extremes.mins[row], &mut extremes.maxes[row]);
            if value < *min {
                *min = value;
            }
            if value > *max {
                *max = value;
            }
        }
        extremes
    }

    /// Elementwise min of the minima and max of the maxima.
    pub fn combine(&mut self, other: &RowExtremes) {
        debug_assert_eq!(self.len(), other.len());
        for (mine, theirs) in self.mins.iter_mut().zip(&other.mins) {
            *mine = mine.min(*theirs);
        }
        for (mine, theirs) in self.maxes.iter_mut().zip(&other.maxes) {
            *mine = mine.max(*theirs);
        }
    }

    pub fn len(&self) -> usize {
        self.mins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mins.is_empty()
    }

    /// Whether `row` saw at least one nonzero score.
    #[inline]
    pub fn has_data(&self, row: usize) -> bool {
        self.maxes[row] > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprs::TriMat;

    fn matrix(shape: (usize, usize), entries: &[(usize, usize, f64)]) -> CsMat<f64> {
        let mut tri = TriMat::new(shape);
        for &(r, c, v) in entries {
            tri.add_triplet(r, c, v);
        }
        tri.to_csr()
    }

    #[test]
    fn scans_nonzero_entries_per_row() {
        let m = matrix((3, 4), &[(0, 1, 5.0), (0, 3, 2.0), (2, 0, 7.5), (2, 2, 0.0)]);
        let ext = RowExtremes::scan(&m);
        assert_eq!(ext.mins, vec![2.0, NO_SCORE_MIN, 7.5]);
        assert_eq!(ext.maxes, vec![5.0, 0.0, 7.5]);
        assert!(ext.has_data(0));
        assert!(!ext.has_data(1));
    }

    #[test]
    fn scan_agrees_with_csc_storage() {
        let m = matrix((2, 3), &[(0, 2, 3.0), (1, 0, 1.0), (1, 1, 4.0)]);
        assert_eq!(RowExtremes::scan(&m), RowExtremes::scan(&m.to_csc()));
    }

    #[test]
    fn combine_takes_elementwise_extremes() {
        let mut a = RowExtremes::scan(&matrix((2, 2), &[(0, 0, 3.0), (0, 1, 9.0)]));
        let b = RowExtremes::scan(&matrix((2, 1), &[(0, 0, 1.0), (1, 0, 4.0)]));
        a.combine(&b);
        assert_eq!(a.mins, vec![1.0, 4.0]);
        assert_eq!(a.maxes, vec![9.0, 4.0]);
    }
}
