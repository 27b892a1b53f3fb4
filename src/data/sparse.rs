// ============================================================
// Layer 4 — Sparse Vectors and CSR Matrices
// ============================================================
// A hashed row touches a few dozen of ~1M columns, so rows are
// stored as (index, value) pairs and a chunk is stacked into
// compressed-sparse-row form:
//
//   indptr  = [0, 3, 5, ...]   row i spans indptr[i]..indptr[i+1]
//   indices = [12, 907, 4410, 12, 77, ...]
//   values  = [1.0, -1.0, 1.0, 1.0, 1.0, ...]

use serde::{Deserialize, Serialize};

/// One sparse row: indices sorted ascending and unique.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f64>,
}

impl SparseVector {
    /// Build from unsorted (index, value) pairs, summing duplicates
    /// and dropping entries that cancel out to zero.
    pub fn from_pairs(mut pairs: Vec<(u32, f64)>) -> Self {
        pairs.sort_unstable_by_key(|&(i, _)| i);

        let mut indices: Vec<u32> = Vec::with_capacity(pairs.len());
        let mut values: Vec<f64> = Vec::with_capacity(pairs.len());

        for (idx, val) in pairs {
            match indices.last() {
                Some(&last) if last == idx => {
                    if let Some(v) = values.last_mut() {
                        *v += val;
                    }
                }
                _ => {
                    indices.push(idx);
                    values.push(val);
                }
            }
        }

        // Opposite-signed collisions can cancel
        let mut out = Self::default();
        for (i, v) in indices.into_iter().zip(values) {
            if v != 0.0 {
                out.indices.push(i);
                out.values.push(v);
            }
        }
        out
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.indices
            .iter()
            .zip(&self.values)
            .map(|(&i, &v)| (i as usize, v))
    }
}

/// Borrowed view of one CSR row.
#[derive(Debug, Clone, Copy)]
pub struct SparseRow<'a> {
    pub indices: &'a [u32],
    pub values: &'a [f64],
}

impl<'a> SparseRow<'a> {
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + 'a {
        self.indices
            .iter()
            .zip(self.values)
            .map(|(&i, &v)| (i as usize, v))
    }

    /// Dot product against a dense weight vector.
    pub fn dot(&self, weights: &[f64]) -> f64 {
        self.iter().map(|(i, v)| weights[i] * v).sum()
    }
}

/// Row-major compressed sparse matrix with a fixed column count.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    n_cols: usize,
    indptr: Vec<usize>,
    indices: Vec<u32>,
    values: Vec<f64>,
}

impl SparseMatrix {
    pub fn new(n_cols: usize) -> Self {
        Self {
            n_cols,
            indptr: vec![0],
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Stack rows; every row must already fit inside `n_cols`.
    pub fn from_rows(n_cols: usize, rows: impl IntoIterator<Item = SparseVector>) -> Self {
        let mut m = Self::new(n_cols);
        for r in rows {
            m.push_row(r);
        }
        m
    }

    pub fn push_row(&mut self, row: SparseVector) {
        debug_assert!(row.indices.iter().all(|&i| (i as usize) < self.n_cols));
        self.indices.extend(row.indices);
        self.values.extend(row.values);
        self.indptr.push(self.indices.len());
    }

    pub fn n_rows(&self) -> usize {
        self.indptr.len() - 1
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn row(&self, i: usize) -> SparseRow<'_> {
        let (start, end) = (self.indptr[i], self.indptr[i + 1]);
        SparseRow {
            indices: &self.indices[start..end],
            values: &self.values[start..end],
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = SparseRow<'_>> + '_ {
        (0..self.n_rows()).map(move |i| self.row(i))
    }

    /// Rows `range` as a new matrix.
    pub fn slice_rows(&self, range: std::ops::Range<usize>) -> Self {
        let mut m = Self::new(self.n_cols);
        for i in range {
            let r = self.row(i);
            m.push_row(SparseVector {
                indices: r.indices.to_vec(),
                values: r.values.to_vec(),
            });
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pairs_sorts_and_sums_collisions() {
        let v = SparseVector::from_pairs(vec![(7, 1.0), (2, 1.0), (7, 1.0), (3, 1.0), (3, -1.0)]);
        assert_eq!(v.indices, vec![2, 7]);
        assert_eq!(v.values, vec![1.0, 2.0]);
    }

    #[test]
    fn test_csr_rows_and_dot() {
        let m = SparseMatrix::from_rows(
            8,
            vec![
                SparseVector::from_pairs(vec![(1, 1.0), (4, 2.0)]),
                SparseVector::default(),
                SparseVector::from_pairs(vec![(7, -1.0)]),
            ],
        );
        assert_eq!(m.n_rows(), 3);
        assert_eq!(m.nnz(), 3);

        let w = [0.0, 0.5, 0.0, 0.0, 0.25, 0.0, 0.0, 2.0];
        assert!((m.row(0).dot(&w) - 1.0).abs() < 1e-12);
        assert_eq!(m.row(1).dot(&w), 0.0);
        assert!((m.row(2).dot(&w) + 2.0).abs() < 1e-12);

        let tail = m.slice_rows(1..3);
        assert_eq!(tail.n_rows(), 2);
        assert_eq!(tail.row(1).indices, &[7]);
    }
}
