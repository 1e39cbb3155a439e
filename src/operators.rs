//! Dense helpers shared by the similarity providers and the aggregator.
//!
//! - Row-major construction of `DenseMatrix<f64>`
//! - Row/column extraction without going through smartcore views at call sites
//! - Row-block products `Z[rows, :] · A` used by every similarity variant

use smartcore::linalg::basic::arrays::{Array, Array2};
use smartcore::linalg::basic::matrix::DenseMatrix;

/// Build a matrix from row-major values. `values.len()` must be `nrows * ncols`.
#[inline]
pub fn dense(nrows: usize, ncols: usize, values: Vec<f64>) -> DenseMatrix<f64> {
    debug_assert_eq!(values.len(), nrows * ncols);
    DenseMatrix::from_iterator(values.into_iter(), nrows, ncols, 0)
}

/// Row-major copy of the whole matrix.
pub fn to_row_major(m: &DenseMatrix<f64>) -> Vec<f64> {
    let (nrows, ncols) = m.shape();
    let mut out = Vec::with_capacity(nrows * ncols);
    for i in 0..nrows {
        out.extend(m.get_row(i).iterator(0).copied());
    }
    out
}

/// Copy of row `i`.
#[inline]
pub fn row(m: &DenseMatrix<f64>, i: usize) -> Vec<f64> {
    m.get_row(i).iterator(0).copied().collect()
}

/// Copy of column `j`.
#[inline]
pub fn column(m: &DenseMatrix<f64>, j: usize) -> Vec<f64> {
    let nrows = m.shape().0;
    (0..nrows).map(|i| *m.get((i, j))).collect()
}

pub fn column_sums(m: &DenseMatrix<f64>) -> Vec<f64> {
    let (nrows, ncols) = m.shape();
    let mut sums = vec![0.0; ncols];
    for i in 0..nrows {
        for (j, s) in sums.iter_mut().enumerate() {
            *s += *m.get((i, j));
        }
    }
    sums
}

pub fn row_sums(m: &DenseMatrix<f64>) -> Vec<f64> {
    let (nrows, ncols) = m.shape();
    (0..nrows)
        .map(|i| (0..ncols).map(|j| *m.get((i, j))).sum())
        .collect()
}

/// Product of a block of similarity rows with the abundance matrix.
///
/// `rows` holds `r` rows of length `n` (row-major), `rhs_row_major` is the
/// `n × k` abundance matrix flattened row-major. Returns `r × k` row-major.
pub fn multiply_rows(rows: &[f64], n: usize, rhs_row_major: &[f64], k: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    debug_assert_eq!(rows.len() % n, 0);
    debug_assert_eq!(rhs_row_major.len(), n * k);
    let r = rows.len() / n;
    let mut out = vec![0.0; r * k];
    for (i, zrow) in rows.chunks_exact(n).enumerate() {
        let acc = &mut out[i * k..(i + 1) * k];
        for (j, &z) in zrow.iter().enumerate() {
            if z == 0.0 {
                continue;
            }
            let arow = &rhs_row_major[j * k..(j + 1) * k];
            for (a, &x) in acc.iter_mut().zip(arow) {
                *a += z * x;
            }
        }
    }
    out
}

/// Euclidean norm (L2) without allocating.
#[inline]
pub fn norm(a: &[f64]) -> f64 {
    a.iter().map(|&x| x * x).sum::<f64>().sqrt()
}

#[inline]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len(), "vectors must have identical length");
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[inline]
pub fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len(), "vectors must have identical length");
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}
