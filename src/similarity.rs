//! Similarity providers.
//!
//! Consumers see a single logical matrix Z through [`Similarity::weighted_sum`],
//! which returns `Z · A` for an abundance matrix `A` (species × columns), all
//! columns in one pass. How Z is stored is the variant's business:
//!
//! - [`Similarity::Identity`]: Z = I, frequency-sensitive diversity
//! - [`Similarity::Matrix`]: fully resident matrix
//! - [`Similarity::Chunked`]: row blocks in memory or streamed from a file
//! - [`Similarity::Function`]: evaluated on demand from feature vectors
//!
//! Validation (shape, finiteness, non-negativity, symmetry) happens when a
//! provider is constructed.

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::arrays::Array;
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::backend::ChunkBackend;
use crate::chunked::ChunkedSimilarity;
use crate::error::{DiversityError, Result};
use crate::function::FunctionSimilarity;
use crate::operators::{dense, multiply_rows, to_row_major};

pub const SYMMETRY_TOLERANCE: f64 = 1e-8;

/// Self-similarity is expected to be 1; deviations larger than this are logged.
pub const SELF_SIMILARITY_TOLERANCE: f64 = 1e-8;

/// What to do when similarity(i, j) != similarity(j, i).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum SymmetryCheck {
    /// Reject asymmetric sources with [`DiversityError::Asymmetric`].
    Strict { tolerance: f64 },
    /// Accept asymmetric sources and flag them in the log.
    Warn { tolerance: f64 },
}

impl Default for SymmetryCheck {
    fn default() -> Self {
        SymmetryCheck::Strict {
            tolerance: SYMMETRY_TOLERANCE,
        }
    }
}

/// First asymmetric pair found by a scan plus how many pairs were off.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct AsymmetryScan {
    pub first: Option<(usize, usize, f64, f64)>,
    pub count: usize,
}

impl AsymmetryScan {
    pub fn record(&mut self, row: usize, col: usize, forward: f64, backward: f64) {
        if self.first.is_none() {
            self.first = Some((row, col, forward, backward));
        }
        self.count += 1;
    }

    pub fn merge(&mut self, other: AsymmetryScan) {
        if self.first.is_none() {
            self.first = other.first;
        }
        self.count += other.count;
    }
}

impl SymmetryCheck {
    pub fn tolerance(&self) -> f64 {
        match *self {
            SymmetryCheck::Strict { tolerance } | SymmetryCheck::Warn { tolerance } => tolerance,
        }
    }

    #[inline]
    pub(crate) fn differs(&self, forward: f64, backward: f64) -> bool {
        (forward - backward).abs() > self.tolerance() * forward.abs().max(backward.abs()).max(1.0)
    }

    /// Turn a scan into an error (strict) or a warning (warn).
    pub(crate) fn enforce(&self, source: &str, scan: AsymmetryScan) -> Result<()> {
        let Some((row, col, forward, backward)) = scan.first else {
            return Ok(());
        };
        match self {
            SymmetryCheck::Strict { .. } => Err(DiversityError::Asymmetric {
                row,
                col,
                forward,
                backward,
            }),
            SymmetryCheck::Warn { .. } => {
                warn!(
                    "{}: {} asymmetric pairs, first s({},{})={} vs s({},{})={}",
                    source, scan.count, row, col, forward, col, row, backward
                );
                Ok(())
            }
        }
    }
}

/// Check a row-major block of similarity values starting at row `offset`.
pub(crate) fn validate_similarity_rows(values: &[f64], offset: usize, n: usize) -> Result<()> {
    for (idx, &v) in values.iter().enumerate() {
        let (i, j) = (offset + idx / n, idx % n);
        if !v.is_finite() {
            return Err(DiversityError::invalid_value(format!(
                "non-finite similarity {v} at ({i},{j})"
            )));
        }
        if v < 0.0 {
            return Err(DiversityError::invalid_value(format!(
                "negative similarity {v} at ({i},{j})"
            )));
        }
    }
    Ok(())
}

/// Log diagonal entries that are not 1. Returns how many were off.
pub(crate) fn check_self_similarity(values: &[f64], offset: usize, n: usize) -> usize {
    let rows = values.len() / n.max(1);
    let mut off = 0;
    for r in 0..rows {
        let i = offset + r;
        if i >= n {
            break;
        }
        let v = values[r * n + i];
        if (v - 1.0).abs() > SELF_SIMILARITY_TOLERANCE {
            if off == 0 {
                warn!("Self-similarity s({},{})={} differs from 1", i, i, v);
            }
            off += 1;
        }
    }
    off
}

pub(crate) fn check_species_labels(labels: &[String], n: usize) -> Result<()> {
    if labels.len() != n {
        return Err(DiversityError::input_shape(format!(
            "{} species labels for a {n}x{n} similarity",
            labels.len()
        )));
    }
    Ok(())
}

/// A fully resident similarity matrix.
#[derive(Clone, Debug)]
pub struct SimilarityMatrix {
    n: usize,
    /// Row-major `n × n`; the input matrix is consumed.
    values: Vec<f64>,
    species: Option<Vec<String>>,
}

impl SimilarityMatrix {
    pub fn new(matrix: DenseMatrix<f64>) -> Result<Self> {
        Self::with_policy(matrix, SymmetryCheck::default())
    }

    pub fn with_policy(matrix: DenseMatrix<f64>, symmetry: SymmetryCheck) -> Result<Self> {
        let (nrows, ncols) = matrix.shape();
        info!("Validating {}x{} similarity matrix", nrows, ncols);
        if nrows != ncols {
            return Err(DiversityError::input_shape(format!(
                "similarity matrix must be square, got {nrows}x{ncols}"
            )));
        }
        if nrows == 0 {
            return Err(DiversityError::input_shape("similarity matrix is empty"));
        }
        let n = nrows;
        let values = to_row_major(&matrix);
        drop(matrix);
        validate_similarity_rows(&values, 0, n)?;
        check_self_similarity(&values, 0, n);

        let mut scan = AsymmetryScan::default();
        for i in 0..n {
            for j in (i + 1)..n {
                let (forward, backward) = (values[i * n + j], values[j * n + i]);
                if symmetry.differs(forward, backward) {
                    scan.record(i, j, forward, backward);
                }
            }
        }
        symmetry.enforce("similarity matrix", scan)?;
        debug!("Similarity matrix validated ({} asymmetric pairs)", scan.count);

        Ok(Self {
            n,
            values,
            species: None,
        })
    }

    /// Attach species labels (one per row/column) for alignment by key.
    pub fn with_species(mut self, species: Vec<String>) -> Result<Self> {
        check_species_labels(&species, self.n_species())?;
        self.species = Some(species);
        Ok(self)
    }

    pub fn n_species(&self) -> usize {
        self.n
    }

    pub fn species(&self) -> Option<&[String]> {
        self.species.as_deref()
    }

    pub(crate) fn weighted_sum(&self, rhs_row_major: &[f64], k: usize) -> Vec<f64> {
        let n = self.n_species();
        trace!("Materialized product: {}x{} · {}x{}", n, n, n, k);
        multiply_rows(&self.values, n, rhs_row_major, k)
    }
}

#[derive(Debug)]
pub enum Similarity {
    Identity,
    Matrix(SimilarityMatrix),
    Chunked(ChunkedSimilarity),
    Function(FunctionSimilarity),
}

impl From<SimilarityMatrix> for Similarity {
    fn from(m: SimilarityMatrix) -> Self {
        Similarity::Matrix(m)
    }
}

impl From<ChunkedSimilarity> for Similarity {
    fn from(c: ChunkedSimilarity) -> Self {
        Similarity::Chunked(c)
    }
}

impl From<FunctionSimilarity> for Similarity {
    fn from(f: FunctionSimilarity) -> Self {
        Similarity::Function(f)
    }
}

impl Similarity {
    /// Size of the element-type index space; `None` for the identity, which
    /// adapts to any abundance model.
    pub fn n_species(&self) -> Option<usize> {
        match self {
            Similarity::Identity => None,
            Similarity::Matrix(m) => Some(m.n_species()),
            Similarity::Chunked(c) => Some(c.n_species()),
            Similarity::Function(f) => Some(f.n_species()),
        }
    }

    pub fn species(&self) -> Option<&[String]> {
        match self {
            Similarity::Identity => None,
            Similarity::Matrix(m) => m.species(),
            Similarity::Chunked(c) => c.species(),
            Similarity::Function(f) => f.species(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Similarity::Identity => "identity",
            Similarity::Matrix(_) => "matrix",
            Similarity::Chunked(_) => "chunked",
            Similarity::Function(_) => "function",
        }
    }

    /// `Z · abundance` for an abundance matrix of shape species × columns.
    pub fn weighted_sum(
        &self,
        abundance: &DenseMatrix<f64>,
        backend: &dyn ChunkBackend,
    ) -> Result<DenseMatrix<f64>> {
        let (n, k) = abundance.shape();
        let rhs = to_row_major(abundance);
        let out = self.weighted_sum_row_major(&rhs, n, k, backend)?;
        Ok(dense(n, k, out))
    }

    /// `Z · abundance` for a single abundance vector.
    pub fn weighted_sum_vector(
        &self,
        abundance: &[f64],
        backend: &dyn ChunkBackend,
    ) -> Result<Vec<f64>> {
        self.weighted_sum_row_major(abundance, abundance.len(), 1, backend)
    }

    fn weighted_sum_row_major(
        &self,
        rhs: &[f64],
        n: usize,
        k: usize,
        backend: &dyn ChunkBackend,
    ) -> Result<Vec<f64>> {
        if let Some(expected) = self.n_species() {
            if n != expected {
                return Err(DiversityError::input_shape(format!(
                    "abundance has {n} species, similarity has {expected}"
                )));
            }
        }
        if let Some(v) = rhs.iter().find(|v| !v.is_finite()) {
            return Err(DiversityError::invalid_value(format!(
                "non-finite abundance {v} passed to weighted sum"
            )));
        }
        debug!(
            "Weighted sum via {} similarity: {} species x {} columns",
            self.kind(),
            n,
            k
        );
        match self {
            Similarity::Identity => Ok(rhs.to_vec()),
            Similarity::Matrix(m) => Ok(m.weighted_sum(rhs, k)),
            Similarity::Chunked(c) => c.weighted_sum(rhs, k, backend),
            Similarity::Function(f) => f.weighted_sum(rhs, k, backend),
        }
    }
}
