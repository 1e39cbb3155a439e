//! On-demand similarity from per-species feature vectors.
//!
//! Nothing is materialized: each chunk of rows `i ∈ range` evaluates
//! `f(x_i, x_j)` for every `j`, checks the values and multiplies them into the
//! abundance columns. Chunks go through the configured [`ChunkBackend`], so the
//! similarity function must be `Send + Sync`.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::arrays::Array;
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::backend::{ChunkBackend, RowBlock};
use crate::chunked::{accumulate, check_coverage, dispatch, partition};
use crate::error::{DiversityError, Result};
use crate::operators::{dot, euclidean_distance, multiply_rows, norm, row};
use crate::similarity::{
    check_species_labels, validate_similarity_rows, AsymmetryScan, SymmetryCheck,
    SELF_SIMILARITY_TOLERANCE,
};

/// Leading species probed for symmetry and self-similarity at construction.
pub const SYMMETRY_PROBE: usize = 32;

pub type SimilarityFn = Arc<dyn Fn(&[f64], &[f64]) -> f64 + Send + Sync>;

/// Built-in similarity kernels over feature vectors.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Kernel {
    /// `max(0, cos(a, b))`; zero vectors are similar only to themselves.
    RectifiedCosine,
    /// `1 / (1 + (d/σ)^p)` with `d` the Euclidean distance.
    InverseDistance { sigma: f64, p: f64 },
}

impl Kernel {
    /// `a` and `b` must have the same length; feature rows are checked at
    /// construction.
    pub(crate) fn evaluate(&self, a: &[f64], b: &[f64]) -> f64 {
        match *self {
            Kernel::RectifiedCosine => {
                let (na, nb) = (norm(a), norm(b));
                if na == 0.0 || nb == 0.0 {
                    return if na == nb { 1.0 } else { 0.0 };
                }
                (dot(a, b) / (na * nb)).clamp(0.0, 1.0)
            }
            Kernel::InverseDistance { sigma, p } => {
                let d = euclidean_distance(a, b);
                1.0 / (1.0 + (d / sigma).powf(p))
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if let Kernel::InverseDistance { sigma, p } = *self {
            if !(sigma.is_finite() && sigma > 0.0) {
                return Err(DiversityError::invalid_value(format!(
                    "kernel scale sigma must be positive, got {sigma}"
                )));
            }
            if !(p.is_finite() && p > 0.0) {
                return Err(DiversityError::invalid_value(format!(
                    "kernel exponent p must be positive, got {p}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct FunctionSimilarity {
    features: Vec<Vec<f64>>,
    function: SimilarityFn,
    chunk_size: usize,
    species: Option<Vec<String>>,
}

impl fmt::Debug for FunctionSimilarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSimilarity")
            .field("n_species", &self.features.len())
            .field("n_features", &self.features.first().map_or(0, Vec::len))
            .field("chunk_size", &self.chunk_size)
            .field("species", &self.species)
            .finish_non_exhaustive()
    }
}

impl FunctionSimilarity {
    /// `features` is species × features; `function` maps two feature rows to a
    /// non-negative similarity.
    pub fn new<F>(
        features: &DenseMatrix<f64>,
        function: F,
        chunk_size: usize,
        symmetry: SymmetryCheck,
    ) -> Result<Self>
    where
        F: Fn(&[f64], &[f64]) -> f64 + Send + Sync + 'static,
    {
        let (n, d) = features.shape();
        info!(
            "Building on-demand similarity: {} species with {} features, chunk size {}",
            n, d, chunk_size
        );
        if n == 0 || d == 0 {
            return Err(DiversityError::input_shape(format!(
                "feature matrix must be non-empty, got {n}x{d}"
            )));
        }
        if chunk_size == 0 {
            return Err(DiversityError::invalid_value("chunk size must be positive"));
        }
        let rows: Vec<Vec<f64>> = (0..n).map(|i| row(features, i)).collect();
        if let Some(v) = rows.iter().flatten().find(|v| !v.is_finite()) {
            return Err(DiversityError::invalid_value(format!(
                "non-finite feature value {v}"
            )));
        }

        let similarity = Self {
            features: rows,
            function: Arc::new(function),
            chunk_size,
            species: None,
        };
        similarity.probe(symmetry)?;
        Ok(similarity)
    }

    pub fn from_kernel(
        features: &DenseMatrix<f64>,
        kernel: Kernel,
        chunk_size: usize,
        symmetry: SymmetryCheck,
    ) -> Result<Self> {
        kernel.validate()?;
        debug!("Using kernel {:?}", kernel);
        Self::new(features, move |a, b| kernel.evaluate(a, b), chunk_size, symmetry)
    }

    pub fn with_species(mut self, species: Vec<String>) -> Result<Self> {
        check_species_labels(&species, self.n_species())?;
        self.species = Some(species);
        Ok(self)
    }

    pub fn n_species(&self) -> usize {
        self.features.len()
    }

    pub fn species(&self) -> Option<&[String]> {
        self.species.as_deref()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Similarity rows `range` (row-major, `range.len() × n`), validated.
    pub fn rows(&self, range: Range<usize>) -> Result<Vec<f64>> {
        let n = self.n_species();
        let mut values = Vec::with_capacity(range.len() * n);
        for i in range.clone() {
            let xi = &self.features[i];
            values.extend(self.features.iter().map(|xj| (self.function)(xi, xj)));
        }
        validate_similarity_rows(&values, range.start, n)?;
        Ok(values)
    }

    /// Symmetry and self-similarity on the leading species.
    fn probe(&self, symmetry: SymmetryCheck) -> Result<()> {
        let m = self.n_species().min(SYMMETRY_PROBE);
        let mut scan = AsymmetryScan::default();
        let mut off_diagonal = 0usize;
        for i in 0..m {
            let xi = &self.features[i];
            let sii = (self.function)(xi, xi);
            check_value(i, i, sii)?;
            if (sii - 1.0).abs() > SELF_SIMILARITY_TOLERANCE {
                off_diagonal += 1;
            }
            for j in (i + 1)..m {
                let xj = &self.features[j];
                let forward = (self.function)(xi, xj);
                let backward = (self.function)(xj, xi);
                check_value(i, j, forward)?;
                check_value(j, i, backward)?;
                if symmetry.differs(forward, backward) {
                    scan.record(i, j, forward, backward);
                }
            }
        }
        if off_diagonal > 0 {
            warn!(
                "Similarity function: {} of {} probed self-similarities differ from 1",
                off_diagonal, m
            );
        }
        trace!("Probed {} leading species", m);
        symmetry.enforce("similarity function", scan)
    }

    pub(crate) fn weighted_sum(
        &self,
        rhs: &[f64],
        k: usize,
        backend: &dyn ChunkBackend,
    ) -> Result<Vec<f64>> {
        let n = self.n_species();
        let ranges = partition(n, self.chunk_size)?;
        check_coverage(n, &ranges)?;
        let job = |range: Range<usize>| -> Result<RowBlock> {
            let values = self.rows(range.clone())?;
            trace!("Evaluated similarity rows {}..{}", range.start, range.end);
            Ok(RowBlock::new(range, k, multiply_rows(&values, n, rhs, k)))
        };
        debug!(
            "Dispatching {} on-demand chunks to {} backend",
            ranges.len(),
            backend.name()
        );
        let partials = dispatch(backend, &job, &ranges)?;
        accumulate(n, k, partials)
    }
}

fn check_value(i: usize, j: usize, v: f64) -> Result<()> {
    if !v.is_finite() || v < 0.0 {
        return Err(DiversityError::invalid_value(format!(
            "similarity function produced s({i},{j})={v}"
        )));
    }
    Ok(())
}
