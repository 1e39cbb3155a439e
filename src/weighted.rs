//! Similarity-weighted relative abundances.
//!
//! For an abundance model (P, p, w) and a similarity Z this computes
//!
//! - `Z·P`  one column per subcommunity
//! - `Z·p`  the pooled metacommunity
//! - `Z·P̄`  derived column-wise as `(Z·P)_j / w_j` for non-empty subcommunities
//!
//! These are independent of the viewpoint, so a single computation serves
//! every requested viewpoint and measure.

use log::{debug, info};
use smartcore::linalg::basic::arrays::Array;
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::abundance::Abundance;
use crate::backend::ChunkBackend;
use crate::error::{DiversityError, Result};
use crate::operators::{dense, to_row_major};
use crate::similarity::Similarity;

#[derive(Clone, Debug)]
pub struct WeightedAbundance {
    subcommunity: DenseMatrix<f64>,
    normalized_subcommunity: DenseMatrix<f64>,
    metacommunity: Vec<f64>,
}

impl WeightedAbundance {
    pub fn compute(
        abundance: &Abundance,
        similarity: &Similarity,
        backend: &dyn ChunkBackend,
    ) -> Result<Self> {
        let (n, k) = (abundance.n_species(), abundance.n_subcommunities());
        info!(
            "Computing similarity-weighted abundances ({} similarity, {} backend)",
            similarity.kind(),
            backend.name()
        );
        if let Some(expected) = similarity.n_species() {
            if expected != n {
                return Err(DiversityError::input_shape(format!(
                    "abundance has {n} species, similarity has {expected}"
                )));
            }
        }

        let subcommunity = similarity.weighted_sum(abundance.subcommunity_abundance(), backend)?;
        let metacommunity =
            similarity.weighted_sum_vector(abundance.metacommunity_abundance(), backend)?;

        let weights = abundance.subcommunity_weights();
        let zp = to_row_major(&subcommunity);
        let normalized: Vec<f64> = zp
            .iter()
            .enumerate()
            .map(|(idx, &v)| {
                let w = weights[idx % k];
                if w > 0.0 {
                    v / w
                } else {
                    0.0
                }
            })
            .collect();
        let normalized_subcommunity = dense(n, k, normalized);

        debug!(
            "Weighted abundances ready: {:?} subcommunity, {} metacommunity entries",
            subcommunity.shape(),
            metacommunity.len()
        );
        Ok(Self {
            subcommunity,
            normalized_subcommunity,
            metacommunity,
        })
    }

    /// `Z·P`, species × subcommunities.
    pub fn subcommunity(&self) -> &DenseMatrix<f64> {
        &self.subcommunity
    }

    /// `Z·P̄`, species × subcommunities.
    pub fn normalized_subcommunity(&self) -> &DenseMatrix<f64> {
        &self.normalized_subcommunity
    }

    /// `Z·p`.
    pub fn metacommunity(&self) -> &[f64] {
        &self.metacommunity
    }
}
