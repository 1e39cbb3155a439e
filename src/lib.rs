//! # hillspace
//!
//! Similarity-sensitive diversity of a population partitioned into
//! subcommunities, after Leinster & Cobbold and Reeve et al.
//!
//! A [`Metacommunity`] pairs an [`Abundance`] model (counts of element types
//! per subcommunity) with a [`Similarity`] between element types, and answers
//! the alpha, rho, beta and gamma families (plus their normalized variants)
//! at any viewpoint q:
//!
//! - q = 0 weighs rare and common types alike (richness)
//! - q = 1 is the exponential of Shannon entropy
//! - q = 2 relates to the Simpson concentration
//! - q = ∞ looks at the dominant type only
//!
//! With the identity similarity every measure reduces to a classical Hill
//! number.
//!
//! The similarity can be a resident matrix, row blocks held in memory or
//! streamed from a delimited file, or a function evaluated on demand over
//! feature vectors. Chunked sources are dispatched through a [`ChunkBackend`]
//! ([`SequentialBackend`] by default, [`RayonBackend`] for parallel chunks).
//!
//! ```no_run
//! use hillspace::{Abundance, Measure, MetacommunityBuilder};
//! use smartcore::linalg::basic::matrix::DenseMatrix;
//!
//! # fn main() -> hillspace::Result<()> {
//! let abundance = Abundance::from_records([
//!     ("north", "oak", 10.0),
//!     ("north", "ash", 2.0),
//!     ("south", "ash", 6.0),
//! ])?;
//! let similarity = DenseMatrix::from_2d_vec(&vec![vec![1.0, 0.3], vec![0.3, 1.0]]).unwrap();
//!
//! let (meta, _) = MetacommunityBuilder::new()
//!     .with_similarity_matrix(similarity)
//!     .build(abundance)?;
//! let table = meta.diversity_table(&[0.0, 1.0, 2.0, f64::INFINITY], &Measure::ALL)?;
//! println!("{table}");
//! # Ok(())
//! # }
//! ```

pub mod abundance;
pub mod backend;
pub mod builder;
pub mod chunked;
pub mod error;
pub mod function;
pub mod measures;
pub mod metacommunity;
pub mod operators;
pub mod power_mean;
pub mod similarity;
pub mod weighted;

pub use abundance::Abundance;
pub use backend::{ChunkBackend, RayonBackend, RowBlock, SequentialBackend};
pub use builder::{DiversityParams, MetacommunityBuilder};
pub use chunked::ChunkedSimilarity;
pub use error::{DiversityError, Result};
pub use function::{FunctionSimilarity, Kernel};
pub use measures::Measure;
pub use metacommunity::{Community, DiversityRow, DiversityTable, Metacommunity};
pub use power_mean::power_mean;
pub use similarity::{Similarity, SimilarityMatrix, SymmetryCheck};
pub use weighted::WeightedAbundance;

#[cfg(test)]
mod tests;
