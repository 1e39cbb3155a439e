//! Error types for abundance validation, similarity providers and diversity
//! computation.
//!
//! Every fallible operation in the crate returns [`Result<T>`]. Input problems
//! surface at construction time (abundance model, similarity provider) so no
//! numeric work starts on inconsistent data.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while validating inputs or computing diversity.
#[derive(Debug, Error)]
pub enum DiversityError {
    /// Index spaces disagree in size or identifiers, or a table is ragged.
    #[error("Input shape error: {0}")]
    InputShape(String),

    /// Negative, non-finite or otherwise invalid value in an input.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// similarity(i, j) differs from similarity(j, i) beyond the tolerance.
    #[error("Asymmetric similarity: s({row},{col})={forward} but s({col},{row})={backward}")]
    Asymmetric {
        row: usize,
        col: usize,
        forward: f64,
        backward: f64,
    },

    /// A community has zero total abundance where a non-richness index needs it.
    #[error("Empty population: {0}")]
    EmptyPopulation(String),

    /// Expression evaluated outside its mathematical domain.
    #[error("Domain error: {0}")]
    Domain(String),

    /// Chunk ranges leave a gap, overlap, or a chunk result went missing.
    #[error("Chunk coverage error: {0}")]
    ChunkCoverage(String),

    /// I/O failure while streaming a similarity file.
    #[error("{}: {source}", path.display())]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Malformed entry in a similarity file.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The parallel backend failed to run chunk jobs.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, DiversityError>;

impl DiversityError {
    pub fn input_shape(message: impl Into<String>) -> Self {
        Self::InputShape(message.into())
    }

    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::InvalidValue(message.into())
    }

    pub fn empty_population(message: impl Into<String>) -> Self {
        Self::EmptyPopulation(message.into())
    }

    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain(message.into())
    }

    pub fn chunk_coverage(message: impl Into<String>) -> Self {
        Self::ChunkCoverage(message.into())
    }
}
