use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::abundance::Abundance;
use crate::backend::{ChunkBackend, RayonBackend, SequentialBackend};
use crate::chunked::ChunkedSimilarity;
use crate::error::Result;
use crate::function::{FunctionSimilarity, Kernel, SimilarityFn};
use crate::metacommunity::Metacommunity;
use crate::similarity::{Similarity, SimilarityMatrix, SymmetryCheck};

/// Rows per chunk when nothing else is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DiversityParams {
    /// Rows (or file lines) per chunk for chunked, file and function sources.
    pub chunk_size: usize,
    pub symmetry: SymmetryCheck,
}

impl Default for DiversityParams {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            symmetry: SymmetryCheck::default(),
        }
    }
}

// Tolerances compare approximately, everything else exactly
impl PartialEq for DiversityParams {
    fn eq(&self, other: &Self) -> bool {
        self.chunk_size == other.chunk_size
            && match (self.symmetry, other.symmetry) {
                (SymmetryCheck::Strict { tolerance: a }, SymmetryCheck::Strict { tolerance: b })
                | (SymmetryCheck::Warn { tolerance: a }, SymmetryCheck::Warn { tolerance: b }) => {
                    approx::relative_eq!(a, b)
                }
                _ => false,
            }
    }
}

impl Eq for DiversityParams {}

#[derive(Clone)]
enum SimilaritySource {
    Identity,
    Matrix(DenseMatrix<f64>),
    ChunkedMatrix(DenseMatrix<f64>),
    Blocks {
        n: usize,
        blocks: Vec<(Range<usize>, DenseMatrix<f64>)>,
    },
    File(PathBuf),
    Function {
        features: DenseMatrix<f64>,
        function: SimilarityFn,
    },
    Kernel {
        features: DenseMatrix<f64>,
        kernel: Kernel,
    },
}

impl SimilaritySource {
    fn name(&self) -> &'static str {
        match self {
            SimilaritySource::Identity => "identity",
            SimilaritySource::Matrix(_) => "matrix",
            SimilaritySource::ChunkedMatrix(_) => "chunked matrix",
            SimilaritySource::Blocks { .. } => "blocks",
            SimilaritySource::File(_) => "file",
            SimilaritySource::Function { .. } => "function",
            SimilaritySource::Kernel { .. } => "kernel",
        }
    }
}

pub struct MetacommunityBuilder {
    source: SimilaritySource,
    species: Option<Vec<String>>,
    params: DiversityParams,
    backend: Arc<dyn ChunkBackend>,
}

impl Default for MetacommunityBuilder {
    fn default() -> Self {
        debug!("Creating MetacommunityBuilder with default parameters");
        Self {
            // frequency-sensitive unless a similarity is configured
            source: SimilaritySource::Identity,
            species: None,
            params: DiversityParams::default(),
            backend: Arc::new(SequentialBackend),
        }
    }
}

impl MetacommunityBuilder {
    pub fn new() -> Self {
        info!("Initializing new MetacommunityBuilder");
        Self::default()
    }

    // -------------------- Similarity source --------------------

    /// Fully resident similarity matrix.
    pub fn with_similarity_matrix(mut self, matrix: DenseMatrix<f64>) -> Self {
        info!("Configuring similarity matrix");
        self.source = SimilaritySource::Matrix(matrix);
        self
    }

    /// Resident matrix processed in row chunks of `chunk_size`.
    pub fn with_chunked_matrix(mut self, matrix: DenseMatrix<f64>) -> Self {
        info!("Configuring chunked similarity matrix");
        self.source = SimilaritySource::ChunkedMatrix(matrix);
        self
    }

    /// Precomputed row blocks of an `n × n` similarity.
    pub fn with_similarity_blocks(
        mut self,
        n: usize,
        blocks: Vec<(Range<usize>, DenseMatrix<f64>)>,
    ) -> Self {
        info!("Configuring {} similarity blocks over {} species", blocks.len(), n);
        self.source = SimilaritySource::Blocks { n, blocks };
        self
    }

    /// Delimited similarity file with a header row of species labels.
    pub fn with_similarity_file(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        info!("Configuring similarity file {}", path.display());
        self.source = SimilaritySource::File(path);
        self
    }

    /// Similarity evaluated on demand from per-species feature rows.
    pub fn with_similarity_function<F>(mut self, features: DenseMatrix<f64>, function: F) -> Self
    where
        F: Fn(&[f64], &[f64]) -> f64 + Send + Sync + 'static,
    {
        info!("Configuring on-demand similarity function");
        self.source = SimilaritySource::Function {
            features,
            function: Arc::new(function),
        };
        self
    }

    pub fn with_kernel(mut self, features: DenseMatrix<f64>, kernel: Kernel) -> Self {
        info!("Configuring on-demand similarity kernel {:?}", kernel);
        self.source = SimilaritySource::Kernel { features, kernel };
        self
    }

    /// Species labels of the similarity index space. Overrides file headers.
    pub fn with_species(mut self, species: Vec<String>) -> Self {
        debug!("Setting {} similarity species labels", species.len());
        self.species = Some(species);
        self
    }

    // -------------------- Parameters --------------------

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        info!("Setting chunk size: {}", chunk_size);
        self.params.chunk_size = chunk_size;
        self
    }

    pub fn with_symmetry(mut self, symmetry: SymmetryCheck) -> Self {
        info!("Setting symmetry policy: {:?}", symmetry);
        self.params.symmetry = symmetry;
        self
    }

    pub fn with_params(mut self, params: DiversityParams) -> Self {
        info!("Setting parameters: {:?}", params);
        self.params = params;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn ChunkBackend>) -> Self {
        info!("Setting chunk backend: {}", backend.name());
        self.backend = backend;
        self
    }

    /// Shorthand for a [`RayonBackend`] on the global pool (`None`) or on a
    /// dedicated pool of `threads` workers.
    pub fn with_parallelism(self, threads: Option<usize>) -> Result<Self> {
        let backend = match threads {
            Some(n) => RayonBackend::with_threads(n)?,
            None => RayonBackend::new(),
        };
        Ok(self.with_backend(Arc::new(backend)))
    }

    pub fn params(&self) -> &DiversityParams {
        &self.params
    }

    // -------------------- Build --------------------

    /// Construct the configured similarity provider.
    ///
    /// The builder keeps its source, so matrix and block sources are copied;
    /// [`build`](Self::build) moves them instead.
    pub fn build_similarity(&self) -> Result<Similarity> {
        Self::make_similarity(
            self.source.clone(),
            self.species.clone(),
            self.params,
            self.backend.name(),
        )
    }

    /// Build the similarity provider and the metacommunity over `abundance`.
    ///
    /// The provider is returned alongside so it can be reused for other
    /// abundance models through [`Metacommunity::new`].
    pub fn build(self, abundance: Abundance) -> Result<(Metacommunity, Similarity)> {
        info!(
            "Building metacommunity from {} species x {} subcommunities",
            abundance.n_species(),
            abundance.n_subcommunities()
        );
        let Self {
            source,
            species,
            params,
            backend,
        } = self;
        let similarity = Self::make_similarity(source, species, params, backend.name())?;
        let metacommunity = Metacommunity::new(abundance, &similarity, backend.as_ref())?;
        debug!("Metacommunity built with {} similarity", similarity.kind());
        Ok((metacommunity, similarity))
    }

    fn make_similarity(
        source: SimilaritySource,
        species: Option<Vec<String>>,
        params: DiversityParams,
        backend: &str,
    ) -> Result<Similarity> {
        let DiversityParams {
            chunk_size,
            symmetry,
        } = params;
        debug!(
            "Build configuration: source={}, chunk_size={}, symmetry={:?}, backend={}",
            source.name(),
            chunk_size,
            symmetry,
            backend
        );

        let similarity: Similarity = match source {
            SimilaritySource::Identity => Similarity::Identity,
            SimilaritySource::Matrix(m) => {
                let matrix = SimilarityMatrix::with_policy(m, symmetry)?;
                match species {
                    Some(s) => matrix.with_species(s)?.into(),
                    None => matrix.into(),
                }
            }
            SimilaritySource::ChunkedMatrix(m) => {
                let chunked = ChunkedSimilarity::from_matrix(&m, chunk_size, symmetry)?;
                label_chunked(chunked, species)?.into()
            }
            SimilaritySource::Blocks { n, blocks } => {
                let chunked = ChunkedSimilarity::from_blocks(n, blocks, symmetry)?;
                label_chunked(chunked, species)?.into()
            }
            SimilaritySource::File(path) => {
                let chunked = ChunkedSimilarity::from_file(&path, chunk_size, symmetry)?;
                label_chunked(chunked, species)?.into()
            }
            SimilaritySource::Function { features, function } => {
                let f = FunctionSimilarity::new(
                    &features,
                    move |a: &[f64], b: &[f64]| function(a, b),
                    chunk_size,
                    symmetry,
                )?;
                label_function(f, species)?.into()
            }
            SimilaritySource::Kernel { features, kernel } => {
                let f = FunctionSimilarity::from_kernel(&features, kernel, chunk_size, symmetry)?;
                label_function(f, species)?.into()
            }
        };
        trace!("Similarity provider ready: {}", similarity.kind());
        Ok(similarity)
    }
}

fn label_chunked(
    chunked: ChunkedSimilarity,
    species: Option<Vec<String>>,
) -> Result<ChunkedSimilarity> {
    match species {
        Some(s) => chunked.with_species(s),
        None => Ok(chunked),
    }
}

fn label_function(
    f: FunctionSimilarity,
    species: Option<Vec<String>>,
) -> Result<FunctionSimilarity> {
    match species {
        Some(s) => f.with_species(s),
        None => Ok(f),
    }
}
