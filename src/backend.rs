//! Chunk execution strategies.
//!
//! A similarity provider splits the element-type index space into row ranges
//! and hands a job (`range -> partial product`) to a [`ChunkBackend`]. The
//! backend only maps the job over the ranges and collects; reduction happens in
//! the provider, so completion order never matters.
//!
//! - [`SequentialBackend`]: in-process, in order. The default.
//! - [`RayonBackend`]: rayon `par_iter` over the ranges, on the global pool or
//!   on a dedicated pool with a fixed thread count.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use log::{debug, info, trace};
use rayon::prelude::*;

use crate::error::{DiversityError, Result};

/// Partial product for a contiguous block of rows.
///
/// `values` is `rows.len() × ncols`, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct RowBlock {
    pub rows: Range<usize>,
    pub ncols: usize,
    pub values: Vec<f64>,
}

impl RowBlock {
    pub fn new(rows: Range<usize>, ncols: usize, values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), rows.len() * ncols);
        Self { rows, ncols, values }
    }
}

/// A chunk computation: given a row range, produce its partial product.
pub type ChunkJob<'a> = dyn Fn(Range<usize>) -> Result<RowBlock> + Sync + 'a;

pub trait ChunkBackend: Send + Sync + fmt::Debug {
    /// Run `job` once per range and collect every result.
    ///
    /// Any failing job fails the whole call; partial output is never returned.
    fn map_chunks(&self, job: &ChunkJob<'_>, ranges: &[Range<usize>]) -> Result<Vec<RowBlock>>;

    fn name(&self) -> &'static str;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SequentialBackend;

impl ChunkBackend for SequentialBackend {
    fn map_chunks(&self, job: &ChunkJob<'_>, ranges: &[Range<usize>]) -> Result<Vec<RowBlock>> {
        trace!("Sequential backend: {} chunks", ranges.len());
        ranges.iter().map(|r| job(r.clone())).collect()
    }

    fn name(&self) -> &'static str {
        "sequential"
    }
}

#[derive(Clone, Debug, Default)]
pub struct RayonBackend {
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl RayonBackend {
    /// Use rayon's global thread pool.
    pub fn new() -> Self {
        info!(
            "Rayon backend on global pool ({} threads)",
            rayon::current_num_threads()
        );
        Self { pool: None }
    }

    /// Use a dedicated pool of `threads` workers.
    pub fn with_threads(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(DiversityError::invalid_value(
                "rayon backend needs at least one thread",
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| DiversityError::Backend(e.to_string()))?;
        info!("Rayon backend on dedicated pool ({} threads)", threads);
        Ok(Self {
            pool: Some(Arc::new(pool)),
        })
    }

    pub fn threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }
}

impl ChunkBackend for RayonBackend {
    fn map_chunks(&self, job: &ChunkJob<'_>, ranges: &[Range<usize>]) -> Result<Vec<RowBlock>> {
        debug!(
            "Rayon backend: {} chunks on {} threads",
            ranges.len(),
            self.threads()
        );
        let run = || {
            ranges
                .par_iter()
                .map(|r| job(r.clone()))
                .collect::<Result<Vec<RowBlock>>>()
        };
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }

    fn name(&self) -> &'static str {
        "rayon"
    }
}
