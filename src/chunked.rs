//! Chunked similarity: the matrix is only ever touched one row block at a time.
//!
//! Two sources:
//! - in-memory `(row range, sub-matrix)` blocks, dispatched through the
//!   configured [`ChunkBackend`]
//! - a delimited text file (header row of species labels, then one numeric row
//!   per species) streamed `chunk_size` rows at a time on the calling thread;
//!   the configured backend is not used for file reads
//!
//! Row ranges must partition `0..n` exactly once. Each block contributes the
//! rows `Z[range, :] · A` of the product; blocks are disjoint so the reduction
//! is a plain sum into a zeroed output and completion order is irrelevant.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::Range;
use std::path::{Path, PathBuf};

use log::{debug, info, trace};
use smartcore::linalg::basic::arrays::{Array, Array2};
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::backend::{ChunkBackend, ChunkJob, RowBlock};
use crate::error::{DiversityError, Result};
use crate::operators::{multiply_rows, to_row_major};
use crate::similarity::{
    check_self_similarity, check_species_labels, validate_similarity_rows, AsymmetryScan,
    SymmetryCheck,
};

/// Split `0..n` into consecutive ranges of at most `chunk_size` rows.
pub fn partition(n: usize, chunk_size: usize) -> Result<Vec<Range<usize>>> {
    if chunk_size == 0 {
        return Err(DiversityError::invalid_value("chunk size must be positive"));
    }
    Ok((0..n)
        .step_by(chunk_size)
        .map(|start| start..(start + chunk_size).min(n))
        .collect())
}

/// Verify that `ranges` cover `0..n` exactly once, in any order.
pub fn check_coverage(n: usize, ranges: &[Range<usize>]) -> Result<()> {
    let mut sorted: Vec<Range<usize>> = ranges.to_vec();
    sorted.sort_by_key(|r| (r.start, r.end));

    let mut expected = 0usize;
    for r in &sorted {
        if r.start >= r.end {
            return Err(DiversityError::chunk_coverage(format!(
                "empty chunk range {}..{}",
                r.start, r.end
            )));
        }
        if r.end > n {
            return Err(DiversityError::chunk_coverage(format!(
                "chunk range {}..{} exceeds {} species",
                r.start, r.end, n
            )));
        }
        if r.start > expected {
            return Err(DiversityError::chunk_coverage(format!(
                "rows {}..{} are not covered by any chunk",
                expected, r.start
            )));
        }
        if r.start < expected {
            return Err(DiversityError::chunk_coverage(format!(
                "chunk {}..{} overlaps rows {}..{}",
                r.start,
                r.end,
                r.start,
                expected.min(r.end)
            )));
        }
        expected = r.end;
    }
    if expected != n {
        return Err(DiversityError::chunk_coverage(format!(
            "rows {expected}..{n} are not covered by any chunk"
        )));
    }
    Ok(())
}

/// Run `job` over `ranges` on `backend` and require one result per range.
pub(crate) fn dispatch(
    backend: &dyn ChunkBackend,
    job: &ChunkJob<'_>,
    ranges: &[Range<usize>],
) -> Result<Vec<RowBlock>> {
    let partials = backend.map_chunks(job, ranges)?;
    if partials.len() != ranges.len() {
        return Err(DiversityError::chunk_coverage(format!(
            "backend returned {} of {} chunk results",
            partials.len(),
            ranges.len()
        )));
    }
    Ok(partials)
}

/// Sum partial row blocks into an `n × k` row-major result.
///
/// Every row must receive exactly one partial result.
pub(crate) fn accumulate(n: usize, k: usize, blocks: Vec<RowBlock>) -> Result<Vec<f64>> {
    let mut out = vec![0.0; n * k];
    let mut hits = vec![0usize; n];
    for block in blocks {
        if block.ncols != k || block.values.len() != block.rows.len() * k {
            return Err(DiversityError::input_shape(format!(
                "partial result for rows {}..{} has {} values, expected {}",
                block.rows.start,
                block.rows.end,
                block.values.len(),
                block.rows.len() * k
            )));
        }
        if block.rows.end > n {
            return Err(DiversityError::chunk_coverage(format!(
                "partial result for rows {}..{} exceeds {} species",
                block.rows.start, block.rows.end, n
            )));
        }
        for (r, i) in block.rows.clone().enumerate() {
            hits[i] += 1;
            let src = &block.values[r * k..(r + 1) * k];
            for (o, &v) in out[i * k..(i + 1) * k].iter_mut().zip(src) {
                *o += v;
            }
        }
    }
    if let Some(i) = hits.iter().position(|&h| h != 1) {
        return Err(DiversityError::chunk_coverage(format!(
            "row {} received {} partial results",
            i, hits[i]
        )));
    }
    Ok(out)
}

#[derive(Clone, Debug)]
struct Block {
    rows: Range<usize>,
    values: Vec<f64>,
}

#[derive(Clone, Debug)]
enum ChunkSource {
    Blocks(Vec<Block>),
    File(SimilarityFile),
}

#[derive(Clone, Debug)]
pub struct ChunkedSimilarity {
    n: usize,
    species: Option<Vec<String>>,
    source: ChunkSource,
}

impl ChunkedSimilarity {
    /// Row blocks `(range, sub-matrix)` of an `n × n` similarity matrix.
    ///
    /// Coverage, block shapes, values and symmetry are checked here, before
    /// any weighted sum is requested.
    pub fn from_blocks(
        n: usize,
        blocks: Vec<(Range<usize>, DenseMatrix<f64>)>,
        symmetry: SymmetryCheck,
    ) -> Result<Self> {
        info!("Building chunked similarity: {} species in {} blocks", n, blocks.len());
        if n == 0 {
            return Err(DiversityError::input_shape("similarity has no species"));
        }
        let ranges: Vec<Range<usize>> = blocks.iter().map(|(r, _)| r.clone()).collect();
        check_coverage(n, &ranges)?;

        let mut parsed: Vec<Block> = Vec::with_capacity(blocks.len());
        for (rows, matrix) in blocks {
            let shape = matrix.shape();
            if shape != (rows.len(), n) {
                return Err(DiversityError::input_shape(format!(
                    "block for rows {}..{} has shape {:?}, expected ({}, {})",
                    rows.start,
                    rows.end,
                    shape,
                    rows.len(),
                    n
                )));
            }
            let values = to_row_major(&matrix);
            validate_similarity_rows(&values, rows.start, n)?;
            check_self_similarity(&values, rows.start, n);
            parsed.push(Block { rows, values });
        }
        parsed.sort_by_key(|b| b.rows.start);

        let mut scan = AsymmetryScan::default();
        for block in &parsed {
            for (r, i) in block.rows.clone().enumerate() {
                for j in (i + 1)..n {
                    let forward = block.values[r * n + j];
                    let backward = lookup(&parsed, n, j, i);
                    if symmetry.differs(forward, backward) {
                        scan.record(i, j, forward, backward);
                    }
                }
            }
        }
        symmetry.enforce("chunked similarity", scan)?;
        debug!("Chunked similarity validated ({} asymmetric pairs)", scan.count);

        Ok(Self {
            n,
            species: None,
            source: ChunkSource::Blocks(parsed),
        })
    }

    /// Split a resident matrix into row blocks of `chunk_size` rows.
    pub fn from_matrix(
        matrix: &DenseMatrix<f64>,
        chunk_size: usize,
        symmetry: SymmetryCheck,
    ) -> Result<Self> {
        let (nrows, ncols) = matrix.shape();
        if nrows != ncols {
            return Err(DiversityError::input_shape(format!(
                "similarity matrix must be square, got {nrows}x{ncols}"
            )));
        }
        let values = to_row_major(matrix);
        let blocks = partition(nrows, chunk_size)?
            .into_iter()
            .map(|rows| {
                let slice = values[rows.start * ncols..rows.end * ncols].to_vec();
                let block = DenseMatrix::from_iterator(slice.into_iter(), rows.len(), ncols, 0);
                (rows, block)
            })
            .collect();
        Self::from_blocks(nrows, blocks, symmetry)
    }

    /// Delimited file with a header row of species labels. `.csv` files are
    /// comma separated, anything else tab separated.
    pub fn from_file(
        path: impl AsRef<Path>,
        chunk_size: usize,
        symmetry: SymmetryCheck,
    ) -> Result<Self> {
        let path = path.as_ref();
        let delimiter = if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("csv")) {
            ','
        } else {
            '\t'
        };
        Self::from_delimited_file(path, delimiter, chunk_size, symmetry)
    }

    pub fn from_delimited_file(
        path: impl AsRef<Path>,
        delimiter: char,
        chunk_size: usize,
        symmetry: SymmetryCheck,
    ) -> Result<Self> {
        let file = SimilarityFile::open(path.as_ref(), delimiter, chunk_size, symmetry)?;
        Ok(Self {
            n: file.species.len(),
            species: Some(file.species.clone()),
            source: ChunkSource::File(file),
        })
    }

    /// Attach species labels for alignment by key. File sources already carry
    /// the labels of their header row.
    pub fn with_species(mut self, species: Vec<String>) -> Result<Self> {
        check_species_labels(&species, self.n)?;
        self.species = Some(species);
        Ok(self)
    }

    pub fn n_species(&self) -> usize {
        self.n
    }

    pub fn species(&self) -> Option<&[String]> {
        self.species.as_deref()
    }

    /// Row ranges of the chunks, in row order.
    pub fn chunk_ranges(&self) -> Vec<Range<usize>> {
        match &self.source {
            ChunkSource::Blocks(blocks) => blocks.iter().map(|b| b.rows.clone()).collect(),
            ChunkSource::File(file) => partition(self.n, file.chunk_size).unwrap_or_default(),
        }
    }

    pub(crate) fn weighted_sum(
        &self,
        rhs: &[f64],
        k: usize,
        backend: &dyn ChunkBackend,
    ) -> Result<Vec<f64>> {
        let n = self.n;
        match &self.source {
            ChunkSource::Blocks(blocks) => {
                let ranges: Vec<Range<usize>> = blocks.iter().map(|b| b.rows.clone()).collect();
                let job = |range: Range<usize>| -> Result<RowBlock> {
                    let idx = blocks
                        .binary_search_by_key(&range.start, |b| b.rows.start)
                        .map_err(|_| {
                            DiversityError::chunk_coverage(format!(
                                "no block starts at row {}",
                                range.start
                            ))
                        })?;
                    let block = &blocks[idx];
                    if block.rows != range {
                        return Err(DiversityError::chunk_coverage(format!(
                            "requested rows {}..{} but block holds {}..{}",
                            range.start, range.end, block.rows.start, block.rows.end
                        )));
                    }
                    trace!("Chunk {}..{}: {} rows", range.start, range.end, range.len());
                    Ok(RowBlock::new(range, k, multiply_rows(&block.values, n, rhs, k)))
                };
                debug!(
                    "Dispatching {} similarity chunks to {} backend",
                    ranges.len(),
                    backend.name()
                );
                let partials = dispatch(backend, &job, &ranges)?;
                accumulate(n, k, partials)
            }
            ChunkSource::File(file) => {
                debug!(
                    "Streaming similarity file {} sequentially ({} backend unused)",
                    file.path.display(),
                    backend.name()
                );
                let mut partials = Vec::new();
                file.for_each_chunk(|range, values| {
                    validate_similarity_rows(values, range.start, n)?;
                    let product = multiply_rows(values, n, rhs, k);
                    partials.push(RowBlock::new(range, k, product));
                    Ok(())
                })?;
                accumulate(n, k, partials)
            }
        }
    }
}

/// Value s(i, j) from blocks sorted by row start.
fn lookup(blocks: &[Block], n: usize, i: usize, j: usize) -> f64 {
    let idx = blocks.partition_point(|b| b.rows.end <= i);
    let block = &blocks[idx];
    block.values[(i - block.rows.start) * n + j]
}

/// File-backed similarity matrix read in row chunks.
#[derive(Clone, Debug)]
pub(crate) struct SimilarityFile {
    path: PathBuf,
    delimiter: char,
    chunk_size: usize,
    species: Vec<String>,
}

impl SimilarityFile {
    /// Read the header and stream the body once to validate it.
    ///
    /// Symmetry can only be checked inside the diagonal square of each chunk
    /// without holding the matrix.
    fn open(path: &Path, delimiter: char, chunk_size: usize, symmetry: SymmetryCheck) -> Result<Self> {
        info!(
            "Opening similarity file {} (chunk size {})",
            path.display(),
            chunk_size
        );
        if chunk_size == 0 {
            return Err(DiversityError::invalid_value("chunk size must be positive"));
        }
        let mut lines = open_lines(path)?;
        let header = match lines.next() {
            Some(line) => line.map_err(|source| io_error(path, source))?,
            None => {
                return Err(DiversityError::Parse(format!(
                    "{}: missing header row",
                    path.display()
                )))
            }
        };
        let species: Vec<String> = header
            .split(delimiter)
            .map(|s| s.trim().to_string())
            .collect();
        if species.iter().all(|s| s.is_empty()) {
            return Err(DiversityError::Parse(format!(
                "{}: empty header row",
                path.display()
            )));
        }

        let file = Self {
            path: path.to_path_buf(),
            delimiter,
            chunk_size,
            species,
        };
        let n = file.species.len();
        let mut scan = AsymmetryScan::default();
        file.for_each_chunk(|range, values| {
            validate_similarity_rows(values, range.start, n)?;
            check_self_similarity(values, range.start, n);
            scan.merge(diagonal_block_scan(&range, values, n, &symmetry));
            Ok(())
        })?;
        symmetry.enforce("similarity file", scan)?;
        debug!("Similarity file validated: {} species", n);
        Ok(file)
    }

    /// Stream the body in chunks of `chunk_size` rows.
    fn for_each_chunk<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(Range<usize>, &[f64]) -> Result<()>,
    {
        let n = self.species.len();
        let mut lines = open_lines(&self.path)?.enumerate();
        // header, already parsed
        if let Some((_, line)) = lines.next() {
            line.map_err(|source| io_error(&self.path, source))?;
        }

        let mut buffer: Vec<f64> = Vec::with_capacity(self.chunk_size * n);
        let mut start = 0usize;
        let mut row = 0usize;
        for (lineno, line) in lines {
            let line = line.map_err(|source| io_error(&self.path, source))?;
            if line.trim().is_empty() {
                continue;
            }
            if row >= n {
                return Err(DiversityError::chunk_coverage(format!(
                    "{}: more than {} similarity rows (line {})",
                    self.path.display(),
                    n,
                    lineno + 1
                )));
            }
            let before = buffer.len();
            for field in line.split(self.delimiter) {
                let field = field.trim();
                let v: f64 = field.parse().map_err(|_| {
                    DiversityError::Parse(format!(
                        "{}: line {}: '{}' is not a number",
                        self.path.display(),
                        lineno + 1,
                        field
                    ))
                })?;
                buffer.push(v);
            }
            if buffer.len() - before != n {
                return Err(DiversityError::input_shape(format!(
                    "{}: line {} has {} values, expected {}",
                    self.path.display(),
                    lineno + 1,
                    buffer.len() - before,
                    n
                )));
            }
            row += 1;
            if row - start == self.chunk_size {
                f(start..row, &buffer)?;
                buffer.clear();
                start = row;
            }
        }
        if row > start {
            f(start..row, &buffer)?;
        }
        if row < n {
            return Err(DiversityError::chunk_coverage(format!(
                "{}: rows {}..{} are missing",
                self.path.display(),
                row,
                n
            )));
        }
        Ok(())
    }
}

fn diagonal_block_scan(
    range: &Range<usize>,
    values: &[f64],
    n: usize,
    symmetry: &SymmetryCheck,
) -> AsymmetryScan {
    let mut scan = AsymmetryScan::default();
    for (r, i) in range.clone().enumerate() {
        for j in (i + 1)..range.end {
            let forward = values[r * n + j];
            let backward = values[(j - range.start) * n + i];
            if symmetry.differs(forward, backward) {
                scan.record(i, j, forward, backward);
            }
        }
    }
    scan
}

fn open_lines(path: &Path) -> Result<std::io::Lines<BufReader<File>>> {
    let file = File::open(path).map_err(|source| io_error(path, source))?;
    Ok(BufReader::new(file).lines())
}

fn io_error(path: &Path, source: std::io::Error) -> DiversityError {
    DiversityError::Io {
        path: path.to_path_buf(),
        source,
    }
}
