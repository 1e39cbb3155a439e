use std::ops::Range;

use crate::backend::{ChunkBackend, ChunkJob, RayonBackend, RowBlock, SequentialBackend};
use crate::chunked::{partition, ChunkedSimilarity};
use crate::error::{DiversityError, Result};
use crate::function::{FunctionSimilarity, Kernel};
use crate::similarity::{Similarity, SymmetryCheck};
use crate::tests::init;
use crate::tests::test_data::{random_counts, random_features, random_similarity};

fn row_indices(range: Range<usize>) -> Result<RowBlock> {
    let values = range.clone().map(|i| i as f64).collect();
    Ok(RowBlock::new(range, 1, values))
}

#[test]
fn test_sequential_keeps_range_order() {
    init();
    let ranges = partition(10, 3).unwrap();
    let blocks = SequentialBackend.map_chunks(&row_indices, &ranges).unwrap();
    let starts: Vec<usize> = blocks.iter().map(|b| b.rows.start).collect();
    assert_eq!(starts, vec![0, 3, 6, 9]);
    assert_eq!(blocks[3].values, vec![9.0]);
    assert_eq!(SequentialBackend.name(), "sequential");
}

#[test]
fn test_rayon_returns_every_chunk() {
    init();
    let ranges = partition(100, 7).unwrap();
    let backend = RayonBackend::with_threads(2).unwrap();
    assert_eq!(backend.threads(), 2);
    let mut blocks = backend.map_chunks(&row_indices, &ranges).unwrap();
    blocks.sort_by_key(|b| b.rows.start);
    let flat: Vec<f64> = blocks.into_iter().flat_map(|b| b.values).collect();
    let expected: Vec<f64> = (0..100).map(|i| i as f64).collect();
    assert_eq!(flat, expected);
}

#[test]
fn test_failing_job_fails_the_call() {
    init();
    let ranges = partition(20, 4).unwrap();
    let job = |range: Range<usize>| -> Result<RowBlock> {
        if range.start == 8 {
            return Err(DiversityError::invalid_value("bad chunk"));
        }
        row_indices(range)
    };
    let backends: Vec<Box<dyn ChunkBackend>> =
        vec![Box::new(SequentialBackend), Box::new(RayonBackend::new())];
    for backend in backends {
        let err = backend.map_chunks(&job, &ranges).unwrap_err();
        assert!(matches!(err, DiversityError::InvalidValue(_)), "{}", backend.name());
    }
}

#[test]
fn test_zero_threads_rejected() {
    init();
    let err = RayonBackend::with_threads(0).unwrap_err();
    assert!(matches!(err, DiversityError::InvalidValue(_)));
}

/// How a misbehaving backend mangles the collected chunk results.
#[derive(Clone, Copy, Debug)]
enum Mangle {
    DropLast,
    DuplicateFirst,
    LastReplacedByFirst,
}

#[derive(Debug)]
struct ManglingBackend(Mangle);

impl ChunkBackend for ManglingBackend {
    fn map_chunks(&self, job: &ChunkJob<'_>, ranges: &[Range<usize>]) -> Result<Vec<RowBlock>> {
        let mut blocks = SequentialBackend.map_chunks(job, ranges)?;
        match self.0 {
            Mangle::DropLast => {
                blocks.pop();
            }
            Mangle::DuplicateFirst => {
                let first = blocks[0].clone();
                blocks.push(first);
            }
            Mangle::LastReplacedByFirst => {
                let first = blocks[0].clone();
                if let Some(last) = blocks.last_mut() {
                    *last = first;
                }
            }
        }
        Ok(blocks)
    }

    fn name(&self) -> &'static str {
        "mangling"
    }
}

#[test]
fn test_lost_or_repeated_chunks_fail_the_request() {
    init();
    let n = 9;
    let counts = random_counts(n, 2, 3);
    let strict = SymmetryCheck::default();
    let sources: Vec<Similarity> = vec![
        ChunkedSimilarity::from_matrix(&random_similarity(n, 4), 3, strict)
            .unwrap()
            .into(),
        FunctionSimilarity::from_kernel(
            &random_features(n, 2, 5),
            Kernel::RectifiedCosine,
            3,
            strict,
        )
        .unwrap()
        .into(),
    ];
    for similarity in &sources {
        assert!(similarity.weighted_sum(&counts, &SequentialBackend).is_ok());
        for mangle in [
            Mangle::DropLast,
            Mangle::DuplicateFirst,
            Mangle::LastReplacedByFirst,
        ] {
            let err = similarity
                .weighted_sum(&counts, &ManglingBackend(mangle))
                .unwrap_err();
            assert!(
                matches!(err, DiversityError::ChunkCoverage(_)),
                "{} with {mangle:?}: got {err:?}",
                similarity.kind()
            );
        }
    }
}
