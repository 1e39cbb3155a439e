use std::fs;
use std::sync::Arc;

use approx::assert_relative_eq;

use crate::abundance::Abundance;
use crate::backend::{RayonBackend, SequentialBackend};
use crate::builder::{DiversityParams, MetacommunityBuilder, DEFAULT_CHUNK_SIZE};
use crate::error::DiversityError;
use crate::function::Kernel;
use crate::measures::Measure;
use crate::metacommunity::Metacommunity;
use crate::operators::{dense, to_row_major};
use crate::similarity::SymmetryCheck;
use crate::tests::init;
use crate::tests::test_data::{
    abundance_abc, counts_abc, labels, random_counts, random_features, similarity_abc,
};

fn gamma_abc(meta: &Metacommunity) -> f64 {
    meta.metacommunity_diversity(2.0, Measure::Gamma).unwrap()
}

#[test]
fn test_default_params() {
    let params = DiversityParams::default();
    assert_eq!(params.chunk_size, DEFAULT_CHUNK_SIZE);
    assert_eq!(params.chunk_size, 100);
    assert!(matches!(params.symmetry, SymmetryCheck::Strict { .. }));

    let nearly = DiversityParams {
        chunk_size: 100,
        symmetry: SymmetryCheck::Strict {
            tolerance: 1e-8 * (1.0 + 1e-15),
        },
    };
    assert_eq!(params, nearly);
    let warn = DiversityParams {
        symmetry: SymmetryCheck::Warn { tolerance: 1e-8 },
        ..params
    };
    assert_ne!(params, warn);
    assert_ne!(params, DiversityParams { chunk_size: 10, ..params });
}

#[test]
fn test_identity_by_default() {
    init();
    let abundance = Abundance::new(dense(3, 1, vec![1.0, 1.0, 2.0])).unwrap();
    let (meta, similarity) = MetacommunityBuilder::new().build(abundance).unwrap();
    assert_eq!(similarity.kind(), "identity");
    let d2 = meta.metacommunity_diversity(2.0, Measure::Gamma).unwrap();
    assert_relative_eq!(d2, 8.0 / 3.0, epsilon = 1e-12);
}

#[test]
fn test_matrix_with_species_labels() {
    init();
    let (meta, similarity) = MetacommunityBuilder::new()
        .with_similarity_matrix(similarity_abc())
        .with_species(labels(&["A", "B", "C"]))
        .build(abundance_abc())
        .unwrap();
    assert_eq!(similarity.kind(), "matrix");
    assert_relative_eq!(gamma_abc(&meta), 16.0 / 7.0, epsilon = 1e-10);

    // the returned provider is reusable for another abundance model
    let other = Abundance::with_labels(
        dense(3, 1, vec![1.0, 1.0, 0.0]),
        labels(&["A", "B", "C"]),
        labels(&["only"]),
    )
    .unwrap();
    let again = Metacommunity::new(other, &similarity, &SequentialBackend).unwrap();
    // Zp = [0.75, 0.75, 0] over p = [0.5, 0.5, 0]
    let g = again.metacommunity_diversity(0.0, Measure::Gamma).unwrap();
    assert_relative_eq!(g, 4.0 / 3.0, epsilon = 1e-10);
}

#[test]
fn test_every_source_gives_the_same_answer() {
    init();
    let z = similarity_abc();
    let values = to_row_major(&z);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("abc.csv");
    fs::write(&path, "A,B,C\n1,0.5,0\n0.5,1,0\n0,0,1\n").unwrap();

    let builders = vec![
        MetacommunityBuilder::new().with_similarity_matrix(z.clone()),
        MetacommunityBuilder::new()
            .with_chunked_matrix(z.clone())
            .with_chunk_size(2),
        MetacommunityBuilder::new().with_similarity_blocks(
            3,
            vec![
                (0..1, dense(1, 3, values[0..3].to_vec())),
                (1..3, dense(2, 3, values[3..9].to_vec())),
            ],
        ),
        MetacommunityBuilder::new()
            .with_similarity_file(&path)
            .with_chunk_size(1),
        MetacommunityBuilder::new().with_similarity_function(
            dense(3, 1, vec![0.0, 1.0, 10.0]),
            |a: &[f64], b: &[f64]| {
                let d = (a[0] - b[0]).abs();
                if d == 0.0 {
                    1.0
                } else if d <= 1.0 {
                    0.5
                } else {
                    0.0
                }
            },
        ),
    ];
    for builder in builders {
        let abundance = Abundance::new(counts_abc()).unwrap();
        let (meta, similarity) = builder.build(abundance).unwrap();
        assert_relative_eq!(gamma_abc(&meta), 16.0 / 7.0, epsilon = 1e-10);
        assert_ne!(similarity.kind(), "identity");
    }
}

#[test]
fn test_file_header_labels_align_abundance() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cab.tsv");
    // species order C, A, B in the file
    fs::write(&path, "C\tA\tB\n1\t0\t0\n0\t1\t0.5\n0\t0.5\t1\n").unwrap();
    let (meta, similarity) = MetacommunityBuilder::new()
        .with_similarity_file(&path)
        .build(abundance_abc())
        .unwrap();
    assert_eq!(similarity.species(), Some(labels(&["C", "A", "B"]).as_slice()));
    assert_eq!(meta.abundance().species(), labels(&["C", "A", "B"]).as_slice());
    assert_relative_eq!(gamma_abc(&meta), 16.0 / 7.0, epsilon = 1e-10);
}

#[test]
fn test_symmetry_policy() {
    init();
    let asymmetric = dense(2, 2, vec![1.0, 0.9, 0.1, 1.0]);
    let abundance = || Abundance::new(dense(2, 1, vec![1.0, 1.0])).unwrap();

    let err = MetacommunityBuilder::new()
        .with_similarity_matrix(asymmetric.clone())
        .build(abundance())
        .unwrap_err();
    assert!(matches!(err, DiversityError::Asymmetric { .. }), "got {err:?}");

    let (meta, _) = MetacommunityBuilder::new()
        .with_similarity_matrix(asymmetric)
        .with_symmetry(SymmetryCheck::Warn { tolerance: 1e-8 })
        .build(abundance())
        .unwrap();
    // Zp = [0.95, 0.55]
    let g = meta.metacommunity_diversity(0.0, Measure::Gamma).unwrap();
    assert_relative_eq!(g, 0.5 / 0.95 + 0.5 / 0.55, epsilon = 1e-10);
}

#[test]
fn test_parallel_builds() {
    init();
    let n = 45;
    let features = random_features(n, 3, 31);
    let counts = random_counts(n, 4, 32);
    let kernel = Kernel::RectifiedCosine;

    let (sequential, _) = MetacommunityBuilder::new()
        .with_kernel(features.clone(), kernel)
        .with_chunk_size(7)
        .build(Abundance::new(counts.clone()).unwrap())
        .unwrap();
    let (pooled, _) = MetacommunityBuilder::new()
        .with_kernel(features.clone(), kernel)
        .with_chunk_size(7)
        .with_parallelism(Some(2))
        .unwrap()
        .build(Abundance::new(counts.clone()).unwrap())
        .unwrap();
    let (global, _) = MetacommunityBuilder::new()
        .with_kernel(features, kernel)
        .with_params(DiversityParams {
            chunk_size: 3,
            ..DiversityParams::default()
        })
        .with_backend(Arc::new(RayonBackend::new()))
        .build(Abundance::new(counts).unwrap())
        .unwrap();

    for q in [0.0, 1.0, 2.0, f64::INFINITY] {
        for m in Measure::ALL {
            let want = sequential.metacommunity_diversity(q, m).unwrap();
            for meta in [&pooled, &global] {
                let got = meta.metacommunity_diversity(q, m).unwrap();
                assert_relative_eq!(got, want, epsilon = 1e-10, max_relative = 1e-10);
            }
        }
    }
}

#[test]
fn test_builder_errors() {
    init();
    let err = MetacommunityBuilder::new().with_parallelism(Some(0)).err().unwrap();
    assert!(matches!(err, DiversityError::InvalidValue(_)));

    let err = MetacommunityBuilder::new()
        .with_chunked_matrix(similarity_abc())
        .with_chunk_size(0)
        .build(abundance_abc())
        .unwrap_err();
    assert!(matches!(err, DiversityError::InvalidValue(_)));

    let err = MetacommunityBuilder::new()
        .with_similarity_matrix(similarity_abc())
        .with_species(labels(&["A", "B"]))
        .build(abundance_abc())
        .unwrap_err();
    assert!(matches!(err, DiversityError::InputShape(_)));
}

#[test]
fn test_build_similarity_leaves_builder_usable() {
    init();
    let builder = MetacommunityBuilder::new()
        .with_similarity_matrix(similarity_abc())
        .with_species(labels(&["A", "B", "C"]));
    let first = builder.build_similarity().unwrap();
    let second = builder.build_similarity().unwrap();
    assert_eq!(first.n_species(), Some(3));
    assert_eq!(second.species(), Some(labels(&["A", "B", "C"]).as_slice()));

    let (meta, moved) = builder.build(abundance_abc()).unwrap();
    assert_eq!(moved.kind(), "matrix");
    assert_relative_eq!(gamma_abc(&meta), 16.0 / 7.0, epsilon = 1e-10);
    let counts = counts_abc();
    let a = first.weighted_sum(&counts, &SequentialBackend).unwrap();
    let b = moved.weighted_sum(&counts, &SequentialBackend).unwrap();
    assert_eq!(to_row_major(&a), to_row_major(&b));
}
