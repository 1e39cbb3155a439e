//! Abundance model: counts of element types (species) per subcommunity.
//!
//! Counts are stored species × subcommunities. Everything downstream is
//! derived once at construction and never mutated:
//!
//! - `subcommunity_abundance` P: counts divided by the metacommunity total
//!   (column j sums to the subcommunity weight w_j)
//! - `metacommunity_abundance` p: row sums of P (sums to 1)
//! - `subcommunity_weights` w: column sums of P (sums to 1)
//! - `normalized_subcommunity_abundance` P̄: column j of P divided by w_j
//!   (sums to 1). Columns of empty subcommunities stay at zero.

use std::collections::HashMap;

use log::{debug, info, trace, warn};
use smartcore::linalg::basic::arrays::Array;
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::error::{DiversityError, Result};
use crate::operators::{column_sums, dense, row_sums, to_row_major};

#[derive(Debug, Clone)]
pub struct Abundance {
    counts: DenseMatrix<f64>,
    species: Vec<String>,
    subcommunities: Vec<String>,
    labelled: bool,
    total: f64,
    subcommunity_totals: Vec<f64>,
    subcommunity_abundance: DenseMatrix<f64>,
    normalized_subcommunity_abundance: DenseMatrix<f64>,
    metacommunity_abundance: Vec<f64>,
    subcommunity_weights: Vec<f64>,
}

impl Abundance {
    /// Counts table (species × subcommunities) aligned positionally with the
    /// similarity index space.
    pub fn new(counts: DenseMatrix<f64>) -> Result<Self> {
        let (n_species, n_subcommunities) = counts.shape();
        let species = (0..n_species).map(|i| i.to_string()).collect();
        let subcommunities = (0..n_subcommunities)
            .map(|j| format!("subcommunity_{j}"))
            .collect();
        Self::from_parts(counts, species, subcommunities, false)
    }

    /// Counts table with species and subcommunity labels. Labelled species
    /// are aligned by key against a labelled similarity source.
    pub fn with_labels(
        counts: DenseMatrix<f64>,
        species: Vec<String>,
        subcommunities: Vec<String>,
    ) -> Result<Self> {
        Self::from_parts(counts, species, subcommunities, true)
    }

    /// Build from `(subcommunity, species, count)` records.
    ///
    /// Labels are registered in first-seen order; absent pairs count zero.
    /// A repeated `(subcommunity, species)` pair is rejected.
    pub fn from_records<I, S, T>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, T, f64)>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let mut subcommunity_index: HashMap<String, usize> = HashMap::new();
        let mut species_index: HashMap<String, usize> = HashMap::new();
        let mut subcommunities: Vec<String> = Vec::new();
        let mut species: Vec<String> = Vec::new();
        let mut cells: HashMap<(usize, usize), f64> = HashMap::new();

        for (subcommunity, name, count) in records {
            let j = register(subcommunity.as_ref(), &mut subcommunity_index, &mut subcommunities);
            let i = register(name.as_ref(), &mut species_index, &mut species);
            if cells.insert((i, j), count).is_some() {
                return Err(DiversityError::invalid_value(format!(
                    "duplicate record for subcommunity '{}' and species '{}'",
                    subcommunities[j], species[i]
                )));
            }
        }

        let (n, k) = (species.len(), subcommunities.len());
        if n == 0 || k == 0 {
            return Err(DiversityError::input_shape("no abundance records"));
        }
        let mut values = vec![0.0; n * k];
        for ((i, j), c) in cells {
            values[i * k + j] = c;
        }
        debug!("Registered {} species across {} subcommunities from records", n, k);
        Self::from_parts(dense(n, k, values), species, subcommunities, true)
    }

    fn from_parts(
        counts: DenseMatrix<f64>,
        species: Vec<String>,
        subcommunities: Vec<String>,
        labelled: bool,
    ) -> Result<Self> {
        let (n, k) = counts.shape();
        info!("Building abundance model for {} species in {} subcommunities", n, k);

        if n == 0 || k == 0 {
            return Err(DiversityError::input_shape(format!(
                "abundance table must be non-empty, got {n}x{k}"
            )));
        }
        if species.len() != n {
            return Err(DiversityError::input_shape(format!(
                "{} species labels for {} table rows",
                species.len(),
                n
            )));
        }
        if subcommunities.len() != k {
            return Err(DiversityError::input_shape(format!(
                "{} subcommunity labels for {} table columns",
                subcommunities.len(),
                k
            )));
        }
        let mut seen = HashMap::with_capacity(n);
        for (i, label) in species.iter().enumerate() {
            if let Some(first) = seen.insert(label.as_str(), i) {
                return Err(DiversityError::input_shape(format!(
                    "species label '{label}' appears at rows {first} and {i}"
                )));
            }
        }

        let raw = to_row_major(&counts);
        for (idx, &c) in raw.iter().enumerate() {
            if !c.is_finite() {
                return Err(DiversityError::invalid_value(format!(
                    "non-finite count {c} for species '{}' in '{}'",
                    species[idx / k],
                    subcommunities[idx % k]
                )));
            }
            if c < 0.0 {
                return Err(DiversityError::invalid_value(format!(
                    "negative count {c} for species '{}' in '{}'",
                    species[idx / k],
                    subcommunities[idx % k]
                )));
            }
        }

        let subcommunity_totals = column_sums(&counts);
        let total: f64 = subcommunity_totals.iter().sum();
        if total <= 0.0 {
            return Err(DiversityError::empty_population(
                "metacommunity has zero total abundance",
            ));
        }
        for (j, &t) in subcommunity_totals.iter().enumerate() {
            if t <= 0.0 {
                warn!("Subcommunity '{}' has zero total abundance", subcommunities[j]);
            }
        }

        let subcommunity_abundance = dense(n, k, raw.iter().map(|&c| c / total).collect());
        let subcommunity_weights: Vec<f64> =
            subcommunity_totals.iter().map(|&t| t / total).collect();
        let metacommunity_abundance = row_sums(&subcommunity_abundance);

        let normalized: Vec<f64> = raw
            .iter()
            .enumerate()
            .map(|(idx, &c)| {
                let t = subcommunity_totals[idx % k];
                if t > 0.0 {
                    c / t
                } else {
                    0.0
                }
            })
            .collect();
        let normalized_subcommunity_abundance = dense(n, k, normalized);

        trace!("Subcommunity weights: {:?}", subcommunity_weights);
        debug!("Abundance model ready: total={}", total);

        Ok(Self {
            counts,
            species,
            subcommunities,
            labelled,
            total,
            subcommunity_totals,
            subcommunity_abundance,
            normalized_subcommunity_abundance,
            metacommunity_abundance,
            subcommunity_weights,
        })
    }

    /// Copy of this model with species rows reordered to `order`.
    ///
    /// Fails when `order` is not a permutation of this model's species labels.
    pub fn aligned_to(&self, order: &[String]) -> Result<Self> {
        let n = self.n_species();
        if order.len() != n {
            return Err(DiversityError::input_shape(format!(
                "similarity has {} species, abundance has {}",
                order.len(),
                n
            )));
        }
        if order == self.species.as_slice() {
            return Ok(self.clone());
        }
        let position: HashMap<&str, usize> = self
            .species
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect();

        let k = self.n_subcommunities();
        let raw = to_row_major(&self.counts);
        let mut values = Vec::with_capacity(n * k);
        for label in order {
            let i = *position.get(label.as_str()).ok_or_else(|| {
                DiversityError::input_shape(format!(
                    "species '{label}' in similarity is missing from abundance"
                ))
            })?;
            values.extend_from_slice(&raw[i * k..(i + 1) * k]);
        }
        debug!("Reordered {} species to similarity order", n);
        Self::from_parts(
            dense(n, k, values),
            order.to_vec(),
            self.subcommunities.clone(),
            true,
        )
    }

    pub fn n_species(&self) -> usize {
        self.species.len()
    }

    pub fn n_subcommunities(&self) -> usize {
        self.subcommunities.len()
    }

    pub fn species(&self) -> &[String] {
        &self.species
    }

    pub fn subcommunities(&self) -> &[String] {
        &self.subcommunities
    }

    /// True when species labels came from the caller rather than positions.
    pub fn is_labelled(&self) -> bool {
        self.labelled
    }

    pub fn counts(&self) -> &DenseMatrix<f64> {
        &self.counts
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn subcommunity_totals(&self) -> &[f64] {
        &self.subcommunity_totals
    }

    pub fn is_empty_subcommunity(&self, j: usize) -> bool {
        self.subcommunity_totals[j] <= 0.0
    }

    pub fn subcommunity_abundance(&self) -> &DenseMatrix<f64> {
        &self.subcommunity_abundance
    }

    pub fn normalized_subcommunity_abundance(&self) -> &DenseMatrix<f64> {
        &self.normalized_subcommunity_abundance
    }

    pub fn metacommunity_abundance(&self) -> &[f64] {
        &self.metacommunity_abundance
    }

    pub fn subcommunity_weights(&self) -> &[f64] {
        &self.subcommunity_weights
    }
}

fn register(label: &str, index: &mut HashMap<String, usize>, order: &mut Vec<String>) -> usize {
    if let Some(&i) = index.get(label) {
        return i;
    }
    let i = order.len();
    index.insert(label.to_string(), i);
    order.push(label.to_string());
    i
}
