//! A metacommunity ready for diversity queries, and the diversity table.
//!
//! Construction aligns the abundance model with the similarity index space
//! and computes the similarity-weighted abundances once. Every query after
//! that is a power mean over cached vectors.

use std::fmt;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::abundance::Abundance;
use crate::backend::ChunkBackend;
use crate::error::{DiversityError, Result};
use crate::measures::{
    combine_subcommunities, metacommunity_diversity, subcommunity_diversities, Measure,
};
use crate::power_mean::validate_viewpoint;
use crate::similarity::Similarity;
use crate::weighted::WeightedAbundance;

/// Row key of a diversity table.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Community {
    Subcommunity(String),
    Metacommunity,
}

impl fmt::Display for Community {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Community::Subcommunity(name) => f.write_str(name),
            Community::Metacommunity => f.write_str("metacommunity"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DiversityRow {
    pub community: Community,
    pub viewpoint: f64,
    pub measure: Measure,
    pub value: f64,
}

/// Long-format table: one row per (community, viewpoint, measure).
///
/// `Display` renders it wide and tab-separated, one line per
/// (community, viewpoint) with a column per measure.
#[derive(Clone, Debug, Default, Serialize)]
pub struct DiversityTable {
    measures: Vec<Measure>,
    rows: Vec<DiversityRow>,
}

impl DiversityTable {
    pub fn measures(&self) -> &[Measure] {
        &self.measures
    }

    pub fn rows(&self) -> &[DiversityRow] {
        &self.rows
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DiversityRow> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, community: &Community, measure: Measure, viewpoint: f64) -> Option<f64> {
        self.rows
            .iter()
            .find(|r| {
                &r.community == community
                    && r.measure == measure
                    && same_viewpoint(r.viewpoint, viewpoint)
            })
            .map(|r| r.value)
    }

    pub fn subcommunity(&self, name: &str, measure: Measure, viewpoint: f64) -> Option<f64> {
        self.get(&Community::Subcommunity(name.to_string()), measure, viewpoint)
    }

    pub fn metacommunity(&self, measure: Measure, viewpoint: f64) -> Option<f64> {
        self.get(&Community::Metacommunity, measure, viewpoint)
    }

    fn push(&mut self, community: Community, viewpoint: f64, measure: Measure, value: f64) {
        self.rows.push(DiversityRow {
            community,
            viewpoint,
            measure,
            value,
        });
    }
}

impl<'a> IntoIterator for &'a DiversityTable {
    type Item = &'a DiversityRow;
    type IntoIter = std::slice::Iter<'a, DiversityRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

impl fmt::Display for DiversityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "community\tviewpoint")?;
        for m in &self.measures {
            write!(f, "\t{m}")?;
        }
        writeln!(f)?;

        let mut keys: Vec<(&Community, f64)> = Vec::new();
        for r in &self.rows {
            if !keys
                .iter()
                .any(|(c, q)| *c == &r.community && same_viewpoint(*q, r.viewpoint))
            {
                keys.push((&r.community, r.viewpoint));
            }
        }
        for (community, viewpoint) in keys {
            write!(f, "{community}\t{viewpoint:.2}")?;
            for &m in &self.measures {
                match self.get(community, m, viewpoint) {
                    Some(v) => write!(f, "\t{v:.4}")?,
                    None => write!(f, "\t")?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

fn same_viewpoint(a: f64, b: f64) -> bool {
    a == b || (a - b).abs() <= 1e-12 * a.abs().max(b.abs())
}

#[derive(Clone, Debug)]
pub struct Metacommunity {
    abundance: Abundance,
    weighted: WeightedAbundance,
}

impl Metacommunity {
    /// Align `abundance` with `similarity` and compute the weighted abundances.
    ///
    /// Species are matched by label when both sides carry labels, by position
    /// otherwise.
    pub fn new(
        abundance: Abundance,
        similarity: &Similarity,
        backend: &dyn ChunkBackend,
    ) -> Result<Self> {
        info!(
            "Building metacommunity: {} species, {} subcommunities",
            abundance.n_species(),
            abundance.n_subcommunities()
        );
        let abundance = match similarity.species() {
            Some(labels) if abundance.is_labelled() => abundance.aligned_to(labels)?,
            _ => {
                if let Some(n) = similarity.n_species() {
                    if n != abundance.n_species() {
                        return Err(DiversityError::input_shape(format!(
                            "abundance has {} species, similarity has {n}",
                            abundance.n_species()
                        )));
                    }
                }
                abundance
            }
        };
        let weighted = WeightedAbundance::compute(&abundance, similarity, backend)?;
        Ok(Self {
            abundance,
            weighted,
        })
    }

    pub fn abundance(&self) -> &Abundance {
        &self.abundance
    }

    pub fn weighted(&self) -> &WeightedAbundance {
        &self.weighted
    }

    /// `measure` at `viewpoint` for every subcommunity, in column order.
    pub fn subcommunity_diversity(&self, viewpoint: f64, measure: Measure) -> Result<Vec<f64>> {
        subcommunity_diversities(&self.abundance, &self.weighted, viewpoint, measure)
    }

    pub fn metacommunity_diversity(&self, viewpoint: f64, measure: Measure) -> Result<f64> {
        metacommunity_diversity(&self.abundance, &self.weighted, viewpoint, measure)
    }

    /// Every measure for every subcommunity at one viewpoint.
    pub fn subcommunities_table(&self, viewpoint: f64) -> Result<DiversityTable> {
        let mut table = DiversityTable {
            measures: Measure::ALL.to_vec(),
            rows: Vec::new(),
        };
        for measure in Measure::ALL {
            let values = self.subcommunity_diversity(viewpoint, measure)?;
            self.push_subcommunities(&mut table, viewpoint, measure, &values);
        }
        Ok(table)
    }

    /// Every measure for the metacommunity at one viewpoint.
    pub fn metacommunity_table(&self, viewpoint: f64) -> Result<DiversityTable> {
        let mut table = DiversityTable {
            measures: Measure::ALL.to_vec(),
            rows: Vec::new(),
        };
        for measure in Measure::ALL {
            let value = self.metacommunity_diversity(viewpoint, measure)?;
            table.push(Community::Metacommunity, viewpoint, measure, value);
        }
        Ok(table)
    }

    /// `measures` at every viewpoint, for each subcommunity and the
    /// metacommunity. Subcommunity rows come first, then metacommunity rows.
    /// Repeated viewpoints and measures are kept once, in first-seen order.
    pub fn diversity_table(
        &self,
        viewpoints: &[f64],
        measures: &[Measure],
    ) -> Result<DiversityTable> {
        let mut viewpoints_seen: Vec<f64> = Vec::with_capacity(viewpoints.len());
        for &q in viewpoints {
            validate_viewpoint(q)?;
            if !viewpoints_seen.iter().any(|&seen| same_viewpoint(seen, q)) {
                viewpoints_seen.push(q);
            }
        }

        let mut measures_seen: Vec<Measure> = Vec::with_capacity(measures.len());
        for &m in measures {
            if !measures_seen.contains(&m) {
                measures_seen.push(m);
            }
        }
        info!(
            "Diversity table: {} viewpoints x {} measures",
            viewpoints_seen.len(),
            measures_seen.len()
        );
        let mut table = DiversityTable {
            measures: measures_seen.clone(),
            rows: Vec::new(),
        };
        let mut meta_rows = Vec::new();
        let weights = self.abundance.subcommunity_weights();

        for &q in &viewpoints_seen {
            for &m in &measures_seen {
                let values = self.subcommunity_diversity(q, m)?;
                self.push_subcommunities(&mut table, q, m, &values);
                let meta = combine_subcommunities(weights, &values, q)?;
                meta_rows.push((q, m, meta));
            }
            debug!("Viewpoint {} done", q);
        }
        for (q, m, value) in meta_rows {
            table.push(Community::Metacommunity, q, m, value);
        }
        Ok(table)
    }

    fn push_subcommunities(
        &self,
        table: &mut DiversityTable,
        viewpoint: f64,
        measure: Measure,
        values: &[f64],
    ) {
        for (name, &value) in self.abundance.subcommunities().iter().zip(values) {
            table.push(
                Community::Subcommunity(name.clone()),
                viewpoint,
                measure,
                value,
            );
        }
    }
}
