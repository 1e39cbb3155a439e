//! The diversity measures and how each one is evaluated.
//!
//! Every measure is a power mean over a subcommunity's normalized abundance
//! `P̄_j` of a per-species ratio, optionally inverted:
//!
//! | measure            | ratio              | inverted |
//! |--------------------|--------------------|----------|
//! | `alpha`            | `1 / (Z·P)_ij`     | no       |
//! | `rho`              | `(Z·p)_i / (Z·P)_ij` | no     |
//! | `beta`             | same as `rho`      | yes      |
//! | `gamma`            | `1 / (Z·p)_i`      | no       |
//! | `normalized_alpha` | `1 / (Z·P̄)_ij`     | no       |
//! | `normalized_rho`   | `(Z·p)_i / (Z·P̄)_ij` | no     |
//! | `normalized_beta`  | same as `normalized_rho` | yes |
//!
//! Metacommunity values are the power mean of the subcommunity values with
//! the subcommunity weights `w` at the same viewpoint.

use std::fmt;
use std::str::FromStr;

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::arrays::Array;

use crate::abundance::Abundance;
use crate::error::{DiversityError, Result};
use crate::operators::column;
use crate::power_mean::{power_mean, validate_viewpoint};
use crate::weighted::WeightedAbundance;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    Alpha,
    Rho,
    Beta,
    Gamma,
    NormalizedAlpha,
    NormalizedRho,
    NormalizedBeta,
}

/// Numerator of the per-species ratio.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Numerator {
    One,
    Metacommunity,
}

/// Which similarity-weighted abundance divides the numerator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Denominator {
    Subcommunity,
    NormalizedSubcommunity,
    Metacommunity,
}

impl Measure {
    pub const ALL: [Measure; 7] = [
        Measure::Alpha,
        Measure::Rho,
        Measure::Beta,
        Measure::Gamma,
        Measure::NormalizedAlpha,
        Measure::NormalizedRho,
        Measure::NormalizedBeta,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Measure::Alpha => "alpha",
            Measure::Rho => "rho",
            Measure::Beta => "beta",
            Measure::Gamma => "gamma",
            Measure::NormalizedAlpha => "normalized_alpha",
            Measure::NormalizedRho => "normalized_rho",
            Measure::NormalizedBeta => "normalized_beta",
        }
    }

    pub fn numerator(&self) -> Numerator {
        match self {
            Measure::Alpha | Measure::Gamma | Measure::NormalizedAlpha => Numerator::One,
            Measure::Rho | Measure::Beta | Measure::NormalizedRho | Measure::NormalizedBeta => {
                Numerator::Metacommunity
            }
        }
    }

    pub fn denominator(&self) -> Denominator {
        match self {
            Measure::Alpha | Measure::Rho | Measure::Beta => Denominator::Subcommunity,
            Measure::NormalizedAlpha | Measure::NormalizedRho | Measure::NormalizedBeta => {
                Denominator::NormalizedSubcommunity
            }
            Measure::Gamma => Denominator::Metacommunity,
        }
    }

    pub fn is_inverted(&self) -> bool {
        matches!(self, Measure::Beta | Measure::NormalizedBeta)
    }

    pub fn is_normalized(&self) -> bool {
        self.denominator() == Denominator::NormalizedSubcommunity
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Measure {
    type Err = DiversityError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Measure::ALL
            .iter()
            .copied()
            .find(|m| m.name() == key)
            .ok_or_else(|| DiversityError::invalid_value(format!("unknown measure '{s}'")))
    }
}

/// Value of `measure` at `viewpoint` for subcommunity `j`.
pub fn subcommunity_diversity(
    abundance: &Abundance,
    weighted: &WeightedAbundance,
    viewpoint: f64,
    measure: Measure,
    j: usize,
) -> Result<f64> {
    validate_viewpoint(viewpoint)?;
    let k = abundance.n_subcommunities();
    if j >= k {
        return Err(DiversityError::input_shape(format!(
            "subcommunity index {j} out of range for {k} subcommunities"
        )));
    }
    let name = &abundance.subcommunities()[j];
    if abundance.is_empty_subcommunity(j) {
        return empty_subcommunity(measure, viewpoint, name);
    }

    let weights = column(abundance.normalized_subcommunity_abundance(), j);
    let zp = weighted.metacommunity();
    let mut ratios = vec![0.0; weights.len()];
    for (i, ratio) in ratios.iter_mut().enumerate() {
        if weights[i] <= 0.0 {
            continue;
        }
        let denominator = match measure.denominator() {
            Denominator::Subcommunity => *weighted.subcommunity().get((i, j)),
            Denominator::NormalizedSubcommunity => *weighted.normalized_subcommunity().get((i, j)),
            Denominator::Metacommunity => zp[i],
        };
        if denominator <= 0.0 {
            return Err(DiversityError::domain(format!(
                "{measure} of '{name}': similarity-weighted abundance of species '{}' is zero",
                abundance.species()[i]
            )));
        }
        let numerator = match measure.numerator() {
            Numerator::One => 1.0,
            Numerator::Metacommunity => zp[i],
        };
        *ratio = numerator / denominator;
    }

    let value = power_mean(viewpoint, &weights, &ratios)?;
    trace!("{} of '{}' at q={}: {}", measure, name, viewpoint, value);
    if !measure.is_inverted() {
        return Ok(value);
    }
    if value == 0.0 {
        return Err(DiversityError::domain(format!(
            "{measure} of '{name}' at q={viewpoint} inverts a zero mean"
        )));
    }
    Ok(1.0 / value)
}

/// Values of `measure` at `viewpoint` for every subcommunity, in column order.
pub fn subcommunity_diversities(
    abundance: &Abundance,
    weighted: &WeightedAbundance,
    viewpoint: f64,
    measure: Measure,
) -> Result<Vec<f64>> {
    (0..abundance.n_subcommunities())
        .map(|j| subcommunity_diversity(abundance, weighted, viewpoint, measure, j))
        .collect()
}

/// Value of `measure` at `viewpoint` for the whole metacommunity.
///
/// Empty subcommunities carry zero weight and are left out.
pub fn metacommunity_diversity(
    abundance: &Abundance,
    weighted: &WeightedAbundance,
    viewpoint: f64,
    measure: Measure,
) -> Result<f64> {
    let weights = abundance.subcommunity_weights();
    let values = (0..abundance.n_subcommunities())
        .map(|j| {
            if weights[j] > 0.0 {
                subcommunity_diversity(abundance, weighted, viewpoint, measure, j)
            } else {
                Ok(0.0)
            }
        })
        .collect::<Result<Vec<f64>>>()?;
    combine_subcommunities(weights, &values, viewpoint)
}

/// Power mean of per-subcommunity values with the subcommunity weights.
pub(crate) fn combine_subcommunities(
    weights: &[f64],
    values: &[f64],
    viewpoint: f64,
) -> Result<f64> {
    let value = power_mean(viewpoint, weights, values)?;
    debug!("Metacommunity value at q={}: {}", viewpoint, value);
    Ok(value)
}

fn empty_subcommunity(measure: Measure, viewpoint: f64, name: &str) -> Result<f64> {
    if measure.is_normalized() {
        return Err(DiversityError::empty_population(format!(
            "{measure} of '{name}' is undefined for an empty subcommunity"
        )));
    }
    if viewpoint != 0.0 {
        return Err(DiversityError::empty_population(format!(
            "{measure} of '{name}' at q={viewpoint} is undefined for an empty subcommunity"
        )));
    }
    if measure.is_inverted() {
        return Err(DiversityError::domain(format!(
            "{measure} of '{name}' at q=0 inverts a zero mean"
        )));
    }
    Ok(0.0)
}
