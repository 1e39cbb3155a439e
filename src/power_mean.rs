//! Weighted power means parameterized by a viewpoint q.
//!
//! `power_mean(q, w, x)` is the power mean of `x` weighted by `w` at exponent
//! `r = 1 - q`, restricted to the domain `w_i > 0`:
//!
//! | viewpoint        | exponent     | value                          |
//! |------------------|--------------|--------------------------------|
//! | q = 0            | r = 1        | Σ w_i x_i                      |
//! | q = 1            | r = 0        | exp(Σ w_i ln x_i)              |
//! | q > 101 or q = ∞ | r < -100     | min x_i                        |
//! | otherwise        | r            | (Σ w_i x_i^r)^(1/r)            |
//!
//! The q = 1 case is evaluated directly as a geometric mean instead of as a
//! limit. With r ≤ 0 a zero item in the domain sends the mean to 0; it is
//! returned as such and `0^r` is never evaluated. The general case is
//! evaluated as `m · (Σ w_i (x_i/m)^r)^(1/r)` with `m` the largest item
//! (smallest when r < 0), which keeps large viewpoints finite.
//!
//! Every diversity measure is one call to [`power_mean`] with items
//! `numerator / (Z·x)`: with x = p and Z = I, q = 0 counts the present types,
//! q = 1 is the exponential of Shannon entropy, q = 2 the inverse Simpson
//! concentration and q = ∞ the inverse Berger-Parker dominance.

use log::trace;

use crate::error::{DiversityError, Result};

/// |1 - q| below this is treated as q = 1.
pub const ORDER_ONE_TOLERANCE: f64 = 1e-8;

/// Exponents below this use the minimum (q → ∞ limit).
pub const MIN_EXPONENT: f64 = -100.0;

pub fn validate_viewpoint(viewpoint: f64) -> Result<()> {
    if viewpoint.is_nan() || viewpoint < 0.0 {
        return Err(DiversityError::invalid_value(format!(
            "viewpoint must be non-negative, got {viewpoint}"
        )));
    }
    Ok(())
}

pub fn power_mean(viewpoint: f64, weights: &[f64], items: &[f64]) -> Result<f64> {
    validate_viewpoint(viewpoint)?;
    if weights.len() != items.len() {
        return Err(DiversityError::input_shape(format!(
            "{} weights for {} items",
            weights.len(),
            items.len()
        )));
    }

    let mut domain: Vec<(f64, f64)> = Vec::with_capacity(weights.len());
    for (i, (&w, &x)) in weights.iter().zip(items).enumerate() {
        if !w.is_finite() || w < 0.0 {
            return Err(DiversityError::invalid_value(format!(
                "weight {w} at position {i}"
            )));
        }
        if w == 0.0 {
            continue;
        }
        if !x.is_finite() || x < 0.0 {
            return Err(DiversityError::invalid_value(format!(
                "item {x} at position {i}"
            )));
        }
        domain.push((w, x));
    }

    if domain.is_empty() {
        if viewpoint == 0.0 {
            return Ok(0.0);
        }
        return Err(DiversityError::domain(format!(
            "power mean at viewpoint {viewpoint} over an empty domain"
        )));
    }

    let exponent = 1.0 - viewpoint;
    let has_zero = domain.iter().any(|&(_, x)| x == 0.0);
    trace!(
        "Power mean: viewpoint={}, exponent={}, domain={}",
        viewpoint,
        exponent,
        domain.len()
    );

    if exponent.abs() < ORDER_ONE_TOLERANCE {
        if has_zero {
            return Ok(0.0);
        }
        let log_mean: f64 = domain.iter().map(|&(w, x)| w * x.ln()).sum();
        return Ok(log_mean.exp());
    }

    if exponent < MIN_EXPONENT {
        return Ok(domain
            .iter()
            .map(|&(_, x)| x)
            .fold(f64::INFINITY, f64::min));
    }

    if exponent < 0.0 && has_zero {
        return Ok(0.0);
    }

    // Scale by the largest item (smallest for r < 0) so every term lies in
    // (0, 1] and the sum cannot underflow or overflow at large |r|.
    let scale = if exponent > 0.0 {
        domain.iter().map(|&(_, x)| x).fold(0.0, f64::max)
    } else {
        domain.iter().map(|&(_, x)| x).fold(f64::INFINITY, f64::min)
    };
    if scale == 0.0 {
        return Ok(0.0);
    }
    let sum: f64 = domain
        .iter()
        .map(|&(w, x)| w * (x / scale).powf(exponent))
        .sum();
    Ok(scale * sum.powf(1.0 / exponent))
}
