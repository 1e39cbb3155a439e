use approx::{assert_abs_diff_eq, assert_relative_eq};

use crate::error::DiversityError;
use crate::power_mean::power_mean;
use crate::tests::init;

#[test]
fn test_order_zero_is_weighted_arithmetic_mean() {
    init();
    let v = power_mean(0.0, &[0.25, 0.75], &[4.0, 8.0]).unwrap();
    assert_relative_eq!(v, 7.0, epsilon = 1e-12);
}

#[test]
fn test_order_zero_counts_present_types() {
    init();
    // items 1/p_i at q = 0 sum to the number of present types
    let p = [0.25, 0.25, 0.5, 0.0];
    let items: Vec<f64> = p.iter().map(|&x| if x > 0.0 { 1.0 / x } else { 0.0 }).collect();
    let v = power_mean(0.0, &p, &items).unwrap();
    assert_relative_eq!(v, 3.0, epsilon = 1e-12);
}

#[test]
fn test_order_one_is_geometric_mean() {
    init();
    let v = power_mean(1.0, &[0.5, 0.5], &[1.0, 4.0]).unwrap();
    assert_relative_eq!(v, 2.0, epsilon = 1e-12);
}

#[test]
fn test_order_one_matches_neighbouring_orders() {
    init();
    let w = [0.2, 0.3, 0.5];
    let x = [1.5, 3.0, 7.0];
    let at_one = power_mean(1.0, &w, &x).unwrap();
    for q in [1.0 - 1e-6, 1.0 + 1e-6] {
        let near = power_mean(q, &w, &x).unwrap();
        assert_relative_eq!(near, at_one, max_relative = 1e-4);
    }
}

#[test]
fn test_order_two_is_weighted_harmonic_mean() {
    init();
    let v = power_mean(2.0, &[0.5, 0.5], &[1.0, 4.0]).unwrap();
    assert_relative_eq!(v, 1.6, epsilon = 1e-12);
}

#[test]
fn test_infinite_order_is_minimum() {
    init();
    let w = [0.1, 0.6, 0.3];
    let x = [5.0, 2.5, 9.0];
    assert_relative_eq!(power_mean(f64::INFINITY, &w, &x).unwrap(), 2.5);
    // exponent below -100 takes the same branch
    assert_relative_eq!(power_mean(250.0, &w, &x).unwrap(), 2.5);
}

#[test]
fn test_large_finite_order_approaches_minimum() {
    init();
    let v = power_mean(60.0, &[0.5, 0.5], &[2.0, 3.0]).unwrap();
    assert!(v >= 2.0 && v < 2.05, "got {v}");
}

#[test]
fn test_zero_weight_entries_are_ignored() {
    init();
    // the NaN sits outside the domain
    let v = power_mean(2.0, &[1.0, 0.0], &[2.0, f64::NAN]).unwrap();
    assert_relative_eq!(v, 2.0, epsilon = 1e-12);
}

#[test]
fn test_zero_item_with_non_positive_exponent() {
    init();
    for q in [1.0, 2.0, 3.5, f64::INFINITY] {
        let v = power_mean(q, &[0.5, 0.5], &[0.0, 4.0]).unwrap();
        assert_abs_diff_eq!(v, 0.0);
    }
    let v = power_mean(0.5, &[0.5, 0.5], &[0.0, 4.0]).unwrap();
    assert_relative_eq!(v, 1.0, epsilon = 1e-12);
}

#[test]
fn test_empty_domain() {
    init();
    assert_abs_diff_eq!(power_mean(0.0, &[0.0, 0.0], &[1.0, 2.0]).unwrap(), 0.0);
    let err = power_mean(2.0, &[0.0, 0.0], &[1.0, 2.0]).unwrap_err();
    assert!(matches!(err, DiversityError::Domain(_)), "got {err:?}");
}

#[test]
fn test_invalid_arguments() {
    init();
    let cases = [
        power_mean(-0.5, &[1.0], &[1.0]),
        power_mean(f64::NAN, &[1.0], &[1.0]),
        power_mean(1.0, &[-0.5, 1.5], &[1.0, 1.0]),
        power_mean(1.0, &[f64::INFINITY], &[1.0]),
        power_mean(1.0, &[1.0], &[f64::NAN]),
        power_mean(1.0, &[1.0], &[-2.0]),
    ];
    for result in cases {
        assert!(
            matches!(result, Err(DiversityError::InvalidValue(_))),
            "got {result:?}"
        );
    }
    let err = power_mean(1.0, &[0.5, 0.5], &[1.0]).unwrap_err();
    assert!(matches!(err, DiversityError::InputShape(_)));
}

#[test]
fn test_monotone_non_increasing_in_viewpoint() {
    init();
    let w = [0.1, 0.2, 0.3, 0.4];
    let x = [8.0, 1.0, 3.0, 2.0];
    let orders = [0.0, 0.5, 1.0, 2.0, 4.0, 10.0, f64::INFINITY];
    let values: Vec<f64> = orders
        .iter()
        .map(|&q| power_mean(q, &w, &x).unwrap())
        .collect();
    for pair in values.windows(2) {
        assert!(pair[1] <= pair[0] + 1e-12, "{values:?}");
    }
}

#[test]
fn test_large_orders_stay_within_bounds() {
    init();
    for x in [5000.0, 1e-4, 1e12] {
        for q in [50.0, 90.0, 100.5] {
            let v = power_mean(q, &[0.5, 0.5], &[x, x]).unwrap();
            assert_relative_eq!(v, x, max_relative = 1e-12);
        }
    }
    // mixed magnitudes: min <= M <= max
    let x = [1e-6, 3e4, 7.0];
    for q in [0.0, 0.5, 2.0, 30.0, 90.0] {
        let v = power_mean(q, &[0.2, 0.5, 0.3], &x).unwrap();
        assert!(v.is_finite() && v >= 1e-6 * (1.0 - 1e-12) && v <= 3e4, "q={q}: {v}");
    }
}

#[test]
fn test_uniform_items_at_every_order() {
    init();
    let n = 5000;
    let w = vec![1.0 / n as f64; n];
    let x = vec![n as f64; n];
    for q in [0.0, 1.0, 2.0, 50.0, 90.0, 200.0, f64::INFINITY] {
        let v = power_mean(q, &w, &x).unwrap();
        assert_relative_eq!(v, n as f64, max_relative = 1e-9);
    }
}
