//! Special functions used by the likelihoods and conditional expectations
//!
//! Log-gamma uses the Lanczos approximation (g = 7, n = 9) with the reflection
//! formula below 0.5. The Gauss hypergeometric function is summed directly from
//! its power series, which converges for `0 <= z < 1`.

use crate::error::CltvError;
use std::f64::consts::PI;

const LANCZOS_COEFFS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_403,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

const MAX_SERIES_TERMS: usize = 500_000;
const SERIES_TOLERANCE: f64 = 1e-16;

/// Natural log of the Gamma function for `x > 0`.
///
/// Returns `+inf` for non-positive input so that callers surface it through
/// their own finiteness checks.
pub fn ln_gamma(x: f64) -> f64 {
    if x <= 0.0 || x.is_nan() {
        return f64::INFINITY;
    }
    if x < 0.5 {
        // Γ(x)Γ(1 − x) = π / sin(πx)
        return (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let mut sum = LANCZOS_COEFFS[0];
    for (i, &c) in LANCZOS_COEFFS[1..].iter().enumerate() {
        sum += c / (x + (i as f64) + 1.0);
    }

    let t = x + 7.5;
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + sum.ln()
}

/// Natural log of the Beta function, `ln B(a, b)`.
pub fn ln_beta(a: f64, b: f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

/// `₂F₁(a, b; c; z) − 1` for `0 <= z < 1`.
///
/// Returning the series without its leading unit term keeps full precision
/// when the caller needs `ln ₂F₁` of a value very close to one.
pub fn hyp2f1_minus_one(a: f64, b: f64, c: f64, z: f64) -> crate::Result<f64> {
    if !(0.0..1.0).contains(&z) {
        return Err(CltvError::InvalidArgument(format!(
            "hypergeometric argument z = {z} outside [0, 1)"
        )));
    }

    let mut term = 1.0;
    let mut sum = 0.0;
    for k in 0..MAX_SERIES_TERMS {
        let kf = k as f64;
        let denom = (c + kf) * (kf + 1.0);
        if denom == 0.0 {
            return Err(CltvError::NonFinite {
                quantity: "hypergeometric series (pole in c)",
            });
        }

        let ratio = (a + kf) * (b + kf) / denom * z;
        term *= ratio;
        sum += term;

        if !sum.is_finite() {
            return Err(CltvError::NonFinite {
                quantity: "hypergeometric series",
            });
        }
        if term == 0.0
            || (ratio.abs() < 1.0 && term.abs() <= SERIES_TOLERANCE * (sum.abs() + f64::MIN_POSITIVE))
        {
            return Ok(sum);
        }
    }

    Err(CltvError::NonFinite {
        quantity: "hypergeometric series (no convergence)",
    })
}

/// `ln(exp(a) + exp(b))` without overflow.
pub fn log_sum_exp(a: f64, b: f64) -> f64 {
    let max = a.max(b);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    max + ((a - max).exp() + (b - max).exp()).ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ln_gamma_known_values() {
        assert_relative_eq!(ln_gamma(1.0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(ln_gamma(2.0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(ln_gamma(5.0), 24.0_f64.ln(), epsilon = 1e-10);
        assert_relative_eq!(ln_gamma(0.5), PI.sqrt().ln(), epsilon = 1e-10);
        // Γ(0.1) = 9.513507698668732
        assert_relative_eq!(ln_gamma(0.1), 9.513_507_698_668_732_f64.ln(), epsilon = 1e-10);
        assert!(ln_gamma(0.0).is_infinite());
        assert!(ln_gamma(-1.0).is_infinite());
    }

    #[test]
    fn test_ln_gamma_large_argument() {
        // Stirling: ln Γ(x) ≈ (x − 0.5) ln x − x + 0.5 ln(2π)
        let x = 1.0e6_f64;
        let stirling = (x - 0.5) * x.ln() - x + 0.5 * (2.0 * PI).ln() + 1.0 / (12.0 * x);
        assert_relative_eq!(ln_gamma(x), stirling, max_relative = 1e-12);
    }

    #[test]
    fn test_ln_beta_symmetry_and_value() {
        assert_relative_eq!(ln_beta(2.0, 3.0), ln_beta(3.0, 2.0), epsilon = 1e-12);
        // B(2, 3) = 1/12
        assert_relative_eq!(ln_beta(2.0, 3.0), (1.0_f64 / 12.0).ln(), epsilon = 1e-10);
    }

    #[test]
    fn test_hyp2f1_log_identity() {
        // ₂F₁(1, 1; 2; z) = −ln(1 − z) / z
        for &z in &[0.05, 0.3, 0.7, 0.95] {
            let expected = -(1.0_f64 - z).ln() / z - 1.0;
            let value = hyp2f1_minus_one(1.0, 1.0, 2.0, z).unwrap();
            assert_relative_eq!(value, expected, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_hyp2f1_binomial_identity() {
        // ₂F₁(a, b; b; z) = (1 − z)^(−a)
        let (a, b, z) = (2.5, 1.7, 0.4);
        let expected = (1.0_f64 - z).powf(-a) - 1.0;
        assert_relative_eq!(hyp2f1_minus_one(a, b, b, z).unwrap(), expected, max_relative = 1e-12);
    }

    #[test]
    fn test_hyp2f1_terminating_polynomial() {
        // ₂F₁(−2, b; c; z) = 1 − 2bz/c + b(b+1)z²/(c(c+1))
        let (b, c, z) = (3.0, 4.0, 0.5);
        let expected = -2.0 * b * z / c + b * (b + 1.0) * z * z / (c * (c + 1.0));
        assert_relative_eq!(hyp2f1_minus_one(-2.0, b, c, z).unwrap(), expected, epsilon = 1e-14);
    }

    #[test]
    fn test_hyp2f1_rejects_out_of_range_argument() {
        assert!(hyp2f1_minus_one(1.0, 1.0, 2.0, 1.0).is_err());
        assert!(hyp2f1_minus_one(1.0, 1.0, 2.0, -0.1).is_err());
        assert_eq!(hyp2f1_minus_one(1.0, 1.0, 2.0, 0.0).unwrap(), 0.0);
    }

    #[test]
    fn test_log_sum_exp() {
        assert_relative_eq!(log_sum_exp(0.0, 0.0), 2.0_f64.ln(), epsilon = 1e-15);
        assert_relative_eq!(log_sum_exp(1000.0, 1000.0), 1000.0 + 2.0_f64.ln(), epsilon = 1e-12);
        assert_eq!(log_sum_exp(f64::NEG_INFINITY, f64::NEG_INFINITY), f64::NEG_INFINITY);
        assert_relative_eq!(log_sum_exp(-5.0, f64::NEG_INFINITY), -5.0, epsilon = 1e-15);
    }
}
