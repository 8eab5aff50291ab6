//! # Density-model capability layer
//!
//! This module defines the narrow interface the estimator needs from a
//! density-estimation backend, together with the typed representation of a
//! partially observed feature vector.
//!
//! ## Overview
//! -----------------
//! - [`DensityModel`] – the capability trait: fit with heteroscedastic
//!   per-sample errors, condition on a partial observation, sample, score,
//!   persist. Any compatible numerical backend can sit behind it without
//!   changing the estimator logic.
//! - [`Measurement`] – a tagged feature value, `Observed(f64)` or `Missing`.
//!   The not-a-number sentinel used by the numerical layer is converted
//!   to/from this type only at this boundary.
//! - [`PartialObservation`] – a full-schema vector of [`Measurement`]s plus
//!   an optional symmetric measurement covariance. Invariant: an observed
//!   entry carries a finite, non-negative variance; a missing entry carries
//!   exactly zero.
//! - [`GaussianMixture`] – the provided implementation (see
//!   [`mixture`](crate::density::mixture)).
//!
//! ## See also
//! ------------
//! * [`mixture`](crate::density::mixture) – Conditioning/sampling arithmetic.
//! * [`fit`](crate::density::fit) – Extreme-deconvolution EM fitting.
//! * [`persist`](crate::density::persist) – Model parameter save/load.

pub mod fit;
pub mod mixture;
pub mod persist;

use camino::Utf8Path;
use nalgebra::{DMatrix, DVector};
use rand::Rng;

use crate::density::fit::FitMethod;
use crate::snhost_errors::SnHostError;

pub use mixture::GaussianMixture;

/// A single feature entry of a partial observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    /// The feature was measured and carries this value.
    Observed(f64),
    /// The feature was not measured; the conditional distribution covers it.
    Missing,
}

impl Measurement {
    /// Convert from the not-a-number sentinel convention.
    pub fn from_sentinel(value: f64) -> Self {
        if value.is_nan() {
            Measurement::Missing
        } else {
            Measurement::Observed(value)
        }
    }

    /// Convert back to the not-a-number sentinel convention.
    pub fn to_sentinel(self) -> f64 {
        match self {
            Measurement::Observed(value) => value,
            Measurement::Missing => f64::NAN,
        }
    }

    pub fn is_observed(self) -> bool {
        matches!(self, Measurement::Observed(_))
    }
}

/// A full-schema feature vector with some entries missing, optionally
/// weighted by a symmetric measurement covariance.
///
/// The covariance is aligned with the schema: rows/columns of missing
/// entries carry zero variance, observed diagonals are finite and
/// non-negative. Construction enforces both.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialObservation {
    measurements: Vec<Measurement>,
    covariance: Option<DMatrix<f64>>,
}

impl PartialObservation {
    /// Build an unweighted partial observation.
    ///
    /// Conditioning without an error term is a distinct, valid mode: the
    /// observed values are treated as exact.
    pub fn new(measurements: Vec<Measurement>) -> Self {
        PartialObservation {
            measurements,
            covariance: None,
        }
    }

    /// Build a partial observation weighted by per-feature standard errors.
    ///
    /// Arguments
    /// -----------------
    /// * `measurements`: full-schema tagged values.
    /// * `errors`: 1-σ standard errors aligned with the schema; entries at
    ///   missing positions must be zero. Squared into a diagonal covariance.
    pub fn with_errors(
        measurements: Vec<Measurement>,
        errors: &[f64],
    ) -> Result<Self, SnHostError> {
        if errors.len() != measurements.len() {
            return Err(SnHostError::ShapeMismatch(format!(
                "error vector length {} does not match schema width {}",
                errors.len(),
                measurements.len()
            )));
        }
        let n = measurements.len();
        let covariance =
            DMatrix::from_fn(n, n, |i, j| if i == j { errors[i] * errors[i] } else { 0.0 });
        Self::with_covariance(measurements, covariance)
    }

    /// Build a partial observation weighted by a general symmetric covariance.
    pub fn with_covariance(
        measurements: Vec<Measurement>,
        covariance: DMatrix<f64>,
    ) -> Result<Self, SnHostError> {
        let n = measurements.len();
        if covariance.nrows() != n || covariance.ncols() != n {
            return Err(SnHostError::ShapeMismatch(format!(
                "covariance is {}x{} but schema width is {}",
                covariance.nrows(),
                covariance.ncols(),
                n
            )));
        }
        for (i, measurement) in measurements.iter().enumerate() {
            let variance = covariance[(i, i)];
            match measurement {
                Measurement::Observed(_) => {
                    if !variance.is_finite() || variance < 0.0 {
                        return Err(SnHostError::InvalidConditioning(format!(
                            "observed entry {i} carries variance {variance}"
                        )));
                    }
                }
                Measurement::Missing => {
                    if variance != 0.0 {
                        return Err(SnHostError::InvalidConditioning(format!(
                            "missing entry {i} carries non-zero variance {variance}"
                        )));
                    }
                }
            }
        }
        Ok(PartialObservation {
            measurements,
            covariance: Some(covariance),
        })
    }

    /// Build from a not-a-number-marked vector and optional per-feature
    /// variances, the convention of the numerical layer.
    pub fn from_sentinel(
        values: &[f64],
        variances: Option<&[f64]>,
    ) -> Result<Self, SnHostError> {
        let measurements: Vec<Measurement> =
            values.iter().map(|v| Measurement::from_sentinel(*v)).collect();
        match variances {
            None => Ok(Self::new(measurements)),
            Some(var) => {
                if var.len() != measurements.len() {
                    return Err(SnHostError::ShapeMismatch(format!(
                        "variance vector length {} does not match schema width {}",
                        var.len(),
                        measurements.len()
                    )));
                }
                let n = measurements.len();
                let covariance =
                    DMatrix::from_fn(n, n, |i, j| if i == j { var[i] } else { 0.0 });
                Self::with_covariance(measurements, covariance)
            }
        }
    }

    /// Schema width of this observation.
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    pub fn covariance(&self) -> Option<&DMatrix<f64>> {
        self.covariance.as_ref()
    }

    /// Indices of observed entries, ascending.
    pub fn observed_indices(&self) -> Vec<usize> {
        self.measurements
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_observed())
            .map(|(i, _)| i)
            .collect()
    }

    /// Indices of missing entries, ascending. The conditional distribution
    /// is defined over these, in this order.
    pub fn missing_indices(&self) -> Vec<usize> {
        self.measurements
            .iter()
            .enumerate()
            .filter(|(_, m)| !m.is_observed())
            .map(|(i, _)| i)
            .collect()
    }

    /// The observation as a not-a-number-marked vector.
    pub fn sentinel_vector(&self) -> DVector<f64> {
        DVector::from_fn(self.measurements.len(), |i, _| {
            self.measurements[i].to_sentinel()
        })
    }
}

/// Capability interface over a density-estimation backend.
///
/// The estimator only ever talks to this trait, so a different numerical
/// library can be substituted without touching the estimator logic.
pub trait DensityModel: Sized {
    /// Fit a model to `x` (samples × features) with per-sample measurement
    /// covariances `xerr` (one features × features matrix per sample).
    fn fit<R: Rng + ?Sized>(
        x: &DMatrix<f64>,
        xerr: &[DMatrix<f64>],
        n_components: usize,
        method: FitMethod,
        rng: &mut R,
    ) -> Result<Self, SnHostError>;

    /// Restrict the model to the missing entries of `partial`, given its
    /// observed entries (and measurement covariance, if any).
    fn condition(&self, partial: &PartialObservation) -> Result<Self, SnHostError>;

    /// Draw `count` samples, one per row.
    fn sample<R: Rng + ?Sized>(
        &self,
        count: usize,
        rng: &mut R,
    ) -> Result<DMatrix<f64>, SnHostError>;

    /// Total log-likelihood of `x` under the model, optionally folding
    /// per-sample measurement covariances into each component.
    fn log_likelihood(
        &self,
        x: &DMatrix<f64>,
        xerr: Option<&[DMatrix<f64>]>,
    ) -> Result<f64, SnHostError>;

    /// Number of free parameters, as counted by information criteria.
    fn free_parameter_count(&self) -> usize;

    fn component_count(&self) -> usize;

    fn dimension(&self) -> usize;

    /// Persist the fitted parameters to `path`.
    fn save(&self, path: &Utf8Path) -> Result<(), SnHostError>;

    /// Load previously persisted parameters from `path`.
    fn load(path: &Utf8Path) -> Result<Self, SnHostError>;
}

#[cfg(test)]
mod partial_observation_test {
    use super::*;

    #[test]
    fn test_sentinel_round_trip() {
        let partial =
            PartialObservation::from_sentinel(&[1.0, f64::NAN, -2.0], None).unwrap();

        assert_eq!(partial.observed_indices(), vec![0, 2]);
        assert_eq!(partial.missing_indices(), vec![1]);

        let sentinel = partial.sentinel_vector();
        assert_eq!(sentinel[0], 1.0);
        assert!(sentinel[1].is_nan());
        assert_eq!(sentinel[2], -2.0);
    }

    #[test]
    fn test_errors_are_squared_into_variances() {
        let partial = PartialObservation::with_errors(
            vec![Measurement::Observed(1.0), Measurement::Missing],
            &[0.3, 0.0],
        )
        .unwrap();

        let cov = partial.covariance().unwrap();
        assert!((cov[(0, 0)] - 0.09).abs() < 1e-15);
        assert_eq!(cov[(1, 1)], 0.0);
        assert_eq!(cov[(0, 1)], 0.0);
    }

    #[test]
    fn test_missing_entry_must_carry_zero_variance() {
        let result = PartialObservation::from_sentinel(&[f64::NAN, 2.0], Some(&[0.5, 0.1]));

        assert!(matches!(
            result,
            Err(SnHostError::InvalidConditioning(_))
        ));
    }

    #[test]
    fn test_observed_entry_rejects_non_finite_variance() {
        let result = PartialObservation::from_sentinel(
            &[1.0, f64::NAN],
            Some(&[f64::INFINITY, 0.0]),
        );

        assert!(matches!(
            result,
            Err(SnHostError::InvalidConditioning(_))
        ));
    }

    #[test]
    fn test_variance_length_must_match_schema() {
        let result = PartialObservation::from_sentinel(&[1.0, 2.0], Some(&[0.1]));

        assert!(matches!(result, Err(SnHostError::ShapeMismatch(_))));
    }
}
