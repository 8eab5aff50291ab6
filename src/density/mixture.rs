//! # Gaussian-mixture density arithmetic
//!
//! Value type for a fitted Gaussian mixture and the closed-form operations
//! the estimator relies on: conditioning on a partially observed vector,
//! sampling, and heteroscedastic likelihood evaluation.
//!
//! ## Conditioning
//! -----------------
//! For each component `k` the schema is partitioned into the observed block
//! `a` and the missing block `b`. With observed values `x_a` and measurement
//! covariance `S_a` (zero when the observation is unweighted):
//!
//! ```text
//! V'_aa = V_aa + S_a
//! w'_k  ∝ w_k · N(x_a | μ_a, V'_aa)
//! μ'_b  = μ_b + V_ba V'_aa⁻¹ (x_a − μ_a)
//! V'_bb = V_bb − V_ba V'_aa⁻¹ V_ab
//! ```
//!
//! The resulting mixture is defined over the missing entries only, in their
//! original relative order. Component reweighting is done in log space and
//! normalized with a log-sum-exp to stay finite for distant observations.
//!
//! ## Units & Conventions
//! -----------------
//! - Samples are rows; features are columns.
//! - Per-sample measurement covariances are full feature × feature matrices;
//!   the catalog loader only populates their diagonals.
//! - Covariances must be symmetric positive definite; a Cholesky failure on
//!   an observed block surfaces as [`SnHostError::SingularCovariance`].
//!
//! ## See also
//! ------------
//! * [`fit`](crate::density::fit) – Extreme-deconvolution EM producing these values.
//! * [`PartialObservation`](crate::density::PartialObservation) – Conditioning input.

use camino::Utf8Path;
use nalgebra::{Cholesky, DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::constants::LN_2PI;
use crate::density::fit::{fit_mixture, FitMethod};
use crate::density::persist;
use crate::density::{DensityModel, PartialObservation};
use crate::snhost_errors::SnHostError;

/// Relative tolerance for the symmetry and weight-normalization checks.
const VALIDATION_TOL: f64 = 1e-6;

/// A fitted Gaussian mixture: weights, component means, component covariances.
///
/// Immutable once built; fitting or conditioning produces a new value.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianMixture {
    weights: DVector<f64>,
    means: Vec<DVector<f64>>,
    covariances: Vec<DMatrix<f64>>,
}

impl GaussianMixture {
    /// Build a mixture from raw parameters, validating the model invariants.
    ///
    /// Arguments
    /// -----------------
    /// * `weights`: component weights, non-negative, summing to 1 within
    ///   tolerance (renormalized exactly on acceptance).
    /// * `means`: one mean vector per component, all of the same dimension.
    /// * `covariances`: one symmetric square matrix per component.
    ///
    /// Return
    /// ----------
    /// * The validated mixture, or [`SnHostError::ShapeMismatch`] /
    ///   [`SnHostError::InvalidComponentCount`] describing the violation.
    pub fn new(
        weights: DVector<f64>,
        means: Vec<DVector<f64>>,
        covariances: Vec<DMatrix<f64>>,
    ) -> Result<Self, SnHostError> {
        let n_components = weights.len();
        if n_components == 0 {
            return Err(SnHostError::InvalidComponentCount(0));
        }
        if means.len() != n_components || covariances.len() != n_components {
            return Err(SnHostError::ShapeMismatch(format!(
                "{} weights, {} means, {} covariances",
                n_components,
                means.len(),
                covariances.len()
            )));
        }
        let dimension = means[0].len();
        for (k, mean) in means.iter().enumerate() {
            if mean.len() != dimension {
                return Err(SnHostError::ShapeMismatch(format!(
                    "component {k} mean has dimension {} (expected {dimension})",
                    mean.len()
                )));
            }
        }
        for (k, cov) in covariances.iter().enumerate() {
            if cov.nrows() != dimension || cov.ncols() != dimension {
                return Err(SnHostError::ShapeMismatch(format!(
                    "component {k} covariance is {}x{} (expected {dimension}x{dimension})",
                    cov.nrows(),
                    cov.ncols()
                )));
            }
            if !is_symmetric(cov) {
                return Err(SnHostError::ShapeMismatch(format!(
                    "component {k} covariance is not symmetric"
                )));
            }
        }
        let total: f64 = weights.iter().sum();
        if weights.iter().any(|w| *w < 0.0) || !total.is_finite() {
            return Err(SnHostError::ShapeMismatch(
                "component weights must be non-negative and finite".into(),
            ));
        }
        if (total - 1.0).abs() > VALIDATION_TOL {
            return Err(SnHostError::ShapeMismatch(format!(
                "component weights sum to {total}"
            )));
        }
        Ok(GaussianMixture {
            weights: weights / total,
            means,
            covariances,
        })
    }

    pub fn component_count(&self) -> usize {
        self.weights.len()
    }

    pub fn dimension(&self) -> usize {
        self.means[0].len()
    }

    pub fn weights(&self) -> &DVector<f64> {
        &self.weights
    }

    pub fn means(&self) -> &[DVector<f64>] {
        &self.means
    }

    pub fn covariances(&self) -> &[DMatrix<f64>] {
        &self.covariances
    }

    /// Number of free parameters, as counted by information criteria:
    /// `K·d` means, `K·d(d+1)/2` covariance entries, `K−1` weights.
    pub fn free_parameter_count(&self) -> usize {
        let k = self.component_count();
        let d = self.dimension();
        k * d + k * d * (d + 1) / 2 + (k - 1)
    }

    /// Restrict the mixture to the missing entries of `partial`.
    ///
    /// An all-missing observation leaves the mixture unchanged; an
    /// all-observed one fails, since no distribution is left to sample.
    ///
    /// Arguments
    /// -----------------
    /// * `partial`: full-schema tagged values with optional measurement
    ///   covariance. Width must match [`Self::dimension`].
    ///
    /// Return
    /// ----------
    /// * The conditional mixture over the missing entries, in their original
    ///   relative order.
    pub fn condition(&self, partial: &PartialObservation) -> Result<Self, SnHostError> {
        if partial.len() != self.dimension() {
            return Err(SnHostError::ShapeMismatch(format!(
                "partial observation has width {} but the model schema has {}",
                partial.len(),
                self.dimension()
            )));
        }
        let observed = partial.observed_indices();
        let missing = partial.missing_indices();
        if observed.is_empty() {
            return Ok(self.clone());
        }
        if missing.is_empty() {
            return Err(SnHostError::InvalidConditioning(
                "every entry is observed; nothing remains to sample".into(),
            ));
        }

        let sentinel = partial.sentinel_vector();
        let x_a = gather_vector(&sentinel, &observed);
        let s_a = partial
            .covariance()
            .map(|cov| gather_matrix(cov, &observed, &observed));

        let mut log_weights = Vec::with_capacity(self.component_count());
        let mut cond_means = Vec::with_capacity(self.component_count());
        let mut cond_covs = Vec::with_capacity(self.component_count());

        for k in 0..self.component_count() {
            let mu_a = gather_vector(&self.means[k], &observed);
            let mu_b = gather_vector(&self.means[k], &missing);
            let mut v_aa = gather_matrix(&self.covariances[k], &observed, &observed);
            if let Some(s) = &s_a {
                v_aa += s;
            }
            let v_ba = gather_matrix(&self.covariances[k], &missing, &observed);
            let v_bb = gather_matrix(&self.covariances[k], &missing, &missing);

            let chol = Cholesky::new(v_aa).ok_or(SnHostError::SingularCovariance)?;
            let diff = &x_a - &mu_a;

            log_weights.push(self.weights[k].ln() + ln_gaussian(&diff, &chol));
            cond_means.push(&mu_b + &v_ba * chol.solve(&diff));
            let cond_cov = &v_bb - &v_ba * chol.solve(&v_ba.transpose());
            cond_covs.push(symmetrize(cond_cov));
        }

        let norm = log_sum_exp(&log_weights);
        let weights = DVector::from_fn(log_weights.len(), |k, _| (log_weights[k] - norm).exp());
        GaussianMixture::new(weights, cond_means, cond_covs)
    }

    /// Draw `count` samples from the mixture, one per row.
    ///
    /// A component is chosen per sample from the weights, then a draw is made
    /// through that component's Cholesky factor. Deterministic for a seeded
    /// generator.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        count: usize,
        rng: &mut R,
    ) -> Result<DMatrix<f64>, SnHostError> {
        let dimension = self.dimension();
        let factors: Vec<Cholesky<f64, nalgebra::Dyn>> = self
            .covariances
            .iter()
            .map(|cov| Cholesky::new(cov.clone()).ok_or(SnHostError::SingularCovariance))
            .collect::<Result<_, _>>()?;

        let mut samples = DMatrix::zeros(count, dimension);
        for row in 0..count {
            let k = self.pick_component(rng);
            let noise: DVector<f64> =
                DVector::from_fn(dimension, |_, _| rng.sample(StandardNormal));
            let draw = &self.means[k] + factors[k].l() * noise;
            samples.row_mut(row).copy_from(&draw.transpose());
        }
        Ok(samples)
    }

    /// Total log-likelihood of `x` (samples × features), folding the
    /// per-sample measurement covariances into each component when given.
    pub fn log_likelihood(
        &self,
        x: &DMatrix<f64>,
        xerr: Option<&[DMatrix<f64>]>,
    ) -> Result<f64, SnHostError> {
        check_data_shapes(x, xerr, self.dimension())?;
        let mut total = 0.0;
        let mut log_terms = vec![0.0; self.component_count()];
        for i in 0..x.nrows() {
            let xi = x.row(i).transpose();
            for k in 0..self.component_count() {
                let cov = match xerr {
                    Some(errs) => &self.covariances[k] + &errs[i],
                    None => self.covariances[k].clone(),
                };
                let chol = Cholesky::new(cov).ok_or(SnHostError::SingularCovariance)?;
                let diff = &xi - &self.means[k];
                log_terms[k] = self.weights[k].ln() + ln_gaussian(&diff, &chol);
            }
            total += log_sum_exp(&log_terms);
        }
        Ok(total)
    }

    fn pick_component<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let u: f64 = rng.random();
        let mut cumulative = 0.0;
        for (k, w) in self.weights.iter().enumerate() {
            cumulative += w;
            if u < cumulative {
                return k;
            }
        }
        self.weights.len() - 1
    }
}

impl DensityModel for GaussianMixture {
    fn fit<R: Rng + ?Sized>(
        x: &DMatrix<f64>,
        xerr: &[DMatrix<f64>],
        n_components: usize,
        method: FitMethod,
        rng: &mut R,
    ) -> Result<Self, SnHostError> {
        fit_mixture(x, xerr, n_components, method, rng)
    }

    fn condition(&self, partial: &PartialObservation) -> Result<Self, SnHostError> {
        GaussianMixture::condition(self, partial)
    }

    fn sample<R: Rng + ?Sized>(
        &self,
        count: usize,
        rng: &mut R,
    ) -> Result<DMatrix<f64>, SnHostError> {
        GaussianMixture::sample(self, count, rng)
    }

    fn log_likelihood(
        &self,
        x: &DMatrix<f64>,
        xerr: Option<&[DMatrix<f64>]>,
    ) -> Result<f64, SnHostError> {
        GaussianMixture::log_likelihood(self, x, xerr)
    }

    fn free_parameter_count(&self) -> usize {
        GaussianMixture::free_parameter_count(self)
    }

    fn component_count(&self) -> usize {
        GaussianMixture::component_count(self)
    }

    fn dimension(&self) -> usize {
        GaussianMixture::dimension(self)
    }

    fn save(&self, path: &Utf8Path) -> Result<(), SnHostError> {
        persist::save_model(self, path)
    }

    fn load(path: &Utf8Path) -> Result<Self, SnHostError> {
        persist::load_model(path)
    }
}

/// Log-density of a centered Gaussian, given the Cholesky factor of its
/// covariance and the residual `diff = x − μ`.
pub(crate) fn ln_gaussian(diff: &DVector<f64>, chol: &Cholesky<f64, nalgebra::Dyn>) -> f64 {
    let mahalanobis = diff.dot(&chol.solve(diff));
    let ln_det = 2.0 * chol.l().diagonal().iter().map(|v| v.ln()).sum::<f64>();
    -0.5 * (diff.len() as f64 * LN_2PI + ln_det + mahalanobis)
}

/// Numerically stable log(Σ exp(v)).
pub(crate) fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Check that `x` is samples × `dimension` and `xerr`, when present, holds
/// one `dimension` × `dimension` matrix per sample.
pub(crate) fn check_data_shapes(
    x: &DMatrix<f64>,
    xerr: Option<&[DMatrix<f64>]>,
    dimension: usize,
) -> Result<(), SnHostError> {
    if x.ncols() != dimension {
        return Err(SnHostError::ShapeMismatch(format!(
            "data has {} features but the model schema has {dimension}",
            x.ncols()
        )));
    }
    if let Some(errs) = xerr {
        if errs.len() != x.nrows() {
            return Err(SnHostError::ShapeMismatch(format!(
                "{} samples but {} covariance matrices",
                x.nrows(),
                errs.len()
            )));
        }
        for (i, err) in errs.iter().enumerate() {
            if err.nrows() != dimension || err.ncols() != dimension {
                return Err(SnHostError::ShapeMismatch(format!(
                    "covariance {i} is {}x{} (expected {dimension}x{dimension})",
                    err.nrows(),
                    err.ncols()
                )));
            }
        }
    }
    Ok(())
}

pub(crate) fn gather_vector(v: &DVector<f64>, indices: &[usize]) -> DVector<f64> {
    DVector::from_fn(indices.len(), |i, _| v[indices[i]])
}

pub(crate) fn gather_matrix(m: &DMatrix<f64>, rows: &[usize], cols: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(rows.len(), cols.len(), |i, j| m[(rows[i], cols[j])])
}

pub(crate) fn symmetrize(m: DMatrix<f64>) -> DMatrix<f64> {
    let t = m.transpose();
    (m + t) * 0.5
}

fn is_symmetric(m: &DMatrix<f64>) -> bool {
    for i in 0..m.nrows() {
        for j in (i + 1)..m.ncols() {
            let scale = m[(i, j)].abs().max(m[(j, i)].abs()).max(1.0);
            if (m[(i, j)] - m[(j, i)]).abs() > VALIDATION_TOL * scale {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod mixture_test {
    use super::*;
    use crate::density::Measurement;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};

    fn two_feature_component() -> GaussianMixture {
        GaussianMixture::new(
            DVector::from_vec(vec![1.0]),
            vec![DVector::from_vec(vec![1.0, 2.0])],
            vec![DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 2.0])],
        )
        .unwrap()
    }

    #[test]
    fn test_condition_single_component() {
        let mixture = two_feature_component();
        let partial = PartialObservation::new(vec![
            Measurement::Observed(2.0),
            Measurement::Missing,
        ]);

        let conditional = mixture.condition(&partial).unwrap();

        assert_eq!(conditional.dimension(), 1);
        assert_relative_eq!(conditional.means()[0][0], 2.5, epsilon = 1e-12);
        assert_relative_eq!(conditional.covariances()[0][(0, 0)], 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_condition_with_measurement_error() {
        let mixture = two_feature_component();
        let partial = PartialObservation::with_errors(
            vec![Measurement::Observed(2.0), Measurement::Missing],
            &[1.0, 0.0],
        )
        .unwrap();

        let conditional = mixture.condition(&partial).unwrap();

        // V'_aa = 2 + 1 = 3
        assert_relative_eq!(conditional.means()[0][0], 2.0 + 1.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(
            conditional.covariances()[0][(0, 0)],
            2.0 - 1.0 / 3.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_condition_reweights_components() {
        let mixture = GaussianMixture::new(
            DVector::from_vec(vec![0.5, 0.5]),
            vec![
                DVector::from_vec(vec![0.0, 0.0]),
                DVector::from_vec(vec![10.0, 0.0]),
            ],
            vec![DMatrix::identity(2, 2), DMatrix::identity(2, 2)],
        )
        .unwrap();
        let partial = PartialObservation::new(vec![
            Measurement::Observed(0.0),
            Measurement::Missing,
        ]);

        let conditional = mixture.condition(&partial).unwrap();

        assert!(conditional.weights()[0] > 0.999);
        assert_relative_eq!(conditional.weights().iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_condition_all_missing_returns_model() {
        let mixture = two_feature_component();
        let partial =
            PartialObservation::new(vec![Measurement::Missing, Measurement::Missing]);

        let conditional = mixture.condition(&partial).unwrap();

        assert_eq!(conditional, mixture);
    }

    #[test]
    fn test_condition_all_observed_fails() {
        let mixture = two_feature_component();
        let partial = PartialObservation::new(vec![
            Measurement::Observed(1.0),
            Measurement::Observed(2.0),
        ]);

        assert!(matches!(
            mixture.condition(&partial),
            Err(SnHostError::InvalidConditioning(_))
        ));
    }

    #[test]
    fn test_condition_width_mismatch() {
        let mixture = two_feature_component();
        let partial = PartialObservation::new(vec![Measurement::Missing]);

        assert!(matches!(
            mixture.condition(&partial),
            Err(SnHostError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_sample_shape_and_determinism() {
        let mixture = two_feature_component();

        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        let draws_a = mixture.sample(8, &mut rng_a).unwrap();
        let draws_b = mixture.sample(8, &mut rng_b).unwrap();

        assert_eq!(draws_a.nrows(), 8);
        assert_eq!(draws_a.ncols(), 2);
        assert_eq!(draws_a, draws_b);
    }

    #[test]
    fn test_log_likelihood_standard_normal() {
        let mixture = GaussianMixture::new(
            DVector::from_vec(vec![1.0]),
            vec![DVector::from_vec(vec![0.0])],
            vec![DMatrix::identity(1, 1)],
        )
        .unwrap();
        let x = DMatrix::from_row_slice(1, 1, &[0.0]);

        let ll = mixture.log_likelihood(&x, None).unwrap();

        assert_relative_eq!(ll, -0.918_938_533_204_672_7, epsilon = 1e-12);
    }

    #[test]
    fn test_log_likelihood_folds_measurement_error() {
        let mixture = GaussianMixture::new(
            DVector::from_vec(vec![1.0]),
            vec![DVector::from_vec(vec![0.0])],
            vec![DMatrix::identity(1, 1)],
        )
        .unwrap();
        let x = DMatrix::from_row_slice(1, 1, &[0.0]);
        let xerr = vec![DMatrix::from_row_slice(1, 1, &[3.0])];

        let ll = mixture.log_likelihood(&x, Some(&xerr)).unwrap();

        // N(0 | 0, 1 + 3): −0.5·(ln 2π + ln 4)
        assert_relative_eq!(
            ll,
            -0.5 * (LN_2PI + 4.0_f64.ln()),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_new_rejects_bad_weights() {
        let result = GaussianMixture::new(
            DVector::from_vec(vec![0.5, 0.2]),
            vec![DVector::zeros(1), DVector::zeros(1)],
            vec![DMatrix::identity(1, 1), DMatrix::identity(1, 1)],
        );

        assert!(matches!(result, Err(SnHostError::ShapeMismatch(_))));
    }

    #[test]
    fn test_new_rejects_empty_mixture() {
        let result = GaussianMixture::new(DVector::zeros(0), vec![], vec![]);

        assert_eq!(result.unwrap_err(), SnHostError::InvalidComponentCount(0));
    }

    #[test]
    fn test_free_parameter_count() {
        let mixture = GaussianMixture::new(
            DVector::from_vec(vec![0.5, 0.5]),
            vec![DVector::zeros(2), DVector::zeros(2)],
            vec![DMatrix::identity(2, 2), DMatrix::identity(2, 2)],
        )
        .unwrap();

        // 2·2 means + 2·3 covariance entries + 1 weight
        assert_eq!(mixture.free_parameter_count(), 11);
    }

    #[test]
    fn test_log_sum_exp_matches_direct_sum() {
        let values: [f64; 3] = [-1.0, -2.0, -3.0];
        let direct: f64 = values.iter().map(|v| v.exp()).sum::<f64>().ln();

        assert_relative_eq!(log_sum_exp(&values), direct, epsilon = 1e-12);
    }
}
