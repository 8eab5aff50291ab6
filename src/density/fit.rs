//! # Extreme-deconvolution fitting
//!
//! Heteroscedastic EM for Gaussian mixtures: every sample carries its own
//! measurement covariance, which is folded into each component during the
//! E-step and deconvolved out of the M-step update, so the fitted
//! covariances describe the underlying population rather than the noisy
//! measurements.
//!
//! ## Algorithm
//! -----------------
//! With component parameters `(w_k, μ_k, V_k)` and per-sample measurement
//! covariance `S_i`, each iteration evaluates, for `T_ik = V_k + S_i`:
//!
//! ```text
//! q_ik ∝ w_k · N(x_i | μ_k, T_ik)                     (responsibilities, log-space)
//! b_ik = μ_k + V_k T_ik⁻¹ (x_i − μ_k)                 (posterior sample mean)
//! B_ik = V_k − V_k T_ik⁻¹ V_k                         (posterior sample covariance)
//! ```
//!
//! and re-estimates
//!
//! ```text
//! w_k = Σ_i q_ik / n
//! μ_k = Σ_i q_ik b_ik / Σ_i q_ik
//! V_k = Σ_i q_ik [(μ_k − b_ik)(μ_k − b_ik)ᵀ + B_ik] / Σ_i q_ik
//! ```
//!
//! Iteration stops when the log-likelihood gain drops below the method
//! tolerance or the method iteration budget is exhausted.
//!
//! Means are seeded by farthest-point selection over the data rows (the
//! first row drawn from the caller's generator), every component starts from
//! the data covariance, and weights start uniform.

use nalgebra::{Cholesky, DMatrix, DVector};
use rand::Rng;
use std::str::FromStr;

use crate::density::mixture::{
    check_data_shapes, ln_gaussian, log_sum_exp, symmetrize, GaussianMixture,
};
use crate::snhost_errors::SnHostError;

/// Fitting method selector.
///
/// The method changes the fit implementation and iteration budget only; the
/// fitted model schema is identical either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitMethod {
    /// EM capped at 100 iterations.
    AstroMl,
    /// Alternative budget: effectively iterate to convergence, with a small
    /// diagonal regularization in the M-step.
    Bovy,
}

impl FitMethod {
    /// Iteration budget of the method.
    pub fn max_iterations(self) -> usize {
        match self {
            FitMethod::AstroMl => 100,
            FitMethod::Bovy => 1_000_000_000,
        }
    }

    /// Log-likelihood gain below which the fit is considered converged.
    pub fn tolerance(self) -> f64 {
        match self {
            FitMethod::AstroMl => 1e-5,
            FitMethod::Bovy => 1e-10,
        }
    }

    /// Diagonal floor added to each covariance update.
    fn regularization(self) -> f64 {
        match self {
            FitMethod::AstroMl => 0.0,
            FitMethod::Bovy => 1e-9,
        }
    }
}

impl FromStr for FitMethod {
    type Err = SnHostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "astroML" => Ok(FitMethod::AstroMl),
            "Bovy" => Ok(FitMethod::Bovy),
            _ => Err(SnHostError::InvalidFitMethod(s.to_string())),
        }
    }
}

impl std::fmt::Display for FitMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitMethod::AstroMl => write!(f, "astroML"),
            FitMethod::Bovy => write!(f, "Bovy"),
        }
    }
}

/// Fit a Gaussian mixture to noisy data.
///
/// Arguments
/// -----------------
/// * `x`: data, samples × features.
/// * `xerr`: one measurement covariance per sample, features × features.
/// * `n_components`: number of Gaussian components, ≥ 1 and ≤ sample count.
/// * `method`: iteration budget/tolerance selector.
/// * `rng`: generator seeding the mean initialization.
///
/// Return
/// ----------
/// * The fitted [`GaussianMixture`], or the shape/validity error describing
///   why the inputs cannot be fitted.
pub fn fit_mixture<R: Rng + ?Sized>(
    x: &DMatrix<f64>,
    xerr: &[DMatrix<f64>],
    n_components: usize,
    method: FitMethod,
    rng: &mut R,
) -> Result<GaussianMixture, SnHostError> {
    let n_samples = x.nrows();
    let dimension = x.ncols();
    if n_samples == 0 || dimension == 0 {
        return Err(SnHostError::ShapeMismatch(format!(
            "cannot fit an empty data matrix ({n_samples}x{dimension})"
        )));
    }
    check_data_shapes(x, Some(xerr), dimension)?;
    if n_components == 0 || n_components > n_samples {
        return Err(SnHostError::InvalidComponentCount(n_components));
    }

    let mut model = initialize(x, n_components, rng)?;
    let mut previous = f64::NEG_INFINITY;
    for _ in 0..method.max_iterations() {
        let (updated, log_likelihood) = em_step(&model, x, xerr, method.regularization())?;
        model = updated;
        if (log_likelihood - previous).abs() < method.tolerance() {
            break;
        }
        previous = log_likelihood;
    }
    Ok(model)
}

/// Farthest-point seeding: the first mean is a random data row, each further
/// mean is the row maximizing its distance to the already chosen set. All
/// components start from the data covariance with uniform weights.
fn initialize<R: Rng + ?Sized>(
    x: &DMatrix<f64>,
    n_components: usize,
    rng: &mut R,
) -> Result<GaussianMixture, SnHostError> {
    let n_samples = x.nrows();
    let dimension = x.ncols();

    let mut seeds = vec![rng.random_range(0..n_samples)];
    while seeds.len() < n_components {
        let mut best_row = 0;
        let mut best_distance = -1.0;
        for i in 0..n_samples {
            let nearest = seeds
                .iter()
                .map(|&s| (x.row(i) - x.row(s)).norm_squared())
                .fold(f64::INFINITY, f64::min);
            if nearest > best_distance {
                best_distance = nearest;
                best_row = i;
            }
        }
        seeds.push(best_row);
    }

    let grand_mean = DVector::from_fn(dimension, |j, _| x.column(j).mean());
    let mut data_cov = DMatrix::zeros(dimension, dimension);
    for i in 0..n_samples {
        let diff = x.row(i).transpose() - &grand_mean;
        data_cov += &diff * diff.transpose();
    }
    data_cov /= n_samples as f64;
    data_cov += DMatrix::identity(dimension, dimension) * 1e-6;

    let weights =
        DVector::from_element(n_components, 1.0 / n_components as f64);
    let means = seeds
        .iter()
        .map(|&s| x.row(s).transpose())
        .collect::<Vec<_>>();
    let covariances = vec![data_cov; n_components];
    GaussianMixture::new(weights, means, covariances)
}

/// One EM iteration; returns the updated model and the log-likelihood of the
/// model it was computed from.
fn em_step(
    model: &GaussianMixture,
    x: &DMatrix<f64>,
    xerr: &[DMatrix<f64>],
    regularization: f64,
) -> Result<(GaussianMixture, f64), SnHostError> {
    let n_samples = x.nrows();
    let n_components = model.component_count();
    let dimension = model.dimension();

    let mut responsibilities = DMatrix::zeros(n_samples, n_components);
    let mut posterior_means = vec![Vec::with_capacity(n_components); n_samples];
    let mut posterior_covs = vec![Vec::with_capacity(n_components); n_samples];
    let mut log_likelihood = 0.0;

    for i in 0..n_samples {
        let xi = x.row(i).transpose();
        let mut log_resp = vec![0.0; n_components];
        for k in 0..n_components {
            let cov_k = &model.covariances()[k];
            let t = cov_k + &xerr[i];
            let chol = Cholesky::new(t).ok_or(SnHostError::SingularCovariance)?;
            let diff = &xi - &model.means()[k];

            log_resp[k] = model.weights()[k].ln() + ln_gaussian(&diff, &chol);
            posterior_means[i].push(&model.means()[k] + cov_k * chol.solve(&diff));
            let shrink = cov_k - cov_k * chol.solve(cov_k);
            posterior_covs[i].push(symmetrize(shrink));
        }
        let norm = log_sum_exp(&log_resp);
        log_likelihood += norm;
        for k in 0..n_components {
            responsibilities[(i, k)] = (log_resp[k] - norm).exp();
        }
    }

    let mut weights = DVector::zeros(n_components);
    let mut means = Vec::with_capacity(n_components);
    let mut covariances = Vec::with_capacity(n_components);
    for k in 0..n_components {
        let mass: f64 = responsibilities.column(k).iter().sum();
        weights[k] = mass / n_samples as f64;

        let mut mean = DVector::zeros(dimension);
        for i in 0..n_samples {
            mean += &posterior_means[i][k] * responsibilities[(i, k)];
        }
        mean /= mass;

        let mut cov = DMatrix::zeros(dimension, dimension);
        for i in 0..n_samples {
            let diff = &mean - &posterior_means[i][k];
            cov += (&diff * diff.transpose() + &posterior_covs[i][k]) * responsibilities[(i, k)];
        }
        cov /= mass;
        cov += DMatrix::identity(dimension, dimension) * regularization;

        means.push(mean);
        covariances.push(symmetrize(cov));
    }

    Ok((GaussianMixture::new(weights, means, covariances)?, log_likelihood))
}

#[cfg(test)]
mod fit_test {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};
    use rand_distr::StandardNormal;

    fn bimodal_dataset(
        n_per_cluster: usize,
        seed: u64,
    ) -> (DMatrix<f64>, Vec<DMatrix<f64>>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = 2 * n_per_cluster;
        let mut x = DMatrix::zeros(n, 2);
        for i in 0..n {
            let center = if i < n_per_cluster { 0.0 } else { 10.0 };
            for j in 0..2 {
                let noise: f64 = rng.sample(StandardNormal);
                x[(i, j)] = center + noise;
            }
        }
        let xerr = vec![DMatrix::identity(2, 2) * 0.01; n];
        (x, xerr)
    }

    #[test]
    fn test_fit_method_from_str() {
        assert_eq!("astroML".parse::<FitMethod>().unwrap(), FitMethod::AstroMl);
        assert_eq!("Bovy".parse::<FitMethod>().unwrap(), FitMethod::Bovy);
        assert_eq!(
            "bovy".parse::<FitMethod>().unwrap_err(),
            SnHostError::InvalidFitMethod("bovy".to_string())
        );
    }

    #[test]
    fn test_fit_method_budgets() {
        assert_eq!(FitMethod::AstroMl.max_iterations(), 100);
        assert_eq!(FitMethod::Bovy.max_iterations(), 1_000_000_000);
    }

    #[test]
    fn test_fit_recovers_separated_clusters() {
        let (x, xerr) = bimodal_dataset(30, 7);
        let mut rng = StdRng::seed_from_u64(11);

        let model = fit_mixture(&x, &xerr, 2, FitMethod::AstroMl, &mut rng).unwrap();

        assert_eq!(model.component_count(), 2);
        assert_eq!(model.dimension(), 2);
        assert_relative_eq!(model.weights().iter().sum::<f64>(), 1.0, epsilon = 1e-9);

        let mut centers: Vec<f64> = model.means().iter().map(|m| m[0]).collect();
        centers.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert!(centers[0].abs() < 1.0, "low cluster at {}", centers[0]);
        assert!((centers[1] - 10.0).abs() < 1.0, "high cluster at {}", centers[1]);
    }

    #[test]
    fn test_fit_single_component_matches_moments() {
        let (x, xerr) = bimodal_dataset(20, 3);
        let mut rng = StdRng::seed_from_u64(5);

        let model = fit_mixture(&x, &xerr, 1, FitMethod::AstroMl, &mut rng).unwrap();

        let grand_mean = DVector::from_fn(2, |j, _| x.column(j).mean());
        assert_relative_eq!(model.means()[0][0], grand_mean[0], epsilon = 1e-3);
        assert_relative_eq!(model.means()[0][1], grand_mean[1], epsilon = 1e-3);
    }

    #[test]
    fn test_fit_rejects_shape_mismatch() {
        let x = DMatrix::zeros(4, 2);
        let xerr = vec![DMatrix::identity(2, 2); 3];
        let mut rng = StdRng::seed_from_u64(0);

        assert!(matches!(
            fit_mixture(&x, &xerr, 1, FitMethod::AstroMl, &mut rng),
            Err(SnHostError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_fit_rejects_bad_component_count() {
        let (x, xerr) = bimodal_dataset(2, 1);
        let mut rng = StdRng::seed_from_u64(0);

        assert_eq!(
            fit_mixture(&x, &xerr, 0, FitMethod::AstroMl, &mut rng).unwrap_err(),
            SnHostError::InvalidComponentCount(0)
        );
        assert_eq!(
            fit_mixture(&x, &xerr, 5, FitMethod::AstroMl, &mut rng).unwrap_err(),
            SnHostError::InvalidComponentCount(5)
        );
    }
}
