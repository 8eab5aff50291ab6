//! # Estimator: conditional sampling over a fitted density model
//!
//! This module defines the [`Estimator`](crate::estimator::Estimator) struct, the central façade that wires together:
//!
//! 1. **Density model lifecycle** — fitting, persisting, and reloading a
//!    Gaussian-mixture model through the narrow
//!    [`DensityModel`](crate::density::DensityModel) capability.
//! 2. **Model-order selection** — a Bayesian-information-criterion scan over
//!    candidate component counts.
//! 3. **Conditional sampling** — imputing the three supernova light-curve
//!    parameters, or a single derived galaxy-geometry parameter, from any
//!    subset of observed host covariates.
//!
//! The active model is an explicit typed state, not a nullable flag: the
//! estimator is `Unfitted` until a fit or load succeeds, and a failed fit or
//! load never displaces a previously active model.
//!
//! ## Key responsibilities
//!
//! - Single owner of the **active model** and its persisted source path
//! - **Shape validation** between data, covariance tensors, and the fitted schema
//! - Enforcement of the conditioning rules: supernova columns are never
//!   conditioned on, and a derived parameter cannot condition on itself
//!
//! ## Typical usage
//!
//! ```rust, no_run
//! use camino::Utf8Path;
//! use rand::{rngs::StdRng, SeedableRng};
//! use snhost::catalog::read_catalog;
//! use snhost::density::fit::FitMethod;
//! use snhost::estimator::Estimator;
//!
//! let data = read_catalog(Utf8Path::new("catalog.csv")).unwrap();
//! let mut rng = StdRng::seed_from_u64(42);
//!
//! let mut estimator: Estimator = Estimator::new(FitMethod::AstroMl);
//! estimator
//!     .fit(
//!         &data.features,
//!         &data.covariances,
//!         7,
//!         Utf8Path::new("model.json"),
//!         &mut rng,
//!     )
//!     .unwrap();
//!
//! // Impute a separation for a host observed in redshift (3) and one color (5)
//! let log_r = estimator
//!     .sample_derived_radius(&[3, 5], 4, &[0.1, 1.2], None, &mut rng)
//!     .unwrap();
//! # let _ = log_r;
//! ```
//!
//! ## See also
//! ------------
//! * [`GaussianMixture`](crate::density::GaussianMixture) – The provided model backend.
//! * [`read_catalog`](crate::catalog::read_catalog) – Builds the feature matrix and covariance tensor.
//! * [`local_surface_brightness`](crate::surface_brightness::local_surface_brightness) – Consumes an imputed separation.

use camino::{Utf8Path, Utf8PathBuf};
use nalgebra::DMatrix;
use rand::Rng;

use crate::catalog::read_catalogs;
use crate::constants::SN_PARAM_COUNT;
use crate::density::fit::FitMethod;
use crate::density::{DensityModel, GaussianMixture, Measurement, PartialObservation};
use crate::snhost_errors::SnHostError;

/// Lifecycle of the estimator's density model.
#[derive(Debug, Clone)]
enum ModelState<M> {
    /// No fit or load has succeeded yet.
    Unfitted,
    /// A model is active, together with the path it was persisted to or
    /// loaded from.
    Active { model: M, source: Utf8PathBuf },
}

/// Result of a model-order scan: one information-criterion score per
/// candidate component count, and the minimizing candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentScan {
    /// Scores aligned with the candidate list passed to the scan.
    pub scores: Vec<f64>,
    /// Candidate with the lowest score (first minimum on exact ties).
    pub optimal: usize,
    /// The lowest score.
    pub best_score: f64,
}

/// Owns one density model and exposes the conditional-sampling operations
/// used to impute missing supernova/host parameters.
///
/// The first [`SN_PARAM_COUNT`] schema columns are the supernova light-curve
/// parameters; every conditioning operation treats them as targets, never as
/// covariates.
#[derive(Debug, Clone)]
pub struct Estimator<M: DensityModel = GaussianMixture> {
    state: ModelState<M>,
    fit_method: FitMethod,
}

impl<M: DensityModel> Estimator<M> {
    /// Construct an unfitted estimator with the given fitting method.
    pub fn new(fit_method: FitMethod) -> Self {
        Estimator {
            state: ModelState::Unfitted,
            fit_method,
        }
    }

    /// Construct an estimator and immediately load a persisted model.
    pub fn from_model_file(path: &Utf8Path, fit_method: FitMethod) -> Result<Self, SnHostError> {
        let mut estimator = Self::new(fit_method);
        estimator.load(path)?;
        Ok(estimator)
    }

    pub fn fit_method(&self) -> FitMethod {
        self.fit_method
    }

    /// Change the fitting method used by subsequent fits.
    pub fn set_fit_method(&mut self, fit_method: FitMethod) {
        self.fit_method = fit_method;
    }

    /// The active model, if any.
    pub fn active_model(&self) -> Option<&M> {
        match &self.state {
            ModelState::Unfitted => None,
            ModelState::Active { model, .. } => Some(model),
        }
    }

    /// Path of the persisted form of the active model, if any.
    pub fn model_source(&self) -> Option<&Utf8Path> {
        match &self.state {
            ModelState::Unfitted => None,
            ModelState::Active { source, .. } => Some(source.as_path()),
        }
    }

    /// Fit a new model and make it active.
    ///
    /// The fitted parameters are persisted to `persist_to`, which becomes the
    /// recorded model source. On any failure the previously active model (if
    /// any) is left in place.
    ///
    /// Arguments
    /// -----------------
    /// * `x`: data, samples × features.
    /// * `xerr`: one measurement covariance per sample.
    /// * `n_components`: number of Gaussian components.
    /// * `persist_to`: destination for the fitted parameters.
    /// * `rng`: generator used by the fit initialization.
    pub fn fit<R: Rng + ?Sized>(
        &mut self,
        x: &DMatrix<f64>,
        xerr: &[DMatrix<f64>],
        n_components: usize,
        persist_to: &Utf8Path,
        rng: &mut R,
    ) -> Result<(), SnHostError> {
        let model = M::fit(x, xerr, n_components, self.fit_method, rng)?;
        model.save(persist_to)?;
        self.state = ModelState::Active {
            model,
            source: persist_to.to_owned(),
        };
        Ok(())
    }

    /// Fit a new model from one or more catalog files.
    ///
    /// Convenience over [`read_catalogs`](crate::catalog::read_catalogs)
    /// followed by [`fit`](Self::fit).
    pub fn fit_from_files<R: Rng + ?Sized>(
        &mut self,
        paths: &[&Utf8Path],
        n_components: usize,
        persist_to: &Utf8Path,
        rng: &mut R,
    ) -> Result<(), SnHostError> {
        let data = read_catalogs(paths)?;
        self.fit(&data.features, &data.covariances, n_components, persist_to, rng)
    }

    /// Load a persisted model and make it active.
    ///
    /// On failure the previously active model (if any) is left in place.
    pub fn load(&mut self, path: &Utf8Path) -> Result<(), SnHostError> {
        let model = M::load(path)?;
        self.state = ModelState::Active {
            model,
            source: path.to_owned(),
        };
        Ok(())
    }

    /// Score candidate component counts with the Bayesian information
    /// criterion and report the minimizing candidate.
    ///
    /// Fits one throwaway model per candidate with the configured method; the
    /// active model is never touched. With `ignore_errors` the likelihood
    /// term is evaluated as if every measurement were exact.
    ///
    /// Arguments
    /// -----------------
    /// * `x`: data, samples × features.
    /// * `xerr`: one measurement covariance per sample.
    /// * `candidates`: component counts to score, scanned in order.
    /// * `ignore_errors`: score the likelihood without measurement covariances.
    /// * `rng`: generator used by each candidate fit.
    ///
    /// Return
    /// ----------
    /// * A [`ComponentScan`] whose `optimal` is the argmin of `scores`, the
    ///   first minimum winning exact ties.
    pub fn select_component_count<R: Rng + ?Sized>(
        &self,
        x: &DMatrix<f64>,
        xerr: &[DMatrix<f64>],
        candidates: &[usize],
        ignore_errors: bool,
        rng: &mut R,
    ) -> Result<ComponentScan, SnHostError> {
        if candidates.is_empty() {
            return Err(SnHostError::InvalidComponentCount(0));
        }
        let n_samples = x.nrows() as f64;
        let mut scores = Vec::with_capacity(candidates.len());
        for &count in candidates {
            let model = M::fit(x, xerr, count, self.fit_method, rng)?;
            let log_likelihood = if ignore_errors {
                model.log_likelihood(x, None)?
            } else {
                model.log_likelihood(x, Some(xerr))?
            };
            let k = model.free_parameter_count() as f64;
            scores.push(-2.0 * log_likelihood + k * n_samples.ln());
        }
        let best = argmin_first(&scores);
        Ok(ComponentScan {
            best_score: scores[best],
            optimal: candidates[best],
            scores,
        })
    }

    /// Condition the active model on `partial` and sample the supernova
    /// parameters.
    ///
    /// The first [`SN_PARAM_COUNT`] entries of `partial` must be missing;
    /// they are the sampling targets. Supplying no measurement covariance is
    /// a distinct, valid conditioning mode.
    ///
    /// Arguments
    /// -----------------
    /// * `partial`: full-schema partial observation.
    /// * `count`: number of supernovae to sample.
    /// * `rng`: sampling generator.
    ///
    /// Return
    /// ----------
    /// * A `count` × [`SN_PARAM_COUNT`] matrix of sampled supernova
    ///   parameters.
    pub fn sample_targets<R: Rng + ?Sized>(
        &self,
        partial: &PartialObservation,
        count: usize,
        rng: &mut R,
    ) -> Result<DMatrix<f64>, SnHostError> {
        let model = self.require_model()?;
        if partial.len() != model.dimension() {
            return Err(SnHostError::ShapeMismatch(format!(
                "partial observation has width {} but the model schema has {}",
                partial.len(),
                model.dimension()
            )));
        }
        if partial.measurements()[..SN_PARAM_COUNT]
            .iter()
            .any(|m| m.is_observed())
        {
            return Err(SnHostError::InvalidConditioning(
                "supernova parameters must be missing when sampling them".into(),
            ));
        }

        let conditional = model.condition(partial)?;
        let samples = conditional.sample(count, rng)?;
        // Missing columns keep their relative order, so the supernova block
        // is the head of the conditioned schema.
        Ok(samples.columns(0, SN_PARAM_COUNT).into_owned())
    }

    /// Condition the active model on an arbitrary subset of host covariates
    /// and sample one value of the derived parameter at `radius_index`.
    ///
    /// Builds a full-schema observation with `values[j]` at
    /// `observed_indices[j]` and everything else missing, conditions, samples
    /// once, and reads the conditioned-schema position that `radius_index`
    /// maps to after the observed columns are removed.
    ///
    /// Arguments
    /// -----------------
    /// * `observed_indices`: schema positions of the observed covariates; may
    ///   not intersect the supernova block nor contain `radius_index`.
    /// * `radius_index`: schema position of the parameter to sample.
    /// * `values`: observed values, aligned with `observed_indices`.
    /// * `errors`: optional 1-σ errors on `values`, squared into variances.
    /// * `rng`: sampling generator.
    pub fn sample_derived_radius<R: Rng + ?Sized>(
        &self,
        observed_indices: &[usize],
        radius_index: usize,
        values: &[f64],
        errors: Option<&[f64]>,
        rng: &mut R,
    ) -> Result<f64, SnHostError> {
        let model = self.require_model()?;
        let dimension = model.dimension();

        if observed_indices.len() != values.len() {
            return Err(SnHostError::ShapeMismatch(format!(
                "{} observed indices but {} values",
                observed_indices.len(),
                values.len()
            )));
        }
        if let Some(errs) = errors {
            if errs.len() != values.len() {
                return Err(SnHostError::ShapeMismatch(format!(
                    "{} values but {} errors",
                    values.len(),
                    errs.len()
                )));
            }
        }
        if radius_index >= dimension {
            return Err(SnHostError::ShapeMismatch(format!(
                "radius index {radius_index} outside schema width {dimension}"
            )));
        }
        for (j, &index) in observed_indices.iter().enumerate() {
            if index >= dimension {
                return Err(SnHostError::ShapeMismatch(format!(
                    "observed index {index} outside schema width {dimension}"
                )));
            }
            if index < SN_PARAM_COUNT {
                return Err(SnHostError::InvalidConditioning(format!(
                    "cannot condition on supernova parameter at index {index}"
                )));
            }
            if index == radius_index {
                return Err(SnHostError::InvalidConditioning(format!(
                    "cannot condition on the sampled parameter at index {index}"
                )));
            }
            if observed_indices[..j].contains(&index) {
                return Err(SnHostError::InvalidConditioning(format!(
                    "duplicate observed index {index}"
                )));
            }
        }

        let mut measurements = vec![Measurement::Missing; dimension];
        for (&index, &value) in observed_indices.iter().zip(values) {
            measurements[index] = Measurement::Observed(value);
        }
        let partial = match errors {
            None => PartialObservation::new(measurements),
            Some(errs) => {
                let mut sigma = vec![0.0; dimension];
                for (&index, &err) in observed_indices.iter().zip(errs) {
                    sigma[index] = err;
                }
                PartialObservation::with_errors(measurements, &sigma)?
            }
        };

        let conditional = model.condition(&partial)?;
        let sample = conditional.sample(1, rng)?;
        let shift = observed_indices.iter().filter(|&&i| i < radius_index).count();
        Ok(sample[(0, radius_index - shift)])
    }

    fn require_model(&self) -> Result<&M, SnHostError> {
        self.active_model().ok_or(SnHostError::ModelNotLoaded)
    }
}

/// Index of the smallest value; the first one on exact ties.
fn argmin_first(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, value) in values.iter().enumerate().skip(1) {
        if *value < values[best] {
            best = i;
        }
    }
    best
}
