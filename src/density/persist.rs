//! Save and load of fitted mixture parameters.
//!
//! The persisted form is a flat JSON document holding the weights, means,
//! and row-major covariance entries of every component. Callers treat it as
//! an opaque blob identified by its path; loading always revalidates through
//! the [`GaussianMixture`] constructor.

use std::fs;

use camino::Utf8Path;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::density::mixture::GaussianMixture;
use crate::snhost_errors::SnHostError;

#[derive(Debug, Serialize, Deserialize)]
struct ModelDocument {
    n_components: usize,
    dimension: usize,
    weights: Vec<f64>,
    means: Vec<Vec<f64>>,
    covariances: Vec<Vec<f64>>,
}

/// Write the fitted parameters of `model` to `path`.
///
/// Argument
/// --------
/// * `model`: the mixture to persist
/// * `path`: destination file, overwritten if present
///
/// Return
/// ------
/// * `()` on success, or the underlying io/serialization error
pub fn save_model(model: &GaussianMixture, path: &Utf8Path) -> Result<(), SnHostError> {
    let document = ModelDocument {
        n_components: model.component_count(),
        dimension: model.dimension(),
        weights: model.weights().iter().copied().collect(),
        means: model.means().iter().map(|m| m.iter().copied().collect()).collect(),
        covariances: model
            .covariances()
            .iter()
            .map(|cov| cov.transpose().as_slice().to_vec())
            .collect(),
    };
    fs::write(path, serde_json::to_string_pretty(&document)?)?;
    Ok(())
}

/// Read previously persisted parameters from `path`.
///
/// Argument
/// --------
/// * `path`: file written by [`save_model`]
///
/// Return
/// ------
/// * The revalidated [`GaussianMixture`], or an error if the file cannot be
///   read, parsed, or does not describe a valid model
pub fn load_model(path: &Utf8Path) -> Result<GaussianMixture, SnHostError> {
    let data = fs::read_to_string(path)?;
    let document: ModelDocument = serde_json::from_str(&data)?;

    let d = document.dimension;
    if document.weights.len() != document.n_components {
        return Err(SnHostError::ShapeMismatch(format!(
            "document declares {} components but holds {} weights",
            document.n_components,
            document.weights.len()
        )));
    }
    for (k, cov) in document.covariances.iter().enumerate() {
        if cov.len() != d * d {
            return Err(SnHostError::ShapeMismatch(format!(
                "component {k} covariance holds {} entries (expected {})",
                cov.len(),
                d * d
            )));
        }
    }

    let weights = DVector::from_vec(document.weights);
    let means = document
        .means
        .into_iter()
        .map(DVector::from_vec)
        .collect::<Vec<_>>();
    let covariances = document
        .covariances
        .into_iter()
        .map(|cov| DMatrix::from_row_slice(d, d, &cov))
        .collect::<Vec<_>>();
    GaussianMixture::new(weights, means, covariances)
}

#[cfg(test)]
mod persist_test {
    use super::*;
    use camino::Utf8PathBuf;

    fn scratch_path(name: &str) -> Utf8PathBuf {
        let mut path = Utf8PathBuf::from_path_buf(std::env::temp_dir())
            .expect("temp dir is not valid UTF-8");
        path.push(format!("snhost_{name}_{}.json", std::process::id()));
        path
    }

    fn sample_model() -> GaussianMixture {
        GaussianMixture::new(
            DVector::from_vec(vec![0.25, 0.75]),
            vec![
                DVector::from_vec(vec![1.0, -2.0]),
                DVector::from_vec(vec![3.5, 0.5]),
            ],
            vec![
                DMatrix::from_row_slice(2, 2, &[2.0, 0.3, 0.3, 1.0]),
                DMatrix::from_row_slice(2, 2, &[0.5, -0.1, -0.1, 0.8]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_round_trip_preserves_parameters() {
        let model = sample_model();
        let path = scratch_path("round_trip");

        save_model(&model, &path).unwrap();
        let reloaded = load_model(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(reloaded, model);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let path = scratch_path("garbage");
        std::fs::write(&path, "not a model").unwrap();

        let result = load_model(&path);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(result, Err(SnHostError::JsonError(_))));
    }

    #[test]
    fn test_load_rejects_missing_file() {
        let result = load_model(Utf8Path::new("/nonexistent/snhost_model.json"));

        assert!(matches!(result, Err(SnHostError::IoError(_))));
    }
}
