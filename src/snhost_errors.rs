use thiserror::Error;

use crate::catalog::CatalogParseError;

#[derive(Error, Debug)]
pub enum SnHostError {
    #[error("No density model is active; fit or load a model first")]
    ModelNotLoaded,

    #[error("Invalid fit method: {0} (expected 'astroML' or 'Bovy')")]
    InvalidFitMethod(String),

    #[error("Invalid conditioning request: {0}")]
    InvalidConditioning(String),

    #[error("Invalid Sersic index: {0} (expected 1 or 4)")]
    InvalidProfile(f64),

    #[error("Invalid component count: {0}")]
    InvalidComponentCount(usize),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Error during catalog file parsing: {0}")]
    CatalogParsing(#[from] CatalogParseError),

    #[error("Observed-block covariance is singular (cannot be inverted)")]
    SingularCovariance,

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV reader error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Model document error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl PartialEq for SnHostError {
    fn eq(&self, other: &Self) -> bool {
        use SnHostError::*;
        match (self, other) {
            (InvalidFitMethod(a), InvalidFitMethod(b)) => a == b,
            (InvalidConditioning(a), InvalidConditioning(b)) => a == b,
            (InvalidProfile(a), InvalidProfile(b)) => a == b,
            (InvalidComponentCount(a), InvalidComponentCount(b)) => a == b,
            (ShapeMismatch(a), ShapeMismatch(b)) => a == b,
            (CatalogParsing(a), CatalogParsing(b)) => a == b,

            // Not comparable beyond the variant itself
            (IoError(_), IoError(_)) => true,
            (CsvError(_), CsvError(_)) => true,
            (JsonError(_), JsonError(_)) => true,

            // Unit variants
            (ModelNotLoaded, ModelNotLoaded) => true,
            (SingularCovariance, SingularCovariance) => true,

            _ => false,
        }
    }
}
