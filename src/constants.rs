//! # Constants and type definitions for SnHost
//!
//! This module centralizes the **feature-schema geometry**, **catalog column
//! offsets**, and **light-profile constants** used throughout the `snhost`
//! library, together with the common matrix type aliases.
//!
//! ## Overview
//!
//! - Layout of the 20-column feature schema shared by fitting and conditioning
//! - Fixed column offsets of the supernova/host catalog files
//! - Closed-form constants of the exponential and de Vaucouleurs profiles
//! - Core type aliases used across the crate
//!
//! These definitions are used by all main modules, including the density
//! model, the estimator façade, and the catalog reader.

use nalgebra::DMatrix;

// -------------------------------------------------------------------------------------------------
// Feature schema
// -------------------------------------------------------------------------------------------------

/// Number of supernova light-curve parameters (x0, x1, c) at the head of the schema
pub const SN_PARAM_COUNT: usize = 3;

/// Total number of features per sample:
/// `[x0, x1, c, z, logR, 10 colors, 5 surface brightnesses]`
pub const FEATURE_COUNT: usize = 20;

/// Number of photometric filters (ugriz)
pub const FILTER_COUNT: usize = 5;

/// Schema position of the host redshift
pub const REDSHIFT_INDEX: usize = 3;

/// Schema position of log10(separation / effective radius)
pub const LOG_RADIUS_INDEX: usize = 4;

/// Number of pairwise color indices derived from the 5 magnitudes
pub const COLOR_COUNT: usize = 10;

/// Schema position of the first local surface brightness (u band)
pub const SURFACE_BRIGHTNESS_OFFSET: usize = 5 + COLOR_COUNT;

// -------------------------------------------------------------------------------------------------
// Light-profile constants
// -------------------------------------------------------------------------------------------------

/// Total → half-light magnitude conversion for the supported profile family
pub const HALF_LIGHT_MAG_OFFSET: f64 = 0.75257;

/// Central-intensity offset of the exponential (Sersic n=1) profile
pub const EXPONENTIAL_CENTRAL_OFFSET: f64 = 1.824;

/// Central-intensity offset of the de Vaucouleurs (Sersic n=4) profile
pub const DEVAUCOULEURS_CENTRAL_OFFSET: f64 = 8.328;

/// Radial shape factor of the exponential profile
pub const EXPONENTIAL_SHAPE: f64 = 1.68;

/// Radial shape factor of the de Vaucouleurs profile
pub const DEVAUCOULEURS_SHAPE: f64 = 7.67;

/// ln(2π), used by the multivariate normal log-density
pub const LN_2PI: f64 = 1.837_877_066_409_345_3;

// -------------------------------------------------------------------------------------------------
// Catalog column offsets
// -------------------------------------------------------------------------------------------------

/// Fixed column positions of the comma-delimited supernova/host catalogs.
///
/// Values are paired with their 1-σ errors in the adjacent column unless noted.
/// The layout is the SALT2 light-curve fit output joined with host photometry
/// and geometry.
pub mod columns {
    /// Host redshift (no catalog error; the loader assigns 0)
    pub const HOST_REDSHIFT: usize = 4;

    /// SALT2 amplitude x0 (error at +1)
    pub const SALT2_X0: usize = 7;

    /// SALT2 stretch x1 (error at +1)
    pub const SALT2_X1: usize = 9;

    /// SALT2 color c (error at +1)
    pub const SALT2_COLOR: usize = 11;

    /// Projected separation from the host nucleus, arcsec
    pub const SEPARATION: usize = 15;

    /// ugriz model magnitudes, value/error pairs starting at u
    pub const MAG_U: usize = 18;
    pub const MAG_G: usize = 20;
    pub const MAG_R: usize = 22;
    pub const MAG_I: usize = 24;
    pub const MAG_Z: usize = 26;

    /// r-band effective radius, arcsec (error at +1)
    pub const EFFECTIVE_RADIUS_R: usize = 42;

    /// Local surface brightnesses per filter
    pub const SB_U: usize = 32;
    pub const SB_U_ERR: usize = 33;
    pub const SB_G: usize = 38;
    pub const SB_G_ERR: usize = 39;
    pub const SB_R: usize = 44;
    pub const SB_R_ERR: usize = 45;
    pub const SB_I: usize = 50;
    /// The i-band error lives one column past its screened slot in the catalog layout
    pub const SB_I_ERR: usize = 52;
    pub const SB_Z: usize = 56;
    pub const SB_Z_ERR: usize = 57;

    /// Columns screened for the `nan` token before a row is accepted
    pub const MISSING_VALUE_SCREEN: [usize; 5] = [33, 39, 45, 51, 57];
}

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Feature matrix, samples × [`FEATURE_COUNT`]
pub type FeatureMatrix = DMatrix<f64>;

/// Per-sample covariance matrices aligned with a [`FeatureMatrix`]
pub type CovarianceTensor = Vec<DMatrix<f64>>;
