//! # Local surface brightness of a host galaxy
//!
//! Closed-form evaluation of the surface brightness of a galaxy light
//! profile at a given galactocentric separation, with first-order
//! uncertainty propagation, for each of the five ugriz filters.
//!
//! ## Overview
//! -----------------
//! Two Sersic profile families are supported: the exponential disk (index 1)
//! and the de Vaucouleurs spheroid (index 4). The separation is given as
//! `log10(R/Re)` relative to the **r-band** effective radius, the convention
//! of the conditional-sampling output
//! ([`sample_derived_radius`](crate::estimator::Estimator::sample_derived_radius)).
//!
//! ## Units & Conventions
//! -----------------
//! - Magnitudes in mag, effective radii in arcsec, output in mag/arcsec².
//! - Output arrays are ordered `[u, g, r, i, z]`, like the input blocks.
//! - Uncertainties are clamped: a non-finite propagated value becomes 0, a
//!   negative one has its sign flipped.
//!
//! The de Vaucouleurs branch combines its two uncertainty terms with the
//! exponential ratio left unsquared. This matches the reference formula and
//! is kept for compatibility.

use nalgebra::Vector5;

use crate::constants::{
    DEVAUCOULEURS_CENTRAL_OFFSET, DEVAUCOULEURS_SHAPE, EXPONENTIAL_CENTRAL_OFFSET,
    EXPONENTIAL_SHAPE, FILTER_COUNT, HALF_LIGHT_MAG_OFFSET,
};
use crate::snhost_errors::SnHostError;

/// Supported galaxy light-profile families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightProfile {
    /// Exponential disk, Sersic index 1.
    Exponential,
    /// de Vaucouleurs spheroid, Sersic index 4.
    DeVaucouleurs,
}

impl LightProfile {
    /// Map a raw Sersic index to a profile family.
    ///
    /// Return
    /// ----------
    /// * The profile, or [`SnHostError::InvalidProfile`] for any index
    ///   outside {1, 4}.
    pub fn from_sersic_index(index: f64) -> Result<Self, SnHostError> {
        if index == 1.0 {
            Ok(LightProfile::Exponential)
        } else if index == 4.0 {
            Ok(LightProfile::DeVaucouleurs)
        } else {
            Err(SnHostError::InvalidProfile(index))
        }
    }

    pub fn sersic_index(self) -> f64 {
        match self {
            LightProfile::Exponential => 1.0,
            LightProfile::DeVaucouleurs => 4.0,
        }
    }
}

/// Photometry of one filter: total magnitude and effective radius, each with
/// its 1-σ uncertainty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterPhotometry {
    pub magnitude: f64,
    pub magnitude_err: f64,
    /// Effective (half-light) radius, arcsec.
    pub effective_radius: f64,
    pub radius_err: f64,
}

/// Light-profile model of one host galaxy: the profile family and the
/// per-filter photometry in ugriz order.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceBrightnessParams {
    pub profile: LightProfile,
    pub filters: [FilterPhotometry; FILTER_COUNT],
}

impl SurfaceBrightnessParams {
    /// Build from the flat 21-entry layout: the Sersic index followed by
    /// `(magnitude, magnitude_err, radius, radius_err)` per filter.
    pub fn from_flat(raw: &[f64; 21]) -> Result<Self, SnHostError> {
        let profile = LightProfile::from_sersic_index(raw[0])?;
        let filters = std::array::from_fn(|j| FilterPhotometry {
            magnitude: raw[j * 4 + 1],
            magnitude_err: raw[j * 4 + 2],
            effective_radius: raw[j * 4 + 3],
            radius_err: raw[j * 4 + 4],
        });
        Ok(SurfaceBrightnessParams { profile, filters })
    }

    /// The r-band effective radius, the reference scale of `log10(R/Re)`.
    pub fn reference_radius(&self) -> f64 {
        self.filters[2].effective_radius
    }
}

/// Surface brightness and its uncertainty at separation `log_r` from the
/// host nucleus, per filter.
///
/// Arguments
/// -----------------
/// * `params`: profile family and ugriz photometry.
/// * `log_r`: separation as `log10(R/Re)`, with `Re` the r-band effective
///   radius.
///
/// Return
/// ----------
/// * `(sb, sb_err)` in mag/arcsec², ordered `[u, g, r, i, z]`. Uncertainties
///   are finite and non-negative.
pub fn local_surface_brightness(
    params: &SurfaceBrightnessParams,
    log_r: f64,
) -> (Vector5<f64>, Vector5<f64>) {
    let separation = 10f64.powf(log_r) * params.reference_radius();

    let mut brightness = Vector5::zeros();
    let mut uncertainty = Vector5::zeros();
    for (j, filter) in params.filters.iter().enumerate() {
        let (sb, sb_unc) = filter_surface_brightness(params.profile, filter, separation);
        brightness[j] = sb;
        uncertainty[j] = sb_unc;
    }
    (brightness, uncertainty)
}

fn filter_surface_brightness(
    profile: LightProfile,
    filter: &FilterPhotometry,
    separation: f64,
) -> (f64, f64) {
    let half_mag = filter.magnitude + HALF_LIGHT_MAG_OFFSET;
    let radius = filter.effective_radius;
    let radius_err = filter.radius_err;
    let r = separation / radius;

    let area_log = (std::f64::consts::PI * radius * radius).log10();
    let effective_sb = half_mag + 2.5 * area_log;
    let area_unc = 2.0 * radius * radius_err * std::f64::consts::PI;
    let log_unc = 2.5 * area_unc / (area_log * std::f64::consts::LN_10);
    let effective_sb_unc = f64::hypot(filter.magnitude_err, log_unc);

    let (sb, sb_unc) = match profile {
        LightProfile::Exponential => {
            let central = effective_sb - EXPONENTIAL_CENTRAL_OFFSET;
            let shape = (-EXPONENTIAL_SHAPE * r).exp();
            let sb = central * shape;
            let shape_unc =
                shape * EXPONENTIAL_SHAPE * separation * radius_err / (radius * radius);
            let sb_unc = sb
                * ((effective_sb_unc / central).powi(2) + (shape_unc / shape).powi(2)).sqrt();
            (sb, sb_unc)
        }
        LightProfile::DeVaucouleurs => {
            let central = effective_sb - DEVAUCOULEURS_CENTRAL_OFFSET;
            let shape = (-DEVAUCOULEURS_SHAPE * r.powf(0.25)).exp();
            let sb = central * shape;
            let shape_unc = shape * DEVAUCOULEURS_SHAPE * separation * radius_err
                / (4.0 * radius.powf(1.25));
            // Reference combination: the shape ratio enters unsquared here
            let sb_unc =
                sb * ((effective_sb_unc / central).powi(2) + shape_unc / shape).sqrt();
            (sb, sb_unc)
        }
    };

    (sb, clamp_uncertainty(sb_unc))
}

/// Non-finite → 0, negative → sign-flipped.
fn clamp_uncertainty(value: f64) -> f64 {
    if value.is_finite() {
        value.abs()
    } else {
        0.0
    }
}

#[cfg(test)]
mod surface_brightness_test {
    use super::*;
    use approx::assert_relative_eq;

    fn uniform_params(profile: LightProfile) -> SurfaceBrightnessParams {
        SurfaceBrightnessParams {
            profile,
            filters: [FilterPhotometry {
                magnitude: 20.0,
                magnitude_err: 0.1,
                effective_radius: 2.0,
                radius_err: 0.05,
            }; 5],
        }
    }

    #[test]
    fn test_exponential_at_effective_radius() {
        let params = uniform_params(LightProfile::Exponential);

        // R = 0 puts the separation at the r-band effective radius
        let (sb, sb_unc) = local_surface_brightness(&params, 0.0);

        for j in 0..5 {
            assert!(sb[j].is_finite());
            assert!(sb_unc[j].is_finite());
            assert!(sb_unc[j] >= 0.0);
        }

        // Hand-evaluated: halfmag = 20.75257, Ie = halfmag + 2.5·log10(4π),
        // Io = Ie − 1.824, sb = Io·e^{−1.68}
        let area_log = (std::f64::consts::PI * 4.0).log10();
        let central = 20.75257 + 2.5 * area_log - 1.824;
        let expected = central * (-1.68f64).exp();
        assert_relative_eq!(sb[2], expected, epsilon = 1e-12);
    }

    #[test]
    fn test_de_vaucouleurs_at_effective_radius() {
        let params = uniform_params(LightProfile::DeVaucouleurs);

        let (sb, sb_unc) = local_surface_brightness(&params, 0.0);

        let area_log = (std::f64::consts::PI * 4.0).log10();
        let central = 20.75257 + 2.5 * area_log - 8.328;
        let expected = central * (-7.67f64).exp();
        assert_relative_eq!(sb[2], expected, epsilon = 1e-12);
        assert!(sb_unc[2] >= 0.0);
    }

    #[test]
    fn test_branch_asymmetry_is_preserved() {
        // Identical inputs through both branches; the de Vaucouleurs
        // combination leaves the shape ratio unsquared, so reconstructing
        // each formula must reproduce the outputs exactly.
        let filter = FilterPhotometry {
            magnitude: 21.0,
            magnitude_err: 0.2,
            effective_radius: 3.0,
            radius_err: 0.1,
        };
        let separation = 1.5 * 3.0;

        let (sb_exp, unc_exp) =
            filter_surface_brightness(LightProfile::Exponential, &filter, separation);
        let (sb_dev, unc_dev) =
            filter_surface_brightness(LightProfile::DeVaucouleurs, &filter, separation);

        let area_log = (std::f64::consts::PI * 9.0).log10();
        let ie = 21.75257 + 2.5 * area_log;
        let ie_unc = f64::hypot(
            0.2,
            2.5 * (2.0 * 3.0 * 0.1 * std::f64::consts::PI) / (area_log * std::f64::consts::LN_10),
        );

        let shape_exp = (-1.68f64 * 1.5).exp();
        let exp_unc = shape_exp * 1.68 * separation * 0.1 / 9.0;
        let io_exp = ie - 1.824;
        assert_relative_eq!(sb_exp, io_exp * shape_exp, epsilon = 1e-12);
        assert_relative_eq!(
            unc_exp,
            sb_exp * ((ie_unc / io_exp).powi(2) + (exp_unc / shape_exp).powi(2)).sqrt(),
            epsilon = 1e-12
        );

        let shape_dev = (-7.67f64 * 1.5f64.powf(0.25)).exp();
        let dev_unc = shape_dev * 7.67 * separation * 0.1 / (4.0 * 3.0f64.powf(1.25));
        let io_dev = ie - 8.328;
        assert_relative_eq!(sb_dev, io_dev * shape_dev, epsilon = 1e-12);
        assert_relative_eq!(
            unc_dev,
            sb_dev * ((ie_unc / io_dev).powi(2) + dev_unc / shape_dev).sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_invalid_sersic_index() {
        let mut raw = [0.0; 21];
        raw[0] = 2.0;

        assert_eq!(
            SurfaceBrightnessParams::from_flat(&raw).unwrap_err(),
            SnHostError::InvalidProfile(2.0)
        );
    }

    #[test]
    fn test_from_flat_layout() {
        let mut raw = [0.0; 21];
        raw[0] = 1.0;
        for j in 0..5 {
            raw[j * 4 + 1] = 20.0 + j as f64;
            raw[j * 4 + 2] = 0.1;
            raw[j * 4 + 3] = 2.0;
            raw[j * 4 + 4] = 0.05;
        }

        let params = SurfaceBrightnessParams::from_flat(&raw).unwrap();

        assert_eq!(params.profile, LightProfile::Exponential);
        assert_relative_eq!(params.filters[3].magnitude, 23.0);
        assert_relative_eq!(params.reference_radius(), 2.0);
    }

    #[test]
    fn test_non_finite_uncertainty_clamps_to_zero() {
        // π·Re² = 1 makes log10(π·Re²) vanish and the propagated log term
        // infinite; the clamp must bring the uncertainty back to 0.
        let radius = (1.0 / std::f64::consts::PI).sqrt();
        let params = SurfaceBrightnessParams {
            profile: LightProfile::Exponential,
            filters: [FilterPhotometry {
                magnitude: 20.0,
                magnitude_err: 0.1,
                effective_radius: radius,
                radius_err: 0.05,
            }; 5],
        };

        let (sb, sb_unc) = local_surface_brightness(&params, 0.0);

        for j in 0..5 {
            assert!(sb[j].is_finite());
            assert_eq!(sb_unc[j], 0.0);
        }
    }

    #[test]
    fn test_uncertainty_never_negative() {
        // A negative central intensity flips the sign of the propagated
        // uncertainty; the clamp must flip it back.
        let params = SurfaceBrightnessParams {
            profile: LightProfile::Exponential,
            filters: [FilterPhotometry {
                magnitude: -30.0,
                magnitude_err: 0.5,
                effective_radius: 0.9,
                radius_err: 0.2,
            }; 5],
        };

        let (_, sb_unc) = local_surface_brightness(&params, 0.3);

        for j in 0..5 {
            assert!(sb_unc[j] >= 0.0);
        }
    }
}
