//! # Supernova/host catalog reader
//!
//! Utilities to parse **comma-delimited supernova/host catalogs** and turn
//! them into the feature matrix and per-sample covariance tensor consumed by
//! the density-model fit.
//!
//! ## Overview
//! -----------------
//! This module provides:
//! - A small error type [`CatalogParseError`] describing catalog parsing
//!   failures with line/column diagnostics.
//! - A row parser that converts one record into a 20-feature sample, or
//!   drops it when a screened surface-brightness column holds the `nan`
//!   token.
//! - The batch routines [`read_catalog`] / [`read_catalogs`] that read whole
//!   files and assemble a [`CatalogData`].
//!
//! ## Units & Conventions
//! -----------------
//! - **Input format:** comma-delimited ASCII, `#` comment lines skipped.
//! - **Separation:** stored as `log10(separation / Re_r)` with the error
//!   propagated as `Re_err / (Re · ln 10)`.
//! - **Colors:** all 10 pairwise differences of the ugriz magnitudes, errors
//!   combined in quadrature.
//! - **Covariances:** diagonal only, squared per-feature errors; the
//!   redshift error is fixed at 0.
//!
//! ## Field Layout (catalog subset used here)
//! -----------------
//! * `4` – host redshift.
//! * `7..13` – SALT2 x0/x1/c as value/error pairs.
//! * `15` – projected separation, arcsec.
//! * `18..28` – ugriz model magnitudes as value/error pairs.
//! * `42..44` – r-band effective radius and error.
//! * `32/33, 38/39, 44/45, 50/52, 56/57` – ugriz local surface brightnesses
//!   and errors.
//!
//! ## Error Handling
//! -----------------
//! A row whose screened columns ({33, 39, 45, 51, 57}) hold the `nan` token
//! is skipped silently; that is the only local recovery. A missing column or
//! a non-numeric field anywhere else is a fatal
//! [`SnHostError::CatalogParsing`] for the whole file.
//!
//! ## See also
//! ------------
//! * [`constants::columns`](crate::constants::columns) – The fixed offsets.
//! * [`Estimator::fit_from_files`](crate::estimator::Estimator::fit_from_files) – Catalog-driven fitting.

use std::fs;

use camino::Utf8Path;
use csv::{ReaderBuilder, StringRecord};
use itertools::Itertools;
use nalgebra::DMatrix;
use thiserror::Error;

use crate::constants::{
    columns, CovarianceTensor, FeatureMatrix, FEATURE_COUNT, FILTER_COUNT,
    SURFACE_BRIGHTNESS_OFFSET,
};
use crate::snhost_errors::SnHostError;

/// Token marking a missing value in the screened catalog columns.
const MISSING_TOKEN: &str = "nan";

/// Row-level parsing errors for supernova/host catalogs.
#[derive(Error, Debug, PartialEq)]
pub enum CatalogParseError {
    #[error("line {line}: missing column {column}")]
    MissingColumn { line: u64, column: usize },
    #[error("line {line}: invalid numeric value '{value}' in column {column}")]
    InvalidNumber {
        line: u64,
        column: usize,
        value: String,
    },
}

/// A parsed catalog: feature matrix (samples × 20) and the aligned diagonal
/// covariance tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogData {
    pub features: FeatureMatrix,
    pub covariances: CovarianceTensor,
}

impl CatalogData {
    pub fn sample_count(&self) -> usize {
        self.features.nrows()
    }

    fn from_rows(rows: Vec<SampleRow>) -> Self {
        let features = DMatrix::from_fn(rows.len(), FEATURE_COUNT, |i, j| rows[i].values[j]);
        let covariances = rows
            .iter()
            .map(|row| {
                DMatrix::from_fn(FEATURE_COUNT, FEATURE_COUNT, |i, j| {
                    if i == j {
                        row.errors[i] * row.errors[i]
                    } else {
                        0.0
                    }
                })
            })
            .collect();
        CatalogData {
            features,
            covariances,
        }
    }
}

/// One accepted catalog row: schema-ordered values and their 1-σ errors.
struct SampleRow {
    values: [f64; FEATURE_COUNT],
    errors: [f64; FEATURE_COUNT],
}

/// Parse one catalog file.
///
/// The file is read fully into memory, then scanned record by record;
/// comment lines (`#`) are skipped by the reader.
///
/// Arguments
/// -----------------
/// * `path`: catalog file to read.
///
/// Return
/// ----------
/// * The accepted rows as a [`CatalogData`], or the first fatal error.
pub fn read_catalog(path: &Utf8Path) -> Result<CatalogData, SnHostError> {
    let mut rows = Vec::new();
    collect_rows(path, &mut rows)?;
    Ok(CatalogData::from_rows(rows))
}

/// Parse and concatenate several catalog files, in order.
pub fn read_catalogs(paths: &[&Utf8Path]) -> Result<CatalogData, SnHostError> {
    let mut rows = Vec::new();
    for path in paths {
        collect_rows(path, &mut rows)?;
    }
    Ok(CatalogData::from_rows(rows))
}

fn collect_rows(path: &Utf8Path, rows: &mut Vec<SampleRow>) -> Result<(), SnHostError> {
    let data = fs::read_to_string(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(data.as_bytes());

    for record in reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        if let Some(row) = parse_row(&record, line)? {
            rows.push(row);
        }
    }
    Ok(())
}

/// Convert one record into a [`SampleRow`], or `None` when a screened
/// surface-brightness column carries the missing-value token.
fn parse_row(record: &StringRecord, line: u64) -> Result<Option<SampleRow>, CatalogParseError> {
    for column in columns::MISSING_VALUE_SCREEN {
        if raw_field(record, column, line)?.trim() == MISSING_TOKEN {
            return Ok(None);
        }
    }

    let value_err_pair = |column: usize| -> Result<(f64, f64), CatalogParseError> {
        Ok((
            numeric_field(record, column, line)?,
            numeric_field(record, column + 1, line)?,
        ))
    };

    let (x0, x0_err) = value_err_pair(columns::SALT2_X0)?;
    let (x1, x1_err) = value_err_pair(columns::SALT2_X1)?;
    let (color, color_err) = value_err_pair(columns::SALT2_COLOR)?;
    let redshift = numeric_field(record, columns::HOST_REDSHIFT, line)?;

    let separation = numeric_field(record, columns::SEPARATION, line)?;
    let (radius, radius_err) = value_err_pair(columns::EFFECTIVE_RADIUS_R)?;
    let log_radius = (separation / radius).log10();
    let log_radius_err = radius_err / (radius * std::f64::consts::LN_10);

    let magnitudes: [(f64, f64); FILTER_COUNT] = [
        value_err_pair(columns::MAG_U)?,
        value_err_pair(columns::MAG_G)?,
        value_err_pair(columns::MAG_R)?,
        value_err_pair(columns::MAG_I)?,
        value_err_pair(columns::MAG_Z)?,
    ];

    let surface_brightness: [(f64, f64); FILTER_COUNT] = [
        (
            numeric_field(record, columns::SB_U, line)?,
            numeric_field(record, columns::SB_U_ERR, line)?,
        ),
        (
            numeric_field(record, columns::SB_G, line)?,
            numeric_field(record, columns::SB_G_ERR, line)?,
        ),
        (
            numeric_field(record, columns::SB_R, line)?,
            numeric_field(record, columns::SB_R_ERR, line)?,
        ),
        (
            numeric_field(record, columns::SB_I, line)?,
            numeric_field(record, columns::SB_I_ERR, line)?,
        ),
        (
            numeric_field(record, columns::SB_Z, line)?,
            numeric_field(record, columns::SB_Z_ERR, line)?,
        ),
    ];

    let mut values = [0.0; FEATURE_COUNT];
    let mut errors = [0.0; FEATURE_COUNT];

    values[0] = x0;
    errors[0] = x0_err;
    values[1] = x1;
    errors[1] = x1_err;
    values[2] = color;
    errors[2] = color_err;
    values[3] = redshift;
    errors[3] = 0.0;
    values[4] = log_radius;
    errors[4] = log_radius_err;

    for (offset, ((mag_a, err_a), (mag_b, err_b))) in
        magnitudes.iter().copied().tuple_combinations().enumerate()
    {
        values[5 + offset] = mag_a - mag_b;
        errors[5 + offset] = f64::hypot(err_a, err_b);
    }

    for (j, (sb, sb_err)) in surface_brightness.iter().copied().enumerate() {
        values[SURFACE_BRIGHTNESS_OFFSET + j] = sb;
        errors[SURFACE_BRIGHTNESS_OFFSET + j] = sb_err;
    }

    Ok(Some(SampleRow { values, errors }))
}

fn raw_field<'a>(
    record: &'a StringRecord,
    column: usize,
    line: u64,
) -> Result<&'a str, CatalogParseError> {
    record
        .get(column)
        .ok_or(CatalogParseError::MissingColumn { line, column })
}

fn numeric_field(
    record: &StringRecord,
    column: usize,
    line: u64,
) -> Result<f64, CatalogParseError> {
    let raw = raw_field(record, column, line)?.trim();
    raw.parse::<f64>()
        .map_err(|_| CatalogParseError::InvalidNumber {
            line,
            column,
            value: raw.to_string(),
        })
}
