//! # Diagnostic Result Container
//!
//! This module is the exclusive entry point for upstream test results. A
//! [`DiagnosticResult`] holds the output of an external proportional-hazards
//! goodness-of-fit routine: scaled Schoenfeld residuals, the coefficient
//! covariance matrix, per-covariate p-values and the time-axis transform tag.
//!
//! - Validated construction: `DiagnosticResult::new` checks every dimension
//!   once; downstream code never sees a malformed result.
//! - User-centric errors: failures are assumed to be caller-input errors, and
//!   the `DataError` enum names the exact mismatch.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the time axis of the diagnostic result was transformed before the
/// residuals were computed, and therefore how it must be displayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeTransform {
    /// Raw event times; the axis is plotted unchanged.
    Identity,
    /// The axis holds `ln(time)`; plotting exponentiates it back.
    Log,
    /// Any other monotone transform (e.g. a Kaplan-Meier or rank mapping),
    /// identified by name. Axis ticks are remapped to original time units.
    Custom(String),
}

/// A comprehensive error type for malformed diagnostic results.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("diagnostic result has no covariates")]
    NoCovariates,

    #[error("diagnostic result has no events")]
    NoEvents,

    #[error("{got} covariate names supplied for {expected} residual columns")]
    NameCountMismatch { got: usize, expected: usize },

    #[error("residual matrix has {rows} rows but the time axis has {len} entries")]
    TimeLengthMismatch { rows: usize, len: usize },

    #[error("residual matrix has {rows} rows but {len} event times were supplied")]
    EventTimeLengthMismatch { rows: usize, len: usize },

    #[error("covariance matrix is {rows}x{cols}, expected {expected}x{expected}")]
    CovarianceShape {
        rows: usize,
        cols: usize,
        expected: usize,
    },

    #[error("{got} p-values supplied for {expected} covariates")]
    PValueCountMismatch { got: usize, expected: usize },

    #[error("time axis contains a non-finite value at position {0}")]
    NonFiniteTime(usize),

    #[error("event times contain a non-finite value at position {0}")]
    NonFiniteEventTime(usize),

    #[error("duplicate covariate name '{0}'")]
    DuplicateName(String),

    #[error("covariance diagonal is negative for covariate {index}")]
    NegativeVariance { index: usize },
}

/// The output of an external proportional-hazards goodness-of-fit test,
/// validated and ready for plotting. Read-only once constructed.
#[derive(Debug, Clone)]
pub struct DiagnosticResult {
    names: Vec<String>,
    event_time: Array1<f64>,
    time: Array1<f64>,
    residuals: Array2<f64>,
    covariance: Array2<f64>,
    p_values: Array1<f64>,
    global_p_value: Option<f64>,
    transform: TimeTransform,
}

impl DiagnosticResult {
    /// Builds a validated result.
    ///
    /// * `names` — one name per covariate, in residual-column order.
    /// * `event_time` — original (untransformed) event times, one per event.
    /// * `time` — the (possibly transformed) time axis the residuals were
    ///   computed against. Equal to `event_time` for [`TimeTransform::Identity`].
    /// * `residuals` — scaled Schoenfeld residual matrix,
    ///   shape `[n_events, n_covariates]`.
    /// * `covariance` — coefficient covariance matrix from the fitted model,
    ///   shape `[n_covariates, n_covariates]`.
    /// * `p_values` — per-covariate test p-values.
    /// * `transform` — how `time` relates to `event_time`.
    pub fn new(
        names: Vec<String>,
        event_time: Array1<f64>,
        time: Array1<f64>,
        residuals: Array2<f64>,
        covariance: Array2<f64>,
        p_values: Array1<f64>,
        transform: TimeTransform,
    ) -> Result<Self, DataError> {
        let rows = residuals.nrows();
        let cols = residuals.ncols();

        if cols == 0 || names.is_empty() {
            return Err(DataError::NoCovariates);
        }
        if rows == 0 {
            return Err(DataError::NoEvents);
        }
        if names.len() != cols {
            return Err(DataError::NameCountMismatch {
                got: names.len(),
                expected: cols,
            });
        }
        if time.len() != rows {
            return Err(DataError::TimeLengthMismatch {
                rows,
                len: time.len(),
            });
        }
        if event_time.len() != rows {
            return Err(DataError::EventTimeLengthMismatch {
                rows,
                len: event_time.len(),
            });
        }
        if covariance.nrows() != cols || covariance.ncols() != cols {
            return Err(DataError::CovarianceShape {
                rows: covariance.nrows(),
                cols: covariance.ncols(),
                expected: cols,
            });
        }
        if p_values.len() != cols {
            return Err(DataError::PValueCountMismatch {
                got: p_values.len(),
                expected: cols,
            });
        }
        if let Some(pos) = time.iter().position(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteTime(pos));
        }
        if let Some(pos) = event_time.iter().position(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteEventTime(pos));
        }
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(DataError::DuplicateName(name.clone()));
            }
        }
        for (index, &v) in covariance.diag().iter().enumerate() {
            if v < 0.0 {
                return Err(DataError::NegativeVariance { index });
            }
        }

        Ok(Self {
            names,
            event_time,
            time,
            residuals,
            covariance,
            p_values,
            global_p_value: None,
            transform,
        })
    }

    /// Attaches the global-test p-value the upstream routine reported
    /// alongside the per-covariate tests.
    pub fn with_global_p_value(mut self, p: f64) -> Self {
        self.global_p_value = Some(p);
        self
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Original event times, one per event, ascending.
    pub fn event_time(&self) -> ArrayView1<'_, f64> {
        self.event_time.view()
    }

    /// The (possibly transformed) time axis the residuals live on.
    pub fn time(&self) -> ArrayView1<'_, f64> {
        self.time.view()
    }

    /// Scaled Schoenfeld residuals, shape `[n_events, n_covariates]`.
    pub fn residuals(&self) -> ArrayView2<'_, f64> {
        self.residuals.view()
    }

    /// Coefficient covariance matrix from the fitted model.
    pub fn covariance(&self) -> ArrayView2<'_, f64> {
        self.covariance.view()
    }

    pub fn p_values(&self) -> ArrayView1<'_, f64> {
        self.p_values.view()
    }

    pub fn global_p_value(&self) -> Option<f64> {
        self.global_p_value
    }

    pub fn transform(&self) -> &TimeTransform {
        &self.transform
    }

    pub fn n_events(&self) -> usize {
        self.residuals.nrows()
    }

    pub fn n_covariates(&self) -> usize {
        self.residuals.ncols()
    }
}
