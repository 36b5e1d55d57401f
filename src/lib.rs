//! # coxdiag
//!
//! Diagnostic plots for the proportional-hazards assumption in survival
//! regression: scaled Schoenfeld residuals with a natural-spline smoothed
//! trend and pointwise confidence bands, one panel per covariate, arranged
//! on a grid with aligned axes.
//!
//! Two components, no shared state:
//!
//! - [`ResidualPlotBuilder`] turns a pre-computed [`DiagnosticResult`] into
//!   an ordered, covariate-named [`ChartCollection`].
//! - [`GridPrinter`] draws a collection onto any `plotters` drawing area,
//!   giving every panel the same left label width so the y axes align.
//!
//! The numerics (QR factorization, triangular inverse) come from
//! `ndarray-linalg`; the rendering comes from `plotters`. This crate only
//! reshapes an already-computed test result into chart form.

#![deny(dead_code)]
#![deny(unused_imports)]

pub mod builder;
pub mod chart;
pub mod data;
pub mod render;
pub mod spline;

pub use builder::{
    BuildError, CovariateSelection, ResidualPlotBuilder, DEFAULT_SMOOTH_POINTS, DEFAULT_SPLINE_DF,
};
pub use chart::{AxisTick, ChartCollection, ChartSpec, ConfidenceBand, Theme};
pub use data::{DataError, DiagnosticResult, TimeTransform};
pub use render::{GridLayout, GridPrinter, RenderError};
pub use spline::{NaturalSplineFit, SplineError};
