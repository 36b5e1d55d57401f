//! Turns a proportional-hazards diagnostic result into one chart
//! specification per covariate: smoothed residual trend, optional observed
//! points, optional ±2-standard-error bands, and transform-aware axis
//! formatting.

use crate::chart::{format_tick, AxisTick, ChartCollection, ChartSpec, ConfidenceBand, Theme};
use crate::data::{DiagnosticResult, TimeTransform};
use crate::spline::{NaturalSplineFit, SplineError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default spline degrees of freedom for the smoothed trend.
pub const DEFAULT_SPLINE_DF: usize = 4;
/// Default number of dense evaluation points for the smoothed trend.
pub const DEFAULT_SMOOTH_POINTS: usize = 40;

/// Which covariates of the result to plot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CovariateSelection {
    /// Every covariate, in result order.
    #[default]
    All,
    /// A subset by zero-based column index, in request order.
    Indices(Vec<usize>),
    /// A subset by covariate name, in request order.
    Names(Vec<String>),
}

/// Errors raised while assembling charts from a diagnostic result.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("unknown covariate name '{0}'")]
    UnknownCovariate(String),

    #[error("covariate index {index} is out of range for a result with {nvar} covariates")]
    IndexOutOfRange { index: usize, nvar: usize },

    #[error(transparent)]
    Spline(#[from] SplineError),
}

/// Builds diagnostic charts from a [`DiagnosticResult`].
///
/// Accumulates display options fluently and emits one immutable
/// [`ChartSpec`] per selected covariate on [`build`](Self::build). Pure:
/// the same result and options always produce the same collection.
#[derive(Debug, Clone)]
pub struct ResidualPlotBuilder<'a> {
    result: &'a DiagnosticResult,
    show_points: bool,
    confidence_bands: bool,
    spline_df: usize,
    smooth_points: usize,
    covariates: CovariateSelection,
    theme: Theme,
}

impl<'a> ResidualPlotBuilder<'a> {
    pub fn new(result: &'a DiagnosticResult) -> Self {
        Self {
            result,
            show_points: true,
            confidence_bands: true,
            spline_df: DEFAULT_SPLINE_DF,
            smooth_points: DEFAULT_SMOOTH_POINTS,
            covariates: CovariateSelection::All,
            theme: Theme::default(),
        }
    }

    /// Overlay the observed residuals as points (default: on).
    pub fn show_points(mut self, show: bool) -> Self {
        self.show_points = show;
        self
    }

    /// Draw ±2-standard-error curves around the trend (default: on).
    pub fn confidence_bands(mut self, bands: bool) -> Self {
        self.confidence_bands = bands;
        self
    }

    /// Spline degrees of freedom for the smoothed trend (default: 4).
    pub fn spline_df(mut self, df: usize) -> Self {
        self.spline_df = df;
        self
    }

    /// Number of dense evaluation points for the trend (default: 40).
    pub fn smooth_points(mut self, points: usize) -> Self {
        self.smooth_points = points;
        self
    }

    /// Restrict the output to a subset of covariates (default: all).
    pub fn covariates(mut self, selection: CovariateSelection) -> Self {
        self.covariates = selection;
        self
    }

    pub fn theme(mut self, theme: Theme) -> Self {
        self.theme = theme;
        self
    }

    /// Fits the shared smoother and assembles one chart per selected
    /// covariate. Selection errors are reported before any numeric work;
    /// a singular fit is reported before any chart is built.
    pub fn build(self) -> Result<ChartCollection, BuildError> {
        let selected = self.resolve_selection()?;

        log::debug!(
            "smoothing {} covariate(s): df={}, grid={}, events={}",
            selected.len(),
            self.spline_df,
            self.smooth_points,
            self.result.n_events()
        );
        let fit = NaturalSplineFit::fit(self.result.time(), self.spline_df, self.smooth_points)?;
        let axis = DisplayAxis::from_result(self.result, &fit);

        let charts = selected
            .into_iter()
            .map(|index| self.build_chart(index, &fit, &axis))
            .collect();

        let caption = self
            .result
            .global_p_value()
            .map(|p| format!("Global Schoenfeld Test {}", format_p_value(p)));
        Ok(ChartCollection::new(charts, caption))
    }

    fn resolve_selection(&self) -> Result<Vec<usize>, BuildError> {
        let nvar = self.result.n_covariates();
        match &self.covariates {
            CovariateSelection::All => Ok((0..nvar).collect()),
            CovariateSelection::Indices(indices) => {
                for &index in indices {
                    if index >= nvar {
                        return Err(BuildError::IndexOutOfRange { index, nvar });
                    }
                }
                Ok(indices.clone())
            }
            CovariateSelection::Names(names) => names
                .iter()
                .map(|name| {
                    self.result
                        .names()
                        .iter()
                        .position(|candidate| candidate == name)
                        .ok_or_else(|| BuildError::UnknownCovariate(name.clone()))
                })
                .collect(),
        }
    }

    fn build_chart(&self, index: usize, fit: &NaturalSplineFit, axis: &DisplayAxis) -> ChartSpec {
        let name = &self.result.names()[index];
        let observed = self.result.residuals().column(index);
        let smoothed = fit.smooth(observed.view());

        let mut y_range = range_of(smoothed.iter().copied());
        if self.show_points {
            y_range = widen(y_range, range_of(observed.iter().copied()));
        }

        let fitted: Vec<(f64, f64)> = axis
            .grid
            .iter()
            .copied()
            .zip(smoothed.iter().copied())
            .collect();

        let band = if self.confidence_bands {
            let variance = self.result.covariance()[[index, index]];
            let scale = self.result.n_events() as f64 * variance;
            let half_widths: Vec<f64> = fit
                .leverage()
                .iter()
                .map(|&leverage| 2.0 * (scale * leverage).sqrt())
                .collect();
            let upper: Vec<(f64, f64)> = fitted
                .iter()
                .zip(half_widths.iter())
                .map(|(&(x, y), &h)| (x, y + h))
                .collect();
            let lower: Vec<(f64, f64)> = fitted
                .iter()
                .zip(half_widths.iter())
                .map(|(&(x, y), &h)| (x, y - h))
                .collect();
            y_range = widen(y_range, range_of(upper.iter().map(|&(_, y)| y)));
            y_range = widen(y_range, range_of(lower.iter().map(|&(_, y)| y)));
            Some(ConfidenceBand { upper, lower })
        } else {
            None
        };

        let points = if self.show_points {
            Some(
                axis.observed
                    .iter()
                    .copied()
                    .zip(observed.iter().copied())
                    .collect(),
            )
        } else {
            None
        };

        ChartSpec {
            covariate: name.clone(),
            title: format!(
                "Schoenfeld Individual Test {}",
                format_p_value(self.result.p_values()[index])
            ),
            x_label: "Time".to_string(),
            y_label: format!("Beta(t) for {name}"),
            fitted,
            points,
            band,
            x_range: (axis.grid[0], axis.grid[axis.grid.len() - 1]),
            y_range,
            x_ticks: axis.ticks.clone(),
            theme: self.theme.clone(),
        }
    }
}

/// Display-space x positions shared by every chart of one build: the dense
/// grid, the observed positions, and (for non-identity monotone transforms)
/// the remapped axis ticks. Computed once, before the per-covariate loop.
struct DisplayAxis {
    grid: Vec<f64>,
    observed: Vec<f64>,
    ticks: Option<Vec<AxisTick>>,
}

impl DisplayAxis {
    fn from_result(result: &DiagnosticResult, fit: &NaturalSplineFit) -> Self {
        match result.transform() {
            TimeTransform::Identity => Self {
                grid: fit.grid().to_vec(),
                observed: result.time().to_vec(),
                ticks: None,
            },
            TimeTransform::Log => Self {
                grid: fit.grid().iter().map(|v| v.exp()).collect(),
                observed: result.time().iter().map(|v| v.exp()).collect(),
                ticks: None,
            },
            // The axis stays in transformed units; ticks carry the labels
            // back to original time. Always computed, independent of the
            // point and band flags.
            TimeTransform::Custom(_) => Self {
                grid: fit.grid().to_vec(),
                observed: result.time().to_vec(),
                ticks: Some(monotone_ticks(result)),
            },
        }
    }
}

/// Remaps dense positions on a monotone-transformed axis back to original
/// time units: probe 8 evenly spread axis positions, interpolate each to
/// original time, round to 2 significant digits, and interpolate the rounded
/// time back to an axis position for the tick mark.
fn monotone_ticks(result: &DiagnosticResult) -> Vec<AxisTick> {
    let mut pairs: Vec<(f64, f64)> = result
        .time()
        .iter()
        .copied()
        .zip(result.event_time().iter().copied())
        .collect();
    pairs.sort_unstable_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    // Keep only pairs strictly increasing in both coordinates so linear
    // interpolation is valid in either direction.
    let mut axis_pos: Vec<f64> = Vec::with_capacity(pairs.len());
    let mut original: Vec<f64> = Vec::with_capacity(pairs.len());
    for (position, time) in pairs {
        let ascending = match (axis_pos.last(), original.last()) {
            (Some(&last_pos), Some(&last_time)) => position > last_pos && time > last_time,
            _ => true,
        };
        if ascending {
            axis_pos.push(position);
            original.push(time);
        }
    }
    if axis_pos.len() < 2 {
        return Vec::new();
    }

    let lo = axis_pos[0];
    let hi = axis_pos[axis_pos.len() - 1];
    let mut ticks: Vec<AxisTick> = Vec::with_capacity(8);
    for k in 0..8 {
        // Positions 2, 4, .., 16 of a 17-point subdivision of the axis.
        let probe = lo + (hi - lo) * (2 * k + 1) as f64 / 16.0;
        let Some(time_at_probe) = interpolate(&axis_pos, &original, probe) else {
            continue;
        };
        let rounded = signif(time_at_probe, 2);
        let Some(position) = interpolate(&original, &axis_pos, rounded) else {
            continue;
        };
        let label = format_tick(rounded);
        if ticks.iter().any(|t| t.label == label) {
            continue;
        }
        ticks.push(AxisTick { position, label });
    }
    ticks
}

/// Piecewise-linear interpolation over strictly increasing `xs`; `None`
/// outside the covered range.
fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> Option<f64> {
    if xs.len() < 2 || x < xs[0] || x > xs[xs.len() - 1] {
        return None;
    }
    let upper = xs.partition_point(|&v| v <= x);
    if upper == 0 {
        return Some(ys[0]);
    }
    if upper == xs.len() {
        return Some(ys[ys.len() - 1]);
    }
    let (x0, x1) = (xs[upper - 1], xs[upper]);
    let (y0, y1) = (ys[upper - 1], ys[upper]);
    Some(y0 + (y1 - y0) * (x - x0) / (x1 - x0))
}

/// Rounds to the given number of significant digits.
fn signif(value: f64, digits: i32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    let scale = 10_f64.powi(digits - 1 - value.abs().log10().floor() as i32);
    (value * scale).round() / scale
}

fn format_p_value(p: f64) -> String {
    if p < 1e-4 {
        "p < 0.0001".to_string()
    } else {
        format!("p = {p:.4}")
    }
}

fn range_of(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

fn widen(a: (f64, f64), b: (f64, f64)) -> (f64, f64) {
    (a.0.min(b.0), a.1.max(b.1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array, Array2};

    fn synthetic_result(transform: TimeTransform) -> DiagnosticResult {
        let n = 24;
        let event_time = Array::linspace(1.0, 12.0, n);
        let time = match &transform {
            TimeTransform::Identity => event_time.clone(),
            TimeTransform::Log => event_time.mapv(f64::ln),
            // A monotone but non-linear axis, like a rank transform.
            TimeTransform::Custom(_) => event_time.mapv(|t| t.sqrt()),
        };
        let residuals = Array2::from_shape_fn((n, 2), |(i, j)| {
            let t = event_time[i];
            if j == 0 {
                (t * 0.7).sin() + 0.05 * t
            } else {
                0.4 - 0.02 * t
            }
        });
        let covariance = array![[0.04, 0.0], [0.0, 0.09]];
        DiagnosticResult::new(
            vec!["age".to_string(), "sex".to_string()],
            event_time,
            time,
            residuals,
            covariance,
            array![0.031, 0.67],
            transform,
        )
        .unwrap()
    }

    #[test]
    fn one_chart_per_covariate_in_result_order() {
        let result = synthetic_result(TimeTransform::Identity);
        let charts = ResidualPlotBuilder::new(&result).build().unwrap();
        assert_eq!(charts.len(), 2);
        assert_eq!(charts.names().collect::<Vec<_>>(), vec!["age", "sex"]);
        assert!(charts.get("age").is_some());
    }

    #[test]
    fn subset_by_name_keeps_request_order() {
        let result = synthetic_result(TimeTransform::Identity);
        let charts = ResidualPlotBuilder::new(&result)
            .covariates(CovariateSelection::Names(vec!["sex".to_string()]))
            .build()
            .unwrap();
        assert_eq!(charts.len(), 1);
        assert_eq!(charts.names().collect::<Vec<_>>(), vec!["sex"]);
    }

    #[test]
    fn unknown_name_is_rejected_before_fitting() {
        let result = synthetic_result(TimeTransform::Identity);
        let err = ResidualPlotBuilder::new(&result)
            .covariates(CovariateSelection::Names(vec!["bmi".to_string()]))
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::UnknownCovariate(name) if name == "bmi"));
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let result = synthetic_result(TimeTransform::Identity);
        let err = ResidualPlotBuilder::new(&result)
            .covariates(CovariateSelection::Indices(vec![0, 2]))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::IndexOutOfRange { index: 2, nvar: 2 }
        ));
    }

    #[test]
    fn excessive_df_is_singular() {
        let result = synthetic_result(TimeTransform::Identity);
        let err = ResidualPlotBuilder::new(&result)
            .spline_df(30)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::Spline(SplineError::Singular { df: 30, .. })
        ));
    }

    #[test]
    fn identity_keeps_time_values_unchanged() {
        let result = synthetic_result(TimeTransform::Identity);
        let charts = ResidualPlotBuilder::new(&result).build().unwrap();
        let chart = charts.get("age").unwrap();
        let xs: Vec<f64> = chart.points.as_ref().unwrap().iter().map(|p| p.0).collect();
        assert_eq!(xs, result.time().to_vec());
        // Fitted curve spans the full time range.
        assert_eq!(chart.fitted.first().unwrap().0, 1.0);
        assert_eq!(chart.fitted.last().unwrap().0, 12.0);
        assert!(chart.x_ticks.is_none());
    }

    #[test]
    fn log_transform_exponentiates_the_axis() {
        let result = synthetic_result(TimeTransform::Log);
        let charts = ResidualPlotBuilder::new(&result).build().unwrap();
        let chart = charts.get("age").unwrap();
        let time = result.time();
        let expected_lo = time[0].exp();
        let expected_hi = time[time.len() - 1].exp();
        assert!((chart.fitted.first().unwrap().0 - expected_lo).abs() < 1e-12);
        assert!((chart.fitted.last().unwrap().0 - expected_hi).abs() < 1e-9);
        let first_point = chart.points.as_ref().unwrap()[0].0;
        assert!((first_point - result.event_time()[0]).abs() < 1e-12);
        assert!(chart.x_ticks.is_none());
    }

    #[test]
    fn confidence_bands_are_symmetric_about_the_fit() {
        let result = synthetic_result(TimeTransform::Identity);
        let charts = ResidualPlotBuilder::new(&result).build().unwrap();
        let chart = charts.get("age").unwrap();
        let band = chart.band.as_ref().unwrap();
        assert_eq!(band.upper.len(), chart.fitted.len());
        for ((&(_, up), &(_, low)), &(_, mid)) in band
            .upper
            .iter()
            .zip(band.lower.iter())
            .zip(chart.fitted.iter())
        {
            assert!(((up - mid) - (mid - low)).abs() < 1e-10);
            assert!(up >= mid && mid >= low);
        }
        // The y-range covers the band.
        assert!(chart.y_range.0 <= band.lower.iter().fold(f64::INFINITY, |m, p| m.min(p.1)));
        assert!(chart.y_range.1 >= band.upper.iter().fold(f64::NEG_INFINITY, |m, p| m.max(p.1)));
    }

    #[test]
    fn flags_off_drops_points_and_bands() {
        let result = synthetic_result(TimeTransform::Identity);
        let charts = ResidualPlotBuilder::new(&result)
            .show_points(false)
            .confidence_bands(false)
            .build()
            .unwrap();
        let chart = charts.get("sex").unwrap();
        assert!(chart.points.is_none());
        assert!(chart.band.is_none());
    }

    #[test]
    fn custom_transform_ticks_are_computed_even_with_flags_off() {
        let result = synthetic_result(TimeTransform::Custom("km".to_string()));
        let charts = ResidualPlotBuilder::new(&result)
            .show_points(false)
            .confidence_bands(false)
            .build()
            .unwrap();
        let chart = charts.get("age").unwrap();
        let ticks = chart.x_ticks.as_ref().expect("ticks must be present");
        assert!(!ticks.is_empty());
        let (lo, hi) = chart.x_range;
        for tick in ticks {
            assert!(tick.position >= lo && tick.position <= hi);
            let value: f64 = tick.label.parse().unwrap();
            // Labels are original time units, inside the event-time range.
            assert!((1.0..=12.0).contains(&value));
        }
        // Positions ascend with the labels.
        for pair in ticks.windows(2) {
            assert!(pair[1].position > pair[0].position);
        }
    }

    #[test]
    fn title_carries_the_p_value() {
        let result = synthetic_result(TimeTransform::Identity);
        let charts = ResidualPlotBuilder::new(&result).build().unwrap();
        assert_eq!(
            charts.get("age").unwrap().title,
            "Schoenfeld Individual Test p = 0.0310"
        );
        assert!(charts.caption().is_none());
    }

    #[test]
    fn global_p_value_becomes_the_caption() {
        let result = synthetic_result(TimeTransform::Identity).with_global_p_value(0.002);
        let charts = ResidualPlotBuilder::new(&result).build().unwrap();
        assert_eq!(charts.caption(), Some("Global Schoenfeld Test p = 0.0020"));
    }

    #[test]
    fn interpolation_round_trips_inside_the_range() {
        let xs = [1.0, 2.0, 4.0, 8.0];
        let ys = [10.0, 20.0, 40.0, 80.0];
        assert_eq!(interpolate(&xs, &ys, 1.0), Some(10.0));
        assert_eq!(interpolate(&xs, &ys, 8.0), Some(80.0));
        assert_eq!(interpolate(&xs, &ys, 3.0), Some(30.0));
        assert_eq!(interpolate(&xs, &ys, 0.5), None);
        assert_eq!(interpolate(&xs, &ys, 9.0), None);
    }

    #[test]
    fn significant_digit_rounding() {
        assert_eq!(signif(123.4, 2), 120.0);
        assert_eq!(signif(0.0456, 2), 0.046);
        assert_eq!(signif(-8.71, 2), -8.7);
        assert_eq!(signif(0.0, 2), 0.0);
    }

    #[test]
    fn p_value_formatting() {
        assert_eq!(format_p_value(0.1234), "p = 0.1234");
        assert_eq!(format_p_value(0.00005), "p < 0.0001");
    }

    #[test]
    fn smoothed_trend_tracks_a_linear_signal() {
        // Covariate "sex" carries an exactly linear residual trend; the
        // natural spline must reproduce it on the grid.
        let result = synthetic_result(TimeTransform::Identity);
        let charts = ResidualPlotBuilder::new(&result).build().unwrap();
        let chart = charts.get("sex").unwrap();
        for &(x, y) in &chart.fitted {
            let expected = 0.4 - 0.02 * x;
            assert!(
                (y - expected).abs() < 1e-8,
                "trend deviates at {x}: {y} vs {expected}"
            );
        }
    }

    #[test]
    fn default_options_smoke() {
        let result = synthetic_result(TimeTransform::Identity);
        let builder = ResidualPlotBuilder::new(&result);
        assert_eq!(builder.spline_df, DEFAULT_SPLINE_DF);
        assert_eq!(builder.smooth_points, DEFAULT_SMOOTH_POINTS);
        assert!(builder.show_points);
        assert!(builder.confidence_bands);
    }
}
