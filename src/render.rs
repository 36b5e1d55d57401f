//! Draws a [`ChartCollection`] onto a `plotters` drawing area: one panel per
//! chart, arranged on a grid, with every panel given the same left
//! label-area width so the y axes align visually.

use crate::chart::{format_tick, AxisTick, ChartCollection, ChartSpec};
use plotters::coord::ranged1d::BindKeyPoints;
use plotters::coord::CoordTranslate;
use plotters::coord::Shift;
use plotters::drawing::DrawingAreaErrorKind;
use plotters::prelude::*;
use plotters::series::DashedLineSeries;
use plotters::style::{FontDesc, FontFamily, FontStyle};
use thiserror::Error;

const PANEL_MARGIN: u32 = 10;
const BOTTOM_LABEL_AREA: u32 = 40;
const GRID_CAPTION_PX: f64 = 16.0;
const Y_TICK_TARGET: usize = 5;
// Approximate glyph advance for the label font, plus room for the rotated
// axis description next to the tick labels.
const TICK_GLYPH_PX: u32 = 8;
const AXIS_DESC_PX: u32 = 26;

/// Errors raised while printing a chart collection.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("cannot print an empty chart collection")]
    EmptyCollection,

    #[error("drawing backend error: {0}")]
    Backend(String),
}

/// The grid geometry a print run will use, exposed for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub rows: usize,
    pub columns: usize,
    /// Left label-area width, in pixels, applied to every panel.
    pub left_label_width: u32,
}

/// Arranges the charts of a collection on a grid and draws them with
/// aligned y axes.
///
/// The grid defaults to `rows = ceil(sqrt(n))` with just enough columns;
/// the column count can be pinned explicitly.
#[derive(Debug, Clone, Default)]
pub struct GridPrinter {
    columns: Option<usize>,
}

impl GridPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the number of grid columns (at least 1).
    pub fn columns(mut self, columns: usize) -> Self {
        self.columns = Some(columns.max(1));
        self
    }

    /// Computes the grid shape and the unified left label width without
    /// drawing anything.
    pub fn layout(&self, charts: &ChartCollection) -> Result<GridLayout, RenderError> {
        let n = charts.len();
        if n == 0 {
            return Err(RenderError::EmptyCollection);
        }
        let (rows, columns) = match self.columns {
            Some(requested) => {
                let columns = requested.min(n);
                (n.div_ceil(columns), columns)
            }
            None => {
                let rows = (n as f64).sqrt().ceil() as usize;
                (rows, n.div_ceil(rows))
            }
        };
        let left_label_width = charts
            .iter()
            .map(left_label_width)
            .max()
            .unwrap_or(AXIS_DESC_PX);
        Ok(GridLayout {
            rows,
            columns,
            left_label_width,
        })
    }

    /// Renders every chart of the collection onto `root`.
    ///
    /// The caller picks the backend (bitmap, SVG, ...); this routine only
    /// draws. All panels share the layout's left label width, so their y
    /// axes align regardless of tick label lengths.
    pub fn print<DB: DrawingBackend>(
        &self,
        charts: &ChartCollection,
        root: &DrawingArea<DB, Shift>,
    ) -> Result<(), RenderError> {
        let layout = self.layout(charts)?;
        let theme = &charts
            .iter()
            .next()
            .ok_or(RenderError::EmptyCollection)?
            .theme;

        root.fill(&theme.background).map_err(backend_error)?;
        let grid_area = match charts.caption() {
            Some(caption) => {
                let caption_font =
                    FontDesc::new(FontFamily::SansSerif, GRID_CAPTION_PX, FontStyle::Normal);
                root.titled(caption, caption_font.color(&theme.foreground))
                    .map_err(backend_error)?
            }
            None => root.clone(),
        };

        log::debug!(
            "printing {} chart(s) on a {}x{} grid, left label width {}px",
            charts.len(),
            layout.rows,
            layout.columns,
            layout.left_label_width
        );

        let panels = grid_area.split_evenly((layout.rows, layout.columns));
        for (spec, panel) in charts.iter().zip(panels.iter()) {
            draw_panel(spec, panel, layout.left_label_width)?;
        }
        Ok(())
    }
}

fn draw_panel<DB: DrawingBackend>(
    spec: &ChartSpec,
    panel: &DrawingArea<DB, Shift>,
    left_label_width: u32,
) -> Result<(), RenderError> {
    let theme = &spec.theme;
    let (x_lo, x_hi) = spec.x_range;
    let (y_lo, y_hi) = padded(spec.y_range);

    let caption_font = FontDesc::new(
        FontFamily::SansSerif,
        theme.caption_font_px as f64,
        FontStyle::Normal,
    );
    let label_font = FontDesc::new(
        FontFamily::SansSerif,
        theme.label_font_px as f64,
        FontStyle::Normal,
    );

    let mut builder = ChartBuilder::on(panel);
    builder
        .caption(&spec.title, caption_font.color(&theme.foreground))
        .margin(PANEL_MARGIN)
        .set_label_area_size(LabelAreaPosition::Left, left_label_width)
        .set_label_area_size(LabelAreaPosition::Bottom, BOTTOM_LABEL_AREA);

    match &spec.x_ticks {
        Some(ticks) => {
            let positions: Vec<f64> = ticks.iter().map(|tick| tick.position).collect();
            let mut chart = builder
                .build_cartesian_2d((x_lo..x_hi).with_key_points(positions), y_lo..y_hi)
                .map_err(backend_error)?;
            chart
                .configure_mesh()
                .disable_mesh()
                .x_desc(&spec.x_label)
                .y_desc(&spec.y_label)
                .label_style(label_font.clone().color(&theme.foreground))
                .axis_desc_style(label_font.clone().color(&theme.foreground))
                .x_labels(ticks.len().max(2))
                .x_label_formatter(&|position| tick_label(ticks, *position))
                .y_labels(Y_TICK_TARGET)
                .y_label_formatter(&|value| format_tick(*value))
                .draw()
                .map_err(backend_error)?;
            draw_series_layers(&mut chart, spec)
        }
        None => {
            let mut chart = builder
                .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)
                .map_err(backend_error)?;
            chart
                .configure_mesh()
                .disable_mesh()
                .x_desc(&spec.x_label)
                .y_desc(&spec.y_label)
                .label_style(label_font.clone().color(&theme.foreground))
                .axis_desc_style(label_font.clone().color(&theme.foreground))
                .x_label_formatter(&|value| format_tick(*value))
                .y_labels(Y_TICK_TARGET)
                .y_label_formatter(&|value| format_tick(*value))
                .draw()
                .map_err(backend_error)?;
            draw_series_layers(&mut chart, spec)
        }
    }
}

/// Draws the data layers shared by both axis variants: point overlay first,
/// then the trend, then the dashed confidence curves on top.
fn draw_series_layers<DB, CT>(
    chart: &mut ChartContext<'_, DB, CT>,
    spec: &ChartSpec,
) -> Result<(), RenderError>
where
    DB: DrawingBackend,
    CT: CoordTranslate<From = (f64, f64)>,
{
    let theme = &spec.theme;
    if let Some(points) = &spec.points {
        chart
            .draw_series(
                points
                    .iter()
                    .map(|&(x, y)| Circle::new((x, y), 2, theme.points.filled())),
            )
            .map_err(backend_error)?;
    }
    chart
        .draw_series(LineSeries::new(
            spec.fitted.iter().copied(),
            theme.fitted.stroke_width(2),
        ))
        .map_err(backend_error)?;
    if let Some(band) = &spec.band {
        chart
            .draw_series(DashedLineSeries::new(
                band.upper.iter().copied(),
                6,
                4,
                theme.band.stroke_width(1),
            ))
            .map_err(backend_error)?;
        chart
            .draw_series(DashedLineSeries::new(
                band.lower.iter().copied(),
                6,
                4,
                theme.band.stroke_width(1),
            ))
            .map_err(backend_error)?;
    }
    Ok(())
}

/// Width the y tick labels of one chart need, from the same formatter the
/// axis uses. The maximum of these across a collection becomes every
/// panel's left label width.
fn left_label_width(spec: &ChartSpec) -> u32 {
    let (y_lo, y_hi) = padded(spec.y_range);
    let widest = (0..Y_TICK_TARGET)
        .map(|i| y_lo + (y_hi - y_lo) * i as f64 / (Y_TICK_TARGET - 1) as f64)
        .map(|value| format_tick(value).len())
        .max()
        .unwrap_or(1);
    widest as u32 * TICK_GLYPH_PX + AXIS_DESC_PX
}

fn tick_label(ticks: &[AxisTick], position: f64) -> String {
    ticks
        .iter()
        .find(|tick| (tick.position - position).abs() <= 1e-9 * (1.0 + position.abs()))
        .map(|tick| tick.label.clone())
        .unwrap_or_default()
}

/// Pads a raw data range slightly so boundary marks are not clipped; a
/// degenerate range (flat trend, no points) becomes a unit window.
fn padded((lo, hi): (f64, f64)) -> (f64, f64) {
    let span = hi - lo;
    if !(span > 0.0) {
        return (lo - 0.5, hi + 0.5);
    }
    let pad = span * 0.05;
    (lo - pad, hi + pad)
}

fn backend_error<E: std::error::Error + Send + Sync>(err: DrawingAreaErrorKind<E>) -> RenderError {
    RenderError::Backend(err.to_string())
}
