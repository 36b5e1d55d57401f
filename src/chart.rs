//! Immutable chart descriptions: what the builder emits and the printer
//! consumes. Nothing here draws; these are plain data.

use plotters::style::RGBColor;

/// Colors and font sizes shared by every panel of one diagnostic display.
#[derive(Debug, Clone)]
pub struct Theme {
    pub background: RGBColor,
    /// Axis text, captions and tick labels.
    pub foreground: RGBColor,
    pub fitted: RGBColor,
    pub points: RGBColor,
    pub band: RGBColor,
    pub caption_font_px: u32,
    pub label_font_px: u32,
}

impl Theme {
    /// White background, dark ink, red residual points.
    pub fn classic() -> Self {
        Self {
            background: RGBColor(255, 255, 255),
            foreground: RGBColor(30, 30, 30),
            fitted: RGBColor(16, 78, 139),
            points: RGBColor(178, 34, 34),
            band: RGBColor(110, 110, 110),
            caption_font_px: 18,
            label_font_px: 13,
        }
    }

    pub fn dark() -> Self {
        Self {
            background: RGBColor(13, 17, 23),
            foreground: RGBColor(230, 237, 243),
            fitted: RGBColor(122, 198, 255),
            points: RGBColor(240, 99, 92),
            band: RGBColor(150, 160, 175),
            caption_font_px: 18,
            label_font_px: 13,
        }
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::classic()
    }
}

/// One custom x-axis tick: where it sits on the (transformed) axis and the
/// original-time-units text it shows.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisTick {
    pub position: f64,
    pub label: String,
}

/// Upper and lower pointwise confidence curves, symmetric about the fit.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceBand {
    pub upper: Vec<(f64, f64)>,
    pub lower: Vec<(f64, f64)>,
}

/// Everything needed to draw one covariate's panel. Immutable once built.
#[derive(Debug, Clone)]
pub struct ChartSpec {
    /// Covariate this panel belongs to; unique within a collection.
    pub covariate: String,
    /// Panel caption, carrying the per-covariate test p-value.
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    /// Smoothed trend, one point per evaluation-grid position.
    pub fitted: Vec<(f64, f64)>,
    /// Observed residual overlay, when requested.
    pub points: Option<Vec<(f64, f64)>>,
    /// Confidence curves, when requested; drawn dashed.
    pub band: Option<ConfidenceBand>,
    pub x_range: (f64, f64),
    pub y_range: (f64, f64),
    /// Custom ticks for non-identity monotone time transforms; `None` means
    /// the axis labels itself numerically.
    pub x_ticks: Option<Vec<AxisTick>>,
    pub theme: Theme,
}

/// An ordered, covariate-named sequence of chart specifications, plus the
/// optional caption the printer shows above the grid.
#[derive(Debug, Clone)]
pub struct ChartCollection {
    charts: Vec<ChartSpec>,
    caption: Option<String>,
}

impl ChartCollection {
    pub fn new(charts: Vec<ChartSpec>, caption: Option<String>) -> Self {
        Self { charts, caption }
    }

    pub fn len(&self) -> usize {
        self.charts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.charts.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChartSpec> {
        self.charts.iter()
    }

    /// Looks a chart up by covariate name.
    pub fn get(&self, covariate: &str) -> Option<&ChartSpec> {
        self.charts.iter().find(|c| c.covariate == covariate)
    }

    /// Covariate names in display order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.charts.iter().map(|c| c.covariate.as_str())
    }

    pub fn caption(&self) -> Option<&str> {
        self.caption.as_deref()
    }
}

impl<'a> IntoIterator for &'a ChartCollection {
    type Item = &'a ChartSpec;
    type IntoIter = std::slice::Iter<'a, ChartSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.charts.iter()
    }
}

/// Compact numeric formatting for axis tick text: fixed precision with
/// trailing zeros trimmed, scientific notation for extreme magnitudes.
pub(crate) fn format_tick(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    let magnitude = value.abs();
    if !(1e-3..1e5).contains(&magnitude) {
        return format!("{value:e}");
    }
    let mut text = format!("{value:.3}");
    while text.ends_with('0') {
        text.pop();
    }
    if text.ends_with('.') {
        text.pop();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ChartSpec {
        ChartSpec {
            covariate: name.to_string(),
            title: format!("{name} title"),
            x_label: "Time".to_string(),
            y_label: format!("Beta(t) for {name}"),
            fitted: vec![(0.0, 0.0), (1.0, 1.0)],
            points: None,
            band: None,
            x_range: (0.0, 1.0),
            y_range: (0.0, 1.0),
            x_ticks: None,
            theme: Theme::default(),
        }
    }

    #[test]
    fn collection_preserves_order_and_lookup() {
        let collection =
            ChartCollection::new(vec![spec("age"), spec("sex")], Some("overall".to_string()));
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.names().collect::<Vec<_>>(), vec!["age", "sex"]);
        assert!(collection.get("sex").is_some());
        assert!(collection.get("bmi").is_none());
        assert_eq!(collection.caption(), Some("overall"));
    }

    #[test]
    fn tick_formatting_trims_noise() {
        assert_eq!(format_tick(0.0), "0");
        assert_eq!(format_tick(10.0), "10");
        assert_eq!(format_tick(0.25), "0.25");
        assert_eq!(format_tick(-1.5), "-1.5");
        assert_eq!(format_tick(2_000_000.0), "2e6");
    }
}
