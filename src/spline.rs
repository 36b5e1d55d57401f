use ndarray::{s, Array1, Array2, ArrayView1, Axis};
use ndarray_linalg::{Inverse, QR};
use thiserror::Error;

/// A comprehensive error type for all operations within the spline module.
#[derive(Error, Debug)]
pub enum SplineError {
    #[error("Spline degrees of freedom must be at least 2, but was {0}.")]
    InvalidDegreesOfFreedom(usize),

    #[error("Smoothing grid needs at least 2 points, but {0} were requested.")]
    InvalidGridSize(usize),

    #[error("Cannot fit a smoother to an empty set of time points.")]
    EmptyData,

    #[error("Time axis is degenerate: every value equals {0}.")]
    DegenerateRange(f64),

    #[error(
        "Spline fit is singular (design rank {rank} < {df} degrees of freedom); lower the degrees of freedom and retry."
    )]
    Singular { rank: usize, df: usize },

    #[error("QR decomposition failed while fitting the smoother: {0}")]
    LinalgError(#[from] ndarray_linalg::error::LinalgError),
}

/// A natural cubic spline smoother fitted jointly over a dense evaluation
/// grid and a set of observed time points.
///
/// The basis is the restricted (natural) cubic expansion: `1`, `x`, and one
/// third-difference term per interior knot, linear beyond the boundary knots.
/// Knots sit at quantiles of the combined grid-plus-observation vector, so
/// the fit adapts to the event-time distribution. The observed-point design
/// matrix is QR-factorized once; per-response smoothing is then a pair of
/// small matrix products.
#[derive(Debug, Clone)]
pub struct NaturalSplineFit {
    grid: Array1<f64>,
    pmat: Array2<f64>,
    // R^{-1} Q^T from the thin QR of the observed-point design; maps a
    // response vector straight to basis coefficients.
    solve: Array2<f64>,
    leverage: Array1<f64>,
    n_obs: usize,
    df: usize,
}

impl NaturalSplineFit {
    /// Fits the smoother scaffolding for a set of observed time points.
    ///
    /// * `times` — observed time positions (transformed units).
    /// * `df` — number of basis functions (intercept included).
    /// * `grid_len` — number of dense evaluation points spanning the range.
    ///
    /// Fails with [`SplineError::Singular`] when the observed-point design
    /// cannot support `df` basis functions; the caller is expected to lower
    /// `df` and retry.
    pub fn fit(times: ArrayView1<f64>, df: usize, grid_len: usize) -> Result<Self, SplineError> {
        if df < 2 {
            return Err(SplineError::InvalidDegreesOfFreedom(df));
        }
        if grid_len < 2 {
            return Err(SplineError::InvalidGridSize(grid_len));
        }
        let n_obs = times.len();
        if n_obs == 0 {
            return Err(SplineError::EmptyData);
        }
        if n_obs < df {
            return Err(SplineError::Singular { rank: n_obs, df });
        }

        let (t_min, t_max) = times
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        if !(t_min < t_max) {
            return Err(SplineError::DegenerateRange(t_min));
        }

        let grid = Array1::linspace(t_min, t_max, grid_len);
        let stacked = ndarray::concatenate(Axis(0), &[grid.view(), times.view()])
            .expect("concatenating two 1-D arrays cannot fail");

        let knots = internal::knot_vector(stacked.view(), (t_min, t_max), df);
        // Heavily tied data can collapse quantile knots onto each other,
        // which collapses basis columns in turn.
        let distinct = internal::count_strictly_increasing(&knots);
        if distinct < df {
            return Err(SplineError::Singular { rank: distinct, df });
        }

        let basis = internal::natural_basis(stacked.view(), &knots);
        let pmat = basis.slice(s![..grid_len, ..]).to_owned();
        let xmat = basis.slice(s![grid_len.., ..]).to_owned();

        let (q, r) = xmat.qr()?;
        let rank = internal::triangular_rank(&r);
        if rank < df {
            return Err(SplineError::Singular { rank, df });
        }

        let r_inv = r.inv()?;
        let solve = r_inv.dot(&q.t());
        // Pointwise leverage of the dense grid under the fitted design:
        // rowsum((P (X'X)^-1) o P), with (X'X)^-1 = R^-1 R^-T.
        let xtx_inv = r_inv.dot(&r_inv.t());
        let leverage = (&pmat.dot(&xtx_inv) * &pmat).sum_axis(Axis(1));

        Ok(Self {
            grid,
            pmat,
            solve,
            leverage,
            n_obs,
            df,
        })
    }

    /// The dense evaluation grid, ascending over the observed time range.
    pub fn grid(&self) -> ArrayView1<'_, f64> {
        self.grid.view()
    }

    pub fn df(&self) -> usize {
        self.df
    }

    /// Smooths one response vector (one residual column) onto the grid.
    pub fn smooth(&self, y: ArrayView1<f64>) -> Array1<f64> {
        assert_eq!(
            y.len(),
            self.n_obs,
            "response length must match the fitted time points"
        );
        let coefficients = self.solve.dot(&y);
        self.pmat.dot(&coefficients)
    }

    /// Pointwise leverage of the grid, for standard-error bands: the
    /// variance of the smoothed value at grid point `g` is
    /// `leverage[g]` times the response variance.
    pub fn leverage(&self) -> ArrayView1<'_, f64> {
        self.leverage.view()
    }
}

/// Internal module for implementation details not exposed in the public API.
mod internal {
    use super::*;

    /// Assembles the full knot vector: both boundaries plus `df - 2`
    /// interior knots at quantiles of the supplied values.
    pub(super) fn knot_vector(
        values: ArrayView1<f64>,
        range: (f64, f64),
        df: usize,
    ) -> Array1<f64> {
        let n_interior = df - 2;
        let mut knots = Vec::with_capacity(df);
        knots.push(range.0);
        knots.extend(quantiles(values, n_interior));
        knots.push(range.1);
        Array1::from_vec(knots)
    }

    /// Calculates quantiles from a data vector using linear interpolation
    /// (Type 7 in R), at probabilities `k / (n_quantiles + 1)`.
    pub(super) fn quantiles(data: ArrayView1<f64>, num_quantiles: usize) -> Vec<f64> {
        if num_quantiles == 0 {
            return Vec::new();
        }

        let mut sorted = data.to_vec();
        sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let n = sorted.len();
        (1..=num_quantiles)
            .map(|k| {
                let p = k as f64 / (num_quantiles as f64 + 1.0);
                let float_idx = (n as f64 - 1.0) * p;
                let lower_idx = float_idx.floor() as usize;
                let upper_idx = float_idx.ceil() as usize;

                if lower_idx == upper_idx {
                    sorted[lower_idx]
                } else {
                    let fraction = float_idx - lower_idx as f64;
                    sorted[lower_idx] * (1.0 - fraction) + sorted[upper_idx] * fraction
                }
            })
            .collect()
    }

    /// Evaluates the natural cubic basis at every point of `x`.
    ///
    /// With knots `k_0 < ... < k_{m-1}` the columns are `1`, `x`, and
    /// `d_j(x) - d_{m-2}(x)` for `j = 0..m-2`, where
    /// `d_j(x) = ((x - k_j)^3_+ - (x - k_{m-1})^3_+) / (k_{m-1} - k_j)`.
    /// The second derivative vanishes beyond the boundary knots, so the
    /// smoother is linear in the tails.
    pub(super) fn natural_basis(x: ArrayView1<f64>, knots: &Array1<f64>) -> Array2<f64> {
        let m = knots.len();
        let boundary = knots[m - 1];
        let penultimate = knots[m - 2];
        let mut basis = Array2::zeros((x.len(), m));

        for (row, &xi) in x.iter().enumerate() {
            basis[[row, 0]] = 1.0;
            basis[[row, 1]] = xi;
            if m > 2 {
                let d_last = d_term(xi, penultimate, boundary);
                for j in 0..(m - 2) {
                    basis[[row, j + 2]] = d_term(xi, knots[j], boundary) - d_last;
                }
            }
        }
        basis
    }

    fn d_term(x: f64, knot: f64, boundary: f64) -> f64 {
        (cube_plus(x - knot) - cube_plus(x - boundary)) / (boundary - knot)
    }

    fn cube_plus(v: f64) -> f64 {
        if v > 0.0 {
            v * v * v
        } else {
            0.0
        }
    }

    pub(super) fn count_strictly_increasing(knots: &Array1<f64>) -> usize {
        let mut count = 1;
        for pair in knots
            .as_slice()
            .expect("knot vector is contiguous")
            .windows(2)
        {
            if pair[1] > pair[0] {
                count += 1;
            }
        }
        count
    }

    /// Numerical rank of an upper-triangular factor, judged against the
    /// largest diagonal magnitude with the same relative tolerance R's `qr`
    /// applies.
    pub(super) fn triangular_rank(r: &Array2<f64>) -> usize {
        let diag = r.diag();
        let max_abs = diag.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        if max_abs == 0.0 {
            return 0;
        }
        let tolerance = max_abs * 1e-7;
        diag.iter().filter(|v| v.abs() > tolerance).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};

    #[test]
    fn quantile_knots_use_type7_interpolation() {
        let data = array![0., 1., 2., 5., 8., 9., 10.];
        let knots = internal::quantiles(data.view(), 3);
        // p = 1/4 -> idx 1.5 -> (1 + 2) / 2; p = 1/2 -> idx 3 -> 5;
        // p = 3/4 -> idx 4.5 -> (8 + 9) / 2.
        assert_eq!(knots, vec![1.5, 5.0, 8.5]);
    }

    #[test]
    fn knot_vector_brackets_interior_quantiles() {
        let data = Array::linspace(0.0, 10.0, 101);
        let knots = internal::knot_vector(data.view(), (0.0, 10.0), 4);
        assert_eq!(knots.len(), 4);
        assert_eq!(knots[0], 0.0);
        assert_eq!(knots[3], 10.0);
        assert!(knots[0] < knots[1] && knots[1] < knots[2] && knots[2] < knots[3]);
    }

    #[test]
    fn df_two_basis_is_intercept_and_slope() {
        let x = array![0.0, 0.5, 2.0];
        let knots = array![0.0, 2.0];
        let basis = internal::natural_basis(x.view(), &knots);
        assert_eq!(basis.shape(), &[3, 2]);
        assert_eq!(basis.column(0).to_vec(), vec![1.0, 1.0, 1.0]);
        assert_eq!(basis.column(1).to_vec(), vec![0.0, 0.5, 2.0]);
    }

    #[test]
    fn basis_is_linear_beyond_boundary_knots() {
        // Second differences of the cubic columns must vanish in the tails.
        let knots = array![1.0, 2.0, 3.0, 4.0];
        let left = array![-3.0, -2.0, -1.0];
        let basis = internal::natural_basis(left.view(), &knots);
        for j in 2..4 {
            let col = basis.column(j);
            let second_diff = (col[2] - col[1]) - (col[1] - col[0]);
            assert!(
                second_diff.abs() < 1e-12,
                "left tail not linear in column {j}: {second_diff}"
            );
        }
        let right = array![5.0, 6.0, 7.0];
        let basis = internal::natural_basis(right.view(), &knots);
        for j in 2..4 {
            let col = basis.column(j);
            let second_diff = (col[2] - col[1]) - (col[1] - col[0]);
            assert!(
                second_diff.abs() < 1e-9,
                "right tail not linear in column {j}: {second_diff}"
            );
        }
    }

    #[test]
    fn straight_line_is_reproduced_exactly() {
        let times = Array::linspace(0.0, 10.0, 30);
        let y = times.mapv(|t| 2.0 * t + 1.0);
        let fit = NaturalSplineFit::fit(times.view(), 4, 40).unwrap();
        let smoothed = fit.smooth(y.view());
        for (&g, &s) in fit.grid().iter().zip(smoothed.iter()) {
            let expected = 2.0 * g + 1.0;
            assert!(
                (s - expected).abs() < 1e-8,
                "smoother bent a straight line at {g}: {s} vs {expected}"
            );
        }
    }

    #[test]
    fn grid_spans_observed_range() {
        let times = array![3.0, 1.0, 7.0, 5.0];
        let fit = NaturalSplineFit::fit(times.view(), 2, 11).unwrap();
        assert_eq!(fit.grid().len(), 11);
        assert_eq!(fit.grid()[0], 1.0);
        assert_eq!(fit.grid()[10], 7.0);
    }

    #[test]
    fn leverage_is_positive_everywhere() {
        let times = Array::linspace(0.0, 5.0, 25);
        let fit = NaturalSplineFit::fit(times.view(), 4, 20).unwrap();
        assert!(fit.leverage().iter().all(|&l| l > 0.0));
    }

    #[test]
    fn too_few_observations_is_singular() {
        let times = array![1.0, 2.0, 3.0];
        match NaturalSplineFit::fit(times.view(), 5, 10).unwrap_err() {
            SplineError::Singular { rank, df } => {
                assert_eq!(rank, 3);
                assert_eq!(df, 5);
            }
            other => panic!("expected Singular, got {other:?}"),
        }
    }

    #[test]
    fn tied_observations_are_singular() {
        // Twelve observations, but only two distinct values: the design has
        // two distinct rows and cannot support four basis functions.
        let times = array![1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0];
        assert!(matches!(
            NaturalSplineFit::fit(times.view(), 4, 10),
            Err(SplineError::Singular { .. })
        ));
    }

    #[test]
    fn error_conditions() {
        let times = array![1.0, 2.0, 3.0];
        assert!(matches!(
            NaturalSplineFit::fit(times.view(), 1, 10),
            Err(SplineError::InvalidDegreesOfFreedom(1))
        ));
        assert!(matches!(
            NaturalSplineFit::fit(times.view(), 2, 1),
            Err(SplineError::InvalidGridSize(1))
        ));
        assert!(matches!(
            NaturalSplineFit::fit(array![].view(), 2, 10),
            Err(SplineError::EmptyData)
        ));
        assert!(matches!(
            NaturalSplineFit::fit(array![4.0, 4.0, 4.0].view(), 2, 10),
            Err(SplineError::DegenerateRange(v)) if v == 4.0
        ));
    }
}
