use crate::config::SplineConfig;
use crate::fourier;
use ndarray::{Array, Array1, Array2, ArrayView1, Axis, s};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ridge added to the difference penalty so that it is full rank.
pub const PENALTY_RIDGE: f64 = 1e-6;

/// Floor applied to the initial mixture weights before taking logarithms.
const INITIAL_WEIGHT_FLOOR: f64 = 1e-50;

/// Defines the strategy for placing the internal knots of the spline on `[0, 1]`.
/// This is part of the public API and is read from the run configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KnotStrategy {
    /// Place knots uniformly across the frequency axis.
    Uniform,
    /// Place knots at equal-mass quantiles of the square-rooted periodogram,
    /// concentrating basis functions where the spectrum carries power.
    Periodogram,
}

/// A comprehensive error type for all operations within the basis module.
#[derive(Error, Debug)]
pub enum BasisError {
    #[error("Spline degree must be at least 1, but was {0}.")]
    InvalidDegree(usize),

    #[error("{num_basis} basis functions are too few for splines of degree {degree}.")]
    TooFewBasisFunctions { num_basis: usize, degree: usize },

    #[error("Penalty order ({order}) must be positive and less than the number of coefficients ({num_coeffs}).")]
    InvalidPenaltyOrder { order: usize, num_coeffs: usize },

    #[error("Periodogram knot placement requires a non-empty periodogram.")]
    EmptyPeriodogram,
}

/// A ready-to-use P-spline design on a frequency grid: normalised basis
/// densities, the penalty matrix for the free coefficients, and the knots
/// they were built from.
#[derive(Debug, Clone)]
pub struct PsplineBasis {
    pub knots: Array1<f64>,
    pub degree: usize,
    /// Basis densities, shape `[k, grid.len()]`.
    pub densities: Array2<f64>,
    /// Penalty on the `k - 1` free coefficients, shape `[k - 1, k - 1]`.
    pub penalty: Array2<f64>,
}

impl PsplineBasis {
    /// Builds the basis densities on `grid` and the matching penalty.
    ///
    /// `periodogram` is only consulted by [`KnotStrategy::Periodogram`].
    pub fn build(
        grid: ArrayView1<f64>,
        periodogram: ArrayView1<f64>,
        config: &SplineConfig,
    ) -> Result<Self, BasisError> {
        let knots = generate_knot_vector(
            config.k,
            config.degree,
            config.knot_strategy,
            periodogram,
        )?;
        let densities = create_density_basis(grid, knots.view(), config.degree)?;
        let penalty = create_difference_penalty_matrix(config.k - 1, config.diff_matrix_order)?;
        log::debug!(
            "Built {} basis densities of degree {} on {} grid points ({:?} knots).",
            config.k,
            config.degree,
            grid.len(),
            config.knot_strategy
        );
        Ok(Self {
            knots,
            degree: config.degree,
            densities,
            penalty,
        })
    }
}

/// Generates the full knot vector on `[0, 1]` yielding exactly `num_basis` B-splines.
///
/// There are `num_basis - degree - 1` internal knots and `degree + 1` repeated
/// knots at each boundary.
pub fn generate_knot_vector(
    num_basis: usize,
    degree: usize,
    strategy: KnotStrategy,
    periodogram: ArrayView1<f64>,
) -> Result<Array1<f64>, BasisError> {
    if degree < 1 {
        return Err(BasisError::InvalidDegree(degree));
    }
    if num_basis < degree + 1 {
        return Err(BasisError::TooFewBasisFunctions { num_basis, degree });
    }
    let num_internal_knots = num_basis - degree - 1;

    let internal_knots = match strategy {
        KnotStrategy::Uniform => internal::uniform_knots(num_internal_knots),
        KnotStrategy::Periodogram => {
            if periodogram.is_empty() {
                return Err(BasisError::EmptyPeriodogram);
            }
            internal::periodogram_knots(periodogram, num_internal_knots)
        }
    };

    let min_knots = Array1::from_elem(degree + 1, 0.0);
    let max_knots = Array1::from_elem(degree + 1, 1.0);
    Ok(ndarray::concatenate(
        Axis(0),
        &[min_knots.view(), internal_knots.view(), max_knots.view()],
    )
    .expect("knot pieces are all one-dimensional"))
}

/// Evaluates every B-spline at every grid point and normalises each one to a
/// probability density on `[0, 1]`.
///
/// # Returns
/// A `[num_basis, grid.len()]` matrix. Row `i` is `B_i(x) · (d + 1) / (t_{i+d+1} - t_i)`,
/// so each row integrates to one. A basis function with zero support stays zero.
pub fn create_density_basis(
    grid: ArrayView1<f64>,
    knots: ArrayView1<f64>,
    degree: usize,
) -> Result<Array2<f64>, BasisError> {
    if degree < 1 {
        return Err(BasisError::InvalidDegree(degree));
    }
    if knots.len() < 2 * (degree + 1) {
        return Err(BasisError::TooFewBasisFunctions {
            num_basis: knots.len().saturating_sub(degree + 1),
            degree,
        });
    }
    let num_basis = knots.len() - degree - 1;
    let mut densities = Array2::zeros((num_basis, grid.len()));

    for (j, &x) in grid.iter().enumerate() {
        let values = internal::evaluate_splines_at_point(x, degree, knots);
        densities.column_mut(j).assign(&values);
    }

    for (i, mut row) in densities.axis_iter_mut(Axis(0)).enumerate() {
        let support = knots[i + degree + 1] - knots[i];
        if support > 1e-12 {
            row *= (degree as f64 + 1.0) / support;
        } else {
            log::warn!("Basis function {i} has degenerate support; leaving it at zero.");
            row.fill(0.0);
        }
    }
    Ok(densities)
}

/// Creates the penalty matrix `P = D'D + ε·I` for `num_coeffs` free coefficients,
/// where `D` takes `order`-th differences. The ridge keeps `P` positive definite.
pub fn create_difference_penalty_matrix(
    num_coeffs: usize,
    order: usize,
) -> Result<Array2<f64>, BasisError> {
    if order == 0 || order >= num_coeffs {
        return Err(BasisError::InvalidPenaltyOrder { order, num_coeffs });
    }

    let mut d = Array2::<f64>::eye(num_coeffs);
    for _ in 0..order {
        d = &d.slice(s![1.., ..]) - &d.slice(s![..-1, ..]);
    }

    let mut p = d.t().dot(&d);
    p.diag_mut().mapv_inplace(|x| x + PENALTY_RIDGE);
    Ok(p)
}

/// Starting coefficient vector read off the periodogram.
///
/// Takes `k` equally spaced periodogram values as mixture weights and inverts
/// the weight transform, so that the initial mixture follows the data's shape.
pub fn initial_coefficients(periodogram: ArrayView1<f64>, k: usize) -> Array1<f64> {
    let total: f64 = periodogram.sum();
    if k < 2 || periodogram.is_empty() || !(total.is_finite() && total > 0.0) {
        log::warn!("Periodogram carries no usable power; starting from equal mixture weights.");
        return Array1::zeros(k.saturating_sub(1));
    }

    let last = (periodogram.len() - 1) as f64;
    let mut weights = Array::from_iter((0..k).map(|i| {
        let idx = (i as f64 * last / (k - 1) as f64).round() as usize;
        let w = periodogram[idx.min(periodogram.len() - 1)] / total;
        if w > 0.0 { w } else { INITIAL_WEIGHT_FLOOR }
    }));
    let norm = weights.sum();
    weights /= norm;

    let log_last = weights[k - 1].ln();
    weights.slice(s![..k - 1]).mapv(|w| w.ln() - log_last)
}

/// Convenience wrapper used by the pipeline: basis on the half-length frequency grid of an `n`-point series.
pub fn basis_for_series(
    periodogram: ArrayView1<f64>,
    config: &SplineConfig,
) -> Result<PsplineBasis, BasisError> {
    let grid = fourier::frequency_grid(periodogram.len());
    PsplineBasis::build(grid.view(), periodogram, config)
}

/// Internal module for implementation details not exposed in the public API.
mod internal {
    use super::*;

    pub(super) fn uniform_knots(num_internal_knots: usize) -> Array1<f64> {
        let h = 1.0 / (num_internal_knots as f64 + 1.0);
        Array::from_iter((1..=num_internal_knots).map(|i| i as f64 * h))
    }

    /// Places knots where the cumulative `√periodogram` mass crosses `i / (K + 1)`,
    /// interpolating linearly between the periodogram's grid points on `[0, 1]`.
    pub(super) fn periodogram_knots(
        periodogram: ArrayView1<f64>,
        num_internal_knots: usize,
    ) -> Array1<f64> {
        let n = periodogram.len();
        let mass = periodogram.mapv(|p| p.max(0.0).sqrt());
        let total = mass.sum();
        if n < 2 || !(total.is_finite() && total > 0.0) {
            return uniform_knots(num_internal_knots);
        }

        let mut cumulative = Vec::with_capacity(n);
        let mut running = 0.0;
        for &m in mass.iter() {
            running += m / total;
            cumulative.push(running);
        }

        let step = 1.0 / (n as f64 - 1.0);
        Array::from_iter((1..=num_internal_knots).map(|i| {
            let target = i as f64 / (num_internal_knots as f64 + 1.0);
            let hi = cumulative
                .iter()
                .position(|&c| c >= target)
                .unwrap_or(n - 1);
            if hi == 0 {
                return 0.0;
            }
            let (c_lo, c_hi) = (cumulative[hi - 1], cumulative[hi]);
            let fraction = if c_hi > c_lo {
                (target - c_lo) / (c_hi - c_lo)
            } else {
                0.0
            };
            ((hi - 1) as f64 + fraction) * step
        }))
    }

    /// Evaluates all B-spline basis functions at a single point `x` with the
    /// Cox-de Boor recurrence.
    pub(super) fn evaluate_splines_at_point(
        x: f64,
        degree: usize,
        knots: ArrayView1<f64>,
    ) -> Array1<f64> {
        let num_knots = knots.len();
        let num_basis = num_knots - degree - 1;

        // Find the knot interval `mu` that contains x, such that `knots[mu] <= x < knots[mu+1]`.
        let mu = match knots.iter().rposition(|&k| k <= x) {
            Some(pos) => pos.min(num_basis - 1).max(degree),
            None => degree,
        };

        let mut b = Array1::zeros(degree + 1);
        b[0] = 1.0;

        for d in 1..=degree {
            let b_old = b.clone();
            b.fill(0.0);

            for i in 0..=d {
                let j = mu + i - d;

                // Contribution of B_{j, d-1}
                if i > 0 {
                    let denom = knots[j + d] - knots[j];
                    if denom > 1e-12 {
                        b[i] += (x - knots[j]) / denom * b_old[i - 1];
                    }
                }

                // Contribution of B_{j+1, d-1}
                if i < d {
                    let denom = knots[j + d + 1] - knots[j + 1];
                    if denom > 1e-12 {
                        b[i] += (knots[j + d + 1] - x) / denom * b_old[i];
                    }
                }
            }
        }

        let mut basis_values = Array1::zeros(num_basis);
        let start_index = mu - degree;
        for i in 0..=degree {
            basis_values[start_index + i] = b[i];
        }
        basis_values
    }
}
