//! The penalised B-spline mixture that represents the (unscaled) PSD.
//!
//! A coefficient vector `V` of length `k - 1` maps onto `k` mixture weights on
//! the simplex; the last weight has no free parameter and absorbs the residual
//! mass. The PSD on the basis grid is the weighted sum of the basis densities.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Zip};
use thiserror::Error;

/// Lower bound applied to every PSD value so that logarithms stay finite.
pub const PSD_FLOOR: f64 = 1e-20;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Dimension mismatch for {what}: expected {expected}, found {found}.")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("A spline mixture needs at least 2 basis functions, but {0} were supplied.")]
    TooFewBasisFunctions(usize),

    #[error("Basis matrix entry ({row}, {col}) is {value}; basis densities must be finite and nonnegative.")]
    InvalidBasisValue { row: usize, col: usize, value: f64 },
}

/// Converts a coefficient vector into mixture weights on the `k`-simplex.
///
/// `w_i = exp(V_i) / (1 + Σ exp(V))` for `i < k - 1`, and the last weight is
/// `max(0, 1 - Σ w_i)`. If any `exp(V_i)` overflows the same normaliser is
/// evaluated in log space against an implicit zero.
pub fn mixture_weights(v: ArrayView1<f64>) -> Array1<f64> {
    let k = v.len() + 1;
    let exp_v = v.mapv(f64::exp);

    let mut weights = Array1::zeros(k);
    if exp_v.iter().any(|e| e.is_infinite()) {
        let shift = v.iter().copied().fold(0.0_f64, f64::max);
        let log_normalizer =
            shift + ((-shift).exp() + v.iter().map(|&x| (x - shift).exp()).sum::<f64>()).ln();
        Zip::from(weights.slice_mut(ndarray::s![..k - 1]))
            .and(&v)
            .for_each(|w, &x| *w = (x - log_normalizer).exp());
    } else {
        let normalizer = 1.0 + exp_v.sum();
        Zip::from(weights.slice_mut(ndarray::s![..k - 1]))
            .and(&exp_v)
            .for_each(|w, &e| *w = e / normalizer);
    }

    let residual = 1.0 - weights.slice(ndarray::s![..k - 1]).sum();
    weights[k - 1] = if residual < 0.0 { 0.0 } else { residual };
    weights
}

/// Resamples `psd` onto a uniform grid of `new_len` points spanning `[0, 1]`.
///
/// Each output point takes the value of the first source grid point at or after
/// it, i.e. source index `ceil(i · (m - 1) / (new_len - 1))`. This is a
/// piecewise-constant enlargement or shrinkage: resampling to the same length is
/// the identity, and an odd series length `n` with `m = (n + 1) / 2` repeats
/// every interior value exactly twice.
pub fn resample(psd: ArrayView1<f64>, new_len: usize) -> Array1<f64> {
    let m = psd.len();
    if m == 0 || new_len == 0 {
        return Array1::zeros(new_len);
    }
    if new_len == 1 || m == 1 {
        return Array1::from_elem(new_len, psd[0]);
    }

    let (num, den) = (m - 1, new_len - 1);
    Array1::from_iter((0..new_len).map(|i| psd[(i * num).div_ceil(den)]))
}

/// A mixture of basis densities with a smoothness penalty on its coefficients.
#[derive(Debug, Clone)]
pub struct SplineMixtureModel {
    /// Basis densities, shape `[k, m]`.
    basis: Array2<f64>,
    /// Penalty on the `k - 1` free coefficients.
    penalty: Array2<f64>,
}

impl SplineMixtureModel {
    pub fn new(basis: Array2<f64>, penalty: Array2<f64>) -> Result<Self, ModelError> {
        let k = basis.nrows();
        if k < 2 {
            return Err(ModelError::TooFewBasisFunctions(k));
        }
        if let Some(((row, col), &value)) = basis
            .indexed_iter()
            .find(|(_, v)| !(v.is_finite() && **v >= 0.0))
        {
            return Err(ModelError::InvalidBasisValue { row, col, value });
        }
        if penalty.nrows() != k - 1 {
            return Err(ModelError::DimensionMismatch {
                what: "penalty matrix rows",
                expected: k - 1,
                found: penalty.nrows(),
            });
        }
        if penalty.ncols() != k - 1 {
            return Err(ModelError::DimensionMismatch {
                what: "penalty matrix columns",
                expected: k - 1,
                found: penalty.ncols(),
            });
        }
        Ok(Self { basis, penalty })
    }

    /// Number of basis functions `k`.
    pub fn n_basis(&self) -> usize {
        self.basis.nrows()
    }

    /// Length `k - 1` of the coefficient vector.
    pub fn n_coefficients(&self) -> usize {
        self.basis.nrows() - 1
    }

    /// Number of grid points `m` the basis is evaluated on.
    pub fn grid_len(&self) -> usize {
        self.basis.ncols()
    }

    pub fn basis(&self) -> ArrayView2<'_, f64> {
        self.basis.view()
    }

    pub fn penalty(&self) -> ArrayView2<'_, f64> {
        self.penalty.view()
    }

    fn check_coefficients(&self, v: ArrayView1<f64>) -> Result<(), ModelError> {
        if v.len() != self.n_coefficients() {
            return Err(ModelError::DimensionMismatch {
                what: "coefficient vector",
                expected: self.n_coefficients(),
                found: v.len(),
            });
        }
        Ok(())
    }

    /// Unscaled PSD on the basis grid, floored at [`PSD_FLOOR`].
    ///
    /// A NaN produced by a pathological `V` is passed through unfloored so that
    /// the likelihood reports it instead of silently evaluating the floor.
    pub fn evaluate(&self, v: ArrayView1<f64>) -> Result<Array1<f64>, ModelError> {
        self.check_coefficients(v)?;
        let weights = mixture_weights(v);
        let mut psd = weights.dot(&self.basis);
        psd.mapv_inplace(|p| if p.is_nan() || p >= PSD_FLOOR { p } else { PSD_FLOOR });
        Ok(psd)
    }

    /// Unscaled PSD resampled to `n` points, e.g. the periodogram length.
    pub fn evaluate_at(&self, v: ArrayView1<f64>, n: usize) -> Result<Array1<f64>, ModelError> {
        let psd = self.evaluate(v)?;
        if psd.len() == n {
            return Ok(psd);
        }
        let resampled = resample(psd.view(), n);
        debug_assert!(
            resampled.iter().all(|&p| p >= 0.0 || p.is_nan()),
            "resampled PSD must stay nonnegative"
        );
        Ok(resampled)
    }
}
