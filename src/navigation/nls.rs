use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::{error::Error, navigation::FilterState};

/// Huber influence threshold, in sigmas
const HUBER_K: f64 = 1.0;

/// Convergence criterion on the correction norm
const DX_TOLERANCE: f64 = 1.0E-4;

/// Nonlinear least squares epoch solver: Gauss-Newton over the active
/// components, robustified by Huber weights, with the predicted state
/// and covariance acting as prior. Inactive components are held as
/// constants. The builder closure re-evaluates the double differenced
/// problem (v, H, R) at each proposed (full layout) state.
pub(crate) fn nls_update<F>(
    state: &mut FilterState,
    max_iter: usize,
    build: F,
) -> Result<(), Error>
where
    F: Fn(&DVector<f64>) -> Option<(DVector<f64>, DMatrix<f64>, DMatrix<f64>)>,
{
    let ix = state.active_indices();
    let n = ix.len();

    if n == 0 {
        return Ok(());
    }

    let mut x_ = DVector::<f64>::zeros(n);
    let mut p_ = DMatrix::<f64>::zeros(n, n);

    for (i, gi) in ix.iter().enumerate() {
        x_[i] = state.x[*gi];
        for (j, gj) in ix.iter().enumerate() {
            p_[(i, j)] = state.p[(*gi, *gj)];
        }
    }

    let prior = x_.clone();
    let p_inv = p_.clone().try_inverse().ok_or(Error::NotPositiveDefinite)?;

    let mut full = state.x.clone();
    let mut information = None;

    for iter in 0..max_iter.max(2) {
        for (i, gi) in ix.iter().enumerate() {
            full[*gi] = x_[i];
        }

        let (v, h, r) = build(&full).ok_or(Error::MeasurementModel)?;
        let nv = v.nrows();

        let mut h_ = DMatrix::<f64>::zeros(nv, n);
        for (i, gi) in ix.iter().enumerate() {
            for row in 0..nv {
                h_[(row, i)] = h[(row, *gi)];
            }
        }

        // R⁻¹ preconditioning, de-weighting residual outliers (Huber)
        let r_inv = r.try_inverse().ok_or(Error::SingularMeasurementCovariance)?;

        let mut sqrt_w = DMatrix::<f64>::identity(nv, nv);
        for k in 0..nv {
            let sigma = (1.0 / r_inv[(k, k)]).abs().sqrt();
            let u = (v[k] / sigma).abs();
            if u > HUBER_K {
                sqrt_w[(k, k)] = (HUBER_K / u).sqrt();
            }
        }

        let w = &sqrt_w * r_inv * &sqrt_w;

        let a = h_.transpose() * &w * &h_ + &p_inv;
        let b = h_.transpose() * &w * &v + &p_inv * (&prior - &x_);

        let a_inv = a.try_inverse().ok_or(Error::MatrixInversion)?;
        let dx = &a_inv * b;

        x_ += &dx;
        information = Some(a_inv);

        if dx.norm() < DX_TOLERANCE {
            debug!("nls converged (iter={})", iter + 1);
            break;
        }
    }

    let p_new = information.ok_or(Error::MeasurementModel)?;

    for i in 0..n {
        if p_new[(i, i)] <= 0.0 {
            return Err(Error::NotPositiveDefinite);
        }
    }

    for (i, gi) in ix.iter().enumerate() {
        state.x[*gi] = x_[i];
        for (j, gj) in ix.iter().enumerate() {
            state.p[(*gi, *gj)] = 0.5 * (p_new[(i, j)] + p_new[(j, i)]);
        }
    }

    Ok(())
}
