use nalgebra::{DMatrix, DVector};

use crate::{error::Error, navigation::FilterState};

const ALPHA: f64 = 1.0E-3;
const BETA: f64 = 2.0;
const KAPPA: f64 = 0.0;

/// Unscented measurement update, over the active components only.
/// Sigma points are drawn from the active covariance block and
/// propagated through the measurement closure, which rebuilds the
/// double differenced residuals at the proposed (full layout) state.
pub(crate) fn ukf_update<F>(
    state: &mut FilterState,
    r: &DMatrix<f64>,
    measure: F,
) -> Result<(), Error>
where
    F: Fn(&DVector<f64>) -> Option<DVector<f64>>,
{
    let nv = r.nrows();
    let ix = state.active_indices();
    let n = ix.len();

    if n == 0 || nv == 0 {
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

    let lambda = ALPHA * ALPHA * (n as f64 + KAPPA) - n as f64;
    let scale = n as f64 + lambda;

    let sqrt_p = (p_.clone() * scale)
        .cholesky()
        .ok_or(Error::NotPositiveDefinite)?
        .l();

    // 2n+1 sigma points, in the active sub space
    let mut sigmas = Vec::<DVector<f64>>::with_capacity(2 * n + 1);
    sigmas.push(x_.clone());

    for i in 0..n {
        let col = sqrt_p.column(i).clone_owned();
        sigmas.push(&x_ + &col);
        sigmas.push(&x_ - &col);
    }

    let w_m0 = lambda / scale;
    let w_c0 = w_m0 + 1.0 - ALPHA * ALPHA + BETA;
    let w_i = 0.5 / scale;

    // propagate through the residual model
    let mut full = state.x.clone();
    let mut propagated = Vec::<DVector<f64>>::with_capacity(sigmas.len());

    for sigma in sigmas.iter() {
        for (i, gi) in ix.iter().enumerate() {
            full[*gi] = sigma[i];
        }

        let v_s = measure(&full).ok_or(Error::MeasurementModel)?;

        if v_s.nrows() != nv {
            return Err(Error::MeasurementModel);
        }

        propagated.push(v_s);
    }

    // merged innovation
    let mut v_mean = propagated[0].clone() * w_m0;
    for v_s in propagated.iter().skip(1) {
        v_mean += v_s * w_i;
    }

    let mut s = r.clone();
    let mut p_xv = DMatrix::<f64>::zeros(n, nv);

    for (k, v_s) in propagated.iter().enumerate() {
        let w = if k == 0 { w_c0 } else { w_i };
        let dv = v_s - &v_mean;
        let dx = &sigmas[k] - &x_;

        s += &dv * dv.transpose() * w;
        p_xv += dx * dv.transpose() * w;
    }

    let s_inv = s
        .clone()
        .try_inverse()
        .ok_or(Error::SingularMeasurementCovariance)?;

    let gain = p_xv * s_inv;

    x_ += &gain * v_mean;
    p_ -= &gain * s * gain.transpose();

    for i in 0..n {
        if p_[(i, i)] <= 0.0 {
            return Err(Error::NotPositiveDefinite);
        }
    }

    for (i, gi) in ix.iter().enumerate() {
        state.x[*gi] = x_[i];
        for (j, gj) in ix.iter().enumerate() {
            state.p[(*gi, *gj)] = 0.5 * (p_[(i, j)] + p_[(j, i)]);
        }
    }

    Ok(())
}
