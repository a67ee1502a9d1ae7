use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::{error::Error, navigation::FilterState};

/// Kalman measurement update over the active components only:
/// inactive components are projected out, updated in place, and the
/// covariance is restored symmetric (Joseph form).
///
/// ## Input
/// - state: [FilterState], updated on success
/// - h: design matrix (nv x nx, full layout)
/// - v: innovation vector (nv)
/// - r: measurement covariance (nv x nv)
/// - adaptive: fading memory update: the predicted covariance is
///   inflated by the innovation consistency ratio before the gain
///   is formed
pub(crate) fn filter_update(
    state: &mut FilterState,
    h: &DMatrix<f64>,
    v: &DVector<f64>,
    r: &DMatrix<f64>,
    adaptive: bool,
) -> Result<(), Error> {
    let nv = v.nrows();

    assert_eq!(h.nrows(), nv, "internal error: invalid H dimensions");
    assert_eq!(r.nrows(), nv, "internal error: invalid R dimensions");
    assert_eq!(r.ncols(), nv, "internal error: R is not squared");

    let ix = state.active_indices();
    let k = ix.len();

    if k == 0 || nv == 0 {
        return Ok(());
    }

    // projection on the active sub space
    let mut x_ = DVector::<f64>::zeros(k);
    let mut p_ = DMatrix::<f64>::zeros(k, k);
    let mut h_ = DMatrix::<f64>::zeros(nv, k);

    for (i, gi) in ix.iter().enumerate() {
        x_[i] = state.x[*gi];
        for (j, gj) in ix.iter().enumerate() {
            p_[(i, j)] = state.p[(*gi, *gj)];
        }
        for row in 0..nv {
            h_[(row, i)] = h[(row, *gi)];
        }
    }

    // innovation covariance
    let mut s = &h_ * &p_ * h_.transpose() + r;

    if adaptive {
        // forgetting factor: trace of the sampled innovation
        // covariance against the predicted one
        let lambda = (v.dot(v) / s.trace()).max(1.0);

        if lambda > 1.0 {
            debug!("adaptive update: lambda={:.3}", lambda);
            p_ *= lambda;
            s = &h_ * &p_ * h_.transpose() + r;
        }
    }

    let s_inv = s
        .try_inverse()
        .ok_or(Error::SingularMeasurementCovariance)?;

    let gain = &p_ * h_.transpose() * s_inv;

    x_ += &gain * v;

    // joseph stabilized covariance
    let i_kh = DMatrix::<f64>::identity(k, k) - &gain * &h_;
    p_ = &i_kh * &p_ * i_kh.transpose() + &gain * r * gain.transpose();

    for i in 0..k {
        if p_[(i, i)] <= 0.0 {
            return Err(Error::NotPositiveDefinite);
        }
    }

    // write back, enforcing symmetry
    for (i, gi) in ix.iter().enumerate() {
        state.x[*gi] = x_[i];
        for (j, gj) in ix.iter().enumerate() {
            state.p[(*gi, *gj)] = 0.5 * (p_[(i, j)] + p_[(j, i)]);
        }
    }

    Ok(())
}
