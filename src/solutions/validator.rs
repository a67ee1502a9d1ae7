use log::warn;
use nalgebra::{DMatrix, DVector};

use crate::rtk::double_diff::DdPair;

/// Post-fit residual screening: each residual is compared to its
/// modelled sigma. Failures are reported but the epoch survives,
/// the quality demotion is decided by the caller (valid satellite
/// count).
pub(crate) fn validate_residuals(
    v: &DVector<f64>,
    r: &DMatrix<f64>,
    pairs: &[DdPair],
    threshold: f64,
) -> bool {
    let fact = threshold * threshold;

    for (k, pair) in pairs.iter().enumerate() {
        if v[k] * v[k] <= fact * r[(k, k)] {
            continue;
        }

        match pair.sats {
            Some((reference, other)) => warn!(
                "large post-fit residual ({}-{} {} v={:.3} sig={:.3})",
                reference,
                other,
                if pair.phase { "L1" } else { "C1" },
                v[k],
                r[(k, k)].max(0.0).sqrt(),
            ),
            None => warn!(
                "large baseline constraint residual (v={:.3} sig={:.3})",
                v[k],
                r[(k, k)].max(0.0).sqrt(),
            ),
        }
    }

    true
}
