use std::f64::consts::PI;

use crate::{
    constants::{ERR_BRDC_IONO, L1_WAVELENGTH_M, SPEED_OF_LIGHT_M_S},
    geometry::GeodeticPos,
    prelude::{Epoch, TimeScale},
};

/// Klobuchar Model, from the broadcast parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KbModel {
    /// alpha coefficients (s, s/semi-circle, s/sc², s/sc³)
    pub alpha: (f64, f64, f64, f64),
    /// beta coefficients (s, s/semi-circle, s/sc², s/sc³)
    pub beta: (f64, f64, f64, f64),
}

impl Default for KbModel {
    /// Conservative parameter set, to fall back on when the
    /// navigation message has not been decoded yet
    fn default() -> Self {
        Self {
            alpha: (0.1118E-7, -0.7451E-8, -0.5961E-7, 0.1192E-6),
            beta: (0.1167E6, -0.2294E6, -0.1311E6, 0.1049E7),
        }
    }
}

impl KbModel {
    /// L1 ionosphere group delay (meters) along the line of sight,
    /// at the given geodetic position and (azimuth, elevation) [rad].
    pub fn meters_delay(&self, t: Epoch, pos: GeodeticPos, azel: (f64, f64)) -> f64 {
        let (lat, lon, _) = pos;
        let (az, el) = azel;

        // earth centred angle to the pierce point (semi-circles)
        let psi = 0.0137 / (el / PI + 0.11) - 0.022;

        let mut phi_i = lat / PI + psi * az.cos();
        phi_i = phi_i.clamp(-0.416, 0.416);

        let lambda_i = lon / PI + psi * az.sin() / (phi_i * PI).cos();
        let phi_m = phi_i + 0.064 * ((lambda_i - 1.617) * PI).cos();

        let t_gps = t.to_duration_in_time_scale(TimeScale::GPST).to_seconds();
        let mut t_s = 43.2E3 * lambda_i + t_gps;
        t_s -= (t_s / 86400.0).floor() * 86400.0;

        let mut amp = self.alpha.0
            + phi_m * (self.alpha.1 + phi_m * (self.alpha.2 + phi_m * self.alpha.3));
        let mut per =
            self.beta.0 + phi_m * (self.beta.1 + phi_m * (self.beta.2 + phi_m * self.beta.3));

        if amp < 0.0 {
            amp = 0.0;
        }
        if per < 72.0E3 {
            per = 72.0E3;
        }

        let x = 2.0 * PI * (t_s - 50400.0) / per;

        // single layer slant factor
        let f = 1.0 + 16.0 * (0.53 - el / PI).powi(3);

        let delay_s = if x.abs() < 1.57 {
            f * (5.0E-9 + amp * (1.0 - x * x / 2.0 + x.powi(4) / 24.0))
        } else {
            f * 5.0E-9
        };

        SPEED_OF_LIGHT_M_S * delay_s
    }

    /// Variance (m²) associated to the broadcast model
    pub fn variance(delay_m: f64) -> f64 {
        (delay_m * ERR_BRDC_IONO).powi(2)
    }
}

/// Single layer ionosphere mapping function: ratio of slant to
/// vertical delay at the given elevation [rad]
pub(crate) fn ionosphere_mapping(pos: GeodeticPos, el: f64) -> f64 {
    const R_EARTH_M: f64 = 6378137.0;
    const ION_HEIGHT_M: f64 = 350.0E3;

    let (_, _, h) = pos;
    if h >= ION_HEIGHT_M {
        return 1.0;
    }

    let sin_z = (PI / 2.0 - el).sin();
    1.0 / (1.0 - (R_EARTH_M / (R_EARTH_M + ION_HEIGHT_M) * sin_z).powi(2)).sqrt()
}

/// Frequency scaling of an L1 referenced vertical delay:
/// group delay grows with the squared wavelength ratio
pub(crate) fn frequency_factor(wavelength_m: f64) -> f64 {
    (wavelength_m / L1_WAVELENGTH_M).powi(2)
}
