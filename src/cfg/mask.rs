#[cfg(feature = "serde")]
use serde::Deserialize;

/// SNR masking, expressed as one minimal C/N0 (dB.Hz) per 10° of
/// elevation, from el=5° up to el=85°. Disabled by default.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct SnrMask {
    /// Apply the mask to rover observations
    #[cfg_attr(feature = "serde", serde(default))]
    pub rover: bool,

    /// Apply the mask to reference site observations
    #[cfg_attr(feature = "serde", serde(default))]
    pub base: bool,

    /// Minimal C/N0 (dB.Hz) per elevation bin
    #[cfg_attr(feature = "serde", serde(default))]
    pub mask_dbhz: [f64; 9],
}

impl SnrMask {
    /// Uniform mask, any elevation
    pub fn uniform(min_dbhz: f64) -> Self {
        Self {
            rover: true,
            base: true,
            mask_dbhz: [min_dbhz; 9],
        }
    }

    /// Test one observation against the mask, interpolating between
    /// elevation bins. Returns true when the signal is to be kept.
    pub(crate) fn accepts(&self, base: bool, el_rad: f64, snr_dbhz: f64) -> bool {
        if (base && !self.base) || (!base && !self.rover) {
            return true;
        }

        let el_deg = el_rad.to_degrees();
        let i = ((el_deg - 5.0) / 10.0).floor() as isize;

        let min = if i < 0 {
            self.mask_dbhz[0]
        } else if i >= 8 {
            self.mask_dbhz[8]
        } else {
            let (i, d) = (i as usize, (el_deg - 5.0) / 10.0 - i as f64);
            self.mask_dbhz[i] * (1.0 - d) + self.mask_dbhz[i + 1] * d
        };

        snr_dbhz >= min
    }
}
