use itertools::Itertools;
use nalgebra::Vector3;

use crate::{
    constants::{NSAT_BDS, NSAT_GAL, NSAT_GLO, NSAT_GPS},
    prelude::{Constellation, SV},
};

/// Receiver that sampled an [Observation]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Station {
    /// The receiver being positioned
    Rover,
    /// The reference site
    Base,
}

/// One single-frequency signal sampling, from either site.
/// An epoch is an ordered sequence of [Observation]s: rover
/// first, reference site second, each sorted by satellite.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Observation {
    /// Satellite identity
    pub sv: SV,

    /// Sampling [Station]
    pub station: Station,

    /// Carrier phase (cycles), zero when not tracked
    pub phase_cycles: f64,

    /// Pseudo range (m), zero when not decoded
    pub pseudo_range_m: f64,

    /// C/N0 in 0.25 dB.Hz units
    pub snr: u16,

    /// Loss of lock indicator.
    /// Bit 0: lock lost since previous epoch.
    /// Bit 1: half cycle (parity) ambiguity.
    pub lli: u8,
}

impl Observation {
    /// C/N0 in dB.Hz
    pub fn snr_dbhz(&self) -> f64 {
        self.snr as f64 * 0.25
    }
}

/// Ephemeris evaluation at signal transmission, resolved upstream,
/// proposed along each [Observation].
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SatelliteState {
    /// Satellite identity
    pub sv: SV,

    /// Position at transmission, ECEF (m)
    pub position_ecef_m: Vector3<f64>,

    /// Velocity at transmission, ECEF (m/s)
    pub velocity_ecef_m_s: Vector3<f64>,

    /// Clock bias (s)
    pub clock_bias_s: f64,

    /// Clock drift (s/s)
    pub clock_drift_s_s: f64,

    /// Health flag, as decoded from the navigation message
    pub healthy: bool,

    /// Broadcast ephemeris variance (m²)
    pub brdc_var_m2: f64,

    /// Carrier wavelength of the sampled signal (m)
    pub wavelength_m: f64,

    /// Possible antenna phase center correction (m), projected on
    /// the line of sight, resolved upstream
    pub antenna_delta_m: f64,
}

/// Session wide satellite slot: GPS, Glonass, Galileo, BeiDou and SBAS
/// vehicles are packed consecutively in [0, MAXSAT[. Returns None for
/// constellations we do not track.
pub(crate) fn sat_index(sv: SV) -> Option<usize> {
    let prn = sv.prn as usize;

    match sv.constellation {
        Constellation::GPS if (1..=NSAT_GPS).contains(&prn) => Some(prn - 1),
        Constellation::Glonass if (1..=NSAT_GLO).contains(&prn) => Some(NSAT_GPS + prn - 1),
        Constellation::Galileo if (1..=NSAT_GAL).contains(&prn) => {
            Some(NSAT_GPS + NSAT_GLO + prn - 1)
        },
        Constellation::BeiDou if (1..=NSAT_BDS).contains(&prn) => {
            Some(NSAT_GPS + NSAT_GLO + NSAT_GAL + prn - 1)
        },
        c if c.is_sbas() && (120..=142).contains(&prn) => {
            Some(NSAT_GPS + NSAT_GLO + NSAT_GAL + NSAT_BDS + prn - 120)
        },
        _ => None,
    }
}

/// Constellation family, for reference satellite selection:
/// GPS, QZSS and SBAS vehicles share their clock reference.
/// 0: GPS/QZSS/SBAS, 1: Glonass, 2: Galileo, 3: BeiDou.
pub(crate) fn sys_family(c: Constellation) -> Option<usize> {
    match c {
        Constellation::GPS | Constellation::QZSS => Some(0),
        Constellation::Glonass => Some(1),
        Constellation::Galileo => Some(2),
        Constellation::BeiDou => Some(3),
        c if c.is_sbas() => Some(0),
        _ => None,
    }
}

pub(crate) const NUM_FAMILIES: usize = 4;

/// Single difference (rover minus base) of one observable.
/// Null whenever either side is missing.
pub(crate) fn single_difference(rover: f64, base: f64) -> f64 {
    if rover == 0.0 || base == 0.0 {
        0.0
    } else {
        rover - base
    }
}

/// Number of leading [Station::Rover] observations: epochs are
/// ordered rover first, reference site second.
pub(crate) fn rover_count(observations: &[Observation]) -> usize {
    observations
        .iter()
        .take_while(|obs| obs.station == Station::Rover)
        .count()
}

/// True when both station blocks are sorted by satellite slot,
/// which common satellite selection relies on.
pub(crate) fn is_sorted(observations: &[Observation]) -> bool {
    let nu = rover_count(observations);
    let sorted = |obs: &[Observation]| {
        obs.iter()
            .tuple_windows()
            .all(|(a, b)| sat_index(a.sv) < sat_index(b.sv))
    };
    sorted(&observations[..nu]) && sorted(&observations[nu..])
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::constants::MAXSAT;

    #[test]
    fn slot_packing() {
        let g01 = SV::new(Constellation::GPS, 1);
        let g32 = SV::new(Constellation::GPS, 32);
        let r01 = SV::new(Constellation::Glonass, 1);
        let c46 = SV::new(Constellation::BeiDou, 46);

        assert_eq!(sat_index(g01), Some(0));
        assert_eq!(sat_index(g32), Some(31));
        assert_eq!(sat_index(r01), Some(32));
        assert!(sat_index(c46).unwrap() < MAXSAT);

        // out of range PRN
        assert_eq!(sat_index(SV::new(Constellation::GPS, 33)), None);
    }

    #[test]
    fn family_mapping() {
        assert_eq!(sys_family(Constellation::GPS), Some(0));
        assert_eq!(sys_family(Constellation::QZSS), Some(0));
        assert_eq!(sys_family(Constellation::Glonass), Some(1));
        assert_eq!(sys_family(Constellation::Galileo), Some(2));
        assert_eq!(sys_family(Constellation::BeiDou), Some(3));
    }

    #[test]
    fn null_single_difference() {
        assert_eq!(single_difference(1.0, 0.0), 0.0);
        assert_eq!(single_difference(0.0, 2.0), 0.0);
        assert_eq!(single_difference(3.0, 2.0), 1.0);
    }
}
