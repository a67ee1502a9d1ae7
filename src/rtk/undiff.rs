use log::debug;
use nalgebra::Vector3;

use crate::{
    bias::{iono, tropo, KbModel},
    cfg::{Config, IonoOption},
    constants::SPEED_OF_LIGHT_M_S,
    geometry,
    observation::{Observation, SatelliteState},
    prelude::Epoch,
    track::SatelliteTrack,
};

/// Undifferenced phase and code residuals of one receiver:
/// observable minus modelled range (geometry, satellite clock,
/// hydrostatic troposphere, broadcast ionosphere, antenna and windup
/// corrections). Satellites failing any validity criteria keep null
/// residuals and are filtered downstream.
///
/// ## Input
/// - base: modelling the reference site
/// - t: sampling instant
/// - observations/states: one station block, with ephemeris results
/// - rcv_ecef_m: assumed receiver position
/// - kb_model: broadcast ionosphere parameters
/// - tracks: per satellite bookkeeping (windup accumulators)
///
/// ## Output
/// - y: (phase, code) residual pairs (m)
/// - e: receiver to satellite unit vectors
/// - azel: azimuth and elevation angles (rad)
/// - returns false when the receiver position is unknown
#[allow(clippy::too_many_arguments)]
pub(crate) fn undifferenced_residuals(
    base: bool,
    t: Epoch,
    observations: &[Observation],
    states: &[SatelliteState],
    rcv_ecef_m: Vector3<f64>,
    kb_model: Option<KbModel>,
    cfg: &Config,
    tracks: &[SatelliteTrack],
    slots: &[Option<usize>],
    y: &mut [(f64, f64)],
    e: &mut [Vector3<f64>],
    azel: &mut [(f64, f64)],
) -> bool {
    let n = observations.len();

    for i in 0..n {
        y[i] = (0.0, 0.0);
        e[i] = Vector3::zeros();
        azel[i] = (0.0, 0.0);
    }

    if rcv_ecef_m.norm() <= 0.0 {
        return false;
    }

    let pos = geometry::geodetic(rcv_ecef_m);
    let (zhd, _) = tropo::zenith_delays(pos, 0.0);

    for i in 0..n {
        let obs = &observations[i];
        let sat = &states[i];

        // unknown wavelength: the satellite keeps null residuals
        if obs.phase_cycles != 0.0 && sat.wavelength_m <= 0.0 {
            continue;
        }

        // geometry and angles
        let (mut r, los) = match geometry::geometric_range(sat.position_ecef_m, rcv_ecef_m) {
            Some(found) => found,
            None => continue,
        };

        e[i] = los;
        azel[i] = geometry::azimuth_elevation(pos, los);

        let (_, el) = azel[i];
        if el < cfg.elmin_rad() {
            continue;
        }

        if !sat.healthy {
            continue;
        }

        if !cfg.snr_mask.accepts(base, el, obs.snr_dbhz()) {
            continue;
        }

        // satellite clock bias
        r -= SPEED_OF_LIGHT_M_S * sat.clock_bias_s;

        // hydrostatic troposphere
        let (m_h, _) = tropo::niell_mapping(t, pos, el);
        r += m_h * zhd;

        // broadcast ionosphere (L1 referenced, frequency scaled)
        let dion = match (cfg.iono, kb_model) {
            (IonoOption::Off, _) | (_, None) => 0.0,
            (_, Some(kb)) => {
                kb.meters_delay(t, pos, azel[i]) * iono::frequency_factor(sat.wavelength_m)
            },
        };

        let dant = sat.antenna_delta_m;

        let windup_cycles = slots[i]
            .map(|slot| tracks[slot].windup_cycles(obs.station))
            .unwrap_or(0.0);

        // residuals: carrier advanced, code delayed by the ionosphere
        if obs.phase_cycles != 0.0 {
            y[i].0 = (obs.phase_cycles - windup_cycles) * sat.wavelength_m - r - dant + dion;
        }
        if obs.pseudo_range_m != 0.0 {
            y[i].1 = obs.pseudo_range_m - r - dant - dion;
        }
    }

    debug!(
        "{} - undifferenced residuals ({}, n={})",
        t,
        if base { "base" } else { "rover" },
        n
    );

    true
}

/// Common satellite selection: strictly increasing satellite slots
/// observed by both sites, with sufficient elevation at the reference
/// site. Both station blocks must be sorted by slot.
///
/// Returns (slot, rover index, base index) triplets.
pub(crate) fn select_common(
    slots: &[Option<usize>],
    azel: &[(f64, f64)],
    nu: usize,
    elmin_rad: f64,
) -> Vec<(usize, usize, usize)> {
    let n = slots.len();
    let mut selected = Vec::<(usize, usize, usize)>::new();

    let mut i = 0_usize;
    let mut j = nu;

    while i < nu && j < n {
        let (si, sj) = match (slots[i], slots[j]) {
            (Some(si), Some(sj)) => (si, sj),
            (None, _) => {
                i += 1;
                continue;
            },
            (_, None) => {
                j += 1;
                continue;
            },
        };

        if si < sj {
            i += 1;
        } else if si > sj {
            j += 1;
        } else {
            // elevation at the reference site
            if azel[j].1 >= elmin_rad {
                selected.push((si, i, j));
            }
            i += 1;
            j += 1;
        }
    }

    selected
}
