use log::{debug, warn};
use nalgebra::{Matrix3, SMatrix, Vector3};

use crate::{
    cfg::{AmbiguityMode, Config, IonoOption, PositioningMode, TropoOption},
    constants::{
        GAP_RESET_IONO, INIT_ZWD_M, MAXSAT, VAR_ACC, VAR_GRADIENT, VAR_POS, VAR_VEL,
    },
    geometry,
    navigation::FilterState,
    observation::{single_difference, Observation},
    track::SatelliteTrack,
};

/// One satellite observed by both sites this epoch
pub(crate) struct CommonSat<'a> {
    /// Session slot
    pub slot: usize,
    /// Rover side observation
    pub rover: &'a Observation,
    /// Reference site observation
    pub base: &'a Observation,
    /// Carrier wavelength (m)
    pub wavelength_m: f64,
}

/// Temporal update context for one epoch
pub(crate) struct TemporalUpdate<'a> {
    /// Signed time step since previous epoch (s)
    pub dt_s: f64,
    /// Single point seed of the rover position
    pub seed_position: Vector3<f64>,
    /// Single point seed of the rover velocity
    pub seed_velocity: Vector3<f64>,
    /// Reference site position
    pub base_position: Vector3<f64>,
    /// Satellites observed by both sites
    pub common: &'a [CommonSat<'a>],
}

/// Propagates the state vector and covariance by one time step:
/// position (per positioning mode), ionosphere, troposphere, then
/// carrier phase ambiguities (with their reset policies).
pub(crate) fn temporal_update(
    state: &mut FilterState,
    tracks: &mut [SatelliteTrack],
    cfg: &Config,
    ctx: &TemporalUpdate,
) {
    let tt = ctx.dt_s.abs();

    time_update_position(state, cfg, tt, ctx.seed_position, ctx.seed_velocity);

    if matches!(cfg.iono, IonoOption::Estimate) {
        let baseline_m = (state.position() - ctx.base_position).norm();
        time_update_iono(state, tracks, cfg, tt, baseline_m, ctx.common);
    }

    if cfg.tropo >= TropoOption::Estimate {
        time_update_tropo(state, cfg, tt);
    }

    if cfg.mode.estimates_ambiguities() {
        time_update_ambiguities(state, tracks, cfg, tt, ctx.dt_s >= 0.0, ctx.common);
    }
}

fn time_update_position(
    state: &mut FilterState,
    cfg: &Config,
    tt: f64,
    seed_pos: Vector3<f64>,
    seed_vel: Vector3<f64>,
) {
    // fixed mode: hold the surveyed coordinates
    if cfg.mode == PositioningMode::Fixed {
        if let Some((x, y, z)) = cfg.rover_position_ecef_m {
            for (i, value) in [x, y, z].into_iter().enumerate() {
                state.init_component(i, value, 1.0E-8);
            }
        }
        return;
    }

    // first epoch of the session
    if state.position().norm() <= 0.0 {
        for i in 0..3 {
            state.init_component(i, seed_pos[i], VAR_POS);
        }
        if state.np() == 9 {
            for i in 3..6 {
                state.init_component(i, seed_vel[i - 3], VAR_VEL);
            }
            for i in 6..9 {
                state.init_component(i, 1.0E-6, VAR_ACC);
            }
        }
    }

    if cfg.mode == PositioningMode::Static {
        return;
    }

    // kinematic without dynamics: restart from the single point seed
    if !cfg.dynamics {
        for i in 0..3 {
            state.init_component(i, seed_pos[i], VAR_POS);
        }
        return;
    }

    // variance blow up guard
    let var = (0..3).map(|i| state.p[(i, i)]).sum::<f64>() / 3.0;

    if var >= VAR_POS {
        warn!("position reset on variance blow up (var={:.3})", var);
        for i in 0..3 {
            state.init_component(i, seed_pos[i], VAR_POS);
        }
        for i in 3..6 {
            state.init_component(i, seed_vel[i - 3], VAR_VEL);
        }
        for i in 6..9 {
            state.init_component(i, 1.0E-6, VAR_ACC);
        }
        return;
    }

    // constant acceleration transition, identity elsewhere:
    // only the leading 9x9 block of P is affected
    let mut f9 = SMatrix::<f64, 9, 9>::identity();
    for i in 0..6 {
        f9[(i, i + 3)] = tt;
    }

    let x9 = f9 * state.x.rows(0, 9).clone_owned();
    state.x.rows_mut(0, 9).copy_from(&x9);

    let top = f9 * state.p.rows(0, 9).clone_owned();
    state.p.rows_mut(0, 9).copy_from(&top);

    let left = state.p.columns(0, 9).clone_owned() * f9.transpose();
    state.p.columns_mut(0, 9).copy_from(&left);

    // process noise enters through the acceleration only,
    // expressed in the local frame then rotated to ECEF
    let q_enu = Matrix3::from_diagonal(&Vector3::new(
        cfg.process_noise_std[3].powi(2) * tt,
        cfg.process_noise_std[3].powi(2) * tt,
        cfg.process_noise_std[4].powi(2) * tt,
    ));

    let pos = geometry::geodetic(state.position());
    let q_ecef = geometry::enu_covariance_to_ecef(pos, q_enu);

    for i in 0..3 {
        for j in 0..3 {
            state.p[(i + 6, j + 6)] += q_ecef[(i, j)];
        }
    }
}

fn time_update_iono(
    state: &mut FilterState,
    tracks: &[SatelliteTrack],
    cfg: &Config,
    tt: f64,
    baseline_m: f64,
    common: &[CommonSat],
) {
    // drop states not observed for a long time
    for slot in 0..MAXSAT {
        let i = state.iono_index(slot).unwrap();
        if state.x[i] != 0.0
            && tracks[slot].outage[0] > GAP_RESET_IONO
            && tracks[slot].outage[1] > GAP_RESET_IONO
        {
            state.x[i] = 0.0;
        }
    }

    for sat in common.iter() {
        let i = state.iono_index(sat.slot).unwrap();

        if state.x[i] == 0.0 {
            let var = (cfg.initial_std[1] * baseline_m / 1.0E4).powi(2);
            state.init_component(i, 1.0E-6, var);
        } else {
            // elevation weighted process noise
            let fact = tracks[sat.slot].azel.1.cos();
            state.p[(i, i)] += (cfg.process_noise_std[1] * baseline_m / 1.0E4 * fact).powi(2) * tt;
        }
    }
}

fn time_update_tropo(state: &mut FilterState, cfg: &Config, tt: f64) {
    for station in 0..2 {
        let j = state.tropo_index(station).unwrap();

        if state.x[j] == 0.0 {
            state.init_component(j, INIT_ZWD_M, cfg.initial_std[2].powi(2));

            if state.has_tropo_gradients() {
                for k in 1..3 {
                    state.init_component(j + k, 1.0E-6, VAR_GRADIENT);
                }
            }
        } else {
            state.p[(j, j)] += cfg.process_noise_std[2].powi(2) * tt;

            if state.has_tropo_gradients() {
                for k in 1..3 {
                    state.p[(j + k, j + k)] += (cfg.process_noise_std[2] * 0.3).powi(2) * tt;
                }
            }
        }
    }
}

fn time_update_ambiguities(
    state: &mut FilterState,
    tracks: &mut [SatelliteTrack],
    cfg: &Config,
    tt: f64,
    forward: bool,
    common: &[CommonSat],
) {
    let instantaneous = cfg.ambiguity == AmbiguityMode::Instantaneous;

    // cycle slip detection on both sites
    for sat in common.iter() {
        tracks[sat.slot].detect_slip_lli(sat.rover, forward);
        tracks[sat.slot].detect_slip_lli(sat.base, forward);
        tracks[sat.slot].update_half_valid(sat.rover, sat.base);
    }

    // reset on instantaneous mode or expired outage counter
    for slot in 0..MAXSAT {
        let i = state.amb_index(slot).unwrap();

        tracks[slot].outage[0] += 1;
        tracks[slot].outage[1] += 1;
        let reset = tracks[slot].outage[0] > cfg.max_outage;

        if instantaneous && state.x[i] != 0.0 {
            state.init_component(i, 0.0, 0.0);
        } else if reset && state.x[i] != 0.0 {
            debug!(
                "ambiguity outage expired (slot={} n={})",
                slot, tracks[slot].outage[0]
            );
            state.init_component(i, 0.0, 0.0);
        }

        if !instantaneous && reset {
            tracks[slot].lock = -cfg.min_lock;
        }
    }

    // process noise, then reset on detected cycle slip
    for sat in common.iter() {
        let i = state.amb_index(sat.slot).unwrap();
        state.p[(i, i)] += cfg.process_noise_std[0].powi(2) * tt;

        if instantaneous || tracks[sat.slot].slip & 1 == 0 {
            continue;
        }

        state.x[i] = 0.0;
        tracks[sat.slot].lock = -cfg.min_lock;
    }

    // approximate each ambiguity by single differenced phase - code
    let mut bias = vec![0.0_f64; common.len()];
    let mut offset = 0.0_f64;
    let mut nactive = 0_usize;

    for (k, sat) in common.iter().enumerate() {
        let cp = single_difference(sat.rover.phase_cycles, sat.base.phase_cycles);
        let pr = single_difference(sat.rover.pseudo_range_m, sat.base.pseudo_range_m);

        if cp == 0.0 || pr == 0.0 || sat.wavelength_m <= 0.0 {
            continue;
        }

        bias[k] = cp - pr / sat.wavelength_m;

        let i = state.amb_index(sat.slot).unwrap();
        if state.x[i] != 0.0 {
            offset += bias[k] - state.x[i];
            nactive += 1;
        }
    }

    // shift all active ambiguities to enforce phase/code coherency
    if nactive > 0 {
        for slot in 0..MAXSAT {
            let i = state.amb_index(slot).unwrap();
            if state.x[i] != 0.0 {
                state.x[i] += offset / nactive as f64;
            }
        }
    }

    // initialize new ambiguities
    for (k, sat) in common.iter().enumerate() {
        let i = state.amb_index(sat.slot).unwrap();

        if bias[k] == 0.0 || state.x[i] != 0.0 {
            continue;
        }

        state.init_component(i, bias[k], cfg.initial_std[0].powi(2));
    }
}
