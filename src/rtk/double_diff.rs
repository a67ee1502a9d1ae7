use log::{debug, warn};
use nalgebra::{DMatrix, DVector, Vector3};

use crate::{
    bias::{iono, tropo},
    cfg::{Config, IonoOption, PositioningMode, TropoOption},
    constants::{BASELINE_NONLINEARITY, SPEED_OF_LIGHT_M_S},
    geometry,
    navigation::FilterState,
    observation::NUM_FAMILIES,
    prelude::{Epoch, SV},
    track::SatelliteTrack,
};

/// One double differenced measurement
#[derive(Debug, Copy, Clone)]
pub(crate) struct DdPair {
    /// (reference, other) identities. None flags the moving base
    /// length pseudo measurement.
    pub sats: Option<(SV, SV)>,
    /// Phase channel (pseudo range otherwise)
    pub phase: bool,
}

/// Indices of one common satellite: session slot and positions of
/// its observation within each station block
#[derive(Debug, Copy, Clone)]
pub(crate) struct CommonIndex {
    pub slot: usize,
    pub iu: usize,
    pub ir: usize,
    /// Carrier wavelength (m)
    pub wavelength_m: f64,
    /// Constellation family
    pub family: Option<usize>,
    /// Identity
    pub sv: SV,
}

/// Shared double difference evaluation context for one epoch
pub(crate) struct DdContext<'a> {
    pub t: Epoch,
    pub cfg: &'a Config,
    /// Common satellites, in increasing slot order
    pub common: &'a [CommonIndex],
    /// Undifferenced (phase, code) residuals, both station blocks
    pub y: &'a [(f64, f64)],
    /// Rover line of sight unit vectors
    pub e: &'a [Vector3<f64>],
    /// Azimuth/elevation angles, both station blocks
    pub azel: &'a [(f64, f64)],
    /// Reference site state
    pub base_position: Vector3<f64>,
    pub base_velocity: Vector3<f64>,
    /// Age of the differential corrections (s)
    pub age_s: f64,
}

/// Double differenced measurement set of one iteration
pub(crate) struct DdOutput {
    pub v: DVector<f64>,
    pub h: DMatrix<f64>,
    pub r: DMatrix<f64>,
    pub pairs: Vec<DdPair>,
}

/// Per satellite atmospheric model terms at the linearization point
struct SatModel {
    /// Combined ionosphere mapping (both sites)
    im: f64,
    /// Modelled slant wet delay, rover and base
    trop_u: f64,
    trop_r: f64,
    /// Partial derivatives (zwd, grad_n, grad_e), rover and base
    dtdx_u: [f64; 3],
    dtdx_r: [f64; 3],
}

fn sat_models(state: &FilterState, ctx: &DdContext) -> Vec<SatModel> {
    let cfg = ctx.cfg;
    let pos_u = geometry::geodetic(state.position());
    let pos_r = geometry::geodetic(ctx.base_position);

    ctx.common
        .iter()
        .map(|sat| {
            let mut model = SatModel {
                im: 0.0,
                trop_u: 0.0,
                trop_r: 0.0,
                dtdx_u: [0.0; 3],
                dtdx_r: [0.0; 3],
            };

            if cfg.iono == IonoOption::Estimate {
                model.im = (iono::ionosphere_mapping(pos_u, ctx.azel[sat.iu].1)
                    + iono::ionosphere_mapping(pos_r, ctx.azel[sat.ir].1))
                    / 2.0;
            }

            if cfg.tropo >= TropoOption::Estimate {
                let gradients = |station: usize| {
                    if state.has_tropo_gradients() {
                        let i = state.tropo_index(station).unwrap();
                        Some((state.x[i + 1], state.x[i + 2]))
                    } else {
                        None
                    }
                };

                let zwd = |station: usize| state.x[state.tropo_index(station).unwrap()];

                let (trop_u, dtdx_u) = tropo::wet_delay_with_gradients(
                    ctx.t,
                    pos_u,
                    ctx.azel[sat.iu],
                    zwd(0),
                    gradients(0),
                );
                let (trop_r, dtdx_r) = tropo::wet_delay_with_gradients(
                    ctx.t,
                    pos_r,
                    ctx.azel[sat.ir],
                    zwd(1),
                    gradients(1),
                );

                model.trop_u = trop_u;
                model.trop_r = trop_r;
                model.dtdx_u = dtdx_u;
                model.dtdx_r = dtdx_r;
            }

            model
        })
        .collect()
}

/// Valid residual pair: the phase channel needs both phase residuals,
/// the code channel additionally needs the phase observable (a code
/// only satellite does not contribute)
fn valid_obs(ctx: &DdContext, k: usize, phase: bool) -> bool {
    let (yu, yr) = (ctx.y[ctx.common[k].iu], ctx.y[ctx.common[k].ir]);

    if phase {
        yu.0 != 0.0 && yr.0 != 0.0
    } else {
        yu.1 != 0.0 && yr.1 != 0.0 && yu.0 != 0.0 && yr.0 != 0.0
    }
}

/// Single differenced measurement error variance
fn variance(cfg: &Config, sat: &CommonIndex, el: f64, bl_m: f64, dt_s: f64, phase: bool) -> f64 {
    let sys = match sat.family {
        Some(1) => 1,
        Some(2) | Some(3) => 2,
        _ => 0,
    };

    let (a, b) = match &cfg.exterr {
        Some(model) => {
            if phase {
                model.phase[sys]
            } else {
                model.code[sys]
            }
        },
        None => {
            let mut fact = if phase { 1.0 } else { cfg.code_phase_ratio };

            fact *= if sat.sv.constellation.is_sbas() {
                3.0
            } else if sat.family == Some(1) {
                1.5 // glonass
            } else {
                1.0
            };

            (fact * cfg.phase_err_m, fact * cfg.phase_err_el_m)
        },
    };

    let c = cfg.baseline_err_m * bl_m / 1.0E4;
    let d = SPEED_OF_LIGHT_M_S * cfg.sclk_stability * dt_s;

    let iono_factor = if cfg.iono == IonoOption::Iflc { 3.0 } else { 1.0 };
    let sin_el = el.sin();

    2.0 * iono_factor * (a * a + b * b / sin_el / sin_el + c * c) + d * d
}

/// One double differenced residual row, corrected for the modelled
/// state contributions. Returns (v, H row) - H row only when requested.
#[allow(clippy::too_many_arguments)]
fn dd_row(
    state: &FilterState,
    ctx: &DdContext,
    models: &[SatModel],
    i: usize,
    j: usize,
    phase: bool,
    with_design: bool,
) -> (f64, Option<DVector<f64>>) {
    let cfg = ctx.cfg;
    let nx = state.nx();
    let (sat_i, sat_j) = (&ctx.common[i], &ctx.common[j]);

    let channel = |y: (f64, f64)| if phase { y.0 } else { y.1 };

    let mut v = (channel(ctx.y[sat_i.iu]) - channel(ctx.y[sat_i.ir]))
        - (channel(ctx.y[sat_j.iu]) - channel(ctx.y[sat_j.ir]));

    let mut h = if with_design {
        Some(DVector::<f64>::zeros(nx))
    } else {
        None
    };

    // rover position
    if let Some(h) = h.as_mut() {
        for k in 0..3 {
            h[k] = -ctx.e[sat_i.iu][k] + ctx.e[sat_j.iu][k];
        }
    }

    // ionosphere states: carrier advanced, code delayed
    if cfg.iono == IonoOption::Estimate {
        let sign = if phase { -1.0 } else { 1.0 };
        let didx_i = sign * iono::frequency_factor(sat_i.wavelength_m) * models[i].im;
        let didx_j = sign * iono::frequency_factor(sat_j.wavelength_m) * models[j].im;

        let (ii, ij) = (
            state.iono_index(sat_i.slot).unwrap(),
            state.iono_index(sat_j.slot).unwrap(),
        );

        v -= didx_i * state.x[ii] - didx_j * state.x[ij];

        if let Some(h) = h.as_mut() {
            h[ii] = didx_i;
            h[ij] = -didx_j;
        }
    }

    // troposphere states
    if cfg.tropo >= TropoOption::Estimate {
        v -= (models[i].trop_u - models[j].trop_u) - (models[i].trop_r - models[j].trop_r);

        let terms = if state.has_tropo_gradients() { 3 } else { 1 };
        let (it_u, it_r) = (
            state.tropo_index(0).unwrap(),
            state.tropo_index(1).unwrap(),
        );

        if let Some(h) = h.as_mut() {
            for k in 0..terms {
                h[it_u + k] = models[i].dtdx_u[k] - models[j].dtdx_u[k];
                h[it_r + k] = -(models[i].dtdx_r[k] - models[j].dtdx_r[k]);
            }
        }
    }

    // ambiguity states, phase channel only
    if phase {
        let (ib_i, ib_j) = (
            state.amb_index(sat_i.slot).unwrap(),
            state.amb_index(sat_j.slot).unwrap(),
        );

        v -= sat_i.wavelength_m * state.x[ib_i] - sat_j.wavelength_m * state.x[ib_j];

        if let Some(h) = h.as_mut() {
            h[ib_i] = sat_i.wavelength_m;
            h[ib_j] = -sat_j.wavelength_m;
        }
    }

    (v, h)
}

/// Forms the double differenced residual set: per constellation family
/// and channel, every valid satellite is differenced against the
/// highest reference in sight. Innovation outliers are rejected.
/// Optionally appends the moving base length constraint.
pub(crate) fn double_diff_residuals(
    state: &FilterState,
    tracks: &mut [SatelliteTrack],
    ctx: &DdContext,
    with_design: bool,
) -> Option<DdOutput> {
    let cfg = ctx.cfg;
    let nx = state.nx();
    let ns = ctx.common.len();

    let baseline_m = (state.position() - ctx.base_position).norm();
    let models = sat_models(state, ctx);

    let mut v_all = Vec::<f64>::new();
    let mut h_rows = Vec::<DVector<f64>>::new();
    let mut pairs = Vec::<DdPair>::new();
    let mut r_i = Vec::<f64>::new();
    let mut r_j = Vec::<f64>::new();
    let mut groups = Vec::<usize>::new();

    let phase_channels: &[bool] = if cfg.mode.estimates_ambiguities() {
        &[true, false]
    } else {
        &[false]
    };

    for family in 0..NUM_FAMILIES {
        for phase in phase_channels.iter().copied() {
            // reference: highest elevation among valid residuals
            let mut reference: Option<usize> = None;

            for (k, sat) in ctx.common.iter().enumerate() {
                if sat.family != Some(family) || !valid_obs(ctx, k, phase) {
                    continue;
                }
                match reference {
                    Some(r) if ctx.azel[ctx.common[r].iu].1 >= ctx.azel[sat.iu].1 => {},
                    _ => reference = Some(k),
                }
            }

            let i = match reference {
                Some(i) => i,
                None => continue,
            };

            let mut group_len = 0_usize;

            for j in 0..ns {
                if i == j {
                    continue;
                }

                let sat_j = &ctx.common[j];
                if sat_j.family != Some(family) || !valid_obs(ctx, j, phase) {
                    continue;
                }

                if ctx.common[i].wavelength_m <= 0.0 || sat_j.wavelength_m <= 0.0 {
                    continue;
                }

                let (v, h) = dd_row(state, ctx, &models, i, j, phase, with_design);

                if phase {
                    tracks[sat_j.slot].phase_residual_m = v;
                } else {
                    tracks[sat_j.slot].code_residual_m = v;
                }

                // innovation gating
                if cfg.max_innovation_m > 0.0 && v.abs() > cfg.max_innovation_m {
                    if phase {
                        tracks[ctx.common[i].slot].reject_count += 1;
                        tracks[sat_j.slot].reject_count += 1;
                    }
                    warn!(
                        "{} - outlier rejected ({}-{} {} v={:.3})",
                        ctx.t,
                        ctx.common[i].sv,
                        sat_j.sv,
                        if phase { "L1" } else { "C1" },
                        v
                    );
                    continue;
                }

                r_j.push(variance(
                    cfg,
                    sat_j,
                    ctx.azel[sat_j.iu].1,
                    baseline_m,
                    ctx.age_s,
                    phase,
                ));
                r_i.push(variance(
                    cfg,
                    &ctx.common[i],
                    ctx.azel[ctx.common[i].iu].1,
                    baseline_m,
                    ctx.age_s,
                    phase,
                ));

                // valid satellite flags
                if cfg.mode.estimates_ambiguities() {
                    if phase {
                        tracks[ctx.common[i].slot].vsat = true;
                        tracks[sat_j.slot].vsat = true;
                    }
                } else {
                    tracks[ctx.common[i].slot].vsat = true;
                    tracks[sat_j.slot].vsat = true;
                }

                v_all.push(v);
                if let Some(h) = h {
                    h_rows.push(h);
                }

                pairs.push(DdPair {
                    sats: Some((ctx.common[i].sv, sat_j.sv)),
                    phase,
                });

                group_len += 1;
            }

            if group_len > 0 {
                groups.push(group_len);
            }
        }
    }

    // moving base: length constraint pseudo measurement
    if cfg.mode == PositioningMode::MovingBase {
        if let Some((v, h, var)) = baseline_constraint(state, ctx) {
            v_all.push(v);
            if with_design {
                h_rows.push(h);
            }
            r_i.push(0.0);
            r_j.push(var);
            groups.push(1);

            pairs.push(DdPair {
                sats: None,
                phase: false,
            });
        }
    }

    let nv = v_all.len();
    if nv == 0 {
        return None;
    }

    let v = DVector::<f64>::from_vec(v_all);

    let mut h = DMatrix::<f64>::zeros(nv, nx);
    if with_design {
        for (row, h_row) in h_rows.iter().enumerate() {
            h.row_mut(row).copy_from(&h_row.transpose());
        }
    }

    let r = dd_covariance(&groups, &r_i, &r_j);

    debug!("{} - {} double differences", ctx.t, nv);

    Some(DdOutput { v, h, r, pairs })
}

/// Double differenced covariance: block diagonal per reference group.
/// Within a group, every pair shares the reference variance.
fn dd_covariance(groups: &[usize], r_i: &[f64], r_j: &[f64]) -> DMatrix<f64> {
    let nv = r_i.len();
    let mut r = DMatrix::<f64>::zeros(nv, nv);

    let mut k = 0_usize;
    for nb in groups.iter() {
        for i in 0..*nb {
            for j in 0..*nb {
                r[(k + i, k + j)] = r_i[k + i] + if i == j { r_j[k + i] } else { 0.0 };
            }
        }
        k += nb;
    }

    r
}

/// Moving base length constraint: appended when the nominal separation
/// is configured and the linearization error remains negligible.
fn baseline_constraint(
    state: &FilterState,
    ctx: &DdContext,
) -> Option<(f64, DVector<f64>, f64)> {
    let cfg = ctx.cfg;

    if cfg.baseline_nominal_m <= 0.0 {
        return None;
    }

    // time adjusted reference position
    let xb = ctx.base_position + ctx.base_velocity * ctx.age_s;
    let b = state.position() - xb;
    let bb = b.norm();

    if bb <= 0.0 {
        return None;
    }

    // nonlinearity check on the current position variance
    let var = (0..3).map(|i| state.p[(i, i)]).sum::<f64>() / 3.0;

    if var > BASELINE_NONLINEARITY * BASELINE_NONLINEARITY * bb * bb {
        debug!(
            "baseline constraint rejected (bb={:.3} var={:.3})",
            bb, var
        );
        return None;
    }

    let v = cfg.baseline_nominal_m - bb;

    let mut h = DVector::<f64>::zeros(state.nx());
    for i in 0..3 {
        h[i] = b[i] / bb;
    }

    Some((v, h, cfg.baseline_sigma_m.powi(2)))
}

/// Re-evaluates the residual vector for a fixed pair set, at the
/// proposed state: measurement closure of the sigma point and least
/// squares variants.
pub(crate) fn residuals_for_pairs(
    state: &FilterState,
    ctx: &DdContext,
    pairs: &[DdPair],
) -> Option<DVector<f64>> {
    let models = sat_models(state, ctx);

    let index_of = |sv: SV| ctx.common.iter().position(|sat| sat.sv == sv);

    let mut v = DVector::<f64>::zeros(pairs.len());

    for (row, pair) in pairs.iter().enumerate() {
        let (reference_sv, other_sv) = match pair.sats {
            Some(sats) => sats,
            None => {
                let (value, _, _) = baseline_constraint(state, ctx)?;
                v[row] = value;
                continue;
            },
        };

        let i = index_of(reference_sv)?;
        let j = index_of(other_sv)?;

        let (value, _) = dd_row(state, ctx, &models, i, j, pair.phase, false);
        v[row] = value;
    }

    Some(v)
}
