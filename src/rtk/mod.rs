//! Epoch driver: orchestrates the observation model, temporal and
//! measurement updates and ambiguity resolution, one rover epoch at
//! a time.

use log::{debug, warn};
use nalgebra::{DVector, Vector3};

use crate::{
    bias::KbModel,
    cfg::{AmbiguityMode, Config, FilterVariant, PositioningMode},
    constants::{MAXSAT, MOVING_BASE_TTOL_S},
    error::Error,
    navigation::{ambiguity, kalman, nls, temporal, ukf, FilterState},
    observation::{is_sorted, rover_count, sat_index, sys_family, Observation, SatelliteState},
    prelude::{Duration, Epoch, Station, SV},
    solutions::{validator, Solution, SolutionStatus},
    track::{FixState, SatelliteTrack},
};

pub(crate) mod double_diff;
pub(crate) mod interp;
pub(crate) mod undiff;

use double_diff::{CommonIndex, DdContext};
use interp::InterpCache;
use undiff::{select_common, undifferenced_residuals};

/// Post-fit residual screening threshold, in sigmas
const POSTFIT_THRESHOLD: f64 = 4.0;

/// Reference site state, resolved upstream, required by
/// [PositioningMode::MovingBase] at every epoch
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BaseState {
    /// Resolution instant
    pub t: Epoch,
    /// Position, ECEF (m)
    pub position_ecef_m: Vector3<f64>,
    /// Velocity, ECEF (m/s)
    pub velocity_ecef_m_s: Vector3<f64>,
}

/// One epoch of synchronized measurements, as proposed by the
/// external collaborators (decoders, ephemerides, single point seed).
#[derive(Debug, Clone)]
pub struct EpochInput<'a> {
    /// Rover sampling instant
    pub t: Epoch,

    /// Reference site sampling instant
    pub t_base: Epoch,

    /// Ordered observations: rover block first, reference site block
    /// second, both sorted by satellite
    pub observations: &'a [Observation],

    /// Ephemeris evaluations, one per observation
    pub states: &'a [SatelliteState],

    /// Rover position seed (single point solution)
    pub rover_seed_ecef_m: Vector3<f64>,

    /// Rover velocity seed
    pub rover_seed_velocity_m_s: Vector3<f64>,

    /// Reference site state, moving base only
    pub moving_base: Option<BaseState>,

    /// Broadcast ionosphere parameters, when decoded
    pub kb_model: Option<KbModel>,
}

/// Single frequency RTK estimation session. One [RtkSolver] owns its
/// complete state (filter, satellite tracks, caches): independent
/// sessions may run concurrently.
pub struct RtkSolver {
    /// [Config] preset
    cfg: Config,

    /// Filter state and covariance
    state: FilterState,

    /// Per satellite slot bookkeeping
    tracks: Vec<SatelliteTrack>,

    /// Consecutive validated fixes
    nfix: u32,

    /// Previous epoch
    prev_t: Option<Epoch>,

    /// Reference site state
    base_position: Vector3<f64>,
    base_velocity: Vector3<f64>,

    /// Reference site residual cache (post processing)
    interp: InterpCache,

    /// Latest resolved [Solution]
    solution: Solution,
}

impl RtkSolver {
    /// Builds a new [RtkSolver] session from a [Config] preset.
    pub fn new(cfg: &Config) -> Self {
        let base_position = match cfg.base_position_ecef_m {
            Some((x, y, z)) => Vector3::new(x, y, z),
            None => Vector3::zeros(),
        };

        Self {
            cfg: cfg.clone(),
            state: FilterState::new(cfg),
            tracks: vec![SatelliteTrack::default(); MAXSAT],
            nfix: 0,
            prev_t: None,
            base_position,
            base_velocity: Vector3::zeros(),
            interp: InterpCache::default(),
            solution: Solution::default(),
        }
    }

    /// Latest resolved [Solution]
    pub fn solution(&self) -> Solution {
        self.solution
    }

    #[cfg(test)]
    pub(crate) fn filter_state(&self) -> &FilterState {
        &self.state
    }

    /// External phase windup corrector entry point (cycles).
    pub fn set_windup(&mut self, sv: SV, station: Station, cycles: f64) {
        if let Some(slot) = sat_index(sv) {
            self.tracks[slot].set_windup(station, cycles);
        }
    }

    /// Processes one epoch and returns the resolved [Solution].
    ///
    /// Recoverable conditions (no common satellite, failed ambiguity
    /// validation..) degrade the solution quality and the session
    /// continues. Numerical failures and invalid datasets are
    /// reported as [Error], with the retained state rolled back to
    /// its pre-epoch snapshot.
    pub fn step(&mut self, input: &EpochInput) -> Result<Solution, Error> {
        let t = input.t;

        if let Some(prev) = self.prev_t {
            if t < prev {
                return Err(Error::NonMonotonicEpoch);
            }
        }

        if !is_sorted(input.observations) {
            return Err(Error::UnsortedEpoch);
        }

        assert_eq!(
            input.observations.len(),
            input.states.len(),
            "internal error: one ephemeris evaluation per observation!"
        );

        let dt_s = match self.prev_t {
            Some(prev) => (t - prev).to_seconds(),
            None => 0.0,
        };

        let n = input.observations.len();
        let nu = rover_count(input.observations);
        let nr = n - nu;

        if nr == 0 {
            warn!("{} - no reference site observations", t);
            return Ok(self.degrade(t, Duration::ZERO));
        }

        // reference site state and age of corrections
        let age_s = if self.cfg.mode == PositioningMode::MovingBase {
            let base = match input.moving_base {
                Some(base) => base,
                None => return Err(Error::UnknownBasePosition),
            };

            let age = (t - base.t).to_seconds();
            if age.abs() > MOVING_BASE_TTOL_S {
                warn!("{} - moving base sync error (age={:.1})", t, age);
                return Ok(self.degrade(t, Duration::from_seconds(age)));
            }

            // time synchronized reference position
            self.base_position = base.position_ecef_m + base.velocity_ecef_m_s * age;
            self.base_velocity = base.velocity_ecef_m_s;
            age
        } else {
            if self.base_position.norm() <= 0.0 {
                return Err(Error::UnknownBasePosition);
            }

            let age = (t - input.t_base).to_seconds();
            if age.abs() > self.cfg.max_age_s {
                warn!("{} - age of differential error (age={:.1})", t, age);
                return Ok(self.degrade(t, Duration::from_seconds(age)));
            }
            age
        };

        // pre-epoch snapshot: numerical failures roll back to it
        let snapshot = (self.state.clone(), self.tracks.clone(), self.nfix);

        match self.relative_positioning(input, nu, dt_s, age_s) {
            Ok(solution) => {
                self.prev_t = Some(t);
                self.solution = solution;
                Ok(solution)
            },
            Err(e) => {
                let (state, tracks, nfix) = snapshot;
                self.state = state;
                self.tracks = tracks;
                self.nfix = nfix;
                Err(e)
            },
        }
    }

    /// Degraded epoch: previous state retained, outage counters
    /// incremented, no solution reported.
    fn degrade(&mut self, t: Epoch, age: Duration) -> Solution {
        for track in self.tracks.iter_mut() {
            track.outage[0] += 1;
            track.outage[1] += 1;
        }

        self.prev_t = Some(t);

        self.solution = Solution {
            t,
            status: SolutionStatus::None,
            position_ecef_m: self.state.position(),
            velocity_ecef_m_s: self.state.velocity(),
            position_covar_m2: self.position_covariance(),
            ratio: 0.0,
            nsat: 0,
            age,
        };

        self.solution
    }

    fn position_covariance(&self) -> [f64; 6] {
        let p = &self.state.p;
        [
            p[(0, 0)],
            p[(1, 1)],
            p[(2, 2)],
            p[(0, 1)],
            p[(1, 2)],
            p[(2, 0)],
        ]
    }

    fn relative_positioning(
        &mut self,
        input: &EpochInput,
        nu: usize,
        dt_s: f64,
        age_s: f64,
    ) -> Result<Solution, Error> {
        let t = input.t;
        let cfg = self.cfg.clone();
        let n = input.observations.len();

        let slots: Vec<Option<usize>> = input
            .observations
            .iter()
            .map(|obs| sat_index(obs.sv))
            .collect();

        // per epoch satellite state reset
        for track in self.tracks.iter_mut() {
            track.vsat = false;
            track.phase_residual_m = 0.0;
            track.code_residual_m = 0.0;
        }

        let mut y = vec![(0.0_f64, 0.0_f64); n];
        let mut e = vec![Vector3::<f64>::zeros(); n];
        let mut azel = vec![(0.0_f64, 0.0_f64); n];

        // undifferenced residuals of the reference site
        let base_known = undifferenced_residuals(
            true,
            input.t_base,
            &input.observations[nu..],
            &input.states[nu..],
            self.base_position,
            input.kb_model,
            &cfg,
            &self.tracks,
            &slots[nu..],
            &mut y[nu..],
            &mut e[nu..],
            &mut azel[nu..],
        );

        if !base_known {
            warn!("{} - reference site position unknown", t);
            return Ok(self.degrade(t, Duration::from_seconds(age_s)));
        }

        // base residual interpolation (post processing)
        let age_s = if cfg.time_interpolation {
            self.interp.interpolate(
                t,
                input.t_base,
                &input.observations[nu..],
                &input.states[nu..],
                self.base_position,
                input.kb_model,
                &cfg,
                &self.tracks,
                &mut y[nu..],
            )
        } else {
            age_s
        };

        // common satellites
        let selected = select_common(&slots, &azel, nu, cfg.elmin_rad());

        if selected.is_empty() {
            warn!("{} - no common satellite", t);
            return Ok(self.degrade(t, Duration::from_seconds(age_s)));
        }

        let common: Vec<CommonIndex> = selected
            .iter()
            .map(|(slot, iu, ir)| CommonIndex {
                slot: *slot,
                iu: *iu,
                ir: *ir,
                wavelength_m: input.states[*iu].wavelength_m,
                family: sys_family(input.observations[*iu].sv.constellation),
                sv: input.observations[*iu].sv,
            })
            .collect();

        for sat in common.iter() {
            self.tracks[sat.slot].new_epoch(sat.sv);
            // reference site angles for now: the rover side residuals
            // are not formed yet (negligible difference over the baseline)
            self.tracks[sat.slot].azel = azel[sat.ir];
            self.tracks[sat.slot].snr = input.observations[sat.iu].snr;
        }

        // temporal update
        let pairs: Vec<temporal::CommonSat> = common
            .iter()
            .map(|sat| temporal::CommonSat {
                slot: sat.slot,
                rover: &input.observations[sat.iu],
                base: &input.observations[sat.ir],
                wavelength_m: sat.wavelength_m,
            })
            .collect();

        temporal::temporal_update(
            &mut self.state,
            &mut self.tracks,
            &cfg,
            &temporal::TemporalUpdate {
                dt_s,
                seed_position: input.rover_seed_ecef_m,
                seed_velocity: input.rover_seed_velocity_m_s,
                base_position: self.base_position,
                common: &pairs,
            },
        );

        // iterated measurement update on a working copy
        let mut working = self.state.clone();
        let mut status = if cfg.mode.estimates_ambiguities() {
            SolutionStatus::Float
        } else {
            SolutionStatus::DGps
        };

        status = self.measurement_update(
            input, nu, age_s, &common, &mut y, &mut e, &mut azel, &mut working, status,
        )?;

        // post-fit validation of the float solution, then commit
        let mut nsat = 0_usize;

        if status != SolutionStatus::None {
            let rebuilt = undifferenced_residuals(
                false,
                t,
                &input.observations[..nu],
                &input.states[..nu],
                working.position(),
                input.kb_model,
                &cfg,
                &self.tracks,
                &slots[..nu],
                &mut y[..nu],
                &mut e[..nu],
                &mut azel[..nu],
            );

            let postfit = if rebuilt {
                let ctx = DdContext {
                    t,
                    cfg: &cfg,
                    common: &common,
                    y: &y,
                    e: &e,
                    azel: &azel,
                    base_position: self.base_position,
                    base_velocity: self.base_velocity,
                    age_s,
                };
                double_diff::double_diff_residuals(&working, &mut self.tracks, &ctx, false)
            } else {
                None
            };

            match postfit {
                Some(out)
                    if validator::validate_residuals(
                        &out.v,
                        &out.r,
                        &out.pairs,
                        POSTFIT_THRESHOLD,
                    ) =>
                {
                    self.state = working.clone();

                    for sat in common.iter() {
                        self.tracks[sat.slot].azel = azel[sat.iu];

                        if !self.tracks[sat.slot].vsat {
                            continue;
                        }
                        self.tracks[sat.slot].lock += 1;
                        self.tracks[sat.slot].outage = [0, 0];
                        nsat += 1;
                    }

                    // not enough valid satellites
                    if nsat < 4 {
                        status = SolutionStatus::None;
                    }
                },
                _ => status = SolutionStatus::None,
            }
        }

        // integer ambiguity resolution
        let mut ratio = 0.0_f64;
        let mut fixed: Option<ambiguity::FixedSolution> = None;

        if status > SolutionStatus::DGps
            && cfg.ambiguity != AmbiguityMode::Off
            && cfg.ar_ratio_threshold >= 1.0
        {
            let outcome = ambiguity::resolve(&self.state, &mut self.tracks, &cfg)?;
            ratio = outcome.ratio;

            if let Some(candidate) = outcome.fixed {
                if candidate.nb > 1
                    && self.validate_fixed(input, nu, age_s, &common, &candidate.xa)?
                {
                    self.nfix += 1;

                    if self.nfix >= cfg.min_fix && cfg.ambiguity == AmbiguityMode::FixAndHold {
                        ambiguity::hold(&mut self.state, &mut self.tracks, &cfg, &candidate.xa)?;
                    }

                    status = SolutionStatus::Fixed;
                    fixed = Some(candidate);
                }
            }
        }

        // archive sampled phases, slips, demote unconfirmed fixes
        for (k, obs) in input.observations.iter().enumerate() {
            if let Some(slot) = slots[k] {
                let t_obs = if k < nu { t } else { input.t_base };
                self.tracks[slot].save_phase(obs, t_obs);
            }
        }

        for track in self.tracks.iter_mut() {
            if track.fix == FixState::Fixed && status != SolutionStatus::Fixed {
                track.fix = FixState::Float;
            }
            if track.slip & 1 > 0 {
                track.slip_count += 1;
            }
        }

        if status != SolutionStatus::Fixed {
            self.nfix = 0;
        }

        // report: the validated fixed solution supersedes the float one
        let solution = match (&fixed, status) {
            (Some(fix), SolutionStatus::Fixed) => {
                let velocity = if self.state.np() == 9 {
                    Vector3::new(fix.xa[3], fix.xa[4], fix.xa[5])
                } else {
                    Vector3::zeros()
                };

                Solution {
                    t,
                    status,
                    position_ecef_m: Vector3::new(fix.xa[0], fix.xa[1], fix.xa[2]),
                    velocity_ecef_m_s: velocity,
                    position_covar_m2: [
                        fix.pa[(0, 0)],
                        fix.pa[(1, 1)],
                        fix.pa[(2, 2)],
                        fix.pa[(0, 1)],
                        fix.pa[(1, 2)],
                        fix.pa[(2, 0)],
                    ],
                    ratio,
                    nsat,
                    age: Duration::from_seconds(age_s),
                }
            },
            _ => Solution {
                t,
                status,
                position_ecef_m: self.state.position(),
                velocity_ecef_m_s: self.state.velocity(),
                position_covar_m2: self.position_covariance(),
                ratio,
                nsat,
                age: Duration::from_seconds(age_s),
            },
        };

        debug!(
            "{} - status={} nsat={} ratio={:.2}",
            t, solution.status, solution.nsat, solution.ratio
        );

        Ok(solution)
    }

    /// Measurement update at the working state, per configured variant
    #[allow(clippy::too_many_arguments)]
    fn measurement_update(
        &mut self,
        input: &EpochInput,
        nu: usize,
        age_s: f64,
        common: &[CommonIndex],
        y: &mut [(f64, f64)],
        e: &mut [Vector3<f64>],
        azel: &mut [(f64, f64)],
        working: &mut FilterState,
        status: SolutionStatus,
    ) -> Result<SolutionStatus, Error> {
        let t = input.t;
        let cfg = self.cfg.clone();

        let slots: Vec<Option<usize>> = input.observations[..nu]
            .iter()
            .map(|obs| sat_index(obs.sv))
            .collect();

        // extra iterations strengthen the moving base constraint
        let niter = cfg.niter.max(1)
            + if cfg.mode == PositioningMode::MovingBase && cfg.baseline_nominal_m > 0.0 {
                2
            } else {
                0
            };

        match cfg.filter {
            FilterVariant::Ekf | FilterVariant::Akf => {
                let adaptive = cfg.filter == FilterVariant::Akf;

                for iter in 0..niter {
                    let rebuilt = undifferenced_residuals(
                        false,
                        t,
                        &input.observations[..nu],
                        &input.states[..nu],
                        working.position(),
                        input.kb_model,
                        &cfg,
                        &self.tracks,
                        &slots,
                        &mut y[..nu],
                        &mut e[..nu],
                        &mut azel[..nu],
                    );

                    if !rebuilt {
                        warn!("{} - rover position unknown (iter={})", t, iter);
                        return Ok(SolutionStatus::None);
                    }

                    let ctx = DdContext {
                        t,
                        cfg: &cfg,
                        common,
                        y: &*y,
                        e: &*e,
                        azel: &*azel,
                        base_position: self.base_position,
                        base_velocity: self.base_velocity,
                        age_s,
                    };

                    let out = match double_diff::double_diff_residuals(
                        working,
                        &mut self.tracks,
                        &ctx,
                        true,
                    ) {
                        Some(out) => out,
                        None => {
                            warn!("{} - no double difference", t);
                            return Ok(SolutionStatus::None);
                        },
                    };

                    kalman::filter_update(working, &out.h, &out.v, &out.r, adaptive)?;
                }

                Ok(status)
            },

            FilterVariant::Ukf => {
                // linearization pass fixes the measurement set
                let rebuilt = undifferenced_residuals(
                    false,
                    t,
                    &input.observations[..nu],
                    &input.states[..nu],
                    working.position(),
                    input.kb_model,
                    &cfg,
                    &self.tracks,
                    &slots,
                    &mut y[..nu],
                    &mut e[..nu],
                    &mut azel[..nu],
                );

                if !rebuilt {
                    return Ok(SolutionStatus::None);
                }

                let ctx = DdContext {
                    t,
                    cfg: &cfg,
                    common,
                    y: &*y,
                    e: &*e,
                    azel: &*azel,
                    base_position: self.base_position,
                    base_velocity: self.base_velocity,
                    age_s,
                };

                let out =
                    match double_diff::double_diff_residuals(working, &mut self.tracks, &ctx, false)
                    {
                        Some(out) => out,
                        None => return Ok(SolutionStatus::None),
                    };

                let layout = working.clone();
                let measure = |x_full: &DVector<f64>| {
                    self.rebuild_residuals(input, nu, age_s, common, &layout, x_full, &out.pairs)
                };

                ukf::ukf_update(working, &out.r, measure)?;
                Ok(status)
            },

            FilterVariant::Nls => {
                let layout = working.clone();
                let build = |x_full: &DVector<f64>| {
                    self.rebuild_problem(input, nu, age_s, common, &layout, x_full)
                };

                nls::nls_update(working, niter.max(5), build)?;
                Ok(status)
            },
        }
    }

    /// Residual rebuild at a proposed state, over a fixed pair set
    /// (UKF sigma points)
    #[allow(clippy::too_many_arguments)]
    fn rebuild_residuals(
        &self,
        input: &EpochInput,
        nu: usize,
        age_s: f64,
        common: &[CommonIndex],
        layout: &FilterState,
        x_full: &DVector<f64>,
        pairs: &[double_diff::DdPair],
    ) -> Option<DVector<f64>> {
        let (candidate, y, e, azel) = self.evaluate_at(input, nu, layout, x_full)?;

        let ctx = DdContext {
            t: input.t,
            cfg: &self.cfg,
            common,
            y: &y,
            e: &e,
            azel: &azel,
            base_position: self.base_position,
            base_velocity: self.base_velocity,
            age_s,
        };

        double_diff::residuals_for_pairs(&candidate, &ctx, pairs)
    }

    /// Full problem rebuild at a proposed state (NLS iterations)
    fn rebuild_problem(
        &self,
        input: &EpochInput,
        nu: usize,
        age_s: f64,
        common: &[CommonIndex],
        layout: &FilterState,
        x_full: &DVector<f64>,
    ) -> Option<(
        DVector<f64>,
        nalgebra::DMatrix<f64>,
        nalgebra::DMatrix<f64>,
    )> {
        let (candidate, y, e, azel) = self.evaluate_at(input, nu, layout, x_full)?;

        let ctx = DdContext {
            t: input.t,
            cfg: &self.cfg,
            common,
            y: &y,
            e: &e,
            azel: &azel,
            base_position: self.base_position,
            base_velocity: self.base_velocity,
            age_s,
        };

        let mut tracks = self.tracks.clone();
        double_diff::double_diff_residuals(&candidate, &mut tracks, &ctx, true)
            .map(|out| (out.v, out.h, out.r))
    }

    /// Rover residual evaluation at an arbitrary full layout state
    fn evaluate_at(
        &self,
        input: &EpochInput,
        nu: usize,
        layout: &FilterState,
        x_full: &DVector<f64>,
    ) -> Option<(
        FilterState,
        Vec<(f64, f64)>,
        Vec<Vector3<f64>>,
        Vec<(f64, f64)>,
    )> {
        let n = input.observations.len();

        let mut candidate = layout.clone();
        candidate.x = x_full.clone();

        let slots: Vec<Option<usize>> = input
            .observations
            .iter()
            .map(|obs| sat_index(obs.sv))
            .collect();

        let mut y = vec![(0.0_f64, 0.0_f64); n];
        let mut e = vec![Vector3::<f64>::zeros(); n];
        let mut azel = vec![(0.0_f64, 0.0_f64); n];

        // reference site block, at the retained base position
        let base = undifferenced_residuals(
            true,
            input.t_base,
            &input.observations[nu..],
            &input.states[nu..],
            self.base_position,
            input.kb_model,
            &self.cfg,
            &self.tracks,
            &slots[nu..],
            &mut y[nu..],
            &mut e[nu..],
            &mut azel[nu..],
        );

        if !base {
            return None;
        }

        let rover = undifferenced_residuals(
            false,
            input.t,
            &input.observations[..nu],
            &input.states[..nu],
            candidate.position(),
            input.kb_model,
            &self.cfg,
            &self.tracks,
            &slots[..nu],
            &mut y[..nu],
            &mut e[..nu],
            &mut azel[..nu],
        );

        if !rover {
            return None;
        }

        Some((candidate, y, e, azel))
    }

    /// Post-fit screening of a fixed solution candidate
    fn validate_fixed(
        &mut self,
        input: &EpochInput,
        nu: usize,
        age_s: f64,
        common: &[CommonIndex],
        xa: &DVector<f64>,
    ) -> Result<bool, Error> {
        let cfg = self.cfg.clone();

        let (candidate, y, e, azel) = match self.evaluate_at(input, nu, &self.state.clone(), xa) {
            Some(found) => found,
            None => return Ok(false),
        };

        let ctx = DdContext {
            t: input.t,
            cfg: &cfg,
            common,
            y: &y,
            e: &e,
            azel: &azel,
            base_position: self.base_position,
            base_velocity: self.base_velocity,
            age_s,
        };

        let out = match double_diff::double_diff_residuals(
            &candidate,
            &mut self.tracks,
            &ctx,
            false,
        ) {
            Some(out) => out,
            None => return Ok(false),
        };

        Ok(validator::validate_residuals(
            &out.v,
            &out.r,
            &out.pairs,
            POSTFIT_THRESHOLD,
        ))
    }
}
