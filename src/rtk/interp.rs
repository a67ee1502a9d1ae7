use log::debug;
use nalgebra::Vector3;

use crate::{
    bias::KbModel,
    cfg::Config,
    constants::DTTOL_S,
    observation::{sat_index, Observation, SatelliteState},
    prelude::Epoch,
    rtk::undiff::undifferenced_residuals,
    track::SatelliteTrack,
};

/// Reference site epoch cache, owned by the session: linear time
/// interpolation of base residuals for post processed datasets where
/// the reference site samples slower than the rover.
#[derive(Debug, Default, Clone)]
pub(crate) struct InterpCache {
    t: Option<Epoch>,
    observations: Vec<Observation>,
    states: Vec<SatelliteState>,
}

impl InterpCache {
    /// Interpolates the reference site residuals `y_base` to the rover
    /// sampling instant, from the cached neighbor epoch. Returns the
    /// effective time deviation (s).
    #[allow(clippy::too_many_arguments)]
    pub fn interpolate(
        &mut self,
        t: Epoch,
        t_base: Epoch,
        base_obs: &[Observation],
        base_states: &[SatelliteState],
        base_position: Vector3<f64>,
        kb_model: Option<KbModel>,
        cfg: &Config,
        tracks: &[SatelliteTrack],
        y_base: &mut [(f64, f64)],
    ) -> f64 {
        let tt = (t - t_base).to_seconds();

        if self.t.is_none() || tt.abs() < DTTOL_S {
            self.store(t_base, base_obs, base_states);
            return tt;
        }

        let ttb = (t - self.t.unwrap()).to_seconds();

        // cache too old to interpolate from: restart from this epoch
        if ttb.abs() > cfg.max_age_s * 2.0 {
            self.store(t_base, base_obs, base_states);
            return tt;
        }

        if ttb == tt {
            return tt;
        }

        // rebuild the cached epoch residuals
        let nb = self.observations.len();
        let slots: Vec<Option<usize>> = self.observations.iter().map(|o| sat_index(o.sv)).collect();

        let mut yb = vec![(0.0, 0.0); nb];
        let mut eb = vec![Vector3::<f64>::zeros(); nb];
        let mut azelb = vec![(0.0, 0.0); nb];

        if !undifferenced_residuals(
            true,
            self.t.unwrap(),
            &self.observations,
            &self.states,
            base_position,
            kb_model,
            cfg,
            tracks,
            &slots,
            &mut yb,
            &mut eb,
            &mut azelb,
        ) {
            return tt;
        }

        debug!("base residual interpolation (tt={:.3} ttb={:.3})", tt, ttb);

        for (i, obs) in base_obs.iter().enumerate() {
            let j = match self.observations.iter().position(|o| o.sv == obs.sv) {
                Some(j) => j,
                None => continue,
            };

            let lerp = |current: f64, cached: f64| {
                if current == 0.0 || cached == 0.0 {
                    0.0
                } else {
                    (ttb * current - tt * cached) / (ttb - tt)
                }
            };

            y_base[i] = (lerp(y_base[i].0, yb[j].0), lerp(y_base[i].1, yb[j].1));
        }

        if ttb.abs() > tt.abs() {
            ttb
        } else {
            tt
        }
    }

    fn store(&mut self, t: Epoch, observations: &[Observation], states: &[SatelliteState]) {
        self.t = Some(t);
        self.observations = observations.to_vec();
        self.states = states.to_vec();
    }
}
