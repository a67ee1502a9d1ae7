use nalgebra::{DMatrix, DVector, Vector3};

use crate::{
    cfg::{Config, IonoOption, TropoOption},
    constants::MAXSAT,
};

/// Dense state vector and covariance of one estimation session.
/// The layout is fixed by the [Config]: position (3, or 9 with
/// velocity and acceleration), optional per satellite vertical
/// ionosphere delays, optional zenith wet troposphere delays
/// (with gradients), one carrier phase ambiguity per satellite slot.
///
/// A component is inactive while its value and variance are both
/// null: inactive components never enter a measurement update.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FilterState {
    /// State vector
    pub x: DVector<f64>,

    /// State covariance
    pub p: DMatrix<f64>,

    np: usize,
    ni: usize,
    nt: usize,
    nb: usize,
}

impl FilterState {
    pub fn new(cfg: &Config) -> Self {
        let np = if cfg.dynamics { 9 } else { 3 };

        let ni = match cfg.iono {
            IonoOption::Estimate => MAXSAT,
            _ => 0,
        };

        let nt = match cfg.tropo {
            TropoOption::Estimate => 2,
            TropoOption::EstimateGradient => 6,
            _ => 0,
        };

        let nb = if cfg.mode.estimates_ambiguities() {
            MAXSAT
        } else {
            0
        };

        let nx = np + ni + nt + nb;

        Self {
            np,
            ni,
            nt,
            nb,
            x: DVector::<f64>::zeros(nx),
            p: DMatrix::<f64>::zeros(nx, nx),
        }
    }

    /// Total dimension
    pub fn nx(&self) -> usize {
        self.np + self.ni + self.nt + self.nb
    }

    /// Real (non ambiguity) states
    pub fn na(&self) -> usize {
        self.np + self.ni + self.nt
    }

    /// Position block dimension: 3, or 9 with dynamics
    pub fn np(&self) -> usize {
        self.np
    }

    /// True when troposphere gradients are being estimated
    pub fn has_tropo_gradients(&self) -> bool {
        self.nt == 6
    }

    /// Vertical ionosphere delay of a satellite slot
    pub fn iono_index(&self, slot: usize) -> Option<usize> {
        if self.ni > 0 {
            Some(self.np + slot)
        } else {
            None
        }
    }

    /// Zenith wet delay of one station (0: rover, 1: base)
    pub fn tropo_index(&self, station: usize) -> Option<usize> {
        if self.nt > 0 {
            Some(self.np + self.ni + self.nt / 2 * station)
        } else {
            None
        }
    }

    /// Carrier phase ambiguity of a satellite slot
    pub fn amb_index(&self, slot: usize) -> Option<usize> {
        if self.nb > 0 {
            Some(self.np + self.ni + self.nt + slot)
        } else {
            None
        }
    }

    /// Rover position
    pub fn position(&self) -> Vector3<f64> {
        Vector3::new(self.x[0], self.x[1], self.x[2])
    }

    /// Rover velocity: null without dynamics
    pub fn velocity(&self) -> Vector3<f64> {
        if self.np == 9 {
            Vector3::new(self.x[3], self.x[4], self.x[5])
        } else {
            Vector3::zeros()
        }
    }

    /// (Re)initialize one component: prior value and variance,
    /// all correlations dropped.
    pub fn init_component(&mut self, i: usize, x0: f64, var: f64) {
        let nx = self.nx();
        self.x[i] = x0;

        for j in 0..nx {
            self.p[(i, j)] = 0.0;
            self.p[(j, i)] = 0.0;
        }

        self.p[(i, i)] = var;
    }

    /// A component is active when either its value or variance is set
    pub fn is_active(&self, i: usize) -> bool {
        self.x[i] != 0.0 || self.p[(i, i)] > 0.0
    }

    /// Indices of all active components, in state order
    pub fn active_indices(&self) -> Vec<usize> {
        (0..self.nx()).filter(|i| self.is_active(*i)).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cfg::{Config, IonoOption, PositioningMode, TropoOption};
    use crate::constants::MAXSAT;

    #[test]
    fn dimensions_follow_configuration() {
        let mut cfg = Config::default();
        let state = FilterState::new(&cfg);
        assert_eq!(state.nx(), 3 + MAXSAT);
        assert_eq!(state.na(), 3);

        cfg.dynamics = true;
        cfg.iono = IonoOption::Estimate;
        cfg.tropo = TropoOption::EstimateGradient;
        let state = FilterState::new(&cfg);
        assert_eq!(state.nx(), 9 + MAXSAT + 6 + MAXSAT);
        assert_eq!(state.na(), 9 + MAXSAT + 6);
        assert_eq!(state.tropo_index(1), Some(9 + MAXSAT + 3));

        cfg.dynamics = false;
        cfg.mode = PositioningMode::DGps;
        let state = FilterState::new(&cfg);
        assert_eq!(state.nx(), 3 + MAXSAT + 6);
        assert_eq!(state.amb_index(0), None);
    }

    #[test]
    fn component_lifecycle() {
        let cfg = Config::default();
        let mut state = FilterState::new(&cfg);

        assert!(!state.is_active(0));

        state.init_component(0, 1.0, 4.0);
        state.p[(0, 1)] = 0.5;
        state.p[(1, 0)] = 0.5;

        assert!(state.is_active(0));
        assert_eq!(state.active_indices(), vec![0]);

        // re-init drops correlations
        state.init_component(0, 2.0, 9.0);
        assert_eq!(state.p[(0, 1)], 0.0);
        assert_eq!(state.p[(1, 0)], 0.0);
        assert_eq!(state.p[(0, 0)], 9.0);
    }
}
