//! RTK solutions
use crate::prelude::{Duration, Epoch, Vector3};

pub(crate) mod validator;

/// Solution quality
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SolutionStatus {
    /// This epoch did not resolve
    #[default]
    None,
    /// Differential code solution
    DGps,
    /// Float carrier phase ambiguities
    Float,
    /// Integer (fixed) carrier phase ambiguities
    Fixed,
}

impl std::fmt::Display for SolutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::DGps => write!(f, "dgps"),
            Self::Float => write!(f, "float"),
            Self::Fixed => write!(f, "fix"),
        }
    }
}

/// One epoch of resolved rover state
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Solution {
    /// Sampling [Epoch]
    pub t: Epoch,

    /// Solution quality
    pub status: SolutionStatus,

    /// Rover position, ECEF (m)
    pub position_ecef_m: Vector3<f64>,

    /// Rover velocity, ECEF (m/s): only estimated with dynamics
    pub velocity_ecef_m_s: Vector3<f64>,

    /// Position covariance upper triangle
    /// (xx, yy, zz, xy, yz, zx) in m²
    pub position_covar_m2: [f64; 6],

    /// Ambiguity ratio test value of this epoch
    pub ratio: f64,

    /// Number of satellites that contributed
    pub nsat: usize,

    /// Age of the differential corrections
    pub age: Duration,
}

impl Solution {
    /// Position standard deviation (m), all axes combined
    pub fn sigma_m(&self) -> f64 {
        (self.position_covar_m2[0] + self.position_covar_m2[1] + self.position_covar_m2[2])
            .abs()
            .sqrt()
    }
}
